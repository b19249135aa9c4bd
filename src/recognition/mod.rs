//! Text recognition on the ROI
//!
//! - Token types (token.rs)
//! - Engine trait and tesseract backend (engine.rs)
//! - Confidence filter and publish selection (filter.rs)
//! - Timeout-bounded worker (worker.rs)

pub mod engine;
pub mod filter;
pub mod token;
mod worker;

pub use engine::{RecognitionEngine, TesseractEngine};
pub use filter::{accept, select_for_publish};
pub use token::{BoundingBox, RecognizedToken};
pub use worker::{Outcome, RecognitionWorker};
