//! Time-bounded recognition
//!
//! The engine lives on its own thread and is fed one ROI at a time through a
//! bounded channel. The capture loop waits at most `timeout` for an answer.
//! A call that overruns keeps running in the background; until its late
//! answer arrives (and is thrown away) new cycles report [`Outcome::Busy`].

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::{RecognitionEngine, RecognizedToken};
use crate::capture::Frame;
use crate::error::CaptureError;

type EngineResult = Result<Vec<RecognizedToken>, CaptureError>;

/// Result of submitting one ROI
#[derive(Debug)]
pub enum Outcome {
    Tokens(Vec<RecognizedToken>),
    Failed(CaptureError),
    /// A previous call timed out and is still running
    Busy,
}

pub struct RecognitionWorker {
    jobs: Option<Sender<Frame>>,
    results: Receiver<EngineResult>,
    timeout: Duration,
    in_flight: bool,
    handle: Option<JoinHandle<()>>,
}

impl RecognitionWorker {
    /// Move `engine` onto a dedicated thread
    pub fn spawn<E>(engine: E, timeout: Duration) -> Result<Self, CaptureError>
    where
        E: RecognitionEngine + 'static,
    {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<Frame>(1);
        let (result_tx, result_rx) = crossbeam_channel::bounded::<EngineResult>(1);

        let handle = std::thread::Builder::new()
            .name("recognition".to_string())
            .spawn(move || {
                for image in job_rx {
                    if result_tx.send(engine.recognize(&image)).is_err() {
                        break;
                    }
                }
                log::debug!("Recognition worker exiting");
            })
            .map_err(|e| {
                CaptureError::Recognition(format!("Failed to start recognition worker: {}", e))
            })?;

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            timeout,
            in_flight: false,
            handle: Some(handle),
        })
    }

    /// Recognize `image`, waiting no longer than the configured timeout
    pub fn recognize(&mut self, image: Frame) -> Outcome {
        if self.in_flight {
            match self.results.try_recv() {
                Ok(_) => {
                    log::debug!("Discarding late recognition result");
                    self.in_flight = false;
                }
                Err(TryRecvError::Empty) => return Outcome::Busy,
                Err(TryRecvError::Disconnected) => return Outcome::Failed(worker_gone()),
            }
        }

        let Some(jobs) = &self.jobs else {
            return Outcome::Failed(worker_gone());
        };
        if jobs.send(image).is_err() {
            return Outcome::Failed(worker_gone());
        }

        match self.results.recv_timeout(self.timeout) {
            Ok(Ok(tokens)) => Outcome::Tokens(tokens),
            Ok(Err(e)) => Outcome::Failed(e),
            Err(RecvTimeoutError::Timeout) => {
                self.in_flight = true;
                Outcome::Failed(CaptureError::RecognitionTimeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Outcome::Failed(worker_gone()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn worker_gone() -> CaptureError {
    CaptureError::Recognition("recognition worker stopped".to_string())
}

impl Drop for RecognitionWorker {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop
        self.jobs = None;
        if self.in_flight {
            // A hung engine call would block the join; let the thread go
            log::warn!("Leaving a recognition call running at shutdown");
            return;
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("Recognition worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::BoundingBox;
    use std::sync::Mutex;
    use std::time::Instant;

    struct SlowEngine {
        delay: Duration,
    }

    impl RecognitionEngine for SlowEngine {
        fn recognize(&self, _image: &Frame) -> Result<Vec<RecognizedToken>, CaptureError> {
            std::thread::sleep(self.delay);
            Ok(vec![RecognizedToken::new("late", BoundingBox::default(), 99.0)])
        }
    }

    struct ScriptedEngine {
        script: Mutex<Vec<EngineResult>>,
    }

    impl RecognitionEngine for ScriptedEngine {
        fn recognize(&self, _image: &Frame) -> Result<Vec<RecognizedToken>, CaptureError> {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(Vec::new())
            } else {
                script.remove(0)
            }
        }
    }

    #[test]
    fn test_tokens_and_failures_pass_through() {
        let engine = ScriptedEngine {
            script: Mutex::new(vec![
                Ok(vec![RecognizedToken::new("AB12", BoundingBox::default(), 95.0)]),
                Err(CaptureError::Recognition("engine crashed".into())),
            ]),
        };
        let mut worker = RecognitionWorker::spawn(engine, Duration::from_secs(5)).unwrap();

        match worker.recognize(Frame::new(4, 4)) {
            Outcome::Tokens(tokens) => assert_eq!(tokens[0].text, "AB12"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(matches!(
            worker.recognize(Frame::new(4, 4)),
            Outcome::Failed(CaptureError::Recognition(_))
        ));
        assert!(matches!(
            worker.recognize(Frame::new(4, 4)),
            Outcome::Tokens(ref tokens) if tokens.is_empty()
        ));
    }

    #[test]
    fn test_timeout_then_busy_then_recovers() {
        let engine = SlowEngine {
            delay: Duration::from_millis(300),
        };
        let mut worker = RecognitionWorker::spawn(engine, Duration::from_millis(30)).unwrap();

        let started = Instant::now();
        assert!(matches!(
            worker.recognize(Frame::new(2, 2)),
            Outcome::Failed(CaptureError::RecognitionTimeout(_))
        ));
        assert!(started.elapsed() < Duration::from_millis(300));

        // Still running
        assert!(matches!(worker.recognize(Frame::new(2, 2)), Outcome::Busy));

        // Once the late answer is in, the next call is submitted (and times out again)
        std::thread::sleep(Duration::from_millis(400));
        assert!(matches!(
            worker.recognize(Frame::new(2, 2)),
            Outcome::Failed(CaptureError::RecognitionTimeout(_))
        ));
    }
}
