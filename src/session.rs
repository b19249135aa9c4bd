//! Capture loop: acquire → crop → recognize → filter → publish → render
//!
//! The loop is single threaded apart from the recognition worker, and only
//! checks the exit signal at the end of a cycle, so a slow frame read or a
//! recognition call near its timeout delays shutdown accordingly.

use chrono::{DateTime, Local};

use crate::capture::{self, Frame, FrameSource, Region};
use crate::config::{CaptureConfig, PublishPolicy};
use crate::display::{self, Display, ExitSignal};
use crate::error::CaptureError;
use crate::publish::StatePublisher;
use crate::recognition::{self, Outcome, RecognitionWorker, RecognizedToken};

/// Lifecycle of a capture run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    Initializing,
    Running,
    Stopped(StopReason),
    Failed,
}

/// Current [`LoopState`] of a run, advanced only along legal transitions
#[derive(Debug)]
pub struct Lifecycle {
    state: LoopState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LoopState::Uninitialized,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Move to `next`; returns false and keeps the current state if the
    /// transition is not allowed
    pub fn enter(&mut self, next: LoopState) -> bool {
        let allowed = matches!(
            (self.state, next),
            (LoopState::Uninitialized, LoopState::Initializing)
                | (LoopState::Initializing, LoopState::Running)
                | (LoopState::Initializing, LoopState::Failed)
                | (LoopState::Running, LoopState::Stopped(_))
        );
        if !allowed {
            log::warn!("Ignoring state change {:?} -> {:?}", self.state, next);
            return false;
        }
        log::debug!("Capture loop state: {:?} -> {:?}", self.state, next);
        self.state = next;
        true
    }
}

/// Why a running loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Exit key or signal
    UserExit,
    /// Frame read failed; treated as end of stream
    EndOfStream,
    /// The display reported an error or was closed
    DisplayClosed,
}

/// Counters reported when the loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub accepted: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub recognition_failures: u64,
    /// Cycles rendered without recognition because a timed-out call was still running
    pub recognition_skipped: u64,
}

pub struct CaptureLoop {
    threshold: f32,
    policy: PublishPolicy,
    region: Region,
    source: Box<dyn FrameSource>,
    display: Box<dyn Display>,
    recognizer: RecognitionWorker,
    publisher: StatePublisher,
    exit: ExitSignal,
    lifecycle: Lifecycle,
    stats: CycleStats,
    released: bool,
}

impl CaptureLoop {
    /// Finish initialization against an opened source
    ///
    /// Computes the ROI from the negotiated resolution and opens the display.
    /// The heartbeat is written only once both succeed; the source is
    /// released on every error path, which also leaves `lifecycle` in
    /// [`LoopState::Failed`].
    #[allow(clippy::too_many_arguments)]
    pub fn initialize<F>(
        config: &CaptureConfig,
        policy: PublishPolicy,
        mut lifecycle: Lifecycle,
        mut publisher: StatePublisher,
        mut source: Box<dyn FrameSource>,
        recognizer: RecognitionWorker,
        exit: ExitSignal,
        open_display: F,
    ) -> Result<Self, CaptureError>
    where
        F: FnOnce(u32, u32) -> Result<Box<dyn Display>, CaptureError>,
    {
        let (width, height) = source.resolution();
        let region = capture::compute_region(width, height, config.roi_width, config.roi_height);
        if let Err(e) = region.validate(width, height) {
            source.release();
            lifecycle.enter(LoopState::Failed);
            return Err(e);
        }
        log::info!(
            "ROI at ({}, {}) size {}x{} in {}x{} frame",
            region.x,
            region.y,
            region.width,
            region.height,
            width,
            height
        );

        let display = match open_display(width, height) {
            Ok(display) => display,
            Err(e) => {
                source.release();
                lifecycle.enter(LoopState::Failed);
                return Err(e);
            }
        };

        // Last step: nothing after this can fail initialization
        if let Err(e) = publisher.mark_initialized(&Local::now()) {
            log::error!("Failed to write heartbeat: {}", e);
        }
        lifecycle.enter(LoopState::Running);

        Ok(Self {
            threshold: config.threshold(),
            policy,
            region,
            source,
            display,
            recognizer,
            publisher,
            exit,
            lifecycle,
            stats: CycleStats::default(),
            released: false,
        })
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn state(&self) -> LoopState {
        self.lifecycle.state()
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    /// Run cycles until something stops the loop, then release resources
    pub fn run(&mut self) -> StopReason {
        let reason = loop {
            if let Some(reason) = self.cycle() {
                break reason;
            }
        };

        self.lifecycle.enter(LoopState::Stopped(reason));
        self.shutdown();

        let stats = self.stats;
        log::info!(
            "Capture stopped ({:?}) after {} cycles: {} accepted, {} published, {} publish failures, {} recognition failures, {} skipped",
            reason,
            stats.cycles,
            stats.accepted,
            stats.published,
            stats.publish_failures,
            stats.recognition_failures,
            stats.recognition_skipped
        );
        reason
    }

    /// One acquisition cycle; `Some` when the loop has to stop
    fn cycle(&mut self) -> Option<StopReason> {
        let mut frame = match self.source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("{}", e);
                return Some(StopReason::EndOfStream);
            }
        };
        self.stats.cycles += 1;

        let tokens = self.recognize(&frame);
        let accepted = recognition::accept(tokens, self.threshold);
        self.stats.accepted += accepted.len() as u64;

        if !accepted.is_empty() {
            display::draw_token_boxes(&mut frame, &accepted, &self.region);
            let now = Local::now();
            for token in &accepted {
                println!("{}", format_token_line(&now, token));
            }
            self.publish(&accepted);
        }

        display::draw_region_outline(&mut frame, &self.region);
        if let Err(e) = self.display.show(&frame) {
            log::error!("{}", e);
            return Some(StopReason::DisplayClosed);
        }

        if self.exit.is_requested() {
            return Some(StopReason::UserExit);
        }
        None
    }

    /// Crop and recognize; any failure yields no tokens for this cycle
    fn recognize(&mut self, frame: &Frame) -> Vec<RecognizedToken> {
        let roi = match capture::crop(frame, &self.region) {
            Ok(roi) => roi,
            Err(e) => {
                log::error!("{}", e);
                return Vec::new();
            }
        };

        match self.recognizer.recognize(roi) {
            Outcome::Tokens(tokens) => tokens,
            Outcome::Failed(e) => {
                self.stats.recognition_failures += 1;
                log::warn!("Skipping cycle {}: {}", self.stats.cycles, e);
                Vec::new()
            }
            Outcome::Busy => {
                self.stats.recognition_skipped += 1;
                Vec::new()
            }
        }
    }

    fn publish(&mut self, accepted: &[RecognizedToken]) {
        for token in recognition::select_for_publish(accepted, self.policy) {
            match self.publisher.publish(&token.text) {
                Ok(()) => self.stats.published += 1,
                Err(e) => {
                    // Abandon the remaining writes of this cycle
                    self.stats.publish_failures += 1;
                    log::error!("{}", e);
                    return;
                }
            }
        }
    }

    /// Release the device and close the display, once
    fn shutdown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.source.release();
        self.display.close();
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Console line for an accepted token: `HH:MM:SS # text confidence`
pub fn format_token_line(time: &DateTime<Local>, token: &RecognizedToken) -> String {
    format!(
        "{} # {} {}",
        time.format("%H:%M:%S"),
        token.text,
        token.confidence
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::{BoundingBox, RecognitionEngine};
    use chrono::TimeZone;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Mutex;
    use std::time::Duration;

    type Script = Vec<Result<Vec<RecognizedToken>, CaptureError>>;

    /// Yields `frames` frames, then fails the read
    struct FakeSource {
        width: u32,
        height: u32,
        frames: usize,
        releases: Rc<Cell<u32>>,
    }

    impl FrameSource for FakeSource {
        fn resolution(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            if self.frames == 0 {
                return Err(CaptureError::FrameRead("device unplugged".into()));
            }
            self.frames -= 1;
            Ok(Frame::new(self.width, self.height))
        }

        fn release(&mut self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    struct FakeEngine {
        script: Mutex<Script>,
        delay: Duration,
    }

    impl FakeEngine {
        fn new(script: Script) -> Self {
            Self {
                script: Mutex::new(script),
                delay: Duration::ZERO,
            }
        }
    }

    impl RecognitionEngine for FakeEngine {
        fn recognize(&self, image: &Frame) -> Result<Vec<RecognizedToken>, CaptureError> {
            assert_eq!(image.dimensions(), (300, 100));
            std::thread::sleep(self.delay);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(Vec::new())
            } else {
                script.remove(0)
            }
        }
    }

    /// Counts frames; raises the exit signal after `exit_after` frames
    struct FakeDisplay {
        shown: Rc<Cell<usize>>,
        closes: Rc<Cell<u32>>,
        exit_after: Option<(usize, ExitSignal)>,
        fail_after: Option<usize>,
    }

    impl Display for FakeDisplay {
        fn show(&mut self, _frame: &Frame) -> Result<(), CaptureError> {
            if self.fail_after == Some(self.shown.get()) {
                return Err(CaptureError::Display("window closed".into()));
            }
            self.shown.set(self.shown.get() + 1);
            if let Some((after, exit)) = &self.exit_after
                && self.shown.get() >= *after
            {
                exit.request();
            }
            Ok(())
        }

        fn close(&mut self) {
            self.closes.set(self.closes.get() + 1);
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        publisher: StatePublisher,
        releases: Rc<Cell<u32>>,
        shown: Rc<Cell<usize>>,
        closes: Rc<Cell<u32>>,
        exit: ExitSignal,
    }

    fn config(roi_width: u32, roi_height: u32, confidence: u8) -> CaptureConfig {
        CaptureConfig {
            cam_index: 0,
            cam_name: "CAM1".to_string(),
            cam_width: 640,
            cam_height: 480,
            roi_width,
            roi_height,
            confidence,
        }
    }

    fn lifecycle_in(state: LoopState) -> Lifecycle {
        let mut lifecycle = Lifecycle::new();
        if state != LoopState::Uninitialized {
            lifecycle.enter(LoopState::Initializing);
        }
        if state != LoopState::Initializing {
            lifecycle.enter(state);
        }
        lifecycle
    }

    fn token(text: &str, confidence: f32) -> RecognizedToken {
        RecognizedToken::new(text, BoundingBox::new(1, 1, 10, 10), confidence)
    }

    fn start(
        config: &CaptureConfig,
        policy: PublishPolicy,
        frames: usize,
        script: Script,
        exit_after: Option<usize>,
        fail_after: Option<usize>,
    ) -> (Harness, Result<CaptureLoop, CaptureError>) {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let publisher = StatePublisher::new(&data_dir);
        publisher.ensure_dir().unwrap();
        publisher.init_publish().unwrap();

        let harness = Harness {
            _dir: dir,
            publisher: StatePublisher::new(&data_dir),
            releases: Rc::new(Cell::new(0)),
            shown: Rc::new(Cell::new(0)),
            closes: Rc::new(Cell::new(0)),
            exit: ExitSignal::new(),
        };

        let source = FakeSource {
            width: 640,
            height: 480,
            frames,
            releases: harness.releases.clone(),
        };
        let engine = FakeEngine::new(script);
        let recognizer = RecognitionWorker::spawn(engine, Duration::from_secs(5)).unwrap();
        let display = FakeDisplay {
            shown: harness.shown.clone(),
            closes: harness.closes.clone(),
            exit_after: exit_after.map(|n| (n, harness.exit.clone())),
            fail_after,
        };

        let capture = CaptureLoop::initialize(
            config,
            policy,
            lifecycle_in(LoopState::Initializing),
            publisher,
            Box::new(source),
            recognizer,
            harness.exit.clone(),
            move |_, _| Ok(Box::new(display) as Box<dyn Display>),
        );
        (harness, capture)
    }

    #[test]
    fn test_initialize_computes_region_and_heartbeat() {
        let (harness, capture) = start(
            &config(300, 100, 90),
            PublishPolicy::Last,
            0,
            Vec::new(),
            None,
            None,
        );
        let capture = capture.unwrap();
        assert_eq!(capture.region(), Region::new(170, 190, 300, 100));
        assert_eq!(capture.state(), LoopState::Running);

        let heartbeat = std::fs::read_to_string(harness.publisher.init_path()).unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(&heartbeat, "%Y-%m-%d %H:%M:%S").is_ok());
        assert!(harness.publisher.read_result().is_none());
    }

    #[test]
    fn test_oversized_roi_fails_and_releases_device() {
        let (harness, capture) = start(
            &config(700, 100, 90),
            PublishPolicy::Last,
            5,
            Vec::new(),
            None,
            None,
        );
        assert!(matches!(capture, Err(CaptureError::RegionOutOfBounds { .. })));
        assert_eq!(harness.releases.get(), 1);
        assert!(!harness.publisher.init_path().exists());
    }

    #[test]
    fn test_display_open_failure_releases_device() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = StatePublisher::new(dir.path());
        let init_path = publisher.init_path();
        let releases = Rc::new(Cell::new(0));
        let source = FakeSource {
            width: 640,
            height: 480,
            frames: 1,
            releases: releases.clone(),
        };
        let engine = FakeEngine::new(Vec::new());
        let recognizer = RecognitionWorker::spawn(engine, Duration::from_secs(1)).unwrap();

        let result = CaptureLoop::initialize(
            &config(300, 100, 90),
            PublishPolicy::Last,
            lifecycle_in(LoopState::Initializing),
            publisher,
            Box::new(source),
            recognizer,
            ExitSignal::new(),
            |_, _| Err(CaptureError::Display("no video sink".into())),
        );
        assert!(matches!(result, Err(CaptureError::Display(_))));
        assert_eq!(releases.get(), 1);
        // A run that never started must not leave a heartbeat behind
        assert!(!init_path.exists());
    }

    #[test]
    fn test_lifecycle_follows_legal_transitions() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LoopState::Uninitialized);
        assert!(!lifecycle.enter(LoopState::Running));
        assert!(lifecycle.enter(LoopState::Initializing));
        assert!(lifecycle.enter(LoopState::Running));
        assert!(!lifecycle.enter(LoopState::Failed));
        assert!(lifecycle.enter(LoopState::Stopped(StopReason::UserExit)));
        // Stopped is terminal
        assert!(!lifecycle.enter(LoopState::Running));
        assert_eq!(lifecycle.state(), LoopState::Stopped(StopReason::UserExit));

        let mut failed = lifecycle_in(LoopState::Initializing);
        assert!(failed.enter(LoopState::Failed));
        assert!(!failed.enter(LoopState::Running));
    }

    #[test]
    fn test_only_confident_token_is_published() {
        let (harness, capture) = start(
            &config(300, 100, 90),
            PublishPolicy::Last,
            1,
            vec![Ok(vec![token("AB12", 95.0), token("AB1", 60.0)])],
            None,
            None,
        );
        let mut capture = capture.unwrap();
        assert_eq!(capture.run(), StopReason::EndOfStream);

        assert_eq!(harness.publisher.read_result().as_deref(), Some("AB12"));
        let stats = capture.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.published, 1);
    }

    #[test]
    fn test_last_accepted_token_wins() {
        let (harness, capture) = start(
            &config(300, 100, 90),
            PublishPolicy::Last,
            1,
            vec![Ok(vec![
                token("first", 95.0),
                token("noise", 10.0),
                token("second", 99.0),
                token("third", 91.0),
            ])],
            None,
            None,
        );
        let mut capture = capture.unwrap();
        capture.run();

        assert_eq!(harness.publisher.read_result().as_deref(), Some("third"));
        assert_eq!(capture.stats().published, 3);
    }

    #[test]
    fn test_highest_confidence_policy() {
        let (harness, capture) = start(
            &config(300, 100, 90),
            PublishPolicy::HighestConfidence,
            1,
            vec![Ok(vec![token("best", 99.0), token("later", 95.0)])],
            None,
            None,
        );
        let mut capture = capture.unwrap();
        capture.run();

        assert_eq!(harness.publisher.read_result().as_deref(), Some("best"));
        assert_eq!(capture.stats().published, 1);
    }

    #[test]
    fn test_frame_read_failure_on_cycle_ten_stops_cleanly() {
        let (harness, capture) = start(
            &config(300, 100, 90),
            PublishPolicy::Last,
            9,
            Vec::new(),
            None,
            None,
        );
        let mut capture = capture.unwrap();
        assert_eq!(capture.run(), StopReason::EndOfStream);
        assert_eq!(capture.state(), LoopState::Stopped(StopReason::EndOfStream));
        assert_eq!(capture.stats().cycles, 9);
        assert_eq!(harness.shown.get(), 9);

        drop(capture);
        assert_eq!(harness.releases.get(), 1);
        assert_eq!(harness.closes.get(), 1);
    }

    #[test]
    fn test_recognition_failure_keeps_previous_result() {
        let (harness, capture) = start(
            &config(300, 100, 90),
            PublishPolicy::Last,
            3,
            vec![
                Ok(vec![token("OLD", 95.0)]),
                Err(CaptureError::Recognition("engine crashed".into())),
                Ok(vec![token("low", 50.0)]),
            ],
            None,
            None,
        );
        let mut capture = capture.unwrap();
        assert_eq!(capture.run(), StopReason::EndOfStream);

        assert_eq!(harness.publisher.read_result().as_deref(), Some("OLD"));
        let stats = capture.stats();
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.recognition_failures, 1);
        assert_eq!(harness.shown.get(), 3);
    }

    #[test]
    fn test_user_exit_stops_after_render() {
        let (harness, capture) = start(
            &config(300, 100, 90),
            PublishPolicy::Last,
            100,
            Vec::new(),
            Some(3),
            None,
        );
        let mut capture = capture.unwrap();
        assert_eq!(capture.run(), StopReason::UserExit);
        assert_eq!(capture.stats().cycles, 3);
        assert_eq!(harness.releases.get(), 1);
        assert_eq!(harness.closes.get(), 1);
    }

    #[test]
    fn test_display_error_stops_loop() {
        let (harness, capture) = start(
            &config(300, 100, 90),
            PublishPolicy::Last,
            100,
            Vec::new(),
            None,
            Some(2),
        );
        let mut capture = capture.unwrap();
        assert_eq!(capture.run(), StopReason::DisplayClosed);
        assert_eq!(capture.stats().cycles, 3);
        assert_eq!(harness.releases.get(), 1);
    }

    #[test]
    fn test_publish_failure_does_not_stop_capture() {
        let (harness, capture) = start(
            &config(300, 100, 90),
            PublishPolicy::Last,
            2,
            vec![Ok(vec![token("AB12", 95.0)]), Ok(vec![token("CD34", 95.0)])],
            None,
            None,
        );
        let mut capture = capture.unwrap();
        std::fs::remove_dir_all(harness.publisher.data_dir()).unwrap();

        assert_eq!(capture.run(), StopReason::EndOfStream);
        let stats = capture.stats();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.publish_failures, 2);
        assert_eq!(stats.published, 0);
    }

    #[test]
    fn test_publish_failure_abandons_rest_of_cycle() {
        let (harness, capture) = start(
            &config(300, 100, 90),
            PublishPolicy::Last,
            1,
            vec![Ok(vec![token("AB12", 95.0), token("CD34", 96.0)])],
            None,
            None,
        );
        let mut capture = capture.unwrap();
        std::fs::remove_dir_all(harness.publisher.data_dir()).unwrap();

        assert_eq!(capture.run(), StopReason::EndOfStream);
        let stats = capture.stats();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.publish_failures, 1);
        assert_eq!(stats.published, 0);
    }

    #[test]
    fn test_slow_recognition_keeps_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = StatePublisher::new(dir.path());
        let result_path = publisher.result_path();
        let shown = Rc::new(Cell::new(0));
        let source = FakeSource {
            width: 640,
            height: 480,
            frames: 3,
            releases: Rc::new(Cell::new(0)),
        };
        let engine = FakeEngine {
            script: Mutex::new(vec![Ok(vec![token("LATE", 99.0)])]),
            delay: Duration::from_millis(500),
        };
        let recognizer = RecognitionWorker::spawn(engine, Duration::from_millis(30)).unwrap();
        let display = FakeDisplay {
            shown: shown.clone(),
            closes: Rc::new(Cell::new(0)),
            exit_after: None,
            fail_after: None,
        };

        let mut capture = CaptureLoop::initialize(
            &config(300, 100, 90),
            PublishPolicy::Last,
            lifecycle_in(LoopState::Initializing),
            publisher,
            Box::new(source),
            recognizer,
            ExitSignal::new(),
            move |_, _| Ok(Box::new(display) as Box<dyn Display>),
        )
        .unwrap();

        assert_eq!(capture.run(), StopReason::EndOfStream);
        let stats = capture.stats();
        // First cycle times out, the next two find the call still running
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.recognition_failures, 1);
        assert_eq!(stats.recognition_skipped, 2);
        assert_eq!(stats.published, 0);
        assert_eq!(shown.get(), 3);
        assert!(!result_path.exists());
    }

    #[test]
    fn test_format_token_line() {
        let time = Local.with_ymd_and_hms(2024, 6, 1, 13, 4, 5).unwrap();
        assert_eq!(
            format_token_line(&time, &token("AB12", 95.0)),
            "13:04:05 # AB12 95"
        );
    }
}
