//! Wires the real camera, tesseract and preview window into a capture run

use crate::capture::Camera;
use crate::config::{self, CaptureConfig, SETTINGS_FILE, Settings};
use crate::display::{Display, ExitSignal, Headless, PreviewWindow, window_title};
use crate::error::CaptureError;
use crate::publish::StatePublisher;
use crate::recognition::{RecognitionWorker, TesseractEngine};
use crate::session::{CaptureLoop, Lifecycle, LoopState, StopReason};

/// Run until the user exits or the camera stops delivering frames
pub fn run(config: &CaptureConfig) -> Result<StopReason, CaptureError> {
    let mut lifecycle = Lifecycle::new();

    let exec_dir = config::executable_dir();
    let settings = Settings::load(&exec_dir.join(SETTINGS_FILE))?;
    let publisher = StatePublisher::new(settings.resolve_data_dir(&exec_dir));

    println!();
    println!("{:<20}: {}", "Camera index", config.cam_index);
    println!("{:<20}: {}", "Camera name", config.cam_name);
    println!("{:<20}: {}", "Data directory", publisher.data_dir().display());

    if let Err(e) = publisher.ensure_dir() {
        log::error!("Creating data directory failed: {}", e);
    }
    if let Err(e) = publisher.init_publish() {
        log::error!("Clearing previous state failed: {}", e);
    }

    lifecycle.enter(LoopState::Initializing);
    println!("Initialize camera ({})...", config.cam_name);

    let device_path = settings.device_path(config.cam_index);
    let camera = match Camera::open(
        config.cam_index,
        &device_path,
        config.cam_width,
        config.cam_height,
    ) {
        Ok(camera) => camera,
        Err(e) => {
            lifecycle.enter(LoopState::Failed);
            return Err(e);
        }
    };

    let exit = ExitSignal::new();
    exit.install_signal_handlers();

    let recognizer = match RecognitionWorker::spawn(
        TesseractEngine::new(&settings),
        settings.recognition_timeout(),
    ) {
        Ok(recognizer) => recognizer,
        Err(e) => {
            lifecycle.enter(LoopState::Failed);
            return Err(e);
        }
    };
    log::info!(
        "Recognition timeout {:?}, publish policy {:?}",
        recognizer.timeout(),
        settings.publish_policy
    );

    let show_window = settings.display;
    let exit_key = settings.exit_key;
    let window_exit = exit.clone();
    let cam_name = config.cam_name.clone();

    let mut capture = CaptureLoop::initialize(
        config,
        settings.publish_policy,
        lifecycle,
        publisher,
        Box::new(camera),
        recognizer,
        exit.clone(),
        move |width, height| -> Result<Box<dyn Display>, CaptureError> {
            if show_window {
                let title = window_title(&cam_name, width, height);
                Ok(Box::new(PreviewWindow::open(
                    &title,
                    width,
                    height,
                    exit_key,
                    window_exit,
                )?))
            } else {
                log::info!("Running headless");
                Ok(Box::new(Headless))
            }
        },
    )?;

    println!("Initialize camera ({})...OK !", config.cam_name);
    exit.watch_stdin(exit_key);
    println!("Press '{}' to exit...", exit_key);
    println!();

    Ok(capture.run())
}
