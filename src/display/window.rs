//! Preview window fed through `appsrc ! videoconvert ! autovideosink`

use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::ExitSignal;
use super::exit::is_exit_key;
use crate::capture::Frame;
use crate::error::CaptureError;

/// Where annotated frames go
pub trait Display {
    fn show(&mut self, frame: &Frame) -> Result<(), CaptureError>;

    /// Tear down window resources. Must be safe to call more than once.
    fn close(&mut self);
}

/// Window title for a camera label and negotiated size
pub fn window_title(cam_name: &str, width: u32, height: u32) -> String {
    format!("Camera Feed ({}) - {}x{}", cam_name, width, height)
}

/// No window at all
#[derive(Debug, Default)]
pub struct Headless;

impl Display for Headless {
    fn show(&mut self, _frame: &Frame) -> Result<(), CaptureError> {
        Ok(())
    }

    fn close(&mut self) {}
}

/// On-screen preview backed by a GStreamer video sink
pub struct PreviewWindow {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    closed: bool,
}

impl PreviewWindow {
    /// Open a window for `width`x`height` RGBA frames
    ///
    /// Key presses reported by the sink are matched against `exit_key` and
    /// raise `exit`.
    pub fn open(
        title: &str,
        width: u32,
        height: u32,
        exit_key: char,
        exit: ExitSignal,
    ) -> Result<Self, CaptureError> {
        Self::start(title, width, height, exit_key, exit)
            .map_err(|e| CaptureError::Display(format!("{:#}", e)))
    }

    fn start(title: &str, width: u32, height: u32, exit_key: char, exit: ExitSignal) -> Result<Self> {
        gst::init().context("Failed to initialize GStreamer")?;

        let pipeline = gst::Pipeline::new();

        let appsrc = gst_app::AppSrc::builder()
            .name("preview-source")
            .is_live(true)
            .do_timestamp(true)
            .format(gst::Format::Time)
            .caps(
                &gst::Caps::builder("video/x-raw")
                    .field("format", "RGBA")
                    .field("width", width as i32)
                    .field("height", height as i32)
                    .field("framerate", gst::Fraction::new(0, 1))
                    .build(),
            )
            .build();

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .context("Failed to create videoconvert element")?;

        let sink = gst::ElementFactory::make("autovideosink")
            .build()
            .context("Failed to create autovideosink element")?;

        pipeline.add_many([appsrc.upcast_ref(), &videoconvert, &sink])?;
        gst::Element::link_many([appsrc.upcast_ref(), &videoconvert, &sink])?;

        // Sinks that handle input send key presses upstream as navigation events
        let src_pad = appsrc.static_pad("src").context("appsrc has no src pad")?;
        src_pad.add_probe(gst::PadProbeType::EVENT_UPSTREAM, move |_, info| {
            if let Some(gst::PadProbeData::Event(ref event)) = info.data
                && let Ok(gst_video::NavigationEvent::KeyPress { key, .. }) =
                    gst_video::NavigationEvent::parse(event)
                && is_exit_key(&key, exit_key)
            {
                log::info!("Exit key pressed in preview window");
                exit.request();
            }
            gst::PadProbeReturn::Ok
        });

        // Video sinks pick the window title up from the stream tags
        let mut tags = gst::TagList::new();
        if let Some(tags) = tags.get_mut() {
            tags.add::<gst::tags::Title>(&title, gst::TagMergeMode::Replace);
        }
        if !appsrc.send_event(gst::event::Tag::new(tags)) {
            log::debug!("Preview sink did not accept the window title");
        }

        pipeline
            .set_state(gst::State::Playing)
            .context("Failed to start preview pipeline")?;

        log::info!("Preview window opened: {}", title);
        Ok(Self {
            pipeline,
            appsrc,
            closed: false,
        })
    }

    /// Error or end-of-stream posted by the sink (e.g. the window was closed)
    fn check_bus(&self) -> Result<(), CaptureError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos]) else {
            return Ok(());
        };
        match msg.view() {
            gst::MessageView::Error(err) => Err(CaptureError::Display(format!(
                "{} ({})",
                err.error(),
                err.debug().unwrap_or_default()
            ))),
            _ => Err(CaptureError::Display("preview window closed".to_string())),
        }
    }
}

impl Display for PreviewWindow {
    fn show(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        if self.closed {
            return Err(CaptureError::Display("preview window closed".to_string()));
        }
        self.check_bus()?;

        let buffer = gst::Buffer::from_mut_slice(frame.as_raw().clone());
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| CaptureError::Display(format!("Failed to push frame: {:?}", e)))?;
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::error!("Failed to stop preview pipeline: {}", e);
        } else {
            log::info!("Preview window closed");
        }
    }
}

impl Drop for PreviewWindow {
    fn drop(&mut self) {
        self.close();
    }
}
