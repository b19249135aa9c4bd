//! GStreamer-backed camera source
//!
//! Builds `v4l2src ! capsfilter ! videoconvert ! appsink` and pulls RGBA
//! samples from the sink. The requested size is only a preference; the
//! negotiated caps of the first sample decide the real resolution.

use std::str::FromStr;

use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::{Frame, FrameSource};
use crate::error::CaptureError;

/// How long to wait for the device to start streaming
const STARTUP_TIMEOUT_SECS: u64 = 10;

/// Live camera opened through GStreamer
pub struct Camera {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    width: u32,
    height: u32,
    /// First sample, pulled during startup to learn the negotiated size
    pending: Option<Frame>,
    released: bool,
}

impl Camera {
    /// Open camera `index` at `device_path` and ask for `width`x`height`
    pub fn open(index: u32, device_path: &str, width: u32, height: u32) -> Result<Self, CaptureError> {
        Self::start(device_path, width, height).map_err(|e| CaptureError::DeviceUnavailable {
            index,
            reason: format!("{:#}", e),
        })
    }

    fn start(device_path: &str, width: u32, height: u32) -> Result<Self> {
        gst::init().context("Failed to initialize GStreamer")?;

        log::info!(
            "Opening camera {} (requested {}x{})",
            device_path,
            width,
            height
        );

        let pipeline = gst::Pipeline::new();

        let source = gst::ElementFactory::make("v4l2src")
            .property("device", device_path)
            .build()
            .context("Failed to create v4l2src element")?;

        // Prefer the requested size, accept whatever raw format the device offers otherwise
        let preferred = gst::Caps::from_str(&format!(
            "video/x-raw,width={},height={};video/x-raw",
            width, height
        ))
        .context("Failed to build camera caps")?;
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", &preferred)
            .build()
            .context("Failed to create capsfilter element")?;

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .context("Failed to create videoconvert element")?;

        // Keep only the newest frame so slow recognition never builds a backlog
        let appsink = gst_app::AppSink::builder()
            .name("camera-sink")
            .caps(&gst::Caps::builder("video/x-raw").field("format", "RGBA").build())
            .max_buffers(1)
            .drop(true)
            .sync(false)
            .build();

        pipeline.add_many([&source, &capsfilter, &videoconvert, appsink.upcast_ref()])?;
        gst::Element::link_many([&source, &capsfilter, &videoconvert, appsink.upcast_ref()])?;

        // From here on Drop stops the pipeline if anything below fails
        let mut camera = Self {
            pipeline,
            appsink,
            width: 0,
            height: 0,
            pending: None,
            released: false,
        };

        camera
            .pipeline
            .set_state(gst::State::Playing)
            .context("Failed to start camera pipeline")?;

        let sample = camera
            .appsink
            .try_pull_sample(gst::ClockTime::from_seconds(STARTUP_TIMEOUT_SECS))
            .with_context(|| {
                format!(
                    "Camera produced no frames within {}s{}",
                    STARTUP_TIMEOUT_SECS,
                    camera.bus_error().map(|e| format!(": {}", e)).unwrap_or_default()
                )
            })?;

        let frame = sample_to_frame(&sample).context("Failed to decode first camera frame")?;
        camera.width = frame.width();
        camera.height = frame.height();
        camera.pending = Some(frame);

        if (camera.width, camera.height) != (width, height) {
            log::warn!(
                "Camera negotiated {}x{} instead of the requested {}x{}",
                camera.width,
                camera.height,
                width,
                height
            );
        } else {
            log::info!("Camera streaming at {}x{}", camera.width, camera.height);
        }

        Ok(camera)
    }

    /// Pending error message on the pipeline bus, if any
    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
        match msg.view() {
            gst::MessageView::Error(err) => Some(format!(
                "{} ({})",
                err.error(),
                err.debug().unwrap_or_default()
            )),
            _ => None,
        }
    }
}

impl FrameSource for Camera {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        if self.released {
            return Err(CaptureError::FrameRead("camera already released".to_string()));
        }

        let sample = self.appsink.pull_sample().map_err(|_| {
            let reason = self
                .bus_error()
                .unwrap_or_else(|| "end of stream".to_string());
            CaptureError::FrameRead(reason)
        })?;
        sample_to_frame(&sample).map_err(|e| CaptureError::FrameRead(format!("{:#}", e)))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.pending = None;
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::error!("Failed to stop camera pipeline: {}", e);
        } else {
            log::info!("Camera released");
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Copy an RGBA sample into a tightly packed frame, dropping row padding
fn sample_to_frame(sample: &gst::Sample) -> Result<Frame> {
    let caps = sample.caps().context("Sample has no caps")?;
    let info = gst_video::VideoInfo::from_caps(caps).context("Sample caps are not raw video")?;
    let buffer = sample.buffer().context("Sample has no buffer")?;
    let map = buffer
        .map_readable()
        .context("Failed to map camera buffer")?;

    let (width, height) = (info.width(), info.height());
    let stride = info.stride()[0] as usize;
    let row_len = width as usize * 4;
    let data = map.as_slice();

    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let line = data
            .get(start..start + row_len)
            .context("Camera buffer is smaller than its caps")?;
        pixels.extend_from_slice(line);
    }

    Frame::from_raw(width, height, pixels).context("Camera frame has inconsistent size")
}
