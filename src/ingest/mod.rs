//! Frame ingestion sources.
//!
//! Sources supply ordered frames with strictly increasing sequence numbers
//! and monotonic timestamps; decoding and acquisition live here, entirely
//! outside the orchestration core. Available sources:
//! - Synthetic scripted scenes (`stub://` URLs), for demos and tests
//! - Local video files via FFmpeg (feature: `ingest-file-ffmpeg`)
//!
//! Exhaustion is `Ok(None)` and ends a run cleanly; an `Err` is a terminal
//! source failure, reported distinctly from per-detector trouble.

#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod synthetic;

use anyhow::{bail, Result};

use crate::frame::Frame;

pub use synthetic::SyntheticSource;

/// Configuration shared by frame sources.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Source URL: `stub://<scene>` for synthetic scenes, or a local file
    /// path (requires the `ingest-file-ffmpeg` feature).
    pub url: String,
    /// Target frame rate; file sources decimate to this rate and it fixes
    /// the timestamp step for synthetic frames.
    pub target_fps: u32,
    /// Frame width (synthetic frames only; files keep their own size).
    pub width: u32,
    /// Frame height (synthetic frames only).
    pub height: u32,
    /// Stop after this many frames; `None` streams until the underlying
    /// material runs out.
    pub total_frames: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://scene".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
            total_frames: None,
        }
    }
}

/// Frame source boundary.
pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `Ok(None)` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_produced: u64,
    pub url: String,
}

/// Build a source for a URL.
pub fn source_for_url(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())));
    }
    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        if !config.url.contains("://") {
            return Ok(Box::new(file_ffmpeg::FfmpegFileSource::new(config.clone())?));
        }
        bail!("unsupported source url '{}'", config.url);
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        if !config.url.contains("://") {
            bail!("file ingestion requires the ingest-file-ffmpeg feature");
        }
        bail!("unsupported source url '{}'", config.url);
    }
}
