//! Local file frame source using FFmpeg.
//!
//! Decodes a local video file in-memory, converts to RGB24 and decimates
//! to the configured frame rate. Timestamps are synthesized from the
//! decimated frame index so the confirmation machines see the same steady
//! clock a live source would provide.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    config: SourceConfig,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    /// Source stream frames seen (pre-decimation).
    decoded_count: u64,
    /// Frames actually produced.
    frame_count: u64,
    /// Keep one source frame of every `decimate`.
    decimate: u64,
    finished: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: SourceConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.url)
            .with_context(|| format!("failed to open video file '{}'", config.url))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let stream_fps = {
            let rate = input_stream.avg_frame_rate();
            if rate.denominator() > 0 {
                (rate.numerator() as f64 / rate.denominator() as f64).round() as u64
            } else {
                0
            }
        };
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let target_fps = u64::from(config.target_fps.max(1));
        let decimate = if stream_fps > target_fps {
            stream_fps / target_fps
        } else {
            1
        };

        Ok(Self {
            config,
            input,
            stream_index,
            decoder,
            scaler,
            decoded_count: 0,
            frame_count: 0,
            decimate,
            finished: false,
        })
    }

    fn step_ms(&self) -> u64 {
        1000 / u64::from(self.config.target_fps.max(1))
    }
}

impl FrameSource for FfmpegFileSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("FfmpegFileSource: opened {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        if let Some(total) = self.config.total_frames {
            if self.frame_count >= total {
                self.finished = true;
                return Ok(None);
            }
        }

        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb_frame = ffmpeg::frame::Video::empty();

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;

            while self.decoder.receive_frame(&mut decoded).is_ok() {
                self.decoded_count += 1;
                if (self.decoded_count - 1) % self.decimate != 0 {
                    continue;
                }
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;

                self.frame_count += 1;
                let seq = self.frame_count;
                return Ok(Some(Frame::new(
                    seq,
                    seq * self.step_ms(),
                    width,
                    height,
                    pixels,
                )));
            }
        }

        // Packet stream ran out: clean exhaustion, not an error.
        self.finished = true;
        Ok(None)
    }

    fn is_healthy(&self) -> bool {
        !self.finished
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_produced: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
