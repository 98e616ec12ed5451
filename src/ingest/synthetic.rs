//! Synthetic frame source.
//!
//! Generates a deterministic scripted scene (`stub://` URLs) that drives
//! the reference detectors through real confirmation cycles: a warm flare
//! flickers on and off, a dark slab appears mid-frame, and one or two
//! bright person-shaped blobs wander across the view. Used by the demo
//! binary and the integration tests; seeded noise keeps runs repeatable.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

const NOISE_SEED: u64 = 0x7a1e_5eed;

/// Scene script, in frames: each feature cycles with its own period so
/// runs are long enough to confirm and gaps long enough to clear.
const FLARE_PERIOD: u64 = 120;
const FLARE_ON: u64 = 40;
const SLAB_PERIOD: u64 = 150;
const SLAB_ON: u64 = 50;
const SECOND_PERSON_PERIOD: u64 = 200;
const SECOND_PERSON_ON: u64 = 80;

pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            rng: StdRng::seed_from_u64(NOISE_SEED),
        }
    }

    fn step_ms(&self) -> u64 {
        1000 / u64::from(self.config.target_fps.max(1))
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let mut pixels = vec![0u8; width * height * 3];

        // Dim, slightly noisy background.
        for px in pixels.chunks_exact_mut(3) {
            let base = 24 + self.rng.gen_range(0..8);
            px[0] = base;
            px[1] = base;
            px[2] = base;
        }

        let n = self.frame_count;

        // Warm flare in the upper-left quadrant.
        if n % FLARE_PERIOD < FLARE_ON {
            let flicker = self.rng.gen_range(0..30);
            fill_rect(
                &mut pixels,
                width,
                height,
                0.05,
                0.05,
                0.25,
                0.30,
                [220 + flicker.min(35) as u8, 120, 30],
            );
        }

        // Dark slab (phone-like) in the center band.
        if n % SLAB_PERIOD < SLAB_ON {
            fill_rect(
                &mut pixels,
                width,
                height,
                0.45,
                0.40,
                0.10,
                0.20,
                [6, 6, 6],
            );
        }

        // First person: bright blob drifting left to right.
        let drift = (n % 100) as f32 / 100.0 * 0.6;
        fill_rect(
            &mut pixels,
            width,
            height,
            0.10 + drift,
            0.55,
            0.08,
            0.35,
            [200, 200, 200],
        );

        // Second person: enters and leaves on its own cycle.
        if n % SECOND_PERSON_PERIOD < SECOND_PERSON_ON {
            fill_rect(
                &mut pixels,
                width,
                height,
                0.75,
                0.55,
                0.08,
                0.35,
                [190, 190, 190],
            );
        }

        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(total) = self.config.total_frames {
            if self.frame_count >= total {
                return Ok(None);
            }
        }
        self.frame_count += 1;
        let seq = self.frame_count;
        let ts_ms = seq * self.step_ms();
        let pixels = self.generate_pixels();
        Ok(Some(Frame::new(
            seq,
            ts_ms,
            self.config.width,
            self.config.height,
            pixels,
        )))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_produced: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}

/// Paint an axis-aligned rectangle given in normalized coordinates.
fn fill_rect(
    pixels: &mut [u8],
    width: usize,
    height: usize,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    rgb: [u8; 3],
) {
    let x0 = (x * width as f32) as usize;
    let y0 = (y * height as f32) as usize;
    let x1 = (((x + w) * width as f32) as usize).min(width);
    let y1 = (((y + h) * height as f32) as usize).min(height);
    for row in y0..y1 {
        for col in x0..x1 {
            let i = (row * width + col) * 3;
            pixels[i] = rgb[0];
            pixels[i + 1] = rgb[1];
            pixels[i + 2] = rgb[2];
        }
    }
}
