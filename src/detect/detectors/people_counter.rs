use anyhow::Result;

use super::stats::luminance_grid;
use crate::detect::{Detector, RawDetection, Region};
use crate::frame::Frame;

const GRID_COLS: usize = 16;
const GRID_ROWS: usize = 12;

/// Blobs at least this many cells big count as a person candidate.
const MIN_BLOB_CELLS: usize = 2;

/// Blob cells at which confidence reaches 1.0.
const SATURATION_CELLS: usize = 6;

/// Maximum normalized centroid distance for matching a blob to last
/// frame's track.
const MATCH_GATE: f32 = 0.2;

/// People counting heuristic with per-subject tracking.
///
/// Bright connected blobs on the cell grid stand in for person detections;
/// a nearest-centroid match against the previous frame keeps subject ids
/// stable while a person moves through the scene. Subjects that vanish are
/// simply not reported again; their confirmation state decays downstream.
pub struct PeopleCounter {
    /// Cells at or above this mean luminance count as person mass.
    bright_floor: f32,
    tracks: Vec<Track>,
    next_track: u32,
}

struct Track {
    id: u32,
    cx: f32,
    cy: f32,
}

struct Blob {
    cells: usize,
    cx: f32,
    cy: f32,
    region: Region,
}

impl PeopleCounter {
    pub fn new() -> Self {
        Self {
            bright_floor: 120.0,
            tracks: Vec::new(),
            next_track: 1,
        }
    }

    fn find_blobs(&self, frame: &Frame) -> Vec<Blob> {
        let grid = luminance_grid(frame, GRID_COLS, GRID_ROWS);
        let mut bright = vec![false; GRID_COLS * GRID_ROWS];
        for row in 0..GRID_ROWS {
            for col in 0..GRID_COLS {
                bright[row * GRID_COLS + col] = grid.cell(col, row).0 >= self.bright_floor;
            }
        }

        // Flood fill with 4-connectivity over the cell grid.
        let mut visited = vec![false; GRID_COLS * GRID_ROWS];
        let mut blobs = Vec::new();
        for start in 0..GRID_COLS * GRID_ROWS {
            if !bright[start] || visited[start] {
                continue;
            }
            let mut stack = vec![start];
            visited[start] = true;
            let mut cells = Vec::new();
            while let Some(cell) = stack.pop() {
                cells.push(cell);
                let (col, row) = (cell % GRID_COLS, cell / GRID_COLS);
                let mut push = |c: usize, r: usize| {
                    let i = r * GRID_COLS + c;
                    if bright[i] && !visited[i] {
                        visited[i] = true;
                        stack.push(i);
                    }
                };
                if col > 0 {
                    push(col - 1, row);
                }
                if col + 1 < GRID_COLS {
                    push(col + 1, row);
                }
                if row > 0 {
                    push(col, row - 1);
                }
                if row + 1 < GRID_ROWS {
                    push(col, row + 1);
                }
            }

            if cells.len() < MIN_BLOB_CELLS {
                continue;
            }

            let (mut min_col, mut min_row) = (usize::MAX, usize::MAX);
            let (mut max_col, mut max_row) = (0usize, 0usize);
            let mut sum_col = 0.0f32;
            let mut sum_row = 0.0f32;
            for &cell in &cells {
                let (col, row) = (cell % GRID_COLS, cell / GRID_COLS);
                min_col = min_col.min(col);
                min_row = min_row.min(row);
                max_col = max_col.max(col);
                max_row = max_row.max(row);
                sum_col += col as f32 + 0.5;
                sum_row += row as f32 + 0.5;
            }
            blobs.push(Blob {
                cells: cells.len(),
                cx: sum_col / cells.len() as f32 / GRID_COLS as f32,
                cy: sum_row / cells.len() as f32 / GRID_ROWS as f32,
                region: Region::new(
                    min_col as f32 / GRID_COLS as f32,
                    min_row as f32 / GRID_ROWS as f32,
                    (max_col - min_col + 1) as f32 / GRID_COLS as f32,
                    (max_row - min_row + 1) as f32 / GRID_ROWS as f32,
                ),
            });
        }
        // Left-to-right order keeps id assignment deterministic.
        blobs.sort_by(|a, b| a.cx.total_cmp(&b.cx));
        blobs
    }
}

impl Default for PeopleCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for PeopleCounter {
    fn name(&self) -> &'static str {
        "people_counter"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let blobs = self.find_blobs(frame);

        // Greedy nearest-centroid matching against last frame's tracks.
        let mut taken = vec![false; self.tracks.len()];
        let mut next_tracks = Vec::with_capacity(blobs.len());
        let mut detections = Vec::with_capacity(blobs.len());
        for blob in &blobs {
            let mut best: Option<(usize, f32)> = None;
            for (i, track) in self.tracks.iter().enumerate() {
                if taken[i] {
                    continue;
                }
                let dist = ((track.cx - blob.cx).powi(2) + (track.cy - blob.cy).powi(2)).sqrt();
                if dist <= MATCH_GATE && best.map_or(true, |(_, d)| dist < d) {
                    best = Some((i, dist));
                }
            }
            let id = match best {
                Some((i, _)) => {
                    taken[i] = true;
                    self.tracks[i].id
                }
                None => {
                    let id = self.next_track;
                    self.next_track += 1;
                    id
                }
            };
            next_tracks.push(Track {
                id,
                cx: blob.cx,
                cy: blob.cy,
            });

            let confidence = (blob.cells as f32 / SATURATION_CELLS as f32).min(1.0);
            detections.push(
                RawDetection::new(self.name(), confidence)
                    .with_region(blob.region)
                    .with_subject(&format!("p{}", id)),
            );
        }
        self.tracks = next_tracks;
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_people(seq: u64, columns: &[usize]) -> Frame {
        let (width, height) = (64usize, 48usize);
        let mut pixels = vec![20u8; width * height * 3];
        for &left in columns {
            // A 8x16 bright block: roughly 2x4 grid cells.
            for y in 24..40 {
                for x in left..(left + 8).min(width) {
                    let i = (y * width + x) * 3;
                    pixels[i] = 210;
                    pixels[i + 1] = 210;
                    pixels[i + 2] = 210;
                }
            }
        }
        Frame::new(seq, seq * 100, width as u32, height as u32, pixels)
    }

    #[test]
    fn counts_separate_blobs() {
        let mut counter = PeopleCounter::new();
        let detections = counter.detect(&frame_with_people(1, &[4, 40])).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].subject.as_deref(), Some("p1"));
        assert_eq!(detections[1].subject.as_deref(), Some("p2"));
    }

    #[test]
    fn ids_stay_stable_while_subjects_move() {
        let mut counter = PeopleCounter::new();
        counter.detect(&frame_with_people(1, &[4, 40])).unwrap();
        // Both drift right a little.
        let detections = counter.detect(&frame_with_people(2, &[8, 44])).unwrap();
        let subjects: Vec<&str> = detections
            .iter()
            .map(|d| d.subject.as_deref().unwrap())
            .collect();
        assert_eq!(subjects, vec!["p1", "p2"]);
    }

    #[test]
    fn departed_subject_is_not_reported() {
        let mut counter = PeopleCounter::new();
        counter.detect(&frame_with_people(1, &[4, 40])).unwrap();
        let detections = counter.detect(&frame_with_people(2, &[4])).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].subject.as_deref(), Some("p1"));
    }

    #[test]
    fn new_arrival_gets_a_fresh_id() {
        let mut counter = PeopleCounter::new();
        counter.detect(&frame_with_people(1, &[4])).unwrap();
        counter.detect(&frame_with_people(2, &[4])).unwrap();
        let detections = counter.detect(&frame_with_people(3, &[4, 48])).unwrap();
        let subjects: Vec<&str> = detections
            .iter()
            .map(|d| d.subject.as_deref().unwrap())
            .collect();
        assert_eq!(subjects, vec!["p1", "p2"]);
    }

    #[test]
    fn empty_scene_reports_nobody() {
        let mut counter = PeopleCounter::new();
        let frame = Frame::new(1, 100, 64, 48, vec![20u8; 64 * 48 * 3]);
        assert!(counter.detect(&frame).unwrap().is_empty());
    }
}
