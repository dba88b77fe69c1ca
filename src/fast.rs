// fast.rs — FAST ring-test corner candidates on one pyramid level.
//
// Reference: Rosten & Drummond, "Machine learning for high-speed corner
// detection" (ECCV 2006).
//
// For every pixel p inside the caller's rectangle, the 16 pixels of the
// radius-3 Bresenham ring are classified against the integer barrier b:
//
//   brighter  if ring > p + b
//   darker    if ring < p - b
//
// p is a candidate when at least `arc_length` (default 10) CONTIGUOUS ring
// pixels are all brighter or all darker. The ring wraps, so index 15 is
// adjacent to index 0. Because both comparisons are strict, raising b can
// only clear classification bits, which is why the candidate set at a
// larger barrier is always a subset of the set at a smaller one.
//
// Contiguity test: the 16 classification bits are duplicated into a u32
// and AND-shifted `arc_length - 1` times; any surviving bit marks a run.
//
// The caller supplies the rectangle; it is additionally clipped to the
// 3-pixel ring margin so a sloppy rectangle can never index outside the
// view.

use std::collections::HashMap;

use crate::error::{KltError, Result};
use crate::image::ImageView;

/// Radius-3 Bresenham ring, clockwise from 12 o'clock.
pub const RING_OFFSETS: [(isize, isize); 16] = [
    ( 0, -3), ( 1, -3), ( 2, -2), ( 3, -1),
    ( 3,  0), ( 3,  1), ( 2,  2), ( 1,  3),
    ( 0,  3), (-1,  3), (-2,  2), (-3,  1),
    (-3,  0), (-3, -1), (-2, -2), (-1, -3),
];

/// Ring radius; the minimum margin a detection rectangle needs.
pub const RING_RADIUS: usize = 3;

/// One ring-test hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastCorner {
    /// Column in the level it was detected on.
    pub x: usize,
    /// Row in the level it was detected on.
    pub y: usize,
    /// Sum of `|ring - center| - barrier` over the best arc.
    pub score: i32,
    /// Pyramid level of the source view.
    pub level: usize,
}

/// FAST-N detector. `arc_length` is N.
#[derive(Debug, Clone, Copy)]
pub struct FastDetector {
    arc_length: usize,
}

impl Default for FastDetector {
    /// FAST-10.
    fn default() -> Self {
        FastDetector { arc_length: 10 }
    }
}

impl FastDetector {
    /// Detector requiring `arc_length` contiguous ring pixels (9..=12).
    pub fn new(arc_length: usize) -> Result<Self> {
        if !(9..=12).contains(&arc_length) {
            return Err(KltError::InvalidArcLength(arc_length));
        }
        Ok(FastDetector { arc_length })
    }

    #[inline]
    pub fn arc_length(&self) -> usize {
        self.arc_length
    }

    /// Candidates inside `[begin, end)` (half-open, `(x, y)` pairs).
    pub fn detect(
        &self,
        image: &ImageView<'_, u8>,
        begin: (usize, usize),
        end: (usize, usize),
        barrier: i32,
        level: usize,
    ) -> Vec<FastCorner> {
        let mut corners = Vec::new();
        self.detect_into(image, begin, end, barrier, level, &mut corners);
        corners
    }

    /// Same as [`detect`](Self::detect) but appends to `out`.
    pub fn detect_into(
        &self,
        image: &ImageView<'_, u8>,
        begin: (usize, usize),
        end: (usize, usize),
        barrier: i32,
        level: usize,
        out: &mut Vec<FastCorner>,
    ) {
        let (w, h) = image.size();
        if w <= 2 * RING_RADIUS || h <= 2 * RING_RADIUS {
            return;
        }
        let x0 = begin.0.max(RING_RADIUS);
        let y0 = begin.1.max(RING_RADIUS);
        let x1 = end.0.min(w - RING_RADIUS);
        let y1 = end.1.min(h - RING_RADIUS);
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let barrier = barrier.clamp(0, 255) as i16;
        let min_cardinals: u8 = if self.arc_length >= 12 { 3 } else { 2 };

        // Seven rows cover the whole ring for the current center row.
        let mut rows: [&[u8]; 7] = [&[][..]; 7];

        for y in y0..y1 {
            for (i, row) in rows.iter_mut().enumerate() {
                *row = image.row(y + i - RING_RADIUS);
            }
            let ring_at = |x: usize, (dx, dy): (isize, isize)| -> i16 {
                let r = (RING_RADIUS as isize + dy) as usize;
                rows[r][(x as isize + dx) as usize] as i16
            };

            for x in x0..x1 {
                let center = rows[RING_RADIUS][x] as i16;
                let hi = center + barrier;
                let lo = center - barrier;

                // Cardinal points (indices 0, 4, 8, 12) reject most pixels.
                let mut bright = 0u8;
                let mut dark = 0u8;
                for k in [0usize, 4, 8, 12] {
                    let v = ring_at(x, RING_OFFSETS[k]);
                    bright += (v > hi) as u8;
                    dark += (v < lo) as u8;
                }
                if bright < min_cardinals && dark < min_cardinals {
                    continue;
                }

                let mut ring = [0i16; 16];
                for (k, &off) in RING_OFFSETS.iter().enumerate() {
                    ring[k] = ring_at(x, off);
                }

                if let Some(score) = self.ring_score(center, &ring, barrier) {
                    out.push(FastCorner { x, y, score, level });
                }
            }
        }
    }

    /// `Some(score)` if the ring holds a qualifying arc.
    fn ring_score(&self, center: i16, ring: &[i16; 16], barrier: i16) -> Option<i32> {
        let mut bright_mask: u16 = 0;
        let mut dark_mask: u16 = 0;
        for (i, &v) in ring.iter().enumerate() {
            let diff = v - center;
            if diff > barrier {
                bright_mask |= 1 << i;
            } else if diff < -barrier {
                dark_mask |= 1 << i;
            }
        }

        [bright_mask, dark_mask]
            .into_iter()
            .filter(|&mask| has_run(mask, self.arc_length))
            .map(|mask| arc_score(center, ring, barrier, mask))
            .max()
    }
}

/// True if the circular 16-bit mask holds `n` contiguous set bits.
#[inline]
fn has_run(mask: u16, n: usize) -> bool {
    if (mask.count_ones() as usize) < n {
        return false;
    }
    let mut acc = (mask as u32) | ((mask as u32) << 16);
    for _ in 1..n {
        acc &= acc >> 1;
    }
    acc != 0
}

/// Score of the longest circular run in `mask`.
fn arc_score(center: i16, ring: &[i16; 16], barrier: i16, mask: u16) -> i32 {
    let doubled = (mask as u32) | ((mask as u32) << 16);
    let mut best_start = 0usize;
    let mut best_len = 0usize;
    let mut i = 0usize;
    while i < 16 {
        if doubled & (1 << i) == 0 {
            i += 1;
            continue;
        }
        let start = i;
        while i < 32 && doubled & (1 << i) != 0 {
            i += 1;
        }
        if i - start > best_len {
            best_len = i - start;
            best_start = start;
        }
    }

    (best_start..best_start + best_len.min(16))
        .map(|j| ((ring[j % 16] - center).abs() - barrier).max(0) as i32)
        .sum()
}

/// Keep candidates whose score beats every 8-connected candidate neighbour.
///
/// Candidates on different levels never suppress each other. Optional
/// post-filter for callers of [`FastDetector::detect`]; the grid selector
/// keeps raw candidates and lets the per-cell Shi-Tomasi best do the thinning.
pub fn nonmax_suppression(corners: &[FastCorner]) -> Vec<FastCorner> {
    let scores: HashMap<(usize, usize, usize), i32> = corners
        .iter()
        .map(|c| ((c.level, c.x, c.y), c.score))
        .collect();

    corners
        .iter()
        .filter(|c| {
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = c.x as isize + dx;
                    let ny = c.y as isize + dy;
                    if nx < 0 || ny < 0 {
                        continue;
                    }
                    if let Some(&s) = scores.get(&(c.level, nx as usize, ny as usize)) {
                        if s >= c.score {
                            return false;
                        }
                    }
                }
            }
            true
        })
        .copied()
        .collect()
}
