// grid.rs — Cell partition used by the feature selector.
//
// The level-0 image is split into cols × rows cells of (possibly
// fractional) size  (width / cols) × (height / rows). Every cell holds
//
//   - a `blocked` flag, set when an already-tracked point falls inside it,
//   - the best candidate offered so far (highest Shi-Tomasi score).
//
// Both are scratch: `reset` clears them at the start of each selection.
// Blocking wins over scoring; a blocked cell rejects every offer.

use crate::error::{KltError, Result};

/// Best candidate recorded for one cell, in level-0 pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellCandidate {
    pub x: usize,
    pub y: usize,
    pub score: f32,
    pub level: usize,
}

/// Fixed cols × rows partition of an image.
#[derive(Debug, Clone)]
pub struct CellGrid {
    cols: usize,
    rows: usize,
    cell_w: f32,
    cell_h: f32,
    img_w: usize,
    img_h: usize,
    blocked: Vec<bool>,
    best: Vec<Option<CellCandidate>>,
}

impl CellGrid {
    /// Grid of `cols × rows` cells over a `img_w × img_h` image.
    pub fn new(img_w: usize, img_h: usize, cols: usize, rows: usize) -> Result<Self> {
        if cols == 0 || rows == 0 {
            return Err(KltError::InvalidGridSize { cols, rows });
        }
        let mut grid = CellGrid {
            cols,
            rows,
            cell_w: 1.0,
            cell_h: 1.0,
            img_w: 0,
            img_h: 0,
            blocked: vec![false; cols * rows],
            best: vec![None; cols * rows],
        };
        grid.reset(img_w, img_h);
        Ok(grid)
    }

    /// Clear all cells and adopt a (possibly new) image size.
    pub fn reset(&mut self, img_w: usize, img_h: usize) {
        self.img_w = img_w;
        self.img_h = img_h;
        self.cell_w = img_w as f32 / self.cols as f32;
        self.cell_h = img_h as f32 / self.rows as f32;
        self.blocked.fill(false);
        self.best.fill(None);
    }

    /// `(cols, rows)`.
    #[inline]
    pub fn dims(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fractional cell size `(w, h)` in pixels.
    #[inline]
    pub fn cell_size(&self) -> (f32, f32) {
        (self.cell_w, self.cell_h)
    }

    /// Row-major index of the cell containing `(x, y)`, `None` outside the image.
    pub fn cell_index(&self, x: f32, y: f32) -> Option<usize> {
        if !(x >= 0.0 && y >= 0.0 && x < self.img_w as f32 && y < self.img_h as f32) {
            return None;
        }
        // Rounding at the far edge can land on cols/rows exactly.
        let col = ((x / self.cell_w) as usize).min(self.cols - 1);
        let row = ((y / self.cell_h) as usize).min(self.rows - 1);
        Some(row * self.cols + col)
    }

    /// Block the cell containing `(x, y)`. Points outside the image are ignored.
    pub fn block(&mut self, x: f32, y: f32) {
        if let Some(idx) = self.cell_index(x, y) {
            self.blocked[idx] = true;
            self.best[idx] = None;
        }
    }

    #[inline]
    pub fn is_blocked(&self, idx: usize) -> bool {
        self.blocked[idx]
    }

    /// Number of blocked cells.
    pub fn count_blocked(&self) -> usize {
        self.blocked.iter().filter(|&&b| b).count()
    }

    /// Offer a candidate to its cell. Returns true if it became the cell's best.
    pub fn offer(&mut self, candidate: CellCandidate) -> bool {
        let Some(idx) = self.cell_index(candidate.x as f32, candidate.y as f32) else {
            return false;
        };
        if self.blocked[idx] {
            return false;
        }
        match self.best[idx] {
            Some(current) if current.score >= candidate.score => false,
            _ => {
                self.best[idx] = Some(candidate);
                true
            }
        }
    }

    /// Best candidate of cell `idx`.
    #[inline]
    pub fn best(&self, idx: usize) -> Option<CellCandidate> {
        self.best[idx]
    }
}
