// selector.rs — Grid-distributed feature selection over a pyramid.
//
// One call:
//   1. Reset the cell grid to the level-0 image size.
//   2. Block every cell that already holds a tracked point.
//   3. Run FAST on each level in [min_level, max_level], inside the
//      detection border. Level-k hits are scaled by 2^k into level-0
//      pixels and dropped if that lands outside the image.
//   4. Score every hit with Shi-Tomasi on LEVEL 0 and keep the best per cell.
//   5. Visit cells in a shuffled order and emit each cell whose best score
//      exceeds the detection threshold, until `max_count` corners are out.
//
// Step 5 makes the choice among qualifying cells random rather than
// rank-ordered when the budget is smaller than the number of cells. The
// generator is owned by the selector (seedable through the config) and can
// be replaced per call with `detect_with_rng`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::fast::{FastCorner, FastDetector};
use crate::grid::{CellCandidate, CellGrid};
use crate::pyramid::ImagePyramid;
use crate::shi_tomasi::shi_tomasi_score;

/// Selector configuration.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Grid `(cols, rows)`; both must be positive.
    pub grid_size: (usize, usize),
    /// FAST intensity barrier.
    pub barrier: i32,
    /// Minimum Shi-Tomasi score a cell's best candidate must exceed.
    pub detection_threshold: f32,
    /// First pyramid level searched.
    pub min_level: usize,
    /// Last pyramid level searched; `None` or past-the-top means the top level.
    pub max_level: Option<usize>,
    /// Per-level `(x, y)` margin kept free of detections.
    pub border: (usize, usize),
    /// Upper bound on the number of returned corners.
    pub max_count: usize,
    /// Seed for the cell-order shuffle; `None` seeds from OS entropy.
    pub random_seed: Option<u64>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        SelectorConfig {
            grid_size: (25, 25),
            barrier: 4,
            detection_threshold: 80.0,
            min_level: 1,
            max_level: None,
            border: (12, 12),
            max_count: 1000,
            random_seed: None,
        }
    }
}

/// A selected corner, in level-0 pixels, with the level it was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureCorner {
    pub x: usize,
    pub y: usize,
    pub level: usize,
}

impl FeatureCorner {
    /// Position as a floating-point point, ready for the tracker.
    #[inline]
    pub fn position(&self) -> [f32; 2] {
        [self.x as f32, self.y as f32]
    }
}

/// Picks at most one corner per grid cell across a range of pyramid levels.
pub struct GridFeatureSelector {
    config: SelectorConfig,
    detector: FastDetector,
    grid: CellGrid,
    candidates: Vec<FastCorner>,
    order: Vec<usize>,
    rng: StdRng,
}

impl GridFeatureSelector {
    pub fn new(config: SelectorConfig) -> Result<Self> {
        let (cols, rows) = config.grid_size;
        let grid = CellGrid::new(0, 0, cols, rows)?;
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(GridFeatureSelector {
            config,
            detector: FastDetector::default(),
            grid,
            candidates: Vec::new(),
            order: Vec::new(),
            rng,
        })
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn set_grid_size(&mut self, cols: usize, rows: usize) -> Result<()> {
        self.grid = CellGrid::new(0, 0, cols, rows)?;
        self.config.grid_size = (cols, rows);
        Ok(())
    }

    pub fn set_barrier(&mut self, barrier: i32) {
        self.config.barrier = barrier;
    }

    pub fn set_detection_threshold(&mut self, threshold: f32) {
        self.config.detection_threshold = threshold;
    }

    pub fn set_max_count(&mut self, max_count: usize) {
        self.config.max_count = max_count;
    }

    pub fn set_border(&mut self, border: (usize, usize)) {
        self.config.border = border;
    }

    pub fn set_level_range(&mut self, min_level: usize, max_level: Option<usize>) {
        self.config.min_level = min_level;
        self.config.max_level = max_level;
    }

    /// Re-seed the internal generator.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.config.random_seed = Some(seed);
    }

    /// Cell grid of the most recent call (blocked flags and per-cell bests).
    pub fn grid(&self) -> &CellGrid {
        &self.grid
    }

    /// Select corners with no existing points.
    pub fn detect(&mut self, pyramid: &ImagePyramid) -> Vec<FeatureCorner> {
        self.score_cells(pyramid, &[]);
        self.shuffle_order_internal();
        self.emit()
    }

    /// Select corners, skipping every cell that contains one of `existing`
    /// (level-0 positions).
    pub fn detect_excluding(
        &mut self,
        pyramid: &ImagePyramid,
        existing: &[[f32; 2]],
    ) -> Vec<FeatureCorner> {
        self.score_cells(pyramid, existing);
        self.shuffle_order_internal();
        self.emit()
    }

    /// Like [`detect_excluding`](Self::detect_excluding) with a caller-owned generator.
    pub fn detect_with_rng<R: Rng + ?Sized>(
        &mut self,
        pyramid: &ImagePyramid,
        existing: &[[f32; 2]],
        rng: &mut R,
    ) -> Vec<FeatureCorner> {
        self.score_cells(pyramid, existing);
        self.reset_order();
        self.order.shuffle(rng);
        self.emit()
    }

    fn shuffle_order_internal(&mut self) {
        self.reset_order();
        self.order.shuffle(&mut self.rng);
    }

    fn reset_order(&mut self) {
        self.order.clear();
        self.order.extend(0..self.grid.len());
    }

    fn level_range(&self, number_levels: usize) -> Option<(usize, usize)> {
        let top = number_levels - 1;
        let max_level = match self.config.max_level {
            Some(level) if level <= top => level,
            _ => top,
        };
        let min_level = self.config.min_level.min(top);
        if self.config.min_level > top {
            log::debug!(
                "min level {} clamped to top level {top}",
                self.config.min_level
            );
        }
        if min_level > max_level {
            log::warn!("empty level range [{min_level}, {max_level}]");
            return None;
        }
        Some((min_level, max_level))
    }

    fn score_cells(&mut self, pyramid: &ImagePyramid, existing: &[[f32; 2]]) {
        let (img_w, img_h) = pyramid.size();
        self.grid.reset(img_w, img_h);
        for p in existing {
            self.grid.block(p[0], p[1]);
        }

        let Some((min_level, max_level)) = self.level_range(pyramid.number_levels()) else {
            return;
        };

        self.candidates.clear();
        let (bx, by) = self.config.border;
        for level in min_level..=max_level {
            let Ok(view) = pyramid.get(level) else {
                break;
            };
            let (w, h) = view.size();
            let end = (
                w.saturating_sub(bx + 1),
                h.saturating_sub(by + 1),
            );
            self.detector
                .detect_into(&view, (bx, by), end, self.config.barrier, level, &mut self.candidates);
        }

        let Ok(level0) = pyramid.get(0) else {
            return;
        };
        let mut dropped = 0usize;
        for c in &self.candidates {
            let x = c.x << c.level;
            let y = c.y << c.level;
            if x >= img_w || y >= img_h {
                dropped += 1;
                continue;
            }
            let score = shi_tomasi_score(&level0, x, y);
            self.grid.offer(CellCandidate {
                x,
                y,
                score,
                level: c.level,
            });
        }

        log::debug!(
            "selector: {} FAST candidates on levels {min_level}..={max_level}, {dropped} out of bounds, {} cells blocked",
            self.candidates.len(),
            self.grid.count_blocked()
        );
    }

    fn emit(&self) -> Vec<FeatureCorner> {
        let mut corners = Vec::new();
        if self.config.max_count == 0 {
            return corners;
        }
        for &idx in &self.order {
            if self.grid.is_blocked(idx) {
                continue;
            }
            let Some(best) = self.grid.best(idx) else {
                continue;
            };
            if best.score > self.config.detection_threshold {
                corners.push(FeatureCorner {
                    x: best.x,
                    y: best.y,
                    level: best.level,
                });
                if corners.len() >= self.config.max_count {
                    break;
                }
            }
        }
        corners
    }
}

impl std::fmt::Debug for GridFeatureSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridFeatureSelector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
