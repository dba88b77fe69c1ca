// flow.rs — Pyramidal (coarse-to-fine) KLT tracking.
//
// For a point tracked from FIRST to SECOND, walk the pyramid from the
// coarsest level down to level 0:
//
//   scale = 2^level
//   p     = second / scale               (running estimate at this level)
//   track(p, first / scale)
//   if not Fail:
//       |p − p_before|² <  v²  →  second = p · scale
//       |p − p_before|² >= v²  →  the whole point is Fail
//
// with v = min(cursor_x, cursor_y). A Fail from the single-level tracker at
// some level leaves the estimate where it was and moves on to the next,
// finer level. After the walk a final level-0 pass is made whose status is
// the point's result (the walk's level-0 pass acts as a warm start).
//
// Batched calls bind each level's image pair once and sweep all points,
// skipping points already Fail. Their status vector is reset to Completed
// at the start of every call.

use std::sync::mpsc;

use crate::calculator::{
    BoundCalculator, CalculatorConfig, OpticalFlowCalculator, TrackingMethod, TrackingResult,
};
use crate::error::{KltError, Result};
use crate::image::ImageView;
use crate::pool::WorkerPool;
use crate::pyramid::{validate_levels, ImagePyramid};

/// Pyramidal tracker parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    pub calculator: CalculatorConfig,
    /// Levels used for tracking; pyramids are trimmed or extended to this.
    pub number_levels: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            calculator: CalculatorConfig {
                cursor_size: (20, 20),
                ..CalculatorConfig::default()
            },
            number_levels: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Both,
    Horizontal,
}

impl Axis {
    #[inline]
    fn run(
        self,
        bound: &mut BoundCalculator<'_, '_>,
        method: TrackingMethod,
        second: &mut [f32; 2],
        first: [f32; 2],
    ) -> TrackingResult {
        match self {
            Axis::Both => bound.track(method, second, first),
            Axis::Horizontal => bound.track_horizontal(method, second, first),
        }
    }
}

/// Tracks points between two image pyramids.
///
/// Holds its own calculator scratch, so one instance serves one thread.
/// Pyramids are shared, so cloning a tracker for another worker is cheap.
#[derive(Debug, Clone)]
pub struct OpticalFlow {
    calculator: OpticalFlowCalculator,
    number_levels: usize,
    max_velocity_sq: f32,
    first: Option<ImagePyramid>,
    second: Option<ImagePyramid>,
}

impl Default for OpticalFlow {
    fn default() -> Self {
        let config = FlowConfig::default();
        let calculator = OpticalFlowCalculator::from_valid_config(config.calculator);
        let (cx, cy) = calculator.cursor_size();
        OpticalFlow {
            max_velocity_sq: velocity_bound_sq(cx, cy),
            calculator,
            number_levels: config.number_levels,
            first: None,
            second: None,
        }
    }
}

impl OpticalFlow {
    /// Errors on an invalid cursor or a level count outside
    /// `1..=MAX_LEVELS`.
    pub fn new(config: FlowConfig) -> Result<Self> {
        validate_levels(config.number_levels)?;
        let calculator = OpticalFlowCalculator::new(config.calculator)?;
        let (cx, cy) = calculator.cursor_size();
        Ok(OpticalFlow {
            max_velocity_sq: velocity_bound_sq(cx, cy),
            calculator,
            number_levels: config.number_levels,
            first: None,
            second: None,
        })
    }

    /// Current parameters.
    pub fn config(&self) -> FlowConfig {
        FlowConfig {
            calculator: self.calculator.config().clone(),
            number_levels: self.number_levels,
        }
    }

    #[inline]
    pub fn cursor_size(&self) -> (usize, usize) {
        self.calculator.cursor_size()
    }

    /// Also resets the velocity bound to `min(cx, cy)²`.
    pub fn set_cursor_size(&mut self, cursor_size: (usize, usize)) -> Result<()> {
        self.calculator.set_cursor_size(cursor_size)?;
        self.max_velocity_sq = velocity_bound_sq(cursor_size.0, cursor_size.1);
        Ok(())
    }

    /// Squared per-level displacement bound.
    #[inline]
    pub fn max_velocity_sq(&self) -> f32 {
        self.max_velocity_sq
    }

    pub fn pixel_eps(&self) -> f32 {
        self.calculator.config().pixel_eps
    }

    pub fn set_pixel_eps(&mut self, eps: f32) {
        self.calculator.set_pixel_eps(eps);
    }

    pub fn max_iterations(&self) -> usize {
        self.calculator.config().max_iterations
    }

    pub fn set_max_iterations(&mut self, iterations: usize) {
        self.calculator.set_max_iterations(iterations);
    }

    pub fn det_threshold(&self) -> f32 {
        self.calculator.config().det_threshold
    }

    pub fn set_det_threshold(&mut self, threshold: f32) {
        self.calculator.set_det_threshold(threshold);
    }

    #[inline]
    pub fn number_levels(&self) -> usize {
        self.number_levels
    }

    /// Change the level count; bound pyramids are re-leveled in place.
    pub fn set_number_levels(&mut self, number_levels: usize) -> Result<()> {
        validate_levels(number_levels)?;
        self.number_levels = number_levels;
        if let Some(p) = &self.first {
            self.first = Some(p.with_levels(number_levels)?);
        }
        if let Some(p) = &self.second {
            self.second = Some(p.with_levels(number_levels)?);
        }
        Ok(())
    }

    /// Last determinant computed by the underlying calculator.
    pub fn last_det(&self) -> f32 {
        self.calculator.last_det()
    }

    pub fn first_pyramid(&self) -> Option<&ImagePyramid> {
        self.first.as_ref()
    }

    pub fn second_pyramid(&self) -> Option<&ImagePyramid> {
        self.second.as_ref()
    }

    /// Bind the first pyramid, sharing its levels.
    pub fn set_first_pyramid(&mut self, pyramid: &ImagePyramid) -> Result<()> {
        self.first = Some(pyramid.with_levels(self.number_levels)?);
        Ok(())
    }

    pub fn set_second_pyramid(&mut self, pyramid: &ImagePyramid) -> Result<()> {
        self.second = Some(pyramid.with_levels(self.number_levels)?);
        Ok(())
    }

    /// Build and bind the first pyramid from an image.
    pub fn set_first_image(&mut self, image: &ImageView<'_, u8>) -> Result<()> {
        self.first = Some(ImagePyramid::build(image, self.number_levels)?);
        Ok(())
    }

    pub fn set_second_image(&mut self, image: &ImageView<'_, u8>) -> Result<()> {
        self.second = Some(ImagePyramid::build(image, self.number_levels)?);
        Ok(())
    }

    pub fn swap_first_second(&mut self) {
        std::mem::swap(&mut self.first, &mut self.second);
    }

    /// Release both pyramids.
    pub fn reset(&mut self) {
        self.first = None;
        self.second = None;
    }

    // -----------------------------------------------------------------------
    // Single point
    // -----------------------------------------------------------------------

    /// Track one point. `second` holds the initial estimate on entry and the
    /// refined position on success; on Fail it is left at the last accepted
    /// estimate.
    ///
    /// Errors only if a pyramid is missing.
    pub fn track(
        &mut self,
        method: TrackingMethod,
        second: &mut [f32; 2],
        first: [f32; 2],
    ) -> Result<TrackingResult> {
        self.track_point(Axis::Both, method, second, first)
    }

    /// As [`track`](Self::track) with x-only refinement on every level.
    pub fn track_horizontal(
        &mut self,
        method: TrackingMethod,
        second: &mut [f32; 2],
        first: [f32; 2],
    ) -> Result<TrackingResult> {
        self.track_point(Axis::Horizontal, method, second, first)
    }

    fn track_point(
        &mut self,
        axis: Axis,
        method: TrackingMethod,
        second: &mut [f32; 2],
        first: [f32; 2],
    ) -> Result<TrackingResult> {
        let (first_pyr, second_pyr) = bound_pair(&self.first, &self.second)?;
        let max_velocity_sq = self.max_velocity_sq;

        for level in (0..self.number_levels).rev() {
            let mut bound = self
                .calculator
                .bind(first_pyr.get(level)?, second_pyr.get(level)?);
            let scale = (1u32 << level) as f32;
            let before = [second[0] / scale, second[1] / scale];
            let mut p = before;
            let first_l = [first[0] / scale, first[1] / scale];
            if axis.run(&mut bound, method, &mut p, first_l) != TrackingResult::Fail {
                if dist_sq(p, before) < max_velocity_sq {
                    *second = [p[0] * scale, p[1] * scale];
                } else {
                    return Ok(TrackingResult::Fail);
                }
            }
        }

        let mut bound = self.calculator.bind(first_pyr.get(0)?, second_pyr.get(0)?);
        let before = *second;
        let mut p = before;
        let result = axis.run(&mut bound, method, &mut p, first);
        if result != TrackingResult::Fail {
            if dist_sq(p, before) < max_velocity_sq {
                *second = p;
            } else {
                return Ok(TrackingResult::Fail);
            }
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Batched
    // -----------------------------------------------------------------------

    /// Track many points. `status` is resized and reset to Completed, then
    /// holds one result per point in input order.
    pub fn track_batch(
        &mut self,
        method: TrackingMethod,
        status: &mut Vec<TrackingResult>,
        second: &mut [[f32; 2]],
        first: &[[f32; 2]],
    ) -> Result<()> {
        self.track_points(Axis::Both, method, status, second, first)
    }

    pub fn track_batch_horizontal(
        &mut self,
        method: TrackingMethod,
        status: &mut Vec<TrackingResult>,
        second: &mut [[f32; 2]],
        first: &[[f32; 2]],
    ) -> Result<()> {
        self.track_points(Axis::Horizontal, method, status, second, first)
    }

    fn track_points(
        &mut self,
        axis: Axis,
        method: TrackingMethod,
        status: &mut Vec<TrackingResult>,
        second: &mut [[f32; 2]],
        first: &[[f32; 2]],
    ) -> Result<()> {
        if second.len() != first.len() {
            return Err(KltError::PointCountMismatch {
                first: first.len(),
                second: second.len(),
            });
        }
        let (first_pyr, second_pyr) = bound_pair(&self.first, &self.second)?;
        let max_velocity_sq = self.max_velocity_sq;

        status.clear();
        status.resize(first.len(), TrackingResult::Completed);

        for level in (0..self.number_levels).rev() {
            let mut bound = self
                .calculator
                .bind(first_pyr.get(level)?, second_pyr.get(level)?);
            let scale = (1u32 << level) as f32;
            for ((s, est), &f) in status.iter_mut().zip(second.iter_mut()).zip(first) {
                if *s == TrackingResult::Fail {
                    continue;
                }
                let before = [est[0] / scale, est[1] / scale];
                let mut p = before;
                if axis.run(&mut bound, method, &mut p, [f[0] / scale, f[1] / scale])
                    != TrackingResult::Fail
                {
                    if dist_sq(p, before) < max_velocity_sq {
                        *est = [p[0] * scale, p[1] * scale];
                    } else {
                        *s = TrackingResult::Fail;
                    }
                }
            }
        }

        let mut bound = self.calculator.bind(first_pyr.get(0)?, second_pyr.get(0)?);
        for ((s, est), &f) in status.iter_mut().zip(second.iter_mut()).zip(first) {
            if *s == TrackingResult::Fail {
                continue;
            }
            let before = *est;
            let mut p = before;
            *s = axis.run(&mut bound, method, &mut p, f);
            if *s != TrackingResult::Fail {
                if dist_sq(p, before) < max_velocity_sq {
                    *est = p;
                } else {
                    *s = TrackingResult::Fail;
                }
            }
        }

        if log::log_enabled!(log::Level::Debug) {
            let failed = status.iter().filter(|&&s| s == TrackingResult::Fail).count();
            log::debug!(
                "tracked {} points over {} levels, {failed} failed",
                first.len(),
                self.number_levels
            );
        }
        Ok(())
    }

    /// Track every point as its own pool task.
    ///
    /// Each task owns a clone of this tracker (shared pyramids, private
    /// scratch). Results come back in input order; a task that never
    /// reports (panicked) leaves its point at Fail.
    pub fn track_parallel(
        &self,
        pool: &WorkerPool,
        method: TrackingMethod,
        second: &mut [[f32; 2]],
        first: &[[f32; 2]],
    ) -> Result<Vec<TrackingResult>> {
        if second.len() != first.len() {
            return Err(KltError::PointCountMismatch {
                first: first.len(),
                second: second.len(),
            });
        }
        bound_pair(&self.first, &self.second)?;

        let (tx, rx) = mpsc::channel();
        for (idx, (&est, &f)) in second.iter().zip(first).enumerate() {
            let mut worker = self.clone();
            let tx = tx.clone();
            pool.execute(move || {
                let mut p = est;
                let result = worker
                    .track(method, &mut p, f)
                    .unwrap_or(TrackingResult::Fail);
                // The receiver outlives every task.
                let _ = tx.send((idx, result, p));
            })?;
        }
        drop(tx);

        let mut status = vec![TrackingResult::Fail; first.len()];
        for (idx, result, p) in rx {
            status[idx] = result;
            second[idx] = p;
        }
        Ok(status)
    }
}

fn bound_pair<'p>(
    first: &'p Option<ImagePyramid>,
    second: &'p Option<ImagePyramid>,
) -> Result<(&'p ImagePyramid, &'p ImagePyramid)> {
    let first = first.as_ref().ok_or(KltError::PyramidNotSet("first"))?;
    let second = second.as_ref().ok_or(KltError::PyramidNotSet("second"))?;
    Ok((first, second))
}

#[inline]
fn velocity_bound_sq(cx: usize, cy: usize) -> f32 {
    let v = cx.min(cy) as f32;
    v * v
}

#[inline]
fn dist_sq(a: [f32; 2], b: [f32; 2]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}
