// calculator.rs — Single-level KLT point tracker.
//
// Given a FIRST image (template) and a SECOND image (search), refine a
// position estimate in the second image so that the patch around it matches
// the patch around a fixed position in the first image.
//
// Template side (once per call):
//   1. Bilinearly sample a (2c+3)² patch of the first image with its origin
//      at  first − c − 1. The 1-pixel ring around the (2c+1)² interior only
//      feeds the central differences.
//   2. dx = ½ (T(x+1, y) − T(x−1, y)),  dy = ½ (T(x, y+1) − T(x, y−1)).
//   3. Accumulate the Gaussian-weighted structure matrix and invert it.
//
// Search side (every iteration):
//   4. Bilinearly sample the second image around the current estimate.
//   5. r = I + m − T  (m is the illumination offset, 0 in the LK variant).
//   6. δ = H⁻¹ Σ g·r·J,   pos −= δ,   m −= δ_m.
//   7. Stop when |δ + δ_prev| < ε componentwise. A sign-flipping pair of
//      corrections of equal size therefore counts as converged; this catches
//      the estimate bouncing around the optimum as well as a vanishing step.
//
// Variants:
//   LucasKanade              J = [dx, dy]      H is 2×2
//   IlluminationCompensated  J = [dx, dy, 1]   H is 3×3, solves for m too
//
// The horizontal variants freeze y and solve for x only (plus m).
//
// Valid region. A position p is usable on an image of size (w, h) when
//   c + 2 <= p  and  p < size − (c + 3)
// (applied to the first position directly and to floor(estimate) during
// iteration). Every pixel read by the patch, its gradient ring and the
// bilinear neighbour then lies inside the buffer. Outside that region the
// result is Fail and nothing is read.
//
// The calculator owns the Gaussian window and all scratch buffers. Images
// are attached by `bind`, which borrows the calculator mutably, so the
// cursor size cannot change while images are bound and the valid region is
// always computed for the images actually in use.

use crate::error::{KltError, Result};
use crate::image::{Image, ImageView};

/// Per-point outcome of a tracking call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingResult {
    /// Out of the valid region, degenerate structure matrix, or rejected
    /// by the pyramid velocity bound. The position is not updated.
    Fail,
    /// The convergence test passed.
    Completed,
    /// Iteration budget exhausted; the estimate is usable but less reliable.
    Uncompleted,
}

/// Which linearization the tracker solves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMethod {
    /// Brightness-constant Lucas-Kanade, 2×2 system.
    LucasKanade,
    /// Lucas-Kanade with an additive illumination offset, 3×3 system.
    #[default]
    IlluminationCompensated,
}

/// Calculator parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculatorConfig {
    /// Patch half-size `(cx, cy)`; the patch is (2cx+1)×(2cy+1).
    pub cursor_size: (usize, usize),
    /// Convergence threshold in pixels.
    pub pixel_eps: f32,
    /// Minimum |det(H)| for a patch to be trackable.
    pub det_threshold: f32,
    /// Gauss-Newton iterations per call.
    pub max_iterations: usize,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        CalculatorConfig {
            cursor_size: (4, 4),
            pixel_eps: 1e-2,
            det_threshold: 1e-2,
            max_iterations: 8,
        }
    }
}

/// Normalized isotropic Gaussian over a (2cx+1)×(2cy+1) window with
/// sigma = max(cx, cy) / 2.5. Row-major, sums to 1.
pub fn gaussian_window(cursor_size: (usize, usize)) -> Vec<f32> {
    let (cx, cy) = cursor_size;
    let (pw, ph) = (2 * cx + 1, 2 * cy + 1);
    let sigma = cx.max(cy) as f32 / 2.5;
    let inv_two_sigma_sq = 1.0 / (2.0 * sigma * sigma);

    let mut window = Vec::with_capacity(pw * ph);
    for y in 0..ph {
        let dy = y as f32 - cy as f32;
        for x in 0..pw {
            let dx = x as f32 - cx as f32;
            window.push((-(dx * dx + dy * dy) * inv_two_sigma_sq).exp());
        }
    }
    let sum: f32 = window.iter().sum();
    for w in &mut window {
        *w /= sum;
    }
    window
}

/// Fill `out` with bilinear samples of `view` on the grid
/// `(x0 + i, y0 + j)`.
///
/// The fractional part of the origin is shared by every sample, so the four
/// weights are computed once.
///
/// # Panics
/// Panics if the grid (plus one pixel right and below) leaves the view or
/// the origin is negative.
pub fn sample_patch(view: &ImageView<'_, u8>, x0: f32, y0: f32, out: &mut Image<f32>) {
    let ix = x0.floor();
    let iy = y0.floor();
    assert!(ix >= 0.0 && iy >= 0.0, "patch origin ({x0}, {y0}) is negative");
    let (fx, fy) = (x0 - ix, y0 - iy);
    let (ix, iy) = (ix as usize, iy as usize);

    let w_tl = (1.0 - fx) * (1.0 - fy);
    let w_tr = fx * (1.0 - fy);
    let w_bl = (1.0 - fx) * fy;
    let w_br = fx * fy;

    let width = out.width();
    for j in 0..out.height() {
        let top = &view.row(iy + j)[ix..ix + width + 1];
        let bottom = &view.row(iy + j + 1)[ix..ix + width + 1];
        for (i, px) in out.row_mut(j).iter_mut().enumerate() {
            *px = w_tl * top[i] as f32
                + w_tr * top[i + 1] as f32
                + w_bl * bottom[i] as f32
                + w_br * bottom[i + 1] as f32;
        }
    }
}

/// Single-level tracker with owned scratch.
///
/// Not shareable between threads while tracking: give every worker its own
/// instance.
#[derive(Debug, Clone)]
pub struct OpticalFlowCalculator {
    config: CalculatorConfig,
    gaussian: Vec<f32>,
    patch: Image<f32>,
    warped: Vec<f32>,
    derivatives: Vec<[f32; 2]>,
    last_det: f32,
}

impl Default for OpticalFlowCalculator {
    fn default() -> Self {
        Self::from_valid_config(CalculatorConfig::default())
    }
}

impl OpticalFlowCalculator {
    pub fn new(config: CalculatorConfig) -> Result<Self> {
        validate_cursor(config.cursor_size)?;
        let config = CalculatorConfig {
            pixel_eps: config.pixel_eps.abs(),
            ..config
        };
        Ok(Self::from_valid_config(config))
    }

    /// `config` must already hold a positive cursor size.
    pub(crate) fn from_valid_config(config: CalculatorConfig) -> Self {
        let mut calc = OpticalFlowCalculator {
            config,
            gaussian: Vec::new(),
            patch: Image::new(0, 0),
            warped: Vec::new(),
            derivatives: Vec::new(),
            last_det: 0.0,
        };
        calc.rebuild_window();
        calc
    }

    fn rebuild_window(&mut self) {
        let (cx, cy) = self.config.cursor_size;
        self.gaussian = gaussian_window((cx, cy));
        self.patch = Image::new(2 * cx + 3, 2 * cy + 3);
        let n = (2 * cx + 1) * (2 * cy + 1);
        self.warped = vec![0.0; n];
        self.derivatives = vec![[0.0; 2]; n];
    }

    pub fn config(&self) -> &CalculatorConfig {
        &self.config
    }

    #[inline]
    pub fn cursor_size(&self) -> (usize, usize) {
        self.config.cursor_size
    }

    /// Change the patch half-size. Rebuilds the Gaussian window and scratch.
    pub fn set_cursor_size(&mut self, cursor_size: (usize, usize)) -> Result<()> {
        validate_cursor(cursor_size)?;
        self.config.cursor_size = cursor_size;
        self.rebuild_window();
        Ok(())
    }

    /// Stores `|eps|`.
    pub fn set_pixel_eps(&mut self, eps: f32) {
        self.config.pixel_eps = eps.abs();
    }

    pub fn set_det_threshold(&mut self, threshold: f32) {
        self.config.det_threshold = threshold;
    }

    pub fn set_max_iterations(&mut self, iterations: usize) {
        self.config.max_iterations = iterations;
    }

    /// Determinant of the structure matrix from the most recent call that
    /// got as far as building it.
    #[inline]
    pub fn last_det(&self) -> f32 {
        self.last_det
    }

    /// Gaussian weights, row-major over the (2cx+1)×(2cy+1) window.
    pub fn gaussian(&self) -> &[f32] {
        &self.gaussian
    }

    /// Attach a first/second image pair.
    pub fn bind<'c, 'a>(
        &'c mut self,
        first: ImageView<'a, u8>,
        second: ImageView<'a, u8>,
    ) -> BoundCalculator<'c, 'a> {
        let cursor = self.config.cursor_size;
        BoundCalculator {
            first_bounds: ValidRegion::new(first.size(), cursor),
            second_bounds: ValidRegion::new(second.size(), cursor),
            first,
            second,
            calc: self,
        }
    }
}

fn validate_cursor((x, y): (usize, usize)) -> Result<()> {
    if x == 0 || y == 0 {
        return Err(KltError::InvalidCursorSize { x, y });
    }
    Ok(())
}

/// Half-open `[begin, end)` region of positions whose patch fits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidRegion {
    pub begin: (isize, isize),
    pub end: (isize, isize),
}

impl ValidRegion {
    pub fn new((w, h): (usize, usize), (cx, cy): (usize, usize)) -> Self {
        ValidRegion {
            begin: ((cx + 2) as isize, (cy + 2) as isize),
            end: (
                w as isize - (cx + 3) as isize,
                h as isize - (cy + 3) as isize,
            ),
        }
    }

    /// Sub-pixel containment test; NaN is never inside.
    #[inline]
    pub fn contains(&self, p: [f32; 2]) -> bool {
        p[0] >= self.begin.0 as f32
            && p[1] >= self.begin.1 as f32
            && p[0] < self.end.0 as f32
            && p[1] < self.end.1 as f32
    }

    #[inline]
    fn contains_x(&self, x: isize) -> bool {
        x >= self.begin.0 && x < self.end.0
    }

    #[inline]
    fn contains_y(&self, y: isize) -> bool {
        y >= self.begin.1 && y < self.end.1
    }
}

/// Calculator with an image pair attached.
pub struct BoundCalculator<'c, 'a> {
    calc: &'c mut OpticalFlowCalculator,
    first: ImageView<'a, u8>,
    second: ImageView<'a, u8>,
    first_bounds: ValidRegion,
    second_bounds: ValidRegion,
}

impl<'c, 'a> BoundCalculator<'c, 'a> {
    pub fn first_bounds(&self) -> ValidRegion {
        self.first_bounds
    }

    pub fn second_bounds(&self) -> ValidRegion {
        self.second_bounds
    }

    #[inline]
    pub fn last_det(&self) -> f32 {
        self.calc.last_det
    }

    /// Refine `second` so its neighbourhood in the second image matches the
    /// neighbourhood of `first` in the first image.
    ///
    /// `second` is updated on Completed and Uncompleted. On Fail it may hold
    /// a partial estimate and should be discarded.
    pub fn track(
        &mut self,
        method: TrackingMethod,
        second: &mut [f32; 2],
        first: [f32; 2],
    ) -> TrackingResult {
        if !self.prepare_template(first) {
            return TrackingResult::Fail;
        }
        match method {
            TrackingMethod::LucasKanade => self.iterate_2d_lk(second),
            TrackingMethod::IlluminationCompensated => self.iterate_2d_offset(second),
        }
    }

    /// Like [`track`](Self::track) but only `second[0]` is refined.
    ///
    /// The row `floor(second[1])` is checked against the valid region once.
    pub fn track_horizontal(
        &mut self,
        method: TrackingMethod,
        second: &mut [f32; 2],
        first: [f32; 2],
    ) -> TrackingResult {
        if !self.prepare_template(first) {
            return TrackingResult::Fail;
        }
        let row = second[1].floor();
        if !row.is_finite() || !self.second_bounds.contains_y(row as isize) {
            return TrackingResult::Fail;
        }
        match method {
            TrackingMethod::LucasKanade => self.iterate_x_lk(second),
            TrackingMethod::IlluminationCompensated => self.iterate_x_offset(second),
        }
    }

    // -----------------------------------------------------------------------
    // Template
    // -----------------------------------------------------------------------

    /// Sample the first-image patch and its derivatives. False if `first`
    /// is outside the valid region.
    fn prepare_template(&mut self, first: [f32; 2]) -> bool {
        if !self.first_bounds.contains(first) {
            return false;
        }
        let (cx, cy) = self.calc.config.cursor_size;
        let calc = &mut *self.calc;
        sample_patch(
            &self.first,
            first[0] - (cx + 1) as f32,
            first[1] - (cy + 1) as f32,
            &mut calc.patch,
        );

        let (pw, ph) = (2 * cx + 1, 2 * cy + 1);
        let mut k = 0;
        for y in 0..ph {
            let above = calc.patch.row(y);
            let here = calc.patch.row(y + 1);
            let below = calc.patch.row(y + 2);
            for x in 0..pw {
                let dx = 0.5 * (here[x + 2] - here[x]);
                let dy = 0.5 * (below[x + 1] - above[x + 1]);
                calc.derivatives[k] = [dx, dy];
                k += 1;
            }
        }
        true
    }

    #[inline]
    fn template(&self, k: usize) -> f32 {
        let pw = 2 * self.calc.config.cursor_size.0 + 1;
        self.calc.patch.row(k / pw + 1)[k % pw + 1]
    }

    // -----------------------------------------------------------------------
    // Search side
    // -----------------------------------------------------------------------

    /// Sample the second image around `pos` into the warped buffer. False
    /// if `floor(pos)` is outside the valid region.
    fn sample_second(&mut self, pos: [f32; 2]) -> bool {
        let fx = pos[0].floor();
        let fy = pos[1].floor();
        if !fx.is_finite() || !fy.is_finite() {
            return false;
        }
        let (ix, iy) = (fx as isize, fy as isize);
        if !self.second_bounds.contains_x(ix) || !self.second_bounds.contains_y(iy) {
            return false;
        }

        let (cx, cy) = self.calc.config.cursor_size;
        let (sx, sy) = (pos[0] - fx, pos[1] - fy);
        let w_tl = (1.0 - sx) * (1.0 - sy);
        let w_tr = sx * (1.0 - sy);
        let w_bl = (1.0 - sx) * sy;
        let w_br = sx * sy;

        let pw = 2 * cx + 1;
        let x0 = ix as usize - cx;
        let y0 = iy as usize - cy;
        for (j, out) in self.calc.warped.chunks_exact_mut(pw).enumerate() {
            let top = &self.second.row(y0 + j)[x0..x0 + pw + 1];
            let bottom = &self.second.row(y0 + j + 1)[x0..x0 + pw + 1];
            for (i, px) in out.iter_mut().enumerate() {
                *px = w_tl * top[i] as f32
                    + w_tr * top[i + 1] as f32
                    + w_bl * bottom[i] as f32
                    + w_br * bottom[i + 1] as f32;
            }
        }
        true
    }

    fn converged(&self, delta: f32, prev: Option<f32>) -> bool {
        prev.is_some_and(|p| (delta + p).abs() < self.calc.config.pixel_eps)
    }

    // -----------------------------------------------------------------------
    // 2-DoF solvers
    // -----------------------------------------------------------------------

    fn iterate_2d_lk(&mut self, pos: &mut [f32; 2]) -> TrackingResult {
        let (mut h00, mut h01, mut h11) = (0.0f32, 0.0f32, 0.0f32);
        for (&[dx, dy], &g) in self.calc.derivatives.iter().zip(&self.calc.gaussian) {
            h00 += g * dx * dx;
            h01 += g * dx * dy;
            h11 += g * dy * dy;
        }
        let det = h00 * h11 - h01 * h01;
        self.calc.last_det = det;
        if det.abs() < self.calc.config.det_threshold {
            return TrackingResult::Fail;
        }
        let inv_det = 1.0 / det;
        let (i00, i01, i11) = (h11 * inv_det, -h01 * inv_det, h00 * inv_det);

        let mut prev: Option<[f32; 2]> = None;
        for _ in 0..self.calc.config.max_iterations {
            if !self.sample_second(*pos) {
                return TrackingResult::Fail;
            }
            let (mut b0, mut b1) = (0.0f32, 0.0f32);
            for k in 0..self.calc.warped.len() {
                let r = (self.calc.warped[k] - self.template(k)) * self.calc.gaussian[k];
                let [dx, dy] = self.calc.derivatives[k];
                b0 += r * dx;
                b1 += r * dy;
            }
            let delta = [i00 * b0 + i01 * b1, i01 * b0 + i11 * b1];
            pos[0] -= delta[0];
            pos[1] -= delta[1];

            if self.converged(delta[0], prev.map(|p| p[0]))
                && self.converged(delta[1], prev.map(|p| p[1]))
            {
                return TrackingResult::Completed;
            }
            prev = Some(delta);
        }
        TrackingResult::Uncompleted
    }

    fn iterate_2d_offset(&mut self, pos: &mut [f32; 2]) -> TrackingResult {
        // Symmetric 3×3:  | a b c |
        //                 | b d e |
        //                 | c e f |
        let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
        let (mut d, mut e, mut f) = (0.0f32, 0.0f32, 0.0f32);
        for (&[dx, dy], &g) in self.calc.derivatives.iter().zip(&self.calc.gaussian) {
            a += g * dx * dx;
            b += g * dx * dy;
            c += g * dx;
            d += g * dy * dy;
            e += g * dy;
            f += g;
        }
        let c00 = d * f - e * e;
        let c01 = c * e - b * f;
        let c02 = b * e - c * d;
        let det = a * c00 + b * c01 + c * c02;
        self.calc.last_det = det;
        if det.abs() < self.calc.config.det_threshold {
            return TrackingResult::Fail;
        }
        let inv_det = 1.0 / det;
        // Inverse of a symmetric matrix is symmetric: adjugate / det.
        let i00 = c00 * inv_det;
        let i01 = c01 * inv_det;
        let i02 = c02 * inv_det;
        let i11 = (a * f - c * c) * inv_det;
        let i12 = (b * c - a * e) * inv_det;
        let i22 = (a * d - b * b) * inv_det;

        let mut offset = 0.0f32;
        let mut prev: Option<[f32; 2]> = None;
        for _ in 0..self.calc.config.max_iterations {
            if !self.sample_second(*pos) {
                return TrackingResult::Fail;
            }
            let (mut b0, mut b1, mut b2) = (0.0f32, 0.0f32, 0.0f32);
            for k in 0..self.calc.warped.len() {
                let r = (self.calc.warped[k] + offset - self.template(k)) * self.calc.gaussian[k];
                let [dx, dy] = self.calc.derivatives[k];
                b0 += r * dx;
                b1 += r * dy;
                b2 += r;
            }
            let delta = [
                i00 * b0 + i01 * b1 + i02 * b2,
                i01 * b0 + i11 * b1 + i12 * b2,
            ];
            let delta_offset = i02 * b0 + i12 * b1 + i22 * b2;
            pos[0] -= delta[0];
            pos[1] -= delta[1];
            offset -= delta_offset;

            if self.converged(delta[0], prev.map(|p| p[0]))
                && self.converged(delta[1], prev.map(|p| p[1]))
            {
                return TrackingResult::Completed;
            }
            prev = Some(delta);
        }
        TrackingResult::Uncompleted
    }

    // -----------------------------------------------------------------------
    // 1-DoF solvers
    // -----------------------------------------------------------------------

    fn iterate_x_lk(&mut self, pos: &mut [f32; 2]) -> TrackingResult {
        let h: f32 = self
            .calc
            .derivatives
            .iter()
            .zip(&self.calc.gaussian)
            .map(|(&[dx, _], &g)| g * dx * dx)
            .sum();
        self.calc.last_det = h;
        if h.abs() < self.calc.config.det_threshold {
            return TrackingResult::Fail;
        }
        let inv = 1.0 / h;

        let mut prev: Option<f32> = None;
        for _ in 0..self.calc.config.max_iterations {
            if !self.sample_second(*pos) {
                return TrackingResult::Fail;
            }
            let mut b = 0.0f32;
            for k in 0..self.calc.warped.len() {
                let r = (self.calc.warped[k] - self.template(k)) * self.calc.gaussian[k];
                b += r * self.calc.derivatives[k][0];
            }
            let delta = inv * b;
            pos[0] -= delta;

            if self.converged(delta, prev) {
                return TrackingResult::Completed;
            }
            prev = Some(delta);
        }
        TrackingResult::Uncompleted
    }

    fn iterate_x_offset(&mut self, pos: &mut [f32; 2]) -> TrackingResult {
        let (mut a, mut c, mut f) = (0.0f32, 0.0f32, 0.0f32);
        for (&[dx, _], &g) in self.calc.derivatives.iter().zip(&self.calc.gaussian) {
            a += g * dx * dx;
            c += g * dx;
            f += g;
        }
        let det = a * f - c * c;
        self.calc.last_det = det;
        if det.abs() < self.calc.config.det_threshold {
            return TrackingResult::Fail;
        }
        let inv_det = 1.0 / det;
        let (i00, i01, i11) = (f * inv_det, -c * inv_det, a * inv_det);

        let mut offset = 0.0f32;
        let mut prev: Option<f32> = None;
        for _ in 0..self.calc.config.max_iterations {
            if !self.sample_second(*pos) {
                return TrackingResult::Fail;
            }
            let (mut b0, mut b1) = (0.0f32, 0.0f32);
            for k in 0..self.calc.warped.len() {
                let r = (self.calc.warped[k] + offset - self.template(k)) * self.calc.gaussian[k];
                b0 += r * self.calc.derivatives[k][0];
                b1 += r;
            }
            let delta = i00 * b0 + i01 * b1;
            pos[0] -= delta;
            offset -= i01 * b0 + i11 * b1;

            if self.converged(delta, prev) {
                return TrackingResult::Completed;
            }
            prev = Some(delta);
        }
        TrackingResult::Uncompleted
    }
}
