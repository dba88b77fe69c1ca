// image.rs — Owned grayscale buffers and borrowed strided views.
//
// Two types:
//   Image<T>          owns a row-major Vec<T> with an explicit stride.
//   ImageView<'a, T>  borrows a region of someone else's buffer (an Image,
//                     a pyramid level, or camera memory handed in by the
//                     caller). Copying a view never copies pixels.
//
// Layout (stride = 6, width = 4):
//
//   index:  0  1  2  3 [4][5]  6  7  8  9 [10][11] ...
//   row:    |-- row 0 --|      |-- row 1 --|
//
// Bracketed elements are padding; they are never read through a view.
//
// The tracker and the detector only ever read through ImageView, so the
// borrow checker guarantees that no view outlives its owner and that no
// pixel is written while a view is alive.

use std::fmt;

use crate::error::{KltError, Result};

// ---------------------------------------------------------------------------
// Pixel
// ---------------------------------------------------------------------------

/// Scalar types storable in an [`Image`].
pub trait Pixel: Copy + Default + Send + Sync + PartialOrd + 'static {
    /// Raw value as f32 (no normalization).
    fn to_f32(self) -> f32;

    /// Build a pixel from f32, clamping and rounding where needed.
    fn from_f32(v: f32) -> Self;
}

impl Pixel for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 255.0).round() as u8
    }
}

impl Pixel for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------

/// Owned 2D image, row-major with `stride >= width` elements per row.
#[derive(Clone)]
pub struct Image<T: Pixel> {
    data: Vec<T>,
    width: usize,
    height: usize,
    stride: usize,
}

impl<T: Pixel> Image<T> {
    /// Zero-initialized image with `stride == width`.
    pub fn new(width: usize, height: usize) -> Self {
        Self::new_with_stride(width, height, width)
    }

    /// Zero-initialized image with explicit row stride.
    ///
    /// # Panics
    /// Panics if `stride < width`.
    pub fn new_with_stride(width: usize, height: usize, stride: usize) -> Self {
        assert!(
            stride >= width,
            "stride ({stride}) must be >= width ({width})"
        );
        Image {
            data: vec![T::default(); height * stride],
            width,
            height,
            stride,
        }
    }

    /// Wrap a tightly packed pixel vector.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        Image {
            data,
            width,
            height,
            stride: width,
        }
    }

    /// Build an image by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Image {
            data,
            width,
            height,
            stride: width,
        }
    }

    /// Copy a view into a new tightly packed image.
    pub fn from_view(view: &ImageView<'_, T>) -> Self {
        let mut data = Vec::with_capacity(view.width * view.height);
        for y in 0..view.height {
            data.extend_from_slice(view.row(y));
        }
        Image {
            data,
            width: view.width,
            height: view.height,
            stride: view.width,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// `(width, height)`.
    #[inline]
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Pixel at column `x`, row `y`.
    ///
    /// # Panics
    /// Panics if `(x, y)` is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.bounds_check(x, y);
        self.data[y * self.stride + x]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        self.bounds_check(x, y);
        let idx = y * self.stride + x;
        &mut self.data[idx]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        *self.get_mut(x, y) = value;
    }

    /// Fill every pixel (padding included) with `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Valid pixels of row `y`, padding excluded.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    /// Borrow the whole image.
    pub fn view(&self) -> ImageView<'_, T> {
        ImageView {
            data: &self.data,
            width: self.width,
            height: self.height,
            stride: self.stride,
        }
    }

    /// Borrow the `w`×`h` region whose top-left corner is `(x, y)`.
    ///
    /// # Panics
    /// Panics if the region leaves the image.
    pub fn sub_image(&self, x: usize, y: usize, w: usize, h: usize) -> ImageView<'_, T> {
        assert!(
            x + w <= self.width && y + h <= self.height,
            "sub_image region ({x},{y},{w},{h}) exceeds image bounds ({},{})",
            self.width,
            self.height,
        );
        self.view().region(x, y, w, h)
    }

    /// Iterate `(x, y, value)` in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        (0..self.height).flat_map(move |y| {
            (0..self.width).map(move |x| (x, y, self.data[y * self.stride + x]))
        })
    }

    /// Underlying buffer including padding.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x},{y}) out of bounds for image {}×{}",
            self.width,
            self.height,
        );
    }
}

impl<T: Pixel + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Image<{}> {{ {}×{}, stride={} }}",
            std::any::type_name::<T>(),
            self.width,
            self.height,
            self.stride,
        )
    }
}

impl<T: Pixel> std::ops::Index<(usize, usize)> for Image<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &T {
        self.bounds_check(x, y);
        &self.data[y * self.stride + x]
    }
}

impl<T: Pixel> std::ops::IndexMut<(usize, usize)> for Image<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut T {
        self.bounds_check(x, y);
        let idx = y * self.stride + x;
        &mut self.data[idx]
    }
}

// ---------------------------------------------------------------------------
// ImageView<'a, T>
// ---------------------------------------------------------------------------

/// Read-only, non-owning window into a strided pixel buffer.
///
/// `data` starts at the view's `(0, 0)` pixel; rows are `stride` elements
/// apart. The last row may be shorter than `stride`, so every access is
/// checked against `width`/`height` rather than the slice length alone.
#[derive(Clone, Copy)]
pub struct ImageView<'a, T: Pixel> {
    data: &'a [T],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a, T: Pixel> ImageView<'a, T> {
    /// Wrap caller-owned memory (e.g. a camera frame) without copying.
    ///
    /// `data` must hold at least `(height - 1) * stride + width` elements.
    pub fn from_slice(data: &'a [T], width: usize, height: usize, stride: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(KltError::EmptyImage { width, height });
        }
        if stride < width {
            return Err(KltError::InvalidStride { stride, width });
        }
        let required = (height - 1) * stride + width;
        if data.len() < required {
            return Err(KltError::BufferTooSmall {
                required,
                actual: data.len(),
            });
        }
        Ok(ImageView {
            data,
            width,
            height,
            stride,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Pixel at `(x, y)` in view coordinates.
    ///
    /// # Panics
    /// Panics if `(x, y)` is outside the view.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        assert!(
            x < self.width && y < self.height,
            "ImageView pixel ({x},{y}) out of bounds for view {}×{}",
            self.width,
            self.height,
        );
        self.data[y * self.stride + x]
    }

    /// Row `y` of the view. The returned slice borrows the owner, not the view.
    #[inline]
    pub fn row(&self, y: usize) -> &'a [T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    /// Nested view; fails instead of panicking when the region leaves this view.
    pub fn sub_view(&self, x: usize, y: usize, w: usize, h: usize) -> Result<ImageView<'a, T>> {
        if w == 0 || h == 0 {
            return Err(KltError::EmptyImage { width: w, height: h });
        }
        if x + w > self.width || y + h > self.height {
            return Err(KltError::RegionOutOfBounds {
                x,
                y,
                width: w,
                height: h,
                parent_width: self.width,
                parent_height: self.height,
            });
        }
        Ok(self.region(x, y, w, h))
    }

    /// Iterate `(x, y, value)` in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + 'a {
        let view = *self;
        (0..view.height).flat_map(move |y| {
            view.row(y).iter().enumerate().map(move |(x, &v)| (x, y, v))
        })
    }

    /// Copy into an owned image.
    pub fn to_owned_image(&self) -> Image<T> {
        Image::from_view(self)
    }

    fn region(&self, x: usize, y: usize, w: usize, h: usize) -> ImageView<'a, T> {
        debug_assert!(x + w <= self.width && y + h <= self.height);
        let start = y * self.stride + x;
        let end = if h == 0 {
            start
        } else {
            (y + h - 1) * self.stride + x + w
        };
        ImageView {
            data: &self.data[start..end],
            width: w,
            height: h,
            stride: self.stride,
        }
    }
}

impl<'a, T: Pixel> fmt::Debug for ImageView<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImageView<{}> {{ {}×{}, stride={} }}",
            std::any::type_name::<T>(),
            self.width,
            self.height,
            self.stride,
        )
    }
}

impl<'a, T: Pixel> std::ops::Index<(usize, usize)> for ImageView<'a, T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &T {
        assert!(
            x < self.width && y < self.height,
            "ImageView pixel ({x},{y}) out of bounds for view {}×{}",
            self.width,
            self.height,
        );
        &self.data[y * self.stride + x]
    }
}

// ---------------------------------------------------------------------------
// Bilinear sampling
// ---------------------------------------------------------------------------

/// Bilinear sample at sub-pixel `(x, y)`, replicating edge pixels outside
/// the view.
///
/// # Panics
/// Panics on an empty view.
pub fn sample_bilinear<T: Pixel>(view: &ImageView<'_, T>, x: f32, y: f32) -> f32 {
    assert!(
        view.width() > 0 && view.height() > 0,
        "cannot interpolate on an empty image"
    );

    let max_x = (view.width() - 1) as f32;
    let max_y = (view.height() - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let x1 = (x0 + 1).min(view.width() - 1);
    let y1 = (y0 + 1).min(view.height() - 1);

    let top = view.row(y0);
    let bottom = view.row(y1);
    (1.0 - fx) * (1.0 - fy) * top[x0].to_f32()
        + fx * (1.0 - fy) * top[x1].to_f32()
        + (1.0 - fx) * fy * bottom[x0].to_f32()
        + fx * fy * bottom[x1].to_f32()
}
