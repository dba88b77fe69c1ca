// camera.rs -- Pinhole projection between pixel and normalized coordinates.
//
// Pixel convention: integer pixel coordinates address pixel CENTRES, while
// the principal point (cx, cy) is given in the continuous image plane whose
// origin is the top-left CORNER of pixel (0, 0). Hence the half-pixel shift:
//
//   project:    u = x_n * fx + cx - 0.5
//   unproject:  x_n = (u + 0.5 - cx) / fx
//
// The tracker never calls into this module; it exists for the layers that
// turn tracked pixels into bearings. No lens distortion is modeled.

/// Pixel <-> normalized-plane mapping.
pub trait Projection {
    /// Normalized image-plane point to pixel coordinates.
    fn project(&self, point: [f32; 2]) -> [f32; 2];

    /// Pixel coordinates to normalized image-plane point.
    fn unproject(&self, pixel: [f32; 2]) -> [f32; 2];

    /// Image size `[width, height]` in pixels.
    fn resolution(&self) -> [usize; 2];

    fn project_points(&self, points: &[[f32; 2]]) -> Vec<[f32; 2]> {
        points.iter().map(|&p| self.project(p)).collect()
    }

    fn unproject_points(&self, pixels: &[[f32; 2]]) -> Vec<[f32; 2]> {
        pixels.iter().map(|&p| self.unproject(p)).collect()
    }
}

/// Ideal pinhole intrinsics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeIntrinsics {
    /// Focal length in pixels (x-axis).
    pub fx: f32,
    /// Focal length in pixels (y-axis).
    pub fy: f32,
    /// Principal point x (pixels, corner-origin).
    pub cx: f32,
    /// Principal point y (pixels, corner-origin).
    pub cy: f32,
    /// Image resolution [width, height].
    pub resolution: [usize; 2],
}

impl PinholeIntrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32, width: usize, height: usize) -> Self {
        PinholeIntrinsics {
            fx,
            fy,
            cx,
            cy,
            resolution: [width, height],
        }
    }

    /// True if the pixel lies inside the image.
    pub fn contains(&self, pixel: [f32; 2]) -> bool {
        pixel[0] >= 0.0
            && pixel[1] >= 0.0
            && pixel[0] < self.resolution[0] as f32
            && pixel[1] < self.resolution[1] as f32
    }
}

impl Projection for PinholeIntrinsics {
    #[inline]
    fn project(&self, point: [f32; 2]) -> [f32; 2] {
        [
            point[0] * self.fx + self.cx - 0.5,
            point[1] * self.fy + self.cy - 0.5,
        ]
    }

    #[inline]
    fn unproject(&self, pixel: [f32; 2]) -> [f32; 2] {
        [
            (pixel[0] + 0.5 - self.cx) / self.fx,
            (pixel[1] + 0.5 - self.cy) / self.fy,
        ]
    }

    fn resolution(&self) -> [usize; 2] {
        self.resolution
    }
}

/// Closed set of supported camera models.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraModel {
    Pinhole(PinholeIntrinsics),
}

impl Projection for CameraModel {
    fn project(&self, point: [f32; 2]) -> [f32; 2] {
        match self {
            CameraModel::Pinhole(k) => k.project(point),
        }
    }

    fn unproject(&self, pixel: [f32; 2]) -> [f32; 2] {
        match self {
            CameraModel::Pinhole(k) => k.unproject(pixel),
        }
    }

    fn resolution(&self) -> [usize; 2] {
        match self {
            CameraModel::Pinhole(k) => k.resolution,
        }
    }
}

impl From<PinholeIntrinsics> for CameraModel {
    fn from(k: PinholeIntrinsics) -> Self {
        CameraModel::Pinhole(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn euroc_like() -> PinholeIntrinsics {
        PinholeIntrinsics::new(458.654, 457.296, 367.215, 248.375, 752, 480)
    }

    #[test]
    fn test_principal_point_maps_to_origin() {
        let cam = euroc_like();
        // The pixel whose corner-origin coordinate equals the principal point.
        let n = cam.unproject([367.215 - 0.5, 248.375 - 0.5]);
        assert_abs_diff_eq!(n[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(n[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_half_pixel_convention() {
        let cam = PinholeIntrinsics::new(500.0, 500.0, 320.0, 240.0, 640, 480);
        let p = cam.project([0.0, 0.0]);
        assert_eq!(p, [319.5, 239.5]);
        let n = cam.unproject([0.0, 0.0]);
        assert_abs_diff_eq!(n[0], -0.639, epsilon = 1e-6);
        assert_abs_diff_eq!(n[1], -0.479, epsilon = 1e-6);
    }

    #[test]
    fn test_roundtrip() {
        let cam = euroc_like();
        let u = [123.456, 321.654];
        let back = cam.project(cam.unproject(u));
        assert_abs_diff_eq!(back[0], u[0], epsilon = 1e-3);
        assert_abs_diff_eq!(back[1], u[1], epsilon = 1e-3);
    }

    #[test]
    fn test_batch_matches_single() {
        let cam = CameraModel::from(euroc_like());
        let pixels = [[0.0, 0.0], [100.0, 50.0], [751.0, 479.0]];
        let normalized = cam.unproject_points(&pixels);
        assert_eq!(normalized.len(), 3);
        for (n, &p) in normalized.iter().zip(&pixels) {
            assert_eq!(*n, cam.unproject(p));
        }
        let projected = cam.project_points(&normalized);
        for (q, p) in projected.iter().zip(&pixels) {
            assert_abs_diff_eq!(q[0], p[0], epsilon = 1e-3);
            assert_abs_diff_eq!(q[1], p[1], epsilon = 1e-3);
        }
    }

    #[test]
    fn test_contains_and_resolution() {
        let cam = PinholeIntrinsics::new(500.0, 500.0, 320.0, 240.0, 640, 480);
        assert!(cam.contains([0.0, 0.0]));
        assert!(cam.contains([639.9, 479.9]));
        assert!(!cam.contains([640.0, 10.0]));
        assert!(!cam.contains([-0.1, 10.0]));
        assert_eq!(CameraModel::Pinhole(cam).resolution(), [640, 480]);
    }
}
