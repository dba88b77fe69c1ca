// pyramid.rs — Box-filtered image pyramid (mip stack).
//
// Level 0 is the source image. Each further level averages 2×2 blocks of
// the level above it:
//
//   dst(x, y) = round( (s(2x,2y) + s(2x+1,2y) + s(2x,2y+1) + s(2x+1,2y+1)) / 4 )
//
// Odd dimensions round UP: level k is ceil(w / 2^k) × ceil(h / 2^k). The
// missing column/row of the last block replicates the edge pixel, so the
// filter is exact for even sizes and edge-weighted for the odd remainder.
//
// Levels live behind `Arc`, so cloning a pyramid only bumps reference
// counts. A tracker can hold a pyramid "by value" while the frontend keeps
// its own copy; nobody can mutate the pixels once the pyramid is built.

use std::sync::Arc;

use crate::error::{KltError, Result};
use crate::image::{Image, ImageView};

/// Deepest supported pyramid. Level-k coordinates scale by `2^k`, which
/// must fit a `u32`.
pub const MAX_LEVELS: usize = 32;

/// Reject level counts outside `1..=MAX_LEVELS`.
pub fn validate_levels(number_levels: usize) -> Result<()> {
    if number_levels == 0 {
        return Err(KltError::EmptyPyramid);
    }
    if number_levels > MAX_LEVELS {
        return Err(KltError::TooManyLevels {
            levels: number_levels,
            max: MAX_LEVELS,
        });
    }
    Ok(())
}

/// Multi-resolution stack of u8 images with shared, immutable storage.
#[derive(Clone)]
pub struct ImagePyramid {
    levels: Vec<Arc<Image<u8>>>,
}

impl ImagePyramid {
    /// Build `number_levels` levels from a borrowed source view.
    ///
    /// Level 0 is a tightly packed copy of `src`.
    pub fn build(src: &ImageView<'_, u8>, number_levels: usize) -> Result<Self> {
        Self::from_image(src.to_owned_image(), number_levels)
    }

    /// Build from an owned image, which becomes level 0 without copying.
    pub fn from_image(image: Image<u8>, number_levels: usize) -> Result<Self> {
        validate_levels(number_levels)?;
        if image.width() == 0 || image.height() == 0 {
            return Err(KltError::EmptyImage {
                width: image.width(),
                height: image.height(),
            });
        }

        let mut pyramid = ImagePyramid {
            levels: Vec::with_capacity(number_levels),
        };
        pyramid.levels.push(Arc::new(image));
        pyramid.extend_to(number_levels);
        Ok(pyramid)
    }

    /// Number of levels.
    #[inline]
    pub fn number_levels(&self) -> usize {
        self.levels.len()
    }

    /// Level-0 `(width, height)`.
    #[inline]
    pub fn size(&self) -> (usize, usize) {
        self.levels[0].size()
    }

    /// Read-only view of one level.
    pub fn get(&self, level: usize) -> Result<ImageView<'_, u8>> {
        self.levels
            .get(level)
            .map(|img| img.view())
            .ok_or(KltError::LevelOutOfRange {
                level,
                levels: self.levels.len(),
            })
    }

    /// Pyramid with exactly `number_levels` levels.
    ///
    /// Existing levels are shared with `self`; missing ones are computed
    /// by further downsampling the top level.
    pub fn with_levels(&self, number_levels: usize) -> Result<Self> {
        validate_levels(number_levels)?;
        let keep = number_levels.min(self.levels.len());
        let mut pyramid = ImagePyramid {
            levels: self.levels[..keep].to_vec(),
        };
        pyramid.extend_to(number_levels);
        Ok(pyramid)
    }

    /// True when both pyramids reference the same level-0 buffer.
    pub fn shares_storage_with(&self, other: &ImagePyramid) -> bool {
        Arc::ptr_eq(&self.levels[0], &other.levels[0])
    }

    fn extend_to(&mut self, number_levels: usize) {
        while self.levels.len() < number_levels {
            let next = match self.levels.last() {
                Some(top) => downsample_2x2(&top.view()),
                None => return,
            };
            log::trace!(
                "pyramid level {}: {}x{}",
                self.levels.len(),
                next.width(),
                next.height()
            );
            self.levels.push(Arc::new(next));
        }
    }
}

impl std::fmt::Debug for ImagePyramid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.levels.iter().map(|l| l.size()))
            .finish()
    }
}

/// Halve an image with a 2×2 box filter, rounding odd sizes up.
pub fn downsample_2x2(src: &ImageView<'_, u8>) -> Image<u8> {
    let (w, h) = src.size();
    let new_w = w.div_ceil(2);
    let new_h = h.div_ceil(2);
    let mut dst = Image::new(new_w, new_h);

    for y in 0..new_h {
        let top = src.row(2 * y);
        let bottom = src.row((2 * y + 1).min(h - 1));
        let out = dst.row_mut(y);
        for (x, px) in out.iter_mut().enumerate() {
            let x0 = 2 * x;
            let x1 = (x0 + 1).min(w - 1);
            let sum = top[x0] as u16 + top[x1] as u16 + bottom[x0] as u16 + bottom[x1] as u16;
            *px = ((sum + 2) / 4) as u8;
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_even_is_box_average() {
        let img = Image::from_vec(4, 2, vec![0u8, 4, 10, 10, 8, 12, 20, 21]);
        let down = downsample_2x2(&img.view());
        assert_eq!(down.size(), (2, 1));
        assert_eq!(down.get(0, 0), 6); // (0+4+8+12)/4
        assert_eq!(down.get(1, 0), 15); // 61 / 4 = 15.25
    }

    #[test]
    fn test_downsample_odd_rounds_up() {
        let img: Image<u8> = Image::new(7, 5);
        let down = downsample_2x2(&img.view());
        assert_eq!(down.size(), (4, 3));
    }

    #[test]
    fn test_downsample_odd_edge_replicates() {
        // Last column has no right neighbour; it averages with itself.
        let img = Image::from_vec(3, 2, vec![0u8, 0, 100, 0, 0, 50]);
        let down = downsample_2x2(&img.view());
        assert_eq!(down.get(1, 0), 75);
    }

    #[test]
    fn test_level_sizes_are_ceil() {
        let img: Image<u8> = Image::new(101, 77);
        let pyr = ImagePyramid::from_image(img, 4).unwrap();
        let sizes: Vec<_> = (0..4).map(|l| pyr.get(l).unwrap().size()).collect();
        assert_eq!(sizes, vec![(101, 77), (51, 39), (26, 20), (13, 10)]);
    }

    #[test]
    fn test_constant_image_stays_constant() {
        let img = Image::from_vec(33, 17, vec![77u8; 33 * 17]);
        let pyr = ImagePyramid::from_image(img, 4).unwrap();
        for lvl in 0..4 {
            let view = pyr.get(lvl).unwrap();
            assert!(view.pixels().all(|(_, _, v)| v == 77), "level {lvl}");
        }
    }

    #[test]
    fn test_zero_levels_rejected() {
        let img: Image<u8> = Image::new(10, 10);
        assert_eq!(
            ImagePyramid::from_image(img, 0).unwrap_err(),
            KltError::EmptyPyramid
        );
    }

    #[test]
    fn test_level_out_of_range() {
        let img: Image<u8> = Image::new(16, 16);
        let pyr = ImagePyramid::from_image(img, 2).unwrap();
        assert_eq!(
            pyr.get(2).unwrap_err(),
            KltError::LevelOutOfRange { level: 2, levels: 2 }
        );
    }

    #[test]
    fn test_clone_shares_levels() {
        let img: Image<u8> = Image::new(16, 16);
        let pyr = ImagePyramid::from_image(img, 3).unwrap();
        let copy = pyr.clone();
        assert!(pyr.shares_storage_with(&copy));
    }

    #[test]
    fn test_with_levels_truncates_and_extends() {
        let img = Image::from_fn(64, 48, |x, y| ((x * 3 + y * 5) % 256) as u8);
        let pyr = ImagePyramid::from_image(img, 2).unwrap();

        let shallow = pyr.with_levels(1).unwrap();
        assert_eq!(shallow.number_levels(), 1);
        assert!(shallow.shares_storage_with(&pyr));

        let deep = pyr.with_levels(4).unwrap();
        assert_eq!(deep.number_levels(), 4);
        assert_eq!(deep.get(3).unwrap().size(), (8, 6));

        let direct = ImagePyramid::from_image(
            pyr.get(0).unwrap().to_owned_image(),
            4,
        )
        .unwrap();
        assert_eq!(
            deep.get(3).unwrap().row(2),
            direct.get(3).unwrap().row(2)
        );
    }
}
