// tests/test_fast.rs — Integration tests for the FAST ring test.
//
// FAST finds "segment" corners: a contiguous arc of the radius-3 ring is
// uniformly brighter or darker than the centre. Chessboard X-junctions do
// not qualify (the ring alternates in runs of ~4), so the test patterns here
// are bright rectangles on a dark background.

use std::collections::HashSet;

use kltrack::fast::{nonmax_suppression, FastCorner, FastDetector};
use kltrack::image::Image;
use kltrack::pyramid::ImagePyramid;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Place a bright rectangle on a dark background.
fn make_rectangle_image(
    img_w: usize,
    img_h: usize,
    rect: (usize, usize, usize, usize),
    bg: u8,
    fg: u8,
) -> Image<u8> {
    let (rx, ry, rw, rh) = rect;
    Image::from_fn(img_w, img_h, |x, y| {
        if x >= rx && x < rx + rw && y >= ry && y < ry + rh {
            fg
        } else {
            bg
        }
    })
}

/// Four bright squares on a dark background.
fn make_multi_square_image() -> Image<u8> {
    let squares = [(10, 10), (60, 10), (10, 60), (60, 60)];
    Image::from_fn(100, 100, |x, y| {
        let inside = squares
            .iter()
            .any(|&(sx, sy)| x >= sx && x < sx + 20 && y >= sy && y < sy + 20);
        if inside { 220 } else { 20 }
    })
}

fn make_noise(w: usize, h: usize, seed: u64) -> Image<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    Image::from_fn(w, h, |_, _| rng.gen())
}

fn detect_all(img: &Image<u8>, barrier: i32) -> Vec<FastCorner> {
    let (w, h) = img.size();
    FastDetector::default().detect(&img.view(), (0, 0), (w, h), barrier, 0)
}

fn positions(corners: &[FastCorner]) -> HashSet<(usize, usize)> {
    corners.iter().map(|c| (c.x, c.y)).collect()
}

// ===== Basic detection =====

#[test]
fn rectangle_corners_detected() {
    let img = make_rectangle_image(60, 60, (15, 15, 30, 30), 20, 220);
    let corners = detect_all(&img, 30);
    assert!(corners.len() >= 4, "expected the four corners, got {}", corners.len());
    for (cx, cy) in [(15, 15), (44, 15), (15, 44), (44, 44)] {
        assert!(
            corners.iter().any(|c| c.x.abs_diff(cx) <= 1 && c.y.abs_diff(cy) <= 1),
            "no detection near ({cx}, {cy})"
        );
    }
}

#[test]
fn corners_stay_near_rectangle_edges() {
    let (rx, ry, rw, rh) = (20, 20, 25, 25);
    let img = make_rectangle_image(70, 70, (rx, ry, rw, rh), 20, 220);
    for c in detect_all(&img, 30) {
        let dx = c.x.abs_diff(rx).min(c.x.abs_diff(rx + rw - 1));
        let dy = c.y.abs_diff(ry).min(c.y.abs_diff(ry + rh - 1));
        assert!(dx <= 3 && dy <= 3, "({}, {}) far from any corner", c.x, c.y);
    }
}

// ===== Barrier monotonicity =====

#[test]
fn raising_barrier_yields_subset() {
    for seed in 0..4 {
        let img = make_noise(64, 48, seed);
        let barriers = [0, 5, 12, 30, 60];
        let sets: Vec<_> = barriers
            .iter()
            .map(|&b| positions(&detect_all(&img, b)))
            .collect();
        for i in 1..sets.len() {
            assert!(
                sets[i].is_subset(&sets[i - 1]),
                "seed {seed}: barrier {} added corners over {}",
                barriers[i],
                barriers[i - 1]
            );
        }
        assert!(!sets[0].is_empty(), "noise at barrier 0 should produce corners");
    }
}

#[test]
fn constant_image_has_no_corners() {
    let img = Image::from_vec(40, 40, vec![128u8; 1600]);
    for barrier in [1, 4, 20, 200] {
        assert!(detect_all(&img, barrier).is_empty(), "barrier {barrier}");
    }
}

#[test]
fn smooth_gradient_has_few_corners() {
    let img = Image::from_fn(64, 64, |x, _| (x * 4).min(255) as u8);
    let corners = detect_all(&img, 20);
    assert!(corners.len() < 10, "gradient produced {} corners", corners.len());
}

// ===== Non-max suppression =====

#[test]
fn nms_thins_without_emptying() {
    let img = make_multi_square_image();
    let raw = detect_all(&img, 30);
    assert!(!raw.is_empty());
    let kept = nonmax_suppression(&raw);
    assert!(!kept.is_empty());
    assert!(kept.len() <= raw.len());

    let set = positions(&kept);
    for c in &kept {
        for (dx, dy) in [(1isize, 0isize), (0, 1), (1, 1), (1, -1)] {
            let n = ((c.x as isize + dx) as usize, (c.y as isize + dy) as usize);
            assert!(!set.contains(&n), "adjacent survivors at ({}, {})", c.x, c.y);
        }
    }
}

// ===== FAST on pyramid levels =====

#[test]
fn level_tag_follows_pyramid_level() {
    let pyr = ImagePyramid::from_image(make_multi_square_image(), 3).unwrap();
    let det = FastDetector::default();
    for lvl in 0..pyr.number_levels() {
        let view = pyr.get(lvl).unwrap();
        let corners = det.detect(&view, (0, 0), view.size(), 20, lvl);
        assert!(corners.iter().all(|c| c.level == lvl));
    }
}

#[test]
fn rectangle_restricts_search() {
    let img = make_multi_square_image();
    let det = FastDetector::default();
    let corners = det.detect(&img.view(), (0, 0), (50, 50), 30, 0);
    assert!(!corners.is_empty());
    assert!(corners.iter().all(|c| c.x < 50 && c.y < 50));
}
