// tests/test_klt.rs — Integration tests for the single-level calculator and
// the pyramidal tracker.

use kltrack::calculator::{
    CalculatorConfig, OpticalFlowCalculator, TrackingMethod, TrackingResult,
};
use kltrack::flow::{FlowConfig, OpticalFlow};
use kltrack::image::Image;
use kltrack::pool::WorkerPool;
use kltrack::pyramid::ImagePyramid;

/// Smooth, well-textured intensity field.
fn texture(x: f64, y: f64) -> f64 {
    use std::f64::consts::PI;
    128.0
        + 60.0 * (2.0 * PI * x / 37.0 + 0.3).sin() * (2.0 * PI * y / 29.0).cos()
        + 40.0 * (2.0 * PI * (x + y) / 53.0).sin()
}

/// `texture` moved by `(dx, dy)`: a point at p appears at p + (dx, dy).
fn make_scene(w: usize, h: usize, dx: f64, dy: f64) -> Image<u8> {
    Image::from_fn(w, h, |x, y| {
        texture(x as f64 - dx, y as f64 - dy).round().clamp(0.0, 255.0) as u8
    })
}

fn flow_with(first: &Image<u8>, second: &Image<u8>, config: FlowConfig) -> OpticalFlow {
    let mut flow = OpticalFlow::new(config).unwrap();
    flow.set_first_image(&first.view()).unwrap();
    flow.set_second_image(&second.view()).unwrap();
    flow
}

fn flow_config(cursor: usize, levels: usize) -> FlowConfig {
    FlowConfig {
        calculator: CalculatorConfig {
            cursor_size: (cursor, cursor),
            max_iterations: 20,
            ..Default::default()
        },
        number_levels: levels,
    }
}

// ===== Single level =====

#[test]
fn identical_images_converge_in_place() {
    let img = make_scene(100, 100, 0.0, 0.0);
    let mut calc = OpticalFlowCalculator::default();
    let eps = calc.config().pixel_eps;
    let mut bound = calc.bind(img.view(), img.view());
    for first in [[30.0, 30.0], [50.5, 41.25], [70.9, 66.1]] {
        for method in [TrackingMethod::LucasKanade, TrackingMethod::IlluminationCompensated] {
            let mut second = first;
            let res = bound.track(method, &mut second, first);
            assert_eq!(res, TrackingResult::Completed, "{first:?} {method:?}");
            assert!((second[0] - first[0]).abs() < eps);
            assert!((second[1] - first[1]).abs() < eps);
        }
    }
}

#[test]
fn flat_patch_always_fails() {
    let img = Image::from_vec(80, 80, vec![77u8; 6400]);
    let mut calc = OpticalFlowCalculator::default();
    let mut bound = calc.bind(img.view(), img.view());
    for offset in [[0.0, 0.0], [1.5, -2.0], [-3.0, 0.25]] {
        let first = [40.0, 40.0];
        let mut second = [first[0] + offset[0], first[1] + offset[1]];
        for method in [TrackingMethod::LucasKanade, TrackingMethod::IlluminationCompensated] {
            assert_eq!(bound.track(method, &mut second, first), TrackingResult::Fail);
        }
    }
}

#[test]
fn guard_banded_view_fails_without_overread() {
    // 100×100 buffer, textured 60×60 interior at (20, 20), 255 elsewhere.
    let buffer = Image::from_fn(100, 100, |x, y| {
        if (20..80).contains(&x) && (20..80).contains(&y) {
            texture(x as f64, y as f64).round() as u8
        } else {
            255
        }
    });
    let view = buffer.sub_image(20, 20, 60, 60);
    let mut calc = OpticalFlowCalculator::default();
    let mut bound = calc.bind(view, view);

    // First position too close to the view edge.
    for first in [[3.0, 30.0], [30.0, 55.0], [59.0, 59.0], [-1.0, 10.0]] {
        let mut second = first;
        assert_eq!(
            bound.track(TrackingMethod::LucasKanade, &mut second, first),
            TrackingResult::Fail,
            "{first:?}"
        );
    }

    // Valid first position, estimate outside the valid region.
    let mut second = [56.5, 30.0];
    assert_eq!(
        bound.track(TrackingMethod::IlluminationCompensated, &mut second, [30.0, 30.0]),
        TrackingResult::Fail
    );

    // Right at the edge of the valid region: still only reads the view.
    let first = [6.0, 52.9];
    let mut second = first;
    assert_eq!(
        bound.track(TrackingMethod::LucasKanade, &mut second, first),
        TrackingResult::Completed
    );
}

// ===== Pyramid =====

#[test]
fn subpixel_shift_recovered_through_pyramid() {
    let first = make_scene(200, 200, 0.0, 0.0);
    let second = make_scene(200, 200, 3.4, -2.1);
    let mut flow = flow_with(&first, &second, FlowConfig {
        calculator: CalculatorConfig {
            max_iterations: 20,
            ..FlowConfig::default().calculator
        },
        ..FlowConfig::default()
    });

    let eps = flow.pixel_eps();
    for method in [TrackingMethod::LucasKanade, TrackingMethod::IlluminationCompensated] {
        let p0 = [100.0, 100.0];
        let mut p = p0;
        let res = flow.track(method, &mut p, p0).unwrap();
        assert_ne!(res, TrackingResult::Fail, "{method:?}");
        assert!((p[0] - p0[0] - 3.4).abs() < eps, "{method:?} dx = {}", p[0] - p0[0]);
        assert!((p[1] - p0[1] + 2.1).abs() < eps, "{method:?} dy = {}", p[1] - p0[1]);
    }
}

#[test]
fn horizontal_tracking_keeps_row() {
    let first = make_scene(160, 120, 0.0, 0.0);
    let second = make_scene(160, 120, 4.3, 0.0);
    let mut flow = flow_with(&first, &second, flow_config(6, 3));
    let p0 = [80.0, 60.0];
    let mut p = p0;
    let res = flow
        .track_horizontal(TrackingMethod::LucasKanade, &mut p, p0)
        .unwrap();
    assert_ne!(res, TrackingResult::Fail);
    assert!((p[0] - 84.3).abs() < 0.1, "x = {}", p[0]);
    assert_eq!(p[1], 60.0);
}

#[test]
fn shared_pyramids_are_not_copied() {
    let pyr = ImagePyramid::from_image(make_scene(96, 96, 0.0, 0.0), 3).unwrap();
    let mut flow = OpticalFlow::new(flow_config(4, 3)).unwrap();
    flow.set_first_pyramid(&pyr).unwrap();
    flow.set_second_pyramid(&pyr).unwrap();
    assert!(flow.first_pyramid().unwrap().shares_storage_with(&pyr));
    let mut p = [48.0, 48.0];
    let res = flow.track(TrackingMethod::LucasKanade, &mut p, [48.0, 48.0]).unwrap();
    assert_eq!(res, TrackingResult::Completed);
}

// ===== Batched =====

#[test]
fn batch_preserves_order_and_skips_failures() {
    let img = make_scene(120, 120, 0.0, 0.0);
    let mut flow = flow_with(&img, &img, flow_config(3, 1));

    let first = [[30.0, 30.0], [1.0, 1.0], [60.0, 60.0], [80.0, 40.0]];
    // Point 2 starts beyond the 3 px per-level bound; point 1 is off-region.
    let mut second = [[30.5, 30.0], [1.0, 1.0], [63.5, 60.0], [80.0, 41.0]];
    let initial = second;
    let mut status = vec![TrackingResult::Fail; 7];

    flow.track_batch(TrackingMethod::LucasKanade, &mut status, &mut second, &first)
        .unwrap();

    assert_eq!(status.len(), 4);
    assert_ne!(status[0], TrackingResult::Fail);
    assert_eq!(status[1], TrackingResult::Fail);
    assert_eq!(status[2], TrackingResult::Fail);
    assert_ne!(status[3], TrackingResult::Fail);

    // Failed points keep their estimate; live ones land on their own first position.
    assert_eq!(second[1], initial[1]);
    assert_eq!(second[2], initial[2]);
    for i in [0, 3] {
        assert!((second[i][0] - first[i][0]).abs() < 0.05, "point {i}: {:?}", second[i]);
        assert!((second[i][1] - first[i][1]).abs() < 0.05, "point {i}: {:?}", second[i]);
    }
}

#[test]
fn batch_status_is_reset_every_call() {
    let img = make_scene(100, 100, 0.0, 0.0);
    let mut flow = flow_with(&img, &img, flow_config(4, 2));
    let first = [[50.0, 50.0]];
    let mut status = Vec::new();

    let mut far = [[1.0, 1.0]];
    flow.track_batch(TrackingMethod::LucasKanade, &mut status, &mut far, &first)
        .unwrap();
    assert_eq!(status, vec![TrackingResult::Fail]);

    let mut near = first;
    flow.track_batch(TrackingMethod::LucasKanade, &mut status, &mut near, &first)
        .unwrap();
    assert_eq!(status, vec![TrackingResult::Completed]);
}

#[test]
fn horizontal_batch_matches_single() {
    let first = make_scene(128, 96, 0.0, 0.0);
    let second = make_scene(128, 96, 2.2, 0.0);
    let mut flow = flow_with(&first, &second, flow_config(5, 2));
    let points = [[40.0, 40.0], [64.0, 50.0], [90.0, 45.0]];
    let mut batch = points;
    let mut status = Vec::new();
    flow.track_batch_horizontal(TrackingMethod::IlluminationCompensated, &mut status, &mut batch, &points)
        .unwrap();
    for (i, &p0) in points.iter().enumerate() {
        let mut p = p0;
        let res = flow
            .track_horizontal(TrackingMethod::IlluminationCompensated, &mut p, p0)
            .unwrap();
        assert_eq!(res, status[i]);
        assert_eq!(p, batch[i]);
    }
}

// ===== Worker pool =====

#[test]
fn parallel_matches_batch() {
    let _ = env_logger::builder().is_test(true).try_init();
    let first = make_scene(160, 160, 0.0, 0.0);
    let second = make_scene(160, 160, 1.6, 2.3);
    let mut flow = flow_with(&first, &second, flow_config(6, 3));

    let points: Vec<[f32; 2]> = (0..24)
        .map(|i| [30.0 + (i % 6) as f32 * 19.0, 30.0 + (i / 6) as f32 * 27.0])
        .collect();

    let mut batch = points.clone();
    let mut status = Vec::new();
    flow.track_batch(TrackingMethod::IlluminationCompensated, &mut status, &mut batch, &points)
        .unwrap();

    let pool = WorkerPool::new(3).unwrap();
    let mut parallel = points.clone();
    let par_status = flow
        .track_parallel(&pool, TrackingMethod::IlluminationCompensated, &mut parallel, &points)
        .unwrap();

    assert_eq!(par_status, status);
    for i in 0..points.len() {
        if status[i] != TrackingResult::Fail {
            assert!((parallel[i][0] - batch[i][0]).abs() < 1e-5);
            assert!((parallel[i][1] - batch[i][1]).abs() < 1e-5);
        }
    }
    assert!(status.iter().filter(|&&s| s != TrackingResult::Fail).count() > 12);
}
