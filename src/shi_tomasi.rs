// shi_tomasi.rs — Minimum-eigenvalue corner response.
//
// Reference: Shi & Tomasi, "Good Features to Track" (CVPR 1994).
//
// Over a (2·HALF_BOX+1)² window centred on the pixel, accumulate the
// gradient covariance from central differences:
//
//   dx = I(x+1, y) - I(x-1, y)      dy = I(x, y+1) - I(x, y-1)
//   a = Σ dx² / 2n     b = Σ dx·dy / 2n     c = Σ dy² / 2n
//
// The response is the smaller eigenvalue of [[a, b], [b, c]]:
//
//   λ_min = ½ (a + c − √((a − c)² + 4b²))
//
// Unlike the ring test this is rotation-invariant and suppresses edges
// (one large, one tiny eigenvalue), so it is used to re-rank FAST hits.

use crate::image::ImageView;

/// Half-size of the scoring window (7×7).
pub const HALF_BOX: usize = 3;

/// Margin a pixel needs on every side to be scored.
pub const SCORE_MARGIN: usize = HALF_BOX + 1;

/// Smaller eigenvalue of the local gradient covariance at `(x, y)`.
///
/// Returns 0.0 when the window (plus the 1-pixel gradient margin) does not
/// fit inside the view.
pub fn shi_tomasi_score(image: &ImageView<'_, u8>, x: usize, y: usize) -> f32 {
    let (w, h) = image.size();
    if x < SCORE_MARGIN || y < SCORE_MARGIN || x + SCORE_MARGIN >= w || y + SCORE_MARGIN >= h {
        return 0.0;
    }

    let mut sxx = 0.0f32;
    let mut syy = 0.0f32;
    let mut sxy = 0.0f32;

    for yy in (y - HALF_BOX)..=(y + HALF_BOX) {
        let above = image.row(yy - 1);
        let here = image.row(yy);
        let below = image.row(yy + 1);
        for xx in (x - HALF_BOX)..=(x + HALF_BOX) {
            let dx = here[xx + 1] as f32 - here[xx - 1] as f32;
            let dy = below[xx] as f32 - above[xx] as f32;
            sxx += dx * dx;
            syy += dy * dy;
            sxy += dx * dy;
        }
    }

    let side = (2 * HALF_BOX + 1) as f32;
    let norm = 1.0 / (2.0 * side * side);
    let a = sxx * norm;
    let c = syy * norm;
    let b = sxy * norm;

    0.5 * (a + c - ((a - c) * (a - c) + 4.0 * b * b).sqrt())
}
