//! Measurer (C9): per-droplet geometry from an accepted contour — area,
//! centroid, major/minor axes, equivalent diameter, aspect ratio.

use crate::detector::segment::Candidate;
use crate::types::DropletMeasurement;
use std::f32::consts::PI;

/// Contours with fewer points than this fall back to bounding-box
/// dimensions instead of a least-squares ellipse fit (§4.9).
const MIN_POINTS_FOR_ELLIPSE_FIT: usize = 5;

/// Computes a [`DropletMeasurement`] for one accepted candidate.
///
/// `radius_offset_px` is an additive correction (positive or negative)
/// applied to every diameter-like measurement to correct for systematic
/// defocus bias; it shifts each *diameter* by `2 * radius_offset_px`.
pub fn measure(candidate: &Candidate, frame_seq: u64, radius_offset_px: f32) -> DropletMeasurement {
    let centroid = moments_centroid(candidate);
    let (major, minor) = axes(candidate, centroid);

    let major_axis_px = (major + 2.0 * radius_offset_px).max(0.0);
    let minor_axis_px = (minor + 2.0 * radius_offset_px).max(0.0);
    let equivalent_diameter_px = 2.0 * (candidate.area_px2 / PI).sqrt() + 2.0 * radius_offset_px;
    let aspect_ratio = if minor_axis_px > 0.0 {
        major_axis_px / minor_axis_px
    } else {
        0.0
    };

    DropletMeasurement {
        area_px2: candidate.area_px2,
        major_axis_px,
        minor_axis_px,
        equivalent_diameter_px: equivalent_diameter_px.max(0.0),
        aspect_ratio,
        centroid,
        bbox: candidate.bbox,
        frame_seq,
    }
}

/// Centroid from first-order moments of the contour's boundary points,
/// falling back to the bounding-box center when the point set is degenerate.
fn moments_centroid(candidate: &Candidate) -> (f32, f32) {
    let n = candidate.points.len();
    if n == 0 {
        let (x, y, w, h) = candidate.bbox;
        return (x as f32 + w as f32 / 2.0, y as f32 + h as f32 / 2.0);
    }
    let sum_x: i64 = candidate.points.iter().map(|p| p.x as i64).sum();
    let sum_y: i64 = candidate.points.iter().map(|p| p.y as i64).sum();
    (sum_x as f32 / n as f32, sum_y as f32 / n as f32)
}

/// Least-squares ellipse fit via second-order central moments of the
/// boundary points when there are enough of them; otherwise uses the
/// axis-aligned bounding box as a fallback (major = max(w,h), minor = min(w,h)).
fn axes(candidate: &Candidate, centroid: (f32, f32)) -> (f32, f32) {
    if candidate.points.len() < MIN_POINTS_FOR_ELLIPSE_FIT {
        let (_, _, w, h) = candidate.bbox;
        return (w.max(h) as f32, w.min(h) as f32);
    }

    let n = candidate.points.len() as f32;
    let (mut mu20, mut mu02, mut mu11) = (0.0f32, 0.0f32, 0.0f32);
    for p in &candidate.points {
        let dx = p.x as f32 - centroid.0;
        let dy = p.y as f32 - centroid.1;
        mu20 += dx * dx;
        mu02 += dy * dy;
        mu11 += dx * dy;
    }
    mu20 /= n;
    mu02 /= n;
    mu11 /= n;

    let common = ((mu20 - mu02).powi(2) + 4.0 * mu11 * mu11).sqrt();
    let major = (2.0 * (mu20 + mu02 + common)).max(0.0).sqrt();
    let minor = (2.0 * (mu20 + mu02 - common)).max(0.0).sqrt();

    if major >= minor {
        (major, minor)
    } else {
        (minor, major)
    }
}
