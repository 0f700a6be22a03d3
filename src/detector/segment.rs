//! Segmenter (C7): extracts contours from the binary mask and filters them
//! by area, aspect ratio, and an optional channel band.

use crate::types::DetectionConfig;
use image::GrayImage;
use imageproc::contours::find_contours;
use imageproc::point::Point;

/// A candidate contour surviving the C7 filters, carrying enough geometry
/// for C8/C9 without re-deriving it from raw points each time.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub points: Vec<Point<i32>>,
    pub bbox: (u32, u32, u32, u32),
    pub centroid: (f32, f32),
    pub area_px2: f32,
    pub aspect_ratio: f32,
}

fn bounding_box(points: &[Point<i32>]) -> (u32, u32, u32, u32) {
    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0);
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(0);
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0);
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(0);
    (
        min_x.max(0) as u32,
        min_y.max(0) as u32,
        (max_x - min_x).max(0) as u32 + 1,
        (max_y - min_y).max(0) as u32 + 1,
    )
}

/// Shoelace-formula polygon area, used both as the area filter input and as
/// the measurer's area figure (C9).
fn polygon_area(points: &[Point<i32>]) -> f32 {
    if points.len() < 3 {
        let (_, _, w, h) = bounding_box(points);
        return (w * h) as f32;
    }
    let mut sum = 0.0f64;
    for i in 0..points.len() {
        let p0 = points[i];
        let p1 = points[(i + 1) % points.len()];
        sum += (p0.x as f64) * (p1.y as f64) - (p1.x as f64) * (p0.y as f64);
    }
    (sum.abs() / 2.0) as f32
}

fn centroid_of(points: &[Point<i32>]) -> (f32, f32) {
    let n = points.len().max(1) as f32;
    let sx: i64 = points.iter().map(|p| p.x as i64).sum();
    let sy: i64 = points.iter().map(|p| p.y as i64).sum();
    (sx as f32 / n, sy as f32 / n)
}

/// Andrew's monotone-chain convex hull, returned counter-clockwise with no
/// duplicate closing point.
fn convex_hull(points: &[Point<i32>]) -> Vec<(i32, i32)> {
    let mut pts: Vec<(i32, i32)> = points.iter().map(|p| (p.x, p.y)).collect();
    pts.sort_unstable();
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let cross = |o: (i32, i32), a: (i32, i32), b: (i32, i32)| -> i64 {
        (a.0 - o.0) as i64 * (b.1 - o.1) as i64 - (a.1 - o.1) as i64 * (b.0 - o.0) as i64
    };

    let mut lower: Vec<(i32, i32)> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(i32, i32)> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Rotating-calipers minimum-area bounding rectangle over a contour's convex
/// hull (one caliper orientation per hull edge). Returns the rectangle's two
/// side lengths, in no particular order.
fn min_area_rect_dims(points: &[Point<i32>]) -> (f32, f32) {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        let (_, _, w, h) = bounding_box(points);
        return (w as f32, h as f32);
    }

    let mut best_area = f32::INFINITY;
    let mut best_dims = (0.0f32, 0.0f32);

    for i in 0..hull.len() {
        let (x0, y0) = hull[i];
        let (x1, y1) = hull[(i + 1) % hull.len()];
        let edge_x = (x1 - x0) as f32;
        let edge_y = (y1 - y0) as f32;
        let edge_len = (edge_x * edge_x + edge_y * edge_y).sqrt();
        if edge_len < f32::EPSILON {
            continue;
        }
        let ux = edge_x / edge_len;
        let uy = edge_y / edge_len;
        let vx = -uy;
        let vy = ux;

        let (mut min_u, mut max_u) = (f32::INFINITY, f32::NEG_INFINITY);
        let (mut min_v, mut max_v) = (f32::INFINITY, f32::NEG_INFINITY);
        for &(px, py) in &hull {
            let px = px as f32;
            let py = py as f32;
            let u = px * ux + py * uy;
            let v = px * vx + py * vy;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }

        let width = max_u - min_u;
        let height = max_v - min_v;
        let area = width * height;
        if area < best_area {
            best_area = area;
            best_dims = (width, height);
        }
    }

    best_dims
}

/// Runs the C7 pipeline over a binary mask, returning accepted candidates in
/// a deterministic order (ascending top-left corner of the bounding box).
pub fn segment(mask: &GrayImage, config: &DetectionConfig) -> Vec<Candidate> {
    let contours = find_contours::<i32>(mask);

    let mut candidates: Vec<Candidate> = contours
        .into_iter()
        .filter_map(|contour| {
            let points = contour.points;
            if points.is_empty() {
                return None;
            }
            let bbox = bounding_box(&points);
            let area = polygon_area(&points);
            let (dim_a, dim_b) = min_area_rect_dims(&points);
            let (long, short) = if dim_a >= dim_b { (dim_a, dim_b) } else { (dim_b, dim_a) };
            let aspect_ratio = if short > f32::EPSILON { long / short } else { 0.0 };
            let centroid = centroid_of(&points);

            Some(Candidate {
                points,
                bbox,
                centroid,
                area_px2: area,
                aspect_ratio,
            })
        })
        .filter(|c| c.area_px2 >= config.min_area_px2 && c.area_px2 <= config.max_area_px2)
        .filter(|c| c.aspect_ratio >= config.min_aspect_ratio && c.aspect_ratio <= config.max_aspect_ratio)
        .filter(|c| match config.channel_band {
            Some((y_min, y_max)) => {
                let y = c.centroid.1;
                y >= y_min as f32 && y <= y_max as f32
            }
            None => true,
        })
        .collect();

    candidates.sort_by_key(|c| (c.bbox.0, c.bbox.1));
    candidates
}
