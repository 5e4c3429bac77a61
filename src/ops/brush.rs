// ============================================================================
// BRUSH STROKES: polyline capture, thinning and anti-aliased rasterization
// ============================================================================

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::Transform;

/// Points closer than `size * THIN_FACTOR` to the previous one are dropped.
pub const THIN_FACTOR: f32 = 0.15;

/// A committed or in-progress freehand stroke.
///
/// `points` are in the stroke's own space, `0..extent.0 × 0..extent.1`. Once
/// committed as a layer the extent is the size of the layer box at creation.
#[derive(Clone, Debug, PartialEq)]
pub struct BrushStroke {
    pub points: Vec<(f32, f32)>,
    pub color: [u8; 4],
    /// Brush diameter in pixels.
    pub size: f32,
    pub opacity: f32,
    /// Eraser strokes are composited with `BlendMode::Erase`.
    pub erase: bool,
    pub extent: (f32, f32),
}

impl BrushStroke {
    pub fn new(color: [u8; 4], size: f32, opacity: f32, erase: bool) -> Self {
        Self {
            points: Vec::new(),
            color,
            size: size.max(0.5),
            opacity: opacity.clamp(0.0, 1.0),
            erase,
            extent: (0.0, 0.0),
        }
    }

    /// Appends a point unless it is within the thinning distance of the last.
    /// Returns whether the point was kept.
    pub fn push_point(&mut self, x: f32, y: f32) -> bool {
        if let Some(&(lx, ly)) = self.points.last() {
            let min = self.size * THIN_FACTOR;
            let (dx, dy) = (x - lx, y - ly);
            if dx * dx + dy * dy < min * min {
                return false;
            }
        }
        self.points.push((x, y));
        true
    }
}

/// Padded bounds `(min_x, min_y, max_x, max_y)` of a stroke of the given
/// diameter. `None` for an empty point list.
pub fn stroke_bounds(points: &[(f32, f32)], size: f32) -> Option<(f32, f32, f32, f32)> {
    let first = points.first()?;
    let pad = size * 0.5 + 1.0;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.0, first.1, first.0, first.1);
    for &(x, y) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    Some((min_x - pad, min_y - pad, max_x + pad, max_y + pad))
}

/// Converts document-space points to a layer box plus box-local points.
pub fn normalize_stroke(points: &[(f32, f32)], size: f32) -> Option<(Transform, Vec<(f32, f32)>)> {
    let (min_x, min_y, max_x, max_y) = stroke_bounds(points, size)?;
    let x0 = min_x.floor();
    let y0 = min_y.floor();
    let transform = Transform::from_box(x0, y0, (max_x - x0).ceil(), (max_y - y0).ceil());
    let local = points.iter().map(|&(x, y)| (x - x0, y - y0)).collect();
    Some((transform, local))
}

/// Distance from `(px, py)` to the segment `a..b`.
fn sdf_line_segment(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    let len2 = dx * dx + dy * dy;
    let t = if len2 <= f32::EPSILON { 0.0 } else { (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0) };
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    ((px - cx) * (px - cx) + (py - cy) * (py - cy)).sqrt()
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Rasterizes a stroke into a `width × height` raster in the stroke's own
/// coordinates. Round caps and joins fall out of the distance field.
pub fn rasterize_stroke(stroke: &BrushStroke, width: u32, height: u32) -> RgbaImage {
    let mut out = RgbaImage::new(width.max(1), height.max(1));
    if stroke.points.is_empty() || stroke.opacity <= 0.0 {
        return out;
    }
    let radius = (stroke.size * 0.5).max(0.5);

    let segments: Vec<[f32; 4]> = if stroke.points.len() == 1 {
        let (x, y) = stroke.points[0];
        vec![[x, y, x, y]]
    } else {
        stroke.points.windows(2).map(|w| [w[0].0, w[0].1, w[1].0, w[1].1]).collect()
    };

    let [cr, cg, cb, ca] = stroke.color;
    let alpha_scale = ca as f32 * stroke.opacity;
    let w = out.width() as usize;
    let reach = radius + 1.0;

    let raw: &mut [u8] = out.as_mut();
    raw.par_chunks_mut(w * 4).enumerate().for_each(|(y, row)| {
        let py = y as f32 + 0.5;
        let mut coverage = vec![0.0f32; w];
        for s in &segments {
            if py < s[1].min(s[3]) - reach || py > s[1].max(s[3]) + reach {
                continue;
            }
            let x_lo = (s[0].min(s[2]) - reach).floor().max(0.0) as usize;
            let x_hi = ((s[0].max(s[2]) + reach).ceil().max(0.0) as usize).min(w);
            for (x, cov) in coverage.iter_mut().enumerate().take(x_hi).skip(x_lo) {
                let d = sdf_line_segment(x as f32 + 0.5, py, s[0], s[1], s[2], s[3]);
                let c = 1.0 - smoothstep(radius - 0.5, radius + 0.5, d);
                if c > *cov {
                    *cov = c;
                }
            }
        }
        for (x, &cov) in coverage.iter().enumerate() {
            if cov > 0.0 {
                let a = (alpha_scale * cov).round().clamp(0.0, 255.0) as u8;
                row[x * 4..x * 4 + 4].copy_from_slice(&Rgba([cr, cg, cb, a]).0);
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stroke(points: &[(f32, f32)], size: f32) -> BrushStroke {
        let mut s = BrushStroke::new([255, 0, 0, 255], size, 1.0, false);
        s.points = points.to_vec();
        s
    }

    #[test]
    fn single_point_paints_a_dot() {
        let s = stroke(&[(10.0, 10.0)], 6.0);
        let img = rasterize_stroke(&s, 20, 20);
        assert_eq!(img.get_pixel(10, 10)[3], 255);
        assert_eq!(img.get_pixel(10, 16)[3], 0);
    }

    #[test]
    fn segment_covers_its_length_with_round_caps() {
        let s = stroke(&[(4.0, 10.0), (16.0, 10.0)], 4.0);
        let img = rasterize_stroke(&s, 20, 20);
        assert_eq!(img.get_pixel(10, 10), &Rgba([255, 0, 0, 255]));
        // Cap extends past the endpoint by the radius.
        assert!(img.get_pixel(17, 10)[3] > 0);
        assert_eq!(img.get_pixel(10, 14)[3], 0);
    }

    #[test]
    fn edges_are_anti_aliased() {
        let s = stroke(&[(0.0, 10.0), (20.0, 10.0)], 5.0);
        let img = rasterize_stroke(&s, 20, 20);
        let partial = (0..20).map(|y| img.get_pixel(10, y)[3]).filter(|&a| a > 0 && a < 255).count();
        assert!(partial >= 2);
    }

    #[test]
    fn opacity_scales_alpha() {
        let mut s = stroke(&[(5.0, 5.0)], 6.0);
        s.opacity = 0.5;
        let img = rasterize_stroke(&s, 10, 10);
        assert_eq!(img.get_pixel(5, 5)[3], 128);
    }

    #[test]
    fn thinning_drops_close_points() {
        let mut s = BrushStroke::new([0, 0, 0, 255], 20.0, 1.0, false);
        assert!(s.push_point(0.0, 0.0));
        assert!(!s.push_point(1.0, 1.0));
        assert!(s.push_point(5.0, 0.0));
        assert_eq!(s.points.len(), 2);
    }

    #[test]
    fn normalize_produces_local_points_inside_box() {
        let (t, local) = normalize_stroke(&[(50.0, 40.0), (70.0, 60.0)], 10.0).unwrap();
        assert_eq!((t.x, t.y), (44.0, 34.0));
        assert_eq!(local[0], (6.0, 6.0));
        for (x, y) in local {
            assert!(x >= 0.0 && y >= 0.0 && x <= t.width && y <= t.height);
        }
        assert!(normalize_stroke(&[], 4.0).is_none());
    }
}
