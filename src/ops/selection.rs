// ============================================================================
// SELECTION SYSTEM: shapes, boolean modes, polygon rasterization
// ============================================================================

use image::{GrayImage, Luma};
use rayon::prelude::*;

/// Segments used when an ellipse is converted to a polygon.
pub const ELLIPSE_SEGMENTS: usize = 64;

/// Vertical sub-scanlines per pixel row when filling polygons.
const SUBSAMPLES: usize = 4;

/// How a new selection shape interacts with the existing mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Clear any existing selection, then set the new shape.
    #[default]
    Replace,
    /// Union – add to the existing mask.
    Add,
    /// Difference – subtract from the existing mask.
    Subtract,
    /// Keep only pixels present in both the existing mask AND the new shape.
    Intersect,
}

impl SelectionMode {
    pub fn label(&self) -> &'static str {
        match self {
            SelectionMode::Replace => "Replace",
            SelectionMode::Add => "Add",
            SelectionMode::Subtract => "Subtract",
            SelectionMode::Intersect => "Intersect",
        }
    }

    pub fn all() -> &'static [SelectionMode] {
        &[SelectionMode::Replace, SelectionMode::Add, SelectionMode::Subtract, SelectionMode::Intersect]
    }
}

/// Shape in document coordinates.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionShape {
    Rectangle { min_x: f32, min_y: f32, max_x: f32, max_y: f32 },
    Ellipse { cx: f32, cy: f32, rx: f32, ry: f32 },
    Lasso(Vec<(f32, f32)>),
}

impl SelectionShape {
    /// Rectangle spanning two drag corners in any order.
    pub fn rect_from_corners(a: (f32, f32), b: (f32, f32)) -> Self {
        SelectionShape::Rectangle {
            min_x: a.0.min(b.0),
            min_y: a.1.min(b.1),
            max_x: a.0.max(b.0),
            max_y: a.1.max(b.1),
        }
    }

    /// Ellipse inscribed in the rectangle spanned by two drag corners.
    pub fn ellipse_from_corners(a: (f32, f32), b: (f32, f32)) -> Self {
        SelectionShape::Ellipse {
            cx: (a.0 + b.0) * 0.5,
            cy: (a.1 + b.1) * 0.5,
            rx: (a.0 - b.0).abs() * 0.5,
            ry: (a.1 - b.1).abs() * 0.5,
        }
    }

    /// A shape that cannot cover any area.
    pub fn is_degenerate(&self) -> bool {
        match self {
            SelectionShape::Rectangle { min_x, min_y, max_x, max_y } => max_x - min_x < 1.0 || max_y - min_y < 1.0,
            SelectionShape::Ellipse { rx, ry, .. } => *rx < 0.5 || *ry < 0.5,
            SelectionShape::Lasso(points) => points.len() < 3,
        }
    }

    pub fn to_polygon(&self) -> Vec<(f32, f32)> {
        match self {
            SelectionShape::Rectangle { min_x, min_y, max_x, max_y } => {
                vec![(*min_x, *min_y), (*max_x, *min_y), (*max_x, *max_y), (*min_x, *max_y)]
            }
            SelectionShape::Ellipse { cx, cy, rx, ry } => (0..ELLIPSE_SEGMENTS)
                .map(|i| {
                    let t = i as f32 / ELLIPSE_SEGMENTS as f32 * std::f32::consts::TAU;
                    (cx + rx * t.cos(), cy + ry * t.sin())
                })
                .collect(),
            SelectionShape::Lasso(points) => points.clone(),
        }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        match self {
            SelectionShape::Rectangle { min_x, min_y, max_x, max_y } => {
                x >= *min_x && x <= *max_x && y >= *min_y && y <= *max_y
            }
            SelectionShape::Ellipse { cx, cy, rx, ry } => {
                if *rx <= 0.0 || *ry <= 0.0 {
                    return false;
                }
                let dx = (x - cx) / rx;
                let dy = (y - cy) / ry;
                dx * dx + dy * dy <= 1.0
            }
            SelectionShape::Lasso(points) => point_in_polygon(points, x, y),
        }
    }
}

/// Even-odd point test.
pub fn point_in_polygon(points: &[(f32, f32)], x: f32, y: f32) -> bool {
    if points.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (xi, yi) = points[i];
        let (xj, yj) = points[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Rasterizes a closed polygon into a coverage mask (255 = fully inside).
///
/// Even-odd fill, `SUBSAMPLES` sub-scanlines per row, with exact horizontal
/// span coverage. `inverted` flips the result. Fewer than three points give
/// an empty (or, inverted, a full) mask.
pub fn fill_polygon_mask(points: &[(f32, f32)], width: u32, height: u32, inverted: bool) -> GrayImage {
    let (w, h) = (width.max(1), height.max(1));
    if points.len() < 3 {
        return GrayImage::from_pixel(w, h, Luma([if inverted { 255 } else { 0 }]));
    }

    let edges: Vec<[f32; 4]> = (0..points.len())
        .map(|i| {
            let a = points[i];
            let b = points[(i + 1) % points.len()];
            [a.0, a.1, b.0, b.1]
        })
        .filter(|e| e[1] != e[3])
        .collect();

    let mut mask = GrayImage::new(w, h);
    let row_len = w as usize;
    let raw: &mut [u8] = mask.as_mut();

    raw.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        let mut acc = vec![0.0f32; row_len];
        let mut xs: Vec<f32> = Vec::with_capacity(8);
        for sub in 0..SUBSAMPLES {
            let sy = y as f32 + (sub as f32 + 0.5) / SUBSAMPLES as f32;
            xs.clear();
            for e in &edges {
                let (y0, y1) = (e[1], e[3]);
                if (sy >= y0.min(y1)) && (sy < y0.max(y1)) {
                    let t = (sy - y0) / (y1 - y0);
                    xs.push(e[0] + t * (e[2] - e[0]));
                }
            }
            xs.sort_by(|a, b| a.total_cmp(b));
            for span in xs.chunks_exact(2) {
                add_span(&mut acc, span[0], span[1], 1.0 / SUBSAMPLES as f32);
            }
        }
        for (px, cov) in row.iter_mut().zip(acc) {
            let v = (cov.clamp(0.0, 1.0) * 255.0).round() as u8;
            *px = if inverted { 255 - v } else { v };
        }
    });
    mask
}

/// Adds `weight × overlap` for each pixel column covered by `[x0, x1)`.
fn add_span(acc: &mut [f32], x0: f32, x1: f32, weight: f32) {
    let len = acc.len() as f32;
    let x0 = x0.clamp(0.0, len);
    let x1 = x1.clamp(0.0, len);
    if x1 <= x0 {
        return;
    }
    let first = x0.floor() as usize;
    let last = (x1.ceil() as usize).min(acc.len());
    for (i, cell) in acc.iter_mut().enumerate().take(last).skip(first) {
        let lo = (i as f32).max(x0);
        let hi = (i as f32 + 1.0).min(x1);
        if hi > lo {
            *cell += (hi - lo) * weight;
        }
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// Ordered list of shapes combined with boolean modes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selection {
    parts: Vec<(SelectionShape, SelectionMode)>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parts(&self) -> &[(SelectionShape, SelectionMode)] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn clear(&mut self) {
        self.parts.clear();
    }

    /// Adds a shape. Lassos with fewer than three points are ignored. Replace
    /// discards earlier shapes; combining with an empty selection behaves like
    /// Add (or nothing, for Subtract/Intersect).
    pub fn apply(&mut self, shape: SelectionShape, mode: SelectionMode) {
        if let SelectionShape::Lasso(points) = &shape
            && points.len() < 3
        {
            return;
        }
        match mode {
            SelectionMode::Replace => {
                self.parts.clear();
                self.parts.push((shape, SelectionMode::Replace));
            }
            SelectionMode::Add if self.parts.is_empty() => self.parts.push((shape, SelectionMode::Replace)),
            SelectionMode::Subtract | SelectionMode::Intersect if self.parts.is_empty() => {}
            _ => self.parts.push((shape, mode)),
        }
    }

    /// Coverage mask of the combined selection.
    pub fn mask(&self, width: u32, height: u32) -> GrayImage {
        let mut out = GrayImage::new(width.max(1), height.max(1));
        for (shape, mode) in &self.parts {
            let m = fill_polygon_mask(&shape.to_polygon(), width, height, false);
            let dst: &mut [u8] = out.as_mut();
            for (d, &s) in dst.iter_mut().zip(m.as_raw().iter()) {
                *d = match mode {
                    SelectionMode::Replace => s,
                    SelectionMode::Add => (*d).max(s),
                    SelectionMode::Subtract => ((*d as u16 * (255 - s) as u16 + 127) / 255) as u8,
                    SelectionMode::Intersect => (*d).min(s),
                };
            }
        }
        out
    }

    /// Pixel bounds `(x, y, w, h)` of the non-zero mask, or `None` when the
    /// selection covers nothing on this canvas.
    pub fn bounds(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if self.is_empty() {
            return None;
        }
        let mask = self.mask(width, height);
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for (x, y, p) in mask.enumerate_pixels() {
            if p[0] > 0 {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
        if min_x > max_x {
            return None;
        }
        Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }

    /// Outline of a single-shape selection. Combined selections have no single
    /// polygon and return `None`.
    pub fn to_polygon(&self) -> Option<Vec<(f32, f32)>> {
        match self.parts.as_slice() {
            [(shape, _)] => Some(shape.to_polygon()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_mask_is_exact_on_pixel_edges() {
        let mask = fill_polygon_mask(&[(2.0, 2.0), (6.0, 2.0), (6.0, 5.0), (2.0, 5.0)], 8, 8, false);
        assert_eq!(mask.get_pixel(2, 2)[0], 255);
        assert_eq!(mask.get_pixel(5, 4)[0], 255);
        assert_eq!(mask.get_pixel(6, 4)[0], 0);
        assert_eq!(mask.get_pixel(3, 5)[0], 0);
    }

    #[test]
    fn half_covered_pixels_get_partial_coverage() {
        let mask = fill_polygon_mask(&[(0.0, 0.0), (2.5, 0.0), (2.5, 4.0), (0.0, 4.0)], 4, 4, false);
        let v = mask.get_pixel(2, 1)[0];
        assert!((126..=129).contains(&v), "got {v}");
    }

    #[test]
    fn inverted_mask_flips_coverage() {
        let pts = [(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)];
        let mask = fill_polygon_mask(&pts, 8, 8, true);
        assert_eq!(mask.get_pixel(1, 1)[0], 0);
        assert_eq!(mask.get_pixel(6, 6)[0], 255);
        let empty = fill_polygon_mask(&pts[..2], 4, 4, false);
        assert!(empty.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn self_intersecting_lasso_uses_even_odd() {
        // Bow-tie: the left and right lobes are inside, the top wedge is not.
        let bow = [(0.0, 0.0), (10.0, 10.0), (10.0, 0.0), (0.0, 10.0)];
        let mask = fill_polygon_mask(&bow, 10, 10, false);
        assert!(mask.get_pixel(1, 5)[0] > 200);
        assert!(mask.get_pixel(5, 1)[0] < 50);
    }

    #[test]
    fn modes_combine_masks() {
        let mut sel = Selection::new();
        sel.apply(SelectionShape::rect_from_corners((0.0, 0.0), (6.0, 6.0)), SelectionMode::Replace);
        sel.apply(SelectionShape::rect_from_corners((4.0, 4.0), (10.0, 10.0)), SelectionMode::Add);
        let m = sel.mask(10, 10);
        assert_eq!(m.get_pixel(1, 1)[0], 255);
        assert_eq!(m.get_pixel(8, 8)[0], 255);
        assert_eq!(m.get_pixel(8, 1)[0], 0);

        sel.apply(SelectionShape::rect_from_corners((0.0, 0.0), (2.0, 2.0)), SelectionMode::Subtract);
        assert_eq!(sel.mask(10, 10).get_pixel(1, 1)[0], 0);

        sel.apply(SelectionShape::rect_from_corners((5.0, 5.0), (10.0, 10.0)), SelectionMode::Intersect);
        let m = sel.mask(10, 10);
        assert_eq!(m.get_pixel(3, 3)[0], 0);
        assert_eq!(m.get_pixel(7, 7)[0], 255);
        assert_eq!(sel.bounds(10, 10), Some((5, 5, 5, 5)));
    }

    #[test]
    fn replace_discards_previous_shapes() {
        let mut sel = Selection::new();
        sel.apply(SelectionShape::rect_from_corners((0.0, 0.0), (2.0, 2.0)), SelectionMode::Replace);
        sel.apply(SelectionShape::rect_from_corners((5.0, 5.0), (8.0, 8.0)), SelectionMode::Replace);
        assert_eq!(sel.parts().len(), 1);
        assert_eq!(sel.bounds(10, 10), Some((5, 5, 3, 3)));
    }

    #[test]
    fn short_lasso_is_ignored() {
        let mut sel = Selection::new();
        sel.apply(SelectionShape::Lasso(vec![(0.0, 0.0), (3.0, 3.0)]), SelectionMode::Replace);
        assert!(sel.is_empty());
    }

    #[test]
    fn polygon_only_for_single_shape() {
        let mut sel = Selection::new();
        assert!(sel.to_polygon().is_none());
        sel.apply(SelectionShape::Ellipse { cx: 5.0, cy: 5.0, rx: 3.0, ry: 2.0 }, SelectionMode::Replace);
        assert_eq!(sel.to_polygon().map(|p| p.len()), Some(ELLIPSE_SEGMENTS));
        sel.apply(SelectionShape::rect_from_corners((0.0, 0.0), (1.0, 1.0)), SelectionMode::Add);
        assert!(sel.to_polygon().is_none());
    }

    #[test]
    fn subtract_on_empty_selection_does_nothing() {
        let mut sel = Selection::new();
        sel.apply(SelectionShape::rect_from_corners((0.0, 0.0), (4.0, 4.0)), SelectionMode::Subtract);
        assert!(sel.is_empty());
        assert_eq!(sel.bounds(8, 8), None);
    }

    #[test]
    fn ellipse_contains_centre_not_corner() {
        let e = SelectionShape::ellipse_from_corners((0.0, 0.0), (10.0, 6.0));
        assert!(e.contains(5.0, 3.0));
        assert!(!e.contains(0.5, 0.5));
        assert!(point_in_polygon(&e.to_polygon(), 5.0, 3.0));
    }
}
