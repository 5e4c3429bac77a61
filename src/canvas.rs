use std::sync::Arc;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ops::brush::BrushStroke;
use crate::ops::filters::FilterSettings;
use crate::ops::text::{self, TextContent};
use crate::ops::transform::Affine;

pub type LayerId = Uuid;

/// Smallest edge a layer box may shrink to.
pub const MIN_BOX_EDGE: f32 = 1.0;

// ============================================================================
// TRANSFORM
// ============================================================================

/// Placement of a layer's content box on the canvas.
///
/// `(x, y)` is the top-left corner of the unscaled box. Rotation (degrees,
/// clockwise in screen space) and scale both pivot on the box centre; a
/// negative scale mirrors the content along that axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

impl Transform {
    pub fn from_box(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(MIN_BOX_EDGE),
            height: height.max(MIN_BOX_EDGE),
            ..Self::default()
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    /// Maps box-local coordinates (`0..width`, `0..height`) to document space.
    pub fn to_matrix(&self) -> Affine {
        let (cx, cy) = self.center();
        let (sin, cos) = self.rotation.to_radians().sin_cos();
        let a = cos * self.scale_x;
        let b = sin * self.scale_x;
        let c = -sin * self.scale_y;
        let d = cos * self.scale_y;
        let hw = self.width * 0.5;
        let hh = self.height * 0.5;
        Affine {
            a,
            b,
            c,
            d,
            e: cx - (a * hw + c * hh),
            f: cy - (b * hw + d * hh),
        }
    }

    /// Document space → box-local. `None` when a scale is zero.
    pub fn inverse(&self) -> Option<Affine> {
        self.to_matrix().invert()
    }

    /// Corners of the transformed box in document space (TL, TR, BR, BL).
    pub fn corners(&self) -> [(f32, f32); 4] {
        let m = self.to_matrix();
        [
            m.apply(0.0, 0.0),
            m.apply(self.width, 0.0),
            m.apply(self.width, self.height),
            m.apply(0.0, self.height),
        ]
    }

    /// Axis-aligned bounds `(min_x, min_y, max_x, max_y)` of the transformed box.
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        let corners = self.corners();
        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        (min_x, min_y, max_x, max_y)
    }

    pub fn contains(&self, px: f32, py: f32) -> bool {
        let Some(inv) = self.inverse() else {
            return false;
        };
        let (u, v) = inv.apply(px, py);
        u >= 0.0 && v >= 0.0 && u <= self.width && v <= self.height
    }

    /// Re-establishes the width/height floor after an edit.
    pub fn sanitized(mut self) -> Self {
        self.width = self.width.max(MIN_BOX_EDGE);
        self.height = self.height.max(MIN_BOX_EDGE);
        if !self.rotation.is_finite() {
            self.rotation = 0.0;
        }
        self
    }
}

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
    Additive,
    Subtract,
    Divide,
    LinearBurn,
    LinearLight,
    /// Destination-out. Only the top alpha matters.
    Erase,
}

impl BlendMode {
    /// Returns all blend modes for UI display
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
            BlendMode::Hue,
            BlendMode::Saturation,
            BlendMode::Color,
            BlendMode::Luminosity,
            BlendMode::Additive,
            BlendMode::Subtract,
            BlendMode::Divide,
            BlendMode::LinearBurn,
            BlendMode::LinearLight,
            BlendMode::Erase,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
            BlendMode::Hue => "Hue",
            BlendMode::Saturation => "Saturation",
            BlendMode::Color => "Color",
            BlendMode::Luminosity => "Luminosity",
            BlendMode::Additive => "Additive",
            BlendMode::Subtract => "Subtract",
            BlendMode::Divide => "Divide",
            BlendMode::LinearBurn => "Linear Burn",
            BlendMode::LinearLight => "Linear Light",
            BlendMode::Erase => "Erase",
        }
    }

    /// Parses a display name or a CSS `mix-blend-mode` keyword.
    pub fn from_name(name: &str) -> Option<BlendMode> {
        let key: String = name
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();
        let mode = match key.as_str() {
            "normal" | "sourceover" => BlendMode::Normal,
            "multiply" => BlendMode::Multiply,
            "screen" => BlendMode::Screen,
            "overlay" => BlendMode::Overlay,
            "darken" => BlendMode::Darken,
            "lighten" => BlendMode::Lighten,
            "colordodge" => BlendMode::ColorDodge,
            "colorburn" => BlendMode::ColorBurn,
            "hardlight" => BlendMode::HardLight,
            "softlight" => BlendMode::SoftLight,
            "difference" => BlendMode::Difference,
            "exclusion" => BlendMode::Exclusion,
            "hue" => BlendMode::Hue,
            "saturation" => BlendMode::Saturation,
            "color" => BlendMode::Color,
            "luminosity" => BlendMode::Luminosity,
            "additive" | "add" | "lighter" | "pluslighter" => BlendMode::Additive,
            "subtract" => BlendMode::Subtract,
            "divide" => BlendMode::Divide,
            "linearburn" => BlendMode::LinearBurn,
            "linearlight" => BlendMode::LinearLight,
            "erase" | "destinationout" => BlendMode::Erase,
            _ => return None,
        };
        Some(mode)
    }
}

/// Composites `top` over `base` with the given mode and extra opacity.
///
/// Colours are straight (non-premultiplied). The blend function result is
/// mixed with the source by the backdrop alpha, then source-over applies.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    // Fast path: fully transparent top pixel, nothing to blend
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }

    let opacity = opacity.clamp(0.0, 1.0);
    let top_a = (top[3] as f32 / 255.0) * opacity;

    if mode == BlendMode::Erase {
        let a = (base[3] as f32) * (1.0 - top_a);
        return Rgba([base[0], base[1], base[2], a.round().clamp(0.0, 255.0) as u8]);
    }

    // Fast path: Normal blend, full opacity, fully opaque top pixel
    if mode == BlendMode::Normal && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let base_c = [base[0] as f32 / 255.0, base[1] as f32 / 255.0, base[2] as f32 / 255.0];
    let base_a = base[3] as f32 / 255.0;
    let top_c = [top[0] as f32 / 255.0, top[1] as f32 / 255.0, top[2] as f32 / 255.0];

    let blended = blend_color(base_c, top_c, mode);

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for i in 0..3 {
        let src = (1.0 - base_a) * top_c[i] + base_a * blended[i];
        let c = (src * top_a + base_c[i] * base_a * (1.0 - top_a)) / out_a;
        out[i] = (c * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

fn blend_color(b: [f32; 3], s: [f32; 3], mode: BlendMode) -> [f32; 3] {
    let per_channel = |f: fn(f32, f32) -> f32| [f(b[0], s[0]), f(b[1], s[1]), f(b[2], s[2])];
    match mode {
        BlendMode::Normal | BlendMode::Erase => s,
        BlendMode::Multiply => per_channel(|b, s| b * s),
        BlendMode::Screen => per_channel(|b, s| 1.0 - (1.0 - b) * (1.0 - s)),
        BlendMode::Overlay => per_channel(|b, s| hard_light_channel(s, b)),
        BlendMode::Darken => per_channel(f32::min),
        BlendMode::Lighten => per_channel(f32::max),
        BlendMode::ColorDodge => per_channel(color_dodge_channel),
        BlendMode::ColorBurn => per_channel(color_burn_channel),
        BlendMode::HardLight => per_channel(hard_light_channel),
        BlendMode::SoftLight => per_channel(soft_light_channel),
        BlendMode::Difference => per_channel(|b, s| (b - s).abs()),
        BlendMode::Exclusion => per_channel(|b, s| b + s - 2.0 * b * s),
        BlendMode::Additive => per_channel(|b, s| (b + s).min(1.0)),
        BlendMode::Subtract => per_channel(|b, s| (b - s).max(0.0)),
        BlendMode::Divide => per_channel(|b, s| if s <= 0.0 { 1.0 } else { (b / s).min(1.0) }),
        BlendMode::LinearBurn => per_channel(|b, s| (b + s - 1.0).max(0.0)),
        BlendMode::LinearLight => per_channel(|b, s| (b + 2.0 * s - 1.0).clamp(0.0, 1.0)),
        BlendMode::Hue => set_lum(set_sat(s, sat(b)), lum(b)),
        BlendMode::Saturation => set_lum(set_sat(b, sat(s)), lum(b)),
        BlendMode::Color => set_lum(s, lum(b)),
        BlendMode::Luminosity => set_lum(b, lum(s)),
    }
}

// Separable helpers. `b` is the backdrop, `s` the source.

fn hard_light_channel(b: f32, s: f32) -> f32 {
    if s <= 0.5 {
        2.0 * b * s
    } else {
        1.0 - 2.0 * (1.0 - b) * (1.0 - s)
    }
}

fn color_burn_channel(b: f32, s: f32) -> f32 {
    if b >= 1.0 {
        1.0
    } else if s <= 0.0 {
        0.0
    } else {
        (1.0 - (1.0 - b) / s).max(0.0)
    }
}

fn color_dodge_channel(b: f32, s: f32) -> f32 {
    if b <= 0.0 {
        0.0
    } else if s >= 1.0 {
        1.0
    } else {
        (b / (1.0 - s)).min(1.0)
    }
}

/// W3C Soft Light formula.
fn soft_light_channel(b: f32, s: f32) -> f32 {
    if s <= 0.5 {
        b - (1.0 - 2.0 * s) * b * (1.0 - b)
    } else {
        let d = if b <= 0.25 {
            ((16.0 * b - 12.0) * b + 4.0) * b
        } else {
            b.sqrt()
        };
        b + (2.0 * s - 1.0) * (d - b)
    }
}

// Non-separable helpers (W3C compositing, section 10.2).

fn lum(c: [f32; 3]) -> f32 {
    0.3 * c[0] + 0.59 * c[1] + 0.11 * c[2]
}

fn sat(c: [f32; 3]) -> f32 {
    c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2])
}

fn clip_color(c: [f32; 3]) -> [f32; 3] {
    let l = lum(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);
    let mut out = c;
    if n < 0.0 {
        for v in &mut out {
            *v = l + (*v - l) * l / (l - n);
        }
    }
    if x > 1.0 {
        for v in &mut out {
            *v = l + (*v - l) * (1.0 - l) / (x - l);
        }
    }
    out
}

fn set_lum(c: [f32; 3], l: f32) -> [f32; 3] {
    let d = l - lum(c);
    clip_color([c[0] + d, c[1] + d, c[2] + d])
}

fn set_sat(c: [f32; 3], s: f32) -> [f32; 3] {
    let max = c[0].max(c[1]).max(c[2]);
    let min = c[0].min(c[1]).min(c[2]);
    if max - min <= f32::EPSILON {
        return [0.0; 3];
    }
    let mut out = [0.0; 3];
    for i in 0..3 {
        out[i] = if c[i] == max {
            s
        } else if c[i] == min {
            0.0
        } else {
            (c[i] - min) * s / (max - min)
        };
    }
    out
}

// ============================================================================
// LAYERS
// ============================================================================

/// Clip polygon in document space. Pixels outside are hidden unless
/// `inverted`, in which case pixels inside are hidden.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MaskPolygon {
    pub points: Vec<(f32, f32)>,
    pub inverted: bool,
}

impl MaskPolygon {
    pub fn new(points: Vec<(f32, f32)>) -> Self {
        Self { points, inverted: false }
    }

    /// Fewer than three points cannot enclose anything; such masks are ignored.
    pub fn is_effective(&self) -> bool {
        self.points.len() >= 3
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            points: self.points.iter().map(|&(x, y)| (x + dx, y + dy)).collect(),
            inverted: self.inverted,
        }
    }
}

#[derive(Clone, Debug)]
pub enum LayerKind {
    Image { pixels: Arc<RgbaImage> },
    Text(TextContent),
    Stroke(BrushStroke),
    Group,
}

impl LayerKind {
    pub fn label(&self) -> &'static str {
        match self {
            LayerKind::Image { .. } => "Image",
            LayerKind::Text(_) => "Text",
            LayerKind::Stroke(_) => "Stroke",
            LayerKind::Group => "Group",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub transform: Transform,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub visible: bool,
    pub filters: FilterSettings,
    pub parent: Option<LayerId>,
    pub mask: Option<MaskPolygon>,
}

impl Layer {
    fn with_kind(name: impl Into<String>, kind: LayerKind, transform: Transform) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            transform: transform.sanitized(),
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            visible: true,
            filters: FilterSettings::default(),
            parent: None,
            mask: None,
        }
    }

    /// Image layer placed at the origin at its natural size.
    pub fn image(name: impl Into<String>, pixels: RgbaImage) -> Self {
        let transform = Transform::from_box(0.0, 0.0, pixels.width() as f32, pixels.height() as f32);
        Self::with_kind(name, LayerKind::Image { pixels: Arc::new(pixels) }, transform)
    }

    /// Text layer whose box matches the measured text, top-left at `(x, y)`.
    pub fn text(content: TextContent, x: f32, y: f32) -> Self {
        let (w, h) = text::measure_text(&content);
        let name = text::layer_name_for(&content.text);
        Self::with_kind(name, LayerKind::Text(content), Transform::from_box(x, y, w, h))
    }

    pub fn stroke(name: impl Into<String>, stroke: BrushStroke, transform: Transform) -> Self {
        let erase = stroke.erase;
        let mut layer = Self::with_kind(name, LayerKind::Stroke(stroke), transform);
        if erase {
            layer.blend_mode = BlendMode::Erase;
        }
        layer
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::with_kind(name, LayerKind::Group, Transform::default())
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, LayerKind::Group)
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_finite() { opacity.clamp(0.0, 1.0) } else { 1.0 };
    }
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// Canvas size plus the layer array, bottom first.
#[derive(Clone, Debug)]
pub struct Document {
    pub width: u32,
    pub height: u32,
    pub layers: Vec<Layer>,
}

impl Document {
    pub fn empty(width: u32, height: u32) -> Self {
        Self { width: width.max(1), height: height.max(1), layers: Vec::new() }
    }

    /// New canvas with an opaque white background layer.
    pub fn new(width: u32, height: u32) -> Self {
        let mut doc = Self::empty(width, height);
        let background = RgbaImage::from_pixel(doc.width, doc.height, Rgba([255, 255, 255, 255]));
        doc.layers.push(Layer::image("Background", background));
        doc
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    /// Direct children of a group, bottom first.
    pub fn children_of(&self, id: LayerId) -> impl Iterator<Item = &Layer> + '_ {
        self.layers.iter().filter(move |l| l.parent == Some(id))
    }

    pub fn top_level(&self) -> impl Iterator<Item = &Layer> + '_ {
        self.layers.iter().filter(|l| l.parent.is_none())
    }

    /// Every layer nested under `id` at any depth, in array order.
    pub fn descendants_of(&self, id: LayerId) -> Vec<LayerId> {
        self.layers
            .iter()
            .filter(|l| l.id != id && self.is_ancestor(id, l.id))
            .map(|l| l.id)
            .collect()
    }

    /// True when `ancestor` appears on the parent chain of `id`.
    pub fn is_ancestor(&self, ancestor: LayerId, id: LayerId) -> bool {
        let mut current = self.layer(id).and_then(|l| l.parent);
        // Chain length is bounded by the layer count; anything longer is a cycle.
        for _ in 0..=self.layers.len() {
            match current {
                Some(p) if p == ancestor => return true,
                Some(p) => current = self.layer(p).and_then(|l| l.parent),
                None => return false,
            }
        }
        false
    }

    /// Nesting depth: 0 for top-level layers.
    pub fn depth_of(&self, id: LayerId) -> usize {
        let mut depth = 0;
        let mut current = self.layer(id).and_then(|l| l.parent);
        while let Some(p) = current {
            depth += 1;
            if depth > self.layers.len() {
                break;
            }
            current = self.layer(p).and_then(|l| l.parent);
        }
        depth
    }

    /// Visible itself and through every enclosing group.
    pub fn is_effectively_visible(&self, id: LayerId) -> bool {
        let Some(layer) = self.layer(id) else {
            return false;
        };
        if !layer.visible {
            return false;
        }
        match layer.parent {
            Some(p) if self.depth_of(id) <= self.layers.len() => self.is_effectively_visible(p),
            _ => true,
        }
    }

    /// Checks the parent-link invariants. Returns a description of the first
    /// violation found.
    pub fn check_hierarchy(&self) -> Result<(), String> {
        for layer in &self.layers {
            let Some(parent) = layer.parent else {
                continue;
            };
            match self.layer(parent) {
                None => return Err(format!("layer '{}' references a missing parent", layer.name)),
                Some(p) if !p.is_group() => {
                    return Err(format!("layer '{}' is parented to non-group '{}'", layer.name, p.name));
                }
                Some(_) => {}
            }
            if self.is_ancestor(layer.id, layer.id) {
                return Err(format!("layer '{}' is part of a parent cycle", layer.name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn solid(w: u32, h: u32, c: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(c))
    }

    #[test]
    fn identity_transform_maps_box_onto_itself() {
        let t = Transform::from_box(10.0, 20.0, 100.0, 50.0);
        let m = t.to_matrix();
        let (x, y) = m.apply(0.0, 0.0);
        assert_abs_diff_eq!(x, 10.0, epsilon = 1e-4);
        assert_abs_diff_eq!(y, 20.0, epsilon = 1e-4);
        let (x, y) = m.apply(100.0, 50.0);
        assert_abs_diff_eq!(x, 110.0, epsilon = 1e-4);
        assert_abs_diff_eq!(y, 70.0, epsilon = 1e-4);
    }

    #[test]
    fn rotation_pivots_on_center() {
        let mut t = Transform::from_box(0.0, 0.0, 100.0, 50.0);
        t.rotation = 90.0;
        let (min_x, min_y, max_x, max_y) = t.bounds();
        assert_abs_diff_eq!(min_x, 25.0, epsilon = 1e-3);
        assert_abs_diff_eq!(max_x, 75.0, epsilon = 1e-3);
        assert_abs_diff_eq!(min_y, -25.0, epsilon = 1e-3);
        assert_abs_diff_eq!(max_y, 75.0, epsilon = 1e-3);
        assert!(t.contains(50.0, 25.0));
        assert!(!t.contains(5.0, 25.0));
    }

    #[test]
    fn negative_scale_mirrors_in_place() {
        let mut t = Transform::from_box(0.0, 0.0, 10.0, 10.0);
        t.scale_x = -1.0;
        let (x, _) = t.to_matrix().apply(0.0, 5.0);
        assert_abs_diff_eq!(x, 10.0, epsilon = 1e-4);
        let inv = t.inverse().unwrap();
        let (u, _) = inv.apply(10.0, 5.0);
        assert_abs_diff_eq!(u, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn zero_scale_has_no_inverse() {
        let mut t = Transform::from_box(0.0, 0.0, 10.0, 10.0);
        t.scale_y = 0.0;
        assert!(t.inverse().is_none());
        assert!(!t.contains(5.0, 5.0));
    }

    #[test]
    fn box_edges_never_drop_below_one() {
        let t = Transform::from_box(0.0, 0.0, 0.0, -4.0);
        assert_eq!(t.width, 1.0);
        assert_eq!(t.height, 1.0);
    }

    #[test]
    fn normal_blend_over_transparent_keeps_source() {
        let out = blend_pixel(Rgba([0, 0, 0, 0]), Rgba([200, 100, 50, 128]), BlendMode::Normal, 1.0);
        assert_eq!(out, Rgba([200, 100, 50, 128]));
    }

    #[test]
    fn multiply_darkens_opaque_backdrop() {
        let out = blend_pixel(Rgba([255, 128, 0, 255]), Rgba([128, 128, 128, 255]), BlendMode::Multiply, 1.0);
        assert_eq!(out, Rgba([128, 64, 0, 255]));
    }

    #[test]
    fn half_opacity_mixes_evenly() {
        let out = blend_pixel(Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 255]), BlendMode::Normal, 0.5);
        assert!((out[0] as i32 - 128).abs() <= 1);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn erase_removes_backdrop_alpha() {
        let out = blend_pixel(Rgba([10, 20, 30, 255]), Rgba([0, 0, 0, 255]), BlendMode::Erase, 1.0);
        assert_eq!(out[3], 0);
        let half = blend_pixel(Rgba([10, 20, 30, 255]), Rgba([0, 0, 0, 255]), BlendMode::Erase, 0.5);
        assert!((half[3] as i32 - 128).abs() <= 1);
        assert_eq!(&half.0[..3], &[10, 20, 30]);
    }

    #[test]
    fn luminosity_takes_source_lightness() {
        let grey = Rgba([128, 128, 128, 255]);
        let red = Rgba([255, 0, 0, 255]);
        let out = blend_pixel(red, grey, BlendMode::Luminosity, 1.0);
        // Red hue survives, lightness moves toward the grey source.
        assert!(out[0] > out[1]);
        let l = 0.3 * out[0] as f32 + 0.59 * out[1] as f32 + 0.11 * out[2] as f32;
        assert!((l - 128.0).abs() < 3.0);
    }

    #[test]
    fn blend_names_round_trip_through_css_keywords() {
        for mode in BlendMode::all() {
            assert_eq!(BlendMode::from_name(mode.name()), Some(*mode));
        }
        assert_eq!(BlendMode::from_name("color-dodge"), Some(BlendMode::ColorDodge));
        assert_eq!(BlendMode::from_name("SOFT_LIGHT"), Some(BlendMode::SoftLight));
        assert_eq!(BlendMode::from_name("destination-out"), Some(BlendMode::Erase));
        assert_eq!(BlendMode::from_name("sparkle"), None);
    }

    #[test]
    fn hierarchy_queries_follow_parent_links() {
        let mut doc = Document::new(10, 10);
        let outer = Layer::group("Outer");
        let mut inner = Layer::group("Inner");
        inner.parent = Some(outer.id);
        let mut leaf = Layer::image("Leaf", solid(2, 2, [1, 2, 3, 255]));
        leaf.parent = Some(inner.id);
        let (outer_id, inner_id, leaf_id) = (outer.id, inner.id, leaf.id);
        doc.layers.extend([leaf, inner, outer]);

        assert!(doc.is_ancestor(outer_id, leaf_id));
        assert!(!doc.is_ancestor(leaf_id, outer_id));
        assert_eq!(doc.descendants_of(outer_id), vec![leaf_id, inner_id]);
        assert_eq!(doc.children_of(inner_id).count(), 1);
        assert_eq!(doc.top_level().count(), 2);
        assert_eq!(doc.depth_of(leaf_id), 2);
        assert!(doc.check_hierarchy().is_ok());

        doc.layer_mut(outer_id).unwrap().visible = false;
        assert!(!doc.is_effectively_visible(leaf_id));
    }

    #[test]
    fn hierarchy_check_rejects_non_group_parent_and_cycles() {
        let mut doc = Document::empty(4, 4);
        let a = Layer::image("A", solid(1, 1, [0, 0, 0, 255]));
        let mut b = Layer::image("B", solid(1, 1, [0, 0, 0, 255]));
        b.parent = Some(a.id);
        doc.layers.extend([a, b]);
        assert!(doc.check_hierarchy().is_err());

        let mut doc = Document::empty(4, 4);
        let mut g1 = Layer::group("G1");
        let mut g2 = Layer::group("G2");
        g1.parent = Some(g2.id);
        g2.parent = Some(g1.id);
        doc.layers.extend([g1, g2]);
        assert!(doc.check_hierarchy().is_err());
    }

    #[test]
    fn opacity_is_clamped() {
        let mut layer = Layer::group("G");
        layer.set_opacity(3.0);
        assert_eq!(layer.opacity, 1.0);
        layer.set_opacity(-1.0);
        assert_eq!(layer.opacity, 0.0);
        layer.set_opacity(f32::NAN);
        assert_eq!(layer.opacity, 1.0);
    }
}
