// ============================================================================
// COMPOSITOR: rasterize, filter, mask and blend the layer tree
// ============================================================================

use std::borrow::Cow;

use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;

use crate::canvas::{BlendMode, Document, Layer, LayerKind, MaskPolygon, blend_pixel};
use crate::ops::brush::{self, BrushStroke};
use crate::ops::filters::{self, VignetteBox};
use crate::ops::selection::fill_polygon_mask;
use crate::ops::text;
use crate::ops::transform::draw_transformed;

#[derive(Clone, Debug, Default)]
pub struct RenderOptions {
    /// Fill behind all layers. `None` leaves the canvas transparent.
    pub background: Option<Rgba<u8>>,
    /// In-progress stroke in document coordinates, drawn above everything.
    pub preview_stroke: Option<BrushStroke>,
}

/// Composites every visible top-level layer (groups recurse) into a
/// document-sized raster.
pub fn render_document(doc: &Document, opts: &RenderOptions) -> RgbaImage {
    let mut acc = match opts.background {
        Some(color) => RgbaImage::from_pixel(doc.width, doc.height, color),
        None => RgbaImage::new(doc.width, doc.height),
    };
    for layer in doc.top_level() {
        composite_layer(doc, layer, &mut acc);
    }
    if let Some(stroke) = &opts.preview_stroke {
        let raster = brush::rasterize_stroke(stroke, doc.width, doc.height);
        let mode = if stroke.erase { BlendMode::Erase } else { BlendMode::Normal };
        blend_into(&mut acc, &raster, mode, 1.0);
    }
    acc
}

/// Longest edge of the result is at most `max_edge`.
pub fn render_thumbnail(doc: &Document, max_edge: u32) -> RgbaImage {
    let full = render_document(doc, &RenderOptions::default());
    let max_edge = max_edge.max(1);
    if doc.width <= max_edge && doc.height <= max_edge {
        return full;
    }
    let scale = max_edge as f32 / doc.width.max(doc.height) as f32;
    let w = ((doc.width as f32 * scale).round() as u32).max(1);
    let h = ((doc.height as f32 * scale).round() as u32).max(1);
    imageops::thumbnail(&full, w, h)
}

fn is_rendered(layer: &Layer) -> bool {
    layer.visible && layer.opacity > 0.0
}

fn composite_layer(doc: &Document, layer: &Layer, acc: &mut RgbaImage) {
    if !is_rendered(layer) {
        return;
    }
    if let Some(raster) = render_layer(doc, layer) {
        blend_into(acc, &raster, layer.blend_mode, layer.opacity);
    }
}

/// Document-sized raster of one layer after transform, filters and mask, but
/// before its own opacity and blend mode. Groups composite their children in
/// isolation. `None` for hidden layers and empty groups.
pub fn render_layer(doc: &Document, layer: &Layer) -> Option<RgbaImage> {
    if !is_rendered(layer) {
        return None;
    }
    let (w, h) = (doc.width, doc.height);

    let mut raster = match &layer.kind {
        LayerKind::Group => {
            let mut children = doc.children_of(layer.id).filter(|c| is_rendered(c)).peekable();
            children.peek()?;
            let mut buf = RgbaImage::new(w, h);
            for child in children {
                // A corrupted tree could link a group under its own descendant.
                if child.id == layer.id || doc.is_ancestor(child.id, layer.id) {
                    continue;
                }
                composite_layer(doc, child, &mut buf);
            }
            buf
        }
        _ => {
            let local = content_raster(layer)?;
            draw_transformed(&local, &layer.transform, w, h)
        }
    };

    if !layer.filters.is_identity() {
        let vignette = match layer.kind {
            LayerKind::Group => VignetteBox::covering(w, h),
            _ => {
                let (cx, cy) = layer.transform.center();
                let hw = layer.transform.width * layer.transform.scale_x.abs() * 0.5;
                let hh = layer.transform.height * layer.transform.scale_y.abs() * 0.5;
                VignetteBox { cx, cy, radius: (hw * hw + hh * hh).sqrt().max(1.0) }
            }
        };
        let seed = layer.id.as_u128() as u32;
        raster = filters::apply_filters(&raster, &layer.filters, Some(vignette), seed);
    }

    if let Some(mask) = &layer.mask
        && mask.is_effective()
    {
        apply_mask(&mut raster, mask);
    }
    Some(raster)
}

/// Layer content in its own space, before placement.
fn content_raster(layer: &Layer) -> Option<Cow<'_, RgbaImage>> {
    let box_w = layer.transform.width.ceil().max(1.0) as u32;
    let box_h = layer.transform.height.ceil().max(1.0) as u32;
    match &layer.kind {
        LayerKind::Image { pixels } => Some(Cow::Borrowed(pixels.as_ref())),
        LayerKind::Text(content) => {
            if content.text.trim().is_empty() {
                return None;
            }
            Some(Cow::Owned(text::rasterize_text(content, box_w, box_h)))
        }
        LayerKind::Stroke(stroke) => {
            let (ew, eh) = stroke.extent;
            let (rw, rh) = if ew >= 1.0 && eh >= 1.0 { (ew.ceil() as u32, eh.ceil() as u32) } else { (box_w, box_h) };
            Some(Cow::Owned(brush::rasterize_stroke(stroke, rw, rh)))
        }
        LayerKind::Group => None,
    }
}

/// Multiplies alpha by the polygon coverage.
fn apply_mask(raster: &mut RgbaImage, mask: &MaskPolygon) {
    let coverage = fill_polygon_mask(&mask.points, raster.width(), raster.height(), mask.inverted);
    let cov = coverage.as_raw();
    let dst: &mut [u8] = raster.as_mut();
    dst.par_chunks_mut(4).zip(cov.par_iter()).for_each(|(px, &m)| {
        px[3] = ((px[3] as u16 * m as u16 + 127) / 255) as u8;
    });
}

/// Blends `top` over `acc` pixel by pixel, rows in parallel.
pub fn blend_into(acc: &mut RgbaImage, top: &RgbaImage, mode: BlendMode, opacity: f32) {
    let w = acc.width().min(top.width()) as usize;
    let acc_stride = acc.width() as usize * 4;
    let top_stride = top.width() as usize * 4;
    let rows = acc.height().min(top.height()) as usize;
    let top_raw = top.as_raw();
    let acc_raw: &mut [u8] = acc.as_mut();

    acc_raw.par_chunks_mut(acc_stride).take(rows).enumerate().for_each(|(y, row)| {
        let top_row = &top_raw[y * top_stride..y * top_stride + w * 4];
        for x in 0..w {
            let i = x * 4;
            if top_row[i + 3] == 0 {
                continue;
            }
            let base = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
            let t = Rgba([top_row[i], top_row[i + 1], top_row[i + 2], top_row[i + 3]]);
            row[i..i + 4].copy_from_slice(&blend_pixel(base, t, mode, opacity).0);
        }
    });
}
