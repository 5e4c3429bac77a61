//! Compositor behaviour observed through `render_document`.

use image::{Rgba, RgbaImage};
use lumina::ops::brush::BrushStroke;
use lumina::ops::text::TextContent;
use lumina::{BlendMode, Document, FilterSettings, Layer, MaskPolygon, RenderOptions, render_document};

fn solid(name: &str, w: u32, h: u32, c: [u8; 4]) -> Layer {
    Layer::image(name, RgbaImage::from_pixel(w, h, Rgba(c)))
}

fn render(doc: &Document) -> RgbaImage {
    render_document(doc, &RenderOptions::default())
}

fn over_base(mode: BlendMode, base: [u8; 4], top: [u8; 4]) -> [u8; 4] {
    let mut doc = Document::empty(2, 2);
    doc.layers.push(solid("base", 2, 2, base));
    let mut layer = solid("top", 2, 2, top);
    layer.blend_mode = mode;
    doc.layers.push(layer);
    render(&doc).get_pixel(1, 1).0
}

#[test]
fn blend_modes_with_neutral_colours() {
    let colour = [200, 100, 50, 255];
    assert_eq!(over_base(BlendMode::Multiply, colour, [255, 255, 255, 255]), colour);
    assert_eq!(over_base(BlendMode::Screen, colour, [0, 0, 0, 255]), colour);
    assert_eq!(over_base(BlendMode::Difference, colour, colour), [0, 0, 0, 255]);
    assert_eq!(over_base(BlendMode::Darken, colour, [255, 0, 255, 255]), [200, 0, 50, 255]);
    assert_eq!(over_base(BlendMode::Lighten, colour, [0, 255, 0, 255]), [200, 255, 50, 255]);
}

#[test]
fn erase_layer_punches_through() {
    let out = over_base(BlendMode::Erase, [10, 20, 30, 255], [0, 0, 0, 255]);
    assert_eq!(out[3], 0);
}

#[test]
fn group_blend_mode_applies_to_its_composite() {
    let mut doc = Document::new(4, 4);
    let mut group = Layer::group("Shade");
    group.blend_mode = BlendMode::Multiply;
    let mut grey = solid("grey", 4, 4, [128, 128, 128, 255]);
    grey.parent = Some(group.id);
    doc.layers.push(group);
    doc.layers.push(grey);

    assert_eq!(render(&doc).get_pixel(2, 2).0, [128, 128, 128, 255]);
}

#[test]
fn hidden_outer_group_hides_nested_content() {
    let mut doc = Document::new(4, 4);
    let mut outer = Layer::group("Outer");
    let mut inner = Layer::group("Inner");
    inner.parent = Some(outer.id);
    let mut red = solid("red", 4, 4, [255, 0, 0, 255]);
    red.parent = Some(inner.id);
    outer.visible = false;
    let (outer_id, inner_id) = (outer.id, inner.id);
    doc.layers.extend([outer, inner, red]);
    assert_eq!(render(&doc).get_pixel(0, 0).0, [255, 255, 255, 255]);

    doc.layer_mut(outer_id).unwrap().visible = true;
    doc.layer_mut(inner_id).unwrap().visible = false;
    assert_eq!(render(&doc).get_pixel(0, 0).0, [255, 255, 255, 255]);

    doc.layer_mut(inner_id).unwrap().visible = true;
    assert_eq!(render(&doc).get_pixel(0, 0).0, [255, 0, 0, 255]);
}

#[test]
fn scaled_layer_grows_about_its_centre() {
    let mut doc = Document::empty(8, 8);
    let mut red = solid("red", 4, 4, [255, 0, 0, 255]);
    red.transform.scale_x = 2.0;
    red.transform.scale_y = 2.0;
    doc.layers.push(red);

    let out = render(&doc);
    assert_eq!(out.get_pixel(3, 3).0, [255, 0, 0, 255]);
    assert_eq!(out.get_pixel(7, 7)[3], 0);
}

#[test]
fn inverted_mask_hides_the_inside() {
    let mut doc = Document::empty(10, 10);
    let mut layer = solid("blue", 10, 10, [0, 0, 255, 255]);
    let mut mask = MaskPolygon::new(vec![(0.0, 0.0), (5.0, 0.0), (5.0, 10.0), (0.0, 10.0)]);
    mask.inverted = true;
    layer.mask = Some(mask);
    doc.layers.push(layer);

    let out = render(&doc);
    assert_eq!(out.get_pixel(2, 5)[3], 0);
    assert_eq!(out.get_pixel(8, 5).0, [0, 0, 255, 255]);
}

#[test]
fn filters_change_only_their_layer() {
    let mut doc = Document::empty(4, 2);
    let mut left = Layer::image("left", RgbaImage::from_pixel(2, 2, Rgba([200, 40, 90, 255])));
    left.filters = FilterSettings { grayscale: 100.0, ..FilterSettings::default() };
    let mut right = Layer::image("right", RgbaImage::from_pixel(2, 2, Rgba([200, 40, 90, 255])));
    right.transform.x = 2.0;
    doc.layers.extend([left, right]);

    let out = render(&doc);
    let grey = out.get_pixel(0, 0).0;
    assert_eq!(grey[0], grey[1]);
    assert_eq!(grey[1], grey[2]);
    assert_eq!(out.get_pixel(3, 1).0, [200, 40, 90, 255]);
}

#[test]
fn zero_brightness_keeps_alpha() {
    let mut doc = Document::empty(2, 2);
    let mut layer = solid("half", 2, 2, [250, 250, 250, 128]);
    layer.filters.brightness = 0.0;
    doc.layers.push(layer);
    assert_eq!(render(&doc).get_pixel(0, 0).0, [0, 0, 0, 128]);
}

#[test]
fn blank_text_layer_draws_nothing() {
    let mut doc = Document::empty(16, 16);
    doc.layers.push(Layer::text(TextContent::with_text("   "), 0.0, 0.0));
    assert!(render(&doc).pixels().all(|p| p[3] == 0));
}

#[test]
fn background_fill_and_eraser_preview() {
    let doc = Document::empty(12, 12);
    let mut stroke = BrushStroke::new([0, 0, 0, 255], 4.0, 1.0, true);
    stroke.push_point(1.0, 6.0);
    stroke.push_point(11.0, 6.0);
    let opts = RenderOptions { background: Some(Rgba([0, 255, 0, 255])), preview_stroke: Some(stroke) };

    let out = render_document(&doc, &opts);
    assert_eq!(out.get_pixel(6, 0).0, [0, 255, 0, 255]);
    assert_eq!(out.get_pixel(6, 6)[3], 0);
}
