// ============================================================================
// TRANSFORM OPERATIONS: affine sampling, layer placement, canvas crop/resize
// ============================================================================

use image::{RgbaImage, imageops};
use rayon::prelude::*;

use crate::canvas::{Document, Transform};

/// 2D affine map `x' = a*x + c*y + e`, `y' = b*x + d*y + f`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    pub const IDENTITY: Affine = Affine { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self { a: sx, d: sy, ..Self::IDENTITY }
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self { e: tx, f: ty, ..Self::IDENTITY }
    }

    #[inline]
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    /// `self` applied after `first`.
    pub fn then_after(&self, first: &Affine) -> Affine {
        Affine {
            a: self.a * first.a + self.c * first.b,
            b: self.b * first.a + self.d * first.b,
            c: self.a * first.c + self.c * first.d,
            d: self.b * first.c + self.d * first.d,
            e: self.a * first.e + self.c * first.f + self.e,
            f: self.b * first.e + self.d * first.f + self.f,
        }
    }

    /// Returns `None` on a singular matrix.
    pub fn invert(&self) -> Option<Affine> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < 1e-8 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        let a = self.d * inv;
        let b = -self.b * inv;
        let c = -self.c * inv;
        let d = self.a * inv;
        Some(Affine {
            a,
            b,
            c,
            d,
            e: -(a * self.e + c * self.f),
            f: -(b * self.e + d * self.f),
        })
    }
}

// ---------------------------------------------------------------------------
//  Sampling a layer raster into document space
// ---------------------------------------------------------------------------

/// Draw `src` stretched into the transform box, producing a canvas-sized
/// raster. Sampling is bilinear on premultiplied colour; pixels outside the
/// source are transparent.
pub fn draw_transformed(src: &RgbaImage, transform: &Transform, canvas_w: u32, canvas_h: u32) -> RgbaImage {
    let mut dst = RgbaImage::new(canvas_w, canvas_h);
    if src.width() == 0 || src.height() == 0 {
        return dst;
    }
    let Some(doc_to_local) = transform.inverse() else {
        return dst;
    };
    let to_src = Affine::scale(
        src.width() as f32 / transform.width,
        src.height() as f32 / transform.height,
    );
    let m = to_src.then_after(&doc_to_local);

    let (min_x, min_y, max_x, max_y) = transform.bounds();
    let y_start = min_y.floor().max(0.0) as usize;
    let y_end = (max_y.ceil().max(0.0) as usize).min(canvas_h as usize);
    let x_start = min_x.floor().max(0.0) as usize;
    let x_end = (max_x.ceil().max(0.0) as usize).min(canvas_w as usize);
    if y_start >= y_end || x_start >= x_end {
        return dst;
    }

    let row_bytes = canvas_w as usize * 4;
    let dst_raw: &mut [u8] = dst.as_mut();

    dst_raw
        .par_chunks_mut(row_bytes)
        .enumerate()
        .skip(y_start)
        .take(y_end - y_start)
        .for_each(|(dy, row)| {
            let py = dy as f32 + 0.5;
            for dx in x_start..x_end {
                let (sx, sy) = m.apply(dx as f32 + 0.5, py);
                if let Some(px) = bilinear_sample_premul(src, sx - 0.5, sy - 0.5) {
                    row[dx * 4..dx * 4 + 4].copy_from_slice(&px);
                }
            }
        });
    dst
}

/// Bilinear interpolation weighted by alpha so transparent neighbours do not
/// bleed dark fringes. Returns `None` when the sample lies fully outside.
fn bilinear_sample_premul(img: &RgbaImage, x: f32, y: f32) -> Option<[u8; 4]> {
    let w = img.width() as i32;
    let h = img.height() as i32;
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    if x0 < -1 || y0 < -1 || x0 >= w || y0 >= h {
        return None;
    }
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let raw = img.as_raw();
    let stride = w as usize * 4;
    let sample = |sx: i32, sy: i32| -> [f32; 4] {
        if sx < 0 || sy < 0 || sx >= w || sy >= h {
            [0.0; 4]
        } else {
            let idx = sy as usize * stride + sx as usize * 4;
            let a = raw[idx + 3] as f32;
            [raw[idx] as f32 * a, raw[idx + 1] as f32 * a, raw[idx + 2] as f32 * a, a]
        }
    };

    let tl = sample(x0, y0);
    let tr = sample(x0 + 1, y0);
    let bl = sample(x0, y0 + 1);
    let br = sample(x0 + 1, y0 + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut acc = [0.0f32; 4];
    for c in 0..4 {
        let top = lerp(tl[c], tr[c], fx);
        let bot = lerp(bl[c], br[c], fx);
        acc[c] = lerp(top, bot, fy);
    }
    let alpha = acc[3];
    if alpha <= 0.0 {
        return None;
    }
    Some([
        (acc[0] / alpha).round().clamp(0.0, 255.0) as u8,
        (acc[1] / alpha).round().clamp(0.0, 255.0) as u8,
        (acc[2] / alpha).round().clamp(0.0, 255.0) as u8,
        alpha.round().clamp(0.0, 255.0) as u8,
    ])
}

/// Triangle-filtered resize, used to bring model outputs back to source size.
pub fn resize_to(img: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if img.width() == width && img.height() == height {
        return img.clone();
    }
    imageops::resize(img, width.max(1), height.max(1), imageops::FilterType::Triangle)
}

// ---------------------------------------------------------------------------
//  Single-layer transforms
// ---------------------------------------------------------------------------

/// Box for content of natural size `(w, h)`: scaled down (never up) to fit the
/// canvas and centred on it.
pub fn fit_into(canvas_w: u32, canvas_h: u32, natural_w: u32, natural_h: u32) -> Transform {
    let nw = natural_w.max(1) as f32;
    let nh = natural_h.max(1) as f32;
    let scale = (canvas_w as f32 / nw).min(canvas_h as f32 / nh).min(1.0);
    let w = (nw * scale).max(1.0);
    let h = (nh * scale).max(1.0);
    Transform::from_box((canvas_w as f32 - w) * 0.5, (canvas_h as f32 - h) * 0.5, w, h)
}

pub fn flipped_horizontal(t: Transform) -> Transform {
    Transform { scale_x: -t.scale_x, ..t }
}

pub fn flipped_vertical(t: Transform) -> Transform {
    Transform { scale_y: -t.scale_y, ..t }
}

/// Adds `degrees` and wraps the result into `(-180, 180]`.
pub fn rotated(t: Transform, degrees: f32) -> Transform {
    let mut r = (t.rotation + degrees) % 360.0;
    if r <= -180.0 {
        r += 360.0;
    } else if r > 180.0 {
        r -= 360.0;
    }
    Transform { rotation: r, ..t }
}

/// Multiplies both scales, keeping the centre fixed. Non-positive or
/// non-finite factors leave the transform unchanged.
pub fn scaled(t: Transform, factor: f32) -> Transform {
    if !(factor.is_finite() && factor > 0.0) {
        return t;
    }
    Transform { scale_x: t.scale_x * factor, scale_y: t.scale_y * factor, ..t }
}

// ---------------------------------------------------------------------------
//  Whole-document transforms (affect ALL layers)
// ---------------------------------------------------------------------------

fn shift_document(doc: &mut Document, dx: f32, dy: f32) {
    for layer in &mut doc.layers {
        layer.transform.x += dx;
        layer.transform.y += dy;
        if let Some(mask) = &layer.mask {
            layer.mask = Some(mask.translated(dx, dy));
        }
    }
}

/// Crop the canvas to `(x, y, w, h)`; layers keep their document position
/// relative to the new origin.
pub fn crop(doc: &mut Document, x: u32, y: u32, w: u32, h: u32) {
    shift_document(doc, -(x as f32), -(y as f32));
    doc.width = w.max(1);
    doc.height = h.max(1);
}

/// Resize the canvas, placing the old content at an anchor position.
/// `anchor` is (ax, ay) each in {0, 1, 2} mapping to start/center/end.
pub fn resize_canvas(doc: &mut Document, new_w: u32, new_h: u32, anchor: (u32, u32)) {
    let new_w = new_w.max(1);
    let new_h = new_h.max(1);
    let offset = |old: u32, new: u32, a: u32| -> f32 {
        match a {
            0 => 0.0,
            1 => ((new as i64 - old as i64) / 2) as f32,
            _ => (new as i64 - old as i64) as f32,
        }
    };
    let dx = offset(doc.width, new_w, anchor.0);
    let dy = offset(doc.height, new_h, anchor.1);
    shift_document(doc, dx, dy);
    doc.width = new_w;
    doc.height = new_h;
}
