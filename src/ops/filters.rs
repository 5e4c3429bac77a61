// ============================================================================
// LAYER FILTERS: non-destructive colour, blur and procedural adjustments
// ============================================================================

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-layer filter bundle. Every field at its default is a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Percent, 0..=200.
    pub brightness: f32,
    /// Percent, 0..=200.
    pub contrast: f32,
    /// Percent, 0..=200.
    pub saturation: f32,
    /// Percent, 0..=100.
    pub grayscale: f32,
    /// Percent, 0..=100.
    pub sepia: f32,
    /// Degrees, -180..=180.
    pub hue_rotate: f32,
    /// Gaussian sigma in pixels, 0..=20.
    pub blur: f32,
    pub temperature: f32,
    pub tint: f32,
    pub exposure: f32,
    pub vignette: f32,
    pub grain: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            brightness: 100.0,
            contrast: 100.0,
            saturation: 100.0,
            grayscale: 0.0,
            sepia: 0.0,
            hue_rotate: 0.0,
            blur: 0.0,
            temperature: 0.0,
            tint: 0.0,
            exposure: 0.0,
            vignette: 0.0,
            grain: 0.0,
        }
    }
}

impl FilterSettings {
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Copy with every field pulled into its slider range. NaN falls back to
    /// the field's default.
    pub fn clamped(&self) -> Self {
        let d = Self::default();
        let c = |v: f32, lo: f32, hi: f32, def: f32| if v.is_nan() { def } else { v.clamp(lo, hi) };
        Self {
            brightness: c(self.brightness, 0.0, 200.0, d.brightness),
            contrast: c(self.contrast, 0.0, 200.0, d.contrast),
            saturation: c(self.saturation, 0.0, 200.0, d.saturation),
            grayscale: c(self.grayscale, 0.0, 100.0, d.grayscale),
            sepia: c(self.sepia, 0.0, 100.0, d.sepia),
            hue_rotate: c(self.hue_rotate, -180.0, 180.0, d.hue_rotate),
            blur: c(self.blur, 0.0, 20.0, d.blur),
            temperature: c(self.temperature, -100.0, 100.0, d.temperature),
            tint: c(self.tint, -100.0, 100.0, d.tint),
            exposure: c(self.exposure, -100.0, 100.0, d.exposure),
            vignette: c(self.vignette, 0.0, 100.0, d.vignette),
            grain: c(self.grain, 0.0, 100.0, d.grain),
        }
    }

    /// CSS `filter` equivalent of the colour part of the bundle. The
    /// procedural filters have no CSS counterpart and are omitted.
    pub fn css_filter_string(&self) -> String {
        let d = Self::default();
        let mut parts = Vec::new();
        if self.brightness != d.brightness {
            parts.push(format!("brightness({}%)", self.brightness));
        }
        if self.contrast != d.contrast {
            parts.push(format!("contrast({}%)", self.contrast));
        }
        if self.saturation != d.saturation {
            parts.push(format!("saturate({}%)", self.saturation));
        }
        if self.grayscale != d.grayscale {
            parts.push(format!("grayscale({}%)", self.grayscale));
        }
        if self.sepia != d.sepia {
            parts.push(format!("sepia({}%)", self.sepia));
        }
        if self.hue_rotate != d.hue_rotate {
            parts.push(format!("hue-rotate({}deg)", self.hue_rotate));
        }
        if self.blur != d.blur {
            parts.push(format!("blur({}px)", self.blur));
        }
        if parts.is_empty() { "none".to_string() } else { parts.join(" ") }
    }

    fn has_post_filters(&self) -> bool {
        self.temperature != 0.0 || self.tint != 0.0 || self.exposure != 0.0 || self.vignette != 0.0 || self.grain != 0.0
    }
}

/// Centre and radius the vignette falls off over, in raster coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VignetteBox {
    pub cx: f32,
    pub cy: f32,
    /// Distance at which the darkening reaches full strength.
    pub radius: f32,
}

impl VignetteBox {
    /// Box covering a `width × height` raster.
    pub fn covering(width: u32, height: u32) -> Self {
        let cx = width as f32 * 0.5;
        let cy = height as f32 * 0.5;
        Self { cx, cy, radius: (cx * cx + cy * cy).sqrt().max(1.0) }
    }
}

// ---------------------------------------------------------------------------
//  Colour matrices (Filter Effects Module Level 1)
// ---------------------------------------------------------------------------

/// Row-major 3×3 colour matrix plus per-channel offset.
#[derive(Clone, Copy, Debug)]
struct ColorMatrix {
    m: [[f32; 3]; 3],
    offset: f32,
}

impl ColorMatrix {
    fn apply(&self, c: [f32; 3]) -> [f32; 3] {
        let mut out = [0.0; 3];
        for (i, row) in self.m.iter().enumerate() {
            out[i] = (row[0] * c[0] + row[1] * c[1] + row[2] * c[2] + self.offset).clamp(0.0, 1.0);
        }
        out
    }

    fn diagonal(k: f32, offset: f32) -> Self {
        Self { m: [[k, 0.0, 0.0], [0.0, k, 0.0], [0.0, 0.0, k]], offset }
    }

    fn brightness(amount: f32) -> Self {
        Self::diagonal(amount, 0.0)
    }

    fn contrast(amount: f32) -> Self {
        Self::diagonal(amount, 0.5 - 0.5 * amount)
    }

    fn saturate(s: f32) -> Self {
        Self {
            m: [
                [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
                [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
                [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
            ],
            offset: 0.0,
        }
    }

    fn grayscale(amount: f32) -> Self {
        let s = 1.0 - amount.clamp(0.0, 1.0);
        Self {
            m: [
                [0.2126 + 0.7874 * s, 0.7152 - 0.7152 * s, 0.0722 - 0.0722 * s],
                [0.2126 - 0.2126 * s, 0.7152 + 0.2848 * s, 0.0722 - 0.0722 * s],
                [0.2126 - 0.2126 * s, 0.7152 - 0.7152 * s, 0.0722 + 0.9278 * s],
            ],
            offset: 0.0,
        }
    }

    fn sepia(amount: f32) -> Self {
        let s = 1.0 - amount.clamp(0.0, 1.0);
        Self {
            m: [
                [0.393 + 0.607 * s, 0.769 - 0.769 * s, 0.189 - 0.189 * s],
                [0.349 - 0.349 * s, 0.686 + 0.314 * s, 0.168 - 0.168 * s],
                [0.272 - 0.272 * s, 0.534 - 0.534 * s, 0.131 + 0.869 * s],
            ],
            offset: 0.0,
        }
    }

    fn hue_rotate(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self {
            m: [
                [
                    0.213 + cos * 0.787 - sin * 0.213,
                    0.715 - cos * 0.715 - sin * 0.715,
                    0.072 - cos * 0.072 + sin * 0.928,
                ],
                [
                    0.213 - cos * 0.213 + sin * 0.143,
                    0.715 + cos * 0.285 + sin * 0.140,
                    0.072 - cos * 0.072 - sin * 0.283,
                ],
                [
                    0.213 - cos * 0.213 - sin * 0.787,
                    0.715 - cos * 0.715 + sin * 0.715,
                    0.072 + cos * 0.928 + sin * 0.072,
                ],
            ],
            offset: 0.0,
        }
    }
}

/// The non-identity colour matrices of `s`, in CSS application order.
fn color_chain(s: &FilterSettings) -> Vec<ColorMatrix> {
    let d = FilterSettings::default();
    let mut chain = Vec::new();
    if s.brightness != d.brightness {
        chain.push(ColorMatrix::brightness(s.brightness / 100.0));
    }
    if s.contrast != d.contrast {
        chain.push(ColorMatrix::contrast(s.contrast / 100.0));
    }
    if s.saturation != d.saturation {
        chain.push(ColorMatrix::saturate(s.saturation / 100.0));
    }
    if s.grayscale != d.grayscale {
        chain.push(ColorMatrix::grayscale(s.grayscale / 100.0));
    }
    if s.sepia != d.sepia {
        chain.push(ColorMatrix::sepia(s.sepia / 100.0));
    }
    if s.hue_rotate != d.hue_rotate {
        chain.push(ColorMatrix::hue_rotate(s.hue_rotate));
    }
    chain
}

// ---------------------------------------------------------------------------
//  Pipeline
// ---------------------------------------------------------------------------

/// Applies the whole bundle to `image`.
///
/// Colour matrices run first, then the blur, then temperature/tint, exposure,
/// vignette and grain. `vignette` positions the vignette (defaults to the
/// whole raster) and `seed` makes grain reproducible.
pub fn apply_filters(image: &RgbaImage, settings: &FilterSettings, vignette: Option<VignetteBox>, seed: u32) -> RgbaImage {
    let s = settings.clamped();
    if s.is_identity() || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let chain = color_chain(&s);
    let mut out = if chain.is_empty() {
        image.clone()
    } else {
        apply_per_pixel(image, |_, _, c| chain.iter().fold(c, |acc, m| m.apply(acc)))
    };

    if s.blur > 0.0 {
        out = parallel_gaussian_blur(&out, s.blur);
    }

    if s.has_post_filters() {
        let vb = vignette.unwrap_or_else(|| VignetteBox::covering(image.width(), image.height()));
        out = apply_per_pixel(&out, |x, y, c| post_filter_pixel(&s, &vb, seed, x, y, c));
    }
    out
}

fn post_filter_pixel(s: &FilterSettings, vb: &VignetteBox, seed: u32, x: u32, y: u32, c: [f32; 3]) -> [f32; 3] {
    let [mut r, mut g, mut b] = c;

    if s.temperature != 0.0 || s.tint != 0.0 {
        let temp = s.temperature / 100.0 * 0.4;
        let tint = s.tint / 100.0 * 0.4;
        r += temp + tint * 0.5;
        g -= tint;
        b += -temp + tint * 0.5;
    }

    if s.exposure != 0.0 {
        let gain = 2f32.powf(s.exposure / 50.0);
        r *= gain;
        g *= gain;
        b *= gain;
    }

    if s.vignette > 0.0 {
        let amount = s.vignette / 100.0;
        let dx = x as f32 + 0.5 - vb.cx;
        let dy = y as f32 + 0.5 - vb.cy;
        let dist = ((dx * dx + dy * dy).sqrt() / vb.radius).min(1.0);
        let vf = (1.0 - amount * dist * dist).clamp(0.0, 1.0);
        r *= vf;
        g *= vf;
        b *= vf;
    }

    if s.grain > 0.0 {
        let n = (hash_f32(x, y, seed) * 2.0 - 1.0) * (s.grain / 100.0) * 0.25;
        r += n;
        g += n;
        b += n;
    }

    [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)]
}

/// Parallel per-pixel RGB transform on normalized colour. Alpha is kept and
/// fully transparent pixels are copied through untouched.
fn apply_per_pixel<F>(flat: &RgbaImage, transform: F) -> RgbaImage
where
    F: Fn(u32, u32, [f32; 3]) -> [f32; 3] + Sync,
{
    let w = flat.width() as usize;
    let mut out = flat.clone();
    let stride = w * 4;
    let dst_raw: &mut [u8] = out.as_mut();

    dst_raw.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            let pi = x * 4;
            if row[pi + 3] == 0 {
                continue;
            }
            let c = [row[pi] as f32 / 255.0, row[pi + 1] as f32 / 255.0, row[pi + 2] as f32 / 255.0];
            let [r, g, b] = transform(x as u32, y as u32, c);
            row[pi] = (r * 255.0).round().clamp(0.0, 255.0) as u8;
            row[pi + 1] = (g * 255.0).round().clamp(0.0, 255.0) as u8;
            row[pi + 2] = (b * 255.0).round().clamp(0.0, 255.0) as u8;
        }
    });
    out
}

#[inline]
fn hash_u32(mut x: u32) -> u32 {
    x = x.wrapping_mul(0x9E3779B9);
    x ^= x >> 16;
    x = x.wrapping_mul(0x85EBCA6B);
    x ^= x >> 13;
    x = x.wrapping_mul(0xC2B2AE35);
    x ^= x >> 16;
    x
}

/// Hash to f32 in [0, 1).
#[inline]
fn hash_f32(x: u32, y: u32, seed: u32) -> f32 {
    let h = hash_u32(x.wrapping_mul(374761393).wrapping_add(y.wrapping_mul(668265263)).wrapping_add(seed));
    (h & 0x00FF_FFFF) as f32 / 16_777_216.0
}

// ---------------------------------------------------------------------------
//  Parallel separable Gaussian blur (rayon), premultiplied
// ---------------------------------------------------------------------------

/// Build a 1-D Gaussian kernel truncated at ceil(3*sigma).
fn build_gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as usize;
    if radius == 0 {
        return vec![1.0];
    }
    let len = radius * 2 + 1;
    let s2 = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..len)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / s2).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Blurs premultiplied colour so transparent surroundings fade the alpha
/// instead of darkening the edge. Outside the raster counts as transparent.
pub fn parallel_gaussian_blur(src: &RgbaImage, sigma: f32) -> RgbaImage {
    let w = src.width() as usize;
    let h = src.height() as usize;
    if w == 0 || h == 0 || sigma <= 0.0 {
        return src.clone();
    }

    let kernel = build_gaussian_kernel(sigma);
    let radius = kernel.len() / 2;

    let buf_in: Vec<f32> = src
        .as_raw()
        .chunks_exact(4)
        .flat_map(|p| {
            let a = p[3] as f32 / 255.0;
            [p[0] as f32 * a, p[1] as f32 * a, p[2] as f32 * a, p[3] as f32]
        })
        .collect();

    // --- Horizontal pass (parallel by row) ---
    let mut buf_h = vec![0.0f32; w * h * 4];
    buf_h.par_chunks_mut(w * 4).enumerate().for_each(|(y, row_out)| {
        let row_in = &buf_in[y * w * 4..(y + 1) * w * 4];
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for (ki, &kv) in kernel.iter().enumerate() {
                let sx = x as isize + ki as isize - radius as isize;
                if sx < 0 || sx >= w as isize {
                    continue;
                }
                let idx = sx as usize * 4;
                for c in 0..4 {
                    acc[c] += row_in[idx + c] * kv;
                }
            }
            row_out[x * 4..x * 4 + 4].copy_from_slice(&acc);
        }
    });

    // --- Vertical pass (parallel by row) ---
    let mut out = RgbaImage::new(w as u32, h as u32);
    let dst_raw: &mut [u8] = out.as_mut();
    dst_raw.par_chunks_mut(w * 4).enumerate().for_each(|(y, row_out)| {
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = y as isize + ki as isize - radius as isize;
                if sy < 0 || sy >= h as isize {
                    continue;
                }
                let idx = sy as usize * w * 4 + x * 4;
                for c in 0..4 {
                    acc[c] += buf_h[idx + c] * kv;
                }
            }
            let a = acc[3];
            let pi = x * 4;
            if a <= 0.0 {
                row_out[pi..pi + 4].copy_from_slice(&[0, 0, 0, 0]);
                continue;
            }
            let unpremul = 255.0 / a;
            row_out[pi] = (acc[0] * unpremul).round().clamp(0.0, 255.0) as u8;
            row_out[pi + 1] = (acc[1] * unpremul).round().clamp(0.0, 255.0) as u8;
            row_out[pi + 2] = (acc[2] * unpremul).round().clamp(0.0, 255.0) as u8;
            row_out[pi + 3] = a.round().clamp(0.0, 255.0) as u8;
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(c: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(8, 8, Rgba(c))
    }

    #[test]
    fn defaults_are_identity() {
        let img = solid([12, 200, 99, 255]);
        let s = FilterSettings::default();
        assert!(s.is_identity());
        assert_eq!(apply_filters(&img, &s, None, 0), img);
        assert_eq!(s.css_filter_string(), "none");
    }

    #[test]
    fn brightness_scales_channels() {
        let img = solid([100, 50, 200, 255]);
        let s = FilterSettings { brightness: 50.0, ..Default::default() };
        let out = apply_filters(&img, &s, None, 0);
        assert_eq!(out.get_pixel(0, 0), &Rgba([50, 25, 100, 255]));
    }

    #[test]
    fn zero_contrast_is_mid_grey() {
        let img = solid([10, 240, 77, 255]);
        let s = FilterSettings { contrast: 0.0, ..Default::default() };
        let out = apply_filters(&img, &s, None, 0);
        assert_eq!(out.get_pixel(3, 3), &Rgba([128, 128, 128, 255]));
    }

    #[test]
    fn full_grayscale_equalizes_channels() {
        let img = solid([200, 30, 90, 255]);
        let s = FilterSettings { grayscale: 100.0, ..Default::default() };
        let p = *apply_filters(&img, &s, None, 0).get_pixel(0, 0);
        assert!((p[0] as i32 - p[1] as i32).abs() <= 1);
        assert!((p[1] as i32 - p[2] as i32).abs() <= 1);
    }

    #[test]
    fn full_hue_turn_returns_original() {
        let colour = [180.0 / 255.0, 60.0 / 255.0, 20.0 / 255.0];
        let turned = ColorMatrix::hue_rotate(360.0).apply(colour);
        for (got, want) in turned.iter().zip(colour) {
            assert!((got - want).abs() < 1e-3, "{turned:?} vs {colour:?}");
        }

        let img = solid([180, 60, 20, 255]);
        let half = apply_filters(&img, &FilterSettings { hue_rotate: 180.0, ..Default::default() }, None, 0);
        assert_ne!(half.get_pixel(0, 0), img.get_pixel(0, 0));
    }

    #[test]
    fn transparent_pixels_are_untouched() {
        let mut img = solid([100, 100, 100, 255]);
        img.put_pixel(2, 2, Rgba([7, 8, 9, 0]));
        let s = FilterSettings { brightness: 150.0, sepia: 40.0, grain: 80.0, ..Default::default() };
        let out = apply_filters(&img, &s, None, 3);
        assert_eq!(out.get_pixel(2, 2), &Rgba([7, 8, 9, 0]));
    }

    #[test]
    fn exposure_doubles_at_fifty() {
        let img = solid([50, 60, 70, 255]);
        let s = FilterSettings { exposure: 50.0, ..Default::default() };
        let out = apply_filters(&img, &s, None, 0);
        assert_eq!(out.get_pixel(0, 0), &Rgba([100, 120, 140, 255]));
    }

    #[test]
    fn warm_temperature_shifts_red_over_blue() {
        let img = solid([128, 128, 128, 255]);
        let s = FilterSettings { temperature: 100.0, ..Default::default() };
        let p = *apply_filters(&img, &s, None, 0).get_pixel(0, 0);
        assert!(p[0] > 128 && p[2] < 128);
    }

    #[test]
    fn vignette_darkens_corners_more_than_centre() {
        let img = RgbaImage::from_pixel(64, 64, Rgba([200, 200, 200, 255]));
        let s = FilterSettings { vignette: 100.0, ..Default::default() };
        let out = apply_filters(&img, &s, None, 0);
        assert!(out.get_pixel(0, 0)[0] < out.get_pixel(32, 32)[0]);
        assert!(out.get_pixel(32, 32)[0] >= 195);
    }

    #[test]
    fn grain_is_deterministic_per_seed() {
        let img = solid([128, 128, 128, 255]);
        let s = FilterSettings { grain: 60.0, ..Default::default() };
        assert_eq!(apply_filters(&img, &s, None, 9), apply_filters(&img, &s, None, 9));
        assert_ne!(apply_filters(&img, &s, None, 9), apply_filters(&img, &s, None, 10));
    }

    #[test]
    fn blur_spreads_into_transparency_without_darkening() {
        let mut img = RgbaImage::new(9, 9);
        img.put_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let s = FilterSettings { blur: 1.5, ..Default::default() };
        let out = apply_filters(&img, &s, None, 0);
        let centre = out.get_pixel(4, 4);
        let side = out.get_pixel(5, 4);
        assert!(centre[3] < 255 && side[3] > 0);
        assert_eq!(side[0], 255);
    }

    #[test]
    fn clamped_pulls_values_into_range() {
        let s = FilterSettings { brightness: 900.0, blur: -3.0, hue_rotate: f32::NAN, ..Default::default() }.clamped();
        assert_eq!(s.brightness, 200.0);
        assert_eq!(s.blur, 0.0);
        assert_eq!(s.hue_rotate, 0.0);
    }

    #[test]
    fn css_string_lists_changed_filters_in_order() {
        let s = FilterSettings { contrast: 120.0, blur: 2.0, brightness: 80.0, ..Default::default() };
        assert_eq!(s.css_filter_string(), "brightness(80%) contrast(120%) blur(2px)");
    }

    #[test]
    fn settings_deserialize_with_missing_fields() {
        let s: FilterSettings = serde_json::from_str(r#"{"sepia": 30}"#).unwrap();
        assert_eq!(s.sepia, 30.0);
        assert_eq!(s.brightness, 100.0);
    }
}
