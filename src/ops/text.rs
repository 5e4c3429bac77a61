use ab_glyph::{Font, FontArc, GlyphId, ScaleFont, point};
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Horizontal shear applied to faux-italic glyphs, per pixel above baseline.
const ITALIC_SHEAR: f32 = 0.2;

/// Text alignment options.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextAlignment {
    #[default]
    Left,
    Center,
    Right,
}

impl TextAlignment {
    pub fn label(&self) -> &'static str {
        match self {
            TextAlignment::Left => "Left",
            TextAlignment::Center => "Center",
            TextAlignment::Right => "Right",
        }
    }

    pub fn all() -> &'static [TextAlignment] {
        &[TextAlignment::Left, TextAlignment::Center, TextAlignment::Right]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextContent {
    pub text: String,
    pub font_family: String,
    /// Pixel size of one em.
    pub font_size: f32,
    pub color: [u8; 4],
    pub bold: bool,
    pub italic: bool,
    pub align: TextAlignment,
}

impl Default for TextContent {
    fn default() -> Self {
        Self {
            text: "Text".to_string(),
            font_family: "Sans".to_string(),
            font_size: 48.0,
            color: [0, 0, 0, 255],
            bold: false,
            italic: false,
            align: TextAlignment::Left,
        }
    }
}

impl TextContent {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }
}

/// Layer name derived from the first line of text.
pub fn layer_name_for(text: &str) -> String {
    let first = text.lines().next().unwrap_or("").trim();
    if first.is_empty() {
        return "Text".to_string();
    }
    let mut name: String = first.chars().take(24).collect();
    if first.chars().count() > 24 {
        name.push('…');
    }
    name
}

// ============================================================================
// FONT RESOLUTION
// ============================================================================

type FontKey = (String, bool, bool);

fn font_cache() -> &'static Mutex<HashMap<FontKey, Option<FontArc>>> {
    static CACHE: OnceLock<Mutex<HashMap<FontKey, Option<FontArc>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Load a font by family name, weight, and style from the system.
/// `weight` is a CSS-style weight value (100=Thin, 400=Regular, 700=Bold, etc.)
/// Generic names (`Sans`, `Serif`, `Monospace`) map to the platform default.
/// Returns None if the font cannot be found.
pub fn load_system_font(family: &str, weight: u16, italic: bool) -> Option<FontArc> {
    use font_kit::family_name::FamilyName;
    use font_kit::properties::{Properties, Style, Weight};
    use font_kit::source::SystemSource;

    let mut props = Properties::new();
    props.weight = Weight(weight as f32);
    if italic {
        props.style = Style::Italic;
    }

    let requested = match family.trim().to_ascii_lowercase().as_str() {
        "sans" | "sans-serif" | "" => FamilyName::SansSerif,
        "serif" => FamilyName::Serif,
        "mono" | "monospace" => FamilyName::Monospace,
        _ => FamilyName::Title(family.to_string()),
    };

    let source = SystemSource::new();
    let handle = source
        .select_best_match(&[requested, FamilyName::SansSerif], &props)
        .ok()?;

    let font_data = handle.load().ok()?;
    let bytes: Vec<u8> = (*font_data.copy_font_data()?).clone();
    FontArc::try_from_vec(bytes).ok()
}

/// Cached lookup per (family, bold, italic). Failed lookups are cached too so
/// a missing font warns once.
fn resolve_font(content: &TextContent) -> Option<FontArc> {
    let key = (content.font_family.to_ascii_lowercase(), content.bold, content.italic);
    if let Ok(cache) = font_cache().lock()
        && let Some(found) = cache.get(&key)
    {
        return found.clone();
    }

    let weight = if content.bold { 700 } else { 400 };
    let font = load_system_font(&content.font_family, weight, content.italic);
    if font.is_none() {
        tracing::warn!(family = %content.font_family, "font not found; text will not render");
    }
    if let Ok(mut cache) = font_cache().lock() {
        cache.insert(key, font.clone());
    }
    font
}

// ============================================================================
// LAYOUT
// ============================================================================

struct LineLayout {
    glyphs: Vec<(GlyphId, f32)>,
    width: f32,
}

fn layout_line(font: &FontArc, line: &str, font_size: f32) -> LineLayout {
    let scaled = font.as_scaled(font_size);
    let mut glyphs = Vec::new();
    let mut cursor_x = 0.0f32;
    let mut last_glyph: Option<GlyphId> = None;

    for ch in line.chars() {
        let glyph_id = font.glyph_id(ch);
        if let Some(prev) = last_glyph {
            cursor_x += scaled.kern(prev, glyph_id);
        }
        glyphs.push((glyph_id, cursor_x));
        cursor_x += scaled.h_advance(glyph_id);
        last_glyph = Some(glyph_id);
    }
    LineLayout { glyphs, width: cursor_x }
}

/// Extra width reserved for the faux styles so sheared or thickened glyphs
/// stay inside the box.
fn style_padding(content: &TextContent) -> f32 {
    let mut pad = 2.0;
    if content.italic {
        pad += content.font_size * ITALIC_SHEAR;
    }
    if content.bold {
        pad += 1.0;
    }
    pad
}

/// Natural `(width, height)` of the text box.
///
/// Without a usable font the size is estimated at 0.6 em per character and
/// 1.2 em per line.
pub fn measure_text(content: &TextContent) -> (f32, f32) {
    let size = content.font_size.max(1.0);
    let lines: Vec<&str> = content.text.split('\n').collect();
    let (width, height) = match resolve_font(content) {
        Some(font) => {
            let line_height = font.as_scaled(size).height();
            let width = lines.iter().map(|l| layout_line(&font, l, size).width).fold(0.0, f32::max);
            (width, line_height * lines.len() as f32)
        }
        None => {
            let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
            (longest as f32 * size * 0.6, lines.len() as f32 * size * 1.2)
        }
    };
    ((width + style_padding(content)).ceil().max(1.0), height.ceil().max(1.0))
}

/// Rasterize `content` into a `box_w × box_h` raster, lines stacked from the
/// top and aligned within the box width.
pub fn rasterize_text(content: &TextContent, box_w: u32, box_h: u32) -> RgbaImage {
    let (w, h) = (box_w.max(1), box_h.max(1));
    let mut out = RgbaImage::new(w, h);
    let Some(font) = resolve_font(content) else {
        return out;
    };
    let size = content.font_size.max(1.0);
    let scaled = font.as_scaled(size);
    let ascent = scaled.ascent();
    let line_height = scaled.height();
    let shear_pad = if content.italic { size * ITALIC_SHEAR } else { 0.0 };

    let mut coverage = vec![0.0f32; w as usize * h as usize];
    for (line_idx, line) in content.text.split('\n').enumerate() {
        let layout = layout_line(&font, line, size);
        let free = w as f32 - layout.width - shear_pad - 2.0;
        let x_off = 1.0
            + match content.align {
                TextAlignment::Left => 0.0,
                TextAlignment::Center => (free * 0.5).max(0.0),
                TextAlignment::Right => free.max(0.0),
            };
        let baseline = line_idx as f32 * line_height + ascent;

        for &(glyph_id, gx) in &layout.glyphs {
            let glyph = glyph_id.with_scale_and_position(size, point(x_off + gx, baseline));
            let Some(outlined) = font.outline_glyph(glyph) else {
                continue;
            };
            let b = outlined.px_bounds();
            outlined.draw(|px, py, cov| {
                let cy = b.min.y + py as f32;
                let mut cx = b.min.x + px as f32;
                if content.italic {
                    cx += (baseline - cy) * ITALIC_SHEAR;
                }
                let ix = cx.round() as i64;
                let iy = cy.round() as i64;
                if ix < 0 || iy < 0 || ix >= w as i64 || iy >= h as i64 {
                    return;
                }
                let idx = iy as usize * w as usize + ix as usize;
                coverage[idx] = coverage[idx].max(cov);
                if content.bold && ix + 1 < w as i64 {
                    coverage[idx + 1] = coverage[idx + 1].max(cov);
                }
            });
        }
    }

    let [r, g, b, a] = content.color;
    for (px, &cov) in out.pixels_mut().zip(coverage.iter()) {
        if cov > 0.001 {
            px.0 = [r, g, b, (a as f32 * cov.min(1.0)).round() as u8];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_editor_defaults() {
        let t = TextContent::default();
        assert_eq!(t.font_family, "Sans");
        assert_eq!(t.font_size, 48.0);
        assert_eq!(t.color, [0, 0, 0, 255]);
        assert_eq!(t.align, TextAlignment::Left);
    }

    #[test]
    fn more_lines_measure_taller() {
        let one = measure_text(&TextContent::with_text("Hello"));
        let two = measure_text(&TextContent::with_text("Hello\nWorld"));
        assert!(two.1 > one.1);
        assert!(one.0 >= 1.0);
    }

    #[test]
    fn longer_text_measures_wider() {
        let short = measure_text(&TextContent::with_text("W"));
        let long = measure_text(&TextContent::with_text("WWWWWWWW"));
        assert!(long.0 > short.0);
    }

    #[test]
    fn raster_has_requested_size() {
        let img = rasterize_text(&TextContent::with_text("abc"), 120, 60);
        assert_eq!(img.dimensions(), (120, 60));
    }

    #[test]
    fn names_come_from_first_line() {
        assert_eq!(layer_name_for("Title\nbody"), "Title");
        assert_eq!(layer_name_for("   "), "Text");
        assert!(layer_name_for(&"x".repeat(40)).ends_with('…'));
    }
}
