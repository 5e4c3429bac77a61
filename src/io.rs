use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageEncoder, ImageError, Rgba, RgbaImage};
use rfd::FileDialog;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Extensions the `image` crate can decode with the enabled features.
pub const OPEN_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "webp", "bmp", "gif", "tga", "tif", "tiff", "ico",
];

// ============================================================================
// LOADING
// ============================================================================

/// Decodes any supported raster into RGBA. Animated GIFs yield their first frame.
pub fn load_image(path: &Path) -> Result<RgbaImage, ImageError> {
    let img = image::open(path)?.to_rgba8();
    tracing::info!(path = %path.display(), width = img.width(), height = img.height(), "image loaded");
    Ok(img)
}

pub fn load_image_from_memory(bytes: &[u8]) -> Result<RgbaImage, ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// `"photo"` for `/tmp/photo.jpg`; used as the project name.
pub fn display_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Untitled")
        .to_string()
}

// ============================================================================
// EXPORT
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
    Bmp,
}

impl ExportFormat {
    pub fn all() -> &'static [ExportFormat] {
        &[ExportFormat::Png, ExportFormat::Jpeg, ExportFormat::Webp, ExportFormat::Bmp]
    }

    pub fn from_extension(ext: &str) -> Option<ExportFormat> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "png" => Some(ExportFormat::Png),
            "jpg" | "jpeg" => Some(ExportFormat::Jpeg),
            "webp" => Some(ExportFormat::Webp),
            "bmp" => Some(ExportFormat::Bmp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<ExportFormat> {
        path.extension().and_then(|e| e.to_str()).and_then(Self::from_extension)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
            ExportFormat::Webp => "webp",
            ExportFormat::Bmp => "bmp",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExportFormat::Png => "PNG",
            ExportFormat::Jpeg => "JPEG",
            ExportFormat::Webp => "WebP",
            ExportFormat::Bmp => "BMP",
        }
    }
}

/// Composites `image` over opaque white.
pub fn flatten_onto_white(image: &RgbaImage) -> image::RgbImage {
    let mut out = image::RgbImage::new(image.width(), image.height());
    for (src, dst) in image.pixels().zip(out.pixels_mut()) {
        let Rgba([r, g, b, a]) = *src;
        let a = a as f32 / 255.0;
        let over = |c: u8| (c as f32 * a + 255.0 * (1.0 - a)).round() as u8;
        *dst = image::Rgb([over(r), over(g), over(b)]);
    }
    out
}

/// Encodes and writes in one step. JPEG and BMP are flattened onto white.
/// `quality` applies to JPEG only (clamped to 1..=100).
pub fn encode_and_write(image: &RgbaImage, path: &Path, format: ExportFormat, quality: u8) -> Result<(), ImageError> {
    match format {
        ExportFormat::Png => {
            let mut writer = BufWriter::new(File::create(path)?);
            PngEncoder::new(&mut writer).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
        ExportFormat::Jpeg => {
            let rgb = flatten_onto_white(image);
            let mut writer = BufWriter::new(File::create(path)?);
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
            encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
        }
        ExportFormat::Webp => {
            DynamicImage::ImageRgba8(image.clone()).save_with_format(path, image::ImageFormat::WebP)?;
        }
        ExportFormat::Bmp => {
            let rgb = flatten_onto_white(image);
            let mut writer = BufWriter::new(File::create(path)?);
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
        }
    }
    tracing::info!(path = %path.display(), format = format.label(), "image exported");
    Ok(())
}

/// In-memory PNG, used for model payloads.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(image.as_raw(), image.width(), image.height(), image::ColorType::Rgba8)?;
    Ok(buf)
}

// ============================================================================
// FILE DIALOGS
// ============================================================================

pub fn pick_image_path(start_dir: Option<&Path>) -> Option<PathBuf> {
    let mut dialog = FileDialog::new()
        .add_filter("Images", OPEN_EXTENSIONS)
        .add_filter("All Files", &["*"]);
    if let Some(dir) = start_dir {
        dialog = dialog.set_directory(dir);
    }
    dialog.pick_file()
}

/// Save dialog; the chosen path gets `format`'s extension when it has none.
pub fn pick_export_path(suggested_name: &str, format: ExportFormat) -> Option<PathBuf> {
    let path = FileDialog::new()
        .add_filter(format.label(), &[format.extension()])
        .set_file_name(format!("{suggested_name}.{}", format.extension()))
        .save_file()?;
    if path.extension().is_none() {
        Some(path.with_extension(format.extension()))
    } else {
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_round_trip() {
        for f in ExportFormat::all() {
            assert_eq!(ExportFormat::from_extension(f.extension()), Some(*f));
        }
        assert_eq!(ExportFormat::from_extension(".JPEG"), Some(ExportFormat::Jpeg));
        assert_eq!(ExportFormat::from_extension("gif"), None);
    }

    #[test]
    fn png_export_keeps_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let img = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 40]));
        encode_and_write(&img, &path, ExportFormat::Png, 90).unwrap();
        let back = load_image(&path).unwrap();
        assert_eq!(back.get_pixel(1, 1), &Rgba([10, 20, 30, 40]));
    }

    #[test]
    fn bmp_export_is_flattened_onto_white() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bmp");
        let img = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        encode_and_write(&img, &path, ExportFormat::Bmp, 90).unwrap();
        let back = load_image(&path).unwrap();
        assert_eq!(back.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn jpeg_export_decodes_opaque() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        let img = RgbaImage::from_pixel(8, 8, Rgba([200, 50, 50, 255]));
        encode_and_write(&img, &path, ExportFormat::Jpeg, 95).unwrap();
        let back = load_image(&path).unwrap();
        assert_eq!(back.dimensions(), (8, 8));
        assert_eq!(back.get_pixel(4, 4)[3], 255);
    }

    #[test]
    fn png_bytes_decode_back() {
        let img = RgbaImage::from_pixel(5, 4, Rgba([1, 2, 3, 4]));
        let bytes = encode_png(&img).unwrap();
        assert_eq!(load_image_from_memory(&bytes).unwrap(), img);
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(load_image(Path::new("/definitely/not/here.png")).is_err());
    }
}
