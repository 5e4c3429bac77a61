// ============================================================================
// Lumina CLI: headless batch processing via command-line arguments
// ============================================================================
//
// Usage examples:
//   lumina -i photo.jpg -o out.png --brightness 120 --vignette 40
//   lumina -i "shots/*.jpg" --output-dir processed/ --format webp --sepia 60
//   lumina -i photo.jpg --filters '{"contrast":130,"grain":20}' -o graded.jpg
//   lumina -i photo.jpg --enhance -o enhanced.png
//   lumina -i photo.jpg --detect-subject
//   lumina -i photo.jpg --analyze "What breed is this dog?"
//
// No GUI is opened in CLI mode. Files are processed one after another on the
// current thread; pixel loops still use rayon.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::io::ExportFormat;
use crate::ops::ai::{self, AiConfig, GeminiClient, GenerativeModel};
use crate::ops::filters::FilterSettings;
use crate::project::Project;
use crate::settings::AppSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Lumina headless image processor.
///
/// Apply filters, run AI enhancement or analysis, and convert between formats
/// without opening the GUI.
#[derive(Parser, Debug, Default)]
#[command(
    name = "lumina",
    about = "Lumina headless batch image processor",
    long_about = "Apply the editor's filter bundle, AI auto-enhance or AI analysis to image\n\
                  files without opening the GUI. Reads PNG, JPEG, WEBP, BMP, GIF, TGA,\n\
                  TIFF and ICO; writes PNG, JPEG, WEBP and BMP.\n\n\
                  Example:\n  \
                  lumina -i photo.jpg -o out.png --brightness 120 --vignette 40\n  \
                  lumina -i \"*.jpg\" --output-dir out/ --format webp --sepia 60"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpeg, webp, bmp. Inferred from --output when omitted.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG quality (1–100).
    #[arg(short, long, default_value_t = 90, value_name = "1-100")]
    pub quality: u8,

    /// Brightness percent (0–200, 100 = unchanged).
    #[arg(long)]
    pub brightness: Option<f32>,
    /// Contrast percent (0–200, 100 = unchanged).
    #[arg(long)]
    pub contrast: Option<f32>,
    /// Saturation percent (0–200, 100 = unchanged).
    #[arg(long)]
    pub saturation: Option<f32>,
    /// Grayscale amount (0–100).
    #[arg(long)]
    pub grayscale: Option<f32>,
    /// Sepia amount (0–100).
    #[arg(long)]
    pub sepia: Option<f32>,
    /// Hue rotation in degrees (−180–180).
    #[arg(long, allow_hyphen_values = true)]
    pub hue_rotate: Option<f32>,
    /// Gaussian blur radius in pixels (0–20).
    #[arg(long)]
    pub blur: Option<f32>,
    /// Warm (+) / cool (−) shift (−100–100).
    #[arg(long, allow_hyphen_values = true)]
    pub temperature: Option<f32>,
    /// Magenta (+) / green (−) shift (−100–100).
    #[arg(long, allow_hyphen_values = true)]
    pub tint: Option<f32>,
    /// Exposure (−100–100).
    #[arg(long, allow_hyphen_values = true)]
    pub exposure: Option<f32>,
    /// Vignette strength (0–100).
    #[arg(long)]
    pub vignette: Option<f32>,
    /// Film grain strength (0–100).
    #[arg(long)]
    pub grain: Option<f32>,

    /// Whole filter bundle as JSON, e.g. '{"contrast":130,"grain":20}'.
    /// Individual filter flags override its fields.
    #[arg(long, value_name = "JSON")]
    pub filters: Option<String>,

    /// Run AI auto-enhance after filtering.
    #[arg(long)]
    pub enhance: bool,

    /// Print the main subject's bounding box (pixels) to stdout.
    #[arg(long)]
    pub detect_subject: bool,

    /// Ask the AI model a question about each image and print the answer.
    #[arg(long, value_name = "QUESTION")]
    pub analyze: Option<String>,

    /// Print per-file timing and debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Returns `true` when any CLI-mode flag is present in the real process arguments.
    /// Used by `main()` to route before creating an eframe window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--input" || a == "-i" || a.starts_with("--input="))
    }

    fn needs_model(&self) -> bool {
        self.enhance || self.detect_subject || self.analyze.is_some()
    }

    fn analysis_only(&self) -> bool {
        (self.detect_subject || self.analyze.is_some())
            && !self.enhance
            && self.output.is_none()
            && self.output_dir.is_none()
    }

    /// `--filters` JSON with the individual flags laid over it.
    pub fn filter_settings(&self) -> Result<FilterSettings, String> {
        let mut f = match &self.filters {
            Some(json) => serde_json::from_str::<FilterSettings>(json).map_err(|e| format!("invalid --filters JSON: {e}"))?,
            None => FilterSettings::default(),
        };
        let overrides = [
            (self.brightness, &mut f.brightness),
            (self.contrast, &mut f.contrast),
            (self.saturation, &mut f.saturation),
            (self.grayscale, &mut f.grayscale),
            (self.sepia, &mut f.sepia),
            (self.hue_rotate, &mut f.hue_rotate),
            (self.blur, &mut f.blur),
            (self.temperature, &mut f.temperature),
            (self.tint, &mut f.tint),
            (self.exposure, &mut f.exposure),
            (self.vignette, &mut f.vignette),
            (self.grain, &mut f.grain),
        ];
        for (flag, field) in overrides {
            if let Some(v) = flag {
                *field = v;
            }
        }
        Ok(f.clamped())
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let model: Option<GeminiClient> = if args.needs_model() {
        let config = AiConfig::from_settings(&AppSettings::load());
        match GeminiClient::new(config) {
            Ok(client) => Some(client),
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };
    run_batch(&args, model.as_ref().map(|m| m as &dyn GenerativeModel))
}

/// Processes every input with an optional model. Split from [`run`] so a
/// different model can be supplied.
pub fn run_batch(args: &CliArgs, model: Option<&dyn GenerativeModel>) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    if args.needs_model() && model.is_none() {
        eprintln!("error: AI options need a model but none is configured.");
        return ExitCode::FAILURE;
    }

    let format = match parse_format(args.format.as_deref(), args.output.as_deref()) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let filters = match args.filter_settings() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let output_path = if args.analysis_only() {
            None
        } else {
            match build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref(), format) {
                Some(p) => Some(p),
                None => {
                    eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
                    any_failure = true;
                    continue;
                }
            }
        };

        let job = FileJob { input: input_path, output: output_path.as_deref(), format, filters: &filters };
        match run_one(args, &job, model) {
            Ok(()) => {
                if let Some(out) = &output_path
                    && (args.verbose || multi)
                {
                    println!("  → {} ({:.0}ms)", out.display(), file_start.elapsed().as_secs_f64() * 1000.0);
                }
            }
            Err(e) => {
                tracing::error!(input = %input_path.display(), error = %e, "file failed");
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

struct FileJob<'a> {
    input: &'a Path,
    output: Option<&'a Path>,
    format: ExportFormat,
    filters: &'a FilterSettings,
}

fn run_one(args: &CliArgs, job: &FileJob<'_>, model: Option<&dyn GenerativeModel>) -> Result<(), String> {
    // -- Step 1: Load ----------------------------------------------------
    let mut project = Project::open(job.input).map_err(|e| format!("load failed: {e}"))?;

    // -- Step 2: Filters -------------------------------------------------
    if !job.filters.is_identity()
        && let Some(id) = project.active_layer
    {
        project.set_filters(id, *job.filters).map_err(|e| e.to_string())?;
    }

    // -- Step 3: AI analysis (stdout) ------------------------------------
    if let Some(model) = model {
        if args.detect_subject {
            let rendered = project.render();
            let subject = ai::detect_subject(model, &rendered).map_err(|e| format!("subject detection failed: {e}"))?;
            let (x, y, w, h) = subject.to_pixels(rendered.width(), rendered.height());
            println!("subject: x={x} y={y} width={w} height={h}");
        }
        if let Some(question) = &args.analyze {
            let answer = ai::analyze_image(model, &project.render(), question).map_err(|e| format!("analysis failed: {e}"))?;
            println!("{answer}");
        }
        if args.enhance {
            let enhanced = ai::auto_enhance(model, &project.render()).map_err(|e| format!("auto-enhance failed: {e}"))?;
            project.apply_ai_image(enhanced, "Auto Enhance", false).map_err(|e| e.to_string())?;
        }
    }

    // -- Step 4: Save ----------------------------------------------------
    if let Some(output) = job.output {
        project
            .export(output, job.format, args.quality)
            .map_err(|e| format!("save failed: {e}"))?;
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// `--format` wins; otherwise the output extension; otherwise PNG.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Result<ExportFormat, String> {
    if let Some(f) = format_arg {
        return ExportFormat::from_extension(f).ok_or_else(|| format!("unsupported output format '{f}'"));
    }
    Ok(output.and_then(ExportFormat::from_path).unwrap_or_default())
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
/// 3. Fallback: same directory as input, same stem, new extension
///    (appends `_out` to stem if it would collide with the input path)
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>, format: ExportFormat) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let ext = format.extension();
    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.{}", stem, ext)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    let candidate = parent.join(format!("{}.{}", stem, ext));
    if candidate == input {
        Some(parent.join(format!("{}_out.{}", stem, ext)))
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("lumina").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn filter_flags_override_json() {
        let args = parse(&["-i", "a.png", "--filters", r#"{"contrast":130,"grain":20}"#, "--grain", "5", "--tint", "-30"]);
        let f = args.filter_settings().unwrap();
        assert_eq!(f.contrast, 130.0);
        assert_eq!(f.grain, 5.0);
        assert_eq!(f.tint, -30.0);
        assert_eq!(f.brightness, 100.0);
    }

    #[test]
    fn bad_filter_json_is_reported() {
        let args = parse(&["-i", "a.png", "--filters", "{oops"]);
        assert!(args.filter_settings().is_err());
    }

    #[test]
    fn format_resolution() {
        assert_eq!(parse_format(Some("JPG"), None), Ok(ExportFormat::Jpeg));
        assert_eq!(parse_format(None, Some(Path::new("x.webp"))), Ok(ExportFormat::Webp));
        assert_eq!(parse_format(None, None), Ok(ExportFormat::Png));
        assert!(parse_format(Some("gif"), None).is_err());
    }

    #[test]
    fn output_never_overwrites_input() {
        let out = build_output_path(Path::new("/tmp/a.png"), None, None, ExportFormat::Png);
        assert_eq!(out, Some(PathBuf::from("/tmp/a_out.png")));
        let out = build_output_path(Path::new("/tmp/a.png"), None, Some(Path::new("/o")), ExportFormat::Jpeg);
        assert_eq!(out, Some(PathBuf::from("/o/a.jpg")));
    }

    #[test]
    fn analysis_alone_writes_nothing() {
        let args = parse(&["-i", "a.png", "--detect-subject"]);
        assert!(args.analysis_only());
        assert!(args.needs_model());
        let args = parse(&["-i", "a.png", "--detect-subject", "-o", "b.png"]);
        assert!(!args.analysis_only());
    }
}
