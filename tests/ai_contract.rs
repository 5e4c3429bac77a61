//! The model boundary: request shape, reply handling, the HTTP client against
//! a local stand-in server, and the CLI driving a substitute model.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::process::ExitCode;
use std::sync::Mutex;
use std::thread;

use base64::{Engine as _, engine::general_purpose};
use image::{Rgba, RgbaImage};
use lumina::cli::{CliArgs, run_batch};
use lumina::io::{encode_png, load_image, load_image_from_memory};
use lumina::ops::ai::{
    self, AiConfig, AiError, GeminiClient, GenerateRequest, GenerateResponse, GenerativeModel, SubjectBox,
};

// ============================================================================
// Substitute model
// ============================================================================

#[derive(Default)]
struct MockModel {
    text: Option<String>,
    image: Option<RgbaImage>,
    fail_with: Option<u16>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl MockModel {
    fn replying(text: &str) -> Self {
        Self { text: Some(text.to_string()), ..Self::default() }
    }

    fn painting(c: [u8; 4]) -> Self {
        Self { image: Some(RgbaImage::from_pixel(8, 8, Rgba(c))), ..Self::default() }
    }

    fn last_request(&self) -> GenerateRequest {
        self.requests.lock().unwrap().last().cloned().expect("no request sent")
    }
}

impl GenerativeModel for MockModel {
    fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, AiError> {
        self.requests.lock().unwrap().push(req.clone());
        if let Some(code) = self.fail_with {
            return Err(AiError::Status { code, body: "quota exceeded".to_string() });
        }
        Ok(GenerateResponse { text: self.text.clone(), image: self.image.clone() })
    }
}

fn photo(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 10) as u8, (y * 10) as u8, 128, 255]))
}

// ============================================================================
// Operations
// ============================================================================

#[test]
fn detection_sends_the_image_and_reads_a_fenced_reply() {
    let model = MockModel::replying("Sure!\n```json\n{\"x\": 25, \"y\": 10, \"w\": 50, \"h\": 80}\n```");
    let subject = ai::detect_subject(&model, &photo(20, 10)).unwrap();
    assert_eq!(subject, SubjectBox { x: 25.0, y: 10.0, width: 50.0, height: 80.0 });
    assert_eq!(subject.to_pixels(20, 10), (5, 1, 10, 8));

    let req = model.last_request();
    assert!(!req.want_image);
    let sent = load_image_from_memory(&req.image_png).unwrap();
    assert_eq!(sent.dimensions(), (20, 10));
}

#[test]
fn out_of_range_boxes_are_clamped() {
    let subject = ai::parse_subject_box(r#"{"x": -5, "y": 90, "width": 300, "height": 40}"#).unwrap();
    assert_eq!(subject, SubjectBox { x: 0.0, y: 90.0, width: 100.0, height: 10.0 });
    assert!(matches!(ai::parse_subject_box("no box here"), Err(AiError::Parse(_))));
}

#[test]
fn edits_ask_for_an_image_and_come_back_at_source_size() {
    let model = MockModel::painting([9, 9, 9, 255]);
    let region = SubjectBox { x: 10.0, y: 10.0, width: 20.0, height: 20.0 };
    let out = ai::remove_object(&model, &photo(30, 12), &region).unwrap();
    assert_eq!(out.dimensions(), (30, 12));
    let req = model.last_request();
    assert!(req.want_image);
    assert!(req.instruction.contains("10.0%"));

    ai::generative_fill(&model, &photo(30, 12), &region, "  a red balloon ").unwrap();
    assert!(model.last_request().instruction.contains("a red balloon."));
}

#[test]
fn text_only_reply_to_an_edit_is_no_image() {
    let model = MockModel::replying("I can't do that.");
    assert!(matches!(ai::auto_enhance(&model, &photo(4, 4)), Err(AiError::NoImage)));
}

#[test]
fn model_failures_pass_through_unchanged() {
    let model = MockModel { fail_with: Some(429), ..MockModel::default() };
    let err = ai::analyze_image(&model, &photo(4, 4), "").unwrap_err();
    assert!(matches!(err, AiError::Status { code: 429, .. }));
    assert_eq!(model.last_request().instruction, "Describe this image.");
}

// ============================================================================
// HTTP client against a local server
// ============================================================================

struct Captured {
    request_line: String,
    headers: Vec<String>,
    body: serde_json::Value,
}

/// Serves exactly one request with `status` and `reply`, returning what it saw.
fn serve_once(status: &'static str, reply: String) -> (String, thread::JoinHandle<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}/v1beta", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();
        let mut headers = Vec::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end().to_string();
            if line.is_empty() {
                break;
            }
            let lower = line.to_ascii_lowercase();
            if let Some(v) = lower.strip_prefix("content-length:") {
                content_length = v.trim().parse().unwrap();
            }
            headers.push(lower);
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).unwrap();

        let mut stream = stream;
        write!(
            stream,
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
            reply.len()
        )
        .unwrap();
        stream.flush().unwrap();
        Captured { request_line, headers, body: serde_json::from_slice(&body).unwrap() }
    });
    (endpoint, handle)
}

fn client_for(endpoint: String) -> GeminiClient {
    GeminiClient::new(AiConfig {
        endpoint,
        model: "text-model".to_string(),
        image_model: "image-model".to_string(),
        timeout_secs: 10,
        api_key: Some("secret-key".to_string()),
    })
    .unwrap()
}

#[test]
fn client_posts_generate_content_and_parses_text() {
    let reply = serde_json::json!({
        "candidates": [{ "content": { "parts": [
            { "text": "{\"x\": 1, \"y\": 2, " },
            { "text": "\"width\": 3, \"height\": 4}" }
        ]}}]
    })
    .to_string();
    let (endpoint, server) = serve_once("200 OK", reply);
    let subject = ai::detect_subject(&client_for(endpoint), &photo(6, 6)).unwrap();
    assert_eq!(subject, SubjectBox { x: 1.0, y: 2.0, width: 3.0, height: 4.0 });

    let seen = server.join().unwrap();
    assert!(seen.request_line.starts_with("POST /v1beta/models/text-model:generateContent"));
    assert!(seen.headers.iter().any(|h| h == "x-goog-api-key: secret-key"));
    let parts = &seen.body["contents"][0]["parts"];
    assert_eq!(parts[0]["inline_data"]["mime_type"], "image/png");
    assert!(parts[1]["text"].as_str().unwrap().contains("bounding box"));
    assert_eq!(seen.body["generationConfig"]["responseModalities"], serde_json::json!(["TEXT"]));
}

#[test]
fn client_decodes_inline_images_from_the_image_model() {
    let png = encode_png(&RgbaImage::from_pixel(3, 3, Rgba([0, 200, 0, 255]))).unwrap();
    let reply = serde_json::json!({
        "candidates": [{ "content": { "parts": [
            { "inlineData": { "mimeType": "image/png", "data": general_purpose::STANDARD.encode(png) } }
        ]}}]
    })
    .to_string();
    let (endpoint, server) = serve_once("200 OK", reply);
    let out = ai::auto_enhance(&client_for(endpoint), &photo(6, 4)).unwrap();
    assert_eq!(out.dimensions(), (6, 4));
    let [r, g, b, a] = out.get_pixel(3, 2).0;
    assert!(r <= 1 && g.abs_diff(200) <= 1 && b <= 1 && a == 255);

    let seen = server.join().unwrap();
    assert!(seen.request_line.contains("/models/image-model:generateContent"));
    assert_eq!(seen.body["generationConfig"]["responseModalities"], serde_json::json!(["TEXT", "IMAGE"]));
}

#[test]
fn client_reports_http_status_and_body() {
    let (endpoint, server) = serve_once("403 Forbidden", r#"{"error":"bad key"}"#.to_string());
    let err = ai::analyze_image(&client_for(endpoint), &photo(2, 2), "hi").unwrap_err();
    server.join().unwrap();
    match err {
        AiError::Status { code, body } => {
            assert_eq!(code, 403);
            assert!(body.contains("bad key"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn client_without_key_is_rejected() {
    let config = AiConfig { api_key: None, ..AiConfig::default() };
    assert!(matches!(GeminiClient::new(config), Err(AiError::MissingApiKey)));
}

// ============================================================================
// CLI with a substitute model
// ============================================================================

#[test]
fn cli_enhance_writes_the_model_result() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.png");
    photo(10, 10).save(&input).unwrap();
    let output = dir.path().join("out.png");

    let args = CliArgs {
        input: vec![input.to_string_lossy().into_owned()],
        output: Some(output.clone()),
        quality: 90,
        enhance: true,
        ..CliArgs::default()
    };
    let model = MockModel::painting([250, 0, 250, 255]);
    assert_eq!(run_batch(&args, Some(&model)), ExitCode::SUCCESS);

    let written = load_image(&output).unwrap();
    assert_eq!(written.dimensions(), (10, 10));
    let [r, g, b, _] = written.get_pixel(5, 5).0;
    assert!(r.abs_diff(250) <= 1 && g <= 1 && b.abs_diff(250) <= 1);
}

#[test]
fn cli_analysis_only_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.png");
    photo(4, 4).save(&input).unwrap();

    let args = CliArgs {
        input: vec![input.to_string_lossy().into_owned()],
        quality: 90,
        detect_subject: true,
        ..CliArgs::default()
    };
    let model = MockModel::replying(r#"{"x":0,"y":0,"width":50,"height":50}"#);
    assert_eq!(run_batch(&args, Some(&model)), ExitCode::SUCCESS);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn cli_ai_flags_without_a_model_fail() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.png");
    photo(4, 4).save(&input).unwrap();
    let args = CliArgs {
        input: vec![input.to_string_lossy().into_owned()],
        output: Some(dir.path().join("out.png")),
        quality: 90,
        enhance: true,
        ..CliArgs::default()
    };
    assert_eq!(run_batch(&args, None), ExitCode::FAILURE);
    assert!(!dir.path().join("out.png").exists());
}

#[test]
fn cli_model_errors_fail_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.png");
    photo(4, 4).save(&input).unwrap();
    let args = CliArgs {
        input: vec![input.to_string_lossy().into_owned()],
        output: Some(dir.path().join("out.png")),
        quality: 90,
        enhance: true,
        ..CliArgs::default()
    };
    let model = MockModel { fail_with: Some(500), ..MockModel::default() };
    assert_eq!(run_batch(&args, Some(&model)), ExitCode::FAILURE);
}
