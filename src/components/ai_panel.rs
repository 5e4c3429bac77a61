use eframe::egui;
use image::RgbaImage;
use std::sync::{Arc, mpsc};
use std::time::Instant;
use uuid::Uuid;

use crate::canvas::MaskPolygon;
use crate::ops::ai::{self, AiError, GenerativeModel, SubjectBox};
use crate::ops::selection::{SelectionMode, SelectionShape};
use crate::project::Project;

// ============================================================================
// AI TASKS
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum AiTask {
    DetectSubject,
    Analyze(String),
    RemoveObject,
    GenerativeFill(String),
    AutoEnhance,
}

impl AiTask {
    pub fn label(&self) -> &'static str {
        match self {
            AiTask::DetectSubject => "Select Subject",
            AiTask::Analyze(_) => "Analyze",
            AiTask::RemoveObject => "Remove Object",
            AiTask::GenerativeFill(_) => "Generative Fill",
            AiTask::AutoEnhance => "Auto Enhance",
        }
    }

    /// Tasks that edit a region need a selection to know where.
    pub fn needs_region(&self) -> bool {
        matches!(self, AiTask::RemoveObject | AiTask::GenerativeFill(_))
    }
}

/// The selection a region task was started with: its bounds for the prompt
/// and its outline for clipping the result.
#[derive(Clone, Debug, PartialEq)]
pub struct AiRegion {
    pub bounds: SubjectBox,
    pub outline: Vec<(f32, f32)>,
}

impl AiRegion {
    /// Captures the project's current selection. `Ok(None)` when nothing is
    /// selected; an error when the selection has no single outline.
    pub fn from_selection(project: &Project) -> Result<Option<Self>, String> {
        let Some(rect) = project.selection_bounds() else {
            return Ok(None);
        };
        let outline = project
            .selection
            .to_polygon()
            .ok_or_else(|| "only a single-shape selection can guide an AI edit".to_string())?;
        let bounds = SubjectBox::from_pixels(rect, project.doc.width, project.doc.height);
        Ok(Some(Self { bounds, outline }))
    }
}

#[derive(Clone, Debug)]
pub enum AiOutcome {
    Subject(SubjectBox),
    Answer(String),
    Image {
        image: RgbaImage,
        label: &'static str,
        /// Outline of the selection the result was requested for.
        clip: Option<Vec<(f32, f32)>>,
    },
}

/// Runs one task to completion on the calling thread.
pub fn run_task(
    model: &dyn GenerativeModel,
    task: &AiTask,
    image: &RgbaImage,
    region: Option<&AiRegion>,
) -> Result<AiOutcome, AiError> {
    let whole = SubjectBox { x: 0.0, y: 0.0, width: 100.0, height: 100.0 };
    let bounds = region.map_or(whole, |r| r.bounds);
    let clip = region.map(|r| r.outline.clone());
    match task {
        AiTask::DetectSubject => ai::detect_subject(model, image).map(AiOutcome::Subject),
        AiTask::Analyze(question) => ai::analyze_image(model, image, question).map(AiOutcome::Answer),
        AiTask::RemoveObject => {
            let image = ai::remove_object(model, image, &bounds)?;
            Ok(AiOutcome::Image { image, label: task.label(), clip })
        }
        AiTask::GenerativeFill(prompt) => {
            let image = ai::generative_fill(model, image, &bounds, prompt)?;
            Ok(AiOutcome::Image { image, label: task.label(), clip })
        }
        AiTask::AutoEnhance => {
            let image = ai::auto_enhance(model, image)?;
            Ok(AiOutcome::Image { image, label: task.label(), clip: None })
        }
    }
}

/// Applies a finished task to the project and returns a status line.
pub fn apply_outcome(project: &mut Project, outcome: AiOutcome) -> Result<String, String> {
    match outcome {
        AiOutcome::Subject(subject) => {
            let (x, y, w, h) = subject.to_pixels(project.doc.width, project.doc.height);
            let shape = SelectionShape::rect_from_corners((x as f32, y as f32), ((x + w) as f32, (y + h) as f32));
            project.select(shape, SelectionMode::Replace);
            Ok(format!("Subject selected ({w}×{h} at {x}, {y})"))
        }
        AiOutcome::Answer(answer) => Ok(answer),
        AiOutcome::Image { image, label, clip } => {
            project.add_ai_layer(image, label, clip.map(MaskPolygon::new));
            Ok(format!("{label} added as a new layer"))
        }
    }
}

// ============================================================================
// AI PANEL
// ============================================================================

struct PendingRequest {
    project: Uuid,
    task: AiTask,
    started: Instant,
    receiver: mpsc::Receiver<Result<AiOutcome, AiError>>,
}

/// Sidebar section driving the hosted model. One request runs at a time on a
/// worker thread; `poll` picks up the result each frame.
pub struct AiPanel {
    model: Result<Arc<dyn GenerativeModel>, String>,
    question: String,
    fill_prompt: String,
    pending: Option<PendingRequest>,
    /// Last analysis answer, shown below the buttons.
    pub last_answer: Option<String>,
}

impl AiPanel {
    pub fn new(model: Result<Arc<dyn GenerativeModel>, AiError>) -> Self {
        Self {
            model: model.map_err(|e| e.to_string()),
            question: String::new(),
            fill_prompt: String::new(),
            pending: None,
            last_answer: None,
        }
    }

    /// Swaps the client after a settings change. A request already running
    /// finishes on the old one.
    pub fn set_model(&mut self, model: Result<Arc<dyn GenerativeModel>, AiError>) {
        self.model = model.map_err(|e| e.to_string());
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Starts `task` against the project's current composite. Returns the
    /// status line to show.
    pub fn start(&mut self, task: AiTask, project: &Project) -> Result<String, String> {
        if let Some(p) = &self.pending {
            return Err(format!("{} is still running", p.task.label()));
        }
        let model = self.model.clone()?;
        let region = if task.needs_region() {
            match AiRegion::from_selection(project).map_err(|e| format!("{}: {e}", task.label()))? {
                Some(region) => Some(region),
                None => return Err(format!("{}: select an area first", task.label())),
            }
        } else {
            None
        };

        let image = project.render();
        let (tx, rx) = mpsc::channel();
        let worker_task = task.clone();
        std::thread::spawn(move || {
            let result = run_task(model.as_ref(), &worker_task, &image, region.as_ref());
            let _ = tx.send(result);
        });

        tracing::info!(task = task.label(), "AI request started");
        let status = format!("{}…", task.label());
        self.pending = Some(PendingRequest { project: project.id, task, started: Instant::now(), receiver: rx });
        Ok(status)
    }

    /// Collects a finished request. Returns the project it belongs to and the
    /// outcome, or `None` while still running.
    pub fn poll(&mut self) -> Option<(Uuid, Result<AiOutcome, String>)> {
        let pending = self.pending.as_ref()?;
        let result = match pending.receiver.try_recv() {
            Ok(r) => r.map_err(|e| format!("{} failed: {e}", pending.task.label())),
            Err(mpsc::TryRecvError::Empty) => return None,
            Err(mpsc::TryRecvError::Disconnected) => Err(format!("{} stopped unexpectedly", pending.task.label())),
        };
        let elapsed_ms = pending.started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(task = pending.task.label(), elapsed_ms, "AI request finished"),
            Err(e) => tracing::error!(task = pending.task.label(), elapsed_ms, error = %e, "AI request failed"),
        }
        let project = pending.project;
        self.pending = None;
        if let Ok(AiOutcome::Answer(answer)) = &result {
            self.last_answer = Some(answer.clone());
        }
        Some((project, result))
    }

    /// Buttons for every task. Returns the task the user asked for.
    pub fn show(&mut self, ui: &mut egui::Ui, has_selection: bool) -> Option<AiTask> {
        let mut requested = None;
        ui.heading("AI");
        if let Err(e) = &self.model {
            ui.colored_label(ui.visuals().warn_fg_color, e);
            return None;
        }

        let idle = self.pending.is_none();
        ui.add_enabled_ui(idle, |ui| {
            ui.horizontal_wrapped(|ui| {
                if ui.button("Select Subject").clicked() {
                    requested = Some(AiTask::DetectSubject);
                }
                if ui.button("Auto Enhance").clicked() {
                    requested = Some(AiTask::AutoEnhance);
                }
                let remove = ui.add_enabled(has_selection, egui::Button::new("Remove Object"));
                if remove.on_disabled_hover_text("Select the object first").clicked() {
                    requested = Some(AiTask::RemoveObject);
                }
            });

            ui.horizontal(|ui| {
                ui.add(egui::TextEdit::singleline(&mut self.fill_prompt).hint_text("Fill prompt").desired_width(140.0));
                let fill = ui.add_enabled(
                    has_selection && !self.fill_prompt.trim().is_empty(),
                    egui::Button::new("Fill"),
                );
                if fill.clicked() {
                    requested = Some(AiTask::GenerativeFill(self.fill_prompt.trim().to_string()));
                }
            });

            ui.horizontal(|ui| {
                ui.add(egui::TextEdit::singleline(&mut self.question).hint_text("Ask about the image").desired_width(140.0));
                if ui.button("Ask").clicked() {
                    requested = Some(AiTask::Analyze(self.question.trim().to_string()));
                }
            });
        });

        if let Some(p) = &self.pending {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label(format!("{} ({:.0}s)", p.task.label(), p.started.elapsed().as_secs_f32()));
            });
        }

        if let Some(answer) = &self.last_answer {
            ui.separator();
            egui::ScrollArea::vertical().id_source("ai_answer").max_height(120.0).show(ui, |ui| {
                ui.label(answer);
            });
        }
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::ai::{GenerateRequest, GenerateResponse};
    use image::Rgba;
    use std::time::Duration;

    struct Fixed(GenerateResponse);

    impl GenerativeModel for Fixed {
        fn generate(&self, _req: &GenerateRequest) -> Result<GenerateResponse, AiError> {
            Ok(self.0.clone())
        }
    }

    fn text_model(text: &str) -> Arc<dyn GenerativeModel> {
        Arc::new(Fixed(GenerateResponse { text: Some(text.to_string()), image: None }))
    }

    fn wait(panel: &mut AiPanel) -> (Uuid, Result<AiOutcome, String>) {
        for _ in 0..500 {
            if let Some(r) = panel.poll() {
                return r;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("AI task did not finish");
    }

    #[test]
    fn subject_outcome_becomes_selection() {
        let mut project = Project::new_untitled(1, 200, 100);
        let mut panel = AiPanel::new(Ok(text_model(r#"{"x":10,"y":20,"width":50,"height":50}"#)));
        panel.start(AiTask::DetectSubject, &project).unwrap();
        assert!(panel.is_busy());
        let (id, result) = wait(&mut panel);
        assert_eq!(id, project.id);
        apply_outcome(&mut project, result.unwrap()).unwrap();
        assert_eq!(project.selection_bounds(), Some((20, 20, 100, 50)));
        assert!(!panel.is_busy());
    }

    #[test]
    fn second_request_is_refused_while_busy() {
        let project = Project::new_untitled(1, 8, 8);
        let mut panel = AiPanel::new(Ok(text_model("a cat")));
        panel.start(AiTask::Analyze("what?".into()), &project).unwrap();
        assert!(panel.start(AiTask::AutoEnhance, &project).is_err());
        let (_, result) = wait(&mut panel);
        assert!(matches!(result, Ok(AiOutcome::Answer(ref a)) if a == "a cat"));
        assert_eq!(panel.last_answer.as_deref(), Some("a cat"));
    }

    #[test]
    fn region_tasks_need_selection() {
        let project = Project::new_untitled(1, 8, 8);
        let mut panel = AiPanel::new(Ok(text_model("")));
        assert!(panel.start(AiTask::RemoveObject, &project).is_err());
        assert!(!panel.is_busy());
    }

    #[test]
    fn missing_model_is_reported() {
        let project = Project::new_untitled(1, 8, 8);
        let mut panel = AiPanel::new(Err(AiError::MissingApiKey));
        assert!(panel.start(AiTask::AutoEnhance, &project).unwrap_err().contains("API key"));
    }

    #[test]
    fn fill_result_is_clipped_to_selection() {
        let model = Fixed(GenerateResponse {
            text: None,
            image: Some(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 255]))),
        });
        let mut project = Project::new_untitled(1, 16, 16);
        project.select(SelectionShape::rect_from_corners((0.0, 0.0), (8.0, 16.0)), SelectionMode::Replace);
        let region = AiRegion::from_selection(&project).unwrap();
        let outcome =
            run_task(&model, &AiTask::GenerativeFill("sky".into()), &project.render(), region.as_ref()).unwrap();
        apply_outcome(&mut project, outcome).unwrap();
        let out = project.render();
        assert_eq!(out.get_pixel(2, 8).0, [0, 0, 255, 255]);
        assert_eq!(out.get_pixel(12, 8).0, [255, 255, 255, 255]);
    }

    fn blue_model() -> Arc<dyn GenerativeModel> {
        Arc::new(Fixed(GenerateResponse {
            text: None,
            image: Some(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 255]))),
        }))
    }

    #[test]
    fn result_clips_to_the_selection_at_request_time() {
        let mut project = Project::new_untitled(1, 16, 16);
        project.select(SelectionShape::rect_from_corners((0.0, 0.0), (8.0, 16.0)), SelectionMode::Replace);
        let mut panel = AiPanel::new(Ok(blue_model()));
        panel.start(AiTask::RemoveObject, &project).unwrap();

        project.select(SelectionShape::rect_from_corners((8.0, 0.0), (16.0, 16.0)), SelectionMode::Replace);
        let (_, result) = wait(&mut panel);
        apply_outcome(&mut project, result.unwrap()).unwrap();

        let out = project.render();
        assert_eq!(out.get_pixel(2, 8).0, [0, 0, 255, 255]);
        assert_eq!(out.get_pixel(12, 8).0, [255, 255, 255, 255]);
    }

    #[test]
    fn combined_selection_is_refused_before_sending() {
        let mut project = Project::new_untitled(1, 16, 16);
        project.select(SelectionShape::rect_from_corners((0.0, 0.0), (4.0, 4.0)), SelectionMode::Replace);
        project.select(SelectionShape::rect_from_corners((8.0, 8.0), (12.0, 12.0)), SelectionMode::Add);
        let mut panel = AiPanel::new(Ok(blue_model()));
        let err = panel.start(AiTask::GenerativeFill("moon".into()), &project).unwrap_err();
        assert!(err.contains("single-shape"));
        assert!(!panel.is_busy());
    }
}
