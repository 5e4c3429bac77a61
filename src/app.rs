use eframe::egui;
use egui::{Color32, Pos2, Rect, Stroke, Vec2};
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use uuid::Uuid;

use crate::components::ai_panel::{self, AiPanel, AiTask};
use crate::components::history::history_panel;
use crate::components::layers::{LayerAppAction, LayersPanel};
use crate::components::tools::{self, Tool, ToolController, ToolPreview};
use crate::io::{self, ExportFormat};
use crate::ops::ai::{AiConfig, AiError, GeminiClient, GenerativeModel};
use crate::project::Project;
use crate::render::{RenderOptions, render_document};
use crate::settings::AppSettings;

const DEFAULT_CANVAS: (u32, u32) = (1280, 720);
const MAX_CANVAS_EDGE: u32 = 16384;
const MIN_ZOOM: f32 = 0.05;
const MAX_ZOOM: f32 = 32.0;
const CHECKER_CELL: f32 = 10.0;

/// Results from background file loads, polled every frame.
pub enum IoResult {
    ImageLoaded { path: PathBuf, image: RgbaImage },
    LoadFailed(String),
}

fn build_model(settings: &AppSettings) -> Result<Arc<dyn GenerativeModel>, AiError> {
    let client = GeminiClient::new(AiConfig::from_settings(settings))?;
    Ok(Arc::new(client))
}

// ============================================================================
// CANVAS VIEW
// ============================================================================

/// Zoom/pan state plus the texture holding the last composite.
struct CanvasView {
    zoom: f32,
    pan: Vec2,
    texture: Option<egui::TextureHandle>,
    /// Project and history revision the texture was rendered from.
    rendered: Option<(Uuid, u64)>,
    /// Pointer gesture routed to the tool controller.
    gesture_active: bool,
    fit_pending: bool,
}

impl CanvasView {
    fn new() -> Self {
        Self { zoom: 1.0, pan: Vec2::ZERO, texture: None, rendered: None, gesture_active: false, fit_pending: true }
    }

    fn reset(&mut self) {
        self.pan = Vec2::ZERO;
        self.rendered = None;
        self.gesture_active = false;
        self.fit_pending = true;
    }

    fn image_rect(&self, viewport: Rect, doc_size: (u32, u32)) -> Rect {
        let size = Vec2::new(doc_size.0 as f32, doc_size.1 as f32) * self.zoom;
        Rect::from_center_size(viewport.center() + self.pan, size)
    }

    fn fit(&mut self, viewport: Rect, doc_size: (u32, u32)) {
        let sx = (viewport.width() - 40.0).max(1.0) / doc_size.0.max(1) as f32;
        let sy = (viewport.height() - 40.0).max(1.0) / doc_size.1.max(1) as f32;
        self.zoom = sx.min(sy).clamp(MIN_ZOOM, 1.0);
        self.pan = Vec2::ZERO;
    }

    /// Zooms keeping the document point under `anchor` fixed.
    fn zoom_around(&mut self, factor: f32, anchor: Pos2, viewport: Rect) {
        let new_zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        let center = viewport.center() + self.pan;
        let offset = (anchor - center) * (new_zoom / self.zoom);
        self.pan = anchor - offset - viewport.center();
        self.zoom = new_zoom;
    }
}

fn to_doc(image_rect: Rect, zoom: f32, p: Pos2) -> (f32, f32) {
    ((p.x - image_rect.min.x) / zoom, (p.y - image_rect.min.y) / zoom)
}

fn to_screen(image_rect: Rect, zoom: f32, (x, y): (f32, f32)) -> Pos2 {
    Pos2::new(image_rect.min.x + x * zoom, image_rect.min.y + y * zoom)
}

fn paint_checkerboard(painter: &egui::Painter, rect: Rect) {
    let visible = rect.intersect(painter.clip_rect());
    if !visible.is_positive() {
        return;
    }
    painter.rect_filled(visible, 0.0, Color32::from_gray(255));
    let light = Color32::from_gray(204);
    let first_col = ((visible.min.x - rect.min.x) / CHECKER_CELL).floor() as i32;
    let first_row = ((visible.min.y - rect.min.y) / CHECKER_CELL).floor() as i32;
    let cols = (visible.width() / CHECKER_CELL).ceil() as i32 + 1;
    let rows = (visible.height() / CHECKER_CELL).ceil() as i32 + 1;
    for row in first_row..first_row + rows {
        for col in first_col..first_col + cols {
            if (row + col) % 2 == 0 {
                continue;
            }
            let min = rect.min + Vec2::new(col as f32, row as f32) * CHECKER_CELL;
            let cell = Rect::from_min_size(min, Vec2::splat(CHECKER_CELL)).intersect(visible);
            if cell.is_positive() {
                painter.rect_filled(cell, 0.0, light);
            }
        }
    }
}

// ============================================================================
// APP
// ============================================================================

pub struct LuminaApp {
    projects: Vec<Project>,
    active_project_index: usize,
    untitled_counter: usize,

    canvas: CanvasView,
    tools: ToolController,
    layers_panel: LayersPanel,
    ai_panel: AiPanel,

    settings: AppSettings,
    show_settings: bool,
    new_canvas_size: Option<(u32, u32)>,
    canvas_resize: Option<(u32, u32)>,
    pending_close_index: Option<usize>,

    io_sender: mpsc::Sender<IoResult>,
    io_receiver: mpsc::Receiver<IoResult>,
    pending_io_ops: usize,

    status: String,
    error: Option<String>,
}

impl LuminaApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let settings = AppSettings::load();
        let model = build_model(&settings);
        if let Err(e) = &model {
            tracing::warn!(error = %e, "AI features disabled");
        }
        let (io_sender, io_receiver) = mpsc::channel();
        Self {
            projects: vec![Project::new_untitled(1, DEFAULT_CANVAS.0, DEFAULT_CANVAS.1)],
            active_project_index: 0,
            untitled_counter: 1,
            canvas: CanvasView::new(),
            tools: ToolController::default(),
            layers_panel: LayersPanel::new(),
            ai_panel: AiPanel::new(model),
            settings,
            show_settings: false,
            new_canvas_size: None,
            canvas_resize: None,
            pending_close_index: None,
            io_sender,
            io_receiver,
            pending_io_ops: 0,
            status: "Ready".to_string(),
            error: None,
        }
    }

    fn active_project(&self) -> Option<&Project> {
        self.projects.get(self.active_project_index)
    }

    fn active_project_mut(&mut self) -> Option<&mut Project> {
        self.projects.get_mut(self.active_project_index)
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        self.error = None;
    }

    fn set_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        tracing::warn!(%error, "shown to user");
        self.error = Some(error);
    }

    fn report<T>(&mut self, result: crate::error::EditorResult<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.set_error(e.to_string());
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    fn new_project(&mut self, width: u32, height: u32) {
        self.untitled_counter += 1;
        self.projects.push(Project::new_untitled(self.untitled_counter, width, height));
        self.switch_to_project(self.projects.len() - 1);
    }

    fn switch_to_project(&mut self, index: usize) {
        if index < self.projects.len() {
            self.tools.cancel();
            self.active_project_index = index;
            self.canvas.reset();
        }
    }

    fn close_project(&mut self, index: usize, force: bool) {
        let Some(project) = self.projects.get(index) else { return };
        if project.is_dirty && !force {
            self.pending_close_index = Some(index);
            return;
        }
        self.projects.remove(index);
        if self.projects.is_empty() {
            self.untitled_counter += 1;
            self.projects.push(Project::new_untitled(self.untitled_counter, DEFAULT_CANVAS.0, DEFAULT_CANVAS.1));
            self.active_project_index = 0;
        } else if self.active_project_index >= self.projects.len() {
            self.active_project_index = self.projects.len() - 1;
        } else if index < self.active_project_index {
            self.active_project_index -= 1;
        }
        self.tools.cancel();
        self.canvas.reset();
    }

    /// An untouched blank first tab is replaced by the first opened file.
    fn replaces_blank(&self) -> bool {
        self.projects.len() == 1 && self.projects[0].path.is_none() && !self.projects[0].is_dirty && self.projects[0].history.len() == 1
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    fn handle_open_file(&mut self) {
        if let Some(path) = io::pick_image_path(self.settings.last_open_dir.as_deref()) {
            self.open_file_by_path(path);
        }
    }

    fn open_file_by_path(&mut self, path: PathBuf) {
        if let Some(idx) = self.projects.iter().position(|p| p.path.as_ref() == Some(&path)) {
            self.switch_to_project(idx);
            return;
        }
        if let Some(dir) = path.parent() {
            self.settings.last_open_dir = Some(dir.to_path_buf());
            self.settings.save();
        }
        let sender = self.io_sender.clone();
        self.pending_io_ops += 1;
        self.set_status(format!("Opening {}…", io::display_name(&path)));
        rayon::spawn(move || match io::load_image(&path) {
            Ok(image) => {
                let _ = sender.send(IoResult::ImageLoaded { path, image });
            }
            Err(e) => {
                let _ = sender.send(IoResult::LoadFailed(format!("Failed to open {}: {e}", path.display())));
            }
        });
    }

    fn poll_io(&mut self) {
        while let Ok(result) = self.io_receiver.try_recv() {
            self.pending_io_ops = self.pending_io_ops.saturating_sub(1);
            match result {
                IoResult::ImageLoaded { path, image } => {
                    let (w, h) = image.dimensions();
                    let mut project = Project::from_image(image, io::display_name(&path));
                    project.path = Some(path);
                    let status = format!("Opened {} ({w}×{h})", project.name);
                    if self.replaces_blank() {
                        self.projects[0] = project;
                        self.switch_to_project(0);
                    } else {
                        self.projects.push(project);
                        self.switch_to_project(self.projects.len() - 1);
                    }
                    self.set_status(status);
                }
                IoResult::LoadFailed(msg) => self.set_error(msg),
            }
        }
    }

    fn handle_import_layer(&mut self) {
        let Some(path) = io::pick_image_path(self.settings.last_open_dir.as_deref()) else { return };
        match io::load_image(&path) {
            Ok(image) => {
                let name = io::display_name(&path);
                if let Some(project) = self.active_project_mut() {
                    project.add_image_layer(image, name.clone());
                }
                self.set_status(format!("Imported {name}"));
            }
            Err(e) => self.set_error(format!("Failed to import {}: {e}", path.display())),
        }
    }

    fn handle_export(&mut self) {
        let default_format = self.settings.default_export_format;
        let quality = self.settings.jpeg_quality;
        let Some(name) = self.active_project().map(|p| p.name.clone()) else { return };
        let Some(path) = io::pick_export_path(&name, default_format) else { return };
        let format = ExportFormat::from_path(&path).unwrap_or(default_format);
        let Some(project) = self.active_project_mut() else { return };
        let result = project.export(&path, format, quality);
        if self.report(result).is_some() {
            self.set_status(format!("Exported {}", path.display()));
        }
    }

    // ------------------------------------------------------------------
    // AI
    // ------------------------------------------------------------------

    fn start_ai(&mut self, task: AiTask) {
        let Some(project) = self.projects.get(self.active_project_index) else { return };
        match self.ai_panel.start(task, project) {
            Ok(status) => self.set_status(status),
            Err(e) => self.set_error(e),
        }
    }

    fn poll_ai(&mut self) {
        let Some((project_id, result)) = self.ai_panel.poll() else { return };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return self.set_error(e),
        };
        let Some(project) = self.projects.iter_mut().find(|p| p.id == project_id) else {
            return self.set_error("The project for this AI result was closed");
        };
        match ai_panel::apply_outcome(project, outcome) {
            Ok(status) => self.set_status(status),
            Err(e) => self.set_error(e),
        }
    }

    // ------------------------------------------------------------------
    // Keyboard
    // ------------------------------------------------------------------

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        use egui::{Key, Modifiers};
        let command_shift = Modifiers::COMMAND | Modifiers::SHIFT;
        let (redo, undo, select_all, deselect, open, export, new, delete, escape) = ctx.input_mut(|i| {
            (
                i.consume_key(command_shift, Key::Z) || i.consume_key(Modifiers::COMMAND, Key::Y),
                i.consume_key(Modifiers::COMMAND, Key::Z),
                i.consume_key(Modifiers::COMMAND, Key::A),
                i.consume_key(Modifiers::COMMAND, Key::D),
                i.consume_key(Modifiers::COMMAND, Key::O),
                i.consume_key(Modifiers::COMMAND, Key::E),
                i.consume_key(Modifiers::COMMAND, Key::N),
                i.key_pressed(Key::Delete),
                i.key_pressed(Key::Escape),
            )
        });
        let typing = ctx.wants_keyboard_input();

        if open {
            self.handle_open_file();
        }
        if export {
            self.handle_export();
        }
        if new {
            self.new_canvas_size = Some(DEFAULT_CANVAS);
        }
        if escape {
            self.tools.cancel();
        }
        if self.tools.is_busy() {
            return;
        }
        if let Some(project) = self.projects.get_mut(self.active_project_index) {
            if redo {
                project.redo();
            } else if undo {
                project.undo();
            }
            if select_all && !typing {
                project.select_all();
            }
            if deselect {
                project.clear_selection();
            }
        }
        if delete && !typing {
            self.delete_selection();
        }

        if !typing {
            let picked = ctx.input(|i| {
                Tool::all()
                    .iter()
                    .copied()
                    .find(|t| i.modifiers.is_none() && i.key_pressed(t.shortcut()))
            });
            if let Some(tool) = picked {
                self.tools.set_tool(tool);
            }
        }
    }

    fn delete_selection(&mut self) {
        let Some(project) = self.active_project_mut() else { return };
        let result = project.delete_selection();
        self.report(result);
    }

    fn crop_to_selection(&mut self) {
        let Some(project) = self.active_project_mut() else { return };
        let result = project.crop_to_selection();
        if self.report(result).is_some() {
            self.canvas.fit_pending = true;
        }
    }

    fn resize_canvas(&mut self, width: u32, height: u32) {
        let Some(project) = self.active_project_mut() else { return };
        let result = project.resize_canvas(width, height);
        if self.report(result).is_some() {
            self.canvas.fit_pending = true;
            self.set_status(format!("Canvas resized to {width}x{height}"));
        }
    }

    // ------------------------------------------------------------------
    // Menus and panels
    // ------------------------------------------------------------------

    fn show_menu_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("New…").clicked() {
                        self.new_canvas_size = Some(DEFAULT_CANVAS);
                        ui.close_menu();
                    }
                    if ui.button("Open…").clicked() {
                        ui.close_menu();
                        self.handle_open_file();
                    }
                    if ui.button("Import as Layer…").clicked() {
                        ui.close_menu();
                        self.handle_import_layer();
                    }
                    if ui.button("Export…").clicked() {
                        ui.close_menu();
                        self.handle_export();
                    }
                    ui.separator();
                    if ui.button("Close Tab").clicked() {
                        ui.close_menu();
                        self.close_project(self.active_project_index, false);
                    }
                    if ui.button("Settings…").clicked() {
                        self.show_settings = true;
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.button("Quit").clicked() {
                        ui.ctx().send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });

                ui.menu_button("Edit", |ui| {
                    let busy = self.tools.is_busy();
                    let Some(project) = self.projects.get_mut(self.active_project_index) else { return };
                    let undo_text = project.history.undo_label().map_or("Undo".to_string(), |l| format!("Undo {l}"));
                    if ui.add_enabled(project.can_undo() && !busy, egui::Button::new(undo_text)).clicked() {
                        project.undo();
                        ui.close_menu();
                    }
                    let redo_text = project.history.redo_label().map_or("Redo".to_string(), |l| format!("Redo {l}"));
                    if ui.add_enabled(project.can_redo() && !busy, egui::Button::new(redo_text)).clicked() {
                        project.redo();
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.button("Select All").clicked() {
                        project.select_all();
                        ui.close_menu();
                    }
                    if ui.button("Deselect").clicked() {
                        project.clear_selection();
                        ui.close_menu();
                    }
                    let has_selection = !project.selection.is_empty();
                    if ui.add_enabled(has_selection, egui::Button::new("Delete Selection")).clicked() {
                        ui.close_menu();
                        self.delete_selection();
                        return;
                    }
                    if ui.add_enabled(has_selection, egui::Button::new("Crop to Selection")).clicked() {
                        ui.close_menu();
                        self.crop_to_selection();
                        return;
                    }
                    if ui.button("Canvas Size...").clicked() {
                        self.canvas_resize = Some((project.doc.width, project.doc.height));
                        ui.close_menu();
                    }
                });

                ui.menu_button("Layer", |ui| {
                    let Some(project) = self.projects.get_mut(self.active_project_index) else { return };
                    if ui.button("New Group").clicked() {
                        project.add_group("Group");
                        ui.close_menu();
                    }
                    let active = project.active_layer;
                    if ui.add_enabled(active.is_some(), egui::Button::new("Mask from Selection")).clicked() {
                        ui.close_menu();
                        if let Some(id) = active {
                            let result = project.mask_from_selection(id);
                            self.report(result);
                        }
                        return;
                    }
                    if ui.button("Flatten Image").clicked() {
                        project.flatten();
                        ui.close_menu();
                    }
                });

                ui.menu_button("View", |ui| {
                    if ui.button("Fit to Window").clicked() {
                        self.canvas.fit_pending = true;
                        ui.close_menu();
                    }
                    if ui.button("Actual Size").clicked() {
                        self.canvas.zoom = 1.0;
                        self.canvas.pan = Vec2::ZERO;
                        ui.close_menu();
                    }
                    if ui.checkbox(&mut self.settings.checkerboard, "Transparency Checkerboard").changed() {
                        self.settings.save();
                    }
                });
            });
        });
    }

    fn show_tabs(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("project_tabs").show(ctx, |ui| {
            ui.horizontal(|ui| {
                let mut switch_to = None;
                let mut close = None;
                for (i, project) in self.projects.iter().enumerate() {
                    if ui.selectable_label(i == self.active_project_index, project.display_title()).clicked() {
                        switch_to = Some(i);
                    }
                    if ui.small_button("x").on_hover_text("Close").clicked() {
                        close = Some(i);
                    }
                    ui.separator();
                }
                if let Some(i) = switch_to {
                    self.switch_to_project(i);
                }
                if let Some(i) = close {
                    self.close_project(i, false);
                }
            });
        });
    }

    fn show_status_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if self.pending_io_ops > 0 {
                    ui.spinner();
                }
                match &self.error {
                    Some(e) => {
                        ui.colored_label(ui.visuals().error_fg_color, e);
                    }
                    None => {
                        ui.label(&self.status);
                    }
                }
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label(format!("{:.0}%", self.canvas.zoom * 100.0));
                    if let Some(project) = self.active_project() {
                        ui.separator();
                        ui.label(format!("{} × {}", project.doc.width, project.doc.height));
                    }
                });
            });
        });
    }

    fn show_side_panels(&mut self, ctx: &egui::Context) {
        egui::SidePanel::left("tools_panel").resizable(false).default_width(190.0).show(ctx, |ui| {
            tools::tools_panel(ui, &mut self.tools);
        });

        let mut action = None;
        let mut ai_request = None;
        egui::SidePanel::right("right_panel").default_width(300.0).show(ctx, |ui| {
            egui::ScrollArea::vertical().id_source("right_panel_scroll").show(ui, |ui| {
                let Some(project) = self.projects.get_mut(self.active_project_index) else { return };
                action = self.layers_panel.show(ui, project);
                ui.separator();

                ui.heading("History");
                if let Some(index) = history_panel(ui, &project.history) {
                    project.jump_to_history(index);
                }
                ui.separator();

                let has_selection = !project.selection.is_empty();
                ai_request = self.ai_panel.show(ui, has_selection);
            });
        });

        if let Some(e) = self.layers_panel.take_error() {
            self.set_error(e);
        }
        if action == Some(LayerAppAction::ImportFromFile) {
            self.handle_import_layer();
        }
        if let Some(task) = ai_request {
            self.start_ai(task);
        }
    }

    fn show_dialogs(&mut self, ctx: &egui::Context) {
        if let Some((mut w, mut h)) = self.new_canvas_size {
            let mut open = true;
            let mut create = false;
            egui::Window::new("New Canvas").collapsible(false).resizable(false).open(&mut open).show(ctx, |ui| {
                egui::Grid::new("new_canvas_grid").show(ui, |ui| {
                    ui.label("Width");
                    ui.add(egui::DragValue::new(&mut w).clamp_range(1..=MAX_CANVAS_EDGE).suffix(" px"));
                    ui.end_row();
                    ui.label("Height");
                    ui.add(egui::DragValue::new(&mut h).clamp_range(1..=MAX_CANVAS_EDGE).suffix(" px"));
                    ui.end_row();
                });
                create = ui.button("Create").clicked();
            });
            self.new_canvas_size = if create || !open { None } else { Some((w, h)) };
            if create {
                self.new_project(w, h);
            }
        }

        if let Some((mut w, mut h)) = self.canvas_resize {
            let mut open = true;
            let mut apply = false;
            egui::Window::new("Canvas Size").collapsible(false).resizable(false).open(&mut open).show(ctx, |ui| {
                egui::Grid::new("canvas_size_grid").show(ui, |ui| {
                    ui.label("Width");
                    ui.add(egui::DragValue::new(&mut w).clamp_range(1..=MAX_CANVAS_EDGE).suffix(" px"));
                    ui.end_row();
                    ui.label("Height");
                    ui.add(egui::DragValue::new(&mut h).clamp_range(1..=MAX_CANVAS_EDGE).suffix(" px"));
                    ui.end_row();
                });
                ui.weak("Content stays centred.");
                apply = ui.button("Apply").clicked();
            });
            self.canvas_resize = if apply || !open { None } else { Some((w, h)) };
            if apply {
                self.resize_canvas(w, h);
            }
        }

        if let Some(index) = self.pending_close_index {
            let name = self.projects.get(index).map(|p| p.name.clone()).unwrap_or_default();
            let mut decision = None;
            egui::Window::new("Unsaved Changes").collapsible(false).resizable(false).show(ctx, |ui| {
                ui.label(format!("'{name}' has changes that were not exported. Close it anyway?"));
                ui.horizontal(|ui| {
                    if ui.button("Discard and Close").clicked() {
                        decision = Some(true);
                    }
                    if ui.button("Cancel").clicked() {
                        decision = Some(false);
                    }
                });
            });
            if let Some(discard) = decision {
                self.pending_close_index = None;
                if discard {
                    self.close_project(index, true);
                }
            }
        }

        if self.show_settings {
            let mut open = true;
            let mut apply = false;
            egui::Window::new("Settings").open(&mut open).show(ctx, |ui| {
                let s = &mut self.settings;
                egui::Grid::new("settings_grid").num_columns(2).show(ui, |ui| {
                    ui.label("Export format");
                    egui::ComboBox::from_id_source("settings_export_format")
                        .selected_text(s.default_export_format.label())
                        .show_ui(ui, |ui| {
                            for &f in ExportFormat::all() {
                                ui.selectable_value(&mut s.default_export_format, f, f.label());
                            }
                        });
                    ui.end_row();
                    ui.label("JPEG quality");
                    ui.add(egui::Slider::new(&mut s.jpeg_quality, 1..=100));
                    ui.end_row();
                    ui.label("Checkerboard");
                    ui.checkbox(&mut s.checkerboard, "");
                    ui.end_row();
                    ui.label("AI endpoint");
                    ui.text_edit_singleline(&mut s.ai_endpoint);
                    ui.end_row();
                    ui.label("Text model");
                    ui.text_edit_singleline(&mut s.ai_model);
                    ui.end_row();
                    ui.label("Image model");
                    ui.text_edit_singleline(&mut s.ai_image_model);
                    ui.end_row();
                    ui.label("Timeout (s)");
                    ui.add(egui::DragValue::new(&mut s.ai_timeout_secs).clamp_range(1..=600));
                    ui.end_row();
                });
                ui.weak("The API key is read from LUMINA_API_KEY or GEMINI_API_KEY.");
                apply = ui.button("Save").clicked();
            });
            if apply {
                self.settings.save();
                self.ai_panel.set_model(build_model(&self.settings));
                self.set_status("Settings saved");
            }
            self.show_settings = open && !apply;
        }
    }

    // ------------------------------------------------------------------
    // Canvas
    // ------------------------------------------------------------------

    fn show_canvas(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().frame(egui::Frame::canvas(&ctx.style())).show(ctx, |ui| {
            let (response, painter) = ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
            let viewport = response.rect;
            let Some(project) = self.projects.get_mut(self.active_project_index) else { return };
            let doc_size = (project.doc.width, project.doc.height);

            if self.canvas.fit_pending {
                self.canvas.fit(viewport, doc_size);
                self.canvas.fit_pending = false;
            }
            if let Some(hover) = response.hover_pos() {
                let zoom_delta = ui.input(|i| i.zoom_delta());
                if zoom_delta != 1.0 {
                    self.canvas.zoom_around(zoom_delta, hover, viewport);
                }
            }
            if response.dragged_by(egui::PointerButton::Middle) {
                self.canvas.pan += response.drag_delta();
            }

            // Composite; previews bypass the cached texture.
            let live = self.layers_panel.preview_document(&project.doc);
            let moved = self.tools.preview_document(live.as_ref().unwrap_or(&project.doc));
            let stroke = self.tools.preview_stroke().cloned();
            let previewing = live.is_some() || moved.is_some() || stroke.is_some();
            let key = (project.id, project.history.revision());
            if previewing || self.canvas.rendered != Some(key) || self.canvas.texture.is_none() {
                let doc = moved.as_ref().or(live.as_ref()).unwrap_or(&project.doc);
                let opts = RenderOptions { background: None, preview_stroke: stroke };
                let img = render_document(doc, &opts);
                let color = egui::ColorImage::from_rgba_unmultiplied([img.width() as usize, img.height() as usize], img.as_raw());
                match &mut self.canvas.texture {
                    Some(tex) => tex.set(color, egui::TextureOptions::NEAREST),
                    None => self.canvas.texture = Some(ctx.load_texture("canvas", color, egui::TextureOptions::NEAREST)),
                }
                self.canvas.rendered = if previewing { None } else { Some(key) };
            }

            let image_rect = self.canvas.image_rect(viewport, doc_size);
            let zoom = self.canvas.zoom;
            if self.settings.checkerboard {
                paint_checkerboard(&painter, image_rect);
            } else {
                painter.rect_filled(image_rect, 0.0, Color32::WHITE);
            }
            if let Some(tex) = &self.canvas.texture {
                let uv = Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0));
                painter.image(tex.id(), image_rect, uv, Color32::WHITE);
            }
            painter.rect_stroke(image_rect, 0.0, Stroke::new(1.0, Color32::from_gray(90)));

            // Tool input on the primary button.
            let (pressed, down, released, pointer) = ui.input(|i| {
                (i.pointer.primary_pressed(), i.pointer.primary_down(), i.pointer.primary_released(), i.pointer.interact_pos())
            });
            let mut tool_error = None;
            if let Some(p) = pointer {
                let pos = to_doc(image_rect, zoom, p);
                let result = if pressed && response.hovered() {
                    self.canvas.gesture_active = true;
                    self.tools.pointer_down(pos, project)
                } else if self.canvas.gesture_active && released {
                    self.canvas.gesture_active = false;
                    self.tools.pointer_up(pos, project)
                } else if self.canvas.gesture_active && down {
                    self.tools.pointer_move(pos, project)
                } else {
                    Ok(())
                };
                if let Err(e) = result {
                    self.tools.cancel();
                    self.canvas.gesture_active = false;
                    tool_error = Some(e.to_string());
                }
            }

            // Overlays.
            if let Some(layer) = project.active()
                && !layer.is_group()
            {
                let corners: Vec<Pos2> =
                    layer.transform.corners().iter().map(|&c| to_screen(image_rect, zoom, c)).collect();
                painter.add(egui::Shape::closed_line(corners, Stroke::new(1.0, Color32::from_rgb(80, 160, 255))));
            }
            let ants = Stroke::new(1.0, Color32::from_gray(20));
            for (shape, _) in project.selection.parts() {
                let mut points: Vec<Pos2> = shape.to_polygon().into_iter().map(|p| to_screen(image_rect, zoom, p)).collect();
                if let Some(&first) = points.first() {
                    points.push(first);
                }
                painter.extend(egui::Shape::dashed_line(&points, ants, 4.0, 4.0));
            }
            match self.tools.preview() {
                Some(ToolPreview::Marquee(shape)) => {
                    let points: Vec<Pos2> = shape.to_polygon().into_iter().map(|p| to_screen(image_rect, zoom, p)).collect();
                    painter.add(egui::Shape::closed_line(points, Stroke::new(1.0, Color32::from_rgb(0, 120, 215))));
                }
                Some(ToolPreview::Lasso(points)) => {
                    let points: Vec<Pos2> = points.iter().map(|&p| to_screen(image_rect, zoom, p)).collect();
                    painter.add(egui::Shape::line(points, Stroke::new(1.0, Color32::from_rgb(0, 120, 215))));
                }
                _ => {}
            }
            if matches!(self.tools.tool(), Tool::Brush | Tool::Eraser)
                && let Some(hover) = response.hover_pos()
            {
                let radius = (self.tools.state.brush_size * zoom / 2.0).max(1.0);
                painter.circle_stroke(hover, radius, Stroke::new(1.0, Color32::from_gray(128)));
            }

            if let Some(e) = tool_error {
                self.set_error(e);
            }
        });
    }
}

impl eframe::App for LuminaApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some(project) = self.active_project() {
            let title = format!("Lumina - {}", project.display_title());
            ctx.send_viewport_cmd(egui::ViewportCommand::Title(title));
        }

        // Files dropped onto the window open as new tabs.
        let dropped: Vec<PathBuf> = ctx.input(|i| i.raw.dropped_files.iter().filter_map(|f| f.path.clone()).collect());
        for path in dropped {
            self.open_file_by_path(path);
        }

        self.poll_io();
        self.poll_ai();
        if self.pending_io_ops > 0 || self.ai_panel.is_busy() {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }

        self.handle_shortcuts(ctx);
        self.show_menu_bar(ctx);
        self.show_tabs(ctx);
        self.show_status_bar(ctx);
        self.show_side_panels(ctx);
        self.show_dialogs(ctx);
        self.show_canvas(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn viewport() -> Rect {
        Rect::from_min_size(Pos2::ZERO, Vec2::new(800.0, 600.0))
    }

    #[test]
    fn screen_and_document_coordinates_agree() {
        let view = CanvasView { zoom: 2.0, ..CanvasView::new() };
        let rect = view.image_rect(viewport(), (100, 50));
        assert_relative_eq!(rect.width(), 200.0);
        let (x, y) = to_doc(rect, view.zoom, to_screen(rect, view.zoom, (12.5, 40.0)));
        assert_relative_eq!(x, 12.5);
        assert_relative_eq!(y, 40.0);
    }

    #[test]
    fn fit_never_enlarges_small_documents() {
        let mut view = CanvasView::new();
        view.fit(viewport(), (100, 100));
        assert_relative_eq!(view.zoom, 1.0);
        view.fit(viewport(), (4000, 1000));
        assert!(view.zoom < 0.2);
    }

    #[test]
    fn zoom_keeps_anchor_fixed() {
        let mut view = CanvasView::new();
        let anchor = Pos2::new(500.0, 200.0);
        let before = to_doc(view.image_rect(viewport(), (300, 300)), view.zoom, anchor);
        view.zoom_around(2.0, anchor, viewport());
        let after = to_doc(view.image_rect(viewport(), (300, 300)), view.zoom, anchor);
        assert_relative_eq!(before.0, after.0, epsilon = 1e-3);
        assert_relative_eq!(before.1, after.1, epsilon = 1e-3);
    }
}
