use eframe::egui;

use crate::canvas::{Document, LayerId};
use crate::error::EditorResult;
use crate::ops::brush::BrushStroke;
use crate::ops::selection::{SelectionMode, SelectionShape};
use crate::ops::text::{TextAlignment, TextContent};
use crate::project::Project;

/// Lasso points closer than this to the previous one are skipped.
const LASSO_MIN_STEP: f32 = 2.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tool {
    Move,
    #[default]
    Brush,
    Eraser,
    Text,
    RectSelect,
    EllipseSelect,
    Lasso,
    Eyedropper,
}

impl Tool {
    pub fn all() -> &'static [Tool] {
        &[
            Tool::Move,
            Tool::Brush,
            Tool::Eraser,
            Tool::Text,
            Tool::RectSelect,
            Tool::EllipseSelect,
            Tool::Lasso,
            Tool::Eyedropper,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tool::Move => "Move",
            Tool::Brush => "Brush",
            Tool::Eraser => "Eraser",
            Tool::Text => "Text",
            Tool::RectSelect => "Rectangle Select",
            Tool::EllipseSelect => "Ellipse Select",
            Tool::Lasso => "Lasso",
            Tool::Eyedropper => "Eyedropper",
        }
    }

    pub fn shortcut(&self) -> egui::Key {
        match self {
            Tool::Move => egui::Key::V,
            Tool::Brush => egui::Key::B,
            Tool::Eraser => egui::Key::E,
            Tool::Text => egui::Key::T,
            Tool::RectSelect => egui::Key::M,
            Tool::EllipseSelect => egui::Key::O,
            Tool::Lasso => egui::Key::L,
            Tool::Eyedropper => egui::Key::I,
        }
    }

    pub fn is_selection(&self) -> bool {
        matches!(self, Tool::RectSelect | Tool::EllipseSelect | Tool::Lasso)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolState {
    pub tool: Tool,
    pub brush_color: [u8; 4],
    /// Diameter in pixels.
    pub brush_size: f32,
    pub brush_opacity: f32,
    pub text: TextContent,
    pub selection_mode: SelectionMode,
}

impl Default for ToolState {
    fn default() -> Self {
        Self {
            tool: Tool::default(),
            brush_color: [0, 0, 0, 255],
            brush_size: 12.0,
            brush_opacity: 1.0,
            text: TextContent::default(),
            selection_mode: SelectionMode::Replace,
        }
    }
}

// ============================================================================
// POINTER STATE MACHINE
// ============================================================================

#[derive(Clone, Debug, Default)]
enum Interaction {
    #[default]
    Idle,
    Moving {
        layer: LayerId,
        last: (f32, f32),
        offset: (f32, f32),
    },
    Painting(BrushStroke),
    Marquee {
        start: (f32, f32),
        current: (f32, f32),
    },
    Lasso(Vec<(f32, f32)>),
}

/// What the canvas should draw for an interaction in progress.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolPreview<'a> {
    Stroke(&'a BrushStroke),
    Marquee(SelectionShape),
    Lasso(&'a [(f32, f32)]),
    Move { layer: LayerId, dx: f32, dy: f32 },
}

/// Turns pointer events in document coordinates into project edits. Each
/// gesture commits at most one history entry, on release.
#[derive(Clone, Debug, Default)]
pub struct ToolController {
    pub state: ToolState,
    interaction: Interaction,
}

impl ToolController {
    pub fn new(state: ToolState) -> Self {
        Self { state, interaction: Interaction::Idle }
    }

    pub fn tool(&self) -> Tool {
        self.state.tool
    }

    /// Switching tools abandons any gesture in progress.
    pub fn set_tool(&mut self, tool: Tool) {
        if self.state.tool != tool {
            self.cancel();
            self.state.tool = tool;
        }
    }

    pub fn cancel(&mut self) {
        self.interaction = Interaction::Idle;
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self.interaction, Interaction::Idle)
    }

    pub fn pointer_down(&mut self, pos: (f32, f32), project: &mut Project) -> EditorResult<()> {
        self.interaction = Interaction::Idle;
        match self.state.tool {
            Tool::Move => {
                if let Some(layer) = project.active_layer {
                    self.interaction = Interaction::Moving { layer, last: pos, offset: (0.0, 0.0) };
                }
            }
            Tool::Brush | Tool::Eraser => {
                let mut stroke = BrushStroke::new(
                    self.state.brush_color,
                    self.state.brush_size,
                    self.state.brush_opacity,
                    self.state.tool == Tool::Eraser,
                );
                stroke.push_point(pos.0, pos.1);
                self.interaction = Interaction::Painting(stroke);
            }
            Tool::RectSelect | Tool::EllipseSelect => {
                self.interaction = Interaction::Marquee { start: pos, current: pos };
            }
            Tool::Lasso => self.interaction = Interaction::Lasso(vec![pos]),
            Tool::Text => {
                project.add_text_layer(self.state.text.clone(), pos);
            }
            Tool::Eyedropper => {
                if let Some(color) = project.sample_color(pos.0, pos.1) {
                    self.state.brush_color = color;
                }
            }
        }
        Ok(())
    }

    pub fn pointer_move(&mut self, pos: (f32, f32), _project: &mut Project) -> EditorResult<()> {
        match &mut self.interaction {
            Interaction::Idle => {}
            Interaction::Moving { last, offset, .. } => {
                offset.0 += pos.0 - last.0;
                offset.1 += pos.1 - last.1;
                *last = pos;
            }
            Interaction::Painting(stroke) => {
                stroke.push_point(pos.0, pos.1);
            }
            Interaction::Marquee { current, .. } => *current = pos,
            Interaction::Lasso(points) => {
                let far_enough = points.last().is_none_or(|&(lx, ly)| {
                    let (dx, dy) = (pos.0 - lx, pos.1 - ly);
                    dx * dx + dy * dy >= LASSO_MIN_STEP * LASSO_MIN_STEP
                });
                if far_enough {
                    points.push(pos);
                }
            }
        }
        Ok(())
    }

    pub fn pointer_up(&mut self, pos: (f32, f32), project: &mut Project) -> EditorResult<()> {
        self.pointer_move(pos, project)?;
        let mode = self.state.selection_mode;
        match std::mem::take(&mut self.interaction) {
            Interaction::Idle => {}
            Interaction::Moving { layer, offset, .. } => {
                project.translate_layer(layer, offset.0, offset.1)?;
            }
            Interaction::Painting(stroke) => {
                project.add_stroke_layer(stroke)?;
            }
            Interaction::Marquee { start, current } => {
                let shape = if self.state.tool == Tool::EllipseSelect {
                    SelectionShape::ellipse_from_corners(start, current)
                } else {
                    SelectionShape::rect_from_corners(start, current)
                };
                if !shape.is_degenerate() {
                    project.select(shape, mode);
                } else if mode == SelectionMode::Replace {
                    project.clear_selection();
                }
            }
            Interaction::Lasso(points) => {
                project.select(SelectionShape::Lasso(points), mode);
            }
        }
        Ok(())
    }

    pub fn preview(&self) -> Option<ToolPreview<'_>> {
        match &self.interaction {
            Interaction::Idle => None,
            Interaction::Moving { layer, offset, .. } => {
                Some(ToolPreview::Move { layer: *layer, dx: offset.0, dy: offset.1 })
            }
            Interaction::Painting(stroke) => Some(ToolPreview::Stroke(stroke)),
            Interaction::Marquee { start, current } => Some(ToolPreview::Marquee(
                if self.state.tool == Tool::EllipseSelect {
                    SelectionShape::ellipse_from_corners(*start, *current)
                } else {
                    SelectionShape::rect_from_corners(*start, *current)
                },
            )),
            Interaction::Lasso(points) => Some(ToolPreview::Lasso(points)),
        }
    }

    /// In-progress stroke in document coordinates.
    pub fn preview_stroke(&self) -> Option<&BrushStroke> {
        match &self.interaction {
            Interaction::Painting(stroke) => Some(stroke),
            _ => None,
        }
    }

    /// A copy of `doc` with an in-progress move applied, for live display.
    pub fn preview_document(&self, doc: &Document) -> Option<Document> {
        let Interaction::Moving { layer, offset: (dx, dy), .. } = self.interaction else {
            return None;
        };
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        let mut moved = doc.descendants_of(layer);
        moved.push(layer);
        let mut preview = doc.clone();
        for l in preview.layers.iter_mut().filter(|l| moved.contains(&l.id)) {
            l.transform.x += dx;
            l.transform.y += dy;
            if let Some(mask) = &l.mask {
                l.mask = Some(mask.translated(dx, dy));
            }
        }
        Some(preview)
    }
}

// ============================================================================
// TOOLS PANEL
// ============================================================================

/// Tool buttons plus the options of the current tool.
pub fn tools_panel(ui: &mut egui::Ui, tools: &mut ToolController) {
    ui.heading("Tools");
    ui.horizontal_wrapped(|ui| {
        for &tool in Tool::all() {
            let selected = tools.tool() == tool;
            let hint = format!("{} ({:?})", tool.label(), tool.shortcut());
            if ui.selectable_label(selected, tool.label()).on_hover_text(hint).clicked() {
                tools.set_tool(tool);
            }
        }
    });
    ui.separator();

    let state = &mut tools.state;
    match state.tool {
        Tool::Brush | Tool::Eraser | Tool::Eyedropper => {
            if state.tool != Tool::Eraser {
                ui.horizontal(|ui| {
                    ui.label("Color");
                    ui.color_edit_button_srgba_unmultiplied(&mut state.brush_color);
                });
            }
            ui.add(egui::Slider::new(&mut state.brush_size, 1.0..=200.0).text("Size").logarithmic(true));
            ui.add(egui::Slider::new(&mut state.brush_opacity, 0.0..=1.0).text("Opacity"));
        }
        Tool::Text => {
            let text = &mut state.text;
            ui.label("Text");
            ui.text_edit_multiline(&mut text.text);
            ui.horizontal(|ui| {
                ui.label("Font");
                ui.text_edit_singleline(&mut text.font_family);
            });
            ui.add(egui::Slider::new(&mut text.font_size, 6.0..=400.0).text("Size"));
            ui.horizontal(|ui| {
                ui.color_edit_button_srgba_unmultiplied(&mut text.color);
                ui.checkbox(&mut text.bold, "Bold");
                ui.checkbox(&mut text.italic, "Italic");
            });
            egui::ComboBox::from_id_source("text_align")
                .selected_text(text.align.label())
                .show_ui(ui, |ui| {
                    for &align in TextAlignment::all() {
                        ui.selectable_value(&mut text.align, align, align.label());
                    }
                });
            ui.weak("Click the canvas to place text.");
        }
        Tool::RectSelect | Tool::EllipseSelect | Tool::Lasso => {
            let current = state.selection_mode;
            egui::ComboBox::from_id_source("selection_mode")
                .selected_text(current.label())
                .show_ui(ui, |ui| {
                    for &mode in SelectionMode::all() {
                        ui.selectable_value(&mut state.selection_mode, mode, mode.label());
                    }
                });
        }
        Tool::Move => {
            ui.weak("Drag to move the active layer.");
        }
    }
}
