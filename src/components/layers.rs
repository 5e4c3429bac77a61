use eframe::egui;

use crate::canvas::{BlendMode, Document, LayerId, LayerKind};
use crate::error::EditorResult;
use crate::ops::filters::FilterSettings;
use crate::project::Project;

/// Actions that need app-level handling (file dialogs and the like).
#[derive(Debug, Clone, PartialEq)]
pub enum LayerAppAction {
    ImportFromFile,
}

/// Slider edit in progress; applied to a preview document until released.
#[derive(Clone, Debug, PartialEq)]
struct LiveEdit {
    layer: LayerId,
    opacity: f32,
    filters: FilterSettings,
}

/// State for inline rename
#[derive(Default)]
struct RenameState {
    layer: Option<LayerId>,
    text: String,
    focus_requested: bool,
}

#[derive(Default)]
pub struct LayersPanel {
    rename: RenameState,
    live: Option<LiveEdit>,
    /// Text being edited for the active text layer.
    text_buffer: Option<(LayerId, String)>,
    last_error: Option<String>,
}

impl LayersPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Error from the last panel action, if any. Cleared on read.
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    fn report(&mut self, result: EditorResult<impl Sized>) {
        if let Err(e) = result {
            tracing::warn!(error = %e, "layer action failed");
            self.last_error = Some(e.to_string());
        }
    }

    /// A copy of `doc` with the slider edit in progress applied.
    pub fn preview_document(&self, doc: &Document) -> Option<Document> {
        let live = self.live.as_ref()?;
        let mut preview = doc.clone();
        let layer = preview.layer_mut(live.layer)?;
        layer.set_opacity(live.opacity);
        layer.filters = live.filters.clamped();
        Some(preview)
    }

    pub fn show(&mut self, ui: &mut egui::Ui, project: &mut Project) -> Option<LayerAppAction> {
        ui.heading("Layers");
        let action = self.show_toolbar(ui, project);
        ui.separator();

        egui::ScrollArea::vertical().id_source("layer_list").max_height(220.0).show(ui, |ui| {
            let top: Vec<LayerId> = project.doc.top_level().map(|l| l.id).collect();
            for id in top.into_iter().rev() {
                self.show_layer_row(ui, project, id, 0);
            }
        });
        ui.separator();

        if let Some(id) = project.active_layer {
            self.show_properties(ui, project, id);
        }
        action
    }

    fn show_toolbar(&mut self, ui: &mut egui::Ui, project: &mut Project) -> Option<LayerAppAction> {
        let mut action = None;
        let active = project.active_layer;
        ui.horizontal_wrapped(|ui| {
            if ui.button("Import…").clicked() {
                action = Some(LayerAppAction::ImportFromFile);
            }
            if ui.button("Group").on_hover_text("New empty group").clicked() {
                project.add_group("Group");
            }
            ui.add_enabled_ui(active.is_some(), |ui| {
                let Some(id) = active else { return };
                if ui.button("Duplicate").clicked() {
                    let r = project.duplicate_layer(id);
                    self.report(r);
                }
                if ui.button("Delete").clicked() {
                    let r = project.delete_layer(id);
                    self.report(r);
                }
                if ui.button("Merge Down").clicked() {
                    let r = project.merge_down(id);
                    self.report(r);
                }
                if ui.button("Up").on_hover_text("Raise").clicked() {
                    let r = project.raise_layer(id);
                    self.report(r);
                }
                if ui.button("Down").on_hover_text("Lower").clicked() {
                    let r = project.lower_layer(id);
                    self.report(r);
                }
            });
            if ui.button("Flatten").clicked() {
                project.flatten();
            }
        });
        action
    }

    fn show_layer_row(&mut self, ui: &mut egui::Ui, project: &mut Project, id: LayerId, depth: usize) {
        let Some(layer) = project.doc.layer(id) else { return };
        let (name, visible, is_group, kind) = (layer.name.clone(), layer.visible, layer.is_group(), layer.kind.label());
        let has_mask = layer.mask.is_some();
        let selected = project.active_layer == Some(id);

        ui.horizontal(|ui| {
            ui.add_space(depth as f32 * 14.0);
            let mut vis = visible;
            if ui.checkbox(&mut vis, "").on_hover_text("Visible").changed() {
                let r = project.set_visibility(id, vis);
                self.report(r);
            }

            if self.rename.layer == Some(id) {
                let resp = ui.text_edit_singleline(&mut self.rename.text);
                if self.rename.focus_requested {
                    resp.request_focus();
                    self.rename.focus_requested = false;
                }
                if resp.lost_focus() {
                    let text = std::mem::take(&mut self.rename.text);
                    self.rename.layer = None;
                    if !ui.input(|i| i.key_pressed(egui::Key::Escape)) {
                        let r = project.rename_layer(id, &text);
                        self.report(r);
                    }
                }
            } else {
                let label = if has_mask { format!("{name} [mask]") } else { name.clone() };
                let resp = ui.selectable_label(selected, label).on_hover_text(kind);
                if resp.clicked() {
                    let r = project.set_active(id);
                    self.report(r);
                }
                if resp.double_clicked() {
                    self.rename = RenameState { layer: Some(id), text: name, focus_requested: true };
                }
            }
        });

        if is_group {
            let children: Vec<LayerId> = project.doc.children_of(id).map(|l| l.id).collect();
            for child in children.into_iter().rev() {
                if child != id && depth < project.doc.layers.len() {
                    self.show_layer_row(ui, project, child, depth + 1);
                }
            }
        }
    }

    fn show_properties(&mut self, ui: &mut egui::Ui, project: &mut Project, id: LayerId) {
        let Some(layer) = project.doc.layer(id) else { return };
        let committed = LiveEdit { layer: id, opacity: layer.opacity, filters: layer.filters };
        let blend = layer.blend_mode;
        let parent = layer.parent;
        let has_mask = layer.mask.is_some();
        let is_group = layer.is_group();
        let text = match &layer.kind {
            LayerKind::Text(content) => Some(content.clone()),
            _ => None,
        };

        let mut live = match &self.live {
            Some(l) if l.layer == id => l.clone(),
            _ => committed.clone(),
        };
        let mut commit = false;

        egui::ScrollArea::vertical().id_source("layer_props").show(ui, |ui| {
            // -- Opacity / blend ------------------------------------------
            let resp = ui.add(egui::Slider::new(&mut live.opacity, 0.0..=1.0).text("Opacity"));
            commit |= slider_committed(&resp);

            let mut mode = blend;
            egui::ComboBox::from_id_source("layer_blend")
                .selected_text(mode.name())
                .show_ui(ui, |ui| {
                    for &m in BlendMode::all() {
                        ui.selectable_value(&mut mode, m, m.name());
                    }
                });
            if mode != blend {
                let r = project.set_blend_mode(id, mode);
                self.report(r);
            }

            // -- Group membership -----------------------------------------
            let groups: Vec<(LayerId, String)> = project
                .doc
                .layers
                .iter()
                .filter(|g| g.is_group() && g.id != id && !project.doc.is_ancestor(id, g.id))
                .map(|g| (g.id, g.name.clone()))
                .collect();
            let current = parent
                .and_then(|p| groups.iter().find(|(g, _)| *g == p))
                .map_or("(none)".to_string(), |(_, n)| n.clone());
            let mut chosen = parent;
            egui::ComboBox::from_id_source("layer_parent").selected_text(current).show_ui(ui, |ui| {
                ui.selectable_value(&mut chosen, None, "(none)");
                for (gid, gname) in &groups {
                    ui.selectable_value(&mut chosen, Some(*gid), gname);
                }
            });
            if chosen != parent {
                let r = project.set_parent(id, chosen);
                self.report(r);
            }

            // -- Mask ------------------------------------------------------
            ui.horizontal(|ui| {
                ui.label("Mask");
                if ui.button("From Selection").clicked() {
                    let r = project.mask_from_selection(id);
                    self.report(r);
                }
                ui.add_enabled_ui(has_mask, |ui| {
                    if ui.button("Invert").clicked() {
                        let r = project.invert_mask(id);
                        self.report(r);
                    }
                    if ui.button("Clear").clicked() {
                        let r = project.clear_mask(id);
                        self.report(r);
                    }
                });
            });

            // -- Transform -------------------------------------------------
            if !is_group {
                ui.horizontal(|ui| {
                    if ui.button("Rotate -90°").clicked() {
                        let r = project.rotate_layer(id, -90.0);
                        self.report(r);
                    }
                    if ui.button("Rotate 90°").clicked() {
                        let r = project.rotate_layer(id, 90.0);
                        self.report(r);
                    }
                    if ui.button("Flip H").clicked() {
                        let r = project.flip_layer_horizontal(id);
                        self.report(r);
                    }
                    if ui.button("Flip V").clicked() {
                        let r = project.flip_layer_vertical(id);
                        self.report(r);
                    }
                    if ui.button("−").on_hover_text("Scale 90%").clicked() {
                        let r = project.scale_layer(id, 0.9);
                        self.report(r);
                    }
                    if ui.button("+").on_hover_text("Scale 110%").clicked() {
                        let r = project.scale_layer(id, 1.1);
                        self.report(r);
                    }
                });
            }

            // -- Text ------------------------------------------------------
            if let Some(content) = text {
                if self.text_buffer.as_ref().is_none_or(|(layer, _)| *layer != id) {
                    self.text_buffer = Some((id, content.text.clone()));
                }
                let Some((_, buffer)) = &mut self.text_buffer else { return };
                ui.label("Text");
                let resp = ui.text_edit_multiline(buffer);
                if resp.lost_focus() && *buffer != content.text {
                    let updated = crate::ops::text::TextContent { text: buffer.clone(), ..content };
                    let r = project.set_text(id, updated);
                    self.report(r);
                }
            }

            // -- Filters ---------------------------------------------------
            ui.separator();
            ui.horizontal(|ui| {
                ui.strong("Filters");
                if ui.small_button("Reset").clicked() {
                    let r = project.reset_filters(id);
                    self.report(r);
                    live = LiveEdit { filters: FilterSettings::default(), ..live.clone() };
                }
            });
            commit |= filter_sliders(ui, &mut live.filters);
        });

        if commit {
            self.live = None;
            if live.opacity != committed.opacity {
                let r = project.set_opacity(id, live.opacity);
                self.report(r);
            }
            if live.filters != committed.filters {
                let r = project.set_filters(id, live.filters);
                self.report(r);
            }
        } else if live != committed {
            self.live = Some(live);
        } else {
            self.live = None;
        }
    }
}

/// A slider edit is final when the drag ends, or on a click or keyboard change.
fn slider_committed(resp: &egui::Response) -> bool {
    resp.drag_released() || (resp.changed() && !resp.dragged())
}

/// Returns true when a slider edit should be committed.
fn filter_sliders(ui: &mut egui::Ui, f: &mut FilterSettings) -> bool {
    let mut commit = false;
    let mut row = |ui: &mut egui::Ui, value: &mut f32, range: std::ops::RangeInclusive<f32>, label: &str| {
        let resp = ui.add(egui::Slider::new(value, range).text(label));
        commit |= slider_committed(&resp);
    };
    row(ui, &mut f.brightness, 0.0..=200.0, "Brightness");
    row(ui, &mut f.contrast, 0.0..=200.0, "Contrast");
    row(ui, &mut f.saturation, 0.0..=200.0, "Saturation");
    row(ui, &mut f.grayscale, 0.0..=100.0, "Grayscale");
    row(ui, &mut f.sepia, 0.0..=100.0, "Sepia");
    row(ui, &mut f.hue_rotate, -180.0..=180.0, "Hue");
    row(ui, &mut f.blur, 0.0..=20.0, "Blur");
    row(ui, &mut f.temperature, -100.0..=100.0, "Temperature");
    row(ui, &mut f.tint, -100.0..=100.0, "Tint");
    row(ui, &mut f.exposure, -100.0..=100.0, "Exposure");
    row(ui, &mut f.vignette, 0.0..=100.0, "Vignette");
    row(ui, &mut f.grain, 0.0..=100.0, "Grain");
    commit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_applies_live_edit_without_touching_document() {
        let p = Project::new_untitled(1, 8, 8);
        let id = p.doc.layers[0].id;
        let mut panel = LayersPanel::new();
        assert!(panel.preview_document(&p.doc).is_none());
        panel.live = Some(LiveEdit {
            layer: id,
            opacity: 0.25,
            filters: FilterSettings { sepia: 50.0, ..FilterSettings::default() },
        });
        let preview = panel.preview_document(&p.doc).unwrap();
        assert_eq!(preview.layers[0].opacity, 0.25);
        assert_eq!(preview.layers[0].filters.sepia, 50.0);
        assert_eq!(p.doc.layers[0].opacity, 1.0);
    }

    #[test]
    fn errors_are_kept_until_read() {
        let mut p = Project::new_untitled(1, 8, 8);
        let mut panel = LayersPanel::new();
        let missing = uuid::Uuid::new_v4();
        let r = p.delete_layer(missing);
        panel.report(r);
        assert!(panel.take_error().is_some_and(|e| e.starts_with("layer not found")));
        assert!(panel.take_error().is_none());
    }
}
