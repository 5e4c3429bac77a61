use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use uuid::Uuid;

use crate::canvas::{BlendMode, Document, Layer, LayerId, LayerKind, MaskPolygon, Transform};
use crate::components::history::{DocumentSnapshot, History};
use crate::error::{EditorError, EditorResult};
use crate::io::{self, ExportFormat};
use crate::ops::brush::{self, BrushStroke};
use crate::ops::filters::FilterSettings;
use crate::ops::selection::{Selection, SelectionMode, SelectionShape};
use crate::ops::text::{self, TextContent};
use crate::ops::transform::{self, resize_to};
use crate::render::{self, RenderOptions};

/// Single open document with its undo history and selection.
pub struct Project {
    pub id: Uuid,
    pub doc: Document,
    pub history: History,
    pub selection: Selection,
    pub active_layer: Option<LayerId>,
    /// `None` for untitled documents.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    /// Display name (file stem or "Untitled-X")
    pub name: String,
}

impl Project {
    fn with_document(doc: Document, name: String, path: Option<PathBuf>) -> Self {
        let active_layer = doc.layers.last().map(|l| l.id);
        let history = History::new(DocumentSnapshot::capture(&doc));
        Self {
            id: Uuid::new_v4(),
            doc,
            history,
            selection: Selection::new(),
            active_layer,
            path,
            is_dirty: false,
            name,
        }
    }

    pub fn new_untitled(untitled_counter: usize, width: u32, height: u32) -> Self {
        Self::with_document(Document::new(width, height), format!("Untitled-{untitled_counter}"), None)
    }

    /// Canvas sized to the image, which becomes the only layer.
    pub fn from_image(img: RgbaImage, name: impl Into<String>) -> Self {
        let mut doc = Document::empty(img.width(), img.height());
        doc.layers.push(Layer::image("Background", img));
        Self::with_document(doc, name.into(), None)
    }

    pub fn open(path: &Path) -> EditorResult<Self> {
        let img = io::load_image(path)?;
        let mut project = Self::from_image(img, io::display_name(path));
        project.path = Some(path.to_path_buf());
        Ok(project)
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    /// Name with a dirty indicator.
    pub fn display_title(&self) -> String {
        if self.is_dirty { format!("{}*", self.name) } else { self.name.clone() }
    }

    // ========================================================================
    // INTERNAL HELPERS
    // ========================================================================

    fn commit(&mut self, label: &str) {
        self.history.commit(DocumentSnapshot::capture(&self.doc), label);
        self.is_dirty = true;
        tracing::debug!(action = label, layers = self.doc.layers.len(), "edit committed");
    }

    fn layer(&self, id: LayerId) -> EditorResult<&Layer> {
        self.doc.layer(id).ok_or(EditorError::LayerNotFound(id))
    }

    fn layer_mut(&mut self, id: LayerId) -> EditorResult<&mut Layer> {
        self.doc.layer_mut(id).ok_or(EditorError::LayerNotFound(id))
    }

    fn index(&self, id: LayerId) -> EditorResult<usize> {
        self.doc.index_of(id).ok_or(EditorError::LayerNotFound(id))
    }

    /// Inserts directly above the active layer, inside its group (or inside
    /// the active group itself). Without an active layer the layer goes on top.
    fn insert_layer(&mut self, mut layer: Layer) -> LayerId {
        let target = self.active_layer.and_then(|id| self.doc.layer(id).map(|l| (id, l.is_group(), l.parent)));
        let index = match target {
            Some((active, is_group, parent)) => {
                layer.parent = if is_group { Some(active) } else { parent };
                self.doc.index_of(active).map_or(self.doc.layers.len(), |i| i + 1)
            }
            None => self.doc.layers.len(),
        };
        let id = layer.id;
        self.doc.layers.insert(index, layer);
        self.active_layer = Some(id);
        id
    }

    /// Re-points the active layer after the layer array changed underneath it.
    fn repair_active(&mut self) {
        let valid = self.active_layer.is_some_and(|id| self.doc.layer(id).is_some());
        if !valid {
            self.active_layer = self.doc.layers.last().map(|l| l.id);
        }
    }

    fn restore(&mut self, snapshot: DocumentSnapshot) {
        self.doc = snapshot.to_document();
        self.repair_active();
        self.is_dirty = true;
    }

    pub fn set_active(&mut self, id: LayerId) -> EditorResult<()> {
        self.layer(id)?;
        self.active_layer = Some(id);
        Ok(())
    }

    pub fn active(&self) -> Option<&Layer> {
        self.active_layer.and_then(|id| self.doc.layer(id))
    }

    // ========================================================================
    // LAYER CREATION
    // ========================================================================

    /// Adds an image scaled down to fit the canvas and centred on it.
    pub fn add_image_layer(&mut self, img: RgbaImage, name: impl Into<String>) -> LayerId {
        let mut layer = Layer::image(name, img);
        if let LayerKind::Image { pixels } = &layer.kind {
            layer.transform = transform::fit_into(self.doc.width, self.doc.height, pixels.width(), pixels.height());
        }
        let id = self.insert_layer(layer);
        self.commit("Add Image");
        id
    }

    pub fn add_text_layer(&mut self, content: TextContent, pos: (f32, f32)) -> LayerId {
        let id = self.insert_layer(Layer::text(content, pos.0, pos.1));
        self.commit("Add Text");
        id
    }

    /// Commits a stroke whose points are in document space. The layer box is
    /// the stroke's padded bounds.
    pub fn add_stroke_layer(&mut self, mut stroke: BrushStroke) -> EditorResult<LayerId> {
        let (box_transform, local) = brush::normalize_stroke(&stroke.points, stroke.size)
            .ok_or_else(|| EditorError::invalid("stroke has no points"))?;
        stroke.points = local;
        stroke.extent = (box_transform.width, box_transform.height);
        let (name, label) = if stroke.erase { ("Eraser", "Erase") } else { ("Brush", "Brush Stroke") };
        let id = self.insert_layer(Layer::stroke(name, stroke, box_transform));
        self.commit(label);
        Ok(id)
    }

    pub fn add_group(&mut self, name: impl Into<String>) -> LayerId {
        let id = self.insert_layer(Layer::group(name));
        self.commit("Add Group");
        id
    }

    // ========================================================================
    // LAYER STRUCTURE
    // ========================================================================

    /// Removes a layer; groups take their descendants with them.
    pub fn delete_layer(&mut self, id: LayerId) -> EditorResult<()> {
        let index = self.index(id)?;
        let mut doomed = self.doc.descendants_of(id);
        doomed.push(id);
        self.doc.layers.retain(|l| !doomed.contains(&l.id));
        if self.active_layer.is_some_and(|a| doomed.contains(&a)) {
            let below = index.min(self.doc.layers.len()).checked_sub(1);
            self.active_layer = below.and_then(|i| self.doc.layers.get(i)).map(|l| l.id);
        }
        self.repair_active();
        self.commit("Delete Layer");
        Ok(())
    }

    /// Copies a layer (and a group's whole subtree) directly above the original.
    pub fn duplicate_layer(&mut self, id: LayerId) -> EditorResult<LayerId> {
        self.layer(id)?;
        let mut subtree = self.doc.descendants_of(id);
        subtree.push(id);
        let mut indices: Vec<usize> = subtree.iter().filter_map(|&l| self.doc.index_of(l)).collect();
        indices.sort_unstable();

        let remap: Vec<(LayerId, LayerId)> = subtree.iter().map(|&old| (old, Uuid::new_v4())).collect();
        let new_id_for = |old: LayerId| remap.iter().find(|(o, _)| *o == old).map(|(_, n)| *n);

        let mut copies = Vec::with_capacity(indices.len());
        for &i in &indices {
            let mut copy = self.doc.layers[i].clone();
            let old = copy.id;
            copy.id = new_id_for(old).unwrap_or_else(Uuid::new_v4);
            if let Some(parent) = copy.parent.and_then(new_id_for) {
                copy.parent = Some(parent);
            }
            if old == id {
                copy.name = format!("{} copy", copy.name);
            }
            copies.push(copy);
        }

        let insert_at = indices.last().map_or(self.doc.layers.len(), |&i| i + 1);
        let new_root = new_id_for(id).ok_or(EditorError::LayerNotFound(id))?;
        self.doc.layers.splice(insert_at..insert_at, copies);
        self.active_layer = Some(new_root);
        self.commit("Duplicate Layer");
        Ok(new_root)
    }

    pub fn rename_layer(&mut self, id: LayerId, name: &str) -> EditorResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EditorError::invalid("layer name cannot be empty"));
        }
        let layer = self.layer_mut(id)?;
        if layer.name == name {
            return Ok(());
        }
        layer.name = name.to_string();
        self.commit("Rename Layer");
        Ok(())
    }

    /// Moves a layer to `to_index` in the layer array (clamped).
    pub fn move_layer(&mut self, id: LayerId, to_index: usize) -> EditorResult<()> {
        let from = self.index(id)?;
        let to = to_index.min(self.doc.layers.len() - 1);
        if from == to {
            return Ok(());
        }
        let layer = self.doc.layers.remove(from);
        self.doc.layers.insert(to, layer);
        self.commit("Reorder Layers");
        Ok(())
    }

    /// Swaps with the next sibling above. Returns false at the top.
    pub fn raise_layer(&mut self, id: LayerId) -> EditorResult<bool> {
        let from = self.index(id)?;
        let parent = self.doc.layers[from].parent;
        let Some(above) = (from + 1..self.doc.layers.len()).find(|&j| self.doc.layers[j].parent == parent) else {
            return Ok(false);
        };
        let layer = self.doc.layers.remove(from);
        self.doc.layers.insert(above, layer);
        self.commit("Raise Layer");
        Ok(true)
    }

    /// Swaps with the next sibling below. Returns false at the bottom.
    pub fn lower_layer(&mut self, id: LayerId) -> EditorResult<bool> {
        let from = self.index(id)?;
        let parent = self.doc.layers[from].parent;
        let Some(below) = (0..from).rev().find(|&j| self.doc.layers[j].parent == parent) else {
            return Ok(false);
        };
        let layer = self.doc.layers.remove(from);
        self.doc.layers.insert(below, layer);
        self.commit("Lower Layer");
        Ok(true)
    }

    /// Moves a layer into a group, or out to the top level with `None`.
    pub fn set_parent(&mut self, id: LayerId, parent: Option<LayerId>) -> EditorResult<()> {
        self.layer(id)?;
        if let Some(p) = parent {
            let group = self.layer(p)?;
            if !group.is_group() {
                return Err(EditorError::hierarchy(format!("'{}' is not a group", group.name)));
            }
            if p == id || self.doc.is_ancestor(id, p) {
                return Err(EditorError::hierarchy("a group cannot contain itself"));
            }
        }
        let layer = self.layer_mut(id)?;
        if layer.parent == parent {
            return Ok(());
        }
        layer.parent = parent;
        self.commit(if parent.is_some() { "Group Layer" } else { "Ungroup Layer" });
        Ok(())
    }

    /// Wraps `ids` in a new group placed above the topmost of them. The group
    /// joins the parent the first layer had.
    pub fn group_layers(&mut self, ids: &[LayerId], name: impl Into<String>) -> EditorResult<LayerId> {
        if ids.is_empty() {
            return Err(EditorError::invalid("no layers to group"));
        }
        let mut top = 0;
        for &id in ids {
            top = top.max(self.index(id)?);
        }
        let mut group = Layer::group(name);
        group.parent = self.layer(ids[0])?.parent.filter(|p| !ids.contains(p));
        let group_id = group.id;

        // Checked on a copy; a rejected grouping leaves the document untouched.
        let mut layers = self.doc.layers.clone();
        layers.insert(top + 1, group);
        for layer in layers.iter_mut().filter(|l| ids.contains(&l.id)) {
            layer.parent = Some(group_id);
        }
        let planned = Document { width: self.doc.width, height: self.doc.height, layers };
        planned.check_hierarchy().map_err(EditorError::Hierarchy)?;

        self.doc.layers = planned.layers;
        self.active_layer = Some(group_id);
        self.commit("Group Layers");
        Ok(group_id)
    }

    // ========================================================================
    // LAYER PROPERTIES
    // ========================================================================

    pub fn set_visibility(&mut self, id: LayerId, visible: bool) -> EditorResult<()> {
        let layer = self.layer_mut(id)?;
        if layer.visible == visible {
            return Ok(());
        }
        layer.visible = visible;
        self.commit(if visible { "Show Layer" } else { "Hide Layer" });
        Ok(())
    }

    pub fn set_opacity(&mut self, id: LayerId, opacity: f32) -> EditorResult<()> {
        let layer = self.layer_mut(id)?;
        let before = layer.opacity;
        layer.set_opacity(opacity);
        if layer.opacity != before {
            self.commit("Layer Opacity");
        }
        Ok(())
    }

    pub fn set_blend_mode(&mut self, id: LayerId, mode: BlendMode) -> EditorResult<()> {
        let layer = self.layer_mut(id)?;
        if layer.blend_mode == mode {
            return Ok(());
        }
        layer.blend_mode = mode;
        self.commit("Blend Mode");
        Ok(())
    }

    pub fn set_filters(&mut self, id: LayerId, filters: FilterSettings) -> EditorResult<()> {
        let filters = filters.clamped();
        let layer = self.layer_mut(id)?;
        if layer.filters == filters {
            return Ok(());
        }
        layer.filters = filters;
        self.commit("Adjust Filters");
        Ok(())
    }

    pub fn reset_filters(&mut self, id: LayerId) -> EditorResult<()> {
        let layer = self.layer_mut(id)?;
        if layer.filters.is_identity() {
            return Ok(());
        }
        layer.filters = FilterSettings::default();
        self.commit("Reset Filters");
        Ok(())
    }

    pub fn set_text(&mut self, id: LayerId, content: TextContent) -> EditorResult<()> {
        let layer = self.layer_mut(id)?;
        let LayerKind::Text(current) = &mut layer.kind else {
            return Err(EditorError::invalid(format!("'{}' is not a text layer", layer.name)));
        };
        if *current == content {
            return Ok(());
        }
        let (w, h) = text::measure_text(&content);
        layer.name = text::layer_name_for(&content.text);
        *current = content;
        layer.transform.width = w.max(1.0);
        layer.transform.height = h.max(1.0);
        self.commit("Edit Text");
        Ok(())
    }

    // ========================================================================
    // LAYER TRANSFORMS
    // ========================================================================

    fn reject_group(&self, id: LayerId, action: &str) -> EditorResult<()> {
        let layer = self.layer(id)?;
        if layer.is_group() {
            return Err(EditorError::invalid(format!("cannot {action} a group")));
        }
        Ok(())
    }

    /// Replaces a layer's transform. A change of position carries the mask
    /// along, as `translate_layer` does.
    pub fn set_transform(&mut self, id: LayerId, t: Transform) -> EditorResult<()> {
        self.reject_group(id, "transform")?;
        let t = t.sanitized();
        let layer = self.layer_mut(id)?;
        if layer.transform == t {
            return Ok(());
        }
        let (dx, dy) = (t.x - layer.transform.x, t.y - layer.transform.y);
        if let Some(mask) = &layer.mask {
            if dx != 0.0 || dy != 0.0 {
                layer.mask = Some(mask.translated(dx, dy));
            }
        }
        layer.transform = t;
        self.commit("Transform");
        Ok(())
    }

    /// Moves a layer and its mask. Moving a group moves every descendant.
    pub fn translate_layer(&mut self, id: LayerId, dx: f32, dy: f32) -> EditorResult<()> {
        self.layer(id)?;
        if dx == 0.0 && dy == 0.0 {
            return Ok(());
        }
        let mut moved = self.doc.descendants_of(id);
        moved.push(id);
        for layer in self.doc.layers.iter_mut().filter(|l| moved.contains(&l.id)) {
            layer.transform.x += dx;
            layer.transform.y += dy;
            if let Some(mask) = &layer.mask {
                layer.mask = Some(mask.translated(dx, dy));
            }
        }
        self.commit("Move Layer");
        Ok(())
    }

    pub fn rotate_layer(&mut self, id: LayerId, degrees: f32) -> EditorResult<()> {
        self.reject_group(id, "rotate")?;
        let layer = self.layer_mut(id)?;
        layer.transform = transform::rotated(layer.transform, degrees);
        self.commit("Rotate Layer");
        Ok(())
    }

    pub fn scale_layer(&mut self, id: LayerId, factor: f32) -> EditorResult<()> {
        self.reject_group(id, "scale")?;
        if !(factor.is_finite() && factor > 0.0) {
            return Err(EditorError::invalid(format!("scale factor must be positive, got {factor}")));
        }
        let layer = self.layer_mut(id)?;
        layer.transform = transform::scaled(layer.transform, factor);
        self.commit("Scale Layer");
        Ok(())
    }

    pub fn flip_layer_horizontal(&mut self, id: LayerId) -> EditorResult<()> {
        self.reject_group(id, "flip")?;
        let layer = self.layer_mut(id)?;
        layer.transform = transform::flipped_horizontal(layer.transform);
        self.commit("Flip Horizontal");
        Ok(())
    }

    pub fn flip_layer_vertical(&mut self, id: LayerId) -> EditorResult<()> {
        self.reject_group(id, "flip")?;
        let layer = self.layer_mut(id)?;
        layer.transform = transform::flipped_vertical(layer.transform);
        self.commit("Flip Vertical");
        Ok(())
    }

    // ========================================================================
    // MERGING
    // ========================================================================

    /// Bakes a layer into the sibling directly below it. Both must be
    /// non-group layers and the upper one must be visible; the result is a
    /// document-sized image layer that keeps the lower layer's name, opacity
    /// and blend mode.
    pub fn merge_down(&mut self, id: LayerId) -> EditorResult<LayerId> {
        let upper_index = self.index(id)?;
        let upper = &self.doc.layers[upper_index];
        if upper.is_group() {
            return Err(EditorError::invalid("cannot merge a group"));
        }
        if !upper.visible {
            return Err(EditorError::invalid(format!("'{}' is hidden; show it before merging", upper.name)));
        }
        let parent = upper.parent;
        let lower_index = (0..upper_index)
            .rev()
            .find(|&j| self.doc.layers[j].parent == parent)
            .ok_or_else(|| EditorError::invalid("no layer below to merge into"))?;
        let lower = &self.doc.layers[lower_index];
        if lower.is_group() {
            return Err(EditorError::invalid("cannot merge into a group"));
        }

        let (w, h) = (self.doc.width, self.doc.height);
        let mut merged = render::render_layer(&self.doc, &lower_visible(lower)).unwrap_or_else(|| RgbaImage::new(w, h));
        if let Some(top) = render::render_layer(&self.doc, upper) {
            render::blend_into(&mut merged, &top, upper.blend_mode, upper.opacity);
        }

        let lower_id = lower.id;
        let lower = &mut self.doc.layers[lower_index];
        lower.kind = LayerKind::Image { pixels: Arc::new(merged) };
        lower.transform = Transform::from_box(0.0, 0.0, w as f32, h as f32);
        lower.filters = FilterSettings::default();
        lower.mask = None;
        self.doc.layers.remove(upper_index);
        self.active_layer = Some(lower_id);
        self.commit("Merge Down");
        Ok(lower_id)
    }

    /// Replaces every layer with one image of the current composite.
    pub fn flatten(&mut self) -> LayerId {
        let composite = self.render();
        let layer = Layer::image("Background", composite);
        let id = layer.id;
        self.doc.layers = vec![layer];
        self.active_layer = Some(id);
        self.commit("Flatten");
        id
    }

    // ========================================================================
    // MASKS
    // ========================================================================

    /// Turns a single-shape selection into the layer's mask polygon.
    pub fn mask_from_selection(&mut self, id: LayerId) -> EditorResult<()> {
        self.layer(id)?;
        if self.selection.is_empty() {
            return Err(EditorError::selection("nothing is selected"));
        }
        let points = self
            .selection
            .to_polygon()
            .ok_or_else(|| EditorError::selection("only a single-shape selection can become a mask"))?;
        self.layer_mut(id)?.mask = Some(MaskPolygon::new(points));
        self.commit("Add Mask");
        Ok(())
    }

    pub fn clear_mask(&mut self, id: LayerId) -> EditorResult<()> {
        let layer = self.layer_mut(id)?;
        if layer.mask.take().is_none() {
            return Ok(());
        }
        self.commit("Remove Mask");
        Ok(())
    }

    pub fn invert_mask(&mut self, id: LayerId) -> EditorResult<()> {
        let layer = self.layer_mut(id)?;
        let mask = layer.mask.as_mut().ok_or_else(|| EditorError::invalid(format!("'{}' has no mask", layer.name)))?;
        mask.inverted = !mask.inverted;
        self.commit("Invert Mask");
        Ok(())
    }

    // ========================================================================
    // SELECTION
    // ========================================================================

    pub fn select(&mut self, shape: SelectionShape, mode: SelectionMode) {
        self.selection.apply(shape, mode);
    }

    pub fn select_all(&mut self) {
        let all = SelectionShape::rect_from_corners((0.0, 0.0), (self.doc.width as f32, self.doc.height as f32));
        self.selection.apply(all, SelectionMode::Replace);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Pixel rectangle of the selection on this canvas.
    pub fn selection_bounds(&self) -> Option<(u32, u32, u32, u32)> {
        self.selection.bounds(self.doc.width, self.doc.height)
    }

    /// Clears the selected pixels of the active image layer.
    pub fn delete_selection(&mut self) -> EditorResult<()> {
        if self.selection.is_empty() {
            return Err(EditorError::selection("nothing is selected"));
        }
        let id = self.active_layer.ok_or_else(|| EditorError::invalid("no active layer"))?;
        let mask = self.selection.mask(self.doc.width, self.doc.height);
        let layer = self.layer_mut(id)?;
        let to_doc = layer.transform.to_matrix();
        let (box_w, box_h) = (layer.transform.width, layer.transform.height);
        let LayerKind::Image { pixels } = &mut layer.kind else {
            return Err(EditorError::invalid(format!("'{}' is not an image layer", layer.name)));
        };

        let img = Arc::make_mut(pixels);
        let (nat_w, nat_h) = img.dimensions();
        let (sx, sy) = (box_w / nat_w.max(1) as f32, box_h / nat_h.max(1) as f32);
        let (mask_w, mask_h) = mask.dimensions();
        let stride = nat_w as usize * 4;
        img.as_mut().par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let (dx, dy) = to_doc.apply((x as f32 + 0.5) * sx, (y as f32 + 0.5) * sy);
                if dx < 0.0 || dy < 0.0 || dx >= mask_w as f32 || dy >= mask_h as f32 {
                    continue;
                }
                let cover = mask.get_pixel(dx as u32, dy as u32)[0] as u32;
                if cover > 0 {
                    px[3] = ((px[3] as u32 * (255 - cover) + 127) / 255) as u8;
                }
            }
        });
        self.commit("Delete Selection");
        Ok(())
    }

    /// Crops the canvas to the selection's bounds and drops the selection.
    pub fn crop_to_selection(&mut self) -> EditorResult<()> {
        let (x, y, w, h) = self
            .selection_bounds()
            .ok_or_else(|| EditorError::selection("nothing is selected"))?;
        transform::crop(&mut self.doc, x, y, w, h);
        self.selection.clear();
        self.commit("Crop");
        Ok(())
    }

    /// Resizes the canvas around its centre. Layers keep their size.
    pub fn resize_canvas(&mut self, width: u32, height: u32) -> EditorResult<()> {
        if width == 0 || height == 0 {
            return Err(EditorError::invalid("canvas size must be at least 1x1"));
        }
        if (width, height) == (self.doc.width, self.doc.height) {
            return Ok(());
        }
        transform::resize_canvas(&mut self.doc, width, height, (1, 1));
        self.commit("Canvas Size");
        Ok(())
    }

    // ========================================================================
    // HISTORY
    // ========================================================================

    pub fn undo(&mut self) -> bool {
        match self.history.undo().cloned() {
            Some(snapshot) => {
                self.restore(snapshot);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo().cloned() {
            Some(snapshot) => {
                self.restore(snapshot);
                true
            }
            None => false,
        }
    }

    pub fn jump_to_history(&mut self, index: usize) -> bool {
        match self.history.jump_to(index).cloned() {
            Some(snapshot) => {
                self.restore(snapshot);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ========================================================================
    // OUTPUT
    // ========================================================================

    /// Full composite with a transparent background.
    pub fn render(&self) -> RgbaImage {
        render::render_document(&self.doc, &RenderOptions::default())
    }

    /// Composite colour at a document pixel, or `None` off-canvas.
    pub fn sample_color(&self, x: f32, y: f32) -> Option<[u8; 4]> {
        if x < 0.0 || y < 0.0 || x >= self.doc.width as f32 || y >= self.doc.height as f32 {
            return None;
        }
        let Rgba(c) = *self.render().get_pixel(x as u32, y as u32);
        Some(c)
    }

    pub fn export(&mut self, path: &Path, format: ExportFormat, quality: u8) -> EditorResult<()> {
        io::encode_and_write(&self.render(), path, format, quality)?;
        self.mark_clean();
        Ok(())
    }

    // ========================================================================
    // AI RESULTS
    // ========================================================================

    /// Adds a model-generated image as a full-canvas layer on top of the
    /// active one. With `clip_to_selection` and a selection present, the layer
    /// is masked to the selection outline.
    pub fn apply_ai_image(&mut self, img: RgbaImage, name: &str, clip_to_selection: bool) -> EditorResult<LayerId> {
        let mask = if clip_to_selection && !self.selection.is_empty() {
            let points = self
                .selection
                .to_polygon()
                .ok_or_else(|| EditorError::selection("only a single-shape selection can clip a result"))?;
            Some(MaskPolygon::new(points))
        } else {
            None
        };
        Ok(self.add_ai_layer(img, name, mask))
    }

    /// Adds a model-generated image as a full-canvas layer with an explicit
    /// clip outline, for results requested against an earlier selection.
    pub fn add_ai_layer(&mut self, img: RgbaImage, name: &str, mask: Option<MaskPolygon>) -> LayerId {
        let (w, h) = (self.doc.width, self.doc.height);
        let img = if img.dimensions() == (w, h) { img } else { resize_to(&img, w, h) };
        let mut layer = Layer::image(name, img);
        layer.transform = Transform::from_box(0.0, 0.0, w as f32, h as f32);
        layer.mask = mask;
        let id = self.insert_layer(layer);
        self.commit(name);
        id
    }
}

/// Merging a hidden lower layer still uses its content.
fn lower_visible(layer: &Layer) -> Layer {
    Layer { visible: true, opacity: 1.0, ..layer.clone() }
}
