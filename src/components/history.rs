use eframe::egui;
use std::collections::VecDeque;

use crate::canvas::{Document, Layer};

/// Maximum number of snapshots kept, including the initial one.
pub const MAX_HISTORY: usize = 20;

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// Canvas size plus the full layer array. Image pixels are `Arc`-shared, so a
/// snapshot clones layer metadata only.
#[derive(Clone, Debug)]
pub struct DocumentSnapshot {
    pub width: u32,
    pub height: u32,
    pub layers: Vec<Layer>,
}

impl DocumentSnapshot {
    pub fn capture(doc: &Document) -> Self {
        Self { width: doc.width, height: doc.height, layers: doc.layers.clone() }
    }

    pub fn to_document(&self) -> Document {
        Document { width: self.width, height: self.height, layers: self.layers.clone() }
    }
}

#[derive(Clone, Debug)]
struct HistoryEntry {
    label: String,
    snapshot: DocumentSnapshot,
}

// ============================================================================
// HISTORY STACK
// ============================================================================

/// Linear snapshot stack with a cursor. Entries after the cursor are the redo
/// branch and are discarded on the next commit.
#[derive(Clone, Debug)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    index: usize,
    max_entries: usize,
    /// Bumped whenever the current snapshot changes.
    revision: u64,
}

impl History {
    pub fn new(initial: DocumentSnapshot) -> Self {
        Self::with_label(initial, "Open")
    }

    pub fn with_label(initial: DocumentSnapshot, label: impl Into<String>) -> Self {
        let mut entries = VecDeque::with_capacity(MAX_HISTORY);
        entries.push_back(HistoryEntry { label: label.into(), snapshot: initial });
        Self { entries, index: 0, max_entries: MAX_HISTORY, revision: 0 }
    }

    pub fn commit(&mut self, snapshot: DocumentSnapshot, label: impl Into<String>) {
        // Clear redo branch when a new action is performed
        self.entries.truncate(self.index + 1);
        self.entries.push_back(HistoryEntry { label: label.into(), snapshot });

        // Prune oldest snapshots to stay within the cap
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        self.index = self.entries.len() - 1;
        self.revision += 1;
    }

    pub fn undo(&mut self) -> Option<&DocumentSnapshot> {
        if !self.can_undo() {
            return None;
        }
        self.index -= 1;
        self.revision += 1;
        self.entries.get(self.index).map(|e| &e.snapshot)
    }

    pub fn redo(&mut self) -> Option<&DocumentSnapshot> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        self.revision += 1;
        self.entries.get(self.index).map(|e| &e.snapshot)
    }

    /// Moves the cursor straight to `index` (as listed by `labels()`).
    pub fn jump_to(&mut self, index: usize) -> Option<&DocumentSnapshot> {
        if index >= self.entries.len() || index == self.index {
            return None;
        }
        self.index = index;
        self.revision += 1;
        self.entries.get(index).map(|e| &e.snapshot)
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Labels oldest first.
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.label.as_str()).collect()
    }

    pub fn undo_label(&self) -> Option<&str> {
        if self.can_undo() { self.entries.get(self.index).map(|e| e.label.as_str()) } else { None }
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.entries.get(self.index + 1).map(|e| e.label.as_str())
    }
}

// ============================================================================
// HISTORY PANEL
// ============================================================================

/// Lists history entries; clicking one returns its index.
pub fn history_panel(ui: &mut egui::Ui, history: &History) -> Option<usize> {
    let mut clicked = None;
    egui::ScrollArea::vertical().id_source("history_scroll").max_height(160.0).show(ui, |ui| {
        for (i, label) in history.labels().into_iter().enumerate() {
            let current = i == history.index();
            let text = if i > history.index() {
                egui::RichText::new(label).weak()
            } else {
                egui::RichText::new(label)
            };
            if ui.selectable_label(current, text).clicked() && !current {
                clicked = Some(i);
            }
        }
    });
    clicked
}
