//! Lumina: a layered image editor with non-destructive filters, selections,
//! masks, layer groups and hosted-AI edits.
//!
//! The library holds the document model, compositor, tools and AI client; the
//! `Lumina` binary wraps it in an egui desktop editor or a headless CLI.

#![allow(clippy::too_many_arguments)]

pub mod app;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod render;
pub mod settings;

pub use canvas::{BlendMode, Document, Layer, LayerId, LayerKind, MaskPolygon, Transform};
pub use components::history::{DocumentSnapshot, History, MAX_HISTORY};
pub use components::tools::{Tool, ToolController, ToolState};
pub use error::{EditorError, EditorResult};
pub use ops::ai::{AiError, GenerativeModel, SubjectBox};
pub use ops::filters::FilterSettings;
pub use ops::selection::{Selection, SelectionMode, SelectionShape};
pub use project::Project;
pub use render::{RenderOptions, render_document};
