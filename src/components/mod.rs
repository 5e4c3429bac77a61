pub mod ai_panel;
pub mod history;
pub mod layers;
pub mod tools;
