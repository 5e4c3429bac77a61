// ============================================================================
// OPS: raster operations behind the editor
// ============================================================================
//
//   ai.rs        - hosted multimodal model client and AI edit operations
//   brush.rs     - freehand stroke capture and rasterization
//   filters.rs   - per-layer filter bundle
//   selection.rs - selection shapes, boolean modes, polygon masks
//   text.rs      - system font lookup, text measurement and rasterization
//   transform.rs - affine sampling, layer placement, canvas crop/resize
// ============================================================================

pub mod ai;
pub mod brush;
pub mod filters;
pub mod selection;
pub mod text;
pub mod transform;
