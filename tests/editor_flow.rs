//! End-to-end editing sessions driven through `Project` and `ToolController`.

use image::{Rgba, RgbaImage};
use lumina::components::tools::{Tool, ToolController};
use lumina::{EditorError, LayerKind, MAX_HISTORY, Project, SelectionMode, SelectionShape};

fn solid(w: u32, h: u32, c: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(w, h, Rgba(c))
}

#[test]
fn group_opacity_applies_to_the_whole_group() {
    let mut p = Project::new_untitled(1, 32, 32);
    let red = p.add_image_layer(solid(32, 32, [255, 0, 0, 255]), "red");
    let group = p.group_layers(&[red], "Group").unwrap();
    p.set_opacity(group, 0.5).unwrap();

    let px = p.render().get_pixel(16, 16).0;
    assert_eq!(px[0], 255);
    assert!((120..=135).contains(&px[1]), "green was {}", px[1]);
    assert_eq!(px[3], 255);

    p.set_visibility(group, false).unwrap();
    assert_eq!(p.render().get_pixel(16, 16).0, [255, 255, 255, 255]);
}

#[test]
fn undo_restores_the_previous_render_exactly() {
    let mut p = Project::new_untitled(1, 24, 24);
    let id = p.add_image_layer(solid(12, 12, [0, 0, 255, 255]), "blue");
    let before = p.render();

    p.translate_layer(id, 6.0, 6.0).unwrap();
    p.rotate_layer(id, 30.0).unwrap();
    assert_ne!(p.render(), before);

    assert!(p.undo());
    assert!(p.undo());
    assert_eq!(p.render(), before);
    assert!(p.redo());
    assert!(p.can_redo());
}

#[test]
fn history_keeps_the_latest_twenty_states() {
    let mut p = Project::new_untitled(1, 8, 8);
    let id = p.active_layer.unwrap();
    for i in 0..30 {
        p.rename_layer(id, &format!("name {i}")).unwrap();
    }
    assert_eq!(p.history.len(), MAX_HISTORY);

    let mut undos = 0;
    while p.undo() {
        undos += 1;
    }
    assert_eq!(undos, MAX_HISTORY - 1);
    // The oldest surviving state is the eleventh rename.
    assert_eq!(p.doc.layer(id).unwrap().name, "name 10");
}

#[test]
fn new_edit_after_undo_drops_the_redo_branch() {
    let mut p = Project::new_untitled(1, 8, 8);
    let id = p.active_layer.unwrap();
    p.set_opacity(id, 0.5).unwrap();
    p.set_opacity(id, 0.25).unwrap();
    p.undo();
    assert!(p.can_redo());
    p.rename_layer(id, "Paper").unwrap();
    assert!(!p.can_redo());
}

#[test]
fn delete_then_crop_to_selection() {
    let mut p = Project::new_untitled(1, 40, 40);
    p.select(SelectionShape::rect_from_corners((10.0, 10.0), (20.0, 20.0)), SelectionMode::Replace);
    assert_eq!(p.selection_bounds(), Some((10, 10, 10, 10)));

    p.delete_selection().unwrap();
    let out = p.render();
    assert_eq!(out.get_pixel(15, 15)[3], 0);
    assert_eq!(out.get_pixel(5, 5)[3], 255);

    p.crop_to_selection().unwrap();
    assert_eq!((p.doc.width, p.doc.height), (10, 10));
    assert!(p.selection.is_empty());
    assert_eq!(p.render().get_pixel(0, 0)[3], 0);

    p.undo();
    assert_eq!((p.doc.width, p.doc.height), (40, 40));
}

#[test]
fn groups_cannot_contain_themselves() {
    let mut p = Project::new_untitled(1, 8, 8);
    let outer = p.add_group("Outer");
    let inner = p.add_group("Inner");
    assert_eq!(p.doc.layer(inner).unwrap().parent, Some(outer));

    let err = p.set_parent(outer, Some(inner)).unwrap_err();
    assert!(matches!(err, EditorError::Hierarchy(_)));
    let err = p.set_parent(outer, Some(outer)).unwrap_err();
    assert!(matches!(err, EditorError::Hierarchy(_)));
    assert!(p.doc.check_hierarchy().is_ok());
}

#[test]
fn deleting_a_group_removes_its_children() {
    let mut p = Project::new_untitled(1, 8, 8);
    let a = p.add_image_layer(solid(8, 8, [1, 2, 3, 255]), "a");
    let b = p.add_image_layer(solid(8, 8, [4, 5, 6, 255]), "b");
    let group = p.group_layers(&[a, b], "Group").unwrap();
    assert_eq!(p.doc.layers.len(), 4);

    p.delete_layer(group).unwrap();
    assert_eq!(p.doc.layers.len(), 1);
    assert!(p.doc.layer(a).is_none());
    assert_eq!(p.active_layer, Some(p.doc.layers[0].id));
}

#[test]
fn painting_masking_and_merging() {
    let mut p = Project::new_untitled(1, 64, 64);
    let mut tools = ToolController::default();
    tools.state.brush_color = [0, 0, 0, 255];
    tools.state.brush_size = 8.0;

    tools.pointer_down((4.0, 32.0), &mut p).unwrap();
    tools.pointer_move((30.0, 32.0), &mut p).unwrap();
    tools.pointer_up((60.0, 32.0), &mut p).unwrap();
    let stroke = p.active_layer.unwrap();
    assert!(matches!(p.doc.layer(stroke).unwrap().kind, LayerKind::Stroke(_)));
    assert_eq!(p.render().get_pixel(50, 32).0, [0, 0, 0, 255]);

    // Mask the stroke to the left half.
    tools.set_tool(Tool::RectSelect);
    tools.pointer_down((0.0, 0.0), &mut p).unwrap();
    tools.pointer_up((32.0, 64.0), &mut p).unwrap();
    p.mask_from_selection(stroke).unwrap();
    let out = p.render();
    assert_eq!(out.get_pixel(10, 32).0, [0, 0, 0, 255]);
    assert_eq!(out.get_pixel(50, 32).0, [255, 255, 255, 255]);

    let merged = p.merge_down(stroke).unwrap();
    assert_eq!(p.doc.layers.len(), 1);
    assert_eq!(p.doc.layers[0].id, merged);
    assert_eq!(p.render(), out);
}

#[test]
fn ai_result_layer_can_be_undone() {
    let mut p = Project::new_untitled(1, 16, 16);
    p.select(SelectionShape::rect_from_corners((0.0, 0.0), (8.0, 8.0)), SelectionMode::Replace);
    p.apply_ai_image(solid(32, 32, [0, 255, 0, 255]), "Generative Fill", true).unwrap();
    let out = p.render();
    assert_eq!(out.get_pixel(4, 4).0, [0, 255, 0, 255]);
    assert_eq!(out.get_pixel(12, 12).0, [255, 255, 255, 255]);

    p.undo();
    assert_eq!(p.doc.layers.len(), 1);
}

#[test]
fn combined_selection_cannot_become_a_mask() {
    let mut p = Project::new_untitled(1, 16, 16);
    let id = p.active_layer.unwrap();
    p.select(SelectionShape::rect_from_corners((0.0, 0.0), (4.0, 4.0)), SelectionMode::Replace);
    p.select(SelectionShape::rect_from_corners((8.0, 8.0), (12.0, 12.0)), SelectionMode::Add);
    assert!(matches!(p.mask_from_selection(id), Err(EditorError::Selection(_))));
}

#[test]
fn growing_the_canvas_keeps_content_centred() {
    let mut p = Project::new_untitled(1, 8, 8);
    p.resize_canvas(12, 12).unwrap();
    let out = p.render();
    assert_eq!(out.dimensions(), (12, 12));
    assert_eq!(out.get_pixel(0, 0)[3], 0);
    assert_eq!(out.get_pixel(6, 6).0, [255, 255, 255, 255]);

    let revision = p.history.revision();
    p.resize_canvas(12, 12).unwrap();
    assert_eq!(p.history.revision(), revision);
    assert!(p.resize_canvas(0, 5).is_err());

    p.undo();
    assert_eq!((p.doc.width, p.doc.height), (8, 8));
}
