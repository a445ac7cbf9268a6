//! Live Container Integration Tests
//!
//! Tests for:
//! - Structural edits: add, remove, replace, clear
//! - Cycle and range rejection leaving the container untouched
//! - Selector exclusivity
//! - Detachable flag enforcement
//! - Gate policies: immediate and end-of-frame publishing

use glam::Vec3;
use trellis::{FieldValue, GatePolicy, NodeHandle, Ownership, Scene, SceneConfig, SceneError};

fn new_scene() -> Scene {
    Scene::new(SceneConfig::default())
}

fn complete(scene: &mut Scene, type_name: &str) -> NodeHandle {
    let handle = scene.create_node(type_name).unwrap();
    scene.finish_setup(handle).unwrap();
    handle
}

// ============================================================================
// Structural Edits
// ============================================================================

#[test]
fn add_child_is_idempotent() {
    let mut scene = new_scene();
    let group = complete(&mut scene, "Group");
    let leaf = complete(&mut scene, "Box");

    scene.add_child(group, leaf).unwrap();
    scene.add_child(group, leaf).unwrap();

    assert_eq!(scene.children(group).unwrap(), &[leaf]);
    assert_eq!(scene.attached_sources(group), vec![leaf]);
}

#[test]
fn remove_child_keeps_node_alive() {
    let mut scene = new_scene();
    let group = complete(&mut scene, "Group");
    let leaf = complete(&mut scene, "Box");
    scene.add_child(group, leaf).unwrap();

    scene.remove_child(group, leaf).unwrap();
    assert!(scene.children(group).unwrap().is_empty());
    assert!(scene.attached_children(group).unwrap().is_empty());
    assert!(scene.get_node(leaf).unwrap().ownership().is_detached());

    // Absent child: no-op.
    scene.remove_child(group, leaf).unwrap();

    let other = complete(&mut scene, "Group");
    scene.add_child(other, leaf).unwrap();
    assert_eq!(scene.attached_sources(other), vec![leaf]);
}

#[test]
fn replace_child_swaps_one_slot() {
    let mut scene = new_scene();
    let group = complete(&mut scene, "Group");
    let a = complete(&mut scene, "Box");
    let b = complete(&mut scene, "Sphere");
    let c = complete(&mut scene, "Cone");
    scene.add_child(group, a).unwrap();
    scene.add_child(group, b).unwrap();

    scene.replace_child(group, 1, c).unwrap();
    assert_eq!(scene.attached_sources(group), vec![a, c]);
    assert!(scene.get_node(b).unwrap().ownership().is_detached());
    assert!(matches!(
        scene.get_node(c).unwrap().ownership(),
        Ownership::Exclusive(slot) if slot.parent == group
    ));

    let err = scene.replace_child(group, 2, b).unwrap_err();
    assert_eq!(err, SceneError::Range { index: 2, len: 2 });
    assert_eq!(scene.attached_sources(group), vec![a, c]);
}

#[test]
fn clear_children_detaches_everything() {
    let mut scene = new_scene();
    let group = complete(&mut scene, "Transform");
    let leaves: Vec<_> = (0..4).map(|_| complete(&mut scene, "Box")).collect();
    for &leaf in &leaves {
        scene.add_child(group, leaf).unwrap();
    }

    scene.clear_children(group).unwrap();
    assert!(scene.attached_children(group).unwrap().is_empty());
    assert!(leaves
        .iter()
        .all(|&l| scene.get_node(l).unwrap().ownership().is_detached()));
}

#[test]
fn node_in_two_containers_is_shared() {
    let mut scene = new_scene();
    let left = complete(&mut scene, "Group");
    let right = complete(&mut scene, "Group");
    let leaf = complete(&mut scene, "Box");

    scene.add_child(left, leaf).unwrap();
    assert!(!scene.attached_children(left).unwrap()[0].is_shared());

    scene.add_child(right, leaf).unwrap();
    assert!(scene.attached_children(left).unwrap()[0].is_shared());
    assert!(scene.attached_children(right).unwrap()[0].is_shared());

    scene.remove_child(right, leaf).unwrap();
    assert!(!scene.attached_children(left).unwrap()[0].is_shared());
    assert!(matches!(
        scene.get_node(leaf).unwrap().ownership(),
        Ownership::Exclusive(slot) if slot.parent == left
    ));
}

#[test]
fn leaf_cannot_hold_children() {
    let mut scene = new_scene();
    let leaf = complete(&mut scene, "Box");
    let other = complete(&mut scene, "Box");

    assert!(matches!(
        scene.add_child(leaf, other),
        Err(SceneError::InvalidUse(_))
    ));
}

#[test]
fn root_cannot_be_attached() {
    let mut scene = new_scene();
    let group = complete(&mut scene, "Group");
    let root = scene.root();

    assert!(matches!(
        scene.add_child(group, root),
        Err(SceneError::InvalidUse(_))
    ));
    assert!(matches!(scene.remove_node(root), Err(SceneError::InvalidUse(_))));
}

#[test]
fn stale_handle_is_rejected() {
    let mut scene = new_scene();
    let group = complete(&mut scene, "Group");
    let leaf = complete(&mut scene, "Box");
    scene.remove_node(leaf).unwrap();

    assert_eq!(scene.add_child(group, leaf), Err(SceneError::StaleHandle));
}

#[test]
fn remove_node_frees_unshared_descendants() {
    let mut scene = new_scene();
    let outer = complete(&mut scene, "Group");
    let inner = complete(&mut scene, "Group");
    let kept = complete(&mut scene, "Box");
    let dropped = complete(&mut scene, "Sphere");
    let elsewhere = complete(&mut scene, "Group");

    scene.add_child(outer, inner).unwrap();
    scene.add_child(inner, kept).unwrap();
    scene.add_child(inner, dropped).unwrap();
    scene.add_child(elsewhere, kept).unwrap();

    scene.remove_node(inner).unwrap();
    assert!(!scene.contains(inner));
    assert!(!scene.contains(dropped));
    assert!(scene.contains(kept));
    assert!(scene.children(outer).unwrap().is_empty());
    assert!(!scene.attached_children(elsewhere).unwrap()[0].is_shared());
}

// ============================================================================
// Cycle Rejection
// ============================================================================

#[test]
fn attaching_an_ancestor_is_a_cycle() {
    let mut scene = new_scene();
    let a = complete(&mut scene, "Group");
    let b = complete(&mut scene, "Group");
    let c = complete(&mut scene, "Transform");
    scene.add_child(a, b).unwrap();
    scene.add_child(b, c).unwrap();

    let first = scene.add_child(c, a).unwrap_err();
    assert!(matches!(first, SceneError::Cycle { .. }));
    assert!(scene.children(c).unwrap().is_empty());
    assert!(scene.get_node(a).unwrap().ownership().is_detached());

    // Rejected again, same state.
    let second = scene.add_child(c, a).unwrap_err();
    assert_eq!(first, second);
    assert!(scene.children(c).unwrap().is_empty());

    assert!(matches!(scene.add_child(a, a), Err(SceneError::Cycle { .. })));
}

#[test]
fn node_field_reference_counts_for_cycles() {
    let mut scene = new_scene();
    let shape = complete(&mut scene, "Shape");
    let appearance = complete(&mut scene, "Appearance");

    scene
        .set_field(shape, "appearance", FieldValue::Node(Some(appearance)))
        .unwrap();
    assert_eq!(scene.attached_sources(shape), vec![appearance]);

    let err = scene
        .set_field(appearance, "material", FieldValue::Node(Some(shape)))
        .unwrap_err();
    assert!(matches!(err, SceneError::Cycle { .. }));
    assert_eq!(
        scene.get_field(appearance, "material").unwrap(),
        &FieldValue::Node(None)
    );
}

#[test]
fn replacing_a_node_field_rewires_ownership() {
    let mut scene = new_scene();
    let shape = complete(&mut scene, "Shape");
    let first = complete(&mut scene, "Box");
    let second = complete(&mut scene, "Sphere");

    scene.set_field(shape, "geometry", FieldValue::Node(Some(first))).unwrap();
    scene.set_field(shape, "geometry", FieldValue::Node(Some(second))).unwrap();

    assert!(scene.get_node(first).unwrap().ownership().is_detached());
    assert_eq!(scene.attached_sources(shape), vec![second]);
}

// ============================================================================
// Selector Exclusivity
// ============================================================================

#[test]
fn selector_attaches_only_the_active_child() {
    let mut scene = new_scene();
    let switch = complete(&mut scene, "Switch");
    let a = complete(&mut scene, "Box");
    let b = complete(&mut scene, "Sphere");
    let c = complete(&mut scene, "Cone");
    for child in [a, b, c] {
        scene.add_child(switch, child).unwrap();
    }
    assert!(scene.attached_children(switch).unwrap().is_empty());

    scene.set_active_index(switch, Some(1)).unwrap();
    assert_eq!(scene.attached_sources(switch), vec![b]);
    assert_eq!(scene.active_index(switch), Some(1));

    let err = scene.set_active_index(switch, Some(5)).unwrap_err();
    assert_eq!(err, SceneError::Range { index: 5, len: 3 });
    assert_eq!(scene.attached_sources(switch), vec![b]);

    scene.set_active_index(switch, None).unwrap();
    assert!(scene.attached_children(switch).unwrap().is_empty());
    assert_eq!(scene.active_index(switch), None);
    assert_eq!(scene.children(switch).unwrap().len(), 3);
}

#[test]
fn which_choice_field_drives_the_selector() {
    let mut scene = new_scene();
    let switch = complete(&mut scene, "Switch");
    let a = complete(&mut scene, "Box");
    let b = complete(&mut scene, "Sphere");
    scene.add_child(switch, a).unwrap();
    scene.add_child(switch, b).unwrap();

    scene.set_field(switch, "whichChoice", FieldValue::Int32(0)).unwrap();
    assert_eq!(scene.attached_sources(switch), vec![a]);

    // Out of range through the field is tolerated and shows nothing.
    scene.set_field(switch, "whichChoice", FieldValue::Int32(7)).unwrap();
    assert!(scene.attached_children(switch).unwrap().is_empty());
}

#[test]
fn set_active_index_requires_a_selector() {
    let mut scene = new_scene();
    let group = complete(&mut scene, "Group");
    assert!(matches!(
        scene.set_active_index(group, Some(0)),
        Err(SceneError::InvalidUse(_))
    ));
}

// ============================================================================
// Detachable Flag
// ============================================================================

#[test]
fn non_detachable_container_rejects_edits() {
    let mut scene = new_scene();
    let group = scene.create_node("Group").unwrap();
    let leaf = complete(&mut scene, "Box");
    scene.set_detachable(group, false).unwrap();

    // Still editable while being set up.
    scene.add_child(group, leaf).unwrap();
    scene.finish_setup(group).unwrap();

    assert!(matches!(
        scene.remove_child(group, leaf),
        Err(SceneError::MutationSafety(_))
    ));
    assert!(matches!(
        scene.clear_children(group),
        Err(SceneError::MutationSafety(_))
    ));
    assert!(matches!(
        scene.remove_node(leaf),
        Err(SceneError::MutationSafety(_))
    ));
    assert!(matches!(
        scene.set_detachable(group, true),
        Err(SceneError::MutationSafety(_))
    ));
    assert_eq!(scene.attached_sources(group), vec![leaf]);
}

#[test]
fn config_default_applies_to_new_nodes() {
    let mut scene = Scene::new(SceneConfig {
        detachable_by_default: false,
        ..SceneConfig::default()
    });
    let group = complete(&mut scene, "Group");
    let leaf = complete(&mut scene, "Box");

    assert!(!scene.get_node(group).unwrap().is_detachable());
    assert!(matches!(
        scene.add_child(group, leaf),
        Err(SceneError::MutationSafety(_))
    ));
}

// ============================================================================
// Fields and Setup
// ============================================================================

#[test]
fn incomplete_child_is_not_attached() {
    let mut scene = new_scene();
    let group = complete(&mut scene, "Group");
    let leaf = scene.create_node("Sphere").unwrap();
    scene.set_field(leaf, "radius", FieldValue::Float(4.0)).unwrap();
    scene.add_child(group, leaf).unwrap();

    assert_eq!(scene.children(group).unwrap(), &[leaf]);
    assert!(scene.attached_children(group).unwrap().is_empty());

    scene.finish_setup(leaf).unwrap();
    assert_eq!(scene.attached_sources(group), vec![leaf]);

    // Initialize-only fields are frozen once complete.
    assert!(matches!(
        scene.set_field(leaf, "radius", FieldValue::Float(1.0)),
        Err(SceneError::FieldAccess { .. })
    ));
}

#[test]
fn transform_fields_update_the_render_matrix() {
    let mut scene = new_scene();
    let transform = complete(&mut scene, "Transform");
    scene
        .set_field(transform, "translation", FieldValue::Vec3f(Vec3::new(1.0, 2.0, 3.0)))
        .unwrap();

    let render = scene.get_node(transform).unwrap().render_node().unwrap().clone();
    let moved = render.local_matrix().transform_point3(Vec3::ZERO);
    assert!((moved - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-5);
}

#[test]
fn live_container_chains_edits() {
    let mut scene = new_scene();
    let group = complete(&mut scene, "Group");
    let a = complete(&mut scene, "Box");
    let b = complete(&mut scene, "Sphere");

    let result = scene
        .container(group)
        .add_child(a)
        .and_then(|c| c.add_child(b))
        .and_then(|c| c.replace_child(0, b));
    assert!(result.is_ok());
    assert_eq!(scene.children(group).unwrap(), &[b, b]);
    assert!(scene.get_node(a).unwrap().ownership().is_detached());
    assert!(scene.get_node(b).unwrap().ownership().is_shared());
}

// ============================================================================
// Gate Policies
// ============================================================================

#[test]
fn end_of_frame_policy_defers_publishing() {
    let mut scene = Scene::new(SceneConfig {
        gate_policy: GatePolicy::EndOfFrame,
        ..SceneConfig::default()
    });
    let group = complete(&mut scene, "Group");
    let a = complete(&mut scene, "Box");
    let b = complete(&mut scene, "Sphere");
    scene.end_frame();

    scene.add_child(group, a).unwrap();
    scene.add_child(group, b).unwrap();
    assert_eq!(scene.children(group).unwrap(), &[a, b]);
    assert!(scene.attached_children(group).unwrap().is_empty());

    scene.end_frame();
    assert_eq!(scene.attached_sources(group), vec![a, b]);
}

#[test]
fn frame_guard_is_independent_of_immediate_edits() {
    let mut scene = new_scene();
    let group = complete(&mut scene, "Group");
    let leaf = complete(&mut scene, "Box");
    let gate = scene.traversal_gate();

    let frame = gate.begin_frame();
    scene.add_child(group, leaf).unwrap();
    assert_eq!(scene.attached_sources(group), vec![leaf]);
    drop(frame);

    // Nothing is dirty, so this does not wait on the gate.
    scene.end_frame();
}
