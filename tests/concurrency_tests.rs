//! Concurrent Traversal Tests
//!
//! A traversal thread reads published child lists while the scene is edited
//! on another thread. Every read must match a state between two complete
//! edits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use trellis::{GatePolicy, NodeHandle, RenderNode, Scene, SceneConfig, traverse};

const OPERATIONS: usize = 10_000;

fn complete(scene: &mut Scene, type_name: &str) -> NodeHandle {
    let handle = scene.create_node(type_name).unwrap();
    scene.finish_setup(handle).unwrap();
    handle
}

/// Cycles add, replace, remove so the child count alternates between `base`
/// and `base + 1`.
fn mutate(scene: &mut Scene, group: NodeHandle, spare: [NodeHandle; 2], frames: bool) {
    let base = scene.children(group).unwrap().len();
    for op in 0..OPERATIONS {
        match op % 3 {
            0 => scene.add_child(group, spare[0]).unwrap(),
            1 => scene.replace_child(group, base, spare[1]).unwrap(),
            _ => scene.remove_child(group, spare[1]).unwrap(),
        }
        if frames {
            scene.end_frame();
        }
    }
}

fn render_node(scene: &Scene, handle: NodeHandle) -> Arc<RenderNode> {
    scene.get_node(handle).unwrap().render_node().unwrap().clone()
}

fn setup(config: SceneConfig) -> (Scene, NodeHandle, [NodeHandle; 2], usize) {
    let mut scene = Scene::new(config);
    let group = complete(&mut scene, "Group");
    let base = 3;
    for _ in 0..base {
        let leaf = complete(&mut scene, "Box");
        scene.add_child(group, leaf).unwrap();
    }
    let spare = [complete(&mut scene, "Sphere"), complete(&mut scene, "Cone")];
    let root = scene.root();
    scene.add_child(root, group).unwrap();
    scene.end_frame();
    (scene, group, spare, base)
}

#[test]
fn reader_never_sees_a_torn_child_list() {
    let (mut scene, group, spare, base) = setup(SceneConfig::default());
    let render = render_node(&scene, group);
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut reads = 0usize;
            loop {
                let finished = done.load(Ordering::Acquire);
                let snapshot = render.attached_children();
                let len = snapshot.len();
                assert!(len == base || len == base + 1, "torn read: {len} children");
                // A snapshot never changes once taken.
                assert_eq!(snapshot.len(), len);
                reads += 1;
                if finished {
                    break reads;
                }
            }
        });

        mutate(&mut scene, group, spare, false);
        done.store(true, Ordering::Release);
        assert!(reader.join().unwrap() > 0);
    });

    // The last operation is an add.
    assert_eq!(scene.attached_children(group).unwrap().len(), base + 1);
}

#[test]
fn full_traversal_under_end_of_frame_policy() {
    let config = SceneConfig {
        gate_policy: GatePolicy::EndOfFrame,
        ..SceneConfig::default()
    };
    let (mut scene, group, spare, base) = setup(config);
    let root = scene.render_root();
    let gate = scene.traversal_gate();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut frames = 0usize;
            loop {
                let finished = done.load(Ordering::Acquire);
                let _frame = gate.begin_frame();
                let mut leaves = 0usize;
                traverse(&root, &mut |node, _| {
                    if node.attached_children().is_empty() {
                        leaves += 1;
                    }
                });
                assert!(
                    leaves == base || leaves == base + 1,
                    "frame saw {leaves} leaves"
                );
                frames += 1;
                if finished {
                    break frames;
                }
            }
        });

        mutate(&mut scene, group, spare, true);
        done.store(true, Ordering::Release);
        assert!(reader.join().unwrap() > 0);
    });
}
