use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use glam::Vec3;

use trellis::{
    AccessType, FetchQueue, FetchSpec, FieldDecl, FieldType, FieldValue, GatePolicy, Scene,
    SceneConfig, TemplateBody, TemplateNode, TemplateStore, traverse,
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // === 1. Templates ===
    let store = TemplateStore::new();
    let tree = store.define_external_template(
        "Tree",
        vec![
            FieldDecl::new("height", FieldType::SFFloat, AccessType::InitializeOnly)
                .with_default(FieldValue::Float(1.0)),
        ],
        FetchSpec::new(["trees.proto#Tree"]),
    );

    let mut body = TemplateBody::new();
    let ground = body.add(TemplateNode::builtin("Box").with_field(
        "size",
        FieldValue::Vec3f(Vec3::new(20.0, 0.1, 20.0)),
    ));
    let oak = body.add(
        TemplateNode::instance(&tree)
            .with_def("Oak")
            .with_field("height", FieldValue::Float(4.0)),
    );
    let left = body.add(
        TemplateNode::builtin("Transform")
            .with_field("translation", FieldValue::Vec3f(Vec3::new(-3.0, 0.0, 0.0)))
            .with_children([oak]),
    );
    let right = body.add(
        TemplateNode::builtin("Transform")
            .with_field("translation", FieldValue::Vec3f(Vec3::new(3.0, 0.0, 0.0)))
            .with_children([oak]),
    );
    body.add_root(TemplateNode::builtin("Group").with_children([ground, left, right]));
    let park = store.define_template("Park", Vec::new(), body);

    // === 2. Scene ===
    let queue = Arc::new(FetchQueue::new());
    // e.g. TRELLIS_CONFIG='{"gate_policy":"Immediate"}'
    let config = match std::env::var("TRELLIS_CONFIG") {
        Ok(json) => serde_json::from_str::<SceneConfig>(&json)?,
        Err(_) => SceneConfig {
            gate_policy: GatePolicy::EndOfFrame,
            ..SceneConfig::default()
        },
    };
    log::info!("Scene config: {config:?}");
    let mut scene = Scene::new(config);
    scene.set_fetcher(queue.clone());
    let root = scene.build(&park);
    scene.end_frame();
    log::info!("Built {} with {} pending references", park.name(), scene.pending_count());

    // === 3. Fetch collaborator ===
    let fetcher = {
        let requests = queue.take();
        thread::spawn(move || {
            for template in requests {
                thread::sleep(Duration::from_millis(50));
                let mut body = TemplateBody::new();
                let trunk = body.add(TemplateNode::builtin("Cone"));
                let crown = body.add(TemplateNode::builtin("Sphere"));
                body.add_root(TemplateNode::builtin("Group").with_children([trunk, crown]));
                template.on_resolved(body);
            }
        })
    };

    // === 4. Traversal actor ===
    let running = Arc::new(AtomicBool::new(true));
    let renderer = {
        let running = Arc::clone(&running);
        let gate = scene.traversal_gate();
        let root = scene.render_root();
        thread::spawn(move || {
            let mut frame = 0u64;
            while running.load(Ordering::Acquire) {
                {
                    let _frame = gate.begin_frame();
                    let mut drawn = 0usize;
                    traverse(&root, &mut |node, world| {
                        if node.attached_children().is_empty() {
                            drawn += 1;
                            log::trace!("{} at {:?}", node.type_name(), world.translation);
                        }
                    });
                    if frame % 10 == 0 {
                        log::info!("frame {frame}: {drawn} leaves");
                    }
                }
                frame += 1;
                thread::sleep(Duration::from_millis(5));
            }
            frame
        })
    };

    // === 5. Mutator loop ===
    pollster::block_on(scene.wait_for_resolution());
    scene.end_frame();

    let park_group = scene.children(root).and_then(|c| c.first().copied());
    if let Some(group) = park_group {
        let extra = scene.create_node("Sphere")?;
        scene.set_field(extra, "radius", FieldValue::Float(0.5))?;
        scene.finish_setup(extra)?;
        for _ in 0..20 {
            scene.add_child(group, extra)?;
            scene.end_frame();
            thread::sleep(Duration::from_millis(10));
            scene.remove_child(group, extra)?;
            scene.end_frame();
        }
    }

    running.store(false, Ordering::Release);
    let frames = renderer.join().map_err(|_| anyhow::anyhow!("traversal thread panicked"))?;
    fetcher.join().map_err(|_| anyhow::anyhow!("fetch thread panicked"))?;

    for diagnostic in scene.take_diagnostics() {
        log::warn!("{}: {}", diagnostic.context, diagnostic.error);
    }
    log::info!("Rendered {frames} frames over {} nodes", scene.node_count());
    Ok(())
}
