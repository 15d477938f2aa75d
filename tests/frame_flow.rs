//! End-to-end frame tests against the headless engine.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

use rstest::rstest;
use strata::postprocess::render_pipeline::{
    BloomConfig, PostProcessRenderEffect, PostProcessRenderPipeline, bloom_pipeline,
};
use strata::postprocess::{PostProcess, PostProcessManager, PostProcessOptions, PostProcessRef, builtin};
use strata::rendering::{
    GroupRenderer, Material, Mesh, QueuedSubMesh, RenderStage, RenderingGroup, SortPolicy, SubMesh,
};
use strata::scene::{Renderable, Scene, Transform};
use strata::{Camera, FrameTarget, HeadlessEngine, Vec2, Vec3};

#[derive(Default)]
struct Recorder {
    draws: Vec<(RenderStage, String)>,
}

impl Recorder {
    fn names(&self) -> Vec<&str> {
        self.draws.iter().map(|(_, name)| name.as_str()).collect()
    }
}

impl GroupRenderer for Recorder {
    fn render_sub_mesh(&mut self, stage: RenderStage, sub_mesh: &QueuedSubMesh) {
        self.draws.push((stage, sub_mesh.mesh().name.clone()));
    }
}

#[derive(Clone, Copy, Debug)]
enum Kind {
    Opaque,
    AlphaTest,
    Transparent,
}

fn material(kind: Kind) -> Material {
    match kind {
        Kind::Opaque => Material::new("opaque"),
        Kind::AlphaTest => Material::new("cutout").with_alpha_test(true),
        Kind::Transparent => Material::new("glass").with_alpha_blending(true),
    }
}

fn sub_mesh(name: &str, kind: Kind, center: Vec3) -> Arc<SubMesh> {
    let mesh = Arc::new(Mesh::new(name));
    Arc::new(SubMesh::new(mesh, Some(Arc::new(material(kind)))).with_bounding_center(center))
}

#[rstest]
#[case::opaque(Kind::Opaque, RenderStage::Opaque)]
#[case::alpha_test(Kind::AlphaTest, RenderStage::AlphaTest)]
#[case::transparent(Kind::Transparent, RenderStage::Transparent)]
fn equal_keys_keep_dispatch_order(#[case] kind: Kind, #[case] stage: RenderStage) {
    let tie = || SortPolicy::custom(|_: &QueuedSubMesh, _: &QueuedSubMesh| Ordering::Equal);
    let mut group = RenderingGroup::with_policies(0, tie(), tie(), tie());
    let camera = Camera::new("main");

    for name in ["d", "b", "e", "a", "c"] {
        group.dispatch(&sub_mesh(name, kind, Vec3::new(0.0, 0.0, -4.0)), None, None);
    }

    let mut recorder = Recorder::default();
    group.render(&mut recorder, None, true, true, &[], &camera);
    assert!(recorder.draws.iter().all(|(s, _)| *s == stage));
    assert_eq!(recorder.names(), vec!["d", "b", "e", "a", "c"]);
}

#[test]
fn farther_transparent_submesh_draws_first() {
    let mut group = RenderingGroup::new(0);
    let camera = Camera::new("main").at(0.0, 0.0, 0.0);
    group.dispatch(&sub_mesh("A", Kind::Transparent, Vec3::new(0.0, 0.0, -5.0)), None, None);
    group.dispatch(&sub_mesh("B", Kind::Transparent, Vec3::new(0.0, 0.0, -10.0)), None, None);

    let mut recorder = Recorder::default();
    group.render(&mut recorder, None, true, true, &[], &camera);
    assert_eq!(recorder.names(), vec!["B", "A"]);
}

#[test]
fn opaque_queue_without_comparator_keeps_dispatch_order() {
    let mut group = RenderingGroup::new(0);
    let camera = Camera::new("main").at(0.0, 0.0, 0.0);
    group.dispatch(&sub_mesh("C", Kind::Opaque, Vec3::new(0.0, 0.0, -1.0)), None, None);
    group.dispatch(&sub_mesh("A", Kind::Opaque, Vec3::new(0.0, 0.0, -9.0)), None, None);
    group.dispatch(&sub_mesh("B", Kind::Opaque, Vec3::new(0.0, 0.0, -4.0)), None, None);

    let mut recorder = Recorder::default();
    group.render(&mut recorder, None, true, true, &[], &camera);
    assert_eq!(recorder.names(), vec!["C", "A", "B"]);
}

#[test]
fn every_dispatched_submesh_lands_in_exactly_one_queue() {
    let mut group = RenderingGroup::new(0);
    group.prepare();
    let materials = [
        Material::new("plain"),
        Material::new("cutout").with_alpha_test(true),
        Material::new("glass").with_alpha(0.5),
        Material::new("blended cutout").with_alpha_blending(true).with_alpha_test(true),
        Material::new("forced depth").with_alpha(0.5).with_force_depth_write(true),
        Material::new("pre-pass").with_depth_pre_pass_only(true),
    ];
    let mut names = Vec::new();
    for (i, material) in materials.into_iter().enumerate() {
        let name = format!("mesh{i}");
        let mesh = Arc::new(Mesh::new(&name));
        group.dispatch(&Arc::new(SubMesh::new(mesh, Some(Arc::new(material)))), None, None);
        names.push(name);
    }

    let queues = group.queues();
    let all: Vec<&QueuedSubMesh> = queues
        .opaque
        .iter()
        .chain(queues.alpha_test)
        .chain(queues.transparent)
        .chain(queues.depth_only)
        .collect();
    assert_eq!(all.len(), names.len());
    for name in &names {
        assert_eq!(all.iter().filter(|q| &q.mesh().name == name).count(), 1, "{name}");
    }
}

#[test]
fn double_dispose_matches_single_dispose() {
    let mut engine = HeadlessEngine::new(640, 480);
    let camera = Camera::new("main").into_ref();

    let mut group = RenderingGroup::new(0);
    group.dispatch(&sub_mesh("a", Kind::Opaque, Vec3::ZERO), None, None);
    group.dispose();
    group.dispose();
    assert!(group.is_disposed());
    assert!(group.queues().is_empty());

    let pp = PostProcess::new(&mut engine, "copy", "", PostProcessOptions::new()).into_ref();
    camera.borrow_mut().attach_post_process(Rc::clone(&pp), None);
    pp.borrow_mut().activate(&mut engine, &camera.borrow(), None, false);
    pp.borrow_mut().dispose(&mut engine, None);
    let textures_after_one = engine.live_texture_count();
    pp.borrow_mut().dispose(&mut engine, None);
    assert!(pp.borrow().is_disposed());
    assert_eq!(engine.live_texture_count(), textures_after_one);
    assert_eq!(engine.live_texture_count(), 0);

    let mut pipeline = bloom_pipeline("bloom", BloomConfig::new());
    pipeline.attach_cameras(&mut engine, &[Rc::clone(&camera)], false).unwrap();
    pipeline.dispose(&mut engine);
    pipeline.dispose(&mut engine);
    assert!(pipeline.is_disposed());
    assert_eq!(engine.live_effect_count(), 0);
}

#[test]
fn shared_output_follows_the_owner_until_released() {
    let mut engine = HeadlessEngine::new(640, 480);
    let camera = Camera::new("main");
    let owner = PostProcess::new(&mut engine, "owner", "", PostProcessOptions::new()).into_ref();
    let alias = PostProcess::new(&mut engine, "alias", "", PostProcessOptions::new()).into_ref();

    let owned = owner.borrow_mut().activate(&mut engine, &camera, None, false).unwrap();
    alias.borrow_mut().share_output_with(&mut engine, &owner).unwrap();
    assert_eq!(alias.borrow_mut().activate(&mut engine, &camera, None, false), Some(owned));
    assert_eq!(owner.borrow().alias_count(), 1);

    alias.borrow_mut().use_own_output();
    let own = alias.borrow_mut().activate(&mut engine, &camera, None, false).unwrap();
    assert_ne!(own, owned);
    assert_eq!(owner.borrow().alias_count(), 0);
}

#[test]
fn rebuilt_alias_resolves_to_the_owners_new_texture() {
    let mut engine = HeadlessEngine::new(640, 480);
    let camera = Camera::new("main").into_ref();
    let passes: Rc<RefCell<Vec<PostProcessRef>>> = Rc::new(RefCell::new(Vec::new()));

    let mut pipeline = PostProcessRenderPipeline::new("aliasing");
    let created = Rc::clone(&passes);
    pipeline.add_effect(PostProcessRenderEffect::new("pair", true, move |engine| {
        let alias = PostProcess::new(engine, "alias", "", PostProcessOptions::new()).into_ref();
        let owner = PostProcess::new(engine, "owner", "", PostProcessOptions::new()).into_ref();
        alias.borrow_mut().share_output_with(engine, &owner)?;
        created.borrow_mut().extend([Rc::clone(&owner), Rc::clone(&alias)]);
        // Alias first in the chain so only the rebuild order puts the owner ahead.
        Ok(vec![alias, owner])
    }));
    pipeline.attach_cameras(&mut engine, &[Rc::clone(&camera)], true).unwrap();

    let (owner, alias) = {
        let passes = passes.borrow();
        (Rc::clone(&passes[0]), Rc::clone(&passes[1]))
    };
    owner.borrow_mut().activate(&mut engine, &camera.borrow(), None, false);
    let before = owner.borrow().input_texture().unwrap();

    engine.lose_device();
    pipeline.rebuild(&mut engine);

    let after = owner.borrow().input_texture().unwrap();
    assert_ne!(after, before);
    assert!(engine.is_texture_alive(after));
    let resolved = alias.borrow_mut().activate(&mut engine, &camera.borrow(), None, false);
    assert_eq!(resolved, Some(after));
}

#[test]
fn detaching_a_camera_frees_every_pass_it_used() {
    let mut engine = HeadlessEngine::new(640, 480);
    let camera = Camera::new("x").into_ref();
    let copy_slot: Rc<RefCell<Option<PostProcessRef>>> = Rc::new(RefCell::new(None));

    let mut pipeline = PostProcessRenderPipeline::new("fx");
    let slot = Rc::clone(&copy_slot);
    pipeline.add_effect(PostProcessRenderEffect::new("Copy", false, move |engine| {
        let copy = builtin::pass(engine, "copy", PostProcessOptions::new()).into_ref();
        *slot.borrow_mut() = Some(Rc::clone(&copy));
        Ok(vec![copy])
    }));
    pipeline.add_effect(PostProcessRenderEffect::new("Blur", false, |engine| {
        let options = PostProcessOptions::new().ratio(0.5);
        Ok(vec![builtin::blur(engine, "blur", Vec2::X, 8, options).into_ref()])
    }));
    let slot = Rc::clone(&copy_slot);
    pipeline.add_effect(PostProcessRenderEffect::new("Combine", false, move |engine| {
        let original = slot.borrow().clone().ok_or_else(|| {
            strata::RenderError::InvalidConfiguration("copy pass missing".to_string())
        })?;
        Ok(vec![builtin::combine(engine, "combine", &original, 0.5, PostProcessOptions::new()).into_ref()])
    }));
    pipeline.attach_cameras(&mut engine, &[Rc::clone(&camera)], false).unwrap();

    let mut manager = PostProcessManager::new();
    assert!(manager.prepare_frame(&mut engine, &camera.borrow(), None));
    assert_eq!(manager.finalize_frame(&mut engine, &camera.borrow(), None, false), 3);
    assert!(engine.live_texture_count() > 0);

    let id = camera.borrow().id();
    let used: Vec<PostProcessRef> = pipeline
        .effects()
        .flat_map(|effect| effect.post_processes(Some(id)))
        .collect();
    assert_eq!(used.len(), 3);
    copy_slot.borrow_mut().take();

    pipeline.detach_cameras(&mut engine, &[Rc::clone(&camera)]);
    for effect in pipeline.effects() {
        assert!(effect.post_processes(Some(id)).is_empty());
    }
    assert!(used.iter().all(|pp| pp.borrow().is_disposed()));
    assert!(camera.borrow().active_post_processes().is_empty());
    assert_eq!(engine.live_texture_count(), 0);
    assert_eq!(engine.live_effect_count(), 0);
}

#[test]
fn scene_frame_runs_groups_then_bloom_to_screen() {
    let mut engine = HeadlessEngine::new(800, 600);
    let mut scene = Scene::new();
    let camera = scene.add_camera(Camera::new("main").at(0.0, 0.0, 0.0));

    for (name, group, z) in [("overlay", 1, -1.0), ("far", 0, -20.0), ("near", 0, -2.0)] {
        let mesh = Arc::new(Mesh::new(name).with_rendering_group(group));
        let sub_mesh = SubMesh::new(Arc::clone(&mesh), Some(Arc::new(Material::new(name))));
        scene.world.spawn((
            Transform::from_position(Vec3::new(0.0, 0.0, z)),
            Renderable::new(mesh).with_sub_mesh(sub_mesh),
        ));
    }
    scene.pipeline_manager.add_pipeline(bloom_pipeline("bloom", BloomConfig::new()));
    scene
        .pipeline_manager
        .attach_cameras_to_render_pipeline(&mut engine, "bloom", &[Rc::clone(&camera)], false)
        .unwrap();

    let mut recorder = Recorder::default();
    scene.render(&mut engine, &mut recorder);

    assert_eq!(recorder.names(), vec!["far", "near", "overlay"]);
    let draws = engine.draws();
    assert_eq!(draws.len(), 5);
    assert_eq!(draws.last().map(|(_, target)| *target), Some(FrameTarget::Screen));
    assert!(
        draws[..4]
            .iter()
            .all(|(_, target)| matches!(target, FrameTarget::Texture(_)))
    );
}
