//! Whole-frame behaviour of the pipeline on the headless device.

use std::cell::RefCell;
use std::rc::Rc;

use aether_config::RenderConfig;
use aether_lighting::{DirectionalLight, Light, LightId, PointLight, SceneLight};
use aether_render::{
    Camera, Entity, Extent2d, GraphicsContext, MeshData, MeshEntity, Pass, PassInspector,
    RenderPipeline, Scene, SurfaceMaterial, TargetId, TextureData, WindowEvents,
};
use glam::{Mat4, Vec3, Vec4};

const SIZE: Extent2d = Extent2d {
    width: 24,
    height: 16,
};

struct TestScene {
    camera: Camera,
    entities: Vec<Box<dyn Entity>>,
    lights: Vec<(LightId, Light)>,
}

impl TestScene {
    fn new(ctx: &mut GraphicsContext, lights: Vec<(LightId, Light)>) -> Self {
        let ground = ctx.create_mesh(&MeshData::plane()).unwrap();
        let cube = ctx.create_mesh(&MeshData::cube()).unwrap();
        Self {
            camera: Camera {
                aspect_ratio: SIZE.aspect(),
                ..Camera::looking_at(Vec3::new(0.0, 4.0, 8.0), Vec3::ZERO, Vec3::Y)
            },
            entities: vec![
                Box::new(MeshEntity::new(
                    ground,
                    Mat4::from_scale(Vec3::splat(20.0)),
                    SurfaceMaterial::default(),
                )),
                Box::new(MeshEntity::new(
                    cube,
                    Mat4::from_translation(Vec3::Y),
                    SurfaceMaterial {
                        albedo: Vec3::new(0.9, 0.2, 0.2),
                        ..Default::default()
                    },
                )),
            ],
            lights,
        }
    }
}

impl Scene for TestScene {
    fn name(&self) -> &str {
        "test"
    }

    fn camera(&self) -> &Camera {
        &self.camera
    }

    fn entities(&self) -> &[Box<dyn Entity>] {
        &self.entities
    }

    fn lights(&self) -> Vec<SceneLight<'_>> {
        self.lights
            .iter()
            .map(|(id, light)| SceneLight { id: *id, light })
            .collect()
    }
}

fn setup() -> (GraphicsContext, WindowEvents, RenderPipeline) {
    let mut ctx = GraphicsContext::headless(SIZE);
    let mut events = WindowEvents::new();
    let pipeline = RenderPipeline::initialize(&mut ctx, &RenderConfig::default(), &mut events)
        .expect("pipeline");
    (ctx, events, pipeline)
}

fn sun() -> (LightId, Light) {
    (
        LightId(1),
        Light::from(DirectionalLight::new(Vec3::new(-0.3, -1.0, -0.2), 3.0)),
    )
}

/// Captures HDR colour and depth after selected passes.
#[derive(Default)]
struct Captures {
    gbuffer: Option<TargetId>,
    post: Option<TargetId>,
    after_composite: Option<(TextureData, TextureData, TextureData)>,
    after_volumes: Option<TextureData>,
}

struct Capture(Rc<RefCell<Captures>>);

impl PassInspector for Capture {
    fn after_pass(&mut self, pass: Pass, ctx: &mut GraphicsContext) {
        let mut c = self.0.borrow_mut();
        let (Some(gbuffer), Some(post)) = (c.gbuffer, c.post) else {
            return;
        };
        match pass {
            Pass::LightingComposite => {
                c.after_composite = Some((
                    ctx.read_color(post, 0).unwrap(),
                    ctx.read_depth(gbuffer).unwrap(),
                    ctx.read_depth(post).unwrap(),
                ));
            }
            Pass::LightVolumes => c.after_volumes = Some(ctx.read_color(post, 0).unwrap()),
            _ => {}
        }
    }
}

fn capture(pipeline: &mut RenderPipeline) -> Rc<RefCell<Captures>> {
    let captures = Rc::new(RefCell::new(Captures {
        gbuffer: Some(pipeline.gbuffer().target().id()),
        post: Some(pipeline.post_processing().target().id()),
        ..Default::default()
    }));
    pipeline.set_inspector(Some(Box::new(Capture(captures.clone()))));
    captures
}

#[test]
fn resize_rebuilds_targets_at_the_new_size() {
    let (mut ctx, mut events, mut pipeline) = setup();
    let mut scene = TestScene::new(&mut ctx, vec![sun()]);
    pipeline
        .draw(&mut ctx, &mut [&mut scene], TargetId::SURFACE)
        .unwrap();
    let old_gbuffer = pipeline.gbuffer().target().id();
    let old_post = pipeline.post_processing().target().id();

    let new_size = Extent2d::new(40, 30);
    events.notify_resize(new_size);
    scene.camera.set_aspect_ratio(40.0, 30.0);
    pipeline
        .draw(&mut ctx, &mut [&mut scene], TargetId::SURFACE)
        .unwrap();

    assert_eq!(pipeline.gbuffer().size(), new_size);
    assert_eq!(pipeline.post_processing().target().size(), new_size);
    assert_eq!(ctx.window_size(), new_size);
    assert!(ctx.target_size(old_gbuffer).is_none());
    assert!(ctx.target_size(old_post).is_none());

    let state = ctx.state();
    assert_ne!(state.draw_target, old_gbuffer);
    assert_ne!(state.draw_target, old_post);
    assert_eq!(state.read_target, pipeline.gbuffer().target().id());
}

#[test]
fn empty_scene_list_clears_output() {
    let (mut ctx, _events, mut pipeline) = setup();
    let config = RenderConfig::default();
    pipeline.draw(&mut ctx, &mut [], TargetId::SURFACE).unwrap();

    let expected = Vec3::from(config.clear_color).extend(1.0);
    let out = ctx.read_color(TargetId::SURFACE, 0).unwrap();
    assert!(out.texels.iter().all(|t| *t == expected));
}

#[test]
fn blitted_depth_matches_gbuffer_depth() {
    let (mut ctx, _events, mut pipeline) = setup();
    let mut scene = TestScene::new(&mut ctx, vec![sun()]);
    let captures = capture(&mut pipeline);
    pipeline
        .draw(&mut ctx, &mut [&mut scene], TargetId::SURFACE)
        .unwrap();

    let c = captures.borrow();
    let (_, gbuffer_depth, post_depth) = c.after_composite.as_ref().unwrap();
    assert!(gbuffer_depth.texels.iter().any(|t| t.x > 0.0));
    assert!(gbuffer_depth.bit_eq(post_depth));
}

#[test]
fn zero_lights_add_no_energy() {
    let (mut ctx, _events, mut pipeline) = setup();
    let mut scene = TestScene::new(&mut ctx, Vec::new());
    let captures = capture(&mut pipeline);
    let stats = pipeline
        .draw(&mut ctx, &mut [&mut scene], TargetId::SURFACE)
        .unwrap();
    assert_eq!(stats.lights, 0);

    let c = captures.borrow();
    let (before, _, _) = c.after_composite.as_ref().unwrap();
    assert!(before.bit_eq(c.after_volumes.as_ref().unwrap()));
}

#[test]
fn lights_accumulate_energy() {
    let (mut ctx, _events, mut pipeline) = setup();
    let lamp = (
        LightId(2),
        Light::from(PointLight {
            position: Vec3::new(0.0, 1.0, 2.5),
            brightness: 4.0,
            radius: 4.0,
            ..Default::default()
        }),
    );
    let mut scene = TestScene::new(&mut ctx, vec![sun(), lamp]);
    let captures = capture(&mut pipeline);
    let stats = pipeline
        .draw(&mut ctx, &mut [&mut scene], TargetId::SURFACE)
        .unwrap();
    assert_eq!(stats.lights, 2);
    assert_eq!(stats.shadow_maps, 1);

    let c = captures.borrow();
    let (before, _, _) = c.after_composite.as_ref().unwrap();
    let after = c.after_volumes.as_ref().unwrap();
    assert!(after.sum().x > before.sum().x);
    // Accumulation writes alpha 0, so the resolve's alpha survives.
    assert_eq!(after.sum().w, before.sum().w);
}

#[test]
fn steady_frames_suppress_redundant_state() {
    let (mut ctx, _events, mut pipeline) = setup();
    let mut scene = TestScene::new(&mut ctx, vec![sun()]);
    pipeline
        .draw(&mut ctx, &mut [&mut scene], TargetId::SURFACE)
        .unwrap();

    let before = ctx.device_stats().state_changes;
    let stats = pipeline
        .draw(&mut ctx, &mut [&mut scene], TargetId::SURFACE)
        .unwrap();
    assert!(stats.suppressed > 0);
    assert_eq!(ctx.device_stats().state_changes - before, stats.state_changes);
    assert_eq!(stats.frame, 2);
}

#[test]
fn output_may_be_an_offscreen_target() {
    let (mut ctx, _events, mut pipeline) = setup();
    let mut scene = TestScene::new(&mut ctx, vec![sun()]);
    let editor_view = ctx
        .create_target(&aether_render::TargetDescriptor {
            label: "editor-view".into(),
            size: SIZE,
            color: vec![aether_render::TextureFormat::Rgba8Unorm],
            depth: false,
        })
        .unwrap();
    pipeline
        .draw(&mut ctx, &mut [&mut scene], editor_view.id())
        .unwrap();
    let out = ctx.read_color(editor_view.id(), 0).unwrap();
    assert!(out.texels.iter().all(|t| t.w == 1.0));
    assert!(out.texels.iter().any(|t| *t != Vec4::new(0.0, 0.0, 0.0, 1.0)));
}
