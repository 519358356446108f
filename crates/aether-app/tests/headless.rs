use aether_app::{Engine, FIXED_DT, run_headless};
use aether_config::{AtmosphereConfig, Config};
use aether_planet::AtmosphereError;
use aether_render::{Extent2d, GraphicsContext, Scene};

fn small_config() -> Config {
    let mut config = Config::default();
    config.window.width = 16;
    config.window.height = 8;
    config.render.headless = true;
    config.render.shadow_map_resolution = 16;
    config.debug.show_frame_stats = true;
    config.atmosphere = AtmosphereConfig {
        max_scattering_order: 2,
        transmittance_width: 32,
        transmittance_height: 16,
        irradiance_width: 16,
        irradiance_height: 4,
        inscatter_r: 4,
        inscatter_mu: 16,
        inscatter_mu_s: 8,
        inscatter_nu: 4,
        transmittance_samples: 40,
        inscatter_samples: 10,
        irradiance_samples: 4,
        spherical_samples: 4,
    };
    config
}

#[test]
fn test_atmosphere_ready_after_one_tick_per_step() {
    let config = small_config();
    let ctx = GraphicsContext::headless(Extent2d::new(16, 8));
    let mut engine = Engine::new(ctx, &config).unwrap();
    let steps = engine.precomputer().total_steps();

    for _ in 0..steps - 1 {
        engine.tick(FIXED_DT);
        assert!(!engine.scene().planet().atmosphere().is_ready());
    }
    engine.tick(FIXED_DT);
    assert!(engine.scene().planet().atmosphere().is_ready());
    assert!(engine.precomputer().is_finished());
    assert!(!engine.precomputer().has_deltas());

    // Further ticks leave the finished tables alone.
    engine.tick(FIXED_DT);
    assert!(engine.precomputer().is_finished());
}

#[test]
fn test_frames_render_while_precomputing() {
    let config = small_config();
    let ctx = GraphicsContext::headless(Extent2d::new(16, 8));
    let mut engine = Engine::new(ctx, &config).unwrap();

    engine.tick(FIXED_DT);
    let first = engine.frame().unwrap();
    assert_eq!(first.frame, 1);
    assert!(first.draw_calls > 0);
    assert_eq!(first.lights, 1);

    let second = engine.frame().unwrap();
    assert_eq!(second.frame, 2);
    assert_eq!(engine.scene().last_stats(), &second);
}

#[test]
fn test_headless_run_reports_last_frame() {
    let config = small_config();
    let stats = run_headless(&config, 3).unwrap();
    assert_eq!(stats.frame, 3);
}

#[test]
fn test_resize_reaches_pipeline() {
    let config = small_config();
    let ctx = GraphicsContext::headless(Extent2d::new(16, 8));
    let mut engine = Engine::new(ctx, &config).unwrap();

    engine.resize(8, 8);
    engine.frame().unwrap();
    assert_eq!(engine.pipeline().size(), Extent2d::new(8, 8));
    assert!((engine.scene().camera().aspect_ratio - 1.0).abs() < 1e-6);
}

#[test]
fn test_minimized_window_keeps_targets_and_aspect() {
    let config = small_config();
    let ctx = GraphicsContext::headless(Extent2d::new(16, 8));
    let mut engine = Engine::new(ctx, &config).unwrap();
    engine.resize(8, 8);
    engine.frame().unwrap();

    for (width, height) in [(0, 0), (0, 8), (8, 0)] {
        engine.resize(width, height);
        engine.frame().unwrap();
        assert_eq!(engine.pipeline().size(), Extent2d::new(8, 8));
        assert_eq!(engine.context_mut().window_size(), Extent2d::new(8, 8));
        assert!((engine.scene().camera().aspect_ratio - 1.0).abs() < 1e-6);
    }
}

#[test]
fn test_precompute_stops_after_unrecoverable_error() {
    let config = small_config();
    let ctx = GraphicsContext::headless(Extent2d::new(16, 8));
    let mut engine = Engine::new(ctx, &config).unwrap();
    for _ in 0..3 {
        engine.tick(FIXED_DT);
    }
    engine.precomputer_mut().unload();

    engine.tick(FIXED_DT);
    assert!(matches!(
        engine.precompute_error(),
        Some(AtmosphereError::OutOfOrder { .. })
    ));
    let (order, step) = (engine.precomputer().order(), engine.precomputer().step());
    let dispatches = engine.context_mut().device_stats().dispatches;

    for _ in 0..5 {
        engine.tick(FIXED_DT);
    }
    assert_eq!(engine.precomputer().order(), order);
    assert_eq!(engine.precomputer().step(), step);
    assert_eq!(engine.context_mut().device_stats().dispatches, dispatches);
    assert!(!engine.scene().planet().atmosphere().is_ready());
    // Frames keep rendering without the sky.
    engine.frame().unwrap();
}
