use bevy::prelude::*;
use upright_agent::{Agent, AgentPlugin, UprightPolicy};
use upright_core::{
    load_config, save_config, InitialOrientation, RuntimeVec3, SimConfig, OBSERVATION_LEN,
};
use upright_physics::{EpisodeStats, Lifecycle, PhysicsPlugin, SimWorld};

fn headless_app(config: SimConfig) -> App {
    let agent = Agent::spawn(
        None,
        Box::new(UprightPolicy::default()),
        config.inference.clone(),
    );
    let mut app = App::new();
    app.add_plugins(MinimalPlugins)
        .add_plugins(PhysicsPlugin::new(config).unwrap())
        .add_plugins(AgentPlugin)
        .insert_resource(agent);
    app
}

#[test]
fn test_headless_run_stays_finite() {
    let config = SimConfig {
        seed: Some(42),
        ..Default::default()
    };
    let mut app = headless_app(config);

    for _ in 0..300 {
        app.update();
    }

    let world = app.world().resource::<SimWorld>();
    assert_eq!(world.lifecycle(), Lifecycle::Ready);
    let observation = world.observation();
    assert_eq!(observation.len(), OBSERVATION_LEN);
    assert!(
        observation.as_slice().iter().all(|v| v.is_finite()),
        "observation went non-finite: {:?}",
        observation
    );
    let snapshot = world.snapshot().unwrap();
    assert!(snapshot.position.is_finite());
    assert!(
        snapshot.orientation.value().w >= 0.0,
        "snapshot orientation must be canonical"
    );

    let stats = app.world().resource::<EpisodeStats>();
    assert_eq!(stats.episodes, 0, "300 frames is shorter than one episode");
}

#[test]
fn test_config_file_drives_episodes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.json");

    let mut config = SimConfig {
        seed: Some(7),
        arena_size: 3.0,
        max_episode_steps: 50,
        ..Default::default()
    };
    config.body.initial_orientation = InitialOrientation::Identity;
    save_config(&config, &path).unwrap();

    let loaded = load_config(&path).unwrap();
    assert_eq!(loaded, config);

    let mut app = headless_app(loaded);
    for _ in 0..120 {
        app.update();
    }

    let stats = app.world().resource::<EpisodeStats>();
    assert_eq!(stats.episodes, 2);
    assert_eq!(stats.last_length, 50);
    let world = app.world().resource::<SimWorld>();
    assert_eq!(world.arena_size(), 3.0);
    assert_eq!(world.step_count(), 20);
}

#[test]
fn test_drag_between_frames() {
    let mut config = SimConfig {
        seed: Some(9),
        ..Default::default()
    };
    config.body.initial_orientation = InitialOrientation::Identity;
    let mut app = headless_app(config);
    app.update();

    {
        let mut world = app.world_mut().resource_mut::<SimWorld>();
        let position = world.body_position().unwrap();
        world.grab(RuntimeVec3::new(position)).unwrap();
    }
    for i in 0..20 {
        let target = Vec3::new(0.0, 0.3 + 0.01 * i as f32, 0.0);
        assert!(app
            .world_mut()
            .resource_mut::<SimWorld>()
            .move_grabbed(RuntimeVec3::new(target)));
        app.update();
        assert_eq!(app.world().resource::<SimWorld>().constraint_count(), 1);
    }

    let mut world = app.world_mut().resource_mut::<SimWorld>();
    assert!(world.release());
    assert_eq!(world.constraint_count(), 0);
}
