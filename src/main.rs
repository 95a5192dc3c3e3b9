use std::time::Duration;

use bevy::app::{AppExit, ScheduleRunnerPlugin};
use bevy::log::LogPlugin;
use bevy::prelude::*;
use upright_agent::{Agent, AgentPlugin, UprightPolicy};
use upright_core::{load_config, SimConfig};
use upright_physics::{EpisodeStats, PhysicsPlugin, SimulationSet};

/// Host loop rate.
const FRAME_RATE: f64 = 60.0;

#[derive(Default)]
struct CliArgs {
    config_path: Option<String>,
    episodes: Option<u32>,
}

/// Parse command-line arguments.
///
/// Supported args:
/// - `<config.json>` - Simulation config (defaults when omitted)
/// - `--episodes <N>` - Exit after N finished episodes
fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        match args[i].as_str() {
            "--episodes" => {
                match args.get(i + 1).and_then(|n| n.parse().ok()) {
                    Some(n) => cli.episodes = Some(n),
                    None => eprintln!("Warning: --episodes requires a number"),
                }
                i += 2;
            }
            path if cli.config_path.is_none() => {
                cli.config_path = Some(path.to_string());
                i += 1;
            }
            other => {
                eprintln!("Warning: ignoring argument '{}'", other);
                i += 1;
            }
        }
    }
    cli
}

#[derive(Resource)]
struct EpisodeLimit(u32);

fn main() -> AppExit {
    let cli = parse_args();

    let config = match &cli.config_path {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path, e);
                return AppExit::error();
            }
        },
        None => SimConfig::default(),
    };

    let physics = match PhysicsPlugin::new(config.clone()) {
        Ok(plugin) => plugin,
        Err(e) => {
            eprintln!("Invalid simulation config: {}", e);
            return AppExit::error();
        }
    };

    // No camera in headless runs, so no pose estimator: the world falls back
    // to ground-truth orientation.
    let agent = Agent::spawn(
        None,
        Box::new(UprightPolicy::default()),
        config.inference.clone(),
    );

    let mut app = App::new();
    app.add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(
        Duration::from_secs_f64(1.0 / FRAME_RATE),
    )))
    .add_plugins(LogPlugin::default())
    .add_plugins(physics)
    .add_plugins(AgentPlugin)
    .insert_resource(agent);

    if let Some(episodes) = cli.episodes {
        app.insert_resource(EpisodeLimit(episodes)).add_systems(
            Update,
            exit_after_episodes.after(SimulationSet::Outputs),
        );
    }

    app.run()
}

fn exit_after_episodes(
    limit: Res<EpisodeLimit>,
    stats: Option<Res<EpisodeStats>>,
    mut exit: EventWriter<AppExit>,
) {
    let Some(stats) = stats else {
        exit.write(AppExit::error());
        return;
    };
    if stats.episodes >= limit.0 {
        info!(
            "Finished {} episodes, best reward {:.3}",
            stats.episodes,
            stats.best_reward.unwrap_or(0.0)
        );
        exit.write(AppExit::Success);
    }
}
