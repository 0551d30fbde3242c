use bevy::prelude::*;
use tracing::error;

use crate::config::FlockConfig;
use crate::driver::Simulation;
use crate::forces::Obstacle;
use crate::lod::ViewRect;

/// Obstacles the host edits; pushed into the simulation when changed.
#[derive(Resource, Default, Clone, Debug)]
pub struct FlockObstacles(pub Vec<Obstacle>);

/// Current view for LOD aggregation.
#[derive(Resource, Default, Clone, Copy, Debug)]
pub struct FlockView(pub Option<ViewRect>);

/// Inserts a [`Simulation`] resource and steps it once per `Update`.
#[derive(Default)]
pub struct FlockPlugin {
    pub config: FlockConfig,
}

impl Plugin for FlockPlugin {
    fn build(&self, app: &mut App) {
        let sim = match Simulation::new(self.config.clone()) {
            Ok(sim) => sim,
            Err(err) => {
                error!(%err, "flock plugin not installed");
                return;
            }
        };
        app.insert_resource(sim)
            .init_resource::<FlockObstacles>()
            .init_resource::<FlockView>()
            .add_systems(Update, (sync_obstacles, sync_view, step_flock).chain());
    }
}

fn sync_obstacles(obstacles: Res<FlockObstacles>, mut sim: ResMut<Simulation>) {
    if obstacles.is_changed() {
        sim.set_obstacles(&obstacles.0);
    }
}

fn sync_view(view: Res<FlockView>, mut sim: ResMut<Simulation>) {
    if view.is_changed() {
        sim.set_view(view.0);
    }
}

fn step_flock(time: Res<Time>, mut sim: ResMut<Simulation>) {
    // long frames are cut down rather than integrated in one jump
    let dt = time.delta_secs().min(sim.config().max_dt);
    sim.step(dt);
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;

    fn app(config: FlockConfig) -> App {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, FlockPlugin { config }));
        app
    }

    #[test]
    fn update_steps_the_simulation() {
        let mut app = app(FlockConfig {
            entity_count: 100,
            seed: Some(1),
            ..Default::default()
        });
        app.update();
        app.update();
        assert_eq!(app.world().resource::<Simulation>().frame(), 2);
    }

    #[test]
    fn obstacle_resource_reaches_the_simulation() {
        let mut app = app(FlockConfig {
            entity_count: 10,
            seed: Some(1),
            ..Default::default()
        });
        app.world_mut().resource_mut::<FlockObstacles>().0.push(Obstacle {
            position: Vec2::ZERO,
            radius: 50.0,
            strength: 1.0,
        });
        app.update();
        assert_eq!(app.world().resource::<Simulation>().obstacles().len(), 1);
    }

    #[test]
    fn invalid_config_installs_nothing() {
        let mut cfg = FlockConfig::default();
        cfg.forces.visual_range = 0.0;
        let app = app(cfg);
        assert!(app.world().get_resource::<Simulation>().is_none());
    }
}
