//! Fixed-step tick loop.
//!
//! Each tick:
//!
//! 1. Advance the tick counter.
//! 2. Run the [`Schedule`] against the world.
//! 3. Sleep for the rest of the tick budget (skipped when unthrottled).

use std::time::{Duration, Instant};

use anyhow::Result;
use engine_ecs::World;
use tracing::{debug, info, warn};

use crate::scheduler::{Schedule, TickContext};

/// Configuration for the tick loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Target ticks per second. `0` runs unthrottled with a fixed `dt` of
    /// 1/60 s.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
        }
    }
}

impl TickConfig {
    /// Simulated seconds per tick.
    #[must_use]
    pub fn dt(&self) -> f64 {
        if self.tick_rate > 0.0 {
            1.0 / self.tick_rate
        } else {
            1.0 / 60.0
        }
    }

    fn budget(&self) -> Option<Duration> {
        (self.tick_rate > 0.0).then(|| Duration::from_secs_f64(1.0 / self.tick_rate))
    }
}

/// The tick loop state.
#[derive(Debug)]
pub struct TickLoop {
    /// Current tick counter.
    tick_id: u64,
    config: TickConfig,
    world: World,
    schedule: Schedule,
}

impl TickLoop {
    /// Create a tick loop driving `schedule` over `world`.
    #[must_use]
    pub fn new(config: TickConfig, world: World, schedule: Schedule) -> Self {
        Self {
            tick_id: 0,
            config,
            world,
            schedule,
        }
    }

    /// Returns the current tick counter.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// Returns a reference to the world.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Consumes the loop, handing back the world.
    #[must_use]
    pub fn into_world(self) -> World {
        self.world
    }

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// Propagates the first system failure.
    pub fn tick(&mut self, dt: f64) -> Result<()> {
        self.tick_id += 1;
        let ctx = TickContext {
            tick_id: self.tick_id,
            dt,
        };
        debug!(tick_id = self.tick_id, dt, systems = self.schedule.len(), "tick start");
        self.schedule.run(&mut self.world, &ctx)
    }

    /// Run ticks until `max_ticks` is reached, or forever when it is 0.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failing tick.
    pub fn run(&mut self) -> Result<()> {
        let budget = self.config.budget();
        let dt = self.config.dt();
        let mut tick_count = 0u64;

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            "starting tick loop"
        );

        loop {
            let start = Instant::now();
            self.tick(dt)?;

            tick_count += 1;
            if self.config.max_ticks > 0 && tick_count >= self.config.max_ticks {
                info!(ticks = tick_count, "tick loop complete");
                return Ok(());
            }

            let Some(budget) = budget else {
                continue;
            };
            let elapsed = start.elapsed();
            if elapsed < budget {
                std::thread::sleep(budget - elapsed);
            } else {
                warn!(
                    tick_id = self.tick_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = budget.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_schedule() -> Schedule {
        let mut schedule = Schedule::new();
        schedule.add_system("spawn", |world, _| {
            world.create_entity()?;
            Ok(())
        });
        schedule
    }

    #[test]
    fn test_tick_advances_counter() {
        let mut tick_loop = TickLoop::new(TickConfig::default(), World::new(), Schedule::new());
        assert_eq!(tick_loop.tick_id(), 0);
        tick_loop.tick(1.0 / 60.0).unwrap();
        assert_eq!(tick_loop.tick_id(), 1);
        tick_loop.tick(1.0 / 60.0).unwrap();
        assert_eq!(tick_loop.tick_id(), 2);
    }

    #[test]
    fn test_run_limited_ticks() {
        let config = TickConfig {
            tick_rate: 1000.0,
            max_ticks: 5,
        };
        let mut tick_loop = TickLoop::new(config, World::new(), counting_schedule());
        tick_loop.run().unwrap();
        assert_eq!(tick_loop.tick_id(), 5);
        assert_eq!(tick_loop.world().entity_count(), 5);
    }

    #[test]
    fn test_unthrottled_run() {
        let config = TickConfig {
            tick_rate: 0.0,
            max_ticks: 100,
        };
        assert_eq!(config.dt(), 1.0 / 60.0);
        let mut tick_loop = TickLoop::new(config, World::new(), counting_schedule());
        tick_loop.run().unwrap();
        assert_eq!(tick_loop.into_world().entity_count(), 100);
    }

    #[test]
    fn test_run_stops_on_failure() {
        let mut schedule = Schedule::new();
        schedule.add_system("fail_on_third", |_, ctx| {
            anyhow::ensure!(ctx.tick_id < 3, "tick {} rejected", ctx.tick_id);
            Ok(())
        });
        let config = TickConfig {
            tick_rate: 0.0,
            max_ticks: 10,
        };
        let mut tick_loop = TickLoop::new(config, World::new(), schedule);
        assert!(tick_loop.run().is_err());
        assert_eq!(tick_loop.tick_id(), 3);
    }
}
