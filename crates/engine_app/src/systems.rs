//! Demo systems exercising entity churn, batched writes, and cached queries.

use anyhow::Result;
use engine_component::{ComponentType, EntityId};
use engine_ecs::{QueryConfig, World};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::scheduler::{Schedule, TickContext};

/// The component types used by the demo.
#[derive(Debug, Clone)]
pub struct DemoComponents {
    pub position: ComponentType,
    pub velocity: ComponentType,
    pub frozen: ComponentType,
    pub highlighted: ComponentType,
}

impl DemoComponents {
    /// Define the demo component types.
    ///
    /// # Errors
    ///
    /// Fails only if a definition is malformed.
    pub fn new() -> Result<Self> {
        Ok(Self {
            position: ComponentType::new("Position", json!({ "x": 0.0, "y": 0.0 }))?,
            velocity: ComponentType::new("Velocity", json!({ "dx": 0.0, "dy": 0.0 }))?,
            frozen: ComponentType::tag("Frozen")?,
            highlighted: ComponentType::tag("Highlighted")?,
        })
    }

    /// Every type, for snapshot restore.
    #[must_use]
    pub fn all(&self) -> Vec<ComponentType> {
        vec![
            self.position.clone(),
            self.velocity.clone(),
            self.frozen.clone(),
            self.highlighted.clone(),
        ]
    }
}

/// Seeded generator so demo runs are reproducible across platforms.
pub type DemoRng = ChaCha8Rng;

/// Build the demo generator from a seed.
#[must_use]
pub fn demo_rng(seed: u64) -> DemoRng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Create one demo entity. Every seventh is frozen and every fifth highlighted.
///
/// # Errors
///
/// Propagates allocation failures.
pub fn spawn(world: &mut World, types: &DemoComponents, rng: &mut DemoRng) -> Result<EntityId> {
    let e = world.create_entity()?;
    let x: f64 = rng.gen_range(-100.0..100.0);
    world.add_component(e, &types.position, json!({ "x": x }))?;
    let (dx, dy): (f64, f64) = (rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
    world.add_component(e, &types.velocity, json!({ "dx": dx, "dy": dy }))?;
    let roll: u32 = rng.gen_range(0..35);
    if roll % 7 == 0 {
        world.add_component(e, &types.frozen, Value::Null)?;
    }
    if roll % 5 == 0 {
        world.add_component(e, &types.highlighted, Value::Null)?;
    }
    Ok(e)
}

/// Spawn `count` entities inside one invalidation batch.
///
/// # Errors
///
/// Propagates allocation failures.
pub fn populate(
    world: &mut World,
    types: &DemoComponents,
    rng: &mut DemoRng,
    count: usize,
) -> Result<()> {
    world.batch(|world| -> Result<()> {
        for _ in 0..count {
            spawn(world, types, rng)?;
        }
        Ok(())
    })
}

/// Destroys `churn` random entities and spawns as many replacements.
pub fn churn(
    types: DemoComponents,
    churn: usize,
    seed: u64,
) -> impl FnMut(&mut World, &TickContext) -> Result<()> {
    let mut rng = demo_rng(seed);
    move |world: &mut World, ctx: &TickContext| -> Result<()> {
        let alive = world.entities();
        if alive.is_empty() {
            return Ok(());
        }
        let victims: Vec<EntityId> = (0..churn.min(alive.len()))
            .map(|_| alive[rng.gen_range(0..alive.len())])
            .collect();
        let destroyed = victims.into_iter().filter(|&e| world.destroy_entity(e)).count();
        for _ in 0..destroyed {
            spawn(world, &types, &mut rng)?;
        }
        debug!(tick_id = ctx.tick_id, destroyed, "churned entities");
        Ok(())
    }
}

/// Moves every non-frozen entity by its velocity.
///
/// # Errors
///
/// Fails if the query configuration is invalid.
pub fn integrate(
    world: &World,
    types: DemoComponents,
) -> Result<impl FnMut(&mut World, &TickContext) -> Result<()> + use<>> {
    let moving = world.query(
        QueryConfig::new()
            .with([&types.position, &types.velocity])
            .without([&types.frozen]),
    )?;
    Ok(move |world: &mut World, ctx: &TickContext| -> Result<()> {
        let rows = moving.rows(world);
        world.batch(|world| -> Result<()> {
            for row in rows.iter() {
                let (Some(pos), Some(vel)) = (row.get(0), row.get(1)) else {
                    continue;
                };
                let x = field(pos, "x") + field(vel, "dx") * ctx.dt;
                let y = field(pos, "y") + field(vel, "dy") * ctx.dt;
                world.add_component(row.entity, &types.position, json!({ "x": x, "y": y }))?;
            }
            Ok(())
        })?;
        debug!(tick_id = ctx.tick_id, moved = rows.len(), "integrated positions");
        Ok(())
    })
}

/// Logs entity counts every `every` ticks.
///
/// # Errors
///
/// Fails if the query configuration is invalid.
pub fn report(
    world: &World,
    types: DemoComponents,
    every: u64,
) -> Result<impl FnMut(&mut World, &TickContext) -> Result<()> + use<>> {
    let flagged = world.query(
        QueryConfig::new()
            .with([&types.position])
            .one_of([&types.frozen, &types.highlighted]),
    )?;
    let every = every.max(1);
    Ok(move |world: &mut World, ctx: &TickContext| -> Result<()> {
        if ctx.tick_id % every == 0 {
            info!(
                tick_id = ctx.tick_id,
                entities = world.entity_count(),
                flagged = flagged.count(world),
                retired = world.entity_manager().retired_count(),
                "world stats"
            );
        }
        Ok(())
    })
}

/// Builds the demo schedule: churn, integrate, report.
///
/// # Errors
///
/// Fails if a system's query cannot be built.
pub fn demo_schedule(
    world: &World,
    types: &DemoComponents,
    churn_per_tick: usize,
    seed: u64,
) -> Result<Schedule> {
    let mut schedule = Schedule::new();
    schedule
        .add_system("churn", churn(types.clone(), churn_per_tick, seed))
        .add_system("integrate", integrate(world, types.clone())?)
        .add_system("report", report(world, types.clone(), 60)?);
    Ok(schedule)
}

fn field(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populate_and_churn_keep_population() {
        let types = DemoComponents::new().unwrap();
        let mut world = World::new();
        let mut rng = demo_rng(7);
        populate(&mut world, &types, &mut rng, 50).unwrap();
        assert_eq!(world.entity_count(), 50);

        let mut system = churn(types, 10, 3);
        for tick_id in 1..=5 {
            system(&mut world, &TickContext { tick_id, dt: 0.1 }).unwrap();
        }
        assert_eq!(world.entity_count(), 50);
    }

    #[test]
    fn test_integrate_moves_only_unfrozen() {
        let types = DemoComponents::new().unwrap();
        let mut world = World::new();
        let moving = world.create_entity().unwrap();
        let frozen = world.create_entity().unwrap();
        for e in [moving, frozen] {
            world.add_component(e, &types.position, json!({ "x": 1.0 })).unwrap();
            world.add_component(e, &types.velocity, json!({ "dx": 2.0, "dy": -4.0 })).unwrap();
        }
        world.add_component(frozen, &types.frozen, Value::Null).unwrap();

        let mut system = integrate(&world, types.clone()).unwrap();
        system(&mut world, &TickContext { tick_id: 1, dt: 0.5 }).unwrap();

        assert_eq!(
            world.get_component(moving, &types.position),
            Some(&json!({ "x": 2.0, "y": -2.0 }))
        );
        assert_eq!(
            world.get_component(frozen, &types.position),
            Some(&json!({ "x": 1.0, "y": 0.0 }))
        );
    }

    #[test]
    fn test_demo_schedule_runs() {
        let types = DemoComponents::new().unwrap();
        let mut world = World::new();
        let mut rng = demo_rng(11);
        populate(&mut world, &types, &mut rng, 20).unwrap();

        let mut schedule = demo_schedule(&world, &types, 5, 11).unwrap();
        assert_eq!(schedule.names().collect::<Vec<_>>(), vec!["churn", "integrate", "report"]);
        for tick_id in 1..=3 {
            schedule.run(&mut world, &TickContext { tick_id, dt: 1.0 / 60.0 }).unwrap();
        }
        assert_eq!(world.entity_count(), 20);
        // Two systems hold queries.
        assert_eq!(world.query_count(), 2);
    }

    #[test]
    fn test_demo_world_restores_from_snapshot() {
        let types = DemoComponents::new().unwrap();
        let mut world = World::new();
        populate(&mut world, &types, &mut demo_rng(5), 30).unwrap();

        let mut restored = World::new();
        restored.restore(world.snapshot(), &types.all()).unwrap();
        assert_eq!(restored.entity_count(), 30);
        assert_eq!(restored.snapshot(), world.snapshot());
    }

    #[test]
    fn test_rng_is_deterministic() {
        let mut a = demo_rng(42);
        let mut b = demo_rng(42);
        for _ in 0..10 {
            let v: f64 = a.gen_range(-1.0..1.0);
            assert_eq!(v, b.gen_range(-1.0..1.0));
            assert!((-1.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_same_seed_populates_identical_worlds() {
        let types = DemoComponents::new().unwrap();
        let mut first = World::new();
        let mut second = World::new();
        populate(&mut first, &types, &mut demo_rng(9), 25).unwrap();
        populate(&mut second, &types, &mut demo_rng(9), 25).unwrap();
        assert_eq!(first.snapshot(), second.snapshot());
    }

    #[test]
    fn test_integrate_closure_does_not_borrow_world() {
        let types = DemoComponents::new().unwrap();
        let mut world = World::new();
        let mut system = integrate(&world, types.clone()).unwrap();
        // The world stays mutably usable while the system is alive.
        let e = world.create_entity().unwrap();
        world.add_component(e, &types.position, json!({})).unwrap();
        world.add_component(e, &types.velocity, json!({ "dx": 1.0 })).unwrap();
        system(&mut world, &TickContext { tick_id: 1, dt: 1.0 }).unwrap();
        assert_eq!(
            world.get_component(e, &types.position),
            Some(&json!({ "x": 1.0, "y": 0.0 }))
        );
    }
}
