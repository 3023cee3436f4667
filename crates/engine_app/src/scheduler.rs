//! Sequential system schedule.
//!
//! Systems are plain closures run in registration order, once per tick. The
//! first failing system aborts the tick.

use anyhow::{Context, Result};
use engine_ecs::World;
use tracing::{debug_span, trace};

/// Per-tick information handed to every system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    /// The tick being executed, starting at 1.
    pub tick_id: u64,
    /// Simulated seconds covered by this tick.
    pub dt: f64,
}

/// A boxed system closure.
pub type BoxedSystem = Box<dyn FnMut(&mut World, &TickContext) -> Result<()>>;

struct Entry {
    name: String,
    system: BoxedSystem,
}

/// An ordered list of named systems.
#[derive(Default)]
pub struct Schedule {
    systems: Vec<Entry>,
}

impl Schedule {
    /// Create an empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a system to run after every system already added.
    pub fn add_system(
        &mut self,
        name: impl Into<String>,
        system: impl FnMut(&mut World, &TickContext) -> Result<()> + 'static,
    ) -> &mut Self {
        self.systems.push(Entry {
            name: name.into(),
            system: Box::new(system),
        });
        self
    }

    /// Run every system once, in order.
    ///
    /// # Errors
    ///
    /// Returns the first system error, annotated with the system name.
    pub fn run(&mut self, world: &mut World, ctx: &TickContext) -> Result<()> {
        for entry in &mut self.systems {
            let _span = debug_span!("system", name = %entry.name, tick_id = ctx.tick_id).entered();
            (entry.system)(world, ctx)
                .with_context(|| format!("system '{}' failed on tick {}", entry.name, ctx.tick_id))?;
            trace!(system = %entry.name, "system finished");
        }
        Ok(())
    }

    /// System names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.systems.iter().map(|entry| entry.name.as_str())
    }

    /// Number of systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Returns `true` if no system has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

impl std::fmt::Debug for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
