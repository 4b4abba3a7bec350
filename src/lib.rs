//! Strata ECS — archetype-based columnar storage core for simulation engines.
//!
//! Heterogeneous typed records ("components") attach to opaque generational
//! identifiers ("entities"). Entities sharing one exact component set live
//! together in an *archetype*: a dense entity list plus one contiguous column
//! per component type, giving cache-friendly bulk iteration. Structural
//! changes walk a cached transition graph, *views* are baked include/exclude
//! queries kept current by push notification, and a scheduler runs update
//! logic with per-system command buffers drained at explicit sync points.
//!
//! # Quick Start
//!
//! ```
//! use strata_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! let pos = world.register::<Position>();
//! let vel = world.register::<Velocity>();
//!
//! let entity = world.create();
//! world.assign(entity, Position { x: 0.0, y: 0.0 }).unwrap();
//! world.assign(entity, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
//!
//! let moving = world.new_view(&[pos.id(), vel.id()], &[]).unwrap();
//! for mut row in world.view_iter_mut(moving) {
//!     let dx = row.get::<Velocity>().unwrap().dx;
//!     row.get_mut::<Position>().unwrap().x += dx;
//! }
//!
//! assert_eq!(world.get::<Position>(entity), Some(&Position { x: 1.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod archetype;
#[allow(unsafe_code)]
pub mod command;
#[allow(unsafe_code)]
pub mod component;
pub mod entity;
pub mod mask;
#[allow(unsafe_code)]
pub mod schedule;
#[allow(unsafe_code)]
pub mod view;
#[allow(unsafe_code)]
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist: stale generation, virtual handle, or never
    /// allocated.
    #[error("entity {0} not found (stale or never created)")]
    EntityNotFound(entity::Entity),

    /// A sized component was assigned through the erased-bytes path with an
    /// empty or mismatched payload. Tags are exempt.
    #[error("component '{0}' is not a tag and was assigned with no payload")]
    NilComponentData(&'static str),

    /// A view required and excluded the same component. Raised at view
    /// construction, never at iteration time.
    #[error("view both includes and excludes component '{0}'")]
    ViewConfiguration(&'static str),

    /// A buffered command could not be applied at a sync point. The
    /// remainder of that buffer was skipped; already-applied commands stay
    /// applied.
    #[error("buffered command {index} failed to apply: {source}")]
    ApplyFailure {
        /// Position of the failing command within its buffer.
        index: usize,
        /// Why it failed.
        source: Box<EcsError>,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId};
    pub use crate::command::CommandBuffer;
    pub use crate::component::{Component, ComponentId, ComponentInfo, ComponentRegistry};
    pub use crate::entity::{Entity, EntityPool};
    pub use crate::mask::ArchetypeMask;
    pub use crate::schedule::{ExecutionContext, Scheduler, System, SystemContext, SystemId};
    pub use crate::view::{Row, RowMut, View};
    pub use crate::world::{World, WorldConfig};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Health(u32);

    fn setup_world() -> World {
        let mut world = World::new();
        world.register::<Position>();
        world.register::<Velocity>();
        world.register::<Health>();
        world
    }

    #[test]
    fn create_assign_view_roundtrip() {
        let mut world = setup_world();
        let pos = world.registry().lookup::<Position>().unwrap();
        let vel = world.registry().lookup::<Velocity>().unwrap();

        let e1 = world.create();
        world.assign(e1, Position { x: 1.0, y: 2.0 }).unwrap();
        world.assign(e1, Velocity { dx: 3.0, dy: 4.0 }).unwrap();
        let e2 = world.create();
        world.assign(e2, Position { x: 10.0, y: 20.0 }).unwrap();

        let moving = world.new_view(&[pos.id(), vel.id()], &[]).unwrap();
        let matched: Vec<Entity> = world.view_iter(moving).map(|r| r.entity()).collect();
        assert_eq!(matched, vec![e1]);
    }

    #[test]
    fn scale_10k_entities() {
        let mut world = setup_world();
        let pos = world.registry().lookup::<Position>().unwrap();
        let vel = world.registry().lookup::<Velocity>().unwrap();
        let moving = world.new_view(&[pos.id(), vel.id()], &[]).unwrap();

        let mut entities = Vec::with_capacity(10_000);
        for i in 0..10_000u32 {
            let e = world.create();
            world
                .assign(
                    e,
                    Position {
                        x: i as f32,
                        y: i as f32 * 2.0,
                    },
                )
                .unwrap();
            world.assign(e, Velocity { dx: 1.0, dy: -1.0 }).unwrap();
            entities.push(e);
        }
        assert_eq!(world.view_iter(moving).count(), 10_000);

        for mut row in world.view_iter_mut(moving) {
            let v = row.get_mut::<Velocity>().unwrap();
            v.dx *= 2.0;
            v.dy *= 2.0;
        }
        let v = world.get::<Velocity>(entities[0]).unwrap();
        assert_eq!(v.dx, 2.0);
        assert_eq!(v.dy, -2.0);

        for e in entities.iter().take(5_000) {
            world.remove(*e);
        }
        assert_eq!(world.view_iter(moving).count(), 5_000);
        assert_eq!(world.entity_count(), 5_000);
    }

    #[test]
    fn config_capacities_are_hints_only() {
        let config = WorldConfig::default()
            .initial_entity_capacity(2)
            .archetype_row_capacity(1)
            .recycled_capacity(1)
            .view_capacity(1);
        let mut world = World::with_config(config);
        world.register::<Position>();
        for i in 0..100 {
            let e = world.create();
            world
                .assign(
                    e,
                    Position {
                        x: i as f32,
                        y: 0.0,
                    },
                )
                .unwrap();
        }
        assert_eq!(world.entity_count(), 100);
    }

    #[test]
    fn error_display_formats() {
        let err = EcsError::EntityNotFound(Entity::new(3, 1));
        assert_eq!(err.to_string(), "entity 3v1 not found (stale or never created)");

        let nested = EcsError::ApplyFailure {
            index: 2,
            source: Box::new(EcsError::EntityNotFound(Entity::new(0, 0))),
        };
        assert!(nested.to_string().contains("command 2"));
    }
}
