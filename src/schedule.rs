//! System scheduling: sequential and fork-join execution with sync barriers.
//!
//! The engine imposes no pipeline shape. The caller registers systems, hands
//! the [`Scheduler`] an *execution plan* — a closure deciding the
//! run / run-parallel / sync sequence of one tick — and drives everything
//! through [`Scheduler::tick`].
//!
//! Every registered system owns a private [`CommandBuffer`]; structural
//! changes recorded during a stage become visible only after
//! [`ExecutionContext::sync`], which drains all buffers in registration
//! order and is a full barrier.
//!
//! ## Parallel stages
//!
//! [`ExecutionContext::run_parallel`] forks the listed systems onto rayon
//! tasks against the same live world and joins before returning. The engine
//! performs **no locking and no conflict detection**: the caller must
//! guarantee the systems touch disjoint component sets, which is why the
//! call is `unsafe`.

use tracing::warn;

use crate::command::CommandBuffer;
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// Unique handle for a registered system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub(crate) u32);

/// A unit of update logic driven by the scheduler.
///
/// Systems read and write component memory they own through the world handed
/// to them, and record structural changes into their private command buffer.
pub trait System: Send {
    /// Diagnostic name, used in sync-failure logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Run one update stage.
    fn run(&mut self, ctx: &mut SystemContext<'_>, dt: f32);
}

/// What a running system sees: the live world and its own command buffer.
pub struct SystemContext<'a> {
    world: &'a mut World,
    commands: &'a mut CommandBuffer,
}

impl SystemContext<'_> {
    /// Read access to the live world.
    pub fn world(&self) -> &World {
        self.world
    }

    /// Mutable access to the live world, for in-place component updates
    /// through views. Structural changes should go through
    /// [`commands`](Self::commands) instead.
    pub fn world_mut(&mut self) -> &mut World {
        self.world
    }

    /// The system's private command buffer. Nothing recorded here is visible
    /// to any system until a sync point completes.
    pub fn commands(&mut self) -> &mut CommandBuffer {
        self.commands
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct SystemSlot {
    system: Box<dyn System>,
    commands: CommandBuffer,
}

type ExecutionPlan = Box<dyn FnMut(&mut ExecutionContext<'_>, f32)>;

/// Owns the registered systems, their buffers, and the execution plan.
pub struct Scheduler {
    slots: Vec<SystemSlot>,
    plan: Option<ExecutionPlan>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            plan: None,
        }
    }

    /// Register a system, pairing it with a fresh private command buffer.
    pub fn register_system(&mut self, system: Box<dyn System>) -> SystemId {
        let id = SystemId(self.slots.len() as u32);
        self.slots.push(SystemSlot {
            system,
            commands: CommandBuffer::new(),
        });
        id
    }

    /// Install the execution plan invoked by [`tick`](Self::tick).
    pub fn set_execution_plan(
        &mut self,
        plan: impl FnMut(&mut ExecutionContext<'_>, f32) + 'static,
    ) {
        self.plan = Some(Box::new(plan));
    }

    /// Number of registered systems.
    pub fn system_count(&self) -> usize {
        self.slots.len()
    }

    /// Run one tick: invoke the execution plan, which decides its own
    /// run / run-parallel / sync sequencing.
    ///
    /// # Panics
    ///
    /// Panics when no execution plan has been configured — programmer error.
    pub fn tick(&mut self, world: &mut World, dt: f32) {
        let mut plan = self
            .plan
            .take()
            .expect("no execution plan configured before tick");
        {
            let mut ctx = ExecutionContext {
                world,
                slots: &mut self.slots,
            };
            plan(&mut ctx, dt);
        }
        self.plan = Some(plan);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Shared world pointer handed to forked system tasks. The caller contract
/// of `run_parallel` is what makes the aliasing defensible.
#[derive(Clone, Copy)]
struct SharedWorld(*mut World);

unsafe impl Send for SharedWorld {}
unsafe impl Sync for SharedWorld {}

/// The per-tick handle the execution plan drives.
pub struct ExecutionContext<'a> {
    world: &'a mut World,
    slots: &'a mut Vec<SystemSlot>,
}

impl ExecutionContext<'_> {
    /// Direct world access between stages.
    pub fn world(&mut self) -> &mut World {
        self.world
    }

    /// Run one system synchronously.
    pub fn run(&mut self, system: SystemId, dt: f32) {
        let slot = &mut self.slots[system.0 as usize];
        let mut ctx = SystemContext {
            world: &mut *self.world,
            commands: &mut slot.commands,
        };
        slot.system.run(&mut ctx, dt);
    }

    /// Run the listed systems on independent rayon tasks against the same
    /// live world, joining before returning.
    ///
    /// Buffered structural changes stay private per system until
    /// [`sync`](Self::sync); raw component reads and writes are live.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the listed systems access disjoint
    /// component sets (no component written by one is read or written by
    /// another). The engine performs no locking and no conflict detection.
    pub unsafe fn run_parallel(&mut self, dt: f32, systems: &[SystemId]) {
        let world = SharedWorld(std::ptr::from_mut(self.world));
        rayon::scope(|scope| {
            for (index, slot) in self.slots.iter_mut().enumerate() {
                if !systems.iter().any(|id| id.0 as usize == index) {
                    continue;
                }
                scope.spawn(move |_| {
                    // Capture the whole `SharedWorld` (which is `Send`/`Sync`)
                    // rather than letting edition-2021 disjoint capture grab
                    // the bare `*mut World` field.
                    let world = world;
                    // Safety: joined before `run_parallel` returns; the
                    // caller guarantees disjoint component access between
                    // the forked systems.
                    let world = unsafe { &mut *world.0 };
                    let mut ctx = SystemContext {
                        world,
                        commands: &mut slot.commands,
                    };
                    slot.system.run(&mut ctx, dt);
                });
            }
        });
    }

    /// Drain every system's buffer and apply its commands in recorded order,
    /// buffers in registration order. A full barrier: once this returns, all
    /// buffered mutations are globally visible.
    ///
    /// Per buffer, the first failing command aborts that buffer's remainder;
    /// other buffers still apply independently. The first failure across all
    /// buffers is returned after every buffer was processed.
    pub fn sync(&mut self) -> Result<(), EcsError> {
        let mut first: Option<EcsError> = None;
        for slot in self.slots.iter_mut() {
            if let Err(err) = slot.commands.apply(self.world) {
                warn!(system = slot.system.name(), error = %err, "sync: buffer apply failed");
                if first.is_none() {
                    first = Some(err);
                }
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::View;

    #[derive(Debug, Clone, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Vel {
        dx: f32,
        dy: f32,
    }

    /// Advances every Pos by its Vel, in place.
    struct Integrate {
        view: View,
    }

    impl System for Integrate {
        fn run(&mut self, ctx: &mut SystemContext<'_>, dt: f32) {
            let world = ctx.world_mut();
            let pos = world.registry().lookup::<Pos>().unwrap();
            let vel = world.registry().lookup::<Vel>().unwrap();
            let view = self.view;
            for mut row in world.view_iter_mut(view) {
                let (dx, dy) = {
                    let v = row.get_with::<Vel>(&vel).unwrap();
                    (v.dx, v.dy)
                };
                let p = row.get_with_mut::<Pos>(&pos).unwrap();
                p.x += dx * dt;
                p.y += dy * dt;
            }
        }
    }

    /// Buffers a velocity change for every matched entity.
    struct Dampen {
        view: View,
    }

    impl System for Dampen {
        fn run(&mut self, ctx: &mut SystemContext<'_>, _dt: f32) {
            let vel = ctx.world().registry().lookup::<Vel>().unwrap();
            let view = self.view;
            let targets: Vec<_> = ctx.world().view_iter(view).map(|r| r.entity()).collect();
            for entity in targets {
                ctx.commands().assign(entity, &vel, Vel { dx: 0.0, dy: 0.0 });
            }
        }
    }

    fn moving_world() -> (World, View, View) {
        let mut world = World::new();
        let pos = world.register::<Pos>();
        let vel = world.register::<Vel>();
        let both = world.new_view(&[pos.id(), vel.id()], &[]).unwrap();
        let vel_only = world.new_view(&[vel.id()], &[]).unwrap();
        for i in 0..8 {
            let e = world.create();
            world
                .assign(
                    e,
                    Pos {
                        x: i as f32,
                        y: 0.0,
                    },
                )
                .unwrap();
            world.assign(e, Vel { dx: 1.0, dy: 0.0 }).unwrap();
        }
        (world, both, vel_only)
    }

    #[test]
    fn run_executes_synchronously() {
        let (mut world, both, _) = moving_world();
        let mut scheduler = Scheduler::new();
        let integrate = scheduler.register_system(Box::new(Integrate { view: both }));
        scheduler.set_execution_plan(move |ctx, dt| {
            ctx.run(integrate, dt);
        });
        scheduler.tick(&mut world, 1.0);

        for (i, row) in world.view_iter(both).enumerate() {
            assert_eq!(row.get::<Pos>().unwrap().x, i as f32 + 1.0);
        }
    }

    #[test]
    fn buffered_writes_invisible_until_sync() {
        let (mut world, both, vel_only) = moving_world();
        let mut scheduler = Scheduler::new();
        let dampen = scheduler.register_system(Box::new(Dampen { view: vel_only }));
        scheduler.set_execution_plan(move |ctx, dt| {
            ctx.run(dampen, dt);
            // Before the sync point, the live world still sees old values.
            for row in ctx.world().view_iter(vel_only) {
                assert_eq!(row.get::<Vel>().unwrap().dx, 1.0);
            }
            ctx.sync().unwrap();
            for row in ctx.world().view_iter(vel_only) {
                assert_eq!(row.get::<Vel>().unwrap().dx, 0.0);
            }
        });
        scheduler.tick(&mut world, 1.0);

        for row in world.view_iter(both) {
            assert_eq!(row.get::<Vel>().unwrap().dx, 0.0);
        }
    }

    #[test]
    #[should_panic(expected = "no execution plan configured")]
    fn tick_without_plan_is_programmer_error() {
        let mut world = World::new();
        let mut scheduler = Scheduler::new();
        scheduler.tick(&mut world, 1.0);
    }

    #[test]
    fn parallel_systems_join_before_return() {
        // Integrate writes Pos (reads Vel), Dampen only reads Vel and
        // buffers: component access is disjoint as run_parallel requires.
        let (mut world, both, vel_only) = moving_world();
        let mut scheduler = Scheduler::new();
        let integrate = scheduler.register_system(Box::new(Integrate { view: both }));
        let dampen = scheduler.register_system(Box::new(Dampen { view: vel_only }));
        scheduler.set_execution_plan(move |ctx, dt| {
            unsafe { ctx.run_parallel(dt, &[integrate, dampen]) };
            ctx.sync().unwrap();
        });
        scheduler.tick(&mut world, 1.0);

        for (i, row) in world.view_iter(both).enumerate() {
            // Integrate ran against the pre-sync velocity...
            assert_eq!(row.get::<Pos>().unwrap().x, i as f32 + 1.0);
            // ...and Dampen's buffered writes landed at the barrier.
            assert_eq!(row.get::<Vel>().unwrap().dx, 0.0);
        }
    }

    #[test]
    fn buffers_apply_in_registration_order() {
        struct Stamp {
            value: f32,
        }
        impl System for Stamp {
            fn run(&mut self, ctx: &mut SystemContext<'_>, _dt: f32) {
                let pos = ctx.world().registry().lookup::<Pos>().unwrap();
                let entity = ctx.world().view_iter(View(0)).next().unwrap().entity();
                let value = self.value;
                ctx.commands().assign(entity, &pos, Pos { x: value, y: 0.0 });
            }
        }

        let mut world = World::new();
        let pos = world.register::<Pos>();
        let _all = world.new_view(&[pos.id()], &[]).unwrap();
        let e = world.create();
        world.assign(e, Pos { x: 0.0, y: 0.0 }).unwrap();

        let mut scheduler = Scheduler::new();
        let first = scheduler.register_system(Box::new(Stamp { value: 1.0 }));
        let second = scheduler.register_system(Box::new(Stamp { value: 2.0 }));
        scheduler.set_execution_plan(move |ctx, dt| {
            ctx.run(first, dt);
            ctx.run(second, dt);
            ctx.sync().unwrap();
        });
        scheduler.tick(&mut world, 1.0);

        // The later-registered buffer applies last.
        assert_eq!(world.get::<Pos>(e), Some(&Pos { x: 2.0, y: 0.0 }));
    }

    #[test]
    fn sync_failure_leaves_other_buffers_applied() {
        struct DestroyTwice {
            target: crate::entity::Entity,
        }
        impl System for DestroyTwice {
            fn run(&mut self, ctx: &mut SystemContext<'_>, _dt: f32) {
                // Both commands target the same entity; the second fails.
                ctx.commands().destroy_entity(self.target);
                ctx.commands().destroy_entity(self.target);
            }
        }
        struct SpawnOne;
        impl System for SpawnOne {
            fn run(&mut self, ctx: &mut SystemContext<'_>, _dt: f32) {
                ctx.commands().create_entity();
            }
        }

        let mut world = World::new();
        world.register::<Pos>();
        let doomed = world.create();

        let mut scheduler = Scheduler::new();
        let destroy = scheduler.register_system(Box::new(DestroyTwice { target: doomed }));
        let spawn = scheduler.register_system(Box::new(SpawnOne));
        scheduler.set_execution_plan(move |ctx, dt| {
            ctx.run(destroy, dt);
            ctx.run(spawn, dt);
            let err = ctx.sync().unwrap_err();
            assert!(matches!(err, EcsError::ApplyFailure { index: 1, .. }));
        });
        scheduler.tick(&mut world, 1.0);

        // The failing buffer stopped at its second command, but the other
        // system's buffer still applied independently.
        assert!(!world.is_alive(doomed));
        assert_eq!(world.entity_count(), 1);
    }
}
