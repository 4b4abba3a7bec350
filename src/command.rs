//! Deferred structural mutations: the command buffer and its payload arena.
//!
//! Systems must not change the world's structure while an update stage is in
//! flight; instead they record commands — assign, remove, create, destroy —
//! into a private [`CommandBuffer`] which the scheduler drains at a sync
//! point. Component payloads are copied into a bump-allocated page arena
//! (alignment-respecting, reset wholesale after each apply cycle, never freed
//! piecewise) and travel as size/alignment-tagged erased bytes decoded
//! through the same [`ComponentInfo`] that encoded them.
//!
//! A buffer can mint *virtual* entities: synthetic handles (reserved index
//! bit set) that let buffered code reference "the entity I am about to
//! create" before a real identifier exists. At apply time the creation
//! commands resolve first, populating a virtual→real map that redirects
//! every later command in the same buffer.

use std::mem;

use tracing::warn;

use crate::component::{Component, ComponentInfo};
use crate::entity::{Entity, VIRTUAL_BIT};
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// CommandArena
// ---------------------------------------------------------------------------

/// Default arena page size in bytes.
const PAGE_SIZE: usize = 16 * 1024;

/// Bump allocator over retained pages. `reset` rewinds the bump cursor and
/// keeps every regular page for the next cycle; only oversized dedicated
/// pages are released.
struct CommandArena {
    pages: Vec<Box<[u8]>>,
    /// Dedicated pages for payloads larger than `page_size`.
    large: Vec<Box<[u8]>>,
    page_size: usize,
    /// Page currently being bumped.
    current: usize,
    /// Bump offset within the current page.
    offset: usize,
}

impl CommandArena {
    fn new(page_size: usize) -> Self {
        Self {
            pages: Vec::new(),
            large: Vec::new(),
            page_size,
            current: 0,
            offset: 0,
        }
    }

    /// Allocate `size` bytes at `align`. The returned pointer is stable until
    /// [`reset`](Self::reset).
    fn alloc(&mut self, size: usize, align: usize) -> *mut u8 {
        if size == 0 {
            return align as *mut u8;
        }
        // Payloads that cannot share a page get a dedicated one.
        if size + align > self.page_size {
            let mut page = vec![0u8; size + align].into_boxed_slice();
            let base = page.as_ptr() as usize;
            let aligned = base.next_multiple_of(align) - base;
            let ptr = page[aligned..].as_mut_ptr();
            self.large.push(page);
            return ptr;
        }
        loop {
            if self.current == self.pages.len() {
                self.pages.push(vec![0u8; self.page_size].into_boxed_slice());
            }
            let base = self.pages[self.current].as_ptr() as usize;
            let aligned = (base + self.offset).next_multiple_of(align) - base;
            if aligned + size <= self.page_size {
                self.offset = aligned + size;
                return self.pages[self.current][aligned..].as_mut_ptr();
            }
            self.current += 1;
            self.offset = 0;
        }
    }

    /// Rewind the bump cursor, retaining the regular pages.
    fn reset(&mut self) {
        self.current = 0;
        self.offset = 0;
        self.large.clear();
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// One recorded mutation. Payload pointers reference the owning buffer's
/// arena and stay valid until the buffer is applied, cleared, or dropped.
enum Command {
    Assign {
        entity: Entity,
        info: ComponentInfo,
        data: *mut u8,
    },
    Remove {
        entity: Entity,
        info: ComponentInfo,
    },
    Destroy {
        entity: Entity,
    },
    Create {
        entity: Entity,
    },
}

/// Drop an un-consumed assign payload in place.
unsafe fn drop_payload(info: &ComponentInfo, data: *mut u8) {
    if let Some(drop_fn) = info.drop_fn {
        drop_fn(data);
    }
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

/// Ordered log of deferred structural mutations plus the arena holding their
/// copied payloads. Each scheduled system owns one privately; commands are
/// consumed exactly once, at the scheduler's sync point, in recorded order.
pub struct CommandBuffer {
    commands: Vec<Command>,
    arena: CommandArena,
    /// Count of virtual entities minted since the last apply.
    next_virtual: u32,
}

// Payload pointers reference Component values, which are Send + Sync by the
// trait bound; the arena they point into moves with the buffer.
unsafe impl Send for CommandBuffer {}

impl CommandBuffer {
    /// Create an empty buffer with the default arena page size.
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            arena: CommandArena::new(PAGE_SIZE),
            next_virtual: 0,
        }
    }

    /// Mint a virtual entity: a placeholder resolvable only within this
    /// buffer, replaced by a real entity when the buffer is applied.
    pub fn create_entity(&mut self) -> Entity {
        let entity = Entity::new(VIRTUAL_BIT | self.next_virtual, 0);
        self.next_virtual += 1;
        self.commands.push(Command::Create { entity });
        entity
    }

    /// Record a component assignment. The value is copied into the arena and
    /// owned by the buffer until applied.
    ///
    /// # Panics
    ///
    /// Panics when `info` does not describe `T` — programmer error.
    pub fn assign<T: Component>(&mut self, entity: Entity, info: &ComponentInfo, value: T) {
        assert!(info.is::<T>(), "ComponentInfo does not describe {}", std::any::type_name::<T>());
        let data = self.arena.alloc(info.size(), info.align());
        unsafe {
            std::ptr::copy_nonoverlapping(&value as *const T as *const u8, data, info.size());
        }
        mem::forget(value);
        self.commands.push(Command::Assign {
            entity,
            info: *info,
            data,
        });
    }

    /// Record a component assignment from erased bytes.
    ///
    /// A sized component requires exactly `info.size()` bytes — an empty
    /// payload is a [`EcsError::NilComponentData`] contract violation,
    /// surfaced at record time. Tags ignore the payload.
    ///
    /// # Safety
    ///
    /// `data` must be the byte representation of a valid value of the
    /// component type described by `info`; ownership transfers to the buffer.
    pub unsafe fn assign_raw(
        &mut self,
        entity: Entity,
        info: &ComponentInfo,
        data: &[u8],
    ) -> Result<(), EcsError> {
        if !info.is_tag() && data.len() != info.size() {
            return Err(EcsError::NilComponentData(info.name()));
        }
        let dst = self.arena.alloc(info.size(), info.align());
        std::ptr::copy_nonoverlapping(data.as_ptr(), dst, info.size());
        self.commands.push(Command::Assign {
            entity,
            info: *info,
            data: dst,
        });
        Ok(())
    }

    /// Record a component removal.
    pub fn remove_component(&mut self, entity: Entity, info: &ComponentInfo) {
        self.commands.push(Command::Remove {
            entity,
            info: *info,
        });
    }

    /// Record an entity removal.
    pub fn destroy_entity(&mut self, entity: Entity) {
        self.commands.push(Command::Destroy { entity });
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether no commands are recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Discard every recorded command, dropping un-consumed payloads and
    /// rewinding the arena.
    pub fn clear(&mut self) {
        for cmd in self.commands.drain(..) {
            if let Command::Assign { info, data, .. } = cmd {
                unsafe { drop_payload(&info, data) };
            }
        }
        self.arena.reset();
        self.next_virtual = 0;
    }

    /// Apply every recorded command against `world`.
    ///
    /// Creation commands resolve first, populating the virtual→real map;
    /// everything else applies in recorded order with virtual targets
    /// redirected. The first failing command aborts the remainder of the
    /// buffer (remaining payloads are released) and is reported as
    /// [`EcsError::ApplyFailure`]; already-applied commands stay applied.
    /// The buffer is empty and its arena rewound when this returns.
    pub(crate) fn apply(&mut self, world: &mut World) -> Result<(), EcsError> {
        let commands = mem::take(&mut self.commands);
        let mut virtual_map: Vec<Entity> = Vec::with_capacity(self.next_virtual as usize);
        for cmd in &commands {
            if let Command::Create { .. } = cmd {
                virtual_map.push(world.create());
            }
        }
        let resolve = |entity: Entity| -> Result<Entity, EcsError> {
            if !entity.is_virtual() {
                return Ok(entity);
            }
            virtual_map
                .get((entity.index() & !VIRTUAL_BIT) as usize)
                .copied()
                .ok_or(EcsError::EntityNotFound(entity))
        };

        let mut failure: Option<EcsError> = None;
        for (index, cmd) in commands.into_iter().enumerate() {
            if failure.is_some() {
                // Remainder of the buffer is skipped; payloads still owned
                // here must be released.
                if let Command::Assign { info, data, .. } = cmd {
                    unsafe { drop_payload(&info, data) };
                }
                continue;
            }
            let result = match cmd {
                Command::Create { .. } => Ok(()),
                Command::Assign { entity, info, data } => match resolve(entity) {
                    Ok(target) => unsafe {
                        let applied = world.assign_ptr(target, &info, data);
                        if applied.is_err() {
                            drop_payload(&info, data);
                        }
                        applied
                    },
                    Err(err) => {
                        unsafe { drop_payload(&info, data) };
                        Err(err)
                    }
                },
                Command::Remove { entity, info } => {
                    resolve(entity).and_then(|target| world.unassign_with(target, &info))
                }
                Command::Destroy { entity } => resolve(entity).and_then(|target| {
                    if world.remove(target) {
                        Ok(())
                    } else {
                        Err(EcsError::EntityNotFound(target))
                    }
                }),
            };
            if let Err(source) = result {
                warn!(command = index, error = %source, "command application failed");
                failure = Some(EcsError::ApplyFailure {
                    index,
                    source: Box::new(source),
                });
            }
        }

        self.arena.reset();
        self.next_virtual = 0;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("commands", &self.commands.len())
            .field("arena_pages", &self.arena.pages.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
