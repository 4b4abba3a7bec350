//! The [`World`] owns every storage structure: the entity pool, the component
//! registry, all archetypes with their transition graph, the per-entity link
//! table, and the baked views. It routes every structural change — entity
//! creation and removal, component assignment and unassignment — through the
//! archetype graph.
//!
//! Migration between archetypes is the dominant cost of the engine; the edge
//! cache on each archetype exists so that any shape transition hashes its
//! mask at most once, after which repeat transitions are a table lookup.

use std::collections::HashMap;

use tracing::debug;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{Component, ComponentId, ComponentInfo, ComponentRegistry};
use crate::entity::{Entity, EntityPool};
use crate::mask::ArchetypeMask;
use crate::view::ViewData;
use crate::EcsError;

// ---------------------------------------------------------------------------
// WorldConfig
// ---------------------------------------------------------------------------

/// Named capacity hints for world construction. All fields are hints only;
/// every structure grows past its hint on demand.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Entity slots to pre-allocate in the pool.
    pub initial_entity_capacity: usize,
    /// Rows reserved by each new archetype's columns on first growth.
    pub archetype_row_capacity: usize,
    /// Free-index stack entries to pre-allocate.
    pub recycled_capacity: usize,
    /// View registry slots to pre-allocate.
    pub view_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            initial_entity_capacity: 1024,
            archetype_row_capacity: 64,
            recycled_capacity: 256,
            view_capacity: 16,
        }
    }
}

impl WorldConfig {
    /// Set the entity-pool pre-allocation.
    pub fn initial_entity_capacity(mut self, capacity: usize) -> Self {
        self.initial_entity_capacity = capacity;
        self
    }

    /// Set the per-archetype initial row capacity.
    pub fn archetype_row_capacity(mut self, rows: usize) -> Self {
        self.archetype_row_capacity = rows;
        self
    }

    /// Set the free-index stack pre-allocation.
    pub fn recycled_capacity(mut self, capacity: usize) -> Self {
        self.recycled_capacity = capacity;
        self
    }

    /// Set the view registry pre-allocation.
    pub fn view_capacity(mut self, capacity: usize) -> Self {
        self.view_capacity = capacity;
        self
    }
}

// ---------------------------------------------------------------------------
// EntityLink
// ---------------------------------------------------------------------------

/// Per-entity-index record of where the entity's row lives.
///
/// Trusted only while `generation` matches the handle's generation; the link
/// slot is reused verbatim when the index is recycled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntityLink {
    pub(crate) archetype: ArchetypeId,
    pub(crate) row: u32,
    pub(crate) generation: u32,
}

/// Resolve an entity's link against a pool + link table, guarding against
/// stale and virtual handles. Shared with the view iterators, which borrow
/// the pool and link table separately from the archetype storage.
pub(crate) fn link_in(
    pool: &EntityPool,
    links: &[EntityLink],
    entity: Entity,
) -> Option<EntityLink> {
    if !pool.is_valid(entity) {
        return None;
    }
    let link = links[entity.index() as usize];
    if link.generation != entity.generation() {
        return None;
    }
    Some(link)
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The storage and indexing core: entities, components, archetypes, views.
pub struct World {
    pub(crate) pool: EntityPool,
    pub(crate) registry: ComponentRegistry,
    /// All archetypes, indexed by `ArchetypeId`. Index 0 is the root
    /// (empty-mask) archetype. Archetypes are never destroyed.
    pub(crate) archetypes: Vec<Archetype>,
    /// Mask -> archetype identity index.
    pub(crate) archetype_index: HashMap<ArchetypeMask, ArchetypeId>,
    /// Per-entity-index links, parallel to the pool's index space.
    pub(crate) links: Vec<EntityLink>,
    /// Baked views, notified on archetype creation.
    pub(crate) views: Vec<ViewData>,
    /// Live entity count.
    pub(crate) alive: usize,
    pub(crate) row_capacity: usize,
}

impl World {
    /// Create a world with default capacities.
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Create a world with the given capacity hints.
    pub fn with_config(config: WorldConfig) -> Self {
        let mut world = Self {
            pool: EntityPool::with_capacity(
                config.initial_entity_capacity,
                config.recycled_capacity,
            ),
            registry: ComponentRegistry::new(),
            archetypes: Vec::new(),
            archetype_index: HashMap::new(),
            links: Vec::with_capacity(config.initial_entity_capacity),
            views: Vec::with_capacity(config.view_capacity),
            alive: 0,
            row_capacity: config.archetype_row_capacity,
        };
        // The root archetype: where freshly created entities live until they
        // gain a component, and where entities return when they lose all.
        let root = Archetype::new(
            ArchetypeId::ROOT,
            ArchetypeMask::EMPTY,
            &[],
            world.row_capacity,
        );
        world.archetypes.push(root);
        world.archetype_index.insert(ArchetypeMask::EMPTY, ArchetypeId::ROOT);
        world
    }

    /// Register a component type, or fetch its existing record. Idempotent.
    pub fn register<T: Component>(&mut self) -> ComponentInfo {
        self.registry.register::<T>()
    }

    /// Read-only access to the component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Create a new entity in the root archetype.
    pub fn create(&mut self) -> Entity {
        let entity = self.pool.next();
        let idx = entity.index() as usize;
        let row = self.archetypes[ArchetypeId::ROOT.index()].len() as u32;
        // Safety: the root archetype has no columns.
        unsafe {
            self.archetypes[ArchetypeId::ROOT.index()].push_row(entity, &[]);
        }
        let link = EntityLink {
            archetype: ArchetypeId::ROOT,
            row,
            generation: entity.generation(),
        };
        if idx == self.links.len() {
            self.links.push(link);
        } else {
            self.links[idx] = link;
        }
        self.alive += 1;
        entity
    }

    /// Remove an entity: drop its component values, release its index.
    ///
    /// Returns `false` when the handle is stale, virtual, or never existed.
    pub fn remove(&mut self, entity: Entity) -> bool {
        let Ok(link) = self.link(entity) else {
            return false;
        };
        let archetype = &mut self.archetypes[link.archetype.index()];
        let swapped = archetype.swap_remove_row(link.row as usize);
        if let Some(moved) = swapped {
            self.links[moved.index() as usize].row = link.row;
        }
        self.pool.release(entity);
        self.alive -= 1;
        true
    }

    /// Whether `entity` is currently alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.pool.is_valid(entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.alive
    }

    /// Number of archetypes (the root included).
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    // -- link resolution ----------------------------------------------------

    /// Resolve the entity's link, guarding against stale handles.
    pub(crate) fn link(&self, entity: Entity) -> Result<EntityLink, EcsError> {
        link_in(&self.pool, &self.links, entity).ok_or(EcsError::EntityNotFound(entity))
    }

    // -- archetype registration ---------------------------------------------

    /// Find or create the archetype for `mask`, notifying every view whose
    /// predicate the new archetype satisfies.
    pub(crate) fn get_or_register_archetype(&mut self, mask: ArchetypeMask) -> ArchetypeId {
        if let Some(&id) = self.archetype_index.get(&mask) {
            return id;
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        let infos: Vec<ComponentInfo> = mask
            .iter()
            .map(|cid| {
                *self
                    .registry
                    .info(cid)
                    .expect("archetype mask references an unregistered component")
            })
            .collect();
        let archetype = Archetype::new(id, mask, &infos, self.row_capacity);
        debug!(archetype = ?mask, id = id.0, "archetype created");
        self.archetypes.push(archetype);
        self.archetype_index.insert(mask, id);
        // Reactive registration: views are never re-scanned after this.
        for view in &mut self.views {
            view.notify_archetype(id, &mask);
        }
        id
    }

    /// Mutable access to two distinct archetypes at once.
    fn archetype_pair_mut(
        &mut self,
        a: ArchetypeId,
        b: ArchetypeId,
    ) -> (&mut Archetype, &mut Archetype) {
        debug_assert_ne!(a, b);
        let (low, high) = (a.index().min(b.index()), a.index().max(b.index()));
        let (head, tail) = self.archetypes.split_at_mut(high);
        let (first, second) = (&mut head[low], &mut tail[0]);
        if a.index() < b.index() {
            (first, second)
        } else {
            (second, first)
        }
    }

    // -- component assignment -----------------------------------------------

    /// Assign a component by type, registering the type if needed.
    ///
    /// Overwrites in place when the entity already carries the component;
    /// otherwise migrates the entity along the archetype graph.
    pub fn assign<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), EcsError> {
        let info = self.registry.register::<T>();
        self.assign_with(entity, &info, value)
    }

    /// Assign a component through a previously resolved [`ComponentInfo`]
    /// (fast path: no registry lookup).
    ///
    /// # Panics
    ///
    /// Panics when `info` does not describe `T` — programmer error.
    pub fn assign_with<T: Component>(
        &mut self,
        entity: Entity,
        info: &ComponentInfo,
        value: T,
    ) -> Result<(), EcsError> {
        assert!(info.is::<T>(), "ComponentInfo does not describe {}", std::any::type_name::<T>());
        let result = unsafe { self.assign_ptr(entity, info, &value as *const T as *const u8) };
        if result.is_ok() {
            // Ownership moved into the column.
            std::mem::forget(value);
        }
        result
    }

    /// Assign a component from erased bytes (the command-buffer decode path).
    ///
    /// A sized component requires exactly `info.size()` bytes; anything else
    /// — an empty payload in particular — is a [`EcsError::NilComponentData`]
    /// contract violation. Tags ignore the payload.
    ///
    /// # Safety
    ///
    /// `data` must be the byte representation of a valid value of the
    /// component type described by `info`; ownership of that value transfers
    /// into the world.
    pub unsafe fn assign_raw(
        &mut self,
        entity: Entity,
        info: &ComponentInfo,
        data: &[u8],
    ) -> Result<(), EcsError> {
        if !info.is_tag() && data.len() != info.size() {
            return Err(EcsError::NilComponentData(info.name()));
        }
        self.assign_ptr(entity, info, data.as_ptr())
    }

    /// Core assignment: overwrite in place, or migrate along the `add` edge.
    ///
    /// # Safety
    ///
    /// `value_ptr` must point to a valid value of the type described by
    /// `info`; on `Ok`, ownership has moved into the world.
    pub(crate) unsafe fn assign_ptr(
        &mut self,
        entity: Entity,
        info: &ComponentInfo,
        value_ptr: *const u8,
    ) -> Result<(), EcsError> {
        let link = self.link(entity)?;
        let id = info.id();
        let src_id = link.archetype;

        if self.archetypes[src_id.index()].has_component(id) {
            // Already present: overwrite the slot, no structural change.
            self.archetypes[src_id.index()]
                .column_mut(id)
                .expect("mask bit without column")
                .overwrite_raw(link.row as usize, value_ptr);
            return Ok(());
        }

        // Fast path: cached edge. Slow path: resolve the destination mask
        // and cache the edge in both directions for the next occurrence.
        let dst_id = match self.archetypes[src_id.index()].add_edge(id) {
            Some(dst) => dst,
            None => {
                let new_mask = self.archetypes[src_id.index()].mask().with(id);
                let dst = self.get_or_register_archetype(new_mask);
                self.archetypes[src_id.index()].set_add_edge(id, dst);
                self.archetypes[dst.index()].set_remove_edge(id, src_id);
                dst
            }
        };

        let row = link.row as usize;
        let (src, dst) = self.archetype_pair_mut(src_id, dst_id);
        let (new_row, swapped) = Archetype::migrate_row(src, row, dst, Some((id, value_ptr)));

        self.links[entity.index() as usize] = EntityLink {
            archetype: dst_id,
            row: new_row as u32,
            generation: entity.generation(),
        };
        if let Some(moved) = swapped {
            self.links[moved.index() as usize].row = row as u32;
        }
        Ok(())
    }

    // -- component unassignment ---------------------------------------------

    /// Remove a component by type. A no-op when the entity does not carry it.
    pub fn unassign<T: Component>(&mut self, entity: Entity) -> Result<(), EcsError> {
        let Some(info) = self.registry.lookup::<T>() else {
            return self.link(entity).map(|_| ());
        };
        self.unassign_with(entity, &info)
    }

    /// Remove a component through a resolved [`ComponentInfo`].
    ///
    /// An entity that loses its last component moves to the root archetype
    /// and stays alive; only [`remove`](Self::remove) ends an entity.
    pub fn unassign_with(
        &mut self,
        entity: Entity,
        info: &ComponentInfo,
    ) -> Result<(), EcsError> {
        let link = self.link(entity)?;
        let id = info.id();
        let src_id = link.archetype;

        if !self.archetypes[src_id.index()].has_component(id) {
            return Ok(());
        }

        let dst_id = match self.archetypes[src_id.index()].remove_edge(id) {
            Some(dst) => dst,
            None => {
                let new_mask = self.archetypes[src_id.index()].mask().without(id);
                let dst = self.get_or_register_archetype(new_mask);
                self.archetypes[src_id.index()].set_remove_edge(id, dst);
                self.archetypes[dst.index()].set_add_edge(id, src_id);
                dst
            }
        };

        let row = link.row as usize;
        let (src, dst) = self.archetype_pair_mut(src_id, dst_id);
        // Safety: the masks differ by exactly `id`, which the destination
        // lacks, so the migration drops it and copies the rest.
        let (new_row, swapped) = unsafe { Archetype::migrate_row(src, row, dst, None) };

        self.links[entity.index() as usize] = EntityLink {
            archetype: dst_id,
            row: new_row as u32,
            generation: entity.generation(),
        };
        if let Some(moved) = swapped {
            self.links[moved.index() as usize].row = row as u32;
        }
        Ok(())
    }

    // -- component access ---------------------------------------------------

    /// Immutable reference to a component, by type.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let info = self.registry.lookup::<T>()?;
        self.get_with(entity, &info)
    }

    /// Mutable reference to a component, by type.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let info = self.registry.lookup::<T>()?;
        self.get_with_mut(entity, &info)
    }

    /// Immutable reference through a resolved [`ComponentInfo`] (fast path).
    ///
    /// # Panics
    ///
    /// Panics when `info` does not describe `T`.
    pub fn get_with<T: Component>(&self, entity: Entity, info: &ComponentInfo) -> Option<&T> {
        assert!(info.is::<T>(), "ComponentInfo does not describe {}", std::any::type_name::<T>());
        let link = self.link(entity).ok()?;
        let column = self.archetypes[link.archetype.index()].column(info.id())?;
        // Safety: the column stores values of T (checked above) and the link
        // row is in range for a trusted link.
        Some(unsafe { &*(column.ptr_at(link.row as usize) as *const T) })
    }

    /// Mutable reference through a resolved [`ComponentInfo`] (fast path).
    ///
    /// # Panics
    ///
    /// Panics when `info` does not describe `T`.
    pub fn get_with_mut<T: Component>(
        &mut self,
        entity: Entity,
        info: &ComponentInfo,
    ) -> Option<&mut T> {
        assert!(info.is::<T>(), "ComponentInfo does not describe {}", std::any::type_name::<T>());
        let link = self.link(entity).ok()?;
        let column = self.archetypes[link.archetype.index()].column(info.id())?;
        // Safety: as in `get_with`; `&mut self` guarantees exclusivity.
        Some(unsafe { &mut *(column.ptr_at(link.row as usize) as *mut T) })
    }

    /// Allocate-or-get: a mutable reference to the component, inserting the
    /// value produced by `init` when the entity does not yet carry it.
    pub fn get_or_insert_with<T: Component>(
        &mut self,
        entity: Entity,
        init: impl FnOnce() -> T,
    ) -> Result<&mut T, EcsError> {
        let info = self.registry.register::<T>();
        let link = self.link(entity)?;
        if !self.archetypes[link.archetype.index()].has_component(info.id()) {
            self.assign_with(entity, &info, init())?;
        }
        Ok(self
            .get_with_mut(entity, &info)
            .expect("component present after assignment"))
    }

    /// Whether the entity carries component `T`.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        let Some(info) = self.registry.lookup::<T>() else {
            return false;
        };
        self.has_component(entity, info.id())
    }

    /// Whether the entity carries the component with `id`.
    pub fn has_component(&self, entity: Entity, id: ComponentId) -> bool {
        let Ok(link) = self.link(entity) else {
            return false;
        };
        self.archetypes[link.archetype.index()].has_component(id)
    }

    /// The archetype currently storing `entity`, or `None` for stale handles.
    pub fn archetype_of(&self, entity: Entity) -> Option<ArchetypeId> {
        self.link(entity).ok().map(|link| link.archetype)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.alive)
            .field("archetype_count", &self.archetypes.len())
            .field("view_count", &self.views.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
