//! Archetype storage: type-erased columns and the transition graph.
//!
//! An [`Archetype`] stores every entity that shares one exact
//! [`ArchetypeMask`]: a dense entity list plus one contiguous typed buffer
//! ([`Column`]) per set mask bit, ordered by ascending component ID. Rows are
//! packed (swap-remove on deletion, no holes). Each archetype also carries a
//! fixed-size edge table caching, per component ID, the archetype reached by
//! adding or removing that component — repeat transitions with a known shape
//! skip the mask hash entirely.
//!
//! # Safety
//!
//! Component data is stored as type-erased byte buffers; the `unsafe` code in
//! [`Column`] relies on every access using the [`ComponentInfo`] the column
//! was created with. The [`World`](crate::world::World) upholds that
//! invariant: a column is only ever addressed through the mask bit it was
//! allocated for.

use crate::component::{ComponentId, ComponentInfo, MAX_COMPONENTS};
use crate::entity::Entity;
use crate::mask::ArchetypeMask;

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr;

// ---------------------------------------------------------------------------
// ArchetypeId
// ---------------------------------------------------------------------------

/// Identifies an archetype within the world. Indexes into `World::archetypes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    /// The root (empty-mask) archetype, created with the world.
    pub(crate) const ROOT: ArchetypeId = ArchetypeId(0);

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Column -- type-erased component storage
// ---------------------------------------------------------------------------

/// A type-erased, densely packed array of component values of a single type.
///
/// Internally a manually managed byte buffer whose layout matches the stored
/// component type; row addressing is `base + row * size`. Grows by doubling
/// with a value-preserving realloc. Zero-sized (tag) components allocate
/// nothing and track only a length.
pub(crate) struct Column {
    /// Pointer to the heap allocation (null while capacity == 0 or for tags).
    data: *mut u8,
    /// Number of live elements.
    len: usize,
    /// Number of elements that fit in the current allocation.
    capacity: usize,
    /// First allocation size, seeded from the world's row-capacity hint.
    initial_capacity: usize,
    /// Layout and destructor of a single element.
    info: ComponentInfo,
}

// Column stores raw bytes of `Component` values, which are Send + Sync by
// the trait bound.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    /// Create a new, empty column for the component described by `info`.
    /// The first allocation reserves `initial_capacity` rows.
    pub(crate) fn new(info: ComponentInfo, initial_capacity: usize) -> Self {
        Self {
            data: ptr::null_mut(),
            len: 0,
            capacity: 0,
            initial_capacity: initial_capacity.max(4),
            info,
        }
    }

    /// Number of stored elements.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// The component this column stores.
    #[inline]
    pub(crate) fn info(&self) -> &ComponentInfo {
        &self.info
    }

    // -- internal helpers ---------------------------------------------------

    fn layout_for_capacity(&self, cap: usize) -> Layout {
        Layout::from_size_align(self.info.size * cap, self.info.align)
            .expect("column layout overflow")
    }

    fn grow_if_needed(&mut self) {
        if self.len < self.capacity {
            return;
        }
        let new_cap = if self.capacity == 0 {
            self.initial_capacity
        } else {
            self.capacity * 2
        };
        if self.info.size == 0 {
            // Tag: no allocation, only bookkeeping.
            self.capacity = new_cap;
            return;
        }
        let new_layout = self.layout_for_capacity(new_cap);
        unsafe {
            let new_data = if self.capacity == 0 {
                alloc::alloc(new_layout)
            } else {
                let old_layout = self.layout_for_capacity(self.capacity);
                alloc::realloc(self.data, old_layout, new_layout.size())
            };
            assert!(!new_data.is_null(), "column allocation failed");
            self.data = new_data;
        }
        self.capacity = new_cap;
    }

    /// Raw pointer to the element at `index`. Takes `&self` so the parallel
    /// phase can address rows through a shared world; dereferencing is the
    /// caller's obligation.
    #[inline]
    pub(crate) fn ptr_at(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.len);
        if self.info.size == 0 {
            // Tag -- dangling but aligned.
            return self.info.align as *mut u8;
        }
        unsafe { self.data.add(index * self.info.size) }
    }

    // -- mutation -----------------------------------------------------------

    /// Append a value, moving it into the column.
    ///
    /// # Safety
    ///
    /// `value_ptr` must point to a valid, initialised instance of the column's
    /// component type. Ownership transfers into the column; the caller must
    /// not drop the source.
    pub(crate) unsafe fn push_raw(&mut self, value_ptr: *const u8) {
        self.grow_if_needed();
        if self.info.size > 0 {
            let dst = self.data.add(self.len * self.info.size);
            ptr::copy_nonoverlapping(value_ptr, dst, self.info.size);
        }
        self.len += 1;
    }

    /// Drop the value at `row` and copy a new one over it in place.
    ///
    /// # Safety
    ///
    /// `row < len`; `value_ptr` as for [`push_raw`](Self::push_raw).
    pub(crate) unsafe fn overwrite_raw(&mut self, row: usize, value_ptr: *const u8) {
        debug_assert!(row < self.len);
        let slot = self.ptr_at(row);
        if let Some(drop_fn) = self.info.drop_fn {
            drop_fn(slot);
        }
        if self.info.size > 0 {
            ptr::copy_nonoverlapping(value_ptr, slot, self.info.size);
        }
    }

    /// Drop the value at `row` in place without removing the slot.
    ///
    /// # Safety
    ///
    /// `row < len`; the slot must not be read again before being overwritten
    /// or forgotten.
    pub(crate) unsafe fn drop_in_place(&mut self, row: usize) {
        debug_assert!(row < self.len);
        if let Some(drop_fn) = self.info.drop_fn {
            drop_fn(self.ptr_at(row));
        }
    }

    /// Swap-remove the element at `row`, dropping it and moving the last
    /// element into its place when it was not the last.
    ///
    /// # Safety
    ///
    /// `row < len`.
    pub(crate) unsafe fn swap_remove(&mut self, row: usize) {
        self.drop_in_place(row);
        self.swap_remove_forget(row);
    }

    /// Swap-remove the element at `row` without dropping it — its bytes have
    /// already been moved out (archetype migration) or dropped.
    ///
    /// # Safety
    ///
    /// `row < len`.
    pub(crate) unsafe fn swap_remove_forget(&mut self, row: usize) {
        debug_assert!(row < self.len);
        let last = self.len - 1;
        if self.info.size > 0 && row != last {
            let src = self.data.add(last * self.info.size);
            let dst = self.data.add(row * self.info.size);
            ptr::copy_nonoverlapping(src, dst, self.info.size);
        }
        self.len -= 1;
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        if let Some(drop_fn) = self.info.drop_fn {
            for i in 0..self.len {
                unsafe { drop_fn(self.ptr_at(i)) };
            }
        }
        if self.info.size > 0 && self.capacity > 0 {
            let layout = self.layout_for_capacity(self.capacity);
            unsafe { alloc::dealloc(self.data, layout) };
        }
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("component", &self.info.name())
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// A cached transition for one component ID: the archetype reached by adding
/// it, and the archetype reached by removing it.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Edge {
    pub(crate) add: Option<ArchetypeId>,
    pub(crate) remove: Option<ArchetypeId>,
}

/// Dense storage for all entities sharing one exact component mask.
pub struct Archetype {
    id: ArchetypeId,
    mask: ArchetypeMask,
    /// Row -> entity; parallel to every column.
    entities: Vec<Entity>,
    /// One column per set mask bit, ordered by ascending component ID.
    /// `columns[i]` stores the component whose bit-rank in `mask` is `i`.
    columns: Vec<Column>,
    /// Transition cache, indexed by component ID.
    edges: Box<[Edge]>,
}

impl Archetype {
    /// Create a new, empty archetype. `infos` must be ordered by ascending
    /// component ID and correspond exactly to the set bits of `mask`.
    pub(crate) fn new(
        id: ArchetypeId,
        mask: ArchetypeMask,
        infos: &[ComponentInfo],
        row_capacity: usize,
    ) -> Self {
        debug_assert_eq!(infos.len(), mask.count());
        debug_assert!(infos.windows(2).all(|w| w[0].id() < w[1].id()));
        Self {
            id,
            mask,
            entities: Vec::new(),
            columns: infos
                .iter()
                .map(|info| Column::new(*info, row_capacity))
                .collect(),
            edges: vec![Edge::default(); MAX_COMPONENTS].into_boxed_slice(),
        }
    }

    /// This archetype's ID.
    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The exact component set stored here.
    #[inline]
    pub fn mask(&self) -> &ArchetypeMask {
        &self.mask
    }

    /// Number of entities stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entities are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The dense entity list; row `i` of every column belongs to
    /// `entities()[i]`.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Whether this archetype stores the given component.
    #[inline]
    pub fn has_component(&self, id: ComponentId) -> bool {
        self.mask.contains(id)
    }

    /// The column storing `id`, if present. O(1) via mask bit-rank.
    #[inline]
    pub(crate) fn column(&self, id: ComponentId) -> Option<&Column> {
        self.mask.index_of(id).map(|i| &self.columns[i])
    }

    /// Mutable access to the column storing `id`.
    #[inline]
    pub(crate) fn column_mut(&mut self, id: ComponentId) -> Option<&mut Column> {
        self.mask.index_of(id).map(|i| &mut self.columns[i])
    }

    // -- transition cache ---------------------------------------------------

    #[inline]
    pub(crate) fn add_edge(&self, id: ComponentId) -> Option<ArchetypeId> {
        self.edges[id.index()].add
    }

    #[inline]
    pub(crate) fn remove_edge(&self, id: ComponentId) -> Option<ArchetypeId> {
        self.edges[id.index()].remove
    }

    #[inline]
    pub(crate) fn set_add_edge(&mut self, id: ComponentId, dest: ArchetypeId) {
        self.edges[id.index()].add = Some(dest);
    }

    #[inline]
    pub(crate) fn set_remove_edge(&mut self, id: ComponentId, dest: ArchetypeId) {
        self.edges[id.index()].remove = Some(dest);
    }

    // -- row mutation -------------------------------------------------------

    /// Add an entity with one value per column.
    ///
    /// # Safety
    ///
    /// `components` must hold exactly one `(id, pointer)` pair per set mask
    /// bit, each pointing to a valid value of the matching type; ownership of
    /// every value transfers into the archetype.
    pub(crate) unsafe fn push_row(
        &mut self,
        entity: Entity,
        components: &[(ComponentId, *const u8)],
    ) -> usize {
        debug_assert_eq!(components.len(), self.columns.len());
        let row = self.entities.len();
        self.entities.push(entity);
        for &(id, value_ptr) in components {
            self.column_mut(id)
                .expect("component not in archetype")
                .push_raw(value_ptr);
        }
        row
    }

    /// Remove the entity at `row`, dropping its component values and keeping
    /// storage dense via swap-remove.
    ///
    /// Returns the entity relocated into `row` when a swap occurred.
    pub(crate) fn swap_remove_row(&mut self, row: usize) -> Option<Entity> {
        let last = self.entities.len() - 1;
        self.entities.swap_remove(row);
        for column in &mut self.columns {
            unsafe { column.swap_remove(row) };
        }
        if row < last {
            Some(self.entities[row])
        } else {
            None
        }
    }

    /// Move the entity at `src.row` into `dst`, copying every component the
    /// two masks share. For an added component, `extra` supplies the new
    /// value; a component present in `src` but absent from `dst` is dropped.
    /// The vacated source row is swap-removed.
    ///
    /// Returns `(destination row, entity relocated into the source row)`.
    ///
    /// # Safety
    ///
    /// `row < src.len()`. `extra`, when present, must name a component in
    /// `dst.mask` but not `src.mask` and point to a valid value of that type
    /// (ownership transfers). The masks must differ by exactly the added or
    /// removed component.
    pub(crate) unsafe fn migrate_row(
        src: &mut Archetype,
        row: usize,
        dst: &mut Archetype,
        extra: Option<(ComponentId, *const u8)>,
    ) -> (usize, Option<Entity>) {
        debug_assert!(row < src.entities.len());
        let entity = src.entities[row];
        let new_row = dst.entities.len();
        dst.entities.push(entity);

        for column in &mut dst.columns {
            let id = column.info().id();
            if let Some(src_column) = src.column(id) {
                column.push_raw(src_column.ptr_at(row));
            } else {
                let (extra_id, value_ptr) =
                    extra.expect("destination column missing from source with no new value");
                debug_assert_eq!(extra_id, id);
                column.push_raw(value_ptr);
            }
        }

        // A component being removed has no destination column; drop it.
        let dst_mask = dst.mask;
        for column in &mut src.columns {
            if !dst_mask.contains(column.info().id()) {
                column.drop_in_place(row);
            }
        }

        let last = src.entities.len() - 1;
        src.entities.swap_remove(row);
        for column in &mut src.columns {
            column.swap_remove_forget(row);
        }
        let swapped = if row < last {
            Some(src.entities[row])
        } else {
            None
        };
        (new_row, swapped)
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("mask", &self.mask)
            .field("len", &self.entities.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRegistry;

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

    fn archetype_of(infos: &[ComponentInfo]) -> Archetype {
        let mask = ArchetypeMask::from_ids(&infos.iter().map(|i| i.id()).collect::<Vec<_>>());
        Archetype::new(ArchetypeId(1), mask, infos, 8)
    }

    unsafe fn read<T: Clone>(arch: &Archetype, id: ComponentId, row: usize) -> T {
        (*(arch.column(id).unwrap().ptr_at(row) as *const T)).clone()
    }

    #[test]
    fn push_and_read_row() {
        let mut reg = ComponentRegistry::new();
        let pos = reg.register::<Pos>();
        let mut arch = archetype_of(&[pos]);

        let e = Entity::new(0, 0);
        let value = Pos { x: 1.0, y: 2.0 };
        unsafe {
            let ptr = &value as *const Pos as *const u8;
            arch.push_row(e, &[(pos.id(), ptr)]);
        }
        std::mem::forget(value);

        assert_eq!(arch.len(), 1);
        assert_eq!(arch.entities()[0], e);
        unsafe {
            assert_eq!(read::<Pos>(&arch, pos.id(), 0), Pos { x: 1.0, y: 2.0 });
        }
    }

    #[test]
    fn swap_remove_relocates_last_row() {
        let mut reg = ComponentRegistry::new();
        let pos = reg.register::<Pos>();
        let mut arch = archetype_of(&[pos]);

        let e0 = Entity::new(0, 0);
        let e1 = Entity::new(1, 0);
        for (e, x) in [(e0, 0.0f32), (e1, 1.0)] {
            let value = Pos { x, y: x };
            unsafe { arch.push_row(e, &[(pos.id(), &value as *const Pos as *const u8)]) };
            std::mem::forget(value);
        }

        let swapped = arch.swap_remove_row(0);
        assert_eq!(swapped, Some(e1));
        assert_eq!(arch.len(), 1);
        unsafe {
            assert_eq!(read::<Pos>(&arch, pos.id(), 0), Pos { x: 1.0, y: 1.0 });
        }

        // Removing the sole remaining row needs no relocation.
        assert_eq!(arch.swap_remove_row(0), None);
        assert_eq!(arch.len(), 0);
    }

    #[test]
    fn migrate_row_carries_shared_components() {
        let mut reg = ComponentRegistry::new();
        let pos = reg.register::<Pos>();
        let vel = reg.register::<Vel>();

        let mut src = archetype_of(&[pos]);
        let mut dst = archetype_of(&[pos, vel]);

        let e = Entity::new(3, 0);
        let p = Pos { x: 5.0, y: 6.0 };
        unsafe { src.push_row(e, &[(pos.id(), &p as *const Pos as *const u8)]) };
        std::mem::forget(p);

        let v = Vel { dx: 1.0, dy: -1.0 };
        let (new_row, swapped) = unsafe {
            Archetype::migrate_row(
                &mut src,
                0,
                &mut dst,
                Some((vel.id(), &v as *const Vel as *const u8)),
            )
        };
        std::mem::forget(v);

        assert_eq!(new_row, 0);
        assert_eq!(swapped, None);
        assert_eq!(src.len(), 0);
        assert_eq!(dst.len(), 1);
        unsafe {
            assert_eq!(read::<Pos>(&dst, pos.id(), 0), Pos { x: 5.0, y: 6.0 });
            assert_eq!(read::<Vel>(&dst, vel.id(), 0), Vel { dx: 1.0, dy: -1.0 });
        }
    }

    #[test]
    fn migrate_row_drops_removed_component() {
        let mut reg = ComponentRegistry::new();
        let pos = reg.register::<Pos>();
        let name = reg.register::<String>();

        let mut src = archetype_of(&[pos, name]);
        let mut dst = archetype_of(&[pos]);

        let e = Entity::new(0, 0);
        let p = Pos { x: 1.0, y: 1.0 };
        let s = String::from("transient");
        unsafe {
            src.push_row(
                e,
                &[
                    (pos.id(), &p as *const Pos as *const u8),
                    (name.id(), &s as *const String as *const u8),
                ],
            );
        }
        std::mem::forget(p);
        std::mem::forget(s);

        let (new_row, _) = unsafe { Archetype::migrate_row(&mut src, 0, &mut dst, None) };
        assert_eq!(new_row, 0);
        unsafe {
            assert_eq!(read::<Pos>(&dst, pos.id(), 0), Pos { x: 1.0, y: 1.0 });
        }
    }

    #[test]
    fn column_growth_preserves_values() {
        let mut reg = ComponentRegistry::new();
        let pos = reg.register::<Pos>();
        let mut arch = archetype_of(&[pos]);

        for i in 0..100u32 {
            let value = Pos {
                x: i as f32,
                y: 0.0,
            };
            unsafe {
                arch.push_row(
                    Entity::new(i, 0),
                    &[(pos.id(), &value as *const Pos as *const u8)],
                );
            }
            std::mem::forget(value);
        }
        for i in 0..100usize {
            unsafe {
                assert_eq!(read::<Pos>(&arch, pos.id(), i).x, i as f32);
            }
        }
    }

    #[test]
    fn tag_columns_store_nothing() {
        struct Frozen;
        let mut reg = ComponentRegistry::new();
        let tag = reg.register::<Frozen>();
        let mut arch = archetype_of(&[tag]);

        unsafe {
            arch.push_row(Entity::new(0, 0), &[(tag.id(), std::ptr::null())]);
            arch.push_row(Entity::new(1, 0), &[(tag.id(), std::ptr::null())]);
        }
        assert_eq!(arch.len(), 2);
        assert_eq!(arch.column(tag.id()).unwrap().len(), 2);
        arch.swap_remove_row(0);
        assert_eq!(arch.len(), 1);
    }

    #[test]
    fn edges_cache_both_directions() {
        let mut reg = ComponentRegistry::new();
        let pos = reg.register::<Pos>();
        let mut arch = archetype_of(&[pos]);

        assert_eq!(arch.add_edge(pos.id()), None);
        arch.set_add_edge(pos.id(), ArchetypeId(7));
        arch.set_remove_edge(pos.id(), ArchetypeId(3));
        assert_eq!(arch.add_edge(pos.id()), Some(ArchetypeId(7)));
        assert_eq!(arch.remove_edge(pos.id()), Some(ArchetypeId(3)));
    }
}
