//! Reactive views: baked include/exclude queries over the archetype set.
//!
//! A [`View`] is built once from required and forbidden component IDs. The
//! matching-archetype list is populated by a single scan at construction and
//! from then on kept current purely by push notification from the world's
//! archetype registration — a view never re-scans.
//!
//! Iteration yields one [`Row`]/[`RowMut`] per stored entity of every baked
//! archetype, with direct (no-copy) column access. [`World::view_filter`]
//! intersects an externally supplied entity list against the view in
//! O(|subset|), preserving caller order.
//!
//! # Soundness
//!
//! Read-only iteration borrows `&World`. Mutable iteration borrows
//! `&mut World`, so rows handed out by one pass cannot coexist with any
//! other world access; within a pass, each row addresses a distinct slot,
//! and a [`RowMut`]'s mutable borrows are tied to `&mut self`.

use std::marker::PhantomData;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{Component, ComponentId, ComponentInfo, ComponentRegistry};
use crate::entity::{Entity, EntityPool};
use crate::mask::ArchetypeMask;
use crate::world::{link_in, EntityLink, World};
use crate::EcsError;

// ---------------------------------------------------------------------------
// View handle + baked data
// ---------------------------------------------------------------------------

/// Copyable handle to a baked view registered with a [`World`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View(pub(crate) u32);

/// The world-owned state of one view.
pub(crate) struct ViewData {
    include: ArchetypeMask,
    exclude: ArchetypeMask,
    /// Baked matching archetypes, in registration order.
    archetypes: Vec<ArchetypeId>,
    /// O(1) membership, indexed by `ArchetypeId`; used by `view_filter`.
    matched: Vec<bool>,
}

impl ViewData {
    fn matches(&self, mask: &ArchetypeMask) -> bool {
        mask.contains_all(&self.include) && !mask.intersects(&self.exclude)
    }

    /// Push notification from archetype registration.
    pub(crate) fn notify_archetype(&mut self, id: ArchetypeId, mask: &ArchetypeMask) {
        if id.index() >= self.matched.len() {
            self.matched.resize(id.index() + 1, false);
        }
        if self.matches(mask) {
            self.archetypes.push(id);
            self.matched[id.index()] = true;
        }
    }

    #[inline]
    fn is_matched(&self, id: ArchetypeId) -> bool {
        self.matched.get(id.index()).copied().unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Row accessors
// ---------------------------------------------------------------------------

/// Read access to one entity's row during view iteration.
pub struct Row<'w> {
    registry: &'w ComponentRegistry,
    archetype: &'w Archetype,
    row: usize,
}

impl<'w> Row<'w> {
    /// The entity this row belongs to.
    #[inline]
    pub fn entity(&self) -> Entity {
        self.archetype.entities()[self.row]
    }

    /// Component reference, resolving the type through the registry.
    pub fn get<T: Component>(&self) -> Option<&'w T> {
        let info = self.registry.lookup::<T>()?;
        self.get_with(&info)
    }

    /// Component reference through a resolved [`ComponentInfo`] (fast path).
    ///
    /// # Panics
    ///
    /// Panics when `info` does not describe `T`.
    pub fn get_with<T: Component>(&self, info: &ComponentInfo) -> Option<&'w T> {
        assert!(info.is::<T>());
        let column = self.archetype.column(info.id())?;
        // Safety: the column stores T and `row` is within the archetype.
        Some(unsafe { &*(column.ptr_at(self.row) as *const T) })
    }
}

/// Mutable access to one entity's row during view iteration.
///
/// Obtained through [`World::view_iter_mut`], whose `&mut World` receiver
/// guarantees exclusivity for the whole pass.
pub struct RowMut<'w> {
    registry: &'w ComponentRegistry,
    archetype: *mut Archetype,
    row: usize,
    _world: PhantomData<&'w mut World>,
}

impl RowMut<'_> {
    #[inline]
    fn archetype(&self) -> &Archetype {
        // Safety: the pointer was derived from a live `&mut World` borrow
        // whose lifetime bounds `self`.
        unsafe { &*self.archetype }
    }

    /// The entity this row belongs to.
    #[inline]
    pub fn entity(&self) -> Entity {
        self.archetype().entities()[self.row]
    }

    /// Component reference, resolving the type through the registry.
    pub fn get<T: Component>(&self) -> Option<&T> {
        let info = self.registry.lookup::<T>()?;
        self.get_with(&info)
    }

    /// Mutable component reference, resolving the type through the registry.
    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        let info = self.registry.lookup::<T>()?;
        self.get_with_mut(&info)
    }

    /// Component reference through a resolved [`ComponentInfo`] (fast path).
    pub fn get_with<T: Component>(&self, info: &ComponentInfo) -> Option<&T> {
        assert!(info.is::<T>());
        let column = self.archetype().column(info.id())?;
        Some(unsafe { &*(column.ptr_at(self.row) as *const T) })
    }

    /// Mutable component reference through a resolved [`ComponentInfo`].
    ///
    /// Direct column access, no copies; the borrow is tied to `&mut self`,
    /// so at most one mutable component borrow per row exists at a time.
    pub fn get_with_mut<T: Component>(&mut self, info: &ComponentInfo) -> Option<&mut T> {
        assert!(info.is::<T>());
        let column = self.archetype().column(info.id())?;
        Some(unsafe { &mut *(column.ptr_at(self.row) as *mut T) })
    }
}

// ---------------------------------------------------------------------------
// Iterators
// ---------------------------------------------------------------------------

/// Read-only row iterator over every baked archetype of a view.
pub struct ViewIter<'w> {
    registry: &'w ComponentRegistry,
    archetypes: &'w [Archetype],
    ids: &'w [ArchetypeId],
    arch_cursor: usize,
    row_cursor: usize,
}

impl<'w> Iterator for ViewIter<'w> {
    type Item = Row<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let id = *self.ids.get(self.arch_cursor)?;
            let archetype = &self.archetypes[id.index()];
            if self.row_cursor < archetype.len() {
                let row = Row {
                    registry: self.registry,
                    archetype,
                    row: self.row_cursor,
                };
                self.row_cursor += 1;
                return Some(row);
            }
            self.arch_cursor += 1;
            self.row_cursor = 0;
        }
    }
}

/// Mutable row iterator over every baked archetype of a view.
pub struct ViewIterMut<'w> {
    registry: &'w ComponentRegistry,
    archetype_base: *mut Archetype,
    ids: &'w [ArchetypeId],
    arch_cursor: usize,
    row_cursor: usize,
    _world: PhantomData<&'w mut World>,
}

impl<'w> Iterator for ViewIterMut<'w> {
    type Item = RowMut<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let id = *self.ids.get(self.arch_cursor)?;
            // Safety: `id` indexes the world's archetype vec, which the
            // iterator exclusively borrows for 'w.
            let archetype = unsafe { self.archetype_base.add(id.index()) };
            let len = unsafe { (*archetype).len() };
            if self.row_cursor < len {
                let row = RowMut {
                    registry: self.registry,
                    archetype,
                    row: self.row_cursor,
                    _world: PhantomData,
                };
                self.row_cursor += 1;
                return Some(row);
            }
            self.arch_cursor += 1;
            self.row_cursor = 0;
        }
    }
}

/// Read-only iterator over the intersection of a caller-supplied entity list
/// with a view, in caller order.
pub struct ViewFilter<'w, 'e> {
    registry: &'w ComponentRegistry,
    archetypes: &'w [Archetype],
    pool: &'w EntityPool,
    links: &'w [EntityLink],
    data: &'w ViewData,
    subset: std::slice::Iter<'e, Entity>,
}

impl<'w> Iterator for ViewFilter<'w, '_> {
    type Item = Row<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        for &entity in self.subset.by_ref() {
            let Some(link) = link_in(self.pool, self.links, entity) else {
                continue;
            };
            if !self.data.is_matched(link.archetype) {
                continue;
            }
            return Some(Row {
                registry: self.registry,
                archetype: &self.archetypes[link.archetype.index()],
                row: link.row as usize,
            });
        }
        None
    }
}

/// Mutable counterpart of [`ViewFilter`].
pub struct ViewFilterMut<'w, 'e> {
    registry: &'w ComponentRegistry,
    archetype_base: *mut Archetype,
    pool: &'w EntityPool,
    links: &'w [EntityLink],
    data: &'w ViewData,
    subset: std::slice::Iter<'e, Entity>,
    _world: PhantomData<&'w mut World>,
}

impl<'w> Iterator for ViewFilterMut<'w, '_> {
    type Item = RowMut<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        for &entity in self.subset.by_ref() {
            let Some(link) = link_in(self.pool, self.links, entity) else {
                continue;
            };
            if !self.data.is_matched(link.archetype) {
                continue;
            }
            // Safety: as in `ViewIterMut::next`.
            let archetype = unsafe { self.archetype_base.add(link.archetype.index()) };
            return Some(RowMut {
                registry: self.registry,
                archetype,
                row: link.row as usize,
                _world: PhantomData,
            });
        }
        None
    }
}

// ---------------------------------------------------------------------------
// World surface
// ---------------------------------------------------------------------------

impl World {
    /// Build a view from required and forbidden component IDs.
    ///
    /// The baked archetype list is populated by one scan of the existing
    /// archetypes; afterwards the world pushes every new matching archetype
    /// to the view as it is registered.
    ///
    /// # Errors
    ///
    /// [`EcsError::ViewConfiguration`] when any ID appears in both sets.
    pub fn new_view(
        &mut self,
        include: &[ComponentId],
        exclude: &[ComponentId],
    ) -> Result<View, EcsError> {
        for id in include {
            if exclude.contains(id) {
                let name = self
                    .registry
                    .info(*id)
                    .map(|info| info.name())
                    .unwrap_or("<unregistered>");
                return Err(EcsError::ViewConfiguration(name));
            }
        }
        let mut data = ViewData {
            include: ArchetypeMask::from_ids(include),
            exclude: ArchetypeMask::from_ids(exclude),
            archetypes: Vec::new(),
            matched: vec![false; self.archetypes.len()],
        };
        for archetype in &self.archetypes {
            data.notify_archetype(archetype.id(), archetype.mask());
        }
        let view = View(self.views.len() as u32);
        self.views.push(data);
        Ok(view)
    }

    /// Read-only row iteration over every baked archetype of `view`.
    ///
    /// Lazy and restartable: each call starts a fresh pass.
    pub fn view_iter(&self, view: View) -> ViewIter<'_> {
        let data = &self.views[view.0 as usize];
        ViewIter {
            registry: &self.registry,
            archetypes: &self.archetypes,
            ids: &data.archetypes,
            arch_cursor: 0,
            row_cursor: 0,
        }
    }

    /// Mutable row iteration over every baked archetype of `view`, exposing
    /// direct column access for in-place updates.
    pub fn view_iter_mut(&mut self, view: View) -> ViewIterMut<'_> {
        let World {
            registry,
            archetypes,
            views,
            ..
        } = self;
        let data = &views[view.0 as usize];
        ViewIterMut {
            registry,
            archetype_base: archetypes.as_mut_ptr(),
            ids: &data.archetypes,
            arch_cursor: 0,
            row_cursor: 0,
            _world: PhantomData,
        }
    }

    /// Intersect `subset` with the view's matched archetypes, in caller
    /// order, in O(|subset|). Entities that are stale or unmatched are
    /// skipped.
    pub fn view_filter<'w, 'e>(&'w self, view: View, subset: &'e [Entity]) -> ViewFilter<'w, 'e> {
        let data = &self.views[view.0 as usize];
        ViewFilter {
            registry: &self.registry,
            archetypes: &self.archetypes,
            pool: &self.pool,
            links: &self.links,
            data,
            subset: subset.iter(),
        }
    }

    /// Mutable counterpart of [`view_filter`](Self::view_filter).
    pub fn view_filter_mut<'w, 'e>(
        &'w mut self,
        view: View,
        subset: &'e [Entity],
    ) -> ViewFilterMut<'w, 'e> {
        let World {
            pool,
            registry,
            archetypes,
            links,
            views,
            ..
        } = self;
        let data = &views[view.0 as usize];
        ViewFilterMut {
            registry,
            archetype_base: archetypes.as_mut_ptr(),
            pool,
            links,
            data,
            subset: subset.iter(),
            _world: PhantomData,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
