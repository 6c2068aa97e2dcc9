//! Entity arena
//!
//! The graph never stores `EntityInfo` values directly. Every endpoint is
//! interned once and referred to by an `EntityId`; relations and groups hold
//! ids only. The canonical copy is the first one interned.

use std::collections::HashMap;
use std::fmt;

use crate::entity::{EntityInfo, EntityKey};

/// Stable handle into the entity arena
///
/// `Copy` and register-sized; ids of removed entities are recycled, so an id
/// is only meaningful while its entity is still referenced by the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u32);

impl EntityId {
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Index as usize (for slot access)
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

impl From<u32> for EntityId {
    #[inline]
    fn from(index: u32) -> Self {
        Self::new(index)
    }
}

impl From<EntityId> for usize {
    #[inline]
    fn from(id: EntityId) -> Self {
        id.0 as usize
    }
}

/// Owner of every interned endpoint
#[derive(Debug, Default)]
pub struct EntityArena {
    slots: Vec<Option<EntityInfo>>,
    index: HashMap<EntityKey, EntityId>,
    free: Vec<EntityId>,
}

impl EntityArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern an entity, returning the id of the existing copy if any
    pub fn intern(&mut self, entity: &EntityInfo) -> EntityId {
        let key = entity.key();
        if let Some(id) = self.index.get(&key) {
            return *id;
        }

        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id.as_usize()] = Some(entity.clone());
                id
            }
            None => {
                let id = EntityId::new(self.slots.len() as u32);
                self.slots.push(Some(entity.clone()));
                id
            }
        };
        self.index.insert(key, id);
        id
    }

    #[inline]
    pub fn lookup(&self, key: &EntityKey) -> Option<EntityId> {
        self.index.get(key).copied()
    }

    /// Id of an already interned entity equal to `entity`
    #[inline]
    pub fn find(&self, entity: &EntityInfo) -> Option<EntityId> {
        self.lookup(&entity.key())
    }

    #[inline]
    pub fn get(&self, id: EntityId) -> Option<&EntityInfo> {
        self.slots.get(id.as_usize()).and_then(Option::as_ref)
    }

    /// Drop an entity; its id becomes available for reuse
    pub fn remove(&mut self, id: EntityId) -> Option<EntityInfo> {
        let entity = self.slots.get_mut(id.as_usize())?.take()?;
        self.index.remove(&entity.key());
        self.free.push(id);
        Some(entity)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &EntityInfo)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|e| (EntityId::new(i as u32), e)))
    }
}
