//! Generation-checked arena.
//!
//! Slots are recycled through a free list. Each slot carries a generation
//! counter bumped on removal, so a [`SlabKey`] held after its value was
//! removed never resolves to a newer occupant of the same slot.

use std::fmt;

/// Stable handle to a value stored in a [`Slab`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct SlabKey {
    index: u32,
    generation: u32,
}

impl SlabKey {
    pub(crate) fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Debug for SlabKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct Slab<T> {
    items: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slab<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn insert(&mut self, item: T) -> SlabKey {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.items.push(Slot {
                    generation: 0,
                    value: None,
                });
                self.items.len() - 1
            }
        };

        let slot = &mut self.items[index];
        slot.value = Some(item);
        self.len += 1;

        SlabKey {
            index: index as u32,
            generation: slot.generation,
        }
    }

    pub(crate) fn remove(&mut self, key: SlabKey) -> Option<T> {
        let slot = self.items.get_mut(key.index())?;
        if slot.generation != key.generation {
            return None;
        }

        let item = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index());
        self.len -= 1;

        Some(item)
    }

    pub(crate) fn get(&self, key: SlabKey) -> Option<&T> {
        self.items
            .get(key.index())
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, key: SlabKey) -> Option<&mut T> {
        self.items
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Iterates over occupied slots in index order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SlabKey, &T)> {
        self.items.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    SlabKey {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}
