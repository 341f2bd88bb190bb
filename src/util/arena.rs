//! Generational arena for fiber records.
//!
//! Fibers are addressed by [`ArenaIndex`] rather than by pointer. Parents hold
//! their children's indices and children hold only their parent's index, so the
//! parent/child graph never forms an ownership cycle. Each slot carries a
//! generation counter: once a fiber's record is removed, any index still naming
//! it stops resolving even after the slot is reused.

use core::fmt;
use core::hash::{Hash, Hasher};

/// An index into an [`Arena`], tagged with the slot generation it was issued for.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Builds an index from raw parts (tests and reserved ids).
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot position.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at issue time.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.index, self.generation)
    }
}

impl Hash for ArenaIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64((u64::from(self.index) << 32) | u64::from(self.generation));
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

/// Slot storage with a free list and per-slot generations.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when no entry is live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a value and returns its index.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.insert_with(|_| value)
    }

    /// Inserts the value built by `f`, which receives the index the value will
    /// live at. Records that embed their own id are built this way.
    pub fn insert_with<F>(&mut self, f: F) -> ArenaIndex
    where
        F: FnOnce(ArenaIndex) -> T,
    {
        if let Some(free) = self.free_head {
            if let Some(slot) = self.slots.get_mut(free as usize) {
                if let Slot::Vacant {
                    next_free,
                    generation,
                } = *slot
                {
                    let idx = ArenaIndex::new(free, generation);
                    self.free_head = next_free;
                    *slot = Slot::Occupied {
                        value: f(idx),
                        generation,
                    };
                    self.len += 1;
                    return idx;
                }
            }
        }

        let index = u32::try_from(self.slots.len()).expect("arena index space exhausted");
        let idx = ArenaIndex::new(index, 0);
        self.slots.push(Slot::Occupied {
            value: f(idx),
            generation: 0,
        });
        self.len += 1;
        idx
    }

    /// Removes and returns the entry at `index`.
    ///
    /// Returns `None` for stale or vacant indices.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(index.index as usize)?;
        let generation = match slot {
            Slot::Occupied { generation, .. } if *generation == index.generation => *generation,
            _ => return None,
        };
        let old = core::mem::replace(
            slot,
            Slot::Vacant {
                next_free: self.free_head,
                generation: generation.wrapping_add(1),
            },
        );
        self.free_head = Some(index.index);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    /// Returns the entry at `index` if it is still live.
    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        match self.slots.get(index.index as usize)? {
            Slot::Occupied { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        match self.slots.get_mut(index.index as usize)? {
            Slot::Occupied { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// True if `index` names a live entry.
    #[must_use]
    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    /// Iterates live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied { value, generation } => {
                Some((ArenaIndex::new(i as u32, *generation), value))
            }
            Slot::Vacant { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn stale_index_does_not_alias_reused_slot() {
        let mut arena = Arena::new();
        let first = arena.insert(1);
        arena.remove(first);
        let second = arena.insert(2);

        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.get(second), Some(&2));
    }

    #[test]
    fn insert_with_sees_final_index() {
        let mut arena = Arena::new();
        let _ = arena.insert(ArenaIndex::new(0, 0));
        let idx = arena.insert_with(|idx| idx);
        assert_eq!(arena.get(idx), Some(&idx));
    }

    #[test]
    fn iter_skips_vacant_slots() {
        let mut arena = Arena::new();
        let a = arena.insert(10);
        let _ = arena.insert(20);
        arena.remove(a);
        let values: Vec<_> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![20]);
    }
}
