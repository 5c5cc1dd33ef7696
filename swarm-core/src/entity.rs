//! Generational handles and the slot arena that stores particles and followers.
//!
//! A handle is an index plus the generation of the slot at the time it was
//! issued. Removing a value bumps the slot's generation, so handles held by
//! springs, groups or callers go stale instead of silently aliasing whatever
//! reuses the slot.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

/// Key types usable with [`Arena`].
pub trait ArenaKey: Copy + Eq + fmt::Debug {
    fn from_parts(index: u32, generation: u32) -> Self;
    fn index(&self) -> u32;
    fn generation(&self) -> u32;
}

macro_rules! arena_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl $name {
            pub fn index(&self) -> u32 {
                self.index
            }

            pub fn generation(&self) -> u32 {
                self.generation
            }
        }

        impl ArenaKey for $name {
            fn from_parts(index: u32, generation: u32) -> Self {
                $name { index, generation }
            }

            fn index(&self) -> u32 {
                self.index
            }

            fn generation(&self) -> u32 {
                self.generation
            }
        }
    };
}

arena_key!(
    /// Identifies a particle admitted to a [`crate::PhysicsWorld`].
    ParticleHandle
);
arena_key!(
    /// Identifies a follower slot: a vector that mirrors a particle's position.
    FollowerId
);

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with generation checks and index recycling.
pub struct Arena<K: ArenaKey, T> {
    slots: Vec<Slot<T>>,
    recycled: VecDeque<u32>, // Queue of slot indices that can be reused
    len: usize,
    _key: PhantomData<K>,
}

impl<K: ArenaKey, T> Arena<K, T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            recycled: VecDeque::new(),
            len: 0,
            _key: PhantomData,
        }
    }

    /// Stores `value`, reusing a freed slot when one is available.
    pub fn insert(&mut self, value: T) -> K {
        self.len += 1;
        if let Some(index) = self.recycled.pop_front() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            K::from_parts(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            K::from_parts(index, 0)
        }
    }

    /// Removes the value behind `key`. Stale or unknown keys return `None`.
    pub fn remove(&mut self, key: K) -> Option<T> {
        let slot = self.slots.get_mut(key.index() as usize)?;
        if slot.generation != key.generation() {
            return None;
        }
        let value = slot.value.take()?;
        // Increment the generation to invalidate old handles
        slot.generation = slot.generation.wrapping_add(1);
        self.recycled.push_back(key.index());
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, key: K) -> Option<&T> {
        self.slots
            .get(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.slots
            .get_mut(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    /// Mutable access to two distinct live values at once.
    ///
    /// Returns `None` if either key is stale or both keys name the same slot.
    pub fn get_pair_mut(&mut self, a: K, b: K) -> Option<(&mut T, &mut T)> {
        let (ia, ib) = (a.index() as usize, b.index() as usize);
        if ia == ib || ia >= self.slots.len() || ib >= self.slots.len() {
            return None;
        }
        let (first, second) = if ia < ib {
            let (left, right) = self.slots.split_at_mut(ib);
            (&mut left[ia], &mut right[0])
        } else {
            let (left, right) = self.slots.split_at_mut(ia);
            (&mut right[0], &mut left[ib])
        };
        if first.generation != a.generation() || second.generation != b.generation() {
            return None;
        }
        match (first.value.as_mut(), second.value.as_mut()) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        }
    }

    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots ever allocated, live or free. Slot indices of live
    /// keys are always below this value.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Removes every value, invalidating all outstanding keys.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.recycled.push_back(index as u32);
            }
        }
        self.len = 0;
    }

    /// Iterates over live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (K::from_parts(index as u32, slot.generation), value))
        })
    }

    /// Mutable iterator over live values in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|value| (K::from_parts(index as u32, generation), value))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.iter().map(|(key, _)| key)
    }
}

impl<K: ArenaKey, T> Default for Arena<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ArenaKey, T: fmt::Debug> fmt::Debug for Arena<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
