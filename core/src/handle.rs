//! Generational handles.
//!
//! A [`RawHandle`] names a slot in a [`HandleArena`] together with the
//! generation the slot had when the value was inserted. Removing a value bumps
//! the slot's generation, so a stale handle never aliases whatever reuses the
//! slot later:
//!
//! ```text
//!   insert(a) -> #0v1      remove(#0v1)       insert(b) -> #0v2
//!   ┌──────────────┐       ┌──────────────┐   ┌──────────────┐
//!   │ slot 0  gen 1│  ──►  │ slot 0  gen 2│ ─►│ slot 0  gen 2│
//!   │ Some(a)      │       │ None (free)  │   │ Some(b)      │
//!   └──────────────┘       └──────────────┘   └──────────────┘
//!                          get(#0v1) == None  get(#0v1) == None
//! ```
//!
//! Generation `0` is never handed out, which makes [`RawHandle::NULL`] invalid
//! in every arena.
//!
//! # Example
//!
//! ```
//! use lilium_core::handle::HandleArena;
//!
//! let mut fences = HandleArena::new();
//! let fence = fences.insert("frame 0");
//! assert_eq!(fences.get(fence), Some(&"frame 0"));
//!
//! assert_eq!(fences.remove(fence), Some("frame 0"));
//! assert!(!fences.contains(fence));
//! ```

use std::fmt;

/// An untyped generational handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle {
    index: u32,
    generation: u32,
}

impl RawHandle {
    /// A handle that is never valid.
    pub const NULL: Self = Self {
        index: u32::MAX,
        generation: 0,
    };

    /// Build a handle from its parts.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }

    pub const fn is_null(self) -> bool {
        self.generation == 0
    }

    /// Pack into a single `u64` (generation in the high half).
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl Default for RawHandle {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "#{}v{}", self.index, self.generation)
        }
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage that hands out [`RawHandle`]s.
#[derive(Debug)]
pub struct HandleArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store a value and return its handle.
    pub fn insert(&mut self, value: T) -> RawHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return RawHandle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        RawHandle::new(index, 1)
    }

    /// Remove the value behind `handle`, invalidating the handle.
    ///
    /// Returns `None` for stale, null or foreign handles.
    pub fn remove(&mut self, handle: RawHandle) -> Option<T> {
        let slot = self.slot_mut(handle)?;
        let value = slot.value.take()?;

        slot.generation = slot.generation.wrapping_add(1);
        if slot.generation == 0 {
            slot.generation = 1;
        }
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, handle: RawHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: RawHandle) -> Option<&mut T> {
        self.slot_mut(handle)?.value.as_mut()
    }

    pub fn contains(&self, handle: RawHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (RawHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (RawHandle::new(index as u32, slot.generation), value))
        })
    }

    /// Remove every live value, returning them with their (now stale) handles.
    pub fn drain(&mut self) -> Vec<(RawHandle, T)> {
        let handles: Vec<RawHandle> = self.iter().map(|(handle, _)| handle).collect();
        handles
            .into_iter()
            .filter_map(|handle| self.remove(handle).map(|value| (handle, value)))
            .collect()
    }

    fn slot_mut(&mut self, handle: RawHandle) -> Option<&mut Slot<T>> {
        if handle.is_null() {
            return None;
        }
        let slot = self.slots.get_mut(handle.index as usize)?;
        (slot.generation == handle.generation).then_some(slot)
    }
}
