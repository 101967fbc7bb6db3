//! # Slab
//!
//! Growable slot storage addressed by generational handles.

/// Handle to a value stored in a [`Slab`].
///
/// The generation makes stale handles detectable: once the value is
/// removed, the handle resolves to `None` even if the slot is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlabHandle {
    /// Index into the slot vector.
    index: u32,
    /// Generation of the slot when the handle was issued.
    generation: u32,
}

impl SlabHandle {
    /// Returns the slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational slab allocator.
///
/// Insertion and removal are O(1). Unlike a fixed pool the slab grows on
/// demand, so it never refuses an insert.
///
/// # Thread Safety
///
/// This slab is NOT thread-safe. Each cell owns its own.
///
/// # Example
///
/// ```rust
/// use meridian_core::Slab;
///
/// let mut slab = Slab::new();
/// let handle = slab.insert("node");
/// assert_eq!(slab.get(handle), Some(&"node"));
/// slab.remove(handle);
/// assert!(slab.get(handle).is_none());
/// ```
pub struct Slab<T> {
    /// Slot storage.
    slots: Vec<Slot<T>>,
    /// Indices of vacant slots.
    free_list: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates an empty slab.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Creates an empty slab with room for `capacity` values.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Returns the number of stored values.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is stored.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores a value and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` slots are needed.
    pub fn insert(&mut self, value: T) -> SlabHandle {
        self.len += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return SlabHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = u32::try_from(self.slots.len()).expect("slab exceeded u32::MAX slots");
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        SlabHandle {
            index,
            generation: 0,
        }
    }

    /// Removes a value.
    ///
    /// # Returns
    ///
    /// The removed value, or None if the handle was stale.
    pub fn remove(&mut self, handle: SlabHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        self.len -= 1;

        Some(value)
    }

    /// Returns true if the handle refers to a live value.
    #[inline]
    #[must_use]
    pub fn contains(&self, handle: SlabHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Gets a reference to a stored value.
    #[inline]
    #[must_use]
    pub fn get(&self, handle: SlabHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Gets a mutable reference to a stored value.
    #[inline]
    pub fn get_mut(&mut self, handle: SlabHandle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Removes every value. Outstanding handles all become stale.
    pub fn clear(&mut self) {
        self.free_list.clear();
        for (index, slot) in self.slots.iter_mut().enumerate().rev() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            #[allow(clippy::cast_possible_truncation)]
            self.free_list.push(index as u32);
        }
        self.len = 0;
    }

    /// Iterates over all stored values.
    pub fn iter(&self) -> impl Iterator<Item = (SlabHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            #[allow(clippy::cast_possible_truncation)]
            let handle = SlabHandle {
                index: index as u32,
                generation: slot.generation,
            };
            slot.value.as_ref().map(|v| (handle, v))
        })
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::ops::Index<SlabHandle> for Slab<T> {
    type Output = T;

    fn index(&self, handle: SlabHandle) -> &T {
        self.get(handle).expect("stale slab handle")
    }
}

impl<T> std::ops::IndexMut<SlabHandle> for Slab<T> {
    fn index_mut(&mut self, handle: SlabHandle) -> &mut T {
        self.get_mut(handle).expect("stale slab handle")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slab_insert_remove() {
        let mut slab: Slab<u32> = Slab::new();

        let h1 = slab.insert(42);
        assert_eq!(*slab.get(h1).unwrap(), 42);
        assert_eq!(slab.len(), 1);

        let removed = slab.remove(h1).unwrap();
        assert_eq!(removed, 42);
        assert!(slab.is_empty());
        assert!(slab.remove(h1).is_none());
    }

    #[test]
    fn test_slab_reuse_bumps_generation() {
        let mut slab: Slab<u32> = Slab::with_capacity(1);

        let h1 = slab.insert(1);
        slab.remove(h1);

        let h2 = slab.insert(2);
        assert_eq!(h1.index(), h2.index());
        assert_ne!(h1.generation(), h2.generation());
        assert!(slab.get(h1).is_none());
        assert_eq!(slab[h2], 2);
    }

    #[test]
    fn test_slab_clear_invalidates_handles() {
        let mut slab: Slab<&str> = Slab::new();
        let a = slab.insert("a");
        let b = slab.insert("b");
        slab.clear();

        assert!(!slab.contains(a));
        assert!(!slab.contains(b));
        let c = slab.insert("c");
        assert_eq!(slab.iter().count(), 1);
        assert_eq!(slab[c], "c");
    }
}
