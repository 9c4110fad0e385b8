/// Index-stable storage with slot reuse.
///
/// Freed indices are handed out again by later inserts, so an index can
/// outlive the value it was issued for; callers must tolerate finding a
/// different value (or none) behind a stale index.
pub(crate) struct Slab<T> {
    items: Vec<Option<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Slab<T> {
    /// Creates an empty slab.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Stores an item in the first free slot.
    ///
    /// Reuses the most recently freed index before growing the storage.
    ///
    /// # Arguments
    /// * `item` - The value to store
    ///
    /// # Returns
    /// The index under which the item can be found again
    pub(crate) fn insert(&mut self, item: T) -> usize {
        self.len += 1;

        match self.free.pop() {
            Some(index) => {
                self.items[index] = Some(item);
                index
            }
            None => {
                self.items.push(Some(item));
                self.items.len() - 1
            }
        }
    }

    /// Borrows the item stored at `index`.
    ///
    /// # Arguments
    /// * `index` - An index returned by [`Slab::insert`]
    ///
    /// # Returns
    /// Some(item) if the slot is occupied, None if it is free or out of range
    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index).and_then(Option::as_mut)
    }

    /// Removes the item at `index` and frees its slot for reuse.
    ///
    /// # Arguments
    /// * `index` - An index returned by [`Slab::insert`]
    ///
    /// # Returns
    /// Some(item) if the slot was occupied, None otherwise
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        let item = self.items.get_mut(index).and_then(Option::take)?;

        self.free.push(index);
        self.len -= 1;

        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_freed_slots() {
        let mut slab = Slab::new();

        let a = slab.insert("a");
        let b = slab.insert("b");
        assert_eq!(slab.len(), 2);

        assert_eq!(slab.remove(a), Some("a"));
        assert_eq!(slab.remove(a), None);

        let c = slab.insert("c");
        assert_eq!(c, a);
        assert_eq!(slab.get_mut(b), Some(&mut "b"));
        assert_eq!(slab.len(), 2);
    }
}
