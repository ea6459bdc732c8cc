use std::fmt;

use crate::{HeapError, Result};

/// Stable reference to a managed object.
///
/// A handle names a slot in the [`HandleTable`]; the slot holds the object's
/// current location, which changes whenever the collector moves the object.
/// Resolve it again after every collection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub(crate) fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fixed-capacity mapping from handle index to block offset.
///
/// Indices are issued in ascending order and never reissued, so a cleared slot
/// stays dead until the table is reset.
#[derive(Debug)]
pub struct HandleTable {
    slots: Box<[Option<usize>]>,
    issued: usize,
}

impl HandleTable {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity <= u32::MAX as usize);
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            issued: 0,
        }
    }

    pub fn reset(&mut self) {
        self.slots.fill(None);
        self.issued = 0;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of handles issued so far, live or cleared.
    #[inline]
    pub fn issued(&self) -> usize {
        self.issued
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.issued == self.capacity()
    }

    /// Records `offset` in the next unused slot.
    pub fn issue(&mut self, offset: usize) -> Result<Handle> {
        if self.is_full() {
            return Err(HeapError::HandleTableFull {
                capacity: self.capacity(),
            });
        }
        let handle = Handle(self.issued as u32);
        self.slots[self.issued] = Some(offset);
        self.issued += 1;
        Ok(handle)
    }

    /// Current slot content. Errors for handles this table never issued.
    pub fn get(&self, handle: Handle) -> Result<Option<usize>> {
        if handle.index() >= self.issued {
            return Err(HeapError::InvalidHandle(handle.index()));
        }
        Ok(self.slots[handle.index()])
    }

    pub(crate) fn set(&mut self, handle: Handle, offset: usize) {
        debug_assert!(handle.index() < self.issued);
        self.slots[handle.index()] = Some(offset);
    }

    pub(crate) fn clear(&mut self, handle: Handle) -> Option<usize> {
        self.slots[handle.index()].take()
    }

    /// All issued slots in index order.
    pub fn slots(&self) -> impl Iterator<Item = (Handle, Option<usize>)> + '_ {
        self.slots[..self.issued]
            .iter()
            .enumerate()
            .map(|(idx, slot)| (Handle(idx as u32), *slot))
    }

    /// Occupied slots in index order; these are the collector's roots.
    pub fn live(&self) -> impl Iterator<Item = (Handle, usize)> + '_ {
        self.slots()
            .filter_map(|(handle, slot)| slot.map(|offset| (handle, offset)))
    }
}
