//! Evacuating two-space collection.
//!
//! The roots are the occupied handle slots. Each root is copied, in slot
//! order, into the idle arena through the regular allocator; slots are
//! rewritten only after every root has a new home. The old arena is then
//! reset and the roles swap. Raw allocations are never roots and die with
//! the old arena.

use crate::{Arena, Handle, Heap, HeapError, Result, block::HEADER_SIZE};

/// Outcome of one collection.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    /// Objects copied into the new arena.
    pub survivors: usize,
    /// Payload bytes copied.
    pub bytes_copied: usize,
    /// Payload bytes of used blocks left behind in the old arena.
    pub bytes_reclaimed: usize,
}

impl Heap {
    /// Evacuates every handle-reachable object into the idle arena and makes
    /// it the active one.
    ///
    /// Addresses obtained before the call are stale afterwards, including
    /// ones returned by [`Heap::deref`]. If the survivors do not fit, the heap
    /// is left exactly as it was and `OutOfMemory` is returned.
    pub fn collect(&mut self) -> Result<CollectionStats> {
        let strategy = self.settings.strategy;
        let (from, to) = split_spaces(&mut self.spaces, self.active);
        to.reset();

        let mut stats = CollectionStats::default();
        let mut moved: Vec<(Handle, usize)> = Vec::new();

        for (handle, offset) in self.handles.live() {
            let block = offset - HEADER_SIZE;
            let size = from.header(block).size;
            let Some(new_block) = to.allocate(strategy, size) else {
                to.reset();
                log::warn!("collection aborted: {handle} ({size} bytes) does not fit");
                return Err(HeapError::OutOfMemory { requested: size });
            };
            to.payload_mut(new_block, size)
                .copy_from_slice(from.payload(block, size));
            to.set_handle(new_block, Some(handle.raw()));

            moved.push((handle, new_block + HEADER_SIZE));
            stats.survivors += 1;
            stats.bytes_copied += size;
        }

        let used_before: usize = from
            .blocks()
            .filter(|(_, header)| !header.is_free())
            .map(|(_, header)| header.size)
            .sum();
        stats.bytes_reclaimed = used_before - stats.bytes_copied;

        for (handle, offset) in moved {
            self.handles.set(handle, offset);
        }
        from.reset();
        self.active = 1 - self.active;
        self.epoch += 1;
        self.collections += 1;

        log::debug!(
            "collection {}: {} survivors, {} bytes copied, {} bytes reclaimed",
            self.collections,
            stats.survivors,
            stats.bytes_copied,
            stats.bytes_reclaimed
        );
        Ok(stats)
    }
}

/// Borrows the (active, idle) arenas at once.
fn split_spaces(spaces: &mut [Arena; 2], active: usize) -> (&mut Arena, &mut Arena) {
    let [first, second] = spaces;
    if active == 0 {
        (first, second)
    } else {
        (second, first)
    }
}
