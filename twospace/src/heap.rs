//! Two-space heap with raw and handle-based allocation.
//!
//! A [`Heap`] owns two equally sized arenas. Allocations are served from the
//! active one; the collector evacuates every object reachable through a
//! [`Handle`] into the other arena and swaps the two.
//!
//! Raw allocations hand out an [`Address`]. Addresses are not relocatable:
//! they die with the arena at the next collection, and the heap rejects them
//! afterwards with [`HeapError::StaleAddress`].

use std::fmt;

use crate::{
    Arena, FitStrategy, Handle, HandleTable, HeapError, Result,
    block::{ALIGNMENT, BlockHeader, BlockState, HEADER_SIZE},
};

// ── Settings ──────────────────────────────────────────────────────────

/// Configuration for a [`Heap`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeapSettings {
    /// Size of each of the two arenas in bytes.
    pub arena_size: usize,
    /// Placement policy used for every allocation, including evacuation.
    pub strategy: FitStrategy,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            arena_size: 1024,
            strategy: FitStrategy::FirstFit,
        }
    }
}

impl HeapSettings {
    pub fn validate(&self) -> Result<()> {
        // one granule plus its own header and the remainder header behind it
        if self.arena_size < 2 * HEADER_SIZE + ALIGNMENT {
            return Err(HeapError::InvalidConfiguration(
                "arena_size must hold one granule and two headers",
            ));
        }
        if self.arena_size % ALIGNMENT != 0 {
            return Err(HeapError::InvalidConfiguration("arena_size must be a multiple of 8"));
        }
        if self.arena_size >= u32::MAX as usize {
            return Err(HeapError::InvalidConfiguration("arena_size must fit in 32 bits"));
        }
        Ok(())
    }

    /// One handle per granule: the most blocks an arena could ever hold.
    #[inline]
    pub fn handle_capacity(&self) -> usize {
        self.arena_size / ALIGNMENT
    }
}

// ── Addresses ─────────────────────────────────────────────────────────

/// Payload location of a block, valid until the next collection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    offset: usize,
    epoch: u64,
}

impl Address {
    /// Payload offset from the start of the arena.
    #[inline]
    pub fn offset(self) -> usize {
        self.offset
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.offset)
    }
}

/// Read-only description of one block, as produced by the heap walks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the header.
    pub offset: usize,
    pub state: BlockState,
    /// Payload bytes.
    pub size: usize,
    /// Owning handle, if the block was allocated through the managed path.
    pub handle: Option<Handle>,
}

impl BlockInfo {
    fn new(offset: usize, header: BlockHeader, handles: &HandleTable) -> Self {
        // the header field is only meaningful while the slot still agrees
        let handle = header
            .handle
            .filter(|_| header.state == BlockState::Used)
            .map(Handle::from_raw)
            .filter(|handle| handles.get(*handle).ok().flatten() == Some(offset + HEADER_SIZE));
        Self {
            offset,
            state: header.state,
            size: header.size,
            handle,
        }
    }

    /// Offset of the first payload byte.
    #[inline]
    pub fn payload_offset(&self) -> usize {
        self.offset + HEADER_SIZE
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }
}

/// Occupancy summary of the active arena.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct HeapStats {
    pub arena_size: usize,
    pub used_blocks: usize,
    pub free_blocks: usize,
    /// Payload bytes in used blocks.
    pub used_bytes: usize,
    /// Payload bytes in free blocks.
    pub free_bytes: usize,
    pub largest_free: usize,
    pub live_handles: usize,
    pub issued_handles: usize,
    pub collections: usize,
}

// ── Heap ──────────────────────────────────────────────────────────────

/// Allocator, handle table and collector state for one pair of arenas.
///
/// The heap is single-threaded. Wrap it in a
/// [`SharedHeap`](crate::SharedHeap) to hand it to several threads.
#[derive(Debug)]
pub struct Heap {
    pub(crate) settings: HeapSettings,
    pub(crate) spaces: [Arena; 2],
    pub(crate) active: usize,
    pub(crate) handles: HandleTable,
    pub(crate) epoch: u64,
    pub(crate) collections: usize,
}

impl Heap {
    pub fn new(settings: HeapSettings) -> Result<Self> {
        settings.validate()?;
        log::debug!(
            "heap: 2 x {} bytes, {}, {} handles",
            settings.arena_size,
            settings.strategy,
            settings.handle_capacity()
        );
        Ok(Self {
            settings,
            spaces: [Arena::new(settings.arena_size), Arena::new(settings.arena_size)],
            active: 0,
            handles: HandleTable::new(settings.handle_capacity()),
            epoch: 0,
            collections: 0,
        })
    }

    /// Wipes both arenas and switches to `strategy`. Every outstanding
    /// address and handle becomes invalid.
    pub fn init(&mut self, strategy: FitStrategy) {
        self.settings.strategy = strategy;
        self.spaces.iter_mut().for_each(Arena::reset);
        self.active = 0;
        self.handles.reset();
        self.epoch += 1;
        self.collections = 0;
        log::debug!("heap reinitialized with {strategy}");
    }

    /// Same as [`Heap::init`]; the managed surface's entry point.
    pub fn managed_init(&mut self, strategy: FitStrategy) {
        self.init(strategy);
    }

    #[inline]
    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    #[inline]
    pub fn strategy(&self) -> FitStrategy {
        self.settings.strategy
    }

    /// Index (0 or 1) of the arena currently serving allocations.
    #[inline]
    pub fn active_index(&self) -> usize {
        self.active
    }

    #[inline]
    pub fn collections(&self) -> usize {
        self.collections
    }

    #[inline]
    pub fn handle_capacity(&self) -> usize {
        self.handles.capacity()
    }

    #[inline]
    pub(crate) fn active_arena(&self) -> &Arena {
        &self.spaces[self.active]
    }

    #[inline]
    pub(crate) fn active_arena_mut(&mut self) -> &mut Arena {
        &mut self.spaces[self.active]
    }

    #[inline]
    fn address(&self, offset: usize) -> Address {
        Address {
            offset,
            epoch: self.epoch,
        }
    }

    /// Finds the used block behind `address` in the active arena.
    fn resolve(&self, address: Address) -> Result<(usize, BlockHeader)> {
        if address.epoch != self.epoch {
            return Err(HeapError::StaleAddress(address.offset));
        }
        let (block, header) = self
            .active_arena()
            .block_for_payload(address.offset)
            .ok_or(HeapError::InvalidAddress(address.offset))?;
        if header.is_free() {
            return Err(HeapError::DoubleFree(address.offset));
        }
        Ok((block, header))
    }

    // ── Raw surface ───────────────────────────────────────────────────

    /// Allocates at least `size` bytes. The result is not tracked by the
    /// collector and is invalidated by the next [`Heap::collect`].
    pub fn allocate(&mut self, size: usize) -> Result<Address> {
        let strategy = self.settings.strategy;
        match self.active_arena_mut().allocate(strategy, size) {
            Some(block) => {
                let address = self.address(block + HEADER_SIZE);
                log::trace!("allocate({size}) -> {address}");
                Ok(address)
            }
            None => {
                log::warn!("out of memory allocating {size} bytes");
                Err(HeapError::OutOfMemory { requested: size })
            }
        }
    }

    /// Returns a raw allocation to the free list.
    pub fn free(&mut self, address: Address) -> Result<()> {
        let (block, header) = self.resolve(address)?;
        if let Some(raw) = header.handle {
            let handle = Handle::from_raw(raw);
            if self.handles.get(handle).ok().flatten() == Some(address.offset) {
                return Err(HeapError::ManagedAddress(address.offset));
            }
        }
        self.active_arena_mut().release(block);
        log::trace!("free({address})");
        Ok(())
    }

    // ── Managed surface ───────────────────────────────────────────────

    /// Allocates at least `size` bytes behind a relocatable handle.
    ///
    /// Fails without allocating when the handle table is exhausted, even if
    /// the arena still has room.
    pub fn managed_allocate(&mut self, size: usize) -> Result<Handle> {
        if self.handles.is_full() {
            log::warn!("handle table exhausted");
            return Err(HeapError::HandleTableFull {
                capacity: self.handles.capacity(),
            });
        }
        let address = self.allocate(size)?;
        let handle = self.handles.issue(address.offset)?;
        let block = address.offset - HEADER_SIZE;
        self.active_arena_mut().set_handle(block, Some(handle.raw()));
        log::trace!("managed_allocate({size}) -> {handle} at {address}");
        Ok(handle)
    }

    /// Frees the object behind `handle` and clears its slot. Releasing an
    /// already released handle does nothing.
    pub fn managed_free(&mut self, handle: Handle) -> Result<()> {
        let Some(offset) = self.handles.get(handle)? else {
            return Ok(());
        };
        let (block, _) = self.resolve(self.address(offset))?;
        self.active_arena_mut().release(block);
        self.handles.clear(handle);
        log::trace!("managed_free({handle})");
        Ok(())
    }

    /// Current location of the object behind `handle`. Call again after any
    /// collection; the previous result is stale by then.
    pub fn deref(&self, handle: Handle) -> Result<Address> {
        self.handles
            .get(handle)?
            .map(|offset| self.address(offset))
            .ok_or(HeapError::InvalidHandle(handle.index()))
    }

    // ── Payload access ────────────────────────────────────────────────

    pub fn bytes(&self, address: Address) -> Result<&[u8]> {
        let (block, header) = self.resolve(address)?;
        Ok(self.active_arena().payload(block, header.size))
    }

    pub fn bytes_mut(&mut self, address: Address) -> Result<&mut [u8]> {
        let (block, header) = self.resolve(address)?;
        Ok(self.active_arena_mut().payload_mut(block, header.size))
    }

    /// Copies `data` to the start of the payload at `address`.
    pub fn write(&mut self, address: Address, data: &[u8]) -> Result<()> {
        let payload = self.bytes_mut(address)?;
        if data.len() > payload.len() {
            return Err(HeapError::OutOfBounds {
                len: data.len(),
                size: payload.len(),
            });
        }
        payload[..data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn handle_bytes(&self, handle: Handle) -> Result<&[u8]> {
        let address = self.deref(handle)?;
        self.bytes(address)
    }

    pub fn handle_bytes_mut(&mut self, handle: Handle) -> Result<&mut [u8]> {
        let address = self.deref(handle)?;
        self.bytes_mut(address)
    }

    pub fn write_handle(&mut self, handle: Handle, data: &[u8]) -> Result<()> {
        let address = self.deref(handle)?;
        self.write(address, data)
    }

    // ── Walks ─────────────────────────────────────────────────────────

    /// Every block of the active arena in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.active_arena()
            .blocks()
            .map(|(offset, header)| BlockInfo::new(offset, header, &self.handles))
    }

    /// Free blocks of the active arena in free-list order.
    pub fn free_list(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.active_arena()
            .free_blocks()
            .map(|(offset, header)| BlockInfo::new(offset, header, &self.handles))
    }

    /// Every issued handle slot in index order.
    pub fn handle_slots(&self) -> impl Iterator<Item = (Handle, Option<Address>)> + '_ {
        self.handles
            .slots()
            .map(|(handle, slot)| (handle, slot.map(|o| self.address(o))))
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            arena_size: self.settings.arena_size,
            live_handles: self.handles.live().count(),
            issued_handles: self.handles.issued(),
            collections: self.collections,
            ..HeapStats::default()
        };
        for (_, header) in self.active_arena().blocks() {
            if header.is_free() {
                stats.free_blocks += 1;
                stats.free_bytes += header.size;
                stats.largest_free = stats.largest_free.max(header.size);
            } else {
                stats.used_blocks += 1;
                stats.used_bytes += header.size;
            }
        }
        stats
    }

    /// Verifies the block layout, the free list and the handle table against
    /// each other. Returns a description of the first violation found.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let arena = self.active_arena();

        let mut end = 0;
        let mut free_in_layout = Vec::new();
        for (offset, header) in arena.blocks() {
            if offset != end {
                return Err(format!("gap or overlap at {offset:#06x}"));
            }
            if header.size % ALIGNMENT != 0 {
                return Err(format!("unaligned size at {offset:#06x}"));
            }
            if header.is_free() {
                free_in_layout.push(offset);
            } else if header.next.is_some() {
                return Err(format!("used block {offset:#06x} is linked"));
            }
            end = offset + header.span();
        }
        if end != arena.size() {
            return Err(format!(
                "blocks end at {end:#06x}, arena ends at {:#06x}",
                arena.size()
            ));
        }

        let mut listed = Vec::new();
        for (offset, header) in arena.free_blocks() {
            if !header.is_free() {
                return Err(format!("used block {offset:#06x} in free list"));
            }
            if listed.last().is_some_and(|&last| last >= offset) {
                return Err(format!("free list out of order at {offset:#06x}"));
            }
            if listed.len() > free_in_layout.len() {
                return Err("free list longer than layout".to_string());
            }
            listed.push(offset);
        }
        if listed != free_in_layout {
            return Err("free list does not match free blocks".to_string());
        }

        for (handle, offset) in self.handles.live() {
            let Some((_, header)) = arena.block_for_payload(offset) else {
                return Err(format!("{handle} points at no block"));
            };
            if header.is_free() {
                return Err(format!("{handle} points at a free block"));
            }
            if header.handle != Some(handle.raw()) {
                return Err(format!("{handle} back-reference mismatch"));
            }
        }

        let idle = &self.spaces[1 - self.active];
        if idle.blocks().count() != 1 || idle.free_head() != Some(0) {
            return Err("inactive arena is not empty".to_string());
        }
        Ok(())
    }
}
