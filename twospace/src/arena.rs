use crate::block::{ALIGNMENT, BlockHeader, HEADER_SIZE};

/// One of the two equally sized byte spaces backing a heap.
///
/// The bytes are tiled by blocks: walking headers from offset 0 and advancing
/// by `HEADER_SIZE + size` lands exactly on the arena end. Free blocks are
/// additionally threaded through an offset-ascending singly linked list
/// starting at `free_head`.
#[derive(Debug)]
pub struct Arena {
    bytes: Box<[u8]>,
    free_head: Option<usize>,
}

impl Arena {
    pub fn new(size: usize) -> Self {
        debug_assert!(size % ALIGNMENT == 0);
        debug_assert!(size >= HEADER_SIZE + ALIGNMENT);
        let mut arena = Self {
            bytes: vec![0u8; size].into_boxed_slice(),
            free_head: None,
        };
        arena.reset();
        arena
    }

    /// Zeroes the arena and turns it into a single free block.
    pub fn reset(&mut self) {
        self.bytes.fill(0);
        let whole = BlockHeader::free(self.bytes.len() - HEADER_SIZE, None);
        whole.write(&mut self.bytes, 0);
        self.free_head = Some(0);
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn free_head(&self) -> Option<usize> {
        self.free_head
    }

    #[inline]
    pub fn header(&self, offset: usize) -> BlockHeader {
        BlockHeader::read(&self.bytes, offset)
    }

    #[inline]
    pub(crate) fn set_header(&mut self, offset: usize, header: BlockHeader) {
        header.write(&mut self.bytes, offset);
    }

    /// Updates only the `next` link of the block at `offset`.
    pub(crate) fn set_next(&mut self, offset: usize, next: Option<usize>) {
        let mut header = self.header(offset);
        header.next = next;
        self.set_header(offset, header);
    }

    /// Updates only the handle back-reference of the block at `offset`.
    pub(crate) fn set_handle(&mut self, offset: usize, handle: Option<u32>) {
        let mut header = self.header(offset);
        header.handle = handle;
        self.set_header(offset, header);
    }

    pub fn payload(&self, block: usize, len: usize) -> &[u8] {
        let start = block + HEADER_SIZE;
        &self.bytes[start..start + len]
    }

    pub fn payload_mut(&mut self, block: usize, len: usize) -> &mut [u8] {
        let start = block + HEADER_SIZE;
        &mut self.bytes[start..start + len]
    }

    /// Walks every header in address order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            arena: self,
            cursor: 0,
        }
    }

    /// Walks the free list in link order.
    pub fn free_blocks(&self) -> FreeBlocks<'_> {
        FreeBlocks {
            arena: self,
            cursor: self.free_head,
        }
    }

    /// Finds the block whose payload starts at `payload`, if any.
    pub fn block_for_payload(&self, payload: usize) -> Option<(usize, BlockHeader)> {
        let block = payload.checked_sub(HEADER_SIZE)?;
        if block % ALIGNMENT != 0 || block >= self.size() {
            return None;
        }
        self.blocks()
            .take_while(|(offset, _)| *offset <= block)
            .find(|(offset, _)| *offset == block)
    }

    /// Carves `rounded` payload bytes out of the free block at `candidate`,
    /// whose free-list predecessor is `prev`. Returns the used block's offset.
    ///
    /// The rest of the candidate becomes a new free block right after the
    /// payload and takes the candidate's place in the list. Its size may be 0.
    pub(crate) fn split(&mut self, prev: Option<usize>, candidate: usize, rounded: usize) -> usize {
        let old = self.header(candidate);
        debug_assert!(old.is_free());
        debug_assert!(old.size >= rounded + HEADER_SIZE);

        let rest = candidate + HEADER_SIZE + rounded;
        let remainder = old.size - rounded - HEADER_SIZE;
        self.set_header(rest, BlockHeader::free(remainder, old.next));
        match prev {
            Some(prev) => self.set_next(prev, Some(rest)),
            None => self.free_head = Some(rest),
        }
        self.set_header(candidate, BlockHeader::used(rounded));

        log::trace!("split block {candidate:#06x}: used {rounded}, remainder {remainder}");
        candidate
    }

    /// Marks the used block at `block` free and links it into the free list
    /// before the first free block with a higher offset.
    pub(crate) fn insert_free(&mut self, block: usize) {
        let mut prev = None;
        let mut cursor = self.free_head;
        while let Some(current) = cursor {
            if current > block {
                break;
            }
            prev = Some(current);
            cursor = self.header(current).next;
        }

        let size = self.header(block).size;
        self.set_header(block, BlockHeader::free(size, cursor));
        match prev {
            Some(prev) => self.set_next(prev, Some(block)),
            None => self.free_head = Some(block),
        }
    }
}

/// Iterator over `(offset, header)` in address order.
pub struct Blocks<'a> {
    arena: &'a Arena,
    cursor: usize,
}

impl Iterator for Blocks<'_> {
    type Item = (usize, BlockHeader);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor + HEADER_SIZE > self.arena.size() {
            return None;
        }
        let offset = self.cursor;
        let header = self.arena.header(offset);
        self.cursor = offset + header.span();
        Some((offset, header))
    }
}

/// Iterator over `(offset, header)` in free-list order.
pub struct FreeBlocks<'a> {
    arena: &'a Arena,
    cursor: Option<usize>,
}

impl Iterator for FreeBlocks<'_> {
    type Item = (usize, BlockHeader);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.cursor?;
        if offset + HEADER_SIZE > self.arena.size() {
            self.cursor = None;
            return None;
        }
        let header = self.arena.header(offset);
        self.cursor = header.next;
        Some((offset, header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockState;

    #[test]
    fn fresh_arena_is_one_free_block() {
        let arena = Arena::new(256);
        let blocks: Vec<_> = arena.blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].0, 0);
        assert_eq!(blocks[0].1, BlockHeader::free(240, None));
        assert_eq!(arena.free_head(), Some(0));
    }

    #[test]
    fn split_leaves_remainder_in_place_of_candidate() {
        let mut arena = Arena::new(256);
        let block = arena.split(None, 0, 32);
        assert_eq!(block, 0);

        let blocks: Vec<_> = arena.blocks().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].1.state, BlockState::Used);
        assert_eq!(blocks[0].1.size, 32);
        assert_eq!(blocks[1].0, 48);
        assert_eq!(blocks[1].1, BlockHeader::free(192, None));
        assert_eq!(arena.free_head(), Some(48));
    }

    #[test]
    fn split_writes_zero_size_remainder() {
        let mut arena = Arena::new(64);
        // 48 free payload bytes: 32 for the request, 16 for the trailing header
        let block = arena.split(None, 0, 32);
        let blocks: Vec<_> = arena.blocks().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(arena.header(block), BlockHeader::used(32));
        assert_eq!(blocks[1], (48, BlockHeader::free(0, None)));
        assert_eq!(arena.free_head(), Some(48));
    }

    #[test]
    fn insert_free_keeps_ascending_order() {
        let mut arena = Arena::new(256);
        let a = arena.split(None, 0, 16);
        let b = arena.split(None, arena.free_head().unwrap(), 16);
        let c = arena.split(None, arena.free_head().unwrap(), 16);

        arena.insert_free(c);
        arena.insert_free(a);
        arena.insert_free(b);

        let order: Vec<_> = arena.free_blocks().map(|(offset, _)| offset).collect();
        assert_eq!(order, vec![a, b, c, 96]);
    }

    #[test]
    fn block_for_payload_only_matches_block_starts() {
        let mut arena = Arena::new(256);
        let a = arena.split(None, 0, 32);
        assert_eq!(arena.block_for_payload(a + HEADER_SIZE).map(|(o, _)| o), Some(a));
        assert!(arena.block_for_payload(a + HEADER_SIZE + 8).is_none());
        assert!(arena.block_for_payload(3).is_none());
        assert!(arena.block_for_payload(10_000).is_none());
    }

    #[test]
    fn reset_discards_layout() {
        let mut arena = Arena::new(128);
        let block = arena.split(None, 0, 16);
        arena.payload_mut(block, 16).fill(0xAB);
        arena.reset();
        assert_eq!(arena.blocks().count(), 1);
        assert!(arena.payload(0, 16).iter().all(|&b| b == 0));
    }
}
