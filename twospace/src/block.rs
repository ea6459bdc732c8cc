use bytemuck::{Pod, Zeroable};

/// Allocation granularity. Every payload size and every block offset is a
/// multiple of this.
pub const ALIGNMENT: usize = 8;

/// Bytes occupied by a header in front of every block.
pub const HEADER_SIZE: usize = std::mem::size_of::<RawHeader>();

const STATE_USED: u32 = 0;
const STATE_FREE: u32 = 1;
const NO_LINK: u32 = u32::MAX;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BlockState {
    Used,
    Free,
}

/// On-arena encoding of a header. Kept private, everything outside this
/// module goes through [`BlockHeader`].
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct RawHeader {
    state: u32,
    size: u32,
    handle: u32,
    next: u32,
}

/// Decoded view of the metadata in front of a block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub state: BlockState,
    /// payload bytes, header excluded
    pub size: usize,
    /// back-reference into the handle table, only set for managed blocks
    pub handle: Option<u32>,
    /// next free block by offset, `None` for used blocks and the list tail
    pub next: Option<usize>,
}

impl BlockHeader {
    pub fn free(size: usize, next: Option<usize>) -> Self {
        Self {
            state: BlockState::Free,
            size,
            handle: None,
            next,
        }
    }

    pub fn used(size: usize) -> Self {
        Self {
            state: BlockState::Used,
            size,
            handle: None,
            next: None,
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }

    /// Bytes this block spans in the arena, header included.
    #[inline]
    pub fn span(&self) -> usize {
        HEADER_SIZE + self.size
    }

    /// Reads the header stored at `offset`.
    ///
    /// Panics if the header would extend past the end of `bytes`; callers
    /// only pass offsets that came out of the block chain.
    pub fn read(bytes: &[u8], offset: usize) -> Self {
        let raw: RawHeader = bytemuck::pod_read_unaligned(&bytes[offset..offset + HEADER_SIZE]);
        Self {
            state: if raw.state == STATE_FREE {
                BlockState::Free
            } else {
                BlockState::Used
            },
            size: raw.size as usize,
            handle: (raw.handle != NO_LINK).then_some(raw.handle),
            next: (raw.next != NO_LINK).then_some(raw.next as usize),
        }
    }

    pub fn write(&self, bytes: &mut [u8], offset: usize) {
        let raw = RawHeader {
            state: match self.state {
                BlockState::Used => STATE_USED,
                BlockState::Free => STATE_FREE,
            },
            size: self.size as u32,
            handle: self.handle.unwrap_or(NO_LINK),
            next: self.next.map_or(NO_LINK, |next| next as u32),
        };
        bytes[offset..offset + HEADER_SIZE]
            .copy_from_slice(bytemuck::bytes_of(&raw));
    }
}

/// Rounds `size` up to the allocation granularity. Zero-byte requests are
/// served with one granule. Returns `None` on overflow.
#[inline]
pub fn round_up(size: usize) -> Option<usize> {
    let size = size.max(1);
    size.checked_add(ALIGNMENT - 1)
        .map(|padded| padded & !(ALIGNMENT - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_two_words() {
        assert_eq!(HEADER_SIZE, 16);
    }

    #[test]
    fn round_up_to_granule() {
        assert_eq!(round_up(0), Some(8));
        assert_eq!(round_up(1), Some(8));
        assert_eq!(round_up(8), Some(8));
        assert_eq!(round_up(100), Some(104));
        assert_eq!(round_up(usize::MAX), None);
    }

    #[test]
    fn header_write_then_read() {
        let mut bytes = vec![0u8; 64];
        let mut header = BlockHeader::used(40);
        header.handle = Some(3);
        header.write(&mut bytes, 16);

        let free = BlockHeader::free(8, Some(16));
        free.write(&mut bytes, 0);

        assert_eq!(BlockHeader::read(&bytes, 16), header);
        assert_eq!(BlockHeader::read(&bytes, 0), free);
        assert!(BlockHeader::read(&bytes, 0).is_free());
        assert_eq!(header.span(), 56);
    }

    #[test]
    fn zeroed_memory_reads_as_empty_used_block() {
        let bytes = [0u8; HEADER_SIZE];
        let header = BlockHeader::read(&bytes, 0);
        assert_eq!(header.state, BlockState::Used);
        assert_eq!(header.size, 0);
        assert_eq!(header.handle, Some(0));
    }
}
