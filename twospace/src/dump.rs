use std::fmt;

use crate::{
    Heap,
    block::{ALIGNMENT, HEADER_SIZE},
};

/// Human readable snapshot of a heap, rendered through [`fmt::Display`].
///
/// The occupancy map prints one character per 8-byte granule. Successive
/// free blocks get `a`, `b`, `c`, ... and successive used blocks `A`, `B`,
/// `C`, ..., wrapping around after `z`.
pub struct MemoryDump<'a> {
    heap: &'a Heap,
}

impl Heap {
    pub fn dump(&self) -> MemoryDump<'_> {
        MemoryDump { heap: self }
    }
}

impl MemoryDump<'_> {
    /// The granule map on its own.
    pub fn occupancy_map(&self) -> String {
        let mut map = String::with_capacity(self.heap.settings().arena_size / ALIGNMENT);
        let (mut free, mut used) = (0usize, 0usize);
        for block in self.heap.blocks() {
            let symbol = if block.is_free() {
                free += 1;
                b'a' + ((free - 1) % 26) as u8
            } else {
                used += 1;
                b'A' + ((used - 1) % 26) as u8
            };
            let granules = (HEADER_SIZE + block.size) / ALIGNMENT;
            map.extend(std::iter::repeat_n(symbol as char, granules));
        }
        map
    }
}

impl fmt::Display for MemoryDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heap = self.heap;
        writeln!(f, "MEMORY DUMP")?;
        writeln!(
            f,
            "active arena: {} ({}, {} collections)",
            heap.active_index(),
            heap.strategy(),
            heap.collections()
        )?;
        for block in heap.blocks() {
            let state = if block.is_free() { "Free" } else { "Used" };
            write!(f, "{state} at {:#06x}, size {}", block.offset, block.size)?;
            if let Some(handle) = block.handle {
                write!(f, " ({handle})")?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Memory Block")?;
        writeln!(f, "{}", self.occupancy_map())?;

        writeln!(f, "Free List")?;
        for block in heap.free_list() {
            writeln!(f, "Block at {:#06x}, size {}", block.offset, block.size)?;
        }

        writeln!(f, "Handle Table")?;
        for (handle, address) in heap.handle_slots() {
            match address {
                Some(address) => writeln!(f, "{handle} = {address}")?,
                None => writeln!(f, "{handle} = nil")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{FitStrategy, Heap, HeapSettings};

    #[test]
    fn occupancy_map_covers_every_granule() {
        let mut heap = Heap::new(HeapSettings {
            arena_size: 128,
            strategy: FitStrategy::FirstFit,
        })
        .unwrap();
        let a = heap.allocate(8).unwrap();
        heap.allocate(16).unwrap();
        heap.free(a).unwrap();

        let map = heap.dump().occupancy_map();
        assert_eq!(map.len(), 16);
        assert_eq!(map, "aaaAAAAbbbbbbbbb");
    }

    #[test]
    fn dump_lists_blocks_free_list_and_handles() {
        let mut heap = Heap::new(HeapSettings::default()).unwrap();
        let h0 = heap.managed_allocate(100).unwrap();
        heap.managed_allocate(20).unwrap();
        heap.managed_free(h0).unwrap();

        let text = heap.dump().to_string();
        assert!(text.starts_with("MEMORY DUMP\n"));
        assert!(text.contains("Free at 0x0000, size 104"));
        assert!(text.contains("Used at 0x0078, size 24 (#1)"));
        assert!(text.contains("Block at 0x0000, size 104"));
        assert!(text.contains("#0 = nil"));
        assert!(text.contains("#1 = 0x0088"));
    }

    #[test]
    fn letters_wrap_after_z() {
        let mut heap = Heap::new(HeapSettings {
            arena_size: 1024,
            strategy: FitStrategy::FirstFit,
        })
        .unwrap();
        for _ in 0..27 {
            heap.allocate(8).unwrap();
        }
        let map = heap.dump().occupancy_map();
        assert!(map.starts_with("AAABBB"));
        assert_eq!(&map[75..84], "ZZZAAAaaa");
    }
}
