use std::{fmt, str::FromStr};

use crate::{
    Arena, HeapError,
    block::{HEADER_SIZE, round_up},
};

/// Policy for choosing which free block serves a request.
#[repr(u8)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum FitStrategy {
    /// First block in list order that is large enough.
    #[default]
    FirstFit = 0,
    /// Smallest block that is large enough, earliest one on ties.
    BestFit = 1,
}

/// A free block selected for a request, with its list predecessor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub prev: Option<usize>,
    pub offset: usize,
    pub size: usize,
}

impl FitStrategy {
    /// Picks a free block whose payload is at least `needed` bytes. Callers
    /// pass the request plus one header, so the block can always be split.
    pub fn select(self, arena: &Arena, needed: usize) -> Option<Candidate> {
        let mut prev = None;
        let mut best: Option<Candidate> = None;

        for (offset, header) in arena.free_blocks() {
            if header.size >= needed {
                let candidate = Candidate {
                    prev,
                    offset,
                    size: header.size,
                };
                match self {
                    FitStrategy::FirstFit => return Some(candidate),
                    FitStrategy::BestFit => {
                        if best.is_none_or(|best| header.size < best.size) {
                            best = Some(candidate);
                        }
                    }
                }
            }
            prev = Some(offset);
        }

        best
    }
}

impl fmt::Display for FitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitStrategy::FirstFit => write!(f, "first-fit"),
            FitStrategy::BestFit => write!(f, "best-fit"),
        }
    }
}

impl FromStr for FitStrategy {
    type Err = HeapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "first-fit" | "firstfit" => Ok(FitStrategy::FirstFit),
            "best" | "best-fit" | "bestfit" => Ok(FitStrategy::BestFit),
            _ => Err(HeapError::InvalidConfiguration("unknown placement strategy")),
        }
    }
}

impl TryFrom<u8> for FitStrategy {
    type Error = HeapError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(FitStrategy::FirstFit),
            1 => Ok(FitStrategy::BestFit),
            _ => Err(HeapError::InvalidConfiguration("unknown placement strategy")),
        }
    }
}

impl Arena {
    /// Allocates at least `size` payload bytes and returns the block offset.
    ///
    /// A free block qualifies only if it also has room for the header of the
    /// remainder left behind it. Leaves the arena untouched when none does.
    pub fn allocate(&mut self, strategy: FitStrategy, size: usize) -> Option<usize> {
        let rounded = round_up(size)?;
        let total = rounded.checked_add(HEADER_SIZE)?;
        let candidate = strategy.select(self, total)?;
        Some(self.split(candidate.prev, candidate.offset, rounded))
    }

    /// Returns the used block at `block` to the free list. Adjacent free
    /// blocks are not merged.
    pub fn release(&mut self, block: usize) {
        debug_assert!(!self.header(block).is_free());
        self.insert_free(block);
        log::trace!("released block {block:#06x}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockState;

    /// Builds an arena whose free list holds blocks of the given payload
    /// sizes (in order), separated by used spacer blocks.
    fn fragmented(sizes: &[usize]) -> (Arena, Vec<usize>) {
        let mut arena = Arena::new(1024);
        let mut holes = Vec::new();
        for &size in sizes {
            let hole = arena.allocate(FitStrategy::FirstFit, size).unwrap();
            arena.allocate(FitStrategy::FirstFit, 8).unwrap();
            holes.push(hole);
        }
        for &hole in &holes {
            arena.release(hole);
        }
        (arena, holes)
    }

    #[test]
    fn first_fit_takes_first_large_enough_block() {
        let (mut arena, holes) = fragmented(&[64, 32, 48]);
        let block = arena.allocate(FitStrategy::FirstFit, 24).unwrap();
        assert_eq!(block, holes[0]);
    }

    #[test]
    fn best_fit_takes_smallest_large_enough_block() {
        let (mut arena, holes) = fragmented(&[64, 48, 56]);
        let block = arena.allocate(FitStrategy::BestFit, 24).unwrap();
        assert_eq!(block, holes[1]);
    }

    #[test]
    fn best_fit_breaks_ties_by_list_order() {
        let (mut arena, holes) = fragmented(&[64, 48, 48]);
        let block = arena.allocate(FitStrategy::BestFit, 24).unwrap();
        assert_eq!(block, holes[1]);
    }

    #[test]
    fn best_fit_never_larger_than_first_fit() {
        let layouts: [&[usize]; 4] = [&[64, 32, 48], &[40, 96, 56], &[128, 64, 72], &[48, 48, 200]];
        for sizes in layouts {
            for request in [8, 16, 24, 32, 40, 48] {
                let (first, _) = fragmented(sizes);
                let (best, _) = fragmented(sizes);
                let needed = round_up(request).unwrap() + HEADER_SIZE;
                let first = FitStrategy::FirstFit.select(&first, needed);
                let best = FitStrategy::BestFit.select(&best, needed);
                match (first, best) {
                    (Some(first), Some(best)) => assert!(best.size <= first.size),
                    (None, None) => {}
                    other => panic!("strategies disagree on fit: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn block_without_room_for_remainder_header_is_skipped() {
        for strategy in [FitStrategy::FirstFit, FitStrategy::BestFit] {
            // holes[0] holds the 32 bytes but not the header behind them
            let (mut arena, holes) = fragmented(&[32, 40, 64]);
            let block = arena.allocate(strategy, 32).unwrap();
            assert_eq!(block, holes[2], "{strategy}");
            assert_eq!(arena.header(block).size, 32);
            let free: Vec<_> = arena.free_blocks().map(|(o, _)| o).collect();
            assert!(free.contains(&holes[0]) && free.contains(&holes[1]));
        }
    }

    #[test]
    fn exact_fit_leaves_zero_size_remainder() {
        let (mut arena, holes) = fragmented(&[64, 32, 48]);
        let block = arena.allocate(FitStrategy::BestFit, 32).unwrap();
        assert_eq!(block, holes[2]);
        assert_eq!(arena.header(block).size, 32);

        let rest = block + HEADER_SIZE + 32;
        let free: Vec<_> = arena.free_blocks().map(|(o, h)| (o, h.size)).collect();
        assert!(free.contains(&(rest, 0)));
        assert!(free.contains(&(holes[1], 32)));
        assert!(!free.iter().any(|&(o, _)| o == holes[2]));
    }

    #[test]
    fn failed_allocation_leaves_arena_untouched() {
        let (mut arena, _) = fragmented(&[64, 32]);
        let before: Vec<_> = arena.blocks().collect();
        let head = arena.free_head();
        assert!(arena.allocate(FitStrategy::BestFit, 2000).is_none());
        assert!(arena.allocate(FitStrategy::FirstFit, usize::MAX).is_none());
        assert_eq!(arena.blocks().collect::<Vec<_>>(), before);
        assert_eq!(arena.free_head(), head);
    }

    #[test]
    fn release_does_not_coalesce() {
        let mut arena = Arena::new(256);
        let a = arena.allocate(FitStrategy::FirstFit, 16).unwrap();
        let b = arena.allocate(FitStrategy::FirstFit, 16).unwrap();
        arena.release(a);
        arena.release(b);
        let free: Vec<_> = arena.free_blocks().map(|(o, h)| (o, h.size)).collect();
        assert_eq!(free, vec![(0, 16), (32, 16), (64, 176)]);
        assert!(arena.blocks().all(|(_, h)| h.state == BlockState::Free));
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!("first".parse::<FitStrategy>().unwrap(), FitStrategy::FirstFit);
        assert_eq!("Best-Fit".parse::<FitStrategy>().unwrap(), FitStrategy::BestFit);
        assert_eq!(FitStrategy::try_from(1).unwrap(), FitStrategy::BestFit);
        assert!(matches!(
            "worst".parse::<FitStrategy>(),
            Err(HeapError::InvalidConfiguration(_))
        ));
        assert!(FitStrategy::try_from(2).is_err());
    }
}
