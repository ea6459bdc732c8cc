//! User-space memory manager over a pair of fixed-size byte arenas.
//!
//! - a free-list allocator with first-fit or best-fit placement
//! - a handle table giving relocatable references
//! - an evacuating collector that compacts handle-reachable objects into
//!   the idle arena

mod allocator;
mod arena;
pub mod block;
mod collector;
mod dump;
mod error;
mod handles;
mod heap;
mod shared;

pub use allocator::{Candidate, FitStrategy};
pub use arena::{Arena, Blocks, FreeBlocks};
pub use block::BlockState;
pub use collector::CollectionStats;
pub use dump::MemoryDump;
pub use error::{HeapError, Result};
pub use handles::{Handle, HandleTable};
pub use heap::{Address, BlockInfo, Heap, HeapSettings, HeapStats};
pub use shared::SharedHeap;
