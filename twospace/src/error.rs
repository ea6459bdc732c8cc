use thiserror::Error;

/// Errors returned by heap operations.
///
/// Only the out-of-memory family is expected at runtime. The address and
/// handle variants report misuse that the heap detects instead of corrupting
/// its block layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    #[error("out of memory: no free block for {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("handle table full ({capacity} handles issued)")]
    HandleTableFull { capacity: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    #[error("no block starts at offset {0:#06x}")]
    InvalidAddress(usize),

    #[error("block at offset {0:#06x} is already free")]
    DoubleFree(usize),

    #[error("address {0:#06x} was issued before the last collection")]
    StaleAddress(usize),

    #[error("block at offset {0:#06x} belongs to a handle, release the handle")]
    ManagedAddress(usize),

    #[error("handle #{0} does not refer to a live object")]
    InvalidHandle(usize),

    #[error("{len} bytes do not fit a {size} byte payload")]
    OutOfBounds { len: usize, size: usize },
}

impl HeapError {
    /// True for both ways the heap can run out of room.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            HeapError::OutOfMemory { .. } | HeapError::HandleTableFull { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HeapError>;
