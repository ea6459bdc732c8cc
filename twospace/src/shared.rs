use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::{Heap, HeapSettings, Result};

/// A [`Heap`] behind a lock, for hosts with more than one thread.
///
/// Every operation, collections included, runs while holding the lock, so
/// at most one mutator touches the arenas, the free list and the handle
/// table at a time. Addresses taken under one lock acquisition may be stale
/// by the next if another thread collected in between; keep handles instead.
#[derive(Debug, Clone)]
pub struct SharedHeap {
    inner: Arc<Mutex<Heap>>,
}

impl SharedHeap {
    pub fn new(settings: HeapSettings) -> Result<Self> {
        Ok(Self::from_heap(Heap::new(settings)?))
    }

    pub fn from_heap(heap: Heap) -> Self {
        Self {
            inner: Arc::new(Mutex::new(heap)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Heap> {
        self.inner.lock()
    }

    /// Runs `f` with exclusive access to the heap.
    pub fn with<R>(&self, f: impl FnOnce(&mut Heap) -> R) -> R {
        let mut heap = self.inner.lock();
        f(&mut heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FitStrategy, Handle};

    #[test]
    fn threads_share_one_heap() {
        let shared = SharedHeap::new(HeapSettings {
            arena_size: 4096,
            strategy: FitStrategy::BestFit,
        })
        .unwrap();

        let threads: Vec<_> = (0..4u8)
            .map(|t| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let mut mine: Vec<Handle> = Vec::new();
                    for i in 0..20u8 {
                        let handle = shared.with(|heap| {
                            let handle = heap.managed_allocate(16)?;
                            heap.write_handle(handle, &[t, i])?;
                            Ok::<_, crate::HeapError>(handle)
                        });
                        mine.push(handle.unwrap());
                        if i % 5 == 0 {
                            shared.with(|heap| heap.collect()).unwrap();
                        }
                    }
                    (t, mine)
                })
            })
            .collect();

        for thread in threads {
            let (t, handles) = thread.join().expect("thread panicked");
            let heap = shared.lock();
            for (i, handle) in handles.into_iter().enumerate() {
                assert_eq!(&heap.handle_bytes(handle).unwrap()[..2], &[t, i as u8]);
            }
        }
        shared.lock().check_invariants().unwrap();
    }
}
