//! Global transaction sequence numbers

use std::sync::Arc;

use purchase_core::Sequence;

use crate::error::StorageError;
use crate::storage::Storage;

/// Issues strictly increasing sequence numbers from a persisted counter and
/// reports the admission cursor the pool enforces.
///
/// Allocation is a single database transaction, so concurrent callers never
/// receive the same value and a failed commit never spends one.
#[derive(Clone, Debug)]
pub struct SequenceAllocator {
    storage: Arc<Storage>,
}

impl SequenceAllocator {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Reserve and return the next sequence number
    pub fn next_sequence(&self) -> Result<Sequence, StorageError> {
        self.storage.next_sequence()
    }

    /// Last reserved number, `None` if nothing was reserved yet
    pub fn last_issued(&self) -> Result<Option<Sequence>, StorageError> {
        self.storage.last_issued_sequence()
    }

    /// Last number admitted into the pool
    pub fn last_received(&self) -> Result<Option<Sequence>, StorageError> {
        self.storage.last_received_sequence()
    }

    /// The only sequence the pool accepts next
    pub fn expected(&self) -> Result<Sequence, StorageError> {
        Ok(self.last_received()?.map_or(0, |last| last + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_sequential_allocation() {
        let allocator = SequenceAllocator::new(Arc::new(Storage::in_memory().unwrap()));
        assert_eq!(allocator.next_sequence().unwrap(), 0);
        assert_eq!(allocator.next_sequence().unwrap(), 1);
        assert_eq!(allocator.last_issued().unwrap(), Some(1));
        // reservations do not move the admission cursor
        assert_eq!(allocator.last_received().unwrap(), None);
        assert_eq!(allocator.expected().unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocation_has_no_gaps() {
        let allocator = SequenceAllocator::new(Arc::new(Storage::in_memory().unwrap()));
        let base = allocator.next_sequence().unwrap() + 1;

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let allocator = allocator.clone();
                tokio::task::spawn_blocking(move || allocator.next_sequence().unwrap())
            })
            .collect();

        let mut values = BTreeSet::new();
        for handle in handles {
            assert!(values.insert(handle.await.unwrap()));
        }
        let expected: BTreeSet<u64> = (base..base + 64).collect();
        assert_eq!(values, expected);
    }
}
