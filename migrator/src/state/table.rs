use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::schema::{ColumnValues, TableDescriptor, TableName};

/// Boundaries of the chunk most recently copied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkRange {
    pub min: Option<ColumnValues>,
    pub max: Option<ColumnValues>,
}

/// Live state of a migrated table.
///
/// The descriptor is fixed at plan time. Only the iteration and the chunk boundaries advance as
/// chunks are copied; they are updated together so readers never pair an iteration with the
/// boundaries of another chunk.
#[derive(Debug)]
pub struct Table {
    descriptor: TableDescriptor,
    iteration: AtomicU64,
    chunk: Mutex<ChunkRange>,
}

impl Table {
    pub fn new(descriptor: TableDescriptor) -> Self {
        Self {
            descriptor,
            iteration: AtomicU64::new(0),
            chunk: Mutex::new(ChunkRange::default()),
        }
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &TableName {
        &self.descriptor.name
    }

    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Acquire)
    }

    pub fn chunk_range(&self) -> ChunkRange {
        self.chunk.lock().clone()
    }

    /// Records the boundaries of a freshly copied chunk and returns the new iteration.
    pub fn advance_chunk(&self, min: ColumnValues, max: ColumnValues) -> u64 {
        let mut chunk = self.chunk.lock();
        chunk.min = Some(min);
        chunk.max = Some(max);
        let iteration = self.iteration.fetch_add(1, Ordering::AcqRel) + 1;

        trace!(table = %self.descriptor.name, iteration, "chunk advanced");

        iteration
    }

    /// Returns an independent table with the same descriptor and progress.
    pub fn duplicate(&self) -> Self {
        let chunk = self.chunk.lock();

        Self {
            descriptor: self.descriptor.clone(),
            iteration: AtomicU64::new(self.iteration.load(Ordering::Acquire)),
            chunk: Mutex::new(chunk.clone()),
        }
    }
}

impl From<TableDescriptor> for Table {
    fn from(descriptor: TableDescriptor) -> Self {
        Self::new(descriptor)
    }
}
