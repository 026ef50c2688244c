//! In-memory target
//!
//! The executable reference for the target contract, used by tests and as
//! a starting point for real implementations. Keeps every written batch
//! tagged with its block number so fork retraction is observable.

use parking_lot::Mutex;
use tracing::warn;

use portal_protocol::BlockCursor;

use crate::source::PipelineBatch;
use crate::target::{CursorRecord, Target};
use crate::Result;

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;

struct MemoryState<Out> {
    written: Vec<(u64, Out)>,
    record: Option<CursorRecord>,
}

/// Target keeping everything in memory
pub struct InMemoryTarget<Out> {
    state: Mutex<MemoryState<Out>>,
}

impl<Out> InMemoryTarget<Out> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                written: Vec::new(),
                record: None,
            }),
        }
    }

    /// Seed persisted state, as if a previous run had written it
    pub fn with_record(record: CursorRecord) -> Self {
        let target = Self::new();
        target.state.lock().record = Some(record);
        target
    }

    /// Current persisted resume state
    pub fn record(&self) -> Option<CursorRecord> {
        self.state.lock().record.clone()
    }

    /// Block numbers of every batch still persisted, in write order
    pub fn written_blocks(&self) -> Vec<u64> {
        self.state.lock().written.iter().map(|(n, _)| *n).collect()
    }
}

impl<Out: Clone> InMemoryTarget<Out> {
    /// Every batch still persisted, in write order
    pub fn written(&self) -> Vec<Out> {
        self.state
            .lock()
            .written
            .iter()
            .map(|(_, data)| data.clone())
            .collect()
    }
}

impl<Out> Default for InMemoryTarget<Out> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<Out: Send + 'static> Target<Out> for InMemoryTarget<Out> {
    async fn cursor(&self) -> Result<Option<CursorRecord>> {
        Ok(self.state.lock().record.clone())
    }

    async fn write(&self, batch: PipelineBatch<Out>) -> Result<()> {
        let mut state = self.state.lock();
        state
            .written
            .push((batch.ctx.state.current.number, batch.data));
        state.record = Some(CursorRecord {
            current: batch.ctx.state.current.clone(),
            finalized: batch.ctx.head.finalized.clone(),
            rollback_chain: batch.ctx.state.rollback_chain.clone(),
        });
        Ok(())
    }

    fn supports_fork(&self) -> bool {
        true
    }

    async fn fork(&self, previous_blocks: &[BlockCursor]) -> Result<Option<BlockCursor>> {
        let mut state = self.state.lock();
        let Some(record) = &state.record else {
            return Ok(None);
        };

        let mut fork_point = None;
        for stored in record.rollback_chain.iter().rev() {
            if previous_blocks.iter().any(|p| p.same_block(stored)) {
                fork_point = Some(stored.clone());
                break;
            }
        }

        if fork_point.is_none() {
            // Deep fork beyond tracked history: resume from the oldest
            // block still above finalization, a best-effort heuristic
            let finalized = record.finalized.as_ref().map(|f| f.number);
            fork_point = record
                .rollback_chain
                .iter()
                .find(|c| finalized.map_or(true, |f| c.number > f))
                .cloned();
            if let Some(cursor) = &fork_point {
                warn!(
                    resume_block = cursor.number,
                    "fork deeper than tracked history; resuming from oldest unfinalized block"
                );
            }
        }

        let Some(cursor) = fork_point else {
            return Ok(None);
        };

        state.written.retain(|(number, _)| *number <= cursor.number);
        if let Some(record) = &mut state.record {
            record.rollback_chain.retain(|c| c.number <= cursor.number);
            record.current = cursor.clone();
        }
        Ok(Some(cursor))
    }
}
