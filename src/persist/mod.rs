//! Op journal persistence.

pub mod sqlite;

use thiserror::Error;

use crate::{
    core::store::{StoreError, StoreSnapshotV1},
    op::StoredOp,
    types::OpSeq,
};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("replay: {0}")]
    Replay(#[from] StoreError),
    #[error("{0}")]
    Message(String),
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Durable destination for journaled ops.
///
/// `append_ops` receives the ops of one runtime command at a time, so an
/// implementation writing each call in one transaction keeps bracket
/// creation atomic.
pub trait OpSink: Send {
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq>;
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    fn write_snapshot(&mut self, _snapshot: &StoreSnapshotV1, _last_seq: OpSeq) -> PersistResult<()> {
        Ok(())
    }
    fn compact_through(&mut self, _seq: OpSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
