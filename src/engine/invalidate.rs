use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BracketId, RoundId};

/// Stable page-fragment cache key of one round.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for the rendered fragment of `round` in `bracket`.
    pub fn round(bracket: BracketId, round: RoundId) -> Self {
        Self(format!("bracket.{bracket}.round.{round}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cache invalidation of {key} failed: {reason}")]
pub struct InvalidateError {
    pub key: CacheKey,
    pub reason: String,
}

/// Receiver of post-resolution cache invalidations.
///
/// Implementations are owned by the surrounding application. Failures are
/// reported but never undo the resolution that triggered them.
pub trait CacheInvalidator: Send {
    fn invalidate(&mut self, key: &CacheKey) -> Result<(), InvalidateError>;
}

impl<F> CacheInvalidator for F
where
    F: FnMut(&CacheKey) -> Result<(), InvalidateError> + Send,
{
    fn invalidate(&mut self, key: &CacheKey) -> Result<(), InvalidateError> {
        self(key)
    }
}

/// Keys whose cached fragments went stale after one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub keys: Vec<CacheKey>,
}

impl Invalidation {
    /// The resolved round, then the child round it feeds, if any.
    pub fn for_resolution(bracket: BracketId, round: RoundId, child: Option<RoundId>) -> Self {
        let mut keys = vec![CacheKey::round(bracket, round)];
        if let Some(child) = child {
            keys.push(CacheKey::round(bracket, child));
        }
        Self { keys }
    }

    /// Sends every key to `invalidator`, returning how many failed.
    pub fn notify(&self, invalidator: &mut dyn CacheInvalidator) -> usize {
        let mut failed = 0;
        for key in &self.keys {
            if let Err(err) = invalidator.invalidate(key) {
                log::warn!("{err}");
                failed += 1;
            }
        }
        failed
    }
}
