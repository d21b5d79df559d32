//! Abstraction over the persistence layer for battle records, plus the
//! in-memory implementation used in production deployments of this service.

use std::{error::Error, sync::Arc};

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::state::battle::{Battle, BattleStatus};

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend cannot be reached or rejected the operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human-readable description of the failure.
        message: String,
        /// Backend-specific cause.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Durable record of battle state, keyed by battle ID.
///
/// Mutations go through load-modify-save under the per-battle lock held by the
/// engine; the store itself only guarantees atomicity of individual calls.
pub trait BattleStore: Send + Sync {
    /// Fetch a battle by id, `None` when it does not exist.
    fn find(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<Battle>>>;
    /// Insert or replace a battle record.
    fn save(&self, battle: Battle) -> BoxFuture<'static, StorageResult<()>>;
    /// Id of the non-terminal battle hosted on the given challenger stream,
    /// if any. Backs the one-battle-per-stream invariant.
    fn find_live_by_challenger_stream(
        &self,
        stream_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Uuid>>>;
    /// Cheap liveness probe for health reporting.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Battle store backed by a concurrent in-process map.
#[derive(Default)]
pub struct InMemoryBattleStore {
    battles: Arc<DashMap<Uuid, Battle>>,
}

impl InMemoryBattleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BattleStore for InMemoryBattleStore {
    fn find(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<Battle>>> {
        let battles = Arc::clone(&self.battles);
        Box::pin(async move { Ok(battles.get(&id).map(|entry| entry.clone())) })
    }

    fn save(&self, battle: Battle) -> BoxFuture<'static, StorageResult<()>> {
        let battles = Arc::clone(&self.battles);
        Box::pin(async move {
            battles.insert(battle.id, battle);
            Ok(())
        })
    }

    fn find_live_by_challenger_stream(
        &self,
        stream_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Uuid>>> {
        let battles = Arc::clone(&self.battles);
        let stream_id = stream_id.to_string();
        Box::pin(async move {
            let id = battles
                .iter()
                .find(|entry| {
                    entry.challenger.stream_id == stream_id
                        && matches!(
                            entry.status,
                            BattleStatus::Pending | BattleStatus::Active
                        )
                })
                .map(|entry| entry.id);
            Ok(id)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
