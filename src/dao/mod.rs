//! Persistence layer: the battle store abstraction and its implementations.

/// Battle storage and retrieval operations.
pub mod battle_store;
