//! Core identifier types shared across the storetree engine.

/// NodeId: identity of a path resource, unique within its store
pub type NodeId = u64;

/// StoreId: identity of a top-level store
pub type StoreId = u64;

/// TaskId: process-wide, strictly increasing task identity
pub type TaskId = u64;

/// UserId: opaque identity handed to the group-membership capability
pub type UserId = String;

/// Depth/level sentinel meaning "no bound"
pub const UNBOUNDED: u32 = u32::MAX;
