//! `boardsync` — optimistic client-side state synchronization for
//! reorderable task boards.
//!
//! The crate has no rendering dependencies. Hosts drive it through plain
//! method calls and observe it through [`cache::ReplicaCache::subscribe`]
//! and the [`engine::EngineEvent`] channel.

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod drag;
pub mod engine;
pub mod patch;
pub mod poll;
pub mod position;
pub mod remote;
