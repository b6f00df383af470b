//! Board data model shared by every `boardsync` layer.
//!
//! Contains the identifier types and their naming convention, the board
//! aggregate ([`board::Board`]) and the neighbor-relative intents that are
//! sent to the remote authority.

pub mod board;
pub mod ids;
pub mod intent;
