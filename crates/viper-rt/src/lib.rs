//! Runtime name map and runtime bridge (C7, C9): the declarative extern
//! catalog, the canonical-vs-legacy name resolution policy, and the
//! type-directed thunks that actually perform each core extern's work.

pub mod bridge;
pub mod catalog;
pub mod name_map;

pub use bridge::{Bridge, BridgeError, HostValue, TrapKind};
pub use catalog::{RuntimeEntry, CATALOG};
pub use name_map::NameMap;
