//! Admission control and crisis signalling for the sovereign ledger.
//!
//! - [`counter`]: shared atomic counter store contract and an in-process store
//! - [`reputation`]: per-caller abuse scores, admission and threshold crossings
//! - [`crisis`]: fire-and-forget crisis broadcast to any number of observers
//! - [`identity`]: root-authority capability check
//!
//! With the `redis` feature, [`redis_bridge`] backs counters and the crisis
//! channel with Redis so several ledger nodes share them.

pub mod counter;
pub mod crisis;
pub mod identity;
pub mod reputation;

#[cfg(feature = "redis")]
pub mod redis_bridge;

pub use counter::{CounterError, CounterStore, MemoryCounterStore};
pub use crisis::CrisisBroadcaster;
pub use identity::{IdentityDenied, IdentityGate};
pub use reputation::{Admission, ReputationError, ReputationTracker, ReputationUpdate};

#[cfg(feature = "redis")]
pub use redis_bridge::{spawn_crisis_relay, RedisCounterStore};
