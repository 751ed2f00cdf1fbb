//! Account health and stake allocation.
//!
//! - [`health`] scores accounts from bet history and caches the result
//! - [`allocator`] turns an opportunity and a bankroll into rounded,
//!   jittered stakes
//! - [`store`] is an in-memory bet history store

pub mod allocator;
pub mod error;
pub mod health;
pub mod store;

pub use allocator::{
    plan, AllocationRequest, RoundingPolicy, StakeAllocator, StakeLeg, StakePlan, Warning,
};
pub use error::{AllocationError, HealthError};
pub use health::{
    assess, stake_multiplier, AccountHealthCache, AccountHealthManager, CacheStats,
    HealthLookup, HealthProvider, HealthSignals, HealthSnapshot, LookupSource, WarmReport,
};
pub use store::InMemoryBetStore;
