//! Checker module - runs login attempts across a target list.
//!
//! [`CheckerPool`] schedules [`TargetCheck`]s over a fixed set of workers.
//! Both only depend on the [`Session`] trait, so the SSH stack plugs in
//! through [`SessionFactory`].

pub mod pool;
pub mod rate_limiter;
pub mod target_check;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use pool::{Buckets, CheckerPool, FailedTarget};
pub use rate_limiter::RateLimiter;
pub use target_check::{CheckPhase, TargetCheck};
pub use traits::{
    CheckOutcome, NoopObserver, OutcomeKind, PoolObserver, Progress, Session, SessionFactory,
};
