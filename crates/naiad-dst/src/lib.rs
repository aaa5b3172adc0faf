//! Naiad DST
//!
//! Deterministic Simulation Testing kit. Every non-deterministic input the
//! engine has (time, randomness, provider failures) gets a controlled
//! stand-in here, so a test failure replays exactly from its seed
//! (`DST_SEED=<seed> cargo test`).
//!
//! - [`SimClock`]: manually advanced clock; sleeps park until advanced
//! - [`DeterministicRng`]: ChaCha20, forkable into independent streams
//! - [`FaultInjector`]: probabilistic fault rules with operation filters

mod clock;
mod fault;
mod rng;

pub use clock::SimClock;
pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultStats, FaultType};
pub use rng::DeterministicRng;
