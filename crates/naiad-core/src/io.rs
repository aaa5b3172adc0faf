//! I/O abstraction layer
//!
//! TigerStyle: all external I/O goes through abstraction traits.
//!
//! Time and randomness are the two sources of non-determinism the engine
//! touches directly. Both are abstracted so the same pipeline code runs
//! under production wall-clock/OS entropy and under the deterministic
//! simulation providers in `naiad-dst`:
//!
//! - **Time**: wall clock vs simulated clock
//! - **Random**: xorshift vs seeded ChaCha20
//!
//! Never call `SystemTime::now()`, `chrono::Utc::now()`, or
//! `Uuid::new_v4()` from engine code; go through [`IoContext`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// ============================================================================
// Time Provider
// ============================================================================

/// Time provider abstraction.
///
/// # Implementations
///
/// - [`WallClockTime`]: production, system clock
/// - `SimClock` (in `naiad-dst`): deterministic, manually advanced
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since epoch.
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration.
    ///
    /// In production: actual `tokio::time::sleep`.
    /// In simulation: parks until the sim clock is advanced past the target.
    async fn sleep_ms(&self, ms: u64);

    /// Current time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_ms() as i64)
            .unwrap_or_else(|| DateTime::from_timestamp_millis(0).unwrap())
    }
}

/// Production time provider using the system clock.
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
    }
}

// ============================================================================
// RNG Provider
// ============================================================================

/// Random number generator abstraction.
///
/// UUIDs are minted through this trait so that a seeded run mints the same
/// node ids every time.
pub trait RngProvider: Send + Sync + std::fmt::Debug {
    /// Generate a random u64.
    fn next_u64(&self) -> u64;

    /// Generate a random f64 in [0, 1).
    fn next_f64(&self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a random v4 UUID.
    fn gen_uuid(&self) -> Uuid {
        let high = self.next_u64();
        let low = self.next_u64();

        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&high.to_be_bytes());
        bytes[8..].copy_from_slice(&low.to_be_bytes());
        bytes[6] = (bytes[6] & 0x0f) | 0x40; // version 4
        bytes[8] = (bytes[8] & 0x3f) | 0x80; // variant 1

        Uuid::from_bytes(bytes)
    }

    /// Generate a random boolean with the given probability of `true`.
    fn gen_bool(&self, probability: f64) -> bool {
        assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1]"
        );
        self.next_f64() < probability
    }
}

/// Production RNG provider.
///
/// Lock-free xorshift64* over an atomic word. Not cryptographically secure;
/// used for ids and jitter only.
#[derive(Debug)]
pub struct StdRngProvider {
    state: AtomicU64,
}

impl Default for StdRngProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StdRngProvider {
    /// Create a new provider seeded from the system clock.
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
            | 1;

        Self {
            state: AtomicU64::new(seed),
        }
    }

    /// Create with a specific seed (for testing).
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: AtomicU64::new(seed | 1),
        }
    }
}

impl RngProvider for StdRngProvider {
    fn next_u64(&self) -> u64 {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            let mut x = state;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;

            match self.state.compare_exchange_weak(
                state,
                x,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return x.wrapping_mul(0x2545F4914F6CDD1D),
                Err(s) => state = s,
            }
        }
    }
}

// ============================================================================
// I/O Context
// ============================================================================

/// Bundle of I/O providers, passed through the engine instead of individual
/// providers.
#[derive(Clone)]
pub struct IoContext {
    /// Time provider
    pub time: Arc<dyn TimeProvider>,
    /// RNG provider
    pub rng: Arc<dyn RngProvider>,
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("time", &self.time)
            .field("rng", &self.rng)
            .finish()
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::production()
    }
}

impl IoContext {
    /// Production context: wall clock and OS-seeded RNG.
    pub fn production() -> Self {
        Self {
            time: Arc::new(WallClockTime::new()),
            rng: Arc::new(StdRngProvider::new()),
        }
    }

    /// Context with custom providers.
    pub fn new(time: Arc<dyn TimeProvider>, rng: Arc<dyn RngProvider>) -> Self {
        Self { time, rng }
    }

    /// Current time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }

    /// Current time as a UTC timestamp.
    pub fn now_utc(&self) -> DateTime<Utc> {
        self.time.now_utc()
    }

    /// Sleep for the given duration.
    pub async fn sleep_ms(&self, ms: u64) {
        self.time.sleep_ms(ms).await;
    }

    /// Mint a UUID.
    pub fn gen_uuid(&self) -> Uuid {
        self.rng.gen_uuid()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_clock_now_ms() {
        let clock = WallClockTime::new();
        let now = clock.now_ms();

        assert!(now > 1_577_836_800_000); // Jan 1, 2020

        let now2 = clock.now_ms();
        assert!(now2 >= now);
    }

    #[test]
    fn test_wall_clock_now_utc_matches_ms() {
        let clock = WallClockTime::new();
        let utc = clock.now_utc();
        let ms = clock.now_ms();

        let delta = (utc.timestamp_millis() - ms as i64).abs();
        assert!(delta < 1_000, "delta: {}", delta);
    }

    #[test]
    fn test_std_rng_deterministic_with_seed() {
        let rng1 = StdRngProvider::with_seed(12345);
        let rng2 = StdRngProvider::with_seed(12345);

        assert_eq!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_gen_uuid_shape() {
        let rng = StdRngProvider::with_seed(42);
        let uuid = rng.gen_uuid();

        assert_eq!(uuid.get_version_num(), 4);
    }

    #[test]
    fn test_gen_uuid_unique() {
        let rng = StdRngProvider::with_seed(42);
        assert_ne!(rng.gen_uuid(), rng.gen_uuid());
    }

    #[test]
    fn test_gen_bool_extremes() {
        let rng = StdRngProvider::with_seed(42);

        for _ in 0..10 {
            assert!(!rng.gen_bool(0.0));
            assert!(rng.gen_bool(1.0));
        }
    }

    #[test]
    fn test_io_context_production() {
        let ctx = IoContext::production();

        assert!(ctx.now_ms() > 1_577_836_800_000);
        assert_eq!(ctx.gen_uuid().get_version_num(), 4);
    }
}
