//! Time-ordered correlation identifiers.
//!
//! A [`CorrelationId`] is a ULID: a 48-bit Unix-millisecond timestamp in the
//! most significant bits followed by 80 random bits. The string form is 26
//! characters of Crockford base32, so IDs sort lexicographically in creation
//! order.
//!
//! IDs are used once, to build a per-call reply topic
//! (`<topic>:reply:<id>`), and are never persisted.

use std::fmt;
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use ulid::Ulid;

use crate::{Result, RpcError};

/// Length of the encoded string form.
pub const ENCODED_LEN: usize = ulid::ULID_LEN;

const RANDOM_BITS: u32 = Ulid::RAND_BITS as u32;
const RANDOM_MASK: u128 = (1u128 << RANDOM_BITS) - 1;
const MAX_TIMESTAMP_MS: u64 = (1u64 << Ulid::TIME_BITS) - 1;

/// Unique, lexicographically sortable correlation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationId(Ulid);

impl CorrelationId {
    // ---

    /// Assemble an ID from its timestamp and random components.
    ///
    /// Bits beyond 48 (timestamp) and 80 (random) are discarded.
    pub fn from_parts(timestamp_ms: u64, random: u128) -> Self {
        Self(Ulid::from_parts(timestamp_ms, random))
    }

    /// Generate a new ID from the process-wide generator.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Correlation`] if the system clock is before the
    /// Unix epoch, the OS random source fails, or the random component for
    /// the current millisecond is exhausted.
    pub fn generate() -> Result<Self> {
        // ---
        default_generator().next_id(SystemTime::now())
    }

    /// Parse the 26-character string form. Lowercase is accepted.
    pub fn parse(s: &str) -> Result<Self> {
        // ---
        Ulid::from_string(&s.to_ascii_uppercase())
            .map(Self)
            .map_err(|err| RpcError::Correlation(format!("invalid correlation id {s:?}: {err}")))
    }

    /// Millisecond timestamp component.
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }

    /// 80-bit random component.
    pub fn random(&self) -> u128 {
        self.0.random()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Build the one-shot reply topic for a call on `topic`.
pub fn reply_topic(topic: &str, id: &CorrelationId) -> String {
    format!("{topic}:reply:{id}")
}

/// Monotonic correlation ID source.
///
/// Within one millisecond (or if the clock steps backwards) each new ID is
/// the previous one incremented by one, so IDs from the same generator never
/// collide and never go backwards. A new millisecond draws fresh random bits
/// from the entropy source.
pub struct CorrelationGenerator {
    state: Mutex<GeneratorState>,
}

struct GeneratorState {
    last: Option<Ulid>,
    entropy: Box<dyn RngCore + Send>,
}

impl CorrelationGenerator {
    // ---

    /// Generator seeded from the operating system's random source.
    pub fn new() -> Self {
        Self::with_entropy(OsRng)
    }

    /// Generator drawing random bits from `entropy`.
    pub fn with_entropy(entropy: impl RngCore + Send + 'static) -> Self {
        // ---
        Self {
            state: Mutex::new(GeneratorState {
                last: None,
                entropy: Box::new(entropy),
            }),
        }
    }

    /// Produce the next ID for wall-clock time `now`.
    pub fn next_id(&self, now: SystemTime) -> Result<CorrelationId> {
        // ---
        let ms = now
            .duration_since(UNIX_EPOCH)
            .map_err(|err| RpcError::Correlation(format!("clock before unix epoch: {err}")))?
            .as_millis();

        if ms > MAX_TIMESTAMP_MS as u128 {
            return Err(RpcError::Correlation(format!(
                "timestamp {ms} does not fit in 48 bits"
            )));
        }
        let ms = ms as u64;

        let mut state = lock_ignore_poison(&self.state);

        let next = match state.last {
            Some(last) if ms <= last.timestamp_ms() => last.increment().ok_or_else(|| {
                RpcError::Correlation(format!(
                    "random component exhausted for millisecond {}",
                    last.timestamp_ms()
                ))
            })?,
            _ => {
                let mut bytes = [0u8; 16];
                state
                    .entropy
                    .try_fill_bytes(&mut bytes[6..])
                    .map_err(|err| RpcError::Correlation(format!("entropy source: {err}")))?;
                Ulid::from_parts(ms, u128::from_be_bytes(bytes))
            }
        };

        state.last = Some(next);
        Ok(CorrelationId(next))
    }
}

impl Default for CorrelationGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn default_generator() -> &'static CorrelationGenerator {
    static GENERATOR: OnceLock<CorrelationGenerator> = OnceLock::new();
    GENERATOR.get_or_init(CorrelationGenerator::new)
}

/// The guarded state holds no invariant a panicking holder could break
/// half-way, so a poisoned lock is still usable.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::time::Duration;

    struct BrokenEntropy;

    impl RngCore for BrokenEntropy {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, _dest: &mut [u8]) {}
        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "entropy unavailable",
            )))
        }
    }

    /// Always yields the maximum random component.
    struct SaturatedEntropy;

    impl RngCore for SaturatedEntropy {
        fn next_u32(&mut self) -> u32 {
            u32::MAX
        }
        fn next_u64(&mut self) -> u64 {
            u64::MAX
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0xff);
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            dest.fill(0xff);
            Ok(())
        }
    }

    #[test]
    fn test_generate_unique() {
        // ---
        let id1 = CorrelationId::generate().unwrap();
        let id2 = CorrelationId::generate().unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_format() {
        // ---
        let id = CorrelationId::generate().unwrap();
        let s = id.to_string();
        assert_eq!(s.len(), ENCODED_LEN);
        assert!(s.bytes().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert!(!s.contains(['I', 'L', 'O', 'U']));
    }

    #[test]
    fn test_known_encoding() {
        // ---
        assert_eq!(
            CorrelationId::from_parts(0, 0).to_string(),
            "00000000000000000000000000"
        );
        assert_eq!(
            CorrelationId::from_parts(MAX_TIMESTAMP_MS, RANDOM_MASK).to_string(),
            "7ZZZZZZZZZZZZZZZZZZZZZZZZZ"
        );
        assert_eq!(
            CorrelationId::from_parts(0, 1).to_string(),
            "00000000000000000000000001"
        );
    }

    #[test]
    fn test_parse_round_trips() {
        // ---
        let id = CorrelationId::from_parts(1_700_000_000_000, 0xdead_beef_cafe);
        let parsed = CorrelationId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.timestamp_ms(), 1_700_000_000_000);
        assert_eq!(parsed.random(), 0xdead_beef_cafe);

        let lower = id.to_string().to_ascii_lowercase();
        assert_eq!(CorrelationId::parse(&lower).unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        // ---
        assert!(CorrelationId::parse("short").is_err());
        assert!(CorrelationId::parse("0000000000000000000000000U").is_err());
    }

    #[test]
    fn test_same_millisecond_is_strictly_increasing() {
        // ---
        let generator = CorrelationGenerator::with_entropy(StdRng::seed_from_u64(7));
        let now = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);

        let ids: Vec<CorrelationId> = (0..1000).map(|_| generator.next_id(now).unwrap()).collect();

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].to_string() < pair[1].to_string());
            assert_eq!(pair[1].random(), pair[0].random() + 1);
        }
        assert!(ids.iter().all(|id| id.timestamp_ms() == 1_700_000_000_123));
    }

    #[test]
    fn test_clock_step_back_stays_monotonic() {
        // ---
        let generator = CorrelationGenerator::with_entropy(StdRng::seed_from_u64(1));
        let later = UNIX_EPOCH + Duration::from_millis(2_000);
        let earlier = UNIX_EPOCH + Duration::from_millis(1_000);

        let a = generator.next_id(later).unwrap();
        let b = generator.next_id(earlier).unwrap();
        assert!(b > a);
        assert_eq!(b.timestamp_ms(), 2_000);
    }

    #[test]
    fn test_later_millisecond_sorts_after() {
        // ---
        let generator = CorrelationGenerator::new();
        let a = generator
            .next_id(UNIX_EPOCH + Duration::from_millis(5_000))
            .unwrap();
        let b = generator
            .next_id(UNIX_EPOCH + Duration::from_millis(5_001))
            .unwrap();
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn test_entropy_failure_is_correlation_error() {
        // ---
        let generator = CorrelationGenerator::with_entropy(BrokenEntropy);
        let err = generator.next_id(SystemTime::now()).unwrap_err();
        assert!(matches!(err, RpcError::Correlation(_)));
    }

    #[test]
    fn test_exhausted_random_component_fails() {
        // ---
        let generator = CorrelationGenerator::with_entropy(SaturatedEntropy);
        let now = UNIX_EPOCH + Duration::from_millis(42);

        let first = generator.next_id(now).unwrap();
        assert_eq!(first.random(), RANDOM_MASK);

        let err = generator.next_id(now).unwrap_err();
        assert!(matches!(err, RpcError::Correlation(_)));
    }

    #[test]
    fn test_concurrent_generation_is_unique() {
        // ---
        let generator = std::sync::Arc::new(CorrelationGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || {
                    (0..1000)
                        .map(|_| generator.next_id(SystemTime::now()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn test_reply_topic_format() {
        // ---
        let id = CorrelationId::from_parts(0, 1);
        assert_eq!(
            reply_topic("satellite.register", &id),
            "satellite.register:reply:00000000000000000000000001"
        );
    }
}
