//! Time-ordered 64-bit identifiers
//!
//! Layout: 41 bits of milliseconds since the service epoch (2024-01-01Z),
//! 10 bits of worker id, 12 bits of per-millisecond sequence. Ids are
//! rendered base-10 so they survive JSON and URL paths unchanged, and they
//! sort chronologically both as integers and as equal-issuer streams.

use std::cmp::Ordering;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Milliseconds from the Unix epoch to 2024-01-01T00:00:00Z.
pub const SERVICE_EPOCH_MS: u64 = 1_704_067_200_000;

const WORKER_BITS: u8 = 10;
const SEQUENCE_BITS: u8 = 12;
const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;
const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_SHIFT: u8 = WORKER_BITS + SEQUENCE_BITS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("worker id {0} exceeds the 10-bit range")]
    WorkerIdOutOfRange(u16),

    /// Fatal: the issuer refuses to mint ids until the clock catches up.
    #[error("wall clock moved backwards: last={last_ms}ms now={now_ms}ms")]
    ClockMovedBackwards { last_ms: u64, now_ms: u64 },

    #[error("malformed id: {0}")]
    Malformed(String),
}

/// Decoded components of an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedId {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub worker_id: u16,
    pub sequence: u16,
}

struct GeneratorState {
    last_timestamp_ms: u64,
    sequence: u16,
}

/// Single-issuer id generator. All minting serializes through one lock so
/// ids from the same process are strictly increasing.
pub struct SnowflakeGenerator {
    worker_id: u16,
    state: Mutex<GeneratorState>,
}

impl SnowflakeGenerator {
    pub fn new(worker_id: u16) -> Result<Self, IdError> {
        if worker_id > MAX_WORKER_ID {
            return Err(IdError::WorkerIdOutOfRange(worker_id));
        }
        Ok(Self {
            worker_id,
            state: Mutex::new(GeneratorState {
                last_timestamp_ms: 0,
                sequence: 0,
            }),
        })
    }

    /// Mint the next id as a base-10 string.
    pub fn generate(&self) -> Result<String, IdError> {
        let mut state = self.state.lock().expect("id generator lock poisoned");

        let mut now = current_millis();
        if now < state.last_timestamp_ms {
            return Err(IdError::ClockMovedBackwards {
                last_ms: state.last_timestamp_ms,
                now_ms: now,
            });
        }

        if now == state.last_timestamp_ms {
            if state.sequence == MAX_SEQUENCE {
                // Sequence exhausted for this millisecond; spin to the next.
                while now <= state.last_timestamp_ms {
                    now = current_millis();
                }
                state.sequence = 0;
            } else {
                state.sequence += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp_ms = now;

        let elapsed = now - SERVICE_EPOCH_MS;
        let raw = (elapsed << TIMESTAMP_SHIFT)
            | ((self.worker_id as u64) << SEQUENCE_BITS)
            | state.sequence as u64;
        Ok(raw.to_string())
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }
}

/// Decode an id back into its components.
pub fn parse(id: &str) -> Result<ParsedId, IdError> {
    let raw: u64 = id
        .parse()
        .map_err(|_| IdError::Malformed(id.to_string()))?;
    Ok(ParsedId {
        timestamp_ms: (raw >> TIMESTAMP_SHIFT) + SERVICE_EPOCH_MS,
        worker_id: ((raw >> SEQUENCE_BITS) & MAX_WORKER_ID as u64) as u16,
        sequence: (raw & MAX_SEQUENCE as u64) as u16,
    })
}

/// Total order over ids. Malformed ids sort before well-formed ones so the
/// ordering stays total for untrusted input.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Creation time embedded in an id, as Unix milliseconds.
pub fn timestamp_ms(id: &str) -> Result<u64, IdError> {
    parse(id).map(|p| p.timestamp_ms)
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}
