//! Snowflake-style identifier generator.
//!
//! Layout of a generated id (most significant bit first):
//!
//! ```text
//! 0 | 41 bits: ms since epoch | 10 bits: machine id | 12 bits: sequence
//! ```

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use crate::OrderId;

const MACHINE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const TIMESTAMP_BITS: u32 = 41;

const MAX_MACHINE_ID: u16 = (1 << MACHINE_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;
const MAX_ELAPSED_MS: i64 = (1 << TIMESTAMP_BITS) - 1;

const MACHINE_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + MACHINE_BITS;

/// Errors that can occur while generating identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    /// The machine id does not fit in the machine component.
    #[error("Machine id {0} out of range (max {MAX_MACHINE_ID})")]
    MachineIdOutOfRange(u16),

    /// The configured epoch lies in the future.
    #[error("Epoch {0} is in the future")]
    EpochInFuture(DateTime<Utc>),

    /// The wall clock moved backwards past the last issued id.
    #[error("Clock moved backwards by {0}ms")]
    ClockMovedBackwards(i64),

    /// The timestamp component no longer fits in 41 bits.
    #[error("Timestamp component exhausted")]
    Exhausted,
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_ms: i64,
    sequence: i64,
}

/// Monotonic, globally-unique id generator.
///
/// Uniqueness across processes relies on each process being configured with
/// a distinct machine id.
#[derive(Debug)]
pub struct IdGenerator {
    epoch_ms: i64,
    machine_id: u16,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    /// Creates a generator for the given epoch and machine id.
    pub fn new(epoch: DateTime<Utc>, machine_id: u16) -> Result<Self, IdError> {
        if machine_id > MAX_MACHINE_ID {
            return Err(IdError::MachineIdOutOfRange(machine_id));
        }
        if epoch > Utc::now() {
            return Err(IdError::EpochInFuture(epoch));
        }
        Ok(Self {
            epoch_ms: epoch.timestamp_millis(),
            machine_id,
            state: Mutex::new(GeneratorState::default()),
        })
    }

    /// Creates a generator using the default epoch (2024-01-01T00:00:00Z).
    pub fn with_machine_id(machine_id: u16) -> Result<Self, IdError> {
        Self::new(default_epoch(), machine_id)
    }

    /// Returns the configured machine id.
    pub fn machine_id(&self) -> u16 {
        self.machine_id
    }

    /// Generates the next identifier.
    ///
    /// When the 4096 ids of the current millisecond are used up, this waits
    /// for the next millisecond.
    pub fn next_id(&self) -> Result<OrderId, IdError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut now = self.elapsed_ms();
        if now < state.last_ms {
            return Err(IdError::ClockMovedBackwards(state.last_ms - now));
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                while now <= state.last_ms {
                    std::hint::spin_loop();
                    now = self.elapsed_ms();
                }
            }
        } else {
            state.sequence = 0;
        }

        if now > MAX_ELAPSED_MS {
            return Err(IdError::Exhausted);
        }
        state.last_ms = now;

        let id = (now << TIMESTAMP_SHIFT)
            | (i64::from(self.machine_id) << MACHINE_SHIFT)
            | state.sequence;
        Ok(OrderId::new(id))
    }

    /// Extracts the creation instant encoded in an id produced by this generator.
    pub fn timestamp_of(&self, id: OrderId) -> DateTime<Utc> {
        let ms = (id.as_i64() >> TIMESTAMP_SHIFT) + self.epoch_ms;
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }

    /// Extracts the machine component of an id.
    pub fn machine_of(id: OrderId) -> u16 {
        ((id.as_i64() >> MACHINE_SHIFT) & i64::from(MAX_MACHINE_ID)) as u16
    }

    fn elapsed_ms(&self) -> i64 {
        Utc::now().timestamp_millis() - self.epoch_ms
    }
}

fn default_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}
