//! # Admission Gate
//!
//! A per-client fixed-window counter that decides, synchronously and in
//! constant time, whether an inbound request may proceed.
//!
//! ## Algorithm
//!
//! Every distinct [`ClientKey`] owns one [`ClientWindowRecord`]. On each call
//! to [`AdmissionGate::admit_at`]:
//!
//! 1. the record is looked up, or created with `count = 0` and a reset point
//!    one window in the future;
//! 2. if `now` is past the reset point the counter drops to zero and the reset
//!    point moves to `now + window` (windows roll from the moment they are seen
//!    to be stale, not from calendar boundaries);
//! 3. the counter is incremented, even when the request will be denied;
//! 4. a counter above the limit yields [`AdmissionDecision::Denied`] with a
//!    retry hint measured against the reset point already stored.
//!
//! The gate never blocks on I/O and never sleeps. All records sit behind one
//! mutex; the critical section is a map lookup plus a little arithmetic.
//!
//! ## Eviction
//!
//! Records are created lazily and would otherwise live forever. [`AdmissionGate::sweep_at`]
//! drops records whose window expired more than `evict_after_windows` windows
//! ago. Removing such a record never changes a later decision, because a stale
//! record is reset to the same state a fresh one starts in.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

/// Derives the bucket key for a caller from transport metadata.
pub mod client_id;

pub use client_id::{resolve_client_key, ClientKey};

/// Requests allowed per window when nothing else is configured.
pub const DEFAULT_LIMIT: u32 = 20;
/// Window length in milliseconds when nothing else is configured.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;
/// How many full windows a record may stay expired before the sweeper removes it.
pub const DEFAULT_EVICT_AFTER_WINDOWS: u32 = 2;

/// # Admission Configuration
///
/// Fixed at startup; the gate has no hot reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Requests admitted per client and window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Expired windows tolerated before a record becomes eligible for eviction.
    pub evict_after_windows: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window_ms: DEFAULT_WINDOW_MS,
            evict_after_windows: DEFAULT_EVICT_AFTER_WINDOWS,
        }
    }
}

/// Counter state for one client. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientWindowRecord {
    /// Requests counted in the current window, denied ones included.
    pub count: u32,
    /// Moment at which the window expires.
    pub window_reset_at: i64,
}

/// Outcome of one admission check. A denial is a normal result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The request may proceed.
    Admitted {
        /// Requests still available in the current window.
        remaining: u32,
    },
    /// The client exceeded its quota for the current window.
    Denied {
        /// Whole seconds until the window resets, rounded up.
        retry_after_secs: u64,
    },
}

impl AdmissionDecision {
    /// `true` for [`AdmissionDecision::Admitted`].
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Admitted { .. })
    }
}

/// # Admission Gate
///
/// Owns the per-client window records. Construct once at process start and
/// share it (usually through an `Arc`) with the request-handling layer.
#[derive(Debug)]
pub struct AdmissionGate {
    config: AdmissionConfig,
    records: Mutex<HashMap<ClientKey, ClientWindowRecord>>,
}

impl AdmissionGate {
    /// Creates an empty gate.
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configuration the gate was built with.
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Checks and counts one request against the wall clock.
    pub fn admit(&self, client: &ClientKey) -> AdmissionDecision {
        self.admit_at(client, Utc::now().timestamp_millis())
    }

    /// Checks and counts one request at an explicit instant (Unix milliseconds).
    pub fn admit_at(&self, client: &ClientKey, now_ms: i64) -> AdmissionDecision {
        let window = self.window_ms();
        let mut records = self.lock();

        let record = records
            .entry(client.clone())
            .or_insert_with(|| ClientWindowRecord {
                count: 0,
                window_reset_at: now_ms.saturating_add(window),
            });

        if now_ms > record.window_reset_at {
            record.count = 0;
            record.window_reset_at = now_ms.saturating_add(window);
        }

        record.count = record.count.saturating_add(1);

        if record.count > self.config.limit {
            AdmissionDecision::Denied {
                retry_after_secs: retry_after_secs(record.window_reset_at - now_ms),
            }
        } else {
            AdmissionDecision::Admitted {
                remaining: self.config.limit - record.count,
            }
        }
    }

    /// Returns a copy of the record currently held for `client`, if any.
    pub fn record(&self, client: &ClientKey) -> Option<ClientWindowRecord> {
        self.lock().get(client).copied()
    }

    /// Number of clients with a live record.
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    /// Evicts stale records against the wall clock. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now().timestamp_millis())
    }

    /// Evicts every record whose window expired more than
    /// `evict_after_windows` windows before `now_ms`.
    pub fn sweep_at(&self, now_ms: i64) -> usize {
        let grace = self
            .window_ms()
            .saturating_mul(i64::from(self.config.evict_after_windows));
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| record.window_reset_at.saturating_add(grace) >= now_ms);
        let removed = before - records.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = records.len(), "Evicted stale admission records");
        }
        removed
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.config.window_ms).unwrap_or(i64::MAX)
    }

    // A poisoned lock only means another request panicked mid-update; the
    // counters are still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<ClientKey, ClientWindowRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Rounds a remaining duration in milliseconds up to whole seconds, never negative.
fn retry_after_secs(remaining_ms: i64) -> u64 {
    u64::try_from(remaining_ms).map_or(0, |ms| ms.div_ceil(1000))
}
