//! Per-key daily quota accounting
//!
//! Usage is an append-only log; the daily count is derived from it on every
//! check. "Today" is the calendar date of the process's local time zone.
//!
//! The check and the later usage write are joined through a
//! [`QuotaReservation`]: checking a key takes that key's lock, counts logged
//! usage plus reservations still in flight, and only then hands out a slot.
//! This keeps concurrent fetches sharing one tracker from overshooting the
//! limit. Trackers in different processes pointed at the same database file
//! do not see each other's in-flight reservations and can still overshoot by
//! the number of concurrent processes minus one.

use crate::error::Result;
use crate::store::UsageStore;
use chrono::{Local, NaiveDate};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Source of the current calendar date
pub trait Clock: Send + Sync + fmt::Debug {
    /// Today's date
    fn today(&self) -> NaiveDate;
}

/// Local-time-zone clock
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Settable clock for tests and replays
#[derive(Debug, Clone)]
pub struct FixedClock {
    date: Arc<Mutex<NaiveDate>>,
}

impl FixedClock {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: Arc::new(Mutex::new(date)),
        }
    }

    /// Move the clock to another date; clones observe the change
    pub fn set(&self, date: NaiveDate) {
        *self.date.lock().unwrap_or_else(PoisonError::into_inner) = date;
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.date.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Slot = Arc<Mutex<u32>>;

fn lock_slot(slot: &Slot) -> MutexGuard<'_, u32> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Daily usage tracker for the keys of one provider
#[derive(Debug)]
pub struct KeyQuotaTracker {
    store: Arc<UsageStore>,
    daily_limit: u32,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashMap<String, Slot>>,
}

impl KeyQuotaTracker {
    /// Create a tracker using the local clock
    pub fn new(store: Arc<UsageStore>, daily_limit: u32) -> Self {
        Self::with_clock(store, daily_limit, Arc::new(LocalClock))
    }

    /// Create a tracker with a custom clock
    pub fn with_clock(store: Arc<UsageStore>, daily_limit: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            daily_limit,
            clock,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Limit applied to every key of the provider
    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Current date according to the tracker's clock
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Number of recorded calls made with `api_key` today
    pub fn usage_today(&self, api_key: &str) -> Result<u32> {
        self.store.count_usage(api_key, self.today())
    }

    /// Append one usage record for `api_key` dated today
    pub fn record_usage(&self, api_key: &str, url: &str, raw_response: &str) -> Result<()> {
        self.store
            .insert_usage(api_key, self.today(), url, raw_response)
    }

    /// Reservations handed out for `api_key` that are neither committed nor dropped
    pub fn in_flight(&self, api_key: &str) -> u32 {
        let slot = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(api_key)
            .cloned();
        slot.map_or(0, |slot| *lock_slot(&slot))
    }

    fn slot(&self, api_key: &str) -> Slot {
        let mut slots = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(api_key.to_string()).or_default())
    }

    /// Claim one call of today's quota for `api_key`
    ///
    /// Returns `None` when logged usage plus in-flight reservations already
    /// reach the daily limit. Nothing is written to the store here.
    pub fn try_reserve(&self, api_key: &str) -> Result<Option<QuotaReservation<'_>>> {
        let slot = self.slot(api_key);
        let mut in_flight = lock_slot(&slot);

        let date = self.today();
        let used = self.store.count_usage(api_key, date)?;
        let claimed = used.saturating_add(*in_flight);

        tracing::debug!(
            provider = %self.store.provider(),
            used,
            in_flight = *in_flight,
            daily_limit = self.daily_limit,
            "checked key quota"
        );

        if claimed >= self.daily_limit {
            return Ok(None);
        }

        *in_flight += 1;
        drop(in_flight);

        Ok(Some(QuotaReservation {
            tracker: self,
            api_key: api_key.to_string(),
            date,
            slot,
            released: false,
        }))
    }
}

/// One claimed call against a key's daily quota
///
/// Commit it once the response is known good; dropping it instead gives the
/// slot back without recording usage.
#[derive(Debug)]
pub struct QuotaReservation<'a> {
    tracker: &'a KeyQuotaTracker,
    api_key: String,
    date: NaiveDate,
    slot: Slot,
    released: bool,
}

impl QuotaReservation<'_> {
    /// Key this reservation was made for
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Record the usage and release the slot
    ///
    /// The usage row carries the date the quota was checked against.
    pub fn commit(mut self, url: &str, raw_response: &str) -> Result<()> {
        let mut in_flight = lock_slot(&self.slot);
        let result = self
            .tracker
            .store
            .insert_usage(&self.api_key, self.date, url, raw_response);
        *in_flight = in_flight.saturating_sub(1);
        self.released = true;
        result
    }
}

impl Drop for QuotaReservation<'_> {
    fn drop(&mut self) {
        if !self.released {
            let mut in_flight = lock_slot(&self.slot);
            *in_flight = in_flight.saturating_sub(1);
        }
    }
}
