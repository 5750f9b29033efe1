use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, error, info, warn};

use super::{policy::CapturePolicy, raw::Sample};
use crate::{
    db::{
        models::{NewReading, Reading},
        store::{with_timeout, ReadingStore},
    },
    error::{NotifierError, StoreError, ValidationError},
    notifier::Notifier,
};

/// One capture window: a designated instant on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureKey {
    pub date: NaiveDate,
    pub instant: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The sample's wall-clock minute is not a capture instant.
    NotAnInstant,
    /// This window already has (or is writing) its reading.
    AlreadyCaptured(CaptureKey),
}

/// Decision taken by [`SampleGate::admit`].
#[derive(Debug)]
pub enum Admission {
    Skipped(SkipReason),
    Pending(PendingCapture),
}

/// A claimed capture window waiting for its store write.
#[derive(Debug)]
pub struct PendingCapture {
    key: CaptureKey,
    previous: Option<CaptureKey>,
    window: WindowStats,
    reading: NewReading,
}

impl PendingCapture {
    pub fn key(&self) -> CaptureKey {
        self.key
    }
}

#[derive(Debug)]
pub enum GateOutcome {
    Stored(Reading),
    Skipped(SkipReason),
    Rejected(ValidationError),
    Failed(StoreError),
}

/// Running sums of the valid raw samples seen since the last capture.
#[derive(Debug, Default, Clone, Copy)]
struct WindowStats {
    temperature_sum: f64,
    humidity_sum: f64,
    count: u32,
}

impl WindowStats {
    fn push(&mut self, sample: &Sample) {
        self.temperature_sum += sample.temperature;
        self.humidity_sum += sample.humidity;
        self.count += 1;
    }

    fn merge(&mut self, other: WindowStats) {
        self.temperature_sum += other.temperature_sum;
        self.humidity_sum += other.humidity_sum;
        self.count += other.count;
    }

    fn means(&self) -> Option<(f64, f64)> {
        (self.count > 0).then(|| {
            let n = f64::from(self.count);
            (self.temperature_sum / n, self.humidity_sum / n)
        })
    }
}

#[derive(Debug, Default)]
struct GateState {
    /// Last window claimed, whether its write is in flight or done.
    claimed: Option<CaptureKey>,
    window: WindowStats,
}

/// Decides which raw samples become persisted readings.
///
/// The decision state sits behind a mutex held only for the synchronous
/// [`admit`](Self::admit) step, so concurrent callers can never claim the
/// same window twice. The store write happens afterwards in
/// [`commit`](Self::commit), bounded by `store_timeout`.
pub struct SampleGate {
    store: Arc<dyn ReadingStore>,
    notifier: Arc<dyn Notifier>,
    policy: CapturePolicy,
    store_timeout: Duration,
    state: Mutex<GateState>,
}

impl SampleGate {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        notifier: Arc<dyn Notifier>,
        policy: CapturePolicy,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
            store_timeout,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn policy(&self) -> &CapturePolicy {
        &self.policy
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold `sample` into the open window and, if `now` is an uncaptured
    /// capture instant, claim it.
    pub fn admit(&self, sample: &Sample, now: NaiveDateTime) -> Admission {
        let mut state = self.lock_state();
        state.window.push(sample);

        let Some(instant) = self.policy.instant_for(now.time()) else {
            return Admission::Skipped(SkipReason::NotAnInstant);
        };
        let key = CaptureKey {
            date: now.date(),
            instant,
        };
        if state.claimed == Some(key) {
            return Admission::Skipped(SkipReason::AlreadyCaptured(key));
        }

        let window = std::mem::take(&mut state.window);
        let previous = state.claimed.replace(key);
        let means = window.means();

        Admission::Pending(PendingCapture {
            key,
            previous,
            window,
            reading: NewReading {
                date: key.date,
                time_of_day: key.instant,
                temperature: sample.temperature,
                humidity: sample.humidity,
                fan_active: sample.fan_active,
                alarm_active: sample.alarm_active,
                signal: sample.signal,
                avg_temperature: means.map(|(t, _)| t),
                avg_humidity: means.map(|(_, h)| h),
            },
        })
    }

    /// Persist a claimed window, then publish it.
    ///
    /// A failed write is not retried and nothing is published; the window is
    /// handed back so a later sample in the same minute may still land.
    pub async fn commit(&self, pending: PendingCapture) -> GateOutcome {
        let PendingCapture {
            key,
            previous,
            window,
            reading,
        } = pending;

        match with_timeout(self.store_timeout, self.store.insert(reading)).await {
            Ok(reading) => {
                info!(
                    date = %reading.date,
                    time_of_day = %reading.time_of_day,
                    temperature = reading.temperature,
                    humidity = reading.humidity,
                    "Reading captured"
                );
                match self.notifier.publish(&reading) {
                    Ok(()) => {}
                    Err(NotifierError::NoSubscribers) => {
                        debug!(reading_id = %reading.id, "No live listener for captured reading");
                    }
                }
                GateOutcome::Stored(reading)
            }
            Err(e) => {
                match &e {
                    // The row is already there: keep the claim so the rest of
                    // the minute is skipped instead of failing again.
                    StoreError::Duplicate { .. } => {
                        warn!(date = %key.date, instant = %key.instant, error = %e, "Capture window already stored");
                        self.lock_state().window.merge(window);
                    }
                    _ => {
                        error!(date = %key.date, instant = %key.instant, error = %e, "Failed to store reading");
                        self.release(key, previous, window);
                    }
                }
                GateOutcome::Failed(e)
            }
        }
    }

    fn release(&self, key: CaptureKey, previous: Option<CaptureKey>, window: WindowStats) {
        let mut state = self.lock_state();
        if state.claimed == Some(key) {
            state.claimed = previous;
        }
        state.window.merge(window);
    }

    /// Run one validated sample through the gate, waiting for the write.
    pub async fn offer(&self, sample: Sample, now: NaiveDateTime) -> GateOutcome {
        match self.admit(&sample, now) {
            Admission::Skipped(reason) => {
                debug!(at = %now, ?reason, "Raw reading not captured");
                GateOutcome::Skipped(reason)
            }
            Admission::Pending(pending) => self.commit(pending).await,
        }
    }

    /// Decode, validate and offer one feed line. Never panics or errors:
    /// every failure is logged and reported in the outcome.
    pub async fn offer_line(&self, line: &str, now: NaiveDateTime) -> GateOutcome {
        match Sample::from_line(line) {
            Ok(sample) => self.offer(sample, now).await,
            Err(e) => {
                error!(error = %e, "Discarding invalid raw reading");
                GateOutcome::Rejected(e)
            }
        }
    }
}

/// Server wall-clock time, used to key captures.
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
