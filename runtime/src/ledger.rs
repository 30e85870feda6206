//! Request ledger: per-channel bookkeeping of in-flight requests.
//!
//! The ledger maps each channel to a slot holding its live
//! [`InFlightRecord`]s and, under `SendLatest`, at most one
//! [`PendingSupersede`] record.
//!
//! # Concurrency
//!
//! Every slot sits behind its own mutex; the channel map is only locked long
//! enough to find (or create) a slot. Operations on different channels never
//! block each other. No operation suspends, so "count live records, then
//! admit" is atomic for a channel when done through [`RequestLedger::admit`].
//!
//! # Liveness
//!
//! A record stops being *live* the moment its cancel handle is canceled, but
//! it stays in the slot until its own dispatch settles and retires it. Record
//! ids, not parameters, identify records for removal.

use chrono::{DateTime, Utc};
use inflight_core::environment::{Clock, SystemClock};
use inflight_core::{CancelHandle, ChannelName, LedgerError, OverlapAction, OverlapPolicy, Value};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Identifier assigned to a record at admission.
pub type RecordId = u64;

/// One admitted, currently executing request.
#[derive(Debug, Clone)]
pub struct InFlightRecord {
    /// Ledger-assigned identity
    pub id: RecordId,
    /// Channel the request belongs to
    pub channel: ChannelName,
    /// Trigger event, kept for notifications and re-dispatch
    pub trigger: Value,
    /// Resolved parameters
    pub params: Value,
    /// URLs to call (several for fan-out)
    pub urls: Vec<String>,
    /// Cancellation capability tied to the transport call
    pub cancel: CancelHandle,
    /// When the record was admitted
    pub started_at: DateTime<Utc>,
}

impl InFlightRecord {
    /// Whether the record still counts toward admission decisions
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.cancel.is_canceled()
    }

    /// Whether `params` and `urls` describe the same request as this record
    #[must_use]
    pub fn same_request(&self, params: &Value, urls: &[String]) -> bool {
        self.params == *params && self.urls == urls
    }
}

/// The newest trigger received while a `SendLatest` channel was busy.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSupersede {
    /// Channel the trigger belongs to
    pub channel: ChannelName,
    /// Trigger event
    pub trigger: Value,
    /// Resolved parameters
    pub params: Value,
    /// URLs to call
    pub urls: Vec<String>,
}

/// Request submitted for admission.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Trigger event
    pub trigger: Value,
    /// Resolved parameters
    pub params: Value,
    /// URLs to call
    pub urls: Vec<String>,
    /// Cancel handle for the transport call
    pub cancel: CancelHandle,
}

/// Result of [`RequestLedger::admit`].
#[derive(Debug, Clone)]
pub enum Admission {
    /// A record was registered; `canceled` live records were canceled first
    Admitted {
        /// The new record
        record: InFlightRecord,
        /// How many live records were canceled to make room
        canceled: usize,
    },
    /// Saved as the pending supersede record
    Stored {
        /// Whether an earlier pending record was overwritten
        replaced: bool,
    },
    /// Dropped
    Skipped,
}

/// How a record's dispatch ended, for [`RequestLedger::settle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Succeeded or failed for a non-cancellation reason
    Finished,
    /// Settled as canceled
    Canceled,
}

/// Result of [`RequestLedger::settle`].
#[derive(Debug, Clone)]
pub enum Settlement {
    /// The record was removed
    Retired,
    /// A differing pending supersede record replaced the settled record
    Promoted(InFlightRecord),
}

#[derive(Debug, Default)]
struct ChannelSlot {
    records: SmallVec<[InFlightRecord; 1]>,
    pending: Option<PendingSupersede>,
}

impl ChannelSlot {
    fn live_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_live()).count()
    }

    fn cancel_live(&self, target: Option<RecordId>, reason: Option<&str>) -> usize {
        let mut canceled = 0;
        for record in self.records.iter().filter(|r| r.is_live()) {
            if target.is_some_and(|id| id != record.id) {
                continue;
            }
            match reason {
                Some(reason) => record.cancel.cancel_with_reason(reason),
                None => record.cancel.cancel(),
            }
            canceled += 1;
        }
        canceled
    }

    fn remove(&mut self, id: RecordId) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        self.records.len() != before
    }
}

type Slot = Arc<Mutex<ChannelSlot>>;

fn lock(slot: &Slot) -> MutexGuard<'_, ChannelSlot> {
    // A panic while holding a slot cannot leave it half-updated: every
    // mutation is a single push, retain or assignment.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide table of in-flight requests, keyed by channel.
///
/// Constructed explicitly and shared through `Arc`; there is no global instance.
pub struct RequestLedger {
    channels: RwLock<HashMap<ChannelName, Slot>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl RequestLedger {
    /// Create an empty ledger using the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty ledger stamping records with `clock`
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    fn slot(&self, channel: &ChannelName) -> Slot {
        {
            let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = channels.get(channel) {
                return Arc::clone(slot);
            }
        }
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(channels.entry(channel.clone()).or_default())
    }

    fn existing_slot(&self, channel: &ChannelName) -> Option<Slot> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map(Arc::clone)
    }

    fn new_record(
        &self,
        channel: &ChannelName,
        trigger: Value,
        params: Value,
        urls: Vec<String>,
        cancel: CancelHandle,
    ) -> InFlightRecord {
        InFlightRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            channel: channel.clone(),
            trigger,
            params,
            urls,
            cancel,
            started_at: self.clock.now(),
        }
    }

    /// Consult the resolver and apply its decision in one atomic step.
    ///
    /// - `Admit`: registers a record.
    /// - `CancelThenAdmit`: cancels every live record, then registers a record.
    /// - `StoreAndSkip`: overwrites the pending supersede record.
    /// - `Skip`: changes nothing.
    pub fn admit(
        &self,
        channel: &ChannelName,
        policy: OverlapPolicy,
        submission: Submission,
    ) -> Admission {
        let slot = self.slot(channel);
        let mut slot = lock(&slot);

        let Submission {
            trigger,
            params,
            urls,
            cancel,
        } = submission;

        match policy.decide(slot.live_count()) {
            OverlapAction::Admit => {
                let record = self.new_record(channel, trigger, params, urls, cancel);
                slot.records.push(record.clone());
                Admission::Admitted {
                    record,
                    canceled: 0,
                }
            },
            OverlapAction::CancelThenAdmit => {
                let canceled = slot.cancel_live(None, None);
                let record = self.new_record(channel, trigger, params, urls, cancel);
                slot.records.push(record.clone());
                Admission::Admitted { record, canceled }
            },
            OverlapAction::StoreAndSkip => {
                let replaced = slot
                    .pending
                    .replace(PendingSupersede {
                        channel: channel.clone(),
                        trigger,
                        params,
                        urls,
                    })
                    .is_some();
                Admission::Stored { replaced }
            },
            OverlapAction::Skip => Admission::Skipped,
        }
    }

    /// Settle a record's dispatch and run the supersede check atomically.
    ///
    /// A `Finished` record whose channel holds a pending supersede record with
    /// *different* parameters or URLs is replaced in place by that record
    /// (fresh id, fresh cancel handle from `next_cancel`). Otherwise the
    /// record is removed and any pending record is discarded. While another
    /// record on the channel is still live, the pending record is left for
    /// that record to settle.
    pub fn settle(
        &self,
        channel: &ChannelName,
        id: RecordId,
        completion: Completion,
        next_cancel: impl FnOnce() -> CancelHandle,
    ) -> Settlement {
        let Some(slot) = self.existing_slot(channel) else {
            return Settlement::Retired;
        };
        let mut slot = lock(&slot);

        let Some(position) = slot.records.iter().position(|r| r.id == id) else {
            // Already cleared by reset_all
            return Settlement::Retired;
        };

        // A pending record belongs to whichever record is still live
        if slot.records.iter().any(|r| r.id != id && r.is_live()) {
            slot.records.remove(position);
            return Settlement::Retired;
        }

        let pending = slot.pending.take();
        match (completion, pending) {
            (Completion::Finished, Some(pending))
                if !slot.records[position].same_request(&pending.params, &pending.urls) =>
            {
                let record = self.new_record(
                    channel,
                    pending.trigger,
                    pending.params,
                    pending.urls,
                    next_cancel(),
                );
                slot.records[position] = record.clone();
                Settlement::Promoted(record)
            },
            _ => {
                slot.records.remove(position);
                Settlement::Retired
            },
        }
    }

    /// Insert a record without consulting the resolver.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateEntry`] if the channel already has a
    /// live record and `policy` does not allow concurrent records.
    pub fn create_entry(
        &self,
        channel: &ChannelName,
        policy: OverlapPolicy,
        trigger: Value,
        params: Value,
        urls: Vec<String>,
        cancel: CancelHandle,
    ) -> Result<InFlightRecord, LedgerError> {
        let slot = self.slot(channel);
        let mut slot = lock(&slot);

        if !policy.allows_concurrent() && slot.live_count() > 0 {
            return Err(LedgerError::DuplicateEntry {
                channel: channel.clone(),
            });
        }

        let record = self.new_record(channel, trigger, params, urls, cancel);
        slot.records.push(record.clone());
        Ok(record)
    }

    /// Remove a record. Returns whether it was present.
    pub fn complete_entry(&self, channel: &ChannelName, id: RecordId) -> bool {
        self.existing_slot(channel)
            .is_some_and(|slot| lock(&slot).remove(id))
    }

    /// Cancel live records on `channel`: the one with id `target`, or every
    /// live record when `target` is `None`.
    ///
    /// Returns whether anything was canceled. Records stay in the ledger
    /// until their dispatch settles.
    pub fn cancel_entry(
        &self,
        channel: &ChannelName,
        target: Option<RecordId>,
        reason: Option<&str>,
    ) -> bool {
        self.existing_slot(channel)
            .is_some_and(|slot| lock(&slot).cancel_live(target, reason) > 0)
    }

    /// Overwrite the channel's pending supersede record.
    ///
    /// Returns whether an earlier record was replaced.
    pub fn save_supersede(
        &self,
        channel: &ChannelName,
        trigger: Value,
        params: Value,
        urls: Vec<String>,
    ) -> bool {
        let slot = self.slot(channel);
        let mut slot = lock(&slot);
        slot.pending
            .replace(PendingSupersede {
                channel: channel.clone(),
                trigger,
                params,
                urls,
            })
            .is_some()
    }

    /// Remove and return the channel's pending supersede record.
    pub fn take_supersede(&self, channel: &ChannelName) -> Option<PendingSupersede> {
        self.existing_slot(channel)
            .and_then(|slot| lock(&slot).pending.take())
    }

    /// The channel's pending supersede record, without removing it.
    #[must_use]
    pub fn pending_supersede(&self, channel: &ChannelName) -> Option<PendingSupersede> {
        self.existing_slot(channel)
            .and_then(|slot| lock(&slot).pending.clone())
    }

    /// Number of live records on the channel.
    #[must_use]
    pub fn live_count(&self, channel: &ChannelName) -> usize {
        self.existing_slot(channel)
            .map_or(0, |slot| lock(&slot).live_count())
    }

    /// Snapshot of the channel's live records.
    #[must_use]
    pub fn live_records(&self, channel: &ChannelName) -> Vec<InFlightRecord> {
        self.existing_slot(channel).map_or_else(Vec::new, |slot| {
            lock(&slot)
                .records
                .iter()
                .filter(|r| r.is_live())
                .cloned()
                .collect()
        })
    }

    /// Whether no channel holds any record or pending supersede record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .all(|slot| {
                let slot = lock(slot);
                slot.records.is_empty() && slot.pending.is_none()
            })
    }

    /// Cancel every live record and clear all bookkeeping.
    ///
    /// Only for (re)configuration and test isolation. Returns how many live
    /// records were canceled.
    pub fn reset_all(&self) -> usize {
        let slots: Vec<Slot> = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, slot)| slot)
            .collect();

        slots
            .iter()
            .map(|slot| {
                let mut slot = lock(slot);
                let canceled = slot.cancel_live(None, Some("reset"));
                slot.records.clear();
                slot.pending = None;
                canceled
            })
            .sum()
    }
}

impl Default for RequestLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self
            .channels
            .read()
            .map(|c| c.len())
            .unwrap_or_default();
        f.debug_struct("RequestLedger")
            .field("channels", &channels)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
