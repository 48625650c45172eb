/*!
The aggregate custody signal engine.

Custody acknowledgements accumulate per (custodian, reason, success)
triple. The first id of a round starts an expiration timer; the timer
carries only the round's pacs id, so a stale timer firing after a
size-triggered emission resolves to a lookup miss instead of a
dangling reference. When either the timer fires or the encoded payload
reaches the per-destination size threshold, one administrative bundle
is emitted to the custodian and the accumulation resets in place under
a fresh pacs id.
*/

use super::pending::PendingAcs;
use super::signal;
use drift_bpv7::bundle::Bundle;
use drift_bpv7::creation_timestamp::CreationTimestamp;
use drift_bpv7::eid::Eid;
use drift_bpv7::status_report::CustodyReason;
use drift_timers::{Timer, TimerSystem};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lifetime of an emitted custody signal bundle.
const ACS_LIFETIME_MILLIS: u64 = 86_400 * 1000;

/// Per-destination accumulation parameters.
#[derive(Debug, Clone, Copy)]
pub struct AcsParams {
    /// How long to accumulate before the expiration timer fires.
    pub delay: Duration,
    /// Emit early once the encoded payload reaches this size.
    pub size_limit: usize,
}

impl Default for AcsParams {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            size_limit: 120,
        }
    }
}

/// Where emitted signal bundles go: the router queues them for
/// forwarding like any other locally-originated bundle.
pub trait AcsSink: Send + Sync {
    fn deliver(&self, bundle: Bundle, payload: Vec<u8>);
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct AcsKey {
    custodian: Eid,
    reason: CustodyReason,
    succeeded: bool,
}

struct Inner {
    local_eid: Eid,
    timers: Arc<TimerSystem>,
    sink: Arc<dyn AcsSink>,
    default_params: AcsParams,

    params: Mutex<HashMap<Eid, AcsParams>>,
    pending: Mutex<HashMap<AcsKey, PendingAcs>>,
    /// pacs id to key, for expiration timer resolution.
    by_id: Mutex<HashMap<u32, AcsKey>>,

    next_pacs_id: AtomicU32,
    /// Highest custody id issued by this node; the parse-side ceiling.
    last_custody_id: AtomicU64,
}

struct AcsExpirationTimer {
    inner: Weak<Inner>,
    pacs_id: u32,
}

impl Timer for AcsExpirationTimer {
    fn fire(&self, _now: Instant) {
        if let Some(inner) = self.inner.upgrade() {
            AcsEngine::expire(&inner, self.pacs_id);
        }
    }
}

pub struct AcsEngine {
    inner: Arc<Inner>,
}

impl AcsEngine {
    pub fn new(
        local_eid: Eid,
        timers: Arc<TimerSystem>,
        sink: Arc<dyn AcsSink>,
        default_params: AcsParams,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                local_eid,
                timers,
                sink,
                default_params,
                params: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                by_id: Mutex::new(HashMap::new()),
                next_pacs_id: AtomicU32::new(1),
                last_custody_id: AtomicU64::new(0),
            }),
        }
    }

    /// Issues the next custody id for a bundle this node takes custody
    /// of. Id zero is never issued.
    pub fn issue_custody_id(&self) -> u64 {
        self.inner.last_custody_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The highest custody id issued so far.
    pub fn last_custody_id(&self) -> u64 {
        self.inner.last_custody_id.load(Ordering::SeqCst)
    }

    /// Sets the accumulation parameters for one custodian. Pending
    /// accumulations pick the change up on their next emission.
    pub fn set_params(&self, custodian: &Eid, params: AcsParams) {
        self.inner.params.lock().insert(custodian.clone(), params);
        let mut pending = self.inner.pending.lock();
        for pacs in pending.values_mut() {
            if pacs.custodian == *custodian {
                pacs.params_revision += 1;
            }
        }
    }

    fn params_for(&self, custodian: &Eid) -> AcsParams {
        self.inner
            .params
            .lock()
            .get(custodian)
            .copied()
            .unwrap_or(self.inner.default_params)
    }

    /// Records one custody acknowledgement. Starts the expiration
    /// timer on a fresh round and emits immediately once the encoded
    /// payload reaches the destination's size threshold.
    pub fn add_custody_ack(
        &self,
        custodian: &Eid,
        succeeded: bool,
        reason: CustodyReason,
        custody_id: u64,
    ) {
        if custodian.is_null() {
            warn!("Custody acknowledgement for the null custodian dropped");
            return;
        }
        let params = self.params_for(custodian);
        let key = AcsKey {
            custodian: custodian.clone(),
            reason,
            succeeded,
        };

        let mut pending = self.inner.pending.lock();
        let pacs = pending.entry(key.clone()).or_insert_with(|| {
            let pacs_id = self.inner.next_pacs_id.fetch_add(1, Ordering::SeqCst);
            self.inner.by_id.lock().insert(pacs_id, key.clone());
            PendingAcs::new(pacs_id, custodian.clone(), succeeded, reason)
        });

        let fresh_round = pacs.is_empty();
        if !pacs.add_custody_id(custody_id) {
            debug!("Custody id {custody_id} already acknowledged towards {custodian}");
            return;
        }

        if pacs.payload_length() >= params.size_limit {
            Self::emit(&self.inner, pacs);
        } else if fresh_round {
            self.inner.timers.schedule_in(
                params.delay,
                Arc::new(AcsExpirationTimer {
                    inner: Arc::downgrade(&self.inner),
                    pacs_id: pacs.pacs_id,
                }),
            );
        }
    }

    /// Number of non-empty accumulations awaiting emission.
    pub fn pending_count(&self) -> usize {
        self.inner
            .pending
            .lock()
            .values()
            .filter(|p| !p.is_empty())
            .count()
    }

    // Expiration timer entry: resolve the pacs id and emit if it still
    // names a live round
    fn expire(inner: &Arc<Inner>, pacs_id: u32) {
        let key = match inner.by_id.lock().get(&pacs_id) {
            Some(key) => key.clone(),
            None => {
                debug!("Stale ACS expiration timer for pacs id {pacs_id}");
                return;
            }
        };
        let mut pending = inner.pending.lock();
        let Some(pacs) = pending.get_mut(&key) else {
            return;
        };
        if pacs.pacs_id != pacs_id || pacs.is_empty() {
            // A size-triggered emission beat the timer
            debug!("Stale ACS expiration timer for pacs id {pacs_id}");
            return;
        }
        Self::emit(inner, pacs);
    }

    // Builds and delivers the signal bundle, then resets the
    // accumulation in place under a fresh pacs id
    fn emit(inner: &Arc<Inner>, pacs: &mut PendingAcs) {
        let payload = signal::encode_acs(pacs);

        let mut bundle = Bundle::new();
        bundle.flags.is_admin_record = true;
        bundle.flags.do_not_fragment = true;
        bundle.source = inner.local_eid.clone();
        bundle.destination = pacs.custodian.clone();
        bundle.report_to = Eid::Null;
        bundle.creation = CreationTimestamp::now();
        bundle.lifetime_millis = ACS_LIFETIME_MILLIS;
        bundle.payload.length = payload.len() as u64;

        debug!(
            "Emitting ACS to {} covering {} custody ids ({} bytes)",
            pacs.custodian,
            pacs.num_custody_ids(),
            payload.len()
        );
        inner.sink.deliver(bundle, payload);

        // Re-arm for the next round; the old pacs id now resolves to
        // nothing, so its timer expires into a no-op
        let old_id = pacs.pacs_id;
        let new_id = inner.next_pacs_id.fetch_add(1, Ordering::SeqCst);
        let key = AcsKey {
            custodian: pacs.custodian.clone(),
            reason: pacs.reason,
            succeeded: pacs.succeeded,
        };
        let mut by_id = inner.by_id.lock();
        by_id.remove(&old_id);
        by_id.insert(new_id, key);
        pacs.reset(new_id);
    }
}
