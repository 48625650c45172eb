/*!
The per-destination custody acknowledgement accumulator.

Each acknowledged custody id lands in an ordered map keyed by the left
edge of its run; adjacent runs coalesce on insert. Every entry tracks
the SDNV-encoded size of its `(diff_to_prev_right, length_of_fill)`
pair so the encoded payload length is always current: two fixed header
bytes plus the sum of the per-entry SDNV lengths.
*/

use drift_bpv7::eid::Eid;
use drift_bpv7::status_report::CustodyReason;
use drift_codec::sdnv;
use std::collections::BTreeMap;

/// One run of consecutive acknowledged custody ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcsEntry {
    /// Difference between this run's left edge and the right edge of
    /// the previous run (the left edge itself for the first run).
    pub diff_to_prev_right: u64,
    /// Number of consecutive ids in the run.
    pub length_of_fill: u64,
    /// SDNV length of the encoded entry (diff plus fill).
    pub sdnv_length: usize,
}

#[derive(Debug)]
pub struct PendingAcs {
    /// Identifies this accumulation round, so a stale expiration timer
    /// firing after an emission is a no-op.
    pub pacs_id: u32,
    /// The custodian this signal will be sent to.
    pub custodian: Eid,
    pub succeeded: bool,
    pub reason: CustodyReason,

    /// Runs keyed by left edge.
    entries: BTreeMap<u64, AcsEntry>,
    /// Current encoded payload length.
    payload_length: usize,
    /// Custody ids covered by the runs.
    num_custody_ids: u64,

    /// Persisted in the durable store.
    pub in_datastore: bool,
    /// Bumped when the per-destination parameters change.
    pub params_revision: u32,
}

impl PendingAcs {
    pub fn new(pacs_id: u32, custodian: Eid, succeeded: bool, reason: CustodyReason) -> Self {
        Self {
            pacs_id,
            custodian,
            succeeded,
            reason,
            entries: BTreeMap::new(),
            payload_length: 2,
            num_custody_ids: 0,
            in_datastore: false,
            params_revision: 0,
        }
    }

    /// Inserts a custody id, coalescing with adjacent runs. Returns
    /// false if the id was already covered.
    pub fn add_custody_id(&mut self, id: u64) -> bool {
        // Already inside an existing run?
        if let Some((left, entry)) = self.entries.range(..=id).next_back()
            && id - left < entry.length_of_fill
        {
            return false;
        }

        let joins_prev = self
            .entries
            .range(..id)
            .next_back()
            .map(|(left, entry)| left + entry.length_of_fill == id)
            .unwrap_or(false);
        let succ_len = id
            .checked_add(1)
            .and_then(|next| self.entries.get(&next).map(|e| e.length_of_fill));

        match (joins_prev, succ_len) {
            (true, Some(succ_len)) => {
                // Bridges two runs into one
                let (&prev_left, _) = self.entries.range(..id).next_back().expect("run vanished");
                self.entries.remove(&(id + 1));
                let prev = self.entries.get_mut(&prev_left).expect("run vanished");
                prev.length_of_fill += 1 + succ_len;
            }
            (true, None) => {
                let (&prev_left, _) = self.entries.range(..id).next_back().expect("run vanished");
                self.entries.get_mut(&prev_left).expect("run vanished").length_of_fill += 1;
            }
            (false, Some(succ_len)) => {
                // Becomes the new left edge of the following run
                self.entries.remove(&(id + 1));
                self.entries.insert(
                    id,
                    AcsEntry {
                        diff_to_prev_right: 0,
                        length_of_fill: succ_len + 1,
                        sdnv_length: 0,
                    },
                );
            }
            (false, None) => {
                self.entries.insert(
                    id,
                    AcsEntry {
                        diff_to_prev_right: 0,
                        length_of_fill: 1,
                        sdnv_length: 0,
                    },
                );
            }
        }

        self.num_custody_ids += 1;
        self.reindex();
        true
    }

    // Rebuild the delta encoding bookkeeping after a mutation
    fn reindex(&mut self) {
        let mut right_edge = 0u64;
        let mut payload_length = 2usize;
        for (left, entry) in self.entries.iter_mut() {
            entry.diff_to_prev_right = left - right_edge;
            entry.sdnv_length =
                sdnv::encoded_len(entry.diff_to_prev_right) + sdnv::encoded_len(entry.length_of_fill);
            payload_length += entry.sdnv_length;
            right_edge = left + (entry.length_of_fill - 1);
        }
        self.payload_length = payload_length;
    }

    /// The encoded payload length: two header bytes plus the SDNV
    /// lengths of every entry.
    pub fn payload_length(&self) -> usize {
        self.payload_length
    }

    pub fn num_custody_ids(&self) -> u64 {
        self.num_custody_ids
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The runs in left-edge order.
    pub fn entries(&self) -> &BTreeMap<u64, AcsEntry> {
        &self.entries
    }

    /// Clears the accumulation for re-use after an emission, under a
    /// fresh pacs id.
    pub fn reset(&mut self, pacs_id: u32) {
        self.pacs_id = pacs_id;
        self.entries.clear();
        self.payload_length = 2;
        self.num_custody_ids = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacs() -> PendingAcs {
        PendingAcs::new(1, Eid::Null, true, CustodyReason::NoAdditionalInformation)
    }

    #[test]
    fn random_order_coalesces_to_one_run() {
        // ids 1..K inserted in a scrambled order end as the single
        // entry (left=1, fill=K)
        let k = 100u64;
        let mut ids: Vec<u64> = (1..=k).collect();
        // Deterministic scramble
        for i in 0..ids.len() {
            let j = (i * 7919 + 13) % ids.len();
            ids.swap(i, j);
        }

        let mut pacs = pacs();
        for id in ids {
            assert!(pacs.add_custody_id(id));
        }

        assert_eq!(pacs.entries().len(), 1);
        let entry = pacs.entries().get(&1).unwrap();
        assert_eq!(entry.diff_to_prev_right, 1);
        assert_eq!(entry.length_of_fill, k);
        assert_eq!(pacs.num_custody_ids(), k);
        assert_eq!(
            pacs.payload_length(),
            2 + sdnv::encoded_len(1) + sdnv::encoded_len(k)
        );
    }

    #[test]
    fn duplicates_rejected() {
        let mut pacs = pacs();
        assert!(pacs.add_custody_id(5));
        assert!(!pacs.add_custody_id(5));
        assert!(pacs.add_custody_id(6));
        assert!(!pacs.add_custody_id(5));
        assert_eq!(pacs.num_custody_ids(), 2);
    }

    #[test]
    fn gap_keeps_runs_separate() {
        let mut pacs = pacs();
        pacs.add_custody_id(1);
        pacs.add_custody_id(2);
        pacs.add_custody_id(10);

        let entries = pacs.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.get(&1).unwrap().length_of_fill, 2);
        let second = entries.get(&10).unwrap();
        assert_eq!(second.length_of_fill, 1);
        // diff from right edge of (1,2) == 2 to left edge 10
        assert_eq!(second.diff_to_prev_right, 8);
    }

    #[test]
    fn bridging_merges_runs() {
        let mut pacs = pacs();
        pacs.add_custody_id(1);
        pacs.add_custody_id(3);
        assert_eq!(pacs.entries().len(), 2);
        pacs.add_custody_id(2);
        assert_eq!(pacs.entries().len(), 1);
        assert_eq!(pacs.entries().get(&1).unwrap().length_of_fill, 3);
    }

    #[test]
    fn prepend_moves_left_edge() {
        let mut pacs = pacs();
        pacs.add_custody_id(5);
        pacs.add_custody_id(4);
        assert_eq!(pacs.entries().len(), 1);
        let entry = pacs.entries().get(&4).unwrap();
        assert_eq!(entry.length_of_fill, 2);
        assert_eq!(entry.diff_to_prev_right, 4);
    }

    #[test]
    fn payload_length_tracks_entries() {
        let mut pacs = pacs();
        assert_eq!(pacs.payload_length(), 2);

        pacs.add_custody_id(200);
        // diff 200 needs 2 SDNV bytes, fill 1 needs 1
        assert_eq!(pacs.payload_length(), 2 + 2 + 1);

        pacs.add_custody_id(1);
        // (1,1) then diff 199 from right edge 1 to 200
        assert_eq!(
            pacs.payload_length(),
            2 + (1 + 1) + (sdnv::encoded_len(199) + 1)
        );
    }

    #[test]
    fn reset_clears_for_reuse() {
        let mut pacs = pacs();
        pacs.add_custody_id(1);
        pacs.reset(2);
        assert_eq!(pacs.pacs_id, 2);
        assert!(pacs.is_empty());
        assert_eq!(pacs.payload_length(), 2);
        assert_eq!(pacs.num_custody_ids(), 0);
    }
}
