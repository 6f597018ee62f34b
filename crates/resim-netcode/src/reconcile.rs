//! Divergence detection and minimal rewind selection
//!
//! Once per network tick, each kind's latest authoritative snapshot is
//! compared against the locally simulated history at the same
//! (offset-adjusted) frame. Divergent instances become a frame-stamped
//! [`Correction`]; the minimum divergent frame across every kind processed
//! in the tick is the single system-wide rewind target, because the
//! simulation rolls back and replays as one unit, not per instance.

use resim_core::{Frame, InstanceId, KindId, SimModel, Snapshot};
use resim_history::FrameHistory;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// One instance's authoritative data at one frame
///
/// `future_inputs[0]`, when present, is the input for the snapshot's own
/// frame; each following entry is for the next frame.
pub struct AuthorityEntry<M: SimModel> {
    /// Authoritative networked state at the snapshot frame
    pub state: M::NetState,
    /// Not-yet-authoritative inputs the sender already had available
    pub future_inputs: Vec<M::Input>,
}

impl<M: SimModel> Clone for AuthorityEntry<M> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            future_inputs: self.future_inputs.clone(),
        }
    }
}

/// An authoritative snapshot staged for the next reconciliation pass
///
/// `frame` is already mapped into the local frame line.
pub struct AuthoritySnapshot<M: SimModel> {
    /// Local frame the data is authoritative for
    pub frame: Frame,
    /// Per-instance authoritative data
    pub entries: BTreeMap<InstanceId, AuthorityEntry<M>>,
}

impl<M: SimModel> AuthoritySnapshot<M> {
    /// Create an empty snapshot for a frame
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            entries: BTreeMap::new(),
        }
    }
}

/// Authoritative values that must overwrite local history at one frame
///
/// Applied exactly once at the matching frame during (re)simulation, never
/// "as soon as possible".
pub struct Correction<M: SimModel> {
    /// Per-instance corrected values
    pub entries: BTreeMap<InstanceId, CorrectionEntry<M>>,
}

/// One instance's corrected values
pub struct CorrectionEntry<M: SimModel> {
    /// Authoritative state at the stamped frame
    pub state: M::NetState,
    /// Authoritative input; only carried for non-locally-controlled
    /// instances, locally-controlled ones reconcile on state alone
    pub input: Option<M::Input>,
}

impl<M: SimModel> Correction<M> {
    /// Create an empty correction
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Check whether any instance is corrected
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another correction for the same frame; later data wins
    pub fn merge(&mut self, other: Correction<M>) {
        self.entries.extend(other.entries);
    }
}

impl<M: SimModel> Default for Correction<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Why an instance could not be reconciled normally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesyncReason {
    /// The correction's target frame fell outside the retained window
    HistoryEvicted { target: Frame, tail: Frame },
    /// The authoritative frame is ahead of anything simulated locally
    AheadOfLocal { target: Frame, head: Frame },
    /// The authoritative snapshot referenced an instance unknown locally
    UnknownInstance,
}

/// A reportable desynchronization for one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Desync {
    /// Affected instance
    pub id: InstanceId,
    /// Kind the instance belongs to
    pub kind: KindId,
    /// What went wrong
    pub reason: DesyncReason,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// System-wide rewind target, if any kind diverged
    pub rewind: Option<Frame>,
    /// Number of corrected instances across all kinds
    pub corrections: usize,
    /// Instances that could not be reconciled; contained per instance,
    /// never blocking the rest of the pass
    pub desyncs: Vec<Desync>,
}

impl ReconcileReport {
    /// Fold a kind's divergent frame into the system-wide minimum
    pub fn note_rewind(&mut self, frame: Frame) {
        self.rewind = Some(self.rewind.map_or(frame, |f| f.min(frame)));
    }

    /// Check whether the pass found nothing to do
    pub fn is_clean(&self) -> bool {
        self.rewind.is_none() && self.desyncs.is_empty()
    }
}

/// Per-kind result of [`reconcile_kind`]
pub struct KindOutcome<M: SimModel> {
    /// Correction stamped with the authoritative frame, if any divergence
    pub correction: Option<(Frame, Correction<M>)>,
    /// Captured future inputs, keyed frame-then-instance; applied during
    /// replay even for instances that did not cause the rewind
    pub future_inputs: BTreeMap<Frame, BTreeMap<InstanceId, M::Input>>,
}

impl<M: SimModel> Default for KindOutcome<M> {
    fn default() -> Self {
        Self {
            correction: None,
            future_inputs: BTreeMap::new(),
        }
    }
}

/// Compare one kind's authoritative snapshot against local history
///
/// `known` is the set of instances this side has records for;
/// `locally_controlled` is the subset whose input is authored locally.
/// Divergences are collected into a correction stamped at the authoritative
/// frame and folded into `report`; future inputs are captured regardless of
/// divergence.
pub fn reconcile_kind<M: SimModel>(
    kind: KindId,
    history: &FrameHistory<Snapshot<M>>,
    auth: &AuthoritySnapshot<M>,
    known: &BTreeSet<InstanceId>,
    locally_controlled: &BTreeSet<InstanceId>,
    report: &mut ReconcileReport,
) -> KindOutcome<M> {
    let mut outcome = KindOutcome::default();

    let (head, tail) = match (history.head(), history.tail()) {
        (Some(head), Some(tail)) => (head, tail),
        _ => return outcome,
    };

    // A frame outside [tail, head] cannot be rewound to; every referenced
    // instance becomes a reportable desync and the pass moves on.
    if auth.frame < tail || auth.frame > head {
        let reason = if auth.frame < tail {
            DesyncReason::HistoryEvicted {
                target: auth.frame,
                tail,
            }
        } else {
            DesyncReason::AheadOfLocal {
                target: auth.frame,
                head,
            }
        };
        warn!(
            frame = auth.frame,
            %kind,
            instances = auth.entries.len(),
            "authoritative frame outside retained history window"
        );
        for id in auth.entries.keys() {
            report.desyncs.push(Desync {
                id: *id,
                kind,
                reason: reason.clone(),
            });
        }
        return outcome;
    }

    let local = history.read(auth.frame);
    let mut correction = Correction::new();

    for (id, entry) in &auth.entries {
        let locally = locally_controlled.contains(id);

        if !known.contains(id) {
            warn!(%id, %kind, frame = auth.frame, "authoritative data for unknown instance");
            report.desyncs.push(Desync {
                id: *id,
                kind,
                reason: DesyncReason::UnknownInstance,
            });
            continue;
        }

        // Capture future inputs for replay regardless of divergence; the
        // sender's echo of a locally-authored input is not authoritative.
        if !locally {
            for (offset, input) in entry.future_inputs.iter().enumerate() {
                outcome
                    .future_inputs
                    .entry(auth.frame + offset as Frame)
                    .or_default()
                    .insert(*id, input.clone());
            }
        }

        let divergent = match local.and_then(|snapshot| snapshot.get(*id)) {
            Some(recorded) => {
                M::should_reconcile(&recorded.state, &entry.state)
                    || (!locally
                        && entry
                            .future_inputs
                            .first()
                            .map(|input| M::should_reconcile_input(&recorded.input, input))
                            .unwrap_or(false))
            }
            // Known instance with no entry at that frame: it was predicted
            // into existence elsewhere in time, correct it.
            None => true,
        };

        if divergent {
            correction.entries.insert(
                *id,
                CorrectionEntry {
                    state: entry.state.clone(),
                    input: if locally {
                        None
                    } else {
                        entry.future_inputs.first().cloned()
                    },
                },
            );
        }
    }

    if !correction.is_empty() {
        report.corrections += correction.entries.len();
        report.note_rewind(auth.frame);
        outcome.correction = Some((auth.frame, correction));
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use resim_core::{SnapshotEntry, TickContext};

    struct Counter;

    impl SimModel for Counter {
        type Input = i32;
        type NetState = i64;
        type Local = ();
        const NAME: &'static str = "counter";
        fn tick(_: &TickContext, input: &i32, state: &mut i64, _: &mut ()) {
            *state += *input as i64;
        }
    }

    fn history_with(frames: &[(Frame, InstanceId, i32, i64)]) -> FrameHistory<Snapshot<Counter>> {
        let mut history = FrameHistory::new(16);
        history.seed(0, Snapshot::new());
        let max = frames.iter().map(|(f, ..)| *f).max().unwrap_or(0);
        for f in 0..=max {
            if f > 0 {
                history.advance();
            }
            for (_, id, input, state) in frames.iter().filter(|(frame, ..)| *frame == f) {
                history
                    .write(f)
                    .insert(*id, SnapshotEntry::new(*input, *state));
            }
        }
        history
    }

    fn auth(frame: Frame, entries: &[(InstanceId, i64, &[i32])]) -> AuthoritySnapshot<Counter> {
        let mut snapshot = AuthoritySnapshot::new(frame);
        for (id, state, inputs) in entries {
            snapshot.entries.insert(
                *id,
                AuthorityEntry {
                    state: *state,
                    future_inputs: inputs.to_vec(),
                },
            );
        }
        snapshot
    }

    #[test]
    fn test_matching_state_no_rewind() {
        let id = InstanceId(1);
        let history = history_with(&[(5, id, 1, 5)]);
        let auth = auth(5, &[(id, 5, &[])]);
        let known: BTreeSet<_> = [id].into();
        let mut report = ReconcileReport::default();

        let outcome = reconcile_kind(
            KindId(0),
            &history,
            &auth,
            &known,
            &BTreeSet::new(),
            &mut report,
        );
        assert!(outcome.correction.is_none());
        assert!(report.is_clean());
    }

    #[test]
    fn test_divergent_state_produces_correction() {
        let id = InstanceId(1);
        let history = history_with(&[(5, id, 1, 5)]);
        let auth = auth(5, &[(id, 7, &[])]);
        let known: BTreeSet<_> = [id].into();
        let mut report = ReconcileReport::default();

        let outcome = reconcile_kind(
            KindId(0),
            &history,
            &auth,
            &known,
            &BTreeSet::new(),
            &mut report,
        );
        let (frame, correction) = outcome.correction.unwrap();
        assert_eq!(frame, 5);
        assert_eq!(correction.entries[&id].state, 7);
        assert_eq!(report.rewind, Some(5));
        assert_eq!(report.corrections, 1);
    }

    #[test]
    fn test_locally_controlled_ignores_input_divergence() {
        let id = InstanceId(1);
        let history = history_with(&[(5, id, 1, 5)]);
        // State matches, input differs.
        let auth = auth(5, &[(id, 5, &[9])]);
        let known: BTreeSet<_> = [id].into();
        let locally: BTreeSet<_> = [id].into();
        let mut report = ReconcileReport::default();

        let outcome = reconcile_kind(KindId(0), &history, &auth, &known, &locally, &mut report);
        assert!(outcome.correction.is_none());
        // And no captured future input for a locally-authored command.
        assert!(outcome.future_inputs.is_empty());
    }

    #[test]
    fn test_remote_input_divergence_corrects() {
        let id = InstanceId(1);
        let history = history_with(&[(5, id, 1, 5)]);
        let auth = auth(5, &[(id, 5, &[9, 9, 9])]);
        let known: BTreeSet<_> = [id].into();
        let mut report = ReconcileReport::default();

        let outcome = reconcile_kind(
            KindId(0),
            &history,
            &auth,
            &known,
            &BTreeSet::new(),
            &mut report,
        );
        let (_, correction) = outcome.correction.unwrap();
        assert_eq!(correction.entries[&id].input, Some(9));
        // Future inputs captured for frames 5, 6, 7.
        assert_eq!(outcome.future_inputs.len(), 3);
        assert_eq!(outcome.future_inputs[&6][&id], 9);
    }

    #[test]
    fn test_evicted_frame_reports_desync() {
        let id = InstanceId(1);
        let history = history_with(&[(20, id, 1, 20)]);
        let tail = history.tail().unwrap();
        let auth = auth(tail - 1, &[(id, 3, &[])]);
        let known: BTreeSet<_> = [id].into();
        let mut report = ReconcileReport::default();

        let outcome = reconcile_kind(
            KindId(0),
            &history,
            &auth,
            &known,
            &BTreeSet::new(),
            &mut report,
        );
        assert!(outcome.correction.is_none());
        assert_eq!(report.rewind, None);
        assert_eq!(report.desyncs.len(), 1);
        assert!(matches!(
            report.desyncs[0].reason,
            DesyncReason::HistoryEvicted { .. }
        ));
    }

    #[test]
    fn test_unknown_instance_reports_desync() {
        let known_id = InstanceId(1);
        let ghost = InstanceId(99);
        let history = history_with(&[(5, known_id, 1, 5)]);
        let auth = auth(5, &[(ghost, 3, &[])]);
        let known: BTreeSet<_> = [known_id].into();
        let mut report = ReconcileReport::default();

        let outcome = reconcile_kind(
            KindId(0),
            &history,
            &auth,
            &known,
            &BTreeSet::new(),
            &mut report,
        );
        assert!(outcome.correction.is_none());
        assert_eq!(report.desyncs.len(), 1);
        assert_eq!(report.desyncs[0].reason, DesyncReason::UnknownInstance);
    }

    #[test]
    fn test_minimum_rewind_across_kinds() {
        let mut report = ReconcileReport::default();
        report.note_rewind(12);
        report.note_rewind(5);
        report.note_rewind(9);
        assert_eq!(report.rewind, Some(5));
    }
}
