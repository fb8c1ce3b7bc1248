//! Versioned row storage.

use super::TxnId;

/// One committed version. `amount == None` is a delete marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Version {
    pub(crate) seq: u64,
    pub(crate) amount: Option<f64>,
}

/// An uncommitted write. At most one exists per row because writers hold the
/// exclusive row lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PendingWrite {
    pub(crate) txn: TxnId,
    pub(crate) amount: Option<f64>,
}

/// Which committed state a read observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadView {
    /// Include other transactions' uncommitted writes.
    Dirty,
    /// Latest committed version.
    Latest,
    /// Latest version committed at or before the sequence number.
    Snapshot(u64),
}

/// All versions of one row plus its in-flight write.
#[derive(Debug, Clone, Default)]
pub(crate) struct VersionedRow {
    versions: Vec<Version>,
    pending: Option<PendingWrite>,
}

impl VersionedRow {
    pub(crate) fn committed(seq: u64, amount: Option<f64>) -> Self {
        Self {
            versions: vec![Version { seq, amount }],
            pending: None,
        }
    }

    pub(crate) fn latest(&self) -> Option<f64> {
        self.versions.last().and_then(|v| v.amount)
    }

    pub(crate) fn as_of(&self, snapshot: u64) -> Option<f64> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.seq <= snapshot)
            .and_then(|v| v.amount)
    }

    /// Returns what `txn` sees under `view`.
    pub(crate) fn visible_to(&self, txn: TxnId, view: ReadView) -> Option<f64> {
        if let Some(pending) = self.pending {
            if pending.txn == txn || view == ReadView::Dirty {
                return pending.amount;
            }
        }
        match view {
            ReadView::Dirty | ReadView::Latest => self.latest(),
            ReadView::Snapshot(seq) => self.as_of(seq),
        }
    }

    pub(crate) fn stage(&mut self, txn: TxnId, amount: Option<f64>) {
        self.pending = Some(PendingWrite { txn, amount });
    }

    /// Publishes `txn`'s pending write at `seq`. Returns true if one existed.
    pub(crate) fn publish(&mut self, txn: TxnId, seq: u64) -> bool {
        match self.pending {
            Some(pending) if pending.txn == txn => {
                self.versions.push(Version {
                    seq,
                    amount: pending.amount,
                });
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Drops versions that no read at or after `horizon` can observe.
    ///
    /// The newest version at or before `horizon` is kept along with every
    /// later one.
    pub(crate) fn prune(&mut self, horizon: u64) {
        if let Some(keep_from) = self.versions.iter().rposition(|v| v.seq <= horizon) {
            self.versions.drain(..keep_from);
        }
    }

    #[cfg(test)]
    pub(crate) fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// Drops `txn`'s pending write.
    pub(crate) fn discard(&mut self, txn: TxnId) {
        if self.pending.is_some_and(|p| p.txn == txn) {
            self.pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: TxnId = TxnId(1);
    const B: TxnId = TxnId(2);

    #[test]
    fn pending_write_visibility_by_view() {
        let mut row = VersionedRow::committed(1, Some(1000.0));
        row.stage(A, Some(3000.0));

        assert_eq!(row.visible_to(A, ReadView::Latest), Some(3000.0));
        assert_eq!(row.visible_to(B, ReadView::Dirty), Some(3000.0));
        assert_eq!(row.visible_to(B, ReadView::Latest), Some(1000.0));
        assert_eq!(row.visible_to(B, ReadView::Snapshot(1)), Some(1000.0));
    }

    #[test]
    fn snapshot_ignores_later_commits() {
        let mut row = VersionedRow::committed(1, Some(1000.0));
        row.stage(A, Some(1500.0));
        assert!(row.publish(A, 2));

        assert_eq!(row.as_of(1), Some(1000.0));
        assert_eq!(row.as_of(2), Some(1500.0));
        assert_eq!(row.latest(), Some(1500.0));
    }

    #[test]
    fn delete_marker_hides_row() {
        let mut row = VersionedRow::committed(1, Some(1000.0));
        row.stage(A, None);
        assert_eq!(row.visible_to(B, ReadView::Dirty), None);
        row.publish(A, 2);
        assert_eq!(row.latest(), None);
        assert_eq!(row.as_of(1), Some(1000.0));
    }

    #[test]
    fn prune_keeps_what_the_horizon_can_see() {
        let mut row = VersionedRow::committed(1, Some(1000.0));
        for seq in 2..=5 {
            row.stage(A, Some(seq as f64 * 100.0));
            row.publish(A, seq);
        }
        row.prune(3);
        assert_eq!(row.version_count(), 3);
        assert_eq!(row.as_of(3), Some(300.0));
        assert_eq!(row.latest(), Some(500.0));

        row.prune(0);
        assert_eq!(row.version_count(), 3);
        row.prune(9);
        assert_eq!(row.version_count(), 1);
        assert_eq!(row.latest(), Some(500.0));
    }

    #[test]
    fn discard_only_affects_owner() {
        let mut row = VersionedRow::committed(1, Some(1000.0));
        row.stage(A, Some(2000.0));
        row.discard(B);
        assert_eq!(row.visible_to(B, ReadView::Dirty), Some(2000.0));
        row.discard(A);
        assert_eq!(row.visible_to(B, ReadView::Dirty), Some(1000.0));
        assert!(!row.publish(A, 2));
    }
}
