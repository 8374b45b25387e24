// Numan Thabit 2026
// credit.rs - per-charging-key credit accounting automaton

use serde::{Deserialize, Serialize};

use crate::api::{GrantedUnits, UpdateType};

/// Read-only projections over a tracker's byte buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    AllowedTotal,
    UsedRx,
    UsedTx,
    ReportingRx,
    ReportingTx,
    ReportedRx,
    ReportedTx,
}

/// Reporting state of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditState {
    /// No report has ever been owed.
    Fresh,
    /// A usage report is outstanding towards the peer.
    Reporting,
    /// The last report has been absorbed by a grant.
    Reported,
    /// The peer demanded an immediate report.
    ReauthRequired,
    /// The last grant was final; exhaustion tears flows down instead of
    /// asking for more quota.
    FinalUnit,
    /// The peer refused further quota; reporting is suspended until a
    /// successful grant supersedes.
    Exhausted,
}

/// A usage report drained from a tracker by `get_update` or `terminate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageReport {
    pub update_type: UpdateType,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
}

/// Credit accounting for one (subscriber, charging key) pair.
///
/// Buckets obey: allowed is the monotonic sum of grants, reported never
/// exceeds used, and the reporting buckets are nonzero exactly while a
/// report is outstanding. At most one report is outstanding at a time;
/// termination preempts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCredit {
    allowed_total: u64,
    used_rx: u64,
    used_tx: u64,
    reporting_rx: u64,
    reporting_tx: u64,
    reported_rx: u64,
    reported_tx: u64,
    state: CreditState,
    final_unit: bool,
    deactivation_fired: bool,
    awaiting_grant: bool,
    restore_pending: bool,
    validity_expiry: Option<u64>,
}

impl Default for SessionCredit {
    fn default() -> Self {
        Self {
            allowed_total: 0,
            used_rx: 0,
            used_tx: 0,
            reporting_rx: 0,
            reporting_tx: 0,
            reported_rx: 0,
            reported_tx: 0,
            state: CreditState::Fresh,
            final_unit: false,
            deactivation_fired: false,
            awaiting_grant: false,
            restore_pending: false,
            validity_expiry: None,
        }
    }
}

impl SessionCredit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a successful grant into the allowance.
    ///
    /// Any outstanding reporting volume is acknowledged into the reported
    /// buckets. A final grant arms final-unit handling; a non-final grant
    /// supersedes a previous final-unit or exhausted verdict. When the
    /// tracker was waiting on the peer after a re-auth report or a
    /// final-unit teardown, the grant arms a service-restore latch drained
    /// by the next collection cycle.
    pub fn add_allowance(
        &mut self,
        granted: &GrantedUnits,
        is_final: bool,
        validity_time: Option<u64>,
        now: u64,
    ) {
        self.allowed_total = self.allowed_total.saturating_add(granted.volume());
        self.reported_rx = self.reported_rx.saturating_add(self.reporting_rx);
        self.reported_tx = self.reported_tx.saturating_add(self.reporting_tx);
        self.reporting_rx = 0;
        self.reporting_tx = 0;

        let was_awaiting = std::mem::take(&mut self.awaiting_grant);
        if is_final {
            self.final_unit = true;
            self.state = CreditState::FinalUnit;
        } else {
            if self.final_unit && self.deactivation_fired {
                self.restore_pending = true;
            }
            if was_awaiting {
                self.restore_pending = true;
            }
            self.final_unit = false;
            self.deactivation_fired = false;
            self.state = match self.state {
                CreditState::Fresh => CreditState::Fresh,
                CreditState::ReauthRequired => CreditState::ReauthRequired,
                _ => CreditState::Reported,
            };
        }
        self.validity_expiry = validity_time.map(|secs| now.saturating_add(secs));
    }

    /// Peer refused quota for this key; suspend reporting until a
    /// successful grant supersedes.
    pub fn mark_exhausted(&mut self) {
        self.reporting_rx = 0;
        self.reporting_tx = 0;
        self.state = CreditState::Exhausted;
    }

    /// Folds a usage delta into the used buckets.
    pub fn add_usage(&mut self, rx: u64, tx: u64) {
        self.used_rx = self.used_rx.saturating_add(rx);
        self.used_tx = self.used_tx.saturating_add(tx);
    }

    /// Forces an immediate report. Supersedes an in-flight report: the next
    /// `get_update` re-emits the outstanding delta as re-auth.
    pub fn mark_reauth_required(&mut self) {
        self.reporting_rx = 0;
        self.reporting_tx = 0;
        self.state = CreditState::ReauthRequired;
    }

    /// Drains an eligible report, moving the unreported delta into the
    /// reporting buckets and the tracker into `Reporting`.
    ///
    /// A re-auth demand with nothing to report still answers the peer; the
    /// tracker then goes straight to `Reported` so no zero-volume report
    /// stays outstanding.
    pub fn get_update(&mut self, now: u64) -> Option<UsageReport> {
        let update_type = self.pending_update_type(now)?;
        let bytes_rx = self.used_rx.saturating_sub(self.reported_rx);
        let bytes_tx = self.used_tx.saturating_sub(self.reported_tx);

        if bytes_rx == 0 && bytes_tx == 0 {
            if update_type != UpdateType::ReauthRequired {
                return None;
            }
            self.state = CreditState::Reported;
            self.awaiting_grant = true;
            return Some(UsageReport {
                update_type,
                bytes_rx: 0,
                bytes_tx: 0,
            });
        }

        self.reporting_rx = bytes_rx;
        self.reporting_tx = bytes_tx;
        self.state = CreditState::Reporting;
        match update_type {
            UpdateType::ReauthRequired => self.awaiting_grant = true,
            UpdateType::ValidityTimerExpired => {
                // Re-armed only by a fresh grant carrying a window.
                self.validity_expiry = None;
            }
            _ => {}
        }
        Some(UsageReport {
            update_type,
            bytes_rx,
            bytes_tx,
        })
    }

    /// Closes the tracker, emitting every remaining delta regardless of
    /// reporting state. Terminations preempt in-flight reports.
    pub fn terminate(&mut self) -> UsageReport {
        let bytes_rx = self.used_rx.saturating_sub(self.reported_rx);
        let bytes_tx = self.used_tx.saturating_sub(self.reported_tx);
        self.reported_rx = self.used_rx;
        self.reported_tx = self.used_tx;
        self.reporting_rx = 0;
        self.reporting_tx = 0;
        self.state = CreditState::Exhausted;
        UsageReport {
            update_type: UpdateType::Terminated,
            bytes_rx,
            bytes_tx,
        }
    }

    /// True once a final grant has been consumed in full.
    pub fn is_final_unit_exhausted(&self) -> bool {
        self.final_unit && self.quota_exhausted()
    }

    /// True when final-unit exhaustion has occurred and the flow teardown
    /// has not been issued yet.
    pub fn needs_deactivation(&self) -> bool {
        self.is_final_unit_exhausted() && !self.deactivation_fired
    }

    /// Latches the final-unit teardown so it fires exactly once.
    pub fn mark_deactivation_fired(&mut self) {
        self.deactivation_fired = true;
    }

    /// Drains the service-restore latch armed by an unblocking grant.
    pub fn take_restore_pending(&mut self) -> bool {
        std::mem::take(&mut self.restore_pending)
    }

    pub fn state(&self) -> CreditState {
        self.state
    }

    pub fn bucket(&self, bucket: Bucket) -> u64 {
        match bucket {
            Bucket::AllowedTotal => self.allowed_total,
            Bucket::UsedRx => self.used_rx,
            Bucket::UsedTx => self.used_tx,
            Bucket::ReportingRx => self.reporting_rx,
            Bucket::ReportingTx => self.reporting_tx,
            Bucket::ReportedRx => self.reported_rx,
            Bucket::ReportedTx => self.reported_tx,
        }
    }

    fn quota_exhausted(&self) -> bool {
        self.used_rx.saturating_add(self.used_tx) >= self.allowed_total
    }

    fn validity_expired(&self, now: u64) -> bool {
        matches!(self.validity_expiry, Some(expiry) if now >= expiry)
    }

    fn pending_update_type(&self, now: u64) -> Option<UpdateType> {
        match self.state {
            CreditState::Reporting | CreditState::Exhausted | CreditState::FinalUnit => None,
            CreditState::ReauthRequired => Some(UpdateType::ReauthRequired),
            CreditState::Fresh | CreditState::Reported => {
                if self.validity_expired(now) {
                    Some(UpdateType::ValidityTimerExpired)
                } else if self.quota_exhausted() {
                    Some(UpdateType::QuotaExhausted)
                } else {
                    None
                }
            }
        }
    }
}
