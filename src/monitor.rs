// Numan Thabit 2026
// monitor.rs - usage monitoring on top of the credit automaton

use serde::{Deserialize, Serialize};

use crate::{
    api::{GrantedUnits, MonitoringLevel},
    credit::{Bucket, SessionCredit},
};

/// Usage accounting for one (subscriber, monitoring key) pair.
///
/// Shares the credit automaton's bucket discipline; monitors have no
/// final-unit concept, their reports are plain byte deltas tagged with the
/// monitoring level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageMonitor {
    level: MonitoringLevel,
    credit: SessionCredit,
}

impl UsageMonitor {
    pub fn new(level: MonitoringLevel) -> Self {
        Self {
            level,
            credit: SessionCredit::new(),
        }
    }

    pub fn level(&self) -> MonitoringLevel {
        self.level
    }

    /// Folds a successful monitoring grant into the allowance.
    pub fn add_allowance(&mut self, granted: &GrantedUnits) {
        self.credit.add_allowance(granted, false, None, 0);
    }

    /// Peer refused this monitor; reporting stops until a successful grant
    /// supersedes.
    pub fn mark_exhausted(&mut self) {
        self.credit.mark_exhausted();
    }

    pub fn add_usage(&mut self, rx: u64, tx: u64) {
        self.credit.add_usage(rx, tx);
    }

    /// Drains an eligible `(rx, tx)` report once the granted allowance is
    /// consumed.
    pub fn get_update(&mut self) -> Option<(u64, u64)> {
        self.credit
            .get_update(0)
            .map(|report| (report.bytes_rx, report.bytes_tx))
    }

    /// Closes the monitor, returning the residual unreported delta.
    pub fn terminate(&mut self) -> (u64, u64) {
        let report = self.credit.terminate();
        (report.bytes_rx, report.bytes_tx)
    }

    pub fn bucket(&self, bucket: Bucket) -> u64 {
        self.credit.bucket(bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_once_allowance_consumed() {
        let mut monitor = UsageMonitor::new(MonitoringLevel::PccRuleLevel);
        monitor.add_allowance(&GrantedUnits::total(1024));
        monitor.add_usage(20, 40);
        assert_eq!(monitor.get_update(), None);

        monitor.add_usage(1004, 984);
        let (rx, tx) = monitor.get_update().expect("allowance consumed");
        assert_eq!((rx, tx), (1024, 1024));
        assert_eq!(monitor.bucket(Bucket::ReportingRx), 1024);

        monitor.add_allowance(&GrantedUnits::total(2048));
        assert_eq!(monitor.bucket(Bucket::ReportingRx), 0);
        assert_eq!(monitor.bucket(Bucket::ReportedRx), 1024);
        assert_eq!(monitor.bucket(Bucket::AllowedTotal), 3072);
    }

    #[test]
    fn terminate_returns_residual_delta() {
        let mut monitor = UsageMonitor::new(MonitoringLevel::SessionLevel);
        monitor.add_allowance(&GrantedUnits::total(4096));
        monitor.add_usage(100, 200);
        assert_eq!(monitor.terminate(), (100, 200));
        assert_eq!(monitor.get_update(), None);
    }
}
