use heapless::Vec;
use tokio::time::Instant;

use crate::fo_fdc::ShotCall;
use crate::types::TargetNumber;

/// One volley schedules three reports; room for a second volley's worth.
pub const MAX_SCHEDULED_REPORTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledReport {
    pub target_number: TargetNumber,
    pub report: ShotCall,
    pub due: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_scheduled: u32,
    pub total_reported: u32,
    pub total_cancelled: u32,
}

/// Fire reports waiting for their moment, earliest first.
#[derive(Debug, Default)]
pub struct ReportScheduler {
    reports: Vec<ScheduledReport, MAX_SCHEDULED_REPORTS>,
    stats: SchedulerStats,
}

impl ReportScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, report: ScheduledReport) -> Result<(), &'static str> {
        if self.reports.is_full() {
            return Err("report schedule full");
        }
        // Equal due times keep their insertion order
        let position = self
            .reports
            .iter()
            .position(|scheduled| scheduled.due > report.due)
            .unwrap_or(self.reports.len());
        self.reports
            .insert(position, report)
            .map_err(|_| "report schedule full")?;
        self.stats.total_scheduled += 1;
        Ok(())
    }

    /// Removes and returns every report due at `now`, in due order.
    pub fn due_reports(&mut self, now: Instant) -> Vec<ScheduledReport, MAX_SCHEDULED_REPORTS> {
        let ready = self.reports.iter().take_while(|scheduled| scheduled.due <= now).count();
        let mut due = Vec::new();
        for _ in 0..ready {
            let report = self.reports.remove(0);
            // Capacities match, so this never overflows
            let _ = due.push(report);
        }
        self.stats.total_reported += ready as u32;
        due
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.reports.first().map(|scheduled| scheduled.due)
    }

    /// Drops everything still pending and returns how many reports that was.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.reports.len();
        self.reports.clear();
        self.stats.total_cancelled += cancelled as u32;
        cancelled
    }

    pub fn pending(&self) -> &[ScheduledReport] {
        &self.reports
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn report(call: ShotCall, due: Instant) -> ScheduledReport {
        ScheduledReport {
            target_number: TargetNumber::new("AN2001").unwrap(),
            report: call,
            due,
        }
    }

    #[test]
    fn test_reports_come_out_in_due_order() {
        let start = Instant::now();
        let mut scheduler = ReportScheduler::new();
        scheduler
            .schedule(report(ShotCall::RoundsComplete, start + Duration::from_secs(3)))
            .unwrap();
        scheduler
            .schedule(report(ShotCall::Shot, start + Duration::from_secs(1)))
            .unwrap();
        scheduler
            .schedule(report(ShotCall::Splash, start + Duration::from_secs(2)))
            .unwrap();

        assert_eq!(scheduler.next_due(), Some(start + Duration::from_secs(1)));
        assert!(scheduler.due_reports(start).is_empty());

        let due = scheduler.due_reports(start + Duration::from_secs(2));
        let calls: std::vec::Vec<_> = due.iter().map(|scheduled| scheduled.report).collect();
        assert_eq!(calls, [ShotCall::Shot, ShotCall::Splash]);
        assert_eq!(scheduler.pending().len(), 1);
        assert_eq!(scheduler.stats().total_reported, 2);
    }

    #[test]
    fn test_equal_due_times_keep_insertion_order() {
        let at = Instant::now();
        let mut scheduler = ReportScheduler::new();
        for call in [ShotCall::Shot, ShotCall::Splash, ShotCall::RoundsComplete] {
            scheduler.schedule(report(call, at)).unwrap();
        }
        let calls: std::vec::Vec<_> = scheduler.due_reports(at).iter().map(|s| s.report).collect();
        assert_eq!(calls, [ShotCall::Shot, ShotCall::Splash, ShotCall::RoundsComplete]);
    }

    #[test]
    fn test_full_schedule_is_rejected() {
        let at = Instant::now();
        let mut scheduler = ReportScheduler::new();
        for _ in 0..MAX_SCHEDULED_REPORTS {
            scheduler.schedule(report(ShotCall::Shot, at)).unwrap();
        }
        assert!(scheduler.schedule(report(ShotCall::Shot, at)).is_err());
        assert_eq!(scheduler.stats().total_scheduled, MAX_SCHEDULED_REPORTS as u32);
    }

    #[test]
    fn test_cancel_all() {
        let at = Instant::now();
        let mut scheduler = ReportScheduler::new();
        scheduler.schedule(report(ShotCall::Shot, at)).unwrap();
        scheduler.schedule(report(ShotCall::Splash, at)).unwrap();

        assert_eq!(scheduler.cancel_all(), 2);
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next_due(), None);
        assert_eq!(scheduler.stats().total_cancelled, 2);
    }
}
