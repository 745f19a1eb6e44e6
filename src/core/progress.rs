//! 批量进度聚合
//!
//! ProgressTracker 只由调度器的聚合任务持有，按收到的 ProgressEvent 更新计数，
//! 吞吐与 ETA 由已完成数与耗时推算，仅用于展示，不参与调度。

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::react::{ProgressEvent, ProgressKind};

/// 某一时刻的进度快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub finished: usize,
    pub successful: usize,
    pub failed: usize,
    /// 已收到的迭代事件总数
    pub iterations: u64,
    pub elapsed: Duration,
    /// 每秒完成案例数
    pub throughput: f64,
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.finished as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    started: Instant,
    successful: usize,
    failed: usize,
    iterations: u64,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            started: Instant::now(),
            successful: 0,
            failed: 0,
            iterations: 0,
        }
    }

    /// 记录一条事件；返回是否为终态事件
    pub fn record(&mut self, ev: &ProgressEvent) -> bool {
        match ev.kind {
            ProgressKind::Iteration => self.iterations += 1,
            ProgressKind::Completed => self.successful += 1,
            ProgressKind::Failed | ProgressKind::Error => self.failed += 1,
        }
        ev.kind.is_terminal()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.started.elapsed();
        let finished = self.successful + self.failed;
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 { finished as f64 / secs } else { 0.0 };
        let remaining = self.total.saturating_sub(finished);
        let eta = if remaining == 0 {
            Some(Duration::ZERO)
        } else if throughput > 0.0 {
            Some(Duration::from_secs_f64(remaining as f64 / throughput))
        } else {
            None
        };
        ProgressSnapshot {
            total: self.total,
            finished,
            successful: self.successful,
            failed: self.failed,
            iterations: self.iterations,
            elapsed,
            throughput,
            eta,
        }
    }
}

/// 进度展示接口；所有回调都在单个聚合任务中串行调用
pub trait ProgressReporter: Send + Sync {
    fn on_event(&self, event: &ProgressEvent, snapshot: &ProgressSnapshot);

    fn on_finish(&self, _snapshot: &ProgressSnapshot) {}
}

/// 默认实现：终态事件写 tracing 日志
#[derive(Debug, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn on_event(&self, event: &ProgressEvent, snapshot: &ProgressSnapshot) {
        if !event.kind.is_terminal() {
            return;
        }
        tracing::info!(
            target: "triage::summary",
            case_id = %event.case_id,
            kind = ?event.kind,
            finished = snapshot.finished,
            total = snapshot.total,
            successful = snapshot.successful,
            failed = snapshot.failed,
            throughput = %format!("{:.2}/s", snapshot.throughput),
            eta_secs = snapshot.eta.map(|d| d.as_secs()),
            "case finished"
        );
    }

    fn on_finish(&self, snapshot: &ProgressSnapshot) {
        tracing::info!(
            target: "triage::summary",
            total = snapshot.total,
            successful = snapshot.successful,
            failed = snapshot.failed,
            elapsed_secs = snapshot.elapsed.as_secs_f64(),
            "batch finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts_terminal_events() {
        let mut t = ProgressTracker::new(3);
        assert!(!t.record(&ProgressEvent::new("a", ProgressKind::Iteration, 1, 5)));
        assert!(t.record(&ProgressEvent::new("a", ProgressKind::Completed, 1, 5)));
        assert!(t.record(&ProgressEvent::new("b", ProgressKind::Error, 4, 5)));
        let snap = t.snapshot();
        assert_eq!((snap.finished, snap.successful, snap.failed), (2, 1, 1));
        assert_eq!(snap.iterations, 1);
        assert!((snap.percent() - 66.666).abs() < 0.1);
    }

    #[test]
    fn test_eta_zero_when_done() {
        let mut t = ProgressTracker::new(1);
        t.record(&ProgressEvent::new("a", ProgressKind::Failed, 1, 1));
        assert_eq!(t.snapshot().eta, Some(Duration::ZERO));
        assert_eq!(ProgressTracker::new(2).snapshot().eta, None);
    }
}
