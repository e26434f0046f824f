use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::state_machine::{WorkflowResult, WorkflowStatus, WorkflowType};

/// Process-wide counters over every finished product run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_processed: u64,
    pub confirmation_count: u64,
    pub determination_count: u64,
    pub hybrid_count: u64,
    /// Runs that ended needing a human, errors included.
    pub manual_review_count: u64,
    pub error_count: u64,
    pub auto_approved_count: u64,
    /// `(total - manual_review) / total`, 0 before the first run.
    pub success_rate: f64,
    pub average_confidence: f64,
}

impl Statistics {
    fn record(&mut self, strategy: WorkflowType, result: &WorkflowResult) {
        self.total_processed += 1;
        match strategy {
            WorkflowType::Confirmation => self.confirmation_count += 1,
            WorkflowType::Determination => self.determination_count += 1,
            WorkflowType::Hybrid => self.hybrid_count += 1,
        }
        if result.requires_review {
            self.manual_review_count += 1;
        }
        if result.status == WorkflowStatus::Error {
            self.error_count += 1;
        }
        if result.final_result.auto_approved {
            self.auto_approved_count += 1;
        }

        let n = self.total_processed as f64;
        self.success_rate = (self.total_processed - self.manual_review_count) as f64 / n;
        self.average_confidence += (result.confidence - self.average_confidence) / n;
    }
}

/// Single-writer accumulator shared by every concurrent run.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    inner: Mutex<Statistics>,
}

impl StatsRecorder {
    /// Counts a run under the strategy that was selected for it, which for a
    /// hybrid run that confirmed early differs from the result's type.
    pub fn record(&self, strategy: WorkflowType, result: &WorkflowResult) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(strategy, result);
    }

    pub fn snapshot(&self) -> Statistics {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Statistics::default();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::product::ProductData;

    fn result(status: WorkflowStatus, confidence: f64) -> WorkflowResult {
        let mut r = WorkflowResult::failure(
            WorkflowType::Confirmation,
            &ProductData::new("X"),
            "t",
            "unused",
            Duration::ZERO,
        );
        r.status = status;
        r.confidence = confidence;
        r.requires_review = !status.is_success();
        r
    }

    #[test]
    fn empty_statistics() {
        let stats = StatsRecorder::default().snapshot();
        assert_eq!(stats.total_processed, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_confidence, 0.0);
    }

    #[test]
    fn counts_and_rates() {
        let recorder = StatsRecorder::default();
        recorder.record(WorkflowType::Confirmation, &result(WorkflowStatus::Confirmed, 0.9));
        recorder.record(WorkflowType::Determination, &result(WorkflowStatus::ManualReview, 0.5));
        recorder.record(WorkflowType::Hybrid, &result(WorkflowStatus::Error, 0.0));
        recorder.record(WorkflowType::Determination, &result(WorkflowStatus::Determined, 0.8));

        let stats = recorder.snapshot();
        assert_eq!(stats.total_processed, 4);
        assert_eq!(stats.confirmation_count, 1);
        assert_eq!(stats.determination_count, 2);
        assert_eq!(stats.hybrid_count, 1);
        assert_eq!(stats.manual_review_count, 2);
        assert_eq!(stats.error_count, 1);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
        assert!((stats.average_confidence - 0.55).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_everything() {
        let recorder = StatsRecorder::default();
        recorder.record(WorkflowType::Confirmation, &result(WorkflowStatus::Confirmed, 0.9));
        recorder.reset();
        assert_eq!(recorder.snapshot(), Statistics::default());
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let recorder = Arc::new(StatsRecorder::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        recorder.record(
                            WorkflowType::Determination,
                            &result(WorkflowStatus::Determined, 0.5),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = recorder.snapshot();
        assert_eq!(stats.total_processed, 2000);
        assert_eq!(stats.determination_count, 2000);
        assert!((stats.average_confidence - 0.5).abs() < 1e-9);
    }
}
