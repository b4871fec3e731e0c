//! Estimate-vs-actual performance tracking.

use crate::optimizer::plan::SearchPlan;
use log::warn;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Comparison of a plan's estimated cost against what execution measured.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceReport {
    pub estimated: f64,
    pub actual: f64,
    /// `|actual - estimated| / estimated`.
    pub relative_error: f64,
    /// Relative error exceeded the configured tolerance.
    pub misestimated: bool,
}

/// Bounded ring of recent reports plus the misestimate flagging logic.
pub(crate) struct PerformanceMonitor {
    tolerance: f64,
    capacity: usize,
    history: Mutex<VecDeque<PerformanceReport>>,
}

impl PerformanceMonitor {
    pub fn new(tolerance: f64, capacity: usize) -> Self {
        Self {
            tolerance,
            capacity: capacity.max(1),
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn analyze(&self, plan: &SearchPlan, actual_cost: f64) -> PerformanceReport {
        let estimated = plan.total_cost();
        let relative_error = (actual_cost - estimated).abs() / estimated.max(f64::EPSILON);
        let misestimated = relative_error > self.tolerance;
        if misestimated {
            warn!(
                "cost misestimate: estimated {estimated:.1}, actual {actual_cost:.1} \
                 (relative error {relative_error:.2})"
            );
        }

        let report = PerformanceReport {
            estimated,
            actual: actual_cost,
            relative_error,
            misestimated,
        };

        let mut history = self.history.lock().unwrap();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(report);
        report
    }

    pub fn recent(&self) -> Vec<PerformanceReport> {
        self.history.lock().unwrap().iter().copied().collect()
    }
}
