use std::fmt;

/// How a single catalog entry ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnalysisOutcome {
    Generated,
    Missing,
    Failed,
}

impl AnalysisOutcome {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Missing => "missing",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AnalysisOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting progress through a batch catalog.
pub trait BatchProgressObserver {
    fn on_batch_start(&mut self, total_analyses: usize) {
        let _ = total_analyses;
    }
    fn on_analysis_start(&mut self, code: &str, name: &str) {
        let _ = (code, name);
    }
    fn on_analysis_finish(&mut self, code: &str, outcome: AnalysisOutcome) {
        let _ = (code, outcome);
    }
    fn on_batch_finish(&mut self) {}
}

#[derive(Default)]
pub struct NoopBatchProgress;

impl BatchProgressObserver for NoopBatchProgress {}
