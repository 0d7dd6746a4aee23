use serde::{Deserialize, Serialize};

/// Lifecycle of an equilibration run.
///
/// `Uninitialized -> Sweeping -> (Converged | MaxIterationsReached)`;
/// the last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplerStatus {
    Uninitialized,
    Sweeping,
    Converged,
    MaxIterationsReached,
}

impl SamplerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SamplerStatus::Converged | SamplerStatus::MaxIterationsReached
        )
    }
}

impl std::fmt::Display for SamplerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SamplerStatus::Uninitialized => "uninitialized",
            SamplerStatus::Sweeping => "sweeping",
            SamplerStatus::Converged => "converged",
            SamplerStatus::MaxIterationsReached => "max iterations reached",
        };
        write!(f, "{}", s)
    }
}

/// What the caller should do after observing a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSignal {
    /// keep sweeping
    Continue,
    /// a record was broken on this sweep
    Record,
    Converged,
    Exhausted,
}

/// Record-breaking convergence monitor.
///
/// A sweep breaks the record when its objective falls below the best value
/// seen so far by more than `epsilon` (relative). Every `wait` consecutive
/// sweeps without a record count as one break; `nbreaks` breaks in a row
/// declare convergence. Running out of `max_sweeps` first ends the run as
/// exhausted.
#[derive(Debug, Clone)]
pub struct RecordBreakMonitor {
    wait: usize,
    nbreaks: usize,
    epsilon: f64,
    max_sweeps: usize,
    best: f64,
    since_record: usize,
    breaks: usize,
    sweeps: usize,
}

impl RecordBreakMonitor {
    pub fn new(wait: usize, nbreaks: usize, epsilon: f64, max_sweeps: usize) -> Self {
        Self {
            wait: wait.max(1),
            nbreaks: nbreaks.max(1),
            epsilon: epsilon.max(0.0),
            max_sweeps,
            best: f64::INFINITY,
            since_record: 0,
            breaks: 0,
            sweeps: 0,
        }
    }

    /// Register the objective before any sweep.
    pub fn start(&mut self, entropy: f64) {
        self.best = entropy;
    }

    pub fn observe(&mut self, entropy: f64) -> MonitorSignal {
        self.sweeps += 1;

        let margin = self.epsilon * self.best.abs().max(1.0);
        let record = !self.best.is_finite() || entropy < self.best - margin;

        if record {
            self.best = entropy;
            self.since_record = 0;
            self.breaks = 0;
        } else {
            self.best = self.best.min(entropy);
            self.since_record += 1;
            if self.since_record >= self.wait {
                self.breaks += 1;
                self.since_record = 0;
            }
        }

        if self.breaks >= self.nbreaks {
            MonitorSignal::Converged
        } else if self.sweeps >= self.max_sweeps {
            MonitorSignal::Exhausted
        } else if record {
            MonitorSignal::Record
        } else {
            MonitorSignal::Continue
        }
    }

    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn breaks(&self) -> usize {
        self.breaks
    }
}
