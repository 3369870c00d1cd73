//! Exponential moving average used by the delay estimators.

/// Low-pass coefficient shared by every delay/period estimator.
pub const ESTIM_LOWPASS_ALPHA: f64 = 0.7;

/// First-order low-pass filter (EMA).
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    alpha: f64,
    output: Option<f64>,
}

impl LowPassFilter {
    /// Filter with no initial output (first sample passes through).
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            output: None,
        }
    }

    /// Filter seeded with an initial output.
    pub fn with_initial(alpha: f64, initial: f64) -> Self {
        Self {
            alpha,
            output: Some(initial),
        }
    }

    /// Feed a sample, returning the new output.
    pub fn filter(&mut self, x: f64) -> f64 {
        let y = match self.output {
            Some(prev) => self.alpha * prev + (1.0 - self.alpha) * x,
            None => x,
        };
        self.output = Some(y);
        y
    }

    /// Last output, or 0.0 before any sample.
    pub fn last(&self) -> f64 {
        self.output.unwrap_or(0.0)
    }
}
