//! Token usage metering
//!
//! Usage is an explicit accumulator folded per project and flushed to the
//! store after each step, never a process-wide counter.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token usage from a single completion call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    #[serde(default)]
    pub thinking_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens + self.thinking_tokens
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.thinking_tokens += rhs.thinking_tokens;
    }
}

/// Per-project usage accumulator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageMeter {
    pub project_id: Uuid,
    pub total: TokenUsage,
    /// Number of completion calls folded in
    pub steps: u32,
}

impl UsageMeter {
    pub fn new(project_id: Uuid) -> Self {
        Self {
            project_id,
            total: TokenUsage::default(),
            steps: 0,
        }
    }

    pub fn fold(&mut self, usage: TokenUsage) {
        self.total += usage;
        self.steps += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_folds_usage() {
        let mut meter = UsageMeter::new(Uuid::new_v4());
        meter.fold(TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
            thinking_tokens: 10,
        });
        meter.fold(TokenUsage {
            input_tokens: 30,
            output_tokens: 20,
            thinking_tokens: 0,
        });

        assert_eq!(meter.steps, 2);
        assert_eq!(meter.total.input_tokens, 130);
        assert_eq!(meter.total.output_tokens, 70);
        assert_eq!(meter.total.total(), 210);
    }
}
