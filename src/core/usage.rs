//! Usage metering and budget enforcement.
//!
//! All cost math lives here, driven by the rate table in config. The running
//! cost only ever grows: each record call adds the unit cost of what was just
//! consumed. `check` is evaluated before new audio is processed and after
//! each completed turn; it never mutates anything except the one-shot
//! warning latch.

use std::sync::Arc;

use crate::config::{SessionLimits, UsageRates};
use crate::core::session::Session;

/// Verdict of a budget/duration check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetCheck {
    Ok,
    /// Crossed the warning fraction for the first time
    Warn { cost: f64 },
    BudgetExceeded { cost: f64, ceiling: f64 },
    DurationExceeded { elapsed_secs: u64 },
}

/// Cost accounting over a session's usage counters
#[derive(Debug, Clone)]
pub struct UsageMeter {
    rates: UsageRates,
    limits: SessionLimits,
}

impl UsageMeter {
    pub fn new(rates: UsageRates, limits: SessionLimits) -> Self {
        Self { rates, limits }
    }

    /// Record seconds of audio sent to STT; returns the updated running cost.
    pub fn record_stt_seconds(&self, session: &Arc<Session>, seconds: f64) -> f64 {
        let unit_cost = seconds / 60.0 * self.rates.stt_per_minute;
        session.with_metrics(|m| {
            m.stt_seconds += seconds;
            m.cost += unit_cost;
            m.cost
        })
    }

    /// Record LLM token consumption; returns the updated running cost.
    pub fn record_llm_tokens(
        &self,
        session: &Arc<Session>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> f64 {
        let unit_cost = input_tokens as f64 / 1e6 * self.rates.llm_input_per_million
            + output_tokens as f64 / 1e6 * self.rates.llm_output_per_million;
        session.with_metrics(|m| {
            m.llm_input_tokens += input_tokens;
            m.llm_output_tokens += output_tokens;
            m.cost += unit_cost;
            m.cost
        })
    }

    /// Record characters synthesized by TTS; returns the updated running cost.
    pub fn record_tts_chars(&self, session: &Arc<Session>, chars: u64) -> f64 {
        let unit_cost = chars as f64 / 1e6 * self.rates.tts_per_million_chars;
        session.with_metrics(|m| {
            m.tts_chars += chars;
            m.cost += unit_cost;
            m.cost
        })
    }

    /// Check hard and soft limits. Hard limits win over the soft warning;
    /// the warning is reported at most once per session.
    pub fn check(&self, session: &Arc<Session>) -> BudgetCheck {
        let cost = session.running_cost();
        if cost >= self.limits.budget_ceiling {
            return BudgetCheck::BudgetExceeded {
                cost,
                ceiling: self.limits.budget_ceiling,
            };
        }

        let elapsed = session.elapsed();
        if elapsed >= self.limits.max_duration {
            return BudgetCheck::DurationExceeded {
                elapsed_secs: elapsed.as_secs(),
            };
        }

        if cost >= self.limits.budget_ceiling * self.limits.budget_warn_fraction
            && session.warn_budget_once()
        {
            return BudgetCheck::Warn { cost };
        }

        BudgetCheck::Ok
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionLimits, UsageRates};
    use std::time::Duration;

    fn meter() -> UsageMeter {
        let rates = UsageRates {
            stt_per_minute: 0.60,
            llm_input_per_million: 1.0,
            llm_output_per_million: 2.0,
            tts_per_million_chars: 10.0,
        };
        UsageMeter::new(rates, SessionLimits::default())
    }

    fn session() -> Arc<Session> {
        Arc::new(Session::new("s".to_string(), 10))
    }

    #[test]
    fn test_stt_cost_is_per_minute_rate() {
        let meter = meter();
        let session = session();
        let cost = meter.record_stt_seconds(&session, 30.0);
        assert!((cost - 0.30).abs() < 1e-9);
    }

    #[test]
    fn test_llm_cost_splits_input_output_rates() {
        let meter = meter();
        let session = session();
        let cost = meter.record_llm_tokens(&session, 1_000_000, 500_000);
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_tts_cost_per_million_chars() {
        let meter = meter();
        let session = session();
        let cost = meter.record_tts_chars(&session, 100_000);
        assert!((cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_running_cost_is_monotonic_sum_of_units() {
        let meter = meter();
        let session = session();
        let mut last = 0.0;
        for _ in 0..5 {
            let cost = meter.record_stt_seconds(&session, 6.0);
            assert!(cost >= last);
            last = cost;
        }
        let after_llm = meter.record_llm_tokens(&session, 1000, 2000);
        assert!(after_llm >= last);
        let metrics = session.metrics_snapshot();
        let expected = metrics.stt_seconds / 60.0 * 0.60
            + metrics.llm_input_tokens as f64 / 1e6 * 1.0
            + metrics.llm_output_tokens as f64 / 1e6 * 2.0
            + metrics.tts_chars as f64 / 1e6 * 10.0;
        assert!((metrics.cost - expected).abs() < 1e-9);
    }

    #[test]
    fn test_check_flags_budget_exceeded() {
        let rates = UsageRates {
            stt_per_minute: 60.0,
            ..UsageRates::default()
        };
        let limits = SessionLimits {
            budget_ceiling: 0.5,
            ..SessionLimits::default()
        };
        let meter = UsageMeter::new(rates, limits);
        let session = session();
        meter.record_stt_seconds(&session, 60.0); // $60
        match meter.check(&session) {
            BudgetCheck::BudgetExceeded { cost, ceiling } => {
                assert!(cost >= ceiling);
            }
            other => panic!("expected BudgetExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_check_warns_exactly_once() {
        let limits = SessionLimits {
            budget_ceiling: 1.0,
            budget_warn_fraction: 0.8,
            ..SessionLimits::default()
        };
        let meter = UsageMeter::new(
            UsageRates {
                stt_per_minute: 60.0,
                ..UsageRates::default()
            },
            limits,
        );
        let session = session();
        meter.record_stt_seconds(&session, 0.85); // $0.85, above 80% of $1
        assert!(matches!(meter.check(&session), BudgetCheck::Warn { .. }));
        // Subsequent checks stay quiet until a hard limit trips
        assert_eq!(meter.check(&session), BudgetCheck::Ok);
        assert_eq!(meter.check(&session), BudgetCheck::Ok);
    }

    #[test]
    fn test_check_flags_duration_exceeded() {
        let limits = SessionLimits {
            max_duration: Duration::from_secs(0),
            ..SessionLimits::default()
        };
        let meter = UsageMeter::new(UsageRates::default(), limits);
        let session = session();
        assert!(matches!(
            meter.check(&session),
            BudgetCheck::DurationExceeded { .. }
        ));
    }
}
