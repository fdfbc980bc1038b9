//! Adaptive attempt budget. The older the business date, the less the server
//! is expected to still be computing it, so old dates get fewer and shorter
//! attempts.

use std::time::Duration;

use serde::Serialize;

use crate::configs::{BudgetConfig, PollingConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeBucket {
    /// Older than `stale_after_days`.
    Stale,
    /// Between `aging_after_days` and `stale_after_days`, inclusive.
    Aging,
    /// Younger than `aging_after_days` (future dates included).
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub bucket: AgeBucket,
    pub max_attempts: u32,
    /// Pause between attempts that did not resolve the page.
    pub wait: Duration,
    /// Wall-clock limit for the whole page, independent of attempts.
    pub ceiling: Duration,
}

impl PollBudget {
    fn from_config(bucket: AgeBucket, cfg: &BudgetConfig) -> Self {
        Self {
            bucket,
            max_attempts: cfg.max_attempts.max(1),
            wait: Duration::from_millis(cfg.wait_ms),
            ceiling: Duration::from_millis(cfg.ceiling_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetPolicy {
    stale_after_days: i64,
    aging_after_days: i64,
    stale: PollBudget,
    aging: PollBudget,
    fresh: PollBudget,
}

impl BudgetPolicy {
    pub fn from_config(cfg: &PollingConfig) -> Self {
        Self {
            stale_after_days: cfg.stale_after_days,
            aging_after_days: cfg.aging_after_days,
            stale: PollBudget::from_config(AgeBucket::Stale, &cfg.stale),
            aging: PollBudget::from_config(AgeBucket::Aging, &cfg.aging),
            fresh: PollBudget::from_config(AgeBucket::Fresh, &cfg.fresh),
        }
    }

    pub fn bucket_for(&self, age_days: i64) -> AgeBucket {
        if age_days > self.stale_after_days {
            AgeBucket::Stale
        } else if age_days >= self.aging_after_days {
            AgeBucket::Aging
        } else {
            AgeBucket::Fresh
        }
    }

    pub fn budget_for(&self, age_days: i64) -> PollBudget {
        match self.bucket_for(age_days) {
            AgeBucket::Stale => self.stale,
            AgeBucket::Aging => self.aging,
            AgeBucket::Fresh => self.fresh,
        }
    }
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}
