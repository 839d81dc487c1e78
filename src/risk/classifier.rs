//! Rule-table risk classifier.
//!
//! Rules are evaluated top-down and the first match wins, so precedence is
//! simply the order of [`default_rules`]. Critical is only reachable through
//! a hard trigger, never by crossing the high reduction threshold.

use crate::models::{RiskAssessment, RiskLevel, RollingStats};
use crate::stats::mean;
use serde::{Deserialize, Serialize};

/// Zero streak (business days) that forces Critical.
pub const CRITICAL_ZERO_STREAK: usize = 7;

/// Drop-50 points (out of the last three) that force Critical.
pub const CRITICAL_DROP50_STREAK: usize = 3;

/// Preceding days must average below this fraction of MM7 to count as a recovery.
pub const RECOVERY_FACTOR: f64 = 0.9;

/// Reduction fractions for the graded levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub moderate: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            moderate: 0.30,
            high: 0.60,
        }
    }
}

/// MM7 of each geography context the entity belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContextMeans {
    pub country: Option<f64>,
    pub state: Option<f64>,
    pub city: Option<f64>,
}

impl ContextMeans {
    /// Contexts usable as a reference: present, finite and positive.
    fn usable(&self) -> impl Iterator<Item = f64> {
        [self.country, self.state, self.city]
            .into_iter()
            .flatten()
            .filter(|mm7| mm7.is_finite() && *mm7 > 0.0)
    }
}

/// Inputs the rules look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskSignals {
    pub today: f64,
    pub max_reduction: f64,
    pub absolute_zero: bool,
    pub zero_streak: usize,
    pub drop50_streak: usize,
}

impl RiskSignals {
    pub fn from_stats(stats: &RollingStats, contexts: &ContextMeans) -> Self {
        let mut max_reduction: f64 = 0.0;
        let mut any_positive_context = false;

        for mm7 in contexts.usable() {
            any_positive_context = true;
            let reduction = (1.0 - stats.today / mm7).max(0.0);
            max_reduction = max_reduction.max(reduction);
        }

        Self {
            today: stats.today,
            max_reduction,
            absolute_zero: any_positive_context && stats.today == 0.0,
            zero_streak: stats.zero_streak,
            drop50_streak: stats.drop50_streak,
        }
    }
}

/// One entry of the rule table.
#[derive(Clone)]
pub struct RiskRule {
    pub name: &'static str,
    pub level: RiskLevel,
    pub applies: fn(&RiskSignals, &RiskThresholds) -> bool,
}

impl std::fmt::Debug for RiskRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskRule")
            .field("name", &self.name)
            .field("level", &self.level)
            .finish()
    }
}

/// The rule table, most severe first.
pub fn default_rules() -> Vec<RiskRule> {
    vec![
        RiskRule {
            name: "absolute_zero",
            level: RiskLevel::Critical,
            applies: |s, _| s.absolute_zero,
        },
        RiskRule {
            name: "total_reduction",
            level: RiskLevel::Critical,
            applies: |s, _| s.max_reduction >= 1.0,
        },
        RiskRule {
            name: "zero_streak",
            level: RiskLevel::Critical,
            applies: |s, _| s.zero_streak >= CRITICAL_ZERO_STREAK,
        },
        RiskRule {
            name: "drop50_streak",
            level: RiskLevel::Critical,
            applies: |s, _| s.drop50_streak >= CRITICAL_DROP50_STREAK,
        },
        RiskRule {
            name: "high_reduction",
            level: RiskLevel::High,
            applies: |s, t| s.max_reduction >= t.high,
        },
        RiskRule {
            name: "moderate_reduction",
            level: RiskLevel::Moderate,
            applies: |s, t| s.max_reduction >= t.moderate,
        },
        RiskRule {
            name: "any_reduction",
            level: RiskLevel::Attention,
            applies: |s, _| s.max_reduction > 0.0,
        },
    ]
}

/// Classifies daily risk from rolling stats and context means.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    thresholds: RiskThresholds,
    rules: Vec<RiskRule>,
}

impl RiskClassifier {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self {
            thresholds,
            rules: default_rules(),
        }
    }

    /// First matching rule, or `None` when the entity is Normal.
    pub fn matching_rule(&self, signals: &RiskSignals) -> Option<&RiskRule> {
        self.rules
            .iter()
            .find(|rule| (rule.applies)(signals, &self.thresholds))
    }

    pub fn classify(&self, stats: &RollingStats, contexts: &ContextMeans) -> RiskAssessment {
        let signals = RiskSignals::from_stats(stats, contexts);
        let (level, rule) = match self.matching_rule(&signals) {
            Some(rule) => (rule.level, rule.name),
            None => (RiskLevel::Normal, "no_reduction"),
        };

        RiskAssessment {
            level,
            max_reduction: signals.max_reduction,
            absolute_zero: signals.absolute_zero,
            recovery: is_recovering(stats),
            rule: rule.to_string(),
        }
    }
}

/// Today back at or above MM7 after three days clearly below it.
pub fn is_recovering(stats: &RollingStats) -> bool {
    if stats.recent.len() < 4 {
        return false;
    }
    let preceding = &stats.recent[stats.recent.len() - 4..stats.recent.len() - 1];
    stats.today >= stats.mm7 && mean(preceding) < RECOVERY_FACTOR * stats.mm7
}
