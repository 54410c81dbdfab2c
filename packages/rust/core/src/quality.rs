//! Data-quality gate over the aggregated delta batch.
//!
//! Rules are short strings such as `ColumnCount > 0` or `RowCount >= 10`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use arrow::record_batch::RecordBatch;
use indexflow_shared::{IndexFlowError, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

static RULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(ColumnCount|RowCount)\s*(>=|<=|==|=|>|<)\s*(\d+)\s*$").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Metric {
    ColumnCount,
    RowCount,
}

impl Metric {
    fn observe(self, batch: &RecordBatch) -> u64 {
        match self {
            Self::ColumnCount => batch.num_columns() as u64,
            Self::RowCount => batch.num_rows() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
}

impl Comparison {
    fn holds(self, observed: u64, threshold: u64) -> bool {
        match self {
            Self::Gt => observed > threshold,
            Self::Ge => observed >= threshold,
            Self::Lt => observed < threshold,
            Self::Le => observed <= threshold,
            Self::Eq => observed == threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
        }
    }
}

/// One parsed quality rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub metric: Metric,
    pub comparison: Comparison,
    pub threshold: u64,
}

impl FromStr for Rule {
    type Err = IndexFlowError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = RULE_RE
            .captures(s)
            .ok_or_else(|| IndexFlowError::config(format!("invalid quality rule '{s}'")))?;

        let metric = match &caps[1] {
            "ColumnCount" => Metric::ColumnCount,
            _ => Metric::RowCount,
        };
        let comparison = match &caps[2] {
            ">" => Comparison::Gt,
            ">=" => Comparison::Ge,
            "<" => Comparison::Lt,
            "<=" => Comparison::Le,
            _ => Comparison::Eq,
        };
        let threshold = caps[3].parse::<u64>().map_err(|e| {
            IndexFlowError::config(format!("invalid threshold in quality rule '{s}': {e}"))
        })?;

        Ok(Self {
            metric,
            comparison,
            threshold,
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} {}",
            self.metric,
            self.comparison.symbol(),
            self.threshold
        )
    }
}

/// `ColumnCount > 0`: the structural smoke test applied when nothing else is
/// configured.
pub const DEFAULT_RULE: Rule = Rule {
    metric: Metric::ColumnCount,
    comparison: Comparison::Gt,
    threshold: 0,
};

/// Parse every configured rule; the first invalid one is a config error.
pub fn parse_ruleset(rules: &[String]) -> Result<Vec<Rule>> {
    rules.iter().map(|r| r.parse()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub metric: Metric,
    pub comparison: Comparison,
    pub threshold: u64,
    pub observed: u64,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub outcomes: Vec<RuleOutcome>,
}

impl QualityReport {
    /// True when every rule held. An empty ruleset passes.
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }
}

/// Evaluate `rules` against `batch`. Failed rules are logged, never raised.
pub fn evaluate(batch: &RecordBatch, rules: &[Rule]) -> QualityReport {
    let outcomes = rules
        .iter()
        .map(|rule| {
            let observed = rule.metric.observe(batch);
            let passed = rule.comparison.holds(observed, rule.threshold);
            if passed {
                debug!(rule = %rule, observed, "quality rule passed");
            } else {
                warn!(rule = %rule, observed, "quality rule failed");
            }
            RuleOutcome {
                rule: rule.to_string(),
                metric: rule.metric,
                comparison: rule.comparison,
                threshold: rule.threshold,
                observed,
                passed,
            }
        })
        .collect();

    QualityReport { outcomes }
}

/// Pass/fail of [`DEFAULT_RULE`] alone.
pub fn validate(batch: &RecordBatch) -> bool {
    evaluate(batch, &[DEFAULT_RULE]).passed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexflow_shared::DeltaRecord;
    use indexflow_storage::columnar::delta_batch;

    fn batch(rows: usize) -> RecordBatch {
        let records: Vec<DeltaRecord> = (0..rows)
            .map(|i| DeltaRecord {
                entity: format!("E{i}"),
                sector: "S".into(),
                collection_date: "02-01-2026".into(),
                quantity_total: 10,
                quantity_total_previous: None,
                diff_quantity: 0,
            })
            .collect();
        delta_batch(&records).unwrap()
    }

    #[test]
    fn parses_rule_forms() {
        let rule: Rule = "ColumnCount > 0".parse().unwrap();
        assert_eq!(rule.metric, Metric::ColumnCount);
        assert_eq!(rule.comparison, Comparison::Gt);
        assert_eq!(rule.threshold, 0);

        let rule: Rule = "  RowCount>=25 ".parse().unwrap();
        assert_eq!(rule.metric, Metric::RowCount);
        assert_eq!(rule.comparison, Comparison::Ge);
        assert_eq!(rule.threshold, 25);

        let single: Rule = "RowCount = 3".parse().unwrap();
        let double: Rule = "RowCount == 3".parse().unwrap();
        assert_eq!(single, double);
        assert_eq!(single.to_string(), "RowCount == 3");
    }

    #[test]
    fn rejects_unknown_rules() {
        for bad in ["", "Completeness > 0.9", "RowCount >", "RowCount != 1", "RowCount > -1"] {
            let err = bad.parse::<Rule>().unwrap_err();
            assert!(matches!(err, IndexFlowError::Config { .. }), "{bad}");
        }
        let err = parse_ruleset(&["ColumnCount > 0".into(), "nope".into()]).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn default_rule_passes_on_delta_batch() {
        let rules = parse_ruleset(&["ColumnCount > 0".into()]).unwrap();
        let report = evaluate(&batch(2), &rules);
        assert!(report.passed());
        assert_eq!(report.outcomes[0].observed, 6);
    }

    #[test]
    fn failing_rule_is_reported() {
        let rules = parse_ruleset(&["ColumnCount > 0".into(), "RowCount >= 3".into()]).unwrap();
        let report = evaluate(&batch(2), &rules);
        assert!(!report.passed());
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].rule, "RowCount >= 3");
        assert_eq!(failures[0].observed, 2);
    }

    #[test]
    fn default_rule_matches_its_text_form() {
        assert_eq!("ColumnCount > 0".parse::<Rule>().unwrap(), DEFAULT_RULE);
        assert!(validate(&batch(0)));
        assert!(!validate(&RecordBatch::new_empty(std::sync::Arc::new(
            arrow::datatypes::Schema::empty()
        ))));
    }

    #[test]
    fn empty_ruleset_passes() {
        assert!(evaluate(&batch(0), &[]).passed());
    }

    #[test]
    fn report_serializes_symbols() {
        let rules = parse_ruleset(&["RowCount < 5".into()]).unwrap();
        let json = serde_json::to_value(evaluate(&batch(1), &rules)).unwrap();
        assert_eq!(json["outcomes"][0]["comparison"], "<");
        assert_eq!(json["outcomes"][0]["metric"], "RowCount");
        assert_eq!(json["outcomes"][0]["passed"], true);
    }
}
