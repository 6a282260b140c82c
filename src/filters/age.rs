//! Age-threshold filter
//!
//! Matches resources whose date attribute is older (or newer, per `op`)
//! than a configured number of days. The date attribute is fixed at the
//! registration site, so `rds-cluster-snapshot` registers `age` over
//! `SnapshotCreateTime` without any engine changes.

use crate::error::EngineError;
use crate::filters::value::parse_date;
use crate::filters::{ArcFilter, Filter, FilterEntry, FilterRegistry};
use crate::resource::{PolicyContext, Record};
use crate::schema::{FieldSpec, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Operators meaningful for an age comparison.
const AGE_OPS: &[&str] = &[
    "greater-than",
    "gt",
    "gte",
    "ge",
    "less-than",
    "lt",
    "lte",
    "le",
    "equal",
    "eq",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgeOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl AgeOp {
    fn parse(name: &str) -> Result<Self, EngineError> {
        Ok(match name {
            "greater-than" | "gt" => AgeOp::Gt,
            "gte" | "ge" => AgeOp::Gte,
            "less-than" | "lt" => AgeOp::Lt,
            "lte" | "le" => AgeOp::Lte,
            "equal" | "eq" => AgeOp::Eq,
            other => {
                return Err(EngineError::invalid("age", format!("unknown op '{other}'")));
            }
        })
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            AgeOp::Gt => ordering == Ordering::Greater,
            AgeOp::Gte => ordering != Ordering::Less,
            AgeOp::Lt => ordering == Ordering::Less,
            AgeOp::Lte => ordering != Ordering::Greater,
            AgeOp::Eq => ordering == Ordering::Equal,
        }
    }
}

/// The compiled filter.
#[derive(Debug)]
pub struct AgeFilter {
    date_attribute: &'static str,
    days: f64,
    op: AgeOp,
}

impl AgeFilter {
    pub fn from_config(date_attribute: &'static str, config: &Value) -> Result<Self, EngineError> {
        let days = config
            .get("days")
            .and_then(Value::as_f64)
            .ok_or_else(|| EngineError::invalid("age", "requires a numeric 'days'"))?;
        let op = match config.get("op").and_then(Value::as_str) {
            Some(name) => AgeOp::parse(name)?,
            None => AgeOp::Gt,
        };
        Ok(Self {
            date_attribute,
            days,
            op,
        })
    }

    /// A record without a parseable date attribute never matches,
    /// whatever the operator.
    pub(crate) fn matches_at(&self, record: &Record, now: DateTime<Utc>) -> bool {
        let Some(date) = record.get(self.date_attribute).and_then(parse_date) else {
            return false;
        };
        let elapsed_days = (now - date).num_seconds() as f64 / 86_400.0;
        match elapsed_days.partial_cmp(&self.days) {
            Some(ordering) => self.op.holds(ordering),
            None => false,
        }
    }
}

#[async_trait]
impl Filter for AgeFilter {
    async fn process(
        &self,
        _ctx: &PolicyContext,
        resources: Vec<Record>,
    ) -> Result<Vec<Record>, EngineError> {
        let now = Utc::now();
        Ok(resources
            .into_iter()
            .filter(|r| self.matches_at(r, now))
            .collect())
    }
}

/// Registry entry for an `age` filter over the given date attribute.
pub fn entry(date_attribute: &'static str) -> FilterEntry {
    FilterEntry {
        schema: Schema::new("age")
            .field("days", FieldSpec::Number)
            .required("days")
            .field("op", FieldSpec::one_of(AGE_OPS)),
        build: Box::new(move |_reg: &FilterRegistry, config: &Value| {
            Ok(Arc::new(AgeFilter::from_config(date_attribute, config)?) as ArcFilter)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn snapshot(age_days: i64, now: DateTime<Utc>) -> Record {
        Record::from_value(json!({
            "DBClusterSnapshotIdentifier": "snap",
            "SnapshotCreateTime": (now - Duration::days(age_days)).to_rfc3339(),
        }))
        .unwrap()
    }

    #[test]
    fn old_snapshots_match_default_greater_than() {
        let now = Utc::now();
        let f = AgeFilter::from_config("SnapshotCreateTime", &json!({"type": "age", "days": 30}))
            .unwrap();
        assert!(f.matches_at(&snapshot(45, now), now));
        assert!(!f.matches_at(&snapshot(10, now), now));
    }

    #[test]
    fn missing_date_attribute_never_matches() {
        let now = Utc::now();
        let bare = Record::from_value(json!({"DBClusterSnapshotIdentifier": "snap"})).unwrap();
        for op in ["gt", "gte", "lt", "lte", "eq"] {
            let f = AgeFilter::from_config(
                "SnapshotCreateTime",
                &json!({"type": "age", "days": 0, "op": op}),
            )
            .unwrap();
            assert!(!f.matches_at(&bare, now), "op {op} matched a dateless record");
        }
    }

    #[test]
    fn unparseable_date_never_matches() {
        let now = Utc::now();
        let bad = Record::from_value(
            json!({"SnapshotCreateTime": "a while ago"}),
        )
        .unwrap();
        let f = AgeFilter::from_config("SnapshotCreateTime", &json!({"type": "age", "days": 1}))
            .unwrap();
        assert!(!f.matches_at(&bad, now));
    }

    #[test]
    fn less_than_selects_recent_resources() {
        let now = Utc::now();
        let f = AgeFilter::from_config(
            "SnapshotCreateTime",
            &json!({"type": "age", "days": 7, "op": "less-than"}),
        )
        .unwrap();
        assert!(f.matches_at(&snapshot(2, now), now));
        assert!(!f.matches_at(&snapshot(30, now), now));
    }

    #[test]
    fn non_numeric_days_is_a_build_error() {
        assert!(
            AgeFilter::from_config("SnapshotCreateTime", &json!({"type": "age", "days": "old"}))
                .is_err()
        );
    }
}
