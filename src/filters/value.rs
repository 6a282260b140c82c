//! The declarative value-matching language
//!
//! A value filter selects a field out of a resource record with a path
//! expression (`recordingGroup.includeGlobalResources`, `tags[0].Key`),
//! optionally coerces both sides (`integer`, `size`, `cidr`, `normalize`,
//! `age`), and compares with an operator (`equal`, `gt`, `in`, `regex`,
//! `present`, ...). A missing path resolves to an absent marker, never an
//! error, so `absent`/`not-equal`/`not-in` can assert on missing fields.

use crate::error::EngineError;
use crate::filters::{ArcFilter, Filter, FilterRegistry};
use crate::resource::{PolicyContext, Record};
use crate::schema::{FieldSpec, Schema};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use ipnet::IpNet;
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::net::IpAddr;
use std::sync::Arc;

/// Every accepted operator spelling.
const OP_NAMES: &[&str] = &[
    "equal",
    "eq",
    "not-equal",
    "ne",
    "greater-than",
    "gt",
    "gte",
    "ge",
    "less-than",
    "lt",
    "lte",
    "le",
    "in",
    "not-in",
    "ni",
    "regex",
    "present",
    "absent",
];

const VALUE_TYPES: &[&str] = &["integer", "size", "cidr", "normalize", "age"];

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Regex,
    Present,
    Absent,
}

impl CmpOp {
    /// Parse an operator name, accepting both long and short spellings.
    pub fn parse(name: &str) -> Result<Self, EngineError> {
        Ok(match name {
            "equal" | "eq" => CmpOp::Eq,
            "not-equal" | "ne" => CmpOp::Ne,
            "greater-than" | "gt" => CmpOp::Gt,
            "gte" | "ge" => CmpOp::Gte,
            "less-than" | "lt" => CmpOp::Lt,
            "lte" | "le" => CmpOp::Lte,
            "in" => CmpOp::In,
            "not-in" | "ni" => CmpOp::NotIn,
            "regex" => CmpOp::Regex,
            "present" => CmpOp::Present,
            "absent" => CmpOp::Absent,
            other => {
                return Err(EngineError::invalid("value", format!("unknown op '{other}'")));
            }
        })
    }
}

/// Coercion applied to both sides before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coercion {
    /// Parse strings as integers.
    Integer,
    /// Parse human-readable sizes ("10 GB") into bytes.
    Size,
    /// Network containment: the configured network(s) contain the
    /// resolved address.
    Cidr,
    /// ASCII-lowercase strings.
    Normalize,
    /// Treat the resolved value as a date; compare elapsed days against
    /// the configured number.
    Age,
}

impl Coercion {
    fn parse(name: &str) -> Result<Self, EngineError> {
        Ok(match name {
            "integer" => Coercion::Integer,
            "size" => Coercion::Size,
            "cidr" => Coercion::Cidr,
            "normalize" => Coercion::Normalize,
            "age" => Coercion::Age,
            other => {
                return Err(EngineError::invalid(
                    "value",
                    format!("unknown value_type '{other}'"),
                ));
            }
        })
    }
}

/// One step of a parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Field(String),
    Index(usize),
}

/// Parse a path expression into steps. Dots separate map fields; `[n]`
/// suffixes and bare numeric segments index into lists.
fn parse_path(path: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    for segment in path.split('.') {
        let mut rest = segment;
        if let Some(bracket) = rest.find('[') {
            let name = &rest[..bracket];
            if !name.is_empty() {
                steps.push(Step::Field(name.to_string()));
            }
            rest = &rest[bracket..];
            while let Some(close) = rest.find(']') {
                if let Ok(index) = rest[1..close].parse::<usize>() {
                    steps.push(Step::Index(index));
                }
                rest = &rest[close + 1..];
                if !rest.starts_with('[') {
                    break;
                }
            }
        } else if let Ok(index) = rest.parse::<usize>() {
            steps.push(Step::Index(index));
        } else if !rest.is_empty() {
            steps.push(Step::Field(rest.to_string()));
        }
    }
    steps
}

fn resolve_step<'a>(value: &'a Value, step: &Step) -> Option<&'a Value> {
    match step {
        Step::Field(name) => value.get(name.as_str()),
        Step::Index(index) => value.get(*index),
    }
}

fn resolve_in<'a>(target: &'a Value, steps: &[Step]) -> Option<&'a Value> {
    let mut current = target;
    for step in steps {
        current = resolve_step(current, step)?;
    }
    Some(current)
}

fn resolve_in_fields<'a>(fields: &'a Map<String, Value>, steps: &[Step]) -> Option<&'a Value> {
    let (first, rest) = steps.split_first()?;
    let mut current = match first {
        Step::Field(name) => fields.get(name)?,
        Step::Index(_) => return None,
    };
    for step in rest {
        current = resolve_step(current, step)?;
    }
    Some(current)
}

/// The compiled filter.
#[derive(Debug)]
pub struct ValueFilter {
    steps: Vec<Step>,
    op: CmpOp,
    value: Option<Value>,
    value_type: Option<Coercion>,
    regex: Option<Regex>,
}

impl ValueFilter {
    /// Schema shared by the `value` filter and everything inheriting it.
    pub fn schema() -> Schema {
        Schema::new("value")
            .field("key", FieldSpec::String)
            .required("key")
            .field("value", FieldSpec::Any)
            .field("op", FieldSpec::one_of(OP_NAMES))
            .field("value_type", FieldSpec::one_of(VALUE_TYPES))
    }

    /// Build from a validated configuration block.
    pub fn from_config(config: &Value) -> Result<Self, EngineError> {
        let key = config
            .get("key")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| EngineError::invalid("value", "requires a non-empty 'key'"))?;
        let steps = parse_path(key);

        let mut op = match config.get("op").and_then(Value::as_str) {
            Some(name) => CmpOp::parse(name)?,
            None => CmpOp::Eq,
        };

        let mut value = config.get("value").cloned();
        // `value: absent` / `value: present` are sentinel spellings of the
        // presence operators.
        if op == CmpOp::Eq {
            if let Some(Value::String(s)) = &value {
                match s.as_str() {
                    "absent" => {
                        op = CmpOp::Absent;
                        value = None;
                    }
                    "present" => {
                        op = CmpOp::Present;
                        value = None;
                    }
                    _ => {}
                }
            }
        }

        let value_type = match config.get("value_type").and_then(Value::as_str) {
            Some(name) => Some(Coercion::parse(name)?),
            None => None,
        };

        let regex = if op == CmpOp::Regex {
            let pattern = value
                .as_ref()
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::invalid("value", "regex op requires a string 'value'"))?;
            Some(Regex::new(pattern).map_err(|e| {
                EngineError::invalid("value", format!("invalid regex pattern: {e}"))
            })?)
        } else {
            None
        };

        if value.is_none() && !matches!(op, CmpOp::Present | CmpOp::Absent) {
            return Err(EngineError::invalid("value", "requires a 'value' for this op"));
        }

        Ok(Self {
            steps,
            op,
            value,
            value_type,
            regex,
        })
    }

    /// Match against a record's provider fields.
    pub fn matches_fields(&self, fields: &Map<String, Value>) -> bool {
        self.matches_fields_at(fields, Utc::now())
    }

    pub(crate) fn matches_fields_at(&self, fields: &Map<String, Value>, now: DateTime<Utc>) -> bool {
        self.matches_resolved(resolve_in_fields(fields, &self.steps), now)
    }

    /// Match against an arbitrary JSON target (used by filters that match
    /// a cached annotation rather than the record itself).
    pub fn matches_value(&self, target: &Value) -> bool {
        self.matches_resolved(resolve_in(target, &self.steps), Utc::now())
    }

    fn matches_resolved(&self, resolved: Option<&Value>, now: DateTime<Utc>) -> bool {
        match self.op {
            CmpOp::Present => matches!(resolved, Some(v) if !v.is_null()),
            CmpOp::Absent => !matches!(resolved, Some(v) if !v.is_null()),
            CmpOp::Regex => {
                let Some(re) = &self.regex else { return false };
                resolved
                    .and_then(Value::as_str)
                    .map(|s| re.is_match(s))
                    .unwrap_or(false)
            }
            op => {
                let Some(expected) = &self.value else { return false };
                match self.value_type {
                    Some(Coercion::Cidr) => cidr_match(op, resolved, expected),
                    Some(Coercion::Age) => {
                        let Some(lhs) = resolved.and_then(parse_date) else {
                            return false;
                        };
                        let Some(days) = expected.as_f64() else { return false };
                        let elapsed = (now - lhs).num_seconds() as f64 / 86_400.0;
                        ordered_match(op, elapsed.partial_cmp(&days))
                    }
                    coercion => {
                        let lhs = resolved.and_then(|v| coerce(v, coercion));
                        let rhs = coerce(expected, coercion);
                        generic_match(op, lhs.as_ref(), rhs.as_ref())
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Filter for ValueFilter {
    async fn process(
        &self,
        _ctx: &PolicyContext,
        resources: Vec<Record>,
    ) -> Result<Vec<Record>, EngineError> {
        let now = Utc::now();
        Ok(resources
            .into_iter()
            .filter(|r| self.matches_fields_at(r.fields(), now))
            .collect())
    }
}

/// Registry build function for the `value` filter.
pub fn build(_registry: &FilterRegistry, config: &Value) -> Result<ArcFilter, EngineError> {
    Ok(Arc::new(ValueFilter::from_config(config)?))
}

fn coerce(value: &Value, coercion: Option<Coercion>) -> Option<Value> {
    match coercion {
        None => Some(value.clone()),
        Some(Coercion::Integer) => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        Some(Coercion::Size) => parse_size(value).map(Value::from),
        Some(Coercion::Normalize) => match value {
            Value::String(s) => Some(Value::String(s.to_ascii_lowercase())),
            other => Some(other.clone()),
        },
        // Handled before coerce() is reached.
        Some(Coercion::Cidr) | Some(Coercion::Age) => None,
    }
}

/// Parse a human-readable size ("10 GB", "512mb", plain bytes) into bytes.
fn parse_size(value: &Value) -> Option<f64> {
    if let Some(n) = value.as_f64() {
        return Some(n);
    }
    let s = value.as_str()?.trim().to_ascii_lowercase();
    const UNITS: &[(&str, f64)] = &[
        ("tb", 1024f64 * 1024.0 * 1024.0 * 1024.0),
        ("gb", 1024f64 * 1024.0 * 1024.0),
        ("mb", 1024f64 * 1024.0),
        ("kb", 1024.0),
        ("b", 1.0),
    ];
    for (suffix, multiplier) in UNITS {
        if let Some(number) = s.strip_suffix(suffix) {
            return number.trim().parse::<f64>().ok().map(|n| n * multiplier);
        }
    }
    s.parse::<f64>().ok()
}

/// Parse a date out of a field value: RFC 3339, a bare date, or epoch
/// seconds.
pub(crate) fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(s) = value.as_str() {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(naive.and_utc());
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
        return None;
    }
    let epoch = value.as_i64()?;
    DateTime::from_timestamp(epoch, 0)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

fn ordered_match(op: CmpOp, ordering: Option<Ordering>) -> bool {
    let Some(ordering) = ordering else { return false };
    match op {
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Gte => ordering != Ordering::Less,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Lte => ordering != Ordering::Greater,
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        _ => false,
    }
}

fn in_match(lhs: Option<&Value>, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Some(l), Value::Array(allowed)) => allowed.iter().any(|item| values_equal(l, item)),
        (None, Value::Array(allowed)) => allowed.iter().any(Value::is_null),
        (Some(Value::Array(items)), scalar) => items.iter().any(|item| values_equal(item, scalar)),
        _ => false,
    }
}

fn generic_match(op: CmpOp, lhs: Option<&Value>, rhs: Option<&Value>) -> bool {
    let Some(rhs) = rhs else { return false };
    match op {
        CmpOp::Eq => lhs.map(|l| values_equal(l, rhs)).unwrap_or(false),
        CmpOp::Ne => !lhs.map(|l| values_equal(l, rhs)).unwrap_or(false),
        CmpOp::In => in_match(lhs, rhs),
        CmpOp::NotIn => !in_match(lhs, rhs),
        CmpOp::Gt | CmpOp::Gte | CmpOp::Lt | CmpOp::Lte => {
            ordered_match(op, lhs.and_then(|l| compare_values(l, rhs)))
        }
        _ => false,
    }
}

fn parse_net(s: &str) -> Option<IpNet> {
    if let Ok(net) = s.parse::<IpNet>() {
        return Some(net);
    }
    s.parse::<IpAddr>().ok().map(IpNet::from)
}

/// Containment semantics: the configured network(s) contain the resolved
/// address or network. `equal`/`in` assert containment, `not-equal`/
/// `not-in` assert the complement; an unparsable resolved value never
/// matches.
fn cidr_match(op: CmpOp, resolved: Option<&Value>, expected: &Value) -> bool {
    let Some(target) = resolved.and_then(Value::as_str).and_then(parse_net) else {
        return false;
    };
    let nets: Vec<IpNet> = match expected {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(parse_net)
            .collect(),
        other => other.as_str().and_then(parse_net).into_iter().collect(),
    };
    if nets.is_empty() {
        return false;
    }
    let contained = nets.iter().any(|net| net.contains(&target));
    match op {
        CmpOp::Eq | CmpOp::In => contained,
        CmpOp::Ne | CmpOp::NotIn => !contained,
        _ => false,
    }
}
