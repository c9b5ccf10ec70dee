//! Filter maps and their normalization into canonical mini-DSL expressions.
//!
//! Callers describe filters the way is most convenient: scalars, lists,
//! comma-separated text, operator-suffixed keys, `{in: [lo, hi]}` ranges, or
//! ready-made expressions. [`normalize`] flattens all of them into an ordered
//! list of expression strings for the parser. Normalization is total; bad
//! input only surfaces when the expressions are parsed.

use std::collections::HashSet;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::query::value::Value;

/// Reserved key whose values are passed through as expressions.
pub const RAW_KEY: &str = "$raw";
/// Legacy raw-expression key prefix (`__expr__0`, `__expr__1`, ...).
pub const LEGACY_RAW_PREFIX: &str = "__expr__";
/// Column targeted by the `has_mask` shorthand.
pub const MASK_COLUMN: &str = "mask_path";

const KEY_OPERATORS: [&str; 5] = [">=", "<=", ">", "<", "=="];
const EXPR_TOKENS: [&str; 9] = [
    "==",
    " in ",
    " between ",
    ">=",
    "<=",
    ">",
    "<",
    " is null",
    " is not null",
];

/// Inclusive range filter, keyed by its spelling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeFilter {
    /// `{"in": [lo, hi]}`
    In(Value, Value),
    /// `{"between": [lo, hi]}`
    Between(Value, Value),
}

impl RangeFilter {
    fn keyword(&self) -> &'static str {
        match self {
            RangeFilter::In(..) => "in",
            RangeFilter::Between(..) => "between",
        }
    }

    fn bounds(&self) -> (&Value, &Value) {
        match self {
            RangeFilter::In(lo, hi) | RangeFilter::Between(lo, hi) => (lo, hi),
        }
    }
}

/// Value side of a filter entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Scalar value or a pre-built expression string.
    Scalar(Value),
    /// Membership list.
    List(Vec<Value>),
    /// Inclusive range.
    Range(RangeFilter),
}

impl FilterValue {
    /// `{"in": [lo, hi]}` range.
    pub fn range(lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        FilterValue::Range(RangeFilter::In(lo.into(), hi.into()))
    }

    /// `{"between": [lo, hi]}` range.
    pub fn between(lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        FilterValue::Range(RangeFilter::Between(lo.into(), hi.into()))
    }

    /// Python-style truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            FilterValue::Scalar(v) => v.is_truthy(),
            FilterValue::List(items) => !items.is_empty(),
            FilterValue::Range(_) => true,
        }
    }

    fn to_literal(&self) -> String {
        match self {
            FilterValue::Scalar(v) => v.to_literal(),
            FilterValue::List(items) => list_literal(items),
            FilterValue::Range(range) => {
                let (lo, hi) = range.bounds();
                list_literal([lo.clone(), hi.clone()].as_slice())
            }
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Scalar(v) => write!(f, "{v}"),
            FilterValue::List(items) => {
                let items: Vec<String> = items.iter().map(Value::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            FilterValue::Range(range) => {
                let (lo, hi) = range.bounds();
                write!(f, "{} [{lo}, {hi}]", range.keyword())
            }
        }
    }
}

macro_rules! scalar_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for FilterValue {
            fn from(value: $ty) -> Self {
                FilterValue::Scalar(Value::from(value))
            }
        })*
    };
}

scalar_from!(&str, String, bool, i64, i32, f64);

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        FilterValue::Scalar(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        FilterValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<RangeFilter> for FilterValue {
    fn from(range: RangeFilter) -> Self {
        FilterValue::Range(range)
    }
}

/// Insertion-ordered filter map. Key order is preserved end to end so the
/// compiled SQL is stable for identical requests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filters {
    entries: Vec<(String, FilterValue)>,
}

impl Filters {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `key`.
    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Inserts or replaces `key`, keeping its original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FilterValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<FilterValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Merges `value` into `key`: scalars are promoted to lists, values are
    /// appended and de-duplicated (first seen wins, text compared
    /// case-insensitively). A single surviving value collapses back to a scalar.
    /// Ranges cannot be combined and replace the previous entry.
    pub fn merge(&mut self, key: impl Into<String>, value: impl Into<FilterValue>) {
        let key = key.into();
        let value = value.into();
        let Some(idx) = self.entries.iter().position(|(k, _)| *k == key) else {
            self.entries.push((key, value));
            return;
        };
        let slot = &mut self.entries[idx].1;
        if matches!(slot, FilterValue::Range(_)) || matches!(value, FilterValue::Range(_)) {
            debug!(key = %key, "range filter replaces previous value");
            *slot = value;
            return;
        }
        let mut merged = match slot {
            FilterValue::Scalar(v) => vec![v.clone()],
            FilterValue::List(items) => std::mem::take(items),
            FilterValue::Range(_) => Vec::new(),
        };
        match value {
            FilterValue::Scalar(v) => merged.push(v),
            FilterValue::List(items) => merged.extend(items),
            FilterValue::Range(_) => {}
        }
        let mut seen = HashSet::new();
        merged.retain(|v| seen.insert(v.dedup_key()));
        *slot = if merged.len() == 1 {
            FilterValue::Scalar(merged.remove(0))
        } else {
            FilterValue::List(merged)
        };
    }

    /// Appends a raw expression to the [`RAW_KEY`] bucket.
    pub fn push_raw(&mut self, expr: impl Into<String>) {
        let expr = Value::String(expr.into());
        match self.entries.iter_mut().find(|(k, _)| k == RAW_KEY) {
            Some((_, FilterValue::List(items))) => items.push(expr),
            Some((_, slot)) => {
                let previous = std::mem::replace(slot, FilterValue::List(Vec::new()));
                let mut items = match previous {
                    FilterValue::Scalar(v) => vec![v],
                    FilterValue::List(items) => items,
                    FilterValue::Range(_) => Vec::new(),
                };
                items.push(expr);
                *slot = FilterValue::List(items);
            }
            None => self
                .entries
                .push((RAW_KEY.to_owned(), FilterValue::List(vec![expr]))),
        }
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no filters are set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<FilterValue>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filters = Filters::new();
        for (k, v) in iter {
            filters.insert(k, v);
        }
        filters
    }
}

impl Serialize for Filters {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Filters {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct FiltersVisitor;

        impl<'de> Visitor<'de> for FiltersVisitor {
            type Value = Filters;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of filter keys to values")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Filters, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut filters = Filters::new();
                while let Some((key, value)) = access.next_entry::<String, FilterValue>()? {
                    filters.insert(key, value);
                }
                Ok(filters)
            }
        }

        deserializer.deserialize_map(FiltersVisitor)
    }
}

fn is_raw_key(key: &str) -> bool {
    key == RAW_KEY || key.starts_with(LEGACY_RAW_PREFIX)
}

fn looks_like_expr(text: &str) -> bool {
    let lower = text.to_lowercase();
    EXPR_TOKENS.iter().any(|tok| lower.contains(tok))
}

fn list_literal(items: &[Value]) -> String {
    let items: Vec<String> = items.iter().map(Value::to_literal).collect();
    format!("[{}]", items.join(","))
}

fn push_raw_exprs(key: &str, value: &FilterValue, out: &mut Vec<String>) {
    match value {
        FilterValue::Scalar(Value::String(expr)) => out.push(expr.clone()),
        FilterValue::List(items) => {
            for item in items {
                match item {
                    Value::String(expr) => out.push(expr.clone()),
                    other => warn!(key, value = %other, "ignoring non-text raw filter value"),
                }
            }
        }
        other => warn!(key, value = %other, "ignoring non-text raw filter value"),
    }
}

/// Normalizes a filter map into canonical expressions, raw keys first.
pub fn normalize(filters: &Filters) -> Vec<String> {
    let mut exprs = Vec::with_capacity(filters.len());

    if let Some(raw) = filters.get(RAW_KEY) {
        push_raw_exprs(RAW_KEY, raw, &mut exprs);
    }
    for (key, value) in filters.iter() {
        if key.starts_with(LEGACY_RAW_PREFIX) {
            push_raw_exprs(key, value, &mut exprs);
        }
    }

    for (key, value) in filters.iter() {
        if is_raw_key(key) {
            continue;
        }
        exprs.push(normalize_entry(key, value));
    }
    exprs
}

/// Normalizes one non-raw entry.
fn normalize_entry(key: &str, value: &FilterValue) -> String {
    if key == "has_mask" || key == "has_masks" {
        let neg = if value.is_truthy() { "not " } else { "" };
        return format!("{MASK_COLUMN} is {neg}null");
    }

    if let Some(op) = KEY_OPERATORS.iter().find(|op| key.ends_with(*op)) {
        let base = &key[..key.len() - op.len()];
        let rhs = match value {
            // Operand text is spliced in as written and evaluated by the parser.
            FilterValue::Scalar(Value::String(text)) => text.clone(),
            other => other.to_literal(),
        };
        return format!("{base}{op}{rhs}");
    }

    match value {
        FilterValue::Scalar(Value::String(text)) if looks_like_expr(text) => text.clone(),
        // Bracketed text is a list literal written by hand.
        FilterValue::Scalar(Value::String(text)) if text.trim_start().starts_with('[') => {
            format!("{key}=={}", text.trim())
        }
        FilterValue::Scalar(Value::String(text)) if text.contains(',') => {
            let names: Vec<Value> = text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Value::from)
                .collect();
            format!("{key}=={}", list_literal(&names))
        }
        FilterValue::List(items) => format!("{key}=={}", list_literal(items)),
        FilterValue::Range(range) => {
            let (lo, hi) = range.bounds();
            format!(
                "{key} {} [{},{}]",
                range.keyword(),
                lo.to_literal(),
                hi.to_literal()
            )
        }
        FilterValue::Scalar(Value::Null) => format!("{key} is null"),
        FilterValue::Scalar(v) => format!("{key}=={}", v.to_literal()),
    }
}
