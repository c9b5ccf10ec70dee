//! String-level query requests, as typed on a command line or stored in a
//! manifest, and their translation into a [`QuerySpec`].
//!
//! Filter arguments accept several spellings and may be repeated:
//!
//! * JSON objects: `{"category_common_name": ["barley", "hairy vetch"]}`
//! * full mini-DSL: `estimated_bbox_area_cm2 > 100` (kept as a raw expression)
//! * shorthand: `state=NC`, `category_common_name=barley,hairy vetch`
//! * bracketed literals: `plant_id=[1, 2, 3]`
//!
//! Anything else is passed through as a raw expression and validated by the
//! parser.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{QuarryError, Result};
use crate::query::builder::{QueryBuilder, DEFAULT_SEED};
use crate::query::filters::{FilterValue, Filters, RAW_KEY};
use crate::query::literal::{parse_literal, Literal};
use crate::query::spec::{QuerySpec, SampleSpec, SampleStrategy, SortDirection, SortKey};
use crate::query::value::Value;

/// Sample size used when neither `n` nor a limit is given.
pub const DEFAULT_SAMPLE_SIZE: i64 = 100;
/// Group cap used by stratified sampling when `per_group` is omitted.
pub const DEFAULT_PER_GROUP: i64 = 10;

const DSL_TOKENS: [&str; 9] = [
    "==",
    " in ",
    " between ",
    " is null",
    " is not null",
    ">=",
    "<=",
    ">",
    "<",
];

/// Parses repeatable filter arguments into one filter map. Repeated keys
/// merge the way [`QueryBuilder::filter`] does.
pub fn parse_filter_args<S: AsRef<str>>(args: &[S]) -> Result<Filters> {
    let mut out = Filters::new();
    for arg in args {
        let arg = arg.as_ref().trim();
        if arg.is_empty() {
            continue;
        }
        if arg.starts_with('{') {
            let object: Filters = serde_json::from_str(arg)?;
            for (key, value) in object.iter() {
                out.merge(key, value.clone());
            }
        } else if DSL_TOKENS.iter().any(|tok| arg.contains(tok)) {
            out.push_raw(arg);
        } else if let Some((key, value)) = arg.split_once('=') {
            out.merge(key.trim(), shorthand_value(value));
        } else {
            out.push_raw(arg);
        }
    }
    Ok(out)
}

fn shorthand_value(text: &str) -> FilterValue {
    let text = text.trim();
    let bracketed = (text.starts_with('[') && text.ends_with(']'))
        || (text.starts_with('(') && text.ends_with(')'));
    if bracketed {
        return match parse_literal(text) {
            Literal::List(values) => FilterValue::List(values),
            Literal::Scalar(value) => FilterValue::Scalar(value),
        };
    }
    if text.contains(',') {
        let mut parts: Vec<Value> = text
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(Value::from)
            .collect();
        return if parts.len() == 1 {
            FilterValue::Scalar(parts.remove(0))
        } else {
            FilterValue::List(parts)
        };
    }
    FilterValue::Scalar(Value::from(text))
}

/// Parses `col[:dir],col[:dir],...`; the direction defaults to ascending.
pub fn parse_sort(text: &str) -> Result<Vec<SortKey>> {
    let mut out = Vec::new();
    for token in text.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let (column, direction) = match token.split_once(':') {
            Some((column, direction)) => (column.trim(), direction.parse::<SortDirection>()?),
            None => (token, SortDirection::Asc),
        };
        out.push(SortKey::new(column, direction));
    }
    Ok(out)
}

/// Parses `strategy[:key=val,...]`. Known keys are `n`, `seed`, `per_group`
/// and `by`; `by` takes `|`- or comma-separated columns. Missing values are
/// left unset for the caller to default.
pub fn parse_sample(text: &str) -> Result<SampleSpec> {
    let (strategy, rest) = match text.split_once(':') {
        Some((strategy, rest)) => (strategy, rest),
        None => (text, ""),
    };
    let mut sample = SampleSpec {
        strategy: strategy.parse()?,
        ..SampleSpec::default()
    };
    let mut in_by = false;
    for token in rest.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let Some((key, value)) = token.split_once('=') else {
            // bare token continues a comma-separated `by` list
            if in_by {
                sample.by.push(token.to_owned());
            } else {
                warn!(token, "ignoring sample token without a value");
            }
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        in_by = key == "by";
        match key {
            "n" => sample.n = Some(parse_int(key, value)?),
            "seed" => sample.seed = Some(parse_int(key, value)?),
            "per_group" => sample.per_group = Some(parse_int(key, value)?),
            "by" => sample.by.extend(
                value
                    .split('|')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned),
            ),
            other => warn!(key = other, "ignoring unknown sample key"),
        }
    }
    Ok(sample)
}

fn parse_int(key: &str, value: &str) -> Result<i64> {
    value.parse::<i64>().map_err(|_| {
        QuarryError::InvalidSampleSpec(format!("{key} must be an integer (got {value:?})"))
    })
}

/// A query as plain strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Repeatable filter arguments.
    #[serde(default)]
    pub filters: Vec<String>,
    /// Comma-separated projection.
    #[serde(default)]
    pub projection: Option<String>,
    /// Sort string, see [`parse_sort`].
    #[serde(default)]
    pub sort: Option<String>,
    /// Row cap; zero means none.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Rows to skip; zero means none.
    #[serde(default)]
    pub offset: Option<u64>,
    /// Sample string, see [`parse_sample`].
    #[serde(default)]
    pub sample: Option<String>,
}

impl QueryRequest {
    /// Projection columns, if any.
    pub fn projection_columns(&self) -> Option<Vec<String>> {
        let cols: Vec<String> = self
            .projection
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_owned)
            .collect();
        (!cols.is_empty()).then_some(cols)
    }

    /// Applies the request to `builder`. Sampling defaults: `n` falls back
    /// to the limit or [`DEFAULT_SAMPLE_SIZE`], the seeded strategy's seed to
    /// [`DEFAULT_SEED`], `per_group` to [`DEFAULT_PER_GROUP`].
    pub fn apply<'s>(&self, mut builder: QueryBuilder<'s>) -> Result<QueryBuilder<'s>> {
        let mut filters = parse_filter_args(&self.filters)?;
        if let Some(raw) = filters.remove(RAW_KEY) {
            let exprs = match raw {
                FilterValue::List(items) => items,
                FilterValue::Scalar(value) => vec![value],
                FilterValue::Range(_) => Vec::new(),
            };
            for expr in exprs {
                if let Value::String(expr) = expr {
                    builder = builder.where_expr(expr);
                }
            }
        }
        builder = builder.filters(&filters);

        if let Some(cols) = self.projection_columns() {
            builder = builder.select(cols);
        }
        if let Some(sort) = self.sort.as_deref() {
            for key in parse_sort(sort)? {
                builder = builder.sort_by(key.column, key.direction);
            }
        }

        let limit = self.limit.filter(|l| *l > 0);
        if let Some(sample) = self.sample.as_deref().filter(|s| !s.trim().is_empty()) {
            let sample = parse_sample(sample)?;
            let default_n = limit
                .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
                .unwrap_or(DEFAULT_SAMPLE_SIZE);
            builder = match sample.strategy {
                SampleStrategy::Random => builder.sample_random(sample.n.unwrap_or(default_n)),
                SampleStrategy::Seeded => builder.sample_seeded(
                    sample.n.unwrap_or(default_n),
                    Some(sample.seed.unwrap_or(DEFAULT_SEED)),
                ),
                SampleStrategy::Stratified => builder.sample_stratified(
                    sample.by,
                    sample.per_group.unwrap_or(DEFAULT_PER_GROUP),
                    sample.seed,
                ),
                SampleStrategy::None => builder,
            };
        }

        if let Some(limit) = limit {
            builder = builder.limit(limit);
        }
        if let Some(offset) = self.offset.filter(|o| *o > 0) {
            builder = builder.offset(offset);
        }
        Ok(builder)
    }

    /// Builds the spec this request describes.
    pub fn to_spec(&self) -> Result<QuerySpec> {
        self.apply(QueryBuilder::new())?.to_spec()
    }

    /// Command-line arguments reproducing this request.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for filter in &self.filters {
            args.push("--filters".to_owned());
            args.push(filter.clone());
        }
        if let Some(projection) = &self.projection {
            args.push("--projection".to_owned());
            args.push(projection.clone());
        }
        if let Some(sort) = &self.sort {
            args.push("--sort".to_owned());
            args.push(sort.clone());
        }
        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            args.push("--limit".to_owned());
            args.push(limit.to_string());
        }
        if let Some(offset) = self.offset.filter(|o| *o > 0) {
            args.push("--offset".to_owned());
            args.push(offset.to_string());
        }
        if let Some(sample) = &self.sample {
            args.push("--sample".to_owned());
            args.push(sample.clone());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_args_mix_spellings() {
        let filters = parse_filter_args(&[
            r#"{"category_common_name": ["barley", "hairy vetch"]}"#,
            "category_common_name=Barley,wheat",
            "state=NC",
            "estimated_bbox_area_cm2 > 100",
            "plant_id=[1, 2]",
            "something odd",
        ])
        .unwrap();
        assert_eq!(
            filters.get("category_common_name"),
            Some(&FilterValue::from(vec!["barley", "hairy vetch", "wheat"]))
        );
        assert_eq!(filters.get("state"), Some(&FilterValue::from("NC")));
        assert_eq!(filters.get("plant_id"), Some(&FilterValue::from(vec![1_i64, 2])));
        assert_eq!(
            filters.get(RAW_KEY),
            Some(&FilterValue::from(vec!["estimated_bbox_area_cm2 > 100", "something odd"]))
        );
    }

    #[test]
    fn invalid_json_filter_is_an_error() {
        assert!(parse_filter_args(&["{not json"]).is_err());
    }

    #[test]
    fn sort_strings() {
        assert_eq!(
            parse_sort("area:desc, cutout_id").unwrap(),
            vec![
                SortKey::new("area", SortDirection::Desc),
                SortKey::new("cutout_id", SortDirection::Asc)
            ]
        );
        assert!(parse_sort("area:sideways").is_err());
    }

    #[test]
    fn sample_strings() {
        let sample = parse_sample("stratified:by=category|state,per_group=4").unwrap();
        assert_eq!(sample.strategy, SampleStrategy::Stratified);
        assert_eq!(sample.by, vec!["category", "state"]);
        assert_eq!(sample.per_group, Some(4));

        let sample = parse_sample("stratified:by=category,state,per_group=2").unwrap();
        assert_eq!(sample.by, vec!["category", "state"]);

        let sample = parse_sample("seeded:n=3,seed=7").unwrap();
        assert_eq!((sample.n, sample.seed), (Some(3), Some(7)));

        assert!(parse_sample("seeded:n=lots").is_err());
        assert!(parse_sample("bootstrap:n=3").is_err());
    }

    #[test]
    fn request_defaults_follow_the_runner() {
        let request = QueryRequest {
            sample: Some("seeded".into()),
            limit: Some(25),
            ..QueryRequest::default()
        };
        let spec = request.to_spec().unwrap();
        let sample = spec.sample.unwrap();
        assert_eq!((sample.n, sample.seed), (Some(25), Some(DEFAULT_SEED)));
        assert_eq!(spec.limit, Some(25));

        let request = QueryRequest {
            sample: Some("stratified:by=category".into()),
            ..QueryRequest::default()
        };
        let sample = request.to_spec().unwrap().sample.unwrap();
        assert_eq!(sample.per_group, Some(DEFAULT_PER_GROUP));

        let request = QueryRequest {
            sample: Some("random".into()),
            ..QueryRequest::default()
        };
        assert_eq!(request.to_spec().unwrap().sample.unwrap().n, Some(DEFAULT_SAMPLE_SIZE));
    }

    #[test]
    fn request_moves_raw_filters_to_where() {
        let request = QueryRequest {
            filters: vec!["area > 5".into(), "state=NC".into()],
            projection: Some("image_path, cutout_id".into()),
            sort: Some("area:desc".into()),
            ..QueryRequest::default()
        };
        let spec = request.to_spec().unwrap();
        let keys: Vec<&str> = spec.filters.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![RAW_KEY, "state"]);
        assert_eq!(
            spec.projection,
            Some(vec!["image_path".to_owned(), "cutout_id".to_owned()])
        );
        assert_eq!(spec.sort.len(), 1);
    }

    #[test]
    fn args_reproduce_request() {
        let request = QueryRequest {
            filters: vec!["state=NC".into()],
            limit: Some(100),
            offset: Some(0),
            ..QueryRequest::default()
        };
        assert_eq!(request.to_args(), vec!["--filters", "state=NC", "--limit", "100"]);
    }
}
