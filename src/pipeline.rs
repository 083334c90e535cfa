//! Generic in-memory data pipeline over record maps.
//!
//! Every report's shaping step (post-harvest, pre-summary) is expressed
//! through this chainable, order-preserving transformer:
//!
//! ```text
//! harvested records
//!   -> filter(predicate)
//!   -> map(projection)
//!   -> group_by(key) / group_by_agg(key, aggregator)
//!   -> sort(field, direction)
//!   -> paginate(page, per_page)      [terminal]
//! ```
//!
//! Records are loosely-keyed JSON maps; the pipeline never reorders
//! elements except through an explicit `sort`.

use serde_json::Value;
use std::collections::HashMap;

/// A single data record: a JSON object keyed by field name.
pub type Record = serde_json::Map<String, Value>;

/// Sort direction for [`Pipeline::sort`] and report sort directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    /// Parse a caller-supplied direction. Anything other than `desc`
    /// (case-insensitive) is ascending.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

/// Chainable sequence transformer over [`Record`]s.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    items: Vec<Record>,
}

impl Pipeline {
    pub fn new(items: Vec<Record>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keep records matching the predicate, preserving relative order.
    pub fn filter(mut self, predicate: impl Fn(&Record) -> bool) -> Self {
        self.items.retain(|record| predicate(record));
        self
    }

    /// 1:1 projection, preserving order.
    pub fn map(self, transform: impl Fn(Record) -> Record) -> Self {
        Self {
            items: self.items.into_iter().map(transform).collect(),
        }
    }

    /// Partition records by a derived key.
    ///
    /// Non-string keys are stringified. Buckets come back in first-seen
    /// order, each holding its records in input order.
    pub fn group_by(self, key_fn: impl Fn(&Record) -> Value) -> Vec<(String, Vec<Record>)> {
        let mut order: Vec<String> = Vec::new();
        let mut buckets: HashMap<String, Vec<Record>> = HashMap::new();

        for record in self.items {
            let key = stringify_key(&key_fn(&record));
            if !buckets.contains_key(&key) {
                order.push(key.clone());
            }
            buckets.entry(key).or_default().push(record);
        }

        order
            .into_iter()
            .map(|key| {
                let records = buckets.remove(&key).unwrap_or_default();
                (key, records)
            })
            .collect()
    }

    /// Partition by a derived key and collapse each bucket to a single
    /// aggregated record, emitted in first-seen bucket order.
    pub fn group_by_agg(
        self,
        key_fn: impl Fn(&Record) -> Value,
        aggregate: impl Fn(&str, Vec<Record>) -> Record,
    ) -> Pipeline {
        let items = self
            .group_by(key_fn)
            .into_iter()
            .map(|(key, records)| aggregate(&key, records))
            .collect();
        Pipeline { items }
    }

    /// Sort by a field.
    ///
    /// If both compared values are numeric they compare numerically;
    /// otherwise as case-insensitive natural strings. A missing/null value
    /// always compares as less than any other value, so nulls land first
    /// when ascending and last when descending. Downstream report
    /// snapshots depend on that placement; do not change it.
    pub fn sort(mut self, field: &str, direction: SortDirection) -> Self {
        if field.is_empty() {
            return self;
        }

        self.items.sort_by(|left, right| {
            let ordering = compare_values(left.get(field), right.get(field));
            match direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
        self
    }

    /// Terminal operation: the 0-indexed slice
    /// `[(page-1)*per_page, page*per_page)`. Both arguments clamp to >= 1.
    pub fn paginate(self, page: u32, per_page: u32) -> Vec<Record> {
        let page = page.max(1) as usize;
        let per_page = per_page.max(1) as usize;
        let start = (page - 1) * per_page;

        if start >= self.items.len() {
            return Vec::new();
        }

        let end = (start + per_page).min(self.items.len());
        self.items[start..end].to_vec()
    }

    /// Terminal materialization.
    pub fn into_vec(self) -> Vec<Record> {
        self.items
    }
}

fn stringify_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Comparator shared by `sort`: null < numeric/string, numbers compare
/// numerically when both sides are numeric (numeric strings included),
/// everything else as case-insensitive natural strings.
pub fn compare_values(left: Option<&Value>, right: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let left = left.filter(|v| !v.is_null());
    let right = right.filter(|v| !v.is_null());

    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(l), Some(r)) => {
            if let (Some(ln), Some(rn)) = (as_numeric(l), as_numeric(r)) {
                ln.partial_cmp(&rn).unwrap_or(Ordering::Equal)
            } else {
                natural_cmp(&value_to_string(l), &value_to_string(r))
            }
        }
    }
}

fn as_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Case-insensitive natural string comparison: digit runs compare by
/// numeric value, everything else byte-wise after lowercasing.
fn natural_cmp(left: &str, right: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let left: Vec<char> = left.to_lowercase().chars().collect();
    let right: Vec<char> = right.to_lowercase().chars().collect();
    let (mut i, mut j) = (0, 0);

    while i < left.len() && j < right.len() {
        let (lc, rc) = (left[i], right[j]);

        if lc.is_ascii_digit() && rc.is_ascii_digit() {
            let li = i;
            while i < left.len() && left[i].is_ascii_digit() {
                i += 1;
            }
            let rj = j;
            while j < right.len() && right[j].is_ascii_digit() {
                j += 1;
            }

            let lnum: &str = &left[li..i].iter().collect::<String>();
            let rnum: &str = &right[rj..j].iter().collect::<String>();
            let ord = lnum
                .trim_start_matches('0')
                .len()
                .cmp(&rnum.trim_start_matches('0').len())
                .then_with(|| lnum.trim_start_matches('0').cmp(rnum.trim_start_matches('0')));
            if ord != Ordering::Equal {
                return ord;
            }
            continue;
        }

        match lc.cmp(&rc) {
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
            other => return other,
        }
    }

    (left.len() - i).cmp(&(right.len() - j))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn names(items: &[Record], field: &str) -> Vec<Value> {
        items
            .iter()
            .map(|r| r.get(field).cloned().unwrap_or(Value::Null))
            .collect()
    }

    #[test]
    fn filter_preserves_relative_order() {
        let items = vec![
            record(&[("n", json!(1))]),
            record(&[("n", json!(2))]),
            record(&[("n", json!(3))]),
            record(&[("n", json!(4))]),
        ];

        let kept = Pipeline::new(items)
            .filter(|r| r["n"].as_i64().unwrap() % 2 == 0)
            .into_vec();

        assert_eq!(names(&kept, "n"), vec![json!(2), json!(4)]);
    }

    #[test]
    fn sort_ascending_puts_null_first() {
        let items = vec![
            record(&[("v", Value::Null)]),
            record(&[("v", json!("b"))]),
            record(&[("v", json!("a"))]),
        ];

        let sorted = Pipeline::new(items).sort("v", SortDirection::Asc).into_vec();
        assert_eq!(names(&sorted, "v"), vec![Value::Null, json!("a"), json!("b")]);
    }

    #[test]
    fn sort_descending_puts_null_last() {
        let items = vec![
            record(&[("v", Value::Null)]),
            record(&[("v", json!("b"))]),
            record(&[("v", json!("a"))]),
        ];

        let sorted = Pipeline::new(items)
            .sort("v", SortDirection::Desc)
            .into_vec();
        assert_eq!(names(&sorted, "v"), vec![json!("b"), json!("a"), Value::Null]);
    }

    #[test]
    fn sort_compares_numeric_strings_numerically() {
        let items = vec![
            record(&[("v", json!("10"))]),
            record(&[("v", json!(2))]),
            record(&[("v", json!("1.5"))]),
        ];

        let sorted = Pipeline::new(items).sort("v", SortDirection::Asc).into_vec();
        assert_eq!(names(&sorted, "v"), vec![json!("1.5"), json!(2), json!("10")]);
    }

    #[test]
    fn sort_is_natural_and_case_insensitive() {
        let items = vec![
            record(&[("v", json!("item10"))]),
            record(&[("v", json!("Item2"))]),
            record(&[("v", json!("item1"))]),
        ];

        let sorted = Pipeline::new(items).sort("v", SortDirection::Asc).into_vec();
        assert_eq!(
            names(&sorted, "v"),
            vec![json!("item1"), json!("Item2"), json!("item10")]
        );
    }

    #[test]
    fn group_by_keeps_first_seen_bucket_order() {
        let items = vec![
            record(&[("pkg", json!("b")), ("n", json!(1))]),
            record(&[("pkg", json!("a")), ("n", json!(2))]),
            record(&[("pkg", json!("b")), ("n", json!(3))]),
        ];

        let groups = Pipeline::new(items).group_by(|r| r["pkg"].clone());
        let keys: Vec<&str> = groups.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn group_by_agg_collapses_buckets() {
        let items = vec![
            record(&[("pkg", json!("a")), ("total", json!(10.0))]),
            record(&[("pkg", json!("a")), ("total", json!(5.0))]),
            record(&[("pkg", json!("b")), ("total", json!(1.0))]),
        ];

        let rows = Pipeline::new(items)
            .group_by_agg(
                |r| r["pkg"].clone(),
                |key, records| {
                    let sum: f64 = records
                        .iter()
                        .filter_map(|r| r["total"].as_f64())
                        .sum();
                    record(&[("pkg", json!(key)), ("total", json!(sum))])
                },
            )
            .into_vec();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["total"], json!(15.0));
        assert_eq!(rows[1]["total"], json!(1.0));
    }

    #[test]
    fn paginate_clamps_and_slices() {
        let items: Vec<Record> = (1..=5).map(|n| record(&[("n", json!(n))])).collect();

        let page2 = Pipeline::new(items.clone()).paginate(2, 2);
        assert_eq!(names(&page2, "n"), vec![json!(3), json!(4)]);

        let clamped = Pipeline::new(items.clone()).paginate(0, 0);
        assert_eq!(clamped.len(), 1);

        let past_end = Pipeline::new(items).paginate(9, 2);
        assert!(past_end.is_empty());
    }
}
