//! Discover rankings.
//!
//! "Popular" reads the like counters a `Scope::All` likes view already keeps
//! up to date; "trending" orders artworks by a numeric payload field.

use crate::{CounterCache, CounterKey, Record};
use std::cmp::Ordering;

/// Keys with the highest counts, descending. Ties break by key.
pub fn rank_by_counter(counters: &CounterCache, limit: usize) -> Vec<(CounterKey, i64)> {
    rank_counts(counters.snapshot(), limit)
}

/// [`rank_by_counter`] over already collected counts.
pub fn rank_counts(
    counts: impl IntoIterator<Item = (CounterKey, i64)>,
    limit: usize,
) -> Vec<(CounterKey, i64)> {
    let mut ranked: Vec<_> = counts
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

/// Records with the highest numeric `field`, descending. Records without the
/// field rank last; ties break by newest first.
pub fn rank_by_field<'a>(
    records: impl IntoIterator<Item = &'a Record>,
    field: &str,
    limit: usize,
) -> Vec<&'a Record> {
    let mut ranked: Vec<&Record> = records.into_iter().collect();
    let score = |r: &Record| r.field(field).and_then(serde_json::Value::as_f64);
    ranked.sort_by(|a, b| {
        match (score(*a), score(*b)) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| b.created_at.cmp(&a.created_at))
    });
    ranked.truncate(limit);
    ranked
}
