use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::{Direction, Document, Filter, Limit, Query, Snapshot};

/// A stored document as seen by the query evaluator.
pub(crate) struct Row<'a> {
    pub id: &'a str,
    pub data: &'a Map<String, Value>,
    /// Insertion order, used to break ordering ties.
    pub seq: u64,
}

/// Looks up a possibly dotted field path (`lastMessage.createdAt`).
pub fn field_value<'a>(data: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: values of different types order by type,
/// numbers numerically, strings lexicographically.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal && type_rank(a) == type_rank(b)
}

fn filter_matches(filter: &Filter, data: &Map<String, Value>) -> bool {
    match filter {
        Filter::Eq(field, expected) => {
            field_value(data, field).is_some_and(|v| values_equal(v, expected))
        }
        Filter::ArrayContains(field, expected) => field_value(data, field)
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|v| values_equal(v, expected))),
        Filter::In(field, candidates) => field_value(data, field)
            .is_some_and(|v| candidates.iter().any(|c| values_equal(v, c))),
    }
}

/// Whether a document belongs to the query's result set, ignoring the limit.
/// Documents missing the ordering field never match.
pub(crate) fn matches(query: &Query, data: &Map<String, Value>) -> bool {
    field_value(data, &query.order_by).is_some()
        && query.filters.iter().all(|f| filter_matches(f, data))
}

pub(crate) fn evaluate<'a>(query: &Query, rows: impl Iterator<Item = Row<'a>>) -> Snapshot {
    let mut hits: Vec<Row<'a>> = rows.filter(|r| matches(query, r.data)).collect();

    hits.sort_by(|a, b| {
        let (Some(x), Some(y)) = (
            field_value(a.data, &query.order_by),
            field_value(b.data, &query.order_by),
        ) else {
            return Ordering::Equal;
        };
        compare_values(x, y).then(a.seq.cmp(&b.seq))
    });
    if query.direction == Direction::Descending {
        hits.reverse();
    }

    match query.limit {
        Some(Limit::First(n)) => hits.truncate(n),
        Some(Limit::Last(n)) => {
            let skip = hits.len().saturating_sub(n);
            hits.drain(..skip);
        }
        None => {}
    }

    Snapshot {
        documents: hits
            .into_iter()
            .map(|r| Document {
                id: r.id.to_string(),
                data: r.data.clone(),
            })
            .collect(),
        version: 0,
    }
}
