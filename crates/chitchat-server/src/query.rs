//! Collection queries: value ordering, equality filtering and recency limits.

use std::cmp::Ordering;

use serde_json::Value;

use chitchat_store::Node;

/// Selects which children of a collection a subscriber sees.
///
/// The equality filter applies to the initial replay and to live events.
/// `limit_to_last` only bounds the initial replay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    order_by_value: bool,
    equal_to: Option<Value>,
    limit_to_last: Option<usize>,
}

impl Query {
    /// Every child, in creation order.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn order_by_value(mut self) -> Self {
        self.order_by_value = true;
        self
    }

    pub fn equal_to(mut self, value: impl Into<Value>) -> Self {
        self.equal_to = Some(value.into());
        self
    }

    pub fn limit_to_last(mut self, limit: usize) -> Self {
        self.limit_to_last = Some(limit);
        self
    }

    pub fn matches(&self, value: &Value) -> bool {
        self.equal_to.as_ref().map_or(true, |expected| expected == value)
    }

    /// Apply filter, ordering and limit to a creation-ordered snapshot.
    pub fn select(&self, nodes: Vec<Node>) -> Vec<Node> {
        let mut selected: Vec<Node> = nodes
            .into_iter()
            .filter(|n| self.matches(&n.value))
            .collect();

        if self.order_by_value {
            // stable: equal values keep creation order
            selected.sort_by(|a, b| compare_values(&a.value, &b.value));
        }

        if let Some(limit) = self.limit_to_last {
            let excess = selected.len().saturating_sub(limit);
            selected.drain(..excess);
        }

        selected
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Total order over JSON values: null, false, true, numbers, strings, then
/// arrays and objects (which compare equal among themselves).
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    rank(a).cmp(&rank(b)).then_with(|| match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    })
}
