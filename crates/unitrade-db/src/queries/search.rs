//! Turns a validated [`ListingFilters`] into one parameterised `SELECT`.
//!
//! Every supplied predicate is ANDed; the keyword clause is the only place
//! an OR appears. Soft-deleted and banned listings never match.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;

use unitrade_types::filters::{ListingFilters, SortKey};

use super::listings::LISTING_COLUMNS;
use crate::fmt_ts;

#[derive(Debug)]
pub struct SearchQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SearchQuery {
    pub fn build(filters: &ListingFilters, now: DateTime<Utc>) -> Self {
        let mut clauses = vec!["deleted_at IS NULL".to_string(), "status != 'banned'".to_string()];
        let mut params = Vec::new();

        if let Some(keyword) = &filters.keyword {
            let p = bind(&mut params, Value::Text(like_pattern(keyword)));
            clauses.push(format!(
                "(unicode_lower(title) LIKE {p} ESCAPE '\\' OR unicode_lower(description) LIKE {p} ESCAPE '\\')"
            ));
        }
        if let Some(category) = &filters.category {
            let p = bind(&mut params, Value::Text(category.clone()));
            clauses.push(format!("category = {p}"));
        }
        if let Some(min) = filters.min_price {
            let p = bind(&mut params, Value::Real(min));
            clauses.push(format!("price >= {p}"));
        }
        if let Some(max) = filters.max_price {
            let p = bind(&mut params, Value::Real(max));
            clauses.push(format!("price <= {p}"));
        }
        if let Some(condition) = filters.condition {
            let p = bind(&mut params, Value::Text(condition.as_str().to_string()));
            clauses.push(format!("condition = {p}"));
        }
        if let Some(threshold) = filters.recency.threshold(now) {
            let p = bind(&mut params, Value::Text(fmt_ts(threshold)));
            clauses.push(format!("created_at >= {p}"));
        }

        let order = match filters.sort {
            SortKey::Newest => "created_at DESC",
            SortKey::PriceAsc => "price ASC, created_at DESC",
            SortKey::PriceDesc => "price DESC, created_at DESC",
        };

        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE {} ORDER BY {order}",
            clauses.join(" AND ")
        );
        Self { sql, params }
    }
}

fn bind(params: &mut Vec<Value>, value: Value) -> String {
    params.push(value);
    format!("?{}", params.len())
}

/// Lowercased `%keyword%` with LIKE metacharacters escaped.
fn like_pattern(keyword: &str) -> String {
    let mut out = String::with_capacity(keyword.len() + 2);
    out.push('%');
    for ch in keyword.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}
