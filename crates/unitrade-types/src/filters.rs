//! Listing search parameters as they arrive on `/listings?...`, and their
//! validated form.
//!
//! Default values (`all`, `any`, `newest`, empty strings) never turn into
//! constraints; the database layer only sees what the user actually chose.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Condition;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("invalid price bound '{0}'")]
    InvalidPrice(String),
    #[error("price range is empty: min {min} > max {max}")]
    EmptyPriceRange { min: f64, max: f64 },
    #[error("unknown condition '{0}'")]
    InvalidCondition(String),
    #[error("unknown date range '{0}'")]
    InvalidRecency(String),
    #[error("unknown sort key '{0}'")]
    InvalidSort(String),
}

/// Raw query-string parameters, named the way the listings page encodes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingFilterParams {
    pub q: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub condition: Option<String>,
    pub date_posted: Option<String>,
    pub sort_by: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recency {
    #[default]
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl Recency {
    pub fn parse(s: &str) -> Result<Self, FilterError> {
        match s {
            "" | "any" => Ok(Self::Any),
            "24h" => Ok(Self::Day),
            "7d" => Ok(Self::Week),
            "30d" => Ok(Self::Month),
            other => Err(FilterError::InvalidRecency(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Day => "24h",
            Self::Week => "7d",
            Self::Month => "30d",
        }
    }

    pub fn days(self) -> Option<i64> {
        match self {
            Self::Any => None,
            Self::Day => Some(1),
            Self::Week => Some(7),
            Self::Month => Some(30),
        }
    }

    /// Earliest `created_at` a listing may have to fall inside this bucket.
    pub fn threshold(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.days().map(|d| now - Duration::days(d))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
}

impl SortKey {
    pub fn parse(s: &str) -> Result<Self, FilterError> {
        match s {
            "" | "newest" => Ok(Self::Newest),
            "priceAsc" => Ok(Self::PriceAsc),
            "priceDesc" => Ok(Self::PriceDesc),
            other => Err(FilterError::InvalidSort(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::PriceAsc => "priceAsc",
            Self::PriceDesc => "priceDesc",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFilters {
    pub keyword: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub condition: Option<Condition>,
    pub recency: Recency,
    pub sort: SortKey,
}

impl TryFrom<ListingFilterParams> for ListingFilters {
    type Error = FilterError;

    fn try_from(params: ListingFilterParams) -> Result<Self, Self::Error> {
        let keyword = non_empty(params.q);
        let category = non_empty(params.category).filter(|c| !c.eq_ignore_ascii_case("all"));
        let min_price = parse_price(params.min_price)?;
        let max_price = parse_price(params.max_price)?;
        if let (Some(min), Some(max)) = (min_price, max_price) {
            if min > max {
                return Err(FilterError::EmptyPriceRange { min, max });
            }
        }

        let condition = match non_empty(params.condition) {
            None => None,
            Some(c) if c.eq_ignore_ascii_case("any") => None,
            Some(c) => Some(c.parse().map_err(|_| FilterError::InvalidCondition(c))?),
        };

        let recency = Recency::parse(params.date_posted.as_deref().unwrap_or("").trim())?;
        let sort = SortKey::parse(params.sort_by.as_deref().unwrap_or("").trim())?;

        Ok(Self { keyword, category, min_price, max_price, condition, recency, sort })
    }
}

impl ListingFilters {
    /// Query-string pairs for this filter set, leaving out anything at its
    /// default so the URL stays minimal.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(q) = &self.keyword {
            pairs.push(("q", q.clone()));
        }
        if let Some(category) = &self.category {
            pairs.push(("category", category.clone()));
        }
        if let Some(min) = self.min_price {
            pairs.push(("minPrice", min.to_string()));
        }
        if let Some(max) = self.max_price {
            pairs.push(("maxPrice", max.to_string()));
        }
        if let Some(condition) = self.condition {
            pairs.push(("condition", condition.as_str().to_string()));
        }
        if self.recency != Recency::Any {
            pairs.push(("datePosted", self.recency.as_str().to_string()));
        }
        if self.sort != SortKey::Newest {
            pairs.push(("sortBy", self.sort.as_str().to_string()));
        }
        pairs
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_price(value: Option<String>) -> Result<Option<f64>, FilterError> {
    match non_empty(value) {
        None => Ok(None),
        Some(raw) => match raw.parse::<f64>() {
            Ok(p) if p.is_finite() && p >= 0.0 => Ok(Some(p)),
            _ => Err(FilterError::InvalidPrice(raw)),
        },
    }
}
