//! Query-string filters for list endpoints.
//!
//! Each filter is parsed from the raw query into a typed form first, so bad
//! input is reported per field, and then appended to a `sqlx::QueryBuilder`
//! as ` AND ...` clauses behind a base query that already has a WHERE.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use time::{macros::format_description, Date, OffsetDateTime, UtcOffset};

use crate::error::AppError;

/// Escapes LIKE wildcards so user input matches literally.
pub fn like_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn parse_decimal(field: &'static str, raw: &str) -> Result<Decimal, AppError> {
    Decimal::from_str(raw.trim()).map_err(|_| AppError::validation(field, "Enter a number."))
}

fn parse_date(field: &'static str, raw: &str) -> Result<Date, AppError> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|_| AppError::validation(field, "Enter a valid date (YYYY-MM-DD)."))
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    #[serde(rename = "name__iexact")]
    pub name_iexact: Option<String>,
    #[serde(rename = "name__icontains")]
    pub name_icontains: Option<String>,
    pub price: Option<String>,
    #[serde(rename = "price__lt")]
    pub price_lt: Option<String>,
    #[serde(rename = "price__gt")]
    pub price_gt: Option<String>,
    #[serde(rename = "price__range")]
    pub price_range: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductOrdering {
    pub column: &'static str,
    pub descending: bool,
}

impl FromStr for ProductOrdering {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (descending, name) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let column = match name {
            "name" => "name",
            "price" => "price",
            "stock" => "stock",
            _ => {
                return Err(AppError::validation(
                    "ordering",
                    "Ordering must be one of name, price, stock.",
                ))
            }
        };
        Ok(Self { column, descending })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProductFilter {
    pub name_iexact: Option<String>,
    pub name_icontains: Option<String>,
    pub price: Option<Decimal>,
    pub price_lt: Option<Decimal>,
    pub price_gt: Option<Decimal>,
    pub price_range: Option<(Decimal, Decimal)>,
    pub search: Option<String>,
    pub ordering: Option<ProductOrdering>,
}

impl TryFrom<ProductQuery> for ProductFilter {
    type Error = AppError;

    fn try_from(q: ProductQuery) -> Result<Self, Self::Error> {
        let price_range = match non_blank(q.price_range) {
            Some(raw) => {
                let (lo, hi) = raw.split_once(',').ok_or_else(|| {
                    AppError::validation("price__range", "Expected two values: min,max.")
                })?;
                Some((
                    parse_decimal("price__range", lo)?,
                    parse_decimal("price__range", hi)?,
                ))
            }
            None => None,
        };

        Ok(Self {
            name_iexact: non_blank(q.name_iexact),
            name_icontains: non_blank(q.name_icontains),
            price: non_blank(q.price)
                .map(|v| parse_decimal("price", &v))
                .transpose()?,
            price_lt: non_blank(q.price_lt)
                .map(|v| parse_decimal("price__lt", &v))
                .transpose()?,
            price_gt: non_blank(q.price_gt)
                .map(|v| parse_decimal("price__gt", &v))
                .transpose()?,
            price_range,
            search: non_blank(q.search),
            ordering: non_blank(q.ordering).map(|v| v.parse()).transpose()?,
        })
    }
}

impl ProductFilter {
    /// Same predicate as `push_conditions`, evaluated in memory.
    pub fn matches(&self, name: &str, description: &str, price: Decimal) -> bool {
        let contains = |haystack: &str, needle: &str| {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        };
        self.name_iexact
            .as_deref()
            .map_or(true, |n| name.to_lowercase() == n.to_lowercase())
            && self.name_icontains.as_deref().map_or(true, |n| contains(name, n))
            && self.price.map_or(true, |p| price == p)
            && self.price_lt.map_or(true, |p| price < p)
            && self.price_gt.map_or(true, |p| price > p)
            && self
                .price_range
                .map_or(true, |(lo, hi)| lo <= price && price <= hi)
            && self
                .search
                .as_deref()
                .map_or(true, |t| contains(name, t) || contains(description, t))
    }

    pub fn push_conditions(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        if let Some(name) = &self.name_iexact {
            qb.push(" AND lower(name) = lower(").push_bind(name.clone()).push(")");
        }
        if let Some(name) = &self.name_icontains {
            qb.push(" AND name ILIKE '%' || ")
                .push_bind(like_escape(name))
                .push(" || '%'");
        }
        if let Some(price) = self.price {
            qb.push(" AND price = ").push_bind(price);
        }
        if let Some(price) = self.price_lt {
            qb.push(" AND price < ").push_bind(price);
        }
        if let Some(price) = self.price_gt {
            qb.push(" AND price > ").push_bind(price);
        }
        if let Some((lo, hi)) = self.price_range {
            qb.push(" AND price BETWEEN ")
                .push_bind(lo)
                .push(" AND ")
                .push_bind(hi);
        }
        if let Some(term) = &self.search {
            let pattern = like_escape(term);
            qb.push(" AND (name ILIKE '%' || ")
                .push_bind(pattern.clone())
                .push(" || '%' OR description ILIKE '%' || ")
                .push_bind(pattern)
                .push(" || '%')");
        }
    }

    pub fn push_order_by(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self.ordering {
            Some(o) => {
                qb.push(" ORDER BY ").push(o.column);
                qb.push(if o.descending { " DESC" } else { " ASC" });
                qb.push(", id ASC");
            }
            None => {
                qb.push(" ORDER BY id ASC");
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderQuery {
    #[serde(rename = "status__iexact", alias = "status")]
    pub status_iexact: Option<String>,
    pub created_at: Option<String>,
    #[serde(rename = "created_at__lt")]
    pub created_at_lt: Option<String>,
    #[serde(rename = "created_at__gt")]
    pub created_at_gt: Option<String>,
}

/// Filters applied to the order list on top of the caller's scope.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OrderFilter {
    pub status_iexact: Option<String>,
    pub created_on: Option<Date>,
    pub created_before: Option<Date>,
    pub created_after: Option<Date>,
}

impl TryFrom<OrderQuery> for OrderFilter {
    type Error = AppError;

    fn try_from(q: OrderQuery) -> Result<Self, Self::Error> {
        Ok(Self {
            status_iexact: non_blank(q.status_iexact).map(|s| s.to_lowercase()),
            created_on: non_blank(q.created_at)
                .map(|v| parse_date("created_at", &v))
                .transpose()?,
            created_before: non_blank(q.created_at_lt)
                .map(|v| parse_date("created_at__lt", &v))
                .transpose()?,
            created_after: non_blank(q.created_at_gt)
                .map(|v| parse_date("created_at__gt", &v))
                .transpose()?,
        })
    }
}

impl OrderFilter {
    /// Same predicate as `push_conditions`, evaluated in memory.
    pub fn matches(&self, status: &str, created_at: OffsetDateTime) -> bool {
        let day = created_at.to_offset(UtcOffset::UTC).date();
        self.status_iexact
            .as_deref()
            .map_or(true, |s| status.to_lowercase() == s)
            && self.created_on.map_or(true, |d| day == d)
            && self.created_before.map_or(true, |d| day < d)
            && self.created_after.map_or(true, |d| day > d)
    }

    pub fn push_conditions(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        if let Some(status) = &self.status_iexact {
            qb.push(" AND lower(status) = ").push_bind(status.clone());
        }
        if let Some(d) = self.created_on {
            qb.push(" AND (created_at AT TIME ZONE 'UTC')::date = ").push_bind(d);
        }
        if let Some(d) = self.created_before {
            qb.push(" AND (created_at AT TIME ZONE 'UTC')::date < ").push_bind(d);
        }
        if let Some(d) = self.created_after {
            qb.push(" AND (created_at AT TIME ZONE 'UTC')::date > ").push_bind(d);
        }
    }
}
