//! Parameterized listing queries shared by the property and review repositories.
//!
//! Callers only ever contribute values through `push_bind`; every fragment of
//! SQL text comes from a `&'static str` chosen inside this crate, so sort keys
//! and filters cannot reach the statement as raw text.

use prm_core::{PageWindow, PropertySort, ReviewSort, SortOrder};
use sqlx::{QueryBuilder, Sqlite};

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gte,
    Lte,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => " = ",
            Self::Gte => " >= ",
            Self::Lte => " <= ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    expr: &'static str,
    op: CompareOp,
    value: SqlValue,
}

/// AND of the predicates that were actually supplied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conjunction {
    predicates: Vec<Predicate>,
}

impl Conjunction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, expr: &'static str, op: CompareOp, value: impl Into<SqlValue>) {
        self.predicates.push(Predicate {
            expr,
            op,
            value: value.into(),
        });
    }

    pub fn push_opt<T: Into<SqlValue>>(
        &mut self,
        expr: &'static str,
        op: CompareOp,
        value: Option<T>,
    ) {
        if let Some(value) = value {
            self.push(expr, op, value);
        }
    }

    fn write(&self, keyword: &'static str, qb: &mut QueryBuilder<'static, Sqlite>) {
        for (idx, predicate) in self.predicates.iter().enumerate() {
            qb.push(if idx == 0 { keyword } else { " AND " });
            qb.push(predicate.expr).push(predicate.op.as_sql());
            push_value(qb, &predicate.value);
        }
    }
}

fn push_value(qb: &mut QueryBuilder<'static, Sqlite>, value: &SqlValue) {
    match value {
        SqlValue::Integer(v) => qb.push_bind(*v),
        SqlValue::Real(v) => qb.push_bind(*v),
        SqlValue::Text(v) => qb.push_bind(v.clone()),
        SqlValue::Bool(v) => qb.push_bind(*v),
    };
}

/// Allow-list from logical property sort keys to physical columns.
pub fn property_sort_column(sort: PropertySort) -> &'static str {
    match sort {
        PropertySort::Name => "p.name",
        PropertySort::Rating => "stat_avg_rating",
        PropertySort::Reviews => "stat_total_reviews",
        PropertySort::Price => "p.price",
        PropertySort::CreatedAt => "p.createdAt",
    }
}

/// Allow-list from logical review sort keys to physical columns.
pub fn review_sort_column(sort: ReviewSort) -> &'static str {
    match sort {
        ReviewSort::Rating => "r.rating",
        ReviewSort::SubmittedAt => "r.submittedAt",
        ReviewSort::GuestName => "r.guestName",
    }
}

/// A filtered, optionally grouped, sorted and windowed SELECT that can be
/// rendered both as a page query and as the matching total-count query.
#[derive(Debug, Clone)]
pub struct ListingQuery {
    select: &'static str,
    filters: Conjunction,
    group_by: Option<&'static str>,
    having: Conjunction,
    order_by: Option<(&'static str, SortOrder)>,
    window: PageWindow,
}

impl ListingQuery {
    pub fn new(select: &'static str, window: PageWindow) -> Self {
        Self {
            select,
            filters: Conjunction::new(),
            group_by: None,
            having: Conjunction::new(),
            order_by: None,
            window,
        }
    }

    pub fn filtered(mut self, filters: Conjunction) -> Self {
        self.filters = filters;
        self
    }

    pub fn grouped_by(mut self, column: &'static str) -> Self {
        self.group_by = Some(column);
        self
    }

    /// Predicates over aggregates; applied after grouping.
    pub fn having(mut self, having: Conjunction) -> Self {
        self.having = having;
        self
    }

    pub fn ordered_by(mut self, column: Option<&'static str>, order: SortOrder) -> Self {
        self.order_by = column.map(|column| (column, order));
        self
    }

    fn write_body(&self, qb: &mut QueryBuilder<'static, Sqlite>) {
        qb.push(self.select);
        self.filters.write(" WHERE ", qb);
        if let Some(group_by) = self.group_by {
            qb.push(" GROUP BY ").push(group_by);
        }
        self.having.write(" HAVING ", qb);
    }

    pub fn count_query(&self) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) AS total FROM (");
        self.write_body(&mut qb);
        qb.push(") counted");
        qb
    }

    pub fn page_query(&self) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new("");
        self.write_body(&mut qb);
        if let Some((column, order)) = self.order_by {
            qb.push(" ORDER BY ").push(column).push(" ").push(order.as_sql());
        }
        qb.push(" LIMIT ")
            .push_bind(i64::from(self.window.limit))
            .push(" OFFSET ")
            .push_bind(i64::try_from(self.window.offset).unwrap_or(i64::MAX));
        qb
    }
}
