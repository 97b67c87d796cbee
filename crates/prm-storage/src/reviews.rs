use prm_core::{
    ListedReview, PageRequest, Paginated, PaginationMeta, Review, ReviewCategory, ReviewFilters,
    ReviewSort,
};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::query::{review_sort_column, CompareOp, Conjunction, ListingQuery};
use crate::StorageError;

const LISTED_REVIEW_SELECT: &str = r#"
        SELECT r.id, r.type, r.propertyId, r.guestName, r.rating, r.publicReview,
               r.reviewCategories, r.submittedAt, r.channel, r.approved,
               p.name AS listing_name
          FROM reviews r
          LEFT JOIN properties p ON r.propertyId = p.id"#;

/// Outcome of an approval write. Zero rows means the id was unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalUpdate {
    pub rows_affected: u64,
}

impl ApprovalUpdate {
    pub fn matched(&self) -> bool {
        self.rows_affected > 0
    }
}

#[derive(Debug, Clone)]
pub struct ReviewRepository {
    pool: SqlitePool,
}

impl ReviewRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or fully replace the row, `approved` included.
    pub async fn upsert(&self, review: &Review) -> Result<(), StorageError> {
        let categories = encode_categories(review)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO reviews
                (id, type, propertyId, guestName, rating, publicReview, reviewCategories, submittedAt, channel, approved)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&review.id)
        .bind(&review.review_type)
        .bind(&review.property_id)
        .bind(&review.guest_name)
        .bind(review.rating)
        .bind(&review.public_review)
        .bind(categories)
        .bind(&review.submitted_at)
        .bind(&review.channel)
        .bind(review.approved)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Like [`upsert`](Self::upsert), but an existing row keeps its `approved` flag.
    pub async fn upsert_preserving_approval(&self, review: &Review) -> Result<(), StorageError> {
        let categories = encode_categories(review)?;
        sqlx::query(
            r#"
            INSERT INTO reviews
                (id, type, propertyId, guestName, rating, publicReview, reviewCategories, submittedAt, channel, approved)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                type = excluded.type,
                propertyId = excluded.propertyId,
                guestName = excluded.guestName,
                rating = excluded.rating,
                publicReview = excluded.publicReview,
                reviewCategories = excluded.reviewCategories,
                submittedAt = excluded.submittedAt,
                channel = excluded.channel
            "#,
        )
        .bind(&review.id)
        .bind(&review.review_type)
        .bind(&review.property_id)
        .bind(&review.guest_name)
        .bind(review.rating)
        .bind(&review.public_review)
        .bind(categories)
        .bind(&review.submitted_at)
        .bind(&review.channel)
        .bind(review.approved)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_all(&self) -> Result<Vec<ListedReview>, StorageError> {
        let sql = format!("{LISTED_REVIEW_SELECT} ORDER BY r.submittedAt DESC, r.id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(listed_review_from_row).collect()
    }

    pub async fn list_paginated(
        &self,
        filters: &ReviewFilters,
        page: &PageRequest<ReviewSort>,
    ) -> Result<Paginated<ListedReview>, StorageError> {
        let mut predicates = Conjunction::new();
        predicates.push_opt("r.approved", CompareOp::Eq, filters.approved);
        predicates.push_opt("r.rating", CompareOp::Gte, filters.min_rating);
        predicates.push_opt("r.propertyId", CompareOp::Eq, filters.property_id.clone());

        let query = ListingQuery::new(LISTED_REVIEW_SELECT, page.window())
            .filtered(predicates)
            .ordered_by(page.sort.map(review_sort_column), page.order);

        let total: i64 = query
            .count_query()
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;
        let rows = query.page_query().build().fetch_all(&self.pool).await?;
        let data = rows
            .iter()
            .map(listed_review_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Paginated {
            data,
            pagination: PaginationMeta::new(total.max(0) as u64, page.page, page.limit),
        })
    }

    pub async fn set_approval(
        &self,
        review_id: &str,
        approved: bool,
    ) -> Result<ApprovalUpdate, StorageError> {
        let result = sqlx::query("UPDATE reviews SET approved = ? WHERE id = ?")
            .bind(approved)
            .bind(review_id)
            .execute(&self.pool)
            .await?;
        Ok(ApprovalUpdate {
            rows_affected: result.rows_affected(),
        })
    }

    pub async fn get(&self, review_id: &str) -> Result<Option<ListedReview>, StorageError> {
        let sql = format!("{LISTED_REVIEW_SELECT} WHERE r.id = ?");
        let row = sqlx::query(&sql)
            .bind(review_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(listed_review_from_row).transpose()
    }
}

fn encode_categories(review: &Review) -> Result<String, StorageError> {
    serde_json::to_string(&review.review_categories).map_err(|source| StorageError::Encode {
        column: "reviewCategories",
        source,
    })
}

fn listed_review_from_row(row: &SqliteRow) -> Result<ListedReview, StorageError> {
    let id: String = row.try_get("id")?;
    let raw_categories: Option<String> = row.try_get("reviewCategories")?;
    let review_categories: Vec<ReviewCategory> = match raw_categories.as_deref() {
        None | Some("") => Vec::new(),
        Some(raw) => serde_json::from_str(raw).map_err(|source| StorageError::CorruptColumn {
            column: "reviewCategories",
            id: id.clone(),
            source,
        })?,
    };
    let public_review: Option<String> = row.try_get("publicReview")?;

    Ok(ListedReview {
        review: Review {
            review_type: row.try_get("type")?,
            property_id: row.try_get("propertyId")?,
            guest_name: row.try_get("guestName")?,
            rating: row.try_get("rating")?,
            public_review: public_review.unwrap_or_default(),
            review_categories,
            submitted_at: row.try_get("submittedAt")?,
            channel: row.try_get("channel")?,
            approved: row.try_get("approved")?,
            id,
        },
        listing_name: row.try_get("listing_name")?,
    })
}
