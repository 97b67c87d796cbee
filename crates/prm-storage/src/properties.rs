use prm_core::{
    round_rating, PageRequest, Paginated, PaginationMeta, Property, PropertyDetails,
    PropertyFilters, PropertySort, PropertyStats, PropertyWithStats, PublicReview,
};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::query::{property_sort_column, CompareOp, Conjunction, ListingQuery};
use crate::StorageError;

/// Mean of positive ratings; a stored 0 means "unrated" and is skipped.
const AVG_POSITIVE_RATING: &str = "COALESCE(AVG(CASE WHEN r.rating > 0 THEN r.rating END), 0.0)";

const LIST_WITH_STATS_SELECT: &str = r#"
        SELECT p.id, p.name, p.internalListingName, p.address, p.description,
               p.price, p.bedrooms, p.bathrooms, p.guests, p.images,
               COUNT(r.id) AS stat_total_reviews,
               COUNT(CASE WHEN r.approved = 1 THEN 1 END) AS stat_approved_reviews,
               COALESCE(AVG(CASE WHEN r.rating > 0 THEN r.rating END), 0.0) AS stat_avg_rating
          FROM properties p
          LEFT JOIN reviews r ON r.propertyId = p.id"#;

#[derive(Debug, Clone)]
pub struct PropertyRepository {
    pool: SqlitePool,
}

impl PropertyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64, StorageError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM properties")
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    pub async fn insert(&self, property: &Property) -> Result<(), StorageError> {
        let images = serde_json::to_string(&property.images)
            .map_err(|source| StorageError::Encode { column: "images", source })?;
        sqlx::query(
            r#"
            INSERT INTO properties
                (id, name, internalListingName, address, description, price, bedrooms, bathrooms, guests, images)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&property.id)
        .bind(&property.name)
        .bind(&property.internal_listing_name)
        .bind(&property.address)
        .bind(&property.description)
        .bind(property.price)
        .bind(property.bedrooms)
        .bind(property.bathrooms)
        .bind(property.guests)
        .bind(images)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts `fixture` only when the table is empty; returns rows inserted.
    pub async fn seed_if_empty(&self, fixture: &[Property]) -> Result<usize, StorageError> {
        if self.count().await? > 0 {
            return Ok(0);
        }
        for property in fixture {
            self.insert(property).await?;
        }
        Ok(fixture.len())
    }

    pub async fn list_with_stats(
        &self,
        filters: &PropertyFilters,
        page: &PageRequest<PropertySort>,
    ) -> Result<Paginated<PropertyWithStats>, StorageError> {
        let mut raw = Conjunction::new();
        raw.push_opt("p.price", CompareOp::Lte, filters.max_price);
        raw.push_opt("p.bedrooms", CompareOp::Eq, filters.bedrooms);
        raw.push_opt("p.bathrooms", CompareOp::Eq, filters.bathrooms);
        raw.push_opt("p.guests", CompareOp::Gte, filters.guests);

        let mut aggregate = Conjunction::new();
        aggregate.push_opt(AVG_POSITIVE_RATING, CompareOp::Gte, filters.min_rating);

        let query = ListingQuery::new(LIST_WITH_STATS_SELECT, page.window())
            .filtered(raw)
            .grouped_by("p.id")
            .having(aggregate)
            .ordered_by(page.sort.map(property_sort_column), page.order);

        let total: i64 = query
            .count_query()
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let rows = query.page_query().build().fetch_all(&self.pool).await?;
        let data = rows
            .iter()
            .map(|row| {
                Ok(PropertyWithStats {
                    property: property_from_row(row)?,
                    stats: stats_from_row(row)?,
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        Ok(Paginated {
            data,
            pagination: PaginationMeta::new(total.max(0) as u64, page.page, page.limit),
        })
    }

    /// Property with its approved reviews, or `None` for an unknown id.
    pub async fn get_details(
        &self,
        property_id: &str,
    ) -> Result<Option<PropertyDetails>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT p.id, p.name, p.internalListingName, p.address, p.description,
                   p.price, p.bedrooms, p.bathrooms, p.guests, p.images,
                   (SELECT COUNT(*) FROM reviews rc WHERE rc.propertyId = p.id) AS stat_total_reviews,
                   COUNT(r.id) AS stat_approved_reviews,
                   COALESCE(AVG(CASE WHEN r.rating > 0 THEN r.rating END), 0.0) AS stat_avg_rating,
                   json_group_array(
                       CASE WHEN r.id IS NOT NULL THEN
                           json_object(
                               'id', r.id,
                               'rating', r.rating,
                               'guestName', r.guestName,
                               'publicReview', r.publicReview,
                               'submittedAt', r.submittedAt
                           )
                       END
                   ) AS nested_reviews
              FROM properties p
              LEFT JOIN reviews r ON r.propertyId = p.id AND r.approved = 1
             WHERE p.id = ?
             GROUP BY p.id
            "#,
        )
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let nested: Option<String> = row.try_get("nested_reviews")?;
        Ok(Some(PropertyDetails {
            property: property_from_row(&row)?,
            stats: stats_from_row(&row)?,
            reviews: parse_nested_reviews(nested.as_deref()),
        }))
    }

    /// Exact-match lookup used to attach incoming reviews to a property.
    pub async fn resolve_id_by_listing_name(
        &self,
        listing_name: &str,
    ) -> Result<Option<String>, StorageError> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM properties WHERE internalListingName = ? ORDER BY createdAt, id LIMIT 1",
        )
        .bind(listing_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}

fn property_from_row(row: &SqliteRow) -> Result<Property, StorageError> {
    let id: String = row.try_get("id")?;
    let images_raw: Option<String> = row.try_get("images")?;
    let images = match images_raw.as_deref() {
        None | Some("") => Vec::new(),
        Some(raw) => serde_json::from_str(raw).map_err(|source| StorageError::CorruptColumn {
            column: "images",
            id: id.clone(),
            source,
        })?,
    };
    Ok(Property {
        name: row.try_get("name")?,
        internal_listing_name: row.try_get("internalListingName")?,
        address: row.try_get("address")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        bedrooms: row.try_get("bedrooms")?,
        bathrooms: row.try_get("bathrooms")?,
        guests: row.try_get("guests")?,
        images,
        id,
    })
}

fn stats_from_row(row: &SqliteRow) -> Result<PropertyStats, StorageError> {
    let avg: f64 = row.try_get("stat_avg_rating")?;
    Ok(PropertyStats {
        avg_rating: round_rating(avg),
        total_reviews: row.try_get("stat_total_reviews")?,
        approved_reviews: row.try_get("stat_approved_reviews")?,
    })
}

/// The LEFT JOIN yields `[null]` for a property without approved reviews, so
/// entries without an id are dropped; an unreadable array yields no reviews.
fn parse_nested_reviews(raw: Option<&str>) -> Vec<PublicReview> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(raw) else {
        return Vec::new();
    };
    let mut reviews = entries
        .into_iter()
        .filter(|entry| entry.get("id").is_some_and(|id| !id.is_null()))
        .filter_map(|entry| serde_json::from_value::<PublicReview>(entry).ok())
        .collect::<Vec<_>>();
    reviews.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
    reviews
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use prm_core::{Review, ReviewCategory, SortKey, SortOrder};

    fn property(id: &str, name: &str, price: i64, bedrooms: i64, guests: i64) -> Property {
        Property {
            id: id.to_string(),
            name: name.to_string(),
            internal_listing_name: format!("listing-{id}"),
            address: format!("{id} Test Street"),
            description: "test property".to_string(),
            price,
            bedrooms,
            bathrooms: 1,
            guests,
            images: vec![
                format!("https://img.test/{id}/1.jpg"),
                format!("https://img.test/{id}/2.jpg"),
            ],
        }
    }

    fn review(
        id: &str,
        property_id: &str,
        rating: f64,
        approved: bool,
        submitted_at: &str,
    ) -> Review {
        Review {
            id: id.to_string(),
            review_type: "guest-to-host".to_string(),
            property_id: Some(property_id.to_string()),
            guest_name: format!("Guest {id}"),
            rating,
            public_review: format!("review {id}"),
            review_categories: vec![ReviewCategory { category: "cleanliness".into(), rating }],
            submitted_at: submitted_at.to_string(),
            channel: "Hostaway".to_string(),
            approved,
        }
    }

    async fn seeded() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let props = db.properties();
        props.insert(&property("a", "Alpha Flat", 120, 1, 2)).await.unwrap();
        props.insert(&property("b", "Bravo House", 300, 3, 6)).await.unwrap();
        props.insert(&property("c", "Charlie Loft", 90, 2, 4)).await.unwrap();

        let reviews = db.reviews();
        reviews.upsert(&review("r1", "a", 0.0, true, "2024-01-01T00:00:00.000Z")).await.unwrap();
        reviews.upsert(&review("r2", "a", 4.0, true, "2024-01-02T00:00:00.000Z")).await.unwrap();
        reviews.upsert(&review("r3", "a", 5.0, false, "2024-01-03T00:00:00.000Z")).await.unwrap();
        reviews.upsert(&review("r4", "b", 3.0, true, "2024-01-04T00:00:00.000Z")).await.unwrap();
        db
    }

    fn page(sort: Option<PropertySort>, order: SortOrder) -> PageRequest<PropertySort> {
        PageRequest {
            page: 1,
            limit: 10,
            sort,
            order,
        }
    }

    #[tokio::test]
    async fn average_excludes_zero_ratings() {
        let db = seeded().await;
        let result = db
            .properties()
            .list_with_stats(&PropertyFilters::default(), &PageRequest::default())
            .await
            .unwrap();

        let alpha = result.data.iter().find(|p| p.property.id == "a").unwrap();
        assert_eq!(alpha.stats.avg_rating, 4.5);
        assert_eq!(alpha.stats.total_reviews, 3);
        assert_eq!(alpha.stats.approved_reviews, 2);

        let charlie = result.data.iter().find(|p| p.property.id == "c").unwrap();
        assert_eq!(charlie.stats.avg_rating, 0.0);
        assert_eq!(charlie.stats.total_reviews, 0);
        assert_eq!(charlie.property.images.len(), 2);
    }

    #[tokio::test]
    async fn default_sort_is_name_ascending() {
        let db = seeded().await;
        let result = db
            .properties()
            .list_with_stats(&PropertyFilters::default(), &PageRequest::default())
            .await
            .unwrap();
        let names = result.data.iter().map(|p| p.property.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Alpha Flat", "Bravo House", "Charlie Loft"]);
        assert_eq!(result.pagination.total_items, 3);
        assert!(!result.pagination.has_next_page);
    }

    #[tokio::test]
    async fn sorts_by_aggregate_columns() {
        let db = seeded().await;
        let no_filters = PropertyFilters::default();
        let by_reviews = db
            .properties()
            .list_with_stats(&no_filters, &page(PropertySort::parse("reviews"), SortOrder::Desc))
            .await
            .unwrap();
        assert_eq!(by_reviews.data[0].property.id, "a");

        let by_price = db
            .properties()
            .list_with_stats(&no_filters, &page(Some(PropertySort::Price), SortOrder::Asc))
            .await
            .unwrap();
        let prices = by_price.data.iter().map(|p| p.property.price).collect::<Vec<_>>();
        assert_eq!(prices, vec![90, 120, 300]);
    }

    #[tokio::test]
    async fn min_rating_filters_on_the_aggregate_and_counts_match() {
        let db = seeded().await;
        let filters = PropertyFilters {
            min_rating: Some(4.0),
            ..Default::default()
        };
        let result = db
            .properties()
            .list_with_stats(&filters, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].property.id, "a");
        assert_eq!(result.pagination.total_items, 1);
    }

    #[tokio::test]
    async fn raw_column_filters_are_combined() {
        let db = seeded().await;
        let filters = PropertyFilters {
            max_price: Some(200.0),
            guests: Some(3),
            ..Default::default()
        };
        let result = db
            .properties()
            .list_with_stats(&filters, &PageRequest::default())
            .await
            .unwrap();
        let ids = result.data.iter().map(|p| p.property.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["c"]);

        let bedrooms = PropertyFilters {
            bedrooms: Some(3),
            ..Default::default()
        };
        let result = db
            .properties()
            .list_with_stats(&bedrooms, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].property.bedrooms, 3);
    }

    #[tokio::test]
    async fn pagination_windows_the_rows() {
        let db = seeded().await;
        let request = PageRequest {
            page: 2,
            limit: 2,
            sort: Some(PropertySort::Name),
            order: SortOrder::Asc,
        };
        let result = db
            .properties()
            .list_with_stats(&PropertyFilters::default(), &request)
            .await
            .unwrap();
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].property.name, "Charlie Loft");
        assert_eq!(result.pagination.total_pages, 2);
        assert!(result.pagination.has_previous_page);
        assert!(!result.pagination.has_next_page);
    }

    #[tokio::test]
    async fn details_nest_only_approved_reviews_newest_first() {
        let db = seeded().await;
        let details = db.properties().get_details("a").await.unwrap().expect("property a");
        let ids = details.reviews.iter().map(|r| r.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["r2", "r1"]);
        assert_eq!(details.stats.total_reviews, 3);
        assert_eq!(details.stats.approved_reviews, 2);
        assert_eq!(details.stats.avg_rating, 4.0);
        assert_eq!(details.reviews[0].guest_name, "Guest r2");
    }

    #[tokio::test]
    async fn details_without_approved_reviews_has_empty_list() {
        let db = seeded().await;
        let details = db.properties().get_details("c").await.unwrap().expect("property c");
        assert!(details.reviews.is_empty());
        assert_eq!(details.stats.avg_rating, 0.0);
    }

    #[tokio::test]
    async fn unknown_property_details_is_none() {
        let db = seeded().await;
        assert!(db.properties().get_details("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolves_ids_by_exact_listing_name() {
        let db = seeded().await;
        let props = db.properties();
        let resolved = props.resolve_id_by_listing_name("listing-b").await.unwrap();
        assert_eq!(resolved.as_deref(), Some("b"));
        assert_eq!(props.resolve_id_by_listing_name("LISTING-B").await.unwrap(), None);
        assert_eq!(props.resolve_id_by_listing_name("listing-b ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn seeding_is_skipped_when_rows_exist() {
        let db = seeded().await;
        let inserted = db
            .properties()
            .seed_if_empty(&[property("z", "Zulu", 1, 1, 1)])
            .await
            .unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(db.properties().count().await.unwrap(), 3);
    }

    #[test]
    fn nested_review_parse_drops_nulls_and_garbage() {
        let raw = r#"[null, {"id": null}, {"id": "x1", "rating": 4.0, "guestName": "A", "publicReview": "ok", "submittedAt": "2024-01-01T00:00:00.000Z"}, {"id": "x2"}, 7]"#;
        let reviews = parse_nested_reviews(Some(raw));
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].id, "x1");

        assert!(parse_nested_reviews(Some("not json")).is_empty());
        assert!(parse_nested_reviews(Some("[null]")).is_empty());
        assert!(parse_nested_reviews(None).is_empty());
    }
}
