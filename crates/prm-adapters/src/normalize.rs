//! Hostaway review records mapped onto the canonical 0-5 review shape.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use prm_core::{iso_timestamp, Review, ReviewCategory};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const CHANNEL_LABEL: &str = "Hostaway";
pub const SOURCE_LABEL: &str = "hostaway";

/// Category ratings arrive on a 0-10 scale.
const CATEGORY_SCALE_DIVISOR: f64 = 2.0;
const MAX_RATING: f64 = 5.0;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Assumed when the upstream record carries no `type`.
pub const DEFAULT_REVIEW_TYPE: &str = "guest-to-host";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostawayCategory {
    pub category: String,
    pub rating: f64,
}

/// Review record as served by `GET /reviews`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostawayReview {
    pub id: u64,
    #[serde(
        rename = "type",
        default = "default_review_type",
        deserialize_with = "review_type_or_default"
    )]
    pub review_type: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub public_review: Option<String>,
    #[serde(default)]
    pub review_category: Option<Vec<HostawayCategory>>,
    pub submitted_at: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub guest_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub listing_name: String,
}

fn default_review_type() -> String {
    DEFAULT_REVIEW_TYPE.to_string()
}

fn review_type_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_review_type))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalReview {
    pub id: String,
    #[serde(rename = "type")]
    pub review_type: String,
    pub status: Option<String>,
    pub rating: f64,
    pub public_review: String,
    pub review_categories: Vec<ReviewCategory>,
    pub submitted_at: String,
    pub guest_name: String,
    pub listing_name: String,
    pub channel: String,
    pub source: String,
    pub property_id: Option<String>,
    pub approved: bool,
}

impl CanonicalReview {
    /// Storage row for this review, attached to `property_id` (None for orphans).
    pub fn into_review(self, property_id: Option<String>) -> Review {
        Review {
            id: self.id,
            review_type: self.review_type,
            property_id,
            guest_name: self.guest_name,
            rating: self.rating,
            public_review: self.public_review,
            review_categories: self.review_categories,
            submitted_at: self.submitted_at,
            channel: self.channel,
            approved: self.approved,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("review {id}: unrecognised submittedAt {value:?}")]
    InvalidTimestamp { id: u64, value: String },
}

pub fn normalize_review(raw: &HostawayReview) -> Result<CanonicalReview, NormalizeError> {
    let submitted_at =
        parse_submitted_at(&raw.submitted_at).ok_or_else(|| NormalizeError::InvalidTimestamp {
            id: raw.id,
            value: raw.submitted_at.clone(),
        })?;
    let categories = raw.review_category.as_deref().unwrap_or_default();

    Ok(CanonicalReview {
        id: raw.id.to_string(),
        review_type: raw.review_type.clone(),
        status: raw.status.clone(),
        rating: overall_rating(raw.rating, categories),
        public_review: raw.public_review.clone().unwrap_or_default(),
        review_categories: categories
            .iter()
            .map(|c| ReviewCategory {
                category: c.category.clone(),
                rating: c.rating / CATEGORY_SCALE_DIVISOR,
            })
            .collect(),
        submitted_at: iso_timestamp(submitted_at),
        guest_name: raw.guest_name.clone(),
        listing_name: raw.listing_name.clone(),
        channel: CHANNEL_LABEL.to_string(),
        source: SOURCE_LABEL.to_string(),
        property_id: None,
        approved: false,
    })
}

fn overall_rating(direct: Option<f64>, categories: &[HostawayCategory]) -> f64 {
    let rating = match direct {
        Some(rating) if rating != 0.0 && rating.is_finite() => rating,
        _ if categories.is_empty() => 0.0,
        _ => {
            let sum: f64 = categories.iter().map(|c| c.rating).sum();
            sum / categories.len() as f64 / CATEGORY_SCALE_DIVISOR
        }
    };
    rating.clamp(0.0, MAX_RATING)
}

fn parse_submitted_at(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(at) = NaiveDateTime::parse_from_str(value, format) {
            return Some(at.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(
        rating: Option<f64>,
        categories: Option<Vec<(&str, f64)>>,
        submitted_at: &str,
    ) -> HostawayReview {
        HostawayReview {
            id: 7453,
            review_type: "host-to-guest".to_string(),
            status: Some("published".to_string()),
            rating,
            public_review: Some("Shane and family are wonderful!".to_string()),
            review_category: categories.map(|cats| {
                cats.into_iter()
                    .map(|(category, rating)| HostawayCategory {
                        category: category.to_string(),
                        rating,
                    })
                    .collect()
            }),
            submitted_at: submitted_at.to_string(),
            guest_name: "Shane Finkelstein".to_string(),
            listing_name: "2B N1 A - 29 Shoreditch Heights".to_string(),
        }
    }

    #[test]
    fn null_and_missing_text_fields_take_defaults() {
        let record: HostawayReview = serde_json::from_value(serde_json::json!({
            "id": 9001,
            "type": null,
            "rating": null,
            "submittedAt": "2024-01-05",
            "guestName": null,
            "listingName": null
        }))
        .unwrap();
        assert_eq!(record.review_type, DEFAULT_REVIEW_TYPE);
        assert_eq!(record.guest_name, "");
        assert_eq!(record.listing_name, "");

        let minimal = serde_json::json!({ "id": 9002, "submittedAt": "2024-01-05" });
        let untyped: HostawayReview = serde_json::from_value(minimal).unwrap();
        assert_eq!(untyped.review_type, DEFAULT_REVIEW_TYPE);
        assert!(untyped.review_category.is_none());
    }

    #[test]
    fn category_average_is_halved_when_rating_missing() {
        let review = normalize_review(&raw(
            None,
            Some(vec![("cleanliness", 10.0), ("communication", 8.0)]),
            "2020-08-21 22:45:14",
        ))
        .unwrap();
        assert_eq!(review.rating, 4.5);
        let scaled = review.review_categories.iter().map(|c| c.rating).collect::<Vec<_>>();
        assert_eq!(scaled, vec![5.0, 4.0]);
        assert_eq!(review.review_categories[1].category, "communication");
        assert_eq!(review.id, "7453");
        assert_eq!(review.channel, "Hostaway");
        assert_eq!(review.source, "hostaway");
        assert!(!review.approved);
        assert!(review.property_id.is_none());
    }

    #[test]
    fn direct_rating_wins_over_categories() {
        let input = raw(Some(4.0), Some(vec![("cleanliness", 2.0)]), "2024-01-05");
        let review = normalize_review(&input).unwrap();
        assert_eq!(review.rating, 4.0);
        assert_eq!(review.review_categories[0].rating, 1.0);
    }

    #[test]
    fn zero_rating_falls_back_to_categories() {
        let input = raw(Some(0.0), Some(vec![("cleanliness", 6.0)]), "2024-01-05");
        let review = normalize_review(&input).unwrap();
        assert_eq!(review.rating, 3.0);
    }

    #[test]
    fn no_rating_and_no_categories_is_zero() {
        assert_eq!(normalize_review(&raw(None, None, "2024-01-05")).unwrap().rating, 0.0);
        let empty = normalize_review(&raw(None, Some(Vec::new()), "2024-01-05")).unwrap();
        assert_eq!(empty.rating, 0.0);
        assert!(empty.review_categories.is_empty());
    }

    #[test]
    fn out_of_scale_direct_rating_is_clamped() {
        assert_eq!(normalize_review(&raw(Some(10.0), None, "2024-01-05")).unwrap().rating, 5.0);
    }

    #[test]
    fn timestamps_are_reemitted_as_utc_millis() {
        let cases = [
            ("2020-08-21 22:45:14", "2020-08-21T22:45:14.000Z"),
            ("2020-08-21T22:45:14", "2020-08-21T22:45:14.000Z"),
            ("2024-02-01T19:00:00Z", "2024-02-01T19:00:00.000Z"),
            ("2024-02-01T21:00:00+02:00", "2024-02-01T19:00:00.000Z"),
            ("2024-02-01", "2024-02-01T00:00:00.000Z"),
        ];
        for (input, expected) in cases {
            let review = normalize_review(&raw(None, None, input)).unwrap();
            assert_eq!(review.submitted_at, expected, "input {input}");
        }
    }

    #[test]
    fn unparseable_timestamp_is_an_error() {
        let err = normalize_review(&raw(None, None, "sometime last spring")).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::InvalidTimestamp {
                id: 7453,
                value: "sometime last spring".to_string()
            }
        );
    }

    #[test]
    fn normalizing_is_deterministic() {
        let input = raw(None, Some(vec![("cleanliness", 9.0)]), "2023-12-18 08:00:00");
        assert_eq!(normalize_review(&input).unwrap(), normalize_review(&input).unwrap());
    }

    #[test]
    fn canonical_review_becomes_storage_row() {
        let canonical = normalize_review(&raw(Some(5.0), None, "2024-01-05")).unwrap();
        let review = canonical.into_review(Some("155613".to_string()));
        assert_eq!(review.property_id.as_deref(), Some("155613"));
        assert_eq!(review.review_type, "host-to-guest");
        assert_eq!(review.public_review, "Shane and family are wonderful!");
    }
}
