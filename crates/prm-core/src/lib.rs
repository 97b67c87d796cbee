//! Core domain model and pagination primitives for the property review manager.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "prm-core";

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// ISO-8601 UTC with millisecond precision, e.g. `2024-03-01T10:15:00.000Z`.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Rounds an aggregate rating to one decimal place for display.
pub fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Stored property record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: String,
    pub name: String,
    pub internal_listing_name: String,
    pub address: String,
    pub description: String,
    pub price: i64,
    pub bedrooms: i64,
    pub bathrooms: i64,
    pub guests: i64,
    pub images: Vec<String>,
}

/// Per-query review aggregates for one property.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyStats {
    pub avg_rating: f64,
    pub total_reviews: i64,
    pub approved_reviews: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyWithStats {
    #[serde(flatten)]
    pub property: Property,
    #[serde(flatten)]
    pub stats: PropertyStats,
}

/// Public-page projection of an approved review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicReview {
    pub id: String,
    pub rating: f64,
    pub guest_name: String,
    #[serde(default)]
    pub public_review: String,
    pub submitted_at: String,
}

/// A property with its approved reviews nested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDetails {
    #[serde(flatten)]
    pub property: Property,
    #[serde(flatten)]
    pub stats: PropertyStats,
    pub reviews: Vec<PublicReview>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCategory {
    pub category: String,
    pub rating: f64,
}

/// Persisted review in canonical shape. `rating` is always on the 0-5 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    #[serde(rename = "type")]
    pub review_type: String,
    pub property_id: Option<String>,
    pub guest_name: String,
    pub rating: f64,
    pub public_review: String,
    pub review_categories: Vec<ReviewCategory>,
    pub submitted_at: String,
    pub channel: String,
    pub approved: bool,
}

/// Review row joined with the owning property's display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedReview {
    #[serde(flatten)]
    pub review: Review,
    pub listing_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Closed set of logical sort keys for one listing endpoint.
pub trait SortKey: Copy + Sized {
    const DEFAULT: Self;
    const DEFAULT_ORDER: SortOrder;

    /// Unknown keys return `None`; callers then apply no ordering at all.
    fn parse(key: &str) -> Option<Self>;

    fn as_str(self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertySort {
    Name,
    Rating,
    Reviews,
    Price,
    CreatedAt,
}

impl SortKey for PropertySort {
    const DEFAULT: Self = Self::Name;
    const DEFAULT_ORDER: SortOrder = SortOrder::Asc;

    fn parse(key: &str) -> Option<Self> {
        match key {
            "name" => Some(Self::Name),
            "rating" => Some(Self::Rating),
            "reviews" => Some(Self::Reviews),
            "price" => Some(Self::Price),
            "created_at" => Some(Self::CreatedAt),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Rating => "rating",
            Self::Reviews => "reviews",
            Self::Price => "price",
            Self::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewSort {
    Rating,
    SubmittedAt,
    GuestName,
}

impl SortKey for ReviewSort {
    const DEFAULT: Self = Self::SubmittedAt;
    const DEFAULT_ORDER: SortOrder = SortOrder::Desc;

    fn parse(key: &str) -> Option<Self> {
        match key {
            "rating" => Some(Self::Rating),
            "submittedAt" => Some(Self::SubmittedAt),
            "guestName" => Some(Self::GuestName),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Rating => "rating",
            Self::SubmittedAt => "submittedAt",
            Self::GuestName => "guestName",
        }
    }
}

/// Page, size, and ordering requested by a caller. Range checks on `page`
/// and `limit` belong to the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest<S> {
    pub page: u32,
    pub limit: u32,
    pub sort: Option<S>,
    pub order: SortOrder,
}

impl<S: SortKey> Default for PageRequest<S> {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            sort: Some(S::DEFAULT),
            order: S::DEFAULT_ORDER,
        }
    }
}

impl<S> PageRequest<S> {
    pub fn window(&self) -> PageWindow {
        PageWindow::new(self.page, self.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: u32,
    pub offset: u64,
}

impl PageWindow {
    pub fn new(page: u32, limit: u32) -> Self {
        let offset = u64::from(page.saturating_sub(1)) * u64::from(limit);
        Self { limit, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub current_page: u32,
    pub total_pages: u64,
    pub total_items: u64,
    pub items_per_page: u32,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl PaginationMeta {
    pub fn new(total_items: u64, page: u32, limit: u32) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total_items.div_ceil(u64::from(limit))
        };
        Self {
            current_page: page,
            total_pages,
            total_items,
            items_per_page: limit,
            has_next_page: u64::from(page) < total_pages,
            has_previous_page: page > 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Property listing filters; all supplied filters are ANDed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyFilters {
    pub min_rating: Option<f64>,
    pub max_price: Option<f64>,
    pub bedrooms: Option<i64>,
    pub bathrooms: Option<f64>,
    pub guests: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewFilters {
    pub approved: Option<bool>,
    pub min_rating: Option<f64>,
    pub property_id: Option<String>,
}
