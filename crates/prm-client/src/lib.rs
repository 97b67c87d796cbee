//! Manager-side state: loads reviews and properties from the API once, keeps
//! them in memory, and derives the dashboard, triage and listing views.

use prm_core::{ListedReview, PropertyWithStats};
use tracing::{info, warn};

mod api;

pub use api::{
    ApiClient, ApprovalResult, ClientError, Health, IngestedReviews, IngestionMetadata,
    DEFAULT_API_URL,
};

pub const CRATE_NAME: &str = "prm-client";

pub const LOAD_FAILED_MESSAGE: &str =
    "Failed to load data. Please check if the backend server is running.";
pub const REFRESH_FAILED_MESSAGE: &str = "Failed to refresh reviews";
pub const APPROVAL_FAILED_MESSAGE: &str = "Failed to update review approval";

/// Triage filters; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewViewFilter {
    pub channel: Option<String>,
    pub min_rating: Option<u32>,
    pub approved: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DashboardStats {
    pub total_reviews: usize,
    pub approved_reviews: usize,
    pub average_rating: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingFilter {
    #[default]
    All,
    OneBed,
    TwoBed,
    ThreePlusBed,
}

impl ListingFilter {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "1bed" => Some(Self::OneBed),
            "2bed" => Some(Self::TwoBed),
            "3bed+" => Some(Self::ThreePlusBed),
            _ => None,
        }
    }

    fn matches(self, bedrooms: i64) -> bool {
        match self {
            Self::All => true,
            Self::OneBed => bedrooms == 1,
            Self::TwoBed => bedrooms == 2,
            Self::ThreePlusBed => bedrooms >= 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingSort {
    #[default]
    Name,
    Rating,
    PriceLow,
    PriceHigh,
    Reviews,
}

impl ListingSort {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "name" => Some(Self::Name),
            "rating" => Some(Self::Rating),
            "price-low" => Some(Self::PriceLow),
            "price-high" => Some(Self::PriceHigh),
            "reviews" => Some(Self::Reviews),
            _ => None,
        }
    }
}

pub struct ReviewStore {
    client: ApiClient,
    reviews: Vec<ListedReview>,
    properties: Vec<PropertyWithStats>,
    loading: bool,
    error: Option<String>,
}

impl ReviewStore {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            reviews: Vec::new(),
            properties: Vec::new(),
            loading: false,
            error: None,
        }
    }

    pub fn reviews(&self) -> &[ListedReview] {
        &self.reviews
    }

    pub fn properties(&self) -> &[PropertyWithStats] {
        &self.properties
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Fetches the ingestion report and the property list concurrently.
    pub async fn load_initial_data(&mut self) {
        self.loading = true;
        self.error = None;
        let result = tokio::try_join!(self.client.hostaway_reviews(), self.client.properties());
        match result {
            Ok((ingested, properties)) => {
                info!(
                    reviews = ingested.reviews.len(),
                    properties = properties.data.len(),
                    "loaded initial data"
                );
                self.reviews = ingested.reviews;
                self.properties = properties.data;
            }
            Err(err) => {
                warn!(error = %err, "loading initial data failed");
                self.error = Some(LOAD_FAILED_MESSAGE.to_string());
            }
        }
        self.loading = false;
    }

    pub async fn refresh_reviews(&mut self) {
        self.loading = true;
        match self.client.hostaway_reviews().await {
            Ok(ingested) => self.reviews = ingested.reviews,
            Err(err) => {
                warn!(error = %err, "refreshing reviews failed");
                self.error = Some(REFRESH_FAILED_MESSAGE.to_string());
            }
        }
        self.loading = false;
    }

    /// Flips a review's approval once the server accepts it. Unknown ids are
    /// ignored; a rejected request leaves local state untouched.
    pub async fn toggle_review_approval(&mut self, review_id: &str) {
        let Some(current) = self
            .reviews
            .iter()
            .find(|r| r.review.id == review_id)
            .map(|r| r.review.approved)
        else {
            return;
        };
        let wanted = !current;

        match self.client.approve_review(review_id, wanted).await {
            Ok(_) => {
                if let Some(listed) = self.reviews.iter_mut().find(|r| r.review.id == review_id) {
                    listed.review.approved = wanted;
                }
                info!(review_id, approved = wanted, "review approval toggled");
            }
            Err(err) => {
                warn!(review_id, error = %err, "approval request failed");
                self.error = Some(APPROVAL_FAILED_MESSAGE.to_string());
            }
        }
    }

    pub fn property_reviews(&self, property_id: &str) -> Vec<&ListedReview> {
        self.reviews
            .iter()
            .filter(|r| r.review.property_id.as_deref() == Some(property_id))
            .collect()
    }

    pub fn approved_reviews(&self, property_id: &str) -> Vec<&ListedReview> {
        self.reviews
            .iter()
            .filter(|r| r.review.property_id.as_deref() == Some(property_id) && r.review.approved)
            .collect()
    }

    /// Reviews of one property (or all when `property_id` is None) passing `filter`.
    pub fn filter_reviews(
        &self,
        property_id: Option<&str>,
        filter: &ReviewViewFilter,
    ) -> Vec<&ListedReview> {
        self.reviews
            .iter()
            .filter(|r| property_id.is_none_or(|id| r.review.property_id.as_deref() == Some(id)))
            .filter(|r| filter.channel.as_deref().is_none_or(|channel| r.review.channel == channel))
            .filter(|r| filter.min_rating.is_none_or(|min| r.review.rating >= f64::from(min)))
            .filter(|r| filter.approved.is_none_or(|approved| r.review.approved == approved))
            .collect()
    }

    pub fn dashboard_stats(&self) -> DashboardStats {
        let total_reviews = self.reviews.len();
        let average_rating = if total_reviews == 0 {
            0.0
        } else {
            self.reviews.iter().map(|r| r.review.rating).sum::<f64>() / total_reviews as f64
        };
        DashboardStats {
            total_reviews,
            approved_reviews: self.reviews.iter().filter(|r| r.review.approved).count(),
            average_rating,
        }
    }

    /// Case-insensitive substring match on name or address.
    pub fn search_properties(&self, term: &str) -> Vec<&PropertyWithStats> {
        let needle = term.to_lowercase();
        self.properties
            .iter()
            .filter(|p| {
                p.property.name.to_lowercase().contains(&needle)
                    || p.property.address.to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub fn listing_view(
        &self,
        filter: ListingFilter,
        sort: ListingSort,
    ) -> Vec<&PropertyWithStats> {
        let mut listed = self
            .properties
            .iter()
            .filter(|p| filter.matches(p.property.bedrooms))
            .collect::<Vec<_>>();
        match sort {
            ListingSort::Name => listed.sort_by(|a, b| a.property.name.cmp(&b.property.name)),
            ListingSort::Rating => {
                listed.sort_by(|a, b| b.stats.avg_rating.total_cmp(&a.stats.avg_rating))
            }
            ListingSort::PriceLow => listed.sort_by_key(|p| p.property.price),
            ListingSort::PriceHigh => listed.sort_by_key(|p| std::cmp::Reverse(p.property.price)),
            ListingSort::Reviews => {
                listed.sort_by_key(|p| std::cmp::Reverse(p.stats.total_reviews))
            }
        }
        listed
    }
}
