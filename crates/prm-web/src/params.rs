//! Request boundary: raw query strings, path ids and bodies are validated
//! once here and turned into the typed requests the repositories take.

use prm_core::{
    PageRequest, PropertyFilters, PropertySort, ReviewFilters, ReviewSort, SortKey, SortOrder,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ApiError, FieldIssue};

const MAX_ID_LEN: usize = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyListParams {
    page: Option<String>,
    limit: Option<String>,
    sort: Option<String>,
    order: Option<String>,
    min_rating: Option<String>,
    max_price: Option<String>,
    bedrooms: Option<String>,
    bathrooms: Option<String>,
    guests: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewListParams {
    page: Option<String>,
    limit: Option<String>,
    sort: Option<String>,
    order: Option<String>,
    approved: Option<String>,
    min_rating: Option<String>,
    property_id: Option<String>,
}

impl PropertyListParams {
    pub fn validate(&self) -> Result<(PropertyFilters, PageRequest<PropertySort>), ApiError> {
        let mut check = Checker::default();
        let page = check.page_request(
            self.page.as_deref(),
            self.limit.as_deref(),
            self.sort.as_deref(),
            self.order.as_deref(),
        );
        let filters = PropertyFilters {
            min_rating: check.number(
                "minRating",
                self.min_rating.as_deref(),
                Bound::Range(0.0, 5.0),
            ),
            max_price: check.number("maxPrice", self.max_price.as_deref(), Bound::Positive),
            bedrooms: check.integer("bedrooms", self.bedrooms.as_deref(), 0, None),
            bathrooms: check.number("bathrooms", self.bathrooms.as_deref(), Bound::AtLeast(0.0)),
            guests: check.integer("guests", self.guests.as_deref(), 1, None),
        };
        check.finish((filters, page))
    }
}

impl ReviewListParams {
    pub fn validate(&self) -> Result<(ReviewFilters, PageRequest<ReviewSort>), ApiError> {
        let mut check = Checker::default();
        let page = check.page_request(
            self.page.as_deref(),
            self.limit.as_deref(),
            self.sort.as_deref(),
            self.order.as_deref(),
        );
        let filters = ReviewFilters {
            approved: check.boolean("approved", self.approved.as_deref()),
            min_rating: check.number(
                "minRating",
                self.min_rating.as_deref(),
                Bound::Range(0.0, 5.0),
            ),
            property_id: check.non_empty("propertyId", self.property_id.as_deref()),
        };
        check.finish((filters, page))
    }
}

/// Path ids are 1-100 characters of `[A-Za-z0-9_-]`.
pub fn validate_id(field: &str, value: &str) -> Result<(), ApiError> {
    let issue = if value.is_empty() {
        Some(format!("\"{field}\" is not allowed to be empty"))
    } else if value.chars().count() > MAX_ID_LEN {
        Some(format!(
            "\"{field}\" length must be less than or equal to {MAX_ID_LEN} characters long"
        ))
    } else if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Some(format!("\"{field}\" with value \"{value}\" fails to match the required pattern"))
    } else {
        None
    };
    match issue {
        Some(message) => Err(ApiError::InvalidParams(vec![FieldIssue::new(field, message)])),
        None => Ok(()),
    }
}

/// Reads `{"approved": bool}`; anything else is a body error naming the field.
pub fn parse_approval_body(body: &[u8]) -> Result<bool, ApiError> {
    let invalid = |message: &str| ApiError::InvalidBody(vec![FieldIssue::new("approved", message)]);
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(invalid("\"approved\" is required"));
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| invalid("request body is not valid JSON; expected {\"approved\": boolean}"))?;
    let Value::Object(map) = value else {
        return Err(invalid("request body must be an object with a boolean \"approved\""));
    };
    match map.get("approved") {
        None | Some(Value::Null) => Err(invalid("\"approved\" is required")),
        Some(Value::Bool(approved)) => Ok(*approved),
        Some(_) => Err(invalid("\"approved\" must be a boolean")),
    }
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Range(f64, f64),
    AtLeast(f64),
    Positive,
}

#[derive(Debug, Default)]
struct Checker {
    issues: Vec<FieldIssue>,
}

impl Checker {
    fn fail(&mut self, field: &str, message: String) {
        self.issues.push(FieldIssue::new(field, message));
    }

    fn finish<T>(self, value: T) -> Result<T, ApiError> {
        if self.issues.is_empty() {
            Ok(value)
        } else {
            Err(ApiError::InvalidQuery(self.issues))
        }
    }

    fn parse_number(&mut self, field: &str, raw: &str) -> Option<f64> {
        match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Some(value),
            _ => {
                self.fail(field, format!("\"{field}\" must be a number"));
                None
            }
        }
    }

    fn number(&mut self, field: &str, raw: Option<&str>, bound: Bound) -> Option<f64> {
        let value = self.parse_number(field, raw?)?;
        let violation = match bound {
            Bound::Range(min, _) | Bound::AtLeast(min) if value < min => {
                Some(format!("\"{field}\" must be greater than or equal to {min}"))
            }
            Bound::Range(_, max) if value > max => {
                Some(format!("\"{field}\" must be less than or equal to {max}"))
            }
            Bound::Positive if value <= 0.0 => {
                Some(format!("\"{field}\" must be a positive number"))
            }
            _ => None,
        };
        match violation {
            Some(message) => {
                self.fail(field, message);
                None
            }
            None => Some(value),
        }
    }

    fn integer(
        &mut self,
        field: &str,
        raw: Option<&str>,
        min: i64,
        max: Option<i64>,
    ) -> Option<i64> {
        let value = self.parse_number(field, raw?)?;
        if value.fract() != 0.0 || value.abs() > i64::MAX as f64 {
            self.fail(field, format!("\"{field}\" must be an integer"));
            return None;
        }
        let value = value as i64;
        if value < min {
            self.fail(field, format!("\"{field}\" must be greater than or equal to {min}"));
            return None;
        }
        if let Some(max) = max.filter(|max| value > *max) {
            self.fail(field, format!("\"{field}\" must be less than or equal to {max}"));
            return None;
        }
        Some(value)
    }

    fn boolean(&mut self, field: &str, raw: Option<&str>) -> Option<bool> {
        let raw = raw?;
        if raw.eq_ignore_ascii_case("true") {
            Some(true)
        } else if raw.eq_ignore_ascii_case("false") {
            Some(false)
        } else {
            self.fail(field, format!("\"{field}\" must be a boolean"));
            None
        }
    }

    fn non_empty(&mut self, field: &str, raw: Option<&str>) -> Option<String> {
        let raw = raw?;
        if raw.is_empty() {
            self.fail(field, format!("\"{field}\" is not allowed to be empty"));
            return None;
        }
        Some(raw.to_string())
    }

    fn page_request<S: SortKey>(
        &mut self,
        page: Option<&str>,
        limit: Option<&str>,
        sort: Option<&str>,
        order: Option<&str>,
    ) -> PageRequest<S> {
        let page = self
            .integer("page", page, 1, Some(i64::from(u32::MAX)))
            .unwrap_or(1);
        let limit = self
            .integer("limit", limit, 1, Some(i64::from(MAX_PAGE_LIMIT)))
            .unwrap_or(i64::from(DEFAULT_PAGE_LIMIT));
        let order = match order {
            None => S::DEFAULT_ORDER,
            Some(raw) => SortOrder::parse(raw).unwrap_or_else(|| {
                self.fail("order", "\"order\" must be one of [asc, desc]".to_string());
                S::DEFAULT_ORDER
            }),
        };
        PageRequest {
            page: u32::try_from(page).unwrap_or(1),
            limit: u32::try_from(limit).unwrap_or(DEFAULT_PAGE_LIMIT),
            sort: match sort {
                None => Some(S::DEFAULT),
                Some(raw) => S::parse(raw),
            },
            order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property_params(pairs: &[(&str, &str)]) -> PropertyListParams {
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        query_from(&query)
    }

    fn query_from<T: for<'de> Deserialize<'de>>(query: &str) -> T {
        let uri = format!("/x?{query}").parse::<axum::http::Uri>().unwrap();
        axum::extract::Query::<T>::try_from_uri(&uri).unwrap().0
    }

    fn issues(err: ApiError) -> Vec<FieldIssue> {
        match err {
            ApiError::InvalidQuery(issues)
            | ApiError::InvalidParams(issues)
            | ApiError::InvalidBody(issues) => issues,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_given() {
        let (filters, page) = PropertyListParams::default().validate().unwrap();
        assert_eq!(filters, PropertyFilters::default());
        assert_eq!(page, PageRequest::<PropertySort>::default());

        let (_, page) = ReviewListParams::default().validate().unwrap();
        assert_eq!(page.sort, Some(ReviewSort::SubmittedAt));
        assert_eq!(page.order, SortOrder::Desc);
    }

    #[test]
    fn well_formed_values_are_typed() {
        let params = property_params(&[
            ("page", "2"),
            ("limit", "5"),
            ("sort", "price"),
            ("order", "desc"),
            ("minRating", "4.5"),
            ("maxPrice", "250"),
            ("bedrooms", "2"),
            ("bathrooms", "1.5"),
            ("guests", "4"),
            ("utm_source", "ignored"),
        ]);
        let (filters, page) = params.validate().unwrap();
        assert_eq!(page.page, 2);
        assert_eq!(page.limit, 5);
        assert_eq!(page.sort, Some(PropertySort::Price));
        assert_eq!(page.order, SortOrder::Desc);
        assert_eq!(filters.min_rating, Some(4.5));
        assert_eq!(filters.max_price, Some(250.0));
        assert_eq!(filters.bedrooms, Some(2));
        assert_eq!(filters.bathrooms, Some(1.5));
        assert_eq!(filters.guests, Some(4));
    }

    #[test]
    fn out_of_range_values_are_reported_per_field() {
        let params = property_params(&[
            ("page", "0"),
            ("limit", "101"),
            ("minRating", "6"),
            ("guests", "0"),
        ]);
        let found = issues(params.validate().unwrap_err());
        let fields = found.iter().map(|i| i.field.as_str()).collect::<Vec<_>>();
        assert_eq!(fields, vec!["page", "limit", "minRating", "guests"]);
        assert_eq!(found[0].message, "\"page\" must be greater than or equal to 1");
        assert_eq!(found[1].message, "\"limit\" must be less than or equal to 100");
    }

    #[test]
    fn non_numeric_and_fractional_values_are_rejected() {
        let found = issues(property_params(&[("page", "abc")]).validate().unwrap_err());
        assert_eq!(found[0].message, "\"page\" must be a number");

        let found = issues(property_params(&[("bedrooms", "1.5")]).validate().unwrap_err());
        assert_eq!(found[0].message, "\"bedrooms\" must be an integer");

        let found = issues(property_params(&[("maxPrice", "0")]).validate().unwrap_err());
        assert_eq!(found[0].message, "\"maxPrice\" must be a positive number");

        let found = issues(property_params(&[("minRating", "NaN")]).validate().unwrap_err());
        assert_eq!(found[0].field, "minRating");
    }

    #[test]
    fn unknown_sort_is_ignored_but_bad_order_is_not() {
        let injected = property_params(&[("sort", "p.name%3B%20DROP%20TABLE%20properties")]);
        let (_, page) = injected.validate().unwrap();
        assert_eq!(page.sort, None);

        let found = issues(property_params(&[("order", "sideways")]).validate().unwrap_err());
        assert_eq!(found[0].field, "order");
    }

    #[test]
    fn review_filters_parse_booleans_and_ids() {
        let params: ReviewListParams =
            query_from("approved=true&minRating=3&propertyId=155613&sort=price");
        let (filters, page) = params.validate().unwrap();
        assert_eq!(filters.approved, Some(true));
        assert_eq!(filters.min_rating, Some(3.0));
        assert_eq!(filters.property_id.as_deref(), Some("155613"));
        assert_eq!(page.sort, None);

        let bad: ReviewListParams = query_from("approved=maybe");
        let found = issues(bad.validate().unwrap_err());
        assert_eq!(found[0].message, "\"approved\" must be a boolean");
    }

    #[test]
    fn path_ids_follow_the_allowed_alphabet() {
        assert!(validate_id("propertyId", "155613").is_ok());
        assert!(validate_id("reviewId", "abc_DEF-123").is_ok());
        assert!(validate_id("reviewId", "bad id").is_err());
        assert!(validate_id("reviewId", "").is_err());
        assert!(validate_id("reviewId", &"x".repeat(101)).is_err());
        assert!(validate_id("reviewId", &"x".repeat(100)).is_ok());
    }

    #[test]
    fn approval_body_requires_a_boolean() {
        assert!(parse_approval_body(br#"{"approved": true}"#).unwrap());
        assert!(!parse_approval_body(br#"{"approved": false, "note": "x"}"#).unwrap());

        let missing = issues(parse_approval_body(b"{}").unwrap_err());
        assert!(missing[0].message.contains("approved"));

        let wrong_type = issues(parse_approval_body(br#"{"approved": "invalid"}"#).unwrap_err());
        assert!(wrong_type[0].message.contains("boolean"));

        let malformed = issues(parse_approval_body(b"{approved: tru").unwrap_err());
        assert!(malformed[0].message.contains("approved"));

        assert!(parse_approval_body(b"").is_err());
        assert!(parse_approval_body(b"[true]").is_err());
    }
}
