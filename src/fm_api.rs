// Transport client for the transit agency's JSON:API service.
//
// Endpoints used (all under the base URL from MBTA_API_URL):
// - GET /vehicles?page[limit]=L&page[offset]=O&include=route,trip,stop
// - GET /vehicles?filter[route]=r1,r2&page[limit]=500&include=route,trip,stop
// - GET /vehicles?filter[trip]=t1,t2&page[limit]=500&include=route,trip,stop
// - GET /routes?page[limit]=L&page[offset]=O
// - GET /trips?filter[route]=r1,r2&page[limit]=L&page[offset]=O

use crate::fm_models::{Document, RouteDocument, TripDocument, VehicleDocument};
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

pub const API_URL_VAR: &str = "MBTA_API_URL";
/// Page limit used whenever vehicles are fetched for a filter.
pub const FILTERED_VEHICLE_LIMIT: usize = 500;
const REQUEST_TIMEOUT_SECS: u64 = 15;
const VEHICLE_INCLUDES: [&str; 3] = ["route", "trip", "stop"];

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(
        "{status}: {detail}{}",
        .parameter.as_ref().map(|p| format!(" (parameter: {})", p)).unwrap_or_default()
    )]
    Api {
        status: String,
        detail: String,
        parameter: Option<String>,
    },

    #[error("HTTP {0}")]
    Http(u16),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Debug, Deserialize)]
struct ErrorDocument {
    #[serde(default)]
    errors: Vec<ErrorObject>,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    #[serde(default)]
    status: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    source: Option<ErrorSource>,
}

#[derive(Debug, Deserialize)]
struct ErrorSource {
    #[serde(default)]
    parameter: Option<String>,
}

/// Turn a non-2xx response body into an error. Uses the first JSON:API error
/// object when the body has one, otherwise reports the bare HTTP status.
pub fn api_error_from_body(http_status: u16, body: &str) -> FleetError {
    let first = serde_json::from_str::<ErrorDocument>(body)
        .ok()
        .and_then(|doc| doc.errors.into_iter().next());

    let Some(error) = first else {
        return FleetError::Http(http_status);
    };

    let status = match error.status {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => http_status.to_string(),
    };

    let detail = error
        .detail
        .filter(|d| !d.is_empty())
        .or(error.title.filter(|t| !t.is_empty()))
        .unwrap_or_else(|| "Request failed".to_string());

    FleetError::Api {
        status,
        detail,
        parameter: error.source.and_then(|s| s.parameter),
    }
}

// ============================================================================
// Query composition
// ============================================================================

/// Structured query for one JSON:API request.
///
/// Several ids under one filter key are joined with commas, which the API reads
/// as "any of".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub filters: Vec<(String, Vec<String>)>,
    pub include: Vec<String>,
}

impl ApiQuery {
    pub fn new() -> Self {
        ApiQuery::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn filter(mut self, key: &str, ids: &[String]) -> Self {
        self.filters.push((key.to_string(), ids.to_vec()));
        self
    }

    pub fn include(mut self, relations: &[&str]) -> Self {
        self.include = relations.iter().map(|r| r.to_string()).collect();
        self
    }

    #[cfg(test)]
    pub fn filter_values(&self, key: &str) -> Option<&[String]> {
        self.filters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, ids)| ids.as_slice())
    }

    pub fn to_query_string(&self) -> String {
        let mut parts: Vec<String> = self
            .filters
            .iter()
            .map(|(key, ids)| format!("filter[{}]={}", key, ids.join(",")))
            .collect();

        if let Some(limit) = self.limit {
            parts.push(format!("page[limit]={}", limit));
        }
        if let Some(offset) = self.offset {
            parts.push(format!("page[offset]={}", offset));
        }
        if !self.include.is_empty() {
            parts.push(format!("include={}", self.include.join(",")));
        }

        parts.join("&")
    }
}

pub fn vehicles_page_query(limit: usize, offset: usize) -> ApiQuery {
    ApiQuery::new()
        .limit(limit)
        .offset(offset)
        .include(&VEHICLE_INCLUDES)
}

pub fn vehicles_by_route_query(route_ids: &[String]) -> ApiQuery {
    if route_ids.is_empty() {
        return vehicles_page_query(FILTERED_VEHICLE_LIMIT, 0);
    }
    ApiQuery::new()
        .filter("route", route_ids)
        .limit(FILTERED_VEHICLE_LIMIT)
        .include(&VEHICLE_INCLUDES)
}

pub fn vehicles_by_trip_query(trip_ids: &[String]) -> ApiQuery {
    if trip_ids.is_empty() {
        return vehicles_page_query(FILTERED_VEHICLE_LIMIT, 0);
    }
    ApiQuery::new()
        .filter("trip", trip_ids)
        .limit(FILTERED_VEHICLE_LIMIT)
        .include(&VEHICLE_INCLUDES)
}

pub fn routes_page_query(limit: usize, offset: usize) -> ApiQuery {
    ApiQuery::new().limit(limit).offset(offset)
}

pub fn trips_page_query(route_ids: &[String], limit: usize, offset: usize) -> ApiQuery {
    ApiQuery::new()
        .filter("route", route_ids)
        .limit(limit)
        .offset(offset)
}

// ============================================================================
// Transport seam
// ============================================================================

/// The three collections the dashboard reads. Implemented over HTTP by
/// [`MbtaClient`]; the data layer is generic over this trait.
pub trait TransitApi: Send + Sync + 'static {
    fn vehicles(&self, query: &ApiQuery) -> impl Future<Output = Result<VehicleDocument>> + Send;
    fn routes(&self, query: &ApiQuery) -> impl Future<Output = Result<RouteDocument>> + Send;
    fn trips(&self, query: &ApiQuery) -> impl Future<Output = Result<TripDocument>> + Send;
}

pub async fn vehicles_page<A: TransitApi>(
    api: &A,
    limit: usize,
    offset: usize,
) -> Result<VehicleDocument> {
    api.vehicles(&vehicles_page_query(limit, offset)).await
}

pub async fn vehicles_by_route<A: TransitApi>(api: &A, route_ids: &[String]) -> Result<VehicleDocument> {
    api.vehicles(&vehicles_by_route_query(route_ids)).await
}

pub async fn vehicles_by_trip<A: TransitApi>(api: &A, trip_ids: &[String]) -> Result<VehicleDocument> {
    api.vehicles(&vehicles_by_trip_query(trip_ids)).await
}

pub async fn routes_page<A: TransitApi>(api: &A, limit: usize, offset: usize) -> Result<RouteDocument> {
    api.routes(&routes_page_query(limit, offset)).await
}

/// Trips cannot be enumerated without a route scope, so an empty scope is a
/// valid empty result and no request is made.
pub async fn trips_page<A: TransitApi>(
    api: &A,
    route_ids: &[String],
    limit: usize,
    offset: usize,
) -> Result<TripDocument> {
    if route_ids.is_empty() {
        return Ok(Document::empty());
    }
    api.trips(&trips_page_query(route_ids, limit, offset)).await
}

// ============================================================================
// HTTP implementation
// ============================================================================

#[derive(Debug, Clone)]
pub struct MbtaClient {
    http: Client,
    base_url: String,
}

impl MbtaClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(FleetError::Config(format!("{} is empty", API_URL_VAR)));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(MbtaClient {
            http,
            base_url: base_url.to_string(),
        })
    }

    /// Build a client from the `MBTA_API_URL` environment variable.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(API_URL_VAR)
            .map_err(|_| FleetError::Config(format!("{} is not set", API_URL_VAR)))?;
        Self::new(&base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, resource: &str, query: &ApiQuery) -> String {
        let query_string = query.to_query_string();
        if query_string.is_empty() {
            format!("{}/{}", self.base_url, resource)
        } else {
            format!("{}/{}?{}", self.base_url, resource, query_string)
        }
    }

    async fn get_document<T: DeserializeOwned>(&self, resource: &str, query: &ApiQuery) -> Result<Document<T>> {
        let url = self.url_for(resource, query);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.api+json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = api_error_from_body(status.as_u16(), &body);
            warn!("{} request failed: {}", resource, error);
            return Err(error);
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl TransitApi for MbtaClient {
    async fn vehicles(&self, query: &ApiQuery) -> Result<VehicleDocument> {
        self.get_document("vehicles", query).await
    }

    async fn routes(&self, query: &ApiQuery) -> Result<RouteDocument> {
        self.get_document("routes", query).await
    }

    async fn trips(&self, query: &ApiQuery) -> Result<TripDocument> {
        self.get_document("trips", query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fm_testing::FakeApi;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_query_strings_match_endpoint_shapes() {
        assert_eq!(
            vehicles_page_query(30, 60).to_query_string(),
            "page[limit]=30&page[offset]=60&include=route,trip,stop"
        );
        assert_eq!(
            vehicles_by_route_query(&ids(&["Red", "Orange"])).to_query_string(),
            "filter[route]=Red,Orange&page[limit]=500&include=route,trip,stop"
        );
        assert_eq!(
            vehicles_by_trip_query(&ids(&["t1", "t2"])).to_query_string(),
            "filter[trip]=t1,t2&page[limit]=500&include=route,trip,stop"
        );
        assert_eq!(routes_page_query(10, 20).to_query_string(), "page[limit]=10&page[offset]=20");
        assert_eq!(
            trips_page_query(&ids(&["Red"]), 100, 0).to_query_string(),
            "filter[route]=Red&page[limit]=100&page[offset]=0"
        );
    }

    #[test]
    fn test_empty_vehicle_filters_degrade_to_unfiltered_page() {
        let query = vehicles_by_route_query(&[]);
        assert!(query.filters.is_empty());
        assert_eq!(query.limit, Some(FILTERED_VEHICLE_LIMIT));
        assert_eq!(vehicles_by_trip_query(&[]), query);
    }

    #[test]
    fn test_api_error_body_with_parameter() {
        let body = r#"{"errors":[{"status":"400","title":"Bad Request","detail":"Unsupported filter","source":{"parameter":"filter[color]"}}]}"#;
        let error = api_error_from_body(400, body);
        assert_eq!(error.to_string(), "400: Unsupported filter (parameter: filter[color])");
    }

    #[test]
    fn test_api_error_body_falls_back_to_title_and_http_status() {
        let body = r#"{"errors":[{"title":"Too Many Requests"}]}"#;
        assert_eq!(api_error_from_body(429, body).to_string(), "429: Too Many Requests");

        let body = r#"{"errors":[{"status":503}]}"#;
        assert_eq!(api_error_from_body(502, body).to_string(), "503: Request failed");
    }

    #[test]
    fn test_unparseable_error_body_reports_http_status() {
        assert_eq!(api_error_from_body(500, "<html>oops</html>").to_string(), "HTTP 500");
        assert_eq!(api_error_from_body(404, "").to_string(), "HTTP 404");
        assert_eq!(api_error_from_body(404, r#"{"errors":[]}"#).to_string(), "HTTP 404");
    }

    #[test]
    fn test_client_url_building() {
        let client = MbtaClient::new("https://api-v3.mbta.com/").unwrap();
        assert_eq!(client.base_url(), "https://api-v3.mbta.com");
        assert_eq!(
            client.url_for("routes", &routes_page_query(10, 0)),
            "https://api-v3.mbta.com/routes?page[limit]=10&page[offset]=0"
        );
        assert_eq!(client.url_for("routes", &ApiQuery::new()), "https://api-v3.mbta.com/routes");
    }

    #[test]
    fn test_blank_base_url_is_a_config_error() {
        assert!(matches!(MbtaClient::new("  "), Err(FleetError::Config(_))));
    }

    #[tokio::test]
    async fn test_trips_without_routes_make_no_request() {
        let api = FakeApi::new();
        let doc = trips_page(&api, &[], 10, 0).await.unwrap();
        assert!(doc.data.is_empty());
        assert_eq!(api.call_count("trips"), 0);
    }
}
