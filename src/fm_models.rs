// Data model for the fleet monitor: JSON:API resources served by the transit API
// (vehicles, routes, trips, stops) plus the derived trip patterns.
//
// Resource shapes follow the MBTA v3 API:
// - Vehicles: https://api-v3.mbta.com/docs/swagger/index.html#/Vehicle
// - Routes:   https://api-v3.mbta.com/docs/swagger/index.html#/Route
// - Trips:    https://api-v3.mbta.com/docs/swagger/index.html#/Trip

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Sentinel selection meaning "vehicles without any trip".
pub const NO_TRIP_SENTINEL: &str = "NO_TRIP";
/// Sentinel selection meaning "vehicles running non-revenue trips".
pub const NONREV_SENTINEL: &str = "NONREV";
/// Trip-id prefix the agency uses for deadheading moves.
pub const NONREV_TRIP_PREFIX: &str = "NONREV";
/// A position older than this is shown as stale.
pub const STALE_AFTER_SECS: i64 = 120;

// ============================================================================
// Shared helpers
// ============================================================================

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Anything with a stable API id. Used to deduplicate paginated results.
pub trait Identified {
    fn id(&self) -> &str;
}

/// Append `incoming` to `current`, skipping ids already present.
/// Returns how many records were actually added.
pub fn merge_unique<T: Identified>(current: &mut Vec<T>, incoming: Vec<T>) -> usize {
    let mut seen: std::collections::HashSet<String> =
        current.iter().map(|item| item.id().to_string()).collect();
    let before = current.len();

    for item in incoming {
        if seen.insert(item.id().to_string()) {
            current.push(item);
        }
    }

    current.len() - before
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: Option<ResourceRef>,
}

impl Relationship {
    #[cfg(test)]
    pub fn to(kind: &str, id: &str) -> Self {
        Relationship {
            data: Some(ResourceRef {
                id: id.to_string(),
                kind: kind.to_string(),
            }),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.data.as_ref().map(|r| r.id.as_str()).filter(|id| !id.is_empty())
    }
}

// ============================================================================
// Vehicles
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    InTransitTo,
    StoppedAt,
    IncomingAt,
    #[default]
    #[serde(other)]
    Unknown,
}

impl VehicleStatus {
    pub fn label(&self) -> &'static str {
        match self {
            VehicleStatus::InTransitTo => "In Transit To",
            VehicleStatus::StoppedAt => "Stopped At",
            VehicleStatus::IncomingAt => "Incoming At",
            VehicleStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccupancyStatus {
    Empty,
    ManySeatsAvailable,
    FewSeatsAvailable,
    StandingRoomOnly,
    CrushedStandingRoomOnly,
    Full,
    NotAcceptingPassengers,
    NoDataAvailable,
    NotBoardable,
    #[default]
    #[serde(other)]
    Unknown,
}

impl OccupancyStatus {
    pub fn label(&self) -> &'static str {
        match self {
            OccupancyStatus::Empty => "EMPTY",
            OccupancyStatus::ManySeatsAvailable => "MANY SEATS AVAILABLE",
            OccupancyStatus::FewSeatsAvailable => "FEW SEATS AVAILABLE",
            OccupancyStatus::StandingRoomOnly => "STANDING ROOM ONLY",
            OccupancyStatus::CrushedStandingRoomOnly => "CRUSHED STANDING ROOM ONLY",
            OccupancyStatus::Full => "FULL",
            OccupancyStatus::NotAcceptingPassengers => "NOT ACCEPTING PASSENGERS",
            OccupancyStatus::NoDataAvailable => "NO DATA AVAILABLE",
            OccupancyStatus::NotBoardable => "NOT BOARDABLE",
            OccupancyStatus::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleAttributes {
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub bearing: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub direction_id: Option<u8>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_status: VehicleStatus,
    #[serde(default)]
    pub current_stop_sequence: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub occupancy_status: OccupancyStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VehicleRelationships {
    #[serde(default)]
    pub route: Relationship,
    #[serde(default)]
    pub trip: Relationship,
    #[serde(default)]
    pub stop: Relationship,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub attributes: VehicleAttributes,
    #[serde(default)]
    pub relationships: VehicleRelationships,
}

impl Vehicle {
    pub fn route_id(&self) -> Option<&str> {
        self.relationships.route.id()
    }

    pub fn trip_id(&self) -> Option<&str> {
        self.relationships.trip.id()
    }

    pub fn stop_id(&self) -> Option<&str> {
        self.relationships.stop.id()
    }

    pub fn has_trip(&self) -> bool {
        self.trip_id().is_some()
    }

    /// Deadheading vehicles carry a trip id with the agency's reserved prefix.
    pub fn is_non_revenue(&self) -> bool {
        self.trip_id()
            .map(|id| id.starts_with(NONREV_TRIP_PREFIX))
            .unwrap_or(false)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        is_stale(self.attributes.updated_at, now)
    }
}

impl Identified for Vehicle {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Staleness is always derived from the wall clock, never stored.
pub fn is_stale(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(updated_at) >= Duration::seconds(STALE_AFTER_SECS)
}

pub fn minutes_since(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(updated_at).num_minutes().max(0)
}

// ============================================================================
// Routes, trips, stops
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteAttributes {
    #[serde(default, deserialize_with = "null_as_default")]
    pub long_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub short_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub color: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text_color: String,
    #[serde(default, rename = "type")]
    pub route_type: Option<u8>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub direction_names: Vec<Option<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub direction_destinations: Vec<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    #[serde(default)]
    pub attributes: RouteAttributes,
}

impl Route {
    /// Long name when the agency provides one, then short name, then the id.
    pub fn display_name(&self) -> &str {
        [&self.attributes.long_name, &self.attributes.short_name]
            .into_iter()
            .find(|name| !name.is_empty())
            .map(|name| name.as_str())
            .unwrap_or(self.id.as_str())
    }

    pub fn destination(&self, direction_id: u8) -> Option<&str> {
        self.attributes
            .direction_destinations
            .get(direction_id as usize)
            .and_then(|d| d.as_deref())
    }
}

impl Identified for Route {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TripAttributes {
    #[serde(default, deserialize_with = "null_as_default")]
    pub headsign: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub direction_id: u8,
    #[serde(default)]
    pub block_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TripRelationships {
    #[serde(default)]
    pub route: Relationship,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    #[serde(default)]
    pub attributes: TripAttributes,
    #[serde(default)]
    pub relationships: TripRelationships,
}

impl Trip {
    pub fn route_id(&self) -> Option<&str> {
        self.relationships.route.id()
    }
}

impl Identified for Trip {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopAttributes {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub platform_code: Option<String>,
    #[serde(default)]
    pub platform_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub id: String,
    #[serde(default)]
    pub attributes: StopAttributes,
}

// ============================================================================
// Response envelopes
// ============================================================================

/// Related records delivered through `include=`. Types this client does not
/// use (lines, agencies, ...) collapse into `Other`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Included {
    Route(Route),
    Trip(Trip),
    Stop(Stop),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub first: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub prev: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub included: Vec<Included>,
    #[serde(default)]
    pub links: Links,
}

impl<T> Document<T> {
    pub fn empty() -> Self {
        Document {
            data: Vec::new(),
            included: Vec::new(),
            links: Links::default(),
        }
    }
}

pub type VehicleDocument = Document<Vehicle>;
pub type RouteDocument = Document<Route>;
pub type TripDocument = Document<Trip>;

/// Lookup table over the included records of one vehicle response.
#[derive(Debug, Clone, Default)]
pub struct IncludedIndex {
    routes: HashMap<String, Route>,
    trips: HashMap<String, Trip>,
    stops: HashMap<String, Stop>,
}

impl IncludedIndex {
    pub fn from_included(included: Vec<Included>) -> Self {
        let mut index = IncludedIndex::default();
        for record in included {
            match record {
                Included::Route(route) => {
                    index.routes.insert(route.id.clone(), route);
                }
                Included::Trip(trip) => {
                    index.trips.insert(trip.id.clone(), trip);
                }
                Included::Stop(stop) => {
                    index.stops.insert(stop.id.clone(), stop);
                }
                Included::Other => {}
            }
        }
        index
    }

    pub fn route(&self, id: Option<&str>) -> Option<&Route> {
        id.and_then(|id| self.routes.get(id))
    }

    pub fn trip(&self, id: Option<&str>) -> Option<&Trip> {
        id.and_then(|id| self.trips.get(id))
    }

    pub fn stop(&self, id: Option<&str>) -> Option<&Stop> {
        id.and_then(|id| self.stops.get(id))
    }
}

// ============================================================================
// Patterns (derived)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    /// A real (headsign, direction) group of trips.
    Trips,
    NonRevenue,
    NoTrip,
}

/// Trips sharing a headsign and direction, with the number of vehicles
/// currently running any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub headsign: String,
    pub direction_id: Option<u8>,
    pub route_id: String,
    pub display_name: String,
    pub trip_ids: Vec<String>,
    pub active_count: usize,
    pub kind: PatternKind,
}

impl Pattern {
    pub fn is_synthetic(&self) -> bool {
        self.kind != PatternKind::Trips
    }

    /// Stable key used by pickers to remember a selection across rebuilds.
    pub fn key(&self) -> String {
        match self.kind {
            PatternKind::Trips => format!(
                "{}-{}",
                self.headsign,
                self.direction_id.map(|d| d.to_string()).unwrap_or_default()
            ),
            PatternKind::NonRevenue => NONREV_SENTINEL.to_string(),
            PatternKind::NoTrip => NO_TRIP_SENTINEL.to_string(),
        }
    }

    /// Trip ids to put into the selection when this pattern is picked.
    /// Synthetic patterns select their sentinel, never real trip ids.
    pub fn selection_ids(&self) -> Vec<String> {
        match self.kind {
            PatternKind::Trips => self.trip_ids.clone(),
            PatternKind::NonRevenue => vec![NONREV_SENTINEL.to_string()],
            PatternKind::NoTrip => vec![NO_TRIP_SENTINEL.to_string()],
        }
    }
}

pub fn direction_label(direction_id: u8) -> &'static str {
    if direction_id == 0 { "Outbound" } else { "Inbound" }
}
