// In-memory transit API and record builders shared by the unit tests.

use crate::fm_api::{ApiQuery, FleetError, Result, TransitApi};
use crate::fm_models::{
    Document, Included, OccupancyStatus, Relationship, Route, RouteAttributes, RouteDocument,
    Trip, TripAttributes, TripDocument, TripRelationships, Vehicle, VehicleAttributes,
    VehicleDocument, VehicleRelationships, VehicleStatus,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn vehicle(id: &str, route: Option<&str>, trip: Option<&str>) -> Vehicle {
    Vehicle {
        id: id.to_string(),
        attributes: VehicleAttributes {
            label: id.trim_start_matches('y').to_string(),
            latitude: 42.36,
            longitude: -71.06,
            bearing: None,
            speed: None,
            direction_id: None,
            current_status: VehicleStatus::InTransitTo,
            current_stop_sequence: None,
            occupancy_status: OccupancyStatus::Unknown,
            updated_at: fixed_now(),
        },
        relationships: VehicleRelationships {
            route: route.map(|r| Relationship::to("route", r)).unwrap_or_default(),
            trip: trip.map(|t| Relationship::to("trip", t)).unwrap_or_default(),
            stop: Relationship::default(),
        },
    }
}

pub fn route(id: &str) -> Route {
    Route {
        id: id.to_string(),
        attributes: RouteAttributes {
            long_name: format!("{} Line", id),
            short_name: String::new(),
            description: "Rapid Transit".to_string(),
            color: "DA291C".to_string(),
            text_color: "FFFFFF".to_string(),
            route_type: Some(1),
            ..RouteAttributes::default()
        },
    }
}

pub fn trip(id: &str, headsign: &str, direction_id: u8, route: &str) -> Trip {
    Trip {
        id: id.to_string(),
        attributes: TripAttributes {
            headsign: headsign.to_string(),
            name: String::new(),
            direction_id,
            block_id: None,
        },
        relationships: TripRelationships {
            route: Relationship::to("route", route),
        },
    }
}

fn page<T: Clone>(items: &[T], query: &ApiQuery) -> Vec<T> {
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(usize::MAX);
    items.iter().skip(offset).take(limit).cloned().collect()
}

fn scoped(values: Option<&[String]>, id: Option<&str>) -> bool {
    match values {
        Some(values) => id.map(|id| values.iter().any(|v| v == id)).unwrap_or(false),
        None => true,
    }
}

/// Serves fixed collections, honours route/trip filters and paging, and
/// records every query it receives.
#[derive(Default)]
pub struct FakeApi {
    pub vehicles: Mutex<Vec<Vehicle>>,
    pub included: Mutex<Vec<Included>>,
    pub routes: Mutex<Vec<Route>>,
    pub trips: Mutex<Vec<Trip>>,
    fail_vehicles: AtomicBool,
    fail_routes: AtomicBool,
    fail_trips: AtomicBool,
    vehicle_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<(String, ApiQuery)>>,
}

impl FakeApi {
    pub fn new() -> Self {
        FakeApi::default()
    }

    pub fn with_vehicles(self, vehicles: Vec<Vehicle>) -> Self {
        *self.vehicles.lock().unwrap() = vehicles;
        self
    }

    pub fn with_routes(self, routes: Vec<Route>) -> Self {
        *self.routes.lock().unwrap() = routes;
        self
    }

    pub fn with_trips(self, trips: Vec<Trip>) -> Self {
        *self.trips.lock().unwrap() = trips;
        self
    }

    pub fn fail_vehicles(&self, fail: bool) {
        self.fail_vehicles.store(fail, Ordering::SeqCst);
    }

    /// Make every vehicle request take `delay` of (tokio) time.
    pub fn delay_vehicles(&self, delay: Duration) {
        *self.vehicle_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_routes(&self, fail: bool) {
        self.fail_routes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_trips(&self, fail: bool) {
        self.fail_trips.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self, resource: &str) -> Vec<ApiQuery> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| r == resource)
            .map(|(_, q)| q.clone())
            .collect()
    }

    pub fn call_count(&self, resource: &str) -> usize {
        self.calls(resource).len()
    }

    fn record(&self, resource: &str, query: &ApiQuery) {
        self.calls
            .lock()
            .unwrap()
            .push((resource.to_string(), query.clone()));
    }

    fn failure() -> FleetError {
        FleetError::Api {
            status: "500".to_string(),
            detail: "Internal error".to_string(),
            parameter: None,
        }
    }
}

impl TransitApi for FakeApi {
    async fn vehicles(&self, query: &ApiQuery) -> Result<VehicleDocument> {
        self.record("vehicles", query);
        let delay = *self.vehicle_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_vehicles.load(Ordering::SeqCst) {
            return Err(Self::failure());
        }

        let matching: Vec<Vehicle> = self
            .vehicles
            .lock()
            .unwrap()
            .iter()
            .filter(|v| scoped(query.filter_values("route"), v.route_id()))
            .filter(|v| scoped(query.filter_values("trip"), v.trip_id()))
            .cloned()
            .collect();

        Ok(Document {
            data: page(&matching, query),
            included: self.included.lock().unwrap().clone(),
            links: Default::default(),
        })
    }

    async fn routes(&self, query: &ApiQuery) -> Result<RouteDocument> {
        self.record("routes", query);
        if self.fail_routes.load(Ordering::SeqCst) {
            return Err(Self::failure());
        }

        let routes = self.routes.lock().unwrap();
        Ok(Document {
            data: page(&routes, query),
            included: Vec::new(),
            links: Default::default(),
        })
    }

    async fn trips(&self, query: &ApiQuery) -> Result<TripDocument> {
        self.record("trips", query);
        if self.fail_trips.load(Ordering::SeqCst) {
            return Err(Self::failure());
        }

        let matching: Vec<Trip> = self
            .trips
            .lock()
            .unwrap()
            .iter()
            .filter(|t| scoped(query.filter_values("route"), t.route_id()))
            .cloned()
            .collect();

        Ok(Document {
            data: page(&matching, query),
            included: Vec::new(),
            links: Default::default(),
        })
    }
}
