// Forward-only incremental loaders for the route catalog and for the trips of
// the selected routes. Both expose `load_more`/`has_more` and leave the trigger
// (scrolling near the end of a picker) to the caller.

use crate::fm_api::{self, Result, TransitApi};
use crate::fm_models::{Document, Identified, Route, Trip, merge_unique};
use log::{debug, warn};

pub const ROUTE_PAGE_SIZE: usize = 10;
pub const TRIP_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerState {
    Idle,
    LoadingInitial,
    Ready,
    LoadingMore,
    Exhausted,
}

/// Offset cursor plus accumulated records. The offset always points at the
/// next page to request and only moves forward until `reset`.
#[derive(Debug, Clone)]
pub struct Pager<T> {
    items: Vec<T>,
    offset: usize,
    page_size: usize,
    has_more: bool,
    state: PagerState,
    error: Option<String>,
}

impl<T: Identified> Pager<T> {
    pub fn new(page_size: usize) -> Self {
        Pager {
            items: Vec::new(),
            offset: 0,
            page_size: page_size.max(1),
            has_more: true,
            state: PagerState::Idle,
            error: None,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn state(&self) -> PagerState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, PagerState::LoadingInitial | PagerState::LoadingMore)
    }

    pub fn reset(&mut self) {
        self.items.clear();
        self.offset = 0;
        self.has_more = true;
        self.state = PagerState::Idle;
        self.error = None;
    }

    /// Whether a `load_more` call would issue a request right now.
    pub fn can_load_more(&self) -> bool {
        self.has_more && !self.is_loading() && self.state != PagerState::Idle
    }

    fn begin(&mut self, initial: bool) {
        self.state = if initial {
            PagerState::LoadingInitial
        } else {
            PagerState::LoadingMore
        };
    }

    fn finish(&mut self, label: &str, result: Result<Document<T>>) {
        match result {
            Ok(document) => {
                let received = document.data.len();
                let added = merge_unique(&mut self.items, document.data);
                debug!(
                    "{} page at offset {}: {} received, {} new",
                    label, self.offset, received, added
                );

                self.error = None;
                if received < self.page_size {
                    self.has_more = false;
                    self.state = PagerState::Exhausted;
                } else {
                    self.offset += self.page_size;
                    self.state = PagerState::Ready;
                }
            }
            Err(e) => {
                warn!("{} page at offset {} failed: {}", label, self.offset, e);
                self.error = Some(e.to_string());
                self.has_more = false;
                self.state = PagerState::Exhausted;
            }
        }
    }
}

// ============================================================================
// Route pager
// ============================================================================

#[derive(Debug, Clone)]
pub struct RoutePager {
    pager: Pager<Route>,
}

impl Default for RoutePager {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutePager {
    pub fn new() -> Self {
        Self::with_page_size(ROUTE_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        RoutePager {
            pager: Pager::new(page_size),
        }
    }

    pub fn routes(&self) -> &[Route] {
        self.pager.items()
    }

    pub fn pager(&self) -> &Pager<Route> {
        &self.pager
    }

    pub fn has_more(&self) -> bool {
        self.pager.has_more()
    }

    pub fn error(&self) -> Option<&str> {
        self.pager.error()
    }

    pub fn find(&self, id: &str) -> Option<&Route> {
        self.routes().iter().find(|r| r.id == id)
    }

    pub async fn load_initial<A: TransitApi>(&mut self, api: &A) {
        self.pager.reset();
        self.pager.begin(true);
        let result = fm_api::routes_page(api, self.pager.page_size(), 0).await;
        self.pager.finish("routes", result);
    }

    /// Append the next page. Does nothing once exhausted; starts from the
    /// first page when nothing has been loaded yet.
    pub async fn load_more<A: TransitApi>(&mut self, api: &A) {
        if self.pager.state() == PagerState::Idle {
            return self.load_initial(api).await;
        }
        if !self.pager.can_load_more() {
            return;
        }

        self.pager.begin(false);
        let result = fm_api::routes_page(api, self.pager.page_size(), self.pager.offset()).await;
        self.pager.finish("routes", result);
    }
}

// ============================================================================
// Trip pager
// ============================================================================

/// Trips of the selected routes, one page at a time. Changing the route
/// scope throws away everything loaded so far.
#[derive(Debug, Clone)]
pub struct TripPager {
    pager: Pager<Trip>,
    route_ids: Vec<String>,
}

impl Default for TripPager {
    fn default() -> Self {
        Self::new()
    }
}

impl TripPager {
    pub fn new() -> Self {
        Self::with_page_size(TRIP_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        let mut pager = Pager::new(page_size);
        pager.has_more = false;
        TripPager {
            pager,
            route_ids: Vec::new(),
        }
    }

    pub fn trips(&self) -> &[Trip] {
        self.pager.items()
    }

    pub fn pager(&self) -> &Pager<Trip> {
        &self.pager
    }

    pub fn has_more(&self) -> bool {
        self.pager.has_more()
    }

    pub fn error(&self) -> Option<&str> {
        self.pager.error()
    }

    /// Switch to a new route scope. Clears trips, offset and error right away
    /// and reports whether the scope actually changed.
    pub fn reset_scope(&mut self, route_ids: &[String]) -> bool {
        if self.route_ids == route_ids {
            return false;
        }

        self.route_ids = route_ids.to_vec();
        self.pager.reset();
        if self.route_ids.is_empty() {
            self.pager.has_more = false;
        }
        true
    }

    pub async fn set_routes<A: TransitApi>(&mut self, api: &A, route_ids: &[String]) {
        if self.reset_scope(route_ids) {
            self.load_initial(api).await;
        }
    }

    pub async fn load_initial<A: TransitApi>(&mut self, api: &A) {
        if self.route_ids.is_empty() {
            self.pager.reset();
            self.pager.has_more = false;
            return;
        }

        self.pager.reset();
        self.pager.begin(true);
        let result = fm_api::trips_page(api, &self.route_ids, self.pager.page_size(), 0).await;
        self.pager.finish("trips", result);
    }

    pub async fn load_more<A: TransitApi>(&mut self, api: &A) {
        if self.route_ids.is_empty() {
            return;
        }
        if self.pager.state() == PagerState::Idle {
            return self.load_initial(api).await;
        }
        if !self.pager.can_load_more() {
            return;
        }

        self.pager.begin(false);
        let result = fm_api::trips_page(
            api,
            &self.route_ids,
            self.pager.page_size(),
            self.pager.offset(),
        )
        .await;
        self.pager.finish("trips", result);
    }
}
