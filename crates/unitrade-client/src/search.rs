//! State behind the listings page: current filters, loading flag, error
//! string and results.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use unitrade_types::api::ListingsResponse;
use unitrade_types::filters::{ListingFilterParams, ListingFilters};
use unitrade_types::models::Listing;

use crate::error::{ClientError, Result};
use crate::http::UnitradeClient;

pub trait ListingsBackend {
    fn search(&self, filters: &ListingFilters) -> impl Future<Output = Result<ListingsResponse>> + Send;
}

impl ListingsBackend for UnitradeClient {
    fn search(&self, filters: &ListingFilters) -> impl Future<Output = Result<ListingsResponse>> + Send {
        self.search_listings(filters)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    pub filters: ListingFilters,
    pub loading: bool,
    pub error: Option<String>,
    pub listings: Vec<Listing>,
    pub total_results: usize,
}

pub struct ListingSearch<B> {
    backend: B,
    cancel: CancellationToken,
    state: SearchState,
}

impl<B: ListingsBackend> ListingSearch<B> {
    /// `cancel` scopes every request the view makes; cancel it when the view
    /// goes away.
    pub fn new(backend: B, cancel: CancellationToken) -> Self {
        Self { backend, cancel, state: SearchState::default() }
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    /// Runs a search from the page's query parameters. Parameters that do not
    /// parse are shown as the error without contacting the backend.
    pub async fn apply_params(&mut self, params: ListingFilterParams) -> &SearchState {
        match ListingFilters::try_from(params) {
            Ok(filters) => self.search(filters).await,
            Err(e) => {
                self.fail(e.to_string());
                &self.state
            }
        }
    }

    pub async fn search(&mut self, filters: ListingFilters) -> &SearchState {
        self.state.filters = filters;
        self.state.loading = true;
        self.state.error = None;

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled),
            res = self.backend.search(&self.state.filters) => res,
        };

        match result {
            Ok(resp) => {
                self.state.loading = false;
                self.state.total_results = resp.total_results;
                self.state.listings = resp.listings;
            }
            Err(ClientError::Cancelled) => {
                debug!("Listing search cancelled");
                self.state.loading = false;
            }
            Err(e) => self.fail(e.to_string()),
        }
        &self.state
    }

    /// Query string that reproduces the current filters, for the page URL.
    pub fn query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.state.filters.to_query_pairs())
            .finish()
    }

    fn fail(&mut self, message: String) {
        warn!("Listing search failed: {}", message);
        self.state.loading = false;
        self.state.error = Some(message);
        self.state.listings.clear();
        self.state.total_results = 0;
    }
}
