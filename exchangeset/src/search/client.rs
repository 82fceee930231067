//! Paged remote search.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use super::matcher::{MatchedEntry, SearchMatcher};
use crate::error::{EventId, FulfilmentError, FulfilmentResult};
use crate::model::Product;
use crate::remote::{RemoteError, SearchApi, SearchBatchResponse, SearchFilterTemplate};

/// Default number of results requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Counters from one remote search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchSummary {
    pub pages: usize,
    pub accepted: usize,
    pub replaced: usize,
}

/// Searches the repository for requested product updates.
pub struct RemoteSearchClient {
    api: Arc<dyn SearchApi>,
    template: SearchFilterTemplate,
    page_size: usize,
}

impl RemoteSearchClient {
    pub fn new(api: Arc<dyn SearchApi>) -> Self {
        Self {
            api,
            template: SearchFilterTemplate::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_template(mut self, template: SearchFilterTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Search for every update of `products` in `business_unit`.
    ///
    /// Pages are followed until every requested pair has been accepted or
    /// the repository has no further page. Each accepted entry is handed to
    /// `on_accepted` immediately, so downloads start while paging continues.
    ///
    /// Fails with [`FulfilmentError::ResultsNotFound`] when a pair is still
    /// unmatched at the end, and with [`FulfilmentError::Cancelled`] when the
    /// token fires during paging. Both failures and remote errors cancel the
    /// token.
    #[instrument(skip_all, fields(products = products.len(), business_unit = %business_unit))]
    pub async fn search<F>(
        &self,
        products: &[Product],
        business_unit: &str,
        token: &CancellationToken,
        mut on_accepted: F,
    ) -> FulfilmentResult<SearchSummary>
    where
        F: FnMut(MatchedEntry) -> FulfilmentResult<()>,
    {
        let mut matcher = SearchMatcher::new(products);
        let mut summary = SearchSummary::default();
        if matcher.requested() == 0 {
            return Ok(summary);
        }

        let filter = self.template.build(products, business_unit);
        debug!(filter = %filter, requested = matcher.requested(), "Searching repository");

        let mut next: Option<String> = None;
        loop {
            if token.is_cancelled() {
                return Err(FulfilmentError::Cancelled);
            }

            let page = match &next {
                None => self.api.first_page(&filter, self.page_size).await,
                Some(href) => self.api.next_page(href).await,
            };
            let page = page.map_err(|e| search_failed(e, token))?;
            summary.pages += 1;

            if let Err(e) = self.accept_page(&page, &mut matcher, &mut summary, token, &mut on_accepted) {
                if !e.is_cancelled() {
                    token.cancel();
                }
                return Err(e);
            }

            if matcher.is_complete() {
                break;
            }
            match page.next_href() {
                Some(href) => next = Some(href.to_string()),
                None => break,
            }
        }

        if !matcher.is_complete() {
            let unresolved = matcher.unresolved();
            warn!(
                event_id = EventId::SearchResultsNotFound.as_str(),
                requested = matcher.requested(),
                matched = matcher.matched(),
                unresolved = unresolved.len(),
                "Search results not found"
            );
            token.cancel();
            return Err(FulfilmentError::ResultsNotFound { unresolved });
        }

        debug!(
            pages = summary.pages,
            accepted = summary.accepted,
            replaced = summary.replaced,
            "Search complete"
        );
        Ok(summary)
    }

    fn accept_page<F>(
        &self,
        page: &SearchBatchResponse,
        matcher: &mut SearchMatcher,
        summary: &mut SearchSummary,
        token: &CancellationToken,
        on_accepted: &mut F,
    ) -> FulfilmentResult<()>
    where
        F: FnMut(MatchedEntry) -> FulfilmentResult<()>,
    {
        for entry in &page.entries {
            if token.is_cancelled() {
                return Err(FulfilmentError::Cancelled);
            }
            if let Some(matched) = matcher.accept(entry.clone()) {
                summary.accepted += 1;
                if matched.replaced {
                    summary.replaced += 1;
                }
                on_accepted(matched)?;
            }
        }
        Ok(())
    }
}

fn search_failed(source: RemoteError, token: &CancellationToken) -> FulfilmentError {
    error!(
        event_id = EventId::SearchFailed.as_str(),
        uri = source.uri(),
        status = source.status(),
        error = %source,
        "Search request failed"
    );
    token.cancel();
    FulfilmentError::remote(EventId::SearchFailed, source)
}
