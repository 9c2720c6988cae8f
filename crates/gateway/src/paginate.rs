//! Exhaustive offset pagination
//!
//! `count_all` walks an offset/limit endpoint page by page through the
//! executor and counts distinct records. Offset APIs under concurrent writes
//! can repeat rows, so every page is deduplicated against the identities
//! seen so far. The walk ends on the first short page, on a non-empty page
//! made only of already-seen rows (the upstream is not advancing), or at the
//! page safety limit, in which case the count is a lower bound.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use upstream::Params;

use crate::error::Error;
use crate::executor::Executor;
use crate::metrics;
use crate::records::{IdentityResolver, page_records, reported_total};

#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Rows requested per page; the upstream's maximum
    pub page_size: usize,
    /// Safety limit on pages per walk
    pub max_pages: usize,
    pub offset_param: String,
    pub limit_param: String,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            max_pages: 10_000,
            offset_param: "offset".to_string(),
            limit_param: "limit".to_string(),
        }
    }
}

/// One counting request.
#[derive(Debug, Clone)]
pub struct CountQuery {
    pub endpoint: String,
    pub params: Params,
    /// How many distinct records to return alongside the count
    pub max_return: usize,
}

impl CountQuery {
    pub fn new(endpoint: impl Into<String>, params: Params) -> Self {
        Self {
            endpoint: endpoint.into(),
            params,
            max_return: 0,
        }
    }

    pub fn with_max_return(mut self, max_return: usize) -> Self {
        self.max_return = max_return;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CountResult {
    /// Distinct records seen
    pub total_count: u64,
    pub pages_fetched: u64,
    /// The page limit stopped the walk; `total_count` is a lower bound
    pub reached_safety_limit: bool,
    /// A page repeated only known rows; the walk stopped early
    pub stuck_pagination: bool,
    pub duplicates_skipped: u64,
    /// Total advertised by the upstream envelope, for diagnostics only
    pub reported_total: Option<u64>,
    pub records: Vec<Value>,
}

/// How far a walk got before failing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub offset: usize,
    pub pages_fetched: u64,
    pub total_count: u64,
}

#[derive(Debug, thiserror::Error)]
#[error(
    "pagination failed at offset {} after {} page(s) and {} record(s): {source}",
    .progress.offset,
    .progress.pages_fetched,
    .progress.total_count
)]
pub struct PaginationError {
    pub progress: Progress,
    #[source]
    pub source: Error,
}

pub struct Paginator {
    executor: Arc<Executor>,
    config: PaginationConfig,
    resolver: IdentityResolver,
}

impl Paginator {
    pub fn new(executor: Arc<Executor>, config: PaginationConfig, resolver: IdentityResolver) -> Self {
        Self {
            executor,
            config,
            resolver,
        }
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// Count every record matching `query`.
    ///
    /// A fetch failure aborts the walk; the error carries the progress made.
    #[instrument(skip_all, fields(call_id = %uuid::Uuid::new_v4(), endpoint = %query.endpoint))]
    pub async fn count_all(&self, query: &CountQuery) -> Result<CountResult, PaginationError> {
        let page_size = self.config.page_size.max(1);
        let max_pages = self.config.max_pages as u64;
        let mut seen: HashSet<String> = HashSet::new();
        let mut result = CountResult::default();
        let mut offset = 0usize;

        loop {
            if result.pages_fetched >= max_pages {
                result.reached_safety_limit = true;
                warn!(
                    pages = result.pages_fetched,
                    total = result.total_count,
                    "page limit reached, count is a lower bound"
                );
                break;
            }

            let params = query
                .params
                .clone()
                .with(self.config.limit_param.as_str(), page_size)
                .with(self.config.offset_param.as_str(), offset);
            let page = self
                .executor
                .fetch(&query.endpoint, &params)
                .await
                .map_err(|source| PaginationError {
                    progress: Progress {
                        offset,
                        pages_fetched: result.pages_fetched,
                        total_count: result.total_count,
                    },
                    source,
                })?;
            result.pages_fetched += 1;
            metrics::record_page_fetched();
            if result.reported_total.is_none() {
                result.reported_total = reported_total(&page);
            }

            let rows = page_records(&page);
            let mut unique = 0u64;
            for row in rows {
                if seen.insert(self.resolver.identity(row)) {
                    unique += 1;
                    if result.records.len() < query.max_return {
                        result.records.push(row.clone());
                    }
                } else {
                    result.duplicates_skipped += 1;
                }
            }

            if !rows.is_empty() && unique == 0 {
                result.stuck_pagination = true;
                warn!(offset, rows = rows.len(), "page repeated only known records, stopping");
                break;
            }
            result.total_count += unique;
            debug!(offset, rows = rows.len(), unique, "page counted");

            if rows.len() < page_size {
                break;
            }
            offset += page_size;
        }

        info!(
            total = result.total_count,
            pages = result.pages_fetched,
            duplicates = result.duplicates_skipped,
            safety_limit = result.reached_safety_limit,
            stuck = result.stuck_pagination,
            "count complete"
        );
        Ok(result)
    }
}
