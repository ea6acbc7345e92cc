//! Interface to the remote flows service.
//!
//! The service owns flows, runs and run logs; this crate only reads them.
//! Implementations live in [`crate::service`].

use async_trait::async_trait;
use futures::Stream;

use crate::errors::ServiceError;
use crate::types::{FlowDefinition, RunLog, RunSummary};

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Sort orders understood by the listing endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    CompletionTimeDesc,
    CreatedAtDesc,
}

impl SortOrder {
    /// Value of the `orderby` query parameter.
    pub fn as_query(self) -> &'static str {
        match self {
            SortOrder::CompletionTimeDesc => "completion_time DESC",
            SortOrder::CreatedAtDesc => "created_at DESC",
        }
    }
}

/// Parameters of one `list_runs` page request.
#[derive(Debug, Clone, Default)]
pub struct RunQuery {
    pub order: SortOrder,
    /// Page size; `None` lets the service decide.
    pub limit: Option<usize>,
    /// Continuation marker returned by the previous page.
    pub marker: Option<String>,
}

/// One page of runs.
#[derive(Debug, Clone, Default)]
pub struct RunPage {
    pub runs: Vec<RunSummary>,
    pub marker: Option<String>,
    pub has_next_page: bool,
}

/// Parameters of a `list_flows` request.
#[derive(Debug, Clone)]
pub struct FlowQuery {
    pub order: SortOrder,
    /// Maximum number of flows returned; `None` for all of them.
    pub limit: Option<usize>,
}

impl Default for FlowQuery {
    fn default() -> Self {
        Self {
            order: SortOrder::CreatedAtDesc,
            limit: None,
        }
    }
}

// ---------------------------------------------------------------------------
// FlowsService
// ---------------------------------------------------------------------------

/// Read access to the remote flows service.
///
/// Calls may fail with [`ServiceError::Transient`], which callers record and
/// move on from, or [`ServiceError::Unauthorized`], which is fatal and must
/// not be retried.
#[async_trait]
pub trait FlowsService: Send + Sync {
    async fn list_flows(&self, query: &FlowQuery) -> Result<Vec<FlowDefinition>, ServiceError>;

    /// Fetch a single page of runs.
    async fn list_runs(&self, query: &RunQuery) -> Result<RunPage, ServiceError>;

    /// Fetch the event log of one run, at most `limit` entries.
    async fn get_run_log(&self, run_id: &str, limit: usize) -> Result<RunLog, ServiceError>;

    /// The most recently completed run, or `None` if the service has no runs.
    ///
    /// Default: one `list_runs` page of size 1 ordered by completion time.
    async fn get_most_recent_run(&self) -> Result<Option<RunSummary>, ServiceError> {
        let page = self
            .list_runs(&RunQuery {
                order: SortOrder::CompletionTimeDesc,
                limit: Some(1),
                marker: None,
            })
            .await?;
        Ok(page.runs.into_iter().next())
    }
}

/// Stream every page of runs matching `order`, following continuation
/// markers until the service reports no further page.
pub fn run_pages<'a>(
    service: &'a dyn FlowsService,
    order: SortOrder,
    page_size: Option<usize>,
) -> impl Stream<Item = Result<Vec<RunSummary>, ServiceError>> + Send + 'a {
    futures::stream::try_unfold(Some(None::<String>), move |state| async move {
        let Some(marker) = state else {
            return Ok::<_, ServiceError>(None);
        };
        let page = service
            .list_runs(&RunQuery {
                order,
                limit: page_size,
                marker,
            })
            .await?;
        let next = match (page.has_next_page, page.marker) {
            (true, Some(marker)) => Some(Some(marker)),
            _ => None,
        };
        Ok::<_, ServiceError>(Some((page.runs, next)))
    })
}
