//! Collaborator services the ledger engine reads from and writes to.
//!
//! The engine never talks to storage directly; it goes through `ChitApi`.
//! Two implementations ship with the crate: a REST client for the chit
//! backend and a local SQLite store.

pub mod http;
pub mod sqlite;

pub use http::HttpChitApi;
pub use sqlite::SqliteChitApi;

use anyhow::Result;
use std::sync::Arc;

use crate::models::{
    Assignment, AssignmentId, Contribution, ContributionId, ContributionPatch, LedgerConfig,
    BackendKind, Member, NewAssignment, Payout, PayoutId, PayoutPatch, Scheme, SchemeId,
};

#[async_trait::async_trait]
pub trait ChitApi: Send + Sync {
    async fn get_scheme(&self, scheme_id: SchemeId) -> Result<Scheme>;

    async fn list_members(&self) -> Result<Vec<Member>>;

    async fn list_assignments(&self, scheme_id: SchemeId) -> Result<Vec<Assignment>>;

    async fn create_assignment(&self, new: &NewAssignment) -> Result<Assignment>;

    async fn delete_assignment(&self, id: AssignmentId) -> Result<()>;

    async fn list_payouts(&self, scheme_id: SchemeId) -> Result<Vec<Payout>>;

    async fn update_payout(&self, id: PayoutId, patch: &PayoutPatch) -> Result<Payout>;

    async fn list_contributions(&self, scheme_id: SchemeId) -> Result<Vec<Contribution>>;

    async fn update_contribution(
        &self,
        id: ContributionId,
        patch: &ContributionPatch,
    ) -> Result<Contribution>;
}

/// Build the backend selected by the configuration.
pub fn connect(config: &LedgerConfig) -> Result<Arc<dyn ChitApi>> {
    let api: Arc<dyn ChitApi> = match config.backend {
        BackendKind::Http => Arc::new(HttpChitApi::new(
            &config.api_base_url,
            config.api_token.as_deref(),
            config.http_timeout_secs,
        )?),
        BackendKind::Sqlite => Arc::new(SqliteChitApi::open(&config.db_path)?),
    };
    Ok(api)
}
