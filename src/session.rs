//! Ledger session
//!
//! Composes the ledger builder, edit scope machine, staging store and
//! keyboard navigation for one scheme. Owns filtering and pagination, talks
//! to the collaborator services through `ChitApi` and reports changes to any
//! registered `LedgerObserver`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::ChitApi;
use crate::edit::{
    execute_plan, BusyCells, CellHandle, CellKey, CommitReport, EditScope, EditScopeMachine,
    FieldGroup, FieldSet, KeyboardNavigationController, NavAction, NavKey, ScopeError,
    StagingStore,
};
use crate::ledger::{
    build_ledger, build_month_breakdown, filter_rows, member_installment, page_count, paginate,
    paid_by_member, LedgerSources, MonthBreakdown, MonthRow, RowFilter,
};
use crate::models::{Member, MemberId, Scheme, SchemeId};

/// Hand-off to the external collection-entry form.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogPaymentRequest {
    pub scheme_id: SchemeId,
    pub month_index: u32,
    pub month_label: String,
    pub member_id: MemberId,
    pub member_name: String,
    /// Still owed for the month, never negative
    pub amount_due: i64,
}

/// Outbound notifications. Every method defaults to a no-op.
pub trait LedgerObserver: Send + Sync {
    fn on_rows(&self, _rows: &[MonthRow]) {}

    fn on_scope_changed(&self, _scope: &EditScope) {}

    fn on_log_payment(&self, _request: &LogPaymentRequest) {}
}

pub struct LedgerSession {
    api: Arc<dyn ChitApi>,
    scheme_id: SchemeId,
    scheme: Option<Scheme>,
    members: Vec<Member>,
    sources: LedgerSources,
    rows: Vec<MonthRow>,
    scope: EditScopeMachine,
    staging: StagingStore,
    nav: KeyboardNavigationController,
    busy: BusyCells,
    filter: RowFilter,
    search: String,
    page: usize,
    page_size: usize,
    error: Option<String>,
    message: Option<String>,
    last_report: Option<CommitReport>,
    observers: Vec<Arc<dyn LedgerObserver>>,
}

impl LedgerSession {
    pub fn new(api: Arc<dyn ChitApi>, scheme_id: SchemeId, page_size: usize) -> Self {
        Self {
            api,
            scheme_id,
            scheme: None,
            members: Vec::new(),
            sources: LedgerSources::default(),
            rows: Vec::new(),
            scope: EditScopeMachine::new(false, 0),
            staging: StagingStore::new(),
            nav: KeyboardNavigationController::new(),
            busy: BusyCells::new(),
            filter: RowFilter::All,
            search: String::new(),
            page: 1,
            page_size: page_size.max(1),
            error: None,
            message: None,
            last_report: None,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn LedgerObserver>) {
        self.observers.push(observer);
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Fetch the ledger and the member list used by the member picker.
    pub async fn load(&mut self) -> Result<()> {
        let api = Arc::clone(&self.api);
        let (members, refreshed) = tokio::join!(api.list_members(), self.refresh());
        refreshed?;
        match members {
            Ok(members) => {
                self.members = members;
                Ok(())
            }
            Err(e) => {
                self.error = Some(format!("Failed to load members: {:#}", e));
                Err(e.context("load members"))
            }
        }
    }

    /// Re-fetch the scheme and its three record collections, then rebuild the
    /// ledger. On failure the previous ledger stays in place.
    pub async fn refresh(&mut self) -> Result<()> {
        let id = self.scheme_id;
        let api = Arc::clone(&self.api);
        let fetched = tokio::try_join!(
            api.get_scheme(id),
            api.list_assignments(id),
            api.list_payouts(id),
            api.list_contributions(id),
        );

        let (scheme, assignments, payouts, contributions) = match fetched {
            Ok(all) => all,
            Err(e) => {
                warn!(scheme_id = id, error = %e, "ledger fetch failed, keeping previous rows");
                self.error = Some(format!("Failed to load ledger: {:#}", e));
                return Err(e).with_context(|| format!("refresh ledger for chit {}", id));
            }
        };

        self.sources = LedgerSources {
            assignments,
            payouts,
            contributions,
        };
        self.rows = build_ledger(&scheme, &self.sources);
        self.scope
            .reconfigure(scheme.is_auction(), scheme.duration_months);
        self.scheme = Some(scheme);

        let total = self.total_pages();
        self.page = self.page.clamp(1, total);
        self.sync_nav();

        debug!(scheme_id = id, rows = self.rows.len(), "ledger rebuilt");
        for o in &self.observers {
            o.on_rows(&self.rows);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    pub fn scheme(&self) -> Option<&Scheme> {
        self.scheme.as_ref()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn rows(&self) -> &[MonthRow] {
        &self.rows
    }

    pub fn filtered_rows(&self) -> Vec<&MonthRow> {
        filter_rows(&self.rows, self.filter, &self.search)
    }

    pub fn page_rows(&self) -> Vec<&MonthRow> {
        paginate(&self.filtered_rows(), self.page, self.page_size)
    }

    pub fn filter(&self) -> RowFilter {
        self.filter
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn total_pages(&self) -> usize {
        page_count(self.filtered_rows().len(), self.page_size)
    }

    /// Changing the filter always returns to the first page.
    pub fn set_filter(&mut self, filter: RowFilter) {
        self.filter = filter;
        self.page = 1;
        self.sync_nav();
    }

    pub fn set_search(&mut self, query: impl Into<String>) {
        self.search = query.into();
        self.page = 1;
        self.sync_nav();
    }

    /// Show another page. Returns the cell that received a focus left
    /// pending by keyboard navigation, if any.
    pub fn set_page(&mut self, page: usize) -> Option<CellHandle> {
        self.page = page.clamp(1, self.total_pages());
        self.sync_nav()
    }

    /// Push the current page shape to the navigation controller. An open
    /// row edit is re-located first, since paging, filtering and refreshes
    /// can move or hide its month.
    fn sync_nav(&mut self) -> Option<CellHandle> {
        let total = self.total_pages();
        let rows_on_page = self.page_rows().len();
        if let EditScope::Row { month_index, .. } = *self.scope.scope() {
            let slot = self
                .filtered_rows()
                .iter()
                .position(|r| r.month_index == month_index)
                .filter(|pos| pos / self.page_size + 1 == self.page)
                .map(|pos| pos % self.page_size);
            self.nav.relocate_row(self.page, slot);
        }
        self.nav.set_page_layout(self.page, total, rows_on_page)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn dismiss_messages(&mut self) {
        self.error = None;
        self.message = None;
    }

    pub fn last_report(&self) -> Option<&CommitReport> {
        self.last_report.as_ref()
    }

    // ------------------------------------------------------------------
    // Edit scopes
    // ------------------------------------------------------------------

    pub fn scope(&self) -> &EditScope {
        self.scope.scope()
    }

    pub fn is_editing(&self, field: FieldGroup, month_index: u32) -> bool {
        self.scope.is_editing(field, month_index)
    }

    fn ensure_loaded(&self) -> Result<(), ScopeError> {
        if self.scheme.is_none() {
            return Err(ScopeError::NotLoaded);
        }
        Ok(())
    }

    fn open_columns(&mut self, fields: FieldSet) -> Result<(), ScopeError> {
        self.ensure_loaded()?;
        let added = self.scope.enter_columns(fields)?;
        for field in added.iter() {
            self.staging.seed_column(field, &self.rows);
        }

        if let EditScope::Columns { fields: active } = *self.scope.scope() {
            let focus_column = added.iter().next();
            self.nav.begin_columns(active);
            if let Some(column) = focus_column {
                self.nav.focus(CellHandle::new(column, 0));
            }
        }

        info!(
            scheme_id = self.scheme_id,
            columns = added.len(),
            "column edit opened"
        );
        self.notify_scope();
        Ok(())
    }

    pub fn enter_column_edit(&mut self, field: FieldGroup) -> Result<(), ScopeError> {
        self.open_columns(FieldSet::single(field))
    }

    /// Every applicable column at once.
    pub fn enter_all_columns_edit(&mut self) -> Result<(), ScopeError> {
        let is_auction = self.scheme.as_ref().is_some_and(Scheme::is_auction);
        self.open_columns(FieldSet::applicable(is_auction))
    }

    fn open_row(&mut self, month_index: u32, fields: Option<FieldSet>) -> Result<(), ScopeError> {
        self.ensure_loaded()?;
        let position = self
            .filtered_rows()
            .iter()
            .position(|r| r.month_index == month_index);

        let fields = match fields {
            Some(fields) => {
                self.scope.enter_row(month_index, fields)?;
                fields
            }
            None => self.scope.enter_row_all(month_index)?,
        };

        if let Some(row) = self.rows.iter().find(|r| r.month_index == month_index) {
            self.staging.seed_row(row, fields);
        }

        match position {
            Some(pos) => {
                self.page = pos / self.page_size + 1;
                self.sync_nav();
                self.nav.begin_row(pos % self.page_size, fields);
            }
            None => {
                // keyboard focus needs a visible row; editing still works
                debug!(month = month_index, "row edit opened on a filtered-out month");
                self.nav.clear();
            }
        }

        info!(
            scheme_id = self.scheme_id,
            month = month_index,
            fields = fields.len(),
            "row edit opened"
        );
        self.notify_scope();
        Ok(())
    }

    /// Edit a single field of one month.
    pub fn enter_row_edit(
        &mut self,
        month_index: u32,
        field: FieldGroup,
    ) -> Result<(), ScopeError> {
        self.open_row(month_index, Some(FieldSet::single(field)))
    }

    /// Edit every applicable field of one month.
    pub fn enter_row_all_edit(&mut self, month_index: u32) -> Result<(), ScopeError> {
        self.open_row(month_index, None)
    }

    fn cell_for(&self, field: FieldGroup, month_index: u32) -> Option<CellKey> {
        self.rows
            .iter()
            .find(|r| r.month_index == month_index)
            .map(|row| CellKey::for_row(field, row))
    }

    /// Stage a raw value for an open cell. Never touches the network.
    pub fn set_value(
        &mut self,
        field: FieldGroup,
        month_index: u32,
        raw: impl Into<String>,
    ) -> Result<(), ScopeError> {
        if !self.scope.is_editing(field, month_index) {
            return Err(ScopeError::NotEditable { field, month_index });
        }
        let cell = self
            .cell_for(field, month_index)
            .ok_or(ScopeError::UnknownMonth(month_index))?;
        if self.busy.is_busy(&cell) {
            return Err(ScopeError::CellBusy { field, month_index });
        }
        self.staging.set_value(cell, raw);
        Ok(())
    }

    pub fn staged_value(&self, field: FieldGroup, month_index: u32) -> Option<&str> {
        let cell = self.cell_for(field, month_index)?;
        self.staging.get(&cell)
    }

    /// Drop every staged edit and return to `Idle`.
    pub fn cancel(&mut self) {
        let previous = self.scope.cancel();
        self.staging.clear();
        self.nav.clear();
        if previous != EditScope::Idle {
            debug!(scheme_id = self.scheme_id, "edit cancelled");
            self.notify_scope();
        }
    }

    /// Commit the staged edits.
    ///
    /// The ledger is refreshed whatever happens to the individual calls. On
    /// full success the scope closes; otherwise it stays open, re-seeded from
    /// the refreshed ledger, with the joined failure message as the error.
    pub async fn save(&mut self) -> Result<CommitReport, ScopeError> {
        let scope = self.scope.begin_save()?;
        let scheme = self.scheme.clone().ok_or(ScopeError::NotLoaded)?;

        let plan = self
            .staging
            .plan(&scheme, &self.rows, &self.sources.contributions);
        info!(
            scheme_id = scheme.id,
            calls = plan.mutations.len(),
            "saving ledger edits"
        );
        let api = Arc::clone(&self.api);
        let report = execute_plan(api.as_ref(), plan, &self.busy).await;

        let refreshed = self.refresh().await;
        self.staging.clear();

        match report.error_message() {
            None => {
                self.scope.cancel();
                self.nav.clear();
                if refreshed.is_ok() {
                    self.error = None;
                }
                self.message = Some("Changes saved successfully!".to_string());
            }
            Some(message) => {
                warn!(
                    scheme_id = scheme.id,
                    failures = report.failures.len(),
                    "save partially failed"
                );
                self.reseed(scope);
                self.error = Some(message);
                self.message = None;
            }
        }

        self.notify_scope();
        self.last_report = Some(report.clone());
        Ok(report)
    }

    fn reseed(&mut self, scope: EditScope) {
        match scope {
            EditScope::Idle => {}
            EditScope::Columns { fields } => {
                for field in fields.iter() {
                    self.staging.seed_column(field, &self.rows);
                }
            }
            EditScope::Row {
                month_index,
                fields,
            } => {
                if let Some(row) = self.rows.iter().find(|r| r.month_index == month_index) {
                    self.staging.seed_row(row, fields);
                }
            }
        }
    }

    fn notify_scope(&self) {
        let scope = self.scope.scope();
        for o in &self.observers {
            o.on_scope_changed(scope);
        }
    }

    // ------------------------------------------------------------------
    // Keyboard and busy cells
    // ------------------------------------------------------------------

    pub fn focused_cell(&self) -> Option<CellHandle> {
        self.nav.focused()
    }

    pub fn focus_cell(&mut self, cell: CellHandle) -> bool {
        self.nav.focus(cell)
    }

    /// Handle Enter/Tab/Shift+Tab in the focused cell. A submit runs `save`;
    /// a page change is applied right away and focus lands on the new page.
    pub async fn key_press(&mut self, key: NavKey) -> Result<NavAction, ScopeError> {
        let action = self.nav.handle_key(key);
        match action {
            NavAction::Submit => {
                self.save().await?;
            }
            NavAction::ChangePage { page, .. } => {
                self.page = page.clamp(1, self.total_pages());
                self.sync_nav();
            }
            NavAction::Focus { .. } | NavAction::None => {}
        }
        Ok(action)
    }

    pub fn is_cell_busy(&self, field: FieldGroup, month_index: u32) -> bool {
        self.cell_for(field, month_index)
            .is_some_and(|cell| self.busy.is_busy(&cell))
    }

    /// Shared handle so a renderer can poll busy cells while `save` runs.
    pub fn busy_cells(&self) -> BusyCells {
        self.busy.clone()
    }

    // ------------------------------------------------------------------
    // Payment hand-off
    // ------------------------------------------------------------------

    /// Per-member payment state for one month. `None` for an unknown month.
    pub fn month_breakdown(&self, month_index: u32) -> Option<MonthBreakdown> {
        let row = self.rows.iter().find(|r| r.month_index == month_index)?;
        Some(build_month_breakdown(
            self.scheme_id,
            row,
            &self.sources.assignments,
            &self.members,
            &self.sources.contributions,
        ))
    }

    /// Ask the surrounding app to open its collection form for `member_id`
    /// in `month_index`. The amount due is that member's own installment less
    /// what they have already paid for the month. Returns `None` for an
    /// unknown month or a member the session does not know.
    pub fn request_log_payment(
        &self,
        month_index: u32,
        member_id: MemberId,
    ) -> Option<LogPaymentRequest> {
        let row = self.rows.iter().find(|r| r.month_index == month_index)?;
        let Some(member) = self.members.iter().find(|m| m.id == member_id) else {
            debug!(month = month_index, member_id, "payment requested for unknown member");
            return None;
        };

        let paid = paid_by_member(
            &self.sources.contributions,
            self.scheme_id,
            month_index,
            member_id,
        );
        let request = LogPaymentRequest {
            scheme_id: self.scheme_id,
            month_index,
            month_label: row.label.clone(),
            member_id,
            member_name: member.full_name.clone(),
            amount_due: (member_installment(row) - paid).max(0),
        };

        for o in &self.observers {
            o.on_log_payment(&request);
        }
        Some(request)
    }
}
