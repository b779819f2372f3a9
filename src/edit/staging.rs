//! Staging store and batched commit
//!
//! Holds the operator's uncommitted cell values, diffs them against the
//! persisted ledger and turns the differences into collaborator calls. The
//! calls are fired together and awaited together; a failure in one never
//! stops the others.

use anyhow::Result;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::scope::{FieldGroup, FieldSet};
use crate::api::ChitApi;
use crate::ledger::{month_date, MonthRow};
use crate::models::{
    AssignmentId, Contribution, ContributionId, ContributionPatch, MemberId, NewAssignment,
    PayoutId, PayoutPatch, Scheme,
};

/// Row half of a cell address. Each column keys its rows the way the
/// backing record is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RowKey {
    /// Member edits: `MM/YYYY`
    MonthLabel(String),
    /// Payout and auction edits on an existing payout row
    Payout(PayoutId),
    /// Payout and auction edits for a month that has no payout row yet
    PendingPayout(u32),
    /// Collection edits
    MonthIndex(u32),
}

impl RowKey {
    pub fn for_row(field: FieldGroup, row: &MonthRow) -> Self {
        match field {
            FieldGroup::Member => RowKey::MonthLabel(row.label.clone()),
            FieldGroup::Payout | FieldGroup::Auction => match &row.payout {
                Some(p) => RowKey::Payout(p.id),
                None => RowKey::PendingPayout(row.month_index),
            },
            FieldGroup::Collection => RowKey::MonthIndex(row.month_index),
        }
    }

    /// Find the ledger row this key points at.
    pub fn resolve<'a>(&self, rows: &'a [MonthRow]) -> Option<&'a MonthRow> {
        match self {
            RowKey::MonthLabel(label) => rows.iter().find(|r| &r.label == label),
            RowKey::Payout(id) => rows
                .iter()
                .find(|r| r.payout.as_ref().map(|p| p.id) == Some(*id)),
            RowKey::PendingPayout(month) | RowKey::MonthIndex(month) => {
                rows.iter().find(|r| r.month_index == *month)
            }
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::MonthLabel(label) => write!(f, "{label}"),
            RowKey::Payout(id) => write!(f, "payout #{id}"),
            RowKey::PendingPayout(month) | RowKey::MonthIndex(month) => {
                write!(f, "month {month}")
            }
        }
    }
}

/// `(field group, row key)`: the unit of staging and of busy tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CellKey {
    pub field: FieldGroup,
    pub row: RowKey,
}

impl CellKey {
    pub fn new(field: FieldGroup, row: RowKey) -> Self {
        Self { field, row }
    }

    pub fn for_row(field: FieldGroup, row: &MonthRow) -> Self {
        Self::new(field, RowKey::for_row(field, row))
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.row)
    }
}

// ---------------------------------------------------------------------------
// Input coercion
// ---------------------------------------------------------------------------

/// Parse a staged amount.
///
/// Empty input clears the field (`None`). Thousands separators and the rupee
/// sign are ignored, fractions are truncated, and anything else that does not
/// parse becomes `Some(0)`. Negative amounts are clamped to zero.
pub fn parse_amount(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '₹')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let value = cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| {
            cleaned
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| v.trunc() as i64)
        })
        .unwrap_or(0);
    Some(value.max(0))
}

/// Parse a member selection; anything that is not a positive id means "no member".
pub fn parse_member(raw: &str) -> Option<MemberId> {
    raw.trim().parse::<MemberId>().ok().filter(|id| *id > 0)
}

pub fn format_amount(amount: Option<i64>) -> String {
    amount.map(|v| v.to_string()).unwrap_or_default()
}

/// Persisted value of a cell, as the text an editor starts from.
pub fn current_value(field: FieldGroup, row: &MonthRow) -> String {
    match field {
        FieldGroup::Member => row.member_id().map(|id| id.to_string()).unwrap_or_default(),
        FieldGroup::Payout => format_amount(row.planned_payout()),
        FieldGroup::Auction => format_amount(row.bid_amount),
        FieldGroup::Collection => row.collected_amount.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct StagingStore {
    edits: HashMap<CellKey, String>,
}

impl StagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one column for every row with the persisted values.
    pub fn seed_column(&mut self, field: FieldGroup, rows: &[MonthRow]) {
        for row in rows {
            self.edits
                .insert(CellKey::for_row(field, row), current_value(field, row));
        }
    }

    /// Seed the given fields of a single row.
    pub fn seed_row(&mut self, row: &MonthRow, fields: FieldSet) {
        for field in fields.iter() {
            self.edits
                .insert(CellKey::for_row(field, row), current_value(field, row));
        }
    }

    /// The only mutator while editing. Never touches the network.
    pub fn set_value(&mut self, cell: CellKey, raw: impl Into<String>) {
        self.edits.insert(cell, raw.into());
    }

    pub fn get(&self, cell: &CellKey) -> Option<&str> {
        self.edits.get(cell).map(String::as_str)
    }

    pub fn contains(&self, cell: &CellKey) -> bool {
        self.edits.contains_key(cell)
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn clear(&mut self) {
        self.edits.clear();
    }

    /// Diff every staged value against the ledger and queue the calls that
    /// actually change something.
    pub fn plan(
        &self,
        scheme: &Scheme,
        rows: &[MonthRow],
        contributions: &[Contribution],
    ) -> CommitPlan {
        let mut plan = CommitPlan::default();

        let mut staged: Vec<(&CellKey, &String, &MonthRow)> = Vec::with_capacity(self.edits.len());
        for (cell, raw) in &self.edits {
            match cell.row.resolve(rows) {
                Some(row) => staged.push((cell, raw, row)),
                None => plan.skip(cell, "row is no longer in the ledger"),
            }
        }
        staged.sort_by_key(|(cell, _, row)| (row.month_index, cell.field));

        for (cell, raw, row) in staged {
            match cell.field {
                FieldGroup::Member => plan_member(&mut plan, scheme, cell, raw, row),
                FieldGroup::Payout => {
                    let amount = parse_amount(raw);
                    if amount == row.planned_payout() {
                        continue;
                    }
                    match &row.payout {
                        Some(p) => plan.push(
                            cell,
                            row.month_index,
                            Mutation::UpdatePayout {
                                id: p.id,
                                patch: PayoutPatch::planned(amount),
                            },
                        ),
                        None => plan.skip(cell, "no payout record for this month"),
                    }
                }
                FieldGroup::Auction => {
                    if !scheme.is_auction() {
                        plan.skip(cell, "not an auction scheme");
                        continue;
                    }
                    let bid = parse_amount(raw);
                    if bid == row.bid_amount {
                        continue;
                    }
                    match &row.payout {
                        Some(p) => plan.push(
                            cell,
                            row.month_index,
                            Mutation::UpdatePayout {
                                id: p.id,
                                patch: PayoutPatch::bid(bid),
                            },
                        ),
                        None => plan.skip(cell, "no payout record for this month"),
                    }
                }
                FieldGroup::Collection => {
                    plan_collection(&mut plan, scheme, cell, raw, row, contributions)
                }
            }
        }

        debug!(
            scheme_id = scheme.id,
            staged = self.edits.len(),
            queued = plan.mutations.len(),
            skipped = plan.skipped.len(),
            "commit planned"
        );
        plan
    }
}

fn plan_member(plan: &mut CommitPlan, scheme: &Scheme, cell: &CellKey, raw: &str, row: &MonthRow) {
    let new_member = parse_member(raw);
    if new_member == row.member_id() {
        return;
    }

    // Delete and create go out as two independent calls; the month is
    // briefly unassigned in between.
    if let Some(existing) = &row.assignment {
        plan.push(
            cell,
            row.month_index,
            Mutation::DeleteAssignment { id: existing.id },
        );
    }
    if let Some(member_id) = new_member {
        plan.push(
            cell,
            row.month_index,
            Mutation::CreateAssignment(NewAssignment {
                scheme_id: scheme.id,
                member_id,
                month_index: row.month_index,
                month_date: month_date(scheme.start_date, row.month_index),
            }),
        );
    }
}

/// The staged figure is the month's total. An increase goes to the
/// lowest-id record. A decrease is taken from the records in id order, each
/// floored at zero, until the total is met.
fn plan_collection(
    plan: &mut CommitPlan,
    scheme: &Scheme,
    cell: &CellKey,
    raw: &str,
    row: &MonthRow,
    contributions: &[Contribution],
) {
    let total = parse_amount(raw).unwrap_or(0);
    if total == row.collected_amount {
        return;
    }

    let mut records: Vec<&Contribution> = contributions
        .iter()
        .filter(|c| c.scheme_id == scheme.id && c.month_index == row.month_index)
        .collect();
    records.sort_by_key(|c| c.id);

    let Some(first) = records.first() else {
        plan.skip(cell, "no contribution record for this month");
        return;
    };
    let current: i64 = records.iter().map(|c| c.collected_amount).sum();

    let mut updates: Vec<(ContributionId, i64)> = Vec::new();
    if total >= current {
        updates.push((first.id, first.collected_amount + (total - current)));
    } else {
        // total >= 0, so the positive records always cover the excess
        let mut excess = current - total;
        for record in &records {
            if excess == 0 {
                break;
            }
            let cut = excess.min(record.collected_amount.max(0));
            if cut > 0 {
                updates.push((record.id, record.collected_amount - cut));
                excess -= cut;
            }
        }
    }

    for (id, amount) in updates {
        plan.push(
            cell,
            row.month_index,
            Mutation::UpdateContribution {
                id,
                patch: ContributionPatch {
                    collected_amount: Some(amount),
                },
            },
        );
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    DeleteAssignment { id: AssignmentId },
    CreateAssignment(NewAssignment),
    UpdatePayout { id: PayoutId, patch: PayoutPatch },
    UpdateContribution { id: ContributionId, patch: ContributionPatch },
}

impl Mutation {
    async fn apply(&self, api: &dyn ChitApi) -> Result<()> {
        match self {
            Mutation::DeleteAssignment { id } => api.delete_assignment(*id).await,
            Mutation::CreateAssignment(new) => api.create_assignment(new).await.map(|_| ()),
            Mutation::UpdatePayout { id, patch } => api.update_payout(*id, patch).await.map(|_| ()),
            Mutation::UpdateContribution { id, patch } => {
                api.update_contribution(*id, patch).await.map(|_| ())
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Mutation::DeleteAssignment { .. } => "delete assignment",
            Mutation::CreateAssignment(_) => "create assignment",
            Mutation::UpdatePayout { patch, .. } if patch.bid_amount.is_some() => "update auction",
            Mutation::UpdatePayout { .. } => "update payout",
            Mutation::UpdateContribution { .. } => "update collection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedMutation {
    pub cell: CellKey,
    pub month_index: u32,
    pub mutation: Mutation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedEdit {
    pub cell: CellKey,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitPlan {
    pub mutations: Vec<PlannedMutation>,
    pub skipped: Vec<SkippedEdit>,
}

impl CommitPlan {
    fn push(&mut self, cell: &CellKey, month_index: u32, mutation: Mutation) {
        self.mutations.push(PlannedMutation {
            cell: cell.clone(),
            month_index,
            mutation,
        });
    }

    fn skip(&mut self, cell: &CellKey, reason: &str) {
        warn!(cell = %cell, reason, "staged edit skipped");
        self.skipped.push(SkippedEdit {
            cell: cell.clone(),
            reason: reason.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Busy cells
// ---------------------------------------------------------------------------

/// Cells with a call in flight. Shared so a renderer can poll it while a
/// commit is being awaited.
#[derive(Debug, Clone, Default)]
pub struct BusyCells {
    inner: Arc<Mutex<HashMap<CellKey, usize>>>,
}

impl BusyCells {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a cell busy until the returned guard is dropped. A cell with two
    /// calls in flight (delete and create) stays busy until both finish.
    pub fn acquire(&self, cell: CellKey) -> BusyGuard {
        *self.inner.lock().entry(cell.clone()).or_insert(0) += 1;
        BusyGuard {
            cells: self.clone(),
            cell,
        }
    }

    pub fn is_busy(&self, cell: &CellKey) -> bool {
        self.inner.lock().contains_key(cell)
    }

    pub fn snapshot(&self) -> Vec<CellKey> {
        self.inner.lock().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn release(&self, cell: &CellKey) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.get_mut(cell) {
            *count -= 1;
            if *count == 0 {
                inner.remove(cell);
            }
        }
    }
}

pub struct BusyGuard {
    cells: BusyCells,
    cell: CellKey,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.cells.release(&self.cell);
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitFailure {
    pub cell: CellKey,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitReport {
    pub applied: usize,
    pub failures: Vec<CommitFailure>,
    pub skipped: Vec<SkippedEdit>,
}

impl CommitReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Every failure on one line, joined with `", "`.
    pub fn error_message(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(
            self.failures
                .iter()
                .map(|f| f.message.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}

/// Fire every planned call at once and wait for all of them.
///
/// No ordering is guaranteed between calls, including the delete and create
/// of a single member cell. Nothing is rolled back when a call fails.
pub async fn execute_plan(api: &dyn ChitApi, plan: CommitPlan, busy: &BusyCells) -> CommitReport {
    let CommitPlan { mutations, skipped } = plan;

    let calls = mutations.into_iter().map(|planned| {
        let guard = busy.acquire(planned.cell.clone());
        async move {
            let result = planned.mutation.apply(api).await;
            drop(guard);
            (planned, result)
        }
    });
    let results = join_all(calls).await;

    let mut report = CommitReport {
        skipped,
        ..CommitReport::default()
    };
    for (planned, result) in results {
        match result {
            Ok(()) => report.applied += 1,
            Err(e) => {
                warn!(
                    cell = %planned.cell,
                    month = planned.month_index,
                    error = %e,
                    "{} failed",
                    planned.mutation.describe()
                );
                report.failures.push(CommitFailure {
                    message: format!("Failed to {}: {:#}", planned.mutation.describe(), e),
                    cell: planned.cell,
                });
            }
        }
    }

    info!(
        applied = report.applied,
        failed = report.failures.len(),
        skipped = report.skipped.len(),
        "commit finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{assignment, contribution, payout, scheme};
    use crate::ledger::{build_ledger, LedgerSources};
    use crate::models::{Assignment, Member, Payout, SchemeId, SchemeType};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    fn sources() -> LedgerSources {
        let mut planned = payout(102, 2);
        planned.planned_amount = Some(90_000);
        LedgerSources {
            assignments: vec![assignment(1, 1, 7), assignment(3, 3, 8)],
            payouts: vec![payout(101, 1), planned, payout(103, 3)],
            contributions: vec![
                contribution(11, 1, 4_000),
                contribution(12, 1, 6_000),
                contribution(13, 2, 0),
            ],
        }
    }

    fn ledger(kind: SchemeType) -> (Scheme, LedgerSources, Vec<MonthRow>) {
        let s = scheme(kind, 3);
        let src = sources();
        let rows = build_ledger(&s, &src);
        (s, src, rows)
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("   "), None);
        assert_eq!(parse_amount("1,00,000"), Some(100_000));
        assert_eq!(parse_amount("₹ 2,500"), Some(2_500));
        assert_eq!(parse_amount("1234.99"), Some(1_234));
        assert_eq!(parse_amount("abc"), Some(0));
        assert_eq!(parse_amount("-50"), Some(0));
    }

    #[test]
    fn test_parse_member() {
        assert_eq!(parse_member(" 42 "), Some(42));
        assert_eq!(parse_member(""), None);
        assert_eq!(parse_member("0"), None);
        assert_eq!(parse_member("someone"), None);
    }

    #[test]
    fn test_row_keys_per_column() {
        let (_, _, rows) = ledger(SchemeType::Fixed);
        assert_eq!(
            RowKey::for_row(FieldGroup::Member, &rows[0]),
            RowKey::MonthLabel("11/2024".to_string())
        );
        assert_eq!(RowKey::for_row(FieldGroup::Payout, &rows[1]), RowKey::Payout(102));
        assert_eq!(
            RowKey::for_row(FieldGroup::Collection, &rows[2]),
            RowKey::MonthIndex(3)
        );

        let bare = build_ledger(&scheme(SchemeType::Auction, 1), &LedgerSources::default());
        assert_eq!(
            RowKey::for_row(FieldGroup::Auction, &bare[0]),
            RowKey::PendingPayout(1)
        );
    }

    #[test]
    fn test_seeded_store_plans_nothing() {
        let (s, src, rows) = ledger(SchemeType::Auction);
        let mut store = StagingStore::new();
        for field in FieldGroup::ALL {
            store.seed_column(field, &rows);
        }
        assert_eq!(store.len(), 12);

        let plan = store.plan(&s, &rows, &src.contributions);
        assert!(plan.is_empty(), "unexpected calls: {:?}", plan.mutations);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_equal_payout_amount_is_not_written() {
        let (s, src, rows) = ledger(SchemeType::Fixed);
        let mut store = StagingStore::new();
        store.seed_row(&rows[1], FieldSet::single(FieldGroup::Payout));
        store.set_value(CellKey::for_row(FieldGroup::Payout, &rows[1]), "90,000");

        assert!(store.plan(&s, &rows, &src.contributions).is_empty());

        store.set_value(CellKey::for_row(FieldGroup::Payout, &rows[1]), "85000");
        let plan = store.plan(&s, &rows, &src.contributions);
        assert_eq!(
            plan.mutations[0].mutation,
            Mutation::UpdatePayout {
                id: 102,
                patch: PayoutPatch::planned(Some(85_000))
            }
        );
    }

    #[test]
    fn test_member_change_is_delete_then_create() {
        let (s, src, rows) = ledger(SchemeType::Fixed);
        let mut store = StagingStore::new();
        store.seed_row(&rows[2], FieldSet::single(FieldGroup::Member));
        store.set_value(CellKey::for_row(FieldGroup::Member, &rows[2]), "9");

        let plan = store.plan(&s, &rows, &src.contributions);
        let ops: Vec<&Mutation> = plan.mutations.iter().map(|m| &m.mutation).collect();
        assert_eq!(
            ops,
            vec![
                &Mutation::DeleteAssignment { id: 3 },
                &Mutation::CreateAssignment(NewAssignment {
                    scheme_id: 1,
                    member_id: 9,
                    month_index: 3,
                    month_date: NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
                }),
            ]
        );
    }

    #[test]
    fn test_member_clear_and_fill() {
        let (s, src, rows) = ledger(SchemeType::Fixed);
        let mut store = StagingStore::new();
        store.set_value(CellKey::for_row(FieldGroup::Member, &rows[0]), "");
        store.set_value(CellKey::for_row(FieldGroup::Member, &rows[1]), "5");

        let plan = store.plan(&s, &rows, &src.contributions);
        assert_eq!(plan.mutations.len(), 2);
        assert_eq!(plan.mutations[0].mutation, Mutation::DeleteAssignment { id: 1 });
        assert!(matches!(
            plan.mutations[1].mutation,
            Mutation::CreateAssignment(NewAssignment { month_index: 2, member_id: 5, .. })
        ));
    }

    #[test]
    fn test_auction_edit_needs_auction_scheme() {
        let (s, src, rows) = ledger(SchemeType::Fixed);
        let mut store = StagingStore::new();
        store.set_value(CellKey::for_row(FieldGroup::Auction, &rows[0]), "15000");

        let plan = store.plan(&s, &rows, &src.contributions);
        assert!(plan.is_empty());
        assert_eq!(plan.skipped.len(), 1);

        let (s, src, rows) = ledger(SchemeType::Auction);
        let plan = store.plan(&s, &rows, &src.contributions);
        assert_eq!(
            plan.mutations[0].mutation,
            Mutation::UpdatePayout {
                id: 101,
                patch: PayoutPatch::bid(Some(15_000))
            }
        );
    }

    #[test]
    fn test_collection_total_adjusts_first_record() {
        let (s, src, rows) = ledger(SchemeType::Fixed);
        let mut store = StagingStore::new();
        // month 1 currently 4_000 + 6_000
        store.set_value(CellKey::for_row(FieldGroup::Collection, &rows[0]), "10,000");
        assert!(store.plan(&s, &rows, &src.contributions).is_empty());

        store.set_value(CellKey::for_row(FieldGroup::Collection, &rows[0]), "12000");
        let plan = store.plan(&s, &rows, &src.contributions);
        assert_eq!(
            plan.mutations[0].mutation,
            Mutation::UpdateContribution {
                id: 11,
                patch: ContributionPatch {
                    collected_amount: Some(6_000)
                }
            }
        );

        // month 3 has no contribution record to write to
        store.clear();
        store.set_value(CellKey::for_row(FieldGroup::Collection, &rows[2]), "500");
        let plan = store.plan(&s, &rows, &src.contributions);
        assert!(plan.is_empty());
        assert_eq!(plan.skipped[0].cell.row, RowKey::MonthIndex(3));
    }

    #[test]
    fn test_collection_decrease_spreads_across_records() {
        let (s, src, rows) = ledger(SchemeType::Fixed);
        let mut store = StagingStore::new();
        // month 1 currently 4_000 + 6_000; the first record alone cannot absorb 5_000
        store.set_value(CellKey::for_row(FieldGroup::Collection, &rows[0]), "5000");
        let plan = store.plan(&s, &rows, &src.contributions);

        let written: Vec<(ContributionId, Option<i64>)> = plan
            .mutations
            .iter()
            .map(|m| match &m.mutation {
                Mutation::UpdateContribution { id, patch } => (*id, patch.collected_amount),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(written, vec![(11, Some(0)), (12, Some(5_000))]);
        assert!(plan.skipped.is_empty());

        let total: i64 = src
            .contributions
            .iter()
            .filter(|c| c.month_index == 1)
            .map(|c| {
                written
                    .iter()
                    .find(|(id, _)| *id == c.id)
                    .and_then(|(_, amount)| *amount)
                    .unwrap_or(c.collected_amount)
            })
            .sum();
        assert_eq!(total, 5_000);

        // clearing the month zeroes every record
        store.set_value(CellKey::for_row(FieldGroup::Collection, &rows[0]), "");
        let plan = store.plan(&s, &rows, &src.contributions);
        assert_eq!(plan.mutations.len(), 2);
    }

    #[test]
    fn test_collection_decrease_leaves_negative_records_alone() {
        let s = scheme(SchemeType::Fixed, 1);
        let src = LedgerSources {
            contributions: vec![contribution(20, 1, 3_000), contribution(21, 1, -2_000)],
            ..LedgerSources::default()
        };
        let rows = build_ledger(&s, &src);
        assert_eq!(rows[0].collected_amount, 1_000);

        let mut store = StagingStore::new();
        store.set_value(CellKey::for_row(FieldGroup::Collection, &rows[0]), "0");
        let plan = store.plan(&s, &rows, &src.contributions);
        assert_eq!(
            plan.mutations[0].mutation,
            Mutation::UpdateContribution {
                id: 20,
                patch: ContributionPatch {
                    collected_amount: Some(2_000)
                }
            }
        );
        assert_eq!(plan.mutations.len(), 1);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_busy_cells_count_overlapping_calls() {
        let busy = BusyCells::new();
        let cell = CellKey::new(FieldGroup::Member, RowKey::MonthLabel("01/2025".into()));

        let first = busy.acquire(cell.clone());
        let second = busy.acquire(cell.clone());
        drop(first);
        assert!(busy.is_busy(&cell));
        drop(second);
        assert!(!busy.is_busy(&cell));
        assert!(busy.is_empty());
    }

    /// Records calls and rejects assignment deletes.
    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChitApi for RecordingApi {
        async fn get_scheme(&self, _scheme_id: SchemeId) -> Result<Scheme> {
            Ok(scheme(SchemeType::Fixed, 3))
        }
        async fn list_members(&self) -> Result<Vec<Member>> {
            Ok(Vec::new())
        }
        async fn list_assignments(&self, _scheme_id: SchemeId) -> Result<Vec<Assignment>> {
            Ok(Vec::new())
        }
        async fn create_assignment(&self, new: &NewAssignment) -> Result<Assignment> {
            self.calls.lock().push(format!("create {}", new.month_index));
            Ok(Assignment {
                id: 99,
                scheme_id: new.scheme_id,
                member_id: new.member_id,
                month_index: new.month_index,
                member: None,
                expected_contribution: None,
            })
        }
        async fn delete_assignment(&self, id: AssignmentId) -> Result<()> {
            self.calls.lock().push(format!("delete {id}"));
            Err(anyhow!("assignment {id} is locked"))
        }
        async fn list_payouts(&self, _scheme_id: SchemeId) -> Result<Vec<Payout>> {
            Ok(Vec::new())
        }
        async fn update_payout(&self, id: PayoutId, _patch: &PayoutPatch) -> Result<Payout> {
            self.calls.lock().push(format!("payout {id}"));
            Ok(payout(id, 1))
        }
        async fn list_contributions(&self, _scheme_id: SchemeId) -> Result<Vec<Contribution>> {
            Ok(Vec::new())
        }
        async fn update_contribution(
            &self,
            id: ContributionId,
            _patch: &ContributionPatch,
        ) -> Result<Contribution> {
            self.calls.lock().push(format!("contribution {id}"));
            Ok(contribution(id, 1, 0))
        }
    }

    #[tokio::test]
    async fn test_execute_collects_failures_without_stopping() {
        let (s, src, rows) = ledger(SchemeType::Fixed);
        let mut store = StagingStore::new();
        store.set_value(CellKey::for_row(FieldGroup::Member, &rows[2]), "9");
        store.set_value(CellKey::for_row(FieldGroup::Payout, &rows[0]), "50000");
        let plan = store.plan(&s, &rows, &src.contributions);
        assert_eq!(plan.mutations.len(), 3);

        let api = RecordingApi::default();
        let busy = BusyCells::new();
        let report = execute_plan(&api, plan, &busy).await;

        assert_eq!(report.applied, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].cell.field, FieldGroup::Member);
        assert_eq!(
            report.error_message().as_deref(),
            Some("Failed to delete assignment: assignment 3 is locked")
        );
        assert!(busy.is_empty());

        let mut calls = api.calls.lock().clone();
        calls.sort();
        assert_eq!(calls, vec!["create 3", "delete 3", "payout 101"]);
    }
}
