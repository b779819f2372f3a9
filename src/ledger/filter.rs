//! Row status, column filters, search and pagination over ledger rows.

use serde::{Deserialize, Serialize};

use super::MonthRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Unassigned,
    Assigned,
    /// Money collected and a payout planned
    Completed,
}

impl RowStatus {
    pub fn of(row: &MonthRow) -> Self {
        if row.assignment.is_none() {
            return RowStatus::Unassigned;
        }
        if row.collected_amount > 0 && row.planned_payout().unwrap_or(0) > 0 {
            return RowStatus::Completed;
        }
        RowStatus::Assigned
    }
}

/// Per-column "assigned / unassigned" filter chips.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowFilter {
    #[default]
    All,
    MembersAssigned,
    MembersUnassigned,
    PayoutsAssigned,
    PayoutsUnassigned,
    AuctionsAssigned,
    AuctionsUnassigned,
    CollectionsAssigned,
    CollectionsUnassigned,
}

impl RowFilter {
    pub fn matches(&self, row: &MonthRow) -> bool {
        let payout = row.planned_payout().unwrap_or(0);
        let bid = row.bid_amount.unwrap_or(0);
        match self {
            RowFilter::All => true,
            RowFilter::MembersAssigned => row.assignment.is_some(),
            RowFilter::MembersUnassigned => row.assignment.is_none(),
            RowFilter::PayoutsAssigned => payout > 0,
            RowFilter::PayoutsUnassigned => payout <= 0,
            RowFilter::AuctionsAssigned => bid > 0,
            RowFilter::AuctionsUnassigned => bid <= 0,
            RowFilter::CollectionsAssigned => row.expected_amount > 0,
            RowFilter::CollectionsUnassigned => row.expected_amount <= 0,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let filter = match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "all" => RowFilter::All,
            "members_assigned" => RowFilter::MembersAssigned,
            "members_unassigned" => RowFilter::MembersUnassigned,
            "payouts_assigned" => RowFilter::PayoutsAssigned,
            "payouts_unassigned" => RowFilter::PayoutsUnassigned,
            "auctions_assigned" => RowFilter::AuctionsAssigned,
            "auctions_unassigned" => RowFilter::AuctionsUnassigned,
            "collections_assigned" => RowFilter::CollectionsAssigned,
            "collections_unassigned" => RowFilter::CollectionsUnassigned,
            _ => return None,
        };
        Some(filter)
    }
}

/// Case-insensitive substring match over the row's visible text.
pub fn row_matches_search(row: &MonthRow, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }

    let amount = |v: Option<i64>| v.map(|n| n.to_string()).unwrap_or_default();
    let haystacks = [
        row.month_index.to_string(),
        row.label.to_lowercase(),
        row.member_name().unwrap_or_default().to_lowercase(),
        amount(row.planned_payout()),
        amount(row.bid_amount),
        row.expected_amount.to_string(),
    ];
    haystacks.iter().any(|h| h.contains(&query))
}

pub fn filter_rows<'a>(rows: &'a [MonthRow], filter: RowFilter, query: &str) -> Vec<&'a MonthRow> {
    rows.iter()
        .filter(|r| filter.matches(r))
        .filter(|r| row_matches_search(r, query))
        .collect()
}

/// Number of pages needed for `len` rows. Zero rows still count as one page.
pub fn page_count(len: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 1;
    }
    len.div_ceil(page_size).max(1)
}

/// Rows of the 1-based `page`. Out-of-range pages are empty.
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Vec<T> {
    if page == 0 || page_size == 0 {
        return Vec::new();
    }
    items
        .iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .cloned()
        .collect()
}
