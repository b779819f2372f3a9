//! Month Ledger
//!
//! Merges a scheme with its assignment, payout and contribution records into
//! one row per month index. The ledger is a read model: it is rebuilt from
//! scratch whenever any source collection changes and never patched in place.
//! Schemes run for tens of months, so a full rebuild is cheap.

pub mod breakdown;
pub mod calendar;
pub mod filter;

pub use breakdown::{
    build_month_breakdown, member_installment, paid_by_member, MemberMonth, MonthBreakdown,
    PaymentStatus, StatusCounts,
};
pub use calendar::{month_date, month_label, month_start};
pub use filter::{filter_rows, page_count, paginate, row_matches_search, RowFilter, RowStatus};

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::auction::{stats_for_bid, AuctionStats};
use crate::models::{Assignment, Contribution, Payout, Scheme};

/// One month of a scheme as the operator sees it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthRow {
    pub month_index: u32,
    /// First day of the calendar month
    pub calendar_month: NaiveDate,
    /// `MM/YYYY`
    pub label: String,
    pub assignment: Option<Assignment>,
    pub payout: Option<Payout>,
    pub expected_amount: i64,
    /// Sum of every contribution recorded against the month
    pub collected_amount: i64,
    pub bid_amount: Option<i64>,
    pub auction_completed: bool,
    pub auction: Option<AuctionStats>,
}

impl MonthRow {
    pub fn member_id(&self) -> Option<i64> {
        self.assignment.as_ref().map(|a| a.member_id)
    }

    pub fn member_name(&self) -> Option<&str> {
        self.assignment.as_ref().and_then(|a| a.member_name())
    }

    pub fn planned_payout(&self) -> Option<i64> {
        self.payout.as_ref().and_then(|p| p.planned_amount)
    }

    pub fn status(&self) -> RowStatus {
        RowStatus::of(self)
    }
}

/// Source collections the ledger is derived from.
#[derive(Debug, Clone, Default)]
pub struct LedgerSources {
    pub assignments: Vec<Assignment>,
    pub payouts: Vec<Payout>,
    pub contributions: Vec<Contribution>,
}

/// Build the month-by-month ledger for a scheme.
///
/// Total: always returns exactly `duration_months` rows, indexed `1..=N` in
/// order, whatever the source collections contain. Records pointing at other
/// schemes or at months outside the scheme are ignored.
pub fn build_ledger(scheme: &Scheme, sources: &LedgerSources) -> Vec<MonthRow> {
    let months = scheme.duration_months;

    let mut assignments: HashMap<u32, &Assignment> = HashMap::with_capacity(months as usize);
    for a in sources
        .assignments
        .iter()
        .filter(|a| a.scheme_id == scheme.id)
    {
        // At most one per month; keep the first if the feed disagrees.
        if assignments.contains_key(&a.month_index) {
            debug!(
                scheme_id = scheme.id,
                month = a.month_index,
                "duplicate assignment in feed, keeping the first"
            );
            continue;
        }
        assignments.insert(a.month_index, a);
    }

    let mut payouts: HashMap<u32, &Payout> = HashMap::with_capacity(months as usize);
    for p in sources.payouts.iter().filter(|p| p.scheme_id == scheme.id) {
        payouts.entry(p.month_index).or_insert(p);
    }

    let mut collected: HashMap<u32, i64> = HashMap::new();
    let mut expected_from_contributions: HashMap<u32, i64> = HashMap::new();
    for c in sources
        .contributions
        .iter()
        .filter(|c| c.scheme_id == scheme.id)
    {
        *collected.entry(c.month_index).or_insert(0) += c.collected_amount;
        if let Some(expected) = c.expected_amount {
            expected_from_contributions
                .entry(c.month_index)
                .or_insert(expected);
        }
    }

    let commission = scheme.commission_percent.unwrap_or(0.0);

    (1..=months)
        .map(|i| {
            let calendar_month = month_start(scheme.start_date, i);
            let assignment = assignments.get(&i).map(|a| (*a).clone());
            let payout = payouts.get(&i).map(|p| (*p).clone());

            let expected_amount = assignment
                .as_ref()
                .and_then(|a| a.expected_contribution)
                .or_else(|| expected_from_contributions.get(&i).copied())
                .unwrap_or(0);

            let bid_amount = payout.as_ref().and_then(|p| p.bid_amount);
            let auction = if scheme.is_auction() {
                stats_for_bid(
                    scheme.total_value,
                    i64::from(scheme.member_count),
                    commission,
                    bid_amount,
                )
            } else {
                None
            };

            MonthRow {
                month_index: i,
                calendar_month,
                label: month_label(calendar_month),
                assignment,
                payout,
                expected_amount,
                collected_amount: collected.get(&i).copied().unwrap_or(0),
                bid_amount,
                auction_completed: scheme.is_auction() && bid_amount.is_some(),
                auction,
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Member, SchemeType};

    pub(crate) fn scheme(scheme_type: SchemeType, months: u32) -> Scheme {
        Scheme {
            id: 1,
            name: "Test Chit".to_string(),
            scheme_type,
            total_value: 100_000,
            duration_months: months,
            start_date: NaiveDate::from_ymd_opt(2024, 11, 5).unwrap(),
            member_count: 10,
            commission_percent: Some(1.0),
            premium_percent: None,
        }
    }

    pub(crate) fn assignment(id: i64, month: u32, member_id: i64) -> Assignment {
        Assignment {
            id,
            scheme_id: 1,
            member_id,
            month_index: month,
            member: Some(Member {
                id: member_id,
                full_name: format!("Member {member_id}"),
                phone: String::new(),
            }),
            expected_contribution: Some(10_000),
        }
    }

    pub(crate) fn payout(id: i64, month: u32) -> Payout {
        Payout {
            id,
            scheme_id: 1,
            month_index: month,
            planned_amount: None,
            paid_amount: 0,
            bid_amount: None,
            paid_date: None,
            method: None,
            notes: None,
        }
    }

    pub(crate) fn contribution(id: i64, month: u32, collected: i64) -> Contribution {
        Contribution {
            id,
            scheme_id: 1,
            month_index: month,
            assignment_id: None,
            member_id: None,
            expected_amount: None,
            collected_amount: collected,
        }
    }

    #[test]
    fn test_one_row_per_month_in_order() {
        let s = scheme(SchemeType::Fixed, 12);
        let rows = build_ledger(&s, &LedgerSources::default());

        assert_eq!(rows.len(), 12);
        for (pos, row) in rows.iter().enumerate() {
            assert_eq!(row.month_index as usize, pos + 1);
            assert!(row.assignment.is_none());
            assert!(row.payout.is_none());
        }
    }

    #[test]
    fn test_labels_follow_start_date() {
        let s = scheme(SchemeType::Fixed, 4);
        let rows = build_ledger(&s, &LedgerSources::default());
        let labels: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["11/2024", "12/2024", "01/2025", "02/2025"]);
        assert_eq!(
            rows[2].calendar_month,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_merges_sources_by_month() {
        let s = scheme(SchemeType::Fixed, 3);
        let sources = LedgerSources {
            assignments: vec![assignment(10, 2, 55)],
            payouts: vec![payout(100, 1), payout(101, 2), payout(102, 3)],
            contributions: vec![
                contribution(1, 2, 4_000),
                contribution(2, 2, 6_000),
                contribution(3, 3, 500),
            ],
        };
        let rows = build_ledger(&s, &sources);

        assert!(rows[0].assignment.is_none());
        assert_eq!(rows[0].expected_amount, 0);
        assert_eq!(rows[1].member_id(), Some(55));
        assert_eq!(rows[1].expected_amount, 10_000);
        assert_eq!(rows[1].collected_amount, 10_000);
        // payout and contribution without an assignment still produce a row
        assert_eq!(rows[2].payout.as_ref().map(|p| p.id), Some(102));
        assert_eq!(rows[2].collected_amount, 500);
    }

    #[test]
    fn test_ignores_foreign_and_out_of_range_records() {
        let s = scheme(SchemeType::Fixed, 2);
        let mut foreign = assignment(11, 1, 9);
        foreign.scheme_id = 2;
        let sources = LedgerSources {
            assignments: vec![foreign, assignment(12, 5, 3)],
            payouts: vec![payout(100, 9)],
            contributions: vec![contribution(1, 7, 100)],
        };
        let rows = build_ledger(&s, &sources);

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.assignment.is_none() && r.payout.is_none()));
        assert!(rows.iter().all(|r| r.collected_amount == 0));
    }

    #[test]
    fn test_expected_amount_falls_back_to_contribution_feed() {
        let s = scheme(SchemeType::Variable, 2);
        let mut without_figure = assignment(10, 1, 4);
        without_figure.expected_contribution = None;
        let mut slot = contribution(1, 1, 0);
        slot.expected_amount = Some(11_500);

        let rows = build_ledger(
            &s,
            &LedgerSources {
                assignments: vec![without_figure],
                payouts: vec![],
                contributions: vec![slot],
            },
        );
        assert_eq!(rows[0].expected_amount, 11_500);
    }

    #[test]
    fn test_auction_rows_carry_stats_once_bid_recorded() {
        let s = scheme(SchemeType::Auction, 2);
        let mut won = payout(100, 1);
        won.bid_amount = Some(20_000);
        let rows = build_ledger(
            &s,
            &LedgerSources {
                assignments: vec![],
                payouts: vec![won, payout(101, 2)],
                contributions: vec![],
            },
        );

        assert!(rows[0].auction_completed);
        assert_eq!(rows[0].bid_amount, Some(20_000));
        assert_eq!(rows[0].auction.map(|a| a.net_payable), Some(8_100));
        assert!(!rows[1].auction_completed);
        assert!(rows[1].auction.is_none());
    }

    #[test]
    fn test_non_auction_scheme_never_shows_stats() {
        let s = scheme(SchemeType::Fixed, 1);
        let mut p = payout(100, 1);
        p.bid_amount = Some(5_000);
        let rows = build_ledger(
            &s,
            &LedgerSources {
                assignments: vec![],
                payouts: vec![p],
                contributions: vec![],
            },
        );
        assert!(rows[0].auction.is_none());
        assert!(!rows[0].auction_completed);
    }
}
