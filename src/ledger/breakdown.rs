//! Per-member view of one month.
//!
//! Every member of the scheme owes the month's installment; collections
//! logged against a member count towards that member only. Collections with
//! no paying member still count towards the month total.

use serde::Serialize;
use std::collections::HashMap;

use super::MonthRow;
use crate::models::{Assignment, Contribution, Member, MemberId, SchemeId};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum PaymentStatus {
    Paid,
    Partial,
    Unpaid,
}

impl PaymentStatus {
    /// Nothing paid is `Unpaid`; anything short of `expected` is `Partial`.
    pub fn classify(expected: i64, paid: i64) -> Self {
        if paid <= 0 {
            PaymentStatus::Unpaid
        } else if paid < expected {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Paid
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemberMonth {
    pub member_id: MemberId,
    pub member_name: String,
    pub phone: String,
    pub expected_amount: i64,
    pub amount_paid: i64,
    pub status: PaymentStatus,
}

impl MemberMonth {
    pub fn amount_due(&self) -> i64 {
        (self.expected_amount - self.amount_paid).max(0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub paid: usize,
    pub partial: usize,
    pub unpaid: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthBreakdown {
    pub month_index: u32,
    pub label: String,
    pub members: Vec<MemberMonth>,
    pub total_expected: i64,
    /// Every collection of the month, attributed or not
    pub total_collected: i64,
    pub collection_percentage: f64,
}

impl MonthBreakdown {
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for m in &self.members {
            match m.status {
                PaymentStatus::Paid => counts.paid += 1,
                PaymentStatus::Partial => counts.partial += 1,
                PaymentStatus::Unpaid => counts.unpaid += 1,
            }
        }
        counts
    }

    pub fn member(&self, member_id: MemberId) -> Option<&MemberMonth> {
        self.members.iter().find(|m| m.member_id == member_id)
    }

    /// Case-insensitive name match or phone substring.
    pub fn search(&self, query: &str) -> Vec<&MemberMonth> {
        let query = query.trim().to_lowercase();
        self.members
            .iter()
            .filter(|m| {
                query.is_empty()
                    || m.member_name.to_lowercase().contains(&query)
                    || m.phone.contains(&query)
            })
            .collect()
    }
}

/// What one member owes for the month: the auction net payable once a bid
/// is recorded, otherwise the month's expected amount.
pub fn member_installment(row: &MonthRow) -> i64 {
    row.auction
        .map(|a| a.net_payable)
        .unwrap_or(row.expected_amount)
}

/// Sum of the collections logged against `member_id` for one month.
pub fn paid_by_member(
    contributions: &[Contribution],
    scheme_id: SchemeId,
    month_index: u32,
    member_id: MemberId,
) -> i64 {
    contributions
        .iter()
        .filter(|c| {
            c.scheme_id == scheme_id
                && c.month_index == month_index
                && c.member_id == Some(member_id)
        })
        .map(|c| c.collected_amount)
        .sum()
}

/// Build the breakdown for `row`. The roster is every member assigned to
/// any month of the scheme, in month order, followed by members who paid
/// towards this month without holding an assignment.
pub fn build_month_breakdown(
    scheme_id: SchemeId,
    row: &MonthRow,
    assignments: &[Assignment],
    members: &[Member],
    contributions: &[Contribution],
) -> MonthBreakdown {
    let directory: HashMap<MemberId, &Member> = members.iter().map(|m| (m.id, m)).collect();

    let mut scheme_assignments: Vec<&Assignment> = assignments
        .iter()
        .filter(|a| a.scheme_id == scheme_id)
        .collect();
    scheme_assignments.sort_by_key(|a| a.month_index);

    let mut roster: Vec<&Member> = Vec::new();
    for a in &scheme_assignments {
        let member = directory.get(&a.member_id).copied().or(a.member.as_ref());
        add_to_roster(&mut roster, member);
    }
    for c in contributions
        .iter()
        .filter(|c| c.scheme_id == scheme_id && c.month_index == row.month_index)
    {
        if let Some(id) = c.member_id {
            add_to_roster(&mut roster, directory.get(&id).copied());
        }
    }

    let expected = member_installment(row);
    let breakdown_members: Vec<MemberMonth> = roster
        .into_iter()
        .map(|m| {
            let paid = paid_by_member(contributions, scheme_id, row.month_index, m.id);
            MemberMonth {
                member_id: m.id,
                member_name: m.full_name.clone(),
                phone: m.phone.clone(),
                expected_amount: expected,
                amount_paid: paid,
                status: PaymentStatus::classify(expected, paid),
            }
        })
        .collect();

    let total_expected: i64 = breakdown_members.iter().map(|m| m.expected_amount).sum();
    let collection_percentage = if total_expected > 0 {
        let pct = row.collected_amount as f64 * 100.0 / total_expected as f64;
        (pct * 100.0).round() / 100.0
    } else {
        0.0
    };

    MonthBreakdown {
        month_index: row.month_index,
        label: row.label.clone(),
        members: breakdown_members,
        total_expected,
        total_collected: row.collected_amount,
        collection_percentage,
    }
}

fn add_to_roster<'a>(roster: &mut Vec<&'a Member>, member: Option<&'a Member>) {
    if let Some(m) = member {
        if !roster.iter().any(|known| known.id == m.id) {
            roster.push(m);
        }
    }
}
