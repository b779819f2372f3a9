//! Auction payout arithmetic
//!
//! Converts a month's winning bid into the foreman commission, the dividend
//! shared by the non-winning members and the amount each of them still owes.
//! All money is whole rupees; fractional rupees are truncated, never rounded.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuctionStats {
    /// Foreman commission on the full scheme value
    pub commission_amount: i64,
    /// Bid left over after commission, shared among members (never negative)
    pub distributable_dividend: i64,
    pub dividend_per_member: i64,
    /// Installment before any dividend
    pub base_installment: i64,
    /// What a non-winning member owes for the month
    pub net_payable: i64,
    /// Amount disbursed to the winner
    pub payout_amount: i64,
}

/// Compute auction figures for one month.
///
/// # Arguments
/// * `scheme_value` - Total value of the scheme
/// * `member_count` - Members sharing the dividend
/// * `commission_percent` - Foreman commission (e.g. `1.0` for 1%)
/// * `bid_amount` - Winning bid (discount the winner accepts)
pub fn compute_auction_stats(
    scheme_value: i64,
    member_count: i64,
    commission_percent: f64,
    bid_amount: i64,
) -> AuctionStats {
    let commission_amount = (scheme_value as f64 * commission_percent / 100.0).floor() as i64;
    let distributable_dividend = (bid_amount - commission_amount).max(0);

    // Integer division truncates; the remainder stays with the foreman.
    let (dividend_per_member, base_installment) = if member_count > 0 {
        (
            distributable_dividend / member_count,
            scheme_value / member_count,
        )
    } else {
        (0, 0)
    };

    AuctionStats {
        commission_amount,
        distributable_dividend,
        dividend_per_member,
        base_installment,
        net_payable: (base_installment - dividend_per_member).max(0),
        payout_amount: scheme_value - bid_amount,
    }
}

/// Figures to display for a month, or `None` until a positive bid is recorded.
pub fn stats_for_bid(
    scheme_value: i64,
    member_count: i64,
    commission_percent: f64,
    bid_amount: Option<i64>,
) -> Option<AuctionStats> {
    match bid_amount {
        Some(bid) if bid > 0 => Some(compute_auction_stats(
            scheme_value,
            member_count,
            commission_percent,
            bid,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_auction() {
        let stats = compute_auction_stats(100_000, 10, 1.0, 20_000);

        assert_eq!(stats.commission_amount, 1_000);
        assert_eq!(stats.distributable_dividend, 19_000);
        assert_eq!(stats.dividend_per_member, 1_900);
        assert_eq!(stats.base_installment, 10_000);
        assert_eq!(stats.net_payable, 8_100);
        assert_eq!(stats.payout_amount, 80_000);
    }

    #[test]
    fn test_zero_bid_clamps_dividend() {
        let stats = compute_auction_stats(100_000, 10, 1.0, 0);

        assert_eq!(stats.commission_amount, 1_000);
        assert_eq!(stats.distributable_dividend, 0);
        assert_eq!(stats.dividend_per_member, 0);
        assert_eq!(stats.net_payable, stats.base_installment);
        assert_eq!(stats.payout_amount, 100_000);
    }

    #[test]
    fn test_dividend_truncates_instead_of_rounding() {
        // 19_999 / 7 = 2857.0 -> 2857; 100_000 / 7 = 14285.71 -> 14285
        let stats = compute_auction_stats(100_000, 7, 1.0, 20_999);

        assert_eq!(stats.distributable_dividend, 19_999);
        assert_eq!(stats.dividend_per_member, 2_857);
        assert_eq!(stats.base_installment, 14_285);
        assert_eq!(stats.net_payable, 11_428);
    }

    #[test]
    fn test_fractional_commission_truncates() {
        // 2.5% of 99_999 = 2499.975
        let stats = compute_auction_stats(99_999, 10, 2.5, 5_000);
        assert_eq!(stats.commission_amount, 2_499);
        assert_eq!(stats.distributable_dividend, 2_501);
    }

    #[test]
    fn test_no_members_yields_zero_shares() {
        let stats = compute_auction_stats(50_000, 0, 1.0, 10_000);
        assert_eq!(stats.dividend_per_member, 0);
        assert_eq!(stats.base_installment, 0);
        assert_eq!(stats.net_payable, 0);
        assert_eq!(stats.payout_amount, 40_000);
    }

    #[test]
    fn test_huge_dividend_never_makes_net_negative() {
        let stats = compute_auction_stats(100_000, 10, 0.0, 150_000);
        assert_eq!(stats.net_payable, 0);
    }

    #[test]
    fn test_missing_or_zero_bid_shows_nothing() {
        assert!(stats_for_bid(100_000, 10, 1.0, None).is_none());
        assert!(stats_for_bid(100_000, 10, 1.0, Some(0)).is_none());
        assert!(stats_for_bid(100_000, 10, 1.0, Some(20_000)).is_some());
    }
}
