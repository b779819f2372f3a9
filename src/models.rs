//! Chit scheme records exchanged with the backend, plus runtime configuration.
//!
//! Field names follow the REST backend's JSON (`chit_type`, `chit_value`,
//! `month`, ...) through serde renames so the same types serve the HTTP
//! client, the SQLite store and the ledger engine.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub type SchemeId = i64;
pub type MemberId = i64;
pub type AssignmentId = i64;
pub type PayoutId = i64;
pub type ContributionId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SchemeType {
    Fixed,
    Variable,
    Auction,
}

impl SchemeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemeType::Fixed => "fixed",
            SchemeType::Variable => "variable",
            SchemeType::Auction => "auction",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fixed" => Some(SchemeType::Fixed),
            "variable" => Some(SchemeType::Variable),
            "auction" => Some(SchemeType::Auction),
            _ => None,
        }
    }
}

impl fmt::Display for SchemeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rotating-savings pool. `duration_months` fixes the ledger length.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scheme {
    pub id: SchemeId,
    pub name: String,
    #[serde(rename = "chit_type")]
    pub scheme_type: SchemeType,
    #[serde(rename = "chit_value")]
    pub total_value: i64,
    pub duration_months: u32,
    #[serde(deserialize_with = "date_prefix")]
    pub start_date: NaiveDate,
    #[serde(rename = "size", alias = "group_size")]
    pub member_count: u32,
    /// Foreman commission, auction schemes only.
    #[serde(
        rename = "foreman_commission_percent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub commission_percent: Option<f64>,
    /// Premium over the base installment, variable schemes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premium_percent: Option<f64>,
}

impl Scheme {
    pub fn is_auction(&self) -> bool {
        self.scheme_type == SchemeType::Auction
    }
}

/// Scheme setup request. The store creates one payout row and one
/// contribution row per month alongside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewScheme {
    pub name: String,
    #[serde(rename = "chit_type")]
    pub scheme_type: SchemeType,
    #[serde(rename = "chit_value")]
    pub total_value: i64,
    pub duration_months: u32,
    pub start_date: NaiveDate,
    #[serde(rename = "size")]
    pub member_count: u32,
    #[serde(rename = "foreman_commission_percent", default)]
    pub commission_percent: Option<f64>,
    #[serde(default)]
    pub premium_percent: Option<f64>,
}

impl NewScheme {
    /// Per-month installment before any auction dividend. Variable schemes
    /// add their premium on top, truncated to whole rupees.
    pub fn installment(&self) -> i64 {
        if self.member_count == 0 {
            return 0;
        }
        let base = self.total_value / i64::from(self.member_count);
        match (self.scheme_type, self.premium_percent) {
            (SchemeType::Variable, Some(p)) => base + (base as f64 * p / 100.0).floor() as i64,
            _ => base,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: MemberId,
    pub full_name: String,
    #[serde(rename = "phone_number", alias = "phone", default)]
    pub phone: String,
}

/// Binding of one member to one month of a scheme.
///
/// Never updated in place: a member change is a delete followed by a create.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub id: AssignmentId,
    #[serde(rename = "chit_id")]
    pub scheme_id: SchemeId,
    pub member_id: MemberId,
    #[serde(rename = "month")]
    pub month_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<Member>,
    /// Per-slot contribution figure computed by the backend for the scheme type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_contribution: Option<i64>,
}

impl Assignment {
    pub fn member_name(&self) -> Option<&str> {
        self.member.as_ref().map(|m| m.full_name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAssignment {
    #[serde(rename = "chit_id")]
    pub scheme_id: SchemeId,
    pub member_id: MemberId,
    #[serde(rename = "month")]
    pub month_index: u32,
    #[serde(rename = "chit_month")]
    pub month_date: NaiveDate,
}

/// The single disbursement row that exists for every month of a scheme.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payout {
    pub id: PayoutId,
    #[serde(rename = "chit_id")]
    pub scheme_id: SchemeId,
    #[serde(rename = "month")]
    pub month_index: u32,
    #[serde(rename = "payout_amount", default)]
    pub planned_amount: Option<i64>,
    #[serde(rename = "amount_paid", default)]
    pub paid_amount: i64,
    #[serde(default)]
    pub bid_amount: Option<i64>,
    #[serde(default, deserialize_with = "opt_date_prefix")]
    pub paid_date: Option<NaiveDate>,
    #[serde(rename = "payment_method", default)]
    pub method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Partial update for a payout. `Some(None)` clears the field.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PayoutPatch {
    #[serde(rename = "payout_amount", skip_serializing_if = "Option::is_none")]
    pub planned_amount: Option<Option<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid_amount: Option<Option<i64>>,
}

impl PayoutPatch {
    pub fn planned(amount: Option<i64>) -> Self {
        Self {
            planned_amount: Some(amount),
            ..Self::default()
        }
    }

    pub fn bid(amount: Option<i64>) -> Self {
        Self {
            bid_amount: Some(amount),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.planned_amount.is_none() && self.bid_amount.is_none()
    }
}

/// Money collected for a month. Several records for one month are summed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contribution {
    pub id: ContributionId,
    #[serde(rename = "chit_id")]
    pub scheme_id: SchemeId,
    #[serde(rename = "month")]
    pub month_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<AssignmentId>,
    /// Paying member, when the collection was logged against one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_id: Option<MemberId>,
    #[serde(rename = "expected_contribution", default)]
    pub expected_amount: Option<i64>,
    #[serde(rename = "amount_paid", default)]
    pub collected_amount: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ContributionPatch {
    #[serde(rename = "amount_paid", skip_serializing_if = "Option::is_none")]
    pub collected_amount: Option<i64>,
}

fn date_prefix<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date_prefix(&raw).map_err(serde::de::Error::custom)
}

fn opt_date_prefix<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        Some(s) if !s.trim().is_empty() => parse_date_prefix(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

/// Accepts `YYYY-MM-DD` as well as full timestamps (`YYYY-MM-DDTHH:MM:SS...`).
pub fn parse_date_prefix(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    let trimmed = raw.trim();
    let day = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
}

/// Which collaborator implementation the binary talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Http,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub backend: BackendKind,
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub db_path: String,
    pub http_timeout_secs: u64,
    pub page_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            api_base_url: "http://localhost:8000/api".to_string(),
            api_token: None,
            db_path: "chit_ledger.db".to_string(),
            http_timeout_secs: 30,
            page_size: 10,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Ok(v) = std::env::var("CHIT_BACKEND") {
            match v.trim().to_ascii_lowercase().as_str() {
                "http" => config.backend = BackendKind::Http,
                "sqlite" => config.backend = BackendKind::Sqlite,
                other => tracing::warn!(backend = other, "unknown CHIT_BACKEND, using sqlite"),
            }
        }
        if let Ok(v) = std::env::var("CHIT_API_BASE_URL") {
            if !v.trim().is_empty() {
                config.api_base_url = v.trim().trim_end_matches('/').to_string();
            }
        }
        config.api_token = std::env::var("CHIT_API_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty());
        if let Ok(v) = std::env::var("CHIT_DB_PATH") {
            if !v.trim().is_empty() {
                config.db_path = v;
            }
        }
        config.http_timeout_secs = std::env::var("CHIT_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(config.http_timeout_secs);
        config.page_size = std::env::var("LEDGER_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(config.page_size);

        config
    }
}
