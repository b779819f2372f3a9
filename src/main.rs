//! chitledger - month ledger console for chit schemes
//!
//! Shows the merged month-by-month ledger of a scheme and applies inline
//! edits (member, payout, auction bid, collection) through the same staging
//! and batched-commit engine the interactive view uses.
//!
//! Usage:
//!   chitledger init-demo
//!   chitledger ledger --scheme 1 --filter members-unassigned
//!   chitledger assign --scheme 1 --month 3 --member 2
//!   chitledger set-bid --scheme 1 --month 3 --amount 20000
//!   chitledger breakdown --scheme 1 --month 3
//!   chitledger auction --value 100000 --members 10 --commission 1 --bid 20000

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chit_ledger::api::{self, SqliteChitApi};
use chit_ledger::auction::compute_auction_stats;
use chit_ledger::edit::{EditScope, FieldGroup};
use chit_ledger::ledger::{MonthBreakdown, MonthRow, RowFilter};
use chit_ledger::models::{BackendKind, LedgerConfig, MemberId, NewScheme, SchemeId, SchemeType};
use chit_ledger::session::{LedgerObserver, LedgerSession, LogPaymentRequest};

#[derive(Parser, Debug)]
#[command(name = "chitledger")]
#[command(about = "Month ledger and inline editing for chit schemes")]
struct Cli {
    /// Collaborator backend
    #[arg(long, value_enum, env = "CHIT_BACKEND")]
    backend: Option<Backend>,

    /// REST backend base URL
    #[arg(long, env = "CHIT_API_BASE_URL")]
    api_url: Option<String>,

    /// SQLite database path
    #[arg(long, env = "CHIT_DB_PATH")]
    db_path: Option<String>,

    /// Rows per page
    #[arg(long, env = "LEDGER_PAGE_SIZE")]
    page_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Http,
    Sqlite,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the month ledger of a scheme
    Ledger {
        #[arg(short, long)]
        scheme: SchemeId,

        /// all, members-assigned, payouts-unassigned, ...
        #[arg(short, long, default_value = "all")]
        filter: String,

        /// Free-text search over month, member and amounts
        #[arg(long, default_value = "")]
        search: String,

        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Compute auction figures for a bid
    Auction {
        #[arg(long)]
        value: i64,
        #[arg(long)]
        members: i64,
        #[arg(long, default_value = "0")]
        commission: f64,
        #[arg(long)]
        bid: i64,
    },

    /// Assign a member to a month (empty member unassigns)
    Assign {
        #[arg(short, long)]
        scheme: SchemeId,
        #[arg(short, long)]
        month: u32,
        #[arg(long, default_value = "")]
        member: String,
    },

    /// Set the planned payout of a month
    SetPayout {
        #[arg(short, long)]
        scheme: SchemeId,
        #[arg(short, long)]
        month: u32,
        #[arg(short, long)]
        amount: String,
    },

    /// Record the winning bid of an auction month
    SetBid {
        #[arg(short, long)]
        scheme: SchemeId,
        #[arg(short, long)]
        month: u32,
        #[arg(short, long)]
        amount: String,
    },

    /// Set the total collected for a month
    SetCollection {
        #[arg(short, long)]
        scheme: SchemeId,
        #[arg(short, long)]
        month: u32,
        #[arg(short, long)]
        amount: String,
    },

    /// Show what a payment entry for a month would be prefilled with
    LogPayment {
        #[arg(short, long)]
        scheme: SchemeId,
        #[arg(short, long)]
        month: u32,
        /// Paying member (defaults to the member assigned to the month)
        #[arg(long)]
        member: Option<MemberId>,
    },

    /// Per-member payment status for one month
    Breakdown {
        #[arg(short, long)]
        scheme: SchemeId,
        #[arg(short, long)]
        month: u32,
        /// Filter members by name or phone
        #[arg(long, default_value = "")]
        search: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Seed the SQLite backend with a demo auction scheme and members
    InitDemo {
        #[arg(long, default_value = "12")]
        months: u32,
    },
}

/// Logs what the session reports to its observers.
struct TracingObserver;

impl LedgerObserver for TracingObserver {
    fn on_scope_changed(&self, scope: &EditScope) {
        info!(?scope, "edit scope changed");
    }

    fn on_log_payment(&self, request: &LogPaymentRequest) {
        info!(
            month = request.month_index,
            member_id = request.member_id,
            amount_due = request.amount_due,
            "payment entry requested"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let config = resolve_config(&cli);

    match cli.command {
        Commands::Auction {
            value,
            members,
            commission,
            bid,
        } => {
            let stats = compute_auction_stats(value, members, commission, bid);
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::InitDemo { months } => init_demo(&config, months).await,
        Commands::Ledger {
            scheme,
            filter,
            search,
            page,
            json,
        } => {
            let filter = RowFilter::parse(&filter)
                .with_context(|| format!("unknown filter '{}'", filter))?;
            let mut session = open_session(&config, scheme).await?;
            session.set_filter(filter);
            session.set_search(search);
            session.set_page(page);
            if json {
                println!("{}", serde_json::to_string_pretty(&session.page_rows())?);
            } else {
                print_ledger(&session);
            }
            Ok(())
        }
        Commands::Assign {
            scheme,
            month,
            member,
        } => edit_cell(&config, scheme, month, FieldGroup::Member, &member).await,
        Commands::SetPayout {
            scheme,
            month,
            amount,
        } => edit_cell(&config, scheme, month, FieldGroup::Payout, &amount).await,
        Commands::SetBid {
            scheme,
            month,
            amount,
        } => edit_cell(&config, scheme, month, FieldGroup::Auction, &amount).await,
        Commands::SetCollection {
            scheme,
            month,
            amount,
        } => edit_cell(&config, scheme, month, FieldGroup::Collection, &amount).await,
        Commands::LogPayment {
            scheme,
            month,
            member,
        } => {
            let session = open_session(&config, scheme).await?;
            let assigned = session
                .rows()
                .iter()
                .find(|r| r.month_index == month)
                .and_then(MonthRow::member_id);
            let Some(member_id) = member.or(assigned) else {
                bail!("Month {} has no member assigned; pass --member", month);
            };
            match session.request_log_payment(month, member_id) {
                Some(request) => println!("{}", serde_json::to_string_pretty(&request)?),
                None => bail!("No month {} or member {} in chit {}", month, member_id, scheme),
            }
            Ok(())
        }
        Commands::Breakdown {
            scheme,
            month,
            search,
            json,
        } => {
            let session = open_session(&config, scheme).await?;
            let breakdown = session
                .month_breakdown(month)
                .with_context(|| format!("chit {} has no month {}", scheme, month))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&breakdown)?);
            } else {
                print_breakdown(&breakdown, &search);
            }
            Ok(())
        }
    }
}

fn resolve_config(cli: &Cli) -> LedgerConfig {
    let mut config = LedgerConfig::from_env();
    if let Some(backend) = cli.backend {
        config.backend = match backend {
            Backend::Http => BackendKind::Http,
            Backend::Sqlite => BackendKind::Sqlite,
        };
    }
    if let Some(url) = &cli.api_url {
        config.api_base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(path) = &cli.db_path {
        config.db_path = path.clone();
    }
    if let Some(size) = cli.page_size.filter(|&s| s > 0) {
        config.page_size = size;
    }
    config
}

async fn open_session(config: &LedgerConfig, scheme_id: SchemeId) -> Result<LedgerSession> {
    let api = api::connect(config)?;
    let mut session = LedgerSession::new(api, scheme_id, config.page_size);
    session.add_observer(Arc::new(TracingObserver));
    session
        .load()
        .await
        .with_context(|| format!("Failed to load chit {}", scheme_id))?;
    Ok(session)
}

/// Open a single-cell row edit, stage `raw` and save.
async fn edit_cell(
    config: &LedgerConfig,
    scheme_id: SchemeId,
    month: u32,
    field: FieldGroup,
    raw: &str,
) -> Result<()> {
    let mut session = open_session(config, scheme_id).await?;
    session.enter_row_edit(month, field)?;
    session.set_value(field, month, raw)?;

    let report = session.save().await?;
    for skipped in &report.skipped {
        warn!(cell = %skipped.cell, reason = %skipped.reason, "edit not applied");
    }
    if let Some(error) = report.error_message() {
        session.cancel();
        bail!(error);
    }
    if report.applied == 0 {
        println!("Nothing to change for month {}.", month);
    } else if let Some(message) = session.message() {
        println!("{}", message);
    }

    if let Some(row) = session.rows().iter().find(|r| r.month_index == month) {
        print_rows(&[row]);
    }
    Ok(())
}

async fn init_demo(config: &LedgerConfig, months: u32) -> Result<()> {
    if config.backend != BackendKind::Sqlite {
        bail!("init-demo only seeds the sqlite backend");
    }
    let store = SqliteChitApi::open(&config.db_path)?;

    let start_date = NaiveDate::from_ymd_opt(2025, 1, 10).context("invalid demo start date")?;
    let scheme = store
        .create_scheme(&NewScheme {
            name: "Demo Auction Chit".to_string(),
            scheme_type: SchemeType::Auction,
            total_value: 100_000,
            duration_months: months,
            start_date,
            member_count: months,
            commission_percent: Some(1.0),
            premium_percent: None,
        })
        .await?;

    let names = ["Asha Nair", "Ravi Kumar", "Meena Iyer", "Suresh Pillai"];
    let mut members = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        members.push(store.create_member(name, &format!("90000000{:02}", i + 1)).await?);
    }

    let mut session = LedgerSession::new(Arc::new(store), scheme.id, config.page_size);
    session.load().await?;
    session.enter_column_edit(FieldGroup::Member)?;
    for (month, member) in (1..=months).zip(&members) {
        session.set_value(FieldGroup::Member, month, member.id.to_string())?;
    }
    let report = session.save().await?;
    if let Some(error) = report.error_message() {
        bail!(error);
    }

    info!(scheme_id = scheme.id, assigned = report.applied, "demo scheme seeded");
    println!(
        "Created chit {} ({} months) at {}",
        scheme.id, months, config.db_path
    );
    Ok(())
}

fn print_ledger(session: &LedgerSession) {
    if let Some(scheme) = session.scheme() {
        println!(
            "{} | {} | value {} | {} months | {} members",
            scheme.name,
            scheme.scheme_type,
            scheme.total_value,
            scheme.duration_months,
            scheme.member_count
        );
    }
    print_rows(&session.page_rows());
    println!(
        "page {}/{} | filter {:?}",
        session.page(),
        session.total_pages(),
        session.filter()
    );
    if let Some(error) = session.error() {
        println!("error: {}", error);
    }
}

fn print_rows(rows: &[&MonthRow]) {
    let amount = |v: Option<i64>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
    println!(
        "{:>5}  {:<8}  {:<20}  {:>10}  {:>10}  {:>10}  {:>10}  {:>10}  {:<10}",
        "month", "label", "member", "payout", "bid", "net due", "expected", "collected", "status"
    );
    for row in rows {
        println!(
            "{:>5}  {:<8}  {:<20}  {:>10}  {:>10}  {:>10}  {:>10}  {:>10}  {:<10}",
            row.month_index,
            row.label,
            row.member_name().unwrap_or("-"),
            amount(row.planned_payout()),
            amount(row.bid_amount),
            amount(row.auction.map(|a| a.net_payable)),
            row.expected_amount,
            row.collected_amount,
            format!("{:?}", row.status())
        );
    }
}

fn print_breakdown(breakdown: &MonthBreakdown, search: &str) {
    let counts = breakdown.counts();
    println!(
        "Month {} ({}): collected {} of {} ({:.2}%)",
        breakdown.month_index,
        breakdown.label,
        breakdown.total_collected,
        breakdown.total_expected,
        breakdown.collection_percentage
    );
    println!(
        "paid {}  partial {}  unpaid {}",
        counts.paid, counts.partial, counts.unpaid
    );
    println!(
        "{:>6}  {:<20}  {:<12}  {:>10}  {:>10}  {:>10}  {:<8}",
        "member", "name", "phone", "expected", "paid", "due", "status"
    );
    for m in breakdown.search(search) {
        println!(
            "{:>6}  {:<20}  {:<12}  {:>10}  {:>10}  {:>10}  {:<8}",
            m.member_id,
            m.member_name,
            m.phone,
            m.expected_amount,
            m.amount_paid,
            m.amount_due(),
            format!("{:?}", m.status)
        );
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chit_ledger=info,chitledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate root.
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
