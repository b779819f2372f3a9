//! Local SQLite backend.
//!
//! Mirrors the REST backend's rules: one assignment per (scheme, month), one
//! payout row per month created with the scheme, and an auction bid that
//! sets the month's planned payout to `scheme value - bid`.

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::ChitApi;
use crate::ledger::month_date;
use crate::models::{
    parse_date_prefix, Assignment, AssignmentId, Contribution, ContributionId, ContributionPatch,
    Member, MemberId, NewAssignment, NewScheme, Payout, PayoutId, PayoutPatch, Scheme, SchemeId,
    SchemeType,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schemes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    scheme_type TEXT NOT NULL,
    total_value INTEGER NOT NULL,
    duration_months INTEGER NOT NULL CHECK (duration_months >= 1),
    start_date TEXT NOT NULL,
    member_count INTEGER NOT NULL,
    commission_percent REAL,
    premium_percent REAL
);
CREATE TABLE IF NOT EXISTS members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    full_name TEXT NOT NULL,
    phone TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS assignments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scheme_id INTEGER NOT NULL REFERENCES schemes(id),
    member_id INTEGER NOT NULL REFERENCES members(id),
    month INTEGER NOT NULL,
    month_date TEXT NOT NULL,
    UNIQUE (scheme_id, month)
);
CREATE TABLE IF NOT EXISTS payouts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scheme_id INTEGER NOT NULL REFERENCES schemes(id),
    month INTEGER NOT NULL,
    planned_amount INTEGER,
    paid_amount INTEGER NOT NULL DEFAULT 0,
    bid_amount INTEGER,
    paid_date TEXT,
    method TEXT,
    notes TEXT,
    UNIQUE (scheme_id, month)
);
CREATE TABLE IF NOT EXISTS contributions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scheme_id INTEGER NOT NULL REFERENCES schemes(id),
    month INTEGER NOT NULL,
    assignment_id INTEGER,
    member_id INTEGER REFERENCES members(id),
    expected_amount INTEGER,
    collected_amount INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_contributions_scheme_month ON contributions(scheme_id, month);
";

const SCHEME_COLUMNS: &str = "id, name, scheme_type, total_value, duration_months, start_date, \
     member_count, commission_percent, premium_percent";

const ASSIGNMENT_SELECT: &str = "
SELECT a.id, a.scheme_id, a.member_id, a.month, m.full_name, m.phone,
       (SELECT c.expected_amount FROM contributions c
         WHERE c.scheme_id = a.scheme_id AND c.month = a.month
         ORDER BY c.id LIMIT 1)
FROM assignments a
JOIN members m ON m.id = a.member_id";

const PAYOUT_COLUMNS: &str =
    "id, scheme_id, month, planned_amount, paid_amount, bid_amount, paid_date, method, notes";

const CONTRIBUTION_COLUMNS: &str =
    "id, scheme_id, month, assignment_id, member_id, expected_amount, collected_amount";

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn read_scheme(row: &Row<'_>) -> rusqlite::Result<Scheme> {
    let kind: String = row.get(2)?;
    let start: String = row.get(5)?;
    Ok(Scheme {
        id: row.get(0)?,
        name: row.get(1)?,
        scheme_type: SchemeType::parse(&kind)
            .ok_or_else(|| conversion_error(2, format!("unknown scheme type {kind}")))?,
        total_value: row.get(3)?,
        duration_months: row.get(4)?,
        start_date: parse_date_prefix(&start)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        member_count: row.get(6)?,
        commission_percent: row.get(7)?,
        premium_percent: row.get(8)?,
    })
}

fn read_member(row: &Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        id: row.get(0)?,
        full_name: row.get(1)?,
        phone: row.get(2)?,
    })
}

fn read_assignment(row: &Row<'_>) -> rusqlite::Result<Assignment> {
    let member_id: MemberId = row.get(2)?;
    Ok(Assignment {
        id: row.get(0)?,
        scheme_id: row.get(1)?,
        member_id,
        month_index: row.get(3)?,
        member: Some(Member {
            id: member_id,
            full_name: row.get(4)?,
            phone: row.get(5)?,
        }),
        expected_contribution: row.get(6)?,
    })
}

fn read_payout(row: &Row<'_>) -> rusqlite::Result<Payout> {
    let paid_date: Option<String> = row.get(6)?;
    let paid_date = match paid_date {
        Some(raw) => Some(
            parse_date_prefix(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
        ),
        None => None,
    };
    Ok(Payout {
        id: row.get(0)?,
        scheme_id: row.get(1)?,
        month_index: row.get(2)?,
        planned_amount: row.get(3)?,
        paid_amount: row.get(4)?,
        bid_amount: row.get(5)?,
        paid_date,
        method: row.get(7)?,
        notes: row.get(8)?,
    })
}

fn read_contribution(row: &Row<'_>) -> rusqlite::Result<Contribution> {
    Ok(Contribution {
        id: row.get(0)?,
        scheme_id: row.get(1)?,
        month_index: row.get(2)?,
        assignment_id: row.get(3)?,
        member_id: row.get(4)?,
        expected_amount: row.get(5)?,
        collected_amount: row.get(6)?,
    })
}

fn scheme_by_id(conn: &Connection, id: SchemeId) -> Result<Option<Scheme>> {
    let sql = format!("SELECT {SCHEME_COLUMNS} FROM schemes WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], read_scheme).optional()?)
}

fn assignment_by_id(conn: &Connection, id: AssignmentId) -> Result<Option<Assignment>> {
    let sql = format!("{ASSIGNMENT_SELECT} WHERE a.id = ?1");
    Ok(conn.query_row(&sql, params![id], read_assignment).optional()?)
}

fn payout_by_id(conn: &Connection, id: PayoutId) -> Result<Option<Payout>> {
    let sql = format!("SELECT {PAYOUT_COLUMNS} FROM payouts WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], read_payout).optional()?)
}

fn contribution_by_id(conn: &Connection, id: ContributionId) -> Result<Option<Contribution>> {
    let sql = format!("SELECT {CONTRIBUTION_COLUMNS} FROM contributions WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], read_contribution).optional()?)
}

#[derive(Clone)]
pub struct SqliteChitApi {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteChitApi {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open chit db at {}", db_path))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        conn.execute_batch(SCHEMA).context("create chit tables")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a scheme with its per-month payout and contribution rows.
    pub async fn create_scheme(&self, new: &NewScheme) -> Result<Scheme> {
        if new.duration_months == 0 {
            bail!("Duration must be at least one month");
        }
        let installment = new.installment();

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO schemes (name, scheme_type, total_value, duration_months, start_date,
                                  member_count, commission_percent, premium_percent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.name,
                new.scheme_type.as_str(),
                new.total_value,
                new.duration_months,
                new.start_date.format("%Y-%m-%d").to_string(),
                new.member_count,
                new.commission_percent,
                new.premium_percent,
            ],
        )
        .context("insert scheme")?;
        let scheme_id = tx.last_insert_rowid();

        for month in 1..=new.duration_months {
            tx.execute(
                "INSERT INTO payouts (scheme_id, month) VALUES (?1, ?2)",
                params![scheme_id, month],
            )?;
            tx.execute(
                "INSERT INTO contributions (scheme_id, month, expected_amount) VALUES (?1, ?2, ?3)",
                params![scheme_id, month, installment],
            )?;
        }
        tx.commit()?;

        info!(
            scheme_id,
            months = new.duration_months,
            kind = %new.scheme_type,
            "scheme created"
        );
        scheme_by_id(&conn, scheme_id)?.ok_or_else(|| anyhow!("Scheme {} vanished", scheme_id))
    }

    pub async fn list_schemes(&self) -> Result<Vec<Scheme>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {SCHEME_COLUMNS} FROM schemes ORDER BY id");
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], read_scheme)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn create_member(&self, full_name: &str, phone: &str) -> Result<Member> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO members (full_name, phone) VALUES (?1, ?2)",
            params![full_name.trim(), phone.trim()],
        )
        .context("insert member")?;
        Ok(Member {
            id: conn.last_insert_rowid(),
            full_name: full_name.trim().to_string(),
            phone: phone.trim().to_string(),
        })
    }

    /// Record an extra collection against a month (a second installment
    /// payment, for example), optionally logged against the paying member.
    /// The ledger sums every record of a month.
    pub async fn record_collection(
        &self,
        scheme_id: SchemeId,
        month_index: u32,
        member_id: Option<MemberId>,
        amount: i64,
    ) -> Result<Contribution> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO contributions (scheme_id, month, member_id, collected_amount)
             VALUES (?1, ?2, ?3, ?4)",
            params![scheme_id, month_index, member_id, amount],
        )
        .context("insert collection")?;
        let id = conn.last_insert_rowid();
        contribution_by_id(&conn, id)?.ok_or_else(|| anyhow!("Collection {} vanished", id))
    }
}

#[async_trait::async_trait]
impl ChitApi for SqliteChitApi {
    async fn get_scheme(&self, scheme_id: SchemeId) -> Result<Scheme> {
        let conn = self.conn.lock().await;
        scheme_by_id(&conn, scheme_id)?.ok_or_else(|| anyhow!("Chit not found"))
    }

    async fn list_members(&self) -> Result<Vec<Member>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare_cached("SELECT id, full_name, phone FROM members ORDER BY full_name, id")?;
        let rows = stmt.query_map([], read_member)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn list_assignments(&self, scheme_id: SchemeId) -> Result<Vec<Assignment>> {
        let conn = self.conn.lock().await;
        let sql = format!("{ASSIGNMENT_SELECT} WHERE a.scheme_id = ?1 ORDER BY a.month");
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![scheme_id], read_assignment)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn create_assignment(&self, new: &NewAssignment) -> Result<Assignment> {
        let conn = self.conn.lock().await;
        let scheme = scheme_by_id(&conn, new.scheme_id)?.ok_or_else(|| anyhow!("Chit not found"))?;
        if new.month_index == 0 || new.month_index > scheme.duration_months {
            bail!(
                "Month {} is outside the {}-month chit",
                new.month_index,
                scheme.duration_months
            );
        }

        let member_known: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM members WHERE id = ?1)",
                params![new.member_id],
                |r| r.get(0),
            )
            .context("look up member")?;
        if !member_known {
            bail!("Member not found");
        }

        let occupied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM assignments WHERE scheme_id = ?1 AND month = ?2)",
            params![new.scheme_id, new.month_index],
            |r| r.get(0),
        )?;
        if occupied {
            bail!("Month {} is already assigned", new.month_index);
        }

        // Store the scheme's own calendar date for the month regardless of
        // what the caller derived.
        let date = month_date(scheme.start_date, new.month_index);
        conn.execute(
            "INSERT INTO assignments (scheme_id, member_id, month, month_date) VALUES (?1, ?2, ?3, ?4)",
            params![
                new.scheme_id,
                new.member_id,
                new.month_index,
                date.format("%Y-%m-%d").to_string()
            ],
        )
        .context("insert assignment")?;
        let id = conn.last_insert_rowid();
        debug!(
            assignment_id = id,
            scheme_id = new.scheme_id,
            month = new.month_index,
            "assignment created"
        );

        assignment_by_id(&conn, id)?.ok_or_else(|| anyhow!("Assignment {} vanished", id))
    }

    async fn delete_assignment(&self, id: AssignmentId) -> Result<()> {
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute("DELETE FROM assignments WHERE id = ?1", params![id])
            .context("delete assignment")?;
        if deleted == 0 {
            bail!("Assignment not found");
        }
        debug!(assignment_id = id, "assignment deleted");
        Ok(())
    }

    async fn list_payouts(&self, scheme_id: SchemeId) -> Result<Vec<Payout>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {PAYOUT_COLUMNS} FROM payouts WHERE scheme_id = ?1 ORDER BY month");
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![scheme_id], read_payout)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn update_payout(&self, id: PayoutId, patch: &PayoutPatch) -> Result<Payout> {
        let conn = self.conn.lock().await;
        let current = payout_by_id(&conn, id)?.ok_or_else(|| anyhow!("Payout not found"))?;
        let scheme = scheme_by_id(&conn, current.scheme_id)?
            .ok_or_else(|| anyhow!("Chit not found"))?;

        let mut planned = current.planned_amount;
        let mut bid = current.bid_amount;
        if let Some(value) = patch.planned_amount {
            planned = value;
        }
        if let Some(value) = patch.bid_amount {
            bid = value;
            if let (true, Some(b)) = (scheme.is_auction(), value) {
                let payout = scheme.total_value - b;
                if payout < 0 {
                    bail!("Bid amount cannot be greater than Chit value.");
                }
                planned = Some(payout);
            }
        }

        conn.execute(
            "UPDATE payouts SET planned_amount = ?1, bid_amount = ?2 WHERE id = ?3",
            params![planned, bid, id],
        )
        .context("update payout")?;

        payout_by_id(&conn, id)?.ok_or_else(|| anyhow!("Payout {} vanished", id))
    }

    async fn list_contributions(&self, scheme_id: SchemeId) -> Result<Vec<Contribution>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {CONTRIBUTION_COLUMNS} FROM contributions WHERE scheme_id = ?1 ORDER BY month, id"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![scheme_id], read_contribution)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn update_contribution(
        &self,
        id: ContributionId,
        patch: &ContributionPatch,
    ) -> Result<Contribution> {
        let conn = self.conn.lock().await;
        if let Some(amount) = patch.collected_amount {
            if amount < 0 {
                bail!("Collected amount cannot be negative");
            }
            let updated = conn
                .execute(
                    "UPDATE contributions SET collected_amount = ?1 WHERE id = ?2",
                    params![amount, id],
                )
                .context("update collection")?;
            if updated == 0 {
                bail!("Collection not found");
            }
        }
        contribution_by_id(&conn, id)?.ok_or_else(|| anyhow!("Collection not found"))
    }
}
