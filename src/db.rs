use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::WorkflowError;
use crate::models::{
    ApprovalRecord, Attachment, Decision, ItemStatus, Reimbursement, ReimbursementItem,
    ReimbursementStatus, Role, Stage,
};

// ============================================================================
// CONNECTION POOL
// ============================================================================

/// Shared handle to the store. A checkout holds the connection for one
/// request; dropping the guard hands it back.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

pub type PooledConnection<'a> = MutexGuard<'a, Connection>;

impl Database {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;
        setup_database(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        setup_database(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn checkout(&self) -> std::result::Result<PooledConnection<'_>, WorkflowError> {
        self.conn.lock().map_err(|e| {
            tracing::error!(error = %e, "connection pool poisoned");
            WorkflowError::Unavailable("connection pool poisoned".to_string())
        })
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL keeps readers off the writer's lock
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Reference data (maintained elsewhere, read-only here)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cost_centers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            role TEXT NOT NULL,
            manager_id INTEGER REFERENCES users(id),
            department_id INTEGER REFERENCES departments(id)
        )",
        [],
    )?;

    // ==========================================================================
    // Workflow tables
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS reimbursements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            employee_id INTEGER NOT NULL REFERENCES users(id),
            status TEXT NOT NULL DEFAULT 'pending',
            total_amount REAL NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reimbursement_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reimbursement_id INTEGER NOT NULL REFERENCES reimbursements(id),
            category TEXT NOT NULL,
            description TEXT NOT NULL,
            amount REAL NOT NULL,
            paid_amount REAL,
            tds_amount REAL,
            final_amount REAL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN (
                'pending', 'approved_by_manager', 'rejected_by_manager',
                'approved_by_hr', 'rejected_by_hr',
                'approved_by_finance', 'rejected_by_finance', 'paid'
            )),
            project_id INTEGER REFERENCES projects(id),
            cost_center_id INTEGER REFERENCES cost_centers(id),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // Append-only audit trail
    conn.execute(
        "CREATE TABLE IF NOT EXISTS approval_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            item_id INTEGER NOT NULL REFERENCES reimbursement_items(id),
            approver_id INTEGER NOT NULL REFERENCES users(id),
            approval_level TEXT NOT NULL CHECK (approval_level IN ('manager', 'hr', 'finance')),
            action TEXT NOT NULL CHECK (action IN ('approved', 'rejected')),
            comments TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attachments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id INTEGER NOT NULL REFERENCES reimbursement_items(id),
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            uploaded_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_reimbursement ON reimbursement_items(reimbursement_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_status ON reimbursement_items(status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_item ON approval_history(item_id, approval_level)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attachments_item ON attachments(item_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_manager ON users(manager_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// COLUMN CONVERSIONS
// ============================================================================

macro_rules! text_column {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse::<$ty>()
                    .map_err(|e: WorkflowError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_column!(ItemStatus);
text_column!(ReimbursementStatus);
text_column!(Stage);
text_column!(Decision);
text_column!(Role);

// Fixed precision keeps TEXT ordering chronological.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

// ============================================================================
// REFERENCE DATA SEEDING (used by the CLI demo and tests)
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub manager_id: Option<i64>,
    pub department_id: Option<i64>,
}

impl NewUser {
    pub fn new(name: &str, role: Role, manager_id: Option<i64>) -> Self {
        NewUser {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            role,
            manager_id,
            department_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub category: String,
    pub description: String,
    pub amount: f64,
    pub project_id: Option<i64>,
    pub cost_center_id: Option<i64>,
}

impl NewItem {
    pub fn new(category: &str, description: &str, amount: f64) -> Self {
        NewItem {
            category: category.to_string(),
            description: description.to_string(),
            amount,
            project_id: None,
            cost_center_id: None,
        }
    }
}

pub fn insert_department(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute("INSERT INTO departments (name) VALUES (?1)", params![name])?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_user(conn: &Connection, user: &NewUser) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (name, email, role, manager_id, department_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user.name,
            user.email,
            user.role,
            user.manager_id,
            user.department_id
        ],
    )
    .with_context(|| format!("Failed to insert user {}", user.email))?;
    Ok(conn.last_insert_rowid())
}

/// Insert a reimbursement with its items. Returns the reimbursement id and
/// the item ids in input order.
pub fn insert_reimbursement(
    conn: &Connection,
    employee_id: i64,
    items: &[NewItem],
) -> Result<(i64, Vec<i64>)> {
    let created_at = now_timestamp();
    let total: f64 = items.iter().map(|item| item.amount).sum();

    conn.execute(
        "INSERT INTO reimbursements (employee_id, status, total_amount, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![employee_id, ReimbursementStatus::Pending, total, created_at],
    )
    .context("Failed to insert reimbursement")?;
    let reimbursement_id = conn.last_insert_rowid();

    let mut item_ids = Vec::with_capacity(items.len());
    for item in items {
        conn.execute(
            "INSERT INTO reimbursement_items (
                reimbursement_id, category, description, amount, status,
                project_id, cost_center_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                reimbursement_id,
                item.category,
                item.description,
                item.amount,
                ItemStatus::Pending,
                item.project_id,
                item.cost_center_id,
                created_at,
            ],
        )
        .context("Failed to insert reimbursement item")?;
        item_ids.push(conn.last_insert_rowid());
    }

    Ok((reimbursement_id, item_ids))
}

pub fn insert_attachment(
    conn: &Connection,
    item_id: i64,
    file_name: &str,
    file_path: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO attachments (item_id, file_name, file_path, uploaded_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![item_id, file_name, file_path, now_timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

// ============================================================================
// WORKFLOW READS AND WRITES
// ============================================================================

const ITEM_COLUMNS: &str = "id, reimbursement_id, category, description, amount,
    paid_amount, tds_amount, final_amount, status, created_at";

pub(crate) fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ReimbursementItem> {
    Ok(ReimbursementItem {
        id: row.get(0)?,
        reimbursement_id: row.get(1)?,
        category: row.get(2)?,
        description: row.get(3)?,
        amount: row.get(4)?,
        paid_amount: row.get(5)?,
        tds_amount: row.get(6)?,
        final_amount: row.get(7)?,
        status: row.get(8)?,
        created_at: timestamp_column(row, 9)?,
    })
}

pub fn get_item(conn: &Connection, item_id: i64) -> rusqlite::Result<Option<ReimbursementItem>> {
    conn.query_row(
        &format!("SELECT {} FROM reimbursement_items WHERE id = ?1", ITEM_COLUMNS),
        params![item_id],
        item_from_row,
    )
    .optional()
}

pub fn get_items_for_reimbursement(
    conn: &Connection,
    reimbursement_id: i64,
) -> rusqlite::Result<Vec<ReimbursementItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM reimbursement_items WHERE reimbursement_id = ?1 ORDER BY id",
        ITEM_COLUMNS
    ))?;

    let items = stmt
        .query_map(params![reimbursement_id], item_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(items)
}

pub fn get_reimbursement(
    conn: &Connection,
    reimbursement_id: i64,
) -> rusqlite::Result<Option<Reimbursement>> {
    conn.query_row(
        "SELECT id, employee_id, status, total_amount, created_at
         FROM reimbursements WHERE id = ?1",
        params![reimbursement_id],
        |row| {
            Ok(Reimbursement {
                id: row.get(0)?,
                employee_id: row.get(1)?,
                status: row.get(2)?,
                total_amount: row.get(3)?,
                created_at: timestamp_column(row, 4)?,
            })
        },
    )
    .optional()
}

/// Statuses of every item under one reimbursement, read inside the caller's
/// transaction so the aggregate decision sees this transaction's writes.
pub fn sibling_statuses(
    conn: &Connection,
    reimbursement_id: i64,
) -> rusqlite::Result<Vec<ItemStatus>> {
    let mut stmt =
        conn.prepare("SELECT status FROM reimbursement_items WHERE reimbursement_id = ?1")?;

    let statuses = stmt
        .query_map(params![reimbursement_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(statuses)
}

pub fn update_item_status(
    conn: &Connection,
    item_id: i64,
    status: ItemStatus,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE reimbursement_items SET status = ?1 WHERE id = ?2",
        params![status, item_id],
    )
}

pub fn update_reimbursement_status(
    conn: &Connection,
    reimbursement_id: i64,
    status: ReimbursementStatus,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE reimbursements SET status = ?1 WHERE id = ?2",
        params![status, reimbursement_id],
    )
}

/// Append one audit row. Returns the generated event id.
pub fn insert_approval_record(
    conn: &Connection,
    item_id: i64,
    approver_id: i64,
    stage: Stage,
    decision: Decision,
    comments: Option<&str>,
) -> rusqlite::Result<String> {
    let event_id = uuid::Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO approval_history (
            event_id, item_id, approver_id, approval_level, action, comments, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event_id,
            item_id,
            approver_id,
            stage,
            decision,
            comments,
            now_timestamp(),
        ],
    )?;

    Ok(event_id)
}

/// Audit trail for one item, oldest first, optionally limited to one stage.
pub fn get_approval_history(
    conn: &Connection,
    item_id: i64,
    stage: Option<Stage>,
) -> rusqlite::Result<Vec<ApprovalRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_id, item_id, approver_id, approval_level, action, comments, created_at
         FROM approval_history
         WHERE item_id = ?1 AND (?2 IS NULL OR approval_level = ?2)
         ORDER BY created_at ASC, id ASC",
    )?;

    let records = stmt
        .query_map(params![item_id, stage], |row| {
            Ok(ApprovalRecord {
                id: row.get(0)?,
                event_id: row.get(1)?,
                item_id: row.get(2)?,
                approver_id: row.get(3)?,
                stage: row.get(4)?,
                decision: row.get(5)?,
                comments: row.get(6)?,
                created_at: timestamp_column(row, 7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(records)
}

pub fn get_attachments(conn: &Connection, item_id: i64) -> rusqlite::Result<Vec<Attachment>> {
    let mut stmt = conn.prepare(
        "SELECT id, item_id, file_name, file_path, uploaded_at
         FROM attachments
         WHERE item_id = ?1
         ORDER BY id",
    )?;

    let attachments = stmt
        .query_map(params![item_id], |row| {
            Ok(Attachment {
                id: row.get(0)?,
                item_id: row.get(1)?,
                file_name: row.get(2)?,
                file_path: row.get(3)?,
                uploaded_at: timestamp_column(row, 4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(attachments)
}

pub fn count_approval_records(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM approval_history", [], |row| row.get(0))
}
