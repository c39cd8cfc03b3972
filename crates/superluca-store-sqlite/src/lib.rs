#![allow(clippy::missing_errors_doc)]

use std::collections::BTreeSet;
use std::time::Duration;

use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior,
};
use superluca_bootstrap_core::{
    drifted_fields, format_rfc3339, now_utc, parse_timestamp, quote_ident, AdminConfig,
    AdminField, BootstrapError, CanonicalAdmin, PrivilegedRecord, SecretDigest, StoreLocation,
    TableSchema, USER_TABLE,
};
use tracing::{debug, info, warn};

mod bootstrap;

pub use bootstrap::{BootstrapOrchestrator, BootstrapPlan, BootstrapReport};

pub type BootstrapResult<T> = Result<T, BootstrapError>;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Explicitly owned handle to the embedded store. Opened once by the process
/// entry point and dropped on shutdown.
pub struct SqliteStore {
    conn: Connection,
    location: StoreLocation,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct SchemaReport {
    pub table: String,
    pub created_table: bool,
    pub added_columns: Vec<String>,
    pub created_indexes: Vec<String>,
    pub columns: BTreeSet<String>,
}

impl SchemaReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.created_table && self.added_columns.is_empty() && self.created_indexes.is_empty()
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminOutcome {
    Created { id: i64 },
    Updated { id: i64, fields: Vec<AdminField> },
    Unchanged { id: i64 },
}

impl AdminOutcome {
    #[must_use]
    pub fn id(&self) -> i64 {
        match self {
            Self::Created { id } | Self::Updated { id, .. } | Self::Unchanged { id } => *id,
        }
    }

    #[must_use]
    pub fn wrote(&self) -> bool {
        !matches!(self, Self::Unchanged { .. })
    }
}

impl SqliteStore {
    pub fn open(location: &StoreLocation, timeout: Duration) -> BootstrapResult<Self> {
        let conn = match location {
            StoreLocation::SqliteFile(path) => Connection::open(path).map_err(|err| {
                read_error(&format!("failed to open sqlite database at {}", path.display()), &err)
            })?,
            StoreLocation::SqliteMemory => Connection::open_in_memory()
                .map_err(|err| read_error("failed to open in-memory sqlite database", &err))?,
            StoreLocation::External { backend } => {
                return Err(BootstrapError::Configuration(format!(
                    "backend {backend} is not managed here; apply its schema with external migration tooling"
                )));
            }
        };

        conn.busy_timeout(timeout)
            .map_err(|err| read_error("failed to configure sqlite busy timeout", &err))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|err| read_error("failed to configure sqlite pragmas", &err))?;
        if matches!(location, StoreLocation::SqliteFile(_)) {
            conn.execute_batch("PRAGMA journal_mode = WAL;")
                .map_err(|err| read_error("failed to enable sqlite WAL journal", &err))?;
        }

        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        debug!(store = %location, timeout_ms, "opened store");
        Ok(Self {
            conn,
            location: location.clone(),
        })
    }

    #[must_use]
    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn inspect(&self, table: &str) -> BootstrapResult<BTreeSet<String>> {
        inspect_columns(&self.conn, table)
    }

    /// Creates the table when absent and adds whatever expected columns and
    /// indexes a pre-existing table lacks, all inside one immediate
    /// transaction. Never drops or renames anything.
    pub fn ensure_schema(&mut self, schema: &TableSchema) -> BootstrapResult<SchemaReport> {
        schema.validate()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| read_error("failed to begin schema transaction", &err))?;

        let existed = table_exists(&tx, &schema.name)?;
        tx.execute_batch(&schema.create_table_sql())
            .map_err(|err| ddl_error(&schema.name, "*", &err))?;
        if !existed {
            info!(table = %schema.name, columns = schema.columns.len(), "created table");
        }

        let live = inspect_columns(&tx, &schema.name)?;
        let added_columns = reconcile_columns(&tx, schema, &live)?;

        let mut created_indexes = Vec::new();
        for index in &schema.indexes {
            if index_exists(&tx, &index.name)? {
                continue;
            }
            tx.execute_batch(&index.create_sql(&schema.name))
                .map_err(|err| ddl_error(&schema.name, &index.columns.join(","), &err))?;
            info!(table = %schema.name, index = %index.name, "created index");
            created_indexes.push(index.name.clone());
        }

        let columns = inspect_columns(&tx, &schema.name)?;
        tx.commit()
            .map_err(|err| read_error("failed to commit schema transaction", &err))?;

        let report = SchemaReport {
            table: schema.name.clone(),
            created_table: !existed,
            added_columns,
            created_indexes,
            columns,
        };
        if report.is_noop() {
            debug!(table = %schema.name, "schema already current");
        }
        Ok(report)
    }

    pub fn find_admin(&self, username: &str) -> BootstrapResult<Option<PrivilegedRecord>> {
        find_admin(&self.conn, username)
    }

    /// Creates the admin record when missing, otherwise rewrites only the
    /// fields that drifted from configuration. A converged store sees no
    /// write at all.
    pub fn reconcile_admin(&mut self, config: &AdminConfig) -> BootstrapResult<AdminOutcome> {
        if config.uses_default_password() {
            warn!(
                username = %config.username,
                "admin password is the built-in default; override ADMIN_PASSWORD outside local development"
            );
        }

        let canonical = config.canonical();
        let mut tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| read_error("failed to begin admin transaction", &err))?;

        let outcome = match find_admin(&tx, &canonical.username)? {
            Some(record) => converge_admin(&tx, &record, &canonical)?,
            None => create_or_converge(&mut tx, &canonical)?,
        };

        tx.commit()
            .map_err(|err| read_error("failed to commit admin transaction", &err))?;
        Ok(outcome)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Column names currently present on `table`. A missing table yields an
/// empty set rather than an error.
pub fn inspect_columns(conn: &Connection, table: &str) -> BootstrapResult<BTreeSet<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .map_err(|err| read_error(&format!("failed to inspect table_info for {table}"), &err))?;
    let rows = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))
        .map_err(|err| read_error(&format!("failed to inspect table_info for {table}"), &err))?;

    let mut columns = BTreeSet::new();
    for row in rows {
        columns.insert(
            row.map_err(|err| read_error(&format!("failed to read table_info for {table}"), &err))?,
        );
    }
    Ok(columns)
}

/// Adds every column of `schema` missing from `live`. Columns present only
/// in `live` are left alone. Fails before issuing any ALTER if a missing
/// column cannot be added without invalidating existing rows.
pub fn reconcile_columns(
    conn: &Connection,
    schema: &TableSchema,
    live: &BTreeSet<String>,
) -> BootstrapResult<Vec<String>> {
    let missing = schema.missing_columns(live);

    if let Some(unsafe_column) = missing.iter().find(|column| !column.is_additive_safe()) {
        return Err(BootstrapError::schema_conflict(
            &schema.name,
            &unsafe_column.name,
            "column is missing and cannot be added without a default; operator migration required",
        ));
    }

    let mut added = Vec::with_capacity(missing.len());
    for column in missing {
        conn.execute_batch(&schema.add_column_sql(column))
            .map_err(|err| ddl_error(&schema.name, &column.name, &err))?;
        info!(table = %schema.name, column = %column.name, "added missing column");
        added.push(column.name.clone());
    }
    Ok(added)
}

pub fn find_admin(conn: &Connection, username: &str) -> BootstrapResult<Option<PrivilegedRecord>> {
    let sql = format!(
        "SELECT id, username, email, password_hash, recovery_key_hash, role, is_active, created_at, deleted_at
         FROM {}
         WHERE username = ?1",
        quote_ident(USER_TABLE)
    );
    let raw = conn
        .query_row(&sql, params![username], |row| {
            Ok(RawAdminRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password_hash: row.get(3)?,
                recovery_key_hash: row.get(4)?,
                role: row.get(5)?,
                is_active: row.get(6)?,
                created_at: row.get(7)?,
                deleted_at: row.get(8)?,
            })
        })
        .optional()
        .map_err(|err| read_error(&format!("failed to look up admin {username}"), &err))?;

    raw.map(RawAdminRow::into_record).transpose()
}

struct RawAdminRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    recovery_key_hash: Option<String>,
    role: String,
    is_active: bool,
    created_at: String,
    deleted_at: Option<String>,
}

impl RawAdminRow {
    fn into_record(self) -> BootstrapResult<PrivilegedRecord> {
        Ok(PrivilegedRecord {
            id: self.id,
            created_at: parse_timestamp(&self.created_at)?,
            deleted_at: self.deleted_at.as_deref().map(parse_timestamp).transpose()?,
            username: self.username,
            email: self.email,
            password_hash: SecretDigest::from_stored(self.password_hash),
            recovery_key_hash: self.recovery_key_hash.map(SecretDigest::from_stored),
            role: self.role,
            is_active: self.is_active,
        })
    }
}

/// Inserts under a savepoint so a uniqueness violation leaves the enclosing
/// transaction usable for one re-read and update.
fn create_or_converge(
    tx: &mut Transaction<'_>,
    canonical: &CanonicalAdmin,
) -> BootstrapResult<AdminOutcome> {
    let inserted = {
        let savepoint = tx
            .savepoint()
            .map_err(|err| read_error("failed to open admin insert savepoint", &err))?;
        match insert_admin(&savepoint, canonical) {
            Ok(id) => {
                savepoint
                    .commit()
                    .map_err(|err| read_error("failed to release admin insert savepoint", &err))?;
                Ok(id)
            }
            // Dropping the savepoint rolls the failed insert back.
            Err(err) => Err(err),
        }
    };

    match inserted {
        Ok(id) => {
            info!(username = %canonical.username, id, "created admin record");
            Ok(AdminOutcome::Created { id })
        }
        Err(err) if is_unique_violation(&err) => {
            warn!(
                username = %canonical.username,
                "admin record appeared concurrently; reconciling as an update"
            );
            match find_admin(tx, &canonical.username)? {
                Some(record) => converge_admin(tx, &record, canonical),
                None => Err(BootstrapError::RecordConflict {
                    identifier: canonical.username.clone(),
                    message: err.to_string(),
                }),
            }
        }
        Err(err) => Err(write_error(&canonical.username, &err)),
    }
}

fn insert_admin(conn: &Connection, canonical: &CanonicalAdmin) -> rusqlite::Result<i64> {
    let created_at = format_rfc3339(now_utc())
        .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
    conn.execute(
        &format!(
            "INSERT INTO {}(username, email, password_hash, recovery_key_hash, role, is_active, created_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
            quote_ident(USER_TABLE)
        ),
        params![
            canonical.username,
            canonical.email,
            canonical.password_hash.as_str(),
            canonical.recovery_key_hash.as_ref().map(SecretDigest::as_str),
            canonical.role,
            true,
            created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn converge_admin(
    conn: &Connection,
    record: &PrivilegedRecord,
    canonical: &CanonicalAdmin,
) -> BootstrapResult<AdminOutcome> {
    if record.is_soft_deleted() {
        warn!(
            username = %record.username,
            "admin record is soft-deleted; bootstrap leaves deleted_at untouched"
        );
    }

    let fields = drifted_fields(record, canonical);
    if fields.is_empty() {
        debug!(username = %record.username, "admin record already converged");
        return Ok(AdminOutcome::Unchanged { id: record.id });
    }

    let recovery = canonical.recovery_key_hash.as_ref().map(SecretDigest::as_str);
    let mut assignments = Vec::with_capacity(fields.len());
    let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(fields.len() + 1);
    for (position, field) in fields.iter().enumerate() {
        assignments.push(format!("{} = ?{}", quote_ident(field.column()), position + 1));
        match field {
            AdminField::Email => values.push(&canonical.email),
            AdminField::Role => values.push(&canonical.role),
            AdminField::RecoveryKeyHash => values.push(&recovery),
        }
    }
    values.push(&record.id);

    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{}",
        quote_ident(USER_TABLE),
        assignments.join(", "),
        values.len()
    );
    let updated = conn
        .execute(&sql, values.as_slice())
        .map_err(|err| write_error(&record.username, &err))?;
    if updated != 1 {
        return Err(BootstrapError::RecordConflict {
            identifier: record.username.clone(),
            message: format!("expected to update one row, updated {updated}"),
        });
    }

    info!(username = %record.username, fields = ?fields, "updated drifted admin fields");
    Ok(AdminOutcome::Updated {
        id: record.id,
        fields,
    })
}

fn table_exists(conn: &Connection, table_name: &str) -> BootstrapResult<bool> {
    sqlite_master_has(conn, "table", table_name)
}

fn index_exists(conn: &Connection, index_name: &str) -> BootstrapResult<bool> {
    sqlite_master_has(conn, "index", index_name)
}

fn sqlite_master_has(conn: &Connection, kind: &str, name: &str) -> BootstrapResult<bool> {
    let exists = conn
        .query_row(
            "SELECT 1
             FROM sqlite_master
             WHERE type = ?1 AND name = ?2
             LIMIT 1",
            params![kind, name],
            |_| Ok(()),
        )
        .optional()
        .map_err(|err| read_error("failed to query sqlite_master", &err))?
        .is_some();

    Ok(exists)
}

fn is_unavailable(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => matches!(
            failure.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::PermissionDenied
                | ErrorCode::AuthorizationForStatementDenied
                | ErrorCode::ReadOnly
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::FileLockingProtocolFailed
                | ErrorCode::OutOfMemory
        ),
        _ => false,
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.code == ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

fn read_error(context: &str, err: &rusqlite::Error) -> BootstrapError {
    if is_unavailable(err) {
        BootstrapError::StoreUnavailable(format!("{context}: {err}"))
    } else {
        BootstrapError::Validation(format!("{context}: {err}"))
    }
}

fn ddl_error(table: &str, column: &str, err: &rusqlite::Error) -> BootstrapError {
    if is_unavailable(err) {
        BootstrapError::StoreUnavailable(format!("schema change on {table} failed: {err}"))
    } else {
        BootstrapError::schema_conflict(table, column, err.to_string())
    }
}

fn write_error(identifier: &str, err: &rusqlite::Error) -> BootstrapError {
    if is_unavailable(err) {
        BootstrapError::StoreUnavailable(format!("write for admin {identifier} failed: {err}"))
    } else {
        BootstrapError::RecordConflict {
            identifier: identifier.to_string(),
            message: err.to_string(),
        }
    }
}
