//! Domain types for the SuperLuca startup bootstrap.
//!
//! This crate holds everything the bootstrap needs that does not touch a
//! store: the expected shape of the managed table, the privileged record and
//! the configuration it is reconciled against, secret digests, DSN parsing,
//! and the error taxonomy shared by every backend.

use std::collections::BTreeSet;
use std::fmt::{Debug, Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

pub const USER_TABLE: &str = "user";
pub const USERNAME_INDEX: &str = "ix_user_username";

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@example.com";
/// Fallback admin password for local bootstrapping only; production
/// deployments must override it.
pub const DEFAULT_ADMIN_PASSWORD: &str = "ChangeM3!";
pub const DEFAULT_ADMIN_ROLE: &str = "admin";

const REDACTED: &str = "***";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum BootstrapError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("schema conflict on {table}.{column}: {message}")]
    SchemaConflict {
        table: String,
        column: String,
        message: String,
    },
    #[error("record conflict for identifier {identifier}: {message}")]
    RecordConflict { identifier: String, message: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("validation error: {0}")]
    Validation(String),
}

impl BootstrapError {
    pub fn schema_conflict(
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SchemaConflict {
            table: table.into(),
            column: column.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code, used in logs and process exit reports.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::SchemaConflict { .. } => "schema_conflict",
            Self::RecordConflict { .. } => "record_conflict",
            Self::Configuration(_) => "configuration_error",
            Self::Validation(_) => "validation_error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Integer,
    Varchar,
    Boolean,
    DateTime,
}

impl SqlType {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Varchar => "VARCHAR",
            Self::Boolean => "BOOLEAN",
            Self::DateTime => "DATETIME",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Literal SQL default expression, e.g. `'admin'` or `1`.
    pub default: Option<String>,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn required(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: false,
            default: None,
            primary_key: false,
        }
    }

    pub fn optional(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            nullable: true,
            ..Self::required(name, sql_type)
        }
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn with_default(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    /// Whether `ALTER TABLE ... ADD COLUMN` with this definition keeps every
    /// existing row valid.
    #[must_use]
    pub fn is_additive_safe(&self) -> bool {
        !self.primary_key && (self.nullable || self.default.is_some())
    }

    #[must_use]
    pub fn definition_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.sql_type.as_sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    #[must_use]
    pub fn create_sql(&self, table: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|column| quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({columns})",
            if self.unique { "UNIQUE " } else { "" },
            quote_ident(&self.name),
            quote_ident(table),
        )
    }
}

/// Expected shape of one managed table. Columns are only ever appended
/// between releases.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// The `user` table as the current release expects it.
    #[must_use]
    pub fn user_table() -> Self {
        Self::new(
            USER_TABLE,
            vec![
                ColumnDef::required("id", SqlType::Integer).primary_key(),
                ColumnDef::required("username", SqlType::Varchar),
                ColumnDef::required("email", SqlType::Varchar),
                ColumnDef::required("password_hash", SqlType::Varchar),
                ColumnDef::optional("recovery_key_hash", SqlType::Varchar),
                // No database defaults: an ALTER would backfill every existing row.
                ColumnDef::required("role", SqlType::Varchar),
                ColumnDef::required("is_active", SqlType::Boolean),
                ColumnDef::required("created_at", SqlType::DateTime),
                ColumnDef::optional("deleted_at", SqlType::DateTime),
            ],
        )
        .with_index(IndexDef {
            name: USERNAME_INDEX.to_string(),
            columns: vec!["username".to_string()],
            unique: true,
        })
    }

    pub fn validate(&self) -> Result<(), BootstrapError> {
        if self.name.trim().is_empty() {
            return Err(BootstrapError::Validation("table name cannot be empty".to_string()));
        }
        if self.columns.is_empty() {
            return Err(BootstrapError::Validation(format!(
                "table {} must declare at least one column",
                self.name
            )));
        }

        let mut seen = BTreeSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(BootstrapError::Validation(format!(
                    "table {} declares a column with an empty name",
                    self.name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(BootstrapError::Validation(format!(
                    "table {} declares column {} twice",
                    self.name, column.name
                )));
            }
        }

        for index in &self.indexes {
            if let Some(unknown) = index.columns.iter().find(|c| !seen.contains(c.as_str())) {
                return Err(BootstrapError::Validation(format!(
                    "index {} references unknown column {}.{unknown}",
                    index.name, self.name
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn column_names(&self) -> BTreeSet<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    /// Expected columns absent from `live`, in declaration order.
    #[must_use]
    pub fn missing_columns<'a>(&'a self, live: &BTreeSet<String>) -> Vec<&'a ColumnDef> {
        self.columns.iter().filter(|column| !live.contains(&column.name)).collect()
    }

    #[must_use]
    pub fn create_table_sql(&self) -> String {
        let body = self
            .columns
            .iter()
            .map(ColumnDef::definition_sql)
            .collect::<Vec<_>>()
            .join(",\n  ");
        format!("CREATE TABLE IF NOT EXISTS {} (\n  {body}\n)", quote_ident(&self.name))
    }

    #[must_use]
    pub fn add_column_sql(&self, column: &ColumnDef) -> String {
        format!("ALTER TABLE {} ADD COLUMN {}", quote_ident(&self.name), column.definition_sql())
    }
}

#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Plaintext secret. Never printed: `Debug` and `Display` emit a redaction
/// marker so the value cannot reach a log line or error message.
#[derive(Clone, Eq, PartialEq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret({REDACTED})")
    }
}

impl Display for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(transparent)]
pub struct SecretDigest(String);

impl SecretDigest {
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SecretDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase hex SHA-256 of the UTF-8 secret.
#[must_use]
pub fn digest_secret(secret: &Secret) -> SecretDigest {
    let mut hasher = Sha256::new();
    hasher.update(secret.expose().as_bytes());
    SecretDigest(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AdminConfig {
    pub username: String,
    pub email: String,
    pub password: Secret,
    pub recovery_key: Option<Secret>,
    pub role: String,
}

impl AdminConfig {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: Secret,
        recovery_key: Option<Secret>,
        role: impl Into<String>,
    ) -> Result<Self, BootstrapError> {
        let config = Self {
            username: username.into(),
            email: email.into(),
            password,
            recovery_key: recovery_key.filter(|key| !key.is_empty()),
            role: role.into(),
        };

        for (field, value) in [
            ("admin username", &config.username),
            ("admin email", &config.email),
            ("admin role", &config.role),
        ] {
            if value.trim().is_empty() {
                return Err(BootstrapError::Configuration(format!("{field} cannot be empty")));
            }
        }
        if config.password.is_empty() {
            return Err(BootstrapError::Configuration(
                "admin password cannot be empty".to_string(),
            ));
        }

        Ok(config)
    }

    #[must_use]
    pub fn uses_default_password(&self) -> bool {
        self.password.expose() == DEFAULT_ADMIN_PASSWORD
    }

    #[must_use]
    pub fn canonical(&self) -> CanonicalAdmin {
        CanonicalAdmin {
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            password_hash: digest_secret(&self.password),
            recovery_key_hash: self.recovery_key.as_ref().map(digest_secret),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: DEFAULT_ADMIN_USERNAME.to_string(),
            email: DEFAULT_ADMIN_EMAIL.to_string(),
            password: Secret::new(DEFAULT_ADMIN_PASSWORD),
            recovery_key: None,
            role: DEFAULT_ADMIN_ROLE.to_string(),
        }
    }
}

/// Admin field values derived from configuration, digests already applied.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CanonicalAdmin {
    pub username: String,
    pub email: String,
    pub role: String,
    pub password_hash: SecretDigest,
    pub recovery_key_hash: Option<SecretDigest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PrivilegedRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: SecretDigest,
    pub recovery_key_hash: Option<SecretDigest>,
    pub role: String,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

impl PrivilegedRecord {
    #[must_use]
    pub fn is_soft_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdminField {
    Email,
    Role,
    RecoveryKeyHash,
}

impl AdminField {
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Role => "role",
            Self::RecoveryKeyHash => "recovery_key_hash",
        }
    }
}

/// Fields of `record` that differ from `canonical`.
///
/// The password digest is deliberately not compared: it is written once at
/// creation. The recovery digest only counts as drift when a recovery key is
/// configured; an unset key never clears a stored one.
#[must_use]
pub fn drifted_fields(record: &PrivilegedRecord, canonical: &CanonicalAdmin) -> Vec<AdminField> {
    let mut fields = Vec::new();
    if record.email != canonical.email {
        fields.push(AdminField::Email);
    }
    if record.role != canonical.role {
        fields.push(AdminField::Role);
    }
    if let Some(recovery) = &canonical.recovery_key_hash {
        if record.recovery_key_hash.as_ref() != Some(recovery) {
            fields.push(AdminField::RecoveryKeyHash);
        }
    }
    fields
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StoreLocation {
    SqliteFile(PathBuf),
    SqliteMemory,
    /// A backend this crate does not drive; schema work for it belongs to
    /// external migration tooling.
    External { backend: String },
}

impl StoreLocation {
    /// Parses `sqlite:///relative.db`, `sqlite:////abs/path.db`,
    /// `sqlite://` and `sqlite:///:memory:`. Other schemes yield
    /// [`StoreLocation::External`].
    pub fn parse(dsn: &str) -> Result<Self, BootstrapError> {
        let Some((scheme, rest)) = dsn.split_once("://") else {
            return Err(BootstrapError::Configuration(
                "database url must look like <backend>://<location>".to_string(),
            ));
        };

        let backend = scheme.split('+').next().unwrap_or(scheme).to_ascii_lowercase();
        if backend.is_empty() {
            return Err(BootstrapError::Configuration(
                "database url is missing a backend scheme".to_string(),
            ));
        }
        if backend != "sqlite" {
            return Ok(Self::External { backend });
        }

        if rest.is_empty() {
            return Ok(Self::SqliteMemory);
        }
        let Some(path) = rest.strip_prefix('/') else {
            return Err(BootstrapError::Configuration(format!(
                "sqlite url must not name a host: {scheme}://{rest}"
            )));
        };
        let path = path.split('?').next().unwrap_or(path);
        match path {
            "" | ":memory:" => Ok(Self::SqliteMemory),
            file => Ok(Self::SqliteFile(PathBuf::from(file))),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &str {
        match self {
            Self::SqliteFile(_) | Self::SqliteMemory => "sqlite",
            Self::External { backend } => backend,
        }
    }
}

impl Display for StoreLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqliteFile(path) => write!(f, "sqlite:{}", path.display()),
            Self::SqliteMemory => f.write_str("sqlite::memory:"),
            Self::External { backend } => write!(f, "{backend}:<external>"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    NotStarted,
    SchemaReady,
    RecordReady,
    Complete,
    Failed,
}

impl BootstrapPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::SchemaReady => "schema_ready",
            Self::RecordReady => "record_ready",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, BootstrapError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|err| BootstrapError::Validation(format!("failed to format timestamp: {err}")))
}

/// Accepts RFC3339, and the naive `YYYY-MM-DD HH:MM:SS[.ffffff]` form older
/// releases wrote, read as UTC.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, BootstrapError> {
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(parsed.to_offset(UtcOffset::UTC));
    }

    let naive_formats = [
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    ];
    for format in naive_formats {
        if let Ok(parsed) = PrimitiveDateTime::parse(value, format) {
            return Ok(parsed.assume_utc());
        }
    }

    Err(BootstrapError::Validation(format!("invalid timestamp: {value}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_record() -> PrivilegedRecord {
        let canonical = AdminConfig::default().canonical();
        PrivilegedRecord {
            id: 1,
            username: canonical.username,
            email: canonical.email,
            password_hash: canonical.password_hash,
            recovery_key_hash: None,
            role: canonical.role,
            is_active: true,
            created_at: now_utc(),
            deleted_at: None,
        }
    }

    #[test]
    fn digest_is_deterministic_sha256_hex() {
        let first = digest_secret(&Secret::new("ChangeM3!"));
        let second = digest_secret(&Secret::new("ChangeM3!"));
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
        assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, digest_secret(&Secret::new("ChangeM4!")));

        // sha256("abc")
        assert_eq!(
            digest_secret(&Secret::new("abc")).as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn secret_never_formats_plaintext() {
        let secret = Secret::new("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert!(!format!("{secret}").contains("hunter2"));

        let config = AdminConfig::new("root", "root@example.com", secret, None, "admin");
        let config = match config {
            Ok(config) => config,
            Err(err) => panic!("config should be valid: {err}"),
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn admin_config_rejects_blank_fields_and_drops_empty_recovery_key() {
        let err = match AdminConfig::new("  ", "a@b.c", Secret::new("pw"), None, "admin") {
            Ok(_) => panic!("blank username should be rejected"),
            Err(err) => err,
        };
        assert_eq!(err.code(), "configuration_error");
        assert!(err.to_string().contains("admin username"));

        let config = match AdminConfig::new(
            "admin",
            "a@b.c",
            Secret::new("pw"),
            Some(Secret::new("")),
            "admin",
        ) {
            Ok(config) => config,
            Err(err) => panic!("config should be valid: {err}"),
        };
        assert!(config.recovery_key.is_none());
        assert!(config.canonical().recovery_key_hash.is_none());
        assert!(!config.uses_default_password());
        assert!(AdminConfig::default().uses_default_password());
    }

    #[test]
    fn drift_ignores_password_and_unset_recovery_key() {
        let record = fixture_record();
        let mut config = AdminConfig::default();
        config.password = Secret::new("rotated");
        assert!(drifted_fields(&record, &config.canonical()).is_empty());

        config.email = "ops@example.com".to_string();
        config.role = "owner".to_string();
        config.recovery_key = Some(Secret::new("recover-me"));
        assert_eq!(
            drifted_fields(&record, &config.canonical()),
            vec![AdminField::Email, AdminField::Role, AdminField::RecoveryKeyHash]
        );

        let mut converged = record;
        converged.email = config.email.clone();
        converged.role = config.role.clone();
        converged.recovery_key_hash = config.canonical().recovery_key_hash;
        assert!(drifted_fields(&converged, &config.canonical()).is_empty());

        config.recovery_key = None;
        assert!(drifted_fields(&converged, &config.canonical()).is_empty());
    }

    #[test]
    fn user_table_schema_is_valid_and_additive_where_it_can_be() {
        let schema = TableSchema::user_table();
        if let Err(err) = schema.validate() {
            panic!("user schema should validate: {err}");
        }
        assert_eq!(schema.columns.len(), 9);

        let non_additive = schema
            .columns
            .iter()
            .filter(|column| !column.is_additive_safe())
            .map(|column| column.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            non_additive,
            vec![
                "id",
                "username",
                "email",
                "password_hash",
                "role",
                "is_active",
                "created_at"
            ]
        );
        assert!(schema.columns.iter().all(|column| column.default.is_none()));

        let deleted_at = match schema.columns.iter().find(|c| c.name == "deleted_at") {
            Some(column) => column,
            None => panic!("deleted_at should be declared"),
        };
        assert_eq!(
            schema.add_column_sql(deleted_at),
            "ALTER TABLE \"user\" ADD COLUMN \"deleted_at\" DATETIME"
        );
        assert_eq!(
            schema.indexes[0].create_sql(&schema.name),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"ix_user_username\" ON \"user\" (\"username\")"
        );
    }

    #[test]
    fn missing_columns_preserve_declaration_order_and_ignore_unknown_live_columns() {
        let schema = TableSchema::user_table();
        let live: BTreeSet<String> = ["id", "username", "email", "password_hash", "role", "extra"]
            .into_iter()
            .map(str::to_string)
            .collect();
        let missing = schema
            .missing_columns(&live)
            .into_iter()
            .map(|column| column.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            missing,
            vec!["recovery_key_hash", "is_active", "created_at", "deleted_at"]
        );
    }

    #[test]
    fn schema_validation_rejects_duplicates_and_unknown_index_columns() {
        let duplicated = TableSchema::new(
            "t",
            vec![
                ColumnDef::required("a", SqlType::Integer),
                ColumnDef::optional("a", SqlType::Varchar),
            ],
        );
        assert!(matches!(duplicated.validate(), Err(BootstrapError::Validation(_))));

        let bad_index = TableSchema::new("t", vec![ColumnDef::required("a", SqlType::Integer)])
            .with_index(IndexDef {
                name: "ix_t_b".to_string(),
                columns: vec!["b".to_string()],
                unique: false,
            });
        let err = match bad_index.validate() {
            Ok(()) => panic!("index on unknown column should be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("unknown column t.b"));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn store_location_parses_sqlite_and_external_urls() {
        let cases = [
            ("sqlite:///./app.db", StoreLocation::SqliteFile(PathBuf::from("./app.db"))),
            ("sqlite:////var/lib/app.db", StoreLocation::SqliteFile(PathBuf::from("/var/lib/app.db"))),
            ("sqlite+pysqlite:///data.db", StoreLocation::SqliteFile(PathBuf::from("data.db"))),
            ("sqlite://", StoreLocation::SqliteMemory),
            ("sqlite:///:memory:", StoreLocation::SqliteMemory),
            (
                "postgresql+psycopg://u:p@db/app",
                StoreLocation::External { backend: "postgresql".to_string() },
            ),
        ];
        for (dsn, expected) in cases {
            match StoreLocation::parse(dsn) {
                Ok(location) => assert_eq!(location, expected, "dsn {dsn}"),
                Err(err) => panic!("dsn {dsn} should parse: {err}"),
            }
        }

        assert!(StoreLocation::parse("app.db").is_err());
        assert!(StoreLocation::parse("sqlite://host/app.db").is_err());

        let external = StoreLocation::External { backend: "postgresql".to_string() };
        assert!(!external.to_string().contains('@'));
    }

    #[test]
    fn timestamps_accept_rfc3339_and_legacy_naive_format() {
        let rfc = match parse_timestamp("2024-03-01T10:20:30Z") {
            Ok(value) => value,
            Err(err) => panic!("rfc3339 should parse: {err}"),
        };
        let legacy = match parse_timestamp("2024-03-01 10:20:30.000000") {
            Ok(value) => value,
            Err(err) => panic!("legacy timestamp should parse: {err}"),
        };
        let legacy_short = match parse_timestamp("2024-03-01 10:20:30") {
            Ok(value) => value,
            Err(err) => panic!("legacy timestamp should parse: {err}"),
        };
        assert_eq!(rfc, legacy);
        assert_eq!(rfc, legacy_short);
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("2024-03-01 10:20").is_err());

        let fractional = match parse_timestamp("2023-01-05 08:00:00.123456") {
            Ok(value) => value,
            Err(err) => panic!("legacy fractional timestamp should parse: {err}"),
        };
        assert_eq!(fractional.microsecond(), 123_456);
        assert_eq!(fractional.offset(), UtcOffset::UTC);

        match format_rfc3339(rfc) {
            Ok(formatted) => assert_eq!(formatted, "2024-03-01T10:20:30Z"),
            Err(err) => panic!("format should succeed: {err}"),
        }
    }

    #[test]
    fn phases_serialize_in_snake_case() {
        let encoded = match serde_json::to_string(&BootstrapPhase::RecordReady) {
            Ok(value) => value,
            Err(err) => panic!("phase should serialize: {err}"),
        };
        assert_eq!(encoded, "\"record_ready\"");
        assert!(BootstrapPhase::Failed.is_terminal());
        assert!(!BootstrapPhase::SchemaReady.is_terminal());
    }
}
