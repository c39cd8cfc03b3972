use superluca_bootstrap_core::{AdminConfig, BootstrapError, BootstrapPhase, TableSchema};
use tracing::{error, info};

use crate::{AdminOutcome, BootstrapResult, SchemaReport, SqliteStore};

/// What a bootstrap run converges. The schema is always the managed `user`
/// table, the only table the admin reconciler writes to.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    schema: TableSchema,
    admin: AdminConfig,
}

impl BootstrapPlan {
    #[must_use]
    pub fn new(admin: AdminConfig) -> Self {
        Self {
            schema: TableSchema::user_table(),
            admin,
        }
    }

    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    #[must_use]
    pub fn admin(&self) -> &AdminConfig {
        &self.admin
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct BootstrapReport {
    pub phase: BootstrapPhase,
    pub schema: SchemaReport,
    pub admin: AdminOutcome,
}

/// Drives `NotStarted -> SchemaReady -> RecordReady -> Complete`, or
/// `Failed` from any non-terminal phase. One orchestrator runs at most once.
#[derive(Debug)]
pub struct BootstrapOrchestrator {
    phase: BootstrapPhase,
}

impl Default for BootstrapOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapOrchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: BootstrapPhase::NotStarted,
        }
    }

    #[must_use]
    pub fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    pub fn run(
        &mut self,
        store: &mut SqliteStore,
        plan: &BootstrapPlan,
    ) -> BootstrapResult<BootstrapReport> {
        if self.phase != BootstrapPhase::NotStarted {
            return Err(BootstrapError::Configuration(format!(
                "bootstrap already ran in this process (phase {})",
                self.phase.as_str()
            )));
        }

        info!(store = %store.location(), table = %plan.schema.name, "starting bootstrap");

        let schema = store.ensure_schema(&plan.schema).map_err(|err| self.fail(err))?;
        self.phase = BootstrapPhase::SchemaReady;

        let admin = store.reconcile_admin(&plan.admin).map_err(|err| self.fail(err))?;
        self.phase = BootstrapPhase::RecordReady;

        self.phase = BootstrapPhase::Complete;
        info!(
            added_columns = schema.added_columns.len(),
            created_table = schema.created_table,
            admin_written = admin.wrote(),
            "bootstrap complete"
        );

        Ok(BootstrapReport {
            phase: self.phase,
            schema,
            admin,
        })
    }

    fn fail(&mut self, err: BootstrapError) -> BootstrapError {
        error!(phase = self.phase.as_str(), code = err.code(), error = %err, "bootstrap failed");
        self.phase = BootstrapPhase::Failed;
        err
    }
}
