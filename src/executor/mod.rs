//! Sequencing of registered migrations.
//!
//! Each [`MigrationExecutor::advance`] call finds the lowest version that is
//! neither obsolete, skipped nor completed and runs one step of it. Nothing
//! past an incomplete migration is touched.

pub mod registry;
pub mod worker;

use crate::core::{MigrationError, MigrationVersion, Result};
use crate::migration::{Migration, MigrationContext};
use crate::state::MigrationState;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

pub use registry::MigrationRegistry;
pub use worker::{MigrationWorker, spawn_migration_worker};

/// What a single [`MigrationExecutor::advance`] call did.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// Every migration is completed, skipped or obsolete.
    Idle,
    /// The next migration ran too recently.
    Throttled {
        version: MigrationVersion,
        retry_in: Duration,
    },
    Progressed {
        version: MigrationVersion,
        completed: bool,
    },
    /// A transient failure; the migration will be invoked again after its throttle delay.
    RetryScheduled {
        version: MigrationVersion,
        attempt: u32,
        error: MigrationError,
    },
    /// The next migration is halted and waits for an operator.
    Halted {
        version: MigrationVersion,
        reason: String,
    },
}

/// Operator-facing view of one registered migration.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStatus {
    pub version: MigrationVersion,
    pub name: String,
    pub strategy: &'static str,
    pub obsolete: bool,
    pub completed: bool,
    pub halted: bool,
    pub halted_reason: Option<String>,
    pub failed_attempts: u32,
    pub last_invoked_at: Option<DateTime<Utc>>,
    pub state: MigrationState,
}

pub struct MigrationExecutor {
    registry: MigrationRegistry,
    ctx: MigrationContext,
}

impl MigrationExecutor {
    pub fn new(registry: MigrationRegistry, ctx: MigrationContext) -> Self {
        Self { registry, ctx }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn context(&self) -> &MigrationContext {
        &self.ctx
    }

    /// Runs at most one bounded step of the lowest pending migration.
    ///
    /// A failure that halts the migration is persisted and returned as the
    /// error; later calls report [`AdvanceOutcome::Halted`] until
    /// [`resume`](Self::resume) is called.
    pub async fn advance(&self) -> Result<AdvanceOutcome> {
        let span = info_span!("migration.advance", registered = self.registry.len());

        async {
            for migration in self.registry.iter() {
                let version = migration.version();
                let state = self.ctx.load_state(version).await?;

                if state.halted {
                    let reason = state.halted_reason.unwrap_or_default();
                    event!(Level::WARN, version = %version, reason = %reason, "migration is halted");
                    return Ok(AdvanceOutcome::Halted { version, reason });
                }
                if state.completed_at.is_some() {
                    continue;
                }
                if migration.obsolete() {
                    event!(
                        Level::WARN,
                        version = %version,
                        name = %migration.name(),
                        "skipping obsolete migration"
                    );
                    continue;
                }
                if migration.skip_migration(&self.ctx).await? {
                    event!(Level::DEBUG, version = %version, name = %migration.name(), "migration skipped");
                    continue;
                }
                if migration.completed(&self.ctx).await? {
                    self.mark_completed(version).await?;
                    continue;
                }

                return self.invoke(migration, state).await;
            }

            Ok(AdvanceOutcome::Idle)
        }
        .instrument(span)
        .await
    }

    async fn invoke(&self, migration: &Migration, mut state: MigrationState) -> Result<AdvanceOutcome> {
        let version = migration.version();
        let now = Utc::now();

        if let Some(last) = state.last_invoked_at {
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            let delay = migration.throttle_delay();
            if elapsed < delay {
                let retry_in = delay - elapsed;
                event!(Level::DEBUG, version = %version, retry_in_ms = retry_in.as_millis() as u64, "migration throttled");
                return Ok(AdvanceOutcome::Throttled { version, retry_in });
            }
        }

        if let Err(err) = migration.check_preconditions(&self.ctx).await {
            if err.is_transient() {
                event!(
                    Level::WARN,
                    version = %version,
                    name = %migration.name(),
                    error = %err,
                    "migration precondition could not be checked"
                );
                return Err(err);
            }
            state.halt(err.to_string());
            self.ctx.save_state(version, &state).await?;
            event!(
                Level::ERROR,
                version = %version,
                name = %migration.name(),
                error_class = err.kind(),
                error = %err,
                "migration precondition failed"
            );
            return Err(err);
        }

        state.last_invoked_at = Some(now);
        self.ctx.save_state(version, &state).await?;

        let result = migration.migrate(&self.ctx).await;

        // The strategy may have written its progress fields meanwhile.
        let mut state = self.ctx.load_state(version).await?;
        match result {
            Ok(()) => {
                state.failed_attempts = 0;
                let completed = migration.completed(&self.ctx).await?;
                if completed {
                    state.completed_at = Some(Utc::now());
                    event!(Level::INFO, version = %version, name = %migration.name(), "migration completed");
                }
                self.ctx.save_state(version, &state).await?;
                Ok(AdvanceOutcome::Progressed { version, completed })
            }
            Err(err)
                if err.is_transient()
                    && migration.retry_on_failure()
                    && state.failed_attempts < self.ctx.config().max_retry_attempts =>
            {
                state.failed_attempts += 1;
                self.ctx.save_state(version, &state).await?;
                event!(
                    Level::WARN,
                    version = %version,
                    name = %migration.name(),
                    attempt = state.failed_attempts,
                    error = %err,
                    "migration failed, retry scheduled"
                );
                Ok(AdvanceOutcome::RetryScheduled {
                    version,
                    attempt: state.failed_attempts,
                    error: err,
                })
            }
            Err(err) => {
                state.halt(err.to_string());
                self.ctx.save_state(version, &state).await?;
                event!(
                    Level::ERROR,
                    version = %version,
                    name = %migration.name(),
                    error_class = err.kind(),
                    error = %err,
                    "migration halted"
                );
                Err(err)
            }
        }
    }

    async fn mark_completed(&self, version: MigrationVersion) -> Result<()> {
        let mut state = self.ctx.load_state(version).await?;
        state.completed_at = Some(Utc::now());
        self.ctx.save_state(version, &state).await?;
        event!(Level::INFO, version = %version, "migration already completed");
        Ok(())
    }

    /// Clears a halt so the next [`advance`](Self::advance) invokes the migration again.
    pub async fn resume(&self, version: MigrationVersion) -> Result<()> {
        if self.registry.get(version).is_none() {
            return Err(MigrationError::Config(format!(
                "Migration version {} is not registered",
                version
            )));
        }
        let mut state = self.ctx.load_state(version).await?;
        state.resume();
        self.ctx.save_state(version, &state).await?;
        event!(Level::INFO, version = %version, "migration resumed");
        Ok(())
    }

    /// Persisted status of every registered migration. Makes no backend calls.
    pub async fn status(&self) -> Result<Vec<MigrationStatus>> {
        let mut statuses = Vec::with_capacity(self.registry.len());
        for migration in self.registry.iter() {
            let state = self.ctx.load_state(migration.version()).await?;
            statuses.push(MigrationStatus {
                version: migration.version(),
                name: migration.name().to_string(),
                strategy: migration.strategy_kind(),
                obsolete: migration.obsolete(),
                completed: state.completed_at.is_some(),
                halted: state.halted,
                halted_reason: state.halted_reason.clone(),
                failed_attempts: state.failed_attempts,
                last_invoked_at: state.last_invoked_at,
                state,
            });
        }
        Ok(statuses)
    }
}
