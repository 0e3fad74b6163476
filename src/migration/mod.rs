//! Migration contract.
//!
//! A [`Migration`] is a versioned declaration (its [`MigrationPolicy`])
//! composed with one [`Strategy`] that knows how to make a bounded step of
//! progress and how to tell whether the work is done. Strategies never see
//! each other; the shared scaffolding (state load/save, logging, error
//! escalation) lives in [`MigrationScope`].

pub mod context;
pub mod precondition;
pub mod strategies;

use crate::core::{MigrationError, MigrationVersion, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

pub use context::{MigrationContext, MigrationContextBuilder, MigrationScope};
pub use precondition::{Precondition, SpaceRequirement};

/// Declared, immutable scheduling policy of a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPolicy {
    pub version: MigrationVersion,
    pub name: String,
    /// Work is split across several invocations.
    pub batched: bool,
    /// The scheduler may re-invoke after a transient failure instead of halting.
    pub retry_on_failure: bool,
    pub batch_size: Option<usize>,
    pub update_batch_size: Option<usize>,
    /// Minimum wait between two invocations of this migration.
    pub throttle_delay: Duration,
}

impl MigrationPolicy {
    pub fn new(version: u64, name: impl Into<String>) -> Self {
        Self {
            version: MigrationVersion::new(version),
            name: name.into(),
            batched: false,
            retry_on_failure: false,
            batch_size: None,
            update_batch_size: None,
            throttle_delay: Duration::ZERO,
        }
    }

    pub fn batched(mut self) -> Self {
        self.batched = true;
        self
    }

    pub fn retry_on_failure(mut self) -> Self {
        self.retry_on_failure = true;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn update_batch_size(mut self, size: usize) -> Self {
        self.update_batch_size = Some(size);
        self
    }

    pub fn throttle_delay(mut self, delay: Duration) -> Self {
        self.throttle_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.version.get() == 0 {
            return Err(MigrationError::Config(format!(
                "Migration '{}' must have a version >= 1",
                self.name
            )));
        }
        if self.name.trim().is_empty() {
            return Err(MigrationError::Config(format!(
                "Migration {} must have a name",
                self.version
            )));
        }
        if self.batch_size == Some(0) || self.update_batch_size == Some(0) {
            return Err(MigrationError::Config(format!(
                "Migration '{}' batch sizes must be >= 1",
                self.name
            )));
        }
        Ok(())
    }
}

/// One reusable migration shape.
///
/// `migrate` performs a single bounded step and reports progress only through
/// state and `completed`. `completed` must be free of side effects, and
/// `migrate` must not write to the backend or the queue once `completed` holds.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn migrate(&self, scope: &MigrationScope<'_>) -> Result<()>;

    async fn completed(&self, scope: &MigrationScope<'_>) -> Result<bool>;

    fn obsolete(&self) -> bool {
        false
    }
}

/// Capability probe deciding whether a migration applies to this deployment.
#[async_trait]
pub trait SkipCondition: Send + Sync {
    async fn should_skip(&self, scope: &MigrationScope<'_>) -> Result<bool>;
}

/// Skips the migration when the given index is not provisioned.
pub struct SkipWhenIndexMissing {
    pub index: String,
}

#[async_trait]
impl SkipCondition for SkipWhenIndexMissing {
    async fn should_skip(&self, scope: &MigrationScope<'_>) -> Result<bool> {
        Ok(!scope.client().index_exists(&self.index).await?)
    }
}

pub struct Migration {
    policy: MigrationPolicy,
    strategy: Box<dyn Strategy>,
    skip: Option<Box<dyn SkipCondition>>,
    preconditions: Vec<Box<dyn Precondition>>,
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("policy", &self.policy)
            .field("strategy", &self.strategy.kind())
            .field("has_skip_condition", &self.skip.is_some())
            .field("preconditions", &self.preconditions.len())
            .finish()
    }
}

impl Migration {
    pub fn new(policy: MigrationPolicy, strategy: impl Strategy + 'static) -> Self {
        Self {
            policy,
            strategy: Box::new(strategy),
            skip: None,
            preconditions: Vec::new(),
        }
    }

    pub fn with_skip_condition(mut self, condition: impl SkipCondition + 'static) -> Self {
        self.skip = Some(Box::new(condition));
        self
    }

    pub fn with_precondition(mut self, precondition: impl Precondition + 'static) -> Self {
        self.preconditions.push(Box::new(precondition));
        self
    }

    pub fn policy(&self) -> &MigrationPolicy {
        &self.policy
    }

    pub fn version(&self) -> MigrationVersion {
        self.policy.version
    }

    pub fn name(&self) -> &str {
        &self.policy.name
    }

    pub fn strategy_kind(&self) -> &'static str {
        self.strategy.kind()
    }

    pub fn obsolete(&self) -> bool {
        self.strategy.obsolete()
    }

    pub fn retry_on_failure(&self) -> bool {
        self.policy.retry_on_failure
    }

    pub fn throttle_delay(&self) -> Duration {
        self.policy.throttle_delay
    }

    /// Runs one bounded step.
    pub async fn migrate(&self, ctx: &MigrationContext) -> Result<()> {
        let span = info_span!(
            "migration.migrate",
            version = %self.policy.version,
            name = %self.policy.name,
            strategy = self.strategy.kind()
        );

        async {
            let scope = MigrationScope::new(ctx, &self.policy);
            let result = self.strategy.migrate(&scope).await;
            match &result {
                Ok(()) => event!(Level::DEBUG, "migration step finished"),
                Err(err) => event!(
                    Level::WARN,
                    error_class = err.kind(),
                    error = %err,
                    "migration step failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    pub async fn completed(&self, ctx: &MigrationContext) -> Result<bool> {
        let scope = MigrationScope::new(ctx, &self.policy);
        self.strategy.completed(&scope).await
    }

    pub async fn skip_migration(&self, ctx: &MigrationContext) -> Result<bool> {
        match &self.skip {
            Some(condition) => {
                let scope = MigrationScope::new(ctx, &self.policy);
                condition.should_skip(&scope).await
            }
            None => Ok(false),
        }
    }

    /// Runs every pre-flight check; the first failure wins.
    pub async fn check_preconditions(&self, ctx: &MigrationContext) -> Result<()> {
        let scope = MigrationScope::new(ctx, &self.policy);
        for precondition in &self.preconditions {
            precondition.check(&scope).await?;
        }
        Ok(())
    }
}
