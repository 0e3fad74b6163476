use crate::core::{MigrationError, Result};
use crate::migration::{MigrationScope, Strategy};
use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{Level, event};

lazy_static! {
    // Lowercase, no leading `-_+`, none of `\ / * ? " < > | , #` or whitespace.
    static ref INDEX_NAME: Regex = Regex::new(r#"^[a-z0-9][^A-Z\\/*?"<>|,#\s:]*$"#).expect("valid index name pattern");
}

const MAX_INDEX_NAME_BYTES: usize = 255;

pub fn validate_index_name(name: &str) -> Result<()> {
    if name == "." || name == ".." {
        return Err(MigrationError::Config(format!("index name '{}' is reserved", name)));
    }
    if name.len() > MAX_INDEX_NAME_BYTES {
        return Err(MigrationError::Config(format!(
            "index name '{}' is longer than {} bytes",
            name, MAX_INDEX_NAME_BYTES
        )));
    }
    if !INDEX_NAME.is_match(name) {
        return Err(MigrationError::Config(format!("invalid index name '{}'", name)));
    }
    Ok(())
}

/// Provisions a standalone physical index from a clean slate.
#[derive(Debug, Clone)]
pub struct CreateStandaloneIndex {
    pub index_name: String,
    pub settings: Value,
    pub mappings: Value,
}

impl CreateStandaloneIndex {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            settings: json!({}),
            mappings: json!({}),
        }
    }

    pub fn settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn mappings(mut self, mappings: Value) -> Self {
        self.mappings = mappings;
        self
    }

    pub fn body(&self) -> Value {
        json!({
            "settings": self.settings,
            "mappings": self.mappings,
        })
    }

    async fn recreate(&self, scope: &MigrationScope<'_>) -> Result<()> {
        validate_index_name(&self.index_name)?;

        if scope.client().index_exists(&self.index_name).await? {
            event!(
                Level::WARN,
                migration = %scope.name(),
                index = %self.index_name,
                "deleting existing index before creating it"
            );
            scope.client().delete_index(&self.index_name).await?;
        }

        scope.client().create_index(&self.index_name, &self.body()).await
    }
}

#[async_trait]
impl Strategy for CreateStandaloneIndex {
    fn kind(&self) -> &'static str {
        "create_standalone_index"
    }

    async fn migrate(&self, scope: &MigrationScope<'_>) -> Result<()> {
        let mut state = scope.load_state().await?;

        if state.index_created_at.is_some() && scope.client().index_exists(&self.index_name).await? {
            event!(Level::INFO, migration = %scope.name(), index = %self.index_name, "index already created");
            return Ok(());
        }

        self.recreate(scope).await.map_err(|err| scope.escalate(err))?;

        state.index_created_at = Some(Utc::now());
        scope.save_state(&state).await?;
        event!(Level::INFO, migration = %scope.name(), index = %self.index_name, "index created");
        Ok(())
    }

    async fn completed(&self, scope: &MigrationScope<'_>) -> Result<bool> {
        scope.client().index_exists(&self.index_name).await
    }
}
