use crate::core::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard cap on references pushed to the bookkeeping queue per call.
pub const QUEUE_BATCH_LIMIT: usize = 100;

/// Engine configuration
///
/// Loaded from a JSON file or built in code:
///
/// ```
/// use search_migrations::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::new("http://localhost:9200", "gitlab-production")
///     .request_timeout(Duration::from_secs(10))
///     .default_batch_size(500)
///     .index_limiting_enabled(true);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Search backend base URL
    pub search_url: String,

    /// Main index that strategies target unless told otherwise
    pub index_name: String,

    /// Timeout of a single backend request
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,

    /// Location of the file-backed migration state store
    pub state_path: Option<PathBuf>,

    /// Maximum references per bookkeeping queue push (capped at 100)
    pub queue_batch_limit: usize,

    /// Batch size for migrations that do not declare one
    pub default_batch_size: usize,

    /// Transient failures tolerated before a retrying migration halts
    pub max_retry_attempts: u32,

    /// Whether only a subset of namespaces/projects is indexed
    pub index_limiting_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_url: "http://localhost:9200".to_string(),
            index_name: "search-main".to_string(),
            request_timeout: Duration::from_secs(30),
            state_path: None,
            queue_batch_limit: QUEUE_BATCH_LIMIT,
            default_batch_size: 1_000,
            max_retry_attempts: 30,
            index_limiting_enabled: false,
        }
    }
}

impl EngineConfig {
    /// Create a configuration for a backend URL and main index
    pub fn new(search_url: &str, index_name: &str) -> Self {
        Self {
            search_url: search_url.trim_end_matches('/').to_string(),
            index_name: index_name.to_string(),
            ..Default::default()
        }
    }

    /// Parse from a URL whose path names the main index
    ///
    /// Format: "http(s)://host:port/index"
    pub fn from_url(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| MigrationError::Config(format!("Missing scheme in '{}'", url)))?;
        if scheme != "http" && scheme != "https" {
            return Err(MigrationError::Config(format!(
                "Unsupported scheme '{}', expected http or https",
                scheme
            )));
        }

        let (host, index) = rest
            .split_once('/')
            .ok_or_else(|| MigrationError::Config(format!("Missing index name in '{}'", url)))?;
        let index = index.trim_matches('/');
        if host.is_empty() || index.is_empty() || index.contains('/') {
            return Err(MigrationError::Config(format!("Invalid search URL '{}'", url)));
        }

        Ok(Self::new(&format!("{}://{}", scheme, host), index))
    }

    /// Load a JSON configuration file; missing keys take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MigrationError::Config(format!(
                "Failed to read config '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the main index
    pub fn index_name(mut self, index_name: &str) -> Self {
        self.index_name = index_name.to_string();
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set state file location
    pub fn state_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Set queue push size; values above the transport cap are clamped
    pub fn queue_batch_limit(mut self, limit: usize) -> Self {
        self.queue_batch_limit = limit.min(QUEUE_BATCH_LIMIT);
        self
    }

    /// Set default batch size
    pub fn default_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = size;
        self
    }

    /// Set retry budget
    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Toggle index limiting
    pub fn index_limiting_enabled(mut self, enabled: bool) -> Self {
        self.index_limiting_enabled = enabled;
        self
    }

    /// Effective queue push size
    pub fn effective_queue_batch_limit(&self) -> usize {
        self.queue_batch_limit.clamp(1, QUEUE_BATCH_LIMIT)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.search_url.starts_with("http://") || self.search_url.starts_with("https://")) {
            return Err(MigrationError::Config(format!(
                "search_url must be an http(s) URL, got '{}'",
                self.search_url
            )));
        }
        if self.index_name.trim().is_empty() {
            return Err(MigrationError::Config("index_name must not be empty".to_string()));
        }
        if self.default_batch_size == 0 {
            return Err(MigrationError::Config("default_batch_size must be >= 1".to_string()));
        }
        if self.queue_batch_limit == 0 || self.queue_batch_limit > QUEUE_BATCH_LIMIT {
            return Err(MigrationError::Config(format!(
                "queue_batch_limit must be within 1..={}",
                QUEUE_BATCH_LIMIT
            )));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new("http://es:9200/", "main")
            .default_batch_size(10)
            .queue_batch_limit(500)
            .max_retry_attempts(3);

        assert_eq!(config.search_url, "http://es:9200");
        assert_eq!(config.default_batch_size, 10);
        assert_eq!(config.queue_batch_limit, QUEUE_BATCH_LIMIT);
        assert_eq!(config.max_retry_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_url() {
        let config = EngineConfig::from_url("https://search.internal:9243/gitlab-production").unwrap();
        assert_eq!(config.search_url, "https://search.internal:9243");
        assert_eq!(config.index_name, "gitlab-production");

        assert!(EngineConfig::from_url("search.internal:9243/main").is_err());
        assert!(EngineConfig::from_url("ftp://host/main").is_err());
        assert!(EngineConfig::from_url("http://host").is_err());
    }

    #[test]
    fn test_config_from_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "search_url": "http://es:9200", "index_name": "main", "request_timeout": 2500 }}"#
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.default_batch_size, 1_000);
        assert_eq!(config.queue_batch_limit, QUEUE_BATCH_LIMIT);
    }

    #[test]
    fn test_config_validation() {
        assert!(EngineConfig::new("http://es:9200", "").validate().is_err());
        assert!(
            EngineConfig::new("http://es:9200", "main")
                .default_batch_size(0)
                .validate()
                .is_err()
        );
        assert!(EngineConfig::new("es:9200", "main").validate().is_err());
    }
}
