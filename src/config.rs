use serde::{Deserialize, Serialize};

use crate::error::{OdbcStatementError, Result};

/// Options applied to every statement created with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementConfig {
    /// Column size above which text/binary parameters are bound as large objects.
    pub large_object_threshold: usize,
    /// Prefix for the names of dispatched worker threads.
    pub worker_thread_prefix: String,
    /// Stop fetching after this many rows; `None` fetches the whole result set.
    pub max_rows: Option<usize>,
}

impl Default for StatementConfig {
    fn default() -> Self {
        Self {
            large_object_threshold: 4000,
            worker_thread_prefix: "odbc-stmt".to_string(),
            max_rows: None,
        }
    }
}

impl StatementConfig {
    #[must_use]
    pub fn builder() -> StatementConfigBuilder {
        StatementConfigBuilder::new()
    }

    /// Load options from a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`OdbcStatementError::InvalidArgument`] if the document does not parse.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            OdbcStatementError::InvalidArgument(format!("invalid statement config: {e}"))
        })
    }
}

/// Fluent builder for [`StatementConfig`].
#[derive(Debug, Clone, Default)]
pub struct StatementConfigBuilder {
    opts: StatementConfig,
}

impl StatementConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn large_object_threshold(mut self, bytes: usize) -> Self {
        self.opts.large_object_threshold = bytes;
        self
    }

    #[must_use]
    pub fn worker_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.opts.worker_thread_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.opts.max_rows = Some(max_rows);
        self
    }

    #[must_use]
    pub fn finish(self) -> StatementConfig {
        self.opts
    }
}
