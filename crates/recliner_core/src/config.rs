//! Database configuration.

/// Configuration shared by every database of a [`crate::Recliner`].
#[derive(Debug, Clone)]
pub struct Config {
    /// An index whose candidate count is at or below this is used without
    /// probing the remaining indexes.
    pub index_threshold: usize,

    /// Maximum number of ancestor hashes kept per revision chain
    /// (`None` = unbounded).
    pub max_revision_history: Option<usize>,

    /// Whether file-backed databases sync the journal on every commit.
    pub sync_on_commit: bool,

    /// Page size used when a change feed request gives no limit
    /// (`None` = unbounded).
    pub default_changes_limit: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_threshold: 20,
            max_revision_history: None,
            sync_on_commit: true,
            default_changes_limit: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the index acceptance threshold.
    #[must_use]
    pub const fn index_threshold(mut self, value: usize) -> Self {
        self.index_threshold = value;
        self
    }

    /// Caps the revision chain length.
    #[must_use]
    pub const fn max_revision_history(mut self, value: Option<usize>) -> Self {
        self.max_revision_history = value;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the default change feed page size.
    #[must_use]
    pub const fn default_changes_limit(mut self, value: Option<usize>) -> Self {
        self.default_changes_limit = value;
        self
    }
}
