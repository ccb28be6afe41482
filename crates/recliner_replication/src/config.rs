//! Configuration for the replicator.

/// Configuration for replication sessions.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Changes fetched and written per page.
    pub bulk_doc_limit: usize,
    /// Session entries kept in a checkpoint history.
    pub max_history: usize,
    /// URL prefix naming databases of the local instance (`/recliner/<db>`).
    pub local_prefix: String,
    /// Version stamped on checkpoints and responses.
    pub replication_id_version: u32,
}

impl ReplicationConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            bulk_doc_limit: 25,
            max_history: 100,
            local_prefix: "/recliner".to_string(),
            replication_id_version: 1,
        }
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_bulk_doc_limit(mut self, limit: usize) -> Self {
        self.bulk_doc_limit = limit.max(1);
        self
    }

    /// Sets the number of session entries kept per checkpoint.
    #[must_use]
    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    /// Sets the URL prefix of local databases.
    #[must_use]
    pub fn with_local_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.local_prefix = prefix.into();
        self
    }

    /// Sets the replication id version.
    #[must_use]
    pub fn with_replication_id_version(mut self, version: u32) -> Self {
        self.replication_id_version = version;
        self
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ReplicationConfig::default();
        assert_eq!(config.bulk_doc_limit, 25);
        assert_eq!(config.max_history, 100);
        assert_eq!(config.local_prefix, "/recliner");
        assert_eq!(config.replication_id_version, 1);
    }

    #[test]
    fn builders() {
        let config = ReplicationConfig::new()
            .with_bulk_doc_limit(0)
            .with_max_history(5)
            .with_local_prefix("/db");
        assert_eq!(config.bulk_doc_limit, 1);
        assert_eq!(config.max_history, 5);
        assert_eq!(config.local_prefix, "/db");
    }
}
