//! Backup subsystem configuration.

use crate::version::Version;

/// Configuration shared by the exporter and the compatibility validator.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Application name written into export headers.
    pub app_name: String,
    /// Running application version.
    pub app_version: Version,
    /// Oldest backup version the application can restore without migration.
    pub min_supported_version: Version,
    /// Target engine named in dump-script headers.
    pub target_engine: String,
    /// Database name used in restoration instructions.
    pub database_name: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            app_name: "Meal Planner App".to_string(),
            app_version: Version::parse(env!("CARGO_PKG_VERSION"))
                .unwrap_or(Version::new(1, 0, 0)),
            min_supported_version: Version::new(1, 0, 0),
            target_engine: "MongoDB 4.4+ (mongosh or legacy mongo shell)".to_string(),
            database_name: "mealplanner".to_string(),
        }
    }
}

impl BackupConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the running application version.
    #[must_use]
    pub fn with_app_version(mut self, version: Version) -> Self {
        self.app_version = version;
        self
    }

    /// Sets the minimum supported backup version.
    #[must_use]
    pub fn with_min_supported_version(mut self, version: Version) -> Self {
        self.min_supported_version = version;
        self
    }

    /// Sets the database name used in restoration instructions.
    #[must_use]
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }
}
