use std::env;
use std::path::PathBuf;

/// Runtime configuration for the document generation service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root directory of the staging area (default: OS temp dir)
    pub staging_root: PathBuf,

    /// Maximum upload size in bytes (default: 50 MB)
    pub max_file_size: usize,

    /// Deflate level used for rendered documents and archives (default: 9)
    pub compression_level: i32,

    /// Run the background staging sweeper (default: true)
    pub enable_staging_janitor: bool,

    /// Staging entries older than this are swept, in hours (default: 24)
    pub staging_cleanup_age_hours: u64,

    /// Interval between staging sweeps in seconds (default: 3600)
    pub staging_sweep_interval_secs: u64,

    /// Allowed CORS Origins (comma separated, "*" for any)
    pub allowed_origins: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            staging_root: env::temp_dir(),
            max_file_size: 50 * 1024 * 1024, // 50 MB
            compression_level: 9,
            enable_staging_janitor: true,
            staging_cleanup_age_hours: 24,
            staging_sweep_interval_secs: 3600,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            staging_root: env::var("STAGING_ROOT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.staging_root),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            compression_level: env::var("ARCHIVE_COMPRESSION_LEVEL")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(|level: i32| level.clamp(0, 9))
                .unwrap_or(default.compression_level),

            enable_staging_janitor: env::var("ENABLE_STAGING_JANITOR")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.enable_staging_janitor),

            staging_cleanup_age_hours: env::var("STAGING_CLEANUP_AGE_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.staging_cleanup_age_hours),

            staging_sweep_interval_secs: env::var("STAGING_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .unwrap_or(default.staging_sweep_interval_secs),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|origins| !origins.is_empty())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development (local staging dir, no sweeper)
    pub fn development() -> Self {
        Self {
            staging_root: env::temp_dir().join("batch-doc-generator"),
            max_file_size: 50 * 1024 * 1024,
            compression_level: 9,
            enable_staging_janitor: false,
            staging_cleanup_age_hours: 24,
            staging_sweep_interval_secs: 3600,
            allowed_origins: vec!["*".to_string()],
        }
    }

    /// Create config for production (sweeper on, origins from env)
    pub fn production() -> Self {
        let base = Self::from_env();
        Self {
            enable_staging_janitor: true,
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| vec!["http://localhost:5173".to_string()]),
            ..base
        }
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.max_file_size, 50 * 1024 * 1024);
        assert_eq!(config.compression_level, 9);
        assert!(config.enable_staging_janitor);
        assert_eq!(config.staging_cleanup_age_hours, 24);
        assert!(config.allows_any_origin());
    }

    #[test]
    fn test_development_config() {
        let config = ServiceConfig::development();
        assert!(!config.enable_staging_janitor);
        assert!(config.staging_root.ends_with("batch-doc-generator"));
    }

    #[test]
    fn test_from_env_overrides() {
        unsafe {
            env::set_var("ARCHIVE_COMPRESSION_LEVEL", "42");
            env::set_var("STAGING_SWEEP_INTERVAL_SECS", "0");
        }
        let config = ServiceConfig::from_env();
        unsafe {
            env::remove_var("ARCHIVE_COMPRESSION_LEVEL");
            env::remove_var("STAGING_SWEEP_INTERVAL_SECS");
        }
        assert_eq!(config.compression_level, 9);
        assert_eq!(config.staging_sweep_interval_secs, 3600);
    }
}
