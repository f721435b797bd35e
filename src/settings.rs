//! Filesystem layout and external configuration
//!
//! The engine keeps persisted DAGs under a dags directory (one file per
//! registered pipeline, named after the registration), per-run job metadata
//! under a jobs directory, and INI-style database connection sections in a
//! `.postgres` file under the config directory.

use crate::error::Result;
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_DAGS_DIR: &str = ".dags";
pub const DEFAULT_JOBS_DIR: &str = ".jobs";
pub const DEFAULT_CONFIG_DIR: &str = ".config";

/// Directory layout used by the registration service and the trigger.
#[derive(Debug, Clone)]
pub struct EnginePaths {
    pub dags_dir: PathBuf,
    pub jobs_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl Default for EnginePaths {
    fn default() -> Self {
        Self {
            dags_dir: PathBuf::from(DEFAULT_DAGS_DIR),
            jobs_dir: PathBuf::from(DEFAULT_JOBS_DIR),
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
        }
    }
}

impl EnginePaths {
    /// Layout rooted at a custom dags directory.
    pub fn with_dags_dir(dags_dir: impl Into<PathBuf>) -> Self {
        Self {
            dags_dir: dags_dir.into(),
            ..Self::default()
        }
    }

    /// Create any missing directories.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.dags_dir)?;
        fs::create_dir_all(&self.jobs_dir)?;
        fs::create_dir_all(&self.config_dir)?;
        Ok(())
    }

    /// Location of the INI-style postgres connection sections.
    pub fn postgres_file(&self) -> PathBuf {
        self.config_dir.join(".postgres")
    }
}

/// One `[section]` of the `.postgres` file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PostgresSection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

/// Load every connection section from an INI file.
pub fn load_postgres_sections(path: &Path) -> Result<HashMap<String, PostgresSection>> {
    let settings = Config::builder()
        .add_source(File::from(path.to_path_buf()).format(FileFormat::Ini))
        .build()?;
    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_creates_layout() {
        let temp_dir = TempDir::new().unwrap();
        let paths = EnginePaths {
            dags_dir: temp_dir.path().join(".dags"),
            jobs_dir: temp_dir.path().join(".jobs"),
            config_dir: temp_dir.path().join(".config"),
        };
        paths.ensure().unwrap();
        assert!(paths.dags_dir.is_dir());
        assert!(paths.jobs_dir.is_dir());
        assert!(paths.config_dir.is_dir());
        // idempotent
        paths.ensure().unwrap();
    }

    #[test]
    fn test_default_layout() {
        let paths = EnginePaths::default();
        assert_eq!(paths.dags_dir, PathBuf::from(".dags"));
        assert_eq!(paths.jobs_dir, PathBuf::from(".jobs"));
        assert_eq!(paths.postgres_file(), PathBuf::from(".config/.postgres"));
    }

    #[test]
    fn test_load_postgres_sections() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".postgres");
        fs::write(
            &path,
            r#"
[warehouse]
host = localhost
port = 5432
user = loom
password = secret
dbname = analytics

[staging]
host = staging.internal
port = 5433
user = loom
password = hunter2
dbname = staging
"#,
        )
        .unwrap();

        let sections = load_postgres_sections(&path).unwrap();
        assert_eq!(sections.len(), 2);
        let warehouse = &sections["warehouse"];
        assert_eq!(warehouse.host, "localhost");
        assert_eq!(warehouse.port, 5432);
        assert_eq!(warehouse.dbname, "analytics");
    }

    #[test]
    fn test_missing_postgres_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let result = load_postgres_sections(&temp_dir.path().join(".postgres"));
        assert!(result.is_err());
    }
}
