//! Database client interfaces (external collaborators)
//!
//! The engine itself never talks to a database; these are the seams that
//! downstream tasks plug their own drivers into, typically registered on the
//! pipeline's [`TaskContext`](crate::task::TaskContext).

use crate::error::{LoomError, Result};
use crate::settings::{load_postgres_sections, PostgresSection};
use async_trait::async_trait;
use std::path::Path;

/// Interface every database client wrapper implements.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Establish the underlying connection.
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Execute a statement, returning the affected row count.
    async fn execute(&self, statement: &str) -> anyhow::Result<u64>;

    /// Close the underlying connection.
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Connection settings for a postgres-backed client.
///
/// Holds a parsed `.postgres` section and renders libpq-style connection
/// strings; the driver itself is supplied by the caller.
#[derive(Debug, Clone)]
pub struct PostgresClient {
    section: PostgresSection,
}

impl PostgresClient {
    pub fn new(section: PostgresSection) -> Self {
        Self { section }
    }

    /// Build a client from one named section of a `.postgres` file.
    pub fn from_config(path: &Path, section: &str) -> Result<Self> {
        let mut sections = load_postgres_sections(path)?;
        let section = sections
            .remove(section)
            .ok_or_else(|| LoomError::NotFound(section.to_string()))?;
        Ok(Self::new(section))
    }

    pub fn section(&self) -> &PostgresSection {
        &self.section
    }

    /// Render the section as a libpq keyword/value connection string.
    pub fn conninfo(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.section.host,
            self.section.port,
            self.section.user,
            self.section.password,
            self.section.dbname
        )
    }
}
