//! Migration step sources.
//!
//! A source is an ordered, versioned list of reversible schema operations.
//! Steps are addressed by a numeric version; ordering is by version and gaps
//! are allowed. [`DirSource`] reads `NNN_name.up.sql` / `NNN_name.down.sql`
//! script pairs from a database-dialect subdirectory; [`MemorySource`] holds
//! steps in code, which is how the test schemas in this crate are built.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::error::RepositoryError;

/// One reversible schema step. A step without a down script is
/// irreversible: rolling back over it is an error.
#[derive(Debug, Clone)]
pub struct MigrationStep {
    pub version: u64,
    pub name: String,
    pub up: String,
    pub down: Option<String>,
}

/// An ordered, versioned step list consumed read-only by the tracker.
pub trait MigrationSource: Send + Sync {
    /// All steps in ascending version order. Duplicate versions are a
    /// source defect and reported as `InvalidInput`.
    fn steps(&self) -> Result<Vec<MigrationStep>, RepositoryError>;
}

/// In-code step list.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    steps: Vec<MigrationStep>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reversible step.
    pub fn step(
        mut self,
        version: u64,
        name: impl Into<String>,
        up: impl Into<String>,
        down: impl Into<String>,
    ) -> Self {
        self.steps.push(MigrationStep {
            version,
            name: name.into(),
            up: up.into(),
            down: Some(down.into()),
        });
        self
    }

    /// Append a step with no down script.
    pub fn irreversible_step(
        mut self,
        version: u64,
        name: impl Into<String>,
        up: impl Into<String>,
    ) -> Self {
        self.steps.push(MigrationStep {
            version,
            name: name.into(),
            up: up.into(),
            down: None,
        });
        self
    }
}

impl MigrationSource for MemorySource {
    fn steps(&self) -> Result<Vec<MigrationStep>, RepositoryError> {
        order_and_check(self.steps.clone())
    }
}

/// Script files under `<root>/<dialect>/`, named `NNN_name.up.sql` and
/// `NNN_name.down.sql`. Files that do not match the pattern are ignored.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
    dialect: String,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>, dialect: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            dialect: dialect.into(),
        }
    }

    fn dir(&self) -> PathBuf {
        self.root.join(&self.dialect)
    }
}

impl MigrationSource for DirSource {
    fn steps(&self) -> Result<Vec<MigrationStep>, RepositoryError> {
        let dir = self.dir();
        let entries = fs::read_dir(&dir).map_err(|e| {
            RepositoryError::query(format!(
                "cannot read migration directory {}: {e}",
                dir.display()
            ))
        })?;

        // version -> (name, up, down)
        let mut scripts: BTreeMap<u64, (String, Option<String>, Option<String>)> = BTreeMap::new();

        for entry in entries {
            let entry = entry.map_err(|e| {
                RepositoryError::query(format!("cannot read migration directory entry: {e}"))
            })?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some((version, name, is_up)) = parse_script_name(file_name) else {
                continue;
            };

            let sql = fs::read_to_string(entry.path()).map_err(|e| {
                RepositoryError::query(format!("cannot read migration script {file_name}: {e}"))
            })?;

            let slot = scripts
                .entry(version)
                .or_insert_with(|| (name.clone(), None, None));
            if slot.0 != name {
                return Err(RepositoryError::invalid_input(format!(
                    "conflicting names for migration version {version}: {} vs {name}",
                    slot.0
                )));
            }
            let side = if is_up { &mut slot.1 } else { &mut slot.2 };
            if side.is_some() {
                return Err(RepositoryError::invalid_input(format!(
                    "duplicate {} script for migration version {version}",
                    if is_up { "up" } else { "down" }
                )));
            }
            *side = Some(sql);
        }

        let mut steps = Vec::with_capacity(scripts.len());
        for (version, (name, up, down)) in scripts {
            let up = up.ok_or_else(|| {
                RepositoryError::invalid_input(format!(
                    "migration version {version} ({name}) has no up script"
                ))
            })?;
            steps.push(MigrationStep {
                version,
                name,
                up,
                down,
            });
        }
        order_and_check(steps)
    }
}

/// Parse `NNN_name.up.sql` / `NNN_name.down.sql`.
fn parse_script_name(file_name: &str) -> Option<(u64, String, bool)> {
    let (stem, is_up) = if let Some(stem) = file_name.strip_suffix(".up.sql") {
        (stem, true)
    } else if let Some(stem) = file_name.strip_suffix(".down.sql") {
        (stem, false)
    } else {
        return None;
    };

    let (version, name) = stem.split_once('_')?;
    let version: u64 = version.parse().ok()?;
    Some((version, name.to_string(), is_up))
}

fn order_and_check(mut steps: Vec<MigrationStep>) -> Result<Vec<MigrationStep>, RepositoryError> {
    steps.sort_by_key(|s| s.version);
    for pair in steps.windows(2) {
        if pair[0].version == pair[1].version {
            return Err(RepositoryError::invalid_input(format!(
                "duplicate migration version {}",
                pair[0].version
            )));
        }
    }
    if steps.iter().any(|s| s.version == 0) {
        return Err(RepositoryError::invalid_input(
            "migration version 0 is reserved for the empty schema",
        ));
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn script_names_parse() {
        assert_eq!(
            parse_script_name("001_create_users.up.sql"),
            Some((1, "create_users".to_string(), true))
        );
        assert_eq!(
            parse_script_name("12_add_index.down.sql"),
            Some((12, "add_index".to_string(), false))
        );
        assert_eq!(parse_script_name("notes.txt"), None);
        assert_eq!(parse_script_name("x_bad.up.sql"), None);
    }

    #[test]
    fn memory_source_orders_and_rejects_duplicates() {
        let source = MemorySource::new()
            .step(3, "third", "c", "drop c")
            .step(1, "first", "a", "drop a");
        let steps = source.steps().unwrap();
        assert_eq!(steps[0].version, 1);
        assert_eq!(steps[1].version, 3);

        let dup = MemorySource::new().step(1, "a", "x", "y").step(1, "b", "x", "y");
        assert!(matches!(
            dup.steps().unwrap_err(),
            RepositoryError::InvalidInput(_)
        ));
    }

    #[test]
    fn dir_source_pairs_up_and_down_scripts() {
        let tmp = tempfile::tempdir().unwrap();
        let dialect_dir = tmp.path().join("sqlite");
        fs::create_dir(&dialect_dir).unwrap();
        fs::write(
            dialect_dir.join("001_create_users.up.sql"),
            "CREATE TABLE users (id TEXT)",
        )
        .unwrap();
        fs::write(dialect_dir.join("001_create_users.down.sql"), "DROP TABLE users").unwrap();
        fs::write(
            dialect_dir.join("003_seed.up.sql"),
            "INSERT INTO users VALUES ('a')",
        )
        .unwrap();
        fs::write(dialect_dir.join("README.md"), "ignored").unwrap();

        let steps = DirSource::new(tmp.path(), "sqlite").steps().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].version, 1);
        assert_eq!(steps[0].name, "create_users");
        assert!(steps[0].down.is_some());
        // Gaps in numbering are allowed; 003 follows 001.
        assert_eq!(steps[1].version, 3);
        assert!(steps[1].down.is_none());
    }

    #[test]
    fn dir_source_missing_directory_is_a_query_error() {
        let err = DirSource::new("/nonexistent", "sqlite").steps().unwrap_err();
        assert!(matches!(err, RepositoryError::Query { .. }));
    }

    #[test]
    fn up_script_is_required() {
        let tmp = tempfile::tempdir().unwrap();
        let dialect_dir = tmp.path().join("postgres");
        fs::create_dir(&dialect_dir).unwrap();
        fs::write(dialect_dir.join("002_orphan.down.sql"), "DROP TABLE x").unwrap();

        let err = DirSource::new(tmp.path(), "postgres").steps().unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidInput(_)));
    }
}
