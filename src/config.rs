use anyhow::{anyhow, Result};
use config::Config;
use std::collections::HashMap;
use std::path::Path;

/// Service configuration consumed by the storage core
pub struct DatabaseConfig {
    /// Path to the SQLite database file (leading `~` is expanded on open)
    pub db_path: String,

    /// Session key to move into the preferences store during migration;
    /// absent when the deployment never configured one
    pub session_key: Option<String>,
}

const EMPTY_CONFIG: &str = r#"### commentdb configuration file

### path to the SQLite database file
# db_path = "~/.commentdb/comments.db"

### session key to migrate into the preferences store
# session_key = ""
"#;

impl Default for DatabaseConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            db_path: format!("{}/.commentdb/comments.db", home_dir),
            session_key: None,
        }
    }
}

impl DatabaseConfig {
    /// Create and initialize a new configuration
    ///
    /// Reads the TOML file at `path` (or `~/.commentdb/commentdb.toml` when
    /// `None`, creating a commented-out template if missing), then applies
    /// environment overrides with the `COMMENTDB_` prefix, e.g.
    /// `COMMENTDB_DB_PATH=/srv/comments.db`.
    pub fn new(path: &Option<String>) -> Result<DatabaseConfig> {
        let mut builder = Config::builder();

        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();

        let commentdb_dir = format!("{}/.commentdb", home_dir.as_str());

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(commentdb_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create commentdb directory: {}", e))?;
                let p = format!("{}/commentdb.toml", commentdb_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        builder = builder.add_source(config::Environment::with_prefix("COMMENTDB"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        let db_path = match config.get("db_path") {
            Some(p) => p.to_string(),
            None => format!("{}/comments.db", commentdb_dir.as_str()),
        };

        let session_key = config
            .get("session_key")
            .filter(|k| !k.is_empty())
            .cloned();

        Ok(DatabaseConfig {
            db_path,
            session_key,
        })
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let lines = vec![
            format!("Database Path:      {}", self.db_path),
            format!(
                "Session Key:        {}",
                if self.session_key.is_some() {
                    "configured"
                } else {
                    "not set"
                }
            ),
        ];
        lines.join("\n")
    }

    /// Get the default config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.commentdb/commentdb.toml", home_dir)
    }
}
