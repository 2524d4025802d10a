use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use sightings_store::MongoStoreConfig;

const DEFAULT_FILE: &str = "database/avistamientos_mongodb.json";

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub mongo_uri: String,
    pub mongo_db: String,
    pub collection: String,
    pub file: PathBuf,
    pub batch_size: usize,
    pub truncate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl LoaderConfig {
    /// Env file (`SIGHTINGS_CONFIG_PATH`) overlaid by the process environment.
    /// `file_arg` wins over `SIGHTINGS_LOADER_FILE`.
    pub fn load(file_arg: Option<String>) -> Result<Self, ConfigError> {
        let mut merged = HashMap::new();

        if let Ok(path) = std::env::var("SIGHTINGS_CONFIG_PATH")
            && !path.trim().is_empty()
        {
            merged.extend(read_env_file(path.trim())?);
        }
        merged.extend(std::env::vars());

        if let Some(file) = file_arg.filter(|f| !f.trim().is_empty()) {
            merged.insert("SIGHTINGS_LOADER_FILE".to_string(), file);
        }

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str, default: &str| {
            kv.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };

        let mongo_uri = get("SIGHTINGS_MONGO_URI", "mongodb://localhost:27017");
        if !mongo_uri.starts_with("mongodb://") && !mongo_uri.starts_with("mongodb+srv://") {
            return Err(invalid(
                "SIGHTINGS_MONGO_URI must use the mongodb:// or mongodb+srv:// scheme",
            ));
        }

        let batch_size = get("SIGHTINGS_LOADER_BATCH_SIZE", "1000")
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| invalid("SIGHTINGS_LOADER_BATCH_SIZE must be a positive integer"))?;

        let truncate = match get("SIGHTINGS_LOADER_TRUNCATE", "false")
            .to_ascii_lowercase()
            .as_str()
        {
            "1" | "true" | "yes" | "y" | "on" => true,
            "0" | "false" | "no" | "n" | "off" => false,
            _ => return Err(invalid("SIGHTINGS_LOADER_TRUNCATE must be a boolean")),
        };

        Ok(Self {
            mongo_uri,
            mongo_db: get("SIGHTINGS_MONGO_DB", "biogeovis"),
            collection: get("SIGHTINGS_COLLECTION", "avistamientos"),
            file: PathBuf::from(get("SIGHTINGS_LOADER_FILE", DEFAULT_FILE)),
            batch_size,
            truncate,
        })
    }

    pub fn store_config(&self) -> MongoStoreConfig {
        MongoStoreConfig {
            uri: self.mongo_uri.clone(),
            database: self.mongo_db.clone(),
            collection: self.collection.clone(),
            connect_timeout: Duration::from_secs(5),
            app_name: Some("sightings-loader".to_string()),
        }
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError {
        code: "ERR_INVALID_CONFIG",
        message: message.to_string(),
    }
}

fn read_env_file(path: &str) -> Result<HashMap<String, String>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|_| ConfigError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    let mut kv = HashMap::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
            });
        };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        kv.insert(key.trim().to_string(), value.to_string());
    }
    Ok(kv)
}
