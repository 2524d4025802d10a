use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use sightings_query::QueryLimits;
use sightings_store::MongoStoreConfig;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub mongo_uri: String,
    pub mongo_db: String,
    pub collection: String,
    pub connect_timeout_ms: u64,
    pub query_timeout_ms: u64,
    pub result_cap: u64,
    pub group_cap: u64,
    pub list_default_limit: u64,
    pub geo_tolerance_default: f64,
    pub ensure_indexes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl GatewayConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("SIGHTINGS_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("SIGHTINGS_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000),
            "SIGHTINGS_BIND_ADDR",
        )?;

        let allow_nonlocal_bind =
            parse_bool(kv.get("SIGHTINGS_ALLOW_NONLOCAL_BIND")).unwrap_or(false);
        if !bind_addr.ip().is_loopback() && !allow_nonlocal_bind {
            return Err(StartupError {
                code: "ERR_NONLOCAL_BIND_NOT_ALLOWED",
                message: "non-local bind requires SIGHTINGS_ALLOW_NONLOCAL_BIND=true".to_string(),
            });
        }

        let mongo_uri = nonempty_or(kv, "SIGHTINGS_MONGO_URI", "mongodb://localhost:27017");
        if !mongo_uri.starts_with("mongodb://") && !mongo_uri.starts_with("mongodb+srv://") {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SIGHTINGS_MONGO_URI must use the mongodb:// or mongodb+srv:// scheme"
                    .to_string(),
            });
        }
        let mongo_db = nonempty_or(kv, "SIGHTINGS_MONGO_DB", "biogeovis");
        let collection = nonempty_or(kv, "SIGHTINGS_COLLECTION", "avistamientos");

        let connect_timeout_ms = parse_u64(
            kv.get("SIGHTINGS_CONNECT_TIMEOUT_MS"),
            5000,
            "SIGHTINGS_CONNECT_TIMEOUT_MS",
        )?;
        let query_timeout_ms = parse_u64(
            kv.get("SIGHTINGS_QUERY_TIMEOUT_MS"),
            10_000,
            "SIGHTINGS_QUERY_TIMEOUT_MS",
        )?;
        if connect_timeout_ms == 0 || query_timeout_ms == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SIGHTINGS_CONNECT_TIMEOUT_MS and SIGHTINGS_QUERY_TIMEOUT_MS must be >= 1"
                    .to_string(),
            });
        }

        let result_cap = parse_u64(kv.get("SIGHTINGS_RESULT_CAP"), 1000, "SIGHTINGS_RESULT_CAP")?;
        let group_cap = parse_u64(kv.get("SIGHTINGS_GROUP_CAP"), 1000, "SIGHTINGS_GROUP_CAP")?;
        let list_default_limit = parse_u64(
            kv.get("SIGHTINGS_LIST_DEFAULT_LIMIT"),
            100,
            "SIGHTINGS_LIST_DEFAULT_LIMIT",
        )?;
        if result_cap == 0 || group_cap == 0 || list_default_limit == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "result cap, group cap and default list limit must be >= 1".to_string(),
            });
        }
        if list_default_limit > result_cap {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SIGHTINGS_LIST_DEFAULT_LIMIT must be <= SIGHTINGS_RESULT_CAP".to_string(),
            });
        }

        let geo_tolerance_default = parse_f64(
            kv.get("SIGHTINGS_GEO_TOLERANCE_DEFAULT"),
            0.0001,
            "SIGHTINGS_GEO_TOLERANCE_DEFAULT",
        )?;
        if !geo_tolerance_default.is_finite() || geo_tolerance_default < 0.0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SIGHTINGS_GEO_TOLERANCE_DEFAULT must be a finite number >= 0"
                    .to_string(),
            });
        }

        let ensure_indexes = parse_bool(kv.get("SIGHTINGS_ENSURE_INDEXES")).unwrap_or(true);

        Ok(Self {
            bind_addr,
            mongo_uri,
            mongo_db,
            collection,
            connect_timeout_ms,
            query_timeout_ms,
            result_cap,
            group_cap,
            list_default_limit,
            geo_tolerance_default,
            ensure_indexes,
        })
    }

    pub fn store_config(&self) -> MongoStoreConfig {
        MongoStoreConfig {
            uri: self.mongo_uri.clone(),
            database: self.mongo_db.clone(),
            collection: self.collection.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            app_name: Some("sightings-gateway".to_string()),
        }
    }

    pub fn query_limits(&self) -> QueryLimits {
        QueryLimits {
            result_cap: self.result_cap,
            group_cap: self.group_cap,
            list_default_limit: self.list_default_limit,
            geo_tolerance_default: self.geo_tolerance_default,
            deadline: Duration::from_millis(self.query_timeout_ms),
        }
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn nonempty_or(kv: &HashMap<String, String>, key: &str, default: &str) -> String {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_f64(value: Option<&String>, default: f64, key: &'static str) -> Result<f64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<f64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a number", key),
        }),
    }
}

fn parse_bool(value: Option<&String>) -> Option<bool> {
    let value = value.map(|v| v.trim()).filter(|v| !v.is_empty())?;

    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}
