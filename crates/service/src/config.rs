use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::scan_logic::ScanTuning;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub solr_url: String,
    pub solr_app_id: String,
    pub solr_timeout_ms: u64,
    pub vipcore_endpoint: String,
    pub vipcore_timeout_ms: u64,
    pub user_agent: String,
    pub max_count: usize,
    pub default_count: usize,
    pub parallel_hitcount_requests: usize,
    pub fetch_extra: usize,
    pub fetch_extra_divisor: usize,
    pub in_flight_overhead: usize,
    pub drain_timeout_ms: u64,
    pub profile_cache_ttl_ms: u64,
    pub profile_cache_error_ttl_ms: u64,
    pub profile_cache_max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl ServiceConfig {
    pub fn load() -> Result<Self, StartupError> {
        let file_kv = match std::env::var("SCAN_CONFIG_PATH") {
            Ok(config_path) if !config_path.trim().is_empty() => {
                parse_env_file(config_path.trim())?
            }
            _ => HashMap::new(),
        };

        Self::from_kv(&merge_sources(file_kv, std::env::vars()))
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("SCAN_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            "SCAN_BIND_ADDR",
        )?;

        let solr_url = require_nonempty(kv, "SOLR_URL")?;
        let solr_app_id = require_nonempty(kv, "SOLR_APPID")?;
        let vipcore_endpoint = require_nonempty(kv, "VIPCORE_ENDPOINT")?;

        let user_agent = kv
            .get("USER_AGENT")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or("ScanService/0.1")
            .to_string();

        let solr_timeout_ms = parse_u64(kv.get("SOLR_TIMEOUT_MS"), 5000, "SOLR_TIMEOUT_MS")?;
        let vipcore_timeout_ms =
            parse_u64(kv.get("VIPCORE_TIMEOUT_MS"), 2000, "VIPCORE_TIMEOUT_MS")?;

        let max_count = parse_positive(kv.get("MAX_COUNT"), 100, "MAX_COUNT")?;
        let default_count = parse_positive(kv.get("DEFAULT_COUNT"), 10, "DEFAULT_COUNT")?;
        let parallel_hitcount_requests = parse_positive(
            kv.get("PARALLEL_HITCOUNT_REQUESTS"),
            20,
            "PARALLEL_HITCOUNT_REQUESTS",
        )?;

        let fetch_extra = parse_usize(kv.get("SCAN_FETCH_EXTRA"), 5, "SCAN_FETCH_EXTRA")?;
        let fetch_extra_divisor = parse_positive(
            kv.get("SCAN_FETCH_EXTRA_DIVISOR"),
            8,
            "SCAN_FETCH_EXTRA_DIVISOR",
        )?;
        let in_flight_overhead = parse_usize(
            kv.get("SCAN_IN_FLIGHT_OVERHEAD"),
            3,
            "SCAN_IN_FLIGHT_OVERHEAD",
        )?;
        let drain_timeout_ms = parse_u64(
            kv.get("SCAN_DRAIN_TIMEOUT_MS"),
            30_000,
            "SCAN_DRAIN_TIMEOUT_MS",
        )?;
        if drain_timeout_ms == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SCAN_DRAIN_TIMEOUT_MS must be >= 1".to_string(),
            });
        }

        let profile_cache_ttl_ms = parse_u64(
            kv.get("PROFILE_CACHE_TTL_MS"),
            5 * 60 * 1000,
            "PROFILE_CACHE_TTL_MS",
        )?;
        let profile_cache_error_ttl_ms = parse_u64(
            kv.get("PROFILE_CACHE_ERROR_TTL_MS"),
            10_000,
            "PROFILE_CACHE_ERROR_TTL_MS",
        )?;
        let profile_cache_max_entries = parse_usize(
            kv.get("PROFILE_CACHE_MAX_ENTRIES"),
            1024,
            "PROFILE_CACHE_MAX_ENTRIES",
        )?;

        Ok(Self {
            bind_addr,
            solr_url,
            solr_app_id,
            solr_timeout_ms,
            vipcore_endpoint,
            vipcore_timeout_ms,
            user_agent,
            max_count,
            default_count,
            parallel_hitcount_requests,
            fetch_extra,
            fetch_extra_divisor,
            in_flight_overhead,
            drain_timeout_ms,
            profile_cache_ttl_ms,
            profile_cache_error_ttl_ms,
            profile_cache_max_entries,
        })
    }

    pub fn scan_tuning(&self) -> ScanTuning {
        ScanTuning {
            fetch_extra: self.fetch_extra,
            fetch_extra_divisor: self.fetch_extra_divisor,
            in_flight_overhead: self.in_flight_overhead,
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }
}

/// Environment entries win over file entries.
fn merge_sources(
    file_kv: HashMap<String, String>,
    env: impl IntoIterator<Item = (String, String)>,
) -> HashMap<String, String> {
    let mut merged = file_kv;
    merged.extend(env);
    merged
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

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    let value = kv.get(key).map(|v| v.trim()).unwrap_or("");
    if value.is_empty() {
        return Err(StartupError {
            code: "ERR_MISSING_CONFIG",
            message: format!("missing required config key {}", key),
        });
    }

    Ok(value.to_string())
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_usize(
    value: Option<&String>,
    default: usize,
    key: &'static str,
) -> Result<usize, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<usize>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_positive(
    value: Option<&String>,
    default: usize,
    key: &'static str,
) -> Result<usize, StartupError> {
    let parsed = parse_usize(value, default, key)?;
    if parsed == 0 {
        return Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} should be at least 1", key),
        });
    }
    Ok(parsed)
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

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_ok_env() -> HashMap<String, String> {
        HashMap::from([
            (
                "SOLR_URL".to_string(),
                "http://localhost:8983/solr/scan".to_string(),
            ),
            ("SOLR_APPID".to_string(), "scan-service".to_string()),
            (
                "VIPCORE_ENDPOINT".to_string(),
                "http://localhost:8080/api".to_string(),
            ),
        ])
    }

    #[test]
    fn minimal_env_uses_defaults() {
        let config = ServiceConfig::from_kv(&minimal_ok_env()).expect("config should load");
        assert_eq!(config.max_count, 100);
        assert_eq!(config.default_count, 10);
        assert_eq!(config.parallel_hitcount_requests, 20);
        assert_eq!(config.user_agent, "ScanService/0.1");

        let tuning = config.scan_tuning();
        assert_eq!(tuning.fetch_extra, 5);
        assert_eq!(tuning.fetch_extra_divisor, 8);
        assert_eq!(tuning.in_flight_overhead, 3);
    }

    #[test]
    fn missing_solr_url_fails() {
        let mut env = minimal_ok_env();
        env.remove("SOLR_URL");
        let err = ServiceConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_MISSING_CONFIG");
        assert!(err.message.contains("SOLR_URL"));
    }

    #[test]
    fn zero_max_count_fails() {
        let mut env = minimal_ok_env();
        env.insert("MAX_COUNT".to_string(), "0".to_string());
        let err = ServiceConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }

    #[test]
    fn non_numeric_parallelism_fails() {
        let mut env = minimal_ok_env();
        env.insert(
            "PARALLEL_HITCOUNT_REQUESTS".to_string(),
            "lots".to_string(),
        );
        let err = ServiceConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }

    #[test]
    fn quoted_file_values_are_unwrapped() {
        assert_eq!(strip_quotes("\"abc\""), "abc");
        assert_eq!(strip_quotes("'abc'"), "abc");
        assert_eq!(strip_quotes("\"abc"), "\"abc");
    }

    fn write_temp_config(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "scan_service_config_{}_{}.env",
            std::process::id(),
            name
        ));
        std::fs::write(&path, contents).expect("temp config should be writable");
        path
    }

    #[test]
    fn env_file_skips_comments_and_blank_lines() {
        let path = write_temp_config(
            "comments",
            "# index\n\nSOLR_URL=http://solr:8983/solr/scan\n  # indented comment\nSOLR_APPID = 'scan'\n",
        );
        let kv = parse_env_file(path.to_str().expect("utf-8 path")).expect("file should parse");
        let _ = std::fs::remove_file(&path);

        assert_eq!(kv.len(), 2);
        assert_eq!(
            kv.get("SOLR_URL").map(String::as_str),
            Some("http://solr:8983/solr/scan")
        );
        assert_eq!(kv.get("SOLR_APPID").map(String::as_str), Some("scan"));
    }

    #[test]
    fn env_file_line_without_equals_fails() {
        let path = write_temp_config("no_equals", "SOLR_URL=http://solr\nSOLR_APPID\n");
        let err = parse_env_file(path.to_str().expect("utf-8 path")).unwrap_err();
        let _ = std::fs::remove_file(&path);

        assert_eq!(err.code, "ERR_CONFIG_FILE_PARSE");
        assert!(err.message.contains("line 2"));
    }

    #[test]
    fn env_file_empty_key_fails() {
        let path = write_temp_config("empty_key", "  =value\n");
        let err = parse_env_file(path.to_str().expect("utf-8 path")).unwrap_err();
        let _ = std::fs::remove_file(&path);

        assert_eq!(err.code, "ERR_CONFIG_FILE_PARSE");
        assert!(err.message.contains("empty key"));
    }

    #[test]
    fn missing_env_file_fails_to_read() {
        let err = parse_env_file("/nonexistent/scan-service.env").unwrap_err();
        assert_eq!(err.code, "ERR_CONFIG_FILE_READ");
    }

    #[test]
    fn environment_overrides_file_values() {
        let path = write_temp_config(
            "override",
            "SOLR_URL=http://file-solr/solr/scan\nSOLR_APPID=file-app\nVIPCORE_ENDPOINT=http://vipcore/api\nMAX_COUNT=50\n",
        );
        let file_kv = parse_env_file(path.to_str().expect("utf-8 path")).expect("file should parse");
        let _ = std::fs::remove_file(&path);

        let merged = merge_sources(
            file_kv,
            [
                ("SOLR_APPID".to_string(), "env-app".to_string()),
                ("MAX_COUNT".to_string(), "75".to_string()),
            ],
        );
        let config = ServiceConfig::from_kv(&merged).expect("config should load");

        assert_eq!(config.solr_app_id, "env-app");
        assert_eq!(config.max_count, 75);
        assert_eq!(config.solr_url, "http://file-solr/solr/scan");
        assert_eq!(config.vipcore_endpoint, "http://vipcore/api");
    }
}
