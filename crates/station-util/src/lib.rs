use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::warn;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_API_PREFIX: &str = "/api";

pub fn env_override(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local/share/station")
    } else {
        PathBuf::from("/tmp/station")
    }
}

pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

pub fn state_file_path(file_name: &str) -> PathBuf {
    state_dir().join(file_name)
}

/// Joins a base URL, an API prefix and an endpoint without doubling slashes.
///
/// An endpoint that already starts with the prefix is not prefixed again, and
/// an empty prefix addresses routes mounted at the server root.
pub fn join_url(base: &str, prefix: &str, endpoint: &str) -> String {
    let base = base.trim_end_matches('/');
    let prefix = normalize_prefix(prefix);
    let endpoint = if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{endpoint}")
    };
    if prefix.is_empty() || endpoint.starts_with(&format!("{prefix}/")) {
        format!("{base}{endpoint}")
    } else {
        format!("{base}{prefix}{endpoint}")
    }
}

pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    fs::write(&tmp, data)?;
    if let Err(err) = fs::rename(&tmp, path) {
        warn!("Failed to replace {}: {err}", path.display());
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

/// Logs go to stderr so command output on stdout stays parseable.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .try_init()
        .map_err(|err| err.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_inserts_prefix_once() {
        assert_eq!(
            join_url("http://host:8080/", "/api", "/installer/tasks"),
            "http://host:8080/api/installer/tasks"
        );
        assert_eq!(
            join_url("http://host:8080", "api/", "installer/tasks"),
            "http://host:8080/api/installer/tasks"
        );
        assert_eq!(
            join_url("http://host:8080", "/api", "/api/dashboard"),
            "http://host:8080/api/dashboard"
        );
    }

    #[test]
    fn join_url_with_empty_prefix_targets_root() {
        assert_eq!(join_url("http://host", "", "/health"), "http://host/health");
        assert_eq!(join_url("http://host", "/", "health"), "http://host/health");
    }

    #[test]
    fn write_json_atomic_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state/out.json");
        write_json_atomic(&path, &serde_json::json!({"ok": true})).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"ok\": true"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn write_json_atomic_cleans_up_when_target_is_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken.json");
        fs::create_dir_all(path.join("occupied")).unwrap();
        assert!(write_json_atomic(&path, &serde_json::json!({"ok": true})).is_err());
        assert!(path.is_dir());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn init_tracing_reports_second_install() {
        let _ = init_tracing();
        assert!(init_tracing().is_err());
    }
}
