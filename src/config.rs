//! YAML configuration loading and validation.
//!
//! Mirrors the validation order of the system this service replaces: reject
//! bad values eagerly at load time rather than discovering them mid-run.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;

const SERVER_TAG_MAX_LEN: usize = 64;

fn server_tag_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,64}$").unwrap())
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyntaxHighlightingEntry {
    pub field: String,
    #[serde(default)]
    pub regex: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawServers {
    #[serde(default)]
    classic: Vec<RawClassicServer>,
    #[serde(default)]
    dynamic: Vec<RawDynamicServer>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawClassicServer {
    #[serde(rename = "server-tag")]
    server_tag: String,
    #[serde(rename = "display-name")]
    display_name: Option<String>,
    #[serde(rename = "log-file-path")]
    log_file_path: PathBuf,
    #[serde(rename = "archived-logs-dir-path")]
    archived_logs_dir_path: Option<PathBuf>,
    #[serde(rename = "archived-logs-filename-format")]
    archived_logs_filename_format: Option<String>,
    #[serde(default, rename = "syntax-highlighting")]
    syntax_highlighting: Vec<SyntaxHighlightingEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDynamicServer {
    #[serde(rename = "server-tag")]
    server_tag: String,
    #[serde(rename = "display-name")]
    display_name: Option<String>,
    #[serde(rename = "log-file-pattern")]
    log_file_pattern: String,
    #[serde(rename = "instance-identifier")]
    instance_identifier: String,
    #[serde(rename = "archived-logs-root-dir")]
    archived_logs_root_dir: Option<PathBuf>,
    #[serde(rename = "archived-logs-file-pattern")]
    archived_logs_file_pattern: Option<String>,
    #[serde(default, rename = "syntax-highlighting")]
    syntax_highlighting: Vec<SyntaxHighlightingEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default, rename = "url-prefix")]
    url_prefix: String,
    #[serde(default)]
    debug: bool,
    #[serde(default = "default_delay", rename = "delay-before-rewatch")]
    delay_before_rewatch: String,
    #[serde(default, rename = "path-prefix")]
    path_prefix: String,
    servers: RawServers,
}

fn default_port() -> u16 {
    8080
}

fn default_delay() -> String {
    "1s".to_string()
}

/// A server whose log is tailed as a single, long-lived file.
#[derive(Debug, Clone)]
pub struct ClassicServerConfig {
    pub server_tag: String,
    pub display_name: String,
    pub log_file_path: PathBuf,
    pub archived_logs_dir_path: Option<PathBuf>,
    pub archived_logs_filename_format: Option<String>,
    pub syntax_highlighting: Vec<SyntaxHighlightingEntry>,
}

impl ClassicServerConfig {
    pub fn archives_enabled(&self) -> bool {
        self.archived_logs_dir_path.is_some()
    }
}

/// A server whose set of log files grows and shrinks as instances come and go.
#[derive(Debug, Clone)]
pub struct DynamicServerConfig {
    pub server_tag: String,
    pub display_name: String,
    pub log_file_pattern: String,
    pub instance_identifier: Regex,
    pub archived_logs_root_dir: Option<PathBuf>,
    pub archived_logs_file_pattern: Option<String>,
    pub syntax_highlighting: Vec<SyntaxHighlightingEntry>,
}

impl DynamicServerConfig {
    pub fn archives_enabled(&self) -> bool {
        self.archived_logs_root_dir.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub url_prefix: String,
    pub debug: bool,
    pub delay_before_rewatch: Duration,
    pub classic: Vec<ClassicServerConfig>,
    pub dynamic: Vec<DynamicServerConfig>,
}

/// Load and validate configuration from a YAML file on disk.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let raw_bytes = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawConfig = serde_yaml::from_str(&raw_bytes)?;
    build_config(raw)
}

fn build_config(raw: RawConfig) -> Result<Config, ConfigError> {
    let url_prefix = if raw.url_prefix == "/" {
        String::new()
    } else {
        raw.url_prefix
    };

    let delay_before_rewatch = parse_duration(&raw.delay_before_rewatch)
        .ok_or_else(|| ConfigError::InvalidDelay(raw.delay_before_rewatch.clone()))?;

    if raw.servers.classic.is_empty() && raw.servers.dynamic.is_empty() {
        return Err(ConfigError::NoServers);
    }

    let mut seen_tags = std::collections::HashSet::new();
    let mut classic = Vec::with_capacity(raw.servers.classic.len());
    for server in raw.servers.classic {
        let cfg = load_classic(server, &raw.path_prefix)?;
        if !seen_tags.insert(cfg.server_tag.clone()) {
            return Err(ConfigError::DuplicateTag {
                tag: cfg.server_tag,
            });
        }
        classic.push(cfg);
    }

    let mut dynamic = Vec::with_capacity(raw.servers.dynamic.len());
    for server in raw.servers.dynamic {
        let cfg = load_dynamic(server, &raw.path_prefix)?;
        if !seen_tags.insert(cfg.server_tag.clone()) {
            return Err(ConfigError::DuplicateTag {
                tag: cfg.server_tag,
            });
        }
        dynamic.push(cfg);
    }

    Ok(Config {
        port: raw.port,
        url_prefix,
        debug: raw.debug,
        delay_before_rewatch,
        classic,
        dynamic,
    })
}

fn check_tag(tag: &str) -> Result<(), ConfigError> {
    if tag.is_empty() || tag.len() > SERVER_TAG_MAX_LEN || !server_tag_re().is_match(tag) {
        return Err(ConfigError::InvalidTag {
            tag: tag.to_string(),
        });
    }
    Ok(())
}

fn load_syntax_highlighting(
    tag: &str,
    entries: Vec<SyntaxHighlightingEntry>,
) -> Vec<SyntaxHighlightingEntry> {
    entries
        .into_iter()
        .filter_map(|mut entry| {
            if entry.field.is_empty() {
                warn!(tag, "dropping syntax-highlighting entry with empty field");
                return None;
            }
            if entry.regex.is_empty() {
                entry.regex = "/.^/".to_string();
            }
            Some(entry)
        })
        .collect()
}

/// Prepends `path_prefix` to a configured path, the way a container mount
/// point is joined in front of every log location. A empty prefix is a no-op.
fn with_path_prefix(path_prefix: &str, path: &Path) -> PathBuf {
    if path_prefix.is_empty() {
        path.to_path_buf()
    } else {
        Path::new(path_prefix).join(path)
    }
}

fn load_classic(
    raw: RawClassicServer,
    path_prefix: &str,
) -> Result<ClassicServerConfig, ConfigError> {
    check_tag(&raw.server_tag)?;
    let display_name = raw.display_name.unwrap_or_else(|| raw.server_tag.clone());
    let syntax_highlighting = load_syntax_highlighting(&raw.server_tag, raw.syntax_highlighting);

    let log_file_path = with_path_prefix(path_prefix, &raw.log_file_path);
    if !log_file_path.is_file() {
        return Err(ConfigError::MissingLogFile {
            tag: raw.server_tag,
            path: log_file_path,
        });
    }

    let archived_logs_dir_path = raw
        .archived_logs_dir_path
        .as_ref()
        .map(|dir| with_path_prefix(path_prefix, dir));
    let archives_enabled = archived_logs_dir_path.is_some();
    if let Some(dir) = &archived_logs_dir_path
        && !dir.is_dir()
    {
        return Err(ConfigError::MissingArchiveDir {
            tag: raw.server_tag,
            path: dir.clone(),
        });
    }
    if archives_enabled && raw.archived_logs_filename_format.as_deref().unwrap_or("").is_empty() {
        return Err(ConfigError::MissingArchiveFormat {
            tag: raw.server_tag,
        });
    }

    Ok(ClassicServerConfig {
        server_tag: raw.server_tag,
        display_name,
        log_file_path,
        archived_logs_dir_path,
        archived_logs_filename_format: raw.archived_logs_filename_format,
        syntax_highlighting,
    })
}

fn load_dynamic(
    raw: RawDynamicServer,
    path_prefix: &str,
) -> Result<DynamicServerConfig, ConfigError> {
    check_tag(&raw.server_tag)?;
    let display_name = raw.display_name.unwrap_or_else(|| raw.server_tag.clone());
    let syntax_highlighting = load_syntax_highlighting(&raw.server_tag, raw.syntax_highlighting);

    let log_file_pattern = if path_prefix.is_empty() {
        raw.log_file_pattern.clone()
    } else {
        Path::new(path_prefix)
            .join(&raw.log_file_pattern)
            .to_string_lossy()
            .into_owned()
    };
    glob::Pattern::new(&log_file_pattern).map_err(|source| ConfigError::InvalidPattern {
        tag: raw.server_tag.clone(),
        pattern: log_file_pattern.clone(),
        source,
    })?;

    let instance_identifier =
        Regex::new(&raw.instance_identifier).map_err(|source| ConfigError::InvalidInstanceRegex {
            tag: raw.server_tag.clone(),
            source,
        })?;
    if instance_identifier.capture_names().flatten().all(|n| n != "id") {
        return Err(ConfigError::MissingIdGroup {
            tag: raw.server_tag,
        });
    }

    let archived_logs_root_dir = raw
        .archived_logs_root_dir
        .as_ref()
        .map(|dir| with_path_prefix(path_prefix, dir));
    let archives_enabled = archived_logs_root_dir.is_some();
    if archives_enabled
        && raw
            .archived_logs_file_pattern
            .as_deref()
            .unwrap_or("")
            .is_empty()
    {
        return Err(ConfigError::MissingArchiveFormat {
            tag: raw.server_tag,
        });
    }

    Ok(DynamicServerConfig {
        server_tag: raw.server_tag,
        display_name,
        log_file_pattern,
        instance_identifier,
        archived_logs_root_dir,
        archived_logs_file_pattern: raw.archived_logs_file_pattern,
        syntax_highlighting,
    })
}

/// Parses durations like `1s`, `500ms`, `2m`. Rejects negative values.
fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if let Some(neg) = input.strip_prefix('-') {
        let _ = neg;
        return None;
    }
    let split_at = input.find(|c: char| !c.is_ascii_digit())?;
    let (num, unit) = input.split_at(split_at);
    let num: u64 = num.parse().ok()?;
    match unit {
        "ns" => Some(Duration::from_nanos(num)),
        "us" | "µs" => Some(Duration::from_micros(num)),
        "ms" => Some(Duration::from_millis(num)),
        "s" => Some(Duration::from_secs(num)),
        "m" => Some(Duration::from_secs(num * 60)),
        "h" => Some(Duration::from_secs(num * 3600)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_durations() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("-1s"), None);
        assert_eq!(parse_duration("banana"), None);
    }

    #[test]
    fn rejects_bad_tags() {
        assert!(check_tag("").is_err());
        assert!(check_tag("has space").is_err());
        assert!(check_tag(&"x".repeat(65)).is_err());
        assert!(check_tag("ok-tag_1.2").is_ok());
    }

    #[test]
    fn empty_regex_normalizes_to_never_match() {
        let entries = load_syntax_highlighting(
            "app",
            vec![SyntaxHighlightingEntry {
                field: "level".to_string(),
                regex: String::new(),
            }],
        );
        assert_eq!(entries[0].regex, "/.^/");
    }

    #[test]
    fn empty_field_is_dropped() {
        let entries = load_syntax_highlighting(
            "app",
            vec![SyntaxHighlightingEntry {
                field: String::new(),
                regex: "foo".to_string(),
            }],
        );
        assert!(entries.is_empty());
    }

    #[test]
    fn path_prefix_is_joined_in_front_of_log_file_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.log"), b"").unwrap();

        let raw = RawClassicServer {
            server_tag: "app".to_string(),
            display_name: None,
            log_file_path: PathBuf::from("app.log"),
            archived_logs_dir_path: None,
            archived_logs_filename_format: None,
            syntax_highlighting: Vec::new(),
        };
        let cfg = load_classic(raw, &dir.path().to_string_lossy()).unwrap();
        assert_eq!(cfg.log_file_path, dir.path().join("app.log"));
    }

    #[test]
    fn missing_id_group_is_rejected() {
        let raw = RawDynamicServer {
            server_tag: "lobby".to_string(),
            display_name: None,
            log_file_pattern: "/tmp/*.log".to_string(),
            instance_identifier: r"srv-(\d+)".to_string(),
            archived_logs_root_dir: None,
            archived_logs_file_pattern: None,
            syntax_highlighting: Vec::new(),
        };
        assert!(matches!(
            load_dynamic(raw, ""),
            Err(ConfigError::MissingIdGroup { .. })
        ));
    }
}
