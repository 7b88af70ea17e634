//! Config - 環境変数（と任意の `.env`）から読む設定
//!
//! すべての項目にデフォルトがあり、何も設定しなくても 1 台構成で動く。
//! 時間は humantime 形式（`30m`, `2h`）か秒数（`1800`）で書ける。
//!
//! | 変数 | デフォルト |
//! |---|---|
//! | `DOCSYNC_DATA_DIR` | `data` |
//! | `DOCSYNC_DOWNLOAD_INTERVAL` | `30m` |
//! | `DOCSYNC_MAX_INTERVAL` | `2h` |
//! | `DOCSYNC_EMPTY_CYCLE_THRESHOLD` | `5` |
//! | `DOCSYNC_LOCK_TIMEOUT` | `30m` |
//! | `DOCSYNC_FAILED_COOLDOWN` | (なし) |
//! | `DOCSYNC_MAX_RETRIES` | `3` |
//! | `DOCSYNC_RETRY_DELAY` | `2s` |
//! | `DOCSYNC_ENABLE_DISTRIBUTED_LOCK` | `true` |
//! | `DOCSYNC_MACHINE_ID` | `{hostname}_{address}` |
//! | `DOCSYNC_CATEGORIES` | `ledger=industry,forestry;estimate=industry,forestry` |
//!
//! ファイルの場所は `DOCSYNC_HISTORY_FILE`, `DOCSYNC_UPLOAD_HISTORY_FILE`,
//! `DOCSYNC_LEDGER_FILE`, `DOCSYNC_UPLOAD_LEDGER_FILE`, `DOCSYNC_OUTPUT_DIR`,
//! `DOCSYNC_INBOX_DIR`, `DOCSYNC_TARGET_DIR` で個別に上書きできる。

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::harvest::CategoryPages;
use crate::app::retry::RetryPolicy;
use crate::app::scheduler::BackoffConfig;
use crate::domain::{Category, ConfigError, MachineIdentity};

const PREFIX: &str = "DOCSYNC_";

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub download_interval: Duration,
    pub max_interval: Duration,
    pub empty_cycle_threshold: u32,

    pub lock_timeout: Duration,
    pub failed_cooldown: Option<Duration>,
    pub enable_distributed_lock: bool,
    /// Overrides the detected machine identity.
    pub machine_id: Option<String>,

    pub max_retries: u32,
    pub retry_delay: Duration,

    /// Harvest history (what this machine downloaded).
    pub history_file: PathBuf,
    /// Upload history (what this machine pushed).
    pub upload_history_file: PathBuf,
    /// Shared lock ledger for harvesting; put it on the shared drive.
    pub ledger_file: PathBuf,
    /// Shared ledger of completed uploads.
    pub upload_ledger_file: PathBuf,
    /// Where harvested outputs are kept until uploaded.
    pub downloads_dir: PathBuf,
    pub inbox_dir: PathBuf,
    pub target_dir: PathBuf,

    /// Categories in harvest order, each with its source pages.
    pub categories: Vec<CategoryPages>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::with_data_dir(Path::new("data"))
    }
}

impl SyncConfig {
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            download_interval: Duration::from_secs(1800),
            max_interval: Duration::from_secs(7200),
            empty_cycle_threshold: 5,
            lock_timeout: Duration::from_secs(1800),
            failed_cooldown: None,
            enable_distributed_lock: true,
            machine_id: None,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            history_file: data_dir.join("harvest_history.json"),
            upload_history_file: data_dir.join("upload_history.json"),
            ledger_file: data_dir.join("locks.json"),
            upload_ledger_file: data_dir.join("upload_locks.json"),
            downloads_dir: data_dir.join("downloads"),
            inbox_dir: data_dir.join("inbox"),
            target_dir: data_dir.join("target"),
            categories: vec![
                CategoryPages::new("ledger", ["industry", "forestry"]),
                CategoryPages::new("estimate", ["industry", "forestry"]),
            ],
        }
    }

    /// Load `.env` (or `env_file`) if present, then read the process environment.
    pub fn from_env(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        let loaded = match env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        }
        .or_else(|err| match err {
            dotenvy::Error::Io(_) => Ok(false),
            other => Err(other),
        })?;
        if loaded {
            tracing::debug!("loaded env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (keys include the `DOCSYNC_` prefix).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(&format!("{PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = get("DATA_DIR").map_or_else(|| PathBuf::from("data"), PathBuf::from);
        let mut config = Self::with_data_dir(&data_dir);

        if let Some(v) = get("DOWNLOAD_INTERVAL") {
            config.download_interval = parse_duration("DOWNLOAD_INTERVAL", &v)?;
        }
        if let Some(v) = get("MAX_INTERVAL") {
            config.max_interval = parse_duration("MAX_INTERVAL", &v)?;
        }
        if let Some(v) = get("EMPTY_CYCLE_THRESHOLD") {
            config.empty_cycle_threshold = parse_number("EMPTY_CYCLE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("LOCK_TIMEOUT") {
            config.lock_timeout = parse_duration("LOCK_TIMEOUT", &v)?;
        }
        if let Some(v) = get("FAILED_COOLDOWN") {
            config.failed_cooldown = Some(parse_duration("FAILED_COOLDOWN", &v)?);
        }
        if let Some(v) = get("ENABLE_DISTRIBUTED_LOCK") {
            config.enable_distributed_lock = parse_bool("ENABLE_DISTRIBUTED_LOCK", &v)?;
        }
        config.machine_id = get("MACHINE_ID");
        if let Some(v) = get("MAX_RETRIES") {
            config.max_retries = parse_number("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_DELAY") {
            config.retry_delay = parse_duration("RETRY_DELAY", &v)?;
        }

        let paths: [(&str, &mut PathBuf); 7] = [
            ("HISTORY_FILE", &mut config.history_file),
            ("UPLOAD_HISTORY_FILE", &mut config.upload_history_file),
            ("LEDGER_FILE", &mut config.ledger_file),
            ("UPLOAD_LEDGER_FILE", &mut config.upload_ledger_file),
            ("OUTPUT_DIR", &mut config.downloads_dir),
            ("INBOX_DIR", &mut config.inbox_dir),
            ("TARGET_DIR", &mut config.target_dir),
        ];
        for (name, slot) in paths {
            if let Some(v) = get(name) {
                *slot = PathBuf::from(v);
            }
        }

        if let Some(v) = get("CATEGORIES") {
            config.categories = parse_categories(&v)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.download_interval.is_zero() {
            return Err(invalid("DOWNLOAD_INTERVAL", "must be greater than zero"));
        }
        if self.max_interval < self.download_interval {
            return Err(invalid("MAX_INTERVAL", "must not be shorter than DOWNLOAD_INTERVAL"));
        }
        if self.max_retries == 0 {
            return Err(invalid("MAX_RETRIES", "must be at least 1"));
        }
        if self.categories.is_empty() {
            return Err(invalid("CATEGORIES", "at least one category is required"));
        }
        Ok(())
    }

    pub fn machine_identity(&self) -> MachineIdentity {
        match &self.machine_id {
            Some(id) => MachineIdentity::new(id.clone()),
            None => MachineIdentity::detect(),
        }
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_interval: self.download_interval,
            max_interval: self.max_interval,
            empty_cycle_threshold: self.empty_cycle_threshold,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }

    pub fn category_names(&self) -> Vec<Category> {
        self.categories.iter().map(|c| c.category.clone()).collect()
    }

    /// Category a legacy (bare list) history file belongs to.
    pub fn legacy_category(&self) -> Category {
        self.categories
            .first()
            .map(|c| c.category.clone())
            .unwrap_or_else(|| Category::new("ledger"))
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: format!("{PREFIX}{key}"),
        message: message.into(),
    }
}

/// `1800` (seconds) or humantime (`30m`, `1h 30m`).
fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|e| invalid(key, e.to_string()))
}

fn parse_number(key: &str, raw: &str) -> Result<u32, ConfigError> {
    raw.parse().map_err(|e: std::num::ParseIntError| invalid(key, e.to_string()))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(key, format!("expected true/false, got {other:?}"))),
    }
}

/// `ledger=industry,forestry;estimate=industry`
fn parse_categories(raw: &str) -> Result<Vec<CategoryPages>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| -> Result<CategoryPages, ConfigError> {
            let (name, pages) = part
                .split_once('=')
                .ok_or_else(|| invalid("CATEGORIES", format!("missing '=' in {part:?}")))?;
            let name = name.trim();
            let pages: Vec<&str> = pages
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            if name.is_empty() || pages.is_empty() {
                return Err(invalid("CATEGORIES", format!("empty category or pages in {part:?}")));
            }
            Ok(CategoryPages::new(name, pages))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<SyncConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{PREFIX}{k}"), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.download_interval, Duration::from_secs(1800));
        assert_eq!(config.max_interval, Duration::from_secs(7200));
        assert_eq!(config.empty_cycle_threshold, 5);
        assert_eq!(config.lock_timeout, Duration::from_secs(1800));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert!(config.enable_distributed_lock);
        assert_eq!(config.failed_cooldown, None);
        assert_eq!(config.legacy_category(), Category::new("ledger"));
        assert_eq!(config.history_file, PathBuf::from("data/harvest_history.json"));
    }

    #[rstest]
    #[case("1800", 1800)]
    #[case("30m", 1800)]
    #[case("1h 30m", 5400)]
    #[case("2s", 2)]
    fn durations_accept_seconds_or_humantime(#[case] raw: &str, #[case] secs: u64) {
        assert_eq!(
            parse_duration("X", raw).unwrap(),
            Duration::from_secs(secs)
        );
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("DATA_DIR", "/srv/docsync"),
            ("LEDGER_FILE", "/mnt/shared/locks.json"),
            ("DOWNLOAD_INTERVAL", "10m"),
            ("ENABLE_DISTRIBUTED_LOCK", "false"),
            ("MACHINE_ID", "office-pc"),
            ("FAILED_COOLDOWN", "15m"),
            ("CATEGORIES", "ledger=a,b; estimate=c"),
        ])
        .unwrap();
        assert_eq!(config.download_interval, Duration::from_secs(600));
        assert!(!config.enable_distributed_lock);
        assert_eq!(config.machine_identity().as_str(), "office-pc");
        assert_eq!(config.failed_cooldown, Some(Duration::from_secs(900)));
        assert_eq!(config.ledger_file, PathBuf::from("/mnt/shared/locks.json"));
        assert_eq!(
            config.history_file,
            PathBuf::from("/srv/docsync/harvest_history.json")
        );
        assert_eq!(config.categories.len(), 2);
        assert_eq!(config.categories[0].pages, vec!["a", "b"]);
        assert_eq!(config.categories[1].category, Category::new("estimate"));
    }

    #[rstest]
    #[case("DOWNLOAD_INTERVAL", "soon")]
    #[case("MAX_RETRIES", "-1")]
    #[case("MAX_RETRIES", "0")]
    #[case("ENABLE_DISTRIBUTED_LOCK", "maybe")]
    #[case("CATEGORIES", "ledger")]
    #[case("MAX_INTERVAL", "1m")]
    fn invalid_values_are_rejected(#[case] key: &str, #[case] value: &str) {
        let err = load(&[(key, value)]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");
    }

    #[test]
    fn derived_policies_follow_config() {
        let config = SyncConfig::default();
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.backoff(), BackoffConfig::default());
    }
}
