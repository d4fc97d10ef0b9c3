//! Typed session settings and incremental update payloads.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default listen interface when none is configured.
pub const DEFAULT_LISTEN_INTERFACE: &str = "0.0.0.0:6881";
/// Minimum history bucket width in seconds.
pub const MIN_HISTORY_INTERVAL_SECONDS: i32 = 60;
/// Last minute of a day, inclusive.
pub const LAST_MINUTE_OF_DAY: i32 = 24 * 60 - 1;

/// Peer connection encryption preference.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    /// Accept both plaintext and encrypted peers.
    #[default]
    Tolerated,
    /// Prefer encrypted peers, fall back to plaintext.
    Preferred,
    /// Only talk to encrypted peers.
    Required,
}

impl EncryptionMode {
    /// Numeric code used by the persisted settings table.
    #[must_use]
    pub const fn as_code(self) -> i32 {
        match self {
            Self::Tolerated => 0,
            Self::Preferred => 1,
            Self::Required => 2,
        }
    }

    /// Decode a persisted code; unknown values fall back to `Tolerated`.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Preferred,
            2 => Self::Required,
            _ => Self::Tolerated,
        }
    }
}

/// Proxy protocol used for outgoing connections.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    /// Direct connections.
    #[default]
    None,
    /// SOCKS4 proxy.
    Socks4,
    /// SOCKS5 proxy.
    Socks5,
    /// HTTP CONNECT proxy.
    Http,
}

impl ProxyType {
    /// Numeric code used by the persisted settings table.
    #[must_use]
    pub const fn as_code(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Socks4 => 1,
            Self::Socks5 => 2,
            Self::Http => 4,
        }
    }

    /// Decode a persisted code; unknown values disable the proxy.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Socks4,
            2 | 3 => Self::Socks5,
            4 | 5 => Self::Http,
            _ => Self::None,
        }
    }
}

/// Speed-history recording configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Whether buckets are recorded at all.
    pub enabled: bool,
    /// Bucket width in seconds (never below 60).
    pub interval_seconds: i32,
    /// Retention window in days; zero keeps everything.
    pub retention_days: i32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
            retention_days: 30,
        }
    }
}

/// Full mutable configuration of the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct CoreSettings {
    /// Destination directory for completed downloads.
    pub download_path: PathBuf,
    /// `host:port` the session listens on.
    pub listen_interface: String,
    /// Upper bound on how long the engine loop sleeps between ticks.
    pub idle_sleep_ms: u64,
    /// Global download limit in KiB/s.
    pub download_rate_limit_kbps: i32,
    /// Global upload limit in KiB/s.
    pub upload_rate_limit_kbps: i32,
    /// Whether the global download limit applies.
    pub download_rate_limit_enabled: bool,
    /// Whether the global upload limit applies.
    pub upload_rate_limit_enabled: bool,
    /// Alternate download limit in KiB/s.
    pub alt_download_rate_limit_kbps: i32,
    /// Alternate upload limit in KiB/s.
    pub alt_upload_rate_limit_kbps: i32,
    /// Manual alternate-speed switch.
    pub alt_speed_enabled: bool,
    /// Whether the alternate-speed schedule is active.
    pub alt_speed_time_enabled: bool,
    /// Minute of day the alternate schedule starts.
    pub alt_speed_time_begin: i32,
    /// Minute of day the alternate schedule ends.
    pub alt_speed_time_end: i32,
    /// Weekday mask, bit 0 is Sunday; zero means every day.
    pub alt_speed_time_day: i32,
    /// Peer encryption preference.
    pub encryption: EncryptionMode,
    /// Global connection limit; zero leaves the engine default.
    pub peer_limit: i32,
    /// Per-torrent unchoke slots; zero leaves the engine default.
    pub peer_limit_per_torrent: i32,
    /// Distributed hash table participation.
    pub dht_enabled: bool,
    /// Peer exchange.
    pub pex_enabled: bool,
    /// Local peer discovery.
    pub lpd_enabled: bool,
    /// uTP transport for incoming and outgoing connections.
    pub utp_enabled: bool,
    /// Maximum active downloads; zero means unlimited.
    pub download_queue_size: i32,
    /// Maximum active seeds; zero means unlimited.
    pub seed_queue_size: i32,
    /// Whether stalled torrents stop counting against queue slots.
    pub queue_stalled_enabled: bool,
    /// Inactivity window after which a torrent counts as stalled.
    pub queue_stalled_minutes: i32,
    /// Staging directory for unfinished downloads.
    pub incomplete_dir: PathBuf,
    /// Whether unfinished downloads use `incomplete_dir`.
    pub incomplete_dir_enabled: bool,
    /// Peer blocklist file.
    pub blocklist_path: PathBuf,
    /// Directory holding persisted state and metadata sidecars.
    pub state_path: PathBuf,
    /// Directory scanned for dropped `.torrent` files.
    pub watch_dir: PathBuf,
    /// Whether the watch directory is scanned.
    pub watch_dir_enabled: bool,
    /// Global seed ratio limit switch.
    pub seed_ratio_enabled: bool,
    /// Upload/download ratio at which seeding stops.
    pub seed_ratio_limit: f64,
    /// Global idle-seeding limit switch.
    pub seed_idle_enabled: bool,
    /// Idle minutes after which seeding stops.
    pub seed_idle_limit_minutes: i32,
    /// Outgoing proxy protocol.
    pub proxy_type: ProxyType,
    /// Proxy host.
    pub proxy_hostname: String,
    /// Proxy port.
    pub proxy_port: i32,
    /// Whether proxy credentials are sent.
    pub proxy_auth_enabled: bool,
    /// Proxy user name.
    pub proxy_username: String,
    /// Proxy password.
    pub proxy_password: String,
    /// Route peer and tracker connections through the proxy.
    pub proxy_peer_connections: bool,
    /// Whether speed history is recorded.
    pub history_enabled: bool,
    /// History bucket width in seconds.
    pub history_interval_seconds: i32,
    /// Days of history kept; zero keeps everything.
    pub history_retention_days: i32,
    /// Disk cache size in MiB.
    pub disk_cache_mb: i32,
    /// Threads used for piece hashing.
    pub hashing_threads: i32,
    /// Append `.part` to files that are still downloading.
    pub rename_partial_files: bool,
}

impl Default for CoreSettings {
    fn default() -> Self {
        let history = HistoryConfig::default();
        Self {
            download_path: PathBuf::from("data"),
            listen_interface: DEFAULT_LISTEN_INTERFACE.to_string(),
            idle_sleep_ms: 500,
            download_rate_limit_kbps: 0,
            upload_rate_limit_kbps: 0,
            download_rate_limit_enabled: false,
            upload_rate_limit_enabled: false,
            alt_download_rate_limit_kbps: 0,
            alt_upload_rate_limit_kbps: 0,
            alt_speed_enabled: false,
            alt_speed_time_enabled: false,
            alt_speed_time_begin: 0,
            alt_speed_time_end: 0,
            alt_speed_time_day: 0,
            encryption: EncryptionMode::Tolerated,
            peer_limit: 0,
            peer_limit_per_torrent: 0,
            dht_enabled: true,
            pex_enabled: true,
            lpd_enabled: true,
            utp_enabled: true,
            download_queue_size: 0,
            seed_queue_size: 0,
            queue_stalled_enabled: false,
            queue_stalled_minutes: 30,
            incomplete_dir: PathBuf::new(),
            incomplete_dir_enabled: false,
            blocklist_path: PathBuf::new(),
            state_path: PathBuf::new(),
            watch_dir: PathBuf::new(),
            watch_dir_enabled: false,
            seed_ratio_enabled: false,
            seed_ratio_limit: 0.0,
            seed_idle_enabled: false,
            seed_idle_limit_minutes: 0,
            proxy_type: ProxyType::None,
            proxy_hostname: String::new(),
            proxy_port: 0,
            proxy_auth_enabled: false,
            proxy_username: String::new(),
            proxy_password: String::new(),
            proxy_peer_connections: false,
            history_enabled: history.enabled,
            history_interval_seconds: history.interval_seconds,
            history_retention_days: history.retention_days,
            disk_cache_mb: 16,
            hashing_threads: 1,
            rename_partial_files: true,
        }
    }
}

impl CoreSettings {
    /// History configuration with the interval clamped to its minimum.
    #[must_use]
    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            enabled: self.history_enabled,
            interval_seconds: self.history_interval_seconds.max(MIN_HISTORY_INTERVAL_SECONDS),
            retention_days: self.history_retention_days.max(0),
        }
    }

    /// Directory new torrents are written to while downloading.
    #[must_use]
    pub fn staging_path(&self) -> &PathBuf {
        if self.incomplete_dir_enabled && !self.incomplete_dir.as_os_str().is_empty() {
            &self.incomplete_dir
        } else {
            &self.download_path
        }
    }
}

/// Partial settings update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionUpdate {
    /// Replacement for `CoreSettings::alt_download_rate_limit_kbps`.
    pub alt_speed_down_kbps: Option<i32>,
    /// Replacement for `CoreSettings::alt_upload_rate_limit_kbps`.
    pub alt_speed_up_kbps: Option<i32>,
    /// Replacement for `CoreSettings::alt_speed_enabled`.
    pub alt_speed_enabled: Option<bool>,
    /// Replacement for `CoreSettings::alt_speed_time_enabled`.
    pub alt_speed_time_enabled: Option<bool>,
    /// Replacement for `CoreSettings::alt_speed_time_begin`.
    pub alt_speed_time_begin: Option<i32>,
    /// Replacement for `CoreSettings::alt_speed_time_end`.
    pub alt_speed_time_end: Option<i32>,
    /// Replacement for `CoreSettings::alt_speed_time_day`.
    pub alt_speed_time_day: Option<i32>,
    /// Replacement for `CoreSettings::encryption`.
    pub encryption: Option<EncryptionMode>,
    /// Replacement for `CoreSettings::dht_enabled`.
    pub dht_enabled: Option<bool>,
    /// Replacement for `CoreSettings::pex_enabled`.
    pub pex_enabled: Option<bool>,
    /// Replacement for `CoreSettings::lpd_enabled`.
    pub lpd_enabled: Option<bool>,
    /// Replacement for `CoreSettings::utp_enabled`.
    pub utp_enabled: Option<bool>,
    /// Replacement for `CoreSettings::download_queue_size`.
    pub download_queue_size: Option<i32>,
    /// Replacement for `CoreSettings::seed_queue_size`.
    pub seed_queue_size: Option<i32>,
    /// Replacement for `CoreSettings::queue_stalled_enabled`.
    pub queue_stalled_enabled: Option<bool>,
    /// Replacement for `CoreSettings::queue_stalled_minutes`.
    pub queue_stalled_minutes: Option<i32>,
    /// Replacement for `CoreSettings::incomplete_dir`.
    pub incomplete_dir: Option<PathBuf>,
    /// Replacement for `CoreSettings::incomplete_dir_enabled`.
    pub incomplete_dir_enabled: Option<bool>,
    /// Replacement for `CoreSettings::watch_dir`.
    pub watch_dir: Option<PathBuf>,
    /// Replacement for `CoreSettings::watch_dir_enabled`.
    pub watch_dir_enabled: Option<bool>,
    /// Replacement for `CoreSettings::seed_ratio_enabled`.
    pub seed_ratio_enabled: Option<bool>,
    /// Replacement for `CoreSettings::seed_ratio_limit`.
    pub seed_ratio_limit: Option<f64>,
    /// Replacement for `CoreSettings::seed_idle_enabled`.
    pub seed_idle_enabled: Option<bool>,
    /// Replacement for `CoreSettings::seed_idle_limit_minutes`.
    pub seed_idle_limit: Option<i32>,
    /// Replacement for `CoreSettings::proxy_type`.
    pub proxy_type: Option<ProxyType>,
    /// Replacement for `CoreSettings::proxy_hostname`.
    pub proxy_hostname: Option<String>,
    /// Replacement for `CoreSettings::proxy_port`.
    pub proxy_port: Option<i32>,
    /// Replacement for `CoreSettings::proxy_auth_enabled`.
    pub proxy_auth_enabled: Option<bool>,
    /// Replacement for `CoreSettings::proxy_username`.
    pub proxy_username: Option<String>,
    /// Replacement for `CoreSettings::proxy_password`.
    pub proxy_password: Option<String>,
    /// Replacement for `CoreSettings::proxy_peer_connections`.
    pub proxy_peer_connections: Option<bool>,
    /// Replacement for `CoreSettings::disk_cache_mb`.
    pub disk_cache_mb: Option<i32>,
    /// Replacement for `CoreSettings::hashing_threads`.
    pub hashing_threads: Option<i32>,
    /// Replacement for `CoreSettings::rename_partial_files`.
    pub rename_partial_files: Option<bool>,
    /// Replacement for `CoreSettings::history_enabled`.
    pub history_enabled: Option<bool>,
    /// Replacement for `CoreSettings::history_interval_seconds`.
    pub history_interval_seconds: Option<i32>,
    /// Replacement for `CoreSettings::history_retention_days`.
    pub history_retention_days: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_path_prefers_enabled_incomplete_dir() {
        let mut settings = CoreSettings {
            download_path: PathBuf::from("/done"),
            incomplete_dir: PathBuf::from("/partial"),
            ..CoreSettings::default()
        };
        assert_eq!(settings.staging_path(), &PathBuf::from("/done"));
        settings.incomplete_dir_enabled = true;
        assert_eq!(settings.staging_path(), &PathBuf::from("/partial"));
    }

    #[test]
    fn history_config_clamps_interval() {
        let settings = CoreSettings {
            history_interval_seconds: 5,
            history_retention_days: -3,
            ..CoreSettings::default()
        };
        let config = settings.history_config();
        assert_eq!(config.interval_seconds, MIN_HISTORY_INTERVAL_SECONDS);
        assert_eq!(config.retention_days, 0);
    }

    #[test]
    fn partial_settings_deserialise_with_defaults() {
        let settings: CoreSettings =
            serde_json::from_str(r#"{"dht_enabled": false}"#).expect("parse settings");
        assert!(!settings.dht_enabled);
        assert_eq!(settings.listen_interface, DEFAULT_LISTEN_INTERFACE);
    }
}
