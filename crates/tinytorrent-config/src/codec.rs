//! String key/value codec for the persisted settings table.
//!
//! The state path is bootstrap-only and never round-trips through the table.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::model::{CoreSettings, EncryptionMode, ProxyType};

fn encode_bool(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn encode_path(value: &Path) -> String {
    value.to_string_lossy().into_owned()
}

fn invalid(key: &str, value: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidField {
        field: key.to_string(),
        value: Some(value.to_string()),
        reason,
    }
}

fn decode_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn decode_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| invalid(key, value, "expected a number"))
}

impl CoreSettings {
    /// Encode every persisted setting as a `(key, value)` pair.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("downloadPath", encode_path(&self.download_path)),
            ("listenInterface", self.listen_interface.clone()),
            ("idleSleepMs", self.idle_sleep_ms.to_string()),
            ("speedLimitDown", self.download_rate_limit_kbps.to_string()),
            ("speedLimitUp", self.upload_rate_limit_kbps.to_string()),
            (
                "speedLimitDownEnabled",
                encode_bool(self.download_rate_limit_enabled),
            ),
            (
                "speedLimitUpEnabled",
                encode_bool(self.upload_rate_limit_enabled),
            ),
            (
                "altSpeedDown",
                self.alt_download_rate_limit_kbps.to_string(),
            ),
            ("altSpeedUp", self.alt_upload_rate_limit_kbps.to_string()),
            ("altSpeedEnabled", encode_bool(self.alt_speed_enabled)),
            (
                "altSpeedTimeEnabled",
                encode_bool(self.alt_speed_time_enabled),
            ),
            ("altSpeedTimeBegin", self.alt_speed_time_begin.to_string()),
            ("altSpeedTimeEnd", self.alt_speed_time_end.to_string()),
            ("altSpeedTimeDay", self.alt_speed_time_day.to_string()),
            ("encryption", self.encryption.as_code().to_string()),
            ("peerLimit", self.peer_limit.to_string()),
            ("peerLimitPerTorrent", self.peer_limit_per_torrent.to_string()),
            ("dhtEnabled", encode_bool(self.dht_enabled)),
            ("pexEnabled", encode_bool(self.pex_enabled)),
            ("lpdEnabled", encode_bool(self.lpd_enabled)),
            ("utpEnabled", encode_bool(self.utp_enabled)),
            ("downloadQueueSize", self.download_queue_size.to_string()),
            ("seedQueueSize", self.seed_queue_size.to_string()),
            (
                "queueStalledEnabled",
                encode_bool(self.queue_stalled_enabled),
            ),
            ("queueStalledMinutes", self.queue_stalled_minutes.to_string()),
            ("incompleteDir", encode_path(&self.incomplete_dir)),
            (
                "incompleteDirEnabled",
                encode_bool(self.incomplete_dir_enabled),
            ),
            ("blocklistPath", encode_path(&self.blocklist_path)),
            ("watchDir", encode_path(&self.watch_dir)),
            ("watchDirEnabled", encode_bool(self.watch_dir_enabled)),
            ("seedRatioEnabled", encode_bool(self.seed_ratio_enabled)),
            ("seedRatioLimit", self.seed_ratio_limit.to_string()),
            ("seedIdleEnabled", encode_bool(self.seed_idle_enabled)),
            ("seedIdleLimit", self.seed_idle_limit_minutes.to_string()),
            ("proxyType", self.proxy_type.as_code().to_string()),
            ("proxyHost", self.proxy_hostname.clone()),
            ("proxyPort", self.proxy_port.to_string()),
            ("proxyAuthEnabled", encode_bool(self.proxy_auth_enabled)),
            ("proxyUsername", self.proxy_username.clone()),
            ("proxyPassword", self.proxy_password.clone()),
            (
                "proxyPeerConnections",
                encode_bool(self.proxy_peer_connections),
            ),
            ("historyEnabled", encode_bool(self.history_enabled)),
            ("historyInterval", self.history_interval_seconds.to_string()),
            ("historyRetentionDays", self.history_retention_days.to_string()),
            ("diskCacheMb", self.disk_cache_mb.to_string()),
            ("hashingThreads", self.hashing_threads.to_string()),
            ("renamePartialFiles", encode_bool(self.rename_partial_files)),
        ]
    }

    /// Overlay persisted pairs onto `self`.
    ///
    /// Pairs that fail to decode leave the current value in place and are returned so the
    /// caller can report them.
    pub fn apply_pairs<I, K, V>(&mut self, pairs: I) -> Vec<ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        pairs
            .into_iter()
            .filter_map(|(key, value)| self.apply_pair(key.as_ref(), value.as_ref()).err())
            .collect()
    }

    /// Decode a single persisted pair onto `self`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownField`] for unrecognised keys and
    /// [`ConfigError::InvalidField`] when the value cannot be decoded.
    pub fn apply_pair(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "downloadPath" => self.download_path = PathBuf::from(value),
            "listenInterface" => self.listen_interface = value.to_string(),
            "idleSleepMs" => self.idle_sleep_ms = decode_number(key, value)?,
            "speedLimitDown" => self.download_rate_limit_kbps = decode_number(key, value)?,
            "speedLimitUp" => self.upload_rate_limit_kbps = decode_number(key, value)?,
            "speedLimitDownEnabled" => self.download_rate_limit_enabled = decode_bool(key, value)?,
            "speedLimitUpEnabled" => self.upload_rate_limit_enabled = decode_bool(key, value)?,
            "altSpeedDown" => self.alt_download_rate_limit_kbps = decode_number(key, value)?,
            "altSpeedUp" => self.alt_upload_rate_limit_kbps = decode_number(key, value)?,
            "altSpeedEnabled" => self.alt_speed_enabled = decode_bool(key, value)?,
            "altSpeedTimeEnabled" => self.alt_speed_time_enabled = decode_bool(key, value)?,
            "altSpeedTimeBegin" => self.alt_speed_time_begin = decode_number(key, value)?,
            "altSpeedTimeEnd" => self.alt_speed_time_end = decode_number(key, value)?,
            "altSpeedTimeDay" => self.alt_speed_time_day = decode_number(key, value)?,
            "encryption" => {
                self.encryption = EncryptionMode::from_code(decode_number(key, value)?);
            }
            "peerLimit" => self.peer_limit = decode_number(key, value)?,
            "peerLimitPerTorrent" => self.peer_limit_per_torrent = decode_number(key, value)?,
            "dhtEnabled" => self.dht_enabled = decode_bool(key, value)?,
            "pexEnabled" => self.pex_enabled = decode_bool(key, value)?,
            "lpdEnabled" => self.lpd_enabled = decode_bool(key, value)?,
            "utpEnabled" => self.utp_enabled = decode_bool(key, value)?,
            "downloadQueueSize" => self.download_queue_size = decode_number(key, value)?,
            "seedQueueSize" => self.seed_queue_size = decode_number(key, value)?,
            "queueStalledEnabled" => self.queue_stalled_enabled = decode_bool(key, value)?,
            "queueStalledMinutes" => self.queue_stalled_minutes = decode_number(key, value)?,
            "incompleteDir" => self.incomplete_dir = PathBuf::from(value),
            "incompleteDirEnabled" => self.incomplete_dir_enabled = decode_bool(key, value)?,
            "blocklistPath" => self.blocklist_path = PathBuf::from(value),
            "watchDir" => self.watch_dir = PathBuf::from(value),
            "watchDirEnabled" => self.watch_dir_enabled = decode_bool(key, value)?,
            "seedRatioEnabled" => self.seed_ratio_enabled = decode_bool(key, value)?,
            "seedRatioLimit" => {
                let ratio: f64 = decode_number(key, value)?;
                if !ratio.is_finite() {
                    return Err(invalid(key, value, "expected a finite ratio"));
                }
                self.seed_ratio_limit = ratio;
            }
            "seedIdleEnabled" => self.seed_idle_enabled = decode_bool(key, value)?,
            "seedIdleLimit" => self.seed_idle_limit_minutes = decode_number(key, value)?,
            "proxyType" => self.proxy_type = ProxyType::from_code(decode_number(key, value)?),
            "proxyHost" => self.proxy_hostname = value.to_string(),
            "proxyPort" => self.proxy_port = decode_number(key, value)?,
            "proxyAuthEnabled" => self.proxy_auth_enabled = decode_bool(key, value)?,
            "proxyUsername" => self.proxy_username = value.to_string(),
            "proxyPassword" => self.proxy_password = value.to_string(),
            "proxyPeerConnections" => self.proxy_peer_connections = decode_bool(key, value)?,
            "historyEnabled" => self.history_enabled = decode_bool(key, value)?,
            "historyInterval" => self.history_interval_seconds = decode_number(key, value)?,
            "historyRetentionDays" => self.history_retention_days = decode_number(key, value)?,
            "diskCacheMb" => self.disk_cache_mb = decode_number(key, value)?,
            "hashingThreads" => self.hashing_threads = decode_number(key, value)?,
            "renamePartialFiles" => self.rename_partial_files = decode_bool(key, value)?,
            _ => {
                return Err(ConfigError::UnknownField {
                    field: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_restore_customised_settings() {
        let original = CoreSettings {
            download_path: PathBuf::from("/srv/downloads"),
            listen_interface: "[::]:51413".into(),
            alt_speed_enabled: true,
            alt_speed_time_begin: 1380,
            encryption: EncryptionMode::Required,
            seed_ratio_limit: 1.5,
            proxy_type: ProxyType::Http,
            proxy_hostname: "proxy".into(),
            history_interval_seconds: 120,
            rename_partial_files: false,
            ..CoreSettings::default()
        };

        let mut restored = CoreSettings::default();
        let errors = restored.apply_pairs(original.to_pairs());
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(restored, original);
    }

    #[test]
    fn invalid_values_keep_defaults_and_report() {
        let mut settings = CoreSettings::default();
        let errors = settings.apply_pairs([
            ("speedLimitDown", "fast"),
            ("dhtEnabled", "maybe"),
            ("mystery", "1"),
            ("pexEnabled", "false"),
        ]);
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].field(), "speedLimitDown");
        assert!(matches!(errors[2], ConfigError::UnknownField { .. }));
        assert_eq!(settings.download_rate_limit_kbps, 0);
        assert!(settings.dht_enabled);
        assert!(!settings.pex_enabled);
    }

    #[test]
    fn state_path_is_not_persisted() {
        let settings = CoreSettings {
            state_path: PathBuf::from("/var/lib/tt"),
            ..CoreSettings::default()
        };
        assert!(settings.to_pairs().iter().all(|(key, _)| *key != "statePath"));
    }
}
