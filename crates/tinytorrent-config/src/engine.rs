//! Translation from [`CoreSettings`] into engine session parameters.
//!
//! Parameters are grouped so callers can push only the groups an update touched.

use serde::{Deserialize, Serialize};

use crate::model::{CoreSettings, EncryptionMode, ProxyType};

const BYTES_PER_KIB: i64 = 1024;
const BYTES_PER_MIB: i64 = 1024 * 1024;
const PARTIAL_FILE_SUFFIX: &str = ".part";

/// Convert a KiB/s limit into bytes per second; zero means unlimited.
#[must_use]
pub fn kbps_to_bytes(kbps: i32, enabled: bool) -> i64 {
    if !enabled || kbps <= 0 {
        0
    } else {
        i64::from(kbps) * BYTES_PER_KIB
    }
}

/// Global transfer caps in bytes per second (zero is unlimited).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimits {
    /// Download cap.
    pub download_bps: i64,
    /// Upload cap.
    pub upload_bps: i64,
}

/// Listen and discovery toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct NetworkSettings {
    /// `host:port` listen interface.
    pub listen_interface: String,
    /// Distributed hash table.
    pub enable_dht: bool,
    /// Local service discovery.
    pub enable_lsd: bool,
    /// Incoming uTP connections.
    pub enable_incoming_utp: bool,
    /// Outgoing uTP connections.
    pub enable_outgoing_utp: bool,
    /// Peer exchange.
    pub enable_pex: bool,
}

/// Whether encrypted connections are allowed, preferred or forced.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionPolicy {
    /// Encryption offered, plaintext accepted.
    #[default]
    Enabled,
    /// Encryption mandatory.
    Forced,
}

/// Which stream ciphers a connection may negotiate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionLevel {
    /// Only the RC4 stream cipher.
    Rc4,
    /// Plaintext or RC4.
    #[default]
    Both,
}

/// Encryption parameters for inbound and outbound peers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionSettings {
    /// Policy for incoming connections.
    pub incoming: EncryptionPolicy,
    /// Policy for outgoing connections.
    pub outgoing: EncryptionPolicy,
    /// Allowed ciphers.
    pub level: EncryptionLevel,
    /// Prefer RC4 when both are possible.
    pub prefer_rc4: bool,
}

impl From<EncryptionMode> for EncryptionSettings {
    fn from(mode: EncryptionMode) -> Self {
        match mode {
            EncryptionMode::Tolerated => Self {
                incoming: EncryptionPolicy::Enabled,
                outgoing: EncryptionPolicy::Enabled,
                level: EncryptionLevel::Both,
                prefer_rc4: false,
            },
            EncryptionMode::Preferred => Self {
                incoming: EncryptionPolicy::Enabled,
                outgoing: EncryptionPolicy::Enabled,
                level: EncryptionLevel::Both,
                prefer_rc4: true,
            },
            EncryptionMode::Required => Self {
                incoming: EncryptionPolicy::Forced,
                outgoing: EncryptionPolicy::Forced,
                level: EncryptionLevel::Rc4,
                prefer_rc4: true,
            },
        }
    }
}

/// Queueing limits; `None` leaves the engine default in place.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueSettings {
    /// Maximum active downloads.
    pub active_downloads: Option<i32>,
    /// Maximum active seeds.
    pub active_seeds: Option<i32>,
    /// Maximum active torrents overall.
    pub active_limit: Option<i32>,
    /// Exclude stalled torrents from the active counts.
    pub dont_count_slow_torrents: bool,
    /// Seconds without transfer before a torrent counts as stalled.
    pub inactivity_timeout_secs: i32,
}

/// Outgoing proxy parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct ProxySettings {
    /// Proxy protocol.
    pub kind: ProxyType,
    /// Proxy host.
    pub hostname: String,
    /// Proxy port.
    pub port: u16,
    /// Route peer connections through the proxy.
    pub proxy_peer_connections: bool,
    /// Route tracker connections through the proxy.
    pub proxy_tracker_connections: bool,
    /// Resolve hostnames through the proxy.
    pub proxy_hostnames: bool,
    /// Credentials, only when authentication is enabled.
    pub credentials: Option<(String, String)>,
}

/// Connection and disk tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Global connection cap.
    pub connections_limit: Option<i32>,
    /// Global unchoke slots.
    pub unchoke_slots: Option<i32>,
    /// Threads used for piece hashing.
    pub hashing_threads: i32,
    /// Disk cache size in bytes.
    pub disk_cache_bytes: i64,
    /// Suffix appended to files still downloading.
    pub partial_file_suffix: Option<String>,
}

/// Full engine configuration derived from settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineSettings {
    /// Rate caps.
    pub rates: RateLimits,
    /// Listen and discovery.
    pub network: NetworkSettings,
    /// Peer encryption.
    pub encryption: EncryptionSettings,
    /// Queue limits.
    pub queue: QueueSettings,
    /// Proxy.
    pub proxy: ProxySettings,
    /// Connection and disk tuning.
    pub limits: ConnectionLimits,
}

/// Subset of [`EngineSettings`] to push into a running session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    /// Rate caps.
    pub rates: Option<RateLimits>,
    /// Listen and discovery.
    pub network: Option<NetworkSettings>,
    /// Peer encryption.
    pub encryption: Option<EncryptionSettings>,
    /// Queue limits.
    pub queue: Option<QueueSettings>,
    /// Proxy.
    pub proxy: Option<ProxySettings>,
    /// Connection and disk tuning.
    pub limits: Option<ConnectionLimits>,
}

impl SettingsPatch {
    /// Patch that carries every group.
    #[must_use]
    pub fn full(settings: EngineSettings) -> Self {
        Self {
            rates: Some(settings.rates),
            network: Some(settings.network),
            encryption: Some(settings.encryption),
            queue: Some(settings.queue),
            proxy: Some(settings.proxy),
            limits: Some(settings.limits),
        }
    }

    /// Whether the patch carries nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rates.is_none()
            && self.network.is_none()
            && self.encryption.is_none()
            && self.queue.is_none()
            && self.proxy.is_none()
            && self.limits.is_none()
    }
}

/// Rate caps for the active profile.
#[must_use]
pub fn rate_limits(settings: &CoreSettings, alt_active: bool) -> RateLimits {
    if alt_active {
        RateLimits {
            download_bps: kbps_to_bytes(settings.alt_download_rate_limit_kbps, true),
            upload_bps: kbps_to_bytes(settings.alt_upload_rate_limit_kbps, true),
        }
    } else {
        RateLimits {
            download_bps: kbps_to_bytes(
                settings.download_rate_limit_kbps,
                settings.download_rate_limit_enabled,
            ),
            upload_bps: kbps_to_bytes(
                settings.upload_rate_limit_kbps,
                settings.upload_rate_limit_enabled,
            ),
        }
    }
}

/// Listen and discovery parameters.
#[must_use]
pub fn network_settings(settings: &CoreSettings) -> NetworkSettings {
    NetworkSettings {
        listen_interface: settings.listen_interface.clone(),
        enable_dht: settings.dht_enabled,
        enable_lsd: settings.lpd_enabled,
        enable_incoming_utp: settings.utp_enabled,
        enable_outgoing_utp: settings.utp_enabled,
        enable_pex: settings.pex_enabled,
    }
}

/// Queue parameters; non-positive sizes leave the engine default.
#[must_use]
pub fn queue_settings(settings: &CoreSettings) -> QueueSettings {
    let positive = |value: i32| (value > 0).then_some(value);
    let total = settings.download_queue_size.max(0) + settings.seed_queue_size.max(0);
    QueueSettings {
        active_downloads: positive(settings.download_queue_size),
        active_seeds: positive(settings.seed_queue_size),
        active_limit: positive(total),
        dont_count_slow_torrents: settings.queue_stalled_enabled,
        inactivity_timeout_secs: settings.queue_stalled_minutes.max(0).saturating_mul(60),
    }
}

/// Proxy parameters.
#[must_use]
pub fn proxy_settings(settings: &CoreSettings) -> ProxySettings {
    let credentials = settings.proxy_auth_enabled.then(|| {
        (
            settings.proxy_username.clone(),
            settings.proxy_password.clone(),
        )
    });
    ProxySettings {
        kind: settings.proxy_type,
        hostname: settings.proxy_hostname.clone(),
        port: u16::try_from(settings.proxy_port.clamp(0, i32::from(u16::MAX))).unwrap_or(0),
        proxy_peer_connections: settings.proxy_peer_connections,
        proxy_tracker_connections: settings.proxy_peer_connections,
        proxy_hostnames: !settings.proxy_hostname.is_empty(),
        credentials,
    }
}

/// Connection and disk parameters.
#[must_use]
pub fn connection_limits(settings: &CoreSettings) -> ConnectionLimits {
    ConnectionLimits {
        connections_limit: (settings.peer_limit > 0).then_some(settings.peer_limit),
        unchoke_slots: (settings.peer_limit_per_torrent > 0)
            .then_some(settings.peer_limit_per_torrent),
        hashing_threads: settings.hashing_threads.max(1),
        disk_cache_bytes: i64::from(settings.disk_cache_mb.max(1)) * BYTES_PER_MIB,
        partial_file_suffix: settings
            .rename_partial_files
            .then(|| PARTIAL_FILE_SUFFIX.to_string()),
    }
}

/// Build the full engine configuration for the current speed profile.
#[must_use]
pub fn build_engine_settings(settings: &CoreSettings, alt_active: bool) -> EngineSettings {
    EngineSettings {
        rates: rate_limits(settings, alt_active),
        network: network_settings(settings),
        encryption: EncryptionSettings::from(settings.encryption),
        queue: queue_settings(settings),
        proxy: proxy_settings(settings),
        limits: connection_limits(settings),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kbps_conversion_honours_enable_flag() {
        assert_eq!(kbps_to_bytes(100, true), 102_400);
        assert_eq!(kbps_to_bytes(100, false), 0);
        assert_eq!(kbps_to_bytes(-5, true), 0);
        assert_eq!(kbps_to_bytes(0, true), 0);
    }

    #[test]
    fn alt_profile_switches_rate_source() {
        let settings = CoreSettings {
            download_rate_limit_kbps: 500,
            download_rate_limit_enabled: true,
            upload_rate_limit_kbps: 200,
            alt_download_rate_limit_kbps: 50,
            alt_upload_rate_limit_kbps: 10,
            ..CoreSettings::default()
        };
        let normal = rate_limits(&settings, false);
        assert_eq!(normal.download_bps, 512_000);
        assert_eq!(normal.upload_bps, 0);

        let alt = rate_limits(&settings, true);
        assert_eq!(alt.download_bps, 51_200);
        assert_eq!(alt.upload_bps, 10_240);
    }

    #[test]
    fn encryption_modes_map_to_policies() {
        let tolerated = EncryptionSettings::from(EncryptionMode::Tolerated);
        assert_eq!(tolerated.level, EncryptionLevel::Both);
        assert!(!tolerated.prefer_rc4);

        let preferred = EncryptionSettings::from(EncryptionMode::Preferred);
        assert_eq!(preferred.outgoing, EncryptionPolicy::Enabled);
        assert!(preferred.prefer_rc4);

        let required = EncryptionSettings::from(EncryptionMode::Required);
        assert_eq!(required.incoming, EncryptionPolicy::Forced);
        assert_eq!(required.level, EncryptionLevel::Rc4);
    }

    #[test]
    fn queue_limits_sum_positive_sizes() {
        let settings = CoreSettings {
            download_queue_size: 3,
            seed_queue_size: 0,
            queue_stalled_enabled: true,
            ..CoreSettings::default()
        };
        let queue = queue_settings(&settings);
        assert_eq!(queue.active_downloads, Some(3));
        assert_eq!(queue.active_seeds, None);
        assert_eq!(queue.active_limit, Some(3));
        assert!(queue.dont_count_slow_torrents);

        let unlimited = queue_settings(&CoreSettings::default());
        assert_eq!(unlimited.active_limit, None);
    }

    #[test]
    fn proxy_credentials_require_auth() {
        let mut settings = CoreSettings {
            proxy_type: ProxyType::Socks5,
            proxy_hostname: "proxy.local".into(),
            proxy_port: 1080,
            proxy_username: "user".into(),
            proxy_password: "secret".into(),
            proxy_peer_connections: true,
            ..CoreSettings::default()
        };
        let proxy = proxy_settings(&settings);
        assert!(proxy.credentials.is_none());
        assert!(proxy.proxy_hostnames);
        assert!(proxy.proxy_tracker_connections);
        assert_eq!(proxy.port, 1080);

        settings.proxy_auth_enabled = true;
        let proxy = proxy_settings(&settings);
        assert_eq!(
            proxy.credentials,
            Some(("user".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn full_patch_carries_every_group() {
        let patch = SettingsPatch::full(build_engine_settings(&CoreSettings::default(), false));
        assert!(!patch.is_empty());
        assert!(patch.rates.is_some() && patch.limits.is_some());
        assert!(SettingsPatch::default().is_empty());
        let limits = patch.limits.unwrap_or_default();
        assert_eq!(limits.disk_cache_bytes, 16 * 1024 * 1024);
        assert_eq!(limits.partial_file_suffix.as_deref(), Some(".part"));
    }
}
