//! Incremental settings updates and the alternate-speed schedule.
//!
//! # Design
//! - `apply_update` is pure: it returns the next settings value plus flags describing which
//!   engine parameter groups must be reapplied. Side effects belong to the caller.
//! - Every field present in the update marks the result for persistence, even when the value
//!   is unchanged, so an explicit write always reaches the database.

use chrono::{Datelike, Local, Timelike};

use crate::model::{
    CoreSettings, HistoryConfig, LAST_MINUTE_OF_DAY, MIN_HISTORY_INTERVAL_SECONDS, SessionUpdate,
};

const ALL_DAYS_MASK: i32 = 0x7F;
const MAX_PORT: i32 = 65_535;

/// Outcome of applying a [`SessionUpdate`] to the current settings.
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct ApplyResult {
    /// Settings after the update.
    pub settings: CoreSettings,
    /// The settings must be written back to persistence.
    pub persist: bool,
    /// Alternate-speed limits or schedule changed.
    pub alt_changed: bool,
    /// Encryption mode changed.
    pub encryption_changed: bool,
    /// DHT, LPD or uTP toggles changed.
    pub network_changed: bool,
    /// Peer exchange toggle changed.
    pub pex_changed: bool,
    /// Queue sizes or stalled-torrent handling changed.
    pub queue_changed: bool,
    /// Proxy configuration changed.
    pub proxy_changed: bool,
    /// History must flush its open bucket before reconfiguring.
    pub flush_history_after: bool,
    /// History must be reconfigured with `history_config`.
    pub configure_history_after: bool,
    /// History configuration derived from the new settings.
    pub history_config: HistoryConfig,
}

impl ApplyResult {
    /// Whether any engine parameter group must be pushed to the session.
    #[must_use]
    pub const fn engine_changed(&self) -> bool {
        self.alt_changed
            || self.encryption_changed
            || self.network_changed
            || self.pex_changed
            || self.queue_changed
            || self.proxy_changed
    }
}

/// Apply an incremental update to `current`.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn apply_update(current: &CoreSettings, update: &SessionUpdate) -> ApplyResult {
    let mut next = current.clone();
    let mut persist = false;
    let mut alt_changed = false;
    let mut encryption_changed = false;
    let mut network_changed = false;
    let mut pex_changed = false;
    let mut queue_changed = false;
    let mut proxy_changed = false;
    let mut flush_history_after = false;
    let mut configure_history_after = false;

    macro_rules! assign {
        ($field:ident, $value:expr, $flag:ident) => {{
            next.$field = $value;
            $flag = true;
            persist = true;
        }};
        ($field:ident, $value:expr) => {{
            next.$field = $value;
            persist = true;
        }};
    }

    if let Some(value) = update.alt_speed_down_kbps {
        assign!(alt_download_rate_limit_kbps, value.max(0), alt_changed);
    }
    if let Some(value) = update.alt_speed_up_kbps {
        assign!(alt_upload_rate_limit_kbps, value.max(0), alt_changed);
    }
    if let Some(value) = update.alt_speed_enabled {
        assign!(alt_speed_enabled, value, alt_changed);
    }
    if let Some(value) = update.alt_speed_time_enabled {
        assign!(alt_speed_time_enabled, value, alt_changed);
    }
    if let Some(value) = update.alt_speed_time_begin {
        assign!(
            alt_speed_time_begin,
            value.clamp(0, LAST_MINUTE_OF_DAY),
            alt_changed
        );
    }
    if let Some(value) = update.alt_speed_time_end {
        assign!(
            alt_speed_time_end,
            value.clamp(0, LAST_MINUTE_OF_DAY),
            alt_changed
        );
    }
    if let Some(value) = update.alt_speed_time_day {
        assign!(alt_speed_time_day, value & ALL_DAYS_MASK, alt_changed);
    }

    if let Some(value) = update.encryption {
        assign!(encryption, value, encryption_changed);
    }

    if let Some(value) = update.dht_enabled {
        assign!(dht_enabled, value, network_changed);
    }
    if let Some(value) = update.lpd_enabled {
        assign!(lpd_enabled, value, network_changed);
    }
    if let Some(value) = update.utp_enabled {
        assign!(utp_enabled, value, network_changed);
    }
    if let Some(value) = update.pex_enabled {
        assign!(pex_enabled, value, pex_changed);
    }

    if let Some(value) = update.download_queue_size {
        assign!(download_queue_size, value.max(0), queue_changed);
    }
    if let Some(value) = update.seed_queue_size {
        assign!(seed_queue_size, value.max(0), queue_changed);
    }
    if let Some(value) = update.queue_stalled_enabled {
        assign!(queue_stalled_enabled, value, queue_changed);
    }
    if let Some(value) = update.queue_stalled_minutes {
        assign!(queue_stalled_minutes, value.max(0), queue_changed);
    }

    if let Some(value) = &update.incomplete_dir {
        assign!(incomplete_dir, value.clone());
    }
    if let Some(value) = update.incomplete_dir_enabled {
        assign!(incomplete_dir_enabled, value);
    }
    if let Some(value) = &update.watch_dir {
        assign!(watch_dir, value.clone());
    }
    if let Some(value) = update.watch_dir_enabled {
        assign!(watch_dir_enabled, value);
    }
    if let Some(value) = update.rename_partial_files {
        assign!(rename_partial_files, value);
    }

    if let Some(value) = update.seed_ratio_limit {
        let value = if value.is_finite() { value.max(0.0) } else { 0.0 };
        assign!(seed_ratio_limit, value);
    }
    if let Some(value) = update.seed_ratio_enabled {
        assign!(seed_ratio_enabled, value);
    }
    if let Some(value) = update.seed_idle_limit {
        assign!(seed_idle_limit_minutes, value.max(0));
    }
    if let Some(value) = update.seed_idle_enabled {
        assign!(seed_idle_enabled, value);
    }

    if let Some(value) = update.proxy_type {
        assign!(proxy_type, value, proxy_changed);
    }
    if let Some(value) = &update.proxy_hostname {
        assign!(proxy_hostname, value.trim().to_string(), proxy_changed);
    }
    if let Some(value) = update.proxy_port {
        assign!(proxy_port, value.clamp(0, MAX_PORT), proxy_changed);
    }
    if let Some(value) = update.proxy_auth_enabled {
        assign!(proxy_auth_enabled, value, proxy_changed);
    }
    if let Some(value) = &update.proxy_username {
        assign!(proxy_username, value.clone(), proxy_changed);
    }
    if let Some(value) = &update.proxy_password {
        assign!(proxy_password, value.clone(), proxy_changed);
    }
    if let Some(value) = update.proxy_peer_connections {
        assign!(proxy_peer_connections, value, proxy_changed);
    }

    if let Some(value) = update.disk_cache_mb {
        assign!(disk_cache_mb, value.max(1));
    }
    if let Some(value) = update.hashing_threads {
        assign!(hashing_threads, value.max(1));
    }

    if let Some(value) = update.history_enabled {
        if value != next.history_enabled {
            flush_history_after = !value;
            configure_history_after = value && next.history_interval_seconds > 0;
        }
        assign!(history_enabled, value);
    }
    if let Some(value) = update.history_interval_seconds {
        let value = value.max(MIN_HISTORY_INTERVAL_SECONDS);
        if value != next.history_interval_seconds {
            flush_history_after = true;
            configure_history_after = true;
        }
        assign!(history_interval_seconds, value);
    }
    if let Some(value) = update.history_retention_days {
        let value = value.max(0);
        if value != next.history_retention_days {
            configure_history_after = true;
        }
        assign!(history_retention_days, value);
    }

    let history_config = next.history_config();
    ApplyResult {
        settings: next,
        persist,
        alt_changed,
        encryption_changed,
        network_changed,
        pex_changed,
        queue_changed,
        proxy_changed,
        flush_history_after,
        configure_history_after,
        history_config,
    }
}

/// Decide whether the alternate speed profile applies.
///
/// `weekday` counts from Sunday = 0; `minute_of_day` is local time.
#[must_use]
pub fn should_use_alt_speed(settings: &CoreSettings, weekday: u32, minute_of_day: i32) -> bool {
    if settings.alt_speed_enabled {
        return true;
    }
    if !settings.alt_speed_time_enabled {
        return false;
    }
    let begin = settings.alt_speed_time_begin.clamp(0, LAST_MINUTE_OF_DAY);
    let end = settings.alt_speed_time_end.clamp(0, LAST_MINUTE_OF_DAY);
    let mask = match settings.alt_speed_time_day & ALL_DAYS_MASK {
        0 => ALL_DAYS_MASK,
        mask => mask,
    };
    if weekday > 6 || mask & (1 << weekday) == 0 {
        return false;
    }
    if begin == end {
        return true;
    }
    if begin < end {
        (begin..end).contains(&minute_of_day)
    } else {
        minute_of_day >= begin || minute_of_day < end
    }
}

/// [`should_use_alt_speed`] evaluated against the local wall clock.
#[must_use]
pub fn should_use_alt_speed_now(settings: &CoreSettings) -> bool {
    let now = Local::now();
    let minute = i32::try_from(now.hour() * 60 + now.minute()).unwrap_or(0);
    should_use_alt_speed(settings, now.weekday().num_days_from_sunday(), minute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scheduled(begin: i32, end: i32) -> CoreSettings {
        CoreSettings {
            alt_speed_time_enabled: true,
            alt_speed_time_begin: begin,
            alt_speed_time_end: end,
            ..CoreSettings::default()
        }
    }

    #[test]
    fn alt_speed_window_wraps_past_midnight() {
        let settings = scheduled(1380, 60);
        assert!(should_use_alt_speed(&settings, 3, 23 * 60 + 30));
        assert!(!should_use_alt_speed(&settings, 3, 2 * 60));
        assert!(should_use_alt_speed(&settings, 3, 30));
    }

    #[test]
    fn alt_speed_equal_bounds_are_always_active() {
        let settings = scheduled(600, 600);
        for minute in [0, 599, 600, 1439] {
            assert!(should_use_alt_speed(&settings, 1, minute));
        }
    }

    #[test]
    fn alt_speed_plain_window_excludes_end() {
        let settings = scheduled(60, 120);
        assert!(should_use_alt_speed(&settings, 0, 60));
        assert!(!should_use_alt_speed(&settings, 0, 120));
        assert!(!should_use_alt_speed(&settings, 0, 59));
    }

    #[test]
    fn alt_speed_respects_day_mask() {
        let mut settings = scheduled(0, 0);
        settings.alt_speed_time_day = 1 << 6;
        assert!(should_use_alt_speed(&settings, 6, 10));
        assert!(!should_use_alt_speed(&settings, 0, 10));

        settings.alt_speed_time_day = 0;
        assert!(should_use_alt_speed(&settings, 0, 10));
    }

    #[test]
    fn alt_speed_manual_flag_overrides_schedule() {
        let settings = CoreSettings {
            alt_speed_enabled: true,
            ..CoreSettings::default()
        };
        assert!(should_use_alt_speed(&settings, 2, 700));
        assert!(!should_use_alt_speed(&CoreSettings::default(), 2, 700));
    }

    #[test]
    fn empty_update_changes_nothing() {
        let current = CoreSettings::default();
        let result = apply_update(&current, &SessionUpdate::default());
        assert_eq!(result.settings, current);
        assert!(!result.persist);
        assert!(!result.engine_changed());
    }

    #[test]
    fn update_flags_track_touched_groups() {
        let current = CoreSettings::default();
        let update = SessionUpdate {
            alt_speed_down_kbps: Some(50),
            encryption: Some(crate::EncryptionMode::Required),
            dht_enabled: Some(false),
            pex_enabled: Some(false),
            seed_queue_size: Some(-4),
            proxy_port: Some(70_000),
            ..SessionUpdate::default()
        };
        let result = apply_update(&current, &update);
        assert!(result.persist);
        assert!(result.alt_changed);
        assert!(result.encryption_changed);
        assert!(result.network_changed);
        assert!(result.pex_changed);
        assert!(result.queue_changed);
        assert!(result.proxy_changed);
        assert_eq!(result.settings.seed_queue_size, 0);
        assert_eq!(result.settings.proxy_port, 65_535);
        assert_eq!(result.settings.alt_download_rate_limit_kbps, 50);
    }

    #[test]
    fn path_updates_persist_without_engine_changes() {
        let result = apply_update(
            &CoreSettings::default(),
            &SessionUpdate {
                incomplete_dir: Some(PathBuf::from("/tmp/partial")),
                incomplete_dir_enabled: Some(true),
                disk_cache_mb: Some(0),
                hashing_threads: Some(-1),
                ..SessionUpdate::default()
            },
        );
        assert!(result.persist);
        assert!(!result.engine_changed());
        assert_eq!(result.settings.disk_cache_mb, 1);
        assert_eq!(result.settings.hashing_threads, 1);
    }

    #[test]
    fn disabling_history_flushes_without_reconfigure() {
        let result = apply_update(
            &CoreSettings::default(),
            &SessionUpdate {
                history_enabled: Some(false),
                ..SessionUpdate::default()
            },
        );
        assert!(result.flush_history_after);
        assert!(!result.configure_history_after);
        assert!(!result.history_config.enabled);
    }

    #[test]
    fn history_interval_is_clamped_and_reconfigures() {
        let result = apply_update(
            &CoreSettings::default(),
            &SessionUpdate {
                history_interval_seconds: Some(10),
                ..SessionUpdate::default()
            },
        );
        assert_eq!(result.settings.history_interval_seconds, 60);
        assert!(result.flush_history_after);
        assert!(result.configure_history_after);
        assert_eq!(result.history_config.interval_seconds, 60);
    }

    #[test]
    fn unchanged_history_interval_only_persists() {
        let current = CoreSettings::default();
        let result = apply_update(
            &current,
            &SessionUpdate {
                history_interval_seconds: Some(current.history_interval_seconds),
                ..SessionUpdate::default()
            },
        );
        assert!(result.persist);
        assert!(!result.flush_history_after);
        assert!(!result.configure_history_after);
    }
}
