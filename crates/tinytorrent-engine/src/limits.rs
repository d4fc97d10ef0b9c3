//! Seed ratio and idle enforcement.
//!
//! # Design
//! - State is created lazily on configuration or on the first check, and dropped when the torrent
//!   leaves the session.
//! - Activity means a download or upload rate above zero at a tick; it resets the idle clock and
//!   re-arms both one-shot triggers.
//! - Only complete, running torrents are checked; a triggered limit asks for one pause and stays
//!   quiet until re-armed.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tinytorrent_config::CoreSettings;
use tinytorrent_core::{RpcId, TorrentSeedLimit, TorrentStatus};

/// Follow the session-wide limit.
pub const MODE_GLOBAL: i32 = 0;
/// Use the torrent's own limit.
pub const MODE_TORRENT: i32 = 1;
/// Never enforce.
pub const MODE_UNLIMITED: i32 = 2;

/// Session-wide seed limits in effect.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalSeedLimits {
    /// Ratio threshold when enabled.
    pub ratio: Option<f64>,
    /// Idle minutes threshold when enabled.
    pub idle_minutes: Option<i32>,
}

impl GlobalSeedLimits {
    /// Limits configured in `settings`.
    #[must_use]
    pub fn from_settings(settings: &CoreSettings) -> Self {
        Self {
            ratio: Some(settings.seed_ratio_limit)
                .filter(|limit| settings.seed_ratio_enabled && *limit > 0.0),
            idle_minutes: Some(settings.seed_idle_limit_minutes)
                .filter(|minutes| settings.seed_idle_enabled && *minutes > 0),
        }
    }
}

/// Per-torrent enforcement state.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedLimitState {
    /// Ratio threshold.
    pub ratio_limit: Option<f64>,
    /// Ratio threshold enabled.
    pub ratio_enabled: bool,
    /// Ratio mode.
    pub ratio_mode: i32,
    /// Idle threshold in minutes.
    pub idle_limit: Option<i32>,
    /// Idle threshold enabled.
    pub idle_enabled: bool,
    /// Idle mode.
    pub idle_mode: i32,
    /// Last tick with transfer activity.
    pub last_activity: Instant,
    /// The ratio limit already asked for a pause.
    pub ratio_triggered: bool,
    /// The idle limit already asked for a pause.
    pub idle_triggered: bool,
}

impl SeedLimitState {
    fn new(now: Instant) -> Self {
        Self {
            ratio_limit: None,
            ratio_enabled: false,
            ratio_mode: MODE_GLOBAL,
            idle_limit: None,
            idle_enabled: false,
            idle_mode: MODE_GLOBAL,
            last_activity: now,
            ratio_triggered: false,
            idle_triggered: false,
        }
    }

    fn rearm(&mut self, now: Instant) {
        self.last_activity = now;
        self.ratio_triggered = false;
        self.idle_triggered = false;
    }

    fn ratio_threshold(&self, global: &GlobalSeedLimits) -> Option<f64> {
        match self.ratio_mode {
            MODE_TORRENT => self
                .ratio_limit
                .filter(|limit| self.ratio_enabled && *limit > 0.0),
            MODE_UNLIMITED => None,
            _ => global.ratio,
        }
    }

    fn idle_threshold(&self, global: &GlobalSeedLimits) -> Option<i32> {
        match self.idle_mode {
            MODE_TORRENT => self
                .idle_limit
                .filter(|minutes| self.idle_enabled && *minutes > 0),
            MODE_UNLIMITED => None,
            _ => global.idle_minutes,
        }
    }
}

/// Enforcement state for every torrent.
#[derive(Debug, Default)]
pub struct SeedLimits {
    states: HashMap<RpcId, SeedLimitState>,
}

impl SeedLimits {
    /// Construct an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a torrent's configured limits; resets its idle clock and triggers.
    pub fn configure(&mut self, id: RpcId, limits: &TorrentSeedLimit, now: Instant) {
        let state = self
            .states
            .entry(id)
            .or_insert_with(|| SeedLimitState::new(now));
        if let Some(limit) = limits.ratio_limit {
            state.ratio_limit = Some(limit);
        }
        if let Some(enabled) = limits.ratio_enabled {
            state.ratio_enabled = enabled;
        }
        if let Some(mode) = limits.ratio_mode {
            state.ratio_mode = mode;
        }
        if let Some(limit) = limits.idle_limit {
            state.idle_limit = Some(limit);
        }
        if let Some(enabled) = limits.idle_enabled {
            state.idle_enabled = enabled;
        }
        if let Some(mode) = limits.idle_mode {
            state.idle_mode = mode;
        }
        state.rearm(now);
    }

    /// Evaluate one torrent at `now`. Returns `true` when it should be paused.
    pub fn check(
        &mut self,
        id: RpcId,
        status: &TorrentStatus,
        global: &GlobalSeedLimits,
        now: Instant,
    ) -> bool {
        let state = self
            .states
            .entry(id)
            .or_insert_with(|| SeedLimitState::new(now));
        if status.download_rate > 0 || status.upload_rate > 0 {
            state.rearm(now);
        }
        if status.paused || !status.state.is_complete() {
            return false;
        }

        if !state.ratio_triggered
            && let Some(limit) = state.ratio_threshold(global)
        {
            #[allow(clippy::cast_precision_loss)]
            let ratio = status.all_time_upload as f64 / status.all_time_download.max(1) as f64;
            if ratio >= limit {
                state.ratio_triggered = true;
                return true;
            }
        }

        if !state.idle_triggered
            && let Some(minutes) = state.idle_threshold(global)
        {
            let idle = now.saturating_duration_since(state.last_activity);
            let threshold = Duration::from_secs(u64::try_from(minutes).unwrap_or(0) * 60);
            if idle >= threshold {
                state.idle_triggered = true;
                return true;
            }
        }
        false
    }

    /// Restart the idle clock of a torrent the user just resumed.
    pub fn restart(&mut self, id: RpcId, now: Instant) {
        if let Some(state) = self.states.get_mut(&id) {
            state.last_activity = now;
            state.idle_triggered = false;
        }
    }

    /// Drop state for torrents no longer in the session.
    pub fn retain(&mut self, live: &HashSet<RpcId>) {
        self.states.retain(|id, _| live.contains(id));
    }

    /// State of one torrent.
    #[must_use]
    pub fn get(&self, id: RpcId) -> Option<&SeedLimitState> {
        self.states.get(&id)
    }

    /// Number of tracked torrents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no torrent is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinytorrent_core::TorrentState;

    fn seeding(downloaded: i64, uploaded: i64) -> TorrentStatus {
        TorrentStatus {
            state: TorrentState::Seeding,
            all_time_download: downloaded,
            all_time_upload: uploaded,
            ..TorrentStatus::default()
        }
    }

    fn ratio_limit(limit: f64) -> TorrentSeedLimit {
        TorrentSeedLimit {
            ratio_limit: Some(limit),
            ratio_enabled: Some(true),
            ratio_mode: Some(MODE_TORRENT),
            ..TorrentSeedLimit::default()
        }
    }

    #[test]
    fn ratio_below_threshold_keeps_seeding() {
        let mut limits = SeedLimits::new();
        let now = Instant::now();
        limits.configure(1, &ratio_limit(2.0), now);
        assert!(!limits.check(1, &seeding(100, 150), &GlobalSeedLimits::default(), now));
    }

    #[test]
    fn ratio_threshold_fires_once_until_activity() {
        let mut limits = SeedLimits::new();
        let global = GlobalSeedLimits::default();
        let now = Instant::now();
        limits.configure(1, &ratio_limit(2.0), now);

        let status = seeding(100, 250);
        assert!(limits.check(1, &status, &global, now));
        assert!(!limits.check(1, &status, &global, now));

        let mut active = status.clone();
        active.upload_rate = 10;
        assert!(limits.check(1, &active, &global, now + Duration::from_secs(1)));
    }

    #[test]
    fn incomplete_or_paused_torrents_are_skipped() {
        let mut limits = SeedLimits::new();
        let global = GlobalSeedLimits {
            ratio: Some(0.5),
            idle_minutes: None,
        };
        let now = Instant::now();
        let mut status = seeding(100, 100);
        status.state = TorrentState::Downloading;
        assert!(!limits.check(7, &status, &global, now));
        status.state = TorrentState::Seeding;
        status.paused = true;
        assert!(!limits.check(7, &status, &global, now));
        status.paused = false;
        assert!(limits.check(7, &status, &global, now));
    }

    #[test]
    fn idle_limit_counts_from_last_activity() {
        let mut limits = SeedLimits::new();
        let global = GlobalSeedLimits {
            ratio: None,
            idle_minutes: Some(2),
        };
        let start = Instant::now();
        let mut status = seeding(100, 0);
        status.upload_rate = 5;
        assert!(!limits.check(3, &status, &global, start));

        status.upload_rate = 0;
        assert!(!limits.check(3, &status, &global, start + Duration::from_secs(90)));
        assert!(limits.check(3, &status, &global, start + Duration::from_secs(120)));
        assert!(!limits.check(3, &status, &global, start + Duration::from_secs(300)));
    }

    #[test]
    fn resumed_torrent_gets_a_fresh_idle_window() {
        let mut limits = SeedLimits::new();
        let global = GlobalSeedLimits {
            ratio: None,
            idle_minutes: Some(2),
        };
        let start = Instant::now();
        let status = seeding(100, 0);
        assert!(!limits.check(4, &status, &global, start));
        assert!(limits.check(4, &status, &global, start + Duration::from_secs(120)));

        let resumed = start + Duration::from_secs(3_600);
        limits.restart(4, resumed);
        assert!(!limits.check(4, &status, &global, resumed + Duration::from_secs(1)));
        assert!(limits.check(4, &status, &global, resumed + Duration::from_secs(120)));
    }

    #[test]
    fn unlimited_mode_ignores_global_limits() {
        let mut limits = SeedLimits::new();
        let global = GlobalSeedLimits {
            ratio: Some(0.1),
            idle_minutes: Some(1),
        };
        let now = Instant::now();
        limits.configure(
            5,
            &TorrentSeedLimit {
                ratio_mode: Some(MODE_UNLIMITED),
                idle_mode: Some(MODE_UNLIMITED),
                ..TorrentSeedLimit::default()
            },
            now,
        );
        assert!(!limits.check(5, &seeding(1, 100), &global, now + Duration::from_secs(600)));
    }

    #[test]
    fn global_limits_follow_settings_flags() {
        let settings = CoreSettings {
            seed_ratio_enabled: true,
            seed_ratio_limit: 1.5,
            seed_idle_enabled: false,
            seed_idle_limit_minutes: 10,
            ..CoreSettings::default()
        };
        let global = GlobalSeedLimits::from_settings(&settings);
        assert_eq!(global.ratio, Some(1.5));
        assert_eq!(global.idle_minutes, None);
    }

    #[test]
    fn retain_drops_departed_torrents() {
        let mut limits = SeedLimits::new();
        let now = Instant::now();
        limits.configure(1, &ratio_limit(1.0), now);
        limits.configure(2, &ratio_limit(1.0), now);
        limits.retain(&HashSet::from([2]));
        assert!(limits.get(1).is_none());
        assert_eq!(limits.len(), 1);
    }
}
