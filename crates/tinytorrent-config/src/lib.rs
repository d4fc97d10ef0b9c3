#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Session settings for the TinyTorrent engine.
//!
//! Layout: `model.rs` (settings value objects), `settings.rs` (`apply_update` and the
//! alternate-speed schedule), `engine.rs` (engine parameter translation), `codec.rs`
//! (persisted key/value codec).

pub mod codec;
pub mod engine;
pub mod error;
pub mod model;
pub mod settings;

pub use engine::{
    ConnectionLimits, EncryptionLevel, EncryptionPolicy, EncryptionSettings, EngineSettings,
    NetworkSettings, ProxySettings, QueueSettings, RateLimits, SettingsPatch,
    build_engine_settings, connection_limits, kbps_to_bytes, network_settings, proxy_settings,
    queue_settings, rate_limits,
};
pub use error::{ConfigError, ConfigResult};
pub use model::{
    CoreSettings, DEFAULT_LISTEN_INTERFACE, EncryptionMode, HistoryConfig,
    MIN_HISTORY_INTERVAL_SECONDS, ProxyType, SessionUpdate,
};
pub use settings::{ApplyResult, apply_update, should_use_alt_speed, should_use_alt_speed_now};
