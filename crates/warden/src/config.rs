//! Configuration management for Warden.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use portcullis_common::constants::{
    DEFAULT_DIGITS_LEN, DEFAULT_EXPIRE_PERIOD_SECS, DEFAULT_GC_INTERVAL_SECS, DEFAULT_LISTEN_ADDR,
    DEFAULT_SESSION_COOKIE, DEFAULT_SESSION_IDLE_SECS, DEFAULT_SESSION_PRUNE_SECS,
};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// CAPTCHA configuration
    #[serde(default)]
    pub captcha: CaptchaConfig,

    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,
}

/// CAPTCHA-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaptchaConfig {
    /// Challenge lifetime in seconds; 0 disables time expiry
    #[serde(default = "default_expire_period")]
    pub expire_period_secs: u64,

    /// How often expired challenge bindings are swept, in seconds;
    /// 0 disables the sweep worker
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,

    /// Number of digits in a challenge answer
    #[serde(default = "default_digits_len")]
    pub digits_len: usize,

    /// Rendered image width in pixels
    #[serde(default = "default_img_width")]
    pub img_width: u32,

    /// Rendered image height in pixels
    #[serde(default = "default_img_height")]
    pub img_height: u32,
}

impl CaptchaConfig {
    pub fn expire_period(&self) -> Duration {
        Duration::from_secs(self.expire_period_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            expire_period_secs: default_expire_period(),
            gc_interval_secs: default_gc_interval(),
            digits_len: default_digits_len(),
            img_width: default_img_width(),
            img_height: default_img_height(),
        }
    }
}

/// Session cookie and registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Cookie carrying the session id
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Idle session lifetime in seconds; 0 keeps sessions forever
    #[serde(default = "default_session_idle")]
    pub idle_timeout_secs: u64,

    /// How often idle sessions are pruned, in seconds; 0 disables pruning
    #[serde(default = "default_session_prune")]
    pub prune_interval_secs: u64,
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            idle_timeout_secs: default_session_idle(),
            prune_interval_secs: default_session_prune(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_expire_period() -> u64 { DEFAULT_EXPIRE_PERIOD_SECS }
fn default_gc_interval() -> u64 { DEFAULT_GC_INTERVAL_SECS }
fn default_digits_len() -> usize { DEFAULT_DIGITS_LEN }
fn default_img_width() -> u32 { 200 }
fn default_img_height() -> u32 { 80 }
fn default_cookie_name() -> String { DEFAULT_SESSION_COOKIE.to_string() }
fn default_session_idle() -> u64 { DEFAULT_SESSION_IDLE_SECS }
fn default_session_prune() -> u64 { DEFAULT_SESSION_PRUNE_SECS }

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }

        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            captcha: CaptchaConfig::default(),
            session: SessionConfig::default(),
        }
    }
}
