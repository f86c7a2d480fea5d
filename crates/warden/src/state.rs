//! Application state and shared resources.

use std::sync::Arc;

use crate::captcha::{CaptchaGenerator, ChallengeStore};
use crate::config::AppConfig;
use crate::session::SessionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Session-bound challenge store
    pub challenges: Arc<ChallengeStore>,

    /// CAPTCHA generator
    pub generator: Arc<CaptchaGenerator>,

    /// Caller session registry
    pub sessions: Arc<SessionRegistry>,

    /// Process start time, for uptime reporting
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state from configuration
    pub fn new(config: AppConfig) -> Self {
        let challenges = Arc::new(ChallengeStore::new(
            config.captcha.expire_period(),
            config.captcha.gc_interval(),
        ));
        let generator = Arc::new(CaptchaGenerator::new(
            config.captcha.digits_len,
            config.captcha.img_width,
            config.captcha.img_height,
            config.captcha.expire_period_secs,
        ));
        let sessions = Arc::new(SessionRegistry::new(config.session.idle_timeout()));

        Self {
            config,
            challenges,
            generator,
            sessions,
            started_at: chrono::Utc::now(),
        }
    }
}
