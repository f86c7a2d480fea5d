//! Shared constants for Portcullis components.

/// Default Warden HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8484";

/// Default challenge lifetime (5 minutes); 0 disables time expiry
pub const DEFAULT_EXPIRE_PERIOD_SECS: u64 = 300;

/// Default sweep interval for expired challenge bindings (1 minute)
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 60;

/// Default number of digits in a challenge answer
pub const DEFAULT_DIGITS_LEN: usize = 6;

/// Default session cookie name
pub const DEFAULT_SESSION_COOKIE: &str = "portcullis_sid";

/// Default idle session lifetime (30 minutes)
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 1800;

/// Default idle-session prune interval (5 minutes)
pub const DEFAULT_SESSION_PRUNE_SECS: u64 = 300;

/// Session key namespacing
pub mod session_keys {
    /// Namespace prefix for challenge digits stored in a session.
    /// Values live under "identify_{challenge_id}".
    pub const IDENTIFY_PREFIX: &str = "identify";

    /// Key holding the session's issued form tokens
    pub const FORM_TOKENS: &str = "form_tokens";
}
