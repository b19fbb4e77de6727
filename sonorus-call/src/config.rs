//! Call runtime configuration.

use std::time::Duration;

/// Tunables for call sessions and the manager.
///
/// The defaults match the behavior the call UI was designed around: a one
/// minute ring, stats every few seconds, and a short grace window so a
/// failure banner is visible before the session record disappears.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// ICE servers handed to every peer connection.
    pub ice_servers: Vec<IceServerConfig>,
    /// How long an unanswered call rings before closing as no-answer.
    pub ring_timeout: Duration,
    /// Period between transport stat samples while connected.
    pub stats_interval: Duration,
    /// Period between speaking-activity samples while connected.
    pub speaking_interval: Duration,
    /// Mean spectrum magnitude (0-255 bin scale) above which a party
    /// counts as speaking.
    pub speaking_threshold: f32,
    /// How long a failed session stays observable before final teardown.
    pub failure_linger: Duration,
    /// Buffer capacity for signaling subscriptions and internal channels.
    pub signal_buffer: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig::default()],
            ring_timeout: Duration::from_secs(60),
            stats_interval: Duration::from_secs(3),
            speaking_interval: Duration::from_millis(200),
            speaking_threshold: 20.0,
            failure_linger: Duration::from_secs(2),
            signal_buffer: 64,
        }
    }
}

/// A single STUN or TURN server entry.
#[derive(Debug, Clone)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            username: None,
            credential: None,
        }
    }
}

impl IceServerConfig {
    /// Convenience constructor for a credentialed TURN server.
    #[must_use]
    pub fn turn(
        urls: Vec<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls,
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}
