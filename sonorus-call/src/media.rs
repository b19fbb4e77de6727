//! Local audio capture abstraction.
//!
//! The crate never talks to an audio backend directly. The embedding
//! application supplies a [`MediaSource`] (browser `getUserMedia`, a native
//! capture pipeline, or a fake in tests) and the session layer only relies
//! on the small contract below: acquire, enable/disable, stop, probe.

use async_trait::async_trait;
use std::sync::Arc;

/// Audio capture failures, mapped from whatever backend the embedder uses.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("no audio input device available")]
    NoDevice,

    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Acquires the local microphone for a call.
///
/// Acquisition is scoped to a session: every exit path stops the returned
/// track, releasing the device.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire_audio(&self) -> Result<Arc<dyn AudioTrack>, MediaError>;
}

/// A live local audio track.
pub trait AudioTrack: Send + Sync {
    /// Enables or pauses capture without releasing the device. Used for
    /// mute; no signaling is involved.
    fn set_enabled(&self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Releases the underlying device. Must be idempotent.
    fn stop(&self);

    /// Analyser over this track's audio, for speaking detection.
    fn probe(&self) -> Arc<dyn AudioProbe>;
}

/// Snapshot access to the current frequency spectrum of an audio stream.
pub trait AudioProbe: Send + Sync {
    /// Fills `bins` with current frequency magnitudes on a 0-255 scale and
    /// returns how many bins were written. Returns 0 when no data is
    /// flowing yet.
    fn spectrum(&self, bins: &mut [f32]) -> usize;
}
