//! Connection quality sampling.

use crate::peer::PeerConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Advisory link quality for the call UI. `None` means unknown, never zero;
/// a transport that does not report a value must not look idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    /// Current round-trip time.
    pub rtt: Option<Duration>,
    /// Combined send+receive rate over the last sampling window.
    pub bitrate_kbps: Option<u32>,
}

impl ConnectionMetrics {
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            rtt: None,
            bitrate_kbps: None,
        }
    }
}

/// Polls transport counters every `period` and reports derived metrics on
/// `updates`. The first tick has no previous reading, so its bitrate is
/// unknown. Runs until cancelled or until the receiver goes away.
pub(crate) fn spawn_metrics_sampler(
    pc: Arc<dyn PeerConnection>,
    period: Duration,
    updates: mpsc::Sender<ConnectionMetrics>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of `interval` fires immediately; skip it so the
        // window between readings is always a full period.
        ticker.tick().await;

        let mut previous: Option<(Instant, u64)> = None;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let sample = match pc.transport_sample().await {
                        Ok(sample) => sample,
                        Err(err) => {
                            debug!(error = %err, "transport stats unavailable");
                            continue;
                        }
                    };
                    let now = Instant::now();
                    let total = sample.bytes_sent + sample.bytes_received;
                    let bitrate_kbps = previous.map(|(at, bytes)| {
                        bitrate_from_delta(total.saturating_sub(bytes), now.duration_since(at))
                    });
                    previous = Some((now, total));

                    let metrics = ConnectionMetrics {
                        rtt: sample.rtt,
                        bitrate_kbps,
                    };
                    if updates.send(metrics).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bitrate_from_delta(bytes: u64, elapsed: Duration) -> u32 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0;
    }
    (bytes as f64 * 8.0 / secs / 1000.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioProbe, AudioTrack};
    use crate::peer::{PeerError, TransportSample};
    use crate::signaling::SessionDescription;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedTransport {
        samples: Mutex<Vec<TransportSample>>,
    }

    #[async_trait]
    impl PeerConnection for ScriptedTransport {
        async fn add_track(&self, _track: Arc<dyn AudioTrack>) -> Result<(), PeerError> {
            Ok(())
        }
        async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
            unimplemented!("not used by the sampler")
        }
        async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
            unimplemented!("not used by the sampler")
        }
        async fn set_local_description(&self, _sdp: SessionDescription) -> Result<(), PeerError> {
            Ok(())
        }
        async fn set_remote_description(&self, _sdp: SessionDescription) -> Result<(), PeerError> {
            Ok(())
        }
        async fn add_ice_candidate(
            &self,
            _candidate: crate::signaling::IceCandidateInit,
        ) -> Result<(), PeerError> {
            Ok(())
        }
        async fn transport_sample(&self) -> Result<TransportSample, PeerError> {
            let mut samples = self.samples.lock().unwrap();
            if samples.is_empty() {
                Err(PeerError::Connection("no more samples".into()))
            } else {
                Ok(samples.remove(0))
            }
        }
        fn remote_probe(&self) -> Option<Arc<dyn AudioProbe>> {
            None
        }
        async fn close(&self) {}
    }

    #[test]
    fn test_bitrate_from_delta() {
        // 37_500 bytes over 3s = 100 kbps.
        assert_eq!(bitrate_from_delta(37_500, Duration::from_secs(3)), 100);
        assert_eq!(bitrate_from_delta(0, Duration::from_secs(3)), 0);
        assert_eq!(bitrate_from_delta(1000, Duration::ZERO), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_reading_has_unknown_bitrate() {
        let pc = Arc::new(ScriptedTransport {
            samples: Mutex::new(vec![
                TransportSample {
                    bytes_sent: 0,
                    bytes_received: 0,
                    rtt: Some(Duration::from_millis(40)),
                },
                TransportSample {
                    bytes_sent: 20_000,
                    bytes_received: 17_500,
                    rtt: Some(Duration::from_millis(42)),
                },
            ]),
        });
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        spawn_metrics_sampler(pc, Duration::from_secs(3), tx, cancel.clone());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.rtt, Some(Duration::from_millis(40)));
        assert_eq!(first.bitrate_kbps, None);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.bitrate_kbps, Some(100));
        cancel.cancel();
    }
}
