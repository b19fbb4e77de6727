//! Speaking-activity detection.
//!
//! Samples frequency spectrums from the local and remote audio probes and
//! turns them into coarse speaking flags for the call UI. Flags are
//! advisory: they drive avatar highlights, nothing else.

use crate::media::AudioProbe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Number of spectrum bins requested from a probe per sample.
const SPECTRUM_BINS: usize = 32;

/// One speaking-activity reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct SpeakingSample {
    pub local: bool,
    pub remote: bool,
}

/// Polls the probes every `period` and reports a sample whenever either
/// flag changes. A missing probe reads as not speaking. Runs until
/// cancelled or until the receiver goes away.
pub(crate) fn spawn_speaking_monitor(
    local: Option<Arc<dyn AudioProbe>>,
    remote: Option<Arc<dyn AudioProbe>>,
    period: Duration,
    threshold: f32,
    samples: mpsc::Sender<SpeakingSample>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut bins = [0.0f32; SPECTRUM_BINS];
        let mut last = SpeakingSample::default();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let sample = SpeakingSample {
                        local: is_speaking(local.as_deref(), &mut bins, threshold),
                        remote: is_speaking(remote.as_deref(), &mut bins, threshold),
                    };
                    if sample != last {
                        last = sample;
                        if samples.send(sample).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
}

#[allow(clippy::cast_precision_loss)]
fn is_speaking(probe: Option<&dyn AudioProbe>, bins: &mut [f32], threshold: f32) -> bool {
    let Some(probe) = probe else {
        return false;
    };
    let filled = probe.spectrum(bins);
    if filled == 0 {
        return false;
    }
    let mean = bins[..filled].iter().sum::<f32>() / filled as f32;
    mean > threshold
}
