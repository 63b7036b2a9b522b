use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::encoder::AudioEncoder;

/// One delivery from the capture device.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureFrame {
    /// Interleaved samples at the device's native rate
    Samples(Vec<f32>),
    /// The device failed; capture cannot continue
    DeviceError(String),
}

/// Capture pump lifecycle notifications for the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// The capture device failed
    InputLost { reason: String },
    /// The capture source closed normally
    Finished { chunks_sent: u64 },
}

/// Where encoded wire chunks go. Sending must never block.
pub trait AudioUplink: Send + Sync {
    /// Returns `false` when the chunk was dropped.
    fn send_audio(&self, pcm: Bytes) -> bool;
}

/// Shared switch the conversation uses to pause, resume and stop upload.
#[derive(Debug, Clone, Default)]
pub struct CaptureGate {
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl CaptureGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire) && !self.is_stopped()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Run the encoder over capture frames on a background task.
///
/// Samples captured while the gate is closed are discarded rather than
/// buffered, so resuming never uploads stale speech. A device error is
/// reported once as [`CaptureEvent::InputLost`] and ends the pump; it is not
/// retried.
pub fn spawn_capture_pump(
    mut encoder: AudioEncoder,
    mut frames: mpsc::Receiver<CaptureFrame>,
    uplink: Arc<dyn AudioUplink>,
    gate: CaptureGate,
    events: mpsc::UnboundedSender<CaptureEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sent: u64 = 0;
        let mut dropped: u64 = 0;

        while let Some(frame) = frames.recv().await {
            if gate.is_stopped() {
                break;
            }

            match frame {
                CaptureFrame::Samples(samples) => {
                    if !gate.is_enabled() {
                        continue;
                    }
                    for chunk in encoder.push(&samples) {
                        if uplink.send_audio(chunk) {
                            sent += 1;
                        } else {
                            dropped += 1;
                        }
                    }
                }
                CaptureFrame::DeviceError(reason) => {
                    error!(reason = %reason, "Capture device failed");
                    encoder.stop();
                    let _ = events.send(CaptureEvent::InputLost { reason });
                    return;
                }
            }
        }

        if !gate.is_stopped() && gate.is_enabled() {
            if let Some(tail) = encoder.flush() {
                if uplink.send_audio(tail) {
                    sent += 1;
                }
            }
        }
        encoder.stop();

        if dropped > 0 {
            debug!(dropped, "Capture pump dropped chunks while transport was down");
        }
        info!(chunks_sent = sent, "Capture finished");
        let _ = events.send(CaptureEvent::Finished { chunks_sent: sent });
    })
}
