//! System audio capture through cpal
//!
//! Provides an [`AudioCaptureStream`] for platforms where the default input
//! (or loopback) device is reachable through cpal. Samples are downmixed to
//! the requested channel count, converted to PCM 16-bit little endian and
//! queued until the audio feed loop reads them.

use super::traits::AudioCaptureStream;
use crate::utils::error::{RecorderError, RecorderResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

/// Bounded PCM queue shared between the cpal callback and the reader
struct PcmQueue {
    bytes: Mutex<VecDeque<u8>>,
    capacity: usize,
}

impl PcmQueue {
    fn new(capacity: usize) -> Self {
        Self {
            bytes: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append samples, dropping the oldest bytes once full
    fn push_samples(&self, samples: impl Iterator<Item = i16>) {
        let mut bytes = self.bytes.lock();
        for sample in samples {
            for b in sample.to_le_bytes() {
                if bytes.len() == self.capacity {
                    bytes.pop_front();
                }
                bytes.push_back(b);
            }
        }
    }

    fn drain_into(&self, buf: &mut [u8]) -> usize {
        let mut bytes = self.bytes.lock();
        // Keep whole 16-bit samples together
        let n = bytes.len().min(buf.len()) & !1;
        for (dst, src) in buf.iter_mut().zip(bytes.drain(..n)) {
            *dst = src;
        }
        n
    }

    fn clear(&self) {
        self.bytes.lock().clear();
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Average interleaved frames of `device_channels` down to `target_channels`
fn downmix<T: Copy>(
    data: &[T],
    device_channels: usize,
    target_channels: usize,
    to_f32: impl Fn(T) -> f32,
) -> Vec<i16> {
    let device_channels = device_channels.max(1);
    let target_channels = target_channels.clamp(1, device_channels);
    let group = device_channels / target_channels;
    let mut out = Vec::with_capacity(data.len() / group.max(1));
    for frame in data.chunks(device_channels) {
        for c in 0..target_channels {
            let start = (c * group).min(frame.len());
            let end = ((c + 1) * group).min(frame.len());
            let slice = &frame[start..end];
            if slice.is_empty() {
                out.push(0);
                continue;
            }
            let sum: f32 = slice.iter().map(|&s| to_f32(s)).sum();
            out.push(f32_to_i16(sum / slice.len() as f32));
        }
    }
    out
}

/// cpal-backed audio capture stream
pub struct SystemAudioCapture {
    queue: Arc<PcmQueue>,
    is_recording: Arc<AtomicBool>,
    stream_handle: Option<JoinHandle<()>>,
}

impl SystemAudioCapture {
    /// Open the default input device at `sample_rate` and start capturing
    pub fn open(sample_rate: u32, channels: u16, buffer_bytes: usize) -> RecorderResult<Self> {
        let queue = Arc::new(PcmQueue::new(buffer_bytes.max(2)));
        let is_recording = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        // cpal streams are not Send; keep the stream on its own thread
        let handle = {
            let queue = queue.clone();
            let is_recording = is_recording.clone();
            std::thread::spawn(move || {
                let host = cpal::default_host();
                let device = match host.default_input_device() {
                    Some(d) => d,
                    None => {
                        let _ = ready_tx.send(Err("No default input device".to_string()));
                        return;
                    }
                };

                let supported = match device.default_input_config() {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("Failed to get audio config: {}", e)));
                        return;
                    }
                };

                let device_channels = supported.channels() as usize;
                let target_channels = channels as usize;
                let stream_config = StreamConfig {
                    channels: supported.channels(),
                    sample_rate: cpal::SampleRate(sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let err_fn = |err: cpal::StreamError| tracing::error!("System audio stream error: {}", err);
                let stream = match supported.sample_format() {
                    SampleFormat::F32 => {
                        let queue = queue.clone();
                        let is_rec = is_recording.clone();
                        device.build_input_stream(
                            &stream_config,
                            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                                if is_rec.load(Ordering::Relaxed) {
                                    queue.push_samples(downmix(data, device_channels, target_channels, |s| s).into_iter());
                                }
                            },
                            err_fn,
                            None,
                        )
                    }
                    SampleFormat::I16 => {
                        let queue = queue.clone();
                        let is_rec = is_recording.clone();
                        device.build_input_stream(
                            &stream_config,
                            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                                if is_rec.load(Ordering::Relaxed) {
                                    let mono = downmix(data, device_channels, target_channels, |s| {
                                        s as f32 / i16::MAX as f32
                                    });
                                    queue.push_samples(mono.into_iter());
                                }
                            },
                            err_fn,
                            None,
                        )
                    }
                    other => {
                        let _ = ready_tx.send(Err(format!("Unsupported sample format: {:?}", other)));
                        return;
                    }
                };

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("Failed to build input stream: {}", e)));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(format!("Failed to start audio stream: {}", e)));
                    return;
                }

                tracing::info!(
                    "System audio stream started ({}Hz, {}ch -> {}ch)",
                    sample_rate,
                    device_channels,
                    target_channels
                );
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while recording
                while is_recording.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(20));
                }

                tracing::info!("System audio stream stopped");
            })
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                queue,
                is_recording,
                stream_handle: Some(handle),
            }),
            Ok(Err(message)) => {
                let _ = handle.join();
                Err(RecorderError::Capture(message))
            }
            Err(_) => {
                let _ = handle.join();
                Err(RecorderError::Capture("Audio capture thread exited early".to_string()))
            }
        }
    }
}

impl AudioCaptureStream for SystemAudioCapture {
    fn read(&mut self, buf: &mut [u8]) -> RecorderResult<usize> {
        Ok(self.queue.drain_into(buf))
    }

    fn stop(&mut self) {
        self.is_recording.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stream_handle.take() {
            let _ = handle.join();
        }
    }

    fn release(&mut self) {
        self.stop();
        self.queue.clear();
    }
}

impl Drop for SystemAudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
