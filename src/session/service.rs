//! Authorized recording service
//!
//! Exists only while a capture grant is held. Owns the grant and one
//! recording pipeline, and tears both down exactly once.

use crate::capture::CaptureSource;
use crate::codec::MediaBackend;
use crate::recorder::{
    RecordStatus, RecordingConfig, RecordingEvent, RecordingPipeline, RecordingState, RecordingSummary,
    SessionRegistry, StartRequest,
};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch, Mutex};
use uuid::Uuid;

pub type ServiceRegistry = SessionRegistry<RecordingService>;

pub struct RecordingService {
    id: Uuid,
    source: Arc<dyn CaptureSource>,
    pipeline: Mutex<RecordingPipeline>,
    pipeline_state: Arc<RwLock<RecordingState>>,
    registry: Weak<ServiceRegistry>,
    status: Arc<watch::Sender<RecordStatus>>,
    finished: AtomicBool,
}

impl RecordingService {
    /// Build the service around a granted capture source and start its fault supervisor
    pub fn launch(
        id: Uuid,
        source: Arc<dyn CaptureSource>,
        backend: Arc<dyn MediaBackend>,
        registry: &Arc<ServiceRegistry>,
        status: Arc<watch::Sender<RecordStatus>>,
    ) -> Arc<Self> {
        let pipeline = RecordingPipeline::new(backend);
        let events = pipeline.subscribe();
        let service = Arc::new(Self {
            id,
            source,
            pipeline_state: pipeline.state_handle(),
            pipeline: Mutex::new(pipeline),
            registry: Arc::downgrade(registry),
            status,
            finished: AtomicBool::new(false),
        });

        tokio::spawn(supervise(Arc::downgrade(&service), events));
        tracing::info!("[{}] Recording service launched", id);
        service
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_recording(&self) -> bool {
        *self.pipeline_state.read() == RecordingState::Running
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub async fn start_recording(
        &self,
        target_path: PathBuf,
        width: u32,
        height: u32,
        config: RecordingConfig,
    ) -> RecorderResult<()> {
        let mut pipeline = self.pipeline.lock().await;
        if self.is_finished() {
            return Err(RecorderError::NotRunning);
        }
        let request = StartRequest {
            target_path,
            width,
            height,
            config,
        };
        pipeline.start(request, self.source.clone()).await
    }

    /// Stop recording, end the capture grant and vacate the registry slot
    ///
    /// Only the first call does anything; later calls wait for it to finish
    /// and return `None`.
    pub async fn finish(&self) -> Option<RecordingSummary> {
        let mut pipeline = self.pipeline.lock().await;
        if self.finished.swap(true, Ordering::SeqCst) {
            return None;
        }

        tracing::info!("[{}] Finishing recording service", self.id);
        let summary = pipeline.stop().await;
        if summary.is_none() {
            // The pipeline ends the grant itself when it ran
            self.source.stop();
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.release(self.id);
        }
        self.status.send_replace(RecordStatus::Completed);
        summary
    }
}

/// Finish the service when any loop reports a fault
async fn supervise(service: Weak<RecordingService>, mut events: broadcast::Receiver<RecordingEvent>) {
    loop {
        match events.recv().await {
            Ok(RecordingEvent::Fault { session_id, message }) => {
                let Some(service) = service.upgrade() else {
                    break;
                };
                tracing::warn!("[{}] Stopping after fault in pipeline {}: {}", service.id, session_id, message);
                service.finish().await;
                break;
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Fault supervisor skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
