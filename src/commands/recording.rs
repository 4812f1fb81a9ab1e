//! Recording control surface
//!
//! Entry points the UI drives: authorize, start, stop, and an observable
//! status plus the path of the last recording.

use crate::capture::AuthorizationBroker;
use crate::codec::MediaBackend;
use crate::recorder::{RecordStatus, RecordingConfig, RecordingSummary};
use crate::session::{Authorized, ServiceRegistry, SessionController};
use crate::utils::error::{RecorderError, RecorderResult};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// `<unix-millis>.mp4` under `dir`
pub fn default_output_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.mp4", Utc::now().timestamp_millis()))
}

/// Application state for recording
pub struct Recorder {
    controller: SessionController,
    registry: Arc<ServiceRegistry>,
    status: Arc<watch::Sender<RecordStatus>>,
    record_file_path: watch::Sender<Option<PathBuf>>,
}

impl Recorder {
    pub fn new(broker: Arc<dyn AuthorizationBroker>, backend: Arc<dyn MediaBackend>) -> Self {
        let registry = ServiceRegistry::new();
        let (status, _) = watch::channel(RecordStatus::NotStarted);
        let status = Arc::new(status);
        let (record_file_path, _) = watch::channel(None);
        Self {
            controller: SessionController::new(broker, backend, registry.clone(), status.clone()),
            registry,
            status,
            record_file_path,
        }
    }

    pub fn status(&self) -> watch::Receiver<RecordStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> RecordStatus {
        *self.status.borrow()
    }

    /// Path of the most recent successfully started recording
    pub fn record_file_path(&self) -> Option<PathBuf> {
        self.record_file_path.borrow().clone()
    }

    pub fn is_session_active(&self) -> bool {
        self.registry.is_occupied()
    }

    /// Ask for capture authorization and bring up the recording service
    pub async fn authorize(&self) -> RecorderResult<Authorized> {
        let result = self.controller.begin_session().await;
        match &result {
            Err(RecorderError::AuthorizationDenied) => {
                self.status.send_replace(RecordStatus::Denied);
            }
            Err(RecorderError::AuthorizationPermanentlyDenied) => {
                self.status.send_replace(RecordStatus::PermanentlyDenied);
            }
            Err(e) => tracing::warn!("Authorization did not complete: {}", e),
            Ok(_) => {}
        }
        result
    }

    /// Start recording into `target_path` on the authorized service
    ///
    /// Returns false if no service is running or the pipeline failed to start.
    pub async fn start_session(
        &self,
        target_path: impl Into<PathBuf>,
        width: u32,
        height: u32,
        config: RecordingConfig,
    ) -> bool {
        let Some(service) = self.registry.current() else {
            tracing::error!("Record service is not running, authorize first");
            return false;
        };

        let target_path = target_path.into();
        match service
            .start_recording(target_path.clone(), width, height, config)
            .await
        {
            Ok(()) => {
                self.record_file_path.send_replace(Some(target_path));
                self.status.send_replace(RecordStatus::Recording);
                true
            }
            Err(e) => {
                tracing::error!("Failed to start recording: {}", e);
                false
            }
        }
    }

    /// Authorize, then record into a timestamped file under `dir`
    pub async fn record(
        &self,
        dir: &Path,
        width: u32,
        height: u32,
        config: RecordingConfig,
    ) -> RecorderResult<PathBuf> {
        match self.authorize().await {
            Ok(_) | Err(RecorderError::AlreadyRunning) => {}
            Err(e) => return Err(e),
        }

        let target_path = default_output_path(dir);
        if self.start_session(target_path.clone(), width, height, config).await {
            Ok(target_path)
        } else {
            Err(RecorderError::NotRunning)
        }
    }

    /// Stop recording and shut the service down
    ///
    /// Never fails; without a running service it only updates the status. A
    /// service still launching is cancelled and shuts itself down.
    pub async fn stop(&self) -> Option<RecordingSummary> {
        let summary = match self.registry.current_or_cancel_launch() {
            Some(service) => service.finish().await,
            None => None,
        };
        self.status.send_replace(RecordStatus::Completed);
        summary
    }
}
