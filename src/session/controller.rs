//! Session controller
//!
//! Obtains capture authorization and brings up the single recording service.

use super::service::{RecordingService, ServiceRegistry};
use crate::capture::{AuthorizationBroker, AuthorizationOutcome};
use crate::codec::MediaBackend;
use crate::recorder::{RecordStatus, SlotStatus};
use crate::utils::error::{RecorderError, RecorderResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Poll interval while waiting for a launched service to become ready
pub const SESSION_READY_POLL: Duration = Duration::from_millis(100);

/// A granted, ready recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorized {
    pub session_id: Uuid,
}

/// Clears the in-flight marker however `begin_session` exits
struct PendingRequest(Arc<AtomicBool>);

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SessionController {
    broker: Arc<dyn AuthorizationBroker>,
    backend: Arc<dyn MediaBackend>,
    registry: Arc<ServiceRegistry>,
    status: Arc<watch::Sender<RecordStatus>>,
    pending: Arc<AtomicBool>,
}

impl SessionController {
    pub fn new(
        broker: Arc<dyn AuthorizationBroker>,
        backend: Arc<dyn MediaBackend>,
        registry: Arc<ServiceRegistry>,
        status: Arc<watch::Sender<RecordStatus>>,
    ) -> Self {
        Self {
            broker,
            backend,
            registry,
            status,
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_request_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Request capture authorization and launch the recording service
    ///
    /// Completes only after the service is ready to accept a start request.
    pub async fn begin_session(&self) -> RecorderResult<Authorized> {
        if self.registry.is_occupied() {
            tracing::debug!("Record service is already running");
            return Err(RecorderError::AlreadyRunning);
        }
        if self
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Authorization request already in flight");
            return Err(RecorderError::AuthorizationInFlight);
        }
        let _pending = PendingRequest(self.pending.clone());

        tracing::debug!("Requesting capture authorization");
        let source = match self.broker.request_authorization().await {
            AuthorizationOutcome::Granted(source) => source,
            AuthorizationOutcome::Denied => {
                tracing::info!("Capture authorization denied");
                return Err(RecorderError::AuthorizationDenied);
            }
            AuthorizationOutcome::PermanentlyDenied => {
                tracing::info!("Capture authorization permanently denied");
                return Err(RecorderError::AuthorizationPermanentlyDenied);
            }
        };
        tracing::info!("Capture authorization granted");

        let lease = match self.registry.acquire() {
            Ok(lease) => lease,
            Err(e) => {
                source.stop();
                return Err(e);
            }
        };
        let session_id = lease.id();

        let backend = self.backend.clone();
        let registry = self.registry.clone();
        let status = self.status.clone();
        tokio::spawn(async move {
            let service = RecordingService::launch(session_id, source, backend, &registry, status);
            if !lease.install(service.clone()) {
                service.finish().await;
            }
        });

        self.wait_until_ready(session_id).await?;
        Ok(Authorized { session_id })
    }

    async fn wait_until_ready(&self, session_id: Uuid) -> RecorderResult<()> {
        loop {
            match self.registry.status_of(session_id) {
                SlotStatus::Ready => {
                    tracing::debug!("[{}] Recording service ready", session_id);
                    return Ok(());
                }
                SlotStatus::Launching => tokio::time::sleep(SESSION_READY_POLL).await,
                SlotStatus::Gone => {
                    return Err(RecorderError::Capture(
                        "recording service exited before becoming ready".to_string(),
                    ))
                }
            }
        }
    }
}
