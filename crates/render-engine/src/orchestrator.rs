//! Render orchestration: one job at a time, observable status.
//!
//! ```text
//! Idle ──render──▶ Preparing ──staged──▶ Encoding ──ok──▶ Done
//!                      │                    │
//!                      └──────error─────────┴────────▶ Failed
//! ```
//!
//! `Done` and `Failed` accept a new render just like `Idle`. A render
//! requested while `Preparing` or `Encoding` is rejected and the running
//! job is left untouched.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, RwLock};

use layercut_common::error::{FailureKind, LayercutError, LayercutResult};
use layercut_overlay_model::overlay::{MediaRef, Overlay};
use layercut_overlay_model::store::OverlaySnapshot;
use layercut_overlay_model::transform::FrameSize;

use crate::encoder::{EncodeJob, EncodeSettings, EncodedOutput, Encoder};
use crate::filter_graph::{build_filter_plan, validate_overlays, BaseVideo};
use crate::media::{stage_inputs, MediaFetcher};

/// Lifecycle phase of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderPhase {
    Idle,
    Preparing,
    Encoding,
    Done,
    Failed,
}

impl RenderPhase {
    pub fn is_busy(self) -> bool {
        matches!(self, RenderPhase::Preparing | RenderPhase::Encoding)
    }
}

/// User-facing failure report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&LayercutError> for RenderFailure {
    fn from(err: &LayercutError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// A finished render.
#[derive(Debug, Clone, Serialize)]
pub struct RenderArtifact {
    pub job_id: u64,
    #[serde(skip)]
    pub bytes: Arc<[u8]>,
    pub size_bytes: usize,
    pub mime_type: String,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

impl RenderArtifact {
    /// Suggested download name, e.g. `render-3.mp4`.
    pub fn file_name(&self) -> String {
        let ext = match self.mime_type.as_str() {
            "video/webm" => "webm",
            _ => "mp4",
        };
        format!("render-{}.{ext}", self.job_id)
    }

    pub async fn write_to(&self, path: &Path) -> LayercutResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, &self.bytes).await?;
        Ok(())
    }
}

/// Observable orchestrator state.
#[derive(Debug, Clone, Serialize)]
pub struct RenderStatus {
    pub phase: RenderPhase,
    /// Id of the current or most recent job, 0 before the first render.
    pub job_id: u64,
    /// Whole percent, only meaningful while encoding.
    pub progress_percent: u8,
    pub last_error: Option<RenderFailure>,
    pub artifact: Option<RenderArtifact>,
}

impl RenderStatus {
    fn idle() -> Self {
        Self {
            phase: RenderPhase::Idle,
            job_id: 0,
            progress_percent: 0,
            last_error: None,
            artifact: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.phase.is_busy()
    }
}

/// What to render: the base video, an overlay snapshot and optional audio.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub base_video: MediaRef,
    pub frame: FrameSize,
    pub overlays: Vec<Overlay>,
    pub audio: Option<MediaRef>,
}

impl RenderRequest {
    pub fn from_snapshot(base_video: MediaRef, snapshot: OverlaySnapshot) -> Self {
        Self {
            base_video,
            frame: snapshot.frame,
            overlays: snapshot.into_vec(),
            audio: None,
        }
    }

    pub fn with_audio(mut self, audio: MediaRef) -> Self {
        self.audio = Some(audio);
        self
    }
}

/// Drives renders through fetch, plan and encode.
pub struct RenderOrchestrator {
    encoder: RwLock<Box<dyn Encoder>>,
    fetcher: Arc<dyn MediaFetcher>,
    settings: EncodeSettings,
    status: watch::Sender<RenderStatus>,
    cancel: Mutex<Option<watch::Sender<bool>>>,
    next_job: AtomicU64,
}

impl RenderOrchestrator {
    pub fn new(
        encoder: Box<dyn Encoder>,
        fetcher: Arc<dyn MediaFetcher>,
        settings: EncodeSettings,
    ) -> Self {
        let (status, _) = watch::channel(RenderStatus::idle());
        Self {
            encoder: RwLock::new(encoder),
            fetcher,
            settings,
            status,
            cancel: Mutex::new(None),
            next_job: AtomicU64::new(1),
        }
    }

    /// Initialize the encoder backend.
    pub async fn init(&self) -> LayercutResult<()> {
        let mut encoder = self.encoder.write().await;
        tracing::info!(encoder = encoder.name(), "Initializing encoder");
        encoder.init().await
    }

    pub async fn is_ready(&self) -> bool {
        self.encoder.read().await.is_ready()
    }

    /// Release the encoder. Refused while a job is running.
    pub async fn dispose(&self) -> LayercutResult<()> {
        if self.status.borrow().is_busy() {
            return Err(LayercutError::rejected(
                "cannot dispose the encoder while a render is running",
            ));
        }
        self.encoder.write().await.dispose().await
    }

    pub fn settings(&self) -> &EncodeSettings {
        &self.settings
    }

    /// Current status snapshot.
    pub fn status(&self) -> RenderStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<RenderStatus> {
        self.status.subscribe()
    }

    /// Cancel the running job. Returns whether there was one to cancel.
    pub fn cancel(&self) -> bool {
        let (busy, job_id) = {
            let status = self.status.borrow();
            (status.is_busy(), status.job_id)
        };
        let guard = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) if busy => {
                tracing::info!(job_id, "Cancelling render");
                tx.send_replace(true);
                true
            }
            _ => false,
        }
    }

    /// Run one render to completion.
    ///
    /// Rejected with [`LayercutError::ConcurrencyRejection`] while another
    /// render is in flight; that rejection does not touch the status.
    pub async fn render(&self, request: RenderRequest) -> LayercutResult<RenderArtifact> {
        let job_id = self.next_job.fetch_add(1, Ordering::Relaxed);

        // The busy check, the cancel handle and the transition to Preparing
        // happen atomically under the watch channel's lock, so a job is
        // cancellable as soon as it is visible as busy.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let started = self.status.send_if_modified(|status| {
            if status.is_busy() {
                return false;
            }
            *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel_tx);
            *status = RenderStatus {
                phase: RenderPhase::Preparing,
                job_id,
                progress_percent: 0,
                last_error: None,
                artifact: None,
            };
            true
        });
        if !started {
            let running = self.status.borrow().job_id;
            tracing::warn!(job_id, running_job = running, "Render rejected, another job is running");
            return Err(LayercutError::rejected(format!(
                "render job {running} is still running"
            )));
        }

        tracing::info!(
            job_id,
            overlays = request.overlays.len(),
            base = %request.base_video,
            "Starting render"
        );
        let start = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancellation(cancel_rx) => Err(LayercutError::Cancelled),
            result = self.execute(job_id, request) => result,
        };

        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match result {
            Ok(output) => {
                let artifact = RenderArtifact {
                    job_id,
                    size_bytes: output.bytes.len(),
                    bytes: Arc::from(output.bytes),
                    mime_type: output.mime_type,
                    finished_at: Utc::now(),
                    elapsed_secs: start.elapsed().as_secs_f64(),
                };
                tracing::info!(
                    job_id,
                    size_bytes = artifact.size_bytes,
                    elapsed_secs = artifact.elapsed_secs,
                    "Render finished"
                );
                self.status.send_modify(|status| {
                    status.phase = RenderPhase::Done;
                    status.progress_percent = 0;
                    status.artifact = Some(artifact.clone());
                });
                Ok(artifact)
            }
            Err(err) => {
                tracing::error!(job_id, kind = err.kind().as_str(), error = %err, "Render failed");
                let failure = RenderFailure::from(&err);
                self.status.send_modify(|status| {
                    status.phase = RenderPhase::Failed;
                    status.progress_percent = 0;
                    status.last_error = Some(failure);
                });
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        job_id: u64,
        request: RenderRequest,
    ) -> LayercutResult<EncodedOutput> {
        let encoder = self.encoder.read().await;
        if !encoder.is_ready() {
            return Err(LayercutError::encode(format!(
                "encoder '{}' is not initialized",
                encoder.name()
            )));
        }

        validate_overlays(&request.overlays)?;
        let inputs = stage_inputs(
            self.fetcher.as_ref(),
            &request.base_video,
            &request.overlays,
            request.audio.as_ref(),
        )
        .await?;

        let base = BaseVideo {
            input: request.base_video.clone(),
            frame: request.frame,
        };
        let plan = build_filter_plan(&base, &request.overlays, request.audio.as_ref())?;
        let filter = plan.filter_complex();
        tracing::debug!(
            job_id,
            passthrough = plan.is_passthrough(),
            filter = filter.as_deref().unwrap_or("<copy>"),
            "Built filter plan"
        );

        self.status.send_modify(|status| {
            status.phase = RenderPhase::Encoding;
            status.progress_percent = 0;
        });

        let job = EncodeJob {
            job_id,
            inputs,
            plan,
            settings: self.settings.clone(),
        };
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let encode = encoder.encode(job, progress_tx);
        tokio::pin!(encode);

        // Progress left in the channel after the encode returns is dropped;
        // the terminal transition is authoritative.
        loop {
            tokio::select! {
                result = &mut encode => break result,
                Some(fraction) = progress_rx.recv() => self.record_progress(job_id, fraction),
            }
        }
    }

    /// Apply a progress report if it belongs to the encoding job. Progress
    /// never moves backwards within a job.
    fn record_progress(&self, job_id: u64, fraction: f64) {
        let percent = percent_of(fraction);
        self.status.send_if_modified(|status| {
            if status.job_id != job_id
                || status.phase != RenderPhase::Encoding
                || percent <= status.progress_percent
            {
                return false;
            }
            status.progress_percent = percent;
            true
        });
    }
}

/// Resolves once `cancel()` flips the flag; never if the sender goes away.
async fn cancellation(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn percent_of(fraction: f64) -> u8 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}
