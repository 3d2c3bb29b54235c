//! Alert dispatch: local save first, then a single upload attempt.
//!
//! A failed upload never rolls back local artifacts; the sidecar keeps the
//! failure so `upload_pending` can retry later through `upload_stored`.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, Utc};
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::composite::{build_composite, DEFAULT_COLUMNS};
use crate::frame::Frame;
use crate::storage::{self, AlertRecord, CaptureStore, StoredAlert, UploadState};
use crate::transport::{UploadError, UploadReceipt, UploadRequest, Uploader};

pub const DEFAULT_LOCATION: &str = "living_room";
pub const DEFAULT_DESCRIPTION: &str = "Fall detected in living room";

/// One accepted fall. Moved into the dispatcher and consumed there.
#[derive(Debug)]
pub struct FallAlert {
    /// Frame on which the fall was detected.
    pub frame: Frame,
    /// Buffered frames before `frame`, oldest first.
    pub lead_up_frames: Vec<Frame>,
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub description: String,
}

/// Outcome of handing one alert (or stored alert) to the upload collaborator.
#[derive(Clone, Debug, Default)]
pub struct UploadResult {
    pub success: bool,
    /// Stem of the local artifacts, when they were written.
    pub stem: Option<String>,
    pub receipt: Option<UploadReceipt>,
    pub error: Option<String>,
}

impl UploadResult {
    fn failed(stem: Option<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            stem,
            receipt: None,
            error: Some(error.into()),
        }
    }
}

/// Where the processing loop hands accepted alerts.
pub trait AlertSink {
    fn submit(&mut self, alert: FallAlert);

    /// Flush queued work before the process exits.
    fn shutdown(&mut self) {}
}

pub struct EventDispatcher {
    store: CaptureStore,
    uploader: Arc<dyn Uploader>,
    columns: u32,
}

impl EventDispatcher {
    pub fn new(store: CaptureStore, uploader: Arc<dyn Uploader>) -> Self {
        Self {
            store,
            uploader,
            columns: DEFAULT_COLUMNS,
        }
    }

    pub fn with_columns(mut self, columns: u32) -> Self {
        self.columns = columns.max(1);
        self
    }

    pub fn store(&self) -> &CaptureStore {
        &self.store
    }

    /// Persist, then upload once. Never panics or propagates; failures are logged.
    pub fn dispatch(&self, alert: FallAlert) -> UploadResult {
        let (stem, mut record) = match self.persist(&alert) {
            Ok(saved) => saved,
            Err(err) => {
                log::error!("failed to save alert locally: {:#}", err);
                return UploadResult::failed(None, format!("{:#}", err));
            }
        };
        self.upload_stored(&stem, &mut record)
    }

    /// Write primary frame, composite, lead-up frames and sidecar.
    pub fn persist(&self, alert: &FallAlert) -> Result<(String, AlertRecord)> {
        let composite = if alert.lead_up_frames.is_empty() {
            None
        } else {
            let tiles: Vec<_> = alert
                .lead_up_frames
                .iter()
                .chain(std::iter::once(&alert.frame))
                .map(|f| f.image().clone())
                .collect();
            build_composite(&tiles, self.columns)
        };

        let record = AlertRecord {
            location: alert.location.clone(),
            description: alert.description.clone(),
            occurred_at: alert.timestamp,
            lead_up_frames: alert.lead_up_frames.len(),
            upload: UploadState::default(),
        };
        let saved = self.store.save_alert(
            alert.timestamp.with_timezone(&Local),
            &alert.frame,
            &alert.lead_up_frames,
            composite.as_ref(),
            &record,
        )?;
        Ok((saved.stem, record))
    }

    /// Upload an alert already on disk and record the outcome in its sidecar.
    pub fn upload_stored(&self, stem: &str, record: &mut AlertRecord) -> UploadResult {
        let primary = self.store.primary_path(stem);
        let image_jpeg = match storage::read_file(&primary) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("cannot upload {}: {:#}", stem, err);
                return UploadResult::failed(Some(stem.to_string()), format!("{:#}", err));
            }
        };
        let filename = primary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{stem}{}", storage::PRIMARY_SUFFIX));

        let request = UploadRequest {
            image_jpeg,
            filename,
            location: record.location.clone(),
            description: record.description.clone(),
            occurred_at: record.occurred_at,
        };

        match self.uploader.upload(&request) {
            Ok(receipt) => {
                if let Err(err) = self.store.mark_uploaded(stem, record, &receipt) {
                    log::warn!("uploaded {} but could not update sidecar: {:#}", stem, err);
                }
                UploadResult {
                    success: true,
                    stem: Some(stem.to_string()),
                    receipt: Some(receipt),
                    error: None,
                }
            }
            Err(err) => {
                match &err {
                    UploadError::Connection(_) => log::error!(
                        "upload of {} failed: {} (is the server running at {}?)",
                        stem,
                        err,
                        self.uploader.endpoint()
                    ),
                    _ => log::error!("upload of {} failed: {}", stem, err),
                }
                if let Err(mark_err) = self.store.mark_failed(stem, record, &err.to_string()) {
                    log::warn!("could not record upload failure for {}: {:#}", stem, mark_err);
                }
                log::info!("alert {} kept locally in {}", stem, self.store.root().display());
                UploadResult::failed(Some(stem.to_string()), err.to_string())
            }
        }
    }

    /// Stored alerts to re-upload: unsent ones, or every one with `include_uploaded`.
    pub fn reconcile_candidates(&self, include_uploaded: bool) -> Result<Vec<StoredAlert>> {
        let alerts = self.store.list_alerts()?;
        Ok(alerts
            .into_iter()
            .filter(|alert| include_uploaded || !alert.is_uploaded())
            .collect())
    }

    /// Re-run the upload contract for one stored alert.
    ///
    /// Images without a sidecar get `defaults` for location and description
    /// and the capture time encoded in their filename.
    pub fn reconcile_one(&self, alert: StoredAlert, defaults: &ReconcileDefaults) -> UploadResult {
        let occurred_at = alert.occurred_at().unwrap_or_else(Utc::now);
        let mut record = alert.record.unwrap_or_else(|| AlertRecord {
            location: defaults.location.clone(),
            description: defaults.description.clone(),
            occurred_at,
            lead_up_frames: 0,
            upload: UploadState::default(),
        });
        self.upload_stored(&alert.stem, &mut record)
    }
}

/// Metadata used for stored images that have no sidecar.
#[derive(Clone, Debug)]
pub struct ReconcileDefaults {
    pub location: String,
    pub description: String,
}

impl Default for ReconcileDefaults {
    fn default() -> Self {
        Self {
            location: DEFAULT_LOCATION.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }
}

impl AlertSink for EventDispatcher {
    fn submit(&mut self, alert: FallAlert) {
        let result = self.dispatch(alert);
        log::info!(
            "alert dispatched: success={} stem={}",
            result.success,
            result.stem.as_deref().unwrap_or("-")
        );
    }
}

struct UploadJob {
    stem: String,
    record: AlertRecord,
}

/// Saves on the caller's thread and uploads on one worker thread.
///
/// When the queue is full the alert stays on disk as pending.
pub struct BackgroundDispatcher {
    dispatcher: Arc<EventDispatcher>,
    tx: Option<Sender<UploadJob>>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundDispatcher {
    pub fn spawn(dispatcher: EventDispatcher, queue_depth: usize) -> Result<Self> {
        let dispatcher = Arc::new(dispatcher);
        let (tx, rx) = bounded::<UploadJob>(queue_depth.max(1));
        let worker_dispatcher = Arc::clone(&dispatcher);
        let worker = std::thread::Builder::new()
            .name("fallwatch-upload".to_string())
            .spawn(move || {
                for mut job in rx {
                    let result = worker_dispatcher.upload_stored(&job.stem, &mut job.record);
                    log::info!(
                        "background upload: success={} stem={}",
                        result.success,
                        job.stem
                    );
                }
                log::debug!("upload worker exiting");
            })
            .map_err(|err| anyhow!("spawn upload worker: {}", err))?;
        Ok(Self {
            dispatcher,
            tx: Some(tx),
            worker: Some(worker),
        })
    }
}

impl AlertSink for BackgroundDispatcher {
    fn submit(&mut self, alert: FallAlert) {
        let (stem, record) = match self.dispatcher.persist(&alert) {
            Ok(saved) => saved,
            Err(err) => {
                log::error!("failed to save alert locally: {:#}", err);
                return;
            }
        };
        let Some(tx) = self.tx.as_ref() else {
            log::warn!("dispatcher shut down; {} left pending", stem);
            return;
        };
        match tx.try_send(UploadJob { stem, record }) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                log::warn!("upload queue full; {} left for upload_pending", job.stem)
            }
            Err(TrySendError::Disconnected(job)) => {
                log::error!("upload worker gone; {} left for upload_pending", job.stem)
            }
        }
    }

    fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("upload worker panicked");
            }
        }
    }
}

impl Drop for BackgroundDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
