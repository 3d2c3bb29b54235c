//! Local alert artifacts.
//!
//! Every alert is written under the capture root before any upload:
//!
//! ```text
//! <stem>_fall.jpg          primary frame
//! <stem>_sequence.jpg      lead-up composite (only with lead-up frames)
//! <stem>_pre_fall/         frame_000.jpg .. oldest first
//! <stem>_fall.json         metadata + upload state
//! ```
//!
//! `<stem>` is the local capture time as `%Y%m%d_%H%M%S`, with `_1`, `_2`, ...
//! appended when several alerts land in the same second.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::frame::Frame;
use crate::transport::UploadReceipt;

pub const DEFAULT_CAPTURE_DIR: &str = "captured";
pub const PRIMARY_SUFFIX: &str = "_fall.jpg";
pub const SEQUENCE_SUFFIX: &str = "_sequence.jpg";
pub const PRE_FALL_SUFFIX: &str = "_pre_fall";
pub const SIDECAR_SUFFIX: &str = "_fall.json";

const STEM_FORMAT: &str = "%Y%m%d_%H%M%S";
const JPEG_QUALITY: u8 = 90;

/// Metadata persisted next to each primary frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub location: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub lead_up_frames: usize,
    #[serde(default)]
    pub upload: UploadState,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadState {
    pub uploaded: bool,
    pub attempts: u32,
    #[serde(default)]
    pub remote_id: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Paths written for one alert.
#[derive(Clone, Debug)]
pub struct SavedAlert {
    pub stem: String,
    pub primary: PathBuf,
    pub sequence: Option<PathBuf>,
    pub pre_fall_dir: Option<PathBuf>,
    pub sidecar: PathBuf,
}

/// An alert found on disk by `list_alerts`.
#[derive(Clone, Debug)]
pub struct StoredAlert {
    pub stem: String,
    pub primary: PathBuf,
    /// `None` for images saved without a sidecar.
    pub record: Option<AlertRecord>,
}

impl StoredAlert {
    pub fn is_uploaded(&self) -> bool {
        self.record.as_ref().is_some_and(|r| r.upload.uploaded)
    }

    /// Capture time: the sidecar's `occurred_at`, else the filename stamp.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        match &self.record {
            Some(record) => Some(record.occurred_at),
            None => stem_time(&self.stem),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PruneOptions {
    pub include_unsent: bool,
    pub dry_run: bool,
}

#[derive(Clone, Debug, Default)]
pub struct PruneReport {
    pub removed: Vec<String>,
    pub kept_unsent: usize,
    pub bytes: u64,
}

pub struct CaptureStore {
    root: PathBuf,
}

impl CaptureStore {
    /// Open (creating if needed) the capture root.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create capture dir {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn primary_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}{PRIMARY_SUFFIX}"))
    }

    pub fn sequence_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}{SEQUENCE_SUFFIX}"))
    }

    pub fn pre_fall_dir(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}{PRE_FALL_SUFFIX}"))
    }

    pub fn sidecar_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}{SIDECAR_SUFFIX}"))
    }

    /// Write all artifacts for one alert. The sidecar is written last.
    pub fn save_alert(
        &self,
        captured_local: DateTime<Local>,
        primary: &Frame,
        lead_up: &[Frame],
        composite: Option<&RgbImage>,
        record: &AlertRecord,
    ) -> Result<SavedAlert> {
        let stem = self.unique_stem(&captured_local.format(STEM_FORMAT).to_string());

        let primary_path = self.primary_path(&stem);
        write_jpeg(&primary_path, primary.image())?;

        let sequence = match composite {
            Some(grid) if !lead_up.is_empty() => {
                let path = self.sequence_path(&stem);
                write_jpeg(&path, grid)?;
                Some(path)
            }
            _ => None,
        };

        let pre_fall_dir = if lead_up.is_empty() {
            None
        } else {
            let dir = self.pre_fall_dir(&stem);
            fs::create_dir_all(&dir)
                .with_context(|| format!("create pre-fall dir {}", dir.display()))?;
            for (i, frame) in lead_up.iter().enumerate() {
                write_jpeg(&dir.join(format!("frame_{i:03}.jpg")), frame.image())?;
            }
            Some(dir)
        };

        let sidecar = self.sidecar_path(&stem);
        self.write_record(&stem, record)?;

        log::info!(
            "saved alert {} ({} lead-up frames) to {}",
            stem,
            lead_up.len(),
            self.root.display()
        );
        Ok(SavedAlert {
            stem,
            primary: primary_path,
            sequence,
            pre_fall_dir,
            sidecar,
        })
    }

    fn unique_stem(&self, base: &str) -> String {
        let taken = |stem: &str| {
            self.primary_path(stem).exists() || self.sidecar_path(stem).exists()
        };
        if !taken(base) {
            return base.to_string();
        }
        (1u32..)
            .map(|n| format!("{base}_{n}"))
            .find(|stem| !taken(stem))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn load_record(&self, stem: &str) -> Result<Option<AlertRecord>> {
        let path = self.sidecar_path(stem);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("read sidecar {}", path.display()))?;
        let record = serde_json::from_str(&raw)
            .with_context(|| format!("parse sidecar {}", path.display()))?;
        Ok(Some(record))
    }

    /// Replace the sidecar atomically (temp file + rename).
    pub fn write_record(&self, stem: &str, record: &AlertRecord) -> Result<()> {
        let path = self.sidecar_path(stem);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record).context("serialize alert record")?;
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    }

    pub fn mark_uploaded(&self, stem: &str, record: &mut AlertRecord, receipt: &UploadReceipt) -> Result<()> {
        record.upload.uploaded = true;
        record.upload.attempts += 1;
        record.upload.remote_id = receipt.id;
        record.upload.image_url = receipt.image_url.clone();
        record.upload.last_error = None;
        record.upload.last_attempt_at = Some(Utc::now());
        self.write_record(stem, record)
    }

    pub fn mark_failed(&self, stem: &str, record: &mut AlertRecord, error: &str) -> Result<()> {
        record.upload.attempts += 1;
        record.upload.last_error = Some(error.to_string());
        record.upload.last_attempt_at = Some(Utc::now());
        self.write_record(stem, record)
    }

    /// Every `<stem>_fall.jpg` in the capture root, oldest stem first.
    pub fn list_alerts(&self) -> Result<Vec<StoredAlert>> {
        let mut alerts = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("read capture dir {}", self.root.display()))?;
        for entry in entries {
            let entry = entry.context("read capture dir entry")?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(PRIMARY_SUFFIX) else {
                continue;
            };
            let record = match self.load_record(stem) {
                Ok(record) => record,
                Err(err) => {
                    log::warn!("ignoring unreadable sidecar for {}: {:#}", stem, err);
                    None
                }
            };
            alerts.push(StoredAlert {
                stem: stem.to_string(),
                primary: entry.path(),
                record,
            });
        }
        alerts.sort_by(|a, b| a.stem.cmp(&b.stem));
        Ok(alerts)
    }

    /// Alerts whose upload has not been confirmed.
    pub fn pending(&self) -> Result<Vec<StoredAlert>> {
        Ok(self
            .list_alerts()?
            .into_iter()
            .filter(|alert| !alert.is_uploaded())
            .collect())
    }

    /// Delete every artifact of `stem`. Returns bytes freed.
    pub fn remove_alert(&self, stem: &str) -> Result<u64> {
        let mut bytes = 0;
        for path in [
            self.primary_path(stem),
            self.sequence_path(stem),
            self.sidecar_path(stem),
        ] {
            if let Ok(meta) = fs::metadata(&path) {
                bytes += meta.len();
                fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            }
        }
        let dir = self.pre_fall_dir(stem);
        if dir.is_dir() {
            bytes += dir_size(&dir);
            fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
        }
        Ok(bytes)
    }

    /// Remove alerts that occurred before `cutoff`.
    pub fn prune(&self, cutoff: DateTime<Utc>, options: PruneOptions) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        for alert in self.list_alerts()? {
            let Some(occurred_at) = alert.occurred_at() else {
                log::debug!("prune: no timestamp for {}, skipping", alert.stem);
                continue;
            };
            if occurred_at >= cutoff {
                continue;
            }
            if !alert.is_uploaded() && !options.include_unsent {
                report.kept_unsent += 1;
                continue;
            }
            if options.dry_run {
                report.bytes += self.alert_size(&alert.stem);
            } else {
                report.bytes += self.remove_alert(&alert.stem)?;
            }
            report.removed.push(alert.stem);
        }
        Ok(report)
    }

    fn alert_size(&self, stem: &str) -> u64 {
        let files: u64 = [
            self.primary_path(stem),
            self.sequence_path(stem),
            self.sidecar_path(stem),
        ]
        .iter()
        .filter_map(|p| fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();
        files + dir_size(&self.pre_fall_dir(stem))
    }
}

/// Capture time encoded in a stem such as `20251201_083000` or `20251201_083000_2`.
///
/// Stems are local time; the result is converted to UTC.
pub fn stem_time(stem: &str) -> Option<DateTime<Utc>> {
    static STEM_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = STEM_RE.get_or_init(|| regex::Regex::new(r"^(\d{8}_\d{6})(?:_\d+)?$").unwrap());

    let caps = re.captures(stem)?;
    let naive = NaiveDateTime::parse_from_str(caps.get(1)?.as_str(), STEM_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

pub fn write_jpeg(path: &Path, image: &RgbImage) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode_image(image)
        .with_context(|| format!("encode jpeg {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("flush {}", path.display()))?;
    Ok(())
}

pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| anyhow!("read {}: {}", path.display(), err))
}

fn dir_size(dir: &Path) -> u64 {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame(shade: u8, index: u64) -> Frame {
        Frame::new(RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade])), index)
    }

    fn record() -> AlertRecord {
        AlertRecord {
            location: "living_room".into(),
            description: "Fall detected in living room".into(),
            occurred_at: Utc::now(),
            lead_up_frames: 2,
            upload: UploadState::default(),
        }
    }

    fn local(stamp: &str) -> DateTime<Local> {
        let naive = NaiveDateTime::parse_from_str(stamp, STEM_FORMAT).unwrap();
        Local.from_local_datetime(&naive).earliest().unwrap()
    }

    #[test]
    fn saves_full_layout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CaptureStore::open(dir.path())?;
        let lead = vec![frame(10, 1), frame(20, 2)];
        let grid = RgbImage::new(24, 6);
        let saved = store.save_alert(local("20251201_083000"), &frame(200, 3), &lead, Some(&grid), &record())?;

        assert_eq!(saved.stem, "20251201_083000");
        assert!(saved.primary.is_file());
        assert!(saved.sequence.as_ref().is_some_and(|p| p.is_file()));
        let pre = saved.pre_fall_dir.as_ref().unwrap();
        assert!(pre.join("frame_000.jpg").is_file());
        assert!(pre.join("frame_001.jpg").is_file());
        let loaded = store.load_record(&saved.stem)?.unwrap();
        assert_eq!(loaded.location, "living_room");
        assert!(!loaded.upload.uploaded);
        Ok(())
    }

    #[test]
    fn no_lead_up_means_no_sequence_or_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CaptureStore::open(dir.path())?;
        let grid = RgbImage::new(8, 6);
        let saved = store.save_alert(local("20251201_083000"), &frame(200, 1), &[], Some(&grid), &record())?;
        assert!(saved.sequence.is_none());
        assert!(saved.pre_fall_dir.is_none());
        assert!(!store.sequence_path(&saved.stem).exists());
        Ok(())
    }

    #[test]
    fn same_second_alerts_get_distinct_stems() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CaptureStore::open(dir.path())?;
        let t = local("20251201_083000");
        let a = store.save_alert(t, &frame(1, 1), &[], None, &record())?;
        let b = store.save_alert(t, &frame(2, 2), &[], None, &record())?;
        assert_eq!(a.stem, "20251201_083000");
        assert_eq!(b.stem, "20251201_083000_1");
        Ok(())
    }

    #[test]
    fn pending_tracks_upload_state() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CaptureStore::open(dir.path())?;
        let a = store.save_alert(local("20251201_083000"), &frame(1, 1), &[], None, &record())?;
        let b = store.save_alert(local("20251201_083100"), &frame(2, 2), &[], None, &record())?;
        assert_eq!(store.pending()?.len(), 2);

        let mut rec = store.load_record(&a.stem)?.unwrap();
        store.mark_uploaded(
            &a.stem,
            &mut rec,
            &UploadReceipt {
                id: Some(4),
                image_url: Some("http://h/a.jpg".into()),
            },
        )?;
        let mut rec_b = store.load_record(&b.stem)?.unwrap();
        store.mark_failed(&b.stem, &mut rec_b, "connection refused")?;

        let pending = store.pending()?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].stem, b.stem);
        let state = &pending[0].record.as_ref().unwrap().upload;
        assert_eq!(state.attempts, 1);
        assert_eq!(state.last_error.as_deref(), Some("connection refused"));
        assert_eq!(store.load_record(&a.stem)?.unwrap().upload.remote_id, Some(4));
        Ok(())
    }

    #[test]
    fn legacy_images_without_sidecar_are_listed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CaptureStore::open(dir.path())?;
        write_jpeg(&dir.path().join("20240102_030405_fall.jpg"), &RgbImage::new(4, 4))?;
        fs::create_dir(dir.path().join("20240102_030405_pre_fall"))?;
        fs::write(dir.path().join("notes.txt"), "x")?;

        let alerts = store.list_alerts()?;
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].record.is_none());
        assert_eq!(alerts[0].occurred_at(), stem_time("20240102_030405"));
        Ok(())
    }

    #[test]
    fn parses_stem_times() {
        assert!(stem_time("20251201_083000").is_some());
        assert!(stem_time("20251201_083000_3").is_some());
        assert!(stem_time("20251301_083000").is_none());
        assert!(stem_time("snapshot").is_none());
    }

    #[test]
    fn prune_respects_cutoff_and_unsent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CaptureStore::open(dir.path())?;
        let old_time = Utc::now() - chrono::Duration::days(400);

        let mut sent = AlertRecord {
            occurred_at: old_time,
            ..record()
        };
        let a = store.save_alert(local("20240101_000000"), &frame(1, 1), &[frame(3, 0)], None, &sent)?;
        store.mark_uploaded(&a.stem, &mut sent, &UploadReceipt::default())?;
        let unsent = AlertRecord {
            occurred_at: old_time,
            ..record()
        };
        let b = store.save_alert(local("20240101_000001"), &frame(2, 2), &[], None, &unsent)?;
        let fresh = store.save_alert(local("20240101_000002"), &frame(2, 2), &[], None, &record())?;

        let cutoff = Utc::now() - chrono::Duration::days(365);
        let dry = store.prune(cutoff, PruneOptions { include_unsent: false, dry_run: true })?;
        assert_eq!(dry.removed, vec![a.stem.clone()]);
        assert!(store.primary_path(&a.stem).exists());

        let report = store.prune(cutoff, PruneOptions::default())?;
        assert_eq!(report.removed, vec![a.stem.clone()]);
        assert_eq!(report.kept_unsent, 1);
        assert!(!store.primary_path(&a.stem).exists());
        assert!(!store.pre_fall_dir(&a.stem).exists());

        let report = store.prune(cutoff, PruneOptions { include_unsent: true, dry_run: false })?;
        assert_eq!(report.removed, vec![b.stem.clone()]);
        assert!(store.primary_path(&fresh.stem).exists());
        Ok(())
    }
}
