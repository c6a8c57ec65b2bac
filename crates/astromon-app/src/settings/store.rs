//! Versioned persistent settings store.
//!
//! One binary record under a fixed path: a 4-byte little-endian schema
//! version followed by the JSON payload of that version's layout. Known old
//! versions migrate forward through the chain in `versions`; anything
//! unrecognized resets to defaults. A storage failure is never fatal; the
//! store falls back to in-memory defaults and keeps running.
//!
//! The single mutex covers the live copy, the persisted copy, and the
//! JSON parse cache; `save` bumps a watch-channel generation that the MQTT
//! bridge and the scheduler observe as the config-changed edge.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::watch;

use astromon_core::color::Rgb;
use astromon_core::prelude::*;

use super::types::{limits, Settings, SCHEMA_VERSION};
use super::versions::migrate_payload;
use crate::json_cache::{
    eval_filter_color, sync_filter_blob, BlobKind, JsonCache, ThresholdSpec,
};

/// Filename of the persisted settings blob.
const SETTINGS_FILENAME: &str = "settings.bin";

struct Inner {
    live: Settings,
    persisted: Settings,
    cache: JsonCache,
    generation: u64,
}

/// The settings singleton.
pub struct SettingsStore {
    path: PathBuf,
    inner: Mutex<Inner>,
    change_tx: watch::Sender<u64>,
}

impl SettingsStore {
    /// Default blob location under the platform data dir.
    pub fn default_path() -> PathBuf {
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("astromon").join(SETTINGS_FILENAME)
    }

    /// Load the persisted blob, migrating old layouts, or fall back to
    /// defaults. A corrected or migrated record is re-persisted immediately.
    pub fn init(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (mut settings, needs_save) = match read_blob(&path) {
            Some((version, payload)) => match migrate_payload(version, &payload) {
                Some(settings) => {
                    if version != SCHEMA_VERSION {
                        info!(
                            "migrated settings from schema v{} to v{}",
                            version, SCHEMA_VERSION
                        );
                        (settings, true)
                    } else {
                        (settings, false)
                    }
                }
                None => {
                    warn!(
                        "unrecognized settings blob (version word {:#x}), resetting to defaults",
                        version
                    );
                    (Settings::default(), true)
                }
            },
            None => {
                info!("no settings blob at {:?}, writing defaults", path);
                (Settings::default(), true)
            }
        };

        let corrected = settings.validate();
        let (change_tx, _) = watch::channel(0);
        let store = Self {
            path,
            inner: Mutex::new(Inner {
                live: settings.clone(),
                persisted: settings,
                cache: JsonCache::new(),
                generation: 0,
            }),
            change_tx,
        };

        if needs_save || corrected {
            if let Err(err) = store.persist_current() {
                warn!("settings persist failed (running in-memory): {}", err);
            }
        }
        store
    }

    /// Subscribe to the save-generation counter. The receiver observes an
    /// edge on every successful `save`/`factory_reset`.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.change_tx.subscribe()
    }

    /// Value copy of the live settings.
    pub fn snapshot(&self) -> Settings {
        self.lock().live.clone()
    }

    /// Live config differs from the persisted copy?
    pub fn is_dirty(&self) -> bool {
        let inner = self.lock();
        inner.live != inner.persisted
    }

    /// Replace the live copy without touching persistence.
    pub fn apply(&self, mut cfg: Settings) {
        cfg.validate();
        let mut inner = self.lock();
        inner.live = cfg;
        inner.cache.invalidate_all();
    }

    /// Replace the live copy, persist it stamped with the current schema
    /// version, drop the parse cache, and notify subscribers.
    pub fn save(&self, mut cfg: Settings) -> Result<()> {
        cfg.validate();
        let generation = {
            let mut inner = self.lock();
            inner.live = cfg.clone();
            inner.persisted = cfg;
            inner.cache.invalidate_all();
            inner.generation += 1;
            inner.generation
        };
        let result = self.persist_current();
        if let Err(ref err) = result {
            warn!("settings persist failed (live copy kept): {}", err);
        }
        let _ = self.change_tx.send(generation);
        result
    }

    /// Reload the persisted copy into the live copy.
    pub fn revert(&self) {
        let mut inner = self.lock();
        inner.live = inner.persisted.clone();
        inner.cache.invalidate_all();
    }

    /// Erase persistent storage and re-initialize with defaults.
    pub fn factory_reset(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .map_err(|e| Error::storage(format!("erase failed: {e}")))?;
        }
        let mut defaults = Settings::default();
        defaults.validate();
        info!("factory reset: settings restored to defaults");
        self.save(defaults)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist_current(&self) -> Result<()> {
        let blob = {
            let inner = self.lock();
            encode_blob(&inner.persisted)?
        };
        write_blob(&self.path, &blob)
    }

    // ─────────────────────────────────────────────────────────────
    // Color evaluation (through the parse cache)
    // ─────────────────────────────────────────────────────────────

    /// Display color for a filter name on instance `i`, brightness-scaled.
    pub fn filter_color(&self, instance: usize, name: &str) -> Rgb {
        let mut inner = self.lock();
        let blob = inner.live.colors.filter_colors[instance].clone();
        let brightness = inner.live.colors.color_brightness;
        let tree = inner.cache.get_or_parse(BlobKind::FilterColors, instance, &blob);
        eval_filter_color(tree, name).scale(brightness)
    }

    /// Display color for a guider RMS value, brightness-scaled.
    pub fn rms_color(&self, instance: usize, value: f64) -> Rgb {
        self.threshold_color(
            BlobKind::RmsThresholds,
            instance,
            value,
            ThresholdSpec::rms_fallback(),
        )
    }

    /// Display color for an HFR value, brightness-scaled.
    pub fn hfr_color(&self, instance: usize, value: f64) -> Rgb {
        self.threshold_color(
            BlobKind::HfrThresholds,
            instance,
            value,
            ThresholdSpec::hfr_fallback(),
        )
    }

    fn threshold_color(
        &self,
        kind: BlobKind,
        instance: usize,
        value: f64,
        fallback: ThresholdSpec,
    ) -> Rgb {
        let mut inner = self.lock();
        let blob = match kind {
            BlobKind::RmsThresholds => inner.live.colors.rms_thresholds[instance].clone(),
            BlobKind::HfrThresholds => inner.live.colors.hfr_thresholds[instance].clone(),
            BlobKind::FilterColors => unreachable!("not a threshold blob"),
        };
        let brightness = inner.live.colors.color_brightness;
        let tree = inner.cache.get_or_parse(kind, instance, &blob);
        ThresholdSpec::from_tree(tree, fallback)
            .classify(value)
            .scale(brightness)
    }

    /// Reconcile instance `i`'s filter-color blob against the authoritative
    /// filter list from a successful poll.
    ///
    /// Persists and notifies only when the blob actually changed (and still
    /// fits its size limit). Idempotent.
    pub fn sync_filters(&self, instance: usize, names: &[String]) -> bool {
        let mut cfg = {
            let inner = self.lock();
            inner.live.clone()
        };
        let Some(updated) = sync_filter_blob(
            &cfg.colors.filter_colors[instance],
            names,
            limits::FILTER_COLORS_MAX,
        ) else {
            return false;
        };
        info!(
            "instance {}: filter colors synced to {} filters",
            instance,
            names.len()
        );
        cfg.colors.filter_colors[instance] = updated;
        self.save(cfg).is_ok()
    }

    /// Test hook: whether a blob is currently cached.
    pub fn blob_cached(&self, kind: BlobKind, instance: usize) -> bool {
        self.lock().cache.is_cached(kind, instance)
    }
}

// ─────────────────────────────────────────────────────────────────
// Blob codec
// ─────────────────────────────────────────────────────────────────

/// Serialize a record as `version word || JSON payload`.
fn encode_blob(settings: &Settings) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(settings)?;
    let mut blob = Vec::with_capacity(4 + payload.len());
    blob.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    blob.extend_from_slice(&payload);
    Ok(blob)
}

/// Read and split a stored blob into its version word and payload.
fn read_blob(path: &Path) -> Option<(u32, Vec<u8>)> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.len() < 4 {
        warn!("settings blob truncated ({} bytes)", bytes.len());
        return None;
    }
    let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    Some((version, bytes[4..].to_vec()))
}

/// Atomic write: temp file in the same directory, then rename.
fn write_blob(path: &Path, blob: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::storage("settings path has no parent directory"))?;
    std::fs::create_dir_all(dir).map_err(|e| Error::storage(format!("create dir: {e}")))?;

    let temp_path = dir.join(".settings.bin.tmp");
    std::fs::write(&temp_path, blob).map_err(|e| Error::storage(format!("write temp: {e}")))?;
    std::fs::rename(&temp_path, path).map_err(|e| Error::storage(format!("rename: {e}")))?;
    Ok(())
}
