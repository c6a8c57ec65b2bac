//! Lazy parse cache for the user-editable JSON blobs, plus the color and
//! threshold evaluation that reads them.
//!
//! Three blob kinds exist per instance: filter colors, RMS thresholds, and
//! HFR thresholds. The first lookup parses the blob into an owned tree;
//! subsequent lookups reuse it. Every settings save, filter sync, or factory
//! reset drops all cached trees and the next access re-parses lazily.

use astromon_core::color::{self, Rgb};
use astromon_core::prelude::*;
use serde_json::{Map, Value};

use crate::settings::types::MAX_INSTANCES;

/// Number of cached blob kinds.
const BLOB_KINDS: usize = 3;

/// Which user-editable blob a lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    FilterColors = 0,
    RmsThresholds = 1,
    HfrThresholds = 2,
}

/// Per-instance, per-kind parse cache.
///
/// Lives under the settings mutex; invalidation and lookup are plain method
/// calls with no locking of their own.
#[derive(Debug, Default)]
pub struct JsonCache {
    trees: [[Option<Value>; MAX_INSTANCES]; BLOB_KINDS],
}

impl JsonCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the parsed tree for `(kind, instance)`, parsing `blob` on the
    /// first access. Invalid JSON caches as `Null` so it is not re-parsed
    /// on every lookup.
    pub fn get_or_parse(&mut self, kind: BlobKind, instance: usize, blob: &str) -> &Value {
        let slot = &mut self.trees[kind as usize][instance];
        if slot.is_none() {
            let parsed = serde_json::from_str::<Value>(blob).unwrap_or(Value::Null);
            if parsed.is_null() && !blob.trim().is_empty() {
                debug!("blob {:?}[{}] failed to parse", kind, instance);
            }
            *slot = Some(parsed);
        }
        slot.as_ref().expect("slot filled above")
    }

    /// Drop every cached tree.
    pub fn invalidate_all(&mut self) {
        for kind in &mut self.trees {
            for slot in kind {
                *slot = None;
            }
        }
    }

    /// Whether `(kind, instance)` currently holds a parsed tree.
    pub fn is_cached(&self, kind: BlobKind, instance: usize) -> bool {
        self.trees[kind as usize][instance].is_some()
    }
}

// ─────────────────────────────────────────────────────────────────
// Filter color evaluation
// ─────────────────────────────────────────────────────────────────

/// Resolve a filter name against a parsed filter-colors tree.
///
/// Empty and placeholder names get the neutral color; a missing entry falls
/// back to the built-in per-filter default. The caller applies the global
/// brightness scaler afterwards.
pub fn eval_filter_color(tree: &Value, name: &str) -> Rgb {
    if name.is_empty() || name == "--" {
        return color::NEUTRAL;
    }
    tree.get(name)
        .and_then(Value::as_str)
        .and_then(Rgb::parse_hex)
        .unwrap_or_else(|| color::default_filter_color(name))
}

// ─────────────────────────────────────────────────────────────────
// Threshold evaluation
// ─────────────────────────────────────────────────────────────────

/// A fully resolved threshold spec with fallbacks applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSpec {
    pub good_max: f64,
    pub ok_max: f64,
    pub good_color: Rgb,
    pub ok_color: Rgb,
    pub bad_color: Rgb,
}

impl ThresholdSpec {
    /// Built-in fallback for guider RMS, in arcseconds.
    pub fn rms_fallback() -> Self {
        Self {
            good_max: 0.5,
            ok_max: 1.0,
            good_color: color::GREEN,
            ok_color: color::YELLOW,
            bad_color: color::RED,
        }
    }

    /// Built-in fallback for image HFR, in pixels.
    pub fn hfr_fallback() -> Self {
        Self {
            good_max: 2.5,
            ok_max: 3.5,
            good_color: color::GREEN,
            ok_color: color::YELLOW,
            bad_color: color::RED,
        }
    }

    /// Read a spec from a parsed threshold tree, falling back field by field.
    pub fn from_tree(tree: &Value, fallback: Self) -> Self {
        let num = |key: &str, fb: f64| tree.get(key).and_then(Value::as_f64).unwrap_or(fb);
        let col = |key: &str, fb: Rgb| {
            tree.get(key)
                .and_then(Value::as_str)
                .and_then(Rgb::parse_hex)
                .unwrap_or(fb)
        };
        Self {
            good_max: num("good_max", fallback.good_max),
            ok_max: num("ok_max", fallback.ok_max),
            good_color: col("good_color", fallback.good_color),
            ok_color: col("ok_color", fallback.ok_color),
            bad_color: col("bad_color", fallback.bad_color),
        }
    }

    /// Map a measured value onto the spec's colors. Boundary values belong
    /// to the better band.
    pub fn classify(&self, value: f64) -> Rgb {
        if value <= self.good_max {
            self.good_color
        } else if value <= self.ok_max {
            self.ok_color
        } else {
            self.bad_color
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Filter sync
// ─────────────────────────────────────────────────────────────────

/// Reconcile a filter-colors blob against the authoritative filter list.
///
/// Adds each missing filter with its built-in default hex and deletes every
/// entry not in `names`. Returns `Some(new_blob)` only when the blob changed
/// and the serialized result fits `max_len`; `None` otherwise. Idempotent:
/// syncing twice with the same list yields no second change.
pub fn sync_filter_blob(blob: &str, names: &[String], max_len: usize) -> Option<String> {
    let original = serde_json::from_str::<Value>(blob)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();

    let mut updated: Map<String, Value> = original.clone();
    for name in names {
        if name.is_empty() {
            continue;
        }
        updated
            .entry(name.clone())
            .or_insert_with(|| Value::String(color::default_filter_color(name).to_hex()));
    }
    updated.retain(|key, _| names.iter().any(|n| n == key));

    if updated == original {
        return None;
    }

    let serialized = Value::Object(updated).to_string();
    if serialized.len() > max_len {
        warn!(
            "filter sync result ({} bytes) exceeds blob limit ({}), keeping old blob",
            serialized.len(),
            max_len
        );
        return None;
    }
    Some(serialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::types::limits::FILTER_COLORS_MAX;
    use serde_json::json;

    // -- JsonCache -----------------------------------------------------------

    #[test]
    fn test_cache_parses_once() {
        let mut cache = JsonCache::new();
        assert!(!cache.is_cached(BlobKind::FilterColors, 0));

        let tree = cache.get_or_parse(BlobKind::FilterColors, 0, r##"{"Ha":"#7FFF00"}"##);
        assert_eq!(tree["Ha"], json!("#7FFF00"));
        assert!(cache.is_cached(BlobKind::FilterColors, 0));

        // A second lookup ignores the (different) blob text: the tree is
        // reused until invalidation.
        let tree = cache.get_or_parse(BlobKind::FilterColors, 0, r##"{"Ha":"#000000"}"##);
        assert_eq!(tree["Ha"], json!("#7FFF00"));
    }

    #[test]
    fn test_cache_invalid_json_caches_null() {
        let mut cache = JsonCache::new();
        let tree = cache.get_or_parse(BlobKind::RmsThresholds, 1, "{broken");
        assert!(tree.is_null());
        assert!(cache.is_cached(BlobKind::RmsThresholds, 1));
    }

    #[test]
    fn test_cache_invalidate_all() {
        let mut cache = JsonCache::new();
        cache.get_or_parse(BlobKind::FilterColors, 0, "{}");
        cache.get_or_parse(BlobKind::HfrThresholds, 2, "{}");
        cache.invalidate_all();
        assert!(!cache.is_cached(BlobKind::FilterColors, 0));
        assert!(!cache.is_cached(BlobKind::HfrThresholds, 2));
    }

    #[test]
    fn test_cache_slots_are_independent() {
        let mut cache = JsonCache::new();
        cache.get_or_parse(BlobKind::FilterColors, 0, "{}");
        assert!(!cache.is_cached(BlobKind::FilterColors, 1));
        assert!(!cache.is_cached(BlobKind::RmsThresholds, 0));
    }

    // -- eval_filter_color ---------------------------------------------------

    #[test]
    fn test_filter_color_neutral_for_placeholder() {
        let tree = json!({"L": "#123456"});
        assert_eq!(eval_filter_color(&tree, ""), color::NEUTRAL);
        assert_eq!(eval_filter_color(&tree, "--"), color::NEUTRAL);
    }

    #[test]
    fn test_filter_color_from_tree() {
        let tree = json!({"Ha": "#102030", "L": "405060"});
        assert_eq!(eval_filter_color(&tree, "Ha"), Rgb::new(0x10, 0x20, 0x30));
        // Hex without the leading # is accepted too.
        assert_eq!(eval_filter_color(&tree, "L"), Rgb::new(0x40, 0x50, 0x60));
    }

    #[test]
    fn test_filter_color_missing_uses_builtin_default() {
        let tree = json!({});
        assert_eq!(eval_filter_color(&tree, "Ha"), color::CHARTREUSE);
        assert_eq!(eval_filter_color(&tree, "R"), color::RED);
        assert_eq!(eval_filter_color(&tree, "Unknown"), color::WHITE);
    }

    #[test]
    fn test_filter_color_bad_hex_falls_back() {
        let tree = json!({"Sii": "purple"});
        assert_eq!(eval_filter_color(&tree, "Sii"), color::MAGENTA);
    }

    #[test]
    fn test_filter_color_null_tree() {
        assert_eq!(eval_filter_color(&Value::Null, "B"), color::BLUE);
    }

    // -- ThresholdSpec -------------------------------------------------------

    #[test]
    fn test_threshold_spec_from_full_tree() {
        let tree = json!({
            "good_max": 0.4, "ok_max": 0.9,
            "good_color": "#00AA00", "ok_color": "#AAAA00", "bad_color": "#AA0000",
        });
        let spec = ThresholdSpec::from_tree(&tree, ThresholdSpec::rms_fallback());
        assert_eq!(spec.good_max, 0.4);
        assert_eq!(spec.ok_max, 0.9);
        assert_eq!(spec.good_color, Rgb::new(0, 0xAA, 0));
    }

    #[test]
    fn test_threshold_spec_partial_tree_uses_fallbacks() {
        let tree = json!({"good_max": 0.3});
        let spec = ThresholdSpec::from_tree(&tree, ThresholdSpec::rms_fallback());
        assert_eq!(spec.good_max, 0.3);
        assert_eq!(spec.ok_max, 1.0);
        assert_eq!(spec.ok_color, color::YELLOW);
    }

    #[test]
    fn test_threshold_boundaries_belong_to_better_band() {
        let spec = ThresholdSpec::rms_fallback();
        assert_eq!(spec.classify(0.5), color::GREEN);
        assert_eq!(spec.classify(0.500001), color::YELLOW);
        assert_eq!(spec.classify(1.0), color::YELLOW);
        assert_eq!(spec.classify(1.1), color::RED);
        assert_eq!(spec.classify(0.0), color::GREEN);
    }

    #[test]
    fn test_hfr_fallback_bands() {
        let spec = ThresholdSpec::hfr_fallback();
        assert_eq!(spec.classify(2.5), color::GREEN);
        assert_eq!(spec.classify(3.5), color::YELLOW);
        assert_eq!(spec.classify(9.0), color::RED);
    }

    // -- sync_filter_blob ----------------------------------------------------

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sync_adds_missing_with_defaults() {
        let blob = sync_filter_blob("{}", &names(&["L", "Ha"]), FILTER_COLORS_MAX).unwrap();
        let tree: Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(tree["L"], json!("#FFFFFF"));
        assert_eq!(tree["Ha"], json!("#7FFF00"));
    }

    #[test]
    fn test_sync_removes_stale_entries() {
        let blob = sync_filter_blob(
            r##"{"L":"#FFFFFF","Old":"#111111"}"##,
            &names(&["L"]),
            FILTER_COLORS_MAX,
        )
        .unwrap();
        let tree: Value = serde_json::from_str(&blob).unwrap();
        assert!(tree.get("Old").is_none());
        assert_eq!(tree["L"], json!("#FFFFFF"));
    }

    #[test]
    fn test_sync_preserves_user_overrides() {
        let blob = sync_filter_blob(
            r##"{"Ha":"#ABCDEF"}"##,
            &names(&["Ha", "Oiii"]),
            FILTER_COLORS_MAX,
        )
        .unwrap();
        let tree: Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(tree["Ha"], json!("#ABCDEF"));
        assert_eq!(tree["Oiii"], json!("#00FFFF"));
    }

    #[test]
    fn test_sync_is_idempotent() {
        let list = names(&["L", "R", "G", "B"]);
        let first = sync_filter_blob("{}", &list, FILTER_COLORS_MAX).unwrap();
        assert!(
            sync_filter_blob(&first, &list, FILTER_COLORS_MAX).is_none(),
            "second sync must be a no-op"
        );
    }

    #[test]
    fn test_sync_no_change_returns_none() {
        let blob = r##"{"L":"#FFFFFF"}"##;
        assert!(sync_filter_blob(blob, &names(&["L"]), FILTER_COLORS_MAX).is_none());
    }

    #[test]
    fn test_sync_invalid_blob_starts_fresh() {
        let blob = sync_filter_blob("{broken", &names(&["R"]), FILTER_COLORS_MAX).unwrap();
        let tree: Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(tree["R"], json!("#FF0000"));
    }

    #[test]
    fn test_sync_respects_size_cap() {
        // A pathological list that cannot fit keeps the old blob.
        let long: Vec<String> = (0..10).map(|i| format!("Filter-{}-{}", i, "x".repeat(60))).collect();
        assert!(sync_filter_blob("{}", &long, 64).is_none());
    }

    #[test]
    fn test_sync_skips_empty_names() {
        let blob = sync_filter_blob("{}", &names(&["", "L"]), FILTER_COLORS_MAX).unwrap();
        let tree: Value = serde_json::from_str(&blob).unwrap();
        assert!(tree.get("").is_none());
        assert_eq!(tree["L"], json!("#FFFFFF"));
    }
}
