//! Sequence JSON walker.
//!
//! `sequence/json` returns the full sequencer tree. The walker reduces it to
//! the handful of fields the display shows: which container and step are
//! running, Smart Exposure progress, and the earliest condition that will end
//! the current target.

use astromon_core::format_hmm;
use serde_json::Value;

use crate::endpoints::response;

/// Name of the top-level container holding the imaging targets.
const TARGETS_CONTAINER: &str = "Targets_Container";

/// Running Smart Exposure progress.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SmartExposure {
    pub completed_iterations: u32,
    pub iterations: u32,
    pub exposure_time: f64,
}

/// The earliest binding condition over the active target subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingCondition {
    /// `"SETS IN"`, `"DAWN IN"`, or `"TIME LEFT"`.
    pub label: &'static str,
    pub remaining_secs: u64,
}

impl BindingCondition {
    /// Remaining time formatted as `H:MM`.
    pub fn formatted(&self) -> String {
        format_hmm(self.remaining_secs)
    }
}

/// Everything the walker extracts from one sequence tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceSummary {
    /// True when a target container is RUNNING (vs. the finished fallback).
    pub running: bool,
    /// The active target, from the picked child of the targets container.
    pub target_name: String,
    /// Deepest running container, `_Container` suffix stripped.
    pub container_name: String,
    /// Deepest running leaf step.
    pub step_name: String,
    pub smart_exposure: Option<SmartExposure>,
    pub condition: Option<BindingCondition>,
}

// ─────────────────────────────────────────────────────────────────
// Tree accessors
// ─────────────────────────────────────────────────────────────────

fn name_of(node: &Value) -> &str {
    node.get("Name").and_then(Value::as_str).unwrap_or("")
}

fn status_of(node: &Value) -> &str {
    node.get("Status").and_then(Value::as_str).unwrap_or("")
}

fn is_running(node: &Value) -> bool {
    status_of(node).eq_ignore_ascii_case("RUNNING")
}

fn is_finished(node: &Value) -> bool {
    status_of(node).eq_ignore_ascii_case("FINISHED")
}

fn children(node: &Value) -> &[Value] {
    node.get("Items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn strip_container_suffix(name: &str) -> &str {
    name.strip_suffix("_Container").unwrap_or(name)
}

/// Parse a `"H:MM:SS"` remaining-time string into whole seconds.
pub fn parse_remaining_time(s: &str) -> Option<u64> {
    let mut parts = s.trim().split(':');
    let h: u64 = parts.next()?.parse().ok()?;
    let m: u64 = parts.next()?.parse().ok()?;
    let sec: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || m >= 60 || sec >= 60 {
        return None;
    }
    Some(h * 3600 + m * 60 + sec)
}

/// Classify a condition by name into its display label.
fn classify_condition(name: &str) -> &'static str {
    if name.contains("Horizon") || name.contains("Altitude") {
        "SETS IN"
    } else if name.contains("Dawn") || name.contains("Twilight") {
        "DAWN IN"
    } else {
        "TIME LEFT"
    }
}

// ─────────────────────────────────────────────────────────────────
// Recursive passes
// ─────────────────────────────────────────────────────────────────

/// Deepest RUNNING node that has children, preferring greater depth.
fn deepest_running_container<'a>(node: &'a Value, depth: usize) -> Option<(&'a Value, usize)> {
    let mut best: Option<(&Value, usize)> = None;
    if is_running(node) && !children(node).is_empty() {
        best = Some((node, depth));
    }
    for child in children(node) {
        if let Some((found, d)) = deepest_running_container(child, depth + 1) {
            if best.map_or(true, |(_, bd)| d > bd) {
                best = Some((found, d));
            }
        }
    }
    best
}

/// Last FINISHED node with children, in document order (the fallback when
/// nothing is running anymore).
fn last_finished_container<'a>(node: &'a Value) -> Option<&'a Value> {
    let mut best = None;
    if is_finished(node) && !children(node).is_empty() {
        best = Some(node);
    }
    for child in children(node) {
        if let Some(found) = last_finished_container(child) {
            best = Some(found);
        }
    }
    best
}

/// Deepest RUNNING leaf (no children) in the subtree.
fn deepest_running_leaf<'a>(node: &'a Value, depth: usize) -> Option<(&'a Value, usize)> {
    if children(node).is_empty() {
        return (is_running(node)).then_some((node, depth));
    }
    let mut best: Option<(&Value, usize)> = None;
    for child in children(node) {
        if let Some((found, d)) = deepest_running_leaf(child, depth + 1) {
            if best.map_or(true, |(_, bd)| d > bd) {
                best = Some((found, d));
            }
        }
    }
    best
}

/// Recursive search for a RUNNING item named `Smart Exposure`.
fn find_smart_exposure(node: &Value) -> Option<SmartExposure> {
    if is_running(node) && name_of(node) == "Smart Exposure" {
        return Some(SmartExposure {
            completed_iterations: node
                .get("CompletedIterations")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            iterations: node.get("Iterations").and_then(Value::as_u64).unwrap_or(0) as u32,
            exposure_time: node
                .get("ExposureTime")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        });
    }
    children(node).iter().find_map(find_smart_exposure)
}

/// Earliest condition across this node and all RUNNING descendants.
fn earliest_condition(node: &Value, is_root: bool) -> Option<BindingCondition> {
    if !is_root && !is_running(node) {
        return None;
    }
    let mut best: Option<BindingCondition> = None;

    if let Some(conditions) = node.get("Conditions").and_then(Value::as_array) {
        for cond in conditions {
            let Some(remaining) = cond
                .get("RemainingTime")
                .and_then(Value::as_str)
                .and_then(parse_remaining_time)
            else {
                continue;
            };
            if best
                .as_ref()
                .map_or(true, |b| remaining < b.remaining_secs)
            {
                best = Some(BindingCondition {
                    label: classify_condition(name_of(cond)),
                    remaining_secs: remaining,
                });
            }
        }
    }

    for child in children(node) {
        if let Some(found) = earliest_condition(child, false) {
            if best
                .as_ref()
                .map_or(true, |b| found.remaining_secs < b.remaining_secs)
            {
                best = Some(found);
            }
        }
    }

    best
}

// ─────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────

/// Reduce a `sequence/json` tree to its display summary.
///
/// Returns `None` when the tree has no targets container or no target has
/// ever run.
pub fn walk_sequence(value: &Value) -> Option<SequenceSummary> {
    let payload = response(value)?;
    let top_level = payload.as_array()?;

    let targets = top_level
        .iter()
        .find(|node| name_of(node) == TARGETS_CONTAINER)?;

    // Prefer the running target; otherwise the most recently finished one.
    let running_target = children(targets).iter().find(|c| is_running(c));
    let target = running_target.or_else(|| children(targets).iter().filter(|c| is_finished(c)).next_back())?;
    let running = running_target.is_some();

    let container = deepest_running_container(target, 0)
        .map(|(node, _)| node)
        .or_else(|| last_finished_container(target));

    let summary = SequenceSummary {
        running,
        target_name: strip_container_suffix(name_of(target)).to_string(),
        container_name: container
            .map(|node| strip_container_suffix(name_of(node)).to_string())
            .unwrap_or_default(),
        step_name: deepest_running_leaf(target, 0)
            .map(|(node, _)| name_of(node).to_string())
            .unwrap_or_default(),
        smart_exposure: find_smart_exposure(target),
        condition: earliest_condition(target, true),
    };

    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrap(inner: Value) -> Value {
        json!({ "Response": inner, "Success": true })
    }

    /// A schedule with a Smart Exposure running inside nested containers.
    fn nested_schedule() -> Value {
        wrap(json!([
            { "Name": "Start_Container", "Status": "FINISHED", "Items": [] },
            {
                "Name": "Targets_Container",
                "Status": "RUNNING",
                "Items": [
                    {
                        "Name": "M31_Container",
                        "Status": "RUNNING",
                        "Conditions": [
                            { "Name": "TimeCondition", "RemainingTime": "03:12:00" },
                            { "Name": "AboveHorizonCondition", "RemainingTime": "02:41:30" },
                        ],
                        "Items": [
                            {
                                "Name": "LRGB_Container",
                                "Status": "RUNNING",
                                "Items": [
                                    { "Name": "Switch Filter", "Status": "FINISHED", "Items": [] },
                                    {
                                        "Name": "Smart Exposure",
                                        "Status": "RUNNING",
                                        "CompletedIterations": 14,
                                        "Iterations": 40,
                                        "ExposureTime": 180.0,
                                        "Items": [],
                                    },
                                ],
                            },
                        ],
                    },
                ],
            },
            { "Name": "End_Container", "Status": "CREATED", "Items": [] },
        ]))
    }

    // -- parse_remaining_time ------------------------------------------------

    #[test]
    fn test_parse_remaining_time() {
        assert_eq!(parse_remaining_time("1:30:00"), Some(5400));
        assert_eq!(parse_remaining_time("0:00:45"), Some(45));
        assert_eq!(parse_remaining_time("12:05:09"), Some(43509));
        assert_eq!(parse_remaining_time(" 2:00:00 "), Some(7200));
    }

    #[test]
    fn test_parse_remaining_time_rejects_garbage() {
        assert_eq!(parse_remaining_time(""), None);
        assert_eq!(parse_remaining_time("90"), None);
        assert_eq!(parse_remaining_time("1:30"), None);
        assert_eq!(parse_remaining_time("1:75:00"), None);
        assert_eq!(parse_remaining_time("1:00:99"), None);
        assert_eq!(parse_remaining_time("1:00:00:00"), None);
        assert_eq!(parse_remaining_time("soon"), None);
    }

    // -- the nested scenario -------------------------------------------------

    #[test]
    fn test_walk_nested_schedule() {
        let summary = walk_sequence(&nested_schedule()).unwrap();
        assert!(summary.running);
        assert_eq!(summary.target_name, "M31");
        assert_eq!(summary.container_name, "LRGB");
        assert_eq!(summary.step_name, "Smart Exposure");

        let smart = summary.smart_exposure.unwrap();
        assert_eq!(smart.completed_iterations, 14);
        assert_eq!(smart.iterations, 40);
        assert_eq!(smart.exposure_time, 180.0);

        // The horizon condition binds earlier than the plain time condition.
        let condition = summary.condition.unwrap();
        assert_eq!(condition.label, "SETS IN");
        assert_eq!(condition.remaining_secs, 2 * 3600 + 41 * 60 + 30);
        assert_eq!(condition.formatted(), "2:41");
    }

    #[test]
    fn test_walk_prefers_running_target_over_finished() {
        let v = wrap(json!([
            {
                "Name": "Targets_Container",
                "Status": "RUNNING",
                "Items": [
                    { "Name": "M42_Container", "Status": "FINISHED", "Items": [
                        { "Name": "Exposure", "Status": "FINISHED", "Items": [] },
                    ]},
                    { "Name": "M31_Container", "Status": "RUNNING", "Items": [
                        { "Name": "Exposure", "Status": "RUNNING", "Items": [] },
                    ]},
                ],
            },
        ]));
        let summary = walk_sequence(&v).unwrap();
        assert!(summary.running);
        assert_eq!(summary.target_name, "M31");
        assert_eq!(summary.step_name, "Exposure");
    }

    #[test]
    fn test_walk_falls_back_to_last_finished_target() {
        let v = wrap(json!([
            {
                "Name": "Targets_Container",
                "Status": "FINISHED",
                "Items": [
                    { "Name": "M42_Container", "Status": "FINISHED", "Items": [
                        { "Name": "Imaging_Container", "Status": "FINISHED", "Items": [
                            { "Name": "Exposure", "Status": "FINISHED", "Items": [] },
                        ]},
                    ]},
                    { "Name": "M81_Container", "Status": "FINISHED", "Items": [
                        { "Name": "Darks_Container", "Status": "FINISHED", "Items": [
                            { "Name": "Exposure", "Status": "FINISHED", "Items": [] },
                        ]},
                    ]},
                ],
            },
        ]));
        let summary = walk_sequence(&v).unwrap();
        assert!(!summary.running);
        assert_eq!(summary.target_name, "M81");
        // Fallback container: last finished container in the subtree.
        assert_eq!(summary.container_name, "Darks");
        assert_eq!(summary.step_name, "");
        assert!(summary.smart_exposure.is_none());
    }

    #[test]
    fn test_walk_no_targets_container() {
        let v = wrap(json!([{ "Name": "Start_Container", "Status": "RUNNING", "Items": [] }]));
        assert!(walk_sequence(&v).is_none());
    }

    #[test]
    fn test_walk_empty_targets() {
        let v = wrap(json!([{ "Name": "Targets_Container", "Status": "CREATED", "Items": [] }]));
        assert!(walk_sequence(&v).is_none());
    }

    #[test]
    fn test_conditions_only_from_running_branches() {
        // A finished sibling carries a (stale) shorter condition that must
        // not win over the running branch's condition.
        let v = wrap(json!([
            {
                "Name": "Targets_Container",
                "Status": "RUNNING",
                "Items": [
                    {
                        "Name": "M31_Container",
                        "Status": "RUNNING",
                        "Conditions": [
                            { "Name": "TimeCondition", "RemainingTime": "04:00:00" },
                        ],
                        "Items": [
                            {
                                "Name": "Done_Container",
                                "Status": "FINISHED",
                                "Conditions": [
                                    { "Name": "TimeCondition", "RemainingTime": "00:01:00" },
                                ],
                                "Items": [],
                            },
                            {
                                "Name": "Active_Container",
                                "Status": "RUNNING",
                                "Conditions": [
                                    { "Name": "SunAltitudeCondition", "RemainingTime": "01:30:00" },
                                ],
                                "Items": [
                                    { "Name": "Exposure", "Status": "RUNNING", "Items": [] },
                                ],
                            },
                        ],
                    },
                ],
            },
        ]));
        let condition = walk_sequence(&v).unwrap().condition.unwrap();
        assert_eq!(condition.label, "SETS IN");
        assert_eq!(condition.remaining_secs, 5400);
    }

    #[test]
    fn test_condition_classification() {
        assert_eq!(classify_condition("AboveHorizonCondition"), "SETS IN");
        assert_eq!(classify_condition("SunAltitudeCondition"), "SETS IN");
        assert_eq!(classify_condition("DawnCondition"), "DAWN IN");
        assert_eq!(classify_condition("TwilightCondition"), "DAWN IN");
        assert_eq!(classify_condition("TimeCondition"), "TIME LEFT");
        assert_eq!(classify_condition("LoopCondition"), "TIME LEFT");
    }

    #[test]
    fn test_condition_formats_as_h_mm() {
        let c = BindingCondition {
            label: "TIME LEFT",
            remaining_secs: 3 * 3600 + 12 * 60,
        };
        assert_eq!(c.formatted(), "3:12");
    }
}
