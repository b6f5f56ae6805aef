//! Uniform post-processing of adapter metric lines
//!
//! Vendors disagree on naming and duplication; every adapter runs its parsed
//! lines through [`finalize_lines`] so the rest of the system sees one
//! consistent shape: parenthetical-stripped labels, duplicates collapsed to
//! the most conservative entry, model-priority ordering, and a fallback badge
//! instead of an empty list.

use crate::model::{BadgeMetric, MetricLine};
use once_cell::sync::Lazy;
use regex::Regex;

pub const NEUTRAL_BADGE_COLOR: &str = "#a3a3a3";

static TRAILING_PARENTHETICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\([^)]*\)\s*$").expect("valid regex"));

/// Strip a trailing parenthetical annotation: "Gemini 2.5 Pro (preview)" ->
/// "Gemini 2.5 Pro".
pub fn strip_parenthetical(label: &str) -> String {
    TRAILING_PARENTHETICAL.replace(label, "").trim().to_string()
}

/// Badge emitted when parsing produced no usable metric lines.
pub fn no_data_badge() -> MetricLine {
    MetricLine::Badge(BadgeMetric {
        label: "Status".to_string(),
        text: "No usage data".to_string(),
        color: NEUTRAL_BADGE_COLOR.to_string(),
    })
}

/// Apply the uniform normalization policy. Labels are stripped of trailing
/// parentheticals; entries with the same identity key collapse to the one
/// with lower remaining capacity; output is ordered by model priority with
/// ties keeping insertion order.
pub fn finalize_lines(lines: Vec<MetricLine>) -> Vec<MetricLine> {
    let mut kept: Vec<MetricLine> = Vec::new();

    for line in lines {
        let line = strip_label(line);
        match kept.iter_mut().find(|existing| existing.id() == line.id()) {
            Some(existing) => {
                if is_more_conservative(&line, existing) {
                    *existing = line;
                }
            }
            None => kept.push(line),
        }
    }

    kept.sort_by_key(|line| priority_bucket(line.label()));

    if kept.is_empty() {
        kept.push(no_data_badge());
    }
    kept
}

fn strip_label(line: MetricLine) -> MetricLine {
    match line {
        MetricLine::Progress(mut m) => {
            m.label = strip_parenthetical(&m.label);
            MetricLine::Progress(m)
        }
        MetricLine::Text(mut m) => {
            m.label = strip_parenthetical(&m.label);
            MetricLine::Text(m)
        }
        MetricLine::Badge(mut m) => {
            m.label = strip_parenthetical(&m.label);
            MetricLine::Badge(m)
        }
    }
}

/// For duplicate progress lines, the entry with the higher used fraction has
/// less remaining capacity and wins. Non-progress duplicates keep the first.
fn is_more_conservative(candidate: &MetricLine, existing: &MetricLine) -> bool {
    match (candidate, existing) {
        (MetricLine::Progress(a), MetricLine::Progress(b)) => a.fraction() > b.fraction(),
        _ => false,
    }
}

/// Model-family ordering: Gemini Pro > other Gemini > Claude Opus > other
/// Claude > everything else.
fn priority_bucket(label: &str) -> u8 {
    let lower = label.to_lowercase();
    if lower.contains("gemini") && lower.contains("pro") {
        0
    } else if lower.contains("gemini") {
        1
    } else if lower.contains("claude") && lower.contains("opus") {
        2
    } else if lower.contains("claude") {
        3
    } else {
        4
    }
}
