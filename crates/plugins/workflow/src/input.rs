//! Normalization of `pr` tool input into a create-pull-request body.

use prflow_core::{CreatePullRequest, Error, Instance, Result};
use serde_json::Value;

/// Shortest accepted label, in characters.
pub const LABEL_MIN_CHARS: usize = 2;

/// Longest accepted label, in characters.
pub const LABEL_MAX_CHARS: usize = 20;

/// Split a comma-separated list, trimming entries and dropping empty ones.
///
/// Returns `None` when nothing is left so the field can be omitted.
pub fn split_list(raw: Option<&str>) -> Option<Vec<String>> {
    let items: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect();

    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Labels that survived filtering, plus one warning per dropped label.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilteredLabels {
    pub labels: Option<Vec<String>>,
    pub warnings: Vec<String>,
}

/// Filter a comma-separated label list.
pub fn filter_labels(raw: Option<&str>) -> FilteredLabels {
    let mut filtered = FilteredLabels::default();
    let Some(candidates) = split_list(raw) else {
        return filtered;
    };

    let mut kept = Vec::new();
    for label in candidates {
        let len = label.chars().count();
        if !(LABEL_MIN_CHARS..=LABEL_MAX_CHARS).contains(&len) {
            filtered.warnings.push(format!(
                "label '{}' dropped: must be {}-{} characters",
                label, LABEL_MIN_CHARS, LABEL_MAX_CHARS
            ));
        } else if !label.chars().all(is_label_char) {
            filtered.warnings.push(format!(
                "label '{}' dropped: only letters, digits, '_' and CJK ideographs are allowed",
                label
            ));
        } else {
            kept.push(label);
        }
    }

    if !kept.is_empty() {
        filtered.labels = Some(kept);
    }
    filtered
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || is_cjk_ideograph(c)
}

fn is_cjk_ideograph(c: char) -> bool {
    matches!(
        c as u32,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x2FA1F
    )
}

/// `true` only for boolean `true` or the string `"true"`.
pub fn coerce_draft(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

/// Create-pull-request body ready to send, with warnings gathered on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPull {
    pub request: CreatePullRequest,
    pub warnings: Vec<String>,
}

/// Validate the title and build the request from instance settings.
///
/// Raw branch names are used; the display form never leaves the process.
pub fn prepare(
    instance: &Instance,
    title: Option<&str>,
    body: Option<&str>,
    draft: bool,
) -> Result<PreparedPull> {
    let title = title.map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Err(Error::Validation(
            "title is required and must not be blank".to_string(),
        ));
    }

    let FilteredLabels { labels, warnings } = filter_labels(instance.labels.as_deref());

    let request = CreatePullRequest {
        title: title.to_string(),
        head: instance.head.clone(),
        base: instance.base.clone(),
        body: body.unwrap_or_default().to_string(),
        draft,
        assignees: split_list(instance.reviewers.as_deref()),
        testers: split_list(instance.testers.as_deref()),
        labels,
    };

    Ok(PreparedPull { request, warnings })
}
