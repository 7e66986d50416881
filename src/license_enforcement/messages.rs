//! Notices shown when an enforcement decision needs the user's attention.

use chrono::{DateTime, Utc};

use super::Plan;

const BOX_WIDTH: usize = 82;

pub(crate) const PRICING_URL: &str = "pricing.html";

/// Details rendered on the terminal access-denied notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockNotice {
    pub(crate) session_id: String,
    pub(crate) fingerprint: String,
    pub(crate) domain: String,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) violation_count: usize,
}

fn boxed(lines: &[String]) -> String {
    let mut out = format!("╔{}╗\n", "═".repeat(BOX_WIDTH));
    for line in lines {
        for chunk in wrap(line, BOX_WIDTH - 2) {
            let padding = (BOX_WIDTH - 1).saturating_sub(chunk.chars().count());
            out.push_str(&format!("║ {chunk}{}║\n", " ".repeat(padding)));
        }
    }
    out.push_str(&format!("╚{}╝", "═".repeat(BOX_WIDTH)));
    out
}

fn wrap(line: &str, width: usize) -> Vec<String> {
    if line.is_empty() {
        return vec![String::new()];
    }

    let mut chunks = vec![];
    let mut current = String::new();
    for word in line.split(' ') {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    chunks.push(current);
    chunks
}

fn capitalized(plan: Plan) -> String {
    let name = plan.to_string();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => name,
    }
}

pub(crate) fn upgrade_prompt(feature: &str, required: Plan) -> String {
    boxed(&[
        format!("UPGRADE TO {}", capitalized(required).to_uppercase()),
        String::new(),
        format!("The {feature} feature requires a {required} subscription."),
        String::new(),
        format!("Upgrade now at: {PRICING_URL}"),
    ])
}

pub(crate) fn limit_reached(quota: usize) -> String {
    boxed(&[
        "FREE LIMIT REACHED".to_owned(),
        String::new(),
        format!("You've reached your {quota} free articles this month."),
        format!("Upgrade to {} for unlimited articles!", capitalized(Plan::Pro)),
        String::new(),
        format!("Upgrade now at: {PRICING_URL}"),
    ])
}

pub(crate) fn license_warning(domain: &str, license_id: &str) -> String {
    boxed(&[
        "LICENSE VIOLATION DETECTED".to_owned(),
        String::new(),
        format!("This domain ({domain}) is not authorized to use Content Optimizer premium features."),
        "Unauthorized use has been logged.".to_owned(),
        String::new(),
        format!("License ID: {license_id}"),
        format!("Domain: {domain}"),
        String::new(),
        "You may continue with the free version.".to_owned(),
    ])
}

pub(crate) fn block_notice(notice: &BlockNotice) -> String {
    boxed(&[
        "ACCESS DENIED".to_owned(),
        String::new(),
        "Your access to Content Optimizer has been blocked due to license violations.".to_owned(),
        String::new(),
        "Violation Details:".to_owned(),
        format!("Session ID: {}", notice.session_id),
        format!("Fingerprint: {}", notice.fingerprint),
        format!("Domain: {}", notice.domain),
        format!("Time: {}", notice.timestamp.to_rfc3339()),
        format!("Violations: {}", notice.violation_count),
        String::new(),
        "Reload the page after resolving the license issue.".to_owned(),
    ])
}
