//! Plain text formatting for terminal output.
//!
//! Color is applied through `crossterm` only when the caller asks for it.

use crate::migrate::PhaseSummary;
use crate::migrate::status::{OrgStatus, PhaseProgress, StatusLabel};
use crate::model::{Ignore, IgnoreState, Policy};
use crate::util::time::format_date;
use crossterm::style::Stylize;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const BAR_WIDTH: usize = 20;

/// Terminal width from `COLUMNS`, then the tty, then 80.
#[must_use]
pub fn terminal_width() -> usize {
    if let Ok(columns) = std::env::var("COLUMNS") {
        if let Ok(value) = columns.trim().parse::<usize>() {
            if value > 0 {
                return value;
            }
        }
    }
    crossterm::terminal::size()
        .ok()
        .map(|(cols, _)| usize::from(cols))
        .filter(|cols| *cols > 0)
        .unwrap_or(80)
}

/// Truncate text to fit within `max_len` visible columns.
///
/// Handles wide characters (emojis, CJK) correctly using `unicode-width`.
#[must_use]
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(text) <= max_len {
        return text.to_string();
    }

    let (target_len, suffix) = if max_len <= 3 { (max_len, "") } else { (max_len - 3, "...") };
    let mut w = 0;
    let mut s = String::new();
    for c in text.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if w + cw > target_len {
            break;
        }
        w += cw;
        s.push(c);
    }
    s.push_str(suffix);
    s
}

/// Status label with optional color.
#[must_use]
pub fn format_status_label(label: StatusLabel, use_color: bool) -> String {
    let text = label.as_str();
    if !use_color {
        return text.to_string();
    }
    match label {
        StatusLabel::NotStarted => text.dark_grey().to_string(),
        StatusLabel::Gathered | StatusLabel::Planned => text.blue().to_string(),
        StatusLabel::Executing | StatusLabel::Retesting | StatusLabel::CleaningUp => {
            text.yellow().to_string()
        }
        StatusLabel::Complete => text.green().bold().to_string(),
    }
}

/// Ignore state with optional color.
#[must_use]
pub fn format_state_label(state: IgnoreState, use_color: bool) -> String {
    let text = state.as_str();
    if !use_color {
        return text.to_string();
    }
    match state {
        IgnoreState::Unmapped => text.red().to_string(),
        IgnoreState::Collected => text.to_string(),
        IgnoreState::Superseded => text.dark_grey().to_string(),
        IgnoreState::Selected => text.blue().to_string(),
        IgnoreState::Migrated => text.green().to_string(),
        IgnoreState::Deleted => text.green().dim().to_string(),
    }
}

/// One line per ignore: `id  [type]  state  created  asset  reason`.
#[must_use]
pub fn format_ignore_line(ignore: &Ignore, use_color: bool, max_width: usize) -> String {
    let asset = if ignore.asset_key.is_empty() {
        "-"
    } else {
        ignore.asset_key.as_str()
    };
    let line = |state: &str| {
        format!(
            "{}  [{}]  {}  {}  {}",
            ignore.id,
            ignore.ignore_type.as_str(),
            state,
            format_date(&ignore.created_at),
            asset
        )
    };
    let used = UnicodeWidthStr::width(line(ignore.state().as_str()).as_str()) + 2;
    let reason = truncate_text(&ignore.reason, max_width.saturating_sub(used));
    let line = line(&format_state_label(ignore.state(), use_color));
    if reason.is_empty() {
        line
    } else {
        format!("{line}  {reason}")
    }
}

/// Multi-line block for one planned policy.
#[must_use]
pub fn format_policy_block(policy: &Policy, use_color: bool) -> String {
    let id = if use_color {
        policy.internal_id.clone().bold().to_string()
    } else {
        policy.internal_id.clone()
    };
    let remote = policy.external_id.as_deref().unwrap_or("(not executed)");
    let expires = policy
        .expires_at
        .map_or_else(|| "never".to_string(), |dt| format_date(&dt));
    let sources = policy
        .source_ignores
        .iter()
        .map(|source| {
            if *source == policy.selected_ignore_id {
                format!("*{source}")
            } else {
                source.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "{id}  [{}]  asset {}\n  remote:  {remote}\n  expires: {expires}\n  sources: {sources}\n  reason:  {}",
        policy.policy_type.as_str(),
        policy.asset_key,
        policy.reason
    )
}

/// One-line phase summary.
#[must_use]
pub fn format_phase_summary(summary: &PhaseSummary, use_color: bool) -> String {
    let line = summary.to_string();
    if !use_color {
        return line;
    }
    if summary.failed > 0 && summary.succeeded == 0 {
        line.red().to_string()
    } else if summary.failed > 0 || summary.timed_out {
        line.yellow().to_string()
    } else {
        line
    }
}

/// `[#####.....]  50.0% (1/2)` style bar.
#[must_use]
pub fn format_progress(progress: &PhaseProgress) -> String {
    let filled = if progress.total == 0 {
        0
    } else {
        (progress.done * BAR_WIDTH / progress.total).min(BAR_WIDTH)
    };
    format!(
        "[{}{}] {:5.1}% ({}/{})",
        "#".repeat(filled),
        ".".repeat(BAR_WIDTH - filled),
        progress.percent,
        progress.done,
        progress.total
    )
}

/// Status report block for one organization.
#[must_use]
pub fn format_org_status(status: &OrgStatus, use_color: bool) -> String {
    let mut out = format!(
        "Organization {}: {}\n",
        status.org,
        format_status_label(status.label, use_color)
    );
    for (name, progress) in [
        ("Mapped", &status.mapped),
        ("Selected", &status.selected),
        ("Executed", &status.executed),
        ("Retested", &status.retested),
        ("Cleaned up", &status.cleaned_up),
    ] {
        out.push_str(&format!("  {name:<11} {}\n", format_progress(progress)));
    }
    out.push_str(&format!(
        "  {} ignore(s), {} policy(ies), {} project(s) ({} CLI)",
        status.counts.ignores,
        status.counts.policies,
        status.counts.projects,
        status.counts.cli_projects
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IgnoreType;
    use crate::storage::LedgerCounts;
    use chrono::{TimeZone, Utc};

    #[test]
    fn truncate_handles_short_and_long() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("a long reason here", 10), "a long ...");
        assert_eq!(truncate_text("abcdef", 2), "ab");
        assert_eq!(truncate_text("abc", 0), "");
    }

    #[test]
    fn truncate_counts_wide_chars() {
        assert_eq!(truncate_text("日本語テキスト", 7), "日本...");
    }

    #[test]
    fn plain_labels_have_no_escapes() {
        assert_eq!(format_status_label(StatusLabel::CleaningUp, false), "CLEANING UP");
        assert_eq!(format_state_label(IgnoreState::Superseded, false), "superseded");
    }

    #[test]
    fn ignore_line_shows_dash_for_unmapped() {
        let mut ignore = Ignore::new(
            "i1",
            "org",
            "proj",
            "SNYK-1",
            IgnoreType::Temporary,
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
        );
        ignore.reason = "pending upstream fix".into();
        let line = format_ignore_line(&ignore, false, 200);
        assert_eq!(line, "i1  [temporary]  unmapped  2023-01-01  -  pending upstream fix");
    }

    #[test]
    fn policy_block_marks_selected_source() {
        let policy = Policy {
            internal_id: "pol-1".into(),
            org_id: "org".into(),
            asset_key: "A".into(),
            policy_type: IgnoreType::WontFix,
            reason: "r".into(),
            expires_at: None,
            source_ignores: vec!["i1".into(), "i2".into()],
            selected_ignore_id: "i2".into(),
            external_id: None,
            created_at: None,
        };
        let block = format_policy_block(&policy, false);
        assert!(block.starts_with("pol-1  [wont-fix]  asset A"));
        assert!(block.contains("sources: i1, *i2"));
        assert!(block.contains("(not executed)"));
        assert!(block.contains("expires: never"));
    }

    #[test]
    fn progress_bar_for_empty_total() {
        let bar = format_progress(&PhaseProgress::new(0, 0));
        assert_eq!(bar, "[....................]   0.0% (0/0)");
        let bar = format_progress(&PhaseProgress::new(1, 2));
        assert!(bar.starts_with("[##########..........]  50.0%"));
    }

    #[test]
    fn org_status_block_lists_phases() {
        let status = OrgStatus::from_counts("org-a", LedgerCounts::default());
        let text = format_org_status(&status, false);
        assert!(text.starts_with("Organization org-a: NOT STARTED"));
        assert!(text.contains("Retested"));
        assert!(text.ends_with("0 ignore(s), 0 policy(ies), 0 project(s) (0 CLI)"));
    }
}
