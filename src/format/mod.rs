//! Output formatting for `igm`.
//!
//! Supports human-readable text output, machine-parseable JSON, and CSV export
//! for `print` and `print-plan`. JSON goes to stdout, diagnostics to stderr.

pub mod csv;
mod output;
mod text;

pub use output::{IgnoreView, PhaseReport, PolicyView};
pub use text::{
    format_ignore_line, format_org_status, format_phase_summary, format_policy_block,
    format_progress, format_state_label, format_status_label, terminal_width, truncate_text,
};
