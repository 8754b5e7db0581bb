//! Operator-facing output for cycle reports.

use std::fmt::Write;

use crate::engine::SkipReason;
use crate::pipeline::{CycleReport, RunMode};
use crate::watch::LoopSummary;

/// Success or nothing to do.
pub const EXIT_OK: u8 = 0;
/// The cycle reported failures.
pub const EXIT_FAILURES: u8 = 1;
/// Bad configuration or usage; nothing ran.
pub const EXIT_CONFIG: u8 = 2;

pub fn exit_code(report: &CycleReport) -> u8 {
    if report.result.is_success() {
        EXIT_OK
    } else {
        EXIT_FAILURES
    }
}

/// Human-readable report in the `[DONE]`/`[FAIL]`/`[SKIP]` style.
pub fn render_text(report: &CycleReport) -> String {
    let mut out = String::new();

    if report.is_noop() {
        let _ = writeln!(out, "  [SKIP] Nothing to commit");
        return out;
    }

    if report.mode == RunMode::DryRun {
        let _ = writeln!(out, "Dry run: {} plan(s), nothing applied", report.drafts.len());
        for plan in &report.drafts {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "  [PLAN] {} (parent {}, confidence {:.2})",
                plan.cluster().label(),
                plan.parent_ref(),
                plan.cluster().confidence()
            );
            for line in plan.message().lines() {
                let _ = writeln!(out, "    {}", line);
            }
        }
    }

    for commit in &report.result.applied {
        let _ = writeln!(out, "  [DONE] {} {}", commit.id.short(), commit.subject);
    }

    let cancelled = report
        .result
        .skipped
        .values()
        .filter(|r| **r == SkipReason::Cancelled)
        .count();
    if cancelled > 0 {
        let _ = writeln!(out, "  [SKIP] {} path(s) left for the next run (cancelled)", cancelled);
    }

    for failure in &report.result.failures {
        match &failure.plan {
            Some(plan) => {
                let _ = writeln!(
                    out,
                    "  [FAIL] {} '{}': {}",
                    failure.kind, plan.label, failure.detail
                );
            }
            None => {
                let _ = writeln!(out, "  [FAIL] {}: {}", failure.kind, failure.detail);
            }
        }
    }

    out
}

/// One JSON object per cycle.
pub fn render_json(report: &CycleReport) -> serde_json::Result<String> {
    serde_json::to_string(report)
}

pub fn print_report(report: &CycleReport, json: bool) {
    if json {
        match render_json(report) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("  [FAIL] Could not serialize report: {}", e),
        }
    } else {
        print!("{}", render_text(report));
    }
}

pub fn render_summary(summary: &LoopSummary) -> String {
    let mut out = format!(
        "Stopped after {} cycle(s): {} commit(s), {} failed cycle(s)",
        summary.cycles, summary.commits, summary.failed_cycles
    );
    if summary.abandoned {
        out.push_str(", in-flight run abandoned");
    }
    out
}
