//! Plain-text rendering of session events and saved reports.

use audiometry_core::events::{Prompt, SessionEvent, StageKind};
use audiometry_core::report::SessionStatus;
use audiometry_core::session::SessionProgress;
use audiometry_core::{AssessmentReport, Ear, ThresholdMap};
use std::fmt::Write;

pub fn stage_name(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Standard => "standard",
        StageKind::Micro => "micro",
    }
}

/// One line per event, or `None` for events the terminal does not show.
pub fn event_line(event: &SessionEvent, interactive: bool) -> Option<String> {
    match event {
        SessionEvent::TonePresented {
            frequency,
            ear,
            level_db,
        } => interactive.then(|| format!("  tone {frequency} Hz, {ear} ear, {level_db} dB HL")),
        SessionEvent::ResponseRequired(prompt) => interactive.then(|| match prompt {
            Prompt::Tone => "  heard it? [y/Enter = yes, n = no]".to_string(),
            Prompt::Catch => "  (listen) heard anything? [y/n]".to_string(),
        }),
        SessionEvent::ThresholdFound {
            stage,
            frequency,
            ear,
            threshold_db,
            criterion,
        } => {
            let flag = if criterion.is_degraded() { " (trial cap)" } else { "" };
            Some(format!(
                "[{}] {frequency} Hz {ear}: {threshold_db} dB HL{flag}",
                stage_name(*stage)
            ))
        }
        SessionEvent::StageChanged {
            stage: StageKind::Standard,
            ..
        } => Some("== standard audiometry ==".to_string()),
        SessionEvent::StageChanged {
            stage: StageKind::Micro,
            problem_count,
        } => Some(format!(
            "== micro-audiometry: {problem_count} problem area(s) =="
        )),
        SessionEvent::Progress {
            stage,
            completed,
            total,
        } => interactive.then(|| format!("  [{}] {completed}/{total}", stage_name(*stage))),
        SessionEvent::Complete => Some("== assessment complete ==".to_string()),
    }
}

/// Status line for the `s` key.
pub fn progress_line(progress: &SessionProgress) -> String {
    let mut line = format!(
        "[{}] {}/{} tests ({}%)",
        stage_name(progress.stage),
        progress.completed,
        progress.total,
        progress.percentage
    );
    if let (Some(frequency), Some(ear)) = (progress.current_frequency, progress.current_ear) {
        let _ = write!(line, ", testing {frequency} Hz {ear}");
    }
    if progress.problem_frequencies_found > 0 {
        let _ = write!(line, ", {} problem area(s)", progress.problem_frequencies_found);
    }
    line
}

fn audiogram(out: &mut String, title: &str, results: &ThresholdMap) {
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "  {:>7}  {:>6}  {:>6}", "Hz", "left", "right");
    let cell = |value: Option<i32>| value.map_or_else(|| "-".to_string(), |db| db.to_string());
    for (frequency, ears) in results {
        let _ = writeln!(
            out,
            "  {:>7}  {:>6}  {:>6}",
            frequency,
            cell(ears.get(Ear::Left)),
            cell(ears.get(Ear::Right))
        );
    }
}

/// Human-readable summary of a report.
pub fn report_summary(report: &AssessmentReport) -> String {
    let mut out = String::new();
    let status = match report.status {
        SessionStatus::Completed => "completed",
        SessionStatus::Stopped => "stopped (partial results)",
    };
    let _ = writeln!(
        out,
        "Assessment {status} on {} ({} s)",
        report.test_date.format("%Y-%m-%d %H:%M UTC"),
        report.test_duration_ms / 1000
    );
    audiogram(&mut out, "Standard thresholds (dB HL):", &report.standard_results);
    if !report.micro_results.is_empty() {
        audiogram(&mut out, "Micro-audiometry thresholds (dB HL):", &report.micro_results);
    }

    let analysis = &report.analysis;
    let _ = writeln!(
        out,
        "Average: left {} dB ({:?}), right {} dB ({:?})",
        analysis.average_threshold.left,
        analysis.hearing_loss.left,
        analysis.average_threshold.right,
        analysis.hearing_loss.right
    );
    for drop in &analysis.drops {
        let _ = writeln!(
            out,
            "Drop at {} Hz {}: +{} dB ({:?})",
            drop.frequency, drop.ear, drop.drop, drop.severity
        );
    }
    for asymmetry in &analysis.asymmetry {
        let _ = writeln!(
            out,
            "Asymmetry at {} Hz: {} dB",
            asymmetry.frequency, asymmetry.difference
        );
    }
    for problem in &report.problem_frequencies {
        let _ = writeln!(
            out,
            "Problem area: {} Hz {} ({} dB HL, {:?} priority)",
            problem.center_frequency, problem.ear, problem.threshold, problem.priority
        );
    }
    if report.forced_thresholds > 0 {
        let _ = writeln!(
            out,
            "{} threshold(s) hit the trial cap and may be unreliable",
            report.forced_thresholds
        );
    }
    let _ = writeln!(out, "Reliability: {}", report.reliability.assessment.message());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiometry_core::staircase::ThresholdCriterion;

    #[test]
    fn trial_cap_thresholds_are_flagged() {
        let event = SessionEvent::ThresholdFound {
            stage: StageKind::Standard,
            frequency: 1000,
            ear: Ear::Left,
            threshold_db: 90,
            criterion: ThresholdCriterion::TrialCap,
        };
        let line = event_line(&event, false).unwrap();
        assert_eq!(line, "[standard] 1000 Hz left: 90 dB HL (trial cap)");
    }

    #[test]
    fn progress_line_names_the_current_pair() {
        let progress = SessionProgress {
            stage: StageKind::Micro,
            completed: 3,
            total: 10,
            percentage: 30,
            current_frequency: Some(4200),
            current_ear: Some(Ear::Left),
            problem_frequencies_found: 1,
        };
        assert_eq!(
            progress_line(&progress),
            "[micro] 3/10 tests (30%), testing 4200 Hz left, 1 problem area(s)"
        );
    }

    #[test]
    fn prompts_only_show_when_interactive() {
        let event = SessionEvent::ResponseRequired(Prompt::Tone);
        assert!(event_line(&event, false).is_none());
        assert!(event_line(&event, true).is_some());
    }
}
