use azbackup_config::Scenario;
use azbackup_verify::{ScenarioReport, VerificationReport};

/// Render a verification report as human-readable text.
pub fn render_report(report: &VerificationReport) -> String {
    let mut out = String::new();
    for scenario in &report.scenarios {
        render_scenario(&mut out, scenario);
    }
    let failed = report.failed().count();
    out.push_str(&format!(
        "\n{} scenario(s), {} passed, {} failed.\n",
        report.scenarios.len(),
        report.scenarios.len() - failed,
        failed
    ));
    out
}

fn render_scenario(out: &mut String, s: &ScenarioReport) {
    let verdict = if s.passed() { "PASS" } else { "FAIL" };
    let elapsed = s
        .finished_at
        .map(|f| format!(" in {}s", (f - s.started_at).num_seconds()))
        .unwrap_or_default();
    out.push_str(&format!(
        "{} {} [{}] {} check(s){}\n",
        verdict, s.scenario, s.unique_id, s.checks, elapsed
    ));
    for m in &s.mismatches {
        out.push_str(&format!("  x {}\n", m));
    }
    for e in &s.errors {
        out.push_str(&format!("  ! {}: {}\n", e.stage, e.message));
    }
}

/// One line per scenario with what it exercises.
pub fn render_scenarios(scenarios: &[Scenario]) -> String {
    let mut out = String::new();
    for s in scenarios {
        let mut features = Vec::new();
        if !s.create_resource_group {
            features.push("existing resource group".to_string());
        }
        if !s.tags.is_empty() {
            features.push(format!("{} tag(s)", s.tags.len()));
        }
        if let Some(state) = s.immutability {
            features.push(format!("immutability {}", state));
        }
        if s.diagnostics {
            features.push("diagnostics".into());
        }
        if s.verify_outputs {
            features.push("outputs".into());
        }
        if s.check_idempotence {
            features.push("idempotence".into());
        }
        if s.immutability_workflow {
            features.push("immutability workflow".into());
        }
        if !s.backups.is_empty() {
            features.push(format!("{} backup(s)", s.backups.len()));
        }
        out.push_str(&format!("{:<36} {} {}", s.name, s.location, s.redundancy));
        if !features.is_empty() {
            out.push_str(&format!(" ({})", features.join(", ")));
        }
        out.push('\n');
    }
    out
}
