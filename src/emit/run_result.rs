use crate::emit::EmitError;
use crate::runner::report::TestRunReport;

/// Emit test run results as YAML.
///
/// # Errors
///
/// Returns an error if YAML serialization fails.
pub fn emit_run_yaml(report: &TestRunReport) -> Result<String, EmitError> {
    Ok(serde_yaml::to_string(report)?)
}

/// Emit test run results as JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn emit_run_json(report: &TestRunReport) -> Result<String, EmitError> {
    let mut out = serde_json::to_string_pretty(report)?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::model::TestStatus;
    use crate::plan::types::PlanMetadata;
    use crate::runner::context::LogStream;
    use crate::runner::report::{RunMetadata, RunSummary, StepReport};

    fn report() -> TestRunReport {
        let mut failed = StepReport {
            name: "T1".into(),
            full_name: "Root/T1".into(),
            test_id: "t1".into(),
            test_case: true,
            status: TestStatus::Failed,
            outcome: "error".into(),
            duration_ms: 12,
            assert_count: 1,
            logs: BTreeMap::new(),
            children: vec![],
        };
        failed
            .logs
            .insert(LogStream::Failures, "Fatal error in test controller: boom".into());
        TestRunReport {
            plan: PlanMetadata {
                name: "Root".into(),
                filter: String::new(),
                exact_filter: false,
                commands_total: 2,
                dependencies_total: 0,
            },
            run: RunMetadata {
                controller: "delegating".into(),
                duration_ms: 40,
            },
            steps: vec![StepReport {
                name: "Root".into(),
                full_name: "Root".into(),
                test_id: "root".into(),
                test_case: false,
                status: TestStatus::Failed,
                outcome: "failed".into(),
                duration_ms: 20,
                assert_count: 0,
                logs: BTreeMap::new(),
                children: vec![failed],
            }],
            summary: RunSummary {
                total: 1,
                passed: 0,
                failed: 1,
                skipped: 0,
                inconclusive: 0,
                success: false,
            },
        }
    }

    #[test]
    fn run_yaml_nests_steps_and_logs() {
        let yaml = emit_run_yaml(&report()).expect("emit failed");
        assert!(yaml.contains("controller: delegating"));
        assert!(yaml.contains("children:"));
        assert!(yaml.contains("failures:"));
        assert!(yaml.contains("Fatal error in test controller: boom"));
        assert!(yaml.contains("success: false"));
    }

    #[test]
    fn run_json_round_trips() {
        let original = report();
        let json = emit_run_json(&original).expect("emit failed");
        assert!(json.contains(r#""outcome": "error""#));
        let back: TestRunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }
}
