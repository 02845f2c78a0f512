//! End-to-end pipeline runs against the fake engine

use serial_test::serial;
use std::fs;

use monwatch::alert::AlertLevel;
use monwatch::artifacts::ArtifactStore;
use monwatch::config::Mode;
use monwatch::pipeline::PipelineError;

use super::helpers::*;

const CHECK: &[Mode] = &[Mode::UniversalPolicy];

#[test]
#[serial]
fn test_violation_is_decoded_with_variable_names() {
    let env = TestEnv::new(&[("f1", "a,b")]);
    let mut t = env.pipeline(env.config(CHECK));

    t.pipeline
        .run(vec![group("g1", &["f1|V @3 (time point 5): (x,y)"])])
        .unwrap();

    let violations = t.alerts.with_level(AlertLevel::Violation);
    assert_eq!(violations.len(), 1);
    assert!(violations[0]
        .text
        .contains("```\n@3 (time point 5):\n a = \"x\"\n b = \"y\"\n```"));
    assert!(violations[0].text.contains("group `g1`"));
    assert_eq!(violations[0].short_text, "Violation in f1");

    let stats = &t.pipeline.stats()["g1"].monpoly["f1"];
    assert_eq!(stats.violations, 1);
    assert_eq!(stats.decode_fallbacks, 0);
    assert_eq!(stats.exit_code, Some(0));

    assert_eq!(
        t.pipeline.variables("f1"),
        Some(&["a".to_string(), "b".to_string()][..])
    );
    assert_eq!(t.pipeline.repros().get("g1", "f1").map(|r| r.len()), Some(1));
}

#[test]
#[serial]
fn test_arity_mismatch_alerts_raw_violation() {
    let env = TestEnv::new(&[("f1", "a,b")]);
    let mut t = env.pipeline(env.config(CHECK));

    t.pipeline
        .run(vec![group("g1", &["f1|V @3 (time point 5): (x)"])])
        .unwrap();

    let violations = t.alerts.with_level(AlertLevel::Violation);
    assert_eq!(violations.len(), 1);
    assert!(violations[0]
        .text
        .contains("```\n@3 (time point 5): (x)\n```"));
    assert_eq!(t.pipeline.stats()["g1"].monpoly["f1"].decode_fallbacks, 1);
}

#[test]
#[serial]
fn test_groups_are_processed_in_lexicographic_order() {
    let env = TestEnv::new(&[("f1", "g")]);
    let mut t = env.pipeline(env.config(&[Mode::SaveEventStream, Mode::UniversalPolicy]));

    let groups = ["g3", "g1", "g2"]
        .iter()
        .map(|name| {
            let event = format!("f1|V @1 (time point 0): ({name})");
            group(name, &[event.as_str()])
        })
        .collect();
    t.pipeline.run(groups).unwrap();

    let keys: Vec<&str> = t.pipeline.stats().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["g1", "g2", "g3"]);

    let visited: Vec<String> = t
        .alerts
        .with_level(AlertLevel::Violation)
        .iter()
        .map(|a| {
            a.text
                .lines()
                .find_map(|l| l.strip_prefix(" g = \""))
                .map(|v| v.trim_end_matches('"').to_string())
                .unwrap()
        })
        .collect();
    assert_eq!(visited, vec!["g1", "g2", "g3"]);
}

#[test]
#[serial]
fn test_early_stop_does_not_block_next_formula() {
    let env = TestEnv::new(&[("f1", "a"), ("f2", "b")]);
    let mut t = env.pipeline(env.config(CHECK));

    let mut events = vec!["f1|V @1 (time point 0): (first)"];
    events.extend(std::iter::repeat("*|noop").take(200));
    events.push("f1|V @2 (time point 1): (second)");
    events.push("f2|V @3 (time point 2): (other)");

    t.pipeline.run(vec![group("g1", &events)]).unwrap();

    let violations = t.alerts.with_level(AlertLevel::Violation);
    assert_eq!(violations.len(), 2);
    assert!(violations[0].text.contains("a = \"first\""));
    assert!(violations[1].text.contains("b = \"other\""));
    assert!(t.alerts.with_level(AlertLevel::EngineFault).is_empty());

    let stats = &t.pipeline.stats()["g1"].monpoly;
    assert_eq!(stats["f1"].violations, 1);
    assert_eq!(stats["f1"].exit_code, Some(0));
    assert_eq!(stats["f2"].violations, 1);
}

#[test]
#[serial]
fn test_fail_hard_propagates_engine_fault() {
    let env = TestEnv::new(&[("f1", "a"), ("f2", "b")]);
    env.break_formula("f1");
    let mut config = env.config(CHECK);
    config.fail_hard = true;
    let mut t = env.pipeline(config);

    let err = t
        .pipeline
        .run(vec![group("g1", &["f2|V @1 (time point 0): (x)"])])
        .unwrap_err();

    assert!(matches!(err, PipelineError::Session(_)));
    assert!(t.alerts.with_level(AlertLevel::EngineFault).is_empty());
}

#[test]
#[serial]
fn test_engine_fault_is_alerted_and_next_formula_runs() {
    let env = TestEnv::new(&[("f1", "a"), ("f2", "b")]);
    env.break_formula("f1");
    let mut t = env.pipeline(env.config(CHECK));

    t.pipeline
        .run(vec![group("g1", &["f2|V @1 (time point 0): (x)"])])
        .unwrap();

    let faults = t.alerts.with_level(AlertLevel::EngineFault);
    assert_eq!(faults.len(), 1);
    assert!(faults[0].text.contains("-formula f1/formula.mfotl"));
    assert!(faults[0].short_text.starts_with("Exception from Monpoly:"));

    assert_eq!(t.alerts.with_level(AlertLevel::Violation).len(), 1);
    let stats = &t.pipeline.stats()["g1"].monpoly;
    assert!(stats.contains_key("f1"));
    assert_eq!(stats["f2"].violations, 1);
}

#[test]
#[serial]
fn test_raw_only_skips_preprocessing_and_checking() {
    let env = TestEnv::new(&[("f1", "a")]);
    let artifacts = env.artifacts_manager();
    let mut t = env.pipeline(env.config(&[Mode::Raw]));

    let groups = vec![
        group("g1", &["f1|V @1 (time point 0): (x)"]),
        group("g2", &["f1|X 4"]),
    ];
    t.pipeline.run(groups.clone()).unwrap();

    assert!(t.alerts.all().is_empty());
    assert_eq!(t.pipeline.stats().len(), 2);
    for group in &groups {
        let stats = &t.pipeline.stats()[group.name()];
        assert!(stats.monpoly.is_empty());
        assert_eq!(stats.pre_processor, serde_json::json!({}));
        assert!(artifacts.raw_logs_file(group).exists());
        assert!(!artifacts.event_stream_file(group, "unipol").exists());
    }
    assert!(t.pipeline.variables("f1").is_none());
}

#[test]
#[serial]
fn test_save_event_stream_without_checking() {
    let env = TestEnv::new(&[("f1", "a")]);
    let artifacts = env.artifacts_manager();
    let mut t = env.pipeline(env.config(&[Mode::SaveEventStream]));

    let g1 = group("g1", &["f1|V @1 (time point 0): (x)", "*|noop"]);
    t.pipeline.run(vec![g1.clone()]).unwrap();

    let saved = fs::read_to_string(artifacts.event_stream_file(&g1, "unipol")).unwrap();
    assert_eq!(saved, "f1|V @1 (time point 0): (x)\n*|noop\n");
    assert!(t.pipeline.stats()["g1"].monpoly.is_empty());
    assert_eq!(t.pipeline.stats()["g1"].pre_processor["events"], 2);
}

#[test]
#[serial]
fn test_abnormal_exit_is_alerted_once() {
    let env = TestEnv::new(&[("f1", "a")]);
    let mut t = env.pipeline(env.config(CHECK));

    t.pipeline
        .run(vec![group("g1", &["f1|E Error: bad input", "f1|X 3"])])
        .unwrap();

    assert_eq!(
        t.alerts.levels(),
        vec![AlertLevel::EngineError, AlertLevel::AbnormalExit]
    );
    let exit = &t.alerts.with_level(AlertLevel::AbnormalExit)[0];
    assert!(exit.text.contains("non-zero code `3`"));
    assert_eq!(exit.short_text, "Monpoly exited with code 3");

    let stats = &t.pipeline.stats()["g1"].monpoly["f1"];
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.exit_code, Some(3));
}

#[test]
#[serial]
fn test_timeout_is_a_fault_without_exit_alert() {
    let mut env = TestEnv::new(&[("f1", "a")]);
    env.engine.session_timeout_secs = 1;
    let mut t = env.pipeline(env.config(CHECK));

    t.pipeline
        .run(vec![group("g1", &["f1|H"])])
        .unwrap();

    assert_eq!(t.alerts.levels(), vec![AlertLevel::EngineFault]);
    assert!(t.alerts.all()[0].text.contains("timed out"));
    assert!(t.pipeline.stats()["g1"].monpoly["f1"].timed_out);
}

#[test]
#[serial]
fn test_missing_global_infra_skips_group() {
    let env = TestEnv::new(&[("f1", "a"), ("f2", "b")]);
    let mut config = env.config(CHECK);
    config.formulas = Some(formulas(&["f2"]));
    let mut t = env.pipeline_with(config, &["f2"], RecordingSink::new(), RecordingSink::new());

    t.pipeline
        .run(vec![
            group("g1", &["f2|V @1 (time point 0): (x)"]),
            group_with_infra("g2", &["f2|V @1 (time point 0): (y)"]),
        ])
        .unwrap();

    let failures = t.alerts.with_level(AlertLevel::PipelineFailure);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].text.contains("g1"));

    let keys: Vec<&str> = t.pipeline.stats().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["g2"]);
    assert!(t.pipeline.stats()["g2"].global_infra.is_some());
    assert_eq!(t.alerts.with_level(AlertLevel::Violation).len(), 1);
}

#[test]
#[serial]
fn test_missing_global_infra_fails_hard() {
    let env = TestEnv::new(&[("f2", "b")]);
    let mut config = env.config(CHECK);
    config.formulas = Some(formulas(&["f2"]));
    config.fail_hard = true;
    let mut t = env.pipeline_with(config, &["f2"], RecordingSink::new(), RecordingSink::new());

    let err = t.pipeline.run(vec![group("g1", &[])]).unwrap_err();
    assert!(matches!(err, PipelineError::Precondition { .. }));
}

#[test]
fn test_empty_and_duplicate_groups_are_rejected() {
    let env = TestEnv::new(&[("f1", "a")]);
    let mut t = env.pipeline(env.config(CHECK));

    assert!(matches!(
        t.pipeline.run(Vec::new()),
        Err(PipelineError::NoGroups)
    ));

    let err = t
        .pipeline
        .run(vec![group("g1", &[]), group("g2", &[]), group("g1", &[])])
        .unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateGroup(name) if name == "g1"));
    assert!(t.pipeline.stats().is_empty());
}

#[test]
#[serial]
fn test_alert_failures_are_ignored_unless_failing_hard() {
    let env = TestEnv::new(&[("f1", "a")]);
    let events = ["f1|V @1 (time point 0): (x)"];

    let alerts = RecordingSink::failing();
    let mut t = env.pipeline_with(env.config(CHECK), &[], alerts.clone(), RecordingSink::new());
    t.pipeline.run(vec![group("g1", &events)]).unwrap();
    assert_eq!(alerts.all().len(), 1);

    let mut config = env.config(CHECK);
    config.fail_hard = true;
    let mut t = env.pipeline_with(config, &[], RecordingSink::failing(), RecordingSink::new());
    let err = t.pipeline.run(vec![group("g1", &events)]).unwrap_err();
    assert!(matches!(err, PipelineError::Other(_)));
    assert!(format!("{err:#}").contains("webhook unavailable"));
}

#[test]
#[serial]
fn test_repros_are_saved_per_group_and_formula() {
    let env = TestEnv::new(&[("f1", "a"), ("f2", "b")]);
    let artifacts = env.artifacts_manager();
    let mut t = env.pipeline(env.config(&[Mode::SaveEventStream, Mode::UniversalPolicy]));

    let g1 = group("g1", &["f1|V @1 (time point 0): (x)"]);
    t.pipeline.run(vec![g1.clone()]).unwrap();
    t.pipeline.save_repros().unwrap();
    t.pipeline.save_statistics().unwrap();

    let script = fs::read_to_string(artifacts.repro_file("g1", "f1")).unwrap();
    let log_file = artifacts.event_stream_file(&g1, "unipol");
    assert!(script.contains(&format!("-log {}", log_file.display())));
    assert!(!artifacts.repro_file("g1", "f2").exists());

    let stat: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(artifacts.stat_file()).unwrap()).unwrap();
    assert_eq!(stat["g1"]["monpoly"]["f1"]["violations"], 1);
    assert_eq!(stat["g1"]["monpoly"]["f2"]["violations"], 0);
}

#[test]
#[serial]
fn test_variables_are_fetched_once_per_run() {
    let env = TestEnv::new(&[("f1", "a")]);
    let mut t = env.pipeline(env.config(CHECK));

    t.pipeline.run(vec![group("g1", &[])]).unwrap();
    assert_eq!(t.pipeline.variables("f1"), Some(&["a".to_string()][..]));

    // A changed definition is not picked up within the same pipeline
    env.add_formula("f1", "renamed");
    t.pipeline
        .run(vec![group("g2", &["f1|V @1 (time point 0): (x)"])])
        .unwrap();
    let violation = &t.alerts.with_level(AlertLevel::Violation)[0];
    assert!(violation.text.contains(" a = \"x\""));
}

#[test]
#[serial]
fn test_liveness_check_runs_once_per_pipeline() {
    let env = TestEnv::new(&[("f1", "a")]);
    let mut t = env.pipeline(env.config(&[Mode::CheckPipelineLiveness]));
    let events = ["dummy|V @1 (time point 0): ()"];

    t.pipeline
        .run(vec![group("g2", &["*|noop"]), group("g1", &events)])
        .unwrap();
    assert!(t.pipeline.liveness_checked());
    t.pipeline.run(vec![group("g3", &events)]).unwrap();

    assert_eq!(t.liveness.levels(), vec![AlertLevel::LivenessOk]);
    assert_eq!(
        t.liveness.all()[0].short_text,
        "Policy monitoring pipeline status: 🍏"
    );
    assert!(t.alerts.all().is_empty());
}

#[test]
#[serial]
fn test_silent_liveness_formula_means_broken_pipeline() {
    let env = TestEnv::new(&[("f1", "a")]);
    let mut t = env.pipeline(env.config(&[Mode::CheckPipelineLiveness]));

    t.pipeline.run(vec![group("g1", &["*|noop"])]).unwrap();

    let broken = t.liveness.with_level(AlertLevel::LivenessBroken);
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].short_text, "💀 Policy monitoring pipeline broken 💀");
    assert!(t.alerts.all().is_empty());
}

#[test]
#[serial]
fn test_pre_processor_stats_cover_the_whole_group_after_early_stop() {
    let env = TestEnv::new(&[("f1", "a"), ("f2", "b")]);
    let mut t = env.pipeline(env.config(CHECK));

    let mut logs = vec![serde_json::json!("*|V @1 (time point 0): (x)")];
    logs.extend(std::iter::repeat(serde_json::json!("*|noop")).take(5000));
    logs.push(serde_json::json!({"message": "not an event"}));
    logs.push(serde_json::json!(42));
    t.pipeline
        .run(vec![monwatch::models::Group::new("g1", logs)])
        .unwrap();

    let stats = &t.pipeline.stats()["g1"];
    assert_eq!(stats.monpoly["f1"].violations, 1);
    assert_eq!(stats.monpoly["f2"].violations, 1);
    assert_eq!(stats.pre_processor["documents"], 5003);
    assert_eq!(stats.pre_processor["events"], 5001);
    assert_eq!(stats.pre_processor["skipped"], 2);
}

#[test]
#[serial]
fn test_failed_variable_query_is_not_repeated_per_group() {
    let env = TestEnv::new(&[("f1", "a"), ("f2", "b")]);
    env.break_formula("f1");
    let mut t = env.pipeline(env.config(CHECK));

    t.pipeline
        .run(vec![
            group("g1", &["f2|V @1 (time point 0): (x)"]),
            group("g2", &["f2|V @1 (time point 0): (y)"]),
        ])
        .unwrap();

    assert_eq!(env.check_calls("f1"), 1);
    assert_eq!(env.check_calls("f2"), 1);

    let faults = t.alerts.with_level(AlertLevel::EngineFault);
    assert_eq!(faults.len(), 2);
    assert!(faults
        .iter()
        .all(|f| f.text.contains("cannot type-check f1")));
    assert_eq!(t.alerts.with_level(AlertLevel::Violation).len(), 2);
}
