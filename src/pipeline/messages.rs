//! Alert texts

use crate::engine::SessionError;
use crate::models::constants::formula_local_path;
use crate::models::Group;
use crate::utils::code_block;

const POLICY_SOURCE_BASE: &str =
    "https://sourcegraph.com/github.com/dfinity/ic@{revision}/-/blob/policy-monitoring/mfotl-policies";

/// Slack link to the source of `formula` at `revision`
pub fn formula_link(revision: &str, formula: &str) -> String {
    let base = POLICY_SOURCE_BASE.replace("{revision}", revision);
    format!("<{base}/{}|{formula}>", formula_local_path(formula))
}

fn test_logs_line(group: &Group) -> String {
    match group.url() {
        Some(url) => format!("Test logs: <{url}>\n"),
        None => String::new(),
    }
}

pub fn violation(
    source: &str,
    group: &Group,
    formula_link: &str,
    violation: &str,
    repro: &str,
) -> String {
    format!(
        "`{source}` reports that group `{}` has violated policy {formula_link}:\n{}\nRepro:\n{}\n{}",
        group.name(),
        code_block(violation),
        code_block(repro),
        test_logs_line(group)
    )
}

pub fn engine_error(
    source: &str,
    group: &Group,
    formula: &str,
    message: &str,
    repro: &str,
) -> String {
    format!(
        "`{source}` reports an error while checking policy `{formula}` against group `{}`:\n{}\nRepro:\n{}\n{}",
        group.name(),
        code_block(message),
        code_block(repro),
        test_logs_line(group)
    )
}

pub fn abnormal_exit(
    group: &Group,
    formula: &str,
    code: Option<i32>,
    stderr: &str,
    repro: &str,
) -> String {
    let mut text = format!(
        "Monpoly exited with non-zero code `{}` while checking policy `{formula}` of `{}`\n",
        exit_code_label(code),
        group.name()
    );
    if !stderr.trim().is_empty() {
        text.push_str(&format!("Stderr:\n{}\n", code_block(stderr)));
    }
    text.push_str(&format!("Repro:\n{}\n", code_block(repro)));
    text.push_str(&test_logs_line(group));
    text
}

pub fn engine_fault(error: &SessionError) -> String {
    format!(
        "Monpoly raised exception while running command `{}`:\n{}",
        error.cmd(),
        code_block(&error.message())
    )
}

pub fn precondition_failure(message: &str) -> String {
    format!("Policy monitoring skipped a group:\n{}", code_block(message))
}

pub fn liveness_ok(repro: &str) -> String {
    format!(
        "Policy monitoring pipeline status: operational (see reports in the alerts channel)\nRepro:\n{}",
        code_block(repro)
    )
}

pub fn liveness_broken(group: &Group, formula: &str, repro: &str) -> String {
    format!(
        "Monpoly did not report expected violation in policy '{formula}'. \
         This indicates that the policy monitoring pipeline is broken.\nRepro:\n{}\n{}",
        code_block(repro),
        test_logs_line(group)
    )
}

pub fn exit_code_label(code: Option<i32>) -> String {
    code.map_or_else(|| "killed".to_string(), |c| c.to_string())
}
