use mpp_core::errors::{ErrorInfo, MppError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("mark", "m3")
        .with_context("kernel", "birth")
}

#[test]
fn proposal_failure_is_not_fatal() {
    let err = MppError::Proposal(sample_info("empty-configuration", "nothing to remove"));
    assert_eq!(err.info().code, "empty-configuration");
    assert!(!err.is_fatal());
}

#[test]
fn inconsistency_is_fatal() {
    let err = MppError::Inconsistency(sample_info("energy-drift", "total diverged"));
    assert!(err.is_fatal());
    assert!(err.info().context.contains_key("mark"));
}

#[test]
fn display_renders_context_and_hint() {
    let err = MppError::EnergyCalculation(
        ErrorInfo::new("nan-energy", "individual term is NaN")
            .with_context("mark", "m7")
            .with_hint("check the stack channel"),
    );
    let text = err.to_string();
    assert!(text.starts_with("energy calculation failure: individual term is NaN"));
    assert!(text.contains("mark=m7"));
    assert!(text.contains("hint: check the stack channel"));
}

#[test]
fn with_context_keeps_family() {
    let err = MppError::Feedback(ErrorInfo::new("csv-write", "disk full")).with_context("path", "/tmp/x");
    match err {
        MppError::Feedback(info) => assert_eq!(info.context.get("path").map(String::as_str), Some("/tmp/x")),
        other => panic!("unexpected family {other:?}"),
    }
}

#[test]
fn errors_serialize_with_family_tag() {
    let err = MppError::Config(ErrorInfo::new("bad-weight", "negative kernel weight"));
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["family"], "Config");
    let restored: MppError = serde_json::from_value(json).unwrap();
    assert_eq!(restored, err);
}
