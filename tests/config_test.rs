//! Configuration integration tests.
//!
//! Loads TOML files from disk, validates them and builds a working
//! [`WafHandler`] from the result.

use r0n_waf::config::{BasicValidator, ConfigError, ConfigLoader, RuleCompileValidator};
use r0n_waf::modules::waf::{RuleEngineMode, WafHandler};
use std::fs;
use tempfile::tempdir;

const WAF_TOML: &str = r#"
[engine]
name = "edge-waf"
mode = "on"

[collections]
names = ["IP", "GLOBAL"]

[waf]
remove_rule_ids = [9000]

[waf.match_log]
max_entries = 100
forward_to_tracing = false

[[waf.rules]]
id = 1000
phase = 1
operator = "@unconditionalMatch"
actions = ["initcol:ip=%{REMOTE_ADDR}", "setvar:ip.requests=+1"]

[[waf.rules]]
id = 1001
phase = 2
variables = ["ARGS", "!ARGS:token"]
operator = "@rx (?i)union\\s+select"
actions = ["t:urlDecode", "t:lowercase", "deny", "msg:'SQL injection in %{MATCHED_VAR_NAME}'", "tag:attack-sqli"]

[[waf.rules]]
id = 1002
phase = 2
variables = ["REQUEST_URI"]
operator = "@beginsWith /admin"
actions = ["deny", "status:401"]

[waf.rules.chain]
variables = ["REMOTE_ADDR"]
operator = "!@ipMatch 10.0.0.0/8"

[[waf.rules]]
id = 9000
phase = 2
operator = "@unconditionalMatch"
actions = ["deny"]

[[waf.exceptions]]
tag = "attack-sqli"
targets = ["!ARGS:search"]
"#;

fn load(content: &str) -> Result<r0n_waf::config::EngineConfig, ConfigError> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("waf.toml");
    fs::write(&path, content).unwrap();

    ConfigLoader::new()
        .with_validator(BasicValidator::new())
        .with_validator(RuleCompileValidator::new())
        .load(&path)
}

#[test]
fn test_load_and_run_config_file() {
    let config = load(WAF_TOML).unwrap();
    assert_eq!(config.engine.name, "edge-waf");
    assert_eq!(config.engine.mode, RuleEngineMode::On);

    let (handler, errors) = WafHandler::from_config(&config);
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(handler.name(), "edge-waf");
    assert_eq!(handler.rules().len(), 3);
    assert!(handler.rules().get(9000).is_none());
    assert!(handler.collections().contains("ip"));

    // the removed catch-all rule does not block clean traffic
    let mut clean = handler
        .new_transaction("clean")
        .with_uri("/products?page=2")
        .with_query_string("page=2")
        .with_client_addr("192.0.2.10".parse().unwrap());
    assert!(handler.process_request(&mut clean).is_none());

    let mut sqli = handler
        .new_transaction("sqli")
        .with_uri("/products?id=1%20UNION%20SELECT")
        .with_query_string("id=1%20UNION%20SELECT")
        .with_client_addr("192.0.2.10".parse().unwrap());
    let intervention = handler.process_request(&mut sqli).unwrap();
    assert_eq!(intervention.rule_id, 1001);
    assert_eq!(
        intervention.message.as_deref(),
        Some("SQL injection in ARGS:id")
    );

    // both exclusions hold: the rule's own and the tag exception
    let mut excluded = handler
        .new_transaction("excluded")
        .with_query_string("token=union+select&search=union+select")
        .with_client_addr("192.0.2.10".parse().unwrap());
    assert!(handler.process_request(&mut excluded).is_none());

    let mut admin = handler
        .new_transaction("admin")
        .with_uri("/admin/users")
        .with_client_addr("192.0.2.10".parse().unwrap());
    assert_eq!(handler.process_request(&mut admin).map(|i| i.status), Some(401));

    let mut internal = handler
        .new_transaction("internal")
        .with_uri("/admin/users")
        .with_client_addr("10.1.1.1".parse().unwrap());
    assert!(handler.process_request(&mut internal).is_none());
}

#[test]
fn test_invalid_rule_rejected_by_loader() {
    let content = r#"
[[waf.rules]]
id = 1
variables = ["ARGS"]
operator = "@rx ("
"#;
    let err = load(content).unwrap_err();
    let ConfigError::Invalid(errors) = err else {
        panic!("expected validation failure, got {err}");
    };
    assert!(errors[0].starts_with("waf.rules.1"));
}

#[test]
fn test_lenient_loader_keeps_good_rules() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("waf.toml");
    fs::write(
        &path,
        r#"
[[waf.rules]]
id = 1
variables = ["ARGS"]
operator = "@noSuchOperator x"

[[waf.rules]]
id = 2
variables = ["ARGS"]
operator = "@contains x"
actions = ["deny"]
"#,
    )
    .unwrap();

    let config = ConfigLoader::new()
        .with_validator(RuleCompileValidator::lenient())
        .load(&path)
        .unwrap();
    let (handler, errors) = WafHandler::from_config(&config);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].rule_id(), Some(1));
    assert_eq!(handler.rules().len(), 1);
}

#[test]
fn test_detection_only_mode_from_file() {
    let content = WAF_TOML.replace(r#"mode = "on""#, r#"mode = "detection_only""#);
    let config = load(&content).unwrap();
    let (handler, _) = WafHandler::from_config(&config);
    assert_eq!(handler.mode(), RuleEngineMode::DetectionOnly);

    let mut tx = handler
        .new_transaction("detect")
        .with_uri("/admin")
        .with_client_addr("192.0.2.10".parse().unwrap());
    assert!(handler.process_request(&mut tx).is_none());
    assert_eq!(handler.match_log().final_entries().len(), 2);
}
