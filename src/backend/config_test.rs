use std::collections::HashMap;

use super::*;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_when_nothing_set() {
    let lookup = lookup_from(&[]);
    let cfg = InvokerConfig::from_lookup(&lookup);
    assert_eq!(cfg, InvokerConfig::default());
    assert_eq!(cfg.command, "claude");
    assert_eq!(cfg.args, vec!["-p", "--output-format", "text"]);
    assert_eq!(cfg.probe_args, vec!["--version"]);
    assert_eq!(cfg.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
}

#[test]
fn overrides_are_parsed() {
    let lookup = lookup_from(&[
        ("ANALYSIS_COMMAND", "/usr/local/bin/analyst"),
        ("ANALYSIS_ARGS", "  --json   --quiet "),
        ("ANALYSIS_PROBE_ARGS", "health"),
        ("ANALYSIS_TIMEOUT_SECS", "42"),
        ("ANALYSIS_PROBE_TIMEOUT_SECS", "3"),
    ]);
    let cfg = InvokerConfig::from_lookup(&lookup);
    assert_eq!(cfg.command, "/usr/local/bin/analyst");
    assert_eq!(cfg.args, vec!["--json", "--quiet"]);
    assert_eq!(cfg.probe_args, vec!["health"]);
    assert_eq!(cfg.timeout, Duration::from_secs(42));
    assert_eq!(cfg.probe_timeout, Duration::from_secs(3));
    assert_eq!(cfg.display_command(), "/usr/local/bin/analyst --json --quiet");
}

#[test]
fn blank_command_and_bad_numbers_fall_back() {
    let lookup = lookup_from(&[("ANALYSIS_COMMAND", "   "), ("ANALYSIS_TIMEOUT_SECS", "soon")]);
    let cfg = InvokerConfig::from_lookup(&lookup);
    assert_eq!(cfg.command, DEFAULT_COMMAND);
    assert_eq!(cfg.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
}
