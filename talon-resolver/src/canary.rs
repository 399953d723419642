//! The service-config TXT-record-like parser and canary selection
//! algorithm: scan for a `grpc_config=` record, parse the JSON array of
//! canary choices it introduces, and pick the first choice whose
//! `percentage`/`clientHostname`/`clientLanguage` gates all pass.

use rand::Rng;
use serde::Deserialize;
use serde_json::Value;

use crate::ResolverError;

const PREFIX: &str = "grpc_config=";

/// One canary choice entry. `serde(deny_unknown_fields)` enforces the
/// "unknown top-level fields are rejected" rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CanaryChoice {
    #[serde(default)]
    percentage: Option<f64>,
    #[serde(rename = "clientHostname", default)]
    client_hostname: Option<Vec<String>>,
    #[serde(rename = "clientLanguage", default)]
    client_language: Option<Vec<String>>,
    #[serde(rename = "serviceConfig")]
    service_config: Value,
}

/// Describes the caller's identity for the hostname/language gates, and the
/// entropy source for the percentage gate. Production callers use
/// `ClientContext::current()`; tests inject a fixed context.
pub struct ClientContext<'a> {
    pub hostname: &'a str,
    pub language_tag: &'a str,
}

impl ClientContext<'_> {
    /// The language tag this implementation advertises to canary configs.
    pub const LANGUAGE_TAG: &'static str = "rust";
}

/// Finds the first line beginning with `grpc_config=` in a TXT-record-like
/// list, concatenates it with every subsequent line (TXT records split long
/// values across multiple strings), and returns the joined JSON text.
fn find_grpc_config_record(txt_records: &[String]) -> Option<String> {
    let start = txt_records.iter().position(|r| r.starts_with(PREFIX))?;
    let mut joined = txt_records[start][PREFIX.len()..].to_string();
    for line in &txt_records[start + 1..] {
        joined.push_str(line);
    }
    Some(joined)
}

/// Runs the full TXT-record scan + canary selection algorithm, returning the
/// selected `serviceConfig` JSON value.
pub fn select_service_config(
    txt_records: &[String],
    context: &ClientContext,
) -> Result<Value, ResolverError> {
    let joined = find_grpc_config_record(txt_records)
        .ok_or(ResolverError::NoServiceConfigRecord)?;
    select_from_json(&joined, context)
}

/// Runs canary selection directly against an already-joined JSON document
/// (the array of canary choices), skipping the TXT-record scan step. Useful
/// when a resolver already has the JSON text (e.g. from a static config).
pub fn select_from_json(json: &str, context: &ClientContext) -> Result<Value, ResolverError> {
    let choices: Vec<CanaryChoice> = serde_json::from_str(json)
        .map_err(|e| ResolverError::InvalidServiceConfigJson(e.to_string()))?;

    let mut rng = rand::thread_rng();
    for choice in choices {
        if let Some(pct) = choice.percentage {
            let roll: f64 = rng.gen_range(0.0..100.0);
            if roll >= pct {
                continue;
            }
        }
        if let Some(hostnames) = &choice.client_hostname {
            if !hostnames.iter().any(|h| h == context.hostname) {
                continue;
            }
        }
        if let Some(languages) = &choice.client_language {
            if !languages.iter().any(|l| l == context.language_tag) {
                continue;
            }
        }
        return Ok(choice.service_config);
    }

    Err(ResolverError::NoCanaryChoiceSelected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(hostname: &'a str, language: &'a str) -> ClientContext<'a> {
        ClientContext {
            hostname,
            language_tag: language,
        }
    }

    #[test]
    fn first_non_skipped_choice_wins() {
        let json = r#"[
            {"clientLanguage": ["other"], "serviceConfig": {"a": 1}},
            {"serviceConfig": {"b": 2}}
        ]"#;
        let selected = select_from_json(json, &ctx("host", "rust")).unwrap();
        assert_eq!(selected, serde_json::json!({"b": 2}));
    }

    #[test]
    fn hostname_gate_skips_non_matching_entries() {
        let json = r#"[
            {"clientHostname": ["other-host"], "serviceConfig": {"a": 1}},
            {"serviceConfig": {"b": 2}}
        ]"#;
        let selected = select_from_json(json, &ctx("this-host", "rust")).unwrap();
        assert_eq!(selected, serde_json::json!({"b": 2}));
    }

    #[test]
    fn no_matching_choice_fails() {
        let json = r#"[{"clientLanguage": ["other"], "serviceConfig": {}}]"#;
        let err = select_from_json(json, &ctx("host", "rust")).unwrap_err();
        assert!(matches!(err, ResolverError::NoCanaryChoiceSelected));
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let json = r#"[{"serviceConfig": {}, "unknownField": true}]"#;
        let err = select_from_json(json, &ctx("host", "rust")).unwrap_err();
        assert!(matches!(err, ResolverError::InvalidServiceConfigJson(_)));
    }

    #[test]
    fn txt_record_scan_finds_prefixed_entry_and_joins_continuation_lines() {
        let records = vec![
            "unrelated".to_string(),
            format!("{}[{{\"serviceConfig\"", PREFIX),
            ": {}}]".to_string(),
        ];
        let joined = find_grpc_config_record(&records).unwrap();
        assert_eq!(joined, "[{\"serviceConfig\": {}}]");
    }

    #[test]
    fn missing_record_is_reported() {
        let records = vec!["unrelated".to_string()];
        let err = select_service_config(&records, &ctx("host", "rust")).unwrap_err();
        assert!(matches!(err, ResolverError::NoServiceConfigRecord));
    }

    #[test]
    fn zero_percentage_never_selected_given_enough_samples() {
        let json = r#"[{"percentage": 0.0, "serviceConfig": {"a": 1}}, {"serviceConfig": {"b": 2}}]"#;
        for _ in 0..50 {
            let selected = select_from_json(json, &ctx("host", "rust")).unwrap();
            assert_eq!(selected, serde_json::json!({"b": 2}));
        }
    }
}
