//! Service config data model: `{loadBalancingPolicy?, loadBalancingConfig[],
//! methodConfig[]}`, deserialized from the JSON document a resolver produces.

use std::collections::HashSet;

use serde::Deserialize;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ServiceConfigError {
    #[error("method config name entries are not unique: duplicate (service={service:?}, method={method:?})")]
    DuplicateMethodName {
        service: String,
        method: Option<String>,
    },
    #[error("invalid timeout string {0:?}, expected ^\\d+(\\.\\d{{1,9}})?s$")]
    InvalidTimeout(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(rename = "loadBalancingPolicy", default)]
    pub load_balancing_policy: Option<String>,

    #[serde(rename = "loadBalancingConfig", default)]
    pub load_balancing_config: Vec<serde_json::Value>,

    #[serde(rename = "methodConfig", default)]
    pub method_config: Vec<MethodConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MethodName {
    pub service: String,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MethodConfig {
    #[serde(default)]
    pub name: Vec<MethodName>,

    #[serde(rename = "waitForReady", default)]
    pub wait_for_ready: Option<bool>,

    /// Matches `^\d+(\.\d{1,9})?s$`; validated, but kept as the raw string
    /// plus a parsed `Duration` so callers can surface the exact wire text.
    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(rename = "maxRequestBytes", default)]
    pub max_request_bytes: Option<u32>,

    #[serde(rename = "maxResponseBytes", default)]
    pub max_response_bytes: Option<u32>,
}

impl MethodConfig {
    /// Parses `timeout` into a `Duration`, validating the
    /// `^\d+(\.\d{1,9})?s$` grammar.
    pub fn parsed_timeout(&self) -> Result<Option<std::time::Duration>, ServiceConfigError> {
        let Some(raw) = &self.timeout else {
            return Ok(None);
        };
        parse_timeout_string(raw)
            .map(Some)
            .ok_or_else(|| ServiceConfigError::InvalidTimeout(raw.clone()))
    }
}

fn parse_timeout_string(raw: &str) -> Option<std::time::Duration> {
    let s = raw.strip_suffix('s')?;
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let seconds: u64 = int_part.parse().ok()?;

    let nanos = match frac_part {
        None => 0,
        Some(f) => {
            if f.is_empty() || f.len() > 9 || !f.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let mut padded = f.to_string();
            while padded.len() < 9 {
                padded.push('0');
            }
            padded.parse::<u32>().ok()?
        }
    };

    Some(std::time::Duration::new(seconds, nanos))
}

impl ServiceConfig {
    /// Validates the whole-config uniqueness invariant: no two `name` entries
    /// across the entire `methodConfig` list may share the same
    /// `(service, method)` pair.
    pub fn validate(&self) -> Result<(), ServiceConfigError> {
        let mut seen: HashSet<(String, Option<String>)> = HashSet::new();
        for method_config in &self.method_config {
            for name in &method_config.name {
                let key = (name.service.clone(), name.method.clone());
                if !seen.insert(key) {
                    return Err(ServiceConfigError::DuplicateMethodName {
                        service: name.service.clone(),
                        method: name.method.clone(),
                    });
                }
            }
        }
        for method_config in &self.method_config {
            method_config.parsed_timeout()?;
        }
        Ok(())
    }

    /// Finds the most specific matching `MethodConfig` for a given
    /// `(service, method)`, preferring an exact method match over a
    /// service-wide wildcard entry.
    pub fn method_config_for(&self, service: &str, method: &str) -> Option<&MethodConfig> {
        let exact = self.method_config.iter().find(|mc| {
            mc.name
                .iter()
                .any(|n| n.service == service && n.method.as_deref() == Some(method))
        });
        exact.or_else(|| {
            self.method_config.iter().find(|mc| {
                mc.name
                    .iter()
                    .any(|n| n.service == service && n.method.is_none())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mc(service: &str, method: Option<&str>) -> MethodConfig {
        MethodConfig {
            name: vec![MethodName {
                service: service.to_string(),
                method: method.map(str::to_string),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn validate_rejects_duplicate_name_pairs() {
        let config = ServiceConfig {
            method_config: vec![mc("echo.Echoer", Some("Say")), mc("echo.Echoer", Some("Say"))],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ServiceConfigError::DuplicateMethodName { .. })
        ));
    }

    #[test]
    fn validate_allows_distinct_methods() {
        let config = ServiceConfig {
            method_config: vec![mc("echo.Echoer", Some("Say")), mc("echo.Echoer", Some("Shout"))],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn timeout_parses_fraction_and_whole_seconds() {
        assert_eq!(
            parse_timeout_string("1.5s"),
            Some(std::time::Duration::new(1, 500_000_000))
        );
        assert_eq!(
            parse_timeout_string("30s"),
            Some(std::time::Duration::new(30, 0))
        );
        assert_eq!(parse_timeout_string("0.000000001s"), Some(std::time::Duration::new(0, 1)));
        assert_eq!(parse_timeout_string("bad"), None);
        assert_eq!(parse_timeout_string("1.5"), None);
        assert_eq!(parse_timeout_string("1.0000000001s"), None); // >9 fractional digits
    }

    #[test]
    fn deserializes_from_json() {
        let json = r#"{
            "loadBalancingPolicy": "round_robin",
            "methodConfig": [
                {"name": [{"service": "echo.Echoer", "method": "Say"}], "timeout": "1.5s", "waitForReady": true}
            ]
        }"#;
        let config: ServiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.load_balancing_policy.as_deref(), Some("round_robin"));
        assert_eq!(config.method_config.len(), 1);
        assert_eq!(config.method_config[0].wait_for_ready, Some(true));
    }

    #[test]
    fn method_config_for_prefers_exact_match() {
        let config = ServiceConfig {
            method_config: vec![mc("echo.Echoer", None), mc("echo.Echoer", Some("Say"))],
            ..Default::default()
        };
        let found = config.method_config_for("echo.Echoer", "Say").unwrap();
        assert_eq!(found.name[0].method.as_deref(), Some("Say"));
    }
}
