//! The address type LB policies and resolvers exchange. Kept intentionally
//! thin: a dialable host/port plus a small attribute bag for policy-specific
//! annotations (e.g. weight, locality) that a child-wrapping policy reads
//! without the core type needing to know about every extension.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
    pub attributes: BTreeMap<String, String>,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Address {
            host: host.into(),
            port,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_formats_host_and_port() {
        let addr = Address::new("10.0.0.1", 443);
        assert_eq!(addr.authority(), "10.0.0.1:443");
    }

    #[test]
    fn attributes_are_queryable_after_construction() {
        let addr = Address::new("10.0.0.1", 443).with_attribute("weight", "3");
        assert_eq!(addr.attributes.get("weight").map(String::as_str), Some("3"));
    }
}
