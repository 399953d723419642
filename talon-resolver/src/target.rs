//! Target URI parsing: `scheme:[//authority/]path`.

use crate::ResolverError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: Option<String>,
    pub path: String,
}

impl Target {
    pub fn parse(uri: &str) -> Result<Target, ResolverError> {
        let (scheme, rest) = uri
            .split_once(':')
            .ok_or_else(|| ResolverError::MalformedTarget(uri.to_string()))?;
        if scheme.is_empty() {
            return Err(ResolverError::MalformedTarget(uri.to_string()));
        }

        let (authority, path) = if let Some(stripped) = rest.strip_prefix("//") {
            match stripped.split_once('/') {
                Some((authority, path)) => (Some(authority.to_string()), path.to_string()),
                None => (Some(stripped.to_string()), String::new()),
            }
        } else {
            (None, rest.to_string())
        };

        Ok(Target {
            scheme: scheme.to_string(),
            authority,
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_and_path_with_no_authority() {
        let t = Target::parse("unix:/tmp/my.sock").unwrap();
        assert_eq!(t.scheme, "unix");
        assert_eq!(t.authority, None);
        assert_eq!(t.path, "/tmp/my.sock");
    }

    #[test]
    fn parses_scheme_authority_and_path() {
        let t = Target::parse("dns://8.8.8.8/example.com:443").unwrap();
        assert_eq!(t.scheme, "dns");
        assert_eq!(t.authority.as_deref(), Some("8.8.8.8"));
        assert_eq!(t.path, "example.com:443");
    }

    #[test]
    fn parses_authority_only_target() {
        let t = Target::parse("ipv4:///10.0.0.1:80").unwrap();
        assert_eq!(t.scheme, "ipv4");
        assert_eq!(t.authority.as_deref(), Some(""));
        assert_eq!(t.path, "10.0.0.1:80");
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(Target::parse("not-a-target").is_err());
    }
}
