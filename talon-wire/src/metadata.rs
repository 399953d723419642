//! The metadata container: a case-normalized, ordered multimap of
//! ASCII-or-binary values, with round-trip conversion to/from HTTP/2 headers.

use base64::Engine;
use http::{HeaderMap, HeaderName, HeaderValue};

const BINARY_SUFFIX: &str = "-bin";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("invalid metadata key {0:?}")]
    InvalidKey(String),
    #[error("invalid metadata value for key {0:?}")]
    InvalidValue(String),
    #[error("key {0:?} ends in \"-bin\" and requires a binary value")]
    ExpectedBinary(String),
    #[error("key {0:?} does not end in \"-bin\" and requires an ASCII value")]
    ExpectedAscii(String),
}

/// One metadata value: either a printable-ASCII string (for a normal key) or
/// an opaque byte string (for a key ending in `-bin`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Ascii(String),
    Binary(Vec<u8>),
}

impl MetadataValue {
    fn validate_for_key(&self, key: &str) -> Result<(), MetadataError> {
        let is_bin = key.ends_with(BINARY_SUFFIX);
        match (is_bin, self) {
            (true, MetadataValue::Binary(_)) => Ok(()),
            (true, MetadataValue::Ascii(_)) => Err(MetadataError::ExpectedBinary(key.to_string())),
            (false, MetadataValue::Ascii(s)) => {
                if s.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
                    Ok(())
                } else {
                    Err(MetadataError::InvalidValue(key.to_string()))
                }
            }
            (false, MetadataValue::Binary(_)) => Err(MetadataError::ExpectedAscii(key.to_string())),
        }
    }
}

fn is_valid_key_char(c: char) -> bool {
    c.is_ascii_digit() || c.is_ascii_lowercase() || matches!(c, '_' | '.' | '-')
}

fn normalize_key(key: &str) -> Result<String, MetadataError> {
    if key.is_empty() || key.starts_with(':') {
        return Err(MetadataError::InvalidKey(key.to_string()));
    }
    let lower = key.to_ascii_lowercase();
    if lower.chars().all(is_valid_key_char) {
        Ok(lower)
    } else {
        Err(MetadataError::InvalidKey(key.to_string()))
    }
}

/// An ordered multimap from normalized key to a list of values.
///
/// Insertion order is preserved per key and across keys, which keeps
/// `toWireHeaders`/`fromWireHeaders` round trips stable for tests and for
/// peers that are sensitive to header ordering.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    entries: Vec<(String, MetadataValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Metadata {
            entries: Vec::new(),
        }
    }

    /// Replaces all values for `key` with a single value.
    pub fn set(&mut self, key: &str, value: MetadataValue) -> Result<(), MetadataError> {
        let key = normalize_key(key)?;
        value.validate_for_key(&key)?;
        self.entries.retain(|(k, _)| k != &key);
        self.entries.push((key, value));
        Ok(())
    }

    /// Appends a value for `key`, keeping any existing values.
    pub fn add(&mut self, key: &str, value: MetadataValue) -> Result<(), MetadataError> {
        let key = normalize_key(key)?;
        value.validate_for_key(&key)?;
        self.entries.push((key, value));
        Ok(())
    }

    /// Drops all values for `key`. Only fails if `key` itself is malformed.
    pub fn remove(&mut self, key: &str) -> Result<(), MetadataError> {
        let key = normalize_key(key)?;
        self.entries.retain(|(k, _)| k != &key);
        Ok(())
    }

    /// Returns all values for `key`, in insertion order. Never fails; an
    /// absent or malformed key simply yields an empty list.
    pub fn get(&self, key: &str) -> Vec<&MetadataValue> {
        let key = match normalize_key(key) {
            Ok(k) => k,
            Err(_) => return Vec::new(),
        };
        self.entries
            .iter()
            .filter(|(k, _)| k == &key)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn get_one(&self, key: &str) -> Option<&MetadataValue> {
        self.get(key).into_iter().next()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        !self.get(key).is_empty()
    }

    /// Concatenates `other`'s values into `self`, per key.
    pub fn merge(&mut self, other: &Metadata) {
        for (k, v) in &other.entries {
            self.entries.push((k.clone(), v.clone()));
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        let mut seen = Vec::new();
        self.entries
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(move |k| {
                if seen.contains(k) {
                    false
                } else {
                    seen.push(*k);
                    true
                }
            })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Serializes to an `http::HeaderMap` suitable for an HTTP/2 HEADERS or
    /// trailers frame. Binary values are base64-encoded (standard alphabet,
    /// no padding) and carried under their `-bin` key unchanged.
    pub fn to_wire_headers(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
                continue;
            };
            let encoded = match value {
                MetadataValue::Ascii(s) => s.clone(),
                MetadataValue::Binary(bytes) => {
                    base64::engine::general_purpose::STANDARD_NO_PAD.encode(bytes)
                }
            };
            let Ok(header_value) = HeaderValue::from_str(&encoded) else {
                continue;
            };
            map.append(name, header_value);
        }
        map
    }

    /// Parses an `http::HeaderMap` received over the wire. Pseudo-headers
    /// (`:`-prefixed) are stripped. Per-entry decode failures are collected
    /// and returned alongside the metadata that *did* parse successfully;
    /// the call containing these headers is not aborted on their account.
    pub fn from_wire_headers(headers: &HeaderMap) -> (Metadata, Vec<MetadataError>) {
        let mut metadata = Metadata::new();
        let mut errors = Vec::new();

        for (name, value) in headers.iter() {
            let raw_key = name.as_str();
            if raw_key.starts_with(':') {
                continue;
            }
            let key = match normalize_key(raw_key) {
                Ok(k) => k,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let Ok(value_str) = value.to_str() else {
                errors.push(MetadataError::InvalidValue(key));
                continue;
            };

            if key.ends_with(BINARY_SUFFIX) {
                match decode_binary_entry(value_str) {
                    Ok(values) => {
                        for v in values {
                            metadata.entries.push((key.clone(), MetadataValue::Binary(v)));
                        }
                    }
                    Err(()) => errors.push(MetadataError::InvalidValue(key)),
                }
            } else if value_str.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
                metadata
                    .entries
                    .push((key, MetadataValue::Ascii(value_str.to_string())));
            } else {
                errors.push(MetadataError::InvalidValue(key));
            }
        }

        (metadata, errors)
    }
}

/// Decodes a binary header value, splitting on commas first (a header line
/// for a `-bin` key may arrive as several comma-joined base64 chunks if an
/// intermediary coalesced repeated header lines).
fn decode_binary_entry(raw: &str) -> Result<Vec<Vec<u8>>, ()> {
    let mut out = Vec::new();
    for piece in raw.split(',') {
        let piece = piece.trim();
        let decoded = base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(piece)
            .or_else(|_| base64::engine::general_purpose::STANDARD.decode(piece))
            .map_err(|_| ())?;
        out.push(decoded);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_and_add_appends() {
        let mut m = Metadata::new();
        m.add("x-a", MetadataValue::Ascii("1".into())).unwrap();
        m.add("x-a", MetadataValue::Ascii("2".into())).unwrap();
        assert_eq!(m.get("x-a").len(), 2);

        m.set("x-a", MetadataValue::Ascii("3".into())).unwrap();
        assert_eq!(m.get("x-a"), vec![&MetadataValue::Ascii("3".into())]);
    }

    #[test]
    fn keys_are_lowercased() {
        let mut m = Metadata::new();
        m.add("X-Trace-Id", MetadataValue::Ascii("abc".into()))
            .unwrap();
        assert_eq!(
            m.get("x-trace-id"),
            vec![&MetadataValue::Ascii("abc".into())]
        );
    }

    #[test]
    fn rejects_illegal_key_chars() {
        let mut m = Metadata::new();
        assert!(m.add("bad key", MetadataValue::Ascii("x".into())).is_err());
        assert!(m.add("Bad/Key", MetadataValue::Ascii("x".into())).is_err());
    }

    #[test]
    fn rejects_pseudo_header_keys() {
        let mut m = Metadata::new();
        assert!(m.add(":authority", MetadataValue::Ascii("x".into())).is_err());
    }

    #[test]
    fn binary_key_requires_binary_value() {
        let mut m = Metadata::new();
        let err = m.add("x-data-bin", MetadataValue::Ascii("x".into())).unwrap_err();
        assert_eq!(err, MetadataError::ExpectedBinary("x-data-bin".into()));
    }

    #[test]
    fn ascii_key_requires_printable_ascii() {
        let mut m = Metadata::new();
        let err = m
            .add("x-data", MetadataValue::Ascii("bad\u{0}byte".into()))
            .unwrap_err();
        assert_eq!(err, MetadataError::InvalidValue("x-data".into()));
    }

    #[test]
    fn get_on_absent_key_is_empty_not_error() {
        let m = Metadata::new();
        assert!(m.get("x-nope").is_empty());
    }

    #[test]
    fn wire_round_trip_ascii_and_binary() {
        let mut m = Metadata::new();
        m.add("x-custom", MetadataValue::Ascii("hello".into()))
            .unwrap();
        m.add("x-custom", MetadataValue::Ascii("world".into()))
            .unwrap();
        m.add("x-data-bin", MetadataValue::Binary(vec![0, 1, 2, 255]))
            .unwrap();

        let headers = m.to_wire_headers();
        let (decoded, errors) = Metadata::from_wire_headers(&headers);
        assert!(errors.is_empty());

        assert_eq!(decoded.get("x-custom").len(), 2);
        assert_eq!(
            decoded.get("x-data-bin"),
            vec![&MetadataValue::Binary(vec![0, 1, 2, 255])]
        );
    }

    #[test]
    fn wire_decode_splits_comma_joined_binary_values() {
        let a = base64::engine::general_purpose::STANDARD_NO_PAD.encode([1, 2, 3]);
        let b = base64::engine::general_purpose::STANDARD_NO_PAD.encode([4, 5, 6]);
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-ids-bin"),
            HeaderValue::from_str(&format!("{a},{b}")).unwrap(),
        );

        let (decoded, errors) = Metadata::from_wire_headers(&headers);
        assert!(errors.is_empty());
        let values = decoded.get("x-ids-bin");
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], &MetadataValue::Binary(vec![1, 2, 3]));
        assert_eq!(values[1], &MetadataValue::Binary(vec![4, 5, 6]));
    }

    #[test]
    fn wire_decode_strips_pseudo_headers() {
        // http::HeaderMap cannot hold ":"-prefixed names, so pseudo-headers
        // are represented out of band in real usage; this documents that
        // from_wire_headers never attempts to interpret reserved names it
        // is handed through that side channel.
        let headers = HeaderMap::new();
        let (decoded, errors) = Metadata::from_wire_headers(&headers);
        assert!(decoded.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn wire_decode_skips_bad_entry_but_keeps_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-data-bin"),
            HeaderValue::from_static("not valid base64!!!"),
        );
        headers.insert(
            HeaderName::from_static("x-good"),
            HeaderValue::from_static("fine"),
        );

        let (decoded, errors) = Metadata::from_wire_headers(&headers);
        assert_eq!(errors.len(), 1);
        assert!(decoded.get("x-data-bin").is_empty());
        assert_eq!(decoded.get("x-good"), vec![&MetadataValue::Ascii("fine".into())]);
    }

    #[test]
    fn merge_concatenates_per_key() {
        let mut a = Metadata::new();
        a.add("x-a", MetadataValue::Ascii("1".into())).unwrap();
        let mut b = Metadata::new();
        b.add("x-a", MetadataValue::Ascii("2".into())).unwrap();

        a.merge(&b);
        assert_eq!(a.get("x-a").len(), 2);
    }
}
