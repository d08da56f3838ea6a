//! Ordered handshake header map.

use serde::{Deserialize, Serialize};

/// Header names this crate interprets.
pub mod header_names {
    pub const USER_AGENT: &str = "User-Agent";
    pub const REMOTE_IP: &str = "Remote-IP";
    pub const LISTEN_IP: &str = "Listen-IP";
    pub const X_ULTRAPEER: &str = "X-Ultrapeer";
    pub const X_ULTRAPEER_NEEDED: &str = "X-Ultrapeer-Needed";
    pub const X_QUERY_ROUTING: &str = "X-Query-Routing";
    pub const X_TRY_ULTRAPEERS: &str = "X-Try-Ultrapeers";
    pub const X_MAX_TTL: &str = "X-Max-TTL";
    pub const X_DEGREE: &str = "X-Degree";
    pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
    pub const CONTENT_ENCODING: &str = "Content-Encoding";
    pub const GGEP: &str = "GGEP";

    /// Only supported content encoding.
    pub const DEFLATE: &str = "deflate";
}

/// Handshake headers in the order they were inserted.
///
/// Keys are case-sensitive. Inserting an existing key replaces its value
/// without moving it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandshakeHeaders {
    entries: Vec<(String, String)>,
}

impl HandshakeHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns the previous value.
    pub fn insert(&mut self, key: &str, value: &str) -> Option<String> {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            return Some(std::mem::replace(&mut entry.1, value.to_string()));
        }
        self.entries.push((key.to_string(), value.to_string()));
        None
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Insert every entry of `other`, replacing existing keys.
    pub fn merge(&mut self, other: &HandshakeHeaders) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a comma-separated header lists `token` (case-insensitive).
    pub fn lists_token(&self, key: &str, token: &str) -> bool {
        self.get(key)
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    }

    /// Serialize as `Key: Value\r\n` lines, without the terminating blank line.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for (k, v) in self.iter() {
            out.extend_from_slice(k.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(v.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for HandshakeHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = HandshakeHeaders::new();
        for (k, v) in iter {
            headers.insert(k.as_ref(), v.as_ref());
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_order_and_replaces_in_place() {
        let mut headers = HandshakeHeaders::new();
        headers.insert("A", "1");
        headers.insert("B", "2");
        assert_eq!(headers.insert("A", "3"), Some("1".to_string()));

        let entries: Vec<_> = headers.iter().collect();
        assert_eq!(entries, vec![("A", "3"), ("B", "2")]);
    }

    #[test]
    fn test_keys_are_case_sensitive() {
        let headers: HandshakeHeaders = [("User-Agent", "x")].into_iter().collect();
        assert_eq!(headers.get("User-Agent"), Some("x"));
        assert_eq!(headers.get("user-agent"), None);
    }

    #[test]
    fn test_lists_token() {
        let headers: HandshakeHeaders = [("Accept-Encoding", "gzip, Deflate")].into_iter().collect();
        assert!(headers.lists_token(header_names::ACCEPT_ENCODING, "deflate"));
        assert!(!headers.lists_token(header_names::ACCEPT_ENCODING, "br"));
        assert!(!headers.lists_token(header_names::CONTENT_ENCODING, "deflate"));
    }

    #[test]
    fn test_write_to() {
        let headers: HandshakeHeaders = [("A", "1"), ("B", "two")].into_iter().collect();
        let mut out = Vec::new();
        headers.write_to(&mut out);
        assert_eq!(out, b"A: 1\r\nB: two\r\n");
    }

    #[test]
    fn test_merge_and_remove() {
        let mut a: HandshakeHeaders = [("A", "1"), ("B", "2")].into_iter().collect();
        let b: HandshakeHeaders = [("B", "3"), ("C", "4")].into_iter().collect();
        a.merge(&b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.get("B"), Some("3"));
        assert_eq!(a.remove("A"), Some("1".to_string()));
        assert!(!a.contains("A"));
    }
}
