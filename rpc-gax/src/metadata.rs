//! Transport metadata.

use http::HeaderMap;

/// Headers or trailers reported by the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    headers: HeaderMap,
}

impl Metadata {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Get a value by name.
    ///
    /// Returns `None` if the entry is missing or not valid text.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// All values for a repeated entry.
    pub fn get_all(&self, key: &str) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl From<HeaderMap> for Metadata {
    fn from(headers: HeaderMap) -> Self {
        Self::new(headers)
    }
}

impl From<Metadata> for HeaderMap {
    fn from(metadata: Metadata) -> Self {
        metadata.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    #[test]
    fn test_metadata_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        headers.append("x-multi", HeaderValue::from_static("1"));
        headers.append("x-multi", HeaderValue::from_static("2"));
        let metadata = Metadata::new(headers);

        assert_eq!(metadata.get("x-request-id"), Some("abc"));
        assert!(metadata.contains("x-multi"));
        assert!(!metadata.contains("x-absent"));
        assert_eq!(metadata.get_all("x-multi").collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(metadata.headers().len(), 3);
    }

    #[test]
    fn test_metadata_conversions() {
        let metadata = Metadata::empty();
        assert!(metadata.is_empty());
        let headers: HeaderMap = metadata.into();
        assert!(headers.is_empty());
    }
}
