//! Endpoint URLs of the archive API.

use url::Url;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://archive.org";

/// Builds request URLs against one archive deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEndpoints {
    base: Url,
}

impl Default for ArchiveEndpoints {
    fn default() -> Self {
        Self {
            base: default_base(),
        }
    }
}

fn default_base() -> Url {
    // Constant input; parsing cannot fail.
    Url::parse(DEFAULT_BASE_URL).unwrap_or_else(|_| unreachable!("default base URL is valid"))
}

impl ArchiveEndpoints {
    /// Creates endpoints rooted at `base` (e.g. a wiremock server URI).
    ///
    /// # Errors
    ///
    /// Returns [`url::ParseError`] if `base` is not an absolute URL.
    pub fn new(base: &str) -> Result<Self, url::ParseError> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    /// Root URL.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `GET {base}/metadata/{identifier}`
    #[must_use]
    pub fn metadata(&self, identifier: &str) -> String {
        self.with_segments(&["metadata", identifier])
    }

    /// `GET {base}/advancedsearch.php?q=..&fl[]=..&rows=..&output=json`
    #[must_use]
    pub fn search(&self, query: &str, fields: &[&str], rows: u32) -> String {
        let mut url = self.base.clone();
        url.set_path(&format!("{}advancedsearch.php", self.base.path()));
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query);
            for field in fields {
                pairs.append_pair("fl[]", field);
            }
            pairs.append_pair("rows", &rows.to_string());
            pairs.append_pair("output", "json");
        }
        url.to_string()
    }

    /// `GET {base}/services/img/{identifier}`
    #[must_use]
    pub fn thumbnail(&self, identifier: &str) -> String {
        self.with_segments(&["services", "img", identifier])
    }

    /// `GET {base}/download/{identifier}/{file}`
    #[must_use]
    pub fn download(&self, identifier: &str, file: &str) -> String {
        let mut segments = vec!["download", identifier];
        segments.extend(file.split('/').filter(|s| !s.is_empty()));
        self.with_segments(&segments)
    }

    fn with_segments(&self, segments: &[&str]) -> String {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints() {
        let endpoints = ArchiveEndpoints::default();
        assert_eq!(
            endpoints.metadata("mario"),
            "https://archive.org/metadata/mario"
        );
        assert_eq!(
            endpoints.thumbnail("mario"),
            "https://archive.org/services/img/mario"
        );
    }

    #[test]
    fn test_base_with_path_prefix_is_kept() {
        let endpoints = ArchiveEndpoints::new("http://127.0.0.1:8080/mirror").unwrap();
        assert_eq!(
            endpoints.metadata("Super-Mario"),
            "http://127.0.0.1:8080/mirror/metadata/Super-Mario"
        );
    }

    #[test]
    fn test_download_url_keeps_nested_file_path() {
        let endpoints = ArchiveEndpoints::default();
        assert_eq!(
            endpoints.download("mario", "disc 1/rom.zip"),
            "https://archive.org/download/mario/disc%201/rom.zip"
        );
    }

    #[test]
    fn test_search_url_encodes_query_and_fields() {
        let endpoints = ArchiveEndpoints::new("http://localhost:9000").unwrap();
        let url = endpoints.search("super mario", &["identifier", "title"], 50);
        assert_eq!(
            url,
            "http://localhost:9000/advancedsearch.php?q=super+mario&fl%5B%5D=identifier&fl%5B%5D=title&rows=50&output=json"
        );
    }

    #[test]
    fn test_invalid_base_is_rejected() {
        assert!(ArchiveEndpoints::new("not a url").is_err());
    }
}
