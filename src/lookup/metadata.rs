//! Typed views over archive JSON documents.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

/// Metadata for one archive item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemMetadata {
    /// Canonical identifier reported by the archive.
    pub identifier: String,
    /// Item title.
    pub title: Option<String>,
    /// Media type (`texts`, `movies`, `software`, ...).
    pub mediatype: Option<String>,
    /// First listed creator.
    pub creator: Option<String>,
    /// Publication date as given.
    pub date: Option<String>,
    /// Description, often HTML.
    pub description: Option<String>,
    /// Files attached to the item.
    pub files: Vec<ItemFile>,
    /// The full document.
    #[serde(skip)]
    pub raw: Value,
}

/// One file listed in an item's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFile {
    /// Path relative to the item.
    pub name: String,
    /// Format label (`JPEG`, `Text PDF`, ...).
    pub format: Option<String>,
    /// Size in bytes when reported.
    pub size: Option<u64>,
}

impl ItemMetadata {
    /// Builds metadata from a metadata-endpoint document.
    ///
    /// Returns `None` when the document has no `metadata` object; the archive
    /// answers `{}` for identifiers that do not exist.
    #[must_use]
    pub fn from_document(requested: &str, doc: Value) -> Option<Self> {
        let metadata = doc.get("metadata")?.as_object()?;
        if metadata.is_empty() {
            return None;
        }

        let field = |name: &str| metadata.get(name).and_then(first_text);
        let identifier = field("identifier").unwrap_or_else(|| requested.to_string());
        let files = doc
            .get("files")
            .and_then(Value::as_array)
            .map(|files| files.iter().filter_map(ItemFile::from_value).collect())
            .unwrap_or_default();

        let title = field("title");
        let mediatype = field("mediatype");
        let creator = field("creator");
        let date = field("date");
        let description = field("description");

        Some(Self {
            identifier,
            title,
            mediatype,
            creator,
            date,
            description,
            files,
            raw: doc,
        })
    }

    /// Returns the first file with the given format.
    #[must_use]
    pub fn file_by_format(&self, format: &str) -> Option<&ItemFile> {
        self.files
            .iter()
            .find(|file| file.format.as_deref() == Some(format))
    }
}

impl ItemFile {
    fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?.to_string();
        Some(Self {
            name,
            format: value.get("format").and_then(first_text),
            size: value.get("size").and_then(number_like),
        })
    }
}

/// One row of a search response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Item identifier.
    pub identifier: String,
    /// Item title.
    pub title: Option<String>,
    /// Media type.
    pub mediatype: Option<String>,
    /// Every requested field as returned.
    #[serde(skip)]
    pub fields: serde_json::Map<String, Value>,
}

/// Parses an `advancedsearch.php` JSON document.
///
/// Rows without an identifier are skipped.
///
/// # Errors
///
/// Returns a description of the problem when `response.docs` is missing.
pub fn parse_search_results(doc: &Value) -> Result<Vec<SearchHit>, String> {
    let docs = doc
        .get("response")
        .and_then(|response| response.get("docs"))
        .and_then(Value::as_array)
        .ok_or_else(|| "search response has no response.docs array".to_string())?;

    Ok(docs
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|row| {
            let identifier = row.get("identifier").and_then(first_text)?;
            Some(SearchHit {
                identifier,
                title: row.get("title").and_then(first_text),
                mediatype: row.get("mediatype").and_then(first_text),
                fields: row.clone(),
            })
        })
        .collect())
}

/// Result of a thumbnail prefetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Thumbnail {
    /// Image bytes as served.
    Image {
        /// Item the image belongs to.
        identifier: String,
        /// Encoded image.
        bytes: Bytes,
    },
    /// Nothing could be fetched; render a stand-in.
    Placeholder {
        /// Item the placeholder stands for.
        identifier: String,
    },
}

impl Thumbnail {
    /// Item this thumbnail belongs to.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::Image { identifier, .. } | Self::Placeholder { identifier } => identifier,
        }
    }

    /// Returns `true` for [`Thumbnail::Placeholder`].
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder { .. })
    }
}

/// Metadata values are strings or arrays of strings; take the first.
fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_text),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_like(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_document_reads_common_fields() {
        let doc = json!({
            "metadata": {
                "identifier": "Super-Mario",
                "title": "Super Mario Bros.",
                "mediatype": "software",
                "creator": ["Nintendo", "Miyamoto"],
                "date": "1985"
            },
            "files": [
                {"name": "rom.zip", "format": "ZIP", "size": "40976"},
                {"name": "__ia_thumb.jpg", "format": "Item Tile"},
                {"format": "orphan"}
            ]
        });

        let meta = ItemMetadata::from_document("super-mario", doc).unwrap();
        assert_eq!(meta.identifier, "Super-Mario");
        assert_eq!(meta.title.as_deref(), Some("Super Mario Bros."));
        assert_eq!(meta.creator.as_deref(), Some("Nintendo"));
        assert_eq!(meta.files.len(), 2);
        assert_eq!(meta.file_by_format("ZIP").unwrap().size, Some(40_976));
    }

    #[test]
    fn test_empty_document_is_absent() {
        assert!(ItemMetadata::from_document("x", json!({})).is_none());
        assert!(ItemMetadata::from_document("x", json!({"metadata": {}})).is_none());
        assert!(ItemMetadata::from_document("x", json!({"metadata": "nope"})).is_none());
    }

    #[test]
    fn test_identifier_falls_back_to_requested() {
        let meta = ItemMetadata::from_document("mario", json!({"metadata": {"title": "M"}})).unwrap();
        assert_eq!(meta.identifier, "mario");
    }

    #[test]
    fn test_parse_search_results_skips_rows_without_identifier() {
        let doc = json!({
            "responseHeader": {"status": 0},
            "response": {
                "numFound": 3,
                "docs": [
                    {"identifier": "a", "title": "A", "mediatype": "texts"},
                    {"title": "no id"},
                    {"identifier": "b"}
                ]
            }
        });
        let hits = parse_search_results(&doc).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].mediatype.as_deref(), Some("texts"));
        assert_eq!(hits[1].identifier, "b");
        assert!(hits[1].title.is_none());
    }

    #[test]
    fn test_parse_search_results_rejects_wrong_shape() {
        assert!(parse_search_results(&json!({"error": "bad query"})).is_err());
    }

    #[test]
    fn test_thumbnail_accessors() {
        let image = Thumbnail::Image {
            identifier: "a".into(),
            bytes: Bytes::from_static(b"png"),
        };
        let placeholder = Thumbnail::Placeholder {
            identifier: "b".into(),
        };
        assert_eq!(image.identifier(), "a");
        assert!(!image.is_placeholder());
        assert!(placeholder.is_placeholder());
    }
}
