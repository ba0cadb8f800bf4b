//! Data model shared by the indexing and query paths.
//!
//! | Type | Lifetime |
//! |------|----------|
//! | [`SourceDocument`] | one per file per indexing pass, immutable |
//! | [`FileSet`] | the unit handed to the repository indexer |
//! | [`Chunk`] | produced by the chunker, persisted with its vector |
//! | [`ScoredChunk`] | one search hit |
//! | [`ContextPassage`] | what answer synthesis sees of a hit |
//! | [`IndexStats`] | outcome of one indexing pass |
//! | [`CorpusStats`] | aggregate counts of the persisted corpus |

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Last-change information for a file, taken from source control.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub last_modified: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub message: Option<String>,
    pub commit: Option<String>,
}

/// One original file of the repository snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Path relative to the repository root. Unique within a [`FileSet`].
    pub path: String,
    pub content: String,
    /// Stable external locator, usually a browsable URL.
    pub locator: String,
    /// Extension-derived type tag (`"rs"`, `"md"`, `"txt"` for none).
    pub file_type: String,
    pub revision: Option<Revision>,
}

impl SourceDocument {
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        locator: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let file_type = file_type_for(&path);
        Self {
            path,
            content: content.into(),
            locator: locator.into(),
            file_type,
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = Some(revision);
        self
    }
}

/// Extension-derived type tag for `path`, lowercased; `"txt"` when there is none.
pub fn file_type_for(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "txt".to_string())
}

/// The files of one repository snapshot, keyed and ordered by path.
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    files: BTreeMap<String, SourceDocument>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document, replacing any previous one with the same path.
    pub fn insert(&mut self, doc: SourceDocument) {
        self.files.insert(doc.path.clone(), doc);
    }

    pub fn get(&self, path: &str) -> Option<&SourceDocument> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceDocument> {
        self.files.values()
    }
}

impl FromIterator<SourceDocument> for FileSet {
    fn from_iter<I: IntoIterator<Item = SourceDocument>>(iter: I) -> Self {
        let mut set = FileSet::new();
        for doc in iter {
            set.insert(doc);
        }
        set
    }
}

/// Document metadata inherited by every chunk of that document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Originating document path.
    pub source: String,
    pub locator: String,
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl ChunkMetadata {
    pub fn for_document(doc: &SourceDocument) -> Self {
        let revision = doc.revision.clone().unwrap_or_default();
        Self {
            source: doc.path.clone(),
            locator: doc.locator.clone(),
            file_type: doc.file_type.clone(),
            last_modified: revision.last_modified,
            author: revision.author,
            message: revision.message,
            commit: revision.commit,
        }
    }

    /// Flat JSON object, the shape metadata filters match against.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A contiguous substring of a document's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    /// Sequence position within the document, starting at 0.
    pub index: usize,
    /// Character offset of `text` within the document content.
    pub start: usize,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Length of the chunk in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A search hit. `score` is cosine similarity, higher is nearer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// One retrieved passage as passed to answer synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPassage {
    pub text: String,
    pub source: String,
    pub locator: String,
    pub score: f32,
}

impl From<&ScoredChunk> for ContextPassage {
    fn from(hit: &ScoredChunk) -> Self {
        Self {
            text: hit.chunk.text.clone(),
            source: hit.chunk.metadata.source.clone(),
            locator: hit.chunk.metadata.locator.clone(),
            score: hit.score,
        }
    }
}

/// Outcome of one indexing pass.
///
/// Files that fail are only visible as the gap between `total_files` and
/// `processed_files`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub processed_files: usize,
    pub total_chunks: usize,
    pub duration_seconds: f64,
    pub files_per_second: f64,
    pub chunks_per_second: f64,
}

impl IndexStats {
    pub fn new(
        total_files: usize,
        processed_files: usize,
        total_chunks: usize,
        duration: std::time::Duration,
    ) -> Self {
        let secs = duration.as_secs_f64();
        let rate = |n: usize| if secs > 0.0 { n as f64 / secs } else { 0.0 };
        Self {
            total_files,
            processed_files,
            total_chunks,
            duration_seconds: secs,
            files_per_second: rate(processed_files),
            chunks_per_second: rate(total_chunks),
        }
    }

    pub fn failed_files(&self) -> usize {
        self.total_files.saturating_sub(self.processed_files)
    }
}

/// Aggregate counts of the indexed corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    /// Distinct source paths.
    pub document_count: usize,
    pub chunk_count: usize,
    pub last_indexed: Option<DateTime<Utc>>,
    /// False when running on the in-memory fallback.
    pub persistent: bool,
    pub location: Option<String>,
    /// Length of the stored vectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_dims: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CorpusStats {
    /// Zeroed stats annotated with the reason they could not be read.
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Equality filter over chunk metadata fields.
///
/// A chunk matches when every filter key exists in its metadata with an
/// equal JSON value. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, Value>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let value = metadata.to_value();
        self.0.iter().all(|(k, v)| value.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_from_extension() {
        assert_eq!(SourceDocument::new("src/Main.RS", "", "").file_type, "rs");
        assert_eq!(SourceDocument::new("LICENSE", "", "").file_type, "txt");
    }

    #[test]
    fn file_set_keys_by_path() {
        let set: FileSet = vec![
            SourceDocument::new("b.md", "one", "u1"),
            SourceDocument::new("a.md", "two", "u2"),
            SourceDocument::new("b.md", "three", "u3"),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
        let paths: Vec<_> = set.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "b.md"]);
        assert_eq!(set.get("b.md").map(|d| d.content.as_str()), Some("three"));
    }

    #[test]
    fn metadata_inherits_revision() {
        let doc = SourceDocument::new("README.md", "hi", "https://x/README.md").with_revision(
            Revision {
                author: Some("dana".into()),
                ..Revision::default()
            },
        );
        let meta = ChunkMetadata::for_document(&doc);
        assert_eq!(meta.source, "README.md");
        assert_eq!(meta.author.as_deref(), Some("dana"));
        let value = meta.to_value();
        assert_eq!(value["locator"], "https://x/README.md");
        assert!(value.get("commit").is_none());
    }

    #[test]
    fn filter_matches_on_equal_fields() {
        let meta = ChunkMetadata {
            source: "src/lib.rs".into(),
            file_type: "rs".into(),
            ..ChunkMetadata::default()
        };
        assert!(MetadataFilter::new().matches(&meta));
        assert!(MetadataFilter::new().eq("file_type", "rs").matches(&meta));
        assert!(!MetadataFilter::new().eq("file_type", "md").matches(&meta));
        assert!(!MetadataFilter::new().eq("missing", "x").matches(&meta));
    }

    #[test]
    fn index_stats_rates() {
        let stats = IndexStats::new(10, 9, 30, std::time::Duration::from_secs(3));
        assert_eq!(stats.failed_files(), 1);
        assert!((stats.files_per_second - 3.0).abs() < 1e-9);
        assert!((stats.chunks_per_second - 10.0).abs() < 1e-9);
        let zero = IndexStats::new(0, 0, 0, std::time::Duration::ZERO);
        assert_eq!(zero.files_per_second, 0.0);
    }
}
