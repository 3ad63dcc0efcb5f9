//! In-memory full-text index over document content and file names.
//!
//! Matching is substring-per-token: every token of the query must appear
//! inside some indexed token of the field (case-insensitive). Content and
//! file-name hits are unioned, deduplicated by document id and returned in
//! insertion order. There is no relevance ranking.
//!
//! Tokens longer than [`MAX_TOKEN_LEN`] bytes are dropped at analysis time
//! and never match. The limit sits well above hashes, URLs and long
//! identifiers.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, RwLock},
};

use tantivy::{
    DocAddress,
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    TantivyDocument,
    Term,
    collector::DocSetCollector,
    doc,
    query::{BooleanQuery, Occur, Query, RegexQuery},
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        TextAnalyzer,
        TokenStream,
    },
};

use crate::{
    document::IndexedDocument,
    error::{Error, Result},
};

const TOKENIZER: &str = "lexical";

/// Longest token, in bytes, that is indexed and searchable.
pub const MAX_TOKEN_LEN: usize = 255;
const WRITER_MEMORY_BUDGET: usize = 15_000_000;

/// Field names used in the schema.
pub mod fields {
    pub const ID: &str = "id";
    pub const SEQ: &str = "seq";
    pub const CONTENT: &str = "content";
    pub const FILE_NAME: &str = "file_name";
}

#[derive(Clone, Copy)]
struct SchemaFields {
    id: Field,
    seq: Field,
    content: Field,
    file_name: Field,
}

/// Pagination and filtering for a single query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub limit: usize,
    pub offset: usize,
    /// Extensions to keep (`"pdf"`, `".md"`); `None` keeps everything.
    pub file_types: Option<Vec<String>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
            file_types: None,
        }
    }
}

/// One page of lexical matches.
#[derive(Debug, Clone, Default)]
pub struct LexicalPage {
    pub documents: Vec<IndexedDocument>,
    /// Size of the full matched and type-filtered set.
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexicalStats {
    pub document_count: usize,
}

struct Writer {
    inner: IndexWriter,
    next_seq: u64,
}

pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
    analyzer: TextAnalyzer,
    writer: Mutex<Writer>,
    documents: RwLock<HashMap<String, IndexedDocument>>,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let id = builder.add_text_field(fields::ID, STRING | STORED);
    let seq = builder.add_u64_field(fields::SEQ, STORED | FAST);

    let text_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::Basic),
    );
    let content = builder.add_text_field(fields::CONTENT, text_opts.clone());
    let file_name = builder.add_text_field(fields::FILE_NAME, text_opts);

    (
        builder.build(),
        SchemaFields {
            id,
            seq,
            content,
            file_name,
        },
    )
}

fn build_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
        .filter(LowerCaser)
        .build()
}

impl LexicalIndex {
    /// Create an empty in-memory index.
    pub fn new() -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        let analyzer = build_analyzer();
        index.tokenizers().register(TOKENIZER, analyzer.clone());

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer_with_num_threads(1, WRITER_MEMORY_BUDGET)?;

        Ok(Self {
            index,
            reader,
            fields,
            analyzer,
            writer: Mutex::new(Writer {
                inner: writer,
                next_seq: 0,
            }),
            documents: RwLock::new(HashMap::new()),
        })
    }

    /// Index `content` and the document's original file name under `doc.id`.
    ///
    /// An existing entry for the same id is replaced. The document is
    /// searchable as soon as this returns. Empty content indexes no tokens
    /// but still records the metadata.
    pub fn add(&self, doc: &IndexedDocument, content: &str) -> Result<()> {
        if doc.id.is_empty() {
            return Err(Error::InvalidDocument("document id is empty".into()));
        }

        let f = self.fields;
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let seq = writer.next_seq;
        writer.next_seq += 1;

        writer
            .inner
            .delete_term(Term::from_field_text(f.id, &doc.id));
        writer.inner.add_document(doc!(
            f.id => doc.id.as_str(),
            f.seq => seq,
            f.content => content,
            f.file_name => doc.original_name.as_str(),
        ))?;
        writer.inner.commit()?;
        self.reader.reload()?;

        self.documents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(doc.id.clone(), doc.clone());

        tracing::debug!(id = %doc.id, "lexical index add");
        Ok(())
    }

    /// Remove a document. Returns `false` if it was not indexed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        // Metadata goes first so concurrent searches stop returning the id.
        let existed = self
            .documents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some();
        if !existed {
            tracing::debug!(id, "lexical remove of unknown document ignored");
            return Ok(false);
        }

        writer
            .inner
            .delete_term(Term::from_field_text(self.fields.id, id));
        writer.inner.commit()?;
        self.reader.reload()?;
        Ok(true)
    }

    /// Drop every document and token.
    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.documents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        writer.inner.delete_all_documents()?;
        writer.inner.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    /// Point-in-time copy of the indexed metadata, keyed by id.
    pub fn documents(&self) -> HashMap<String, IndexedDocument> {
        self.documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn stats(&self) -> LexicalStats {
        LexicalStats {
            document_count: self
                .documents
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
        }
    }

    /// Search content and file names.
    ///
    /// Queries without any indexable token return an empty page.
    pub fn search(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<LexicalPage> {
        if query.trim().is_empty() {
            return Ok(LexicalPage::default());
        }
        let terms = self.query_terms(query);
        if terms.is_empty() {
            return Ok(LexicalPage::default());
        }

        let searcher = self.reader.searcher();
        let mut hits: HashSet<DocAddress> = searcher.search(
            &self.field_query(self.fields.content, &terms)?,
            &DocSetCollector,
        )?;
        hits.extend(searcher.search(
            &self.field_query(self.fields.file_name, &terms)?,
            &DocSetCollector,
        )?);

        let mut ordered: Vec<(u64, String)> = Vec::with_capacity(hits.len());
        let mut seen = HashSet::new();
        for address in hits {
            let stored: TantivyDocument = searcher.doc(address)?;
            let id = extract_text(&stored, self.fields.id);
            if seen.insert(id.clone()) {
                ordered.push((extract_u64(&stored, self.fields.seq), id));
            }
        }
        ordered.sort_unstable();

        let documents =
            self.documents.read().unwrap_or_else(|e| e.into_inner());
        let matched: Vec<&IndexedDocument> = ordered
            .iter()
            .filter_map(|(_, id)| documents.get(id))
            .filter(|doc| match &opts.file_types {
                Some(types) if !types.is_empty() => {
                    doc.matches_file_types(types)
                }
                _ => true,
            })
            .collect();

        Ok(LexicalPage {
            total: matched.len(),
            documents: matched
                .into_iter()
                .skip(opts.offset)
                .take(opts.limit)
                .cloned()
                .collect(),
        })
    }

    fn query_terms(&self, query: &str) -> Vec<String> {
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(query);
        let mut terms = Vec::new();
        while stream.advance() {
            let text = &stream.token().text;
            if !terms.contains(text) {
                terms.push(text.clone());
            }
        }
        terms
    }

    /// Every term must occur as a substring of an indexed token.
    ///
    /// Terms come out of the simple tokenizer, so they are purely
    /// alphanumeric and need no regex escaping.
    fn field_query(
        &self,
        field: Field,
        terms: &[String],
    ) -> Result<BooleanQuery> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> =
            Vec::with_capacity(terms.len());
        for term in terms {
            let regex =
                RegexQuery::from_pattern(&format!(".*{term}.*"), field)?;
            clauses.push((Occur::Must, Box::new(regex)));
        }
        Ok(BooleanQuery::new(clauses))
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("documents", &self.stats().document_count)
            .finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn meta(id: &str, name: &str) -> IndexedDocument {
        IndexedDocument {
            id: id.to_string(),
            file_name: format!("{id}-{name}"),
            original_name: name.to_string(),
            file_extension: crate::document::extension_of(name),
            mime_type: "text/plain".to_string(),
            upload_date: 0,
            file_size: 0,
        }
    }

    fn opts(limit: usize, offset: usize) -> SearchOptions {
        SearchOptions {
            limit,
            offset,
            file_types: None,
        }
    }

    fn ids(page: &LexicalPage) -> Vec<&str> {
        page.documents.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn add_and_search_content() {
        let idx = LexicalIndex::new().unwrap();
        idx.add(
            &meta("a", "hello.md"),
            "This is a test document about hello world",
        )
        .unwrap();
        idx.add(
            &meta("b", "rust.md"),
            "Rust is a systems programming language",
        )
        .unwrap();

        let page = idx.search("programming", &opts(10, 0)).unwrap();
        assert_eq!(ids(&page), vec!["b"]);
        assert_eq!(page.total, 1);
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        let idx = LexicalIndex::new().unwrap();
        idx.add(&meta("a", "a.txt"), "Unbelievable PROGRAMMING feats").unwrap();

        assert_eq!(idx.search("gram", &opts(10, 0)).unwrap().total, 1);
        assert_eq!(idx.search("BELIEV", &opts(10, 0)).unwrap().total, 1);
        assert_eq!(idx.search("xyz", &opts(10, 0)).unwrap().total, 0);
    }

    #[test]
    fn all_query_terms_must_match() {
        let idx = LexicalIndex::new().unwrap();
        idx.add(&meta("a", "a.txt"), "rust ownership").unwrap();
        idx.add(&meta("b", "b.txt"), "rust macros").unwrap();

        let page = idx.search("rust macro", &opts(10, 0)).unwrap();
        assert_eq!(ids(&page), vec!["b"]);
    }

    #[test]
    fn filename_and_content_match_count_once() {
        let idx = LexicalIndex::new().unwrap();
        idx.add(&meta("a", "programming-notes.md"), "notes about programming")
            .unwrap();

        let page = idx.search("programming", &opts(10, 0)).unwrap();
        assert_eq!(ids(&page), vec!["a"]);
        assert_eq!(page.total, 1);
    }

    #[test]
    fn filename_only_match() {
        let idx = LexicalIndex::new().unwrap();
        idx.add(&meta("a", "quarterly_report.pdf"), "numbers").unwrap();

        let page = idx.search("report", &opts(10, 0)).unwrap();
        assert_eq!(ids(&page), vec!["a"]);
    }

    #[test]
    fn empty_query_returns_nothing() {
        let idx = LexicalIndex::new().unwrap();
        idx.add(&meta("a", "a.txt"), "content").unwrap();

        for q in ["", "   ", "\n\t", "!!!"] {
            let page = idx.search(q, &opts(10, 0)).unwrap();
            assert_eq!(page.total, 0);
            assert!(page.documents.is_empty());
        }
    }

    #[test]
    fn empty_content_is_listable_and_filename_searchable() {
        let idx = LexicalIndex::new().unwrap();
        idx.add(&meta("a", "scan.pdf"), "").unwrap();

        assert!(idx.contains("a"));
        assert_eq!(idx.stats().document_count, 1);
        assert_eq!(idx.search("scan", &opts(10, 0)).unwrap().total, 1);
    }

    #[test]
    fn empty_id_is_rejected() {
        let idx = LexicalIndex::new().unwrap();
        let err = idx.add(&meta("", "a.txt"), "x").unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
    }

    #[test]
    fn readd_replaces_entry() {
        let idx = LexicalIndex::new().unwrap();
        idx.add(&meta("a", "a.txt"), "old content").unwrap();
        idx.add(&meta("a", "a.txt"), "new content").unwrap();

        assert_eq!(idx.search("old", &opts(10, 0)).unwrap().total, 0);
        assert_eq!(idx.search("content", &opts(10, 0)).unwrap().total, 1);
        assert_eq!(idx.stats().document_count, 1);
    }

    #[test]
    fn remove_then_search() {
        let idx = LexicalIndex::new().unwrap();
        idx.add(&meta("a", "a.txt"), "hello").unwrap();
        idx.add(&meta("b", "b.txt"), "hello").unwrap();

        assert!(idx.remove("a").unwrap());
        assert!(!idx.remove("a").unwrap());
        assert_eq!(ids(&idx.search("hello", &opts(10, 0)).unwrap()), vec!["b"]);
        assert_eq!(idx.stats().document_count, 1);
    }

    #[test]
    fn results_follow_insertion_order() {
        let idx = LexicalIndex::new().unwrap();
        for id in ["c", "a", "b"] {
            idx.add(&meta(id, &format!("{id}.txt")), "shared words").unwrap();
        }
        assert_eq!(
            ids(&idx.search("shared", &opts(10, 0)).unwrap()),
            vec!["c", "a", "b"]
        );
    }

    #[test]
    fn file_type_filter_applies_before_pagination() {
        let idx = LexicalIndex::new().unwrap();
        idx.add(&meta("a", "a.pdf"), "budget").unwrap();
        idx.add(&meta("b", "b.txt"), "budget").unwrap();
        idx.add(&meta("c", "c.PDF"), "budget").unwrap();

        let options = SearchOptions {
            limit: 1,
            offset: 1,
            file_types: Some(vec![".pdf".to_string()]),
        };
        let page = idx.search("budget", &options).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(ids(&page), vec!["c"]);
    }

    #[test]
    fn clear_drops_everything() {
        let idx = LexicalIndex::new().unwrap();
        idx.add(&meta("a", "a.txt"), "hello").unwrap();
        idx.clear().unwrap();

        assert_eq!(idx.stats().document_count, 0);
        assert_eq!(idx.search("hello", &opts(10, 0)).unwrap().total, 0);

        idx.add(&meta("b", "b.txt"), "hello").unwrap();
        assert_eq!(ids(&idx.search("hello", &opts(10, 0)).unwrap()), vec!["b"]);
    }

    #[test]
    fn long_tokens_are_searchable() {
        let idx = LexicalIndex::new().unwrap();
        let digest =
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        idx.add(&meta("a", "checksums.txt"), &format!("sha256 {digest}"))
            .unwrap();

        assert_eq!(ids(&idx.search(digest, &opts(10, 0)).unwrap()), vec!["a"]);
        let partial = idx.search("9AFBF4C8996FB924", &opts(10, 0)).unwrap();
        assert_eq!(ids(&partial), vec!["a"]);
    }

    #[test]
    fn tokens_over_the_limit_are_dropped() {
        let idx = LexicalIndex::new().unwrap();
        let blob = "x".repeat(MAX_TOKEN_LEN + 1);
        idx.add(&meta("a", "a.txt"), &format!("marker {blob}")).unwrap();

        assert_eq!(idx.search("marker", &opts(10, 0)).unwrap().total, 1);
        assert_eq!(idx.search("xxxx", &opts(10, 0)).unwrap().total, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn pages_are_contiguous_slices(
            doc_count in 0usize..12,
            offset in 0usize..15,
            limit in 1usize..6,
        ) {
            let idx = LexicalIndex::new().unwrap();
            for i in 0..doc_count {
                idx.add(&meta(&format!("d{i}"), "x.txt"), "common term")
                    .unwrap();
            }

            let full = idx.search("common", &opts(usize::MAX, 0)).unwrap();
            let page = idx.search("common", &opts(limit, offset)).unwrap();

            prop_assert_eq!(full.total, doc_count);
            prop_assert_eq!(page.total, full.total);
            let expected: Vec<_> =
                full.documents.iter().skip(offset).take(limit).collect();
            let actual: Vec<_> = page.documents.iter().collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
