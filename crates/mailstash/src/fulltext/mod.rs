//! Full-text attachment index.
//!
//! One index per volume, living next to the relational database under
//! the volume's `index/` directory. Documents are keyed by attachment
//! id and upserted, so re-running a task never duplicates entries.
//! Content is tokenized with a jieba segmenter so Chinese phrases
//! search as well as English ones.

pub mod error;
pub mod extract;

use std::path::Path;

use log::{debug, info};
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, PhraseQuery, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED, STRING,
};
use tantivy::tokenizer::{TokenStream, Tokenizer};
use tantivy::{doc, Index, IndexWriter, TantivyDocument, Term};

pub use error::IndexError;
pub use extract::{extracted_content, DocumentKind};

use error::Result;

/// Directory under the volume index dir holding the segment files.
pub const ATTACH_INDEX_DIR: &str = "attach_index";

/// Tokenizer name the content field is registered with.
const TOKENIZER_NAME: &str = "jieba";

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Resolved schema handles, looked up once at open.
struct AttachmentFields {
    f_attachment_id: Field,
    f_email_id: Field,
    f_filename: Field,
    f_kind: Field,
    f_storage_path: Field,
    f_content: Field,
}

/// One stored hit from a full-text query. Content itself is never
/// stored, only the identifying metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullTextHit {
    pub attachment_id: String,
    pub email_id: String,
    pub filename: String,
    pub kind: String,
    pub storage_path: String,
}

/// A document to upsert into the index.
#[derive(Debug, Clone)]
pub struct FullTextEntry<'a> {
    pub attachment_id: String,
    pub email_id: String,
    pub filename: &'a str,
    pub kind: &'a str,
    pub storage_path: &'a str,
    pub content: &'a str,
}

pub struct FullTextIndex {
    index: Index,
    fields: AttachmentFields,
}

impl FullTextIndex {
    /// Opens (or creates) the attachment index under `index_dir`.
    pub fn open_in_index_dir(index_dir: &Path) -> Result<Self> {
        let dir = index_dir.join(ATTACH_INDEX_DIR);
        std::fs::create_dir_all(&dir).map_err(|source| IndexError::Io {
            path: dir.clone(),
            source,
        })?;

        let schema = Self::schema();
        let directory = MmapDirectory::open(&dir)?;
        let index = Index::open_or_create(directory, schema.clone())?;
        index
            .tokenizers()
            .register(TOKENIZER_NAME, tantivy_jieba::JiebaTokenizer {});
        debug!("Opened full-text index at '{}'", dir.display());

        let fields = AttachmentFields {
            f_attachment_id: schema.get_field("attachment_id")?,
            f_email_id: schema.get_field("email_id")?,
            f_filename: schema.get_field("filename")?,
            f_kind: schema.get_field("kind")?,
            f_storage_path: schema.get_field("storage_path")?,
            f_content: schema.get_field("content")?,
        };
        Ok(Self { index, fields })
    }

    fn schema() -> Schema {
        let mut builder = Schema::builder();
        // Content carries positions so phrase queries work; everything
        // else is an exact-match identifier.
        let content_options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(TOKENIZER_NAME)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
        builder.add_text_field("attachment_id", STRING | STORED);
        builder.add_text_field("email_id", STRING | STORED);
        builder.add_text_field("filename", STRING | STORED);
        builder.add_text_field("kind", STRING | STORED);
        builder.add_text_field("storage_path", STRING | STORED);
        builder.add_text_field("content", content_options);
        builder.build()
    }

    /// Upserts one attachment document: any previous document with the
    /// same attachment id is replaced.
    pub fn upsert(&self, entry: &FullTextEntry<'_>) -> Result<()> {
        let mut writer: IndexWriter = self.index.writer(WRITER_HEAP_BYTES)?;
        writer.delete_term(Term::from_field_text(
            self.fields.f_attachment_id,
            &entry.attachment_id,
        ));
        writer.add_document(doc!(
            self.fields.f_attachment_id => entry.attachment_id.clone(),
            self.fields.f_email_id => entry.email_id.clone(),
            self.fields.f_filename => entry.filename,
            self.fields.f_kind => entry.kind,
            self.fields.f_storage_path => entry.storage_path,
            self.fields.f_content => entry.content,
        ))?;
        writer.commit()?;
        info!("Indexed attachment {}", entry.attachment_id);
        Ok(())
    }

    /// Searches for `phrase` in attachment content, optionally scoped
    /// to the given storage paths. Unpaged variant of
    /// [`search_paged`](Self::search_paged).
    pub fn search(&self, phrase: &str, scoped_paths: Option<&[String]>) -> Result<Vec<FullTextHit>> {
        let Some(query) = self.build_query(phrase, scoped_paths) else {
            return Ok(Vec::new());
        };
        let reader = self.index.reader()?;
        let searcher = reader.searcher();

        let total = searcher.search(&query, &Count)?;
        if total == 0 {
            return Ok(Vec::new());
        }
        let top_docs = searcher.search(&query, &TopDocs::with_limit(total))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (_score, address) in top_docs {
            let document: TantivyDocument = searcher.doc(address)?;
            hits.push(self.hit_of(&document));
        }
        Ok(hits)
    }

    /// Phrase search with paging. `page` is 1-based. Returns the page
    /// of hits, the total hit count, and the page count.
    pub fn search_paged(
        &self,
        phrase: &str,
        scoped_paths: Option<&[String]>,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<FullTextHit>, usize, usize)> {
        let Some(query) = self.build_query(phrase, scoped_paths) else {
            return Ok((Vec::new(), 0, 0));
        };

        let reader = self.index.reader()?;
        let searcher = reader.searcher();

        let page = page.max(1);
        let offset = page_size.saturating_mul(page - 1);
        let (total, top_docs) = searcher.search(
            &query,
            &(Count, TopDocs::with_limit(page_size.max(1)).and_offset(offset)),
        )?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (_score, address) in top_docs {
            let document: TantivyDocument = searcher.doc(address)?;
            hits.push(self.hit_of(&document));
        }

        let page_count = total.div_ceil(page_size.max(1));
        Ok((hits, total, page_count))
    }

    /// Builds the phrase query, AND-ed with an OR over path terms when
    /// the search is scoped. Returns None for queries with no tokens.
    fn build_query(&self, phrase: &str, scoped_paths: Option<&[String]>) -> Option<Box<dyn Query>> {
        // Keep the tokenizer's own positions so the phrase matches the
        // token stream exactly as it was indexed (the segmenter also
        // emits whitespace tokens, which occupy positions).
        let tokens = self.tokenize(phrase);
        let first_position = tokens.first().map(|(pos, _)| *pos).unwrap_or(0);
        let terms: Vec<(usize, Term)> = tokens
            .into_iter()
            .map(|(pos, token)| {
                (
                    pos - first_position,
                    Term::from_field_text(self.fields.f_content, &token),
                )
            })
            .collect();

        let content_query: Box<dyn Query> = match terms.len() {
            0 => return None,
            1 => Box::new(TermQuery::new(
                terms.into_iter().next()?.1,
                IndexRecordOption::WithFreqsAndPositions,
            )),
            _ => Box::new(PhraseQuery::new_with_offset(terms)),
        };

        let paths: Vec<&String> = scoped_paths
            .unwrap_or_default()
            .iter()
            .filter(|path| !path.is_empty())
            .collect();
        if paths.is_empty() {
            return Some(content_query);
        }

        let path_queries: Vec<Box<dyn Query>> = paths
            .into_iter()
            .map(|path| {
                Box::new(TermQuery::new(
                    Term::from_field_text(self.fields.f_storage_path, path),
                    IndexRecordOption::Basic,
                )) as Box<dyn Query>
            })
            .collect();
        let path_query = BooleanQuery::new(
            path_queries
                .into_iter()
                .map(|q| (Occur::Should, q))
                .collect(),
        );

        Some(Box::new(BooleanQuery::new(vec![
            (Occur::Must, content_query),
            (Occur::Must, Box::new(path_query)),
        ])))
    }

    /// Tokens of `phrase` with their stream positions, whitespace
    /// tokens dropped.
    fn tokenize(&self, phrase: &str) -> Vec<(usize, String)> {
        let mut tokenizer = tantivy_jieba::JiebaTokenizer {};
        let mut stream = tokenizer.token_stream(phrase);
        let mut tokens = Vec::new();
        while let Some(token) = stream.next() {
            let text = token.text.trim();
            if !text.is_empty() {
                tokens.push((token.position, text.to_string()));
            }
        }
        tokens
    }

    fn hit_of(&self, document: &TantivyDocument) -> FullTextHit {
        let text_of = |field: Field| {
            document
                .get_first(field)
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string()
        };
        FullTextHit {
            attachment_id: text_of(self.fields.f_attachment_id),
            email_id: text_of(self.fields.f_email_id),
            filename: text_of(self.fields.f_filename),
            kind: text_of(self.fields.f_kind),
            storage_path: text_of(self.fields.f_storage_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry<'a>(id: &str, path: &'a str, content: &'a str) -> FullTextEntry<'a> {
        FullTextEntry {
            attachment_id: id.to_string(),
            email_id: "1".to_string(),
            filename: "report.txt",
            kind: "Attach",
            storage_path: path,
            content,
        }
    }

    #[test]
    fn test_upsert_and_phrase_search() {
        let dir = TempDir::new().unwrap();
        let index = FullTextIndex::open_in_index_dir(dir.path()).unwrap();

        index
            .upsert(&entry("10", "E/a/report.txt", "quarterly revenue exceeded projections"))
            .unwrap();
        index
            .upsert(&entry("11", "E/a/other.txt", "nothing relevant here"))
            .unwrap();

        let hits = index.search("quarterly revenue", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].attachment_id, "10");
        assert_eq!(hits[0].storage_path, "E/a/report.txt");
    }

    #[test]
    fn test_upsert_replaces_by_attachment_id() {
        let dir = TempDir::new().unwrap();
        let index = FullTextIndex::open_in_index_dir(dir.path()).unwrap();

        index
            .upsert(&entry("10", "E/a/report.txt", "first version text"))
            .unwrap();
        index
            .upsert(&entry("10", "E/a/report.txt", "second version text"))
            .unwrap();

        assert!(index.search("first version", None).unwrap().is_empty());
        let hits = index.search("second version", None).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_search_scoped_to_paths() {
        let dir = TempDir::new().unwrap();
        let index = FullTextIndex::open_in_index_dir(dir.path()).unwrap();

        index
            .upsert(&entry("10", "E/a/report.txt", "shared phrase content"))
            .unwrap();
        index
            .upsert(&entry("11", "E/b/report.txt", "shared phrase content"))
            .unwrap();

        let scope = vec!["E/a/report.txt".to_string()];
        let hits = index.search("shared phrase", Some(&scope)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].attachment_id, "10");
    }

    #[test]
    fn test_chinese_phrase_search() {
        let dir = TempDir::new().unwrap();
        let index = FullTextIndex::open_in_index_dir(dir.path()).unwrap();

        index
            .upsert(&entry("10", "E/a/报告.txt", "本季度销售数据稳步增长"))
            .unwrap();

        let hits = index.search("销售数据", None).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_reversed_phrase_does_not_match() {
        let dir = TempDir::new().unwrap();
        let index = FullTextIndex::open_in_index_dir(dir.path()).unwrap();

        index
            .upsert(&entry("10", "E/a/annual.txt", "年度 报告 已 提交"))
            .unwrap();

        assert_eq!(index.search("年度 报告", None).unwrap().len(), 1);
        // Same tokens in the opposite order must not match a phrase.
        assert!(index.search("报告 年度", None).unwrap().is_empty());
    }

    #[test]
    fn test_paged_search_counts() {
        let dir = TempDir::new().unwrap();
        let index = FullTextIndex::open_in_index_dir(dir.path()).unwrap();

        for i in 0..5 {
            let id = format!("{i}");
            let path = format!("E/a/doc{i}.txt");
            index
                .upsert(&FullTextEntry {
                    attachment_id: id.clone(),
                    email_id: id,
                    filename: "doc.txt",
                    kind: "Attach",
                    storage_path: &path,
                    content: "repeated target phrase",
                })
                .unwrap();
        }

        let (hits, total, pages) = index.search_paged("target phrase", None, 1, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(total, 5);
        assert_eq!(pages, 3);

        let (hits, _, _) = index.search_paged("target phrase", None, 3, 2).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let dir = TempDir::new().unwrap();
        let index = FullTextIndex::open_in_index_dir(dir.path()).unwrap();
        let (hits, total, pages) = index.search_paged("   ", None, 1, 10).unwrap();
        assert!(hits.is_empty());
        assert_eq!(total, 0);
        assert_eq!(pages, 0);
    }
}
