//! Plain-text extraction from indexed attachment files.
//!
//! Every attachment that lands on disk gets its text pulled out for the
//! full-text index. Extraction is best-effort by design: a file we
//! cannot read simply contributes no terms, it never fails the run.

use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use log::warn;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use crate::email::MessageParser;

/// Known attachment formats, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Docx,
    /// Legacy OLE compound `.doc`; no OLE reader on board, so these
    /// contribute no text.
    Doc,
    Xlsx,
    Pdf,
    Rtf,
    /// A nested raw message re-encoded as an attachment.
    Eml,
    /// Media and archive formats that carry no indexable text.
    Binary,
    /// Anything else: indexed as lossy plain text.
    Other,
}

/// Extensions that are never worth feeding to the indexer.
const BINARY_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "mp4", "avi", "mov", "mkv", "mp3", "wav", "flac", "zip",
    "7z", "py", "cpp", "java",
];

impl DocumentKind {
    pub fn of(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "docx" => DocumentKind::Docx,
            "doc" => DocumentKind::Doc,
            "xlsx" => DocumentKind::Xlsx,
            "pdf" => DocumentKind::Pdf,
            "rtf" => DocumentKind::Rtf,
            "eml" => DocumentKind::Eml,
            _ if BINARY_EXTENSIONS.contains(&ext.as_str()) => DocumentKind::Binary,
            _ => DocumentKind::Other,
        }
    }
}

/// Extracts the indexable text of `path`, degrading to an empty string
/// on any read or parse failure.
pub fn extracted_content(path: &Path) -> String {
    let result = match DocumentKind::of(path) {
        DocumentKind::Docx => read_docx(path),
        DocumentKind::Doc => Err("legacy OLE .doc extraction is unsupported".to_string()),
        DocumentKind::Xlsx => read_xlsx(path),
        DocumentKind::Pdf => read_pdf(path),
        DocumentKind::Rtf => read_rtf(path),
        DocumentKind::Eml => read_eml(path),
        DocumentKind::Binary => Ok(String::new()),
        DocumentKind::Other => read_lossy(path),
    };
    match result {
        Ok(content) => content,
        Err(reason) => {
            warn!("No text extracted from '{}': {}", path.display(), reason);
            String::new()
        }
    }
}

fn read_docx(path: &Path) -> Result<String, String> {
    let file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
    let mut document_xml = archive
        .by_name("word/document.xml")
        .map_err(|e| e.to_string())?;
    let mut xml = String::new();
    document_xml
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;
    collect_xml_text(&xml, b"t", b"p")
}

/// Shared strings hold the bulk of a workbook's text; inline cell
/// strings reuse the same `<t>` element name, so one pass per part.
fn read_xlsx(path: &Path) -> Result<String, String> {
    let file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;

    let mut text = String::new();
    for name in ["xl/sharedStrings.xml", "xl/worksheets/sheet1.xml"] {
        let Ok(mut part) = archive.by_name(name) else {
            continue;
        };
        let mut xml = String::new();
        if part.read_to_string(&mut xml).is_err() {
            continue;
        }
        if let Ok(part_text) = collect_xml_text(&xml, b"t", b"row") {
            text.push_str(&part_text);
        }
    }
    Ok(text)
}

/// Pulls character data out of `text_element` elements, inserting a
/// newline at the end of each `break_element`.
fn collect_xml_text(xml: &str, text_element: &[u8], break_element: &[u8]) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut text = String::new();
    let mut in_text_element = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if e.local_name().as_ref() == text_element {
                    in_text_element = true;
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.local_name();
                if name.as_ref() == text_element {
                    in_text_element = false;
                } else if name.as_ref() == break_element {
                    text.push('\n');
                }
            }
            Ok(Event::Text(e)) => {
                if in_text_element {
                    text.push_str(&e.unescape().unwrap_or_default());
                    text.push(' ');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parsing error: {e}")),
            _ => {}
        }
    }

    Ok(text)
}

fn read_pdf(path: &Path) -> Result<String, String> {
    let doc = lopdf::Document::load(path).map_err(|e| e.to_string())?;
    let mut text = String::new();
    for (page_num, _) in doc.get_pages() {
        if let Ok(page_text) = doc.extract_text(&[page_num]) {
            text.push_str(&page_text);
            text.push('\n');
        }
    }
    Ok(text)
}

// RTF control words and group braces; what is left is the document text.
static RE_RTF_CONTROL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[a-z]+-?\d* ?|\\'[0-9a-fA-F]{2}|[{}]|\\\r?\n").unwrap());

fn read_rtf(path: &Path) -> Result<String, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    Ok(RE_RTF_CONTROL.replace_all(&content, "").trim().to_string())
}

/// Nested messages are indexed by the same body selection used for the
/// message's own record.
fn read_eml(path: &Path) -> Result<String, String> {
    let raw = std::fs::read(path).map_err(|e| e.to_string())?;
    Ok(MessageParser::new().parse(&raw).selected_body())
}

fn read_lossy(path: &Path) -> Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_document_kind_from_extension() {
        assert_eq!(DocumentKind::of(Path::new("a/b.docx")), DocumentKind::Docx);
        assert_eq!(DocumentKind::of(Path::new("b.DOCX")), DocumentKind::Docx);
        assert_eq!(DocumentKind::of(Path::new("b.doc")), DocumentKind::Doc);
        assert_eq!(DocumentKind::of(Path::new("b.xlsx")), DocumentKind::Xlsx);
        assert_eq!(DocumentKind::of(Path::new("b.pdf")), DocumentKind::Pdf);
        assert_eq!(DocumentKind::of(Path::new("b.eml")), DocumentKind::Eml);
        assert_eq!(DocumentKind::of(Path::new("b.jpg")), DocumentKind::Binary);
        assert_eq!(DocumentKind::of(Path::new("b.zip")), DocumentKind::Binary);
        assert_eq!(DocumentKind::of(Path::new("b.txt")), DocumentKind::Other);
        assert_eq!(DocumentKind::of(Path::new("README")), DocumentKind::Other);
    }

    #[test]
    fn test_collect_xml_text_with_breaks() {
        let xml = r#"<?xml version="1.0"?>
        <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
            <w:body>
                <w:p><w:r><w:t>First line</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second line</w:t></w:r></w:p>
            </w:body>
        </w:document>"#;
        let text = collect_xml_text(xml, b"t", b"p").unwrap();
        assert!(text.contains("First line"));
        assert!(text.contains("Second line"));
        assert!(text.contains('\n'));
    }

    #[test]
    fn test_binary_extension_yields_no_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, [0xFFu8, 0xD8, 0xFF]).unwrap();
        assert_eq!(extracted_content(&path), "");
    }

    #[test]
    fn test_plain_text_is_read_as_is() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "quarterly figures 季度数据").unwrap();
        assert_eq!(extracted_content(&path), "quarterly figures 季度数据");
    }

    #[test]
    fn test_rtf_control_words_are_stripped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memo.rtf");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br"{\rtf1\ansi Hello rtf world}").unwrap();
        drop(file);
        assert_eq!(extracted_content(&path), "Hello rtf world");
    }

    #[test]
    fn test_legacy_doc_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memo.doc");
        // OLE compound file magic followed by opaque container bytes.
        std::fs::write(&path, b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1 payload").unwrap();
        assert_eq!(extracted_content(&path), "");
    }

    #[test]
    fn test_missing_file_degrades_to_empty() {
        assert_eq!(extracted_content(Path::new("/no/such/file.pdf")), "");
    }
}
