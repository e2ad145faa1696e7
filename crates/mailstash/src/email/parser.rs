//! Raw message parsing: headers, body parts, attachments.
//!
//! Parsing never fails outright. A blob mail-parser cannot decode
//! degrades to a best-effort raw header dump with empty body and
//! attachment lists; callers decide whether to skip such messages.

use log::debug;
use mail_parser::{MimeHeaders, PartType};

/// One body part collected from the MIME tree. Nested messages and
/// attachment-disposition parts are excluded.
#[derive(Debug, Clone)]
pub struct BodyPart {
    pub content: String,
    pub is_html: bool,
}

/// One direct attachment. `.eml` attachments carry the nested raw
/// message re-encoded as their data.
#[derive(Debug, Clone)]
pub struct AttachmentData {
    pub filename: String,
    pub data: Vec<u8>,
}

impl AttachmentData {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Structured view of one raw message.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// Header name/value pairs in wire order.
    pub headers: Vec<(String, String)>,
    pub subject: String,
    pub sender: String,
    pub recipients: String,
    pub cc: String,
    pub bcc: String,
    pub message_id: Option<String>,
    /// RFC 3339 `Date` header value, if present and parseable.
    pub date: Option<String>,
    /// `(year, month, day, hour, minute, second)` of the Date header,
    /// kept for filename generation.
    date_parts: Option<(u16, u8, u8, u8, u8, u8)>,
    pub body_parts: Vec<BodyPart>,
    pub attachments: Vec<AttachmentData>,
    /// Size of the raw blob in bytes.
    pub raw_size: usize,
}

impl ParsedMessage {
    /// Index of the canonical body part: with three or more parts the
    /// historical heuristic picks `⌊n/2⌋ − 1` as the "most complete"
    /// alternative, otherwise the last part.
    fn chosen_body_index(&self) -> Option<usize> {
        let n = self.body_parts.len();
        match n {
            0 => None,
            1 | 2 => Some(n - 1),
            _ => Some(n / 2 - 1),
        }
    }

    /// The body parts up to and including the chosen index, joined raw
    /// (HTML intact). This is the text cloud-link extraction scans.
    pub fn selected_body(&self) -> String {
        match self.chosen_body_index() {
            Some(idx) => self.body_parts[..=idx]
                .iter()
                .map(|p| p.content.as_str())
                .collect(),
            None => String::new(),
        }
    }

    /// Plain-text rendering of the selected body, HTML stripped.
    pub fn body_text(&self) -> String {
        let combined = self.selected_body();
        if combined.is_empty() {
            return combined;
        }
        strip_html(&combined)
    }

    /// Calendar date of the `Date` header, for range filtering.
    pub fn received_date(&self) -> Option<chrono::NaiveDate> {
        self.date_parts.and_then(|(y, mo, d, _, _, _)| {
            chrono::NaiveDate::from_ymd_opt(i32::from(y), u32::from(mo), u32::from(d))
        })
    }

    /// Case-sensitive substring filters; `None` matches everything.
    pub fn matches_sender(&self, filter: Option<&str>) -> bool {
        filter.map_or(true, |f| self.sender.contains(f))
    }

    pub fn matches_subject(&self, filter: Option<&str>) -> bool {
        filter.map_or(true, |f| self.subject.contains(f))
    }

    /// Attachments whose filename contains `keyword` (all of them when
    /// `keyword` is `None`).
    pub fn attachments_matching(&self, keyword: Option<&str>) -> Vec<&AttachmentData> {
        self.attachments
            .iter()
            .filter(|a| keyword.map_or(true, |k| a.filename.contains(k)))
            .collect()
    }

    /// Storage filename for the raw message:
    /// `{subject}_{YYYYMMDD_HHMMSS}_{from}.eml`, unsafe characters
    /// replaced by `_`.
    pub fn eml_filename(&self) -> String {
        let subject = if self.subject.is_empty() {
            "NoSubject"
        } else {
            &self.subject
        };
        let date = match self.date_parts {
            Some((y, mo, d, h, mi, s)) => {
                format!("{y:04}{mo:02}{d:02}_{h:02}{mi:02}{s:02}")
            }
            None => "NoDate".to_string(),
        };
        let from = if self.sender.is_empty() {
            "NoFrom"
        } else {
            &self.sender
        };

        let stem: String = format!("{subject}_{date}_{from}")
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{stem}.eml")
    }
}

/// Stateless message parser.
#[derive(Default)]
pub struct MessageParser;

impl MessageParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses one raw RFC822 blob. Never fails: undecodable input
    /// yields a raw header dump with empty body and attachments.
    pub fn parse(&self, raw: &[u8]) -> ParsedMessage {
        let Some(message) = mail_parser::MessageParser::default().parse(raw) else {
            debug!("Message undecodable; falling back to raw header dump");
            return fallback_parse(raw);
        };

        let headers = message
            .headers_raw()
            .map(|(name, value)| (name.to_string(), value.trim().to_string()))
            .collect();

        let mut body_parts = Vec::new();
        let mut attachments = Vec::new();

        for part in message.parts.iter() {
            let is_attachment_disposition = part
                .content_disposition()
                .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"));

            match &part.body {
                // Nested messages are excluded from the body; when they
                // arrive as `.eml` attachments, re-encode the nested
                // message as the attachment payload.
                PartType::Message(nested) => {
                    if let Some(name) = part.attachment_name() {
                        if name.ends_with(".eml") {
                            attachments.push(AttachmentData {
                                filename: sanitize_filename(name),
                                data: nested.raw_message.to_vec(),
                            });
                        }
                    }
                }
                PartType::Text(text) if !is_attachment_disposition => {
                    body_parts.push(BodyPart {
                        content: text.to_string(),
                        is_html: false,
                    });
                }
                PartType::Html(html) if !is_attachment_disposition => {
                    body_parts.push(BodyPart {
                        content: html.to_string(),
                        is_html: true,
                    });
                }
                PartType::Text(text) => attachments.push(AttachmentData {
                    filename: attachment_filename(part),
                    data: text.as_bytes().to_vec(),
                }),
                PartType::Html(html) => attachments.push(AttachmentData {
                    filename: attachment_filename(part),
                    data: html.as_bytes().to_vec(),
                }),
                PartType::Binary(data) | PartType::InlineBinary(data) => {
                    // Binary parts count as attachments when they carry
                    // either an attachment disposition or a filename.
                    if is_attachment_disposition || part.attachment_name().is_some() {
                        attachments.push(AttachmentData {
                            filename: attachment_filename(part),
                            data: data.to_vec(),
                        });
                    }
                }
                PartType::Multipart(_) => {}
            }
        }

        let date = message.date();
        ParsedMessage {
            subject: message.subject().unwrap_or_default().to_string(),
            sender: message
                .from()
                .and_then(|a| a.first().map(format_address))
                .unwrap_or_default(),
            recipients: message
                .to()
                .map(|a| a.iter().map(format_address).collect::<Vec<_>>().join(", "))
                .unwrap_or_default(),
            cc: message
                .cc()
                .map(|a| a.iter().map(format_address).collect::<Vec<_>>().join(", "))
                .unwrap_or_default(),
            bcc: message
                .bcc()
                .map(|a| a.iter().map(format_address).collect::<Vec<_>>().join(", "))
                .unwrap_or_default(),
            message_id: message.message_id().map(str::to_string),
            date: date.map(|d| d.to_rfc3339()),
            date_parts: date.map(|d| (d.year, d.month, d.day, d.hour, d.minute, d.second)),
            headers,
            body_parts,
            attachments,
            raw_size: raw.len(),
        }
    }
}

/// Best-effort raw key/value header dump for undecodable messages.
fn fallback_parse(raw: &[u8]) -> ParsedMessage {
    let text = String::from_utf8_lossy(raw);
    let mut headers = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let header = |wanted: &str| -> String {
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    };

    ParsedMessage {
        subject: header("Subject"),
        sender: header("From"),
        recipients: header("To"),
        cc: header("Cc"),
        bcc: header("Bcc"),
        message_id: None,
        date: None,
        date_parts: None,
        headers,
        body_parts: Vec::new(),
        attachments: Vec::new(),
        raw_size: raw.len(),
    }
}

fn attachment_filename(part: &mail_parser::MessagePart) -> String {
    let raw = part
        .attachment_name()
        .or_else(|| part.content_type().and_then(|ct| ct.attribute("name")))
        .unwrap_or("attachment");
    sanitize_filename(raw)
}

/// Keeps alphanumerics (including CJK), `-`, `_`, `.` and spaces;
/// everything else becomes `_`.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ' ');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

/// HTML to plain text. Plain input passes through mostly unchanged.
fn strip_html(content: &str) -> String {
    match htmd::convert(content) {
        Ok(text) => text,
        Err(_) => content.to_string(),
    }
}

fn format_address(addr: &mail_parser::Addr) -> String {
    if let Some(name) = addr.name() {
        format!("{} <{}>", name, addr.address().unwrap_or_default())
    } else {
        addr.address().unwrap_or_default().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: bob@example.com\r\n\
Subject: Annual report\r\n\
Date: Wed, 10 Jan 2024 08:30:00 +0000\r\n\
Message-ID: <m1@example.com>\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
quarterly numbers attached\r\n";

    fn multipart_with_attachment() -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(
            b"From: alice@example.com\r\n\
To: bob@example.com\r\n\
Subject: docs\r\n\
Date: Wed, 10 Jan 2024 08:30:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
\r\n\
--XX\r\n\
Content-Type: text/plain\r\n\
\r\n\
see attachment\r\n\
--XX\r\n\
Content-Type: application/pdf; name=\"A.pdf\"\r\n\
Content-Disposition: attachment; filename=\"A.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--XX--\r\n",
        );
        raw
    }

    #[test]
    fn test_parse_simple_message() {
        let parsed = MessageParser::new().parse(SIMPLE);
        assert_eq!(parsed.subject, "Annual report");
        assert!(parsed.sender.contains("alice@example.com"));
        assert_eq!(parsed.recipients, "bob@example.com");
        assert_eq!(parsed.message_id.as_deref(), Some("m1@example.com"));
        assert_eq!(parsed.body_parts.len(), 1);
        assert!(parsed.body_text().contains("quarterly numbers"));
        assert_eq!(parsed.raw_size, SIMPLE.len());
    }

    #[test]
    fn test_parse_attachment() {
        let parsed = MessageParser::new().parse(&multipart_with_attachment());
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].filename, "A.pdf");
        assert!(parsed.attachments[0].data.starts_with(b"%PDF"));
        // The attachment must not leak into the body.
        assert_eq!(parsed.body_parts.len(), 1);
    }

    #[test]
    fn test_body_index_heuristic() {
        let mk = |n: usize| ParsedMessage {
            headers: Vec::new(),
            subject: String::new(),
            sender: String::new(),
            recipients: String::new(),
            cc: String::new(),
            bcc: String::new(),
            message_id: None,
            date: None,
            date_parts: None,
            body_parts: (0..n)
                .map(|i| BodyPart {
                    content: format!("[{i}]"),
                    is_html: false,
                })
                .collect(),
            attachments: Vec::new(),
            raw_size: 0,
        };

        assert_eq!(mk(0).selected_body(), "");
        assert_eq!(mk(1).selected_body(), "[0]");
        assert_eq!(mk(2).selected_body(), "[0][1]");
        // n=3: index 3/2-1 = 0
        assert_eq!(mk(3).selected_body(), "[0]");
        // n=4: index 1
        assert_eq!(mk(4).selected_body(), "[0][1]");
        // n=6: index 2
        assert_eq!(mk(6).selected_body(), "[0][1][2]");
    }

    #[test]
    fn test_filters_are_case_sensitive_substrings() {
        let parsed = MessageParser::new().parse(SIMPLE);
        assert!(parsed.matches_subject(None));
        assert!(parsed.matches_subject(Some("Annual")));
        assert!(!parsed.matches_subject(Some("annual")));
        assert!(parsed.matches_sender(Some("alice@")));
        assert!(!parsed.matches_sender(Some("carol@")));
    }

    #[test]
    fn test_attachments_matching_keyword() {
        let parsed = MessageParser::new().parse(&multipart_with_attachment());
        assert_eq!(parsed.attachments_matching(None).len(), 1);
        assert_eq!(parsed.attachments_matching(Some(".pdf")).len(), 1);
        assert!(parsed.attachments_matching(Some(".zip")).is_empty());
    }

    #[test]
    fn test_eml_filename() {
        let parsed = MessageParser::new().parse(SIMPLE);
        let name = parsed.eml_filename();
        assert!(name.starts_with("Annual_report_20240110_083000_"));
        assert!(name.ends_with(".eml"));
        assert!(!name.contains('<'));
        assert!(!name.contains(' '));
    }

    #[test]
    fn test_undecodable_message_degrades_to_header_dump() {
        let garbage = b"Subject: broken\xff\xfe\r\nFrom: x@y\r\n\r\n\xff\xfe\xfd";
        let parsed = MessageParser::new().parse(garbage);
        // Whichever path handled it, the subject must survive.
        assert!(parsed.subject.contains("broken"));
        assert_eq!(parsed.raw_size, garbage.len());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("a/b\\c.pdf"), "a_b_c.pdf");
        assert_eq!(sanitize_filename("年度报告.docx"), "年度报告.docx");
        assert_eq!(sanitize_filename(""), "attachment");
    }

    #[test]
    fn test_html_body_stripped() {
        let raw = b"From: a@b\r\nSubject: h\r\nContent-Type: text/html\r\n\r\n<html><body><p>hello <b>world</b></p></body></html>\r\n";
        let parsed = MessageParser::new().parse(raw);
        let text = parsed.body_text();
        assert!(text.contains("hello"));
        assert!(text.contains("world"));
        assert!(!text.contains("<p>"));
    }
}
