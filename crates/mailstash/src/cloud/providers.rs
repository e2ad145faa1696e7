//! Cloud-attachment provider registry and per-provider descriptor parsers.
//!
//! Each mail provider embeds its large-file ("cloud") attachments in the
//! HTML body as vendor-specific markup. The parsers here scrape that
//! markup into [`CloudFile`] descriptors: filename, size, expiry, and the
//! outside link that the resolver later turns into a direct download URL.
//!
//! The `expired` flag keeps its historical inverted meaning: `true` means
//! the link is still fetchable. A link whose expiry text is the literal
//! "unlimited" marker is always fetchable.

use std::fmt;
use std::sync::LazyLock;

use chrono::{Local, NaiveDateTime, TimeZone};
use log::warn;
use regex::Regex;

use super::error::CloudError;

/// One cloud attachment scraped from an HTML body.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudFile {
    pub provider: Provider,
    pub filename: String,
    /// Declared size in kilobytes, 0.0 when the markup does not carry one.
    pub size_kb: f64,
    /// Expiry text, normalized to `YYYY-MM-DD HH:MM:SS` where parseable.
    pub expire_time: String,
    /// Inverted by historical convention: `true` means still fetchable.
    pub expired: bool,
    pub outside_link: String,
}

impl CloudFile {
    /// Projected on-disk size in bytes, for capacity planning.
    pub fn size_bytes(&self) -> u64 {
        (self.size_kb * 1024.0).ceil() as u64
    }
}

/// A supported cloud-attachment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// QQ mail (mail.qq.com).
    Qq,
    /// Netease 163 and 126 mail, which share markup and endpoints.
    Netease,
    /// Gmail with Google Drive chips.
    Gmail,
    /// Outlook with OneDrive share links.
    Outlook,
    /// 189 (Tianyi) cloud mail.
    Cloud189,
    /// RUC enterprise mail (Netease Qiye edisk).
    Ruc,
    /// Sina mail file center.
    Sina,
}

impl Provider {
    pub const ALL: [Provider; 7] = [
        Provider::Qq,
        Provider::Netease,
        Provider::Gmail,
        Provider::Outlook,
        Provider::Cloud189,
        Provider::Ruc,
        Provider::Sina,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Qq => "QQ",
            Provider::Netease => "163/126",
            Provider::Gmail => "Gmail",
            Provider::Outlook => "Outlook",
            Provider::Cloud189 => "189",
            Provider::Ruc => "RUC",
            Provider::Sina => "Sina",
        }
    }

    /// Scrapes every cloud attachment of this provider out of an HTML body.
    pub fn parse_cloud_links(&self, html: &str) -> Vec<CloudFile> {
        match self {
            Provider::Qq => parse_qq(html),
            Provider::Netease => parse_netease(html),
            Provider::Gmail => parse_gmail(html),
            Provider::Outlook => parse_outlook(html),
            Provider::Cloud189 => parse_189(html),
            Provider::Ruc => parse_ruc(html),
            Provider::Sina => parse_sina(html),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps outside links to providers by URL shape and fans HTML bodies out
/// to every provider parser. Registration is explicit and exhaustive: one
/// entry per supported provider, no fallthrough.
pub struct ProviderRegistry {
    entries: Vec<(Provider, Regex)>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let table = [
            (
                Provider::Netease,
                r"^https://mail\.163\.com/large-attachment-download/index\.html\?p=",
            ),
            (
                Provider::Qq,
                r"^https://mail\.qq\.com/cgi-bin/ftnExs_download\?k=",
            ),
            (
                Provider::Gmail,
                r"^https://drive\.google\.com/(file/d/|open\?id=)",
            ),
            (Provider::Outlook, r"^https://1drv\.ms/"),
            (
                Provider::Cloud189,
                r"^https://download\.cloud\.189\.cn/file/downloadFile\.action\?dt=",
            ),
            (
                Provider::Ruc,
                r"^https://edisk\.qiye\.163\.com/api/biz/attachment/download\?identity=",
            ),
            (
                Provider::Sina,
                r"^https://mail\.sina\.com\.cn/filecenter/download\.php\?id=",
            ),
        ];
        let entries = table
            .into_iter()
            .map(|(provider, pattern)| {
                // Patterns are compile-time constants.
                (provider, Regex::new(pattern).unwrap())
            })
            .collect();
        Self { entries }
    }

    /// Identifies the provider an outside link belongs to.
    pub fn identify(&self, outside_link: &str) -> Option<Provider> {
        self.entries
            .iter()
            .find(|(_, pattern)| pattern.is_match(outside_link))
            .map(|(provider, _)| *provider)
    }

    /// Like [`identify`](Self::identify), but a link no pattern matches
    /// is an error. Entry point for resolving a bare link without an
    /// HTML body to scrape.
    pub fn provider_for(&self, outside_link: &str) -> Result<Provider, CloudError> {
        self.identify(outside_link)
            .ok_or_else(|| CloudError::UnsupportedProvider(outside_link.to_string()))
    }

    /// Runs every provider parser over one HTML body and concatenates the
    /// descriptors found. A body normally matches at most one provider's
    /// markup, so this is how classification discovers which one.
    pub fn parse_cloud_links(&self, html: &str) -> Vec<CloudFile> {
        Provider::ALL
            .iter()
            .flat_map(|provider| provider.parse_cloud_links(html))
            .collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

const UNLIMITED_EXPIRY: &str = "无限期";
const DATE_FMT_CN: &str = "%Y年%m月%d日 %H:%M";
const DATE_FMT_ISO: &str = "%Y-%m-%d %H:%M:%S";

// Pre-compiled regexes for scraping provider markup.
static RE_HREF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"]+)""#).unwrap());
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

static RE_QQ_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<div\b[^>]*class="[^"]*bigatt_bt[^"]*"[^>]*>"#).unwrap());
static RE_TITLE_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"title="([^"]*)""#).unwrap());
static RE_QQ_FILENAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+?)\s*[\r\n]").unwrap());
static RE_QQ_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"文件大小：([\d.]+[KM])").unwrap());
static RE_QQ_EXPIRE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"到期时间：([^\s]+ [^\s]+|无限期)").unwrap());

static RE_NETEASE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<div\b[^>]*style="[^"]*clear:both;height:36px;padding:6px 4px[^"]*"[^>]*>"#)
        .unwrap()
});
static RE_DOWNLOAD_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<a\b[^>]*\bdownload=[^>]*>(.*?)</a>").unwrap());
static RE_FILENAME_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"filename="([^"]*)""#).unwrap());
static RE_NETEASE_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<span\b[^>]*style="[^"]*color:#bbb[^"]*"[^>]*>(.*?)</span>"#).unwrap()
});

static RE_GMAIL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<div\b[^>]*class="[^"]*gmail_chip gmail_drive_chip[^"]*"[^>]*>"#).unwrap()
});
static RE_GMAIL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<span\b[^>]*dir="ltr"[^>]*>(.*?)</span>"#).unwrap());

static RE_OUTLOOK_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a\b[^>]*href="(https://1drv\.ms/[^"]*)"[^>]*>(.*?)</a>"#).unwrap()
});

static RE_189_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<div\b[^>]*style="[^"]*clear:both[^"]*"[^>]*>"#).unwrap());
static RE_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<a\b[^>]*>(.*?)</a>").unwrap());
static RE_ALT_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"alt="([^"]*)""#).unwrap());
static RE_189_EXPIRED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"expired=(\d+)").unwrap());
static RE_PAREN_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((\d+)\)").unwrap());

static RE_RUC_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<div\b[^>]*style="[^"]*width: 392px[^"]*"[^>]*>"#).unwrap());
static RE_RUC_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<div\b[^>]*style="[^"]*opacity: 0.4[^"]*"[^>]*>(.*?)</div>"#).unwrap()
});

static RE_SINA_CONTAINER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<div\b[^>]*style="[^"]*margin-top: 20px[^"]*"[^>]*>"#).unwrap());
static RE_SINA_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<div\b[^>]*style="[^"]*margin-bottom: 2px[^"]*"[^>]*>"#).unwrap()
});
static RE_SINA_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<span\b[^>]*style="[^"]*font-weight: bold[^"]*"[^>]*>(.*?)</span>"#).unwrap()
});
static RE_SINA_EXPIRE_DIV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<div\b[^>]*style="[^"]*font-size: 13px[^"]*"[^>]*>(.*?)</div>"#).unwrap()
});
static RE_PAREN_TEXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((.*?)\)").unwrap());
static RE_SINA_EXPIRE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"有效时间到：(.*?)\)").unwrap());

/// Splits `html` into slices, each starting at one match of `open_tag` and
/// running to the next match (or end of input). Good enough for the flat,
/// repetitive markup mail providers emit.
fn blocks<'a>(html: &'a str, open_tag: &Regex) -> Vec<&'a str> {
    let starts: Vec<usize> = open_tag.find_iter(html).map(|m| m.start()).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(html.len());
            &html[start..end]
        })
        .collect()
}

fn strip_tags(fragment: &str) -> String {
    decode_entities(RE_TAG.replace_all(fragment, "").trim())
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// Converts a size string with a K/M/G suffix to kilobytes. Unknown
/// suffixes collapse to 0.0 rather than failing the whole parse.
fn size_to_kb(size_str: &str) -> f64 {
    let s = size_str.trim().to_lowercase();
    let (digits, factor) = if let Some(d) = s.strip_suffix('k') {
        (d, 1.0)
    } else if let Some(d) = s.strip_suffix('m') {
        (d, 1024.0)
    } else if let Some(d) = s.strip_suffix('g') {
        (d, 1024.0 * 1024.0)
    } else {
        warn!("Unrecognized size string '{}'", size_str);
        return 0.0;
    };
    digits.trim().parse::<f64>().unwrap_or(0.0) * factor
}

/// `true` when the expiry lies in the future, i.e. the link is still
/// fetchable. The "unlimited" marker is always fetchable; unparseable
/// dates are treated as not fetchable.
fn still_fetchable(expire_str: &str, format: &str) -> bool {
    if expire_str == UNLIMITED_EXPIRY {
        return true;
    }
    match NaiveDateTime::parse_from_str(expire_str, format) {
        Ok(target) => target > Local::now().naive_local(),
        Err(_) => {
            warn!("Unparseable expiry '{}'", expire_str);
            false
        }
    }
}

fn parse_qq(html: &str) -> Vec<CloudFile> {
    let mut files = Vec::new();
    for block in blocks(html, &RE_QQ_BLOCK) {
        let Some(link) = RE_HREF.captures(block).map(|c| c[1].to_string()) else {
            continue;
        };
        // Filename, size, and expiry all live in the block's title attribute.
        let title = RE_TITLE_ATTR
            .captures(block)
            .map(|c| decode_entities(&c[1]))
            .unwrap_or_default();
        let filename = RE_QQ_FILENAME
            .captures(&title)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let size_kb = RE_QQ_SIZE
            .captures(&title)
            .map(|c| size_to_kb(&c[1]))
            .unwrap_or(0.0);
        let expire_time = RE_QQ_EXPIRE
            .captures(&title)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let expired = still_fetchable(&expire_time, DATE_FMT_CN);
        files.push(CloudFile {
            provider: Provider::Qq,
            filename,
            size_kb,
            expire_time,
            expired,
            outside_link: decode_entities(&link),
        });
    }
    files
}

fn parse_netease(html: &str) -> Vec<CloudFile> {
    let mut files = Vec::new();
    for block in blocks(html, &RE_NETEASE_BLOCK) {
        let Some(anchor) = RE_DOWNLOAD_ANCHOR.find(block) else {
            continue;
        };
        let anchor = anchor.as_str();
        let filename = RE_FILENAME_ATTR
            .captures(anchor)
            .map(|c| decode_entities(c[1].trim()))
            .unwrap_or_default();
        let Some(link) = RE_HREF.captures(anchor).map(|c| decode_entities(&c[1])) else {
            continue;
        };

        let mut size_kb = 0.0;
        let mut expire_time = String::new();
        let mut expired = false;
        if let Some(info) = RE_NETEASE_INFO.captures(block) {
            // Looks like "(20.49K, 2024年8月4日 23:48到期)".
            let text = strip_tags(&info[1]);
            let parts: Vec<&str> = text.split(',').collect();
            if parts.len() == 2 {
                size_kb = size_to_kb(&parts[0].trim().replace('(', ""));
                let raw = parts[1].trim().replace("到期)", "");
                expired = still_fetchable(&raw, DATE_FMT_CN);
                expire_time = match NaiveDateTime::parse_from_str(&raw, DATE_FMT_CN) {
                    Ok(date) => date.format(DATE_FMT_ISO).to_string(),
                    Err(_) => raw,
                };
            }
        }

        files.push(CloudFile {
            provider: Provider::Netease,
            filename,
            size_kb,
            expire_time,
            expired,
            outside_link: link,
        });
    }
    files
}

fn parse_gmail(html: &str) -> Vec<CloudFile> {
    let mut files = Vec::new();
    for block in blocks(html, &RE_GMAIL_BLOCK) {
        let filename = RE_GMAIL_NAME
            .captures(block)
            .map(|c| strip_tags(&c[1]))
            .unwrap_or_else(|| "Unknown".to_string());
        let outside_link = RE_HREF
            .captures(block)
            .map(|c| decode_entities(&c[1]))
            .unwrap_or_else(|| "No Link".to_string());
        // Drive chips carry neither a size nor an expiry.
        files.push(CloudFile {
            provider: Provider::Gmail,
            filename,
            size_kb: 0.0,
            expire_time: "No Expiry".to_string(),
            expired: true,
            outside_link,
        });
    }
    files
}

fn parse_outlook(html: &str) -> Vec<CloudFile> {
    RE_OUTLOOK_ANCHOR
        .captures_iter(html)
        .map(|c| CloudFile {
            provider: Provider::Outlook,
            filename: strip_tags(&c[2]).replace(['\r', '\n'], ""),
            size_kb: 0.0,
            expire_time: "NoExpire".to_string(),
            expired: true,
            outside_link: decode_entities(&c[1]),
        })
        .collect()
}

fn parse_189(html: &str) -> Vec<CloudFile> {
    let mut files = Vec::new();
    for block in blocks(html, &RE_189_BLOCK) {
        let Some(anchor) = RE_ANCHOR.captures(block) else {
            continue;
        };
        let tag = anchor.get(0).map(|m| m.as_str()).unwrap_or_default();
        let Some(link) = RE_HREF.captures(tag).map(|c| decode_entities(&c[1])) else {
            continue;
        };
        let filename = strip_tags(&anchor[1]);

        // Expiry rides on the link as a millisecond timestamp.
        let mut expire_time = String::new();
        let mut expired = false;
        if let Some(ms) = RE_189_EXPIRED
            .captures(&link)
            .and_then(|c| c[1].parse::<i64>().ok())
        {
            if let Some(target) = Local.timestamp_millis_opt(ms).single() {
                expire_time = target.format(DATE_FMT_ISO).to_string();
                expired = target > Local::now();
            }
        }

        // Size in bytes, from the anchor's alt attribute.
        let size_kb = RE_ALT_ATTR
            .captures(tag)
            .and_then(|alt| {
                RE_PAREN_DIGITS
                    .captures(&alt[1])
                    .and_then(|c| c[1].parse::<f64>().ok())
            })
            .map(|bytes| (bytes / 1024.0 * 100.0).ceil() / 100.0)
            .unwrap_or(0.0);

        files.push(CloudFile {
            provider: Provider::Cloud189,
            filename,
            size_kb,
            expire_time,
            expired,
            outside_link: link,
        });
    }
    files
}

fn parse_ruc(html: &str) -> Vec<CloudFile> {
    let mut files = Vec::new();
    for block in blocks(html, &RE_RUC_BLOCK) {
        let Some(anchor) = RE_DOWNLOAD_ANCHOR.captures(block) else {
            continue;
        };
        let tag = anchor.get(0).map(|m| m.as_str()).unwrap_or_default();
        let Some(link) = RE_HREF.captures(tag).map(|c| decode_entities(&c[1])) else {
            continue;
        };
        let filename = strip_tags(&anchor[1]);

        let mut size_kb = 0.0;
        let mut expire_time = String::new();
        let mut expired = false;
        if let Some(info) = RE_RUC_INFO.captures(block) {
            // Looks like "20.49K | 过期时间：2024年8月4日 23:48".
            let text = strip_tags(&info[1]);
            let parts: Vec<&str> = text.split('|').collect();
            if parts.len() == 2 {
                size_kb = size_to_kb(parts[0].trim());
                expire_time = parts[1].replace("过期时间：", "").trim().to_string();
                expired = still_fetchable(&expire_time, DATE_FMT_CN);
            }
        }

        files.push(CloudFile {
            provider: Provider::Ruc,
            filename,
            size_kb,
            expire_time,
            expired,
            outside_link: link,
        });
    }
    files
}

fn parse_sina(html: &str) -> Vec<CloudFile> {
    let mut files = Vec::new();
    for container in blocks(html, &RE_SINA_CONTAINER) {
        // One expiry line covers every file in the container.
        let expire_time = RE_SINA_EXPIRE_DIV
            .captures(container)
            .and_then(|div| {
                let text = strip_tags(&div[1]);
                RE_SINA_EXPIRE.captures(&text).map(|c| c[1].to_string())
            })
            .unwrap_or_default();
        let expired = still_fetchable(&expire_time, DATE_FMT_ISO);

        for block in blocks(container, &RE_SINA_FILE) {
            let Some(name_span) = RE_SINA_NAME.captures(block) else {
                continue;
            };
            // Name span looks like "report.pdf (1.2M)".
            let full_text = strip_tags(&name_span[1]);
            let size_kb = RE_PAREN_TEXT
                .captures(&full_text)
                .map(|c| size_to_kb(&c[1]))
                .unwrap_or(0.0);
            let filename = match full_text.rfind('(') {
                Some(idx) => full_text[..idx].trim().to_string(),
                None => full_text.clone(),
            };
            let Some(link) = RE_HREF.captures(block).map(|c| decode_entities(&c[1])) else {
                continue;
            };

            files.push(CloudFile {
                provider: Provider::Sina,
                filename,
                size_kb,
                expire_time: expire_time.clone(),
                expired,
                outside_link: link,
            });
        }
    }
    files
}
