//! Turns a provider outside link into a direct download URL.
//!
//! Providers hide the actual file behind redirect chains, token
//! endpoints, or interstitial pages. Redirects are chased manually so
//! Set-Cookie headers can be accumulated across hops; some providers
//! (QQ in particular) require those cookies on the final download
//! request.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use log::{debug, warn};
use regex::Regex;
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use reqwest::{redirect, Client, Response, Url};

use super::error::{CloudError, Result};
use super::providers::{Provider, ProviderRegistry};

/// Redirect chains longer than this are treated as broken.
const MAX_REDIRECT_HOPS: usize = 10;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const NETEASE_PREPARE_URL: &str = "https://mail.163.com/filehub/bg/dl/prepare";

// Interstitial pages embed the real file URL in inline script.
static RE_QQ_FILE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"var url = "(https://[^"]+)""#).unwrap());
static RE_GDRIVE_FILE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://drive\.usercontent\.google\.com/uc\?id\\u003d([-\w]+)\\u0026export\\u003ddownload")
        .unwrap()
});

/// A resolved direct download: the final URL plus any cookies the
/// download request must carry.
#[derive(Debug, Clone)]
pub struct ResolvedDownload {
    pub url: String,
    pub cookie: Option<String>,
}

/// Resolves outside links into direct download URLs, provider by
/// provider.
pub struct CloudResolver {
    http: Client,
}

impl CloudResolver {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { http })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Resolves a bare outside link: identifies its provider from the
    /// registry's URL patterns first, erroring when none matches.
    pub async fn resolve_link(
        &self,
        registry: &ProviderRegistry,
        outside_link: &str,
    ) -> Result<ResolvedDownload> {
        let provider = registry.provider_for(outside_link)?;
        self.resolve(provider, outside_link).await
    }

    /// Resolves one outside link for its provider.
    pub async fn resolve(&self, provider: Provider, outside_link: &str) -> Result<ResolvedDownload> {
        debug!("Resolving {} link: {}", provider, outside_link);
        match provider {
            Provider::Netease => self.resolve_netease(outside_link).await,
            Provider::Qq => self.resolve_qq(outside_link).await,
            Provider::Gmail => self.resolve_gmail(outside_link).await,
            Provider::Cloud189 | Provider::Ruc => self.resolve_by_location(outside_link).await,
            Provider::Sina => self.resolve_sina(outside_link).await,
            // OneDrive share links need an interactive token exchange.
            Provider::Outlook => Err(CloudError::ResolutionUnsupported(Provider::Outlook.as_str())),
        }
    }

    /// Netease publishes a prepare endpoint: POST the link key, get the
    /// direct URL back as JSON.
    async fn resolve_netease(&self, outside_link: &str) -> Result<ResolvedDownload> {
        let url = Url::parse(outside_link)
            .map_err(|_| CloudError::MalformedLink(outside_link.to_string()))?;
        let link_key = url
            .query_pairs()
            .find(|(key, _)| key == "file")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| CloudError::MalformedLink(outside_link.to_string()))?;

        let response = self
            .http
            .post(NETEASE_PREPARE_URL)
            .json(&serde_json::json!({ "linkKey": link_key }))
            .send()
            .await?;
        let body: serde_json::Value = response.json().await?;
        let download_url = body
            .pointer("/data/downloadUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                CloudError::ResolveFailed("prepare response has no downloadUrl".to_string())
            })?;
        Ok(ResolvedDownload {
            url: download_url.to_string(),
            cookie: None,
        })
    }

    /// QQ bounces through one redirect to an interstitial page whose
    /// inline script holds the file URL; the final hop sets cookies the
    /// download must present.
    async fn resolve_qq(&self, outside_link: &str) -> Result<ResolvedDownload> {
        let first = self.http.get(outside_link).send().await?;
        let interstitial = location_of(&first, outside_link)?;

        let page = self.http.get(&interstitial).send().await?.text().await?;
        let file_url = RE_QQ_FILE_URL
            .captures(&page)
            .map(|c| c[1].replace("\\x26", "&"))
            .ok_or_else(|| {
                CloudError::ResolveFailed("QQ interstitial page has no file URL".to_string())
            })?;

        let (final_url, cookies) = self.follow_redirects(&file_url).await?;
        Ok(ResolvedDownload {
            url: final_url,
            cookie: cookie_header(&cookies),
        })
    }

    /// Drive share links redirect to a viewer page that embeds the
    /// usercontent download URL in escaped script.
    async fn resolve_gmail(&self, outside_link: &str) -> Result<ResolvedDownload> {
        let (viewer_url, _) = self.follow_redirects(outside_link).await?;
        let page = self.http.get(&viewer_url).send().await?.text().await?;
        let file_id = RE_GDRIVE_FILE_ID
            .captures(&page)
            .map(|c| c[1].to_string())
            .ok_or_else(|| {
                CloudError::ResolveFailed("Drive viewer page has no download URL".to_string())
            })?;
        let download_url =
            format!("https://drive.usercontent.google.com/uc?id={file_id}&export=download");
        let (final_url, cookies) = self.follow_redirects(&download_url).await?;
        Ok(ResolvedDownload {
            url: final_url,
            cookie: cookie_header(&cookies),
        })
    }

    /// Single-hop providers: the outside link answers with a Location
    /// header pointing straight at the file.
    async fn resolve_by_location(&self, outside_link: &str) -> Result<ResolvedDownload> {
        let response = self.http.get(outside_link).send().await?;
        Ok(ResolvedDownload {
            url: location_of(&response, outside_link)?,
            cookie: None,
        })
    }

    /// Sina answers a POST with the direct URL in Location.
    async fn resolve_sina(&self, outside_link: &str) -> Result<ResolvedDownload> {
        let response = self.http.post(outside_link).send().await?;
        Ok(ResolvedDownload {
            url: location_of(&response, outside_link)?,
            cookie: None,
        })
    }

    /// Chases a redirect chain hop by hop, carrying cookies forward:
    /// each hop's Set-Cookie headers are folded into the jar and sent
    /// on the next request. Returns the first non-3xx URL and the jar.
    async fn follow_redirects(&self, start: &str) -> Result<(String, BTreeMap<String, String>)> {
        let mut url = start.to_string();
        let mut cookies = BTreeMap::new();

        for _ in 0..MAX_REDIRECT_HOPS {
            let mut request = self.http.get(&url);
            if let Some(header) = cookie_header(&cookies) {
                request = request.header(COOKIE, header);
            }
            let response = request.send().await?;

            for value in response.headers().get_all(SET_COOKIE) {
                if let Ok(text) = value.to_str() {
                    collect_cookie(&mut cookies, text);
                }
            }

            if !response.status().is_redirection() {
                return Ok((url, cookies));
            }

            let next = location_of(&response, &url)?;
            debug!("Redirected to: {}", next);
            url = next;
        }

        warn!("Gave up after {} redirect hops from {}", MAX_REDIRECT_HOPS, start);
        Err(CloudError::TooManyRedirects {
            limit: MAX_REDIRECT_HOPS,
        })
    }
}

/// Extracts the Location header, resolving relative targets against the
/// request URL.
fn location_of(response: &Response, base: &str) -> Result<String> {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(CloudError::MissingLocation)?;
    match Url::parse(base).and_then(|b| b.join(location)) {
        Ok(absolute) => Ok(absolute.to_string()),
        Err(_) => Ok(location.to_string()),
    }
}

/// Folds one Set-Cookie header value into the jar, keeping only the
/// leading `name=value` pair of each cookie.
fn collect_cookie(jar: &mut BTreeMap<String, String>, header: &str) {
    for cookie in header.split(',') {
        let leading = cookie.split(';').next().unwrap_or("");
        if let Some((key, value)) = leading.split_once('=') {
            let (key, value) = (key.trim(), value.trim());
            if !key.is_empty() {
                jar.insert(key.to_string(), value.to_string());
            }
        }
    }
}

fn cookie_header(jar: &BTreeMap<String, String>) -> Option<String> {
    if jar.is_empty() {
        return None;
    }
    let pairs: Vec<String> = jar
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    Some(pairs.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_cookie_keeps_leading_pair() {
        let mut jar = BTreeMap::new();
        collect_cookie(&mut jar, "mail5k=6c9e1d58; Path=/; HttpOnly");
        collect_cookie(&mut jar, "sid=abc; Secure, tok=xyz; Path=/");
        assert_eq!(jar.get("mail5k").map(String::as_str), Some("6c9e1d58"));
        assert_eq!(jar.get("sid").map(String::as_str), Some("abc"));
        assert_eq!(jar.get("tok").map(String::as_str), Some("xyz"));
        assert_eq!(jar.len(), 3);
    }

    #[test]
    fn test_cookie_header_joins_pairs() {
        let mut jar = BTreeMap::new();
        assert_eq!(cookie_header(&jar), None);
        jar.insert("a".to_string(), "1".to_string());
        jar.insert("b".to_string(), "2".to_string());
        assert_eq!(cookie_header(&jar).as_deref(), Some("a=1; b=2"));
    }

    #[test]
    fn test_qq_file_url_pattern_unescapes() {
        let page = r#"<script>var url = "https://dl.mail.qq.com/ftn?k=1\x26code=2";</script>"#;
        let url = RE_QQ_FILE_URL
            .captures(page)
            .map(|c| c[1].replace("\\x26", "&"));
        assert_eq!(url.as_deref(), Some("https://dl.mail.qq.com/ftn?k=1&code=2"));
    }

    #[test]
    fn test_gdrive_pattern_extracts_file_id() {
        // Viewer pages carry the URL with script-escaped '=' and '&'.
        let page = r"var a = 'https://drive.usercontent.google.com/uc?id\u003d1-AbC_d\u0026export\u003ddownload'";
        let id = RE_GDRIVE_FILE_ID.captures(page).map(|c| c[1].to_string());
        assert_eq!(id.as_deref(), Some("1-AbC_d"));
    }
}
