//! HTTP client for the hosting platform's widget endpoints.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; subcal/0.1)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Events surface at most 50 entries per page; a short page ends pagination.
pub const PAGE_SIZE: usize = 50;

static WID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)var\s+wid\s*=\s*(\d+)").unwrap());
static WID_FALLBACK_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)website_id["']?\s*[:=]\s*["']?(\d+)"#,
        r#"(?i)data-website-id=["'](\d+)["']"#,
        r#"(?i)websiteId["']?\s*[:=]\s*["']?(\d+)"#,
        r"(?i)/controllers/events\?.*website_id=(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// A resolved tenant: the numeric widget id plus the site we scrape it from.
#[derive(Debug, Clone)]
pub struct SiteInfo {
    pub website_id: String,
    pub base_url: String,
    pub domain: String,
}

/// Client for the widget's unauthenticated endpoints and the platform's
/// authenticated event-details API. Endpoints are injectable so tests can
/// point everything at a local server.
pub struct UpstreamClient {
    http: reqwest::Client,
    scheme: String,
    hosting_suffix: String,
    events_api: String,
    details_api: String,
    hosted_iframe_re: Regex,
    widget_iframe_re: Regex,
}

impl UpstreamClient {
    pub fn new() -> Result<Self> {
        Self::with_endpoints(
            "https",
            "snappages.site",
            "https://site.snappages.site/controllers/events",
            "https://core.subsplash.com/events/v2/events",
            "subsplash.com",
        )
    }

    pub fn with_endpoints(
        scheme: &str,
        hosting_suffix: &str,
        events_api: &str,
        details_api: &str,
        widget_host: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let hosted_iframe_re = Regex::new(&format!(
            r#"(?i)<iframe[^>]*src=["']([^"']*{}[^"']*)["'][^>]*>"#,
            regex::escape(hosting_suffix)
        ))
        .context("bad hosting suffix")?;
        let widget_iframe_re = Regex::new(&format!(
            r#"src="([^"]*{}[^"]*)""#,
            regex::escape(widget_host)
        ))
        .context("bad widget host")?;
        Ok(UpstreamClient {
            http,
            scheme: scheme.to_string(),
            hosting_suffix: hosting_suffix.to_string(),
            events_api: events_api.to_string(),
            details_api: details_api.to_string(),
            hosted_iframe_re,
            widget_iframe_re,
        })
    }

    /// Site root for a tenant. A bare subdomain lives under the hosting
    /// platform's suffix; anything with a dot is a custom domain.
    pub fn site_base(&self, domain: &str) -> String {
        if domain.contains('.') {
            format!("{}://{}", self.scheme, domain)
        } else {
            format!("{}://{}.{}", self.scheme, domain, self.hosting_suffix)
        }
    }

    fn site_events_url(&self, domain: &str) -> String {
        format!("{}/events", self.site_base(domain))
    }

    /// Resolve a tenant's widget id by scraping its events page. Returns
    /// `None` for unreachable sites and sites without a recognizable widget;
    /// callers treat that as "no calendar here", never an error.
    pub async fn discover_site_info(&self, domain: &str) -> Option<SiteInfo> {
        let events_url = self.site_events_url(domain);
        debug!(%events_url, "discovering site info");

        let html = match self.fetch_text(&events_url).await {
            Ok(html) => html,
            Err(err) => {
                debug!(domain, %err, "events page fetch failed during discovery");
                return None;
            }
        };

        if let Some(website_id) = extract_website_id(&html) {
            return Some(SiteInfo {
                website_id,
                base_url: self.site_base(domain),
                domain: domain.to_string(),
            });
        }

        // Sites embedding the hosted widget in an iframe expose the id one
        // hop away; the iframe's hostname becomes the resolved tenant.
        for captures in self.hosted_iframe_re.captures_iter(&html) {
            let iframe_url = &captures[1];
            debug!(iframe_url, "found hosted calendar iframe");
            let iframe_html = match self.fetch_text(iframe_url).await {
                Ok(html) => html,
                Err(err) => {
                    debug!(iframe_url, %err, "iframe fetch failed");
                    continue;
                }
            };
            if let Some(website_id) = WID_RE.captures(&iframe_html).map(|c| c[1].to_string()) {
                let Some(iframe_domain) = url::Url::parse(iframe_url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                else {
                    continue;
                };
                return Some(SiteInfo {
                    website_id,
                    base_url: format!("{}://{}", self.scheme, iframe_domain),
                    domain: iframe_domain,
                });
            }
        }

        debug!(domain, "no website id found");
        None
    }

    /// Fetch one page of raw event objects for a month (`YYYY-MM`).
    pub async fn fetch_events_page(
        &self,
        domain: &str,
        website_id: &str,
        month: &str,
        page: u32,
    ) -> Result<Vec<Value>> {
        let response = self
            .http
            .get(&self.events_api)
            .query(&[
                ("action", "getEvents"),
                ("website_id", website_id),
                ("page", &page.to_string()),
                ("date", month),
                ("embed", "false"),
            ])
            .header("Accept", "application/json")
            .header("Referer", self.site_events_url(domain))
            .send()
            .await
            .with_context(|| format!("events request failed for {month} page {page}"))?;

        if !response.status().is_success() {
            bail!(
                "events endpoint returned {} for {month} page {page}",
                response.status()
            );
        }

        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("events payload for {month} page {page} is not JSON"))?;

        // The payload array has moved between keys across widget versions
        let events = ["events", "data", "items"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_array).cloned())
            .unwrap_or_default();

        if let Some(first) = events.first() {
            let has_title = ["title", "name", "event_name"]
                .iter()
                .any(|f| first.get(*f).is_some());
            if !has_title {
                warn!(domain, month, "events carry no recognizable title field");
            }
        }

        Ok(events)
    }

    /// Fetch a single event's full record from the authenticated details API.
    /// Failures are absorbed; enhancement never blocks a feed.
    pub async fn fetch_event_details(&self, short_code: &str, token: &str) -> Option<Value> {
        let result = self
            .http
            .get(&self.details_api)
            .query(&[
                ("filter[short_code]", short_code),
                ("include", "location.address,images,form,form.pricing-strategy"),
            ])
            .header("accept", "application/vnd.api+json")
            .header("authorization", format!("Bearer {token}"))
            .header("x-sap-service", "web-client")
            .send()
            .await;

        let response = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(short_code, status = %r.status(), "details request rejected");
                return None;
            }
            Err(err) => {
                debug!(short_code, %err, "details request failed");
                return None;
            }
        };

        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(err) => {
                debug!(short_code, %err, "details payload is not JSON");
                return None;
            }
        };

        payload
            .pointer("/_embedded/events/0")
            .cloned()
            .filter(|v| !v.is_null())
    }

    /// Fetch a page of HTML or widget markup.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("request failed for {url}"))?;
        if !response.status().is_success() {
            bail!("{url} returned {}", response.status());
        }
        Ok(response.text().await?)
    }

    /// Find the platform widget iframe inside an event detail page.
    pub fn find_widget_iframe<'a>(&self, html: &'a str) -> Option<&'a str> {
        self.widget_iframe_re
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

fn extract_website_id(html: &str) -> Option<String> {
    if let Some(captures) = WID_RE.captures(html) {
        return Some(captures[1].to_string());
    }
    WID_FALLBACK_RES
        .iter()
        .find_map(|re| re.captures(html).map(|c| c[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_website_id_wid_pattern() {
        let html = "<script>var wid = 12345;</script>";
        assert_eq!(extract_website_id(html).as_deref(), Some("12345"));
    }

    #[test]
    fn test_extract_website_id_fallbacks() {
        assert_eq!(
            extract_website_id(r#"{"website_id": "987"}"#).as_deref(),
            Some("987")
        );
        assert_eq!(
            extract_website_id(r#"<div data-website-id="42"></div>"#).as_deref(),
            Some("42")
        );
        assert_eq!(
            extract_website_id("websiteId: 7").as_deref(),
            Some("7")
        );
        assert_eq!(
            extract_website_id("src=/controllers/events?action=getEvents&website_id=55").as_deref(),
            Some("55")
        );
        assert_eq!(extract_website_id("<html>nothing here</html>"), None);
    }

    #[test]
    fn test_site_base_custom_domain_vs_subdomain() {
        let client = UpstreamClient::new().unwrap();
        assert_eq!(client.site_base("gracechurch.org"), "https://gracechurch.org");
        assert_eq!(
            client.site_base("gracechurch"),
            "https://gracechurch.snappages.site"
        );
    }

    #[tokio::test]
    async fn test_discovery_follows_hosted_iframe() {
        let server = MockServer::start().await;
        let client = UpstreamClient::with_endpoints(
            "http",
            "127.0.0.1",
            &format!("{}/controllers/events", server.uri()),
            &format!("{}/events/v2/events", server.uri()),
            "widget.test",
        )
        .unwrap();
        let domain = server.uri().trim_start_matches("http://").to_string();

        // The events page carries no id of its own, only the hosted iframe
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<html><iframe src="{}/hosted/calendar" width="100%"></iframe></html>"#,
                server.uri()
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hosted/calendar"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<script>var wid = 777;</script>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let site = client.discover_site_info(&domain).await.expect("site info");

        // The iframe's hostname becomes the resolved tenant
        assert_eq!(site.website_id, "777");
        assert_eq!(site.domain, "127.0.0.1");
        assert_eq!(site.base_url, "http://127.0.0.1");
    }

    #[test]
    fn test_find_widget_iframe() {
        let client = UpstreamClient::new().unwrap();
        let html = r#"<iframe src="https://widget.subsplash.com/embed/abc"></iframe>"#;
        assert_eq!(
            client.find_widget_iframe(html),
            Some("https://widget.subsplash.com/embed/abc")
        );
        assert_eq!(client.find_widget_iframe("<p>no iframe</p>"), None);
    }
}
