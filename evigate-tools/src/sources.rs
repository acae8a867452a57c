//! Shared normalization helpers for retrieval tools.
//!
//! Every tool funnels raw API responses through the same small set of
//! functions so that publisher names, source classes, and extracts look
//! uniform no matter which backend produced them. The rating phase
//! downstream depends on `publisher` being comparable across tools when
//! it checks publisher independence.

use std::time::Duration;

use evigate_core::claim::SourceClass;
use evigate_core::error::ToolError;
use evigate_core::evidence::{MAX_EXTRACT_CHARS, SourceHit};
use evigate_core::retrieval::SearchConstraints;
use url::Url;

pub(crate) const USER_AGENT: &str = "Evigate/0.1 (evidence retrieval)";

/// Domains whose canonical publisher name differs from the title-cased
/// domain label.
const KNOWN_PUBLISHERS: &[(&str, &str)] = &[
    ("arxiv.org", "arXiv"),
    ("news.ycombinator.com", "Hacker News"),
    ("wikipedia.org", "Wikipedia"),
    ("github.com", "GitHub"),
    ("stackoverflow.com", "Stack Overflow"),
    ("ietf.org", "IETF"),
    ("rfc-editor.org", "RFC Editor"),
    ("w3.org", "W3C"),
    ("ieee.org", "IEEE"),
    ("iso.org", "ISO"),
    ("nist.gov", "NIST"),
    ("acm.org", "ACM"),
    ("mckinsey.com", "McKinsey"),
    ("zdnet.com", "ZDNet"),
    ("techcrunch.com", "TechCrunch"),
    ("infoq.com", "InfoQ"),
    ("dev.to", "DEV Community"),
];

/// Standards bodies and vendor documentation hosts. Anything under .gov
/// or .edu is treated the same way.
const PRIMARY_DOMAINS: &[&str] = &[
    "ietf.org",
    "rfc-editor.org",
    "iso.org",
    "w3.org",
    "ieee.org",
    "nist.gov",
    "ecma-international.org",
    "kernel.org",
    "python.org",
    "rust-lang.org",
    "postgresql.org",
    "kubernetes.io",
    "docs.aws.amazon.com",
    "cloud.google.com",
    "learn.microsoft.com",
    "developer.mozilla.org",
    "developer.apple.com",
];

/// Trade press, research outlets, and analyst firms.
const SECONDARY_DOMAINS: &[&str] = &[
    "arxiv.org",
    "acm.org",
    "nature.com",
    "springer.com",
    "sciencedirect.com",
    "usenix.org",
    "gartner.com",
    "forrester.com",
    "mckinsey.com",
    "statista.com",
    "arstechnica.com",
    "theregister.com",
    "techcrunch.com",
    "zdnet.com",
    "infoq.com",
    "thenewstack.io",
    "heise.de",
    "golem.de",
    "wired.com",
];

/// Forums, aggregators, and personal-publishing platforms. Usable as
/// practice indicators, never as sole support for a factual claim.
const TERTIARY_DOMAINS: &[&str] = &[
    "reddit.com",
    "news.ycombinator.com",
    "medium.com",
    "dev.to",
    "substack.com",
    "stackoverflow.com",
    "stackexchange.com",
    "quora.com",
    "wikipedia.org",
    "hashnode.dev",
    "lobste.rs",
];

/// Build the HTTP client a tool uses for one request.
pub(crate) fn build_client(id: &str, timeout: Duration) -> Result<reqwest::Client, ToolError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ToolError::RequestFailed {
            id: id.to_string(),
            message: format!("failed to build HTTP client: {e}"),
        })
}

/// Human-readable publisher name for a URL. Falls back to the title-cased
/// registrable label ("blog.cloudflare.com" becomes "Cloudflare").
pub fn publisher_for_url(url: &str) -> String {
    let Some(host) = host_of(url) else {
        return "Unknown".to_string();
    };
    for (domain, name) in KNOWN_PUBLISHERS {
        if host_matches(&host, domain) {
            return (*name).to_string();
        }
    }
    let labels: Vec<&str> = host.split('.').collect();
    let label = if labels.len() >= 2 {
        labels[labels.len() - 2]
    } else {
        labels[0]
    };
    if label.is_empty() {
        return "Unknown".to_string();
    }
    title_case(label)
}

/// Coarse source-class assignment by domain. Unknown hosts default to
/// [`SourceClass::Secondary`]; the rating phase is the quality gate, this
/// only has to be right about the obvious cases.
pub fn classify_source(url: &str) -> SourceClass {
    let Some(host) = host_of(url) else {
        return SourceClass::Secondary;
    };
    let in_table = |domains: &[&str]| domains.iter().any(|d| host_matches(&host, d));
    if host.ends_with(".gov") || host.ends_with(".edu") || in_table(PRIMARY_DOMAINS) {
        return SourceClass::Primary;
    }
    if in_table(SECONDARY_DOMAINS) {
        return SourceClass::Secondary;
    }
    if in_table(TERTIARY_DOMAINS) {
        return SourceClass::Tertiary;
    }
    SourceClass::Secondary
}

/// Strip HTML tags and decode the handful of entities search snippets
/// actually contain.
pub fn strip_markup(snippet: &str) -> String {
    let mut out = String::with_capacity(snippet.len());
    let mut in_tag = false;
    for ch in snippet.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// Bound an extract to [`MAX_EXTRACT_CHARS`] so stored raw extracts stay
/// prompt-sized.
pub fn truncate_extract(text: &str) -> String {
    evigate_core::evidence::truncate_extract(text, MAX_EXTRACT_CHARS)
}

/// Apply ticket constraints to a raw hit list: drop excluded domains,
/// float preferred domains to the front, and cap the count. Order is
/// otherwise preserved.
pub fn apply_constraints(mut hits: Vec<SourceHit>, constraints: &SearchConstraints) -> Vec<SourceHit> {
    if !constraints.excluded_domains.is_empty() {
        hits.retain(|hit| {
            host_of(&hit.url).is_none_or(|host| {
                !constraints
                    .excluded_domains
                    .iter()
                    .any(|d| host_matches(&host, d))
            })
        });
    }
    if !constraints.preferred_domains.is_empty() {
        hits.sort_by_key(|hit| {
            let preferred = host_of(&hit.url).is_some_and(|host| {
                constraints
                    .preferred_domains
                    .iter()
                    .any(|d| host_matches(&host, d))
            });
            usize::from(!preferred)
        });
    }
    hits.truncate(constraints.results_per_query.max(1));
    hits
}

fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.trim_start_matches("www.").to_lowercase())
}

fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches("www.").to_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn title_case(label: &str) -> String {
    label
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
