//! Finds downloadable Instagram media links in chat message text.
//!
//! Extraction is pure: no I/O, no shared state, and malformed candidates
//! are dropped rather than reported to the caller.

use lazy_regex::{Lazy, lazy_regex};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use url::Url;

static CANDIDATE: Lazy<Regex> = lazy_regex!(r#"(?i)https?://[^\s<>()\[\]"'`|*]+"#);

const HOSTS: [&str; 3] = ["instagram.com", "www.instagram.com", "m.instagram.com"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Reel,
    Post,
    Tv,
}

impl MediaKind {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "reel" | "reels" => Some(MediaKind::Reel),
            "p" => Some(MediaKind::Post),
            "tv" => Some(MediaKind::Tv),
            _ => None,
        }
    }

    pub fn path_segment(&self) -> &'static str {
        match self {
            MediaKind::Reel => "reel",
            MediaKind::Post => "p",
            MediaKind::Tv => "tv",
        }
    }
}

/// A recognized media link in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaLink {
    pub kind: MediaKind,
    pub shortcode: String,
    pub url: Url,
}

impl fmt::Display for MediaLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ExtractionError {
    #[error("not a valid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("unsupported host: {0}")]
    UnsupportedHost(String),
    #[error("credentials or port in URL")]
    UnexpectedAuthority,
    #[error("unrecognized media path: {0}")]
    UnrecognizedPath(String),
}

/// Returns the media links in `text`, in order of first appearance, without duplicates.
pub fn extract_links(text: &str) -> Vec<MediaLink> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for candidate in CANDIDATE.find_iter(text) {
        let raw = candidate
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?']);
        match parse_link(raw) {
            Ok(link) => {
                if seen.insert(link.url.clone()) {
                    links.push(link);
                }
            }
            Err(e) => log::debug!("Discarding link candidate {:?}: {}", raw, e),
        }
    }

    links
}

/// Classifies a single absolute URL.
pub fn parse_link(raw: &str) -> Result<MediaLink, ExtractionError> {
    let url = Url::parse(raw)?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ExtractionError::UnsupportedScheme(other.to_string())),
    }

    let host = url.host_str().unwrap_or_default();
    if !HOSTS.contains(&host) {
        return Err(ExtractionError::UnsupportedHost(host.to_string()));
    }

    if !url.username().is_empty() || url.password().is_some() || url.port().is_some() {
        return Err(ExtractionError::UnexpectedAuthority);
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let (kind, shortcode) = match segments.as_slice() {
        [kind, code] => match MediaKind::from_segment(kind) {
            Some(kind) if is_shortcode(code) => (kind, *code),
            _ => return Err(ExtractionError::UnrecognizedPath(url.path().to_string())),
        },
        _ => return Err(ExtractionError::UnrecognizedPath(url.path().to_string())),
    };

    let canonical = format!(
        "https://www.instagram.com/{}/{}/",
        kind.path_segment(),
        shortcode
    );

    Ok(MediaLink {
        kind,
        shortcode: shortcode.to_string(),
        url: Url::parse(&canonical)?,
    })
}

fn is_shortcode(code: &str) -> bool {
    !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
