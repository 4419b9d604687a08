//! Playable video references for incident popups.
//!
//! A missing or unparseable link yields `None`; it is never an error.

use serde::{Deserialize, Serialize};
use url::Url;

pub const VIDEO_HOSTS: [&str; 4] = ["youtube.com", "youtu.be", "facebook.com", "fb.watch"];
pub const YOUTUBE_EMBED_BASE: &str = "https://www.youtube.com/embed/";
pub const FACEBOOK_PLUGIN_URL: &str = "https://www.facebook.com/plugins/video.php";
pub const FACEBOOK_EMBED_WIDTH: u32 = 280;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoPlatform {
    YouTube,
    Facebook,
    Other,
}

#[must_use]
pub fn detect_platform(link: &str) -> VideoPlatform {
    if link.contains("youtube.com") || link.contains("youtu.be") {
        VideoPlatform::YouTube
    } else if link.contains("facebook.com") || link.contains("fb.watch") {
        VideoPlatform::Facebook
    } else {
        VideoPlatform::Other
    }
}

/// The explicit link wins; otherwise the first URL in the description that
/// points at a known video host.
#[must_use]
pub fn find_video_link<'a>(explicit: Option<&'a str>, description: &'a str) -> Option<&'a str> {
    if let Some(link) = explicit.map(str::trim).filter(|l| !l.is_empty()) {
        return Some(link);
    }

    description
        .split_whitespace()
        .filter_map(url_in_token)
        .find(|candidate| VIDEO_HOSTS.iter().any(|host| candidate.contains(host)))
}

fn url_in_token(token: &str) -> Option<&str> {
    let start = match (token.find("https://"), token.find("http://")) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return None,
    };
    let url = token[start..].trim_end_matches([')', ']', ',', '.', ';', '!', '"', '\'']);
    Some(url)
}

/// Video id from a `v=` parameter or a `youtu.be/<id>` path.
#[must_use]
pub fn youtube_id(link: &str) -> Option<&str> {
    let id = if let Some((_, rest)) = link.split_once("v=") {
        rest.split(['&', '#']).next()
    } else if let Some((_, rest)) = link.split_once("youtu.be/") {
        rest.split(['?', '#', '&', '/']).next()
    } else {
        None
    }?;

    (!id.is_empty()).then_some(id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEmbed {
    pub platform: VideoPlatform,
    pub source_link: String,
    pub embed_url: String,
}

impl VideoEmbed {
    #[must_use]
    pub fn from_link(link: &str) -> Option<Self> {
        let link = link.trim();
        let embed_url = match detect_platform(link) {
            VideoPlatform::YouTube => format!("{YOUTUBE_EMBED_BASE}{}", youtube_id(link)?),
            VideoPlatform::Facebook => Url::parse_with_params(
                FACEBOOK_PLUGIN_URL,
                &[
                    ("href", link),
                    ("show_text", "false"),
                    ("width", &FACEBOOK_EMBED_WIDTH.to_string()),
                ],
            )
            .ok()?
            .to_string(),
            VideoPlatform::Other => return None,
        };

        Some(Self {
            platform: detect_platform(link),
            source_link: link.to_string(),
            embed_url,
        })
    }
}

#[must_use]
pub fn embed_for(explicit: Option<&str>, description: &str) -> Option<VideoEmbed> {
    find_video_link(explicit, description).and_then(VideoEmbed::from_link)
}
