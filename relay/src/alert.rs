//! Alert composition and the Bot API call shape for each incident.

use serde_json::{json, Value};
use shared::incident::{is_video_url, RelayRequest, DEFAULT_REPORTER};

pub const PARSE_MODE: &str = "Markdown";

pub fn map_link(lat: f64, lng: f64) -> String {
    format!("https://www.google.com/maps/search/?api=1&query={lat},{lng}")
}

/// Markdown text shared by every delivery shape.
pub fn compose_caption(request: &RelayRequest) -> String {
    let reporter = request
        .reporter_info
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REPORTER);

    let mut caption = format!(
        "🚨 *NCP ALERT!* 🚨\n\nIncident reported.\nView on Maps: {}\n\nDescription: {}\nReporter: {}",
        map_link(request.lat, request.lng),
        request.description,
        reporter,
    );

    if let Some(link) = request.video_link.as_deref().filter(|l| !l.trim().is_empty()) {
        caption.push_str("\n\nVideo/Post Link: ");
        caption.push_str(link);
    }

    caption
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Text { text: String },
    Photo { photo: String, caption: String },
    Video { video: String, caption: String },
}

impl Delivery {
    /// Video for known video extensions, photo for any other media, text otherwise.
    pub fn for_request(request: &RelayRequest) -> Self {
        let caption = compose_caption(request);
        match request.image_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) if is_video_url(url) => Self::Video {
                video: url.to_string(),
                caption,
            },
            Some(url) => Self::Photo {
                photo: url.to_string(),
                caption,
            },
            None => Self::Text { text: caption },
        }
    }

    /// Bot API method name.
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Text { .. } => "sendMessage",
            Self::Photo { .. } => "sendPhoto",
            Self::Video { .. } => "sendVideo",
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Text { text } => text,
            Self::Photo { caption, .. } | Self::Video { caption, .. } => caption,
        }
    }

    pub fn payload(&self, chat_id: &str) -> Value {
        match self {
            Self::Text { text } => json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": PARSE_MODE,
                "disable_web_page_preview": false,
            }),
            Self::Photo { photo, caption } => json!({
                "chat_id": chat_id,
                "photo": photo,
                "caption": caption,
                "parse_mode": PARSE_MODE,
            }),
            Self::Video { video, caption } => json!({
                "chat_id": chat_id,
                "video": video,
                "caption": caption,
                "parse_mode": PARSE_MODE,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn request(image_url: Option<&str>) -> RelayRequest {
        RelayRequest {
            lat: 23.81,
            lng: 90.41,
            description: "Fire near market".into(),
            image_url: image_url.map(String::from),
            video_link: None,
            reporter_info: None,
            emergency_contacts: Vec::new(),
        }
    }

    mod caption_tests {
        use super::*;

        #[test]
        fn test_map_link_uses_exact_coordinates() {
            assert_eq!(
                map_link(23.81, 90.41),
                "https://www.google.com/maps/search/?api=1&query=23.81,90.41"
            );
        }

        #[test]
        fn test_caption_layout() {
            let caption = compose_caption(&request(None));
            assert_eq!(
                caption,
                "🚨 *NCP ALERT!* 🚨\n\nIncident reported.\nView on Maps: \
                 https://www.google.com/maps/search/?api=1&query=23.81,90.41\n\n\
                 Description: Fire near market\nReporter: Anonymous"
            );
        }

        #[test]
        fn test_caption_with_reporter_and_video_link() {
            let mut req = request(None);
            req.reporter_info = Some("Rahim".into());
            req.video_link = Some("https://youtu.be/abc".into());

            let caption = compose_caption(&req);
            assert!(caption.contains("Reporter: Rahim"));
            assert!(caption.ends_with("\n\nVideo/Post Link: https://youtu.be/abc"));
        }

        #[test]
        fn test_blank_reporter_is_anonymous() {
            let mut req = request(None);
            req.reporter_info = Some("   ".into());
            assert!(compose_caption(&req).contains("Reporter: Anonymous"));
        }
    }

    mod shape_tests {
        use super::*;

        #[test]
        fn test_text_shape() {
            let delivery = Delivery::for_request(&request(None));
            assert_eq!(delivery.method(), "sendMessage");

            let payload = delivery.payload("@fire_dept");
            assert_eq!(payload["chat_id"], "@fire_dept");
            assert_eq!(payload["parse_mode"], "Markdown");
            assert_eq!(payload["disable_web_page_preview"], false);
            assert!(payload["text"].as_str().unwrap_or_default().contains("NCP ALERT"));
        }

        #[test]
        fn test_photo_shape() {
            let delivery = Delivery::for_request(&request(Some("https://cdn.example/e/1.jpg")));
            assert_eq!(delivery.method(), "sendPhoto");
            let payload = delivery.payload("42");
            assert_eq!(payload["photo"], "https://cdn.example/e/1.jpg");
            assert!(payload.get("caption").is_some());
        }

        #[test]
        fn test_video_shape_is_case_insensitive() {
            let delivery = Delivery::for_request(&request(Some("https://cdn.example/e/1.MOV")));
            assert_eq!(delivery.method(), "sendVideo");
            assert_eq!(delivery.payload("42")["video"], "https://cdn.example/e/1.MOV");
        }

        #[test]
        fn test_blank_media_url_is_text() {
            let delivery = Delivery::for_request(&request(Some("")));
            assert!(matches!(delivery, Delivery::Text { .. }));
        }

        proptest! {
            #[test]
            fn test_video_extensions_choose_video(
                stem in "[a-z0-9/_-]{1,24}",
                ext in prop::sample::select(vec!["mp4", "MOV", "webm", "Avi", "mkv"]),
            ) {
                let url = format!("https://cdn.example/{stem}.{ext}");
                let delivery = Delivery::for_request(&request(Some(&url)));
                prop_assert_eq!(delivery.method(), "sendVideo");
            }

            #[test]
            fn test_other_media_chooses_photo(
                stem in "[a-z0-9/_-]{1,24}",
                ext in prop::sample::select(vec!["jpg", "png", "gif", "webp", "mp3", "mp4x"]),
            ) {
                let url = format!("https://cdn.example/{stem}.{ext}");
                let delivery = Delivery::for_request(&request(Some(&url)));
                prop_assert_eq!(delivery.method(), "sendPhoto");
            }

            #[test]
            fn test_caption_is_shared_across_shapes(url in proptest::option::of("https://[a-z]{1,8}\\.example/[a-z]{1,8}\\.(mp4|png)")) {
                let req = request(url.as_deref());
                let delivery = Delivery::for_request(&req);
                prop_assert_eq!(delivery.text(), compose_caption(&req));
            }
        }
    }
}
