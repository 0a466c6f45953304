//! Video transcript extraction.
//!
//! Resolves a YouTube URL to a video id, downloads the caption track from
//! the `timedtext` endpoint, and flattens the cues into one transcript
//! string. Cue timings are kept as [`TimeMark`]s (character offset →
//! start/end seconds) so passages cut from the transcript can carry a
//! time-range locator back to the video.
//!
//! The endpoint serves auto-generated and uploaded tracks for the
//! requested language and answers `200` with an empty body when the video
//! has no track at all, which we surface as an unavailable source rather
//! than an empty one. The video title comes from the oEmbed endpoint and
//! is optional; a failed title lookup never fails the extraction.

use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};
use url::Url;

use crate::cache::FetchCache;
use crate::config::{CrawlConfig, VideoConfig};
use crate::error::{unavailable, EngineError, Result};
use crate::extractor::{is_youtube_host, Extract};
use crate::models::{ExtractedUnit, SourceKind, TimeMark, UnitProvenance};

/// Downloads and parses YouTube caption tracks.
pub struct VideoExtractor {
    client: reqwest::Client,
    cache: Option<FetchCache>,
    force_fetch: bool,
    language: String,
}

impl VideoExtractor {
    pub fn new(
        crawl: &CrawlConfig,
        video: &VideoConfig,
        cache: Option<FetchCache>,
        force_fetch: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(crawl.timeout_secs))
            .user_agent(crawl.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            cache,
            force_fetch,
            language: video.language.clone(),
        })
    }

    /// Fetch the raw caption XML for a video id.
    async fn fetch_track(&self, origin: &str, id: &str) -> Result<String> {
        let track_url = format!(
            "https://video.google.com/timedtext?lang={}&v={}",
            self.language, id
        );

        if let Some(cache) = &self.cache {
            if !self.force_fetch {
                if let Ok(Some(body)) = cache.load(&track_url).await {
                    return Ok(body);
                }
            }
        }

        debug!(%origin, id, lang = %self.language, "fetching caption track");
        let response = self
            .client
            .get(&track_url)
            .send()
            .await
            .map_err(|e| unavailable(origin, format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| unavailable(origin, e))?;
        let body = response
            .text()
            .await
            .map_err(|e| unavailable(origin, format!("read failed: {}", e)))?;

        if body.trim().is_empty() {
            return Err(unavailable(
                origin,
                format!("no transcript track available (lang={})", self.language),
            ));
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&track_url, &body).await {
                warn!(url = %track_url, error = %e, "cache write failed");
            }
        }

        Ok(body)
    }

    /// Video title via oEmbed. Best effort only.
    async fn fetch_title(&self, video_url: &Url) -> Option<String> {
        let oembed = Url::parse_with_params(
            "https://www.youtube.com/oembed",
            &[("url", video_url.as_str()), ("format", "json")],
        )
        .ok()?;
        let response = self.client.get(oembed).send().await.ok()?;
        let json: serde_json::Value = response.error_for_status().ok()?.json().await.ok()?;
        json.get("title")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
    }
}

#[async_trait]
impl Extract for VideoExtractor {
    fn kind(&self) -> SourceKind {
        SourceKind::Video
    }

    async fn extract(&self, origin: &str) -> Result<Vec<ExtractedUnit>> {
        let url = Url::parse(origin)
            .map_err(|e| EngineError::InvalidReference(format!("{}: {}", origin, e)))?;
        let id = video_id(&url).ok_or_else(|| {
            EngineError::InvalidReference(format!("no video id in '{}'", origin))
        })?;

        let xml = self.fetch_track(origin, &id).await?;
        let (text, marks) = parse_transcript(&xml)
            .map_err(|e| unavailable(origin, format!("transcript parse failed: {}", e)))?;
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let title = self.fetch_title(&url).await;
        Ok(vec![ExtractedUnit {
            text,
            title,
            provenance: UnitProvenance::Transcript { marks },
        }])
    }
}

/// Pull the video id out of the URL forms YouTube uses.
///
/// Handles `watch?v=`, `youtu.be/`, `/embed/`, `/shorts/`, `/live/`.
pub(crate) fn video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?;

    if host == "youtu.be" {
        return url
            .path_segments()?
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_string);
    }

    if !is_youtube_host(host) {
        return None;
    }

    if url.path() == "/watch" {
        return url
            .query_pairs()
            .find_map(|(k, v)| (k == "v" && !v.is_empty()).then(|| v.into_owned()));
    }

    let mut segments = url.path_segments()?;
    if let Some(first) = segments.next() {
        if matches!(first, "embed" | "shorts" | "live" | "v") {
            return segments
                .next()
                .filter(|s| !s.is_empty())
                .map(str::to_string);
        }
    }

    None
}

/// Flatten caption XML into transcript text plus time marks.
///
/// Each `<text start=".." dur="..">` cue contributes its unescaped text,
/// cues joined by single spaces. A [`TimeMark`] records where each cue
/// begins in the flattened string.
fn parse_transcript(xml: &str) -> std::result::Result<(String, Vec<TimeMark>), quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = String::new();
    let mut marks: Vec<TimeMark> = Vec::new();
    let mut pending: Option<(f64, f64)> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"text" => {
                let mut start = 0.0f64;
                let mut dur = 0.0f64;
                for attr in e.attributes().flatten() {
                    let value = attr.unescape_value().unwrap_or_default();
                    match attr.key.as_ref() {
                        b"start" => start = value.parse().unwrap_or(0.0),
                        b"dur" => dur = value.parse().unwrap_or(0.0),
                        _ => {}
                    }
                }
                pending = Some((start, start + dur));
            }
            Event::Text(t) => {
                if let Some((start_secs, end_secs)) = pending {
                    let caption = t.unescape().unwrap_or_default();
                    let caption = caption.trim();
                    if !caption.is_empty() {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        marks.push(TimeMark {
                            offset: out.len(),
                            start_secs,
                            end_secs,
                        });
                        out.push_str(caption);
                    }
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"text" => pending = None,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok((out, marks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_of(url: &str) -> Option<String> {
        video_id(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_video_id_forms() {
        assert_eq!(
            id_of("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            id_of("https://www.youtube.com/watch?v=abc123&t=30s"),
            Some("abc123".to_string())
        );
        assert_eq!(id_of("https://youtu.be/xyz789"), Some("xyz789".to_string()));
        assert_eq!(
            id_of("https://www.youtube.com/embed/em1"),
            Some("em1".to_string())
        );
        assert_eq!(
            id_of("https://youtube.com/shorts/sh2"),
            Some("sh2".to_string())
        );
    }

    #[test]
    fn test_video_id_missing() {
        assert_eq!(id_of("https://www.youtube.com/watch"), None);
        assert_eq!(id_of("https://www.youtube.com/feed/library"), None);
        assert_eq!(id_of("https://example.com/watch?v=abc"), None);
        assert_eq!(id_of("https://youtu.be/"), None);
    }

    #[test]
    fn test_parse_transcript_cues_and_marks() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<transcript>
  <text start="0" dur="2.5">Welcome to the course.</text>
  <text start="2.5" dur="3">Today we cover ownership.</text>
</transcript>"#;
        let (text, marks) = parse_transcript(xml).unwrap();
        assert_eq!(text, "Welcome to the course. Today we cover ownership.");
        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0].offset, 0);
        assert_eq!(marks[0].start_secs, 0.0);
        assert_eq!(marks[0].end_secs, 2.5);
        assert_eq!(marks[1].offset, 23);
        assert_eq!(marks[1].start_secs, 2.5);
        assert_eq!(marks[1].end_secs, 5.5);
    }

    #[test]
    fn test_parse_transcript_unescapes_entities() {
        let xml = r#"<transcript><text start="1" dur="1">Tom &amp; Jerry &#39;live&#39;</text></transcript>"#;
        let (text, _) = parse_transcript(xml).unwrap();
        assert_eq!(text, "Tom & Jerry 'live'");
    }

    #[test]
    fn test_parse_transcript_empty_track() {
        let (text, marks) = parse_transcript("<transcript></transcript>").unwrap();
        assert!(text.is_empty());
        assert!(marks.is_empty());
    }

    #[test]
    fn test_parse_transcript_skips_blank_cues() {
        let xml = r#"<transcript>
  <text start="0" dur="1">  </text>
  <text start="1" dur="1">spoken words</text>
</transcript>"#;
        let (text, marks) = parse_transcript(xml).unwrap();
        assert_eq!(text, "spoken words");
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].start_secs, 1.0);
    }
}
