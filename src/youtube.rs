//! YouTube caption transcripts.
//!
//! The watch page embeds the player configuration as JSON. The caption track
//! list sits under `"captions":` (terminated by `,"videoDetails`) and video
//! metadata under `"videoDetails":` (terminated by `,"annotations`). The
//! first caption track's `baseUrl` serves an XML document of `<text>`
//! elements which are joined into the transcript.

use serde::Deserialize;

use crate::error::FetchError;
use crate::models::FetchedDocument;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

#[derive(Debug, Deserialize)]
struct CaptionsBlock {
    #[serde(rename = "playerCaptionsTracklistRenderer")]
    renderer: CaptionTrackList,
}

#[derive(Debug, Default, Deserialize)]
struct CaptionTrackList {
    #[serde(rename = "captionTracks", default)]
    tracks: Vec<CaptionTrack>,
}

#[derive(Debug, Deserialize)]
struct CaptionTrack {
    #[serde(rename = "baseUrl")]
    base_url: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct VideoMetadata {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "author_name")]
    author: String,
}

pub fn is_youtube_url(url: &str) -> bool {
    video_id(url).is_some()
}

/// Video id from a `youtube.com/watch?v=` or `youtu.be/` URL.
pub fn video_id(url: &str) -> Option<String> {
    let id = if let Some((_, rest)) = url.split_once("youtube.com/watch?v=") {
        rest.split('&').next()
    } else if let Some((_, rest)) = url.split_once("youtu.be/") {
        rest.split(['/', '?']).next()
    } else {
        None
    };

    let id = id?;
    (!id.is_empty()).then(|| id.to_string())
}

/// Download captions (and title metadata when present) for a video URL.
pub async fn fetch_transcript(
    client: &reqwest::Client,
    url: &str,
) -> Result<FetchedDocument, FetchError> {
    let captions_err = |message: &str| FetchError::Captions {
        url: url.to_string(),
        message: message.to_string(),
    };

    let id = video_id(url).ok_or_else(|| captions_err("invalid YouTube URL"))?;
    let page = get_text(client, &format!("{}{}", WATCH_URL, id)).await?;

    let tracks = extract_caption_tracks(&page).ok_or_else(|| captions_err("no captions found"))?;
    let track = tracks
        .first()
        .ok_or_else(|| captions_err("no captions found"))?;

    let xml = get_text(client, &track.base_url).await?;
    let content = parse_transcript(&xml).map_err(|e| captions_err(e.as_str()))?;

    let title = match extract_metadata(&page) {
        Some(meta) if !meta.title.is_empty() && !meta.author.is_empty() => {
            format!("{} - {}", meta.title, meta.author)
        }
        Some(meta) if !meta.title.is_empty() => meta.title,
        _ => url.to_string(),
    };

    Ok(FetchedDocument {
        path: url.to_string(),
        content,
        title,
        is_remote: true,
    })
}

async fn get_text(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let http_err = |source| FetchError::Http {
        url: url.to_string(),
        source,
    };
    let resp = client.get(url).send().await.map_err(http_err)?;
    if !resp.status().is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: resp.status().as_u16(),
        });
    }
    resp.text().await.map_err(http_err)
}

/// Slice the JSON value that follows `marker` up to `terminator` and undo
/// the page's escaping.
fn embedded_json(html: &str, marker: &str, terminator: &str) -> Option<String> {
    let (_, rest) = html.split_once(marker)?;
    let end = rest.find(terminator)?;
    Some(rest[..end].replace("\\u0026", "&").replace('\\', ""))
}

fn extract_caption_tracks(html: &str) -> Option<Vec<CaptionTrack>> {
    let json = embedded_json(html, "\"captions\":", ",\"videoDetails")?;
    let block: CaptionsBlock = serde_json::from_str(&json).ok()?;
    Some(block.renderer.tracks)
}

fn extract_metadata(html: &str) -> Option<VideoMetadata> {
    let json = embedded_json(html, "\"videoDetails\":", ",\"annotations")?;
    serde_json::from_str(&json).ok()
}

/// Join the text of every `<text>` element with single spaces.
fn parse_transcript(xml: &str) -> Result<String, String> {
    use quick_xml::events::Event;

    let mut parts: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"text" => in_text = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"text" => in_text = false,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| e.to_string())?;
                parts.push(text.into_owned());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("parse subtitles XML: {}", e)),
            _ => {}
        }
    }

    Ok(parts.join(" "))
}
