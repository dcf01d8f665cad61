use std::sync::LazyLock;

use regex::Regex;

use crate::driver::{DriverError, NodeId, PageDriver};
use crate::models::MediaKind;

const VOICE_SELECTOR: &str =
    "button[aria-label='Play voice message'], [aria-label='Voice message']";
const IMAGE_SELECTOR: &str = "[aria-label='Open picture'] img[src]";
const VIDEO_SELECTOR: &str = "[data-testid='video-thumb'], video";
const SLIDER_SELECTOR: &str = "[role='slider']";

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}:\d{2}$").unwrap());

#[derive(Debug, Clone, Default)]
pub struct MediaCapture {
    pub kind: MediaKind,
    pub url: Option<String>,
    pub info: Option<String>,
}

/// Detect row media with fixed precedence: voice > image > video > none.
/// An image without a concrete http(s) source degrades the row to plain
/// text rather than dropping it, so `kind` stays `None` in that case.
pub fn detect<D: PageDriver>(driver: &mut D, row: NodeId) -> Result<MediaCapture, DriverError> {
    if !driver.query(Some(row), VOICE_SELECTOR)?.is_empty() {
        return Ok(MediaCapture {
            kind: MediaKind::Voice,
            url: None,
            info: voice_duration(driver, row)?,
        });
    }

    for img in driver.query(Some(row), IMAGE_SELECTOR)? {
        if let Some(src) = driver.attr(img, "src")? {
            let src = src.trim().to_string();
            if is_http_url(&src) {
                return Ok(MediaCapture {
                    kind: MediaKind::Image,
                    url: Some(src),
                    info: None,
                });
            }
        }
    }

    if !driver.query(Some(row), VIDEO_SELECTOR)?.is_empty() {
        return Ok(MediaCapture {
            kind: MediaKind::Video,
            url: None,
            info: None,
        });
    }

    Ok(MediaCapture::default())
}

/// Player slider carries `aria-valuetext` like `"0:00/0:19"`; the total is
/// the part after the slash. Falls back to a short clock-like token in the
/// row's rendered text.
fn voice_duration<D: PageDriver>(
    driver: &mut D,
    row: NodeId,
) -> Result<Option<String>, DriverError> {
    for slider in driver.query(Some(row), SLIDER_SELECTOR)? {
        if let Some(valuetext) = driver.attr(slider, "aria-valuetext")? {
            if let Some(total) = valuetext.rsplit('/').next() {
                let total = total.trim();
                if DURATION_RE.is_match(total) {
                    return Ok(Some(total.to_string()));
                }
            }
        }
    }
    let text = driver.text(row)?;
    Ok(text
        .lines()
        .map(str::trim)
        .find(|l| DURATION_RE.is_match(l))
        .map(String::from))
}

/// Only resolvable http(s) URLs count as media sources; ephemeral blob/data
/// references do not survive the page session.
pub fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}
