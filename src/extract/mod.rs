pub mod media;
pub mod timestamp;

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::Rules;
use crate::driver::{with_retry, DriverError, NodeId, PageDriver};
use crate::models::{Message, TimestampSource};
use crate::verify;

/// One rendered message bubble per row.
pub const ROW_SELECTOR: &str = "#main [role=\"row\"]";

/// Text strategies in priority order; the first selector that yields any
/// node wins and the rest are not consulted.
const TEXT_SELECTORS: &[&str] = &[
    ".copyable-text",
    "div._akbu ._ao3e.selectable-text",
    "span._ao3e.selectable-text, span.x1lliihq",
];

/// Expand affordances, broadest last.
const EXPAND_SELECTORS: &[&str] = &[
    "div[role=\"button\"]",
    ".read-more-button",
    "button[aria-label*=\"more\"]",
    "[data-testid*=\"expand\"]",
];

/// Visible clock labels next to a bubble, in order of preference.
const TIME_LABEL_SELECTORS: &[&str] = &[
    "span.x1c4vz4f.x2lah0s",
    ".x1rg5ohu.x16dsc37",
    "[data-testid=\"msg-time\"]",
];

static TIME_BADGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}:\d{2}$").unwrap());

#[derive(Debug, Default)]
pub struct CapturePass {
    pub records: Vec<Message>,
    /// Rows currently materialized, whether or not they produced a record.
    pub row_count: usize,
    pub skipped_rows: usize,
}

/// Read every currently materialized row into a raw record. Single-row
/// failures are logged and skipped; only a fatal driver error aborts the
/// pass.
pub fn capture_pass<D: PageDriver>(
    driver: &mut D,
    rules: &Rules,
    pass: u32,
    now: DateTime<Utc>,
) -> Result<CapturePass, DriverError> {
    let retries = rules.config.scroll.element_retries;
    let rows = with_retry(retries, "row query", || driver.query(None, ROW_SELECTOR))?;

    let mut out = CapturePass {
        row_count: rows.len(),
        ..CapturePass::default()
    };
    for (idx, row) in rows.into_iter().enumerate() {
        match extract_row(driver, rules, row, now) {
            Ok(Some(record)) => out.records.push(record),
            Ok(None) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("pass {pass} row {idx}: extraction failed, skipping: {e}");
                out.skipped_rows += 1;
            }
        }
    }
    debug!(
        "pass {pass}: {} rows, {} records, {} skipped",
        out.row_count,
        out.records.len(),
        out.skipped_rows
    );
    Ok(out)
}

fn extract_row<D: PageDriver>(
    driver: &mut D,
    rules: &Rules,
    row: NodeId,
    now: DateTime<Utc>,
) -> Result<Option<Message>, DriverError> {
    let retries = rules.config.scroll.element_retries;
    let mut text = read_text(driver, row, retries)?;

    let mut expansion_failed = false;
    if is_truncated(&text.cleaned) {
        if expand_row(driver, row, rules.config.scroll.expand_wait_ms)? {
            text = read_text(driver, row, retries)?;
        } else {
            warn!("could not expand truncated bubble, keeping partial text");
            expansion_failed = true;
        }
    }

    let media = media::detect(driver, row)?;
    let (ts, ts_source, sender) = resolve_timestamp(driver, row, now)?;

    // Capture-time fingerprint over the text read above. The bubble can
    // still mutate (late expansion, virtualization swap) while media and
    // timestamps are being read; the verifier recomputes over the final
    // fields and drops the record on mismatch.
    let fp = verify::fingerprint(&text.cleaned, media.kind, media.url.as_deref(), &ts);
    let final_text = read_text(driver, row, retries)?;

    if final_text.cleaned.is_empty() && !media.kind.is_some() {
        return Ok(None);
    }

    let id = host_id(driver, row)?.unwrap_or_else(|| format!("synth-{fp:016x}"));

    Ok(Some(Message {
        id,
        chat: rules.config.chat_name.clone(),
        sender: sender.unwrap_or_else(|| "Group Member".to_string()),
        content: final_text.raw,
        cleaned_content: final_text.cleaned,
        media_type: media.kind,
        media_url: media.url,
        media_info: media.info,
        timestamp: ts,
        timestamp_source: ts_source,
        scraped_at: now,
        message_type: Default::default(),
        company_name: None,
        parsed_items: Vec::new(),
        expansion_failed,
        fingerprint: fp,
        seq: 0,
    }))
}

struct RowText {
    raw: String,
    cleaned: String,
}

/// First-success-wins over the text strategies. Joins multi-line bubbles,
/// collapses only exact consecutive duplicate lines (nested-container
/// artifact) and strips standalone clock badges before timestamp parsing.
fn read_text<D: PageDriver>(
    driver: &mut D,
    row: NodeId,
    retries: u32,
) -> Result<RowText, DriverError> {
    let mut nodes = Vec::new();
    for selector in TEXT_SELECTORS {
        nodes = with_retry(retries, "text query", || driver.query(Some(row), selector))?;
        if !nodes.is_empty() {
            break;
        }
    }

    let mut raw_lines: Vec<String> = Vec::new();
    for node in nodes {
        let chunk = driver.text(node)?;
        for line in chunk.lines() {
            let line = line.trim();
            if !line.is_empty() {
                raw_lines.push(line.to_string());
            }
        }
    }

    let mut cleaned_lines: Vec<&str> = Vec::new();
    let mut prev: Option<&str> = None;
    for line in &raw_lines {
        if TIME_BADGE_RE.is_match(line) {
            continue;
        }
        if prev == Some(line.as_str()) {
            continue;
        }
        cleaned_lines.push(line);
        prev = Some(line);
    }

    Ok(RowText {
        cleaned: cleaned_lines.join("\n"),
        raw: raw_lines.join("\n"),
    })
}

fn is_truncated(text: &str) -> bool {
    text.contains('…') || text.contains("...")
}

/// Find and click a plausible expand affordance. `true` means a click
/// landed and the UI was given its bounded settle window.
fn expand_row<D: PageDriver>(
    driver: &mut D,
    row: NodeId,
    expand_wait_ms: u64,
) -> Result<bool, DriverError> {
    for selector in EXPAND_SELECTORS {
        for button in driver.query(Some(row), selector)? {
            let aria = driver
                .attr(button, "aria-label")?
                .unwrap_or_default()
                .to_lowercase();
            let label = driver.text(button)?.trim().to_lowercase();
            let plausible = label.contains("read more")
                || label.contains("more")
                || label.contains("expand")
                || aria.contains("more")
                || aria.contains("expand")
                || label.is_empty();
            if plausible {
                driver.click(button)?;
                driver.settle(Duration::from_millis(expand_wait_ms))?;
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn host_id<D: PageDriver>(driver: &mut D, row: NodeId) -> Result<Option<String>, DriverError> {
    for node in driver.query(Some(row), "[data-id]")? {
        if let Some(id) = driver.attr(node, "data-id")? {
            let id = id.trim().to_string();
            if !id.is_empty() {
                return Ok(Some(id));
            }
        }
    }
    Ok(None)
}

/// Layered resolution: structured provenance, then a visible clock label
/// combined with today, then the wall clock tagged `fallback`.
fn resolve_timestamp<D: PageDriver>(
    driver: &mut D,
    row: NodeId,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, TimestampSource, Option<String>), DriverError> {
    for node in driver.query(Some(row), "[data-pre-plain-text]")? {
        if let Some(raw) = driver.attr(node, "data-pre-plain-text")? {
            if let Some((ts, sender)) = timestamp::parse_provenance(&raw) {
                return Ok((ts, TimestampSource::Structured, sender));
            }
        }
    }
    for selector in TIME_LABEL_SELECTORS {
        for node in driver.query(Some(row), selector)? {
            let label = driver.text(node)?;
            if let Some(ts) = timestamp::parse_visible_label(&label, now.date_naive()) {
                return Ok((ts, TimestampSource::VisibleLabel, None));
            }
        }
    }
    Ok((now, TimestampSource::Fallback, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Rules};
    use crate::fixture::{FixtureDriver, FixtureNode, FixtureSnapshot};
    use crate::models::MediaKind;
    use chrono::TimeZone;

    fn rules() -> Rules {
        Rules::compile(Config::default()).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 13, 9, 30, 0).unwrap()
    }

    fn driver_for(rows: Vec<FixtureNode>) -> FixtureDriver {
        FixtureDriver::new(&FixtureSnapshot {
            chat_name: "ORDERS Restaurants".to_string(),
            batches: vec![rows],
        })
    }

    fn text_row(body: &str) -> FixtureNode {
        FixtureNode::new(ROW_SELECTOR)
            .with_child(FixtureNode::new(".copyable-text").with_text(body))
    }

    #[test]
    fn primary_selector_wins() {
        let row = FixtureNode::new(ROW_SELECTOR)
            .with_child(FixtureNode::new(".copyable-text").with_text("primary"))
            .with_child(FixtureNode::new("span.x1lliihq").with_text("fallback"));
        let mut d = driver_for(vec![row]);
        let pass = capture_pass(&mut d, &rules(), 0, now()).unwrap();
        assert_eq!(pass.records.len(), 1);
        assert_eq!(pass.records[0].cleaned_content, "primary");
    }

    #[test]
    fn fallback_selector_used_when_primary_absent() {
        let row = FixtureNode::new(ROW_SELECTOR)
            .with_child(FixtureNode::new("span.x1lliihq").with_text("fallback text"));
        let mut d = driver_for(vec![row]);
        let pass = capture_pass(&mut d, &rules(), 0, now()).unwrap();
        assert_eq!(pass.records[0].cleaned_content, "fallback text");
    }

    #[test]
    fn consecutive_duplicates_collapse_but_distant_repeats_stay() {
        let row = FixtureNode::new(ROW_SELECTOR)
            .with_child(FixtureNode::new(".copyable-text").with_text("a\na\nb\na"));
        let mut d = driver_for(vec![row]);
        let pass = capture_pass(&mut d, &rules(), 0, now()).unwrap();
        assert_eq!(pass.records[0].cleaned_content, "a\nb\na");
    }

    #[test]
    fn standalone_clock_badges_are_stripped() {
        let row = FixtureNode::new(ROW_SELECTOR)
            .with_child(FixtureNode::new(".copyable-text").with_text("2x tomatoes\n12:46"));
        let mut d = driver_for(vec![row]);
        let pass = capture_pass(&mut d, &rules(), 0, now()).unwrap();
        assert_eq!(pass.records[0].cleaned_content, "2x tomatoes");
        assert!(pass.records[0].content.contains("12:46"));
    }

    #[test]
    fn empty_row_not_emitted() {
        let row = FixtureNode::new(ROW_SELECTOR)
            .with_child(FixtureNode::new(".copyable-text").with_text("12:46"));
        let mut d = driver_for(vec![row]);
        let pass = capture_pass(&mut d, &rules(), 0, now()).unwrap();
        assert!(pass.records.is_empty());
        assert_eq!(pass.row_count, 1);
    }

    #[test]
    fn truncated_bubble_expands_and_rereads() {
        let row = FixtureNode::new(ROW_SELECTOR)
            .with_child(FixtureNode {
                selectors: vec![".copyable-text".to_string()],
                text: "order for venue…".to_string(),
                expanded_text: Some("order for venue\n2x5kg tomatoes\n3 bags onions".to_string()),
                ..FixtureNode::default()
            })
            .with_child(
                FixtureNode::new("div[role=\"button\"]").with_attr("aria-label", "Read more"),
            );
        let mut d = driver_for(vec![row]);
        let pass = capture_pass(&mut d, &rules(), 0, now()).unwrap();
        let rec = &pass.records[0];
        assert!(!rec.expansion_failed);
        assert!(rec.cleaned_content.contains("3 bags onions"));
    }

    #[test]
    fn failed_expansion_keeps_text_and_flags() {
        // Truncated but no expand affordance anywhere in the row.
        let row = text_row("very long order…");
        let mut d = driver_for(vec![row]);
        let pass = capture_pass(&mut d, &rules(), 0, now()).unwrap();
        let rec = &pass.records[0];
        assert!(rec.expansion_failed);
        assert_eq!(rec.cleaned_content, "very long order…");
    }

    #[test]
    fn host_id_preferred_synthesized_otherwise() {
        let with_id = FixtureNode::new(ROW_SELECTOR).with_child(
            FixtureNode::new(".copyable-text")
                .with_text("hello")
                .with_attr("data-id", "true_orders@g.us_3EB0"),
        );
        let without_id = text_row("hello again");
        let mut d = driver_for(vec![with_id, without_id]);
        let pass = capture_pass(&mut d, &rules(), 0, now()).unwrap();
        assert_eq!(pass.records[0].id, "true_orders@g.us_3EB0");
        assert!(pass.records[1].id.starts_with("synth-"));
    }

    #[test]
    fn synthesized_id_is_stable_across_passes() {
        let mut d = driver_for(vec![text_row("same content")]);
        let a = capture_pass(&mut d, &rules(), 0, now()).unwrap();
        let b = capture_pass(&mut d, &rules(), 1, now()).unwrap();
        assert_eq!(a.records[0].id, b.records[0].id);
    }

    #[test]
    fn structured_timestamp_and_sender() {
        let row = FixtureNode::new(ROW_SELECTOR).with_child(
            FixtureNode::new(".copyable-text")
                .with_text("2x tomatoes")
                .with_attr("data-pre-plain-text", "[08:15, 11/09/2025] Karl: "),
        );
        let mut d = driver_for(vec![row]);
        let rec = &capture_pass(&mut d, &rules(), 0, now()).unwrap().records[0];
        assert_eq!(rec.timestamp_source, TimestampSource::Structured);
        assert_eq!(rec.timestamp.to_rfc3339(), "2025-09-11T08:15:00+00:00");
        assert_eq!(rec.sender, "Karl");
    }

    #[test]
    fn visible_label_timestamp_uses_current_date() {
        let row = FixtureNode::new(ROW_SELECTOR)
            .with_child(FixtureNode::new(".copyable-text").with_text("2x tomatoes"))
            .with_child(FixtureNode::new("span.x1c4vz4f.x2lah0s").with_text("08:15"));
        let mut d = driver_for(vec![row]);
        let rec = &capture_pass(&mut d, &rules(), 0, now()).unwrap().records[0];
        assert_eq!(rec.timestamp_source, TimestampSource::VisibleLabel);
        assert_eq!(rec.timestamp.date_naive(), now().date_naive());
    }

    #[test]
    fn wall_clock_fallback_when_nothing_resolves() {
        let mut d = driver_for(vec![text_row("2x tomatoes")]);
        let rec = &capture_pass(&mut d, &rules(), 0, now()).unwrap().records[0];
        assert_eq!(rec.timestamp_source, TimestampSource::Fallback);
        assert_eq!(rec.timestamp, now());
    }

    #[test]
    fn media_only_row_survives_without_text() {
        let row = FixtureNode::new(ROW_SELECTOR).with_child(
            FixtureNode::new("[aria-label='Open picture'] img[src]")
                .with_attr("src", "https://media.example.net/menu.jpg"),
        );
        let mut d = driver_for(vec![row]);
        let rec = &capture_pass(&mut d, &rules(), 0, now()).unwrap().records[0];
        assert_eq!(rec.media_type, MediaKind::Image);
        assert!(rec.cleaned_content.is_empty());
    }

    #[test]
    fn fingerprint_matches_recompute_for_stable_rows() {
        let mut d = driver_for(vec![text_row("3 bags potatoes")]);
        let rec = &capture_pass(&mut d, &rules(), 0, now()).unwrap().records[0];
        let recomputed = verify::fingerprint(
            &rec.cleaned_content,
            rec.media_type,
            rec.media_url.as_deref(),
            &rec.timestamp,
        );
        assert_eq!(rec.fingerprint, recomputed);
    }
}
