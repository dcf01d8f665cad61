use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as Days, NaiveDate, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::classify;
use crate::config::Rules;
use crate::driver::{with_retry, DriverError, PageDriver};
use crate::extract;
use crate::models::{Message, Order, TimestampSource};
use crate::parser::{self, BufferedLine};
use crate::verify::{Session, SessionStats};

/// The conversation pane's scrollable ancestor.
const SCROLL_CONTAINER_SELECTOR: &str = "#main .copyable-area";

/// Cooperative stop signal, checked between scroll iterations. A cancelled
/// cycle still flushes everything captured so far.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Oldest visible resolved date precedes the retention window.
    DateCutoff,
    /// Row count stable for the configured number of attempts.
    TopOfHistory,
    /// Safety ceiling on scroll attempts.
    AttemptCeiling,
    Cancelled,
    /// Cycle aborted by a fatal driver error; the report holds partials.
    HandleLost,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::DateCutoff => "date cutoff",
            StopReason::TopOfHistory => "top of history",
            StopReason::AttemptCeiling => "attempt ceiling",
            StopReason::Cancelled => "cancelled",
            StopReason::HandleLost => "handle lost",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub passes: u32,
    /// Rows materialized at the last completed pass.
    pub rows_seen: usize,
    pub skipped_rows: usize,
    pub session: SessionStats,
}

/// Everything one scrape cycle produced.
#[derive(Debug)]
pub struct CycleReport {
    pub stop: StopReason,
    pub messages: Vec<Message>,
    pub orders: Vec<Order>,
    pub unresolved: Vec<BufferedLine>,
    pub stats: CycleStats,
}

#[derive(Debug, Error)]
pub enum CycleError {
    /// The automation handle died mid-cycle. Partial results captured
    /// before the loss are preserved for the supervisor.
    #[error("automation handle lost mid-cycle: {source}")]
    DriverLost {
        source: DriverError,
        partial: Box<CycleReport>,
    },
}

/// One full scrape cycle: scroll backwards through the virtualized
/// transcript feeding rows to the verifier incrementally, then classify the
/// deduplicated chronological stream and parse it into orders. The driver
/// handle is exclusively owned for the duration of the call.
pub fn run_cycle<D: PageDriver>(
    driver: &mut D,
    rules: &Rules,
    cancel: &CancelFlag,
) -> Result<CycleReport, CycleError> {
    let mut session = Session::new();
    let mut stats = CycleStats::default();

    match backfill(driver, rules, &mut session, &mut stats, cancel) {
        Ok(stop) => Ok(finish(rules, session, stats, stop)),
        Err(source) => {
            warn!("aborting cycle, returning partial results: {source}");
            let partial = finish(rules, session, stats, StopReason::HandleLost);
            Err(CycleError::DriverLost {
                source,
                partial: Box::new(partial),
            })
        }
    }
}

/// Scroll toward the oldest edge until a stop condition fires. Every pass
/// hands its rows to the session immediately; virtualized rows may be
/// evicted by the host after further scrolling, so waiting until the end
/// would lose them.
fn backfill<D: PageDriver>(
    driver: &mut D,
    rules: &Rules,
    session: &mut Session,
    stats: &mut CycleStats,
    cancel: &CancelFlag,
) -> Result<StopReason, DriverError> {
    let scroll = &rules.config.scroll;
    let retention = rules.config.retention_days;
    let mut last_row_count = 0usize;
    let mut stalled = 0u32;

    for attempt in 0..scroll.max_attempts {
        if cancel.is_cancelled() {
            info!("stop requested, flushing {} captured records", session.len());
            return Ok(StopReason::Cancelled);
        }

        let now = Utc::now();
        let today = now.date_naive();
        let pass = extract::capture_pass(driver, rules, attempt, now)?;
        stats.passes += 1;
        stats.rows_seen = pass.row_count;
        stats.skipped_rows += pass.skipped_rows;

        let oldest = oldest_resolved_date(&pass.records);
        for record in pass.records {
            session.accept(record, today, retention);
        }

        // One buffer day beyond the window guarantees full coverage of the
        // oldest retained day.
        if let Some(oldest) = oldest {
            if oldest < today - Days::days(retention + 1) {
                info!("oldest visible date {oldest} is past the retention window");
                return Ok(StopReason::DateCutoff);
            }
        }

        if pass.row_count > last_row_count {
            stalled = 0;
            last_row_count = pass.row_count;
        } else {
            stalled += 1;
            if stalled >= scroll.stability_threshold {
                info!("row count stable for {stalled} attempts, reached top of history");
                return Ok(StopReason::TopOfHistory);
            }
        }

        scroll_once(driver, rules)?;
        driver.settle(Duration::from_millis(scroll.settle_ms))?;
    }

    // Ceiling hit right after a scroll; fold in whatever it revealed.
    let now = Utc::now();
    let pass = extract::capture_pass(driver, rules, scroll.max_attempts, now)?;
    stats.passes += 1;
    stats.rows_seen = pass.row_count;
    for record in pass.records {
        session.accept(record, now.date_naive(), retention);
    }
    warn!("scroll attempt ceiling reached before any other stop condition");
    Ok(StopReason::AttemptCeiling)
}

/// Fallback-sourced timestamps are wall-clock noise during backlog
/// scrolling and must not drive the date cutoff.
fn oldest_resolved_date(records: &[Message]) -> Option<NaiveDate> {
    records
        .iter()
        .filter(|r| r.timestamp_source != TimestampSource::Fallback)
        .map(|r| r.timestamp.date_naive())
        .min()
}

fn scroll_once<D: PageDriver>(driver: &mut D, rules: &Rules) -> Result<(), DriverError> {
    let retries = rules.config.scroll.element_retries;
    let container = with_retry(retries, "scroll container query", || {
        let hits = driver.query(None, SCROLL_CONTAINER_SELECTOR)?;
        hits.first().copied().ok_or(DriverError::ElementMissing {
            selector: SCROLL_CONTAINER_SELECTOR.to_string(),
        })
    });
    match container {
        Ok(container) => driver.scroll_to_top(container),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("{e}; treating attempt as a stall");
            Ok(())
        }
    }
}

/// Classify the deduplicated chronological stream and run order
/// attribution. Used for complete and partial (cancelled/aborted) cycles
/// alike.
fn finish(rules: &Rules, session: Session, mut stats: CycleStats, stop: StopReason) -> CycleReport {
    stats.session = session.stats;
    let mut messages = session.into_messages();
    for message in &mut messages {
        message.message_type = classify::classify(rules, &message.cleaned_content, message.media_type);
    }
    let outcome = parser::parse_orders(rules, &mut messages);
    info!(
        "cycle finished ({stop}): {} messages, {} orders, {} unresolved lines",
        messages.len(),
        outcome.orders.len(),
        outcome.unresolved.len()
    );
    CycleReport {
        stop,
        messages,
        orders: outcome.orders,
        unresolved: outcome.unresolved,
        stats,
    }
}
