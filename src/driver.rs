use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Opaque handle to one rendered element, valid until the host evicts it.
pub type NodeId = u64;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no element matched `{selector}` within its wait bound")]
    ElementMissing { selector: String },
    #[error("node {0} is no longer attached")]
    StaleNode(NodeId),
    #[error("automation handle lost: {0}")]
    HandleLost(String),
}

impl DriverError {
    /// Fatal errors abort the cycle; everything else is retried or skipped
    /// per message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::HandleLost(_))
    }
}

/// The page-automation collaborator. One handle is exclusively owned for the
/// duration of a scrape cycle; all operations are synchronous and every wait
/// is bounded by an explicit timeout.
pub trait PageDriver {
    /// Elements matching a CSS selector, optionally scoped to a subtree.
    /// Comma-separated selector lists match any part.
    fn query(&mut self, scope: Option<NodeId>, selector: &str) -> Result<Vec<NodeId>, DriverError>;

    /// Rendered text content of a node (may span multiple lines).
    fn text(&mut self, node: NodeId) -> Result<String, DriverError>;

    /// Attribute value, `None` when absent.
    fn attr(&mut self, node: NodeId, name: &str) -> Result<Option<String>, DriverError>;

    /// Simulated click.
    fn click(&mut self, node: NodeId) -> Result<(), DriverError>;

    /// Scroll a container toward its oldest edge, asking the host to
    /// materialize older virtualized rows.
    fn scroll_to_top(&mut self, container: NodeId) -> Result<(), DriverError>;

    /// Block until the UI has settled or the bound elapses. Elapsing the
    /// bound is a degrade, not an error; drivers raise `ElementMissing`
    /// only from waits whose target can never appear.
    fn settle(&mut self, bound: Duration) -> Result<(), DriverError>;
}

/// Run `op`, retrying transient failures up to `retries` extra times.
/// Fatal errors pass straight through.
pub fn with_retry<T, F>(retries: u32, what: &str, mut op: F) -> Result<T, DriverError>
where
    F: FnMut() -> Result<T, DriverError>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_fatal() || attempt >= retries => return Err(e),
            Err(e) => {
                attempt += 1;
                debug!("retrying {what} after transient error ({attempt}/{retries}): {e}");
            }
        }
    }
}
