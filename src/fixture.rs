use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::{DriverError, NodeId, PageDriver};

/// One element in a transcript snapshot. `selectors` lists the CSS selectors
/// the element would match in the live client; attribute-presence selectors
/// (`[data-id]`) are derived from `attrs` and need not be listed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureNode {
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default)]
    pub text: String,
    /// Full text revealed after an expand affordance inside the same row is
    /// clicked. Models the client's "read more" truncation.
    #[serde(default)]
    pub expanded_text: Option<String>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<FixtureNode>,
}

impl FixtureNode {
    pub fn new(selector: &str) -> Self {
        Self {
            selectors: vec![selector.to_string()],
            ..Self::default()
        }
    }
}

/// Builder sugar for hand-assembled snapshots in tests; real snapshots are
/// captured as JSON.
#[cfg(test)]
impl FixtureNode {
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_child(mut self, child: FixtureNode) -> Self {
        self.children.push(child);
        self
    }
}

/// A virtualized transcript: `batches[0]` is visible on open; each scroll
/// toward the oldest edge materializes the next (older) batch above it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureSnapshot {
    pub chat_name: String,
    pub batches: Vec<Vec<FixtureNode>>,
}

impl FixtureSnapshot {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

struct Node {
    selectors: Vec<String>,
    text: String,
    expanded_text: Option<String>,
    attrs: BTreeMap<String, String>,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Which scroll reveal makes this node visible (0 = visible on open).
    batch: usize,
}

/// In-memory `PageDriver` replaying a `FixtureSnapshot`, used by the CLI
/// `replay`/`watch` commands and the test suite. Supports the selector
/// subset the extractor relies on: exact selector tags, comma lists, and
/// attribute-presence (`[name]`) matches.
pub struct FixtureDriver {
    nodes: Vec<Node>,
    /// Row arena ids per batch, chronological within the batch.
    batch_rows: Vec<Vec<usize>>,
    container: usize,
    revealed: usize,
    calls: u64,
    poison_after: Option<u64>,
}

const CONTAINER_SELECTOR: &str = "#main .copyable-area";

impl FixtureDriver {
    pub fn new(snapshot: &FixtureSnapshot) -> Self {
        let mut driver = Self {
            nodes: Vec::new(),
            batch_rows: Vec::new(),
            container: 0,
            revealed: 0,
            calls: 0,
            poison_after: None,
        };
        driver.container = driver.push_node(
            FixtureNode::new(CONTAINER_SELECTOR),
            None,
            0,
        );
        for (batch_idx, batch) in snapshot.batches.iter().enumerate() {
            let mut rows = Vec::with_capacity(batch.len());
            for row in batch {
                rows.push(driver.push_node(row.clone(), Some(driver.container), batch_idx));
            }
            driver.batch_rows.push(rows);
        }
        driver
    }

    /// After `calls` further driver operations, every operation fails with
    /// `HandleLost`. Models the browser dying mid-cycle.
    #[cfg(test)]
    pub fn poison_after(&mut self, calls: u64) {
        self.poison_after = Some(self.calls + calls);
    }

    fn push_node(&mut self, spec: FixtureNode, parent: Option<usize>, batch: usize) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            selectors: spec.selectors,
            text: spec.text,
            expanded_text: spec.expanded_text,
            attrs: spec.attrs,
            parent,
            children: Vec::new(),
            batch,
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        for child in spec.children {
            self.push_node(child, Some(id), batch);
        }
        id
    }

    fn check(&mut self) -> Result<(), DriverError> {
        self.calls += 1;
        if let Some(limit) = self.poison_after {
            if self.calls > limit {
                return Err(DriverError::HandleLost("fixture poisoned".to_string()));
            }
        }
        Ok(())
    }

    fn node(&self, id: NodeId) -> Result<&Node, DriverError> {
        self.nodes
            .get(id as usize)
            .ok_or(DriverError::StaleNode(id))
    }

    fn matches(node: &Node, selector: &str) -> bool {
        selector.split(',').map(str::trim).any(|part| {
            if let Some(name) = part
                .strip_prefix('[')
                .and_then(|p| p.strip_suffix(']'))
                .filter(|p| !p.contains('='))
            {
                node.attrs.contains_key(name)
            } else {
                node.selectors.iter().any(|s| s == part)
            }
        })
    }

    fn visible(&self, idx: usize) -> bool {
        self.nodes[idx].batch <= self.revealed
    }

    fn is_descendant(&self, idx: usize, ancestor: usize) -> bool {
        let mut cur = self.nodes[idx].parent;
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.nodes[p].parent;
        }
        false
    }

    /// Document-order walk: the container, then revealed batches
    /// oldest-first, each row's subtree depth-first.
    fn document_order(&self) -> Vec<usize> {
        let mut out = vec![self.container];
        for batch_idx in (0..self.batch_rows.len()).rev() {
            if batch_idx > self.revealed {
                continue;
            }
            for &row in &self.batch_rows[batch_idx] {
                self.walk(row, &mut out);
            }
        }
        out
    }

    fn walk(&self, idx: usize, out: &mut Vec<usize>) {
        out.push(idx);
        for &c in &self.nodes[idx].children {
            self.walk(c, out);
        }
    }

    fn effective_text(&self, idx: usize) -> String {
        if !self.nodes[idx].text.is_empty() {
            return self.nodes[idx].text.clone();
        }
        let mut parts = Vec::new();
        let mut subtree = Vec::new();
        self.walk(idx, &mut subtree);
        for n in subtree.into_iter().skip(1) {
            if !self.nodes[n].text.is_empty() {
                parts.push(self.nodes[n].text.clone());
            }
        }
        parts.join("\n")
    }

    fn row_ancestor(&self, idx: usize) -> usize {
        let mut cur = idx;
        while let Some(p) = self.nodes[cur].parent {
            if p == self.container {
                return cur;
            }
            cur = p;
        }
        cur
    }
}

impl PageDriver for FixtureDriver {
    fn query(&mut self, scope: Option<NodeId>, selector: &str) -> Result<Vec<NodeId>, DriverError> {
        self.check()?;
        if let Some(s) = scope {
            self.node(s)?;
        }
        let hits = self
            .document_order()
            .into_iter()
            .filter(|&idx| self.visible(idx))
            .filter(|&idx| match scope {
                Some(s) => self.is_descendant(idx, s as usize),
                None => true,
            })
            .filter(|&idx| Self::matches(&self.nodes[idx], selector))
            .map(|idx| idx as NodeId)
            .collect();
        Ok(hits)
    }

    fn text(&mut self, node: NodeId) -> Result<String, DriverError> {
        self.check()?;
        self.node(node)?;
        Ok(self.effective_text(node as usize))
    }

    fn attr(&mut self, node: NodeId, name: &str) -> Result<Option<String>, DriverError> {
        self.check()?;
        Ok(self.node(node)?.attrs.get(name).cloned())
    }

    fn click(&mut self, node: NodeId) -> Result<(), DriverError> {
        self.check()?;
        self.node(node)?;
        let row = self.row_ancestor(node as usize);
        let mut subtree = Vec::new();
        self.walk(row, &mut subtree);
        for idx in subtree {
            if let Some(full) = self.nodes[idx].expanded_text.take() {
                self.nodes[idx].text = full;
            }
        }
        Ok(())
    }

    fn scroll_to_top(&mut self, container: NodeId) -> Result<(), DriverError> {
        self.check()?;
        self.node(container)?;
        if self.revealed + 1 < self.batch_rows.len() {
            self.revealed += 1;
        }
        Ok(())
    }

    fn settle(&mut self, _bound: Duration) -> Result<(), DriverError> {
        self.check()
    }
}
