use crate::normalize::LinkScope;
use crate::result::LinkNode;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use url::Url;

/// Handle into the frontier's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(NodeId),
    Duplicate,
    BudgetExhausted,
    Closed,
}

#[derive(Debug, Clone)]
struct Entry {
    url: Url,
    node: LinkNode,
}

/// Visited set, pending queue and enqueue counter for one scan.
///
/// All three change together inside [`Frontier::admit`], so a URL can never
/// be queued twice and the budget can never be overrun. Nodes live in an
/// arena indexed by [`NodeId`]; the map from normalized URL to id is the
/// visited set.
#[derive(Debug)]
pub struct Frontier {
    entries: Vec<Entry>,
    index: HashMap<String, NodeId>,
    pending: VecDeque<NodeId>,
    max_links: usize,
    closed: bool,
    budget_hit: bool,
}

impl Frontier {
    pub fn new(max_links: usize) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            pending: VecDeque::new(),
            max_links,
            closed: false,
            budget_hit: false,
        }
    }

    pub fn admit(
        &mut self,
        url: Url,
        parent: Option<NodeId>,
        depth: u32,
        scope: LinkScope,
    ) -> Admission {
        if self.closed {
            return Admission::Closed;
        }
        if self.index.contains_key(url.as_str()) {
            return Admission::Duplicate;
        }
        if self.entries.len() >= self.max_links {
            self.budget_hit = true;
            return Admission::BudgetExhausted;
        }

        let id = NodeId(self.entries.len());
        let node = LinkNode {
            url: url.to_string(),
            parent_url: parent.map(|p| self.entries[p.0].node.url.clone()),
            depth,
            scope,
            discovered_at: Utc::now(),
        };
        self.index.insert(node.url.clone(), id);
        self.entries.push(Entry { url, node });
        self.pending.push_back(id);
        Admission::Admitted(id)
    }

    /// Remove and return every pending node at the shallowest pending depth,
    /// in discovery order.
    pub fn take_layer(&mut self) -> Vec<NodeId> {
        let Some(&front) = self.pending.front() else {
            return Vec::new();
        };
        let depth = self.entries[front.0].node.depth;

        let mut layer = Vec::new();
        while let Some(&id) = self.pending.front() {
            if self.entries[id.0].node.depth != depth {
                break;
            }
            self.pending.pop_front();
            layer.push(id);
        }
        layer
    }

    /// Stop admitting and drop everything still queued.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn node(&self, id: NodeId) -> &LinkNode {
        &self.entries[id.0].node
    }

    pub fn url(&self, id: NodeId) -> &Url {
        &self.entries[id.0].url
    }

    pub fn total_enqueued(&self) -> usize {
        self.entries.len()
    }

    pub fn remaining_budget(&self) -> usize {
        self.max_links.saturating_sub(self.entries.len())
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }

    /// True once at least one link was turned away for lack of budget.
    pub fn budget_exhausted(&self) -> bool {
        self.budget_hit
    }
}
