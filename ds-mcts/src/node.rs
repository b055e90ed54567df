//! Tree nodes, their UCT/RAVE statistics, and the arena that owns them.

use ds_core::DialogueState;

pub type NodeId = u32;

/// Labeled edge to a child node.
///
/// The prior is stored on the parent edge (not the child) because a
/// transposition-reused child can be reached from different parents with
/// different priors. `None` means the oracle never supplied one; selection
/// falls back to uniform over the parent's edges.
#[derive(Debug, Clone)]
pub struct Edge {
    pub action: String,
    pub prior: Option<f32>,
    pub child: NodeId,
}

pub struct Node {
    pub state: DialogueState,
    /// Non-owning back-reference; `None` for root.
    pub parent: Option<NodeId>,
    /// Action label on the edge from the first parent; `None` for root.
    pub action: Option<String>,
    pub children: Vec<Edge>,
    pub is_expanded: bool,

    // Direct statistics.
    pub n: u32,
    pub w: f32,
    // RAVE statistics (selection-path scope).
    pub rave_n: u32,
    pub rave_w: f32,
}

impl Node {
    pub fn new(state: DialogueState, parent: Option<NodeId>, action: Option<String>) -> Self {
        Self {
            state,
            parent,
            action,
            children: Vec::new(),
            is_expanded: false,
            n: 0,
            w: 0.0,
            rave_n: 0,
            rave_w: 0.0,
        }
    }

    /// Average value; 0 before the first visit.
    pub fn q(&self) -> f32 {
        if self.n == 0 {
            0.0
        } else {
            self.w / self.n as f32
        }
    }

    /// RAVE average value; 0 before the first RAVE visit.
    pub fn rave_q(&self) -> f32 {
        if self.rave_n == 0 {
            0.0
        } else {
            self.rave_w / self.rave_n as f32
        }
    }
}

/// Flat storage for one search tree.
///
/// Nodes are owned by a single `Vec` and addressed by their push index, so
/// parent and child links are plain `NodeId`s with no owning
/// back-references, and the whole tree drops in one piece when the search
/// returns.
#[derive(Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    /// Pre-sized for the expected growth of one search (roughly
    /// simulations × branching, never pruned).
    pub fn with_capacity(nodes: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(nodes),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Takes ownership of `node`; its id is the position it was pushed at.
    pub fn push(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }
}
