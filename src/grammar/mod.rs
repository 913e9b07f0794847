//! The grammar tree model.
//!
//! A learned grammar is a tree of [`Node`]s plus a symmetric [`NodeMerges`]
//! relation. Nodes live in a [`NodeArena`] and reference each other through
//! [`NodeId`] handles, so node identity is handle equality and all
//! identity-keyed bookkeeping (merges, backups, serialization ids) becomes
//! handle-keyed maps.
//!
//! Trees are produced once by synthesis, optionally persisted via
//! [`Grammar::save`] / [`Grammar::load`] and are read-only afterwards.

mod parse_tree;
mod serialize;

pub use parse_tree::*;
pub use serialize::{deserialize, serialize};

use std::io::{BufReader, Write};
use std::ops::Index;
use std::path::Path;

use indexmap::{IndexMap, IndexSet};

use crate::error::{GrammarError, SerializeError};

/// The surrounding text of a node in its original training example.
///
/// `pre`/`post` are the text to the left and right of the node's span and are
/// used to embed oracle queries. `extra_pre`/`extra_post` are an alternate
/// context that additionally validates generalizations; they differ from the
/// primary pair only when the node sits inside a repetition body, where the
/// alternate context corresponds to a duplicated body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    pre: String,
    post: String,
    extra_pre: String,
    extra_post: String,
}

impl Context {
    /// The empty context of a whole training example.
    pub fn root() -> Self {
        Self::default()
    }

    /// Compose a child context: the parent contributes its own surroundings
    /// outside the child's local ones.
    pub fn child(parent: &Context, pre: &str, post: &str, extra_pre: &str, extra_post: &str) -> Self {
        Self {
            pre: format!("{}{}", parent.pre, pre),
            post: format!("{}{}", post, parent.post),
            extra_pre: format!("{}{}", parent.extra_pre, extra_pre),
            extra_post: format!("{}{}", extra_post, parent.extra_post),
        }
    }

    pub(crate) fn from_parts(pre: String, post: String, extra_pre: String, extra_post: String) -> Self {
        Self {
            pre,
            post,
            extra_pre,
            extra_post,
        }
    }

    /// Text preceding the node in the original example.
    pub fn pre(&self) -> &str {
        &self.pre
    }

    /// Text following the node in the original example.
    pub fn post(&self) -> &str {
        &self.post
    }

    /// Alternate preceding text used for additional validation.
    pub fn extra_pre(&self) -> &str {
        &self.extra_pre
    }

    /// Alternate following text used for additional validation.
    pub fn extra_post(&self) -> &str {
        &self.extra_post
    }

    /// Whether the alternate context differs from the primary one and is
    /// therefore worth querying.
    pub fn use_extra(&self) -> bool {
        self.pre != self.extra_pre || self.post != self.extra_post
    }
}

/// The payload every node carries: the substring of the training example it
/// spans and the context it was observed in.
///
/// The spanned text is cached because it is not re-derivable once literals
/// have been generalized into character classes.
#[derive(Debug, Clone)]
pub struct NodeData {
    example: Option<String>,
    context: Context,
}

impl NodeData {
    /// Node data spanning the given text.
    pub fn new<S: Into<String>>(example: S, context: Context) -> Self {
        Self {
            example: Some(example.into()),
            context,
        }
    }

    /// Node data without a spanned text. Only the synthetic top-level
    /// alternation of a multi-example grammar is built this way.
    pub fn unspanned(context: Context) -> Self {
        Self {
            example: None,
            context,
        }
    }

    pub(crate) fn from_raw(example: Option<String>, context: Context) -> Self {
        Self { example, context }
    }

    /// The spanned text, empty if this node has none.
    pub fn example(&self) -> &str {
        self.example.as_deref().unwrap_or("")
    }

    /// The spanned text, `None` for the synthetic multi-example root.
    pub fn example_opt(&self) -> Option<&str> {
        self.example.as_deref()
    }

    /// The context the node was observed in.
    pub fn context(&self) -> &Context {
        &self.context
    }
}

/// Handle of a node inside a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in its arena.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A leaf holding the literal text of its span. Constants only exist in raw
/// synthesis output; the transformation passes replace them with
/// [`MultiConstantNode`]s.
#[derive(Debug, Clone)]
pub struct ConstantNode {
    data: NodeData,
}

impl ConstantNode {
    /// Create a constant leaf.
    pub fn new(data: NodeData) -> Self {
        Self { data }
    }

    /// The node payload.
    pub fn data(&self) -> &NodeData {
        &self.data
    }
}

/// A leaf describing a fixed-length sequence of character positions, each
/// with a set of emittable characters (`options`) and the representative
/// subset that was oracle-validated (`checks`).
#[derive(Debug, Clone)]
pub struct MultiConstantNode {
    data: NodeData,
    options: Vec<IndexSet<char>>,
    checks: Vec<IndexSet<char>>,
}

impl MultiConstantNode {
    /// Create a multi-constant leaf. The two lists must have equal length,
    /// one entry per character position.
    pub fn new(
        data: NodeData,
        options: Vec<Vec<char>>,
        checks: Vec<Vec<char>>,
    ) -> Result<Self, GrammarError> {
        if options.len() != checks.len() {
            return Err(GrammarError::MismatchedCharacterLists {
                options: options.len(),
                checks: checks.len(),
            });
        }

        Ok(Self {
            data,
            options: options.into_iter().map(|c| c.into_iter().collect()).collect(),
            checks: checks.into_iter().map(|c| c.into_iter().collect()).collect(),
        })
    }

    /// The node payload.
    pub fn data(&self) -> &NodeData {
        &self.data
    }

    /// Per-position sets of characters the fuzzer may emit.
    pub fn options(&self) -> &[IndexSet<char>] {
        &self.options
    }

    /// Per-position sets of characters that were used to validate the widening.
    pub fn checks(&self) -> &[IndexSet<char>] {
        &self.checks
    }

    /// Number of character positions.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Whether this leaf spans no characters at all.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// A binary choice between two subtrees. Only exists transiently in raw
/// synthesis output; flattening rewrites it into a [`MultiAlternationNode`].
#[derive(Debug, Clone)]
pub struct AlternationNode {
    data: NodeData,
    first: NodeId,
    second: NodeId,
}

impl AlternationNode {
    /// Create a binary alternation.
    pub fn new(data: NodeData, first: NodeId, second: NodeId) -> Self {
        Self { data, first, second }
    }

    /// The node payload.
    pub fn data(&self) -> &NodeData {
        &self.data
    }

    /// The left subtree.
    pub fn first(&self) -> NodeId {
        self.first
    }

    /// The right subtree.
    pub fn second(&self) -> NodeId {
        self.second
    }
}

/// An n-ary choice over an ordered list of subtrees. Insertion order is the
/// choice-index order exposed to sampling.
#[derive(Debug, Clone)]
pub struct MultiAlternationNode {
    data: NodeData,
    children: Vec<NodeId>,
}

impl MultiAlternationNode {
    /// Create an n-ary alternation.
    pub fn new(data: NodeData, children: Vec<NodeId>) -> Self {
        Self { data, children }
    }

    /// The node payload.
    pub fn data(&self) -> &NodeData {
        &self.data
    }

    /// The alternatives, in choice-index order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Zero or more repetitions of `rep`, bracketed by `start` and `end` (either
/// of which may span the empty string).
#[derive(Debug, Clone)]
pub struct RepetitionNode {
    data: NodeData,
    start: NodeId,
    rep: NodeId,
    end: NodeId,
}

impl RepetitionNode {
    /// Create a repetition.
    pub fn new(data: NodeData, start: NodeId, rep: NodeId, end: NodeId) -> Self {
        Self { data, start, rep, end }
    }

    /// The node payload.
    pub fn data(&self) -> &NodeData {
        &self.data
    }

    /// The prefix subtree.
    pub fn start(&self) -> NodeId {
        self.start
    }

    /// The repeated body.
    pub fn rep(&self) -> NodeId {
        self.rep
    }

    /// The suffix subtree.
    pub fn end(&self) -> NodeId {
        self.end
    }
}

/// A grammar tree node.
#[derive(Debug, Clone)]
pub enum Node {
    /// Literal leaf.
    Constant(ConstantNode),
    /// Character-class leaf.
    MultiConstant(MultiConstantNode),
    /// Transient binary choice.
    Alternation(AlternationNode),
    /// N-ary choice.
    MultiAlternation(MultiAlternationNode),
    /// Bracketed repetition.
    Repetition(RepetitionNode),
}

impl Node {
    /// The node payload.
    pub fn data(&self) -> &NodeData {
        match self {
            Node::Constant(node) => node.data(),
            Node::MultiConstant(node) => node.data(),
            Node::Alternation(node) => node.data(),
            Node::MultiAlternation(node) => node.data(),
            Node::Repetition(node) => node.data(),
        }
    }

    /// The node's direct children, in tree order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Node::Constant(_) | Node::MultiConstant(_) => Vec::new(),
            Node::Alternation(node) => vec![node.first(), node.second()],
            Node::MultiAlternation(node) => node.children().to_vec(),
            Node::Repetition(node) => vec![node.start(), node.rep(), node.end()],
        }
    }

    /// Variant name, for diagnostics.
    pub fn variant(&self) -> &'static str {
        match self {
            Node::Constant(_) => "constant",
            Node::MultiConstant(_) => "multi-constant",
            Node::Alternation(_) => "alternation",
            Node::MultiAlternation(_) => "multi-alternation",
            Node::Repetition(_) => "repetition",
        }
    }
}

/// Owns the nodes of one or more grammar trees and hands out [`NodeId`]
/// handles for them.
#[derive(Debug, Default, Clone)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a node into the arena and return its handle.
    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Look up a node, `None` if the handle belongs to another arena.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Number of nodes ever allocated.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Index<NodeId> for NodeArena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}

/// All nodes reachable from `root`, in pre-order (a node before its children,
/// children in tree order). The root itself is included.
pub fn descendants(arena: &NodeArena, root: NodeId) -> Vec<NodeId> {
    let mut nodes = Vec::new();
    let mut stack = vec![root];

    while let Some(id) = stack.pop() {
        nodes.push(id);

        let children = arena[id].children();
        for &child in children.iter().rev() {
            stack.push(child);
        }
    }

    nodes
}

/// A symmetric relation over node handles recording which repetition bodies
/// are interchangeable. Once a pair is added it is never removed.
#[derive(Debug, Default, Clone)]
pub struct NodeMerges {
    merges: IndexMap<NodeId, IndexSet<NodeId>>,
}

impl NodeMerges {
    /// Create an empty relation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `first` and `second` are interchangeable, in both directions.
    pub fn add(&mut self, first: NodeId, second: NodeId) {
        self.merges.entry(first).or_default().insert(second);
        self.merges.entry(second).or_default().insert(first);
    }

    /// Copy every pair of `other` into this relation.
    pub fn extend(&mut self, other: &NodeMerges) {
        for (&first, partners) in &other.merges {
            for &second in partners {
                self.add(first, second);
            }
        }
    }

    /// The partners recorded for a node, if any.
    pub fn get(&self, node: NodeId) -> Option<&IndexSet<NodeId>> {
        self.merges.get(&node)
    }

    /// Whether the pair has been recorded.
    pub fn contains(&self, first: NodeId, second: NodeId) -> bool {
        self.merges
            .get(&first)
            .map(|partners| partners.contains(&second))
            .unwrap_or(false)
    }

    /// Iterate over all nodes with at least one partner, with their partners.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &IndexSet<NodeId>)> {
        self.merges.iter().map(|(&node, partners)| (node, partners))
    }

    /// Number of nodes with at least one partner.
    pub fn len(&self) -> usize {
        self.merges.len()
    }

    /// Whether no pair has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.merges.is_empty()
    }
}

/// A learned grammar: an arena of nodes, the root of the tree and the merge
/// relation over its repetition bodies.
#[derive(Debug, Clone)]
pub struct Grammar {
    arena: NodeArena,
    root: NodeId,
    merges: NodeMerges,
}

impl Grammar {
    /// Assemble a grammar from its parts.
    pub fn new(arena: NodeArena, root: NodeId, merges: NodeMerges) -> Self {
        Self { arena, root, merges }
    }

    /// The arena holding every node of this grammar.
    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The merge relation.
    pub fn merges(&self) -> &NodeMerges {
        &self.merges
    }

    /// Look up a node by handle.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.arena[id]
    }

    /// Whether sampling may recurse through merged repetition bodies.
    pub fn is_recursive(&self) -> bool {
        !self.merges.is_empty()
    }

    /// Write the grammar to `path` in the binary format. The data is staged
    /// in a temporary file and atomically renamed into place, so a crash
    /// cannot leave a half-written file behind.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SerializeError> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut encoded = Vec::new();
        serialize(self, &mut encoded)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&encoded)?;
        file.persist(path).map_err(|e| SerializeError::Io(e.error))?;

        Ok(())
    }

    /// Read a grammar back from a file written by [`Grammar::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SerializeError> {
        let file = std::fs::File::open(path)?;
        deserialize(&mut BufReader::new(file))
    }
}
