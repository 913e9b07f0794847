//! Concrete instantiations of a grammar.
//!
//! A [`ParseTree`] realizes one specific string of a grammar. Every node
//! caches the string it realizes, computed bottom-up at construction time;
//! trees are immutable and mutation means building a new tree via
//! [`ParseTree::substitute`].

use super::NodeId;

/// A realized repetition: the start, any number of body instances, the end.
#[derive(Debug, Clone)]
pub struct ParseTreeRepetition {
    node: NodeId,
    example: String,
    start: Box<ParseTree>,
    rep: Vec<ParseTree>,
    end: Box<ParseTree>,
}

impl ParseTreeRepetition {
    /// The realized start.
    pub fn start(&self) -> &ParseTree {
        &self.start
    }

    /// The realized body instances.
    pub fn rep(&self) -> &[ParseTree] {
        &self.rep
    }

    /// The realized end.
    pub fn end(&self) -> &ParseTree {
        &self.end
    }
}

/// A realized n-ary choice, recording the one alternative that was taken.
#[derive(Debug, Clone)]
pub struct ParseTreeMultiAlternation {
    node: NodeId,
    example: String,
    choice: Box<ParseTree>,
}

impl ParseTreeMultiAlternation {
    /// The alternative that was taken.
    pub fn choice(&self) -> &ParseTree {
        &self.choice
    }
}

/// A realized character-class leaf, recording the one string it emitted.
#[derive(Debug, Clone)]
pub struct ParseTreeMultiConstant {
    node: NodeId,
    example: String,
}

/// A realized merge redirection, recording the substituted alternative.
#[derive(Debug, Clone)]
pub struct ParseTreeMerge {
    node: NodeId,
    example: String,
    merge: Box<ParseTree>,
}

impl ParseTreeMerge {
    /// The parse of the merge partner that stood in for this node.
    pub fn merge(&self) -> &ParseTree {
        &self.merge
    }
}

/// One concrete string of a grammar together with how it was derived.
#[derive(Debug, Clone)]
pub enum ParseTree {
    /// Realized repetition.
    Repetition(ParseTreeRepetition),
    /// Realized choice.
    MultiAlternation(ParseTreeMultiAlternation),
    /// Realized character-class leaf.
    MultiConstant(ParseTreeMultiConstant),
    /// Realized merge redirection.
    Merge(ParseTreeMerge),
}

impl ParseTree {
    /// Build a realized repetition; its string is the concatenation of the
    /// parts in order.
    pub fn repetition(node: NodeId, start: ParseTree, rep: Vec<ParseTree>, end: ParseTree) -> Self {
        let mut example = String::new();
        example.push_str(start.example());
        for tree in &rep {
            example.push_str(tree.example());
        }
        example.push_str(end.example());

        ParseTree::Repetition(ParseTreeRepetition {
            node,
            example,
            start: Box::new(start),
            rep,
            end: Box::new(end),
        })
    }

    /// Build a realized choice; its string is the chosen alternative's.
    pub fn multi_alternation(node: NodeId, choice: ParseTree) -> Self {
        ParseTree::MultiAlternation(ParseTreeMultiAlternation {
            node,
            example: choice.example().to_string(),
            choice: Box::new(choice),
        })
    }

    /// Build a realized character-class leaf.
    pub fn multi_constant<S: Into<String>>(node: NodeId, example: S) -> Self {
        ParseTree::MultiConstant(ParseTreeMultiConstant {
            node,
            example: example.into(),
        })
    }

    /// Build a realized merge redirection; its string is the partner's.
    pub fn merge(node: NodeId, merge: ParseTree) -> Self {
        ParseTree::Merge(ParseTreeMerge {
            node,
            example: merge.example().to_string(),
            merge: Box::new(merge),
        })
    }

    /// The grammar node this tree instantiates.
    pub fn node(&self) -> NodeId {
        match self {
            ParseTree::Repetition(tree) => tree.node,
            ParseTree::MultiAlternation(tree) => tree.node,
            ParseTree::MultiConstant(tree) => tree.node,
            ParseTree::Merge(tree) => tree.node,
        }
    }

    /// The realized string.
    pub fn example(&self) -> &str {
        match self {
            ParseTree::Repetition(tree) => &tree.example,
            ParseTree::MultiAlternation(tree) => &tree.example,
            ParseTree::MultiConstant(tree) => &tree.example,
            ParseTree::Merge(tree) => &tree.example,
        }
    }

    /// The direct children, in derivation order.
    pub fn children(&self) -> Vec<&ParseTree> {
        match self {
            ParseTree::Repetition(tree) => {
                let mut children = Vec::with_capacity(tree.rep.len() + 2);
                children.push(tree.start.as_ref());
                children.extend(tree.rep.iter());
                children.push(tree.end.as_ref());
                children
            },
            ParseTree::MultiAlternation(tree) => vec![tree.choice.as_ref()],
            ParseTree::MultiConstant(_) => Vec::new(),
            ParseTree::Merge(tree) => vec![tree.merge.as_ref()],
        }
    }

    /// Number of nodes in this tree, itself included.
    pub fn len(&self) -> usize {
        1 + self.children().into_iter().map(ParseTree::len).sum::<usize>()
    }

    /// Always false: a parse tree has at least its own node.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Pre-order indices of all nodes, split into character-class leaves and
    /// everything else.
    pub fn descendant_pools(&self) -> (Vec<usize>, Vec<usize>) {
        let mut leaves = Vec::new();
        let mut inner = Vec::new();
        let mut counter = 0;
        self.pools_helper(&mut counter, &mut leaves, &mut inner);
        (leaves, inner)
    }

    fn pools_helper(&self, counter: &mut usize, leaves: &mut Vec<usize>, inner: &mut Vec<usize>) {
        match self {
            ParseTree::MultiConstant(_) => leaves.push(*counter),
            _ => inner.push(*counter),
        }
        *counter += 1;

        for child in self.children() {
            child.pools_helper(counter, leaves, inner);
        }
    }

    /// The node at the given pre-order index.
    pub fn descendant(&self, index: usize) -> Option<&ParseTree> {
        if index == 0 {
            return Some(self);
        }

        let mut offset = 1;
        for child in self.children() {
            let size = child.len();
            if index < offset + size {
                return child.descendant(index - offset);
            }
            offset += size;
        }

        None
    }

    /// Replace the node at the given pre-order index by `sub`, rebuilding the
    /// spine above it. `self` is untouched.
    pub fn substitute(&self, index: usize, sub: &ParseTree) -> ParseTree {
        if index == 0 {
            return sub.clone();
        }

        match self {
            ParseTree::Repetition(tree) => {
                let mut offset = 1;
                let mut place = |part: &ParseTree| {
                    let size = part.len();
                    let replaced = if index >= offset && index < offset + size {
                        part.substitute(index - offset, sub)
                    } else {
                        part.clone()
                    };
                    offset += size;
                    replaced
                };

                let start = place(&tree.start);
                let rep = tree.rep.iter().map(&mut place).collect();
                let end = place(&tree.end);
                ParseTree::repetition(tree.node, start, rep, end)
            },
            ParseTree::MultiAlternation(tree) => {
                ParseTree::multi_alternation(tree.node, tree.choice.substitute(index - 1, sub))
            },
            ParseTree::Merge(tree) => {
                ParseTree::merge(tree.node, tree.merge.substitute(index - 1, sub))
            },
            ParseTree::MultiConstant(_) => self.clone(),
        }
    }
}
