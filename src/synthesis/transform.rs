//! Normalization of raw synthesis trees.
//!
//! Two passes run in order. Flattening rewrites the transient binary
//! alternations into n-ary choice nodes. Generalization replaces every
//! literal leaf by a character-class leaf, widening each position as far as
//! the oracle allows; choice nodes that really describe a character class
//! inside a repetition body are generalized jointly so that no alternative is
//! validated twice.

use ahash::AHashSet;
use indexmap::IndexMap;
use tracing::debug;

use crate::error::GrammarError;
use crate::grammar::{
    AlternationNode, Context, MultiAlternationNode, MultiConstantNode, Node, NodeArena, NodeId,
    RepetitionNode,
};
use crate::oracle::Oracle;
use crate::synthesis::characters::generalizations;
use crate::synthesis::{char_bounds, oracle_check};

/// Run both passes over the tree rooted at `root` and return the new root.
pub(crate) fn transform<O: Oracle + ?Sized>(
    arena: &mut NodeArena,
    root: NodeId,
    oracle: &O,
) -> Result<NodeId, GrammarError> {
    let flat = flatten(arena, root);
    generalize(arena, flat, oracle)
}

/// Rewrite binary alternations into n-ary choices. Nodes that need no
/// rewriting keep their handle, so flattening an already-flat tree is the
/// identity.
pub(crate) fn flatten(arena: &mut NodeArena, id: NodeId) -> NodeId {
    match &arena[id] {
        Node::Constant(_) | Node::MultiConstant(_) => id,
        Node::Alternation(alt) => {
            let data = alt.data().clone();
            let (first, second) = (alt.first(), alt.second());

            let first = flatten(arena, first);
            let second = flatten(arena, second);

            let mut children = Vec::new();
            match &arena[first] {
                Node::MultiAlternation(malt) => children.extend_from_slice(malt.children()),
                _ => children.push(first),
            }
            match &arena[second] {
                Node::MultiAlternation(malt) => children.extend_from_slice(malt.children()),
                _ => children.push(second),
            }

            arena.alloc(Node::MultiAlternation(MultiAlternationNode::new(data, children)))
        },
        Node::MultiAlternation(malt) => {
            let data = malt.data().clone();
            let children = malt.children().to_vec();

            let new_children: Vec<NodeId> =
                children.iter().map(|&child| flatten(arena, child)).collect();
            if new_children == children {
                id
            } else {
                arena.alloc(Node::MultiAlternation(MultiAlternationNode::new(data, new_children)))
            }
        },
        Node::Repetition(rep) => {
            let data = rep.data().clone();
            let (start, rep_child, end) = (rep.start(), rep.rep(), rep.end());

            let new_start = flatten(arena, start);
            let new_rep = flatten(arena, rep_child);
            let new_end = flatten(arena, end);

            if (new_start, new_rep, new_end) == (start, rep_child, end) {
                id
            } else {
                arena.alloc(Node::Repetition(RepetitionNode::new(data, new_start, new_rep, new_end)))
            }
        },
    }
}

/// If `id` is an n-ary choice sitting directly in a repetition body whose
/// alternatives are all constants (or repetitions of constants with empty
/// brackets), return the constant-carrying children. Such a choice is really
/// a character class and is generalized jointly.
pub(crate) fn class_alternation_children(
    arena: &NodeArena,
    id: NodeId,
    is_parent_rep: bool,
) -> Option<Vec<NodeId>> {
    if !is_parent_rep {
        return None;
    }

    let Node::MultiAlternation(malt) = &arena[id] else {
        return None;
    };

    let mut constant_children = Vec::new();
    for &child in malt.children() {
        match &arena[child] {
            Node::Repetition(rep) => {
                for part in [rep.start(), rep.rep(), rep.end()] {
                    if !matches!(&arena[part], Node::Constant(_) | Node::MultiConstant(_)) {
                        return None;
                    }
                }
                if !arena[rep.start()].data().example().is_empty()
                    || !arena[rep.end()].data().example().is_empty()
                {
                    return None;
                }
                constant_children.push(rep.rep());
            },
            Node::Constant(_) | Node::MultiConstant(_) => constant_children.push(child),
            _ => return None,
        }
    }

    Some(constant_children)
}

fn collect_class_alternations(
    arena: &NodeArena,
    id: NodeId,
    is_parent_rep: bool,
    result: &mut IndexMap<NodeId, Vec<NodeId>>,
) {
    if let Some(children) = class_alternation_children(arena, id, is_parent_rep) {
        result.insert(id, children);
    } else if let Node::Repetition(rep) = &arena[id] {
        collect_class_alternations(arena, rep.start(), false, result);
        collect_class_alternations(arena, rep.rep(), true, result);
        collect_class_alternations(arena, rep.end(), false, result);
    } else {
        for child in arena[id].children() {
            collect_class_alternations(arena, child, false, result);
        }
    }
}

/// Widen every literal leaf into a character-class leaf.
pub(crate) fn generalize<O: Oracle + ?Sized>(
    arena: &mut NodeArena,
    root: NodeId,
    oracle: &O,
) -> Result<NodeId, GrammarError> {
    let mut claimed = IndexMap::new();
    collect_class_alternations(arena, root, false, &mut claimed);

    let mut ignored = AHashSet::new();
    for children in claimed.values() {
        ignored.extend(children.iter().copied());
    }

    generalize_node(arena, root, oracle, &claimed, &ignored)
}

fn generalize_node<O: Oracle + ?Sized>(
    arena: &mut NodeArena,
    id: NodeId,
    oracle: &O,
    claimed: &IndexMap<NodeId, Vec<NodeId>>,
    ignored: &AHashSet<NodeId>,
) -> Result<NodeId, GrammarError> {
    match arena[id].clone() {
        Node::Constant(_) => {
            if ignored.contains(&id) {
                Ok(id)
            } else {
                generalize_constant(arena, id, oracle)
            }
        },
        Node::MultiConstant(_) => Err(GrammarError::UnexpectedNode {
            found: "multi-constant",
            operation: "generalization",
        }),
        Node::Alternation(alt) => {
            let first = generalize_node(arena, alt.first(), oracle, claimed, ignored)?;
            let second = generalize_node(arena, alt.second(), oracle, claimed, ignored)?;
            Ok(arena.alloc(Node::Alternation(AlternationNode::new(alt.data().clone(), first, second))))
        },
        Node::MultiAlternation(malt) => {
            if let Some(children) = claimed.get(&id) {
                generalize_class_alternation(arena, id, children.clone(), oracle)
            } else {
                let mut new_children = Vec::with_capacity(malt.children().len());
                for &child in malt.children() {
                    new_children.push(generalize_node(arena, child, oracle, claimed, ignored)?);
                }
                Ok(arena.alloc(Node::MultiAlternation(MultiAlternationNode::new(
                    malt.data().clone(),
                    new_children,
                ))))
            }
        },
        Node::Repetition(rep) => {
            let start = generalize_node(arena, rep.start(), oracle, claimed, ignored)?;
            let body = generalize_node(arena, rep.rep(), oracle, claimed, ignored)?;
            let end = generalize_node(arena, rep.end(), oracle, claimed, ignored)?;
            Ok(arena.alloc(Node::Repetition(RepetitionNode::new(rep.data().clone(), start, body, end))))
        },
    }
}

fn generalize_constant<O: Oracle + ?Sized>(
    arena: &mut NodeArena,
    id: NodeId,
    oracle: &O,
) -> Result<NodeId, GrammarError> {
    let data = match &arena[id] {
        Node::Constant(constant) => constant.data().clone(),
        other => {
            return Err(GrammarError::UnexpectedNode {
                found: other.variant(),
                operation: "constant generalization",
            })
        },
    };

    let example = data.example().to_string();
    let context = data.context().clone();

    if !example.is_empty() {
        debug!(%example, pre = context.pre(), post = context.post(), "generalizing constant");
    }

    let characters: Vec<char> = example.chars().collect();
    let bounds = char_bounds(&example);

    let mut options = Vec::with_capacity(characters.len());
    let mut checks = Vec::with_capacity(characters.len());

    for (i, &cur) in characters.iter().enumerate() {
        let pre = &example[..bounds[i]];
        let post = &example[bounds[i + 1]..];
        let cur_context = Context::child(&context, pre, post, pre, post);

        let mut option = vec![cur];
        let mut check = vec![cur];

        for rule in generalizations() {
            if !rule.triggers.contains(&cur) {
                continue;
            }

            let candidates: Vec<String> = rule
                .checks
                .iter()
                .filter(|&&c| c != cur)
                .map(|c| c.to_string())
                .collect();

            if oracle_check(oracle, &cur_context, candidates) {
                option.extend(rule.characters.iter().copied().filter(|&c| c != cur));
                check.extend(rule.checks.iter().copied().filter(|&c| c != cur));
            }
        }

        options.push(option);
        checks.push(check);
    }

    let node = MultiConstantNode::new(data, options, checks)?;
    Ok(arena.alloc(Node::MultiConstant(node)))
}

fn is_covered(arena: &NodeArena, example: &str, mconsts: &[NodeId]) -> bool {
    let characters: Vec<char> = example.chars().collect();

    'next_node: for &id in mconsts {
        let Node::MultiConstant(mconst) = &arena[id] else {
            continue;
        };

        if mconst.len() != characters.len() {
            continue;
        }

        for (i, c) in characters.iter().enumerate() {
            if !mconst.options()[i].contains(c) {
                continue 'next_node;
            }
        }

        return true;
    }

    false
}

fn generalize_class_alternation<O: Oracle + ?Sized>(
    arena: &mut NodeArena,
    id: NodeId,
    children: Vec<NodeId>,
    oracle: &O,
) -> Result<NodeId, GrammarError> {
    let data = arena[id].data().clone();
    debug!(example = data.example(), "generalizing character-class alternation");

    let mut constants = Vec::new();
    for child in children {
        let example = arena[child].data().example().to_string();
        if !is_covered(arena, &example, &constants) {
            constants.push(generalize_constant(arena, child, oracle)?);
        }
    }

    Ok(arena.alloc(Node::MultiAlternation(MultiAlternationNode::new(data, constants))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{ConstantNode, NodeData};

    fn constant(arena: &mut NodeArena, example: &str) -> NodeId {
        arena.alloc(Node::Constant(ConstantNode::new(NodeData::new(
            example,
            Context::root(),
        ))))
    }

    #[test]
    fn test_flatten_nested_alternation() {
        let mut arena = NodeArena::new();
        let a = constant(&mut arena, "a");
        let b = constant(&mut arena, "b");
        let c = constant(&mut arena, "c");

        let inner = arena.alloc(Node::Alternation(AlternationNode::new(
            NodeData::new("ab", Context::root()),
            a,
            b,
        )));
        let outer = arena.alloc(Node::Alternation(AlternationNode::new(
            NodeData::new("abc", Context::root()),
            inner,
            c,
        )));

        let flat = flatten(&mut arena, outer);
        match &arena[flat] {
            Node::MultiAlternation(malt) => assert_eq!(malt.children(), &[a, b, c]),
            other => panic!("expected multi-alternation, got {}", other.variant()),
        }
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let mut arena = NodeArena::new();
        let a = constant(&mut arena, "a");
        let b = constant(&mut arena, "b");
        let alt = arena.alloc(Node::Alternation(AlternationNode::new(
            NodeData::new("ab", Context::root()),
            a,
            b,
        )));

        let flat = flatten(&mut arena, alt);
        assert_eq!(flatten(&mut arena, flat), flat);
    }

    #[test]
    fn test_generalize_widens_digit() {
        let oracle = |input: &str| input.chars().all(|c| c.is_ascii_digit());
        let mut arena = NodeArena::new();
        let five = constant(&mut arena, "5");

        let id = generalize(&mut arena, five, &oracle).unwrap();
        match &arena[id] {
            Node::MultiConstant(mconst) => {
                assert_eq!(mconst.len(), 1);
                assert_eq!(mconst.options()[0].len(), 10);
                assert!(mconst.options()[0].contains(&'0'));
                let checks: Vec<char> = mconst.checks()[0].iter().copied().collect();
                assert_eq!(checks, vec!['5', '0', '1', '9']);
            },
            other => panic!("expected multi-constant, got {}", other.variant()),
        }
    }

    #[test]
    fn test_generalize_respects_oracle() {
        // The oracle accepts only 'a'*, so the literal must not widen.
        let oracle = |input: &str| input.chars().all(|c| c == 'a');
        let mut arena = NodeArena::new();
        let a = constant(&mut arena, "a");

        let id = generalize(&mut arena, a, &oracle).unwrap();
        match &arena[id] {
            Node::MultiConstant(mconst) => {
                let options: Vec<char> = mconst.options()[0].iter().copied().collect();
                assert_eq!(options, vec!['a']);
            },
            other => panic!("expected multi-constant, got {}", other.variant()),
        }
    }

    #[test]
    fn test_class_alternation_generalized_jointly() {
        let oracle = |input: &str| input.chars().all(|c| c == 'a' || c == 'b');
        let mut arena = NodeArena::new();

        let a = constant(&mut arena, "a");
        let b = constant(&mut arena, "b");
        let dup = constant(&mut arena, "a");
        let malt = arena.alloc(Node::MultiAlternation(MultiAlternationNode::new(
            NodeData::new("a", Context::root()),
            vec![a, b, dup],
        )));

        let start = constant(&mut arena, "");
        let end = constant(&mut arena, "");
        let root = arena.alloc(Node::Repetition(RepetitionNode::new(
            NodeData::new("ab", Context::root()),
            start,
            malt,
            end,
        )));

        let id = generalize(&mut arena, root, &oracle).unwrap();
        let Node::Repetition(rep) = &arena[id] else {
            panic!("expected repetition");
        };
        let Node::MultiAlternation(choices) = &arena[rep.rep()] else {
            panic!("expected multi-alternation body");
        };

        // "a" and "b" each stay singleton classes, the duplicate "a" is
        // covered by the first class and dropped.
        assert_eq!(choices.children().len(), 2);
        for &child in choices.children() {
            assert!(matches!(&arena[child], Node::MultiConstant(_)));
        }
    }
}
