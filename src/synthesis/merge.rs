//! Detection of interchangeable repetition bodies.
//!
//! Two repetition nodes merge when the oracle accepts each body doubled
//! inside the other's context. Terminal repetitions (bodies that are plain
//! constants or character classes) are skipped, they carry no structure worth
//! recursing into. A cheap syntactic signal, both bodies containing a
//! punctuation-anchored character position, accepts the merge without further
//! queries; otherwise every example string either body is known to produce
//! must validate doubled in the other's context.

use ahash::AHashMap;
use indexmap::IndexSet;
use itertools::Itertools;
use tracing::debug;

use crate::grammar::{descendants, Node, NodeArena, NodeId, NodeMerges};
use crate::oracle::Oracle;
use crate::synthesis::transform::class_alternation_children;
use crate::synthesis::{char_bounds, oracle_check};

/// Scan every pair of nodes drawn from two (possibly identical) trees and
/// record the merges that validate.
pub(crate) fn merges_single<O: Oracle + ?Sized>(
    arena: &NodeArena,
    first_root: NodeId,
    second_root: NodeId,
    oracle: &O,
) -> NodeMerges {
    let mut merges = NodeMerges::new();
    let mut processed = NodeMerges::new();

    let first_examples = collect_examples(arena, first_root);
    let second_examples = collect_examples(arena, second_root);

    for (first, second) in descendants(arena, first_root)
        .into_iter()
        .cartesian_product(descendants(arena, second_root))
    {
        if processed.contains(first, second) {
            continue;
        }
        processed.add(first, second);

        try_merge(
            arena,
            first,
            second,
            &first_examples,
            &second_examples,
            oracle,
            &mut merges,
        );
    }

    merges
}

/// Run the pairwise scan over the cross product of all example roots, each
/// unordered pair processed once.
pub(crate) fn merges_multiple<O: Oracle + ?Sized>(
    arena: &NodeArena,
    roots: &[NodeId],
    oracle: &O,
) -> NodeMerges {
    let mut merges = NodeMerges::new();
    let mut processed = NodeMerges::new();

    for &first in roots {
        for &second in roots {
            if processed.contains(first, second) {
                continue;
            }
            processed.add(first, second);

            merges.extend(&merges_single(arena, first, second, oracle));
        }
    }

    merges
}

fn try_merge<O: Oracle + ?Sized>(
    arena: &NodeArena,
    first: NodeId,
    second: NodeId,
    first_examples: &AHashMap<NodeId, IndexSet<String>>,
    second_examples: &AHashMap<NodeId, IndexSet<String>>,
    oracle: &O,
    merges: &mut NodeMerges,
) {
    if first == second {
        return;
    }

    let (Node::Repetition(first_node), Node::Repetition(second_node)) =
        (&arena[first], &arena[second])
    else {
        return;
    };

    let first_rep = first_node.rep();
    let second_rep = second_node.rep();

    if matches!(&arena[first_rep], Node::Constant(_) | Node::MultiConstant(_))
        || matches!(&arena[second_rep], Node::Constant(_) | Node::MultiConstant(_))
    {
        return;
    }

    if class_alternation_children(arena, first_rep, true).is_some()
        || class_alternation_children(arena, second_rep, true).is_some()
    {
        return;
    }

    let first_data = arena[first_rep].data();
    let second_data = arena[second_rep].data();

    let doubled_second = format!("{0}{0}", second_data.example());
    let doubled_first = format!("{0}{0}", first_data.example());
    if !oracle_check(oracle, first_data.context(), [doubled_second])
        || !oracle_check(oracle, second_data.context(), [doubled_first])
    {
        return;
    }

    let structured = is_structured(arena, first_rep) && is_structured(arena, second_rep);
    let confirmed = structured || {
        let first_candidates: Vec<String> = examples_of(second_examples, second_rep)
            .map(|example| format!("{example}{example}"))
            .collect();
        let second_candidates: Vec<String> = examples_of(first_examples, first_rep)
            .map(|example| format!("{example}{example}"))
            .collect();

        oracle_check(oracle, first_data.context(), first_candidates)
            && oracle_check(oracle, second_data.context(), second_candidates)
    };

    if confirmed {
        debug!(
            first = first_data.example(),
            second = second_data.example(),
            structured,
            "merging repetition bodies"
        );
        merges.add(first_rep, second_rep);
    }
}

fn examples_of<'a>(
    examples: &'a AHashMap<NodeId, IndexSet<String>>,
    id: NodeId,
) -> impl Iterator<Item = &'a String> + 'a {
    examples.get(&id).into_iter().flatten()
}

/// Whether any descendant character class has a position that was validated
/// with exactly one character, i.e. the subtree is anchored by punctuation.
fn is_structured(arena: &NodeArena, id: NodeId) -> bool {
    descendants(arena, id).into_iter().any(|node| match &arena[node] {
        Node::MultiConstant(mconst) => mconst.checks().iter().any(|set| set.len() == 1),
        _ => false,
    })
}

/// For every node, the set of strings it is known to produce, propagated
/// bottom-up from the leaves.
fn collect_examples(arena: &NodeArena, root: NodeId) -> AHashMap<NodeId, IndexSet<String>> {
    let mut examples = AHashMap::new();
    collect_examples_helper(arena, root, &mut examples);
    examples
}

fn collect_examples_helper(
    arena: &NodeArena,
    id: NodeId,
    examples: &mut AHashMap<NodeId, IndexSet<String>>,
) {
    for child in arena[id].children() {
        collect_examples_helper(arena, child, examples);
    }

    let additions: Vec<String> = match &arena[id] {
        Node::Repetition(rep) => {
            let start_example = arena[rep.start()].data().example();
            let rep_example = arena[rep.rep()].data().example();
            let end_example = arena[rep.end()].data().example();

            let mut additions = Vec::new();
            for example in examples.get(&rep.start()).into_iter().flatten() {
                additions.push(format!("{example}{rep_example}{end_example}"));
            }
            for example in examples.get(&rep.rep()).into_iter().flatten() {
                additions.push(format!("{start_example}{example}{end_example}"));
            }
            for example in examples.get(&rep.end()).into_iter().flatten() {
                additions.push(format!("{start_example}{rep_example}{example}"));
            }
            additions
        },
        Node::MultiConstant(mconst) => {
            let example = mconst.data().example();
            let bounds = char_bounds(example);

            let mut additions = Vec::new();
            if bounds.len() == mconst.len() + 1 {
                for position in 0..mconst.len() {
                    let pre = &example[..bounds[position]];
                    let post = &example[bounds[position + 1]..];
                    for &c in &mconst.checks()[position] {
                        additions.push(format!("{pre}{c}{post}"));
                    }
                }
            }
            additions
        },
        Node::Alternation(alt) => {
            let mut additions = Vec::new();
            for child in [alt.first(), alt.second()] {
                additions.extend(examples.get(&child).into_iter().flatten().cloned());
            }
            additions
        },
        Node::Constant(constant) => vec![constant.data().example().to_string()],
        Node::MultiAlternation(malt) => {
            let mut additions = Vec::new();
            for &child in malt.children() {
                additions.extend(examples.get(&child).into_iter().flatten().cloned());
            }
            additions
        },
    };

    if !additions.is_empty() {
        examples.entry(id).or_default().extend(additions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{ConstantNode, Context, MultiConstantNode, NodeData, RepetitionNode};

    #[test]
    fn test_example_propagation_through_repetition() {
        let mut arena = NodeArena::new();
        let start = arena.alloc(Node::Constant(ConstantNode::new(NodeData::new(
            "",
            Context::root(),
        ))));
        let body = arena.alloc(Node::Constant(ConstantNode::new(NodeData::new(
            "a",
            Context::root(),
        ))));
        let end = arena.alloc(Node::Constant(ConstantNode::new(NodeData::new(
            "",
            Context::root(),
        ))));
        let rep = arena.alloc(Node::Repetition(RepetitionNode::new(
            NodeData::new("a", Context::root()),
            start,
            body,
            end,
        )));

        let examples = collect_examples(&arena, rep);
        let rep_examples: Vec<&String> = examples_of(&examples, rep).collect();
        assert_eq!(rep_examples, vec!["a"]);
    }

    #[test]
    fn test_example_enumeration_of_character_class() {
        let mut arena = NodeArena::new();
        let node = MultiConstantNode::new(
            NodeData::new("ab", Context::root()),
            vec![vec!['a', 'x'], vec!['b', 'y']],
            vec![vec!['a', 'x'], vec!['b', 'y']],
        )
        .unwrap();
        let id = arena.alloc(Node::MultiConstant(node));

        let examples = collect_examples(&arena, id);
        // Position 0 varies first, then position 1; the duplicate of the
        // original text is dropped by the set.
        let found: Vec<&String> = examples_of(&examples, id).collect();
        assert_eq!(found, vec!["ab", "xb", "ay"]);
    }
}
