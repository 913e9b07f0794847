//! Grammar synthesis from training examples.
//!
//! Every entry point takes one or more examples that the oracle accepts and
//! returns a [`Grammar`]. Per example, the raw decomposition and the
//! normalization passes run first; the merge detection then links
//! interchangeable repetition bodies within and across examples, which is
//! what turns flat per-example trees into a grammar with shared recursive
//! structure.

mod characters;
mod merge;
mod regex;
mod transform;

use std::time::Instant;

use tracing::{debug, info};

use crate::error::SynthesisError;
use crate::grammar::{
    Context, Grammar, MultiAlternationNode, Node, NodeArena, NodeData, NodeId, NodeMerges,
};
use crate::oracle::Oracle;

/// Byte offsets of all character boundaries of `s`, including the final one.
/// Entry `i` is the offset of the `i`-th character.
pub(crate) fn char_bounds(s: &str) -> Vec<usize> {
    let mut bounds: Vec<usize> = s.char_indices().map(|(offset, _)| offset).collect();
    bounds.push(s.len());
    bounds
}

/// Whether the oracle accepts every candidate embedded in the given context,
/// additionally checking the alternate context when it differs.
pub(crate) fn oracle_check<O, I>(oracle: &O, context: &Context, candidates: I) -> bool
where
    O: Oracle + ?Sized,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    for candidate in candidates {
        let candidate = candidate.as_ref();

        if !oracle.accepts(&format!("{}{}{}", context.pre(), candidate, context.post())) {
            return false;
        }

        if context.use_extra()
            && !oracle.accepts(&format!(
                "{}{}{}",
                context.extra_pre(),
                candidate,
                context.extra_post()
            ))
        {
            return false;
        }
    }

    true
}

fn learned_root<O: Oracle + ?Sized>(
    example: &str,
    oracle: &O,
    arena: &mut NodeArena,
) -> Result<NodeId, SynthesisError> {
    let raw = regex::synthesize(example, oracle, arena);
    Ok(transform::transform(arena, raw, oracle)?)
}

fn checked_roots<O: Oracle + ?Sized, S: AsRef<str>>(
    examples: &[S],
    oracle: &O,
    arena: &mut NodeArena,
) -> Result<Vec<NodeId>, SynthesisError> {
    let mut roots = Vec::with_capacity(examples.len());

    for example in examples {
        let example = example.as_ref();
        if !oracle.accepts(example) {
            return Err(SynthesisError::RejectedExample(example.to_string()));
        }

        info!(example, "processing example");
        let start = Instant::now();
        roots.push(learned_root(example, oracle, arena)?);
        debug!(elapsed = ?start.elapsed(), "example synthesized");
    }

    Ok(roots)
}

/// Learn a grammar from a single accepted example, including the self-merge
/// pass that finds recursive structure within the example.
pub fn grammar_from_example<O: Oracle + ?Sized>(
    example: &str,
    oracle: &O,
) -> Result<Grammar, SynthesisError> {
    if !oracle.accepts(example) {
        return Err(SynthesisError::RejectedExample(example.to_string()));
    }

    info!(example, "processing example");
    let start = Instant::now();
    let mut arena = NodeArena::new();
    let root = learned_root(example, oracle, &mut arena)?;
    debug!(elapsed = ?start.elapsed(), "example synthesized");

    let start = Instant::now();
    let merges = merge::merges_single(&arena, root, root, oracle);
    debug!(elapsed = ?start.elapsed(), merged = merges.len(), "self merge finished");

    Ok(Grammar::new(arena, root, merges))
}

/// Learn a grammar from several accepted examples. The per-example trees
/// become the alternatives of a synthetic top-level choice and the merge scan
/// runs over every pair of trees (each tree paired with itself included).
pub fn grammar_from_examples<O: Oracle + ?Sized, S: AsRef<str>>(
    examples: &[S],
    oracle: &O,
) -> Result<Grammar, SynthesisError> {
    let mut arena = NodeArena::new();
    let roots = checked_roots(examples, oracle, &mut arena)?;

    let start = Instant::now();
    let merges = merge::merges_multiple(&arena, &roots, oracle);
    debug!(elapsed = ?start.elapsed(), merged = merges.len(), "cross-example merges finished");

    let root = arena.alloc(Node::MultiAlternation(MultiAlternationNode::new(
        NodeData::unspanned(Context::root()),
        roots,
    )));

    Ok(Grammar::new(arena, root, merges))
}

/// Learn a non-recursive grammar: like [`grammar_from_examples`] but with an
/// empty merge relation. Useful as a simpler baseline.
pub fn regular_grammar_from_examples<O: Oracle + ?Sized, S: AsRef<str>>(
    examples: &[S],
    oracle: &O,
) -> Result<Grammar, SynthesisError> {
    let mut arena = NodeArena::new();
    let roots = checked_roots(examples, oracle, &mut arena)?;

    let root = arena.alloc(Node::MultiAlternation(MultiAlternationNode::new(
        NodeData::unspanned(Context::root()),
        roots,
    )));

    Ok(Grammar::new(arena, root, NodeMerges::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::descendants;

    fn brackets_oracle(input: &str) -> bool {
        let mut stack = Vec::new();
        for c in input.chars() {
            match c {
                '(' | '[' | '{' => stack.push(c),
                ')' => {
                    if stack.pop() != Some('(') {
                        return false;
                    }
                },
                ']' => {
                    if stack.pop() != Some('[') {
                        return false;
                    }
                },
                '}' => {
                    if stack.pop() != Some('{') {
                        return false;
                    }
                },
                _ => return false,
            }
        }
        stack.is_empty()
    }

    #[test]
    fn test_rejected_example() {
        let oracle = |input: &str| input.chars().all(|c| c == 'a');
        let result = grammar_from_example("b", &oracle);
        assert!(matches!(result, Err(SynthesisError::RejectedExample(_))));
    }

    #[test]
    fn test_single_example_structure() {
        let oracle = |input: &str| input.chars().all(|c| c == 'a');
        let grammar = grammar_from_example("aaa", &oracle).unwrap();

        assert!(matches!(grammar.node(grammar.root()), Node::Repetition(_)));
        assert_eq!(grammar.node(grammar.root()).data().example(), "aaa");

        // Every leaf of the learned tree is a character class by now.
        for id in descendants(grammar.arena(), grammar.root()) {
            assert!(!matches!(
                grammar.node(id),
                Node::Constant(_) | Node::Alternation(_)
            ));
        }
    }

    #[test]
    fn test_generalization_is_oracle_safe() {
        // 'a'* admits no widening: every character class in the learned
        // grammar must stay {'a'} (or empty for the brackets).
        let oracle = |input: &str| input.chars().all(|c| c == 'a');
        let grammar = grammar_from_example("aaa", &oracle).unwrap();

        for id in descendants(grammar.arena(), grammar.root()) {
            if let Node::MultiConstant(mconst) = grammar.node(id) {
                for options in mconst.options() {
                    let options: Vec<char> = options.iter().copied().collect();
                    assert_eq!(options, vec!['a']);
                }
            }
        }
    }

    #[test]
    fn test_brackets_example_learns_merges() {
        let grammar =
            grammar_from_example("{([][])([][])}{[()()][()()]}", &brackets_oracle).unwrap();

        assert_eq!(
            grammar.node(grammar.root()).data().example(),
            "{([][])([][])}{[()()][()()]}"
        );
        assert!(grammar.is_recursive());

        // The relation must be symmetric.
        for (node, partners) in grammar.merges().iter() {
            for &partner in partners {
                assert!(grammar.merges().contains(partner, node));
            }
        }

        // And the whole grammar must survive the binary round trip.
        let mut encoded = Vec::new();
        crate::grammar::serialize(&grammar, &mut encoded).unwrap();
        let decoded = crate::grammar::deserialize(&mut encoded.as_slice()).unwrap();

        assert_eq!(
            decoded.node(decoded.root()).data().example(),
            grammar.node(grammar.root()).data().example()
        );
        assert_eq!(merge_examples(&decoded), merge_examples(&grammar));
    }

    fn merge_examples(grammar: &Grammar) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (node, partners) in grammar.merges().iter() {
            for &partner in partners {
                pairs.push((
                    grammar.node(node).data().example().to_string(),
                    grammar.node(partner).data().example().to_string(),
                ));
            }
        }
        pairs.sort();
        pairs
    }

    #[test]
    fn test_multi_example_grammar() {
        let oracle = |input: &str| input.chars().all(|c| c.is_ascii_digit());
        let examples = ["12", "9"];
        let grammar = grammar_from_examples(&examples, &oracle).unwrap();

        match grammar.node(grammar.root()) {
            Node::MultiAlternation(malt) => assert_eq!(malt.children().len(), 2),
            other => panic!("expected multi-alternation root, got {}", other.variant()),
        }
        assert!(grammar.node(grammar.root()).data().example_opt().is_none());
    }

    #[test]
    fn test_regular_grammar_has_no_merges() {
        let examples = ["()()", "[][]"];
        let grammar = regular_grammar_from_examples(&examples, &brackets_oracle).unwrap();
        assert!(!grammar.is_recursive());
    }
}
