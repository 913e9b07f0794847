//! Decomposition of a single accepted example into a raw grammar tree.
//!
//! The tree is built top-down. At every node the permitted productions are
//! tried in order; whichever matches first wins and the remaining text is
//! decomposed recursively with a narrower permission set. If nothing
//! matches, the node becomes a constant leaf. The asymmetric permission sets
//! (an alternation's left branch may only use repetition, its right branch
//! alternation-then-repetition) are a deliberate tie-break: they guarantee
//! termination and a canonical left-to-right decomposition.

use tracing::debug;

use crate::grammar::{
    AlternationNode, ConstantNode, Context, Node, NodeArena, NodeData, NodeId, RepetitionNode,
};
use crate::oracle::Oracle;
use crate::synthesis::{char_bounds, oracle_check};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Production {
    Repetition,
    Alternation,
}

/// Decompose `example` into a raw tree of alternation, repetition and
/// constant nodes. The example must already be known to satisfy the oracle.
pub(crate) fn synthesize<O: Oracle + ?Sized>(
    example: &str,
    oracle: &O,
    arena: &mut NodeArena,
) -> NodeId {
    let data = NodeData::new(example, Context::root());
    node(
        data,
        oracle,
        arena,
        &[Production::Repetition, Production::Alternation],
        true,
    )
}

fn alternation_checks(first: &str, second: &str) -> Vec<String> {
    vec![
        format!("{second}{first}{second}{first}"),
        format!("{first}{second}{first}{second}"),
        format!("{second}{first}"),
        format!("{second}{second}"),
        format!("{first}{first}"),
        second.to_string(),
        first.to_string(),
        String::new(),
    ]
}

fn repetition_checks(start: &str, rep: &str, end: &str) -> Vec<String> {
    vec![format!("{start}{rep}{rep}{end}"), format!("{start}{end}")]
}

struct AlternationParts {
    first: NodeData,
    second: NodeData,
}

struct RepetitionParts {
    start: NodeData,
    rep: NodeData,
    end: NodeData,
}

fn find_alternation<O: Oracle + ?Sized>(cur: &NodeData, oracle: &O) -> Option<AlternationParts> {
    let example = cur.example();
    let bounds = char_bounds(example);
    let length = bounds.len() - 1;

    for i in 1..length {
        let first = &example[..bounds[i]];
        let second = &example[bounds[i]..];

        if oracle_check(oracle, cur.context(), alternation_checks(first, second)) {
            debug!(first, second, "found alternation");
            return Some(AlternationParts {
                first: NodeData::new(first, Context::child(cur.context(), "", second, "", "")),
                second: NodeData::new(second, Context::child(cur.context(), first, "", "", "")),
            });
        }
    }

    None
}

fn find_repetition<O: Oracle + ?Sized>(
    cur: &NodeData,
    oracle: &O,
    whole_span_allowed: bool,
) -> Option<RepetitionParts> {
    let example = cur.example();
    let bounds = char_bounds(example);
    let length = bounds.len() - 1;

    for init in 0..length {
        // Prefer the largest repeatable span at every offset.
        for len in (1..=length - init).rev() {
            if len == length && !whole_span_allowed {
                continue;
            }

            let start = &example[..bounds[init]];
            let rep = &example[bounds[init]..bounds[init + len]];
            let end = &example[bounds[init + len]..];

            if oracle_check(oracle, cur.context(), repetition_checks(start, rep, end)) {
                debug!(start, rep, end, "found repetition");
                return Some(RepetitionParts {
                    start: NodeData::new(
                        start,
                        Context::child(cur.context(), "", &format!("{rep}{end}"), "", end),
                    ),
                    rep: NodeData::new(rep, Context::child(cur.context(), start, end, start, end)),
                    end: NodeData::new(
                        end,
                        Context::child(cur.context(), &format!("{start}{rep}"), "", start, ""),
                    ),
                });
            }
        }
    }

    None
}

fn node<O: Oracle + ?Sized>(
    cur: NodeData,
    oracle: &O,
    arena: &mut NodeArena,
    permitted: &[Production],
    whole_span_allowed: bool,
) -> NodeId {
    for production in permitted {
        match production {
            Production::Repetition => {
                if let Some(parts) = find_repetition(&cur, oracle, whole_span_allowed) {
                    let start = node(parts.start, oracle, arena, &[], true);
                    let rep = node(
                        parts.rep,
                        oracle,
                        arena,
                        &[Production::Alternation, Production::Repetition],
                        false,
                    );
                    let end = node(parts.end, oracle, arena, &[Production::Repetition], true);
                    return arena.alloc(Node::Repetition(RepetitionNode::new(cur, start, rep, end)));
                }
            },
            Production::Alternation => {
                if let Some(parts) = find_alternation(&cur, oracle) {
                    let first = node(parts.first, oracle, arena, &[Production::Repetition], true);
                    let second = node(
                        parts.second,
                        oracle,
                        arena,
                        &[Production::Alternation, Production::Repetition],
                        true,
                    );
                    return arena.alloc(Node::Alternation(AlternationNode::new(cur, first, second)));
                }
            },
        }
    }

    arena.alloc(Node::Constant(ConstantNode::new(cur)))
}
