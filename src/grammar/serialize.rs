//! Binary encoding of grammars.
//!
//! The format is sequential and big-endian. Characters are UTF-16 code
//! units, lengths are 4-byte signed integers and a length of `-1` marks a
//! missing string. Every node is assigned a dense integer id in pre-order of
//! the tree; the merge relation is written as explicit lists of directed id
//! pairs after the nodes.

use std::io::{Read, Write};

use indexmap::IndexSet;

use crate::error::SerializeError;
use crate::grammar::{
    descendants, AlternationNode, ConstantNode, Context, Grammar, MultiAlternationNode,
    MultiConstantNode, Node, NodeArena, NodeData, NodeId, NodeMerges, RepetitionNode,
};

const TAG_CONSTANT: i32 = 0;
const TAG_ALTERNATION: i32 = 1;
const TAG_MULTI_ALTERNATION: i32 = 2;
const TAG_REPETITION: i32 = 3;
const TAG_MULTI_CONSTANT: i32 = 4;

fn write_i32<W: Write>(writer: &mut W, value: i32) -> Result<(), SerializeError> {
    writer.write_all(&value.to_be_bytes())?;
    Ok(())
}

fn write_unit<W: Write>(writer: &mut W, unit: u16) -> Result<(), SerializeError> {
    writer.write_all(&unit.to_be_bytes())?;
    Ok(())
}

fn write_string<W: Write>(writer: &mut W, string: Option<&str>) -> Result<(), SerializeError> {
    match string {
        None => write_i32(writer, -1),
        Some(string) => {
            let units: Vec<u16> = string.encode_utf16().collect();
            write_i32(writer, units.len() as i32)?;
            for unit in units {
                write_unit(writer, unit)?;
            }
            Ok(())
        },
    }
}

fn write_char<W: Write>(writer: &mut W, character: char) -> Result<(), SerializeError> {
    let mut units = [0u16; 2];
    let encoded = character.encode_utf16(&mut units);
    if encoded.len() != 1 {
        return Err(SerializeError::UnencodableCharacter(character));
    }
    write_unit(writer, encoded[0])
}

fn write_char_set<W: Write>(
    writer: &mut W,
    characters: &IndexSet<char>,
) -> Result<(), SerializeError> {
    write_i32(writer, characters.len() as i32)?;
    for &character in characters {
        write_char(writer, character)?;
    }
    Ok(())
}

fn write_node_data<W: Write>(writer: &mut W, data: &NodeData) -> Result<(), SerializeError> {
    write_string(writer, data.example_opt())?;
    write_string(writer, Some(data.context().pre()))?;
    write_string(writer, Some(data.context().post()))?;
    write_string(writer, Some(data.context().extra_pre()))?;
    write_string(writer, Some(data.context().extra_post()))
}

fn dense_id(ids: &IndexSet<NodeId>, node: NodeId) -> Result<i32, SerializeError> {
    ids.get_index_of(&node)
        .map(|index| index as i32)
        .ok_or(SerializeError::UnreachableNode(node))
}

/// Write `grammar` to `writer` in the binary format.
pub fn serialize<W: Write>(grammar: &Grammar, writer: &mut W) -> Result<(), SerializeError> {
    let arena = grammar.arena();
    let mut ids = IndexSet::new();

    for id in descendants(arena, grammar.root()) {
        ids.insert(id);
    }

    write_i32(writer, ids.len() as i32)?;

    for (index, &node_id) in ids.iter().enumerate() {
        write_i32(writer, index as i32)?;

        let node = &arena[node_id];
        write_node_data(writer, node.data())?;

        match node {
            Node::Constant(_) => {
                write_i32(writer, TAG_CONSTANT)?;
            },
            Node::Alternation(alt) => {
                write_i32(writer, TAG_ALTERNATION)?;
                write_i32(writer, dense_id(&ids, alt.first())?)?;
                write_i32(writer, dense_id(&ids, alt.second())?)?;
            },
            Node::MultiAlternation(malt) => {
                write_i32(writer, TAG_MULTI_ALTERNATION)?;
                write_i32(writer, malt.children().len() as i32)?;
                for &child in malt.children() {
                    write_i32(writer, dense_id(&ids, child)?)?;
                }
            },
            Node::Repetition(rep) => {
                write_i32(writer, TAG_REPETITION)?;
                write_i32(writer, dense_id(&ids, rep.start())?)?;
                write_i32(writer, dense_id(&ids, rep.rep())?)?;
                write_i32(writer, dense_id(&ids, rep.end())?)?;
            },
            Node::MultiConstant(mconst) => {
                write_i32(writer, TAG_MULTI_CONSTANT)?;
                write_i32(writer, mconst.len() as i32)?;
                for position in 0..mconst.len() {
                    write_char_set(writer, &mconst.options()[position])?;
                    write_char_set(writer, &mconst.checks()[position])?;
                }
            },
        }
    }

    write_i32(writer, grammar.merges().len() as i32)?;
    for (node, partners) in grammar.merges().iter() {
        write_i32(writer, partners.len() as i32)?;
        for &partner in partners {
            write_i32(writer, dense_id(&ids, node)?)?;
            write_i32(writer, dense_id(&ids, partner)?)?;
        }
    }

    Ok(())
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32, SerializeError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

fn read_unit<R: Read>(reader: &mut R) -> Result<u16, SerializeError> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_string<R: Read>(reader: &mut R) -> Result<Option<String>, SerializeError> {
    let length = read_i32(reader)?;

    if length == -1 {
        return Ok(None);
    } else if length < 0 {
        return Err(SerializeError::InvalidLength(length));
    }

    let mut units = Vec::with_capacity(length as usize);
    for _ in 0..length {
        units.push(read_unit(reader)?);
    }

    String::from_utf16(&units)
        .map(Some)
        .map_err(|_| SerializeError::InvalidString)
}

fn read_char_list<R: Read>(reader: &mut R) -> Result<Vec<char>, SerializeError> {
    let count = read_i32(reader)?;
    if count < 0 {
        return Err(SerializeError::InvalidLength(count));
    }

    let mut characters = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let unit = read_unit(reader)?;
        let character =
            char::from_u32(u32::from(unit)).ok_or(SerializeError::InvalidString)?;
        characters.push(character);
    }

    Ok(characters)
}

fn read_node_data<R: Read>(reader: &mut R) -> Result<NodeData, SerializeError> {
    let example = read_string(reader)?;
    let pre = read_string(reader)?.unwrap_or_default();
    let post = read_string(reader)?.unwrap_or_default();
    let extra_pre = read_string(reader)?.unwrap_or_default();
    let extra_post = read_string(reader)?.unwrap_or_default();
    Ok(NodeData::from_raw(
        example,
        Context::from_parts(pre, post, extra_pre, extra_post),
    ))
}

fn checked_id(id: i32, count: usize) -> Result<usize, SerializeError> {
    if id >= 0 && (id as usize) < count {
        Ok(id as usize)
    } else {
        Err(SerializeError::InvalidId { id, count })
    }
}

/// A parsed node record whose child references are still raw ids.
enum PendingNode {
    Constant(NodeData),
    Alternation(NodeData, usize, usize),
    MultiAlternation(NodeData, Vec<usize>),
    Repetition(NodeData, usize, usize, usize),
    MultiConstant(NodeData, Vec<Vec<char>>, Vec<Vec<char>>),
}

impl PendingNode {
    fn child_ids(&self) -> Vec<usize> {
        match self {
            PendingNode::Constant(_) | PendingNode::MultiConstant(..) => Vec::new(),
            PendingNode::Alternation(_, first, second) => vec![*first, *second],
            PendingNode::MultiAlternation(_, children) => children.clone(),
            PendingNode::Repetition(_, start, rep, end) => vec![*start, *rep, *end],
        }
    }
}

fn resolved_id(resolved: &[Option<NodeId>], index: usize) -> Result<NodeId, SerializeError> {
    resolved[index].ok_or(SerializeError::MissingNode(index))
}

/// Turn the pending records into arena nodes, bottom-up.
///
/// Resolution runs over an explicit worklist instead of recursing so that
/// deep trees cannot overflow the stack. Every record is built exactly once
/// and shared wherever multiple parents reference its id.
fn resolve_nodes(
    mut slots: Vec<Option<PendingNode>>,
) -> Result<(NodeArena, Vec<Option<NodeId>>), SerializeError> {
    let count = slots.len();
    let mut arena = NodeArena::new();
    let mut resolved: Vec<Option<NodeId>> = vec![None; count];
    let mut in_progress = vec![false; count];

    for index in 0..count {
        if resolved[index].is_some() {
            continue;
        }

        let mut stack = vec![index];
        while let Some(&top) = stack.last() {
            if resolved[top].is_some() {
                stack.pop();
                continue;
            }

            let children = match slots[top].as_ref() {
                Some(pending) => pending.child_ids(),
                None => return Err(SerializeError::MissingNode(top)),
            };

            let unresolved: Vec<usize> = children
                .iter()
                .copied()
                .filter(|&child| resolved[child].is_none())
                .collect();

            if unresolved.is_empty() {
                let pending = slots[top].take().ok_or(SerializeError::MissingNode(top))?;
                let node = match pending {
                    PendingNode::Constant(data) => Node::Constant(ConstantNode::new(data)),
                    PendingNode::Alternation(data, first, second) => {
                        Node::Alternation(AlternationNode::new(
                            data,
                            resolved_id(&resolved, first)?,
                            resolved_id(&resolved, second)?,
                        ))
                    },
                    PendingNode::MultiAlternation(data, children) => {
                        let mut ids = Vec::with_capacity(children.len());
                        for child in children {
                            ids.push(resolved_id(&resolved, child)?);
                        }
                        Node::MultiAlternation(MultiAlternationNode::new(data, ids))
                    },
                    PendingNode::Repetition(data, start, rep, end) => {
                        Node::Repetition(RepetitionNode::new(
                            data,
                            resolved_id(&resolved, start)?,
                            resolved_id(&resolved, rep)?,
                            resolved_id(&resolved, end)?,
                        ))
                    },
                    PendingNode::MultiConstant(data, options, checks) => {
                        Node::MultiConstant(MultiConstantNode::new(data, options, checks)?)
                    },
                };

                resolved[top] = Some(arena.alloc(node));
                in_progress[top] = false;
                stack.pop();
            } else {
                if in_progress[top] {
                    return Err(SerializeError::CyclicReference(top));
                }
                in_progress[top] = true;
                stack.extend(unresolved);
            }
        }
    }

    Ok((arena, resolved))
}

/// Read a grammar from `reader`, reversing [`serialize`].
///
/// Duplicate merge edges and both directions of an edge may appear in the
/// stream; the symmetric relation is reconstructed regardless.
pub fn deserialize<R: Read>(reader: &mut R) -> Result<Grammar, SerializeError> {
    let count = read_i32(reader)?;
    if count < 0 {
        return Err(SerializeError::InvalidLength(count));
    } else if count == 0 {
        return Err(SerializeError::Empty);
    }
    let count = count as usize;

    let mut slots: Vec<Option<PendingNode>> = (0..count).map(|_| None).collect();

    for _ in 0..count {
        let id = checked_id(read_i32(reader)?, count)?;
        let data = read_node_data(reader)?;
        let tag = read_i32(reader)?;

        let pending = match tag {
            TAG_CONSTANT => PendingNode::Constant(data),
            TAG_ALTERNATION => {
                let first = checked_id(read_i32(reader)?, count)?;
                let second = checked_id(read_i32(reader)?, count)?;
                PendingNode::Alternation(data, first, second)
            },
            TAG_MULTI_ALTERNATION => {
                let child_count = read_i32(reader)?;
                if child_count < 0 {
                    return Err(SerializeError::InvalidLength(child_count));
                }
                let mut children = Vec::with_capacity(child_count as usize);
                for _ in 0..child_count {
                    children.push(checked_id(read_i32(reader)?, count)?);
                }
                PendingNode::MultiAlternation(data, children)
            },
            TAG_REPETITION => {
                let start = checked_id(read_i32(reader)?, count)?;
                let rep = checked_id(read_i32(reader)?, count)?;
                let end = checked_id(read_i32(reader)?, count)?;
                PendingNode::Repetition(data, start, rep, end)
            },
            TAG_MULTI_CONSTANT => {
                let group_count = read_i32(reader)?;
                if group_count < 0 {
                    return Err(SerializeError::InvalidLength(group_count));
                }
                let mut options = Vec::with_capacity(group_count as usize);
                let mut checks = Vec::with_capacity(group_count as usize);
                for _ in 0..group_count {
                    options.push(read_char_list(reader)?);
                    checks.push(read_char_list(reader)?);
                }
                PendingNode::MultiConstant(data, options, checks)
            },
            tag => return Err(SerializeError::InvalidTag(tag)),
        };

        slots[id] = Some(pending);
    }

    let (arena, resolved) = resolve_nodes(slots)?;

    let mut merges = NodeMerges::new();
    let key_count = read_i32(reader)?;
    if key_count < 0 {
        return Err(SerializeError::InvalidLength(key_count));
    }
    for _ in 0..key_count {
        let value_count = read_i32(reader)?;
        if value_count < 0 {
            return Err(SerializeError::InvalidLength(value_count));
        }
        for _ in 0..value_count {
            let first = checked_id(read_i32(reader)?, count)?;
            let second = checked_id(read_i32(reader)?, count)?;
            merges.add(resolved_id(&resolved, first)?, resolved_id(&resolved, second)?);
        }
    }

    let root = resolved_id(&resolved, 0)?;
    Ok(Grammar::new(arena, root, merges))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mconst(arena: &mut NodeArena, text: &str) -> NodeId {
        let characters: Vec<char> = text.chars().collect();
        let options: Vec<Vec<char>> = characters.iter().map(|&c| vec![c]).collect();
        let checks = options.clone();
        let node =
            MultiConstantNode::new(NodeData::new(text, Context::root()), options, checks).unwrap();
        arena.alloc(Node::MultiConstant(node))
    }

    fn sample_grammar() -> Grammar {
        let mut arena = NodeArena::new();
        let start = mconst(&mut arena, "");
        let first_body = mconst(&mut arena, "ab");
        let end = mconst(&mut arena, "");
        let first = arena.alloc(Node::Repetition(RepetitionNode::new(
            NodeData::new("ab", Context::root()),
            start,
            first_body,
            end,
        )));

        let start = mconst(&mut arena, "");
        let second_body = mconst(&mut arena, "cd");
        let end = mconst(&mut arena, "");
        let second = arena.alloc(Node::Repetition(RepetitionNode::new(
            NodeData::new("cd", Context::root()),
            start,
            second_body,
            end,
        )));

        let root = arena.alloc(Node::MultiAlternation(MultiAlternationNode::new(
            NodeData::unspanned(Context::root()),
            vec![first, second],
        )));

        let mut merges = NodeMerges::new();
        merges.add(first_body, second_body);

        Grammar::new(arena, root, merges)
    }

    fn merge_pairs(grammar: &Grammar) -> Vec<(String, String)> {
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
    fn test_round_trip() {
        let grammar = sample_grammar();

        let mut encoded = Vec::new();
        serialize(&grammar, &mut encoded).unwrap();
        let decoded = deserialize(&mut encoded.as_slice()).unwrap();

        assert!(decoded.node(decoded.root()).data().example_opt().is_none());
        assert_eq!(merge_pairs(&decoded), merge_pairs(&grammar));

        let mut reencoded = Vec::new();
        serialize(&decoded, &mut reencoded).unwrap();
        assert_eq!(encoded, reencoded);
    }

    #[test]
    fn test_shared_identity_after_decode() {
        let grammar = sample_grammar();

        let mut encoded = Vec::new();
        serialize(&grammar, &mut encoded).unwrap();
        let decoded = deserialize(&mut encoded.as_slice()).unwrap();

        // The merge ids must point at the exact nodes inside the tree, not
        // at duplicated copies.
        let reachable = descendants(decoded.arena(), decoded.root());
        for (node, partners) in decoded.merges().iter() {
            assert!(reachable.contains(&node));
            for partner in partners {
                assert!(reachable.contains(partner));
            }
        }
    }

    #[test]
    fn test_invalid_tag() {
        let mut encoded = Vec::new();
        write_i32(&mut encoded, 1).unwrap();
        write_i32(&mut encoded, 0).unwrap();
        for _ in 0..5 {
            write_string(&mut encoded, Some("")).unwrap();
        }
        write_i32(&mut encoded, 9).unwrap();

        match deserialize(&mut encoded.as_slice()) {
            Err(SerializeError::InvalidTag(9)) => {},
            other => panic!("expected invalid tag error, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_stream() {
        let grammar = sample_grammar();
        let mut encoded = Vec::new();
        serialize(&grammar, &mut encoded).unwrap();

        let result = deserialize(&mut &encoded[..encoded.len() / 2]);
        assert!(matches!(result, Err(SerializeError::Io(_))));
    }

    #[test]
    fn test_empty_stream() {
        let mut encoded = Vec::new();
        write_i32(&mut encoded, 0).unwrap();
        assert!(matches!(
            deserialize(&mut encoded.as_slice()),
            Err(SerializeError::Empty)
        ));
    }

    #[test]
    fn test_save_load_round_trip() {
        let grammar = sample_grammar();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grammar.bin");

        grammar.save(&path).unwrap();
        let loaded = Grammar::load(&path).unwrap();

        assert_eq!(merge_pairs(&loaded), merge_pairs(&grammar));
    }
}
