//! All error types of this crate.

use std::path::PathBuf;
use thiserror::Error;

use crate::grammar::NodeId;

/// Error while loading a fuzzing configuration file.
#[derive(Debug, Error)]
pub struct ConfigError {
    path: PathBuf,
    msg: String,
}

impl ConfigError {
    pub(crate) fn new<P: Into<PathBuf>, S: Into<String>>(path: P, msg: S) -> Self {
        Self {
            path: path.into(),
            msg: msg.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConfigError in {}: {}", self.path.display(), self.msg)
    }
}

/// Errors raised while constructing or inspecting grammar trees.
#[derive(Debug, Error)]
pub enum GrammarError {
    /// A multi-constant node was built with option and check lists of different lengths.
    #[error("multi-constant node has {options} option groups but {checks} check groups")]
    MismatchedCharacterLists {
        /// Number of option groups passed in.
        options: usize,
        /// Number of check groups passed in.
        checks: usize,
    },

    /// A node variant showed up in a place the current operation cannot handle.
    #[error("unexpected {found} node during {operation}")]
    UnexpectedNode {
        /// Variant name of the offending node.
        found: &'static str,
        /// Operation that was running.
        operation: &'static str,
    },
}

/// Errors raised while synthesizing a grammar from training examples.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// A training example does not satisfy the oracle, so there is nothing to learn from.
    #[error("training example rejected by the oracle: {0:?}")]
    RejectedExample(String),

    /// The synthesized tree violated a structural invariant.
    #[error(transparent)]
    Grammar(#[from] GrammarError),
}

/// Errors raised while encoding or decoding the binary grammar format.
#[derive(Debug, Error)]
pub enum SerializeError {
    /// Reading or writing the underlying stream failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream contained a node variant tag this version does not know.
    #[error("unrecognized node variant tag {0}")]
    InvalidTag(i32),

    /// A node id was negative or referenced a record past the node count.
    #[error("node id {id} out of range for {count} nodes")]
    InvalidId {
        /// The offending id.
        id: i32,
        /// Number of node records announced by the stream.
        count: usize,
    },

    /// A length field was negative (and not the `-1` null marker where one is allowed).
    #[error("invalid length field {0}")]
    InvalidLength(i32),

    /// A node record was announced but never defined.
    #[error("node record {0} missing from grammar file")]
    MissingNode(usize),

    /// The merge relation references a node that is not part of the tree
    /// being written.
    #[error("node {0:?} is not reachable from the grammar root")]
    UnreachableNode(NodeId),

    /// The stream declared zero nodes, so there is no root.
    #[error("grammar file contains no nodes")]
    Empty,

    /// Node records reference each other in a cycle and cannot form a tree.
    #[error("cyclic node references involving record {0}")]
    CyclicReference(usize),

    /// Character data did not decode as UTF-16.
    #[error("string data is not valid utf-16")]
    InvalidString,

    /// A character outside the basic multilingual plane cannot be written as one code unit.
    #[error("character {0:?} cannot be encoded as a single utf-16 unit")]
    UnencodableCharacter(char),

    /// A decoded node violated a structural invariant.
    #[error(transparent)]
    Grammar(#[from] GrammarError),
}

/// Errors raised while preparing a grammar for sampling.
#[derive(Debug, Error)]
pub enum FuzzError {
    /// A node reachable through the grammar or its merges has no backup parse tree.
    #[error("node {0:?} has no backup parse tree")]
    MissingBackup(NodeId),

    /// The grammar still contains a node variant that cannot be instantiated,
    /// i.e. it was never run through the transformation passes.
    #[error("cannot build a parse tree for {found} node {id:?}")]
    UnsupportedNode {
        /// The offending node.
        id: NodeId,
        /// Variant name of the offending node.
        found: &'static str,
    },
}

/// Errors raised by the external-command oracle adapter.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Spawning or driving the oracle command failed.
    #[error("failed to run oracle command {command:?}: {source}")]
    Command {
        /// The command that was being executed.
        command: String,
        /// The underlying error.
        source: std::io::Error,
    },

    /// Writing the query to its temporary file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
