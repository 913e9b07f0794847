//! This library learns the input language of a black-box program from
//! accept/reject queries alone and turns the learned grammar into a fuzzer.
//!
//! It consists of
//! - __synthesis__: decompose accepted training examples into a grammar tree,
//!   widen literals into character classes and detect interchangeable
//!   repetitions, all validated against an [`Oracle`](oracle::Oracle).
//! - __fuzz__: sample the learned [`Grammar`](grammar::Grammar) into an
//!   unbounded stream of new inputs, from scratch or by mutating the parse of
//!   a training example.
//! - __grammar__: the tree model plus a compact binary format to persist
//!   learned grammars.
//!
//! ## Getting Started
//! An oracle is any predicate over strings; external programs are adapted
//! with [`CommandOracle`](oracle::CommandOracle). Learning takes one or more
//! examples the oracle accepts:
//! ```
//! use magpie_fuzz::fuzz::{GrammarSampler, SampleParameters};
//! use magpie_fuzz::synthesis;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! // The oracle: here, strings of ASCII digits.
//! let oracle = |input: &str| input.chars().all(|c| c.is_ascii_digit());
//!
//! // Learn a grammar from one accepted example...
//! let grammar = synthesis::grammar_from_example("2026", &oracle).unwrap();
//!
//! // ...and sample new inputs from it.
//! let rng = StdRng::seed_from_u64(0);
//! let mut sampler = GrammarSampler::new(&grammar, SampleParameters::default(), rng).unwrap();
//! let sample = sampler.next().unwrap();
//! assert!(oracle(&sample));
//! ```
//! Learned grammars can be persisted with
//! [`Grammar::save`](grammar::Grammar::save) and picked up again by the
//! fuzzing binaries via [`Grammar::load`](grammar::Grammar::load).

#![deny(missing_docs)]

pub mod corpus;
pub mod error;
pub mod fuzz;
pub mod grammar;
pub mod oracle;
pub mod synthesis;
