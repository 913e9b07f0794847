//! Grammar-based sampling and mutation.
//!
//! Three samplers are provided, all of them infinite iterators over strings:
//!
//! - [`GrammarSampler`] expands the grammar from scratch on every draw.
//! - [`GrammarMutationSampler`] starts from a concrete parse of the
//!   grammar's own defining example and repeatedly regrows random subtrees.
//! - [`CombinedMutationSampler`] wraps any string iterator and sprinkles
//!   character-level edits over some of its samples.
//!
//! Expansion is bounded by a step budget. When the budget runs out, the
//! current node is answered with its precomputed backup, a budget-free parse
//! of the defining example, so even adversarial recursive merge chains
//! terminate.

use std::io::BufReader;
use std::path::Path;

use ahash::AHashMap;
use json_comments::{CommentSettings, StripComments};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json as json;

use crate::error::{ConfigError, FuzzError};
use crate::grammar::{descendants, Grammar, Node, NodeArena, NodeId, ParseTree};

/// The tunable knobs of grammar sampling.
///
/// `p_repetition` is a multinomial over repetition counts: entry `i` is the
/// probability of repeating `i` times and any remaining probability mass
/// falls through to `p_repetition.len()` repetitions. `p_recursion` is the
/// probability of redirecting a merged node to one of its partners.
/// `p_all_characters` is the probability of drawing a character from the full
/// option set instead of the validated check set. `box_size` is the step
/// budget of one expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleParameters {
    p_repetition: Vec<f64>,
    p_recursion: f64,
    p_all_characters: f64,
    box_size: usize,
}

impl Default for SampleParameters {
    fn default() -> Self {
        Self {
            p_repetition: vec![0.2, 0.2, 0.2, 0.4],
            p_recursion: 0.8,
            p_all_characters: 0.1,
            box_size: 100,
        }
    }
}

impl SampleParameters {
    /// Create parameters from explicit values.
    pub fn new(
        p_repetition: Vec<f64>,
        p_recursion: f64,
        p_all_characters: f64,
        box_size: usize,
    ) -> Self {
        Self {
            p_repetition,
            p_recursion,
            p_all_characters,
            box_size,
        }
    }

    /// The step budget of one expansion.
    pub fn box_size(&self) -> usize {
        self.box_size
    }

    fn rand_recursion<R: Rng>(&self, rng: &mut R) -> bool {
        self.p_recursion >= rng.gen::<f64>()
    }

    fn rand_all_characters<R: Rng>(&self, rng: &mut R) -> bool {
        self.p_all_characters >= rng.gen::<f64>()
    }

    fn rand_repetition<R: Rng>(&self, rng: &mut R) -> usize {
        let sample = rng.gen::<f64>();
        let mut sum = 0.0;

        for (count, weight) in self.p_repetition.iter().enumerate() {
            sum += weight;
            if sum >= sample {
                return count;
            }
        }

        self.p_repetition.len()
    }
}

/// Settings of a fuzzing run: sampling parameters plus the caps applied by
/// the mutation samplers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzConfig {
    /// Maximum length of a mutated sample.
    pub max_length: usize,
    /// Upper bound on the mutation rounds applied per sample. Must be at
    /// least 1.
    pub num_mutations: usize,
    /// Grammar sampling parameters.
    pub sample: SampleParameters,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            max_length: 1000,
            num_mutations: 20,
            sample: SampleParameters::default(),
        }
    }
}

impl FuzzConfig {
    /// Load a configuration from a JSON file. C-style comments are allowed.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file =
            std::fs::File::open(path).map_err(|e| ConfigError::new(path, format!("{e}")))?;
        let reader = BufReader::new(file);
        let reader = StripComments::with_settings(CommentSettings::c_style(), reader);

        json::from_reader(reader).map_err(|e| ConfigError::new(path, format!("{e}")))
    }
}

/// Build the budget-free parse of the subtree rooted at `id`, recording an
/// entry for every visited node. For a choice node, one parse per
/// alternative is built so that every alternative's subtree is covered; the
/// choice node itself keeps the last one.
fn record_backups(
    arena: &NodeArena,
    id: NodeId,
    backup: &mut AHashMap<NodeId, ParseTree>,
) -> Result<ParseTree, FuzzError> {
    let tree = match &arena[id] {
        Node::Repetition(rep) => {
            let start = record_backups(arena, rep.start(), backup)?;

            let bodies = if let Node::MultiAlternation(malt) = &arena[rep.rep()] {
                let malt_id = rep.rep();
                let mut bodies = Vec::with_capacity(malt.children().len());
                for &child in malt.children() {
                    let choice = record_backups(arena, child, backup)?;
                    let wrapper = ParseTree::multi_alternation(malt_id, choice);
                    backup.insert(malt_id, wrapper.clone());
                    bodies.push(wrapper);
                }
                bodies
            } else {
                vec![record_backups(arena, rep.rep(), backup)?]
            };

            let end = record_backups(arena, rep.end(), backup)?;
            ParseTree::repetition(id, start, bodies, end)
        },
        Node::MultiConstant(mconst) => ParseTree::multi_constant(id, mconst.data().example()),
        Node::MultiAlternation(malt) => {
            let mut last = None;
            for &child in malt.children() {
                let choice = record_backups(arena, child, backup)?;
                let wrapper = ParseTree::multi_alternation(id, choice);
                backup.insert(id, wrapper.clone());
                last = Some(wrapper);
            }

            match last {
                Some(tree) => tree,
                None => {
                    return Err(FuzzError::UnsupportedNode {
                        id,
                        found: "empty multi-alternation",
                    })
                },
            }
        },
        node @ (Node::Constant(_) | Node::Alternation(_)) => {
            return Err(FuzzError::UnsupportedNode {
                id,
                found: node.variant(),
            })
        },
    };

    backup.insert(id, tree.clone());
    Ok(tree)
}

fn build_backups(grammar: &Grammar) -> Result<AHashMap<NodeId, ParseTree>, FuzzError> {
    let mut backup = AHashMap::new();
    record_backups(grammar.arena(), grammar.root(), &mut backup)?;

    for (node, partners) in grammar.merges().iter() {
        if !backup.contains_key(&node) {
            return Err(FuzzError::MissingBackup(node));
        }
        for &partner in partners {
            if !backup.contains_key(&partner) {
                return Err(FuzzError::MissingBackup(partner));
            }
        }
    }

    for id in descendants(grammar.arena(), grammar.root()) {
        if !backup.contains_key(&id) {
            return Err(FuzzError::MissingBackup(id));
        }
    }

    Ok(backup)
}

fn sample_node<R: Rng>(
    grammar: &Grammar,
    parameters: &SampleParameters,
    rng: &mut R,
    backup: &AHashMap<NodeId, ParseTree>,
    budget: &mut usize,
    id: NodeId,
) -> ParseTree {
    if *budget == 0 {
        return backup[&id].clone();
    }
    *budget -= 1;

    if let Some(partners) = grammar.merges().get(id) {
        if !partners.is_empty() && parameters.rand_recursion(rng) {
            let choice = rng.gen_range(0..partners.len());
            let inner = sample_node(grammar, parameters, rng, backup, budget, partners[choice]);
            return ParseTree::merge(id, inner);
        }
    }

    match &grammar.arena()[id] {
        Node::MultiAlternation(malt) => {
            let choice = rng.gen_range(0..malt.children().len());
            sample_node(grammar, parameters, rng, backup, budget, malt.children()[choice])
        },
        Node::Repetition(rep) => {
            let start = sample_node(grammar, parameters, rng, backup, budget, rep.start());

            let count = parameters.rand_repetition(rng);
            let mut bodies = Vec::with_capacity(count);
            for _ in 0..count {
                bodies.push(sample_node(grammar, parameters, rng, backup, budget, rep.rep()));
            }

            let end = sample_node(grammar, parameters, rng, backup, budget, rep.end());
            ParseTree::repetition(id, start, bodies, end)
        },
        Node::MultiConstant(mconst) => {
            let mut realized = String::new();
            for position in 0..mconst.len() {
                let characters = if parameters.rand_all_characters(rng) {
                    &mconst.options()[position]
                } else {
                    &mconst.checks()[position]
                };
                let choice = rng.gen_range(0..characters.len());
                realized.push(characters[choice]);
            }
            ParseTree::multi_constant(id, realized)
        },
        node @ (Node::Constant(_) | Node::Alternation(_)) => {
            unreachable!("{} nodes cannot appear in a fuzzed grammar", node.variant())
        },
    }
}

/// Samples the grammar from scratch on every draw.
pub struct GrammarSampler<'a, R: Rng> {
    grammar: &'a Grammar,
    parameters: SampleParameters,
    rng: R,
    backup: AHashMap<NodeId, ParseTree>,
}

impl<'a, R: Rng> GrammarSampler<'a, R> {
    /// Create a sampler. Fails if some node reachable from the root, or some
    /// merge participant, cannot be given a backup parse tree.
    pub fn new(
        grammar: &'a Grammar,
        parameters: SampleParameters,
        rng: R,
    ) -> Result<Self, FuzzError> {
        Ok(Self {
            backup: build_backups(grammar)?,
            grammar,
            parameters,
            rng,
        })
    }

    /// Draw one sample.
    pub fn sample(&mut self) -> String {
        let mut budget = self.parameters.box_size();
        sample_node(
            self.grammar,
            &self.parameters,
            &mut self.rng,
            &self.backup,
            &mut budget,
            self.grammar.root(),
        )
        .example()
        .to_string()
    }
}

impl<R: Rng> Iterator for GrammarSampler<'_, R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        Some(self.sample())
    }
}

/// Samples by mutating a concrete parse of the grammar's defining example:
/// random subtrees are regrown through grammar sampling, the rest of the
/// tree is kept.
pub struct GrammarMutationSampler<'a, R: Rng> {
    grammar: &'a Grammar,
    parameters: SampleParameters,
    max_length: usize,
    num_mutations: usize,
    rng: R,
    backup: AHashMap<NodeId, ParseTree>,
}

impl<'a, R: Rng> GrammarMutationSampler<'a, R> {
    /// Create a sampler. `num_mutations` bounds the mutation rounds per draw
    /// and must be at least 1; `max_length` caps the length of every
    /// returned sample.
    pub fn new(
        grammar: &'a Grammar,
        parameters: SampleParameters,
        max_length: usize,
        num_mutations: usize,
        rng: R,
    ) -> Result<Self, FuzzError> {
        Ok(Self {
            backup: build_backups(grammar)?,
            grammar,
            parameters,
            max_length,
            num_mutations,
            rng,
        })
    }

    fn mutate_once(&mut self, seed: &ParseTree) -> ParseTree {
        let (leaves, inner) = seed.descendant_pools();

        // Bias mutations toward character-class leaves when there are any.
        let use_leaves = inner.is_empty() || (!leaves.is_empty() && self.rng.gen_bool(0.5));
        let pool = if use_leaves { &leaves } else { &inner };
        let index = pool[self.rng.gen_range(0..pool.len())];

        let target = match seed.descendant(index) {
            Some(tree) => tree.node(),
            None => unreachable!("descendant pools index outside the seed tree"),
        };

        let mut budget = self.parameters.box_size();
        let replacement = sample_node(
            self.grammar,
            &self.parameters,
            &mut self.rng,
            &self.backup,
            &mut budget,
            target,
        );

        seed.substitute(index, &replacement)
    }

    fn mutate(&mut self, seed: &ParseTree) -> ParseTree {
        // Unbounded retry: the caller's parameters must make shrinking below
        // the cap practically likely.
        loop {
            let result = self.mutate_once(seed);
            if result.example().chars().count() <= self.max_length {
                return result;
            }
        }
    }

    fn sample_one(&mut self, id: NodeId) -> String {
        let mut current = self.backup[&id].clone();

        let rounds = self.rng.gen_range(0..self.num_mutations);
        for _ in 0..rounds {
            current = self.mutate(&current);
        }

        current.example().to_string()
    }
}

impl<R: Rng> Iterator for GrammarMutationSampler<'_, R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let grammar = self.grammar;
        let seed = match &grammar.arena()[grammar.root()] {
            Node::MultiAlternation(malt) => {
                let choice = self.rng.gen_range(0..malt.children().len());
                malt.children()[choice]
            },
            _ => grammar.root(),
        };

        Some(self.sample_one(seed))
    }
}

/// Wraps a sampler and applies a random number of single-character edits to
/// half of its samples.
pub struct CombinedMutationSampler<I, R> {
    sampler: I,
    num_mutations: usize,
    rng: R,
}

impl<I, R> CombinedMutationSampler<I, R> {
    /// Combine `sampler` with character-level mutation. `num_mutations`
    /// bounds the edits per sample and must be at least 1.
    pub fn new(sampler: I, num_mutations: usize, rng: R) -> Self {
        Self {
            sampler,
            num_mutations,
            rng,
        }
    }
}

impl<I: Iterator<Item = String>, R: Rng> Iterator for CombinedMutationSampler<I, R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let sample = self.sampler.next()?;

        if self.rng.gen_bool(0.5) {
            Some(sample)
        } else {
            let edits = self.rng.gen_range(0..self.num_mutations);
            Some(string_mutants(sample, edits, &mut self.rng))
        }
    }
}

fn random_char<R: Rng>(rng: &mut R) -> char {
    char::from(rng.gen_range(0..128u8))
}

/// One random single-character insert or delete.
fn string_mutant<R: Rng>(string: &str, rng: &mut R) -> String {
    let characters: Vec<char> = string.chars().collect();
    if characters.is_empty() {
        return random_char(rng).to_string();
    }

    let index = rng.gen_range(0..characters.len());
    let mut result: String = characters[..index].iter().collect();

    if rng.gen_bool(0.5) {
        result.push(random_char(rng));
        result.extend(&characters[index..]);
    } else {
        result.extend(&characters[index + 1..]);
    }

    result
}

fn string_mutants<R: Rng>(mut string: String, edits: usize, rng: &mut R) -> String {
    for _ in 0..edits {
        string = string_mutant(&string, rng);
    }
    string
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{
        Context, MultiAlternationNode, MultiConstantNode, NodeData, NodeMerges, RepetitionNode,
    };
    use crate::synthesis;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mconst(arena: &mut NodeArena, text: &str) -> NodeId {
        let characters: Vec<char> = text.chars().collect();
        let options: Vec<Vec<char>> = characters.iter().map(|&c| vec![c]).collect();
        let checks = options.clone();
        let node =
            MultiConstantNode::new(NodeData::new(text, Context::root()), options, checks).unwrap();
        arena.alloc(Node::MultiConstant(node))
    }

    fn repetition(arena: &mut NodeArena, body_text: &str) -> (NodeId, NodeId) {
        let start = mconst(arena, "");
        let body = mconst(arena, body_text);
        let end = mconst(arena, "");
        let rep = arena.alloc(Node::Repetition(RepetitionNode::new(
            NodeData::new(body_text, Context::root()),
            start,
            body,
            end,
        )));
        (rep, body)
    }

    #[test]
    fn test_default_parameters() {
        let parameters = SampleParameters::default();
        assert_eq!(parameters.box_size(), 100);
    }

    #[test]
    fn test_rand_repetition_falls_through() {
        let mut rng = StdRng::seed_from_u64(0);
        let certain = SampleParameters::new(vec![1.0], 0.0, 0.0, 10);
        for _ in 0..100 {
            assert_eq!(certain.rand_repetition(&mut rng), 0);
        }

        let empty = SampleParameters::new(Vec::new(), 0.0, 0.0, 10);
        assert_eq!(empty.rand_repetition(&mut rng), 0);
    }

    #[test]
    fn test_sampler_terminates_on_merge_cycle() {
        let mut arena = NodeArena::new();
        let (first, first_body) = repetition(&mut arena, "a");
        let (second, second_body) = repetition(&mut arena, "b");
        let root = arena.alloc(Node::MultiAlternation(MultiAlternationNode::new(
            NodeData::unspanned(Context::root()),
            vec![first, second],
        )));

        // The two bodies redirect to each other on every step.
        let mut merges = NodeMerges::new();
        merges.add(first_body, second_body);
        let grammar = Grammar::new(arena, root, merges);

        let parameters = SampleParameters::new(vec![0.5, 0.5], 1.0, 0.5, 8);
        let mut sampler =
            GrammarSampler::new(&grammar, parameters, StdRng::seed_from_u64(0)).unwrap();

        for _ in 0..50 {
            let sample = sampler.sample();
            assert!(sample.chars().all(|c| c == 'a' || c == 'b'));
        }
    }

    #[test]
    fn test_missing_backup_is_detected() {
        let mut arena = NodeArena::new();
        let (root, root_body) = repetition(&mut arena, "a");
        // A second repetition that is not reachable from the root.
        let (_, stray_body) = repetition(&mut arena, "b");

        let mut merges = NodeMerges::new();
        merges.add(root_body, stray_body);
        let grammar = Grammar::new(arena, root, merges);

        let result = GrammarSampler::new(
            &grammar,
            SampleParameters::default(),
            StdRng::seed_from_u64(0),
        );
        assert!(matches!(result, Err(FuzzError::MissingBackup(_))));
    }

    #[test]
    fn test_pure_samples_stay_in_language() {
        let oracle = |input: &str| input.chars().all(|c| c.is_ascii_digit());
        let grammar = synthesis::grammar_from_example("7", &oracle).unwrap();

        let sampler = GrammarSampler::new(
            &grammar,
            SampleParameters::default(),
            StdRng::seed_from_u64(0),
        )
        .unwrap();

        for sample in sampler.take(50) {
            assert!(oracle(&sample));
        }
    }

    #[test]
    fn test_mutation_samples_respect_max_length() {
        let oracle = |input: &str| input.chars().all(|c| c.is_ascii_digit());
        let grammar = synthesis::grammar_from_example("777", &oracle).unwrap();

        let sampler = GrammarMutationSampler::new(
            &grammar,
            SampleParameters::default(),
            16,
            5,
            StdRng::seed_from_u64(0),
        )
        .unwrap();

        for sample in sampler.take(50) {
            assert!(sample.chars().count() <= 16);
            assert!(oracle(&sample));
        }
    }

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
    fn test_recursive_bracket_grammar_sampling() {
        let grammar = synthesis::grammar_from_example(
            "{([][])([][])}{[()()][()()]}",
            &brackets_oracle,
        )
        .unwrap();
        assert!(grammar.is_recursive());

        // Grammar-only mutations never leave the language; every sample also
        // honors the length cap.
        let max_length = 1000;
        let sampler = GrammarMutationSampler::new(
            &grammar,
            SampleParameters::default(),
            max_length,
            5,
            StdRng::seed_from_u64(0),
        )
        .unwrap();

        for sample in sampler.take(20) {
            assert!(sample.chars().count() <= max_length);
            assert!(brackets_oracle(&sample));
        }

        let pure = GrammarSampler::new(
            &grammar,
            SampleParameters::default(),
            StdRng::seed_from_u64(0),
        )
        .unwrap();
        for sample in pure.take(20) {
            assert!(brackets_oracle(&sample));
        }
    }

    #[test]
    fn test_combined_sampler_produces_samples() {
        let oracle = |input: &str| input.chars().all(|c| c.is_ascii_digit());
        let grammar = synthesis::grammar_from_example("12", &oracle).unwrap();

        let inner = GrammarSampler::new(
            &grammar,
            SampleParameters::default(),
            StdRng::seed_from_u64(1),
        )
        .unwrap();
        let combined = CombinedMutationSampler::new(inner, 4, StdRng::seed_from_u64(2));

        assert_eq!(combined.take(25).count(), 25);
    }

    #[test]
    fn test_string_mutant_on_empty_input() {
        let mut rng = StdRng::seed_from_u64(0);
        let mutant = string_mutant("", &mut rng);
        assert_eq!(mutant.chars().count(), 1);
    }

    #[test]
    fn test_config_from_commented_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fuzz.json");
        std::fs::write(
            &path,
            r#"
            // Fuzzing settings for the smoke run.
            {
                "max_length": 64,
                "sample": {
                    "p_recursion": 0.5,
                    "box_size": 10
                }
            }
            "#,
        )
        .unwrap();

        let config = FuzzConfig::from_json(&path).unwrap();
        assert_eq!(config.max_length, 64);
        assert_eq!(config.num_mutations, 20);
        assert_eq!(config.sample.box_size(), 10);
    }

    #[test]
    fn test_config_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fuzz.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(FuzzConfig::from_json(&path).is_err());
    }
}
