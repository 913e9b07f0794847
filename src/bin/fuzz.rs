use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use magpie_fuzz::{
    fuzz::{CombinedMutationSampler, FuzzConfig, GrammarMutationSampler, GrammarSampler},
    grammar::Grammar,
    oracle::{AcceptRule, CommandOracle, Oracle},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
enum Verdict {
    Exit,
    QuietStdout,
    QuietStderr,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Exit => write!(f, "exit"),
            Verdict::QuietStdout => write!(f, "quiet-stdout"),
            Verdict::QuietStderr => write!(f, "quiet-stderr"),
        }
    }
}

impl From<Verdict> for AcceptRule {
    fn from(verdict: Verdict) -> AcceptRule {
        match verdict {
            Verdict::Exit => AcceptRule::ExitSuccess,
            Verdict::QuietStdout => AcceptRule::QuietStdout,
            Verdict::QuietStderr => AcceptRule::QuietStderr,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
enum SamplerKind {
    Grammar,
    Mutation,
    Combined,
}

impl std::fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplerKind::Grammar => write!(f, "grammar"),
            SamplerKind::Mutation => write!(f, "mutation"),
            SamplerKind::Combined => write!(f, "combined"),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// A grammar file produced by magpie-learn.
    #[arg(long, value_name = "FILE")]
    grammar: PathBuf,

    /// Command that accepts or rejects an input. Occurrences of "{}" are
    /// replaced by the path of a file holding the input; without "{}" the
    /// input is piped to stdin.
    #[arg(long, value_name = "COMMAND")]
    program: String,

    /// Number of samples to draw.
    #[arg(long, default_value_t = 10)]
    samples: usize,

    #[arg(long, default_value_t = SamplerKind::Combined)]
    sampler: SamplerKind,

    /// Seed of the random number generator.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Optional JSON file with sampling parameters (C-style comments allowed).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Per-query timeout in milliseconds. A timed-out query counts as a reject.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// How the command's outcome is interpreted.
    #[arg(long, default_value_t = Verdict::Exit)]
    verdict: Verdict,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => FuzzConfig::from_json(path).unwrap(),
        None => FuzzConfig::default(),
    };

    let grammar = Grammar::load(&args.grammar).unwrap();

    let oracle = CommandOracle::from_command_line(
        &args.program,
        Duration::from_millis(args.timeout_ms),
        args.verdict.into(),
    )
    .expect("--program must not be empty");

    let rng = StdRng::seed_from_u64(args.seed);
    let samples: Box<dyn Iterator<Item = String> + '_> = match args.sampler {
        SamplerKind::Grammar => {
            Box::new(GrammarSampler::new(&grammar, config.sample.clone(), rng).unwrap())
        },
        SamplerKind::Mutation => Box::new(
            GrammarMutationSampler::new(
                &grammar,
                config.sample.clone(),
                config.max_length,
                config.num_mutations,
                rng,
            )
            .unwrap(),
        ),
        SamplerKind::Combined => {
            let inner = GrammarMutationSampler::new(
                &grammar,
                config.sample.clone(),
                config.max_length,
                config.num_mutations,
                rng,
            )
            .unwrap();
            Box::new(CombinedMutationSampler::new(
                inner,
                config.num_mutations,
                StdRng::seed_from_u64(args.seed.wrapping_add(1)),
            ))
        },
    };

    let mut pass = 0;
    for sample in samples.take(args.samples) {
        let accepted = oracle.accepts(&sample);
        info!(sample, accepted, "sampled");
        if accepted {
            pass += 1;
        }
    }

    println!("PASS RATE: {:.3}", pass as f64 / args.samples as f64);
}
