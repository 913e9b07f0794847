use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use magpie_fuzz::{
    corpus,
    oracle::{AcceptRule, CommandOracle},
    synthesis,
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

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Command that accepts or rejects an input. Occurrences of "{}" are
    /// replaced by the path of a file holding the input; without "{}" the
    /// input is piped to stdin.
    #[arg(long, value_name = "COMMAND")]
    program: String,

    /// Training examples: files, or directories of files.
    #[arg(long, value_name = "FILE|DIR", required = true, num_args = 1..)]
    examples: Vec<PathBuf>,

    /// Where to write the learned grammar.
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Per-query timeout in milliseconds. A timed-out query counts as a reject.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// How the command's outcome is interpreted.
    #[arg(long, default_value_t = Verdict::Exit)]
    verdict: Verdict,

    /// Learn a non-recursive grammar (skip merge detection).
    #[arg(long)]
    regular: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let oracle = CommandOracle::from_command_line(
        &args.program,
        Duration::from_millis(args.timeout_ms),
        args.verdict.into(),
    )
    .expect("--program must not be empty");

    let examples = corpus::load_examples(&args.examples).expect("could not load examples");
    assert!(!examples.is_empty(), "no training examples found");

    let grammar = if args.regular {
        synthesis::regular_grammar_from_examples(&examples, &oracle).unwrap()
    } else {
        synthesis::grammar_from_examples(&examples, &oracle).unwrap()
    };

    grammar.save(&args.output).unwrap();

    println!(
        "Learned a grammar with {} nodes from {} examples -> {}",
        grammar.arena().len(),
        examples.len(),
        args.output.display()
    );
}
