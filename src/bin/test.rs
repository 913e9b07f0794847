use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use magpie_fuzz::{
    corpus,
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

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Command that accepts or rejects an input. Occurrences of "{}" are
    /// replaced by the path of a file holding the input; without "{}" the
    /// input is piped to stdin.
    #[arg(long, value_name = "COMMAND")]
    program: String,

    /// Examples to replay against the oracle: files, or directories of files.
    #[arg(long, value_name = "FILE|DIR", required = true, num_args = 1..)]
    examples: Vec<PathBuf>,

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

    let oracle = CommandOracle::from_command_line(
        &args.program,
        Duration::from_millis(args.timeout_ms),
        args.verdict.into(),
    )
    .expect("--program must not be empty");

    let examples = corpus::load_examples(&args.examples).expect("could not load examples");

    let mut pass = 0;
    let mut fail = 0;
    for example in &examples {
        if oracle.accepts(example) {
            pass += 1;
        } else {
            println!("FAILED:\n{example}");
            fail += 1;
        }
    }

    println!("PASSED: {}/{}", pass, examples.len());
    println!("FAILED: {}/{}", fail, examples.len());

    if fail > 0 {
        std::process::exit(1);
    }
}
