//! Prints the tokens of a file, to debug grammars.
//!
//! `tmscope-dump -g grammars/json.json -g grammars/... --scope source.json file.json`

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tmscope::Registry;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Grammar files to load, in order
    #[arg(short, long = "grammar", required = true)]
    grammars: Vec<PathBuf>,

    /// Name or scope name of the grammar to tokenize with.
    /// Defaults to the first grammar loaded.
    #[arg(short, long)]
    scope: Option<String>,

    /// Scope names of grammars whose injections apply everywhere
    #[arg(long = "inject")]
    injections: Vec<String>,

    /// Log every rule transition, shown with `RUST_LOG=trace`
    #[arg(long)]
    trace: bool,

    file: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut registry = Registry::default();
    let mut first = None;
    for path in &args.grammars {
        let id = registry.add_grammar_from_path(path)?;
        first.get_or_insert(id);
    }
    for scope in &args.injections {
        registry.add_injection_scope(scope);
    }

    let grammar_id = match &args.scope {
        Some(name) => registry
            .grammar_id(name)
            .ok_or_else(|| tmscope::Error::GrammarNotFound(name.clone()))?,
        None => first.ok_or("no grammar loaded")?,
    };

    let text = fs::read_to_string(&args.file)?;
    let mut tokenizer = tmscope::Tokenizer::from_text(&registry, grammar_id, &text);
    tokenizer.set_trace(args.trace);

    let lines = tmscope::lines::split_lines(&text);
    while !tokenizer.is_at_end() {
        let line_no = tokenizer.current_line();
        let line = lines[line_no];
        println!("{:>4} | {}", line_no + 1, &line[..tmscope::lines::content_end(line)]);
        for token in tokenizer.parse_next_line()? {
            println!(
                "     | {:?} {}",
                &line[token.span.clone()],
                token.scopes
            );
        }
    }

    Ok(())
}
