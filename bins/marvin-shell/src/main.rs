//! Marvin Shell
//!
//! Interactive shell exposing the engine launcher flows to an operator.
//! Each command drives one launch flow to its terminal state; errors are
//! logged to the console and the shell stays usable.

use anyhow::Result;
use clap::Parser;
use engine_launcher::{ConsoleSink, Launcher};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "marvin-shell")]
#[command(about = "Marvin toolbox - launch engine containers and stream their output")]
struct Args {
    /// Verbose logging (debug level)
    #[arg(short, long, env = "VERBOSE")]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // The REPL itself is synchronous; flows run to completion on the
    // runtime, one at a time.
    let runtime = Runtime::new()?;
    let launcher = runtime.block_on(Launcher::connect())?;

    run_shell(&runtime, &launcher)
}

fn init_tracing(verbose: bool) {
    let default_directives = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_shell(runtime: &Runtime, launcher: &Launcher) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    println!(
        "Marvin Toolbox v{} - Interactive Mode",
        env!("CARGO_PKG_VERSION")
    );
    println!("Type 'help' for commands, 'exit' to quit\n");

    loop {
        match rl.readline("marvin > ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                let mut words = line.split_whitespace();
                let command = words.next().unwrap_or_default();
                match command {
                    "exit" | "quit" | "q" => {
                        println!("Goodbye!");
                        break;
                    }
                    "help" | "?" => print_help(),
                    "notebook" => {
                        let mut sink = ConsoleSink;
                        let _ = runtime.block_on(launcher.notebook(&mut sink));
                    }
                    "generate" => {
                        let mut sink = ConsoleSink;
                        let _ = runtime.block_on(launcher.engine_generate(&mut sink));
                    }
                    "dryrun" => {
                        let mut sink = ConsoleSink;
                        let _ = runtime.block_on(launcher.engine_dryrun(&mut sink));
                    }
                    "discount" => run_discount(words.collect::<Vec<_>>()),
                    other => {
                        eprintln!("Unknown command: '{other}' (try 'help')\n");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err:?}");
                break;
            }
        }
    }

    Ok(())
}

fn run_discount(args: Vec<&str>) {
    let parsed = match args.as_slice() {
        [amount, discount] => match (amount.parse::<f64>(), discount.parse::<f64>()) {
            (Ok(a), Ok(d)) => Some((a, d)),
            _ => None,
        },
        _ => None,
    };
    match parsed {
        Some((amount, discount)) => {
            println!("{}\n", pricing::apply_discount(amount, discount));
        }
        None => eprintln!("Usage: discount <amount> <discount>\n"),
    }
}

fn print_help() {
    println!(
        r#"
Marvin Toolbox Commands
=======================

  notebook                  - Launch the engine notebook server and stream its output
  generate                  - Start an engine container and follow its logs
  dryrun                    - Run an engine dry run and stream its output
  discount <amount> <disc>  - Apply a discount, clamped at zero

  help, ?                   - Show this help
  exit, quit, q             - Exit the shell

Output streams until the engine closes it; errors are logged and the
shell stays usable.
"#
    );
}
