use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use shrimply::{run_program, Repl};

#[derive(Parser)]
#[command(author, version, about = "Shrimply language interpreter")]
struct Args {
    /// Script to run; its path becomes the first element of the argument
    /// list passed to `main`
    script: Option<PathBuf>,
    /// Extra arguments forwarded to the script's `main`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
    /// Start an interactive session instead of running a script
    #[arg(short, long)]
    interactive: bool,
}

fn main() -> ExitCode {
    let cli = Args::parse();

    if cli.interactive {
        let mut repl = Repl::new();
        return match repl.run() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err}");
                ExitCode::FAILURE
            }
        };
    }

    let Some(script) = cli.script else {
        eprintln!("Usage: shrimply <source-file> [args...]");
        return ExitCode::SUCCESS;
    };

    let mut argv = vec![script.display().to_string()];
    argv.extend(cli.args);
    match run_program(&script, argv) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
