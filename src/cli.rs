//! Command-line interface for the plang interpreter.

use clap::Parser;
use std::path::PathBuf;

use crate::interpreter::{MAX_ITERATIONS, MAX_RECURSION};

#[derive(Parser)]
#[command(name = "plang")]
#[command(about = "The Plang interpreter", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Script file to run; with no file and no -e, starts the REPL
    pub file: Option<PathBuf>,

    /// Evaluate a program given on the command line
    #[arg(short = 'e', long = "eval", value_name = "CODE")]
    pub eval: Option<String>,

    /// Print the parsed syntax tree as JSON instead of running
    #[arg(long)]
    pub dump_ast: bool,

    /// Additional module search directories
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    pub include: Vec<PathBuf>,

    /// Maximum call depth
    #[arg(long, default_value_t = MAX_RECURSION)]
    pub max_recursion: usize,

    /// Maximum iterations of a single while loop
    #[arg(long, default_value_t = MAX_ITERATIONS)]
    pub max_iterations: usize,
}
