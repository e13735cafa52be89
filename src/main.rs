use clap::Parser as _;
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

use plang::cli::Cli;
use plang::Interpreter;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let mut interp = Interpreter::new();
    interp.max_recursion = cli.max_recursion;
    interp.max_iterations = cli.max_iterations;
    interp.module_dirs.extend(cli.include.iter().cloned());

    if let Some(code) = &cli.eval {
        return run(&mut interp, code, cli.dump_ast);
    }
    match &cli.file {
        Some(file) => run_file(&mut interp, file, cli.dump_ast),
        None => run_prompt(interp),
    }
}

fn run_file(interp: &mut Interpreter, file: &Path, dump_ast: bool) -> ExitCode {
    let source = match std::fs::read_to_string(file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("cannot read {}: {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    // The script's own directory joins the module search path.
    if let Some(dir) = file.parent() {
        interp.module_dirs.insert(0, dir.to_path_buf());
    }
    run(interp, &source, dump_ast)
}

fn run(interp: &mut Interpreter, source: &str, dump_ast: bool) -> ExitCode {
    if dump_ast {
        return match interp.parse(source) {
            Ok(ast) => {
                match serde_json::to_string_pretty(&ast) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("cannot serialize syntax tree: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
                ExitCode::SUCCESS
            }
            Err(error) => {
                eprintln!("{}", error.render(source));
                ExitCode::FAILURE
            }
        };
    }
    match interp.interpret(source) {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}", error.render(source));
            ExitCode::FAILURE
        }
    }
}

/// Read-eval-print loop with persistent scopes.
fn run_prompt(mut interp: Interpreter) -> ExitCode {
    interp.repl = true;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if line.trim().is_empty() {
            continue;
        }
        match interp.interpret(&line) {
            Ok(value) => println!("{}", value),
            Err(error) => eprintln!("{}", error.render(&line)),
        }
    }
    ExitCode::SUCCESS
}
