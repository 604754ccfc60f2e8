//! Yala Compiler CLI
//!
//! Command-line interface for compiling and running Yala programs.

use clap::{Parser as ClapParser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::rc::Rc;

#[derive(ClapParser)]
#[command(name = "yala")]
#[command(about = "Yala compiler and virtual machine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile and immediately run a .yala source file.
    Run {
        input: PathBuf,
        #[arg(long)]
        display_tree: bool,
        #[arg(long)]
        display_bytecode: bool,
        #[arg(long)]
        no_execute: bool,
    },
    /// Compile a .yala source file to a serialized .yalac file.
    Compile {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        display_tree: bool,
        #[arg(long)]
        display_bytecode: bool,
    },
    /// Deserialize and run a compiled .yalac file.
    Execute { input: PathBuf },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { input, display_tree, display_bytecode, no_execute } => {
            run(&input, display_tree, display_bytecode, no_execute)
        }
        Command::Compile { input, output, display_tree, display_bytecode } => {
            compile(&input, output, display_tree, display_bytecode)
        }
        Command::Execute { input } => execute(&input),
    };

    if let Err(message) = result {
        eprintln!("{message}");
        process::exit(1);
    }
}

fn run(input: &PathBuf, display_tree: bool, display_bytecode: bool, no_execute: bool) -> Result<(), String> {
    let (program, bytecode) = yala_compiler::compile_file(input).map_err(format_compile_errors)?;

    if display_tree {
        println!("{program:#?}");
    }
    if display_bytecode {
        print!("{}", yala_compiler::serialize::serialize(&bytecode));
    }
    if no_execute {
        return Ok(());
    }

    execute_bytecode(bytecode)
}

fn compile(input: &PathBuf, output: Option<PathBuf>, display_tree: bool, display_bytecode: bool) -> Result<(), String> {
    let (program, bytecode) = yala_compiler::compile_file(input).map_err(format_compile_errors)?;

    if display_tree {
        println!("{program:#?}");
    }
    let text = yala_compiler::serialize::serialize(&bytecode);
    if display_bytecode {
        print!("{text}");
    }

    let output = output.unwrap_or_else(|| input.with_extension("yalac"));
    std::fs::write(&output, text).map_err(|e| format!("failed to write {}: {e}", output.display()))?;
    println!("compiled {} -> {}", input.display(), output.display());
    Ok(())
}

fn execute(input: &PathBuf) -> Result<(), String> {
    let text = std::fs::read_to_string(input).map_err(|e| format!("cannot read {}: {e}", input.display()))?;
    let bytecode = yala_compiler::serialize::deserialize(&text).map_err(|e| e.to_string())?;
    execute_bytecode(bytecode)
}

fn execute_bytecode(bytecode: yala_runtime::Bytecode) -> Result<(), String> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut vm = yala_runtime::Vm::new(stdin.lock(), stdout.lock());
    vm.run(Rc::new(bytecode)).map_err(|e| e.to_string())
}

fn format_compile_errors(errors: Vec<yala_compiler::CompileError>) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
