use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;

use loxide::{InterpretResult, VM};

#[derive(Parser)]
#[command(name = "loxide")]
#[command(version)]
#[command(about = "A bytecode compiler and virtual machine for the Lox language", long_about = None)]
struct Cli {
    /// Path to the script to run.
    script: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.script) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Could not read \"{}\": {}", cli.script.display(), error);
            process::exit(74);
        }
    };

    let mut vm = VM::new();
    match vm.interpret(&source) {
        InterpretResult::InterpretOk => {}
        InterpretResult::InterpretCompileError => process::exit(65),
        InterpretResult::InterpretRuntimeError => process::exit(70),
    }
}
