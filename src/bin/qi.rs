// CLI entry point (SPEC_FULL.md ambient "Command-line interface" section).
// Grounded on the teacher's `main.rs` `Cli` struct and `LogLevel` flag, pared
// down since this VM has no separate register-allocation trace to dump.
use clap::Parser;
use qi::{InterpretResult, LogLevel, Vm};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "qi")]
#[command(version = "0.1.0")]
#[command(about = "Qi: a bytecode-compiled scripting language", long_about = None)]
struct Cli {
    /// Source file to run.
    input: PathBuf,

    #[arg(short, long, value_enum, default_value_t = LogLevel::Release)]
    mode: LogLevel,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("[错误] 无法读取源文件 {}: {err}", cli.input.display());
            return ExitCode::from(74);
        }
    };

    let mut vm = Vm::new(cli.mode);
    match vm.interpret(&source) {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError => ExitCode::from(65),
        InterpretResult::RuntimeError => ExitCode::from(70),
    }
}
