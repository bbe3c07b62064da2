use std::{
    fs,
    io::{self, Read},
    path::PathBuf,
    process::ExitCode,
};

use asmb::{Status, Vm};
use clap::Parser;
use tracing::Level;

/// Run assembly-like instructions line by line
#[derive(Parser)]
#[command(version, about, long_about)]
struct Args {
    /// Source file to execute (stdin when omitted)
    file: Option<PathBuf>,

    /// Report failing lines and continue instead of halting
    #[arg(short, long)]
    keep_going: bool,

    /// Print the register file and stack usage after execution
    #[arg(short, long)]
    dump: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let Args {
        file,
        keep_going,
        dump,
        verbose,
    } = Args::parse();

    init_tracing(match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    });

    let source = match file {
        Some(path) => fs::read_to_string(path),
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer).map(|_| buffer)
        }
    };
    let source = match source {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to read source: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::new();
    let mut failed = false;
    for (index, line) in source.lines().enumerate() {
        match vm.execute(line) {
            Ok(Status::Done) => {}
            Ok(status) => tracing::info!("line {}: {status:?}", index + 1),
            Err(e) => {
                eprintln!("error:{}: {e}", index + 1);
                failed = true;
                if !keep_going {
                    break;
                }
            }
        }
    }

    if dump {
        for (register, value) in vm.registers().iter() {
            println!("{:>5} = {value}", register.to_string());
        }
        println!("stack: {}B used, {}B free", vm.stack_used(), vm.stack_depth());
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing(level: Level) {
    let _ = tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_writer(io::stderr)
        .with_max_level(level)
        .try_init();
}
