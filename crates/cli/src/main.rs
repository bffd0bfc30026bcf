//! `weft`: thin host CLI — reads a source file, compiles it, creates a VM,
//! runs it, and optionally logs the decompiled bytecode first. One
//! subcommand per verb, `clap_complete` for shell completions,
//! `tracing-subscriber` owning the process-wide log subscriber.

mod config;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use config::WeftConfig;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "weft")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Host CLI for the Weft scripting engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a Weft source file
    Run {
        /// Weft source file to run
        file: PathBuf,

        /// TOML configuration file (module list, default flags)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Log the decompiled bytecode before running
        #[arg(long)]
        dump_bytecode: bool,

        /// Increase log verbosity (-v, -vv, -vvv)
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,
    },

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            file,
            config,
            dump_bytecode,
            verbose,
        } => {
            init_tracing(verbose);
            if let Err(e) = run(&file, config.as_deref(), dump_bytecode) {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "weft", &mut std::io::stdout());
        }
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(file: &std::path::Path, config_path: Option<&std::path::Path>, dump_bytecode_flag: bool) -> Result<(), String> {
    let config = match config_path {
        Some(p) => WeftConfig::load(p).map_err(|e| e.to_string())?,
        None => WeftConfig::default(),
    };

    let mut source = String::new();
    for module in &config.modules {
        let text =
            std::fs::read_to_string(module).map_err(|e| format!("reading module {}: {e}", module.display()))?;
        source.push_str(&text);
        source.push('\n');
    }
    let main_text = std::fs::read_to_string(file).map_err(|e| format!("reading {}: {e}", file.display()))?;
    source.push_str(&main_text);

    let dump_bytecode = dump_bytecode_flag || config.dump_bytecode;
    if dump_bytecode {
        let module = weft_compiler::compile(&source).map_err(|e| e.to_string())?;
        tracing::info!("{}", weft_compiler::disasm::disassemble_module(&module));
    }

    let mut vm = weft_runtime::Vm::new(&source).map_err(|e| e.to_string())?;
    let result = vm.run();
    // §4.1: explicit-only collection; the host collects once at run end.
    vm.collect();
    let values = result.map_err(|e| e.to_string())?;
    for v in &values {
        println!("{}", vm.display_value(v));
    }
    Ok(())
}
