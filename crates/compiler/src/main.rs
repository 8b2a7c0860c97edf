//! PArL Compiler CLI
//!
//! Command-line interface for compiling .parl programs to stack-machine
//! assembly and running golden-file test cases.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "parlc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "PArL compiler - compile .parl programs to stack-machine assembly", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .parl file to assembly
    Build {
        /// Input .parl source file
        input: PathBuf,

        /// Output path (defaults to the input with a .parir extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the assembly to stdout instead of writing a file
        #[arg(long)]
        stdout: bool,
    },

    /// Parse and analyze a .parl file without generating code
    Check {
        /// Input .parl source file
        input: PathBuf,
    },

    /// Run golden-file test cases from expect.toml manifests
    Test {
        /// Directories or manifests to run (defaults to the current directory)
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        /// Only run cases whose file name matches this pattern
        #[arg(short, long)]
        filter: Option<String>,

        /// Verbose output (show timing for each case)
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            stdout,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("parir"));
            run_build(&input, &output, stdout);
        }
        Commands::Check { input } => {
            run_check(&input);
        }
        Commands::Test {
            paths,
            filter,
            verbose,
        } => {
            run_test(&paths, filter, verbose);
        }
        Commands::Completions { shell } => {
            run_completions(shell);
        }
    }
}

fn run_build(input: &Path, output: &Path, stdout: bool) {
    if stdout {
        let source = match std::fs::read_to_string(input) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("Error: Failed to read source file: {}", e);
                process::exit(1);
            }
        };
        match parlc::compile_to_asm(&source) {
            Ok(asm) => println!("{}", asm),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    match parlc::compile_file(input, output) {
        Ok(()) => {
            println!("Compiled {} -> {}", input.display(), output.display());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_check(input: &Path) {
    let source = match std::fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: Failed to read source file: {}", e);
            process::exit(1);
        }
    };

    match parlc::check(&source) {
        Ok(()) => println!("{}: no errors", input.display()),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_test(paths: &[PathBuf], filter: Option<String>, verbose: bool) {
    let runner = parlc::TestRunner::new(verbose, filter);
    let summary = runner.run(paths);

    runner.print_results(&summary);

    if summary.failed > 0 {
        process::exit(1);
    } else if summary.total == 0 {
        eprintln!("No test cases found");
        process::exit(2);
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "parlc", &mut io::stdout());
}
