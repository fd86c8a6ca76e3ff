#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Expandium CLI
//!
//! A command-line interface for the expandium C preprocessor library.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use expandium::{IntWidth, OutputMode, PreprocessorConfig};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Exit codes for different error conditions
mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const IO_ERROR: i32 = 2;
    pub const PREPROCESS_ERROR: i32 = 3;
}

/// Command-line interface for the expandium C preprocessor
#[derive(Parser)]
#[command(
    name = "expandium",
    version,
    author,
    about = "A standalone C preprocessor",
    long_about = "expandium reads C-family source text, expands macros, resolves \
conditional compilation and includes, and writes the directive-free token \
stream with linemarkers for a downstream compiler.",
    after_help = "EXAMPLES:
  # Preprocess a single file
  $ expandium input.c -o output.i

  # Predefine macros and add search directories
  $ expandium input.c -DDEBUG -DLEVEL=2 -I include --isystem /usr/include

  # Read from stdin, suppress linemarkers
  $ cat input.c | expandium - -P

  # Emit a Makefile dependency rule instead of text
  $ expandium input.c -M

  # Legacy input with unknown directives passed through
  $ expandium input.s --traditional"
)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Input file to preprocess (use '-' for stdin)
    #[arg(help = "Input C/C++ file to preprocess (use '-' for stdin)")]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short = 'o', long, help = "Output file (use '-' for stdout, default: stdout)")]
    output: Option<PathBuf>,

    /// Predefine a macro
    #[arg(
        short = 'D',
        value_name = "NAME[=VALUE]",
        help = "Predefine NAME as VALUE (default 1)"
    )]
    defines: Vec<String>,

    /// Undefine a macro
    #[arg(short = 'U', value_name = "NAME", help = "Undefine NAME after predefines")]
    undefines: Vec<String>,

    /// Add a quote-include search directory
    #[arg(
        short = 'I',
        long = "include-dir",
        value_name = "DIR",
        help = "Add directory to the \"...\" include search path"
    )]
    include_dirs: Vec<PathBuf>,

    /// Add a system-include search directory
    #[arg(
        long = "isystem",
        value_name = "DIR",
        help = "Add directory to the <...> include search path"
    )]
    system_dirs: Vec<PathBuf>,

    /// Suppress linemarker generation
    #[arg(short = 'P', long = "no-linemarkers", help = "Do not emit '# line \"file\"' markers")]
    no_linemarkers: bool,

    /// Emit a dependency rule instead of expanded text
    #[arg(short = 'M', long = "deps", help = "Write a Makefile rule naming every opened file")]
    dependencies: bool,

    /// Preserve comments in the output
    #[arg(short = 'C', long = "comments", help = "Keep comments instead of replacing them with a space")]
    keep_comments: bool,

    /// Treat warnings as errors
    #[arg(long = "werror", help = "Promote every warning to a fatal error")]
    warnings_as_errors: bool,

    /// Tolerant directive scanning for legacy or assembler input
    #[arg(
        short = 't',
        long = "traditional",
        help = "Pass unknown directives through instead of failing"
    )]
    traditional: bool,

    /// Width of #if constant arithmetic
    #[arg(
        long = "int-width",
        value_enum,
        default_value = "w64",
        help = "Integer width for #if expression evaluation"
    )]
    int_width: IntWidthValue,

    /// Maximum recursion depth for macro expansion
    #[arg(long, default_value = "128", help = "Maximum recursion depth for macro expansion")]
    recursion_limit: usize,

    /// Output in JSON format
    #[arg(long, help = "Output preprocessing result in JSON format")]
    #[cfg(feature = "json")]
    json: bool,

    /// Enable verbose output
    #[arg(short = 'v', long, help = "Enable verbose output with diagnostic information")]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short = 'q', long, help = "Suppress non-error output (quiet mode)")]
    quiet: bool,

    /// Show preprocessing warnings
    #[arg(short = 'W', long, help = "Enable preprocessing warnings")]
    warnings: bool,

    /// Disable colored output
    #[arg(long, help = "Disable colored output")]
    no_color: bool,

    /// Force colored output
    #[arg(long, help = "Force colored output even when not a terminal")]
    force_color: bool,
}

/// Integer width values for the CLI
#[derive(Clone, Debug, ValueEnum)]
enum IntWidthValue {
    #[clap(name = "w32", alias = "32")]
    W32,
    #[clap(name = "w64", alias = "64")]
    W64,
}

impl From<IntWidthValue> for IntWidth {
    fn from(value: IntWidthValue) -> Self {
        match value {
            IntWidthValue::W32 => IntWidth::Bits32,
            IntWidthValue::W64 => IntWidth::Bits64,
        }
    }
}

/// Global flag to track if any warnings occurred
static WARNINGS_OCCURRED: AtomicBool = AtomicBool::new(false);

/// Main application entry point
fn main() {
    std::process::exit(match run() {
        Ok(()) => {
            if WARNINGS_OCCURRED.load(Ordering::Relaxed) {
                exit_code::GENERAL_ERROR
            } else {
                exit_code::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            determine_exit_code(&e)
        }
    });
}

/// Determine the appropriate exit code based on the error
fn determine_exit_code(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<std::io::Error>().is_some() {
        exit_code::IO_ERROR
    } else if error.downcast_ref::<expandium::PreprocessError>().is_some() {
        exit_code::PREPROCESS_ERROR
    } else {
        exit_code::GENERAL_ERROR
    }
}

/// Run the main application logic
fn run() -> Result<()> {
    let cli = Cli::parse();
    configure_color(&cli);

    if cli.recursion_limit == 0 {
        anyhow::bail!("recursion limit must be greater than 0");
    }

    let input_name = format_input(&cli.input);
    let input_content = read_input(&cli.input)?;
    let config = create_config(&cli);

    let start_time = std::time::Instant::now();
    let mut pp = expandium::Preprocessor::with_config(&config);
    pp.set_recursion_limit(cli.recursion_limit);
    let processed = pp
        .process_source(&input_name, &input_content)
        .map_err(anyhow::Error::from)
        .context("preprocessing failed")?;
    let processing_time = start_time.elapsed();

    write_output(&cli, &processed)?;

    if cli.verbose && !cli.quiet {
        show_verbose_info(&cli, processing_time);
        eprintln!(
            "{} {} -> {}",
            "✓".green(),
            input_name,
            cli.output.as_ref().map_or("stdout".to_string(), format_output)
        );
    }

    Ok(())
}

fn configure_color(cli: &Cli) {
    if cli.no_color || (!cli.force_color && !atty::is(atty::Stream::Stderr)) {
        colored::control::set_override(false);
    } else if cli.force_color {
        colored::control::set_override(true);
    }
}

/// Create preprocessor configuration from CLI arguments
fn create_config(cli: &Cli) -> PreprocessorConfig {
    let mut config = PreprocessorConfig::new()
        .with_linemarkers(!cli.no_linemarkers)
        .with_comments(cli.keep_comments)
        .with_warnings_as_errors(cli.warnings_as_errors)
        .with_tolerant_directives(cli.traditional)
        .with_int_width(cli.int_width.clone().into());

    if cli.dependencies {
        config = config.with_output(OutputMode::Dependencies);
    }
    for def in &cli.defines {
        config = config.define(def.clone());
    }
    for name in &cli.undefines {
        config = config.undefine(name.clone());
    }
    for dir in &cli.include_dirs {
        config = config.quote_include_dir(dir.clone());
    }
    for dir in &cli.system_dirs {
        config = config.system_include_dir(dir.clone());
    }

    if cli.warnings {
        let quiet = cli.quiet;
        config = config.with_warning_handler(Rc::new(move |message: &str| {
            WARNINGS_OCCURRED.store(true, Ordering::Relaxed);
            if !quiet {
                eprintln!("{} {message}", "warning:".yellow().bold());
            }
        }));
    }

    config
}

/// Read input from file or stdin
fn read_input(input_path: &PathBuf) -> Result<String> {
    if input_path == &PathBuf::from("-") {
        use std::io::Read;
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read from stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(input_path)
            .with_context(|| format!("failed to read input file: {}", input_path.display()))
    }
}

/// Write output to file or stdout
fn write_output(cli: &Cli, content: &str) -> Result<()> {
    #[cfg(feature = "json")]
    if cli.json {
        return write_json_output(cli, content);
    }

    match &cli.output {
        Some(path) if path != &PathBuf::from("-") => std::fs::write(path, content)
            .with_context(|| format!("failed to write output file: {}", path.display())),
        _ => {
            print!("{content}");
            Ok(())
        }
    }
}

/// Write JSON output
#[cfg(feature = "json")]
fn write_json_output(cli: &Cli, content: &str) -> Result<()> {
    use serde_json::json;

    let result = json!({
        "success": true,
        "output": content,
        "input_file": format_input(&cli.input),
        "output_file": cli.output.as_ref().map(format_output),
        "dependency_mode": cli.dependencies,
        "linemarkers": !cli.no_linemarkers,
    });
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Show verbose information
fn show_verbose_info(cli: &Cli, processing_time: std::time::Duration) {
    eprintln!("Processing time: {processing_time:?}");
    eprintln!("Recursion limit: {}", cli.recursion_limit);
    if !cli.defines.is_empty() {
        eprintln!("Defines: {}", cli.defines.join(", "));
    }
    if !cli.include_dirs.is_empty() {
        eprintln!("Quote include directories ({}):", cli.include_dirs.len());
        for dir in &cli.include_dirs {
            eprintln!("  {}", dir.display());
        }
    }
    if !cli.system_dirs.is_empty() {
        eprintln!("System include directories ({}):", cli.system_dirs.len());
        for dir in &cli.system_dirs {
            eprintln!("  {}", dir.display());
        }
    }
}

/// Format input path for display
fn format_input(path: &PathBuf) -> String {
    if path == &PathBuf::from("-") {
        "<stdin>".to_string()
    } else {
        path.display().to_string()
    }
}

/// Format output path for display
fn format_output(path: &PathBuf) -> String {
    if path == &PathBuf::from("-") {
        "stdout".to_string()
    } else {
        path.display().to_string()
    }
}
