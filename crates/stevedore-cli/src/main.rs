mod commands;
mod config;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_ARCHIVE_ERROR, EXIT_FAILURE, EXIT_STORE_ERROR};
use config::CliConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use stevedore_core::Loader;

#[derive(Debug, Parser)]
#[command(
    name = "stevedore",
    version,
    about = "Import saved container image archives into a local image store"
)]
struct Cli {
    /// Path to the stevedore store directory (default: ~/.local/share/stevedore).
    #[arg(long, global = true)]
    store: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Suppress progress bars and summaries.
    #[arg(short, long, default_value_t = false, global = true)]
    quiet: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load images from an archive (OCI layout, manifest.json or legacy).
    Load {
        /// Archive to read; standard input when omitted.
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Repository name for OCI images; each manifest's ref.name annotation becomes its tag.
        #[arg(long)]
        name: Option<String>,
        /// Map an OCI ref.name annotation to a full reference.
        #[arg(long = "ref", value_name = "REFNAME=TARGET", value_parser = commands::load::parse_ref_pair)]
        refs: Vec<(String, String)>,
    },
    /// List stored images.
    Images,
    /// Show an image's configuration, parent and tags.
    Inspect {
        /// Image reference, ID, or unique ID prefix.
        image: String,
    },
    /// Bind a reference to an existing image.
    Tag {
        /// Image reference, ID, or unique ID prefix.
        source: String,
        /// New reference, `name:tag`.
        target: String,
    },
    /// Verify store integrity.
    VerifyStore,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STEVEDORE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let config = match CliConfig::load_default() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("error: {msg}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    let store_path = config.store_path(cli.store.as_deref());
    let quiet = config.quiet(cli.quiet);
    let loader = Loader::new(&store_path);
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Load { input, name, refs } => commands::load::options(name, refs)
            .and_then(|options| {
                commands::load::run(&loader, input.as_deref(), &options, json_output, quiet)
            }),
        Commands::Images => commands::images::run(&loader, json_output),
        Commands::Inspect { image } => commands::inspect::run(&loader, &image, json_output),
        Commands::Tag { source, target } => commands::tag::run(&loader, &source, &target),
        Commands::VerifyStore => commands::verify_store::run(&loader, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("archive error:") {
                EXIT_ARCHIVE_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("store lock:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
