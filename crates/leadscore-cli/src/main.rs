//! leadscore CLI: score leads, validate tenant files and try out rules.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use leadscore_core::model::SelectionMode;

mod commands;

#[derive(Parser)]
#[command(name = "leadscore", version, about = "Lead scoring rule engine")]
struct Cli {
    /// Settings file (defaults to ./leadscore.toml, then ~/.config/leadscore/config.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a single lead
    Score {
        /// Tenant configuration TOML
        #[arg(long)]
        config: PathBuf,

        /// Lead submission JSON
        #[arg(long)]
        lead: PathBuf,

        /// Recommendation selection mode: first or all
        #[arg(long)]
        mode: Option<SelectionMode>,

        /// Output format: json, table
        #[arg(long, default_value = "json")]
        format: String,

        /// Refuse to score against a configuration with validation errors
        #[arg(long)]
        strict: bool,
    },

    /// Score a JSON array of leads concurrently and write a batch report
    Batch {
        /// Tenant configuration TOML
        #[arg(long)]
        config: PathBuf,

        /// JSON array of lead submissions
        #[arg(long)]
        leads: PathBuf,

        /// Max concurrently scored leads
        #[arg(long)]
        parallelism: Option<usize>,

        /// Output directory for the report
        #[arg(long)]
        output: Option<PathBuf>,

        /// Recommendation selection mode: first or all
        #[arg(long)]
        mode: Option<SelectionMode>,
    },

    /// Validate tenant TOML files
    Validate {
        /// Tenant file or directory of tenant files
        #[arg(long)]
        config: PathBuf,
    },

    /// Parse and evaluate a rule or formula
    Eval {
        /// Expression text, e.g. "{credit_score} > 700"
        #[arg(long)]
        expr: String,

        /// Answers JSON (object or list of field_name/response pairs)
        #[arg(long)]
        answers: Option<PathBuf>,

        /// Tenant configuration used to type the answers
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter settings, a tenant file and a sample lead
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("leadscore=info".parse().expect("static log directive")),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.settings;

    let result = match cli.command {
        Commands::Score {
            config,
            lead,
            mode,
            format,
            strict,
        } => commands::score::execute(config, lead, mode, format, strict, settings),
        Commands::Batch {
            config,
            leads,
            parallelism,
            output,
            mode,
        } => commands::batch::execute(config, leads, parallelism, output, mode, settings).await,
        Commands::Validate { config } => commands::validate::execute(config, settings),
        Commands::Eval {
            expr,
            answers,
            config,
        } => commands::eval::execute(expr, answers, config, settings),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
