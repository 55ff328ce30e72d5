//! tcyml CLI - `.taskcluster.yml` validator

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use tcyml::schema::DirSchemaSource;
use tcyml::{ConfigDocument, FixSuggestion, SchemaCache, TcymlError, Validator, ValidatorConfig};

#[derive(Parser)]
#[command(name = "tcyml")]
#[command(about = "Validate .taskcluster.yml files")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/tcyml/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one or more .taskcluster.yml files
    Validate {
        /// Files to validate
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print a file after json-e expansion
    Render {
        file: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Format::Yaml)]
        format: Format,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print the effective configuration
    Config,
}

#[derive(clap::Args)]
struct Overrides {
    /// Read schemas from DIR/<file name> instead of fetching them
    #[arg(long, value_name = "DIR")]
    schema_dir: Option<PathBuf>,

    /// Value of taskcluster_root_url in the template context
    #[arg(long, value_name = "URL")]
    root_url: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::WARN.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { files, overrides } => {
            validate_files(cli.config.as_ref(), &files, &overrides).await
        }
        Commands::Render {
            file,
            format,
            overrides,
        } => render_file(cli.config.as_ref(), &file, format, &overrides),
        Commands::Config => show_config(cli.config.as_ref()),
    };

    if let Err(e) = result {
        report(&e);
        std::process::exit(1);
    }
}

fn report(e: &TcymlError) {
    eprintln!("{} {}", "Error:".red().bold(), e);
    if let Some(suggestion) = e.fix_suggestion() {
        eprintln!("  {} {}", "Fix:".yellow(), suggestion);
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ValidatorConfig, TcymlError> {
    let config = match path {
        Some(path) => ValidatorConfig::load_from(path)?,
        None => ValidatorConfig::load()?,
    };
    config.with_env()
}

fn build_validator(
    config_path: Option<&PathBuf>,
    overrides: &Overrides,
) -> Result<Validator, TcymlError> {
    let mut config = load_config(config_path)?;
    if let Some(url) = &overrides.root_url {
        config.context.root_url = url.clone();
    }

    match &overrides.schema_dir {
        Some(dir) => {
            let cache = SchemaCache::new(Arc::new(DirSchemaSource::new(dir)));
            Ok(Validator::with_cache(config, Arc::new(cache)))
        }
        None => Validator::new(config),
    }
}

async fn validate_files(
    config_path: Option<&PathBuf>,
    files: &[PathBuf],
    overrides: &Overrides,
) -> Result<(), TcymlError> {
    let validator = build_validator(config_path, overrides)?;

    let mut failed = 0;
    for file in files {
        let outcome = match ConfigDocument::load(file) {
            Ok(document) => validator.validate_document(&document).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(validated) => println!(
                "{} {} is valid ({} tasks)",
                "✓".green(),
                file.display(),
                validated.tasks.len()
            ),
            Err(e) => {
                eprintln!("{} {}", "✗".red(), file.display());
                report(&e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn render_file(
    config_path: Option<&PathBuf>,
    file: &PathBuf,
    format: Format,
    overrides: &Overrides,
) -> Result<(), TcymlError> {
    let validator = build_validator(config_path, overrides)?;
    let document = ConfigDocument::load(file)?;
    let rendered = validator.render(&document)?;

    let text = match format {
        Format::Json => serde_json::to_string_pretty(&rendered).map_err(|e| {
            TcymlError::ParseError {
                path: file.display().to_string(),
                details: e.to_string(),
            }
        })?,
        Format::Yaml => serde_yaml::to_string(&rendered).map_err(|e| TcymlError::ParseError {
            path: file.display().to_string(),
            details: e.to_string(),
        })?,
    };
    println!("{}", text.trim_end());
    Ok(())
}

fn show_config(config_path: Option<&PathBuf>) -> Result<(), TcymlError> {
    let config = load_config(config_path)?;
    println!("{}", config.to_toml()?.trim_end());
    Ok(())
}
