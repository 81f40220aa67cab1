use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use codesage_config::Settings;
use codesage_core::{dispatch_tool, ProgressiveEnhancer, ToolCall};

#[derive(Parser)]
#[command(name = "codesage")]
#[command(about = "Semantic analysis and retrieval over source trees")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a codebase and store its chunks in the vector index
    Analyze {
        /// Directory or single file to analyze
        path: String,
        /// semantic, documentation, complexity or comprehensive
        #[arg(long, default_value = "semantic")]
        analysis_type: String,
        /// Include a git history summary
        #[arg(long)]
        git: bool,
        /// Drop stored chunks and the cached representation first
        #[arg(long)]
        force: bool,
        /// Re-analyze chunks that are already stored
        #[arg(long)]
        update_existing: bool,
    },
    /// Ask a question against analyzed code
    Query {
        query: String,
        /// Restrict the search to one analyzed codebase
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Extract one code element matching a description
    Extract {
        query: String,
        #[arg(long)]
        path: String,
        /// Element kind, e.g. function or class
        #[arg(long = "type", default_value = "function")]
        element_type: String,
        /// json, markdown or text
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Report which services are reachable
    Probe,
    /// Chunk counts and language histogram of the index
    Stats {
        #[arg(long)]
        path: Option<String>,
    },
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let settings = Settings::load().context("Failed to load configuration")?;
    init_tracing(&settings);
    let enhancer = ProgressiveEnhancer::new(settings).await?;

    let call = match cli.command {
        Commands::Analyze {
            path,
            analysis_type,
            git,
            force,
            update_existing,
        } => ToolCall::new(
            "analyze",
            json!({
                "codebasePath": path,
                "analysisType": analysis_type,
                "includeGit": git,
                "force": force,
                "updateExisting": update_existing,
                // background operations would not outlive the process
                "wait": true,
            }),
        ),
        Commands::Query {
            query,
            path,
            limit,
            threshold,
        } => ToolCall::new(
            "query",
            json!({
                "query": query,
                "codebasePath": path,
                "limit": limit,
                "scoreThreshold": threshold,
            }),
        ),
        Commands::Extract {
            query,
            path,
            element_type,
            format,
        } => ToolCall::new(
            "extract",
            json!({
                "query": query,
                "codebasePath": path,
                "type": element_type,
                "format": format,
            }),
        ),
        Commands::Probe => {
            let capabilities = enhancer.probe().await;
            println!("{}", serde_json::to_string_pretty(&capabilities)?);
            return Ok(capabilities.index_reachable);
        }
        Commands::Stats { path } => {
            let stats = enhancer.stats(path.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(true);
        }
    };

    let response = dispatch_tool(&call, &enhancer).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response["success"].as_bool().unwrap_or(false))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ok = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))?;

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["codesage", "analyze", "./src", "--git"]).unwrap();
        match cli.command {
            Commands::Analyze {
                path,
                git,
                analysis_type,
                ..
            } => {
                assert_eq!(path, "./src");
                assert!(git);
                assert_eq!(analysis_type, "semantic");
            }
            _ => panic!("expected analyze"),
        }

        let cli = Cli::try_parse_from([
            "codesage", "extract", "parse config", "--path", ".", "--type", "class",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Extract { ref element_type, .. } if element_type == "class"
        ));

        assert!(Cli::try_parse_from(["codesage", "extract", "q"]).is_err());
    }
}
