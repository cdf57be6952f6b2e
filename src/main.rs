use std::io::{self, Read};

use analysis_gate::backend::types::AnalysisRequest;
use analysis_gate::config::GatewayConfig;
use analysis_gate::error::AnalysisError;
use analysis_gate::services::orchestrator::{AnalysisOptions, Priority};
use analysis_gate::state::AppState;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid --market-data JSON: {0}")]
    MarketData(serde_json::Error),
    #[error("failed to read prompt from stdin: {0}")]
    Stdin(#[from] io::Error),
    #[error("prompt is empty; pass --prompt or pipe it on stdin")]
    EmptyPrompt,
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("analysis failed ({code}): {message}")]
    Failed { code: &'static str, message: String },
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "analysis-gate", about = "Rate-limited, cached gateway to an external analysis CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one analysis and print the orchestrated response.
    Analyze(AnalyzeArgs),
    /// Print service status without invoking the backend.
    Status,
    /// Check that the backend tool is available.
    Probe,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Prompt text. Read from stdin when omitted.
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    instrument: Option<String>,
    #[arg(long)]
    context: Option<String>,
    /// Market snapshot as a JSON document.
    #[arg(long)]
    market_data: Option<String>,
    #[arg(long, value_enum)]
    preset: Option<Preset>,
    #[arg(long)]
    no_cache: bool,
    #[arg(long)]
    retries: Option<u32>,
    #[arg(long)]
    retry_delay_ms: Option<u64>,
    #[arg(long)]
    ttl_minutes: Option<u64>,
    #[arg(long)]
    priority: Option<Priority>,
    /// Issue the same request this many times; later runs hit the cache.
    #[arg(long, default_value_t = 1)]
    repeat: u32,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Preset {
    Quick,
    Detailed,
}

impl AnalyzeArgs {
    fn options(&self, defaults: AnalysisOptions) -> AnalysisOptions {
        let mut options = match self.preset {
            Some(Preset::Quick) => defaults.quick(),
            Some(Preset::Detailed) => defaults.detailed(),
            None => defaults,
        };
        if self.no_cache {
            options.use_cache = false;
        }
        if let Some(retries) = self.retries {
            options.retry_attempts = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            options.retry_delay_ms = delay;
        }
        if let Some(ttl) = self.ttl_minutes {
            options.cache_ttl_minutes = ttl;
        }
        if let Some(priority) = self.priority {
            options.priority = priority;
        }
        options
    }

    fn request(&self) -> Result<AnalysisRequest, CliError> {
        let prompt = match &self.prompt {
            Some(prompt) => prompt.clone(),
            None => {
                let mut buf = String::new();
                io::stdin().read_to_string(&mut buf)?;
                buf
            }
        };
        if prompt.trim().is_empty() {
            return Err(CliError::EmptyPrompt);
        }

        let mut request = AnalysisRequest::new(prompt);
        request.instrument_code.clone_from(&self.instrument);
        request.context.clone_from(&self.context);
        if let Some(raw) = &self.market_data {
            request.market_data = Some(serde_json::from_str(raw).map_err(CliError::MarketData)?);
        }
        Ok(request)
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let cli = Cli::parse();
    let state = AppState::new(GatewayConfig::from_env());

    let result = match cli.command {
        Command::Analyze(args) => run_analyze(&state, &args).await,
        Command::Status => print_json(&state.orchestrator.status()),
        Command::Probe => run_probe(&state).await,
    };
    state.shutdown();
    result
}

async fn run_probe(state: &AppState) -> Result<(), CliError> {
    state.orchestrator.initialize().await?;
    print_json(&state.orchestrator.status())
}

async fn run_analyze(state: &AppState, args: &AnalyzeArgs) -> Result<(), CliError> {
    let request = args.request()?;
    let options = args.options(state.orchestrator.defaults());

    state.orchestrator.initialize().await?;
    state.start_sweeper();

    let mut last = None;
    for _ in 0..args.repeat.max(1) {
        let response = state.orchestrator.analyze(&request, &options).await?;
        print_json(&response)?;
        last = Some(response);
    }

    match last {
        Some(response) if !response.response.success => Err(CliError::Failed {
            code: response.error_code.unwrap_or("UNKNOWN"),
            message: response.response.error.unwrap_or_default(),
        }),
        _ => Ok(()),
    }
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
