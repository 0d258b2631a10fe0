use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lookalike_core::{
    EncodedImage, IdentityResolver, InferenceClient, Phase, PipelineController, PipelineState,
    SubmitOutcome,
};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "lookalike", about = "Find the celebrity who looks like the person in a photo")]
struct Cli {
    /// TOML config file (LOOKALIKE_* environment variables take precedence)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a photo and show the look-alike's profile image
    Match {
        /// Photo of the person
        image: PathBuf,
        /// Print the final pipeline state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the data URI for a photo
    Encode { image: PathBuf },
    /// Run only the inference stage and print the name
    Analyze { image: PathBuf },
    /// Run only the person search and print the profile image URL
    Resolve { name: String },
    /// Show the effective configuration (secrets redacted)
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Match { image, json } => run_match(&config, image, json).await,
        Commands::Encode { image } => {
            let encoded = lookalike_core::encode(&image).await?;
            println!("{encoded}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Analyze { image } => {
            let encoded = lookalike_core::encode(&image).await?;
            let client = config.gemini_client()?;
            let deadline = config.deadlines().analyze;
            let name = within("image analysis", deadline, client.analyze(&encoded))
                .await?
                .context("image analysis failed")?;
            println!("{name}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Resolve { name } => {
            let resolver = config.tmdb_resolver()?;
            let deadline = config.deadlines().resolve;
            let found = within("person search", deadline, resolver.resolve(&name))
                .await?
                .context("person search failed")?;
            match found {
                Some(profile) => {
                    println!("{}", profile.url);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("{}", lookalike_core::pipeline::MSG_NOT_FOUND);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Await a single-stage command under its configured deadline.
async fn within<T>(what: &str, deadline: Duration, fut: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(deadline, fut)
        .await
        .with_context(|| format!("{what} timed out after {deadline:?}"))
}

async fn run_match(config: &Config, image: PathBuf, json: bool) -> Result<ExitCode> {
    let controller = PipelineController::new(
        Arc::new(config.gemini_client()?),
        Arc::new(config.tmdb_resolver()?),
    )
    .with_deadlines(config.deadlines());

    let encoded: EncodedImage = lookalike_core::encode(&image).await?;
    controller.select(encoded);

    // Render intermediate states while the submission runs.
    let mut rx = controller.subscribe();
    let render = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            if let PipelineState::Loading { candidate, .. } = &state {
                match candidate {
                    Some(name) => eprintln!("닮은 연예인: \"{name}\" (이미지 검색 중...)"),
                    None => eprintln!("{}", lookalike_core::types::LOADING_STATUS),
                }
            }
        }
    });

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, cancelling submission");
                cancel.cancel();
            }
        }
    });

    let outcome = controller.submit_with(&cancel).await;
    // Closing the state channel ends the render loop.
    drop(controller);
    let _ = render.await;

    let SubmitOutcome::Finished(state) = outcome else {
        anyhow::bail!("a submission is already running");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_state(&state, &image);
    }

    Ok(match state.phase() {
        Phase::Success => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn print_state(state: &PipelineState, image: &std::path::Path) {
    println!("나: {}", image.display());
    if let Some(name) = state.candidate() {
        println!("닮은 연예인: \"{name}\"");
    }
    if let Some(profile) = state.resolved_image() {
        println!("연예인: {}", profile.url);
    }
    if let Some(message) = state.error_message() {
        eprintln!("{message}");
    }
}
