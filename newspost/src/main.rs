/*
newspost - single-binary main.rs
Serves the single-page interface, or runs the pipeline once from the terminal.
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{Config, Credentials};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use newspost::imaging::DOWNLOAD_FILE_NAME;
use newspost::server::launch_rocket;
use newspost::sessions::{SessionController, SessionState};

#[derive(Parser, Debug)]
#[command(name = "newspost", about = "Investor posts and illustrations from today's headlines")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server (default)
    Serve,
    /// Generate one post, its prompts and an image, then exit
    Generate {
        /// Use this file's text instead of the headlines
        #[arg(long, value_name = "FILE")]
        text_file: Option<PathBuf>,

        /// Which prompt variant to illustrate
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=3))]
        prompt: u8,

        /// Where to write the PNG
        #[arg(long, default_value = DOWNLOAD_FILE_NAME)]
        output: PathBuf,

        /// Stop after the prompts
        #[arg(long)]
        no_image: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; keys may come from the real environment.
    dotenv::dotenv().ok();

    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let credentials = Credentials::from_env(&config);
    info!(?credentials, "credentials resolved");

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => launch_rocket(&config, &credentials).await,
        Command::Generate {
            text_file,
            prompt,
            output,
            no_image,
        } => run_once(&config, &credentials, text_file, prompt, output, no_image).await,
    }
}

/// Terminal version of one session: post, prompts, then optionally the image.
async fn run_once(
    config: &Config,
    credentials: &Credentials,
    text_file: Option<PathBuf>,
    prompt: u8,
    output: PathBuf,
    no_image: bool,
) -> Result<()> {
    let controller = SessionController::from_config(config, credentials);
    let mut state = SessionState::new();

    match text_file {
        Some(path) => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read text file: {}", path.display()))?;
            controller.generate_post_from_text(&mut state, &text).await?;
        }
        None => {
            controller.generate_post_from_news(&mut state).await?;
            println!("Actualités :");
            for (i, art) in state.articles().unwrap_or_default().iter().enumerate() {
                println!("  {}. {}", i + 1, art.display_title());
            }
        }
    }

    if let Some(post) = state.post() {
        println!("\n{}\n{}\n{}", "=".repeat(60), post, "=".repeat(60));
    }

    let Some(options) = state.prompts() else {
        let reason = state
            .image_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "aucun prompt".to_string());
        warn!(%reason, "no image prompts available");
        anyhow::bail!("Image prompts unavailable: {}", reason);
    };

    println!("\nPrompts d'image :");
    for (i, p) in options.iter().enumerate() {
        println!("  {}. {}", i + 1, p);
    }

    if no_image {
        return Ok(());
    }

    state.select_prompt(usize::from(prompt) - 1)?;
    controller.generate_image(&mut state).await?;

    if let Some(image) = state.image() {
        tokio::fs::write(&output, &image.bytes)
            .await
            .with_context(|| format!("Failed to write image: {}", output.display()))?;
        println!("\nImage enregistrée : {} ({} octets)", output.display(), image.len());
    }
    Ok(())
}
