//! Layercut CLI: validate, plan and render overlay scenes.
//!
//! Usage:
//!   layercut render <SCENE>      Render a scene to a video file
//!   layercut plan <SCENE>        Print the ffmpeg filter graph for a scene
//!   layercut validate <SCENE>    Validate a scene file
//!   layercut check               Check system capabilities
//!   layercut init <VIDEO>        Write a starter scene file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod scene;

#[derive(Parser)]
#[command(
    name = "layercut",
    about = "Time-gated image and text overlays on video",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a scene to a video file
    Render {
        /// Path to the scene JSON
        scene: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: mp4-h264|mp4-h265|webm (defaults to config)
        #[arg(long)]
        format: Option<String>,

        /// External audio track replacing the video's own audio
        #[arg(long)]
        audio: Option<PathBuf>,
    },

    /// Print the filter graph and ffmpeg arguments for a scene
    Plan {
        /// Path to the scene JSON
        scene: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a scene file
    Validate {
        /// Path to the scene JSON
        scene: PathBuf,
    },

    /// Check system capabilities
    Check,

    /// Write a starter scene file
    Init {
        /// Base video referenced by the scene
        video: String,

        /// Scene file to create
        #[arg(short, long, default_value = "scene.json")]
        output: PathBuf,

        /// Also write the default config file
        #[arg(long)]
        config: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app_config = layercut_common::config::AppConfig::load();

    // Initialize logging
    let mut logging = app_config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    layercut_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Render {
            scene,
            output,
            format,
            audio,
        } => commands::render::run(app_config, scene, output, format, audio).await,
        Commands::Plan { scene, json } => commands::plan::run(&app_config, scene, json),
        Commands::Validate { scene } => commands::validate::run(scene),
        Commands::Check => commands::check::run(&app_config),
        Commands::Init {
            video,
            output,
            config,
        } => commands::init::run(&app_config, video, output, config),
    }
}
