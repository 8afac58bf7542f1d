//! Render a scene to a video file.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use layercut_common::config::AppConfig;
use layercut_overlay_model::overlay::MediaRef;
use layercut_render_engine::encoder::EncodeSettings;
use layercut_render_engine::ffmpeg::FfmpegEncoder;
use layercut_render_engine::media::FsFetcher;
use layercut_render_engine::orchestrator::{RenderOrchestrator, RenderPhase, RenderRequest};

use crate::scene::LoadedScene;

pub async fn run(
    config: AppConfig,
    path: PathBuf,
    output: Option<PathBuf>,
    format: Option<String>,
    audio: Option<PathBuf>,
) -> anyhow::Result<()> {
    println!("Rendering scene at: {}", path.display());

    let scene = LoadedScene::load(&path)?;
    let frame = scene.frame()?;
    let store = scene.build_store(frame)?;

    let mut settings = EncodeSettings::from_defaults(&config.render)?;
    if let Some(format) = format {
        settings.format = format.parse()?;
    }
    let output_path = output.unwrap_or_else(|| {
        scene
            .root
            .join(format!("output.{}", settings.format.extension()))
    });

    // Command-line paths are relative to the working directory, scene
    // paths to the scene file.
    let audio = match audio {
        Some(track) if track.is_relative() => Some(MediaRef::path(std::env::current_dir()?.join(track))),
        Some(track) => Some(MediaRef::path(track)),
        None => scene.file.audio.clone(),
    };

    println!("  Output: {}", output_path.display());
    println!("  Format: {}", settings.format);
    println!("  Resolution: {}x{}", frame.width, frame.height);
    println!("  Overlays: {}", store.len());

    let encoder = FfmpegEncoder::new(&config.work_dir)
        .with_stall_warning(Duration::from_secs(config.render.stall_warning_secs.max(1)));
    let orchestrator = Arc::new(RenderOrchestrator::new(
        Box::new(encoder),
        Arc::new(FsFetcher::with_root(&scene.root)),
        settings,
    ));
    orchestrator.init().await?;

    let mut request = RenderRequest::from_snapshot(scene.file.video.clone(), store.snapshot());
    if let Some(track) = audio {
        request = request.with_audio(track);
    }

    let mut status_rx = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            match status.phase {
                RenderPhase::Preparing => print!("\r  Preparing inputs...    "),
                RenderPhase::Encoding => print!("\r  Progress: {:>3}%        ", status.progress_percent),
                RenderPhase::Idle | RenderPhase::Done | RenderPhase::Failed => break,
            }
            let _ = std::io::stdout().flush();
        }
    });

    let canceller = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.cancel();
            }
        })
    };

    let result = orchestrator.render(request).await;
    canceller.abort();
    let _ = printer.await;
    println!();

    if let Err(err) = orchestrator.dispose().await {
        tracing::warn!(error = %err, "Failed to release encoder");
    }

    let artifact = result.map_err(|e| anyhow::anyhow!("Render failed: {e}"))?;
    artifact.write_to(&output_path).await?;

    println!("Render complete: {}", output_path.display());
    println!(
        "  {} bytes ({}) in {:.1}s",
        artifact.size_bytes, artifact.mime_type, artifact.elapsed_secs
    );
    Ok(())
}
