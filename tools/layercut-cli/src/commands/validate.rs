//! Validate a scene file.

use std::path::PathBuf;

use layercut_overlay_model::overlay::{format_time, MediaRef, OverlayKind};

use crate::scene::LoadedScene;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    println!("Validating scene at: {}", path.display());

    let scene = LoadedScene::load(&path)?;
    let frame = scene.frame()?;

    println!("  Video: {}", scene.file.video);
    println!("  Resolution: {}x{}", frame.width, frame.height);
    if let Some(audio) = &scene.file.audio {
        println!("  Audio: {audio}");
    }

    let store = scene.build_store(frame)?;
    let snapshot = store.snapshot();
    println!("  Overlays: {}", snapshot.len());
    for (index, overlay) in snapshot.iter().enumerate() {
        let window = overlay.time_window();
        let (w, h) = overlay.pixel_extent().rounded();
        let label = match overlay.kind() {
            OverlayKind::Image(image) => format!("image {}", image.source),
            OverlayKind::Text(text) => format!("text {:?}", text.text),
        };
        println!(
            "    #{index} {label} at ({:.3}, {:.3}) {w}x{h}px, {} to {}",
            overlay.position().x,
            overlay.position().y,
            format_time(window.start()),
            format_time(window.end()),
        );
    }

    let mut missing = Vec::new();
    let local_sources = std::iter::once(&scene.file.video)
        .chain(scene.file.audio.iter())
        .chain(snapshot.iter().filter_map(|overlay| match overlay.kind() {
            OverlayKind::Image(image) => Some(&image.source),
            OverlayKind::Text(_) => None,
        }));
    for media in local_sources {
        if let MediaRef::Path(path) = media {
            let resolved = scene.root.join(path);
            if !resolved.exists() {
                missing.push(resolved);
            }
        }
    }

    if missing.is_empty() {
        println!("  Sources: All present");
        println!("\nScene is valid.");
    } else {
        println!("\nValidation issues:");
        for path in &missing {
            println!("  - missing file: {}", path.display());
        }
        println!("\n{} issue(s) found. Rendering will fail.", missing.len());
    }

    Ok(())
}
