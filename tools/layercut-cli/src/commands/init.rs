//! Write a starter scene file.

use std::path::PathBuf;

use layercut_common::config::{config_file_path, AppConfig};

use crate::scene::template;

pub fn run(config: &AppConfig, video: String, output: PathBuf, write_config: bool) -> anyhow::Result<()> {
    if output.exists() {
        anyhow::bail!("{} already exists", output.display());
    }

    let scene = template(&video);
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&output, serde_json::to_string_pretty(&scene)?)?;

    println!("Scene created at {}", output.display());
    println!("  Video: {video}");
    println!("  Overlays: {} (edit or remove the examples)", scene.overlays.len());

    if write_config {
        config
            .save()
            .map_err(|e| anyhow::anyhow!("Failed to write config: {e}"))?;
        println!("Config written to {}", config_file_path().display());
    }

    println!();
    println!("Next steps:");
    println!("  layercut validate {}", output.display());
    println!("  layercut render {}", output.display());

    Ok(())
}
