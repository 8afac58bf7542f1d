//! Check system capabilities.

use layercut_common::config::{config_file_path, AppConfig};
use layercut_render_engine::ffmpeg::command_exists;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Layercut System Check");
    println!("{}", "=".repeat(50));

    let tools = [
        ("ffmpeg", true, "encoding"),
        ("ffprobe", false, "probing video size and duration"),
    ];
    let mut all_required_ok = true;
    for (binary, required, purpose) in tools {
        if command_exists(binary) {
            println!("[OK] {binary} ({purpose})");
        } else if required {
            all_required_ok = false;
            println!("[MISSING] {binary} ({purpose}) - install ffmpeg and ensure it is on PATH");
        } else {
            println!("[WARN] {binary} ({purpose}) - scenes must give width and height");
        }
    }

    let config_path = config_file_path();
    println!();
    println!(
        "Config: {} ({})",
        config_path.display(),
        if config_path.exists() { "loaded" } else { "defaults" }
    );
    println!("  Work dir: {}", config.work_dir.display());
    println!("  Format: {}", config.render.format);
    println!(
        "  Bitrate: {}k video / {}k audio, preset {}",
        config.render.video_bitrate_kbps, config.render.audio_bitrate_kbps, config.render.preset
    );

    println!();
    if all_required_ok {
        println!("All required capabilities are available. Layercut is ready.");
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
    }

    Ok(())
}
