//! Print the filter plan for a scene without rendering it.

use std::path::PathBuf;

use layercut_common::config::AppConfig;
use layercut_render_engine::encoder::EncodeSettings;
use layercut_render_engine::ffmpeg::ffmpeg_args;
use layercut_render_engine::filter_graph::{build_filter_plan, BaseVideo, InputSource};

use crate::scene::LoadedScene;

pub fn run(config: &AppConfig, path: PathBuf, json: bool) -> anyhow::Result<()> {
    let scene = LoadedScene::load(&path)?;
    let frame = scene.frame()?;
    let snapshot = scene.build_store(frame)?.snapshot();

    let base = BaseVideo {
        input: scene.file.video.clone(),
        frame,
    };
    let plan = build_filter_plan(&base, &snapshot, scene.file.audio.as_ref())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Inputs:");
    for input in &plan.inputs {
        match &input.source {
            InputSource::File { name, media } => println!("  [{}] {name} <- {media}", input.index),
            InputSource::Lavfi { graph } => println!("  [{}] lavfi {graph}", input.index),
        }
    }

    println!();
    match plan.filter_complex() {
        Some(graph) => {
            println!("Filter graph:");
            for stage in graph.split(';') {
                println!("  {stage}");
            }
        }
        None => println!("Filter graph: none (video stream is copied)"),
    }

    let settings = EncodeSettings::from_defaults(&config.render)?;
    let work_dir = config.work_dir.join("job");
    let output = work_dir.join(format!("output.{}", settings.format.extension()));
    println!();
    println!("ffmpeg arguments:");
    println!("  {}", ffmpeg_args(&plan, &settings, &work_dir, &output).join(" "));

    Ok(())
}
