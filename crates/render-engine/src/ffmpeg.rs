//! Native ffmpeg encoder backend.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use layercut_common::error::{LayercutError, LayercutResult};

use crate::encoder::{EncodeJob, EncodeSettings, EncodedOutput, Encoder, ProgressSender};
use crate::filter_graph::{AudioMapping, FilterPlan, InputSource};

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Runs the system `ffmpeg` binary against a per-job scratch directory.
///
/// Scratch space lives in a session directory created under `work_root` by
/// `init`. Only that session directory is ever removed; `work_root` itself
/// may be shared with other processes and files.
#[derive(Debug)]
pub struct FfmpegEncoder {
    binary: String,
    work_root: PathBuf,
    session_dir: Option<PathBuf>,
    stall_warning: Duration,
    job_seq: AtomicU64,
}

impl FfmpegEncoder {
    pub fn new(work_root: impl Into<PathBuf>) -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            work_root: work_root.into(),
            session_dir: None,
            stall_warning: Duration::from_secs(10),
            job_seq: AtomicU64::new(0),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_stall_warning(mut self, after: Duration) -> Self {
        self.stall_warning = after;
        self
    }

    /// Scratch directory owned by this encoder, present between `init` and
    /// `dispose`.
    pub fn session_dir(&self) -> Option<&Path> {
        self.session_dir.as_deref()
    }

    async fn run_job(
        &self,
        dir: &Path,
        job: EncodeJob,
        progress: &ProgressSender,
    ) -> LayercutResult<EncodedOutput> {
        for input in &job.inputs {
            tokio::fs::write(dir.join(&input.name), &input.bytes).await?;
        }

        let output = dir.join(format!("output.{}", job.settings.format.extension()));
        let args = ffmpeg_args(&job.plan, &job.settings, dir, &output);

        let expected_duration_secs = match job.plan.base_input_name() {
            Some(name) => {
                let base = dir.join(name);
                tokio::task::spawn_blocking(move || probe_duration_secs(&base))
                    .await
                    .ok()
                    .flatten()
            }
            None => None,
        };

        self.run_ffmpeg(&args, expected_duration_secs, progress)
            .await?;

        let bytes = tokio::fs::read(&output).await.map_err(|e| {
            LayercutError::encode(format!("ffmpeg produced no output file: {e}"))
        })?;
        Ok(EncodedOutput {
            bytes,
            mime_type: job.settings.format.mime_type().to_string(),
        })
    }

    async fn run_ffmpeg(
        &self,
        args: &[String],
        expected_duration_secs: Option<f64>,
        progress: &ProgressSender,
    ) -> LayercutResult<()> {
        tracing::debug!(args = ?args, "Running ffmpeg");
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| LayercutError::encode(format!("Failed to start ffmpeg: {e}")))?;

        tracing::info!(
            pid = child.id(),
            args_len = args.len(),
            expected_duration_secs,
            "ffmpeg process started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LayercutError::encode("Failed to capture ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| LayercutError::encode("Failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut latest = ProgressState::default();
        let mut last_progress_secs = 0.0f64;
        let mut last_progress_wall = Instant::now();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| LayercutError::encode(format!("Failed reading ffmpeg progress: {e}")))?
        {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            latest.update(key, value);
            if key != "progress" {
                continue;
            }

            if latest.out_time_secs > last_progress_secs + 0.001 {
                last_progress_secs = latest.out_time_secs;
                last_progress_wall = Instant::now();
            }
            // A dropped receiver only means nobody is watching.
            let _ = progress.send(latest.fraction(expected_duration_secs));

            if last_progress_wall.elapsed() >= self.stall_warning {
                tracing::warn!(
                    out_time_secs = latest.out_time_secs,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "No ffmpeg progress advancement for {}s",
                    self.stall_warning.as_secs()
                );
                last_progress_wall = Instant::now();
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| LayercutError::encode(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr_output = stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            return Err(LayercutError::encode(format!(
                "ffmpeg failed (status {}): {}",
                status,
                stderr_output.trim()
            )));
        }

        tracing::info!(
            elapsed_secs = start.elapsed().as_secs_f64(),
            "ffmpeg finished"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl Encoder for FfmpegEncoder {
    async fn init(&mut self) -> LayercutResult<()> {
        if self.session_dir.is_some() {
            return Ok(());
        }
        if !command_exists(&self.binary) {
            return Err(LayercutError::unsupported(format!(
                "No supported encoder found (expected {} in PATH)",
                self.binary
            )));
        }
        let session = self.work_root.join(format!(
            "session-{}-{}-{}",
            std::process::id(),
            Utc::now().format("%Y%m%d%H%M%S%f"),
            SESSION_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::create_dir_all(&session).await?;
        tracing::info!(session_dir = %session.display(), "ffmpeg encoder ready");
        self.session_dir = Some(session);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.session_dir.is_some()
    }

    async fn encode(
        &self,
        job: EncodeJob,
        progress: ProgressSender,
    ) -> LayercutResult<EncodedOutput> {
        let session = self
            .session_dir
            .as_ref()
            .ok_or_else(|| LayercutError::encode("ffmpeg encoder is not initialized"))?;

        let seq = self.job_seq.fetch_add(1, Ordering::Relaxed);
        let dir = session.join(format!("job-{}-{seq}", job.job_id));
        tokio::fs::create_dir_all(&dir).await?;

        let result = self.run_job(&dir, job, &progress).await;

        if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
            tracing::warn!(dir = %dir.display(), error = %err, "Failed to clean job directory");
        }
        result
    }

    async fn dispose(&mut self) -> LayercutResult<()> {
        let Some(session) = self.session_dir.take() else {
            return Ok(());
        };
        // Cancelled jobs leave their scratch directories behind.
        match tokio::fs::remove_dir_all(&session).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Full ffmpeg argument list for a plan, staged under `work_dir`.
pub fn ffmpeg_args(
    plan: &FilterPlan,
    settings: &EncodeSettings,
    work_dir: &Path,
    output: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
    ];

    for input in &plan.inputs {
        match &input.source {
            InputSource::File { name, .. } => {
                args.push("-i".to_string());
                args.push(work_dir.join(name).to_string_lossy().into_owned());
            }
            InputSource::Lavfi { graph } => {
                args.extend(["-f".to_string(), "lavfi".to_string(), "-i".to_string()]);
                args.push(graph.clone());
            }
        }
    }

    if let Some(graph) = plan.filter_complex() {
        args.push("-filter_complex".to_string());
        args.push(graph);
    }
    args.push("-map".to_string());
    args.push(plan.video_map_spec());
    args.push("-map".to_string());
    args.push(plan.audio.map_spec());

    args.extend(settings.codec_args(plan.is_passthrough()));
    // An external track may outlast the base video.
    if matches!(plan.audio, AudioMapping::External { .. }) {
        args.push("-shortest".to_string());
    }
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Whether `binary` resolves on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Width and height of the first video stream.
pub fn probe_video_dimensions(path: &Path) -> Option<(u32, u32)> {
    let output = std::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0:s=x",
        ])
        .arg(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let raw = String::from_utf8(output.stdout).ok()?;
    let line = raw.lines().next()?.trim();
    let (w, h) = line.split_once('x')?;
    let width = w.parse::<u32>().ok()?;
    let height = h.parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Container duration in seconds.
pub fn probe_duration_secs(path: &Path) -> Option<f64> {
    let output = std::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }
    let raw = String::from_utf8(output.stdout).ok()?;
    let secs = raw.lines().next()?.trim().parse::<f64>().ok()?;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both keys.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }

    fn fraction(&self, expected_duration_secs: Option<f64>) -> f64 {
        if self.complete {
            return 1.0;
        }
        match expected_duration_secs {
            Some(total) if total > 0.0 => (self.out_time_secs / total).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::OutputFormat;
    use crate::filter_graph::{build_filter_plan, BaseVideo};
    use crate::media::StagedInput;
    use layercut_overlay_model::overlay::{MediaRef, OverlayDraft, TimeWindow};
    use layercut_overlay_model::store::OverlayStore;
    use layercut_overlay_model::transform::FrameSize;

    fn base() -> BaseVideo {
        BaseVideo {
            input: MediaRef::path("clip.mp4"),
            frame: FrameSize::new(1920, 1080),
        }
    }

    #[test]
    fn test_progress_state_parses_ffmpeg_keys() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "5000000");
        assert!((state.fraction(Some(10.0)) - 0.5).abs() < 1e-9);
        state.update("out_time_ms", "20000000");
        assert_eq!(state.fraction(Some(10.0)), 1.0);
        // Without a known duration only the end marker means anything.
        assert_eq!(state.fraction(None), 0.0);

        let mut unknown = ProgressState::default();
        unknown.update("out_time_us", "5000000");
        assert_eq!(unknown.fraction(None), 0.0);
        unknown.update("progress", "end");
        assert_eq!(unknown.fraction(None), 1.0);
    }

    #[test]
    fn test_passthrough_args_copy_video() {
        let plan = build_filter_plan(&base(), &[], None).unwrap();
        let args = ffmpeg_args(
            &plan,
            &EncodeSettings::default(),
            Path::new("/work"),
            Path::new("/work/output.mp4"),
        );
        assert!(!args.contains(&"-filter_complex".to_string()));
        let joined = args.join(" ");
        assert!(joined.contains("-i /work/input.mp4"));
        assert!(joined.contains("-map 0:v -map 0:a? -c:v copy"));
        assert!(!joined.contains("-shortest"));
        assert_eq!(args.last().unwrap(), "/work/output.mp4");
    }

    #[test]
    fn test_filtered_args_map_final_label() {
        let store = OverlayStore::new(FrameSize::new(1920, 1080));
        store
            .add(
                OverlayDraft::image(MediaRef::path("logo.png"))
                    .with_extent(200.0, 200.0)
                    .during(TimeWindow::new(0.0, 2.0).unwrap()),
            )
            .unwrap();
        store.add(OverlayDraft::text("hello")).unwrap();
        let audio = MediaRef::path("music.mp3");
        let plan = build_filter_plan(&base(), &store.snapshot(), Some(&audio)).unwrap();

        let args = ffmpeg_args(
            &plan,
            &EncodeSettings::default(),
            Path::new("/work"),
            Path::new("/work/output.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-i /work/overlay_0.png -f lavfi -i color=c=black@0.0"));
        assert!(joined.contains("-i /work/audio.mp3"));
        assert!(joined.contains("-map [v1] -map 3:a:0"));
        assert!(joined.contains("libx264"));
        assert!(joined.contains("-shortest"));

        let fc = args
            .iter()
            .position(|a| a == "-filter_complex")
            .map(|i| args[i + 1].clone())
            .unwrap();
        assert_eq!(Some(fc), plan.filter_complex());
    }

    #[test]
    fn test_passthrough_webm_args_reencode_video() {
        let plan = build_filter_plan(&base(), &[], None).unwrap();
        let settings = EncodeSettings {
            format: OutputFormat::Webm,
            ..EncodeSettings::default()
        };
        let args = ffmpeg_args(
            &plan,
            &settings,
            Path::new("/work"),
            Path::new("/work/output.webm"),
        );
        let joined = args.join(" ");
        assert!(!args.contains(&"-filter_complex".to_string()));
        assert!(joined.contains("-map 0:v -map 0:a? -c:v libvpx-vp9"));
        assert!(!joined.contains("copy"));
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("layercut-ffmpeg-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn passthrough_job() -> EncodeJob {
        EncodeJob {
            job_id: 1,
            inputs: vec![StagedInput {
                name: "input.mp4".to_string(),
                bytes: b"base".to_vec(),
            }],
            plan: build_filter_plan(&base(), &[], None).unwrap(),
            settings: EncodeSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_dispose_keeps_unrelated_files_in_work_root() {
        let root = scratch("dispose");
        std::fs::write(root.join("notes.txt"), b"keep me").unwrap();

        let mut encoder = FfmpegEncoder::new(&root).with_binary("sh");
        encoder.init().await.unwrap();
        let session = encoder.session_dir().unwrap().to_path_buf();
        assert!(session.starts_with(&root));
        assert!(session.is_dir());

        encoder.dispose().await.unwrap();
        assert!(!encoder.is_ready());
        assert!(!session.exists());
        assert!(root.join("notes.txt").is_file());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_encoders_sharing_work_root_get_separate_sessions() {
        let root = scratch("sessions");
        let mut first = FfmpegEncoder::new(&root).with_binary("sh");
        let mut second = FfmpegEncoder::new(&root).with_binary("sh");
        first.init().await.unwrap();
        second.init().await.unwrap();
        assert_ne!(first.session_dir(), second.session_dir());

        first.dispose().await.unwrap();
        assert!(second.session_dir().unwrap().is_dir());
        second.dispose().await.unwrap();

        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_encode_reports_progress_and_cleans_job_dir() {
        let root = scratch("encode-ok");
        let bin_dir = scratch("encode-ok-bin");
        let binary = fake_ffmpeg(
            &bin_dir,
            "for last; do :; done\n\
             echo out_time_us=1000000\n\
             echo progress=continue\n\
             echo out_time_us=2000000\n\
             echo progress=end\n\
             printf encoded > \"$last\"",
        );

        let mut encoder = FfmpegEncoder::new(&root).with_binary(binary);
        encoder.init().await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let output = encoder.encode(passthrough_job(), tx).await.unwrap();
        assert_eq!(output.bytes, b"encoded");
        assert_eq!(output.mime_type, "video/mp4");

        let mut fractions = Vec::new();
        while let Ok(fraction) = rx.try_recv() {
            fractions.push(fraction);
        }
        assert_eq!(fractions.len(), 2);
        assert_eq!(fractions.last(), Some(&1.0));

        let session = encoder.session_dir().unwrap().to_path_buf();
        assert_eq!(std::fs::read_dir(&session).unwrap().count(), 0);

        encoder.dispose().await.unwrap();
        let _ = std::fs::remove_dir_all(&root);
        let _ = std::fs::remove_dir_all(&bin_dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_encode_failure_keeps_stderr_detail() {
        let root = scratch("encode-fail");
        let bin_dir = scratch("encode-fail-bin");
        let binary = fake_ffmpeg(
            &bin_dir,
            "echo 'Error initializing complex filters: bad label' >&2\nexit 1",
        );

        let mut encoder = FfmpegEncoder::new(&root).with_binary(binary);
        encoder.init().await.unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let err = encoder.encode(passthrough_job(), tx).await.unwrap_err();
        match err {
            LayercutError::Encode { message } => {
                assert!(message.contains("bad label"), "{message}");
            }
            other => panic!("expected encode error, got {other:?}"),
        }

        let session = encoder.session_dir().unwrap().to_path_buf();
        assert_eq!(std::fs::read_dir(&session).unwrap().count(), 0);

        encoder.dispose().await.unwrap();
        let _ = std::fs::remove_dir_all(&root);
        let _ = std::fs::remove_dir_all(&bin_dir);
    }
}
