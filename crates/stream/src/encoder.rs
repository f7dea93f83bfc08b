//! Turns finished recording sessions into browser-playable MP4 files.
//!
//! Jobs run on a dedicated worker task, one at a time. The frames are first
//! dumped into an MJPEG file next to the target, then `ffmpeg` transcodes
//! that into H.264 with the moov atom up front. The MJPEG file is removed on
//! success and kept for manual recovery on failure.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use homedash_core::intermediate_filename;

use crate::error::{Result, StreamError};

#[derive(Debug)]
pub struct EncodeJob {
    pub camera_id: String,
    pub filename: String,
    pub frames: Vec<Bytes>,
}

#[derive(Debug, Clone)]
pub struct EncodeOutcome {
    pub camera_id: String,
    pub filename: String,
    pub frames: usize,
    pub result: std::result::Result<PathBuf, String>,
}

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub videos_dir: PathBuf,
    pub ffmpeg_bin: String,
    pub fps: u32,
}

/// Cheap to clone; submitting never waits on the encoder.
#[derive(Clone)]
pub struct EncoderHandle {
    jobs: mpsc::UnboundedSender<EncodeJob>,
    pending: Arc<AtomicUsize>,
}

impl EncoderHandle {
    /// Start the worker. Every finished job is reported on `outcomes`.
    pub fn spawn(settings: EncoderSettings, outcomes: mpsc::UnboundedSender<EncodeOutcome>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(run_worker(settings, rx, outcomes, pending.clone()));
        (Self { jobs: tx, pending }, worker)
    }

    /// Jobs submitted but not yet reported.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn submit(&self, job: EncodeJob) {
        if job.frames.is_empty() {
            info!(camera_id = %job.camera_id, filename = %job.filename, "recording captured no frames; nothing to encode");
            return;
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.jobs.send(job) {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            error!(camera_id = %e.0.camera_id, filename = %e.0.filename, "encoder worker is gone; recording discarded");
        }
    }
}

async fn run_worker(
    settings: EncoderSettings,
    mut jobs: mpsc::UnboundedReceiver<EncodeJob>,
    outcomes: mpsc::UnboundedSender<EncodeOutcome>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(job) = jobs.recv().await {
        let frames = job.frames.len();
        let result = encode(&settings, &job.filename, &job.frames).await;
        match &result {
            Ok(path) => info!(camera_id = %job.camera_id, path = %path.display(), frames, "recording saved"),
            Err(e) => warn!(camera_id = %job.camera_id, filename = %job.filename, error = %e, "recording encode failed"),
        }
        let _ = outcomes.send(EncodeOutcome {
            camera_id: job.camera_id,
            filename: job.filename,
            frames,
            result: result.map_err(|e| e.to_string()),
        });
        pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Encode `frames` into `<videos_dir>/<filename>`.
pub async fn encode(settings: &EncoderSettings, filename: &str, frames: &[Bytes]) -> Result<PathBuf> {
    fs::create_dir_all(&settings.videos_dir).await?;
    let output = settings.videos_dir.join(filename);
    let intermediate = settings.videos_dir.join(intermediate_filename(filename));

    write_intermediate(&intermediate, frames).await?;

    match transcode(settings, &intermediate, &output).await {
        Ok(()) => {
            if let Err(e) = fs::remove_file(&intermediate).await {
                warn!(path = %intermediate.display(), error = %e, "failed to remove intermediate recording");
            }
            Ok(output)
        }
        Err(e) => {
            // never leave a half-written mp4 behind
            let _ = fs::remove_file(&output).await;
            warn!(path = %intermediate.display(), "keeping intermediate recording after failed transcode");
            Err(e)
        }
    }
}

async fn write_intermediate(path: &Path, frames: &[Bytes]) -> Result<()> {
    let mut file = fs::File::create(path).await?;
    for frame in frames {
        file.write_all(frame).await?;
    }
    file.flush().await?;
    Ok(())
}

async fn transcode(settings: &EncoderSettings, input: &Path, output: &Path) -> Result<()> {
    let framerate = settings.fps.to_string();
    let result = Command::new(&settings.ffmpeg_bin)
        .args(["-hide_banner", "-loglevel", "error", "-y", "-f", "mjpeg", "-framerate", &framerate, "-i"])
        .arg(input.as_os_str())
        .args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-movflags", "+faststart"])
        .arg(output.as_os_str())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| StreamError::Transcode(format!("failed to run {}: {}", settings.ffmpeg_bin, e)))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(StreamError::Transcode(format!("{} exited with {}: {}", settings.ffmpeg_bin, result.status, stderr.trim())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &Path, bin: &str) -> EncoderSettings {
        EncoderSettings { videos_dir: dir.to_path_buf(), ffmpeg_bin: bin.to_string(), fps: 20 }
    }

    fn frames() -> Vec<Bytes> {
        vec![Bytes::from_static(b"\xFF\xD8one\xFF\xD9"), Bytes::from_static(b"\xFF\xD8two\xFF\xD9")]
    }

    #[tokio::test]
    async fn failed_transcode_keeps_intermediate_and_no_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let err = encode(&settings(dir.path(), "/nonexistent/ffmpeg"), "video_cam_1.mp4", &frames())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Transcode(_)));

        let kept = std::fs::read(dir.path().join("video_cam_1.mjpeg")).unwrap();
        assert_eq!(kept, b"\xFF\xD8one\xFF\xD9\xFF\xD8two\xFF\xD9");
        assert!(!dir.path().join("video_cam_1.mp4").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_transcode_removes_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        // stand-in for ffmpeg: copy the input (after -i) to the last argument
        let script = dir.path().join("fake-ffmpeg.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nin=\"\"\nprev=\"\"\nfor a in \"$@\"; do if [ \"$prev\" = \"-i\" ]; then in=\"$a\"; fi; prev=\"$a\"; out=\"$a\"; done\ncp \"$in\" \"$out\"\n",
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let videos = dir.path().join("videos");
        let out = encode(&settings(&videos, script.to_str().unwrap()), "video_cam_2.mp4", &frames())
            .await
            .unwrap();
        assert_eq!(out, videos.join("video_cam_2.mp4"));
        assert!(out.exists());
        assert!(!videos.join("video_cam_2.mjpeg").exists());
    }

    #[tokio::test]
    async fn worker_reports_outcome_and_skips_empty_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (encoder, _worker) = EncoderHandle::spawn(settings(dir.path(), "/nonexistent/ffmpeg"), tx);

        encoder.submit(EncodeJob { camera_id: "cam".into(), filename: "empty.mp4".into(), frames: Vec::new() });
        encoder.submit(EncodeJob { camera_id: "cam".into(), filename: "video_cam_3.mp4".into(), frames: frames() });

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.filename, "video_cam_3.mp4");
        assert_eq!(outcome.frames, 2);
        assert!(outcome.result.is_err());
        assert!(!dir.path().join("empty.mjpeg").exists());
    }
}
