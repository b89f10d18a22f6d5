// src/video.rs - Frame sources: video files through ffmpeg and, with `camera`, a webcam
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use image::DynamicImage;
use tracing::{debug, info, warn};

/// Anything that yields frames in order until it runs dry.
pub trait FrameSource {
    /// `Ok(None)` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<DynamicImage>>;
    /// Frames per second, 0.0 when unknown.
    fn fps(&self) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// `None` when the container does not record it.
    pub frame_count: Option<usize>,
}

/// Parse `width,height,r_frame_rate,nb_frames` as printed by ffprobe's csv writer.
pub(crate) fn parse_probe(path: &Path, output: &str) -> Result<VideoInfo> {
    let parts: Vec<&str> = output.trim().split(',').map(str::trim).collect();
    if parts.len() < 3 {
        bail!("Invalid video format or corrupted file");
    }

    let width = parts[0].parse().map_err(|_| anyhow!("Invalid video width"))?;
    let height = parts[1].parse().map_err(|_| anyhow!("Invalid video height"))?;
    let fps = match parts[2].split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(1.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => parts[2].parse().unwrap_or(0.0),
    };
    let frame_count = parts.get(3).and_then(|s| s.parse().ok());

    Ok(VideoInfo {
        path: path.to_path_buf(),
        width,
        height,
        fps,
        frame_count,
    })
}

/// Reads a video by extracting its frames to a scratch directory first.
pub struct VideoFileReader {
    info: VideoInfo,
    frames_dir: PathBuf,
    total_frames: usize,
    current_frame: usize,
}

impl VideoFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("Video file does not exist: {}", path.display());
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("Video path is not valid UTF-8: {}", path.display()))?;

        let output = Command::new("ffprobe")
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-show_entries", "stream=width,height,r_frame_rate,nb_frames",
                "-of", "csv=p=0",
                path_str,
            ])
            .output()
            .context("Failed to run ffprobe; is FFmpeg installed and in PATH?")?;
        if !output.status.success() {
            bail!("ffprobe could not read {}", path.display());
        }
        let info = parse_probe(path, &String::from_utf8_lossy(&output.stdout))?;
        info!(
            "Video {}: {}x{} @ {:.2} fps, {:?} frames",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );

        let frames_dir = std::env::temp_dir().join(format!("hand_to_robot_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&frames_dir)
            .with_context(|| format!("Cannot create temporary directory {}", frames_dir.display()))?;

        debug!("Extracting frames to {}", frames_dir.display());
        let status = Command::new("ffmpeg")
            .args(["-v", "error", "-i", path_str])
            .arg(frames_dir.join("frame_%06d.png"))
            .status()
            .context("Failed to extract frames with ffmpeg")?;
        if !status.success() {
            let _ = fs::remove_dir_all(&frames_dir);
            bail!("FFmpeg frame extraction failed. The video format may be unsupported.");
        }

        let total_frames = fs::read_dir(&frames_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "png"))
            .count();
        if total_frames == 0 {
            let _ = fs::remove_dir_all(&frames_dir);
            bail!("Video has no frames");
        }
        if info.frame_count.is_some_and(|n| n != total_frames) {
            warn!("ffprobe reported {:?} frames, extracted {}", info.frame_count, total_frames);
        }

        Ok(Self {
            info,
            frames_dir,
            total_frames,
            current_frame: 0,
        })
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn progress(&self) -> f32 {
        self.current_frame as f32 / self.total_frames as f32
    }
}

impl FrameSource for VideoFileReader {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        if self.current_frame >= self.total_frames {
            return Ok(None);
        }
        self.current_frame += 1;
        let frame_path = self.frames_dir.join(format!("frame_{:06}.png", self.current_frame));
        let img = image::open(&frame_path)
            .with_context(|| format!("Failed to load frame {}", frame_path.display()))?;
        Ok(Some(img))
    }

    fn fps(&self) -> f64 {
        self.info.fps
    }
}

impl Drop for VideoFileReader {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.frames_dir);
    }
}

#[cfg(feature = "camera")]
pub use camera::CameraSource;

#[cfg(feature = "camera")]
mod camera {
    use anyhow::{anyhow, Result};
    use image::DynamicImage;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
    use nokhwa::Camera;
    use tracing::info;

    use super::FrameSource;

    /// Webcam frames, mirrored so the image matches what the user sees.
    pub struct CameraSource {
        camera: Camera,
    }

    impl CameraSource {
        pub fn open(index: u32) -> Result<Self> {
            let format = CameraFormat::new(Resolution::new(640, 480), FrameFormat::MJPEG, 30);
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));
            let mut camera = Camera::new(CameraIndex::Index(index), requested)
                .map_err(|e| anyhow!("Failed to open camera {}: {}", index, e))?;
            camera
                .open_stream()
                .map_err(|e| anyhow!("Failed to open camera stream: {}", e))?;
            let res = camera.resolution();
            info!("Camera {} opened at {}x{}", index, res.width(), res.height());
            Ok(Self { camera })
        }
    }

    impl FrameSource for CameraSource {
        fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
            let frame = self
                .camera
                .frame()
                .map_err(|e| anyhow!("Failed to capture frame: {}", e))?;
            let decoded = frame
                .decode_image::<RgbFormat>()
                .map_err(|e| anyhow!("Failed to decode frame: {}", e))?;
            let flipped = image::imageops::flip_horizontal(&decoded);
            Ok(Some(DynamicImage::ImageRgb8(flipped)))
        }

        fn fps(&self) -> f64 {
            self.camera.frame_rate() as f64
        }
    }

    impl Drop for CameraSource {
        fn drop(&mut self) {
            let _ = self.camera.stop_stream();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_fractional_rate() {
        let info = parse_probe(Path::new("clip.mp4"), "1280,720,30000/1001,452\n").unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
        assert!((info.fps - 29.97).abs() < 0.01);
        assert_eq!(info.frame_count, Some(452));
    }

    #[test]
    fn test_probe_unknown_frame_count() {
        let info = parse_probe(Path::new("clip.webm"), "640,480,25/1,N/A").unwrap();
        assert_eq!(info.fps, 25.0);
        assert_eq!(info.frame_count, None);
    }

    #[test]
    fn test_probe_garbage_rejected() {
        assert!(parse_probe(Path::new("x"), "").is_err());
        assert!(parse_probe(Path::new("x"), "wide,720,30/1,1").is_err());
    }

    #[test]
    fn test_missing_file_rejected() {
        assert!(VideoFileReader::open("/nonexistent/video.mp4").is_err());
    }
}
