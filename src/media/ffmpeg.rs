use std::process::{Command, Stdio};
use std::path::Path;
use anyhow::{Result, Context, bail};

/// Builds the ffmpeg invocation writing one representative frame of
/// `input_path`, scaled to fit a `size`x`size` box, as a PNG.
pub fn thumbnail_command(input_path: &Path, output_path: &Path, size: u32) -> Command {
    // thumbnail picks the most representative frame of each batch, so the
    // result is rarely a black intro frame
    let filter = format!(
        "thumbnail,scale={size}:{size}:force_original_aspect_ratio=decrease"
    );

    let mut command = Command::new("ffmpeg");
    command
        .arg("-y")
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(input_path)
        .arg("-vf")
        .arg(filter)
        .arg("-frames:v")
        .arg("1")
        .arg("-f")
        .arg("image2")
        .arg("-c:v")
        .arg("png")
        .arg(output_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    command
}

pub fn extract_thumbnail(input_path: &Path, output_path: &Path, size: u32) -> Result<()> {
    let status = thumbnail_command(input_path, output_path, size)
        .status()
        .context("Failed to spawn ffmpeg command")?;

    if !status.success() {
        bail!("ffmpeg exited with {} for {:?}", status, input_path);
    }

    Ok(())
}
