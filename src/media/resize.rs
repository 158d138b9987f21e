use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use image::{ImageFormat, ImageReader};

/// Decodes `input_path` and writes a PNG fitting in a `size`x`size` box,
/// keeping the aspect ratio.
pub fn image_thumbnail(input_path: &Path, output_path: &Path, size: u32) -> Result<()> {
    // content decides the format, catalogued names may lack an extension
    let image = ImageReader::open(input_path)
        .with_context(|| format!("Failed to open image {:?}", input_path))?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("Failed to decode image {:?}", input_path))?;
    image
        .thumbnail(size, size)
        .save_with_format(output_path, ImageFormat::Png)
        .with_context(|| format!("Failed to write thumbnail {:?}", output_path))?;
    Ok(())
}

/// Builds the ImageMagick invocation rendering the first page of a
/// document (PDF, DjVu) as a PNG thumbnail.
pub fn document_command(input_path: &Path, output_path: &Path, size: u32) -> Command {
    let mut first_page = input_path.as_os_str().to_os_string();
    first_page.push("[0]");
    let mut target = std::ffi::OsString::from("png:");
    target.push(output_path.as_os_str());

    let mut command = Command::new("convert");
    command
        .arg(first_page)
        .arg("-thumbnail")
        .arg(format!("{size}x{size}"))
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    command
}

pub fn document_thumbnail(input_path: &Path, output_path: &Path, size: u32) -> Result<()> {
    let status = document_command(input_path, output_path, size)
        .status()
        .context("Failed to spawn convert command")?;
    if !status.success() {
        bail!("convert exited with {} for {:?}", status, input_path);
    }
    Ok(())
}
