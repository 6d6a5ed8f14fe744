//! Lossless WebP conversion.

use super::read_source;
use crate::build::{ArtifactSet, SourceFile, SourceSet, Task, TaskError, TaskSpec};
use image::codecs::webp::WebPEncoder;
use image::ColorType;
use rayon::prelude::*;
use std::path::PathBuf;

/// Converts images to lossless WebP, `photo.jpg` becoming `photo.webp`.
pub struct WebpTask {
    spec: TaskSpec,
}

impl WebpTask {
    pub fn new(spec: TaskSpec) -> Self {
        Self { spec }
    }

    fn convert(&self, file: &SourceFile) -> Result<(PathBuf, Vec<u8>), TaskError> {
        let name = &self.spec.name;
        let data = read_source(name, &file.path)?;

        let decoded = image::load_from_memory(&data)
            .map_err(|e| TaskError::compile(name, format!("{}: {}", file.path.display(), e)))?;
        let rgba = decoded.to_rgba8();

        let mut encoded = Vec::new();
        WebPEncoder::new_lossless(&mut encoded)
            .encode(rgba.as_raw(), rgba.width(), rgba.height(), ColorType::Rgba8)
            .map_err(|e| TaskError::compile(name, format!("{}: {}", file.path.display(), e)))?;

        Ok((file.relative.with_extension("webp"), encoded))
    }
}

impl Task for WebpTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn run(&self, sources: &SourceSet) -> Result<ArtifactSet, TaskError> {
        let converted = sources
            .files()
            .par_iter()
            .map(|file| self.convert(file))
            .collect::<Result<Vec<_>, TaskError>>()?;

        let mut artifacts = ArtifactSet::new();
        for (path, bytes) in converted {
            artifacts.push(path, bytes);
        }
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::TaskErrorKind;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_png(path: &Path, color: [u8; 4]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbaImage::from_pixel(4, 3, Rgba(color)).save_with_format(path, ImageFormat::Png).unwrap();
    }

    #[test]
    fn test_converts_to_lossless_webp() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("assets/img/icons/dot.png");
        write_png(&src, [10, 20, 30, 255]);
        let set = SourceSet::new(vec![SourceFile::new(&src, "icons/dot.png")]);

        let artifacts = WebpTask::new(TaskSpec::new("webp", vec![], "webp")).run(&set).unwrap();
        let out = artifacts.get(Path::new("icons/dot.webp")).unwrap();

        let decoded = image::load_from_memory_with_format(&out.contents, ImageFormat::WebP).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(2, 1), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_output_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.png");
        write_png(&src, [200, 100, 0, 128]);
        let set = SourceSet::new(vec![SourceFile::new(&src, "a.png")]);
        let task = WebpTask::new(TaskSpec::new("webp", vec![], "webp"));
        assert_eq!(task.run(&set).unwrap(), task.run(&set).unwrap());
    }

    #[test]
    fn test_undecodable_image_is_compile_error() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("broken.jpg");
        fs::write(&src, b"not an image").unwrap();
        let set = SourceSet::new(vec![SourceFile::new(&src, "broken.jpg")]);

        let err = WebpTask::new(TaskSpec::new("webp", vec![], "webp")).run(&set).unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Compile);
        assert!(err.message.contains("broken.jpg"));
    }
}
