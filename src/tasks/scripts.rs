//! Script transformation.
//!
//! With source maps enabled, an inline map the command chain left at the end
//! of a script (`//# sourceMappingURL=data:...;base64,...`) is moved into a
//! `<name>.map` file and the comment rewritten to point at it. Bundles get an
//! index map with one section per source that carried a map.

use super::read_source;
use super::tool::{run_chain, ExternalTool};
use crate::build::{ArtifactSet, SourceSet, Task, TaskError, TaskSpec};
use base64::Engine;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const MAP_COMMENT: &str = "//# sourceMappingURL=";

/// Pipes each script through a command chain, optionally bundling the results.
pub struct ScriptsTask {
    spec: TaskSpec,
    commands: Vec<ExternalTool>,
    bundle: Option<String>,
    sourcemaps: bool,
}

impl ScriptsTask {
    pub fn new(spec: TaskSpec, commands: &[Vec<String>], bundle: Option<String>) -> Self {
        Self {
            spec,
            commands: commands.iter().filter_map(|c| ExternalTool::from_argv(c)).collect(),
            bundle,
            sourcemaps: false,
        }
    }

    pub fn with_sourcemaps(mut self, sourcemaps: bool) -> Self {
        self.sourcemaps = sourcemaps;
        self
    }

    /// Split off a trailing inline map, if the output carries one.
    fn extract_map(&self, path: &Path, output: Vec<u8>) -> Result<(Vec<u8>, Option<Value>), TaskError> {
        if !self.sourcemaps {
            return Ok((output, None));
        }
        match split_inline_map(&output).map(|(code, url)| (code.to_vec(), decode_map(url))) {
            Some((code, map)) => {
                let map = map.map_err(|e| {
                    TaskError::compile(&self.spec.name, format!("{}: source map: {}", path.display(), e))
                })?;
                Ok((code, Some(map)))
            }
            None => {
                tracing::debug!("{}: no inline source map in output", path.display());
                Ok((output, None))
            }
        }
    }
}

/// Find a trailing `//# sourceMappingURL=data:` line and split it from the code.
fn split_inline_map(output: &[u8]) -> Option<(&[u8], &str)> {
    let text = std::str::from_utf8(output).ok()?;
    let trimmed = text.trim_end();
    let start = trimmed.rfind(MAP_COMMENT)?;
    if trimmed[start..].contains('\n') {
        return None;
    }
    let url = &trimmed[start + MAP_COMMENT.len()..];
    if !url.starts_with("data:") {
        return None;
    }
    let code = trimmed[..start].trim_end_matches(['\n', '\r']);
    Some((code.as_bytes(), url))
}

fn decode_map(url: &str) -> Result<Value, String> {
    let (meta, data) = url.split_once(',').ok_or("malformed data URL")?;
    let bytes = if meta.ends_with(";base64") {
        base64::engine::general_purpose::STANDARD.decode(data.trim()).map_err(|e| e.to_string())?
    } else {
        data.as_bytes().to_vec()
    };
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

/// `app.js` -> `app.js.map`
fn map_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".map");
    output.with_file_name(name)
}

/// Append the map comment and push both files.
fn push_with_map(artifacts: &mut ArtifactSet, output: PathBuf, mut code: Vec<u8>, map: &Value) {
    let map_file = map_path(&output);
    let map_name = map_file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    code.extend_from_slice(format!("\n{}{}\n", MAP_COMMENT, map_name).as_bytes());
    artifacts.push(output, code);
    artifacts.push(map_file, map.to_string().into_bytes());
}

impl Task for ScriptsTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn run(&self, sources: &SourceSet) -> Result<ArtifactSet, TaskError> {
        let name = &self.spec.name;
        let mut artifacts = ArtifactSet::new();
        let mut bundled: Vec<u8> = Vec::new();
        let mut sections: Vec<Value> = Vec::new();

        for file in sources.iter() {
            let source = read_source(name, &file.path)?;
            let output = run_chain(&self.commands, name, &file.path, source, file.path.parent())?;
            let (mut code, map) = self.extract_map(&file.path, output)?;

            match &self.bundle {
                Some(_) => {
                    if !bundled.is_empty() && !bundled.ends_with(b"\n") {
                        bundled.push(b'\n');
                    }
                    if let Some(map) = map {
                        let line = bundled.iter().filter(|b| **b == b'\n').count();
                        sections.push(json!({ "offset": { "line": line, "column": 0 }, "map": map }));
                    }
                    bundled.append(&mut code);
                }
                None => match map {
                    Some(map) => push_with_map(&mut artifacts, file.relative.clone(), code, &map),
                    None => artifacts.push(file.relative.clone(), code),
                },
            }
        }

        if let Some(bundle) = &self.bundle {
            if !sources.is_empty() {
                if sections.is_empty() {
                    artifacts.push(bundle, bundled);
                } else {
                    let index = json!({ "version": 3, "file": bundle, "sections": sections });
                    push_with_map(&mut artifacts, PathBuf::from(bundle), bundled, &index);
                }
            }
        }

        Ok(artifacts)
    }
}
