//! Stylesheet compilation.
//!
//! An optional preprocessor command turns each source into CSS; lightningcss
//! then adds vendor prefixes for the configured browsers and prints the
//! result, minified by default. With source maps enabled, `<name>.css.map` is
//! written next to each stylesheet; a map the preprocessor embedded in its
//! output is folded in so positions point at the original source.

use super::tool::ExternalTool;
use super::read_source;
use crate::build::{ArtifactSet, SourceSet, Task, TaskError, TaskSpec};
use crate::config::{parse_browser_version, BrowsersConfig};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;
use std::path::Path;

/// Printed stylesheet and, when requested, its source map.
struct Compiled {
    css: String,
    map: Option<String>,
}

/// Compiles stylesheets to `<name>.css`.
pub struct StylesTask {
    spec: TaskSpec,
    command: Option<ExternalTool>,
    minify: bool,
    browsers: Browsers,
    sourcemaps: bool,
}

impl StylesTask {
    pub fn new(spec: TaskSpec, command: Option<&[String]>, minify: bool, browsers: &BrowsersConfig) -> Self {
        Self {
            spec,
            command: command.and_then(ExternalTool::from_argv),
            minify,
            browsers: to_browsers(browsers),
            sourcemaps: false,
        }
    }

    pub fn with_sourcemaps(mut self, sourcemaps: bool) -> Self {
        self.sourcemaps = sourcemaps;
        self
    }

    /// `source_name` is how the stylesheet is named inside its source map.
    fn compile(&self, path: &Path, source_name: &str, source: Vec<u8>) -> Result<Compiled, TaskError> {
        let name = &self.spec.name;
        let css = match &self.command {
            Some(tool) => tool.run(name, path, &source, path.parent())?,
            None => source,
        };
        let css = String::from_utf8(css)
            .map_err(|_| TaskError::compile(name, format!("{}: output is not valid UTF-8", path.display())))?;

        let filename = source_name.to_string();
        let mut sheet = StyleSheet::parse(&css, ParserOptions { filename, ..ParserOptions::default() })
            .map_err(|e| TaskError::compile(name, e.to_string()))?;

        let targets = Targets::from(self.browsers);
        sheet
            .minify(MinifyOptions { targets, ..MinifyOptions::default() })
            .map_err(|e| TaskError::compile(name, e.to_string()))?;

        let mut source_map = self.sourcemaps.then(|| {
            let mut map = SourceMap::new("/");
            let index = map.add_source(source_name);
            let _ = map.set_source_content(index as usize, &css);
            map
        });

        let printed = sheet
            .to_css(PrinterOptions {
                minify: self.minify,
                targets,
                source_map: source_map.as_mut(),
                ..PrinterOptions::default()
            })
            .map_err(|e| TaskError::compile(name, e.to_string()))?;

        let map = match source_map.as_mut() {
            Some(map) => Some(
                map.to_json(None)
                    .map_err(|e| TaskError::compile(name, format!("{}: source map: {}", path.display(), e)))?,
            ),
            None => None,
        };

        Ok(Compiled { css: printed.code, map })
    }
}

/// Partials are only pulled in through imports.
fn is_partial(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('_'))
}

fn to_browsers(config: &BrowsersConfig) -> Browsers {
    let mut browsers = Browsers::default();
    for (name, version) in config.entries() {
        let version = parse_browser_version(version);
        match name {
            "chrome" => browsers.chrome = version,
            "edge" => browsers.edge = version,
            "firefox" => browsers.firefox = version,
            "safari" => browsers.safari = version,
            "ios_saf" => browsers.ios_saf = version,
            "opera" => browsers.opera = version,
            "samsung" => browsers.samsung = version,
            "android" => browsers.android = version,
            _ => {}
        }
    }
    browsers
}

impl Task for StylesTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn run(&self, sources: &SourceSet) -> Result<ArtifactSet, TaskError> {
        let mut artifacts = ArtifactSet::new();
        for file in sources.iter().filter(|f| !is_partial(&f.path)) {
            let source = read_source(&self.spec.name, &file.path)?;
            let source_name = file.relative.to_string_lossy().replace('\\', "/");
            let compiled = self.compile(&file.path, &source_name, source)?;
            let output = file.relative.with_extension("css");

            match compiled.map {
                Some(map) => {
                    let map_path = output.with_extension("css.map");
                    let map_name = map_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                    let css = format!("{}\n/*# sourceMappingURL={} */\n", compiled.css, map_name);
                    artifacts.push(output, css.into_bytes());
                    artifacts.push(map_path, map.into_bytes());
                }
                None => artifacts.push(output, compiled.css.into_bytes()),
            }
        }
        Ok(artifacts)
    }
}
