//! Lossy image compression through the TinyPNG service.
//!
//! PNG, JPEG and WebP sources are uploaded for compression; other matches
//! (SVG, GIF) are copied unchanged. A signature file inside the destination
//! records the hash of every source and of the compressed output, so
//! unchanged images are not sent to the service again.

use super::read_source;
use crate::build::{ArtifactSet, SourceFile, SourceSet, Task, TaskError, TaskSpec};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const TINIFY_ENDPOINT: &str = "https://api.tinify.com/shrink";

/// Error from an image optimization backend.
#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Response(String),
}

/// Compresses encoded image bytes.
pub trait ImageOptimizer: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, OptimizeError>;
}

#[derive(Debug, Deserialize)]
struct ShrinkResponse {
    output: ShrinkOutput,
}

#[derive(Debug, Deserialize)]
struct ShrinkOutput {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

/// Blocking client for the TinyPNG "shrink" API.
pub struct TinifyClient {
    client: reqwest::blocking::Client,
    api_key: String,
    endpoint: String,
}

impl TinifyClient {
    pub fn new(api_key: String) -> Self {
        Self::with_endpoint(api_key, TINIFY_ENDPOINT.to_string())
    }

    pub fn with_endpoint(api_key: String, endpoint: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self { client, api_key, endpoint }
    }

    fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, OptimizeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        let message = match serde_json::from_str::<ServiceError>(&body) {
            Ok(e) if !e.message.is_empty() => format!("{} ({})", e.message, e.error),
            _ => body,
        };
        Err(OptimizeError::Status { status: status.as_u16(), message })
    }
}

impl ImageOptimizer for TinifyClient {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, OptimizeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth("api", Some(&self.api_key))
            .body(data.to_vec())
            .send()?;
        let shrink: ShrinkResponse = Self::check(response)?
            .json()
            .map_err(|e| OptimizeError::Response(e.to_string()))?;

        let output = self.client.get(&shrink.output.url).basic_auth("api", Some(&self.api_key)).send()?;
        Ok(Self::check(output)?.bytes()?.to_vec())
    }
}

/// Hashes recorded for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Hash of the source file
    pub source: String,
    /// Hash of the compressed output
    pub output: String,
}

/// Signatures by path relative to the destination.
pub type Signatures = BTreeMap<String, Signature>;

/// SHA-256 of `data`, hex encoded.
pub fn fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn is_compressible(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| matches!(e.as_str(), "png" | "jpg" | "jpeg" | "webp"))
}

/// Compresses images into `dest`, keeping their relative layout.
pub struct OptimizeImagesTask {
    spec: TaskSpec,
    /// Absolute destination, where previous outputs and signatures live
    dest_dir: PathBuf,
    /// Signature file, relative to the destination
    signatures: PathBuf,
    optimizer: Option<Arc<dyn ImageOptimizer>>,
}

impl OptimizeImagesTask {
    pub fn new(
        spec: TaskSpec,
        dest_dir: PathBuf,
        signatures: PathBuf,
        optimizer: Option<Arc<dyn ImageOptimizer>>,
    ) -> Self {
        Self { spec, dest_dir, signatures, optimizer }
    }

    fn load_signatures(&self) -> Signatures {
        let path = self.dest_dir.join(&self.signatures);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable signature file {}: {}", path.display(), e);
                Signatures::new()
            }),
            Err(_) => Signatures::new(),
        }
    }

    /// Reuse the previous output when neither the source nor the output changed.
    fn cached_output(&self, key: &str, source_hash: &str, previous: &Signatures) -> Option<Vec<u8>> {
        let signature = previous.get(key)?;
        if signature.source != source_hash {
            return None;
        }
        let existing = std::fs::read(self.dest_dir.join(key)).ok()?;
        (fingerprint(&existing) == signature.output).then_some(existing)
    }

    fn process(&self, file: &SourceFile, previous: &Signatures) -> Result<(PathBuf, Vec<u8>, Option<Signature>), TaskError> {
        let name = &self.spec.name;
        let data = read_source(name, &file.path)?;

        if !is_compressible(&file.path) {
            return Ok((file.relative.clone(), data, None));
        }

        let key = file.relative.to_string_lossy().replace('\\', "/");
        let source_hash = fingerprint(&data);
        if let Some(existing) = self.cached_output(&key, &source_hash, previous) {
            tracing::debug!("'{}': {} unchanged, skipping compression", name, key);
            let output = fingerprint(&existing);
            return Ok((file.relative.clone(), existing, Some(Signature { source: source_hash, output })));
        }

        let optimizer = self
            .optimizer
            .as_ref()
            .ok_or_else(|| TaskError::service(name, "TINYPNG_API_KEY is not set"))?;
        let compressed = optimizer
            .compress(&data)
            .map_err(|e| TaskError::service(name, format!("{}: {}", file.path.display(), e)).with_cause(e))?;

        tracing::info!(
            "'{}': {} {} -> {} bytes",
            name,
            key,
            data.len(),
            compressed.len()
        );
        let output = fingerprint(&compressed);
        Ok((file.relative.clone(), compressed, Some(Signature { source: source_hash, output })))
    }
}

impl Task for OptimizeImagesTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn run(&self, sources: &SourceSet) -> Result<ArtifactSet, TaskError> {
        let previous = self.load_signatures();

        let processed = sources
            .files()
            .par_iter()
            .map(|file| self.process(file, &previous))
            .collect::<Result<Vec<_>, TaskError>>()?;

        let mut artifacts = ArtifactSet::new();
        let mut signatures = Signatures::new();
        for (relative, bytes, signature) in processed {
            if let Some(signature) = signature {
                signatures.insert(relative.to_string_lossy().replace('\\', "/"), signature);
            }
            artifacts.push(relative, bytes);
        }

        let encoded = serde_json::to_vec_pretty(&signatures)
            .map_err(|e| TaskError::new(&self.spec.name, crate::build::TaskErrorKind::Io, e.to_string()))?;
        artifacts.push(self.signatures.clone(), encoded);

        Ok(artifacts)
    }
}
