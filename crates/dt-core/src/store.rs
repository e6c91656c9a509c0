//! Artifact persistence.
//!
//! Tensors and models are addressed by structured keys; the file layout is
//! derived from the key:
//!
//! ```text
//! <root>/tensors/<layer>.json
//! <root>/models/<layer>/R<rank>/model.json
//! <root>/models/<layer>/R<rank>/runs/run<k>.json
//! <root>/models/<layer>/R<rank>/stability.json
//! ```
//!
//! Every file is a JSON envelope carrying the schema version, the artifact
//! kind and a write timestamp around the payload. Writes go to a temporary
//! file that is renamed into place, so a failed write leaves any previous
//! artifact intact.

use chrono::{DateTime, Utc};
use dt_common::schema::is_compatible;
use dt_common::{LayerName, ModelKey, SCHEMA_VERSION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::cp::CpFit;
use crate::logging::event_names;
use crate::stability::StabilityReport;
use crate::tensor::DeviceTensor;

/// Environment override for the store root.
pub const ENV_DATA_DIR: &str = "DT_DATA_DIR";

const TENSORS_DIR: &str = "tensors";
const MODELS_DIR: &str = "models";
const RUNS_DIR: &str = "runs";
const MODEL_FILE: &str = "model.json";
const STABILITY_FILE: &str = "stability.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to resolve a data dir (pass --store or set DT_DATA_DIR)")]
    DataDirUnavailable,

    #[error("artifact not found: {key}")]
    NotFound { key: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse JSON at {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} holds a {actual} artifact, expected {expected}", path.display())]
    WrongKind {
        path: PathBuf,
        expected: &'static str,
        actual: String,
    },

    #[error("{} has schema {actual}, expected {expected}", path.display())]
    Incompatible {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

impl From<StoreError> for dt_common::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key } => dt_common::Error::ArtifactNotFound { key },
            StoreError::Incompatible {
                expected, actual, ..
            } => dt_common::Error::IncompatibleSchema { expected, actual },
            StoreError::Json { .. } | StoreError::WrongKind { .. } => {
                dt_common::Error::ArtifactCorrupted(err.to_string())
            }
            StoreError::Io { path, source } => dt_common::Error::Io(std::io::Error::new(
                source.kind(),
                format!("{}: {}", path.display(), source),
            )),
            StoreError::DataDirUnavailable => dt_common::Error::Config(err.to_string()),
        }
    }
}

/// Kind tag written into every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Tensor,
    Model,
    Stability,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Tensor => "tensor",
            ArtifactKind::Model => "model",
            ArtifactKind::Stability => "stability",
        }
    }
}

/// On-disk wrapper around a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub schema_version: String,
    pub kind: ArtifactKind,
    pub written_at: DateTime<Utc>,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(kind: ArtifactKind, payload: T) -> Self {
        Envelope {
            schema_version: SCHEMA_VERSION.to_string(),
            kind,
            written_at: Utc::now(),
            payload,
        }
    }
}

/// A fitted model together with the key it was stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub key: ModelKey,
    pub fit: CpFit,
}

/// Structured-key persistence for tensors, models and stability reports.
pub trait ArtifactStore {
    fn save_tensor(&self, layer: &LayerName, tensor: &DeviceTensor) -> Result<(), StoreError>;
    fn load_tensor(&self, layer: &LayerName) -> Result<DeviceTensor, StoreError>;

    fn save_model(&self, key: &ModelKey, fit: &CpFit) -> Result<(), StoreError>;
    fn load_model(&self, key: &ModelKey) -> Result<ModelArtifact, StoreError>;

    /// Run indices stored for (layer, rank), ascending.
    fn list_runs(&self, layer: &LayerName, rank: usize) -> Result<Vec<u32>, StoreError>;

    /// Delete every stored run model for (layer, rank); returns the count.
    fn clear_runs(&self, layer: &LayerName, rank: usize) -> Result<usize, StoreError>;

    fn save_stability(
        &self,
        layer: &LayerName,
        rank: usize,
        report: &StabilityReport,
    ) -> Result<(), StoreError>;
    fn load_stability(&self, layer: &LayerName, rank: usize)
        -> Result<StabilityReport, StoreError>;
}

/// Filesystem-backed store rooted at one directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStore { root: root.into() }
    }

    /// Root from `--store`, then `DT_DATA_DIR`, then the XDG data dir.
    pub fn resolve(cli_root: Option<&Path>) -> Result<Self, StoreError> {
        if let Some(root) = cli_root {
            return Ok(FsStore::new(root));
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            if !dir.is_empty() {
                return Ok(FsStore::new(dir));
            }
        }
        dt_config::resolve::xdg_data_dir()
            .map(FsStore::new)
            .ok_or(StoreError::DataDirUnavailable)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tensor_path(&self, layer: &LayerName) -> PathBuf {
        self.root
            .join(TENSORS_DIR)
            .join(format!("{}.json", layer.as_str()))
    }

    fn rank_dir(&self, layer: &LayerName, rank: usize) -> PathBuf {
        self.root
            .join(MODELS_DIR)
            .join(layer.as_str())
            .join(format!("R{rank}"))
    }

    pub fn model_path(&self, key: &ModelKey) -> PathBuf {
        let dir = self.rank_dir(&key.layer, key.rank);
        match key.run {
            Some(run) => dir.join(RUNS_DIR).join(format!("run{run}.json")),
            None => dir.join(MODEL_FILE),
        }
    }

    pub fn stability_path(&self, layer: &LayerName, rank: usize) -> PathBuf {
        self.rank_dir(layer, rank).join(STABILITY_FILE)
    }
}

impl ArtifactStore for FsStore {
    fn save_tensor(&self, layer: &LayerName, tensor: &DeviceTensor) -> Result<(), StoreError> {
        write_envelope(&self.tensor_path(layer), ArtifactKind::Tensor, tensor)
    }

    fn load_tensor(&self, layer: &LayerName) -> Result<DeviceTensor, StoreError> {
        read_envelope(&self.tensor_path(layer), ArtifactKind::Tensor, || {
            format!("tensor {layer}")
        })
    }

    fn save_model(&self, key: &ModelKey, fit: &CpFit) -> Result<(), StoreError> {
        let artifact = ModelArtifact {
            key: key.clone(),
            fit: fit.clone(),
        };
        write_envelope(&self.model_path(key), ArtifactKind::Model, &artifact)
    }

    fn load_model(&self, key: &ModelKey) -> Result<ModelArtifact, StoreError> {
        let path = self.model_path(key);
        let artifact: ModelArtifact =
            read_envelope(&path, ArtifactKind::Model, || format!("model {key}"))?;
        if let Err(message) = artifact.fit.model.check_consistent() {
            return Err(StoreError::Json {
                source: serde::de::Error::custom(message),
                path,
            });
        }
        Ok(artifact)
    }

    fn list_runs(&self, layer: &LayerName, rank: usize) -> Result<Vec<u32>, StoreError> {
        let dir = self.rank_dir(layer, rank).join(RUNS_DIR);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io { path: dir, source: e }),
        };
        let mut runs: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                name.to_str()?
                    .strip_prefix("run")?
                    .strip_suffix(".json")?
                    .parse()
                    .ok()
            })
            .collect();
        runs.sort_unstable();
        Ok(runs)
    }

    fn clear_runs(&self, layer: &LayerName, rank: usize) -> Result<usize, StoreError> {
        let runs = self.list_runs(layer, rank)?;
        let mut removed = 0;
        for run in runs {
            let path = self.model_path(&ModelKey::run(layer.clone(), rank, run));
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io { path, source: e }),
            }
        }
        if removed > 0 {
            debug!(
                target: event_names::STORE_WRITTEN,
                layer = layer.as_str(),
                rank = rank as u64,
                removed = removed as u64,
                "previous run models removed"
            );
        }
        Ok(removed)
    }

    fn save_stability(
        &self,
        layer: &LayerName,
        rank: usize,
        report: &StabilityReport,
    ) -> Result<(), StoreError> {
        write_envelope(
            &self.stability_path(layer, rank),
            ArtifactKind::Stability,
            report,
        )
    }

    fn load_stability(
        &self,
        layer: &LayerName,
        rank: usize,
    ) -> Result<StabilityReport, StoreError> {
        read_envelope(
            &self.stability_path(layer, rank),
            ArtifactKind::Stability,
            || format!("stability report {layer}/R{rank}"),
        )
    }
}

fn write_envelope<T: Serialize>(
    path: &Path,
    kind: ArtifactKind,
    payload: &T,
) -> Result<(), StoreError> {
    write_json_atomic(path, &Envelope::new(kind, payload))?;
    debug!(
        target: event_names::STORE_WRITTEN,
        kind = kind.as_str(),
        path = %path.display(),
        "artifact written"
    );
    Ok(())
}

fn read_envelope<T: DeserializeOwned>(
    path: &Path,
    kind: ArtifactKind,
    describe: impl FnOnce() -> String,
) -> Result<T, StoreError> {
    let content = match std::fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound { key: describe() })
        }
        Err(e) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    // Check the header before committing to the payload type so a version
    // or kind mismatch is reported as such rather than as a parse error.
    #[derive(Deserialize)]
    struct Header {
        schema_version: String,
        kind: serde_json::Value,
    }
    let header: Header = serde_json::from_slice(&content).map_err(|e| StoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    if !is_compatible(&header.schema_version) {
        return Err(StoreError::Incompatible {
            path: path.to_path_buf(),
            expected: SCHEMA_VERSION.to_string(),
            actual: header.schema_version,
        });
    }
    if header.kind.as_str() != Some(kind.as_str()) {
        return Err(StoreError::WrongKind {
            path: path.to_path_buf(),
            expected: kind.as_str(),
            actual: header.kind.to_string(),
        });
    }

    let envelope: Envelope<T> = serde_json::from_slice(&content).map_err(|e| StoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(envelope.payload)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let content = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("artifact.json");
    let tmp_path = path.with_file_name(format!("{}.tmp.{}", file_name, std::process::id()));
    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp_path).map_err(|e| StoreError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        file.write_all(&content).map_err(|e| StoreError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        file.sync_all().map_err(|e| StoreError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
    }
    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}
