use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

pub use shared::ipc::ModelState;

use super::{EngineError, SpeechEngine, SpeechModel};

const MAX_FAILURE_MESSAGE_CHARS: usize = 200;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Voice model '{0}' not found in any bundle location")]
    BundleMissing(String),

    #[error("Model files missing at {}", .0.display())]
    FilesMissing(PathBuf),

    #[error("Model folder missing conf/am structure. Contents: {0}")]
    InvalidLayout(String),

    #[error("Model I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ModelError {
    /// Message for [`ModelState::Failed`], capped at 200 characters.
    pub fn failure_message(&self) -> String {
        self.to_string()
            .chars()
            .take(MAX_FAILURE_MESSAGE_CHARS)
            .collect()
    }
}

/// Read-only source of model directories.
pub trait ModelBundle: Send + Sync {
    fn has_asset(&self, name: &str) -> bool;

    /// Copy the whole tree of asset `name` into `target`.
    fn copy_to(&self, name: &str, target: &Path) -> io::Result<()>;
}

/// Looks for a model directory under an ordered list of roots.
pub struct DirectoryBundle {
    roots: Vec<PathBuf>,
}

impl DirectoryBundle {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Configured directory first, then the user data dir, system share and
    /// the working directory.
    pub fn with_default_roots(configured: Option<PathBuf>) -> Self {
        let mut roots: Vec<PathBuf> = configured.into_iter().collect();
        if let Some(data_dir) = dirs::data_dir() {
            roots.push(data_dir.join("repcue").join("bundle"));
        }
        roots.push(PathBuf::from("/usr/share/repcue/models"));
        roots.push(PathBuf::from("./models"));
        Self::new(roots)
    }

    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|root| root.join(name))
            .find(|candidate| !dir_is_missing_or_empty(candidate))
    }
}

impl ModelBundle for DirectoryBundle {
    fn has_asset(&self, name: &str) -> bool {
        self.locate(name).is_some()
    }

    fn copy_to(&self, name: &str, target: &Path) -> io::Result<()> {
        let source = self.locate(name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("asset {} not found", name))
        })?;
        info!("Copying model from {} to {}", source.display(), target.display());
        copy_dir_recursive(&source, target)
    }
}

pub fn copy_dir_recursive(source: &Path, target: &Path) -> io::Result<()> {
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

pub fn dir_is_missing_or_empty(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// The directory must contain at least one of `required` as a subdirectory.
pub fn validate_model_dir(path: &Path, required: &[String]) -> Result<(), ModelError> {
    let mut names: Vec<String> = Vec::new();
    let mut valid = false;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() && required.iter().any(|r| *r == name) {
            valid = true;
        }
        names.push(name);
    }
    if valid {
        return Ok(());
    }
    names.sort();
    let listing = if names.is_empty() {
        "empty".to_string()
    } else {
        names.join(", ")
    };
    Err(ModelError::InvalidLayout(listing))
}

/// Materializes the model from its bundle into a writable directory and
/// hands it to the engine.
pub struct ModelLoader {
    name: String,
    install_dir: PathBuf,
    required_dirs: Vec<String>,
    bundle: Arc<dyn ModelBundle>,
    engine: Arc<dyn SpeechEngine>,
}

impl ModelLoader {
    pub fn new(
        name: impl Into<String>,
        install_dir: PathBuf,
        required_dirs: Vec<String>,
        bundle: Arc<dyn ModelBundle>,
        engine: Arc<dyn SpeechEngine>,
    ) -> Self {
        Self {
            name: name.into(),
            install_dir,
            required_dirs,
            bundle,
            engine,
        }
    }

    pub fn model_dir(&self) -> PathBuf {
        self.install_dir.join(&self.name)
    }

    /// Blocking. Reports every lifecycle state through `report` and returns
    /// the loaded model; the caller maps an error to `Failed`.
    pub fn load<F>(&self, report: F) -> Result<Arc<dyn SpeechModel>, ModelError>
    where
        F: Fn(ModelState),
    {
        report(ModelState::Loading);
        let dir = self.model_dir();

        if dir_is_missing_or_empty(&dir) {
            if !self.bundle.has_asset(&self.name) {
                error!("Voice model {} is not bundled", self.name);
                return Err(ModelError::BundleMissing(self.name.clone()));
            }
            report(ModelState::CopyingAssets);
            self.bundle.copy_to(&self.name, &dir)?;
            report(ModelState::Loading);
        } else {
            debug!("Model already installed at {}", dir.display());
        }

        if dir_is_missing_or_empty(&dir) {
            return Err(ModelError::FilesMissing(dir));
        }
        validate_model_dir(&dir, &self.required_dirs)?;

        info!("Loading speech model from {}", dir.display());
        let model = self.engine.load_model(&dir)?;
        info!("Speech model loaded");
        Ok(model)
    }
}
