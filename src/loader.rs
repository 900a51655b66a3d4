//! Module loader: maps dotted import names onto `.cr` files in the
//! search path.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MODULE_EXTENSION: &str = "cr";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("Unknown module {0}")]
    NotFound(String),
    #[error("Cannot read module {}: {message}", path.display())]
    Io { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ModuleLoader {
    search_path: Vec<PathBuf>,
}

impl ModuleLoader {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        ModuleLoader { search_path }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Candidate files for `module`, one per search directory, in order.
    pub fn candidates(&self, module: &str) -> Vec<PathBuf> {
        let segments: Vec<&str> = module.split('.').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Vec::new();
        }
        self.search_path
            .iter()
            .map(|dir| {
                let mut path: PathBuf = segments.iter().fold(dir.clone(), |acc, s| acc.join(s));
                path.set_extension(MODULE_EXTENSION);
                path
            })
            .collect()
    }

    /// The first candidate that exists.
    pub fn resolve(&self, module: &str) -> Result<PathBuf, LoadError> {
        self.candidates(module)
            .into_iter()
            .find(|path| path.is_file())
            .ok_or_else(|| LoadError::NotFound(module.to_string()))
    }

    pub fn read(&self, path: &Path) -> Result<String, LoadError> {
        fs::read_to_string(path).map_err(|err| LoadError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Resolves and reads `module`, returning its path and source text.
    pub fn load(&self, module: &str) -> Result<(PathBuf, String), LoadError> {
        let path = self.resolve(module)?;
        tracing::debug!(module, path = %path.display(), "loading module");
        let source = self.read(&path)?;
        Ok((path, source))
    }
}
