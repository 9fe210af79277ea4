use std::fs;
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};

use crate::*;

/// Raw weights for one model, as read from disk.
///
/// This is what an inference runtime would be initialized from; it is also enough on its own to warm the page cache
/// and prove that every model in a catalog is actually present.
#[derive(Debug)]
pub struct ModelWeights {
    pub name: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// A [SessionFactory] which loads `<name>.<extension>` files from a given root directory.
///
/// Names are run through [relative_path] before touching the filesystem, so that a name like `../secret` can't escape
/// the root directory.  Catalog checks should make that impossible anyway; this is primarily a measure to detect bugs.
#[derive(Debug)]
pub struct FilesystemSessionFactory {
    root_path: PathBuf,
    extension: String,
}

fn conv_path(path: impl AsRef<Path>) -> Result<relative_path::RelativePathBuf> {
    relative_path::RelativePathBuf::from_path(path)
        .map_err(|_| Error::new(ErrorKind::Other, "Invalid model path"))
}

impl FilesystemSessionFactory {
    /// Weights are expected as `<root>/<name>.onnx`.
    pub fn new(root_path: &Path) -> FilesystemSessionFactory {
        FilesystemSessionFactory::with_extension(root_path, "onnx")
    }

    pub fn with_extension(root_path: &Path, extension: &str) -> FilesystemSessionFactory {
        FilesystemSessionFactory {
            root_path: root_path.to_path_buf(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Where the weights for a model live, refusing anything outside the root.
    pub fn weights_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "Empty model name"));
        }
        let file_name = format!("{}.{}", name, self.extension);
        // Go via `RelativePathBuf` to normalize `..` segments before checking the prefix.
        let absolute = conv_path(&file_name)?.to_logical_path(&self.root_path);
        if !absolute.starts_with(&self.root_path) {
            return Err(Error::new(
                ErrorKind::Other,
                "model path is outside the models directory",
            ));
        }
        Ok(absolute)
    }
}

impl SessionFactory for FilesystemSessionFactory {
    type Handle = ModelWeights;
    type Error = Error;

    fn create(&self, name: &str) -> Result<ModelWeights> {
        let path = self.weights_path(name)?;
        let bytes = fs::read(&path).map_err(|e| {
            Error::new(
                e.kind(),
                format!(
                    "cannot read weights for '{}' at {}: {}",
                    name,
                    path.display(),
                    e
                ),
            )
        })?;
        Ok(ModelWeights {
            name: name.to_string(),
            path,
            bytes,
        })
    }
}
