use std::fs;
use std::path::{Component, Path, PathBuf};

use chroma::{MapError, MapProvider, TestingGround};

/// Maps found under a directory on disk. A map named `foo` is either the
/// directory `<root>/foo` or a file `<root>/foo.<ext>`. The built-in testing
/// ground is always available.
#[derive(Debug)]
pub struct MapDirectory {
    root: PathBuf,
    loaded: Option<String>,
}

impl MapDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            loaded: None,
        }
    }

    pub fn loaded(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        // names come from the server and must stay inside the root
        let mut parts = Path::new(name).components();
        if !matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None)) {
            return None;
        }

        let dir = self.root.join(name);
        if dir.is_dir() {
            return Some(dir);
        }

        fs::read_dir(&self.root)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|path| path.is_file() && path.file_stem().is_some_and(|stem| stem == name))
    }
}

impl MapProvider for MapDirectory {
    fn find_map(&self, name: &str) -> bool {
        name == TestingGround::NAME || self.locate(name).is_some()
    }

    fn load_map(&mut self, name: &str) -> Result<(), MapError> {
        if name != TestingGround::NAME {
            let path = self
                .locate(name)
                .ok_or_else(|| MapError::NotFound(name.to_string()))?;
            fs::metadata(&path).map_err(|e| MapError::Load {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            log::debug!("Map \"{}\" found at {}", name, path.display());
        }

        log::info!("Loaded map \"{}\"", name);
        self.loaded = Some(name.to_string());
        Ok(())
    }
}
