//! Map lookup and the built-in map.

mod objects;
mod testing_ground;

pub use objects::{MapObject, MapObjectKind};
pub use testing_ground::TestingGround;

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("map \"{0}\" not found")]
    NotFound(String),
    #[error("failed to load map \"{name}\": {reason}")]
    Load { name: String, reason: String },
}

/// Where a client looks for the map a server announces.
pub trait MapProvider {
    fn find_map(&self, name: &str) -> bool;
    fn load_map(&mut self, name: &str) -> Result<(), MapError>;
}

/// Knows only the maps compiled into the binary.
#[derive(Debug, Default)]
pub struct BuiltinMaps {
    loaded: Option<String>,
}

impl BuiltinMaps {
    pub fn loaded(&self) -> Option<&str> {
        self.loaded.as_deref()
    }
}

impl MapProvider for BuiltinMaps {
    fn find_map(&self, name: &str) -> bool {
        name == TestingGround::NAME
    }

    fn load_map(&mut self, name: &str) -> Result<(), MapError> {
        if !self.find_map(name) {
            return Err(MapError::NotFound(name.to_string()));
        }
        self.loaded = Some(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_maps() {
        let mut maps = BuiltinMaps::default();
        assert!(maps.find_map("de_test"));
        assert!(!maps.find_map("de_dust"));
        assert!(matches!(maps.load_map("de_dust"), Err(MapError::NotFound(_))));
        maps.load_map("de_test").unwrap();
        assert_eq!(maps.loaded(), Some("de_test"));
    }
}
