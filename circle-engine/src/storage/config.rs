//! Storage location.

use std::path::{Path, PathBuf};

use super::error::{Result, StorageError};

/// File name of the encrypted circle database.
pub const DATABASE_FILE_NAME: &str = "circles.db";

/// File name of the MDK group state database, next to the circle database.
pub const MLS_DATABASE_FILE_NAME: &str = "mls.db";

/// Where the encrypted store lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Directory holding the database. Created on open if missing.
    pub data_dir: PathBuf,
    /// Database file name inside `data_dir`.
    pub file_name: String,
}

impl StorageConfig {
    /// Creates a configuration rooted at `data_dir`.
    ///
    /// # Example
    ///
    /// ```
    /// use std::path::PathBuf;
    /// use circle_engine::storage::StorageConfig;
    ///
    /// let config = StorageConfig::new("/path/to/data");
    /// assert_eq!(config.database_path(), PathBuf::from("/path/to/data/circles.db"));
    /// ```
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            file_name: DATABASE_FILE_NAME.to_string(),
        }
    }

    /// Overrides the database file name.
    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Full path of the database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }

    /// Full path of the MDK group state database.
    #[must_use]
    pub fn mls_database_path(&self) -> PathBuf {
        self.data_dir.join(MLS_DATABASE_FILE_NAME)
    }

    /// Creates the data directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub(crate) fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| {
            StorageError::Io(format!(
                "Failed to create data directory {}: {e}",
                self.data_dir.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn storage_config_new() {
        let config = StorageConfig::new("/tmp/test");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.file_name, DATABASE_FILE_NAME);
    }

    #[test]
    fn storage_config_custom_file_name() {
        let config = StorageConfig::new("/tmp/test").with_file_name("other.db");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/test/other.db"));
        assert_eq!(config.mls_database_path(), PathBuf::from("/tmp/test/mls.db"));
    }

    #[test]
    fn ensure_data_dir_creates_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        let config = StorageConfig::new(&nested);

        config.ensure_data_dir().unwrap();
        assert!(nested.is_dir());
        config.ensure_data_dir().unwrap();
    }
}
