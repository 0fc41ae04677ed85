// src/visitor.rs
// Durable anonymous visitor identity

use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, WidgetError};

/// `get-or-create a durable opaque visitor identifier`
pub trait VisitorStore {
    fn get_or_create_visitor_id(&self) -> Result<String>;
}

/// Stores the visitor id as a single line in a file
#[derive(Debug, Clone)]
pub struct FileVisitorStore {
    path: PathBuf,
}

impl FileVisitorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// ~/.rag-chat/visitor-id
    pub fn default_location() -> Self {
        Self::new(crate::config::config_dir().join("visitor-id"))
    }

    fn io_error(&self, source: std::io::Error) -> WidgetError {
        WidgetError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl VisitorStore for FileVisitorStore {
    fn get_or_create_visitor_id(&self) -> Result<String> {
        if self.path.exists() {
            let stored = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
            let stored = stored.trim();
            if !stored.is_empty() {
                debug!("Loaded visitor id from {}", self.path.display());
                return Ok(stored.to_string());
            }
        }

        let visitor_id = Uuid::new_v4().to_string();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        std::fs::write(&self.path, &visitor_id).map_err(|e| self.io_error(e))?;
        info!("Created visitor id at {}", self.path.display());
        Ok(visitor_id)
    }
}
