use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Address of a record: a path, optionally qualified by a container.
///
/// The container is handed to the backend unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    path: String,
    container: Option<String>,
}

impl RecordKey {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            container: None,
        }
    }

    pub fn in_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }
}

impl From<&str> for RecordKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for RecordKey {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Some(container) => write!(f, "{container}/{}", self.path),
            None => f.write_str(&self.path),
        }
    }
}

/// Identifies one lease holder.
///
/// Each [`RecordStore`](crate::RecordStore) gets a fresh random id unless one is supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(String);

impl HolderId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HolderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
