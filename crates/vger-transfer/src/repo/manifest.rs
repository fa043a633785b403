use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vger_types::archive_id::ArchiveId;

/// Ordered list of committed archives. Stored encrypted at `manifest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub archives: Vec<ArchiveEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub id: ArchiveId,
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            version: 1,
            timestamp: Utc::now(),
            archives: Vec::new(),
        }
    }

    pub fn find_archive(&self, name: &str) -> Option<&ArchiveEntry> {
        self.archives.iter().find(|a| a.name == name)
    }

    pub fn find_by_id(&self, id: &ArchiveId) -> Option<&ArchiveEntry> {
        self.archives.iter().find(|a| a.id == *id)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}
