use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vger_types::chunk_id::ChunkId;
use vger_types::error::{Result, VgerError};
use vger_types::hardlink_id::HardlinkId;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Fifo,
    CharDevice,
    BlockDevice,
    Socket,
}

impl FileType {
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(Self::Regular),
            S_IFDIR => Some(Self::Directory),
            S_IFLNK => Some(Self::Symlink),
            S_IFIFO => Some(Self::Fifo),
            S_IFCHR => Some(Self::CharDevice),
            S_IFBLK => Some(Self::BlockDevice),
            S_IFSOCK => Some(Self::Socket),
            _ => None,
        }
    }

    /// `ls -l` style type character.
    pub fn type_char(self) -> char {
        match self {
            Self::Regular => '-',
            Self::Directory => 'd',
            Self::Symlink => 'l',
            Self::Fifo => 'p',
            Self::CharDevice => 'c',
            Self::BlockDevice => 'b',
            Self::Socket => 's',
        }
    }
}

/// Reference to a chunk of file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub id: ChunkId,
    /// Plaintext size of the chunk.
    pub size: u32,
}

/// One archived filesystem entry in the current format.
///
/// Optional attributes are either present with a value or absent from the
/// serialized record altogether; a key never carries a null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub path: String,
    pub mode: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub mtime: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctime: Option<DateTime<Utc>>,
    /// Regular files only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<ChunkRef>>,
    /// Sum of chunk sizes; present whenever `chunks` is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Hardlink group members only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hlid: Option<HardlinkId>,
    /// Symlink target. Never used for hardlinks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xattrs: Option<BTreeMap<String, Vec<u8>>>,
    /// Absent means "not recorded", which is not the same as 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bsdflags: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rdev: Option<u64>,
}

impl Item {
    pub fn new(path: impl Into<String>, mode: u32, mtime: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            mode,
            uid: None,
            gid: None,
            user: None,
            group: None,
            mtime,
            atime: None,
            ctime: None,
            chunks: None,
            size: None,
            hlid: None,
            source: None,
            xattrs: None,
            bsdflags: None,
            rdev: None,
        }
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }

    pub fn is_regular(&self) -> bool {
        self.file_type() == Some(FileType::Regular)
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == Some(FileType::Symlink)
    }

    /// Set `chunks` together with the matching precomputed `size`.
    pub fn set_chunks(&mut self, chunks: Vec<ChunkRef>) {
        self.size = Some(chunks_size(&chunks));
        self.chunks = Some(chunks);
    }

    /// Owner name for display: the recorded name, else the numeric id.
    pub fn display_user(&self) -> String {
        display_name(self.user.as_deref(), self.uid)
    }

    pub fn display_group(&self) -> String {
        display_name(self.group.as_deref(), self.gid)
    }

    /// Check the structural rules of the current format.
    pub fn validate(&self) -> Result<()> {
        let Some(file_type) = self.file_type() else {
            return Err(VgerError::UnsupportedItem {
                path: self.path.clone(),
                reason: format!("unknown file type in mode {:o}", self.mode),
            });
        };
        let broken = |reason: String| {
            Err(VgerError::UnsupportedItem {
                path: self.path.clone(),
                reason,
            })
        };
        if let Some(chunks) = &self.chunks {
            if file_type != FileType::Regular {
                return broken("chunks on a non-regular file".into());
            }
            let expected = chunks_size(chunks);
            if self.size != Some(expected) {
                return broken(format!(
                    "size {:?} does not match chunk total {expected}",
                    self.size
                ));
            }
        }
        if self.source.is_some() && file_type != FileType::Symlink {
            return broken("source set on a non-symlink".into());
        }
        if file_type == FileType::Symlink && self.source.is_none() {
            return broken("symlink without target".into());
        }
        Ok(())
    }
}

pub fn chunks_size(chunks: &[ChunkRef]) -> u64 {
    chunks.iter().map(|c| c.size as u64).sum()
}

fn display_name(name: Option<&str>, id: Option<u32>) -> String {
    match (name, id) {
        (Some(name), _) => name.to_string(),
        (None, Some(id)) => id.to_string(),
        (None, None) => String::new(),
    }
}
