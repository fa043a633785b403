use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 256-bit identity shared by every member of one hardlink group.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardlinkId(pub [u8; 32]);

impl HardlinkId {
    /// Derive the id from the path of the group's first-archived member.
    /// Every member of the group resolves to that same path, so the result is
    /// stable across members and across repeated transfers.
    pub fn from_path(path: &str) -> Self {
        let mut hasher = Blake2bVar::new(32).expect("32 is a valid BLAKE2b output size");
        hasher.update(path.as_bytes());
        let mut out = [0u8; 32];
        hasher
            .finalize_variable(&mut out)
            .expect("output buffer matches requested size");
        HardlinkId(out)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for HardlinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardlinkId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for HardlinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
