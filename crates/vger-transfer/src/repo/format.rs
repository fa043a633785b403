//! Envelope of every stored object except `config`:
//! `[1-byte type tag][crypto engine output]`.
//!
//! The associated data is the tag, a fixed marker and the object's context
//! (its chunk or archive id, or a fixed name), so an object only decrypts
//! under the type and key it was written with.

use vger_crypto::CryptoEngine;
use vger_types::error::{Result, VgerError};

const AAD_MARKER: &[u8] = b"vger:object-context:v1\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    Manifest = 1,
    ArchiveMeta = 2,
    ChunkData = 3,
    ChunkIndex = 4,
    /// Archive metadata in the pre-upgrade layout (naive timestamps,
    /// master/slave hardlinks).
    LegacyArchiveMeta = 5,
}

impl TryFrom<u8> for ObjectType {
    type Error = VgerError;

    fn try_from(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => Self::Manifest,
            2 => Self::ArchiveMeta,
            3 => Self::ChunkData,
            4 => Self::ChunkIndex,
            5 => Self::LegacyArchiveMeta,
            other => return Err(VgerError::UnknownObjectType(other)),
        })
    }
}

fn aad(tag: u8, context: &[u8]) -> Vec<u8> {
    [&[tag][..], AAD_MARKER, context].concat()
}

pub fn pack_object(
    obj_type: ObjectType,
    context: &[u8],
    plaintext: &[u8],
    crypto: &dyn CryptoEngine,
) -> Result<Vec<u8>> {
    let tag = obj_type as u8;
    let body = crypto.encrypt(plaintext, &aad(tag, context))?;
    let mut object = Vec::with_capacity(body.len() + 1);
    object.push(tag);
    object.extend(body);
    Ok(object)
}

/// Decrypt an object of any type; the caller dispatches on the returned tag.
pub fn unpack_object(
    object: &[u8],
    context: &[u8],
    crypto: &dyn CryptoEngine,
) -> Result<(ObjectType, Vec<u8>)> {
    let (&tag, body) = object
        .split_first()
        .ok_or_else(|| VgerError::InvalidFormat("empty object".into()))?;
    let obj_type = ObjectType::try_from(tag)?;
    Ok((obj_type, crypto.decrypt(body, &aad(tag, context))?))
}

pub fn unpack_object_expect(
    object: &[u8],
    expected: ObjectType,
    context: &[u8],
    crypto: &dyn CryptoEngine,
) -> Result<Vec<u8>> {
    match unpack_object(object, context, crypto)? {
        (found, payload) if found == expected => Ok(payload),
        (found, _) => Err(VgerError::InvalidFormat(format!(
            "expected a {expected:?} object, found {found:?}"
        ))),
    }
}
