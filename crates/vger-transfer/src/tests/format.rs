use crate::repo::format::{pack_object, unpack_object, unpack_object_expect, ObjectType};
use vger_crypto::aes_gcm::Aes256GcmEngine;
use vger_crypto::PlaintextEngine;
use vger_types::error::VgerError;

#[test]
fn type_tag_is_first_byte() {
    let engine = PlaintextEngine::new(&[0u8; 32]);
    let packed = pack_object(ObjectType::LegacyArchiveMeta, b"ctx", b"payload", &engine).unwrap();
    assert_eq!(packed[0], ObjectType::LegacyArchiveMeta as u8);
    let (ty, plain) = unpack_object(&packed, b"ctx", &engine).unwrap();
    assert_eq!(ty, ObjectType::LegacyArchiveMeta);
    assert_eq!(plain, b"payload");
}

#[test]
fn encrypted_object_is_bound_to_context() {
    let engine = Aes256GcmEngine::new(&[3u8; 32], &[4u8; 32]);
    let packed = pack_object(ObjectType::ChunkData, b"chunk-a", b"secret", &engine).unwrap();
    assert!(matches!(
        unpack_object(&packed, b"chunk-b", &engine),
        Err(VgerError::DecryptionFailed)
    ));
}

#[test]
fn unexpected_type_is_rejected() {
    let engine = PlaintextEngine::new(&[0u8; 32]);
    let packed = pack_object(ObjectType::Manifest, b"m", b"{}", &engine).unwrap();
    assert!(matches!(
        unpack_object_expect(&packed, ObjectType::ChunkIndex, b"m", &engine),
        Err(VgerError::InvalidFormat(_))
    ));
}

#[test]
fn unknown_tag_and_empty_object() {
    let engine = PlaintextEngine::new(&[0u8; 32]);
    assert!(matches!(
        unpack_object(&[0x7f, 1, 2], b"x", &engine),
        Err(VgerError::UnknownObjectType(0x7f))
    ));
    assert!(matches!(
        unpack_object(&[], b"x", &engine),
        Err(VgerError::InvalidFormat(_))
    ));
}
