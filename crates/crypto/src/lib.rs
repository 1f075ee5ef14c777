//! Field-payload encryption for crypto shredding.
//!
//! Payloads are sealed with an AEAD under a data key that belongs to exactly
//! one subject. In direct mode the data key is the subject's stored key; in
//! envelope mode every payload gets a fresh data key, wrapped by the
//! subject's key-encryption key (local [`KeyStore`](shredder_keystore::KeyStore)
//! or a remote transit engine). Deleting the subject's key makes all of its
//! payloads unrecoverable.
//!
//! [`CryptoShredder`] assembles the pieces from a
//! [`ShredderConfig`](shredder_config::ShredderConfig).

pub mod aes256gcm;
pub mod encryptor;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod kek;
pub mod key_wrap;
pub mod materials;
pub mod shredder;
pub mod traits;
pub mod transit;
pub mod xchacha20;

pub use {
    encryptor::{Decryptor, Encryptor, EnvelopeDecryptor, EnvelopeEncryptor},
    engine::{CipherEngine, DataKey, DecryptTransform, EncryptTransform},
    envelope::{EncryptedEnvelope, EnvelopeMetadata, FieldTag},
    error::{CryptoError, Result},
    kek::{KeyEncryptionService, LocalKeyEncryptionService},
    materials::{
        DecryptingMaterialsProvider, DecryptionMaterials, DirectMaterialsProvider,
        EncryptingMaterialsProvider, EncryptionMaterials, EnvelopeMaterialsProvider, KeyAddress,
        MaterialsProvider, encryption_context,
    },
    shredder::{CryptoShredder, ShredderBuilder},
    traits::{AeadFailure, Cipher, Sealed},
    transit::TransitKeyEncryptionService,
};
