//! # Secure Transfer Packages
//!
//! What the buyer actually receives: the asset content encrypted under a
//! one-time key, that key sealed to the buyer's delivery key, an ownership
//! watermark, a snapshot of the original metadata, and the seller's
//! deletion proof, all under the seller's signature.
//!
//! Two signatures are involved:
//!
//! 1. The [`EncryptedPayload`] signature (`relic/encrypted-payload/v1`)
//!    covers asset id, recipient, nonce, SHA-256 of the ciphertext, content
//!    and metadata hashes, watermark tag and issue time, the sealed key and
//!    the sender key. [`SecurePackager::decrypt`] checks it before touching
//!    the ciphertext.
//! 2. The [`SecureTransferPackage`] signature (`relic/transfer-package/v1`)
//!    covers transfer id, asset id, seller, buyer, transfer time, hash of
//!    the original metadata, the payload signature, the deletion proof
//!    hash, and the seller key. `ledger_tx_ref` is filled in after ledger
//!    confirmation and is not covered.
//!
//! The watermark is also the AEAD associated data, so ciphertext cannot be
//! re-labelled for another recipient without failing authentication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::deletion::DeletionProof;
use crate::config::{
    AES_NONCE_LENGTH, DOMAIN_ENCRYPTED_PAYLOAD, DOMAIN_TRANSFER_PACKAGE, KDF_CONTEXT_WATERMARK,
    PACKAGE_FORMAT_VERSION,
};
use crate::crypto::canonical::{canonical_payload, hex_array, hex_bytes};
use crate::crypto::hash::{domain_separated_hash_parts, sha256};
use crate::crypto::keys::{RelicKeypair, RelicPublicKey, RelicSignature};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::sealing::{seal_to, DeliveryKeypair, DeliveryPublicKey, SealedKey};
use crate::error::{RelicError, Result};
use crate::ledger::TxRef;
use crate::storage::assets::AssetMetadata;

// ---------------------------------------------------------------------------
// Watermark
// ---------------------------------------------------------------------------

/// Ownership tag binding a ciphertext to one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub owner_id: String,
    /// BLAKE3 derive-key tag over asset, owner, content hash and issue time.
    pub tag: String,
    pub issued_at: DateTime<Utc>,
}

impl Watermark {
    fn issue(asset_id: &str, owner_id: &str, content_hash: &str) -> Self {
        let issued_at = Utc::now();
        let millis = issued_at.timestamp_millis().to_string();
        let tag = hex::encode(domain_separated_hash_parts(
            KDF_CONTEXT_WATERMARK,
            &[
                asset_id.as_bytes(),
                owner_id.as_bytes(),
                content_hash.as_bytes(),
                millis.as_bytes(),
            ],
        ));
        Self {
            owner_id: owner_id.to_string(),
            tag,
            issued_at,
        }
    }

    /// AEAD associated data.
    fn aad(&self, asset_id: &str) -> Vec<u8> {
        canonical_payload(
            KDF_CONTEXT_WATERMARK,
            &[asset_id.as_bytes(), self.owner_id.as_bytes(), self.tag.as_bytes()],
        )
    }
}

// ---------------------------------------------------------------------------
// EncryptedPayload
// ---------------------------------------------------------------------------

/// Encrypted content addressed to one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub asset_id: String,
    pub recipient_id: String,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex_array")]
    pub nonce: [u8; AES_NONCE_LENGTH],
    /// SHA-256 (hex) of the plaintext.
    pub content_hash: String,
    /// SHA-256 (hex) of the original metadata's canonical JSON.
    pub metadata_hash: String,
    pub watermark: Watermark,
    pub sealed_key: SealedKey,
    pub sender_public_key: RelicPublicKey,
    pub signature: RelicSignature,
}

impl EncryptedPayload {
    /// The exact bytes covered by `signature`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let ciphertext_hash = sha256(&self.ciphertext);
        let issued_at = self.watermark.issued_at.timestamp_millis().to_string();
        canonical_payload(
            DOMAIN_ENCRYPTED_PAYLOAD,
            &[
                self.asset_id.as_bytes(),
                self.recipient_id.as_bytes(),
                &self.nonce,
                &ciphertext_hash,
                self.content_hash.as_bytes(),
                self.metadata_hash.as_bytes(),
                self.watermark.tag.as_bytes(),
                issued_at.as_bytes(),
                self.sealed_key.ephemeral_public.as_bytes(),
                self.sealed_key.wrapped.as_slice(),
                self.sender_public_key.as_bytes(),
            ],
        )
    }

    pub fn verify_signature(&self) -> bool {
        self.sender_public_key
            .verify(&self.signing_payload(), &self.signature)
    }
}

// ---------------------------------------------------------------------------
// SecureTransferPackage
// ---------------------------------------------------------------------------

/// Who, what and when of a transfer, delivered with the package.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub transfer_id: String,
    /// Metadata as it was before the transfer started (no pending marker).
    pub original_metadata: AssetMetadata,
    pub seller_id: String,
    pub buyer_id: String,
    pub transferred_at: DateTime<Utc>,
    /// Set once the ledger confirms. Not covered by the package signature.
    pub ledger_tx_ref: Option<TxRef>,
}

/// The signed bundle handed to a buyer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureTransferPackage {
    pub version: u16,
    pub asset_id: String,
    pub encrypted_content: EncryptedPayload,
    pub transfer_metadata: TransferMetadata,
    pub deletion_proof: DeletionProof,
    pub seller_public_key: RelicPublicKey,
    pub package_signature: RelicSignature,
}

impl SecureTransferPackage {
    /// The exact bytes covered by `package_signature`.
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        let meta = &self.transfer_metadata;
        let transferred_at = meta.transferred_at.timestamp_millis().to_string();
        let metadata_hash = meta.original_metadata.hash()?;
        let proof_hash = self.deletion_proof.proof_hash();
        Ok(canonical_payload(
            DOMAIN_TRANSFER_PACKAGE,
            &[
                meta.transfer_id.as_bytes(),
                self.asset_id.as_bytes(),
                meta.seller_id.as_bytes(),
                meta.buyer_id.as_bytes(),
                transferred_at.as_bytes(),
                metadata_hash.as_bytes(),
                self.encrypted_content.signature.as_bytes(),
                proof_hash.as_bytes(),
                self.seller_public_key.as_bytes(),
            ],
        ))
    }

    /// Check every signature and cross-reference in the package.
    ///
    /// With `expected_seller`, also require that the package was signed by
    /// that key. Does not decrypt anything.
    pub fn verify(&self, expected_seller: Option<&RelicPublicKey>) -> Result<()> {
        if self.version != PACKAGE_FORMAT_VERSION {
            return Err(RelicError::Verification(format!(
                "unsupported package version {}",
                self.version
            )));
        }
        if let Some(expected) = expected_seller {
            if &self.seller_public_key != expected {
                return Err(RelicError::Verification(
                    "package signed by an unexpected key".into(),
                ));
            }
        }
        if !self
            .seller_public_key
            .verify(&self.signing_payload()?, &self.package_signature)
        {
            return Err(RelicError::Verification("package signature invalid".into()));
        }
        if self.encrypted_content.sender_public_key != self.seller_public_key
            || !self.encrypted_content.verify_signature()
        {
            return Err(RelicError::Verification("payload signature invalid".into()));
        }
        if !self.deletion_proof.verify_signed_by(&self.seller_public_key) {
            return Err(RelicError::Verification(
                "deletion proof not signed by seller".into(),
            ));
        }

        let payload = &self.encrypted_content;
        let meta = &self.transfer_metadata;
        if payload.asset_id != self.asset_id
            || self.deletion_proof.asset_id != self.asset_id
            || meta.original_metadata.asset_id != self.asset_id
        {
            return Err(RelicError::Verification("package asset ids disagree".into()));
        }
        if payload.recipient_id != meta.buyer_id {
            return Err(RelicError::Verification(
                "payload is not addressed to the buyer".into(),
            ));
        }

        let metadata_hash = meta.original_metadata.hash()?;
        if payload.metadata_hash != metadata_hash {
            return Err(RelicError::Integrity {
                subject: "package metadata".into(),
                expected: payload.metadata_hash.clone(),
                actual: metadata_hash,
            });
        }
        if self.deletion_proof.content_hash != payload.content_hash {
            return Err(RelicError::Integrity {
                subject: "deletion proof content hash".into(),
                expected: payload.content_hash.clone(),
                actual: self.deletion_proof.content_hash.clone(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SecurePackager
// ---------------------------------------------------------------------------

/// Encrypts, watermarks, and signs asset content for one recipient.
pub struct SecurePackager {
    crypto: Arc<dyn CryptoProvider>,
}

impl SecurePackager {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { crypto }
    }

    /// Encrypt `content` for `recipient_id` under a fresh key sealed to
    /// `recipient_key`, and sign the result with `sender`.
    pub fn encrypt(
        &self,
        content: &[u8],
        metadata: &AssetMetadata,
        recipient_id: &str,
        recipient_key: &DeliveryPublicKey,
        sender: &RelicKeypair,
    ) -> Result<EncryptedPayload> {
        let asset_id = metadata.asset_id.as_str();
        let content_hash = self.crypto.hash(content);
        let metadata_hash = self.crypto.hash(&metadata.canonical_bytes()?);
        let watermark = Watermark::issue(asset_id, recipient_id, &content_hash);

        let key = self.crypto.generate_key();
        let (nonce, ciphertext) =
            self.crypto
                .aead_encrypt(content, &key, &watermark.aad(asset_id))?;
        let sealed_key = seal_to(recipient_key, &key)
            .map_err(|e| RelicError::Crypto(e.to_string()))?;

        let mut payload = EncryptedPayload {
            asset_id: asset_id.to_string(),
            recipient_id: recipient_id.to_string(),
            ciphertext,
            nonce,
            content_hash,
            metadata_hash,
            watermark,
            sealed_key,
            sender_public_key: sender.public_key(),
            signature: RelicSignature::from_bytes([0u8; 64]),
        };
        payload.signature = self.crypto.sign(&payload.signing_payload(), sender);

        tracing::debug!(
            asset_id = %asset_id,
            recipient = %recipient_id,
            bytes = content.len(),
            "content encrypted for recipient"
        );
        Ok(payload)
    }

    /// Recover plaintext. The signature is checked against
    /// `expected_sender` before anything is decrypted; every failure is a
    /// `Verification` error and yields no plaintext.
    pub fn decrypt(
        &self,
        payload: &EncryptedPayload,
        recipient: &DeliveryKeypair,
        expected_sender: &RelicPublicKey,
    ) -> Result<Vec<u8>> {
        if &payload.sender_public_key != expected_sender {
            return Err(RelicError::Verification(
                "payload sender does not match expected key".into(),
            ));
        }
        if !self.crypto.verify(
            &payload.signing_payload(),
            &payload.signature,
            &payload.sender_public_key,
        ) {
            return Err(RelicError::Verification("payload signature invalid".into()));
        }

        let key = recipient.unseal(&payload.sealed_key)?;
        let plaintext = self.crypto.aead_decrypt(
            &payload.ciphertext,
            &key,
            &payload.nonce,
            &payload.watermark.aad(&payload.asset_id),
        )?;

        let actual = self.crypto.hash(&plaintext);
        if actual != payload.content_hash {
            return Err(RelicError::Integrity {
                subject: "decrypted content".into(),
                expected: payload.content_hash.clone(),
                actual,
            });
        }
        Ok(plaintext)
    }

    /// Assemble and sign the outer package.
    pub fn assemble(
        &self,
        transfer_metadata: TransferMetadata,
        encrypted_content: EncryptedPayload,
        deletion_proof: DeletionProof,
        seller: &RelicKeypair,
    ) -> Result<SecureTransferPackage> {
        let mut package = SecureTransferPackage {
            version: PACKAGE_FORMAT_VERSION,
            asset_id: encrypted_content.asset_id.clone(),
            encrypted_content,
            transfer_metadata,
            deletion_proof,
            seller_public_key: seller.public_key(),
            package_signature: RelicSignature::from_bytes([0u8; 64]),
        };
        package.package_signature = self.crypto.sign(&package.signing_payload()?, seller);
        Ok(package)
    }

    /// Verify a delivered package and decrypt its content.
    ///
    /// Returns the plaintext and the original metadata snapshot.
    pub fn open_package(
        &self,
        package: &SecureTransferPackage,
        recipient: &DeliveryKeypair,
        expected_seller: &RelicPublicKey,
    ) -> Result<(Vec<u8>, AssetMetadata)> {
        package.verify(Some(expected_seller))?;
        let content = self.decrypt(&package.encrypted_content, recipient, expected_seller)?;
        Ok((content, package.transfer_metadata.original_metadata.clone()))
    }
}
