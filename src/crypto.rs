//! Cryptographic primitives consumed as pure functions (spec §1: "the
//! cryptographic primitives... consumed as pure functions").
//!
//! The coordinator never implements key management itself; it only needs
//! something that can sign a byte string and something that can verify a
//! signature against a known public key. Both sides of that boundary are
//! expressed here as a small trait plus one concrete ed25519 adapter, the
//! same shape the teacher's `mpc/frost_bridge.rs` wraps `frost-secp256k1`
//! in.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};

use crate::error::{UploadError, UploadResult};

/// Anything that can produce a signature over an arbitrary message with a
/// single local key. Implemented by the renter's local identity when
/// `offline_signing` is false; the offline path never implements this —
/// its signature arrives over the pay-in/escrow rendezvous instead.
pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8]) -> UploadResult<Vec<u8>>;
    fn public_key_hex(&self) -> String;
}

/// A local ed25519 keypair, decoded once at startup from
/// `Identity.PrivateKey`.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Decode a 32-byte seed from a hex string.
    pub fn from_hex_seed(hex_seed: &str) -> UploadResult<Self> {
        let bytes = hex::decode(hex_seed)
            .map_err(|e| UploadError::InvalidPeerKey(format!("identity key: {e}")))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| UploadError::InvalidPeerKey("identity key must be 32 bytes".into()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, message: &[u8]) -> UploadResult<Vec<u8>> {
        let sig: Signature = self.signing_key.sign(message);
        Ok(sig.to_bytes().to_vec())
    }

    fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }
}

/// Decode a hex-encoded ed25519 public key (e.g. a guard auth pubkey, or a
/// peer's extracted pubkey).
pub fn decode_pub_key(hex_key: &str) -> UploadResult<VerifyingKey> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| UploadError::InvalidPeerKey(format!("{hex_key}: {e}")))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| UploadError::InvalidPeerKey(format!("{hex_key}: expected 32 bytes")))?;
    VerifyingKey::from_bytes(&arr)
        .map_err(|e| UploadError::InvalidPeerKey(format!("{hex_key}: {e}")))
}

/// Verify `signature` over `message` against `pub_key_hex`.
pub fn verify(pub_key_hex: &str, message: &[u8], signature: &[u8]) -> UploadResult<bool> {
    let vk = decode_pub_key(pub_key_hex)?;
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| UploadError::InvalidPeerKey("signature must be 64 bytes".into()))?;
    let sig = Signature::from_bytes(&sig_bytes);
    Ok(vk.verify(message, &sig).is_ok())
}
