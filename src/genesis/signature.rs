//! Signed registry envelopes.
//!
//! Registry descriptors arrive wrapped in an envelope holding the raw body and
//! an Ed25519 signature. [`Envelope::open`] verifies the signature under the
//! kind-specific context, checks that the descriptor was signed by its own key,
//! and only then decodes the body.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};

use super::document::{Entity, Node};
use super::keys::PublicKey;
use crate::error::DocumentError;

pub const REGISTER_ENTITY_CONTEXT: &str = "oasis-core/registry: register entity";
pub const REGISTER_NODE_CONTEXT: &str = "oasis-core/registry: register node";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub public_key: PublicKey,
    /// Base64-encoded 64-byte signature.
    pub signature: String,
}

/// Raw body plus detached signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed {
    /// Base64-encoded JSON body.
    pub untrusted_raw_value: String,
    pub signature: Signature,
}

/// Digest actually covered by the signature.
pub fn signer_message(context: &str, raw: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512_256::new();
    hasher.update(context.as_bytes());
    hasher.update(raw);
    hasher.finalize().to_vec()
}

/// Verify-and-decode over one envelope kind.
pub trait Envelope {
    type Body: DeserializeOwned;

    /// Kind label used in error context.
    const KIND: &'static str;
    /// Signature domain separation context.
    const CONTEXT: &'static str;

    fn signed(&self) -> &Signed;

    /// Key that must have produced the signature for `body`.
    fn expected_signer(body: &Self::Body) -> PublicKey;

    /// Verifies the envelope and decodes its body. `index` is the envelope's
    /// position in the document, used for diagnostics only.
    fn open(&self, index: usize) -> Result<Self::Body, DocumentError> {
        let signed = self.signed();
        let raw = STANDARD
            .decode(&signed.untrusted_raw_value)
            .map_err(|source| DocumentError::Encoding {
                kind: Self::KIND,
                index,
                field: "untrusted_raw_value",
                source,
            })?;
        let signature = STANDARD
            .decode(&signed.signature.signature)
            .map_err(|source| DocumentError::Encoding {
                kind: Self::KIND,
                index,
                field: "signature",
                source,
            })?;
        let signature: [u8; 64] =
            signature
                .as_slice()
                .try_into()
                .map_err(|_| DocumentError::InvalidSignature {
                    kind: Self::KIND,
                    index,
                    len: signature.len(),
                })?;

        let signer = signed.signature.public_key;
        let key = VerifyingKey::from_bytes(signer.as_bytes()).map_err(|_| {
            DocumentError::InvalidPublicKey {
                kind: Self::KIND,
                index,
            }
        })?;
        key.verify(
            &signer_message(Self::CONTEXT, &raw),
            &Ed25519Signature::from_bytes(&signature),
        )
        .map_err(|_| DocumentError::SignatureMismatch {
            kind: Self::KIND,
            index,
            context: Self::CONTEXT,
            signer: signer.to_string(),
        })?;

        let body: Self::Body =
            serde_json::from_slice(&raw).map_err(|source| DocumentError::Body {
                kind: Self::KIND,
                index,
                source,
            })?;
        let expected = Self::expected_signer(&body);
        if expected != signer {
            return Err(DocumentError::SignerMismatch {
                kind: Self::KIND,
                index,
                signer: signer.to_string(),
                expected: expected.to_string(),
            });
        }
        Ok(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignedEntity(pub Signed);

impl Envelope for SignedEntity {
    type Body = Entity;

    const KIND: &'static str = "entity";
    const CONTEXT: &'static str = REGISTER_ENTITY_CONTEXT;

    fn signed(&self) -> &Signed {
        &self.0
    }

    fn expected_signer(body: &Entity) -> PublicKey {
        body.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignedNode(pub Signed);

impl Envelope for SignedNode {
    type Body = Node;

    const KIND: &'static str = "node";
    const CONTEXT: &'static str = REGISTER_NODE_CONTEXT;

    fn signed(&self) -> &Signed {
        &self.0
    }

    fn expected_signer(body: &Node) -> PublicKey {
        body.id
    }
}

/// Opens every envelope in order, stopping at the first failure.
pub fn open_all<E: Envelope>(envelopes: &[E]) -> Result<Vec<E::Body>, DocumentError> {
    envelopes
        .iter()
        .enumerate()
        .map(|(index, envelope)| envelope.open(index))
        .collect()
}
