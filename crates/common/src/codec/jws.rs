use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CodecError;
use crate::crypto::Signature;
use crate::identity::{Did, Identity};

pub const JWS_ALG: &str = "EdDSA";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwsHeader {
    pub alg: String,
    /// Signer; the verifying key is recovered from the identifier itself
    pub kid: Did,
}

/// A payload signed by one identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jws {
    pub protected: JwsHeader,
    pub payload: Value,
    /// Hex encoded Ed25519 signature
    pub signature: String,
}

/// Bytes covered by the signature: canonical JSON of `[protected, payload]`
fn signing_input(protected: &JwsHeader, payload: &Value) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(&(protected, payload))?)
}

impl Jws {
    pub fn sign(signer: &Identity, payload: Value) -> Result<Self, CodecError> {
        let protected = JwsHeader {
            alg: JWS_ALG.to_string(),
            kid: signer.did(),
        };
        let signature = signer.sign(&signing_input(&protected, &payload)?);
        Ok(Self {
            protected,
            payload,
            signature: hex::encode(signature.to_bytes()),
        })
    }

    /// Check the signature against the `kid` and hand back the payload
    pub fn verify(&self) -> Result<&Value, CodecError> {
        if self.protected.alg != JWS_ALG {
            return Err(CodecError::InvalidSignature);
        }
        let bytes = hex::decode(&self.signature).map_err(|_| CodecError::InvalidSignature)?;
        let signature =
            Signature::from_slice(&bytes).map_err(|_| CodecError::InvalidSignature)?;
        self.protected
            .kid
            .public_key()
            .verify(&signing_input(&self.protected, &self.payload)?, &signature)
            .map_err(|_| CodecError::InvalidSignature)?;
        Ok(&self.payload)
    }

    pub fn signer(&self) -> Did {
        self.protected.kid
    }
}
