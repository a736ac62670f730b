use serde::{Deserialize, Serialize};

use super::CodecError;
use crate::crypto::{Secret, SecretShare};
use crate::identity::{Did, Identity};

/// Key management: ephemeral ECDH per recipient, AES-KW wrapped content key
pub const JWE_ALG: &str = "ECDH-ES+A256KW";
/// Content encryption: ChaCha20-Poly1305
pub const JWE_ENC: &str = "C20P";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JweHeader {
    pub alg: String,
    pub enc: String,
    /// Tag of the envelope inside the ciphertext
    pub cty: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JweRecipient {
    pub kid: Did,
    pub encrypted_key: SecretShare,
}

/// A payload encrypted to a fixed set of identities
///
/// The content key is wrapped once per recipient. The protected header and
/// the recipient list are authenticated as associated data, so recipients
/// cannot be swapped out after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwe {
    pub protected: JweHeader,
    pub recipients: Vec<JweRecipient>,
    /// Hex encoded `nonce || ciphertext || tag`
    pub ciphertext: String,
}

fn associated_data(
    protected: &JweHeader,
    recipients: &[JweRecipient],
) -> Result<Vec<u8>, CodecError> {
    let kids: Vec<&Did> = recipients.iter().map(|r| &r.kid).collect();
    Ok(serde_json::to_vec(&(protected, kids))?)
}

impl Jwe {
    pub fn encrypt(plaintext: &[u8], cty: &str, recipients: &[Did]) -> Result<Self, CodecError> {
        if recipients.is_empty() {
            return Err(CodecError::EmptyRecipients);
        }

        let secret = Secret::generate();
        let recipients = recipients
            .iter()
            .map(|did| {
                Ok(JweRecipient {
                    kid: *did,
                    encrypted_key: SecretShare::new(&secret, did.public_key())?,
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()?;

        let protected = JweHeader {
            alg: JWE_ALG.to_string(),
            enc: JWE_ENC.to_string(),
            cty: cty.to_string(),
        };
        let aad = associated_data(&protected, &recipients)?;
        let ciphertext = hex::encode(secret.encrypt(plaintext, &aad)?);

        Ok(Self {
            protected,
            recipients,
            ciphertext,
        })
    }

    pub fn decrypt(&self, reader: &Identity) -> Result<Vec<u8>, CodecError> {
        let did = reader.did();
        let recipient = self
            .recipients
            .iter()
            .find(|r| r.kid == did)
            .ok_or_else(|| CodecError::DecryptionFailed(format!("{} is not a recipient", did)))?;

        let secret = recipient
            .encrypted_key
            .recover(reader.secret_key())
            .map_err(|e| CodecError::DecryptionFailed(e.to_string()))?;

        let aad = associated_data(&self.protected, &self.recipients)?;
        let ciphertext = hex::decode(&self.ciphertext)
            .map_err(|_| CodecError::DecryptionFailed("ciphertext is not hex".to_string()))?;

        secret
            .decrypt(&ciphertext, &aad)
            .map_err(|e| CodecError::DecryptionFailed(e.to_string()))
    }

    pub fn recipients(&self) -> impl Iterator<Item = &Did> {
        self.recipients.iter().map(|r| &r.kid)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_every_recipient_can_decrypt() {
        let alice = Identity::from_seed("alice");
        let bob = Identity::from_seed("bob");
        let jwe = Jwe::encrypt(b"secret plans", "json", &[alice.did(), bob.did()]).unwrap();

        assert_eq!(jwe.decrypt(&alice).unwrap(), b"secret plans");
        assert_eq!(jwe.decrypt(&bob).unwrap(), b"secret plans");
    }

    #[test]
    fn test_outsider_cannot_decrypt() {
        let alice = Identity::from_seed("alice");
        let eve = Identity::from_seed("eve");
        let jwe = Jwe::encrypt(b"secret plans", "json", &[alice.did()]).unwrap();

        assert!(matches!(
            jwe.decrypt(&eve),
            Err(CodecError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_recipient_list_is_authenticated() {
        let alice = Identity::from_seed("alice");
        let bob = Identity::from_seed("bob");
        let mut jwe = Jwe::encrypt(b"secret plans", "json", &[alice.did(), bob.did()]).unwrap();
        jwe.recipients.pop();

        assert!(matches!(
            jwe.decrypt(&alice),
            Err(CodecError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_empty_recipients() {
        assert!(matches!(
            Jwe::encrypt(b"nobody", "json", &[]),
            Err(CodecError::EmptyRecipients)
        ));
    }
}
