use std::time::Duration;

use super::CodecError;
use crate::identity::Did;

/// Who an encrypted envelope is readable by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptOptions {
    pub recipients: Vec<Did>,
    /// Add the writer to the recipients, so it can read its own writes
    pub include_self: bool,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            include_self: true,
        }
    }
}

impl EncryptOptions {
    /// Readable by the writer only
    pub fn to_self() -> Self {
        Self::default()
    }

    /// Readable by the writer and `recipients`
    pub fn to(recipients: impl IntoIterator<Item = Did>) -> Self {
        Self {
            recipients: recipients.into_iter().collect(),
            include_self: true,
        }
    }

    /// Readable by `recipients` only, not the writer
    pub fn only(recipients: impl IntoIterator<Item = Did>) -> Self {
        Self {
            recipients: recipients.into_iter().collect(),
            include_self: false,
        }
    }

    /// Final, deduplicated recipient list for `writer`
    pub fn resolve(&self, writer: Did) -> Result<Vec<Did>, CodecError> {
        let mut resolved = Vec::with_capacity(self.recipients.len() + 1);
        if self.include_self {
            resolved.push(writer);
        }
        for did in &self.recipients {
            if !resolved.contains(did) {
                resolved.push(*did);
            }
        }
        if resolved.is_empty() {
            return Err(CodecError::EmptyRecipients);
        }
        Ok(resolved)
    }
}

/// How a payload is written: to the graph, to a topic, or to a peer
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub encrypt: Option<EncryptOptions>,
    pub sign: bool,
    /// Store the payload in the graph and send only its link
    pub link: bool,
    /// Retain stored blocks against garbage collection
    pub pin: bool,
    /// Overrides the configured provider timeout
    pub timeout: Option<Duration>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            encrypt: None,
            sign: false,
            link: false,
            pin: true,
            timeout: None,
        }
    }
}

impl WriteOptions {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn encrypted(encrypt: EncryptOptions) -> Self {
        Self {
            encrypt: Some(encrypt),
            ..Self::default()
        }
    }

    pub fn encrypted_to_self() -> Self {
        Self::encrypted(EncryptOptions::to_self())
    }

    pub fn signed(mut self) -> Self {
        self.sign = true;
        self
    }

    pub fn linked(mut self) -> Self {
        self.link = true;
        self
    }

    pub fn unpinned(mut self) -> Self {
        self.pin = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::identity::Identity;

    #[test]
    fn test_resolve_includes_writer_once() {
        let a = Identity::from_seed("a").did();
        let b = Identity::from_seed("b").did();

        assert_eq!(EncryptOptions::to_self().resolve(a).unwrap(), vec![a]);
        assert_eq!(EncryptOptions::to([b, a, b]).resolve(a).unwrap(), vec![a, b]);
        assert_eq!(EncryptOptions::only([b]).resolve(a).unwrap(), vec![b]);
    }

    #[test]
    fn test_resolve_empty_fails_fast() {
        let a = Identity::from_seed("a").did();
        assert!(matches!(
            EncryptOptions::only([]).resolve(a),
            Err(CodecError::EmptyRecipients)
        ));
    }
}
