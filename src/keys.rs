//! The service's signing identity.

use std::fmt;

use secp256k1::{schnorr, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};

use crate::error::KeyError;

/// Human-readable prefix of bech32-encoded secret keys.
const NSEC_PREFIX: &str = "nsec";

/// A secp256k1 key pair used to sign replies.
#[derive(Clone)]
pub struct Keys {
    secp: Secp256k1<secp256k1::All>,
    keypair: Keypair,
    public_key: XOnlyPublicKey,
}

impl Keys {
    /// Derive the key pair from a secret given as `nsec1…` or 64 hex digits.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] if the secret is empty, malformed, or not a
    /// valid secp256k1 scalar.
    pub fn parse(secret: &str) -> Result<Self, KeyError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(KeyError::Missing);
        }

        let bytes = if secret.get(..NSEC_PREFIX.len() + 1).is_some_and(|p| {
            p.eq_ignore_ascii_case("nsec1")
        }) {
            let (hrp, data) =
                bech32::decode(secret).map_err(|e| KeyError::Bech32(e.to_string()))?;
            if !hrp.to_string().eq_ignore_ascii_case(NSEC_PREFIX) {
                return Err(KeyError::WrongPrefix(hrp.to_string()));
            }
            data
        } else {
            hex::decode(secret)?
        };

        Self::from_secret_bytes(&bytes)
    }

    /// Derive the key pair from raw secret key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Secp`] if the bytes are not a valid secret key.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)?;
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        let (public_key, _parity) = keypair.x_only_public_key();
        Ok(Self {
            secp,
            keypair,
            public_key,
        })
    }

    /// The x-only public key.
    #[must_use]
    pub fn public_key(&self) -> XOnlyPublicKey {
        self.public_key
    }

    /// The x-only public key as lowercase hex, as it appears in messages.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        self.public_key.to_string()
    }

    /// BIP-340 Schnorr signature over a 32-byte message digest.
    ///
    /// Uses no auxiliary randomness, so the same digest always yields the
    /// same signature.
    #[must_use]
    pub fn sign(&self, digest: [u8; 32]) -> schnorr::Signature {
        self.secp
            .sign_schnorr_no_aux_rand(&Message::from_digest(digest), &self.keypair)
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}
