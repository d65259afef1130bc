//! Spend keys over the Ristretto group.
//!
//! Every committee member signs with a Schnorr spend key. Public keys travel
//! on the wire and through storage as compressed 32-byte Ristretto points;
//! decompression is validated on first use rather than on deserialization,
//! so a malformed key fails verification instead of poisoning a message
//! envelope.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::Hash;

/// A private spend key (Ristretto scalar). Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(pub(crate) Scalar);

/// A public spend key (compressed Ristretto point, 32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub(crate) [u8; 32]);

/// A spend keypair.
#[derive(Clone)]
pub struct Keypair {
    pub public: PublicKey,
    pub(crate) secret: PrivateKey,
}

impl Keypair {
    /// Generate a new random keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = Scalar::random(&mut OsRng);
        Keypair {
            public: PublicKey::from_point(RistrettoPoint::mul_base(&secret)),
            secret: PrivateKey(secret),
        }
    }

    /// Reconstruct a keypair from a stored secret scalar.
    ///
    /// Returns `None` when the bytes are not a canonical scalar encoding.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Option<Self> {
        let secret: Option<Scalar> = Scalar::from_canonical_bytes(bytes).into();
        let secret = secret?;
        Some(Keypair {
            public: PublicKey::from_point(RistrettoPoint::mul_base(&secret)),
            secret: PrivateKey(secret),
        })
    }

    /// Serialize the secret scalar for the key file.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.0.to_bytes()
    }
}

impl PublicKey {
    pub(crate) fn from_point(point: RistrettoPoint) -> Self {
        PublicKey(point.compress().to_bytes())
    }

    /// Decompress into a group element; `None` for invalid encodings.
    pub(crate) fn point(&self) -> Option<RistrettoPoint> {
        CompressedRistretto(self.0).decompress()
    }

    /// Access the compressed key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the node identifier for this key.
    pub fn fingerprint(&self) -> Hash {
        crate::hash_domain(b"vela.spend.fingerprint", &self.0)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_round_trips_through_secret_bytes() {
        let kp = Keypair::generate();
        let restored = Keypair::from_secret_bytes(kp.secret_bytes()).unwrap();
        assert_eq!(kp.public, restored.public);
    }

    #[test]
    fn non_canonical_secret_rejected() {
        assert!(Keypair::from_secret_bytes([0xff; 32]).is_none());
    }

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_eq!(a.public.fingerprint(), a.public.fingerprint());
        assert_ne!(a.public.fingerprint(), b.public.fingerprint());
    }

    #[test]
    fn public_key_serde_round_trip() {
        let kp = Keypair::generate();
        let bytes = bincode::serialize(&kp.public).unwrap();
        let back: PublicKey = bincode::deserialize(&bytes).unwrap();
        assert_eq!(kp.public, back);
        assert!(back.point().is_some());
    }
}
