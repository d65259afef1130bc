//! Collective signing (CoSi): a two-round Schnorr multisignature.
//!
//! Round one collects commitments `R_i = r_i·G` from each signer; the
//! proposer folds them into an aggregate commitment `R = Σ R_i` together
//! with a bitmap of contributing committee positions. Round two collects
//! responses `s_i = r_i − c·x_i` against the shared challenge
//! `c = H(R ‖ X ‖ m)` where `X` is the sum of the contributing public keys,
//! and folds them into `s = Σ s_i`. The aggregate verifies as
//! `s·G + c·X == R` with at least threshold-many mask bits set.
//!
//! The challenge binds the aggregate commitment, the aggregate public key,
//! and the message, so a response is only meaningful for the exact signer
//! set announced in the mask.

use std::collections::BTreeMap;

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::MAX_COMMITTEE_SIZE;
use crate::crypto::keys::{Keypair, PublicKey};

/// Errors from the collective-signing kit.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CosiError {
    #[error("invalid group element encoding")]
    InvalidPoint,
    #[error("invalid scalar encoding")]
    InvalidScalar,
    #[error("signer index {0} exceeds the mask capacity")]
    MaskOverflow(usize),
    #[error("signer index {0} is not in the committee")]
    UnknownSigner(usize),
    #[error("response for signer {0} does not match the announced mask")]
    MaskMismatch(usize),
}

/// A signer's secret commitment nonce. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateNonce(Scalar);

/// A signer's public commitment `R_i = r_i·G`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment(pub(crate) [u8; 32]);

impl Commitment {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn point(&self) -> Result<RistrettoPoint, CosiError> {
        CompressedRistretto(self.0)
            .decompress()
            .ok_or(CosiError::InvalidPoint)
    }
}

/// Generate a fresh commitment nonce.
pub fn commit<R: RngCore + CryptoRng>(rng: &mut R) -> (PrivateNonce, Commitment) {
    let r = Scalar::random(rng);
    let point = RistrettoPoint::mul_base(&r);
    (PrivateNonce(r), Commitment(point.compress().to_bytes()))
}

/// An aggregate collective signature.
///
/// `commitment` is the folded commitment `R`, `response` the folded scalar
/// `s` (zero until round two completes), and `mask` the bitmap of committee
/// positions that contributed, indexed by sorted committee order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosiSignature {
    commitment: [u8; 32],
    response: [u8; 32],
    mask: u64,
}

impl CosiSignature {
    /// Fold per-signer commitments (keyed by committee position) into an
    /// aggregate commitment with a signer mask.
    pub fn aggregate_commitments(
        commitments: &BTreeMap<usize, Commitment>,
    ) -> Result<Self, CosiError> {
        let mut sum = RistrettoPoint::identity();
        let mut mask = 0u64;
        for (&index, commitment) in commitments {
            if index >= MAX_COMMITTEE_SIZE {
                return Err(CosiError::MaskOverflow(index));
            }
            sum += commitment.point()?;
            mask |= 1 << index;
        }
        Ok(CosiSignature {
            commitment: sum.compress().to_bytes(),
            response: Scalar::ZERO.to_bytes(),
            mask,
        })
    }

    /// Committee positions that contributed a commitment.
    pub fn signers(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_COMMITTEE_SIZE).filter(move |i| self.mask & (1 << i) != 0)
    }

    pub fn signer_count(&self) -> usize {
        self.mask.count_ones() as usize
    }

    /// Sum of the contributing public keys per the mask.
    fn aggregate_public(&self, publics: &[PublicKey]) -> Result<RistrettoPoint, CosiError> {
        let mut sum = RistrettoPoint::identity();
        for index in self.signers() {
            let key = publics.get(index).ok_or(CosiError::UnknownSigner(index))?;
            sum += key.point().ok_or(CosiError::InvalidPoint)?;
        }
        Ok(sum)
    }

    /// The shared Schnorr challenge `c = H(R ‖ X ‖ m)`.
    fn challenge(&self, publics: &[PublicKey], message: &[u8]) -> Result<Scalar, CosiError> {
        let aggregate = self.aggregate_public(publics)?;
        let mut hasher = blake3::Hasher::new_derive_key("vela.cosi.challenge");
        hasher.update(&self.commitment);
        hasher.update(&aggregate.compress().to_bytes());
        hasher.update(message);
        let mut wide = [0u8; 64];
        hasher.finalize_xof().fill(&mut wide);
        Ok(Scalar::from_bytes_mod_order_wide(&wide))
    }

    /// Compute this signer's response `s_i = r_i − c·x_i`.
    pub fn response(
        &self,
        keypair: &Keypair,
        nonce: &PrivateNonce,
        publics: &[PublicKey],
        message: &[u8],
    ) -> Result<[u8; 32], CosiError> {
        let c = self.challenge(publics, message)?;
        let s = nonce.0 - c * keypair.secret.0;
        Ok(s.to_bytes())
    }

    /// Verify a single response against its recorded commitment:
    /// `s_i·G + c·X_i == R_i`.
    pub fn verify_response(
        &self,
        publics: &[PublicKey],
        index: usize,
        commitment: &Commitment,
        response: &[u8; 32],
        message: &[u8],
    ) -> Result<(), CosiError> {
        if index >= MAX_COMMITTEE_SIZE {
            return Err(CosiError::MaskOverflow(index));
        }
        if self.mask & (1 << index) == 0 {
            return Err(CosiError::MaskMismatch(index));
        }
        let s: Option<Scalar> = Scalar::from_canonical_bytes(*response).into();
        let s = s.ok_or(CosiError::InvalidScalar)?;
        let key = publics
            .get(index)
            .ok_or(CosiError::UnknownSigner(index))?
            .point()
            .ok_or(CosiError::InvalidPoint)?;
        let c = self.challenge(publics, message)?;
        if RistrettoPoint::mul_base(&s) + c * key == commitment.point()? {
            Ok(())
        } else {
            Err(CosiError::InvalidScalar)
        }
    }

    /// Fold per-signer responses into the aggregate scalar.
    ///
    /// Every response index must be announced in the mask; the handler is
    /// responsible for collecting exactly as many responses as commitments.
    pub fn aggregate_responses(
        &mut self,
        responses: &BTreeMap<usize, [u8; 32]>,
    ) -> Result<(), CosiError> {
        let mut sum = Scalar::ZERO;
        for (&index, bytes) in responses {
            if index >= MAX_COMMITTEE_SIZE || self.mask & (1 << index) == 0 {
                return Err(CosiError::MaskMismatch(index));
            }
            let s: Option<Scalar> = Scalar::from_canonical_bytes(*bytes).into();
            sum += s.ok_or(CosiError::InvalidScalar)?;
        }
        self.response = sum.to_bytes();
        Ok(())
    }

    /// Verify the aggregate: `s·G + c·X == R` with at least `threshold`
    /// signers announced in the mask.
    pub fn verify(&self, message: &[u8], publics: &[PublicKey], threshold: usize) -> bool {
        if self.signer_count() < threshold {
            return false;
        }
        let aggregate = match self.aggregate_public(publics) {
            Ok(point) => point,
            Err(_) => return false,
        };
        let c = match self.challenge(publics, message) {
            Ok(c) => c,
            Err(_) => return false,
        };
        let s: Option<Scalar> = Scalar::from_canonical_bytes(self.response).into();
        let s = match s {
            Some(s) => s,
            None => return false,
        };
        let commitment = match CompressedRistretto(self.commitment).decompress() {
            Some(point) => point,
            None => return false,
        };
        RistrettoPoint::mul_base(&s) + c * aggregate == commitment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn committee(n: usize) -> (Vec<Keypair>, Vec<PublicKey>) {
        let keypairs: Vec<Keypair> = (0..n).map(|_| Keypair::generate()).collect();
        let publics = keypairs.iter().map(|kp| kp.public).collect();
        (keypairs, publics)
    }

    /// Run both rounds for the given signer indices and return the aggregate.
    fn sign(
        keypairs: &[Keypair],
        publics: &[PublicKey],
        signers: &[usize],
        message: &[u8],
    ) -> CosiSignature {
        let mut nonces = BTreeMap::new();
        let mut commitments = BTreeMap::new();
        for &i in signers {
            let (nonce, commitment) = commit(&mut OsRng);
            nonces.insert(i, nonce);
            commitments.insert(i, commitment);
        }
        let mut sig = CosiSignature::aggregate_commitments(&commitments).unwrap();

        let mut responses = BTreeMap::new();
        for &i in signers {
            let s = sig
                .response(&keypairs[i], &nonces[&i], publics, message)
                .unwrap();
            sig.verify_response(publics, i, &commitments[&i], &s, message)
                .unwrap();
            responses.insert(i, s);
        }
        sig.aggregate_responses(&responses).unwrap();
        sig
    }

    #[test]
    fn threshold_round_trip_verifies() {
        let (keypairs, publics) = committee(5);
        let message = b"snapshot hash";
        let sig = sign(&keypairs, &publics, &[0, 1, 3, 4], message);
        assert_eq!(sig.signer_count(), 4);
        assert!(sig.verify(message, &publics, 4));
        // One more signer than contributed can never be met.
        assert!(!sig.verify(message, &publics, 5));
    }

    #[test]
    fn mutated_response_fails_verification() {
        let (keypairs, publics) = committee(5);
        let message = b"snapshot hash";

        let signers = [0usize, 1, 2, 3];
        let mut nonces = BTreeMap::new();
        let mut commitments = BTreeMap::new();
        for &i in &signers {
            let (nonce, commitment) = commit(&mut OsRng);
            nonces.insert(i, nonce);
            commitments.insert(i, commitment);
        }
        let mut sig = CosiSignature::aggregate_commitments(&commitments).unwrap();
        let mut responses = BTreeMap::new();
        for &i in &signers {
            responses.insert(
                i,
                sig.response(&keypairs[i], &nonces[&i], &publics, message)
                    .unwrap(),
            );
        }
        // Replace one response with the signer's response for another message.
        let forged = sig
            .response(&keypairs[2], &nonces[&2], &publics, b"other message")
            .unwrap();
        responses.insert(2, forged);
        sig.aggregate_responses(&responses).unwrap();
        assert!(!sig.verify(message, &publics, 4));
    }

    #[test]
    fn response_bound_to_message() {
        let (keypairs, publics) = committee(3);
        let (nonce, commitment) = commit(&mut OsRng);
        let mut commitments = BTreeMap::new();
        commitments.insert(1, commitment);
        let sig = CosiSignature::aggregate_commitments(&commitments).unwrap();

        let s = sig
            .response(&keypairs[1], &nonce, &publics, b"message")
            .unwrap();
        assert!(sig
            .verify_response(&publics, 1, &commitment, &s, b"message")
            .is_ok());
        assert!(sig
            .verify_response(&publics, 1, &commitment, &s, b"other")
            .is_err());
    }

    #[test]
    fn response_for_unannounced_signer_rejected() {
        let (_, publics) = committee(3);
        let (_, commitment) = commit(&mut OsRng);
        let mut commitments = BTreeMap::new();
        commitments.insert(0, commitment);
        let sig = CosiSignature::aggregate_commitments(&commitments).unwrap();
        let err = sig
            .verify_response(&publics, 2, &commitment, &[0u8; 32], b"m")
            .unwrap_err();
        assert_eq!(err, CosiError::MaskMismatch(2));
    }

    #[test]
    fn mask_capacity_is_enforced() {
        let mut commitments = BTreeMap::new();
        let (_, commitment) = commit(&mut OsRng);
        commitments.insert(MAX_COMMITTEE_SIZE, commitment);
        assert_eq!(
            CosiSignature::aggregate_commitments(&commitments).unwrap_err(),
            CosiError::MaskOverflow(MAX_COMMITTEE_SIZE)
        );
    }

    #[test]
    fn signature_serde_round_trip() {
        let (keypairs, publics) = committee(4);
        let sig = sign(&keypairs, &publics, &[0, 1, 2], b"m");
        let bytes = bincode::serialize(&sig).unwrap();
        let back: CosiSignature = bincode::deserialize(&bytes).unwrap();
        assert_eq!(sig, back);
        assert!(back.verify(b"m", &publics, 3));
    }
}
