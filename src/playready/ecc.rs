//! ECC-256 helpers for PlayReady.
//!
//! PlayReady transports AES keys as P-256 points: the x coordinate of an
//! ElGamal-encrypted point carries the key material. Points are serialized
//! as raw big-endian `x || y` (64 bytes), ciphertexts as `point1 || point2`.

use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{AffinePoint, EncodedPoint, NonZeroScalar, ProjectivePoint, PublicKey, SecretKey};
use rsa::rand_core::OsRng;

use crate::error::{Error, Result};

/// An ECC-256 key pair as stored in `.prd` files: `d || x || y`.
#[derive(Clone)]
pub struct EccKey {
    secret: SecretKey,
}

impl std::fmt::Debug for EccKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EccKey")
            .field("public", &hex::encode(self.public_bytes()))
            .finish()
    }
}

impl EccKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// Load from 32 bytes (private scalar) or 96 bytes (scalar plus public point).
    ///
    /// The public half, when present, must match the scalar.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != 32 && data.len() != 96 {
            return Err(Error::InvalidPrdFile(format!(
                "ECC key must be 32 or 96 bytes, got {}",
                data.len()
            )));
        }
        let secret = SecretKey::from_slice(&data[..32])
            .map_err(|_| Error::InvalidPrdFile("Invalid ECC private key".to_string()))?;
        let key = Self { secret };
        if data.len() == 96 && key.public_bytes()[..] != data[32..] {
            return Err(Error::InvalidPrdFile(
                "ECC public key does not match private key".to_string(),
            ));
        }
        Ok(key)
    }

    /// `d || x || y`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.private_bytes().to_vec();
        out.extend_from_slice(&self.public_bytes());
        out
    }

    pub fn private_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.secret.to_bytes());
        out
    }

    /// Public point as raw `x || y`.
    pub fn public_bytes(&self) -> [u8; 64] {
        point_bytes(self.secret.public_key().as_affine())
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    /// ECDSA-P256-SHA256 signature as raw `r || s`.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::from(&self.secret);
        let signature: Signature = signing_key.sign(message);
        signature.to_bytes().to_vec()
    }

    /// ElGamal decryption: `point2 - d * point1`.
    pub fn elgamal_decrypt(&self, ciphertext: &[u8]) -> Result<AffinePoint> {
        if ciphertext.len() != 128 {
            return Err(Error::PlayReady(format!(
                "ElGamal ciphertext must be 128 bytes, got {}",
                ciphertext.len()
            )));
        }
        let point1 = ProjectivePoint::from(point_from_bytes(&ciphertext[..64])?);
        let point2 = ProjectivePoint::from(point_from_bytes(&ciphertext[64..])?);
        let shared = point1 * *self.secret.to_nonzero_scalar();
        Ok(AffinePoint::from(point2 - shared))
    }
}

/// A uniformly random curve point, used as a key carrier.
pub fn random_point() -> AffinePoint {
    let k = NonZeroScalar::random(&mut OsRng);
    AffinePoint::from(ProjectivePoint::GENERATOR * *k)
}

/// ElGamal encryption of `message` to `public`: `(k*G, M + k*P)`.
pub fn elgamal_encrypt(message: &AffinePoint, public: &PublicKey) -> [u8; 128] {
    let k = NonZeroScalar::random(&mut OsRng);
    let point1 = ProjectivePoint::GENERATOR * *k;
    let point2 = ProjectivePoint::from(*message) + public.to_projective() * *k;

    let mut out = [0u8; 128];
    out[..64].copy_from_slice(&point_bytes(&AffinePoint::from(point1)));
    out[64..].copy_from_slice(&point_bytes(&AffinePoint::from(point2)));
    out
}

/// Raw `x || y` for an affine point. The identity maps to all zeros.
pub fn point_bytes(point: &AffinePoint) -> [u8; 64] {
    let encoded = point.to_encoded_point(false);
    let mut out = [0u8; 64];
    if let (Some(x), Some(y)) = (encoded.x(), encoded.y()) {
        out[..32].copy_from_slice(x);
        out[32..].copy_from_slice(y);
    }
    out
}

/// The x coordinate alone, which is where PlayReady keeps key material.
pub fn point_x(point: &AffinePoint) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&point_bytes(point)[..32]);
    out
}

/// Parse raw `x || y` into a curve point.
pub fn point_from_bytes(data: &[u8]) -> Result<AffinePoint> {
    if data.len() != 64 {
        return Err(Error::PlayReady(format!(
            "ECC point must be 64 bytes, got {}",
            data.len()
        )));
    }
    let encoded = EncodedPoint::from_affine_coordinates(
        data[..32].into(),
        data[32..].into(),
        false,
    );
    Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| Error::PlayReady("Point is not on P-256".to_string()))
}

/// Public key from raw `x || y`.
pub fn public_key_from_bytes(data: &[u8]) -> Result<PublicKey> {
    PublicKey::from_affine(point_from_bytes(data)?)
        .map_err(|_| Error::PlayReady("Invalid ECC public key".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::VerifyingKey;

    #[test]
    fn elgamal_roundtrip() {
        let key = EccKey::generate();
        let message = random_point();
        let ciphertext = elgamal_encrypt(&message, &key.public_key());
        let decrypted = key.elgamal_decrypt(&ciphertext).unwrap();
        assert_eq!(point_x(&decrypted), point_x(&message));
    }

    #[test]
    fn key_bytes_layout() {
        let key = EccKey::generate();
        let bytes = key.to_bytes();
        assert_eq!(bytes.len(), 96);
        let loaded = EccKey::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.public_bytes(), key.public_bytes());
        assert_eq!(
            EccKey::from_bytes(&bytes[..32]).unwrap().public_bytes(),
            key.public_bytes()
        );

        let mut mismatched = bytes.clone();
        mismatched[40] ^= 1;
        assert!(EccKey::from_bytes(&mismatched).is_err());
    }

    #[test]
    fn signature_is_raw_r_s() {
        let key = EccKey::generate();
        let sig = key.sign(b"SignedInfo");
        assert_eq!(sig.len(), 64);

        let verifying = VerifyingKey::from(&key.public_key());
        let parsed = Signature::from_slice(&sig).unwrap();
        assert!(verifying.verify(b"SignedInfo", &parsed).is_ok());
    }

    #[test]
    fn rejects_off_curve_points() {
        assert!(point_from_bytes(&[1u8; 64]).is_err());
        assert!(point_from_bytes(&[0u8; 10]).is_err());
    }
}
