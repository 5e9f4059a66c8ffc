//! Cryptographic signature verification
//!
//! Pure, algorithm-dispatched check of a signature over the
//! reconstructed base string. Two algorithms are supported:
//!
//! - `ed25519` — 32-byte raw public key (base64 on the wire), 64-byte
//!   signature, verified over the raw base-string bytes with no
//!   pre-hash.
//! - `rsa-pss-sha256` — PEM SPKI RSA public key, PSS padding with
//!   SHA-256 and the maximum salt length the modulus permits, matching
//!   the common signer default.

use crate::error::{GatewayError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pss, RsaPublicKey};
use sha2::{Digest, Sha256};

/// Ed25519 over the raw base string
pub const ALG_ED25519: &str = "ed25519";
/// RSA-PSS with SHA-256 over the base-string digest
pub const ALG_RSA_PSS_SHA256: &str = "rsa-pss-sha256";

/// Whether the gateway can dispatch on this algorithm name.
pub fn is_supported(algorithm: &str) -> bool {
    matches!(algorithm, ALG_ED25519 | ALG_RSA_PSS_SHA256)
}

/// Verify `signature` over `base` with `public_key` under `algorithm`.
///
/// `public_key` is the registry's wire representation: base64 raw bytes
/// for Ed25519, a PEM SPKI block for RSA.
///
/// # Errors
///
/// `UnsupportedAlgorithm` for an unknown algorithm name, `SignatureBad`
/// for malformed key material, malformed signature length, or a
/// signature that does not verify.
pub fn verify_signature(
    algorithm: &str,
    public_key: &str,
    base: &[u8],
    signature: &[u8],
) -> Result<()> {
    match algorithm {
        ALG_ED25519 => verify_ed25519(public_key, base, signature),
        ALG_RSA_PSS_SHA256 => verify_rsa_pss(public_key, base, signature),
        other => Err(GatewayError::UnsupportedAlgorithm(other.to_string())),
    }
}

fn verify_ed25519(public_key: &str, base: &[u8], signature: &[u8]) -> Result<()> {
    let key_bytes = BASE64
        .decode(public_key.trim())
        .map_err(|_| bad("ed25519 key is not valid base64"))?;
    let key_bytes: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| bad("ed25519 key must be exactly 32 bytes"))?;
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| bad("ed25519 key is not a valid point"))?;

    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| bad("ed25519 signature must be exactly 64 bytes"))?;
    let sig = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(base, &sig)
        .map_err(|_| bad("ed25519 verification failed"))
}

fn verify_rsa_pss(public_key: &str, base: &[u8], signature: &[u8]) -> Result<()> {
    let key = RsaPublicKey::from_public_key_pem(public_key.trim())
        .map_err(|_| bad("rsa key is not a valid SPKI PEM block"))?;
    let digest = Sha256::digest(base);
    key.verify(
        Pss::new_with_salt::<Sha256>(max_salt_len(&key)),
        &digest,
        signature,
    )
    .map_err(|_| bad("rsa-pss verification failed"))
}

/// Maximum PSS salt length for a modulus: `ceil((bits − 1)/8) − hLen − 2`
/// with SHA-256's 32-byte output.
pub fn max_salt_len(key: &RsaPublicKey) -> usize {
    let em_len = (key.n().bits() - 1).div_ceil(8);
    em_len - Sha256::output_size() - 2
}

fn bad(detail: &str) -> GatewayError {
    GatewayError::SignatureBad(detail.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::RsaPrivateKey;

    const BASE: &[u8] = b"\"@authority\": shop.example.com\n\"@path\": /product/42\n\"@signature-params\": (\"@authority\" \"@path\"); keyId=\"k1\"; alg=\"ed25519\"; nonce=\"n\"";

    fn ed25519_pair() -> (SigningKey, String) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_b64 = BASE64.encode(signing_key.verifying_key().to_bytes());
        (signing_key, public_b64)
    }

    #[test]
    fn test_supported_set() {
        assert!(is_supported("ed25519"));
        assert!(is_supported("rsa-pss-sha256"));
        assert!(!is_supported("hmac-sha256"));
        assert!(!is_supported("rsa-pss-sha512"));
        assert!(!is_supported(""));
    }

    #[test]
    fn test_ed25519_round_trip() {
        let (signing_key, public_b64) = ed25519_pair();
        let sig = signing_key.sign(BASE);
        verify_signature(ALG_ED25519, &public_b64, BASE, &sig.to_bytes())
            .expect("valid signature must verify");
    }

    #[test]
    fn test_ed25519_wrong_key_fails() {
        let (signing_key, _) = ed25519_pair();
        let (_, other_public) = ed25519_pair();
        let sig = signing_key.sign(BASE);
        let err =
            verify_signature(ALG_ED25519, &other_public, BASE, &sig.to_bytes()).unwrap_err();
        assert!(matches!(err, GatewayError::SignatureBad(_)));
    }

    #[test]
    fn test_ed25519_tampered_base_fails() {
        let (signing_key, public_b64) = ed25519_pair();
        let sig = signing_key.sign(BASE);
        let mut tampered = BASE.to_vec();
        tampered[0] ^= 1;
        let err =
            verify_signature(ALG_ED25519, &public_b64, &tampered, &sig.to_bytes()).unwrap_err();
        assert!(matches!(err, GatewayError::SignatureBad(_)));
    }

    #[test]
    fn test_ed25519_bad_key_length() {
        let short_key = BASE64.encode([0u8; 16]);
        let err = verify_signature(ALG_ED25519, &short_key, BASE, &[0u8; 64]).unwrap_err();
        assert!(matches!(err, GatewayError::SignatureBad(_)));
    }

    #[test]
    fn test_ed25519_bad_signature_length() {
        let (_, public_b64) = ed25519_pair();
        let err = verify_signature(ALG_ED25519, &public_b64, BASE, &[0u8; 63]).unwrap_err();
        assert!(matches!(err, GatewayError::SignatureBad(_)));
    }

    #[test]
    fn test_rsa_pss_round_trip() {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("generate rsa key");
        let public_key = private_key.to_public_key();
        let pem = public_key
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .expect("encode public key");

        let digest = Sha256::digest(BASE);
        let salt = max_salt_len(&public_key);
        let sig = private_key
            .sign_with_rng(&mut rng, Pss::new_with_salt::<Sha256>(salt), &digest)
            .expect("sign");

        verify_signature(ALG_RSA_PSS_SHA256, &pem, BASE, &sig)
            .expect("valid pss signature must verify");

        let mut tampered = BASE.to_vec();
        tampered[0] ^= 1;
        let err = verify_signature(ALG_RSA_PSS_SHA256, &pem, &tampered, &sig).unwrap_err();
        assert!(matches!(err, GatewayError::SignatureBad(_)));
    }

    #[test]
    fn test_rsa_garbage_pem_fails() {
        let err = verify_signature(
            ALG_RSA_PSS_SHA256,
            "-----BEGIN PUBLIC KEY-----\nnot a key\n-----END PUBLIC KEY-----",
            BASE,
            &[0u8; 256],
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::SignatureBad(_)));
    }

    #[test]
    fn test_max_salt_len_2048() {
        let mut rng = OsRng;
        let key = RsaPrivateKey::new(&mut rng, 2048)
            .expect("generate rsa key")
            .to_public_key();
        // emLen = ceil(2047/8) = 256; 256 - 32 - 2
        assert_eq!(max_salt_len(&key), 222);
    }

    #[test]
    fn test_unknown_algorithm_is_unsupported() {
        let err = verify_signature("hmac-sha256", "AAAA", BASE, &[0u8; 32]).unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedAlgorithm(_)));
    }
}
