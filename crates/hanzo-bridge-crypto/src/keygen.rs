//! Key pair generation from the OS CSPRNG

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::errors::KeyError;
use crate::keys::{ED25519_SEED_LEN, MIN_RSA_KEY_BITS};

/// Generate an RSA key pair with a modulus of exactly `bits` bits.
///
/// This is CPU heavy (seconds for 3072 bits); async callers should run it on
/// the blocking pool.
pub fn generate_rsa_pair(bits: usize) -> Result<(RsaPrivateKey, RsaPublicKey), KeyError> {
    if bits < MIN_RSA_KEY_BITS {
        return Err(KeyError::Generation(format!(
            "RSA modulus of {} bits is below the {} bit minimum",
            bits, MIN_RSA_KEY_BITS
        )));
    }

    let private = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| KeyError::Generation(format!("RSA: {}", e)))?;
    let public = private.to_public_key();

    Ok((private, public))
}

/// Generate an Ed25519 key pair
pub fn generate_ed25519_pair() -> Result<(SigningKey, VerifyingKey), KeyError> {
    let mut seed = Zeroizing::new([0u8; ED25519_SEED_LEN]);
    OsRng
        .try_fill_bytes(&mut seed[..])
        .map_err(|e| KeyError::Generation(format!("Ed25519 seed: {}", e)))?;

    let signing = SigningKey::from_bytes(&seed);
    let verifying = signing.verifying_key();

    Ok((signing, verifying))
}
