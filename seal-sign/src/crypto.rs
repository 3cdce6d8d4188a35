// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Algorithm selection rules and signature computation for both schemes.
//!
//! Selection is keyed on the signer's key family, the key size and the
//! oldest Android release the APK targets; older releases only verify the
//! weaker algorithms.

use p256::ecdsa::{signature::Signer, DerSignature};
use rsa::signature::SignatureEncoding;
use rsa::Pkcs1v15Sign;
use seal_common::*;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::{
    algorithms::{DigestAlgorithm, SignatureAlgorithmId},
    crypto_keys::{KeyKind, PrivateKey}
};

/// Digest algorithm used inside a signer's v1 (JAR) signature.
pub fn v1_signature_digest_algorithm(
    key: &PrivateKey,
    min_sdk_version: i32
) -> Result<DigestAlgorithm> {
    match key.kind() {
        // API Level 18 introduced SHA-256 support for JAR signatures
        KeyKind::Rsa => Ok(if min_sdk_version < 18 {
            DigestAlgorithm::Sha1
        } else {
            DigestAlgorithm::Sha256
        }),
        KeyKind::EcdsaP256 => {
            if min_sdk_version < 18 {
                Err(SealError::UnsupportedKey(format!(
                    "ECDSA signatures only supported for minSdkVersion 18 and higher, \
                     requested {min_sdk_version}"
                )))
            } else {
                Ok(DigestAlgorithm::Sha256)
            }
        }
    }
}

/// v2 signature algorithms a signer's key should sign with.
///
/// RSA keys above 3072 bits get the SHA-512 variant; their security level
/// would otherwise be capped by the digest.
pub fn v2_signature_algorithms(key: &PrivateKey) -> Vec<SignatureAlgorithmId> {
    match key.rsa_modulus_bits() {
        Some(bits) if bits <= 3072 => vec![SignatureAlgorithmId::RsaSsaPkcs1v1_5WithSha2_256],
        Some(_) => vec![SignatureAlgorithmId::RsaSsaPkcs1v1_5WithSha2_512],
        None => vec![SignatureAlgorithmId::EcdsaWithSha2_256]
    }
}

/// Signs a v1 signature file under the signer's chosen digest algorithm.
pub fn sign_v1(
    key: &PrivateKey,
    digest_algorithm: DigestAlgorithm,
    message: &[u8]
) -> Result<Vec<u8>> {
    match (key, digest_algorithm) {
        (PrivateKey::Rsa(key), DigestAlgorithm::Sha1) => {
            Ok(key.sign(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(message))?)
        }
        (PrivateKey::Rsa(key), DigestAlgorithm::Sha256) => {
            Ok(key.sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(message))?)
        }
        (PrivateKey::EcdsaP256(key), DigestAlgorithm::Sha256) => {
            let signature: DerSignature = key.try_sign(message)?;
            Ok(signature.to_vec())
        }
        (PrivateKey::EcdsaP256(_), DigestAlgorithm::Sha1) => Err(SealError::UnsupportedKey(
            "SHA-1 cannot be used with ECDSA keys".to_string()
        ))
    }
}

/// Signs serialised v2 signed-data under one of the signer's algorithms.
pub fn sign_v2(
    key: &PrivateKey,
    algorithm: SignatureAlgorithmId,
    message: &[u8]
) -> Result<Vec<u8>> {
    match (key, algorithm) {
        (PrivateKey::Rsa(key), SignatureAlgorithmId::RsaSsaPkcs1v1_5WithSha2_256) => {
            Ok(key.sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(message))?)
        }
        (PrivateKey::Rsa(key), SignatureAlgorithmId::RsaSsaPkcs1v1_5WithSha2_512) => {
            Ok(key.sign(Pkcs1v15Sign::new::<Sha512>(), &Sha512::digest(message))?)
        }
        (PrivateKey::EcdsaP256(key), SignatureAlgorithmId::EcdsaWithSha2_256) => {
            let signature: DerSignature = key.try_sign(message)?;
            Ok(signature.to_vec())
        }
        (key, algorithm) => Err(SealError::UnsupportedKey(format!(
            "{algorithm:?} cannot be computed with a {:?} key",
            key.kind()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto_keys::Keys;

    const RSA_2048_PEM: &str = include_str!("../testdata/rsa-2048.pem");
    const RSA_4096_PEM: &str = include_str!("../testdata/rsa-4096.pem");
    const EC_P256_PEM: &str = include_str!("../testdata/ec-p256.pem");

    fn key(pem: &str) -> PrivateKey {
        Keys::from_combined_pem_string(pem).unwrap().private_key
    }

    #[test]
    fn v1_digest_tracks_min_sdk_for_rsa() {
        let rsa = key(RSA_2048_PEM);
        assert_eq!(
            v1_signature_digest_algorithm(&rsa, 7).unwrap(),
            DigestAlgorithm::Sha1
        );
        assert_eq!(
            v1_signature_digest_algorithm(&rsa, 18).unwrap(),
            DigestAlgorithm::Sha256
        );
    }

    #[test]
    fn v1_digest_rejects_ecdsa_below_api_18() {
        let ec = key(EC_P256_PEM);
        assert!(matches!(
            v1_signature_digest_algorithm(&ec, 17),
            Err(SealError::UnsupportedKey(_))
        ));
        assert_eq!(
            v1_signature_digest_algorithm(&ec, 18).unwrap(),
            DigestAlgorithm::Sha256
        );
    }

    #[test]
    fn v2_algorithms_follow_key_size() {
        assert_eq!(
            v2_signature_algorithms(&key(RSA_2048_PEM)),
            vec![SignatureAlgorithmId::RsaSsaPkcs1v1_5WithSha2_256]
        );
        assert_eq!(
            v2_signature_algorithms(&key(RSA_4096_PEM)),
            vec![SignatureAlgorithmId::RsaSsaPkcs1v1_5WithSha2_512]
        );
        assert_eq!(
            v2_signature_algorithms(&key(EC_P256_PEM)),
            vec![SignatureAlgorithmId::EcdsaWithSha2_256]
        );
    }

    #[test]
    fn rsa_v2_signature_verifies() {
        let rsa = key(RSA_2048_PEM);
        let message = b"signed data bytes";
        let signature = sign_v2(
            &rsa,
            SignatureAlgorithmId::RsaSsaPkcs1v1_5WithSha2_256,
            message
        )
        .unwrap();
        let PrivateKey::Rsa(private) = &rsa else {
            unreachable!()
        };
        rsa::RsaPublicKey::from(private.clone())
            .verify(
                Pkcs1v15Sign::new::<Sha256>(),
                &Sha256::digest(message),
                &signature
            )
            .unwrap();
    }

    #[test]
    fn mismatched_key_and_algorithm_is_rejected() {
        assert!(matches!(
            sign_v2(
                &key(EC_P256_PEM),
                SignatureAlgorithmId::RsaSsaPkcs1v1_5WithSha2_256,
                b"m"
            ),
            Err(SealError::UnsupportedKey(_))
        ));
    }
}
