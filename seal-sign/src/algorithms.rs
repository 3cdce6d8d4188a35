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

use base64::{prelude::BASE64_STANDARD, Engine};
use deku::prelude::*;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Digest algorithms usable in JAR (v1) signatures.
///
/// Variant order is strength order: when multiple signers suggest different
/// algorithms, the engine digests APK entries with the strongest one so that
/// no signer's content coverage is weakened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256
}

impl DigestAlgorithm {
    /// Attribute name of a JAR entry digest, e.g. `SHA-256-Digest: ...`
    pub fn entry_attribute_name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA1-Digest",
            DigestAlgorithm::Sha256 => "SHA-256-Digest"
        }
    }

    /// Attribute name of the whole-manifest digest carried in .SF files.
    pub fn manifest_attribute_name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA1-Digest-Manifest",
            DigestAlgorithm::Sha256 => "SHA-256-Digest-Manifest"
        }
    }

    pub fn hasher(self) -> ContentHasher {
        match self {
            DigestAlgorithm::Sha1 => ContentHasher::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => ContentHasher::Sha256(Sha256::new())
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    pub fn base64_digest(self, data: &[u8]) -> String {
        BASE64_STANDARD.encode(self.digest(data))
    }
}

/// A rolling hash under one of the v1 digest algorithms.
pub enum ContentHasher {
    Sha1(Sha1),
    Sha256(Sha256)
}

impl ContentHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Sha1(hasher) => hasher.update(data),
            ContentHasher::Sha256(hasher) => hasher.update(data)
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            ContentHasher::Sha1(hasher) => hasher.finalize().to_vec(),
            ContentHasher::Sha256(hasher) => hasher.finalize().to_vec()
        }
    }
}

// Named according to the APK Signature Scheme v2 doc
#[derive(Debug, PartialEq, Eq, Clone, Copy, DekuWrite)]
#[deku(id_type = "u32")]
pub enum SignatureAlgorithmId {
    #[deku(id = 0x0103)]
    RsaSsaPkcs1v1_5WithSha2_256,
    #[deku(id = 0x0104)]
    RsaSsaPkcs1v1_5WithSha2_512,
    #[deku(id = 0x0201)]
    EcdsaWithSha2_256
}

impl SignatureAlgorithmId {
    /// The chunked content digest this signature algorithm signs over.
    pub fn content_digest_kind(self) -> ChunkDigestKind {
        match self {
            SignatureAlgorithmId::RsaSsaPkcs1v1_5WithSha2_256 => ChunkDigestKind::Sha256,
            SignatureAlgorithmId::RsaSsaPkcs1v1_5WithSha2_512 => ChunkDigestKind::Sha512,
            SignatureAlgorithmId::EcdsaWithSha2_256 => ChunkDigestKind::Sha256
        }
    }
}

/// Digest families used by the v2 chunked content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChunkDigestKind {
    Sha256,
    Sha512
}
