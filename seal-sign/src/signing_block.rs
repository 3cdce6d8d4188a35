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

//! Builds the APK Signing Block: the v2 scheme block computed over the
//! final ZIP sections, wrapped in the generic id/value envelope that sits
//! between the last ZIP entry and the central directory.

use std::collections::BTreeSet;
use std::io::{Cursor, Seek, SeekFrom, Write};

use deku::DekuContainerWrite;
use seal_common::*;

use crate::{
    algorithms::SignatureAlgorithmId,
    crypto,
    crypto_keys::PrivateKey,
    hasher,
    signing_types::{
        len_pfx_u32, len_pfx_u64, ApkSigningBlock, Digest, RawWrapper, Signature,
        SignatureSchemeV2Block, SignedData, Signer, SigningBlockIdValuePair, SigningBlockPairs
    }
};

pub const SIGNATURE_SCHEME_V2_BLOCK_ID: u32 = 0x7109871A;
pub const APK_SIGNING_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";

// Uncompressed entries are mapped straight into page caches, so the region
// before the signing block is kept page aligned when the driver supports it
pub const ANDROID_COMMON_PAGE_ALIGNMENT: usize = 4096;

const EOCD_MAGIC: &[u8; 4] = &[0x50, 0x4B, 0x05, 0x06];
const EOCD_MIN_SIZE: usize = 22;
const EOCD_CD_OFFSET_FIELD: u64 = 16;

/// One signer's v2 configuration.
#[derive(Clone)]
pub struct V2SignerConfig {
    pub private_key: PrivateKey,
    /// Certificate chain in ASN.1 DER form; the first entry belongs to
    /// `private_key`
    pub certificates: Vec<Vec<u8>>,
    pub algorithms: Vec<SignatureAlgorithmId>
}

/// A computed APK Signing Block plus the zero padding the driver must insert
/// between the last ZIP entry and the block.
pub struct V2Output {
    pub block: Vec<u8>,
    pub padding_before: u32
}

/// Computes the serialised APK Signing Block over the three final ZIP
/// sections.
///
/// The signatures cover the sections as they will appear on disk, with two
/// adjustments: the entries region includes the pre-block padding, and the
/// EOCD is digested with its central directory offset rewritten to where the
/// central directory would sit if there were no signing block. Android makes
/// the same adjustments before verifying.
pub fn generate_v2_block(
    entries: &[u8],
    central_directory: &[u8],
    eocd: &[u8],
    signers: &[V2SignerConfig],
    padding_supported: bool
) -> Result<V2Output> {
    let padding_before = if padding_supported {
        (ANDROID_COMMON_PAGE_ALIGNMENT - entries.len() % ANDROID_COMMON_PAGE_ALIGNMENT)
            % ANDROID_COMMON_PAGE_ALIGNMENT
    } else {
        0
    };
    let mut padded_entries = Vec::with_capacity(entries.len() + padding_before);
    padded_entries.extend_from_slice(entries);
    padded_entries.resize(entries.len() + padding_before, 0);

    let eocd_for_digest = copy_with_modified_cd_offset(eocd, padded_entries.len() as u32)?;

    let digest_kinds: BTreeSet<_> = signers
        .iter()
        .flat_map(|signer| &signer.algorithms)
        .map(|algorithm| algorithm.content_digest_kind())
        .collect();
    let content_digests = hasher::compute_chunked_digests(
        &digest_kinds,
        &[&padded_entries, central_directory, &eocd_for_digest]
    );

    let mut signer_blocks = Vec::with_capacity(signers.len());
    for signer in signers {
        let mut digests = Vec::with_capacity(signer.algorithms.len());
        for algorithm in &signer.algorithms {
            digests.push(len_pfx_u32(Digest {
                signature_algorithm_id: *algorithm,
                digest: len_pfx_u32(content_digests[&algorithm.content_digest_kind()].clone())?
            })?);
        }
        let mut certificates = Vec::with_capacity(signer.certificates.len());
        for certificate in &signer.certificates {
            certificates.push(len_pfx_u32(certificate.clone())?);
        }
        let signed_data = SignedData {
            digests: len_pfx_u32(digests)?,
            certificates: len_pfx_u32(certificates)?,
            additional_attributes: 0
        };

        // The signature does NOT include the signed data's length prefix
        let signed_data_bytes = RawWrapper {
            value: signed_data.clone()
        }
        .to_bytes()?;
        let mut signatures = Vec::with_capacity(signer.algorithms.len());
        for algorithm in &signer.algorithms {
            let signature = crypto::sign_v2(&signer.private_key, *algorithm, &signed_data_bytes)?;
            signatures.push(len_pfx_u32(Signature {
                signature_algorithm_id: *algorithm,
                signature: len_pfx_u32(signature)?
            })?);
        }

        signer_blocks.push(len_pfx_u32(Signer {
            signed_data: len_pfx_u32(signed_data)?,
            signatures: len_pfx_u32(signatures)?,
            public_key: len_pfx_u32(signer.private_key.public_key_der()?)?
        })?);
    }

    let scheme_block = SignatureSchemeV2Block {
        signers: len_pfx_u32(signer_blocks)?
    };

    let pairs = SigningBlockPairs {
        pairs: vec![len_pfx_u64(SigningBlockIdValuePair {
            id: SIGNATURE_SCHEME_V2_BLOCK_ID,
            value: scheme_block.to_bytes()?
        })?]
    };
    let pairs_length = pairs.to_bytes()?.len();
    // Plus size_of_self_counted plus magic
    let sig_block_size = (pairs_length + 8 + 16) as u64;

    let signing_block = ApkSigningBlock {
        size_of_self_not_counted: sig_block_size,
        pairs,
        size_of_self_counted: sig_block_size,
        magic: *APK_SIGNING_BLOCK_MAGIC
    };

    Ok(V2Output {
        block: signing_block.to_bytes()?,
        padding_before: padding_before as u32
    })
}

// Digesting pretends the signing block is absent, so the EOCD gets the
// central directory offset it would have in that file
fn copy_with_modified_cd_offset(eocd: &[u8], central_directory_offset: u32) -> Result<Vec<u8>> {
    if eocd.len() < EOCD_MIN_SIZE || &eocd[..4] != EOCD_MAGIC {
        return Err(SealError::ZipSectionsNotFound);
    }
    let mut modified = eocd.to_vec();
    let mut cursor = Cursor::new(&mut modified[..]);
    cursor.seek(SeekFrom::Start(EOCD_CD_OFFSET_FIELD))?;
    cursor.write_all(&central_directory_offset.to_le_bytes())?;
    Ok(modified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::ChunkDigestKind;
    use crate::crypto_keys::Keys;

    fn rsa_config() -> V2SignerConfig {
        let keys =
            Keys::from_combined_pem_string(include_str!("../testdata/rsa-2048.pem")).unwrap();
        let algorithms = crypto::v2_signature_algorithms(&keys.private_key);
        V2SignerConfig {
            private_key: keys.private_key,
            certificates: vec![keys.certificate],
            algorithms
        }
    }

    fn fake_eocd(cd_offset: u32) -> Vec<u8> {
        let mut eocd = vec![0u8; EOCD_MIN_SIZE];
        eocd[..4].copy_from_slice(EOCD_MAGIC);
        eocd[16..20].copy_from_slice(&cd_offset.to_le_bytes());
        eocd
    }

    #[test]
    fn envelope_has_sizes_magic_and_v2_pair() {
        let output = generate_v2_block(
            b"entries",
            b"central directory",
            &fake_eocd(7),
            &[rsa_config()],
            false
        )
        .unwrap();
        assert_eq!(output.padding_before, 0);

        let block = &output.block;
        let front_size = u64::from_le_bytes(block[..8].try_into().unwrap());
        assert_eq!(front_size as usize, block.len() - 8);
        let back_size =
            u64::from_le_bytes(block[block.len() - 24..block.len() - 16].try_into().unwrap());
        assert_eq!(front_size, back_size);
        assert_eq!(&block[block.len() - 16..], APK_SIGNING_BLOCK_MAGIC);

        // First pair: u64 length, then the v2 scheme id
        let pair_id = u32::from_le_bytes(block[16..20].try_into().unwrap());
        assert_eq!(pair_id, SIGNATURE_SCHEME_V2_BLOCK_ID);
    }

    #[test]
    fn pads_entries_region_to_page_alignment() {
        let entries = vec![1u8; 5000];
        let output = generate_v2_block(
            &entries,
            b"cd",
            &fake_eocd(5000),
            &[rsa_config()],
            true
        )
        .unwrap();
        assert_eq!(output.padding_before, 8192 - 5000);

        let aligned = vec![1u8; 8192];
        let aligned_output =
            generate_v2_block(&aligned, b"cd", &fake_eocd(8192), &[rsa_config()], true).unwrap();
        assert_eq!(aligned_output.padding_before, 0);
    }

    #[test]
    fn digests_cover_padded_entries_and_rewritten_eocd() {
        let entries = b"not a multiple of the page size".to_vec();
        let cd = b"central directory".to_vec();
        let eocd = fake_eocd(entries.len() as u32);
        let output =
            generate_v2_block(&entries, &cd, &eocd, &[rsa_config()], true).unwrap();

        let mut padded = entries.clone();
        padded.resize(entries.len() + output.padding_before as usize, 0);
        let rewritten = copy_with_modified_cd_offset(&eocd, padded.len() as u32).unwrap();
        let mut kinds = BTreeSet::new();
        kinds.insert(ChunkDigestKind::Sha256);
        let expected =
            hasher::compute_chunked_digests(&kinds, &[&padded, &cd, &rewritten])
                [&ChunkDigestKind::Sha256]
                .clone();

        // The signed data embeds the content digest verbatim
        assert!(output
            .block
            .windows(expected.len())
            .any(|window| window == expected));
    }

    #[test]
    fn rejects_a_truncated_eocd() {
        assert!(matches!(
            generate_v2_block(b"e", b"cd", b"bad", &[rsa_config()], false),
            Err(SealError::ZipSectionsNotFound)
        ));
    }
}
