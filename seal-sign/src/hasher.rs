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

//! Chunked content digests for APK Signature Scheme v2.
//!
//! Each of the three final ZIP sections is split into 1 MB chunks; every
//! chunk is hashed with a one-byte magic and its length prefixed, then a
//! second level hashes the concatenation of all chunk digests. The sections
//! are digested as the file will look on disk, except that the EOCD handed
//! in here must already carry the central directory offset the file would
//! have WITHOUT the signing block.

use std::collections::{BTreeMap, BTreeSet};

use sha2::digest::FixedOutputReset;
use sha2::{Digest, Sha256, Sha512};

use crate::algorithms::ChunkDigestKind;

pub const BYTES_IN_1MB: u32 = 1024 * 1024;
pub const FIRST_LEVEL_CHUNK_MAGIC: &[u8] = &[0xa5];
pub const SECOND_LEVEL_CHUNK_MAGIC: &[u8] = &[0x5a];

/// Computes the top-level chunked digest of `sections` for every requested
/// digest family.
pub fn compute_chunked_digests(
    kinds: &BTreeSet<ChunkDigestKind>,
    sections: &[&[u8]]
) -> BTreeMap<ChunkDigestKind, Vec<u8>> {
    kinds
        .iter()
        .map(|kind| {
            let digest = match kind {
                ChunkDigestKind::Sha256 => chunked_digest::<Sha256>(sections),
                ChunkDigestKind::Sha512 => chunked_digest::<Sha512>(sections)
            };
            (*kind, digest)
        })
        .collect()
}

fn chunked_digest<D: Digest + FixedOutputReset>(sections: &[&[u8]]) -> Vec<u8> {
    let mut chunk_digests: Vec<Vec<u8>> = vec![];
    let mut hasher = D::new();

    for section in sections {
        // Chunks never span section boundaries
        for chunk in section.chunks(BYTES_IN_1MB as usize) {
            Digest::update(&mut hasher, FIRST_LEVEL_CHUNK_MAGIC);
            Digest::update(&mut hasher, (chunk.len() as u32).to_le_bytes());
            Digest::update(&mut hasher, chunk);
            chunk_digests.push(hasher.finalize_reset().to_vec());
        }
    }

    Digest::update(&mut hasher, SECOND_LEVEL_CHUNK_MAGIC);
    Digest::update(&mut hasher, (chunk_digests.len() as u32).to_le_bytes());
    for chunk_digest in &chunk_digests {
        Digest::update(&mut hasher, chunk_digest);
    }
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_manual_two_level_computation() {
        let entries = b"entries region".as_slice();
        let cd = b"central directory".as_slice();
        let eocd = b"eocd".as_slice();

        let mut kinds = BTreeSet::new();
        kinds.insert(ChunkDigestKind::Sha256);
        let digests = compute_chunked_digests(&kinds, &[entries, cd, eocd]);

        let chunk = |data: &[u8]| {
            let mut hasher = Sha256::new();
            hasher.update([0xa5]);
            hasher.update((data.len() as u32).to_le_bytes());
            hasher.update(data);
            hasher.finalize()
        };
        let mut top = Sha256::new();
        top.update([0x5a]);
        top.update(3u32.to_le_bytes());
        for section in [entries, cd, eocd] {
            top.update(chunk(section));
        }

        assert_eq!(digests[&ChunkDigestKind::Sha256], top.finalize().to_vec());
    }

    #[test]
    fn large_sections_split_at_the_megabyte() {
        let big = vec![7u8; BYTES_IN_1MB as usize + 1];
        let mut kinds = BTreeSet::new();
        kinds.insert(ChunkDigestKind::Sha512);
        // 2 chunks from the large section + 1 from the small one
        let digest = &compute_chunked_digests(&kinds, &[&big, b"x"])[&ChunkDigestKind::Sha512];
        assert_eq!(digest.len(), 64);

        let mut top = Sha512::new();
        let chunk = |data: &[u8]| {
            let mut hasher = Sha512::new();
            hasher.update([0xa5]);
            hasher.update((data.len() as u32).to_le_bytes());
            hasher.update(data);
            hasher.finalize()
        };
        top.update([0x5a]);
        top.update(3u32.to_le_bytes());
        top.update(chunk(&big[..BYTES_IN_1MB as usize]));
        top.update(chunk(&big[BYTES_IN_1MB as usize..]));
        top.update(chunk(b"x"));
        assert_eq!(digest, &top.finalize().to_vec());
    }

    #[test]
    fn empty_sections_contribute_no_chunks() {
        let mut kinds = BTreeSet::new();
        kinds.insert(ChunkDigestKind::Sha256);
        let digests = compute_chunked_digests(&kinds, &[b"", b"data", b""]);

        let mut chunk = Sha256::new();
        chunk.update([0xa5]);
        chunk.update(4u32.to_le_bytes());
        chunk.update(b"data");
        let mut top = Sha256::new();
        top.update([0x5a]);
        top.update(1u32.to_le_bytes());
        top.update(chunk.finalize());
        assert_eq!(digests[&ChunkDigestKind::Sha256], top.finalize().to_vec());
    }
}
