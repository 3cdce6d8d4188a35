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

//! Most of this crate is concerned with APK Signature Scheme v2, but this
//! module handles Signature Scheme v1, aka. Signed JAR File format: the
//! output META-INF/MANIFEST.MF, one .SF file per signer mirroring it, and
//! one PKCS#7 signature block per signer covering the .SF.

use std::collections::{BTreeMap, BTreeSet};

use rasn::types::Integer;
use rasn::types::Oid;
use rasn::{Decode, Encode};
use rasn_cms::algorithms::RSA;
use rasn_cms::ContentInfo;
use rasn_cms::{
    pkcs7_compat::SignedData, Certificate, CertificateChoices, IssuerAndSerialNumber,
    SignerIdentifier, SignerInfo
};
use seal_common::*;

use crate::{
    algorithms::DigestAlgorithm,
    crypto,
    crypto_keys::{KeyKind, PrivateKey}
};

const OID_SHA256: &Oid =
    rasn::types::Oid::JOINT_ISO_ITU_T_COUNTRY_US_ORGANIZATION_GOV_CSOR_NIST_ALGORITHMS_HASH_SHA256;
const OID_SHA1: &Oid = Oid::const_new(&[1, 3, 14, 3, 2, 26]);
const OID_ECDSA_WITH_SHA256: &Oid = Oid::const_new(&[1, 2, 840, 10045, 4, 3, 2]);
const OID_PKCS7_DATA: &Oid = rasn::types::Oid::ISO_MEMBER_BODY_US_RSADSI_PKCS7_DATA;
const OID_PKCS7_SIGNED_DATA: &Oid = rasn::types::Oid::ISO_MEMBER_BODY_US_RSADSI_PKCS7_SIGNED_DATA;

pub const MANIFEST_ENTRY_NAME: &str = "META-INF/MANIFEST.MF";

const METAINF_DIR: &str = "META-INF/";

/// One signer's v1 configuration, derived from the engine-level signer
/// configuration once the signature digest algorithm has been selected.
#[derive(Clone)]
pub struct V1SignerConfig {
    /// Safe signer name, used as the base of the signature file names
    pub name: String,
    pub private_key: PrivateKey,
    /// Certificate chain in ASN.1 DER form; the first entry belongs to
    /// `private_key`
    pub certificates: Vec<Vec<u8>>,
    pub signature_digest_algorithm: DigestAlgorithm
}

impl V1SignerConfig {
    pub fn signature_file_entry_name(&self) -> String {
        format!("{}{}.SF", METAINF_DIR, self.name)
    }

    pub fn signature_block_entry_name(&self) -> String {
        format!(
            "{}{}.{}",
            METAINF_DIR,
            self.name,
            self.private_key.kind().signature_block_extension()
        )
    }
}

/// Maps a signer's logical name onto the restricted character set JAR
/// signature file names allow: uppercased, `[A-Z0-9_-]`, at most 8 chars,
/// everything else replaced with `_`.
pub fn safe_signer_name(name: &str) -> String {
    name.to_uppercase()
        .chars()
        .take(8)
        .map(|c| match c {
            'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_'
        })
        .collect()
}

/// Whether a JAR entry must be digested into the output manifest.
///
/// Directories and the signature-related files in the top-level META-INF/
/// directory are not covered; everything else is.
pub fn is_entry_digest_needed_in_manifest(entry_name: &str) -> bool {
    if entry_name.ends_with('/') {
        return false;
    }
    let Some(file_name) = entry_name.strip_prefix(METAINF_DIR) else {
        return true;
    };
    // Subdirectories of META-INF/ are covered
    if file_name.contains('/') {
        return true;
    }
    let lower = file_name.to_lowercase();
    !(lower == "manifest.mf"
        || lower.ends_with(".sf")
        || lower.ends_with(".rsa")
        || lower.ends_with(".dsa")
        || lower.ends_with(".ec")
        || lower.starts_with("sig-"))
}

/// Entry names the engine will emit as the v1 signature.
pub fn output_entry_names(signers: &[V1SignerConfig]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    names.insert(MANIFEST_ENTRY_NAME.to_string());
    for signer in signers {
        names.insert(signer.signature_file_entry_name());
        names.insert(signer.signature_block_entry_name());
    }
    names
}

/// A generated output manifest, kept alongside the byte ranges of its
/// per-entry sections so signature files can digest them individually.
pub struct OutputManifest {
    pub contents: Vec<u8>,
    pub individual_sections: BTreeMap<String, Vec<u8>>
}

/// Builds the output MANIFEST.MF from the per-entry content digests.
///
/// When the input APK carried a manifest, its main section is borrowed
/// verbatim so attributes like `Created-By` round-trip; the per-entry
/// sections are always regenerated, in entry name order.
pub fn generate_manifest_file(
    content_digest: DigestAlgorithm,
    entry_digests: &BTreeMap<String, Vec<u8>>,
    input_manifest: Option<&[u8]>
) -> OutputManifest {
    let mut contents = match input_manifest {
        Some(bytes) if !bytes.is_empty() => borrow_main_section(bytes),
        _ => b"Manifest-Version: 1.0\r\n\r\n".to_vec()
    };

    let mut individual_sections = BTreeMap::new();
    for (entry_name, digest) in entry_digests {
        let section = format!(
            "Name: {}\r\n{}: {}\r\n\r\n",
            entry_name,
            content_digest.entry_attribute_name(),
            base64(digest)
        )
        .into_bytes();
        contents.extend_from_slice(&section);
        individual_sections.insert(entry_name.clone(), section);
    }

    OutputManifest {
        contents,
        individual_sections
    }
}

// The main section is everything up to and including the first blank line
fn borrow_main_section(input_manifest: &[u8]) -> Vec<u8> {
    if let Some(end) = find(input_manifest, b"\r\n\r\n") {
        return input_manifest[..end + 4].to_vec();
    }
    if let Some(end) = find(input_manifest, b"\n\n") {
        return input_manifest[..end + 2].to_vec();
    }
    // A manifest with no entries may lack the separating blank line
    let mut section = input_manifest.to_vec();
    section.extend_from_slice(b"\r\n\r\n");
    section
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn base64(data: &[u8]) -> String {
    use base64::{prelude::BASE64_STANDARD, Engine};
    BASE64_STANDARD.encode(data)
}

/// Builds one signer's .SF file: its own digest of the whole manifest and of
/// every per-entry section, under the signer's signature digest algorithm.
///
/// `scheme_ids` lists the outer signature schemes that will also be applied;
/// Android refuses to fall back to v1 when the header announces them, which
/// protects against signature stripping.
pub fn generate_signature_file(
    scheme_ids: &[u32],
    digest: DigestAlgorithm,
    created_by: &str,
    manifest: &OutputManifest
) -> Vec<u8> {
    let mut sf = format!("Signature-Version: 1.0\r\nCreated-By: {created_by}\r\n");
    if !scheme_ids.is_empty() {
        let ids = scheme_ids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        sf.push_str(&format!("X-Android-APK-Signed: {ids}\r\n"));
    }
    sf.push_str(&format!(
        "{}: {}\r\n\r\n",
        digest.manifest_attribute_name(),
        digest.base64_digest(&manifest.contents)
    ));

    for (entry_name, section) in &manifest.individual_sections {
        sf.push_str(&format!(
            "Name: {}\r\n{}: {}\r\n\r\n",
            entry_name,
            digest.entry_attribute_name(),
            digest.base64_digest(section)
        ));
    }

    sf.into_bytes()
}

/// Generates the complete v1 signature: manifest plus per-signer files.
/// Returned in the order they should be written to the output APK.
pub fn sign(
    signers: &[V1SignerConfig],
    content_digest: DigestAlgorithm,
    entry_digests: &BTreeMap<String, Vec<u8>>,
    scheme_ids: &[u32],
    input_manifest: Option<&[u8]>,
    created_by: &str
) -> Result<Vec<(String, Vec<u8>)>> {
    let manifest = generate_manifest_file(content_digest, entry_digests, input_manifest);
    sign_manifest(signers, scheme_ids, created_by, &manifest)
}

/// Like [sign], but over an already generated manifest.
pub fn sign_manifest(
    signers: &[V1SignerConfig],
    scheme_ids: &[u32],
    created_by: &str,
    manifest: &OutputManifest
) -> Result<Vec<(String, Vec<u8>)>> {
    let mut entries = Vec::with_capacity(1 + 2 * signers.len());
    entries.push((MANIFEST_ENTRY_NAME.to_string(), manifest.contents.clone()));
    for signer in signers {
        let sf = generate_signature_file(
            scheme_ids,
            signer.signature_digest_algorithm,
            created_by,
            manifest
        );
        let block = generate_signature_block(signer, &sf)?;
        entries.push((signer.signature_file_entry_name(), sf));
        entries.push((signer.signature_block_entry_name(), block));
    }
    Ok(entries)
}

// PKCS#7 SignedData over the .SF bytes, detached content, no signed
// attributes. Android's JAR verifier digests the .SF entry itself.
fn generate_signature_block(signer: &V1SignerConfig, sf: &[u8]) -> Result<Vec<u8>> {
    let signature = crypto::sign_v1(
        &signer.private_key,
        signer.signature_digest_algorithm,
        sf
    )?;

    let mut chain = Vec::with_capacity(signer.certificates.len());
    for der in &signer.certificates {
        chain.push(Certificate::decode(&mut rasn::ber::de::Decoder::new(
            der,
            rasn::ber::de::DecoderOptions::der()
        ))?);
    }
    let signer_cert = chain[0].clone();

    let digest_oid = match signer.signature_digest_algorithm {
        DigestAlgorithm::Sha1 => OID_SHA1,
        DigestAlgorithm::Sha256 => OID_SHA256
    };
    let signature_oid = match signer.private_key.kind() {
        KeyKind::Rsa => RSA,
        KeyKind::EcdsaP256 => OID_ECDSA_WITH_SHA256
    };

    let signer_info = SignerInfo {
        version: Integer::from(1),
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: signer_cert.tbs_certificate.issuer.clone(),
            serial_number: signer_cert.tbs_certificate.serial_number.clone()
        }),
        digest_algorithm: rasn_cms::AlgorithmIdentifier {
            algorithm: digest_oid.into(),
            parameters: None
        },
        signed_attrs: None,
        signature_algorithm: rasn_cms::AlgorithmIdentifier {
            algorithm: signature_oid.into(),
            parameters: None
        },
        signature: signature.into(),
        unsigned_attrs: None
    };

    let signed_data = SignedData {
        version: Integer::from(1),
        digest_algorithms: vec![rasn_cms::AlgorithmIdentifier {
            algorithm: digest_oid.into(),
            parameters: None
        }]
        .into_iter()
        .collect(),
        encap_content_info: rasn_cms::pkcs7_compat::EncapsulatedContentInfo {
            content_type: OID_PKCS7_DATA.into(),
            content: None
        },
        certificates: Some(
            chain
                .into_iter()
                .map(|cert| CertificateChoices::Certificate(Box::new(cert)))
                .collect()
        ),
        crls: None,
        signer_infos: vec![signer_info].into_iter().collect()
    };

    let mut inner_encoder = rasn::der::enc::Encoder::new(rasn::der::enc::EncoderOptions::der());
    signed_data.encode(&mut inner_encoder)?;
    let inner_vec = inner_encoder.output();

    let wrapper = ContentInfo {
        content_type: OID_PKCS7_SIGNED_DATA.into(),
        content: rasn::types::Any::new(inner_vec)
    };

    let mut outer_encoder = rasn::der::enc::Encoder::new(rasn::der::enc::EncoderOptions::der());
    wrapper.encode(&mut outer_encoder)?;

    Ok(outer_encoder.output())
}
