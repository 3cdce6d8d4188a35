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

//! The signing engine: a stateful orchestrator between the driver's ZIP
//! read/write loop and the two signature schemes.
//!
//! The engine produces a signed APK as follows:
//! 1. It instructs its driver which input JAR entries to copy to the output:
//!    entries the v1 signature must not cover are dropped, entries the
//!    engine will synthesise itself are claimed as engine-owned.
//! 2. With v1 signing enabled, it inspects the output entries to compute
//!    their digests for the output META-INF/MANIFEST.MF, borrows the main
//!    section of the input manifest, then emits the v1 signature entries
//!    for the driver to write.
//! 3. With v2 signing enabled, it computes an APK Signing Block over the
//!    final ZIP sections for the driver to splice in before the central
//!    directory.
//!
//! Any driver-reported mutation of the output re-arms the affected schemes;
//! the engine re-emits on the next request, reusing previous v1 work when
//! the regenerated manifest proves nothing changed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use seal_common::*;

use crate::{
    algorithms::DigestAlgorithm,
    crypto,
    crypto_keys::PrivateKey,
    inspect::InspectRequest,
    manifest,
    signing_block::{self, V2SignerConfig},
    v1_signing::{self, V1SignerConfig}
};

/// Configuration of one signer.
#[derive(Clone)]
pub struct SignerConfig {
    name: String,
    private_key: PrivateKey,
    certificates: Vec<Vec<u8>>
}

impl SignerConfig {
    /// `name` is reflected in the names of the JAR signature files. The
    /// first certificate of `certificates` (ASN.1 DER) must belong to
    /// `private_key`.
    pub fn new(
        name: impl Into<String>,
        private_key: PrivateKey,
        certificates: Vec<Vec<u8>>
    ) -> Result<SignerConfig> {
        let name = name.into();
        if name.is_empty() {
            return Err(SealError::Config("signer name must not be empty".to_string()));
        }
        if certificates.is_empty() {
            return Err(SealError::Config(format!(
                "signer {name} needs at least one certificate"
            )));
        }
        Ok(SignerConfig {
            name,
            private_key,
            certificates
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// What the driver should do with an input JAR entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPolicy {
    /// Copy the entry to the output unchanged
    PassThrough,
    /// Do not copy the entry to the output
    Drop,
    /// The engine will emit this entry itself; do not copy the input version
    EngineOwned
}

/// Instructions for one input JAR entry: the output policy plus, when the
/// engine wants to see the entry's bytes, an inspection request to stream
/// them into.
pub struct InputEntryInstructions {
    pub policy: OutputPolicy,
    pub inspect: Option<InspectRequest>
}

/// One entry of the emitted v1 signature.
#[derive(Clone)]
pub struct JarEntry {
    pub name: String,
    pub data: Vec<u8>
}

/// Emitted v1 signature entries, in the order they should be written. The
/// driver acknowledges writing them by calling [done](Self::done).
#[derive(Clone)]
pub struct OutputJarSignatureRequest {
    entries: Arc<Vec<JarEntry>>,
    fulfilled: Arc<AtomicBool>
}

impl OutputJarSignatureRequest {
    fn new(entries: Vec<JarEntry>) -> OutputJarSignatureRequest {
        OutputJarSignatureRequest {
            entries: Arc::new(entries),
            fulfilled: Arc::new(AtomicBool::new(false))
        }
    }

    pub fn additional_entries(&self) -> &[JarEntry] {
        &self.entries
    }

    pub fn done(&self) {
        self.fulfilled.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.fulfilled.load(Ordering::Acquire)
    }
}

/// An emitted APK Signing Block. The driver inserts `padding_before` zero
/// bytes after the last ZIP entry, then the block, then the central
/// directory, and acknowledges with [done](Self::done).
#[derive(Clone)]
pub struct OutputSigningBlockRequest {
    block: Arc<Vec<u8>>,
    padding_before: u32,
    fulfilled: Arc<AtomicBool>
}

impl OutputSigningBlockRequest {
    fn new(block: Vec<u8>, padding_before: u32) -> OutputSigningBlockRequest {
        OutputSigningBlockRequest {
            block: Arc::new(block),
            padding_before,
            fulfilled: Arc::new(AtomicBool::new(false))
        }
    }

    pub fn signing_block(&self) -> &[u8] {
        &self.block
    }

    pub fn padding_before(&self) -> u32 {
        self.padding_before
    }

    pub fn done(&self) {
        self.fulfilled.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.fulfilled.load(Ordering::Acquire)
    }
}

// The signer collection with everything derived from it: per-signer v1
// digest algorithms, the engine-wide content digest (strongest across
// signers, so nobody's coverage is weakened), and the v1 entry names the
// engine will emit.
struct SignerSet {
    configs: Vec<SignerConfig>,
    v1_signers: Vec<V1SignerConfig>,
    v1_content_digest: Option<DigestAlgorithm>,
    expected_v1_entry_names: BTreeSet<String>
}

impl SignerSet {
    fn new(configs: Vec<SignerConfig>, min_sdk_version: i32, v1_enabled: bool) -> Result<SignerSet> {
        let mut v1_signers = Vec::new();
        let mut v1_content_digest = None;
        let mut expected_v1_entry_names = BTreeSet::new();

        if v1_enabled {
            let mut name_to_index: BTreeMap<String, usize> = BTreeMap::new();
            for (index, config) in configs.iter().enumerate() {
                let safe_name = v1_signing::safe_signer_name(&config.name);
                if let Some(other) = name_to_index.insert(safe_name.clone(), index) {
                    return Err(SealError::Config(format!(
                        "signers #{} and #{} have the same name: {}. v1 signer names must be \
                         unique",
                        other + 1,
                        index + 1,
                        safe_name
                    )));
                }

                let signature_digest =
                    crypto::v1_signature_digest_algorithm(&config.private_key, min_sdk_version)?;
                v1_content_digest = Some(match v1_content_digest {
                    None => signature_digest,
                    Some(strongest) => signature_digest.max(strongest)
                });
                v1_signers.push(V1SignerConfig {
                    name: safe_name,
                    private_key: config.private_key.clone(),
                    certificates: config.certificates.clone(),
                    signature_digest_algorithm: signature_digest
                });
            }
            expected_v1_entry_names = v1_signing::output_entry_names(&v1_signers);
        }

        Ok(SignerSet {
            configs,
            v1_signers,
            v1_content_digest,
            expected_v1_entry_names
        })
    }

    fn v2_configs(&self) -> Vec<V2SignerConfig> {
        self.configs
            .iter()
            .map(|config| V2SignerConfig {
                private_key: config.private_key.clone(),
                certificates: config.certificates.clone(),
                algorithms: crypto::v2_signature_algorithms(&config.private_key)
            })
            .collect()
    }
}

/// Builder of [SignerEngine] instances.
pub struct SignerEngineBuilder {
    signers: Vec<SignerConfig>,
    min_sdk_version: i32,
    v1_enabled: bool,
    v2_enabled: bool,
    debuggable_permitted: bool,
    other_signers_preserved: bool,
    created_by: String
}

impl SignerEngineBuilder {
    /// `min_sdk_version` is the API Level of the oldest Android release the
    /// APK supports; the higher it is, the stronger the algorithms the
    /// engine selects.
    pub fn new(signers: Vec<SignerConfig>, min_sdk_version: i32) -> SignerEngineBuilder {
        SignerEngineBuilder {
            signers,
            min_sdk_version,
            v1_enabled: true,
            v2_enabled: true,
            debuggable_permitted: true,
            other_signers_preserved: false,
            created_by: "1.0 (Android)".to_string()
        }
    }

    /// Whether to sign with the JAR signing scheme (v1). On by default.
    pub fn v1_signing_enabled(mut self, enabled: bool) -> Self {
        self.v1_enabled = enabled;
        self
    }

    /// Whether to sign with APK Signature Scheme v2. On by default.
    pub fn v2_signing_enabled(mut self, enabled: bool) -> Self {
        self.v2_enabled = enabled;
        self
    }

    /// Whether APKs declaring `android:debuggable="true"` may be signed.
    /// Permitted by default for backward compatibility; debuggable APKs run
    /// with loosened platform security checks, so release keys should set
    /// this to `false`.
    pub fn debuggable_apk_permitted(mut self, permitted: bool) -> Self {
        self.debuggable_permitted = permitted;
        self
    }

    /// Whether signatures by other signers found in the input APK should be
    /// carried over. Recognised but not implemented; `build` rejects `true`.
    pub fn other_signers_signatures_preserved(mut self, preserved: bool) -> Self {
        self.other_signers_preserved = preserved;
        self
    }

    /// Value of the `Created-By` field in the emitted JAR signature files.
    pub fn created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = created_by.into();
        self
    }

    pub fn build(self) -> Result<SignerEngine> {
        if self.signers.is_empty() {
            return Err(SealError::Config(
                "at least one signer config must be provided".to_string()
            ));
        }
        if self.min_sdk_version < 1 {
            return Err(SealError::Config(format!(
                "minSdkVersion must be at least 1, got {}",
                self.min_sdk_version
            )));
        }
        if self.other_signers_preserved {
            return Err(SealError::Unsupported(
                "preserving other signers' signatures is not yet implemented".to_string()
            ));
        }

        let signers = SignerSet::new(self.signers, self.min_sdk_version, self.v1_enabled)?;

        Ok(SignerEngine {
            v1_enabled: self.v1_enabled,
            v2_enabled: self.v2_enabled,
            debuggable_permitted: self.debuggable_permitted,
            created_by: self.created_by,
            signers,
            closed: false,
            v1_pending: self.v1_enabled,
            v2_pending: self.v2_enabled,
            output_entry_digest_requests: BTreeMap::new(),
            output_entry_digests: BTreeMap::new(),
            emitted_signature_entries: BTreeMap::new(),
            output_signature_requests: BTreeMap::new(),
            input_manifest_request: None,
            output_android_manifest_request: None,
            debuggable: None,
            v1_artifact: None,
            v2_artifact: None
        })
    }
}

/// The APK signing engine. See the module documentation for the protocol.
pub struct SignerEngine {
    v1_enabled: bool,
    v2_enabled: bool,
    debuggable_permitted: bool,
    created_by: String,
    signers: SignerSet,

    closed: bool,
    v1_pending: bool,
    v2_pending: bool,

    /// Digest requests for output entries covered by the v1 signature.
    output_entry_digest_requests: BTreeMap<String, InspectRequest>,
    /// Digests of output entries, keyed by entry name.
    output_entry_digests: BTreeMap<String, Vec<u8>>,
    /// Exact bytes of the v1 entries this engine last emitted.
    emitted_signature_entries: BTreeMap<String, Vec<u8>>,
    /// Requests observing what the driver actually wrote for those entries.
    output_signature_requests: BTreeMap<String, InspectRequest>,
    /// Request caching the manifest whose main section is borrowed.
    input_manifest_request: Option<InspectRequest>,
    /// Request caching the output AndroidManifest.xml for the debuggable
    /// check.
    output_android_manifest_request: Option<InspectRequest>,
    /// Parsed debuggable bit, reset whenever AndroidManifest.xml is rewritten.
    debuggable: Option<bool>,

    v1_artifact: Option<OutputJarSignatureRequest>,
    v2_artifact: Option<OutputSigningBlockRequest>
}

impl SignerEngine {
    /// Tells the engine the input APK carried an APK Signing Block.
    ///
    /// Foreign blocks are replaced wholesale; preserving them is rejected at
    /// build time. The call still invalidates any emitted v2 signature, as
    /// it implies the surrounding layout is in flux.
    pub fn input_apk_signing_block(&mut self, signing_block: &[u8]) -> Result<()> {
        self.check_not_closed()?;
        if signing_block.is_empty() {
            return Ok(());
        }
        self.invalidate_v2_signature();
        Ok(())
    }

    /// Classifies an input JAR entry and, for the input manifest, requests
    /// its bytes so the main section can be borrowed into the output.
    pub fn input_jar_entry(&mut self, entry_name: &str) -> Result<InputEntryInstructions> {
        self.check_not_closed()?;

        let policy = self.input_entry_policy(entry_name);
        if policy == OutputPolicy::EngineOwned && entry_name == v1_signing::MANIFEST_ENTRY_NAME {
            // Borrowing the main section invalidates v1, so the entry's data
            // is needed
            let request = InspectRequest::buffer(entry_name);
            self.input_manifest_request = Some(request.clone());
            return Ok(InputEntryInstructions {
                policy,
                inspect: Some(request)
            });
        }
        Ok(InputEntryInstructions {
            policy,
            inspect: None
        })
    }

    /// Like [input_jar_entry](Self::input_jar_entry)'s policy, for an entry
    /// removed from the input.
    pub fn input_jar_entry_removed(&mut self, entry_name: &str) -> Result<OutputPolicy> {
        self.check_not_closed()?;
        Ok(self.input_entry_policy(entry_name))
    }

    /// Tells the engine an entry was written to the output. Returns an
    /// inspection request when the engine needs to see the entry's
    /// uncompressed bytes.
    pub fn output_jar_entry(&mut self, entry_name: &str) -> Result<Option<InspectRequest>> {
        self.check_not_closed()?;
        self.invalidate_v2_signature();

        let is_android_manifest = entry_name == manifest::ANDROID_MANIFEST_ENTRY_NAME;
        if !self.debuggable_permitted && is_android_manifest {
            // A rewritten manifest may flip the bit
            self.debuggable = None;
        }

        if !self.v1_enabled {
            // Without v1 only the debuggable check ever reads entry data
            if !self.debuggable_permitted && is_android_manifest {
                let request = InspectRequest::buffer(entry_name);
                self.output_android_manifest_request = Some(request.clone());
                return Ok(Some(request));
            }
            return Ok(None);
        }

        if v1_signing::is_entry_digest_needed_in_manifest(entry_name) {
            // Covered by v1: the entry's digest goes into the output manifest
            self.invalidate_v1_signature();
            let content_digest = self.v1_content_digest()?;
            let digest_request = InspectRequest::digest(entry_name, content_digest);
            self.output_entry_digest_requests
                .insert(entry_name.to_string(), digest_request.clone());
            self.output_entry_digests.remove(entry_name);

            if !self.debuggable_permitted && is_android_manifest {
                let data_request = InspectRequest::buffer(entry_name);
                self.output_android_manifest_request = Some(data_request.clone());
                return Ok(Some(InspectRequest::fan_out(
                    entry_name,
                    vec![data_request, digest_request]
                )));
            }
            return Ok(Some(digest_request));
        }

        if self.signers.expected_v1_entry_names.contains(entry_name) {
            // Part of the v1 signature this engine emits. Watch what the
            // driver wrote so stable output can be detected.
            self.invalidate_v1_signature();
            let data_request = if entry_name == v1_signing::MANIFEST_ENTRY_NAME {
                let request = InspectRequest::buffer(entry_name);
                self.input_manifest_request = Some(request.clone());
                Some(request)
            } else if self.emitted_signature_entries.contains_key(entry_name) {
                Some(InspectRequest::buffer(entry_name))
            } else {
                None
            };
            if let Some(request) = &data_request {
                self.output_signature_requests
                    .insert(entry_name.to_string(), request.clone());
            }
            return Ok(data_request);
        }

        Ok(None)
    }

    /// Tells the engine an entry was removed from the output.
    pub fn output_jar_entry_removed(&mut self, entry_name: &str) -> Result<()> {
        self.check_not_closed()?;
        self.invalidate_v2_signature();
        if !self.v1_enabled {
            return Ok(());
        }

        if v1_signing::is_entry_digest_needed_in_manifest(entry_name) {
            self.invalidate_v1_signature();
            self.output_entry_digests.remove(entry_name);
            self.output_entry_digest_requests.remove(entry_name);
            self.output_signature_requests.remove(entry_name);
            return Ok(());
        }

        if self.signers.expected_v1_entry_names.contains(entry_name) {
            self.invalidate_v1_signature();
        }
        Ok(())
    }

    /// Emits the v1 signature once every outstanding inspection request is
    /// done. Returns `None` when there is nothing to add: v1 signing is
    /// disabled, not yet invalidated, or the output already carries exactly
    /// what the engine emitted before.
    pub fn output_jar_entries(&mut self) -> Result<Option<OutputJarSignatureRequest>> {
        self.check_not_closed()?;

        if !self.v1_pending {
            return Ok(None);
        }

        if let Some(request) = &self.input_manifest_request {
            if !request.is_done() {
                return Err(SealError::State(format!(
                    "still waiting to inspect input APK's {}",
                    request.entry_name()
                )));
            }
        }
        for (entry_name, request) in &self.output_entry_digest_requests {
            if !request.is_done() {
                return Err(SealError::State(format!(
                    "still waiting to inspect output APK's {entry_name}"
                )));
            }
        }
        for (entry_name, request) in &self.output_signature_requests {
            if !request.is_done() {
                return Err(SealError::State(format!(
                    "still waiting to inspect output APK's {entry_name}"
                )));
            }
        }

        // Consolidate the finished digests
        for (entry_name, request) in std::mem::take(&mut self.output_entry_digest_requests) {
            self.output_entry_digests
                .insert(entry_name, request.digest_value()?);
        }

        self.check_output_not_debuggable()?;

        let scheme_ids: Vec<u32> = if self.v2_enabled { vec![2] } else { vec![] };
        let input_manifest = match &self.input_manifest_request {
            Some(request) => Some(request.data()?),
            None => None
        };
        let content_digest = self.v1_content_digest()?;

        let previously_fulfilled = self
            .v1_artifact
            .as_ref()
            .map(OutputJarSignatureRequest::is_done)
            .unwrap_or(false);

        let signature_entries = if !previously_fulfilled {
            // Cold start, or the driver never wrote the previous emission
            v1_signing::sign(
                &self.signers.v1_signers,
                content_digest,
                &self.output_entry_digests,
                &scheme_ids,
                input_manifest.as_deref(),
                &self.created_by
            )?
        } else {
            let new_manifest = v1_signing::generate_manifest_file(
                content_digest,
                &self.output_entry_digests,
                input_manifest.as_deref()
            );
            let emitted_manifest = self
                .emitted_signature_entries
                .get(v1_signing::MANIFEST_ENTRY_NAME);
            if Some(&new_manifest.contents) != emitted_manifest {
                // Emitted v1 signature is no longer valid
                v1_signing::sign_manifest(
                    &self.signers.v1_signers,
                    &scheme_ids,
                    &self.created_by,
                    &new_manifest
                )?
            } else {
                // Emitted v1 signature is still valid. Re-emit whatever the
                // driver hasn't faithfully written.
                let mut missing = Vec::new();
                for (entry_name, expected) in &self.emitted_signature_entries {
                    match self.output_signature_requests.get(entry_name) {
                        None => missing.push((entry_name.clone(), expected.clone())),
                        Some(observed) => {
                            if observed.data()? != *expected {
                                missing.push((entry_name.clone(), expected.clone()));
                            }
                        }
                    }
                }
                missing
            }
        };

        if signature_entries.is_empty() {
            // v1 signature in the output is valid as-is
            self.v1_pending = false;
            return Ok(None);
        }

        let mut entries = Vec::with_capacity(signature_entries.len());
        for (entry_name, data) in signature_entries {
            self.emitted_signature_entries
                .insert(entry_name.clone(), data.clone());
            entries.push(JarEntry {
                name: entry_name,
                data
            });
        }
        let request = OutputJarSignatureRequest::new(entries);
        self.v1_artifact = Some(request.clone());
        Ok(Some(request))
    }

    /// Emits the APK Signing Block over the final ZIP sections. v1 signing,
    /// when enabled, must have been fulfilled first: the v1 entries are part
    /// of the bytes being signed.
    ///
    /// `padding_supported` governs whether the entries region may be padded
    /// to Android's 4 KiB page alignment before the block.
    pub fn output_zip_sections(
        &mut self,
        zip_entries: &[u8],
        zip_central_directory: &[u8],
        zip_eocd: &[u8],
        padding_supported: bool
    ) -> Result<Option<OutputSigningBlockRequest>> {
        self.check_not_closed()?;
        self.check_v1_done_if_enabled()?;
        if !self.v2_enabled {
            return Ok(None);
        }
        self.invalidate_v2_signature();
        self.check_output_not_debuggable()?;

        let output = signing_block::generate_v2_block(
            zip_entries,
            zip_central_directory,
            zip_eocd,
            &self.signers.v2_configs(),
            padding_supported
        )?;
        let request = OutputSigningBlockRequest::new(output.block, output.padding_before);
        self.v2_artifact = Some(request.clone());
        Ok(Some(request))
    }

    /// Verifies the driver fulfilled every emission. Fails when an emission
    /// was skipped, unacknowledged, or written with different bytes.
    pub fn output_done(&mut self) -> Result<()> {
        self.check_not_closed()?;
        self.check_v1_done_if_enabled()?;
        self.check_v2_done_if_enabled()?;
        Ok(())
    }

    /// Releases all buffered state. Every later operation fails.
    pub fn close(&mut self) {
        self.closed = true;
        self.v1_artifact = None;
        self.v2_artifact = None;
        self.input_manifest_request = None;
        self.output_android_manifest_request = None;
        self.debuggable = None;
        self.output_entry_digest_requests.clear();
        self.output_entry_digests.clear();
        self.emitted_signature_entries.clear();
        self.output_signature_requests.clear();
    }

    fn input_entry_policy(&self, entry_name: &str) -> OutputPolicy {
        if self.signers.expected_v1_entry_names.contains(entry_name) {
            return OutputPolicy::EngineOwned;
        }
        if v1_signing::is_entry_digest_needed_in_manifest(entry_name) {
            return OutputPolicy::PassThrough;
        }
        // Foreign signature files are dropped; that is how this engine
        // replaces them
        OutputPolicy::Drop
    }

    fn v1_content_digest(&self) -> Result<DigestAlgorithm> {
        self.signers.v1_content_digest.ok_or_else(|| {
            SealError::State("v1 signing is not enabled for this engine".to_string())
        })
    }

    fn invalidate_v1_signature(&mut self) {
        if self.v1_enabled {
            self.v1_pending = true;
        }
        self.invalidate_v2_signature();
    }

    fn invalidate_v2_signature(&mut self) {
        if self.v2_enabled {
            self.v2_pending = true;
            self.v2_artifact = None;
        }
    }

    fn check_not_closed(&self) -> Result<()> {
        if self.closed {
            return Err(SealError::State("engine closed".to_string()));
        }
        Ok(())
    }

    fn check_v1_done_if_enabled(&mut self) -> Result<()> {
        if !self.v1_pending {
            return Ok(());
        }

        let fulfilled = match &self.v1_artifact {
            None => {
                return Err(SealError::State(
                    "v1 signature (JAR signature) not yet generated. Skipped \
                     output_jar_entries()?"
                        .to_string()
                ))
            }
            Some(request) => request.is_done()
        };
        if !fulfilled {
            return Err(SealError::State(
                "v1 signature addition requested by output_jar_entries() hasn't been fulfilled"
                    .to_string()
            ));
        }

        for (entry_name, expected) in &self.emitted_signature_entries {
            let observed = self.output_signature_requests.get(entry_name).ok_or_else(|| {
                SealError::State(format!(
                    "APK entry {entry_name} not yet output despite this having been requested"
                ))
            })?;
            if !observed.is_done() {
                return Err(SealError::State(format!(
                    "still waiting to inspect output APK's {entry_name}"
                )));
            }
            if observed.data()? != *expected {
                return Err(SealError::State(format!(
                    "output APK entry {entry_name} data differs from what was requested"
                )));
            }
        }
        self.v1_pending = false;
        Ok(())
    }

    fn check_v2_done_if_enabled(&mut self) -> Result<()> {
        if !self.v2_pending {
            return Ok(());
        }
        let fulfilled = match &self.v2_artifact {
            None => {
                return Err(SealError::State(
                    "v2 signature (APK Signature Scheme v2 signature) not yet generated. \
                     Skipped output_zip_sections()?"
                        .to_string()
                ))
            }
            Some(request) => request.is_done()
        };
        if !fulfilled {
            return Err(SealError::State(
                "v2 signature addition requested by output_zip_sections() hasn't been fulfilled \
                 yet"
                .to_string()
            ));
        }
        self.v2_artifact = None;
        self.v2_pending = false;
        Ok(())
    }

    fn check_output_not_debuggable(&mut self) -> Result<()> {
        if self.debuggable_permitted {
            return Ok(());
        }
        if self.is_output_debuggable()? {
            return Err(SealError::DebuggableApk);
        }
        Ok(())
    }

    fn is_output_debuggable(&mut self) -> Result<bool> {
        if let Some(debuggable) = self.debuggable {
            return Ok(debuggable);
        }

        let request = self.output_android_manifest_request.as_ref().ok_or_else(|| {
            SealError::State(format!(
                "cannot determine debuggable status of output APK because {} entry contents \
                 have not yet been requested",
                manifest::ANDROID_MANIFEST_ENTRY_NAME
            ))
        })?;
        if !request.is_done() {
            return Err(SealError::State(format!(
                "still waiting to inspect output APK's {}",
                request.entry_name()
            )));
        }
        let debuggable = manifest::is_debuggable(&request.data()?)?;
        self.debuggable = Some(debuggable);
        Ok(debuggable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto_keys::Keys;

    const RSA_2048_PEM: &str = include_str!("../testdata/rsa-2048.pem");
    const EC_P256_PEM: &str = include_str!("../testdata/ec-p256.pem");

    fn signer(name: &str, pem: &str) -> SignerConfig {
        let keys = Keys::from_combined_pem_string(pem).unwrap();
        SignerConfig::new(name, keys.private_key, vec![keys.certificate]).unwrap()
    }

    #[test]
    fn builder_requires_a_signer() {
        assert!(matches!(
            SignerEngineBuilder::new(vec![], 18).build(),
            Err(SealError::Config(_))
        ));
    }

    #[test]
    fn builder_requires_a_positive_min_sdk() {
        assert!(matches!(
            SignerEngineBuilder::new(vec![signer("a", RSA_2048_PEM)], 0).build(),
            Err(SealError::Config(_))
        ));
    }

    #[test]
    fn signer_config_rejects_empty_names_and_missing_certs() {
        let keys = Keys::from_combined_pem_string(RSA_2048_PEM).unwrap();
        assert!(matches!(
            SignerConfig::new("", keys.private_key.clone(), vec![keys.certificate.clone()]),
            Err(SealError::Config(_))
        ));
        assert!(matches!(
            SignerConfig::new("a", keys.private_key, vec![]),
            Err(SealError::Config(_))
        ));
    }

    #[test]
    fn colliding_safe_names_are_rejected() {
        let configs = vec![signer("release 1", RSA_2048_PEM), signer("release.1", EC_P256_PEM)];
        assert!(matches!(
            SignerEngineBuilder::new(configs, 18).build(),
            Err(SealError::Config(_))
        ));
    }

    #[test]
    fn preserving_other_signers_is_unsupported() {
        let engine = SignerEngineBuilder::new(vec![signer("a", RSA_2048_PEM)], 18)
            .other_signers_signatures_preserved(true)
            .build();
        assert!(matches!(engine, Err(SealError::Unsupported(_))));
    }

    #[test]
    fn ec_keys_are_rejected_below_api_18_when_v1_is_enabled() {
        assert!(matches!(
            SignerEngineBuilder::new(vec![signer("a", EC_P256_PEM)], 17).build(),
            Err(SealError::UnsupportedKey(_))
        ));
        // Without v1 there is no v1 digest to select
        assert!(SignerEngineBuilder::new(vec![signer("a", EC_P256_PEM)], 17)
            .v1_signing_enabled(false)
            .build()
            .is_ok());
    }

    #[test]
    fn mixed_signers_use_the_strongest_content_digest() {
        let engine = SignerEngineBuilder::new(
            vec![signer("first", RSA_2048_PEM), signer("second", EC_P256_PEM)],
            18
        )
        .build()
        .unwrap();
        assert_eq!(
            engine.signers.v1_content_digest,
            Some(DigestAlgorithm::Sha256)
        );
    }

    #[test]
    fn input_entries_are_classified_by_policy() {
        let mut engine = SignerEngineBuilder::new(vec![signer("signer", RSA_2048_PEM)], 18)
            .build()
            .unwrap();

        let dex = engine.input_jar_entry("classes.dex").unwrap();
        assert_eq!(dex.policy, OutputPolicy::PassThrough);
        assert!(dex.inspect.is_none());

        // A foreign signature is dropped so this engine's replaces it
        let foreign = engine.input_jar_entry("META-INF/OTHER.SF").unwrap();
        assert_eq!(foreign.policy, OutputPolicy::Drop);

        let own = engine.input_jar_entry("META-INF/SIGNER.RSA").unwrap();
        assert_eq!(own.policy, OutputPolicy::EngineOwned);

        let manifest = engine.input_jar_entry("META-INF/MANIFEST.MF").unwrap();
        assert_eq!(manifest.policy, OutputPolicy::EngineOwned);
        assert!(manifest.inspect.is_some());

        assert_eq!(
            engine.input_jar_entry_removed("classes.dex").unwrap(),
            OutputPolicy::PassThrough
        );
    }

    #[test]
    fn every_operation_fails_after_close() {
        let mut engine = SignerEngineBuilder::new(vec![signer("signer", RSA_2048_PEM)], 18)
            .build()
            .unwrap();
        engine.close();

        assert!(matches!(
            engine.input_jar_entry("classes.dex"),
            Err(SealError::State(_))
        ));
        assert!(matches!(
            engine.output_jar_entry("classes.dex"),
            Err(SealError::State(_))
        ));
        assert!(matches!(
            engine.output_jar_entries(),
            Err(SealError::State(_))
        ));
        assert!(matches!(
            engine.output_zip_sections(b"", b"", b"", true),
            Err(SealError::State(_))
        ));
        assert!(matches!(engine.output_done(), Err(SealError::State(_))));
        assert!(matches!(
            engine.input_apk_signing_block(b""),
            Err(SealError::State(_))
        ));
    }
}
