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

//! APK signing engine.
//!
//! The heart of this crate is [engine::SignerEngine], a stateful orchestrator
//! driven by whoever owns the ZIP read/write loop. The driver reports input
//! and output JAR entries, streams entry bytes into the inspection requests
//! the engine hands back, and injects the signature artifacts the engine
//! emits: the JAR-style v1 signature entries (META-INF/MANIFEST.MF plus
//! per-signer .SF and PKCS#7 signature block files) and the v2 APK Signing
//! Block placed between the last ZIP entry and the central directory.
//!
//! APK Signature Scheme v2 based on
//! <https://source.android.com/docs/security/features/apksigning/v2>

pub mod algorithms;
mod crypto;
pub mod crypto_keys;
pub mod engine;
mod hasher;
pub mod inspect;
pub mod manifest;
pub mod signing_block;
mod signing_types;
pub mod v1_signing;

pub use algorithms::DigestAlgorithm;
pub use crypto_keys::{Keys, PrivateKey};
pub use engine::{
    InputEntryInstructions, JarEntry, OutputJarSignatureRequest, OutputPolicy,
    OutputSigningBlockRequest, SignerConfig, SignerEngine, SignerEngineBuilder
};
pub use inspect::InspectRequest;
