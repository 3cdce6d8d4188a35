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

use std::{io, rc::Rc};

use deku::prelude::*;
use rsa::pkcs8;
use zip::result::ZipError;

/// Common error type making it easier to share `Result`s between SEAL crates.
///
/// In general designed to avoid needing utilities like `map_err`.
#[derive(Debug, Clone)]
pub enum SealError {
    /// The engine was configured in a way that can never produce a valid
    /// signature. For example, no signers were supplied, or two signers map
    /// to the same signature file name.
    Config(String),
    /// A signer's public key has no supported signature algorithm for the
    /// requested `min_sdk_version`. The message names the key and the reason.
    UnsupportedKey(String),
    /// The caller requested a feature the engine recognises but does not
    /// implement, such as preserving other signers' signatures.
    Unsupported(String),
    /// An engine operation was invoked out of order: after `close`, before a
    /// prerequisite emission, or while an inspection request was still open.
    State(String),
    /// The output APK declares `android:debuggable="true"` and the engine is
    /// configured to refuse signing debuggable APKs.
    DebuggableApk,
    /// A referenced manifest (the input META-INF/MANIFEST.MF or the output
    /// binary AndroidManifest.xml) could not be parsed.
    ManifestFormat(String),
    /// A wire structure could not be serialised. See [DekuError].
    ByteSerialisationFailed(DekuError),
    /// An error occurred while reading or writing a stream. Only `seal-zip`
    /// touches streams, so this usually points at the driver's output.
    FileIoError(Rc<io::Error>),
    /// `seal-zip` failed to create a zip file in-memory.
    ZipWritingFailed(Rc<ZipError>),
    /// The ZIP End Of Central Directory marker could not be found within the
    /// provided buffer.
    ZipSectionsNotFound,
    /// An error occurred while trying to instantiate a `Keys` object from a
    /// `.pem` string.
    PemParsingFailed(Rc<pem::PemError>),
    /// The `.pem` file passed to `Keys` was valid, but it was missing either
    /// a certificate or private key.
    MissingKeyMaterial,
    /// The `PRIVATE KEY` in the `.pem` was present, but it was neither an
    /// RSA nor a P-256 PKCS#8 key.
    PrivateKeyParsingFailed(pkcs8::Error),
    /// An error occurred while signing with an RSA key, see [rsa::Error].
    RsaSigningFailed(Rc<rsa::Error>),
    /// An error occurred while signing with a P-256 key.
    EcdsaSigningFailed(Rc<p256::ecdsa::Error>),
    /// An error occurred while serialising a public key, see
    /// [pkcs8::spki::Error].
    KeySerialisationFailed(pkcs8::spki::Error),
    /// The signing certificate couldn't be decoded for v1 signing.
    CertificateDecodingFailed(Rc<rasn::error::DecodeError>),
    /// v1 signing data couldn't be serialised.
    Pkcs7EncodingFailed(Rc<rasn::error::EncodeError>)
}

/// Result type where the error is always [SealError].
pub type Result<T> = std::result::Result<T, SealError>;

/// This makes it easier for Result<Something, SealError> to be returned from WASM functions
impl From<SealError> for String {
    fn from(value: SealError) -> Self {
        format!("{:?}", value)
    }
}

// Automatic conversion from other types of error to SealError makes the rest of the code cleaner
impl From<io::Error> for SealError {
    fn from(value: io::Error) -> Self {
        SealError::FileIoError(value.into())
    }
}

impl From<DekuError> for SealError {
    fn from(value: DekuError) -> Self {
        SealError::ByteSerialisationFailed(value)
    }
}

impl From<ZipError> for SealError {
    fn from(value: ZipError) -> Self {
        SealError::ZipWritingFailed(value.into())
    }
}

impl From<pem::PemError> for SealError {
    fn from(value: pem::PemError) -> Self {
        SealError::PemParsingFailed(value.into())
    }
}

impl From<pkcs8::Error> for SealError {
    fn from(value: pkcs8::Error) -> Self {
        SealError::PrivateKeyParsingFailed(value)
    }
}

impl From<rsa::Error> for SealError {
    fn from(value: rsa::Error) -> Self {
        SealError::RsaSigningFailed(value.into())
    }
}

impl From<p256::ecdsa::Error> for SealError {
    fn from(value: p256::ecdsa::Error) -> Self {
        SealError::EcdsaSigningFailed(value.into())
    }
}

impl From<pkcs8::spki::Error> for SealError {
    fn from(value: pkcs8::spki::Error) -> Self {
        SealError::KeySerialisationFailed(value)
    }
}

impl From<rasn::error::DecodeError> for SealError {
    fn from(value: rasn::error::DecodeError) -> Self {
        SealError::CertificateDecodingFailed(value.into())
    }
}

impl From<rasn::error::EncodeError> for SealError {
    fn from(value: rasn::error::EncodeError) -> Self {
        SealError::Pkcs7EncodingFailed(value.into())
    }
}
