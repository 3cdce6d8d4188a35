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

//! Shared driver harness for the engine integration tests: fixture signers,
//! a handcrafted binary AndroidManifest.xml builder, and the plumbing a real
//! APK signer would run around the engine.

use seal_sign::{InspectRequest, Keys, SignerConfig, SignerEngine};

pub const RSA_2048_PEM: &str = include_str!("../../testdata/rsa-2048.pem");
pub const RSA_4096_PEM: &str = include_str!("../../testdata/rsa-4096.pem");
pub const EC_P256_PEM: &str = include_str!("../../testdata/ec-p256.pem");

pub fn signer(name: &str, pem: &str) -> SignerConfig {
    let keys = Keys::from_combined_pem_string(pem).unwrap();
    SignerConfig::new(name, keys.private_key, vec![keys.certificate]).unwrap()
}

pub fn rsa_signer(name: &str) -> SignerConfig {
    signer(name, RSA_2048_PEM)
}

/// Streams one entry's bytes into an inspection request and completes it.
pub fn stream(request: &InspectRequest, data: &[u8]) {
    request.consume(data).unwrap();
    request.done();
}

/// Reports an output entry to the engine and satisfies any inspection
/// request it opens.
pub fn write_output_entry(engine: &mut SignerEngine, name: &str, data: &[u8]) {
    if let Some(request) = engine.output_jar_entry(name).unwrap() {
        stream(&request, data);
    }
}

// Binary XML chunk types and the android:debuggable attribute id
const XML_CHUNK: u16 = 0x0003;
const STRING_POOL_CHUNK: u16 = 0x0001;
const RESOURCE_MAP_CHUNK: u16 = 0x0180;
const START_ELEMENT_CHUNK: u16 = 0x0102;
const DEBUGGABLE_ATTRIBUTE_ID: u32 = 0x0101_000f;
const TYPE_BOOLEAN_INTEGER: u8 = 0x12;
const NO_ENTRY: u32 = 0xFFFF_FFFF;

/// Builds the binary AndroidManifest.xml an AAPT compile would produce for
/// `<manifest><application android:debuggable="..."/></manifest>`, with the
/// attribute omitted entirely for `None`.
pub fn binary_manifest(debuggable: Option<bool>) -> Vec<u8> {
    // String indices: 0 = debuggable (mapped by the resource map), then the
    // element names
    let string_pool = string_pool_chunk(&["debuggable", "manifest", "application"]);

    let mut resource_map = Vec::new();
    resource_map.extend_from_slice(&RESOURCE_MAP_CHUNK.to_le_bytes());
    resource_map.extend_from_slice(&8u16.to_le_bytes());
    resource_map.extend_from_slice(&12u32.to_le_bytes());
    resource_map.extend_from_slice(&DEBUGGABLE_ATTRIBUTE_ID.to_le_bytes());

    let manifest_element = start_element_chunk(1, &[]);
    let application_attributes: Vec<(u32, u8, u32)> = match debuggable {
        Some(value) => vec![(0, TYPE_BOOLEAN_INTEGER, if value { NO_ENTRY } else { 0 })],
        None => vec![]
    };
    let application_element = start_element_chunk(2, &application_attributes);

    let mut body = string_pool;
    body.extend_from_slice(&resource_map);
    body.extend_from_slice(&manifest_element);
    body.extend_from_slice(&application_element);

    let mut document = Vec::new();
    document.extend_from_slice(&XML_CHUNK.to_le_bytes());
    document.extend_from_slice(&8u16.to_le_bytes());
    document.extend_from_slice(&((8 + body.len()) as u32).to_le_bytes());
    document.extend_from_slice(&body);
    document
}

fn string_pool_chunk(strings: &[&str]) -> Vec<u8> {
    let mut offsets = Vec::new();
    let mut data = Vec::new();
    for string in strings {
        offsets.push(data.len() as u32);
        let units: Vec<u16> = string.encode_utf16().collect();
        data.extend_from_slice(&(units.len() as u16).to_le_bytes());
        for unit in units {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        data.extend_from_slice(&0u16.to_le_bytes());
    }

    let strings_start = 28 + 4 * strings.len();
    let mut chunk = Vec::new();
    chunk.extend_from_slice(&STRING_POOL_CHUNK.to_le_bytes());
    chunk.extend_from_slice(&28u16.to_le_bytes());
    chunk.extend_from_slice(&((strings_start + data.len()) as u32).to_le_bytes());
    chunk.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    chunk.extend_from_slice(&0u32.to_le_bytes()); // no styles
    chunk.extend_from_slice(&0u32.to_le_bytes()); // UTF-16 pool
    chunk.extend_from_slice(&(strings_start as u32).to_le_bytes());
    chunk.extend_from_slice(&0u32.to_le_bytes()); // no style data
    for offset in offsets {
        chunk.extend_from_slice(&offset.to_le_bytes());
    }
    chunk.extend_from_slice(&data);
    chunk
}

// Attributes are (name string index, value type, value data)
fn start_element_chunk(name_index: u32, attributes: &[(u32, u8, u32)]) -> Vec<u8> {
    let mut chunk = Vec::new();
    chunk.extend_from_slice(&START_ELEMENT_CHUNK.to_le_bytes());
    chunk.extend_from_slice(&16u16.to_le_bytes());
    chunk.extend_from_slice(&((16 + 20 + 20 * attributes.len()) as u32).to_le_bytes());
    chunk.extend_from_slice(&1u32.to_le_bytes()); // line number
    chunk.extend_from_slice(&NO_ENTRY.to_le_bytes()); // comment
    chunk.extend_from_slice(&NO_ENTRY.to_le_bytes()); // namespace
    chunk.extend_from_slice(&name_index.to_le_bytes());
    chunk.extend_from_slice(&20u16.to_le_bytes()); // attribute start
    chunk.extend_from_slice(&20u16.to_le_bytes()); // attribute size
    chunk.extend_from_slice(&(attributes.len() as u16).to_le_bytes());
    chunk.extend_from_slice(&0u16.to_le_bytes()); // id attribute
    chunk.extend_from_slice(&0u16.to_le_bytes()); // class attribute
    chunk.extend_from_slice(&0u16.to_le_bytes()); // style attribute
    for (name, value_type, data) in attributes {
        chunk.extend_from_slice(&NO_ENTRY.to_le_bytes()); // namespace
        chunk.extend_from_slice(&name.to_le_bytes());
        chunk.extend_from_slice(&NO_ENTRY.to_le_bytes()); // raw value
        chunk.extend_from_slice(&8u16.to_le_bytes()); // value size
        chunk.push(0); // res0
        chunk.push(*value_type);
        chunk.extend_from_slice(&data.to_le_bytes());
    }
    chunk
}
