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

//! The one question the engine asks of the output AndroidManifest.xml:
//! does it declare `android:debuggable="true"`?
//!
//! The manifest inside an APK is AAPT's binary XML, a sequence of chunks:
//! a string pool, a resource map tying string indices to Android attribute
//! ids, and the element tree. Only the chunks on the path to the
//! `<application>` element's `debuggable` attribute are interpreted here;
//! everything else is skipped by chunk size.

use seal_common::*;

pub const ANDROID_MANIFEST_ENTRY_NAME: &str = "AndroidManifest.xml";

/// Android internal attribute id of `android:debuggable`
pub const DEBUGGABLE_ATTRIBUTE_ID: u32 = 0x0101_000f;

const XML_CHUNK: u16 = 0x0003;
const STRING_POOL_CHUNK: u16 = 0x0001;
const RESOURCE_MAP_CHUNK: u16 = 0x0180;
const START_ELEMENT_CHUNK: u16 = 0x0102;

const UTF8_POOL_FLAG: u32 = 0x0100;

const TYPE_STRING: u8 = 0x03;
const TYPE_DECIMAL_INTEGER: u8 = 0x10;
const TYPE_BOOLEAN_INTEGER: u8 = 0x12;

/// Returns whether a binary AndroidManifest.xml declares the APK debuggable.
///
/// A manifest without an `<application>` element, or one whose application
/// element has no `debuggable` attribute, is not debuggable.
pub fn is_debuggable(manifest: &[u8]) -> Result<bool> {
    if read_u16(manifest, 0)? != XML_CHUNK {
        return Err(SealError::ManifestFormat(
            "AndroidManifest.xml is not a binary XML document".to_string()
        ));
    }
    let header_size = read_u16(manifest, 2)? as usize;
    let document_size = (read_u32(manifest, 4)? as usize).min(manifest.len());
    if header_size < 8 || header_size > document_size {
        return Err(SealError::ManifestFormat(
            "binary XML header overruns the document".to_string()
        ));
    }

    let mut strings: Vec<String> = Vec::new();
    let mut resource_ids: Vec<u32> = Vec::new();

    let mut pos = header_size;
    while pos + 8 <= document_size {
        let chunk_type = read_u16(manifest, pos)?;
        let chunk_header_size = read_u16(manifest, pos + 2)? as usize;
        let chunk_size = read_u32(manifest, pos + 4)? as usize;
        if chunk_size < 8 || chunk_header_size > chunk_size || pos + chunk_size > document_size {
            return Err(SealError::ManifestFormat(
                "binary XML chunk overruns the document".to_string()
            ));
        }
        let chunk = &manifest[pos..pos + chunk_size];

        match chunk_type {
            STRING_POOL_CHUNK => strings = parse_string_pool(chunk)?,
            RESOURCE_MAP_CHUNK => {
                resource_ids.clear();
                let mut id_pos = chunk_header_size;
                while id_pos + 4 <= chunk_size {
                    resource_ids.push(read_u32(chunk, id_pos)?);
                    id_pos += 4;
                }
            }
            START_ELEMENT_CHUNK => {
                if let Some(debuggable) =
                    application_debuggable(chunk, chunk_header_size, &strings, &resource_ids)?
                {
                    return Ok(debuggable);
                }
            }
            _ => {}
        }
        pos += chunk_size;
    }

    Ok(false)
}

// Some(_) once the element is <application>, even when the attribute is absent
fn application_debuggable(
    chunk: &[u8],
    header_size: usize,
    strings: &[String],
    resource_ids: &[u32]
) -> Result<Option<bool>> {
    let element_name = read_u32(chunk, header_size + 4)? as usize;
    if strings.get(element_name).map(String::as_str) != Some("application") {
        return Ok(None);
    }

    let attribute_start = read_u16(chunk, header_size + 8)? as usize;
    let attribute_size = read_u16(chunk, header_size + 10)? as usize;
    let attribute_count = read_u16(chunk, header_size + 12)? as usize;
    if attribute_size < 20 {
        return Err(SealError::ManifestFormat(
            "unsupported attribute encoding in AndroidManifest.xml".to_string()
        ));
    }

    for index in 0..attribute_count {
        let attribute = header_size + attribute_start + index * attribute_size;
        let name = read_u32(chunk, attribute + 4)? as usize;
        let named_debuggable = resource_ids.get(name) == Some(&DEBUGGABLE_ATTRIBUTE_ID)
            || strings.get(name).map(String::as_str) == Some("debuggable");
        if !named_debuggable {
            continue;
        }

        let data_type = *chunk.get(attribute + 15).ok_or_else(truncated)?;
        let data = read_u32(chunk, attribute + 16)?;
        return Ok(Some(match data_type {
            TYPE_BOOLEAN_INTEGER | TYPE_DECIMAL_INTEGER => data != 0,
            TYPE_STRING => {
                let raw_value = read_u32(chunk, attribute + 8)? as usize;
                strings.get(raw_value).map(String::as_str) == Some("true")
            }
            _ => false
        }));
    }

    Ok(Some(false))
}

fn parse_string_pool(chunk: &[u8]) -> Result<Vec<String>> {
    let header_size = read_u16(chunk, 2)? as usize;
    let string_count = read_u32(chunk, 8)? as usize;
    let flags = read_u32(chunk, 16)?;
    let strings_start = read_u32(chunk, 20)? as usize;
    // Each string needs at least an offset entry
    if string_count > chunk.len() / 4 {
        return Err(SealError::ManifestFormat(
            "string pool count overruns the chunk".to_string()
        ));
    }

    let mut strings = Vec::with_capacity(string_count);
    for index in 0..string_count {
        let offset = read_u32(chunk, header_size + 4 * index)? as usize;
        let string_pos = strings_start + offset;
        strings.push(if flags & UTF8_POOL_FLAG != 0 {
            read_utf8_string(chunk, string_pos)?
        } else {
            read_utf16_string(chunk, string_pos)?
        });
    }
    Ok(strings)
}

fn read_utf16_string(chunk: &[u8], pos: usize) -> Result<String> {
    let mut length = read_u16(chunk, pos)? as usize;
    let mut pos = pos + 2;
    // Lengths above 0x7FFF spill into a second length word
    if length & 0x8000 != 0 {
        length = ((length & 0x7fff) << 16) | read_u16(chunk, pos)? as usize;
        pos += 2;
    }
    let mut units = Vec::with_capacity(length);
    for index in 0..length {
        units.push(read_u16(chunk, pos + 2 * index)?);
    }
    Ok(String::from_utf16_lossy(&units))
}

fn read_utf8_string(chunk: &[u8], pos: usize) -> Result<String> {
    // A UTF-16 unit count precedes the byte count; only the latter matters
    let (_, pos) = read_utf8_length(chunk, pos)?;
    let (length, pos) = read_utf8_length(chunk, pos)?;
    let bytes = chunk.get(pos..pos + length).ok_or_else(truncated)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn read_utf8_length(chunk: &[u8], pos: usize) -> Result<(usize, usize)> {
    let first = *chunk.get(pos).ok_or_else(truncated)? as usize;
    if first & 0x80 != 0 {
        let second = *chunk.get(pos + 1).ok_or_else(truncated)? as usize;
        Ok((((first & 0x7f) << 8) | second, pos + 2))
    } else {
        Ok((first, pos + 1))
    }
}

fn read_u16(data: &[u8], pos: usize) -> Result<u16> {
    let bytes = data.get(pos..pos + 2).ok_or_else(truncated)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], pos: usize) -> Result<u32> {
    let bytes = data.get(pos..pos + 4).ok_or_else(truncated)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn truncated() -> SealError {
    SealError::ManifestFormat("binary XML document is truncated".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_documents_without_the_xml_magic() {
        assert!(matches!(
            is_debuggable(b"<?xml version=\"1.0\"?><manifest/>"),
            Err(SealError::ManifestFormat(_))
        ));
        assert!(matches!(is_debuggable(b""), Err(SealError::ManifestFormat(_))));
    }

    #[test]
    fn rejects_chunks_that_overrun_the_document() {
        // Valid document header, then a chunk claiming 0x100 bytes in an
        // 8-byte buffer tail
        let mut doc = vec![];
        doc.extend_from_slice(&XML_CHUNK.to_le_bytes());
        doc.extend_from_slice(&8u16.to_le_bytes());
        doc.extend_from_slice(&24u32.to_le_bytes());
        doc.extend_from_slice(&STRING_POOL_CHUNK.to_le_bytes());
        doc.extend_from_slice(&28u16.to_le_bytes());
        doc.extend_from_slice(&0x100u32.to_le_bytes());
        assert!(matches!(
            is_debuggable(&doc),
            Err(SealError::ManifestFormat(_))
        ));
    }

    #[test]
    fn document_without_elements_is_not_debuggable() {
        let mut doc = vec![];
        doc.extend_from_slice(&XML_CHUNK.to_le_bytes());
        doc.extend_from_slice(&8u16.to_le_bytes());
        doc.extend_from_slice(&8u32.to_le_bytes());
        assert!(!is_debuggable(&doc).unwrap());
    }
}
