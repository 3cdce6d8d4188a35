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

//! ZIP plumbing for APK signing drivers: an in-memory APK writer and the
//! section arithmetic needed to hand a finished ZIP to the signing engine.
//! The engine itself never reads ZIPs; it is fed entry names, entry bytes
//! and the three final sections by whoever owns the ZIP read/write loop.

use byteorder::{LittleEndian, ReadBytesExt};
use seal_common::*;
use std::io::{Cursor, Seek, Write};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

pub struct File {
    pub path: String,
    pub data: Vec<u8>
}

// Some files in APKs are not allowed to be compressed
const UNCOMPRESSED_FILES: &[&str] = &["resources.arsc"];

// Output can be a file *or* a buffer in memory
pub fn zip_apk<T: Write + Seek>(files: &[File], output: T) -> Result<()> {
    let mut zip = ZipWriter::new(output);
    let compressed_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .with_alignment(4);
    let uncompressed_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .with_alignment(4);

    for file in files {
        let options = if UNCOMPRESSED_FILES.contains(&&file.path[..]) {
            uncompressed_options
        } else {
            compressed_options
        };
        zip.start_file_from_path(&file.path, options)?;
        zip.write_all(&file.data)?;
    }

    zip.finish()?;
    Ok(())
}

/// Offsets of the two trailing ZIP sections, from the start of the file.
#[derive(Debug, Clone, Copy)]
pub struct ZipOffsets {
    pub cd_start: usize,
    pub eocd_start: usize
}

pub const EOCD_MAGIC: &[u8; 4] = &[0x50, 0x4B, 0x05, 0x06];

// Minimum EOCD record: magic + the fixed fields, no comment
const EOCD_MIN_SIZE: usize = 22;

/// Locates the End Of Central Directory record by scanning backwards for its
/// magic, then reads the central directory offset out of it.
pub fn find_offsets(zip_buf: &[u8]) -> Result<ZipOffsets> {
    if zip_buf.len() < EOCD_MIN_SIZE {
        return Err(SealError::ZipSectionsNotFound);
    }

    for i in (0..=(zip_buf.len() - EOCD_MIN_SIZE)).rev() {
        if &zip_buf[i..(i + 4)] == EOCD_MAGIC {
            // The EOCD tells us where the central directory starts
            let mut eocd_cd_start_field = Cursor::new(&zip_buf[(i + 16)..(i + 20)]);
            let cd_start = eocd_cd_start_field.read_u32::<LittleEndian>()? as usize;
            if cd_start > i {
                return Err(SealError::ZipSectionsNotFound);
            }
            return Ok(ZipOffsets {
                cd_start,
                eocd_start: i
            });
        }
    }

    Err(SealError::ZipSectionsNotFound)
}

/// Splits a finished ZIP into the three sections the signing engine consumes:
/// entries region, central directory, End Of Central Directory record.
pub fn split_sections(zip_buf: &[u8]) -> Result<(&[u8], &[u8], &[u8])> {
    let offsets = find_offsets(zip_buf)?;
    Ok((
        &zip_buf[..offsets.cd_start],
        &zip_buf[offsets.cd_start..offsets.eocd_start],
        &zip_buf[offsets.eocd_start..]
    ))
}
