// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

//! Utility functions for reading and writing versioned headers.
//!
//! Writing codec headers is useful to ensure that a file is in
//! the format you think it is.

use crate::core::store::io::{
    BufferedChecksumIndexInput, ChecksumIndexInput, DataInput, DataOutput, IndexInput, IndexOutput,
};

use crate::core::util::id2str;
use crate::core::util::ID_LENGTH;
use crate::error::ErrorKind::{
    CorruptIndex, IllegalArgument, IllegalState, IndexFormatTooNew, IndexFormatTooOld,
};
use crate::error::Result;
use std::io::Read;

/// Constant to identify the start of a codec header.
pub const CODEC_MAGIC: i32 = 0x3FD7_6C17;
/// Constant to identify the start of a codec footer.
pub const FOOTER_MAGIC: i32 = !CODEC_MAGIC;

/// Writes a codec header, which records both a string to identify the file and a version number.
///
/// CodecHeader --> Magic,CodecName,Version
/// * Magic --> `write_int`, always `CODEC_MAGIC`.
/// * CodecName --> `write_string`, identifies this file.
/// * Version --> `write_int`, the version of the file.
pub fn write_header<T: DataOutput + ?Sized>(out: &mut T, codec: &str, version: i32) -> Result<()> {
    let clen = codec.len();
    if clen >= 128 {
        bail!(IllegalArgument(format!(
            "codec must be simple ASCII less than 128 characters, got {}[length={}]",
            codec, clen,
        )));
    }
    out.write_int(CODEC_MAGIC)?;
    out.write_string(codec)?;
    out.write_int(version)
}

/// Writes a codec header for an index file, which records both a string to
/// identify the format of the file, a version number, and data to identify
/// the file instance (ID and auxiliary suffix such as generation).
///
/// IndexHeader --> CodecHeader,ObjectID,ObjectSuffix
pub fn write_index_header<T: DataOutput + ?Sized>(
    out: &mut T,
    codec: &str,
    version: i32,
    id: &[u8],
    suffix: &str,
) -> Result<()> {
    if id.len() != ID_LENGTH {
        bail!(IllegalArgument(format!("Invalid id: {:?}", id)));
    }
    write_header(out, codec, version)?;
    out.write_bytes(id, 0, id.len())?;
    let slen = suffix.len();

    if slen >= 256 {
        bail!(IllegalArgument(format!(
            "suffix must be simple ASCII less than 256 characters, got {}[length={}]",
            suffix, slen
        )));
    }
    out.write_byte(slen as u8)?;
    out.write_bytes(suffix.as_bytes(), 0, slen)
}

/// Writes a codec footer, which records both a checksum algorithm ID and a
/// checksum of all previous bytes, Magic and AlgorithmID included.
///
/// CodecFooter --> Magic,AlgorithmID,Checksum
pub fn write_footer<T: IndexOutput + ?Sized>(output: &mut T) -> Result<()> {
    output.write_int(FOOTER_MAGIC)?;
    output.write_int(0)?;
    write_crc(output)
}

/// Computes the length of a codec header.
pub fn header_length(codec: &str) -> usize {
    9 + codec.len()
}

/// Computes the length of an index header.
pub fn index_header_length(codec: &str, suffix: &str) -> usize {
    header_length(codec) + ID_LENGTH + 1 + suffix.len()
}

/// Reads and validates a header previously written with `write_header`.
///
/// Versions outside of `[min_ver, max_ver]` are rejected as too old or too new.
pub fn check_header<T: DataInput + ?Sized>(
    data_input: &mut T,
    codec: &str,
    min_ver: i32,
    max_ver: i32,
) -> Result<i32> {
    check_resource_header(data_input, codec, codec, min_ver, max_ver)
}

/// Like `check_header`, naming `resource` in format errors.
pub fn check_resource_header<T: DataInput + ?Sized>(
    data_input: &mut T,
    resource: &str,
    codec: &str,
    min_ver: i32,
    max_ver: i32,
) -> Result<i32> {
    let actual_header = data_input.read_int()?;
    if actual_header != CODEC_MAGIC {
        bail!(CorruptIndex(format!(
            "codec header mismatch: actual=0x{:X}, expected=0x{:X} (resource={})",
            actual_header, CODEC_MAGIC, resource
        )));
    }
    check_header_no_magic(data_input, resource, codec, min_ver, max_ver)
}

/// Like `check_resource_header` except this version assumes the first i32
/// has already been read and validated from the input.
pub fn check_header_no_magic<T: DataInput + ?Sized>(
    data_input: &mut T,
    resource: &str,
    codec: &str,
    min_ver: i32,
    max_ver: i32,
) -> Result<i32> {
    let actual_codec = data_input.read_string()?;
    if actual_codec != codec {
        bail!(CorruptIndex(format!(
            "codec mismatch: actual={}, expected={} (resource={})",
            actual_codec, codec, resource
        )));
    }
    let actual_ver = data_input.read_int()?;
    if actual_ver < min_ver {
        bail!(IndexFormatTooOld(
            resource.to_string(),
            actual_ver,
            min_ver,
            max_ver
        ));
    }
    if actual_ver > max_ver {
        bail!(IndexFormatTooNew(
            resource.to_string(),
            actual_ver,
            min_ver,
            max_ver
        ));
    }
    Ok(actual_ver)
}

/// Reads and validates a header previously written with `write_index_header`.
pub fn check_index_header<T: IndexInput + ?Sized>(
    data_input: &mut T,
    codec: &str,
    min_ver: i32,
    max_ver: i32,
    expected_id: &[u8],
    expected_suffix: &str,
) -> Result<i32> {
    let resource = data_input.name().to_string();
    let version = check_resource_header(data_input, &resource, codec, min_ver, max_ver)?;
    check_index_header_id(data_input, expected_id)?;
    check_index_header_suffix(data_input, expected_suffix)?;
    Ok(version)
}

fn check_index_header_id<T: DataInput + ?Sized>(
    data_input: &mut T,
    expected_id: &[u8],
) -> Result<()> {
    let mut actual_id = [0u8; ID_LENGTH];
    data_input.read_bytes(&mut actual_id, 0, ID_LENGTH)?;
    if actual_id != expected_id {
        bail!(CorruptIndex(format!(
            "file mismatch, expected_id={}, got={}",
            id2str(expected_id),
            id2str(&actual_id)
        )));
    }
    Ok(())
}

/// Expert: just reads and verifies the suffix of an index header
pub fn check_index_header_suffix<T: DataInput + ?Sized>(
    data_input: &mut T,
    expected_suffix: &str,
) -> Result<()> {
    let suffix_len = data_input.read_byte()? as usize;
    let mut suffix_bytes = vec![0u8; suffix_len];
    data_input.read_bytes(&mut suffix_bytes, 0, suffix_len)?;
    let suffix = ::std::str::from_utf8(&suffix_bytes)?;
    if suffix != expected_suffix {
        bail!(CorruptIndex(format!(
            "file mismatch, expected suffix={}, got={}",
            expected_suffix, suffix
        )));
    }
    Ok(())
}

/// Computes the length of a codec footer.
#[inline(always)]
pub fn footer_length() -> usize {
    16
}

pub fn validate_footer<T: IndexInput + ?Sized>(input: &mut T) -> Result<()> {
    let remaining = input.len() as i64 - input.file_pointer();
    let expected = footer_length() as i64;

    if remaining < expected {
        bail!(CorruptIndex(format!(
            "misplaced codec footer (file truncated?): remaining={}, expected={} ({})",
            remaining,
            expected,
            input.name()
        )))
    } else if remaining > expected {
        bail!(CorruptIndex(format!(
            "misplaced codec footer (file extended?): remaining={}, expected={} ({})",
            remaining,
            expected,
            input.name()
        )))
    } else {
        let magic = input.read_int()?;
        if magic != FOOTER_MAGIC {
            bail!(CorruptIndex(format!(
                "codec footer mismatch: actual={} vs expected={}",
                magic, FOOTER_MAGIC
            )));
        }
        let algorithm_id = input.read_int()?;
        if algorithm_id != 0 {
            bail!(CorruptIndex(format!(
                "codec footer mismatch: unknown algorithm_id: {}",
                algorithm_id
            )));
        }
        Ok(())
    }
}

/// Validates the codec footer previously written by `write_footer`.
pub fn check_footer<T: ChecksumIndexInput + ?Sized>(input: &mut T) -> Result<i64> {
    validate_footer(input)?;
    let actual_checksum: i64 = input.checksum();
    check_checksum(input, actual_checksum)?;
    Ok(actual_checksum)
}

fn read_crc<T: IndexInput + ?Sized>(input: &mut T) -> Result<i64> {
    let val = input.read_long()?;
    if (val as u64 & 0xFFFF_FFFF_0000_0000) != 0 {
        bail!(CorruptIndex(format!("Illegal CRC-32 checksum: {}", val)));
    }
    Ok(val)
}

fn write_crc<T: IndexOutput + ?Sized>(output: &mut T) -> Result<()> {
    let value = output.checksum()?;
    if value as u64 & 0xFFFF_FFFF_0000_0000 != 0 {
        bail!(IllegalState(format!("Illegal CRC-32 checksum: {}", value)));
    }
    output.write_long(value)
}

/// Returns (but does not validate) the checksum previously written by `write_footer`.
pub fn retrieve_checksum<T: IndexInput + ?Sized>(input: &mut T) -> Result<i64> {
    let length = input.len();
    let footer_length = footer_length() as u64;
    if length < footer_length {
        bail!(CorruptIndex(format!(
            "misplaced codec footer (file truncated?): length={}, but footer_length={}",
            length, footer_length
        )));
    }
    input.seek((length - footer_length) as i64)?;
    validate_footer(input)?;

    read_crc(input)
}

fn check_checksum<T: IndexInput + ?Sized>(input: &mut T, actual_checksum: i64) -> Result<()> {
    let expected_checksum: i64 = read_crc(input)?;
    if actual_checksum != expected_checksum {
        bail!(CorruptIndex(format!(
            "checksum failed (hardware problems?): expected=0x{:X}, actual=0x{:X} ({})",
            expected_checksum,
            actual_checksum,
            input.name()
        )));
    }
    Ok(())
}

/// Clones the provided input, reads all bytes from the file, and validates the footer.
///
/// Note that this method may be slow, as it must process the entire file.
/// If you just need to extract the checksum value, call `retrieve_checksum`.
pub fn checksum_entire_file<T: IndexInput + ?Sized>(input: &T) -> Result<i64> {
    let mut index = input.clone()?;
    index.seek(0)?;
    let mut checksum = BufferedChecksumIndexInput::new(index);
    let mut len = checksum.len();
    let mut pos = checksum.file_pointer() as u64;
    if len < footer_length() as u64 {
        bail!(CorruptIndex(format!(
            "misplaced codec footer (file truncated?): length={} but footerLength=={}",
            checksum.len(),
            footer_length()
        )));
    }
    const BUFSIZ: u64 = 1024 * 64;
    let mut buffer = [0u8; BUFSIZ as usize];
    len -= footer_length() as u64;

    while pos < len {
        let size = if len - pos < BUFSIZ {
            len - pos
        } else {
            BUFSIZ
        };
        let read = checksum.read(&mut buffer[0..size as usize])?;
        if read == 0 {
            bail!(CorruptIndex(format!("unexpected EOF in {}", checksum.name())));
        }
        pos += read as u64;
    }

    check_footer(&mut checksum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::directory::{Directory, RAMDirectory};
    use crate::core::store::IOContext;
    use crate::core::util::random_id;
    use crate::error::{Error, ErrorKind};

    fn write_file(dir: &RAMDirectory, name: &str, version: i32, id: &[u8]) {
        let mut out = dir.create_output(name, &IOContext::Default).unwrap();
        write_index_header(out.as_mut(), "Test", version, id, "x").unwrap();
        out.write_vint(12345).unwrap();
        write_footer(out.as_mut()).unwrap();
    }

    #[test]
    fn test_header_and_footer() {
        let dir = RAMDirectory::new();
        let id = random_id();
        write_file(&dir, "f", 3, &id);
        assert_eq!(
            dir.file_length("f").unwrap() as usize,
            index_header_length("Test", "x") + 2 + footer_length()
        );

        let mut input = dir.open_checksum_input("f", &IOContext::READ).unwrap();
        assert_eq!(check_index_header(input.as_mut(), "Test", 1, 5, &id, "x").unwrap(), 3);
        assert_eq!(input.read_vint().unwrap(), 12345);
        let sum = check_footer(input.as_mut()).unwrap();

        let plain = dir.open_input("f", &IOContext::READ).unwrap();
        assert_eq!(checksum_entire_file(plain.as_ref()).unwrap(), sum);
        let mut plain = dir.open_input("f", &IOContext::READ).unwrap();
        assert_eq!(retrieve_checksum(plain.as_mut()).unwrap(), sum);
    }

    #[test]
    fn test_version_range_names_resource() {
        let dir = RAMDirectory::new();
        let id = random_id();
        write_file(&dir, "old", 1, &id);
        write_file(&dir, "new", 9, &id);

        let mut input = dir.open_input("old", &IOContext::READ).unwrap();
        match check_index_header(input.as_mut(), "Test", 2, 5, &id, "x") {
            Err(Error(ErrorKind::IndexFormatTooOld(resource, 1, 2, 5), _)) => {
                assert_eq!(resource, "old")
            }
            r => panic!("unexpected {:?}", r.err()),
        }
        let mut input = dir.open_input("new", &IOContext::READ).unwrap();
        match check_index_header(input.as_mut(), "Test", 2, 5, &id, "x") {
            Err(Error(ErrorKind::IndexFormatTooNew(resource, 9, 2, 5), _)) => {
                assert_eq!(resource, "new")
            }
            r => panic!("unexpected {:?}", r.err()),
        }
        let mut input = dir.open_input("new", &IOContext::READ).unwrap();
        assert!(check_index_header(input.as_mut(), "Test", 2, 9, &random_id(), "x").is_err());
    }

    #[test]
    fn test_corrupted_checksum() {
        let dir = RAMDirectory::new();
        let id = random_id();
        write_file(&dir, "f", 3, &id);
        let mut bytes = vec![0u8; dir.file_length("f").unwrap() as usize];
        {
            let mut input = dir.open_input("f", &IOContext::READ).unwrap();
            let len = bytes.len();
            input.read_bytes(&mut bytes, 0, len).unwrap();
        }
        let header_len = index_header_length("Test", "x");
        bytes[header_len] ^= 0x01;
        {
            let mut out = dir.create_output("g", &IOContext::Default).unwrap();
            let len = bytes.len();
            out.write_bytes(&bytes, 0, len).unwrap();
        }
        let input = dir.open_input("g", &IOContext::READ).unwrap();
        match checksum_entire_file(input.as_ref()) {
            Err(Error(ErrorKind::CorruptIndex(_), _)) => {}
            _ => panic!("corruption not detected"),
        }
    }
}
