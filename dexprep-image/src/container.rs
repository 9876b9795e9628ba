//! The versioned cache-container wire format: an opt-header
//! followed by the (possibly rewritten) image, a dependency manifest, and
//! chunked optimized auxiliary data.
//!
//! This module only knows the byte layout and the staleness comparison;
//! the file-locking open/rebuild protocol around it lives in
//! `dexprep_vm::cache`, which is the thing that actually owns an open file
//! descriptor.

use alloc::string::String;
use alloc::vec::Vec;
use dexprep_types::cursor::Cursor;

use crate::error::FormatError;

const CONTAINER_MAGIC: [u8; 4] = *b"dey\n";
const CONTAINER_VERSION: u32 = 1;

/// The fixed-size opt-header at offset 0 of a cache container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContainerHeader {
    pub version: u32,
    pub image_offset: u32,
    pub image_length: u32,
    pub deps_offset: u32,
    pub deps_length: u32,
    pub opt_offset: u32,
    pub opt_length: u32,
    /// Bit 0: big-endian source image.
    pub flags: u32,
    /// Rolling checksum over the deps+opt regions.
    pub deps_opt_checksum: u32,
}

impl ContainerHeader {
    const ENCODED_LEN: usize = 4 + 4 + 4 * 8;

    /// An all-zero header, written when a new (empty) cache file is created.
    pub fn empty() -> Self {
        ContainerHeader {
            version: CONTAINER_VERSION,
            image_offset: 0,
            image_length: 0,
            deps_offset: 0,
            deps_length: 0,
            opt_offset: 0,
            opt_length: 0,
            flags: 0,
            deps_opt_checksum: 0,
        }
    }

    /// Serializes the header to its on-disk byte layout.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&CONTAINER_MAGIC);
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.image_offset.to_le_bytes());
        out[12..16].copy_from_slice(&self.image_length.to_le_bytes());
        out[16..20].copy_from_slice(&self.deps_offset.to_le_bytes());
        out[20..24].copy_from_slice(&self.deps_length.to_le_bytes());
        out[24..28].copy_from_slice(&self.opt_offset.to_le_bytes());
        out[28..32].copy_from_slice(&self.opt_length.to_le_bytes());
        out[32..36].copy_from_slice(&self.flags.to_le_bytes());
        out[36..40].copy_from_slice(&self.deps_opt_checksum.to_le_bytes());
        out
    }

    /// Parses a header from its on-disk byte layout.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut c = Cursor::new(bytes);
        let magic = c.take(4).ok_or(FormatError::Truncated)?;
        if magic != CONTAINER_MAGIC {
            return Err(FormatError::BadMagic);
        }
        let version = c.u32().ok_or(FormatError::Truncated)?;
        if version != CONTAINER_VERSION {
            return Err(FormatError::UnsupportedVersion);
        }
        Ok(ContainerHeader {
            version,
            image_offset: c.u32().ok_or(FormatError::Truncated)?,
            image_length: c.u32().ok_or(FormatError::Truncated)?,
            deps_offset: c.u32().ok_or(FormatError::Truncated)?,
            deps_length: c.u32().ok_or(FormatError::Truncated)?,
            opt_offset: c.u32().ok_or(FormatError::Truncated)?,
            opt_length: c.u32().ok_or(FormatError::Truncated)?,
            flags: c.u32().ok_or(FormatError::Truncated)?,
            deps_opt_checksum: c.u32().ok_or(FormatError::Truncated)?,
        })
    }
}

/// One boot-classpath entry's recorded identity.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BootClasspathEntry {
    pub name: String,
    pub sha1: [u8; 20],
}

/// The dependency manifest: everything needed to decide whether a cache is
/// stale relative to its source and the bootstrap class graph.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DependencyManifest {
    pub source_mtime: u64,
    pub source_crc: u32,
    pub vm_build_number: u32,
    pub boot_classpath: Vec<BootClasspathEntry>,
}

impl DependencyManifest {
    /// Serializes the manifest to its on-disk byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.source_mtime.to_le_bytes());
        out.extend_from_slice(&self.source_crc.to_le_bytes());
        out.extend_from_slice(&self.vm_build_number.to_le_bytes());
        out.extend_from_slice(&(self.boot_classpath.len() as u32).to_le_bytes());
        for entry in &self.boot_classpath {
            let name_bytes = entry.name.as_bytes();
            out.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(name_bytes);
            out.extend_from_slice(&entry.sha1);
        }
        out
    }

    /// Parses a manifest from its on-disk byte layout.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut c = Cursor::new(bytes);
        let source_mtime = c.u64().ok_or(FormatError::Truncated)?;
        let source_crc = c.u32().ok_or(FormatError::Truncated)?;
        let vm_build_number = c.u32().ok_or(FormatError::Truncated)?;
        let count = c.u32().ok_or(FormatError::Truncated)? as usize;
        let mut boot_classpath = Vec::with_capacity(count);
        for _ in 0..count {
            let name_len = c.u32().ok_or(FormatError::Truncated)? as usize;
            let name_bytes = c.take(name_len).ok_or(FormatError::Truncated)?;
            let name = core::str::from_utf8(name_bytes)
                .map_err(|_| FormatError::Truncated)?
                .into();
            let sha1_bytes = c.take(20).ok_or(FormatError::Truncated)?;
            let mut sha1 = [0u8; 20];
            sha1.copy_from_slice(sha1_bytes);
            boot_classpath.push(BootClasspathEntry { name, sha1 });
        }
        Ok(DependencyManifest {
            source_mtime,
            source_crc,
            vm_build_number,
            boot_classpath,
        })
    }

    /// Whether `self` (as recorded in an existing cache) matches `actual`
    /// (freshly computed from the current source and boot classpath).
    ///
    /// The boot path must match by count, name, and SHA1, in order; the
    /// mtime is advisory (a CRC mismatch is authoritative) but a mismatch
    /// on either CRC or the boot path is staleness.
    pub fn is_stale_against(&self, actual: &DependencyManifest) -> bool {
        if self.source_crc != actual.source_crc {
            tracing::debug!(recorded = self.source_crc, actual = actual.source_crc, "cache stale: source CRC changed");
            return true;
        }
        if self.vm_build_number != actual.vm_build_number {
            tracing::debug!(
                recorded = self.vm_build_number,
                actual = actual.vm_build_number,
                "cache stale: VM build number changed"
            );
            return true;
        }
        if self.boot_classpath != actual.boot_classpath {
            tracing::debug!("cache stale: boot classpath identity changed");
            return true;
        }
        false
    }
}

/// Computes the rolling checksum over the deps+opt regions stashed in the
/// header. A simple Fletcher-style rolling sum rather than a cryptographic
/// one; the boot-classpath identity check is what actually needs to be
/// collision-resistant, and that already uses SHA-1 per entry.
pub fn rolling_checksum(deps: &[u8], opt: &[u8]) -> u32 {
    let mut sum1: u32 = 1;
    let mut sum2: u32 = 0;
    for &byte in deps.iter().chain(opt.iter()) {
        sum1 = (sum1 + byte as u32) % 65521;
        sum2 = (sum2 + sum1) % 65521;
    }
    (sum2 << 16) | sum1
}

/// One chunk of the opt-data region: a 4-byte type tag, the payload, and
/// implicit padding to an 8-byte boundary handled by the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptChunk {
    pub chunk_type: u32,
    pub payload: Vec<u8>,
}

/// Serializes a sequence of opt chunks, each padded to 8 bytes.
pub fn encode_opt_chunks(chunks: &[OptChunk]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend_from_slice(&chunk.chunk_type.to_le_bytes());
        out.extend_from_slice(&(chunk.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&chunk.payload);
        while out.len() % 8 != 0 {
            out.push(0);
        }
    }
    out
}

/// Parses a sequence of 8-byte-padded opt chunks.
pub fn decode_opt_chunks(bytes: &[u8]) -> Result<Vec<OptChunk>, FormatError> {
    let mut c = Cursor::new(bytes);
    let mut out = Vec::new();
    while c.remaining() > 0 {
        let chunk_type = c.u32().ok_or(FormatError::Truncated)?;
        let size = c.u32().ok_or(FormatError::Truncated)? as usize;
        let payload = c.take(size).ok_or(FormatError::Truncated)?.to_vec();
        let padded = (size + 7) / 8 * 8;
        let pad = padded - size;
        if pad > 0 {
            c.take(pad).ok_or(FormatError::Truncated)?;
        }
        out.push(OptChunk { chunk_type, payload });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = ContainerHeader {
            version: CONTAINER_VERSION,
            image_offset: 40,
            image_length: 100,
            deps_offset: 144,
            deps_length: 16,
            opt_offset: 160,
            opt_length: 32,
            flags: 0,
            deps_opt_checksum: 0xCAFEBABE,
        };
        let encoded = header.encode();
        let decoded = ContainerHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn manifest_round_trips() {
        let manifest = DependencyManifest {
            source_mtime: 1_700_000_000,
            source_crc: 0xDEADBEEF,
            vm_build_number: 7,
            boot_classpath: alloc::vec![BootClasspathEntry {
                name: String::from("/system/framework/core.dex"),
                sha1: [0x11; 20],
            }],
        };
        let encoded = manifest.encode();
        let decoded = DependencyManifest::decode(&encoded).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn staleness_detects_crc_change() {
        let mut a = DependencyManifest {
            source_mtime: 0,
            source_crc: 0xDEADBEEF,
            vm_build_number: 1,
            boot_classpath: Vec::new(),
        };
        let b = a.clone();
        assert!(!a.is_stale_against(&b));
        a.source_crc = 0xDEADBEEE;
        assert!(a.is_stale_against(&b));
    }

    #[test]
    fn staleness_detects_boot_classpath_sha1_change() {
        let a = DependencyManifest {
            source_mtime: 0,
            source_crc: 1,
            vm_build_number: 1,
            boot_classpath: alloc::vec![BootClasspathEntry {
                name: String::from("core.dex"),
                sha1: [1; 20],
            }],
        };
        let mut b = a.clone();
        b.boot_classpath[0].sha1 = [2; 20];
        assert!(a.is_stale_against(&b));
    }

    #[test]
    fn opt_chunks_round_trip_with_padding() {
        let chunks = alloc::vec![
            OptChunk {
                chunk_type: 1,
                payload: alloc::vec![1, 2, 3],
            },
            OptChunk {
                chunk_type: 2,
                payload: Vec::new(),
            },
        ];
        let encoded = encode_opt_chunks(&chunks);
        assert_eq!(encoded.len() % 8, 0);
        let decoded = decode_opt_chunks(&encoded).unwrap();
        assert_eq!(decoded, chunks);
    }
}
