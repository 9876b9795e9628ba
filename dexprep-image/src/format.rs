//! The inbound, pre-swapped image format: header, shared string pool, and
//! per-class encoded class-data sections.

use alloc::string::String;
use alloc::vec::Vec;
use dexprep_types::{
    cursor::Cursor, ClassDefIdx, FieldId, InsnAddr, MethodId, ProtoId, StringId, TypeId,
};

use crate::error::FormatError;
use crate::validate;

const MAGIC: [u8; 4] = *b"DEX\0";
const SUPPORTED_VERSION: u32 = 1;

/// Image header: magic, version, a 20-byte source signature, and the
/// counts/offsets of each constant-pool table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageHeader {
    pub version: u32,
    pub checksum: u32,
    pub signature: [u8; 20],
    pub string_ids_off: u32,
    pub string_ids_size: u32,
    pub type_ids_off: u32,
    pub type_ids_size: u32,
    pub proto_ids_off: u32,
    pub proto_ids_size: u32,
    pub field_ids_off: u32,
    pub field_ids_size: u32,
    pub method_ids_off: u32,
    pub method_ids_size: u32,
    pub class_defs_off: u32,
    pub class_defs_size: u32,
}

impl ImageHeader {
    /// Length of the encoded fixed-size header, in bytes.
    pub const ENCODED_LEN: usize = 4 + 4 + 4 + 20 + 4 * 12;

    /// Parses and validates the fixed-size header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut c = Cursor::new(bytes);
        let magic = c.take(4).ok_or(FormatError::Truncated)?;
        if magic != MAGIC {
            return Err(FormatError::BadMagic);
        }
        let version = c.u32().ok_or(FormatError::Truncated)?;
        if version != SUPPORTED_VERSION {
            return Err(FormatError::UnsupportedVersion);
        }
        let checksum = c.u32().ok_or(FormatError::Truncated)?;
        let sig_bytes = c.take(20).ok_or(FormatError::Truncated)?;
        let mut signature = [0u8; 20];
        signature.copy_from_slice(sig_bytes);
        let string_ids_off = c.u32().ok_or(FormatError::Truncated)?;
        let string_ids_size = c.u32().ok_or(FormatError::Truncated)?;
        let type_ids_off = c.u32().ok_or(FormatError::Truncated)?;
        let type_ids_size = c.u32().ok_or(FormatError::Truncated)?;
        let proto_ids_off = c.u32().ok_or(FormatError::Truncated)?;
        let proto_ids_size = c.u32().ok_or(FormatError::Truncated)?;
        let field_ids_off = c.u32().ok_or(FormatError::Truncated)?;
        let field_ids_size = c.u32().ok_or(FormatError::Truncated)?;
        let method_ids_off = c.u32().ok_or(FormatError::Truncated)?;
        let method_ids_size = c.u32().ok_or(FormatError::Truncated)?;
        let class_defs_off = c.u32().ok_or(FormatError::Truncated)?;
        let class_defs_size = c.u32().ok_or(FormatError::Truncated)?;
        Ok(ImageHeader {
            version,
            checksum,
            signature,
            string_ids_off,
            string_ids_size,
            type_ids_off,
            type_ids_size,
            proto_ids_off,
            proto_ids_size,
            field_ids_off,
            field_ids_size,
            method_ids_off,
            method_ids_size,
            class_defs_off,
            class_defs_size,
        })
    }

    /// Serializes the header to its on-disk byte layout.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        out[12..32].copy_from_slice(&self.signature);
        out[32..36].copy_from_slice(&self.string_ids_off.to_le_bytes());
        out[36..40].copy_from_slice(&self.string_ids_size.to_le_bytes());
        out[40..44].copy_from_slice(&self.type_ids_off.to_le_bytes());
        out[44..48].copy_from_slice(&self.type_ids_size.to_le_bytes());
        out[48..52].copy_from_slice(&self.proto_ids_off.to_le_bytes());
        out[52..56].copy_from_slice(&self.proto_ids_size.to_le_bytes());
        out[56..60].copy_from_slice(&self.field_ids_off.to_le_bytes());
        out[60..64].copy_from_slice(&self.field_ids_size.to_le_bytes());
        out[64..68].copy_from_slice(&self.method_ids_off.to_le_bytes());
        out[68..72].copy_from_slice(&self.method_ids_size.to_le_bytes());
        out[72..76].copy_from_slice(&self.class_defs_off.to_le_bytes());
        out[76..80].copy_from_slice(&self.class_defs_size.to_le_bytes());
        out
    }
}

/// The shared string data region, decoded once and indexed by [`StringId`].
#[derive(Debug, Default, Clone)]
pub struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    /// Builds a pool from already-decoded strings, in pool-index order.
    pub fn from_strings(strings: Vec<String>) -> Self {
        StringPool { strings }
    }

    /// Number of strings in the pool.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True if the pool has no entries.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Looks up a string by id, bounds-checked.
    pub fn get(&self, id: StringId) -> Result<&str, FormatError> {
        self.strings
            .get(id.raw() as usize)
            .map(String::as_str)
            .ok_or(FormatError::PoolIndexOutOfBounds {
                index: id.raw(),
                len: self.strings.len() as u32,
            })
    }
}

/// A parsed, not-yet-linked class definition.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub idx: ClassDefIdx,
    pub class_type: TypeId,
    pub access_flags: AccessFlags,
    /// `None` for a root class (e.g. the bootstrap Object equivalent).
    pub superclass_type: Option<TypeId>,
    pub interfaces: Vec<TypeId>,
    pub static_fields: Vec<FieldDef>,
    pub instance_fields: Vec<FieldDef>,
    pub direct_methods: Vec<MethodDef>,
    pub virtual_methods: Vec<MethodDef>,
}

bitflags::bitflags! {
    /// Access flags shared by classes, fields, and methods; not every bit
    /// is meaningful for every kind of member.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        const PUBLIC       = 0x0001;
        const PRIVATE      = 0x0002;
        const PROTECTED    = 0x0004;
        const STATIC       = 0x0008;
        const FINAL        = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE     = 0x0040;
        const BRIDGE       = 0x0040;
        const TRANSIENT    = 0x0080;
        const VARARGS      = 0x0080;
        const NATIVE       = 0x0100;
        const INTERFACE    = 0x0200;
        const ABSTRACT     = 0x0400;
        const STRICT       = 0x0800;
        const SYNTHETIC    = 0x1000;
        const ANNOTATION   = 0x2000;
        const ENUM         = 0x4000;
        const CONSTRUCTOR  = 0x10000;
        const MIRANDA      = 0x20000;
    }
}

impl AccessFlags {
    /// Package-private: none of public/private/protected set.
    pub fn is_package_private(self) -> bool {
        !self.intersects(Self::PUBLIC | Self::PRIVATE | Self::PROTECTED)
    }
}

/// A field declaration.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub field_id: FieldId,
    pub name: String,
    pub type_desc: TypeId,
    pub access_flags: AccessFlags,
}

/// A method declaration, with its decoded name/prototype and optional code.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub method_id: MethodId,
    pub name: String,
    pub proto: ProtoId,
    pub param_types: Vec<TypeId>,
    pub return_type: TypeId,
    pub access_flags: AccessFlags,
    pub code: Option<CodeItem>,
}

impl MethodDef {
    /// True for `<init>`/`<clinit>`.
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }

    /// True for an instance (not static) initializer.
    pub fn is_instance_init(&self) -> bool {
        self.name == "<init>"
    }
}

/// One exception-table entry covering `[start_addr, end_addr)`.
#[derive(Debug, Clone)]
pub struct TryItem {
    pub start_addr: InsnAddr,
    pub end_addr: InsnAddr,
    pub handlers: Vec<CatchHandler>,
}

/// One catch-handler clause: a concrete exception type, or the catch-all.
#[derive(Debug, Clone)]
pub struct CatchHandler {
    /// `None` for a catch-all (`catch-all` / finally) handler.
    pub exception_type: Option<TypeId>,
    pub handler_addr: InsnAddr,
}

/// A method's executable body.
#[derive(Debug, Clone)]
pub struct CodeItem {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub insns: Vec<u16>,
    pub tries: Vec<TryItem>,
}

impl CodeItem {
    /// Validates try-range well-formedness: within bounds, non-empty,
    /// start < end, and at least one handler per range.
    pub fn validate_try_catch(&self) -> Result<(), FormatError> {
        let insns_len = self.insns.len() as InsnAddr;
        for t in &self.tries {
            if t.start_addr >= t.end_addr {
                return Err(FormatError::MalformedTryCatch {
                    reason: String::from("try range start >= end"),
                });
            }
            if t.end_addr > insns_len {
                return Err(FormatError::MalformedTryCatch {
                    reason: String::from("try range extends past code"),
                });
            }
            if t.handlers.is_empty() {
                return Err(FormatError::MalformedTryCatch {
                    reason: String::from("try range has no handlers"),
                });
            }
            for h in &t.handlers {
                if h.handler_addr >= insns_len {
                    return Err(FormatError::MalformedTryCatch {
                        reason: String::from("handler address out of range"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Validates a freshly-decoded name against the member-name rules.
pub fn check_member_name(bytes: &[u8], allow_bracketed: bool) -> Result<String, FormatError> {
    validate::validate_member_name(bytes, allow_bracketed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_rejects_bad_magic() {
        let bytes = [0u8; 4];
        assert_eq!(ImageHeader::parse(&bytes), Err(FormatError::BadMagic));
    }

    #[test]
    fn header_parses_when_well_formed() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&SUPPORTED_VERSION.to_le_bytes());
        bytes.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 20]);
        for _ in 0..12 {
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }
        let header = ImageHeader::parse(&bytes).unwrap();
        assert_eq!(header.checksum, 0xDEADBEEF);
    }

    #[test]
    fn header_encode_round_trips_through_parse() {
        let header = ImageHeader {
            version: SUPPORTED_VERSION,
            checksum: 0x1234_5678,
            signature: [7u8; 20],
            string_ids_off: 80,
            string_ids_size: 3,
            type_ids_off: 100,
            type_ids_size: 4,
            proto_ids_off: 120,
            proto_ids_size: 2,
            field_ids_off: 140,
            field_ids_size: 5,
            method_ids_off: 160,
            method_ids_size: 6,
            class_defs_off: 180,
            class_defs_size: 1,
        };
        let encoded = header.encode();
        let decoded = ImageHeader::parse(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn try_catch_rejects_empty_handler_list() {
        let code = CodeItem {
            registers_size: 2,
            ins_size: 0,
            outs_size: 0,
            insns: alloc::vec![0u16; 4],
            tries: alloc::vec![TryItem {
                start_addr: 0,
                end_addr: 2,
                handlers: Vec::new(),
            }],
        };
        assert!(code.validate_try_catch().is_err());
    }

    #[test]
    fn try_catch_accepts_well_formed_range() {
        let code = CodeItem {
            registers_size: 2,
            ins_size: 0,
            outs_size: 0,
            insns: alloc::vec![0u16; 4],
            tries: alloc::vec![TryItem {
                start_addr: 0,
                end_addr: 2,
                handlers: alloc::vec![CatchHandler {
                    exception_type: None,
                    handler_addr: 3,
                }],
            }],
        };
        assert!(code.validate_try_catch().is_ok());
    }
}
