//! Member-name, type-descriptor, and class-name validators exposed to the
//! DEX structural sanity pass. These are pure functions over decoded
//! MUTF-8 strings; they do not touch the loaded-classes table.

use alloc::string::String;
use dexprep_types::mutf8;

use crate::error::FormatError;

/// Maximum number of leading `[` in a type descriptor.
pub const MAX_ARRAY_DEPTH: u32 = 255;

fn invalid_name(reason: &str) -> FormatError {
    FormatError::InvalidMemberName {
        reason: String::from(reason),
    }
}

fn invalid_descriptor(reason: &str) -> FormatError {
    FormatError::InvalidDescriptor {
        reason: String::from(reason),
    }
}

/// True if `c` is a permitted leading/continuation character for an
/// ordinary (non-bracketed) member name: ASCII letters, digits, `_`, `$`,
/// or any non-ASCII scalar value (the format defers non-ASCII legality to
/// the MUTF-8 decode succeeding at all).
fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || !c.is_ascii()
}

/// Validates a member name: either an ordinary identifier, or a `<...>`
/// bracketed name which is only legal when `allow_bracketed` is set (i.e.
/// this name came from a declaration site, not a reference).
pub fn validate_member_name(bytes: &[u8], allow_bracketed: bool) -> Result<String, FormatError> {
    let s = mutf8::decode(bytes).map_err(|_| invalid_name("not valid MUTF-8"))?;
    if s.is_empty() {
        return Err(invalid_name("empty name"));
    }
    if s.starts_with('<') {
        if !allow_bracketed {
            return Err(invalid_name("bracketed name not allowed at this site"));
        }
        if !s.ends_with('>') || s.len() < 3 {
            return Err(invalid_name("malformed bracketed name"));
        }
        let inner = &s[1..s.len() - 1];
        if inner != "init" && inner != "clinit" {
            return Err(invalid_name("unknown bracketed name"));
        }
        return Ok(s);
    }
    if !s.chars().all(is_name_char) {
        return Err(invalid_name("character not permitted in member name"));
    }
    Ok(s)
}

/// The decoded shape of a type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// A primitive type: one of `BCDFIJSZ`.
    Primitive(char),
    /// `V`, only legal as a return type with zero array dimensions.
    Void,
    /// `L<class-name>;`.
    Class(String),
    /// An array of `dims` dimensions over `element`.
    Array { dims: u32, element: alloc::boxed::Box<Descriptor> },
}

/// Validates and parses a type descriptor.
pub fn validate_descriptor(bytes: &[u8]) -> Result<Descriptor, FormatError> {
    let s = mutf8::decode(bytes).map_err(|_| invalid_descriptor("not valid MUTF-8"))?;
    let (desc, consumed) = parse_descriptor(&s)?;
    if consumed != s.len() {
        return Err(invalid_descriptor("trailing data after descriptor"));
    }
    Ok(desc)
}

fn parse_descriptor(s: &str) -> Result<(Descriptor, usize), FormatError> {
    let bytes = s.as_bytes();
    let mut dims = 0u32;
    let mut i = 0usize;
    while i < bytes.len() && bytes[i] == b'[' {
        dims += 1;
        i += 1;
        if dims > MAX_ARRAY_DEPTH {
            return Err(invalid_descriptor("array depth exceeds 255"));
        }
    }
    if i >= bytes.len() {
        return Err(invalid_descriptor("empty descriptor after array prefix"));
    }
    let c = bytes[i] as char;
    let (base, base_len) = match c {
        'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' => (Descriptor::Primitive(c), 1),
        'V' => {
            if dims != 0 {
                return Err(invalid_descriptor("'V' cannot be an array element"));
            }
            (Descriptor::Void, 1)
        }
        'L' => {
            let rest = &s[i + 1..];
            let end = rest
                .find(';')
                .ok_or_else(|| invalid_descriptor("missing ';' terminator"))?;
            let class_name = &rest[..end];
            validate_class_name(class_name.as_bytes(), false)?;
            (Descriptor::Class(String::from(class_name)), 1 + end + 1)
        }
        _ => return Err(invalid_descriptor("unknown descriptor leading character")),
    };
    let total = i + base_len;
    if dims == 0 {
        Ok((base, total))
    } else {
        Ok((
            Descriptor::Array {
                dims,
                element: alloc::boxed::Box::new(base),
            },
            total,
        ))
    }
}

/// Validates the bracketed class-name portion of an `L...;` descriptor
/// (the part between `L` and `;`): a non-empty sequence of components
/// separated by `/` (or `.` if `dotted` is set), each a valid member name
/// that is not a bracketed `<...>` name.
pub fn validate_class_name(bytes: &[u8], dotted: bool) -> Result<(), FormatError> {
    let s = mutf8::decode(bytes).map_err(|_| invalid_name("not valid MUTF-8"))?;
    if s.is_empty() {
        return Err(invalid_name("empty class name"));
    }
    let sep = if dotted { '.' } else { '/' };
    for component in s.split(sep) {
        if component.is_empty() {
            return Err(invalid_name("empty path component"));
        }
        if component.starts_with('<') {
            return Err(invalid_name("bracketed name not allowed in class name"));
        }
        if !component.chars().all(is_name_char) {
            return Err(invalid_name(
                "character not permitted in class name component",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_member_name() {
        assert_eq!(validate_member_name(b"doStuff", false).unwrap(), "doStuff");
    }

    #[test]
    fn rejects_empty_name() {
        assert!(validate_member_name(b"", false).is_err());
    }

    #[test]
    fn accepts_init_only_at_declaration() {
        assert!(validate_member_name(b"<init>", true).is_ok());
        assert!(validate_member_name(b"<init>", false).is_err());
    }

    #[test]
    fn rejects_unknown_bracketed_name() {
        assert!(validate_member_name(b"<bogus>", true).is_err());
    }

    #[test]
    fn parses_primitive_descriptor() {
        assert_eq!(validate_descriptor(b"I").unwrap(), Descriptor::Primitive('I'));
    }

    #[test]
    fn parses_class_descriptor() {
        let d = validate_descriptor(b"Ljava/lang/Object;").unwrap();
        assert_eq!(d, Descriptor::Class(String::from("java/lang/Object")));
    }

    #[test]
    fn parses_array_descriptor_with_depth() {
        let d = validate_descriptor(b"[[I").unwrap();
        match d {
            Descriptor::Array { dims, element } => {
                assert_eq!(dims, 2);
                assert_eq!(*element, Descriptor::Primitive('I'));
            }
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn rejects_void_array() {
        assert!(validate_descriptor(b"[V").is_err());
    }

    #[test]
    fn rejects_excessive_array_depth() {
        let mut s = alloc::vec![b'['; 256];
        s.push(b'I');
        assert!(validate_descriptor(&s).is_err());
    }

    #[test]
    fn rejects_unterminated_class_descriptor() {
        assert!(validate_descriptor(b"Ljava/lang/Object").is_err());
    }

    #[test]
    fn class_name_rejects_empty_component() {
        assert!(validate_class_name(b"java//Object", false).is_err());
    }
}
