// Pattern: evaluation output tree describing typed regions of the byte provider

use std::fmt::Write as _;
use std::sync::Arc;

use crate::parser::ast::Endianness;

use super::provider::ByteProvider;

/// Colours handed out to patterns without a `color` attribute, packed as RGBA.
pub const PALETTE: [u32; 10] = [
    0x70B4D4FF,
    0xA7D28DFF,
    0xF2C46FFF,
    0xE88A8AFF,
    0xB99BDDFF,
    0x7FCDBBFF,
    0xF5A3C7FF,
    0xC9C06BFF,
    0x9AB8F0FF,
    0xE3A46CFF,
];

/// Static array entries decoded for `formatted_value`
const PREVIEW_ENTRIES: u64 = 4;

/// A named entry of an enum pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumEntry {
    pub name: String,
    /// Raw value, masked to the underlying type's width
    pub value: u128,
}

/// A node in the evaluation result tree.
/// Each node describes one typed region of the byte provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// Variable name (`[i]` for array entries)
    pub name: String,
    /// Type name as written in the source (`u32`, `Header`, `u8[4]`)
    pub type_name: String,
    /// Logical start address
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
    pub endian: Endianness,
    /// Packed RGBA
    pub color: u32,
    /// Set by `[[name("...")]]`
    pub display_name: Option<String>,
    pub comment: Option<String>,
    pub hidden: bool,
    pub inlined: bool,
    pub kind: PatternKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    Unsigned(u128),
    Signed(i128),
    Float(f64),
    Boolean(bool),
    Character(char),
    WideCharacter(char),
    String(String),
    WideString(String),
    Enum {
        value: u128,
        signed: bool,
        entries: Arc<[EnumEntry]>,
    },
    BitfieldField {
        bit_offset: u32,
        bit_size: u32,
        value: u128,
    },
    Bitfield {
        fields: Vec<Pattern>,
    },
    Struct {
        members: Vec<Pattern>,
    },
    Union {
        members: Vec<Pattern>,
    },
    Pointer {
        pointee: Box<Pattern>,
        /// Logical address the pointer holds
        address: u128,
    },
    /// `count` contiguous copies of a scalar `template`, decoded on demand
    ArrayStatic {
        template: Box<Pattern>,
        count: u64,
    },
    ArrayDynamic {
        entries: Vec<Pattern>,
    },
    Padding,
}

impl Pattern {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        offset: u64,
        size: u64,
        kind: PatternKind,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            offset,
            size,
            endian: Endianness::Little,
            color: PALETTE[0],
            display_name: None,
            comment: None,
            hidden: false,
            inlined: false,
            kind,
        }
    }

    pub fn with_endian(mut self, endian: Endianness) -> Self {
        self.endian = endian;
        self
    }

    /// One past the last byte covered
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    /// The display name if one was set, otherwise the variable name
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Type name for display, with an endianness prefix on multi-byte scalars read big-endian
    pub fn formatted_type_name(&self) -> String {
        let multi_byte_scalar = self.size > 1
            && matches!(
                self.kind,
                PatternKind::Unsigned(_)
                    | PatternKind::Signed(_)
                    | PatternKind::Float(_)
                    | PatternKind::WideCharacter(_)
                    | PatternKind::Enum { .. }
            );
        if multi_byte_scalar && self.endian == Endianness::Big {
            format!("be {}", self.type_name)
        } else {
            self.type_name.clone()
        }
    }

    /// Human-readable value. The provider is consulted for static array entries.
    pub fn formatted_value(&self, provider: &dyn ByteProvider) -> String {
        let width = (self.size as usize).saturating_mul(2).max(2);
        match &self.kind {
            PatternKind::Unsigned(v) => format!("{} (0x{:0width$X})", v, v, width = width),
            PatternKind::Signed(v) => {
                let bits = (*v as u128) & mask(self.size);
                format!("{} (0x{:0width$X})", v, bits, width = width)
            }
            PatternKind::Float(v) => {
                if self.size == 4 {
                    format!("{}", *v as f32)
                } else {
                    format!("{}", v)
                }
            }
            PatternKind::Boolean(b) => b.to_string(),
            PatternKind::Character(c) | PatternKind::WideCharacter(c) => {
                format!("'{}'", c.escape_default())
            }
            PatternKind::String(s) | PatternKind::WideString(s) => {
                format!("\"{}\"", s.escape_default())
            }
            PatternKind::Enum { value, entries, .. } => {
                match entries.iter().find(|e| e.value == *value) {
                    Some(entry) => format!("{}::{}", self.type_name, entry.name),
                    None => format!("{}::???", self.type_name),
                }
            }
            PatternKind::BitfieldField { value, .. } => format!("{} (0x{:X})", value, value),
            PatternKind::Bitfield { fields } => {
                let mut out = String::from("{ ");
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let value = match field.kind {
                        PatternKind::BitfieldField { value, .. } => value,
                        _ => 0,
                    };
                    let _ = write!(out, "{} = {}", field.display_name(), value);
                }
                out.push_str(" }");
                out
            }
            PatternKind::Struct { .. } | PatternKind::Union { .. } => "{ ... }".to_string(),
            PatternKind::Pointer { address, .. } => format!("*(0x{:X})", address),
            PatternKind::ArrayStatic { count, .. } => {
                let shown = (*count).min(PREVIEW_ENTRIES);
                let mut parts: Vec<String> = (0..shown)
                    .map(|i| match self.entry(i, provider) {
                        Some(entry) => entry.formatted_value(provider),
                        None => "??".to_string(),
                    })
                    .collect();
                if *count > shown {
                    parts.push("...".to_string());
                }
                if parts.is_empty() {
                    "[ ]".to_string()
                } else {
                    format!("[ {} ]", parts.join(", "))
                }
            }
            PatternKind::ArrayDynamic { .. } => "[ ... ]".to_string(),
            PatternKind::Padding => String::new(),
        }
    }

    /// Direct children of composite patterns. Static arrays expose theirs through [`Pattern::entry`].
    pub fn children(&self) -> &[Pattern] {
        match &self.kind {
            PatternKind::Struct { members } | PatternKind::Union { members } => members,
            PatternKind::Bitfield { fields } => fields,
            PatternKind::ArrayDynamic { entries } => entries,
            PatternKind::Pointer { pointee, .. } => std::slice::from_ref(pointee.as_ref()),
            _ => &[],
        }
    }

    /// Child by variable name
    pub fn member(&self, name: &str) -> Option<&Pattern> {
        match &self.kind {
            PatternKind::Pointer { pointee, .. } => pointee.member(name),
            _ => self.children().iter().rev().find(|p| p.name == name),
        }
    }

    /// Number of array entries; 0 for non-arrays
    pub fn entry_count(&self) -> u64 {
        match &self.kind {
            PatternKind::ArrayStatic { count, .. } => *count,
            PatternKind::ArrayDynamic { entries } => entries.len() as u64,
            _ => 0,
        }
    }

    /// Array entry `index`. Static array entries are re-read from the provider.
    pub fn entry(&self, index: u64, provider: &dyn ByteProvider) -> Option<Pattern> {
        match &self.kind {
            PatternKind::ArrayStatic { template, count } => {
                if index >= *count {
                    return None;
                }
                let offset = self.offset + index * template.size;
                let mut entry = (**template).clone();
                entry.name = format!("[{}]", index);
                entry.offset = offset;
                let physical = offset.checked_sub(provider.base_address())?;
                let mut buf = vec![0u8; template.size as usize];
                provider.read(physical, &mut buf).ok()?;
                entry.kind = decode_like(&template.kind, &buf, template.endian);
                Some(entry)
            }
            PatternKind::ArrayDynamic { entries } => {
                usize::try_from(index).ok().and_then(|i| entries.get(i)).cloned()
            }
            _ => None,
        }
    }
}

/// Finds the parent of `child` (compared by identity) among `roots` and their descendants.
pub fn parent_of<'a>(roots: &'a [Pattern], child: &Pattern) -> Option<&'a Pattern> {
    for root in roots {
        if let Some(parent) = find_parent(root, child) {
            return Some(parent);
        }
    }
    None
}

fn find_parent<'a>(node: &'a Pattern, child: &Pattern) -> Option<&'a Pattern> {
    for c in node.children() {
        if std::ptr::eq(c, child) {
            return Some(node);
        }
        if let Some(parent) = find_parent(c, child) {
            return Some(parent);
        }
    }
    None
}

/// Bit mask covering `size` bytes
pub(crate) fn mask(size: u64) -> u128 {
    if size >= 16 {
        u128::MAX
    } else {
        (1u128 << (size * 8)) - 1
    }
}

pub(crate) fn bytes_to_unsigned(bytes: &[u8], endian: Endianness) -> u128 {
    let mut value: u128 = 0;
    match endian {
        Endianness::Little => {
            for &b in bytes.iter().rev() {
                value = (value << 8) | b as u128;
            }
        }
        Endianness::Big => {
            for &b in bytes {
                value = (value << 8) | b as u128;
            }
        }
    }
    value
}

/// Interpret the low `size` bytes of `value` as two's complement
pub(crate) fn sign_extend(value: u128, size: u64) -> i128 {
    if size >= 16 || size == 0 {
        return value as i128;
    }
    let bits = size * 8;
    let shift = 128 - bits as u32;
    ((value << shift) as i128) >> shift
}

/// Decode `bytes` into the same scalar kind as `template`
pub(crate) fn decode_like(template: &PatternKind, bytes: &[u8], endian: Endianness) -> PatternKind {
    let raw = bytes_to_unsigned(bytes, endian);
    match template {
        PatternKind::Signed(_) => PatternKind::Signed(sign_extend(raw, bytes.len() as u64)),
        PatternKind::Float(_) => {
            if bytes.len() == 4 {
                PatternKind::Float(f32::from_bits(raw as u32) as f64)
            } else {
                PatternKind::Float(f64::from_bits(raw as u64))
            }
        }
        PatternKind::Boolean(_) => PatternKind::Boolean(raw != 0),
        PatternKind::Character(_) => PatternKind::Character(raw as u8 as char),
        PatternKind::WideCharacter(_) => {
            PatternKind::WideCharacter(char::from_u32(raw as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
        }
        PatternKind::Enum { signed, entries, .. } => PatternKind::Enum {
            value: raw,
            signed: *signed,
            entries: Arc::clone(entries),
        },
        _ => PatternKind::Unsigned(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::provider::SliceProvider;

    fn leaf(name: &str, offset: u64, size: u64, value: u128) -> Pattern {
        Pattern::new(name, "u8", offset, size, PatternKind::Unsigned(value))
    }

    #[test]
    fn test_pattern_creation() {
        let p = Pattern::new("magic", "u32", 0, 4, PatternKind::Unsigned(0x474E5089));
        assert_eq!(p.name, "magic");
        assert_eq!(p.end(), 4);
        assert_eq!(p.display_name(), "magic");
        assert_eq!(p.formatted_value(&SliceProvider::new(&[])), "1196314761 (0x474E5089)");
    }

    #[test]
    fn test_formatted_type_name_big_endian() {
        let p = Pattern::new("v", "u32", 0, 4, PatternKind::Unsigned(1)).with_endian(Endianness::Big);
        assert_eq!(p.formatted_type_name(), "be u32");
        let byte = Pattern::new("b", "u8", 0, 1, PatternKind::Unsigned(1)).with_endian(Endianness::Big);
        assert_eq!(byte.formatted_type_name(), "u8");
    }

    #[test]
    fn test_signed_formatting_masks_hex() {
        let p = Pattern::new("s", "s8", 0, 1, PatternKind::Signed(-1));
        assert_eq!(p.formatted_value(&SliceProvider::new(&[])), "-1 (0xFF)");
    }

    #[test]
    fn test_enum_formatting() {
        let entries: Arc<[EnumEntry]> = vec![EnumEntry {
            name: "A".into(),
            value: 1,
        }]
        .into();
        let provider = SliceProvider::new(&[]);
        let hit = Pattern::new(
            "e",
            "Kind",
            0,
            1,
            PatternKind::Enum {
                value: 1,
                signed: false,
                entries: Arc::clone(&entries),
            },
        );
        assert_eq!(hit.formatted_value(&provider), "Kind::A");
        let miss = Pattern::new("e", "Kind", 0, 1, PatternKind::Enum { value: 9, signed: false, entries });
        assert_eq!(miss.formatted_value(&provider), "Kind::???");
    }

    #[test]
    fn test_static_array_entries_read_on_demand() {
        let data = [0x01, 0x00, 0x02, 0x00];
        let provider = SliceProvider::new(&data);
        let template = Pattern::new("[0]", "u16", 0, 2, PatternKind::Unsigned(1));
        let array = Pattern::new(
            "arr",
            "u16[2]",
            0,
            4,
            PatternKind::ArrayStatic {
                template: Box::new(template),
                count: 2,
            },
        );
        let second = array.entry(1, &provider).unwrap();
        assert_eq!(second.name, "[1]");
        assert_eq!(second.offset, 2);
        assert_eq!(second.kind, PatternKind::Unsigned(2));
        assert!(array.entry(2, &provider).is_none());
        assert_eq!(array.entry_count(), 2);
        assert!(array.children().is_empty());
        assert_eq!(array.formatted_value(&provider), "[ 1 (0x0001), 2 (0x0002) ]");
    }

    #[test]
    fn test_parent_of_walks_tree() {
        let s = Pattern::new(
            "s",
            "S",
            0,
            2,
            PatternKind::Struct {
                members: vec![leaf("a", 0, 1, 1), leaf("b", 1, 1, 2)],
            },
        );
        let roots = vec![s];
        let child = &roots[0].children()[1];
        let parent = parent_of(&roots, child).unwrap();
        assert_eq!(parent.name, "s");
        assert!(parent_of(&roots, &roots[0]).is_none());
    }

    #[test]
    fn test_member_lookup_through_pointer() {
        let target = Pattern::new(
            "*(p)",
            "S",
            4,
            1,
            PatternKind::Struct {
                members: vec![leaf("x", 4, 1, 7)],
            },
        );
        let ptr = Pattern::new(
            "p",
            "S*",
            0,
            4,
            PatternKind::Pointer {
                pointee: Box::new(target),
                address: 4,
            },
        );
        assert_eq!(ptr.member("x").unwrap().kind, PatternKind::Unsigned(7));
        assert_eq!(ptr.children().len(), 1);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0xFF, 1), -1);
        assert_eq!(sign_extend(0x7F, 1), 127);
        assert_eq!(sign_extend(0xFFFE, 2), -2);
        assert_eq!(mask(2), 0xFFFF);
        assert_eq!(mask(16), u128::MAX);
    }

    #[test]
    fn test_bytes_to_unsigned_endianness() {
        let bytes = [0x01, 0x00, 0x00, 0x00];
        assert_eq!(bytes_to_unsigned(&bytes, Endianness::Little), 1);
        assert_eq!(bytes_to_unsigned(&bytes, Endianness::Big), 0x0100_0000);
    }
}
