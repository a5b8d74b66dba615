//! Tagged-value codec (spec.md section 4.1).
//!
//! A [`TaggedValue`] is a 32-bit IEEE-754 float that is either a finite
//! number (the float itself is the value) or a quiet-NaN encoding of
//! `(tag, meta, value)`. The NaN payload layout, from the mantissa's low
//! bit upward, is:
//!
//! ```text
//! bit:   0..16          16     17..21   22        23..30   31
//!        value (u16)    meta   tag      quiet-bit  exp=0xFF sign=0
//! ```
//!
//! The quiet bit (bit 22) is always set, which guarantees the encoded
//! word is a NaN regardless of tag/meta/value, so a plain `is_nan` check
//! distinguishes a tagged cell from a literal number.

use crate::error::{VmError, VmResult};
use crate::x1516;
use crate::MIN_USER_OPCODE;

const EXP_MASK: u32 = 0x7F80_0000;
const QUIET_NAN_BASE: u32 = 0x7FC0_0000;
const VALUE_MASK: u32 = 0xFFFF;
const META_SHIFT: u32 = 16;
const TAG_SHIFT: u32 = 17;
const TAG_MASK: u32 = 0xF;

/// Tag space for non-`NUMBER` tagged values. `NUMBER` itself is not a
/// member: it is represented structurally (any non-NaN float), never as
/// a NaN payload, so it never appears inside a [`Tag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Tag {
    /// Interned string address into the STRING segment.
    String = 0,
    /// Builtin opcode (`value < MIN_USER_OPCODE`) or X1516-encoded code
    /// address (`value >= MIN_USER_OPCODE`).
    Code = 1,
    /// LIST header; `value` is the payload slot count.
    List = 2,
    /// Absolute cell reference into a named segment.
    Ref = 3,
    /// Local variable slot index, relative to the current frame's `BP`.
    Local = 4,
    /// `NIL` or `DEFAULT`; carries no payload semantics beyond identity.
    Sentinel = 5,
}

impl Tag {
    fn from_bits(bits: u8) -> VmResult<Self> {
        match bits {
            0 => Ok(Tag::String),
            1 => Ok(Tag::Code),
            2 => Ok(Tag::List),
            3 => Ok(Tag::Ref),
            4 => Ok(Tag::Local),
            5 => Ok(Tag::Sentinel),
            other => Err(VmError::Invariant {
                detail: format!("no such tag: {other}"),
            }),
        }
    }
}

/// Identity of the two sentinel constants spec.md section 3 names.
pub const NIL_VALUE: i16 = 0;
pub const DEFAULT_VALUE: i16 = 1;

/// The decoded form of a [`TaggedValue`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
    /// A finite (or infinite) float that was not a tagged NaN.
    Number(f32),
    /// A tagged NaN payload. `value` is sign-extended for `Sentinel`
    /// (spec.md: signed 16-bit) and zero-extended for every other tag
    /// (unsigned 16-bit).
    Tagged { tag: Tag, meta: bool, value: i32 },
}

/// A single VM cell: either a plain number or a NaN-boxed tagged value.
#[derive(Clone, Copy, PartialEq)]
pub struct TaggedValue(f32);

impl std::fmt::Debug for TaggedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaggedValue({:?})", self.untag())
    }
}

impl TaggedValue {
    /// Build a plain `NUMBER` cell.
    pub fn number(v: f32) -> Self {
        TaggedValue(v)
    }

    /// Build a tagged cell. `value` is masked to 16 bits; callers that
    /// need the signed `SENTINEL` domain should use [`TaggedValue::sentinel`].
    pub fn tagged(tag: Tag, meta: bool, value: u16) -> Self {
        let bits = QUIET_NAN_BASE
            | ((tag as u32) & TAG_MASK) << TAG_SHIFT
            | (meta as u32) << META_SHIFT
            | (value as u32 & VALUE_MASK);
        TaggedValue(f32::from_bits(bits))
    }

    /// Build a `SENTINEL` cell from a signed 16-bit value (`NIL_VALUE` or
    /// `DEFAULT_VALUE`).
    pub fn sentinel(value: i16) -> Self {
        TaggedValue::tagged(Tag::Sentinel, false, value as u16)
    }

    pub fn nil() -> Self {
        TaggedValue::sentinel(NIL_VALUE)
    }

    pub fn default_marker() -> Self {
        TaggedValue::sentinel(DEFAULT_VALUE)
    }

    /// Decode the cell into tag/meta/value, or a plain number.
    pub fn untag(&self) -> Decoded {
        let bits = self.0.to_bits();
        if bits & EXP_MASK != EXP_MASK {
            return Decoded::Number(self.0);
        }
        let raw_value = (bits & VALUE_MASK) as u16;
        let meta = (bits >> META_SHIFT) & 1 != 0;
        let tag_bits = ((bits >> TAG_SHIFT) & TAG_MASK) as u8;
        let tag = Tag::from_bits(tag_bits).unwrap_or(Tag::Sentinel);
        let value = match tag {
            Tag::Sentinel => raw_value as i16 as i32,
            _ => raw_value as i32,
        };
        Decoded::Tagged { tag, meta, value }
    }

    pub fn is_number(&self) -> bool {
        matches!(self.untag(), Decoded::Number(_))
    }

    fn tag_is(&self, want: Tag) -> bool {
        matches!(self.untag(), Decoded::Tagged { tag, .. } if tag == want)
    }

    pub fn is_code(&self) -> bool {
        self.tag_is(Tag::Code)
    }

    pub fn is_list(&self) -> bool {
        self.tag_is(Tag::List)
    }

    pub fn is_ref(&self) -> bool {
        self.tag_is(Tag::Ref)
    }

    pub fn is_local(&self) -> bool {
        self.tag_is(Tag::Local)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.untag(), Decoded::Tagged { tag: Tag::Sentinel, value, .. } if value == NIL_VALUE as i32)
    }

    pub fn is_default_marker(&self) -> bool {
        matches!(self.untag(), Decoded::Tagged { tag: Tag::Sentinel, value, .. } if value == DEFAULT_VALUE as i32)
    }

    /// Same cell with the `meta` bit (the dictionary's immediate flag,
    /// spec.md section 4.4) set to `meta`. A no-op on a plain `NUMBER`.
    pub fn with_meta(&self, meta: bool) -> Self {
        match self.untag() {
            Decoded::Number(n) => TaggedValue(n),
            Decoded::Tagged { tag, value, .. } => TaggedValue::tagged(tag, meta, value as u16),
        }
    }

    /// Raw bit pattern, for serialization into the STACK/RSTACK/DATA
    /// segments (little-endian, per spec.md section 6).
    pub fn to_bits(self) -> u32 {
        self.0.to_bits()
    }

    pub fn from_bits(bits: u32) -> Self {
        TaggedValue(f32::from_bits(bits))
    }

    /// `CODE`-tagged reference to a builtin opcode.
    pub fn create_builtin_ref(op: u8) -> VmResult<Self> {
        if op >= MIN_USER_OPCODE {
            return Err(VmError::Bounds {
                detail: format!("builtin opcode {op} >= MIN_USER_OPCODE"),
            });
        }
        Ok(TaggedValue::tagged(Tag::Code, false, op as u16))
    }

    /// `CODE`-tagged reference to a bytecode address. Addresses below
    /// `MIN_USER_OPCODE` are stored directly (ambiguity is impossible:
    /// real code entry points start past the prelude); addresses at or
    /// above it go through [`x1516::encode`].
    pub fn create_code_ref(addr: u32, align_shift: u8) -> VmResult<Self> {
        if addr < MIN_USER_OPCODE as u32 {
            return Ok(TaggedValue::tagged(Tag::Code, false, addr as u16));
        }
        let enc = x1516::encode(addr, align_shift)?;
        Ok(TaggedValue::tagged(Tag::Code, false, enc))
    }

    /// `REF`-tagged pointer into the DATA segment.
    pub fn create_global_ref(offset: u16) -> Self {
        TaggedValue::tagged(Tag::Ref, false, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_roundtrips_through_bits() {
        for v in [0.0f32, -1.5, 42.0, 3.5e10, -0.0] {
            let t = TaggedValue::number(v);
            match t.untag() {
                Decoded::Number(got) => assert_eq!(got.to_bits(), v.to_bits()),
                other => panic!("expected Number, got {other:?}"),
            }
        }
    }

    #[test]
    fn tagged_roundtrip_all_tags() {
        use strum::IntoEnumIterator;
        for tag in Tag::iter() {
            for meta in [false, true] {
                for value in [0u16, 1, 127, 128, 32767, 65535] {
                    let t = TaggedValue::tagged(tag, meta, value);
                    match t.untag() {
                        Decoded::Tagged { tag: gt, meta: gm, value: gv } => {
                            assert_eq!(gt, tag);
                            assert_eq!(gm, meta);
                            let expect = if tag == Tag::Sentinel {
                                value as i16 as i32
                            } else {
                                value as i32
                            };
                            assert_eq!(gv, expect);
                        }
                        other => panic!("expected Tagged, got {other:?}"),
                    }
                }
            }
        }
    }

    #[test]
    fn tagged_cell_is_always_nan() {
        let t = TaggedValue::tagged(Tag::Code, false, 0);
        assert!(f32::from_bits(t.to_bits()).is_nan());
    }

    #[test]
    fn builtin_ref_rejects_user_opcode() {
        assert!(TaggedValue::create_builtin_ref(128).is_err());
        assert!(TaggedValue::create_builtin_ref(127).is_ok());
    }

    #[test]
    fn code_ref_below_threshold_is_raw() {
        let r = TaggedValue::create_code_ref(10, 1).unwrap();
        match r.untag() {
            Decoded::Tagged { tag: Tag::Code, value, .. } => assert_eq!(value, 10),
            other => panic!("{other:?}"),
        }
        // bit 7 of the low byte must be clear for a raw builtin/low address.
        assert_eq!(r.to_bits() as u8 & 0x80, 0);
    }

    #[test]
    fn code_ref_above_threshold_sets_bit7() {
        let r = TaggedValue::create_code_ref(4000, 1).unwrap();
        match r.untag() {
            Decoded::Tagged { tag: Tag::Code, value, .. } => {
                assert_eq!(value as u8 & 0x80, 0x80);
            }
            other => panic!("{other:?}"),
        }
    }
}
