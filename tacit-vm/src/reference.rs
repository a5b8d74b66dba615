//! Typed `REF` addressing.
//!
//! Spec.md section 9 flags the source's scheme — a bare absolute cell
//! index whose owning segment is "recovered by range-checks" — as a
//! pattern that needs re-architecting. Tacit keeps the wire format (a
//! `REF` tagged value still carries one 16-bit absolute cell index, since
//! that is the cell format spec.md section 3 fixes) but gives every
//! internal consumer (`Fetch`/`Store`/`VarRef`/`GlobalRef`/list addressing)
//! a typed [`RefAddr`] instead of a raw integer, with the segment ranges
//! assigned explicitly up front rather than inferred.

use tacit_types::error::{VmError, VmResult};

use crate::memory::Segment;

/// Disjoint base offsets the three REF-addressable segments occupy
/// within the unified 16-bit absolute cell space a wire `REF` value
/// spans. Each range holds up to `RANGE_CELLS` cells.
const RANGE_CELLS: u32 = 0x4000; // 16384 cells per segment
const BASE_RSTACK: u32 = 0;
const BASE_DATA: u32 = RANGE_CELLS;
const BASE_STACK: u32 = RANGE_CELLS * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefAddr {
    pub segment: Segment,
    pub cell: usize,
}

impl RefAddr {
    pub fn new(segment: Segment, cell: usize) -> Self {
        RefAddr { segment, cell }
    }

    fn base(segment: Segment) -> Option<u32> {
        match segment {
            Segment::Rstack => Some(BASE_RSTACK),
            Segment::Data => Some(BASE_DATA),
            Segment::Stack => Some(BASE_STACK),
            Segment::Code | Segment::String => None,
        }
    }

    /// Pack into the 16-bit absolute index a wire `REF` value carries.
    pub fn to_u16(self) -> VmResult<u16> {
        let base = RefAddr::base(self.segment).ok_or_else(|| VmError::Invariant {
            detail: "REF cannot address CODE or STRING segments".into(),
        })?;
        let idx = base + self.cell as u32;
        if self.cell as u32 >= RANGE_CELLS || idx > u16::MAX as u32 {
            return Err(VmError::Bounds {
                detail: format!("REF cell {} out of range for its segment", self.cell),
            });
        }
        Ok(idx as u16)
    }

    /// Recover `(segment, cell)` from a wire `REF` value.
    pub fn from_u16(idx: u16) -> VmResult<Self> {
        let idx = idx as u32;
        let (segment, base) = if idx < BASE_DATA {
            (Segment::Rstack, BASE_RSTACK)
        } else if idx < BASE_STACK {
            (Segment::Data, BASE_DATA)
        } else if idx < BASE_STACK + RANGE_CELLS {
            (Segment::Stack, BASE_STACK)
        } else {
            return Err(VmError::Bounds { detail: format!("REF index {idx} out of range") });
        };
        Ok(RefAddr { segment, cell: (idx - base) as usize })
    }
}
