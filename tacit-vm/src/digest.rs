//! String interning (spec.md section 4.3). No teacher analog — `fuel-vm`
//! never interns strings — so this is written directly from the spec's
//! API contract: intern to a 16-bit address, idempotent per session,
//! reverse lookup by address.

use std::collections::HashMap;

use tacit_types::error::{VmError, VmResult};

use crate::memory::{Segment, Segments};

#[derive(Debug, Clone, Default)]
pub struct StringDigest {
    addr_of: HashMap<String, u16>,
    /// `(byte offset into STRING segment, length)` for each interned
    /// string, indexed by its 16-bit address.
    spans: Vec<(usize, usize)>,
    next_free: usize,
}

impl StringDigest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `s`, writing its bytes into the STRING segment on first
    /// occurrence. Returns the same address for repeated interning of an
    /// equal string within this session.
    pub fn intern(&mut self, segments: &mut Segments, s: &str) -> VmResult<u16> {
        if let Some(&addr) = self.addr_of.get(s) {
            return Ok(addr);
        }
        let addr = self.spans.len();
        if addr > u16::MAX as usize {
            return Err(VmError::Bounds { detail: "string digest exhausted".into() });
        }
        let offset = self.next_free;
        segments.write_bytes(Segment::String, offset, s.as_bytes())?;
        self.spans.push((offset, s.len()));
        self.next_free += s.len();
        self.addr_of.insert(s.to_string(), addr as u16);
        Ok(addr as u16)
    }

    /// Reverse lookup: read the string back out of the STRING segment.
    pub fn get(&self, segments: &Segments, addr: u16) -> VmResult<String> {
        let &(offset, len) = self.spans.get(addr as usize).ok_or_else(|| VmError::Bounds {
            detail: format!("no interned string at address {addr}"),
        })?;
        let bytes = segments.read_bytes(Segment::String, offset, len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| VmError::Invariant { detail: format!("interned string not utf8: {e}") })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    #[test]
    fn intern_is_idempotent_and_reversible() {
        let mut segs = Segments::new(&VmConfig::default());
        let mut digest = StringDigest::new();
        let a1 = digest.intern(&mut segs, "hello").unwrap();
        let a2 = digest.intern(&mut segs, "hello").unwrap();
        assert_eq!(a1, a2);
        let a3 = digest.intern(&mut segs, "world").unwrap();
        assert_ne!(a1, a3);
        assert_eq!(digest.get(&segs, a1).unwrap(), "hello");
        assert_eq!(digest.get(&segs, a3).unwrap(), "world");
    }
}
