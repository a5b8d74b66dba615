//! Linear byte-addressed memory split into named segments (spec.md
//! section 4.2), modeled on `fuel-vm`'s `interpreter/memory.rs`
//! (`Vec<u8>`-backed regions with bounds-checked typed reads/writes),
//! generalized from that teacher's two regions (stack, heap) to Tacit's
//! five named segments.

use tacit_types::error::{VmError, VmResult};

use crate::config::{VmConfig, CELL_SIZE};

/// Which named region a byte address lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    Code,
    Stack,
    Rstack,
    Data,
    String,
}

impl Segment {
    fn name(self) -> &'static str {
        match self {
            Segment::Code => "CODE",
            Segment::Stack => "STACK",
            Segment::Rstack => "RSTACK",
            Segment::Data => "DATA",
            Segment::String => "STRING",
        }
    }
}

/// One named region: a growable byte buffer with a declared capacity.
#[derive(Debug, Clone)]
struct Region {
    bytes: Vec<u8>,
    capacity: usize,
}

impl Region {
    fn new(capacity: usize) -> Self {
        Region { bytes: Vec::new(), capacity }
    }

    fn ensure_len(&mut self, name: &str, len: usize) -> VmResult<()> {
        if len > self.capacity {
            return Err(VmError::Bounds {
                detail: format!("{name} segment exhausted: {len} > {}", self.capacity),
            });
        }
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
        Ok(())
    }

    fn check_read(&self, name: &str, addr: usize, width: usize) -> VmResult<()> {
        if addr.checked_add(width).is_none_or(|end| end > self.bytes.len()) {
            return Err(VmError::Bounds {
                detail: format!("{name} read out of bounds at {addr} (width {width})"),
            });
        }
        Ok(())
    }
}

/// The VM's five segments, addressed independently.
#[derive(Debug, Clone)]
pub struct Segments {
    code: Region,
    stack: Region,
    rstack: Region,
    data: Region,
    string: Region,
}

impl Segments {
    pub fn new(cfg: &VmConfig) -> Self {
        Segments {
            code: Region::new(cfg.code_segment_size),
            stack: Region::new(cfg.stack_segment_size),
            rstack: Region::new(cfg.rstack_segment_size),
            data: Region::new(cfg.data_segment_size),
            string: Region::new(cfg.string_segment_size),
        }
    }

    fn region(&self, seg: Segment) -> &Region {
        match seg {
            Segment::Code => &self.code,
            Segment::Stack => &self.stack,
            Segment::Rstack => &self.rstack,
            Segment::Data => &self.data,
            Segment::String => &self.string,
        }
    }

    fn region_mut(&mut self, seg: Segment) -> &mut Region {
        match seg {
            Segment::Code => &mut self.code,
            Segment::Stack => &mut self.stack,
            Segment::Rstack => &mut self.rstack,
            Segment::Data => &mut self.data,
            Segment::String => &mut self.string,
        }
    }

    pub fn len(&self, seg: Segment) -> usize {
        self.region(seg).bytes.len()
    }

    pub fn read8(&self, seg: Segment, addr: usize) -> VmResult<u8> {
        let r = self.region(seg);
        r.check_read(seg.name(), addr, 1)?;
        Ok(r.bytes[addr])
    }

    pub fn write8(&mut self, seg: Segment, addr: usize, v: u8) -> VmResult<()> {
        let name = seg.name();
        let r = self.region_mut(seg);
        r.ensure_len(name, addr + 1)?;
        r.bytes[addr] = v;
        Ok(())
    }

    pub fn read16(&self, seg: Segment, addr: usize) -> VmResult<u16> {
        let r = self.region(seg);
        r.check_read(seg.name(), addr, 2)?;
        Ok(u16::from_le_bytes([r.bytes[addr], r.bytes[addr + 1]]))
    }

    pub fn write16(&mut self, seg: Segment, addr: usize, v: u16) -> VmResult<()> {
        let name = seg.name();
        let r = self.region_mut(seg);
        r.ensure_len(name, addr + 2)?;
        r.bytes[addr..addr + 2].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn read_i16(&self, seg: Segment, addr: usize) -> VmResult<i16> {
        Ok(self.read16(seg, addr)? as i16)
    }

    pub fn write_i16(&mut self, seg: Segment, addr: usize, v: i16) -> VmResult<()> {
        self.write16(seg, addr, v as u16)
    }

    pub fn read_f32(&self, seg: Segment, addr: usize) -> VmResult<f32> {
        let r = self.region(seg);
        r.check_read(seg.name(), addr, 4)?;
        let bytes = [r.bytes[addr], r.bytes[addr + 1], r.bytes[addr + 2], r.bytes[addr + 3]];
        Ok(f32::from_le_bytes(bytes))
    }

    pub fn write_f32(&mut self, seg: Segment, addr: usize, v: f32) -> VmResult<()> {
        let name = seg.name();
        let r = self.region_mut(seg);
        r.ensure_len(name, addr + 4)?;
        r.bytes[addr..addr + 4].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Write arbitrary bytes (used by the string digest and the
    /// compiler buffer's bulk emitters).
    pub fn write_bytes(&mut self, seg: Segment, addr: usize, data: &[u8]) -> VmResult<()> {
        let name = seg.name();
        let r = self.region_mut(seg);
        r.ensure_len(name, addr + data.len())?;
        r.bytes[addr..addr + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read_bytes(&self, seg: Segment, addr: usize, len: usize) -> VmResult<&[u8]> {
        let r = self.region(seg);
        r.check_read(seg.name(), addr, len)?;
        Ok(&r.bytes[addr..addr + len])
    }

    /// A cell (4-byte) load/store, used by STACK/RSTACK/DATA which are
    /// addressed at cell granularity by the interpreter.
    pub fn read_cell(&self, seg: Segment, cell_index: usize) -> VmResult<u32> {
        let addr = cell_index * CELL_SIZE;
        let r = self.region(seg);
        r.check_read(seg.name(), addr, CELL_SIZE)?;
        let bytes = [r.bytes[addr], r.bytes[addr + 1], r.bytes[addr + 2], r.bytes[addr + 3]];
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_cell(&mut self, seg: Segment, cell_index: usize, v: u32) -> VmResult<()> {
        let addr = cell_index * CELL_SIZE;
        let name = seg.name();
        let r = self.region_mut(seg);
        r.ensure_len(name, addr + CELL_SIZE)?;
        r.bytes[addr..addr + CELL_SIZE].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_roundtrip() {
        let mut segs = Segments::new(&VmConfig::default());
        segs.write_cell(Segment::Stack, 3, 0xDEAD_BEEF).unwrap();
        assert_eq!(segs.read_cell(Segment::Stack, 3).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn out_of_bounds_read_errors() {
        let segs = Segments::new(&VmConfig::default());
        assert!(segs.read8(Segment::Code, 0).is_err());
    }

    #[test]
    fn exhausted_segment_errors() {
        let mut segs = Segments::new(&VmConfig { code_segment_size: 4, ..VmConfig::default() });
        assert!(segs.write8(Segment::Code, 10, 1).is_err());
        assert!(segs.write8(Segment::Code, 3, 1).is_ok());
    }
}
