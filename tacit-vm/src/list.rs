//! Stack-native compound LIST values (spec.md section 4.10). No teacher
//! analog (`fuel-vm` has no compound-value heap); written directly from
//! the spec's construction/traversal algorithms.
//!
//! Construction note (resolves an ambiguity in spec.md section 4.10): the
//! prose describes reversing the `s+1`-cell span "if outermost", but a
//! nested compound must *also* end up with its own header on top of its
//! own payload — otherwise the generic traversal rule ("if a slot's
//! header cell is a LIST, skip `s_child+1` cells") has nothing
//! self-describing to peek at when walking a parent list's logical
//! elements. This implementation reverses on *every* `CloseList`,
//! treating each previously-closed nested compound as an atomic,
//! internally-untouched block when reordering the parent's slots — which
//! is what keeps invariant 6 (section 8) true at every nesting level.

use tacit_types::error::{VmError, VmResult};
use tacit_types::value::{Decoded, Tag, TaggedValue};

use crate::interpreter::Interpreter;
use crate::memory::Segment;
use crate::reference::RefAddr;

/// `OpenList`: begin constructing a new LIST. Pushes a zero-length
/// placeholder header and remembers its address for the matching
/// `CloseList`.
pub fn open_list(vm: &mut Interpreter) -> VmResult<()> {
    vm.list_depth += 1;
    let header_addr = vm.sp;
    vm.push_stack(TaggedValue::tagged(Tag::List, false, 0))?;
    vm.push_rstack(TaggedValue::number(header_addr as f32))?;
    Ok(())
}

/// `CloseList`: finish constructing a LIST, turning the placeholder into
/// a correctly-sized header and reordering the payload so the header
/// ends up on top of the stack.
pub fn close_list(vm: &mut Interpreter) -> VmResult<()> {
    let saved = vm.pop_rstack()?;
    let header_addr = match saved.untag() {
        Decoded::Number(n) => n as usize,
        other => {
            return Err(VmError::Invariant {
                detail: format!("CloseList: expected saved header address, got {other:?}"),
            })
        }
    };
    let s = vm
        .sp
        .checked_sub(header_addr + 1)
        .ok_or_else(|| VmError::Invariant { detail: "CloseList: stack shrank under its own list".into() })?;

    // Read the raw (pre-reorder) payload into a buffer.
    let mut raw = Vec::with_capacity(s);
    for i in 0..s {
        raw.push(vm.segs.read_cell(Segment::Stack, header_addr + 1 + i)?);
    }

    // Delimit top-level slots by scanning from the top of the buffer
    // downward: a slot's *last* cell (highest offset) is self-describing
    // — either a scalar, or (for an already-closed nested compound) that
    // compound's own header, which names its own cell count.
    let mut blocks: Vec<&[u32]> = Vec::new();
    let mut end = raw.len(); // exclusive
    while end > 0 {
        let top = TaggedValue::from_bits(raw[end - 1]);
        let len = match top.untag() {
            Decoded::Tagged { tag: Tag::List, value, .. } => value as usize + 1,
            _ => 1,
        };
        if len > end {
            return Err(VmError::Invariant {
                detail: "CloseList: nested LIST header claims more cells than remain".into(),
            });
        }
        blocks.push(&raw[end - len..end]);
        end -= len;
    }

    // `blocks` is in last-pushed-first order (the scan ran top-down).
    // Laying them out in that same order starting right after the
    // header address, ascending, is exactly what puts the header on top
    // and the first-pushed element immediately beneath it.
    let mut out = Vec::with_capacity(s);
    for block in &blocks {
        out.extend_from_slice(block);
    }
    for (i, cell) in out.into_iter().enumerate() {
        vm.segs.write_cell(Segment::Stack, header_addr + i, cell)?;
    }
    let header = TaggedValue::tagged(Tag::List, false, s as u16);
    vm.segs.write_cell(Segment::Stack, header_addr + s, header.to_bits())?;

    vm.list_depth -= 1;
    Ok(())
}

/// Read the LIST header at `addr` in `seg`, failing if it isn't one.
fn read_header(vm: &Interpreter, seg: Segment, addr: usize) -> VmResult<u16> {
    let cell = vm.segs.read_cell(seg, addr)?;
    match TaggedValue::from_bits(cell).untag() {
        Decoded::Tagged { tag: Tag::List, value, .. } => Ok(value as u16),
        other => Err(VmError::Type { detail: format!("expected LIST header, got {other:?}") }),
    }
}

/// Logical element count: walk top-level slots from the header downward,
/// using the skip-on-compound rule, until the declared cell count `s` is
/// exhausted.
pub fn logical_length(vm: &Interpreter, seg: Segment, header_addr: usize) -> VmResult<u16> {
    let s = read_header(vm, seg, header_addr)? as usize;
    let mut remaining = s;
    let mut pos = header_addr; // cell just processed; next slot is pos-1
    let mut count = 0u16;
    while remaining > 0 {
        pos -= 1;
        let cell = vm.segs.read_cell(seg, pos)?;
        let slot_len = match TaggedValue::from_bits(cell).untag() {
            Decoded::Tagged { tag: Tag::List, value, .. } => value as usize + 1,
            _ => 1,
        };
        if slot_len > remaining {
            return Err(VmError::Invariant { detail: "LIST traversal overran its own payload".into() });
        }
        pos -= slot_len - 1;
        remaining -= slot_len;
        count += 1;
    }
    Ok(count)
}

/// Raw payload cell count (`header.value`), i.e. `Size`.
pub fn raw_size(vm: &Interpreter, seg: Segment, header_addr: usize) -> VmResult<u16> {
    read_header(vm, seg, header_addr)
}

/// Address (and, if compound, cell span) of logical element `index`,
/// walking down from the header. Returns `None` for an out-of-range
/// index (callers map this to `NIL`).
pub fn element_span(
    vm: &Interpreter,
    seg: Segment,
    header_addr: usize,
    index: u16,
) -> VmResult<Option<(usize, usize)>> {
    let s = read_header(vm, seg, header_addr)? as usize;
    let mut remaining = s;
    let mut pos = header_addr;
    let mut i = 0u16;
    while remaining > 0 {
        pos -= 1;
        let cell = vm.segs.read_cell(seg, pos)?;
        let slot_len = match TaggedValue::from_bits(cell).untag() {
            Decoded::Tagged { tag: Tag::List, value, .. } => value as usize + 1,
            _ => 1,
        };
        let slot_start = pos + 1 - slot_len;
        if i == index {
            return Ok(Some((slot_start, slot_len)));
        }
        pos = slot_start;
        remaining -= slot_len;
        i += 1;
    }
    Ok(None)
}

/// `Elem`: copy logical element `index` onto the top of the data stack
/// (a fresh standalone LIST if the slot is compound, a plain value
/// otherwise). Out-of-range pushes `NIL`.
pub fn elem(vm: &mut Interpreter, seg: Segment, header_addr: usize, index: u16) -> VmResult<()> {
    match element_span(vm, seg, header_addr, index)? {
        None => vm.push_stack(TaggedValue::nil()),
        Some((start, len)) => {
            for i in 0..len {
                let cell = vm.segs.read_cell(seg, start + i)?;
                vm.segs.write_cell(Segment::Stack, vm.sp, cell)?;
                vm.sp += 1;
            }
            Ok(())
        }
    }
}

/// `Slot`: push a `REF` to logical element `index`'s address (its
/// compound header if it's a nested LIST, its single cell otherwise).
/// Out-of-range pushes `NIL`.
pub fn slot(vm: &mut Interpreter, seg: Segment, header_addr: usize, index: u16) -> VmResult<()> {
    match element_span(vm, seg, header_addr, index)? {
        None => vm.push_stack(TaggedValue::nil()),
        Some((start, len)) => {
            let addr = start + len - 1; // the slot's own header/cell is its top cell
            let packed = RefAddr::new(seg, addr).to_u16()?;
            vm.push_stack(TaggedValue::create_global_ref(packed))
        }
    }
}

/// `Store` into logical element `index`. Refuses (leaves the target
/// unchanged, pushes `NIL`) if the current slot holds a compound value
/// (spec.md's "no compound overwrite" invariant); otherwise overwrites
/// silently.
pub fn store_elem(
    vm: &mut Interpreter,
    seg: Segment,
    header_addr: usize,
    index: u16,
    value: TaggedValue,
) -> VmResult<()> {
    match element_span(vm, seg, header_addr, index)? {
        None => vm.push_stack(TaggedValue::nil()),
        Some((start, len)) => {
            if len != 1 {
                return vm.push_stack(TaggedValue::nil());
            }
            vm.segs.write_cell(seg, start, value.to_bits())
        }
    }
}

/// `Find`: search logical elements for one equal (as a NUMBER) to `key`,
/// returning its index or `NIL`.
pub fn find(vm: &Interpreter, seg: Segment, header_addr: usize, key: f32) -> VmResult<TaggedValue> {
    let n = logical_length(vm, seg, header_addr)?;
    for i in 0..n {
        if let Some((start, len)) = element_span(vm, seg, header_addr, i)? {
            if len == 1 {
                let cell = vm.segs.read_cell(seg, start)?;
                if let Decoded::Number(v) = TaggedValue::from_bits(cell).untag() {
                    if v == key {
                        return Ok(TaggedValue::number(i as f32));
                    }
                }
            }
        }
    }
    Ok(TaggedValue::nil())
}

/// `Prepend`: O(1) — rewrite the header to `s+1` and shift nothing,
/// since the new element lands directly below the header exactly where
/// logical element 0 is expected.
pub fn prepend(vm: &mut Interpreter, header_addr: usize, value: TaggedValue) -> VmResult<()> {
    let s = read_header(vm, Segment::Stack, header_addr)?;
    // The new element takes the placeholder's old address; the header
    // moves up by one cell to stay on top.
    vm.segs.write_cell(Segment::Stack, header_addr, value.to_bits())?;
    let new_header = TaggedValue::tagged(Tag::List, false, s + 1);
    vm.segs.write_cell(Segment::Stack, header_addr + 1, new_header.to_bits())?;
    vm.sp += 1;
    Ok(())
}

/// `Append`: O(s) — shift the whole payload down by one cell to make
/// room at the bottom, write the new element there, and grow the
/// header.
pub fn append(vm: &mut Interpreter, header_addr: usize, value: TaggedValue) -> VmResult<()> {
    let s = read_header(vm, Segment::Stack, header_addr)? as usize;
    for i in 0..s {
        let cell = vm.segs.read_cell(Segment::Stack, header_addr + i)?;
        vm.segs.write_cell(Segment::Stack, header_addr + i + 1, cell)?;
    }
    vm.segs.write_cell(Segment::Stack, header_addr, value.to_bits())?;
    let new_header = TaggedValue::tagged(Tag::List, false, s as u16 + 1);
    vm.segs.write_cell(Segment::Stack, header_addr + s + 1, new_header.to_bits())?;
    vm.sp += 1;
    Ok(())
}

/// `Select`: walk `path` (a LIST of NUMBER indices) through nested LISTs
/// starting from `target`, yielding a REF to the final slot.
pub fn select(
    vm: &Interpreter,
    seg: Segment,
    mut header_addr: usize,
    path: &[f32],
) -> VmResult<Option<RefAddr>> {
    let mut last = None;
    for &idx in path {
        let span = element_span(vm, seg, header_addr, idx as u16)?;
        let Some((start, len)) = span else { return Ok(None) };
        last = Some(RefAddr::new(seg, start + len - 1));
        // Descend into the nested compound for the next path segment, if
        // any; a scalar terminal simply leaves `last` as the final ref.
        header_addr = start + len - 1;
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    fn new_vm() -> Interpreter {
        Interpreter::new(VmConfig::default())
    }

    #[test]
    fn flat_list_has_expected_length_and_elements() {
        let mut vm = new_vm();
        open_list(&mut vm).unwrap();
        vm.push_stack(TaggedValue::number(1.0)).unwrap();
        vm.push_stack(TaggedValue::number(2.0)).unwrap();
        vm.push_stack(TaggedValue::number(3.0)).unwrap();
        close_list(&mut vm).unwrap();

        let header_addr = vm.sp - 1;
        assert_eq!(logical_length(&vm, Segment::Stack, header_addr).unwrap(), 3);
        elem(&mut vm, Segment::Stack, header_addr, 0).unwrap();
        let top = vm.pop_stack().unwrap();
        assert_eq!(top.untag(), Decoded::Number(1.0));
    }

    #[test]
    fn nested_list_extracted_via_elem() {
        let mut vm = new_vm();
        open_list(&mut vm).unwrap(); // outer
        open_list(&mut vm).unwrap(); // inner
        vm.push_stack(TaggedValue::number(1.0)).unwrap();
        vm.push_stack(TaggedValue::number(2.0)).unwrap();
        close_list(&mut vm).unwrap(); // inner closed: [2,1,header(2)]
        vm.push_stack(TaggedValue::number(3.0)).unwrap();
        close_list(&mut vm).unwrap(); // outer closed

        let outer_header = vm.sp - 1;
        assert_eq!(logical_length(&vm, Segment::Stack, outer_header).unwrap(), 2);

        elem(&mut vm, Segment::Stack, outer_header, 0).unwrap();
        // Top of stack is now a fresh 2-element LIST: [2,1,header(2)].
        let inner_header_addr = vm.sp - 1;
        assert_eq!(raw_size(&vm, Segment::Stack, inner_header_addr).unwrap(), 2);
        assert_eq!(logical_length(&vm, Segment::Stack, inner_header_addr).unwrap(), 2);
        elem(&mut vm, Segment::Stack, inner_header_addr, 0).unwrap();
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(1.0));
        elem(&mut vm, Segment::Stack, inner_header_addr, 1).unwrap();
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(2.0));
    }

    #[test]
    fn store_refuses_to_overwrite_a_compound_slot() {
        let mut vm = new_vm();
        open_list(&mut vm).unwrap();
        open_list(&mut vm).unwrap();
        vm.push_stack(TaggedValue::number(1.0)).unwrap();
        close_list(&mut vm).unwrap();
        close_list(&mut vm).unwrap();
        let header_addr = vm.sp - 1;
        store_elem(&mut vm, Segment::Stack, header_addr, 0, TaggedValue::number(99.0)).unwrap();
        let result = vm.pop_stack().unwrap();
        assert!(result.is_nil());
    }
}
