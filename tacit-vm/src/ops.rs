//! Builtin instruction handlers (spec.md section 4.9), grouped by the
//! same rows as the op table. Arithmetic/compare/stack-shuffle handlers
//! have no teacher analog in `fuel-vm`'s register machine and are
//! written directly from the spec; LIST/REF handlers delegate to
//! `list.rs` and `reference.rs`.

use tacit_types::error::{VmError, VmResult};
use tacit_types::op::Op;
use tacit_types::value::{Decoded, Tag, TaggedValue};

use crate::interpreter::Interpreter;
use crate::list;
use crate::memory::Segment;
use crate::reference::RefAddr;

fn as_number(v: TaggedValue, op: &str) -> VmResult<f32> {
    match v.untag() {
        Decoded::Number(n) => Ok(n),
        other => Err(VmError::Type { detail: format!("{op} expects NUMBER, got {other:?}") }),
    }
}

pub fn arith(vm: &mut Interpreter, op: Op) -> VmResult<()> {
    let b = as_number(vm.pop_stack()?, "arithmetic")?;
    let a = as_number(vm.pop_stack()?, "arithmetic")?;
    let r = match op {
        Op::Add => a + b,
        Op::Sub => a - b,
        Op::Mul => a * b,
        Op::Div => a / b,
        Op::Mod => a % b,
        _ => unreachable!("arith called with non-arithmetic op"),
    };
    vm.push_stack(TaggedValue::number(r))
}

pub fn compare(vm: &mut Interpreter, op: Op) -> VmResult<()> {
    let b = as_number(vm.pop_stack()?, "comparison")?;
    let a = as_number(vm.pop_stack()?, "comparison")?;
    let r = match op {
        Op::Equal => a == b,
        Op::NotEqual => a != b,
        Op::LessThan => a < b,
        Op::LessEqual => a <= b,
        Op::GreaterThan => a > b,
        Op::GreaterEqual => a >= b,
        _ => unreachable!("compare called with non-comparison op"),
    };
    vm.push_stack(TaggedValue::number(if r { 1.0 } else { 0.0 }))
}

pub fn shuffle(vm: &mut Interpreter, op: Op) -> VmResult<()> {
    match op {
        Op::Dup => {
            let v = vm.peek_stack(0)?;
            vm.push_stack(v)
        }
        Op::Drop => {
            vm.pop_stack()?;
            Ok(())
        }
        Op::Swap => {
            let b = vm.pop_stack()?;
            let a = vm.pop_stack()?;
            vm.push_stack(b)?;
            vm.push_stack(a)
        }
        Op::Over => {
            let b = vm.pop_stack()?;
            let a = vm.pop_stack()?;
            vm.push_stack(a)?;
            vm.push_stack(b)?;
            vm.push_stack(a)
        }
        Op::Rot => {
            let c = vm.pop_stack()?;
            let b = vm.pop_stack()?;
            let a = vm.pop_stack()?;
            vm.push_stack(b)?;
            vm.push_stack(c)?;
            vm.push_stack(a)
        }
        Op::RevRot => {
            let c = vm.pop_stack()?;
            let b = vm.pop_stack()?;
            let a = vm.pop_stack()?;
            vm.push_stack(c)?;
            vm.push_stack(a)?;
            vm.push_stack(b)
        }
        Op::Nip => {
            let b = vm.pop_stack()?;
            vm.pop_stack()?;
            vm.push_stack(b)
        }
        Op::Tuck => {
            let b = vm.pop_stack()?;
            let a = vm.pop_stack()?;
            vm.push_stack(b)?;
            vm.push_stack(a)?;
            vm.push_stack(b)
        }
        _ => unreachable!("shuffle called with non-shuffle op"),
    }
}

/// Resolve a popped `REF` cell into a typed [`RefAddr`].
fn ref_addr(v: TaggedValue) -> VmResult<RefAddr> {
    match v.untag() {
        Decoded::Tagged { tag: Tag::Ref, value, .. } => RefAddr::from_u16(value as u16),
        other => Err(VmError::Type { detail: format!("expected REF, got {other:?}") }),
    }
}

pub fn list_length(vm: &mut Interpreter) -> VmResult<()> {
    let header_addr = vm.top_addr("Length")?;
    let n = list::logical_length(vm, Segment::Stack, header_addr)?;
    vm.push_stack(TaggedValue::number(n as f32))
}

pub fn list_size(vm: &mut Interpreter) -> VmResult<()> {
    let header_addr = vm.top_addr("Size")?;
    let s = list::raw_size(vm, Segment::Stack, header_addr)?;
    vm.push_stack(TaggedValue::number(s as f32))
}

pub fn list_slot(vm: &mut Interpreter) -> VmResult<()> {
    let index = as_number(vm.pop_stack()?, "Slot")? as u16;
    let header_addr = vm.top_addr("Slot")?;
    list::slot(vm, Segment::Stack, header_addr, index)
}

pub fn list_elem(vm: &mut Interpreter) -> VmResult<()> {
    let index = as_number(vm.pop_stack()?, "Elem")? as u16;
    let header_addr = vm.top_addr("Elem")?;
    list::elem(vm, Segment::Stack, header_addr, index)
}

/// `Fetch`: dereference a `REF` cell, pushing the value it points to.
pub fn fetch(vm: &mut Interpreter) -> VmResult<()> {
    let r = ref_addr(vm.pop_stack()?)?;
    let cell = vm.segs.read_cell(r.segment, r.cell)?;
    vm.push_stack(TaggedValue::from_bits(cell))
}

/// `Store`: write through a `REF` cell, refusing (and leaving the slot
/// untouched) if it currently holds a LIST header.
pub fn store(vm: &mut Interpreter) -> VmResult<()> {
    let r = ref_addr(vm.pop_stack()?)?;
    let value = vm.pop_stack()?;
    let current = TaggedValue::from_bits(vm.segs.read_cell(r.segment, r.cell)?);
    if current.is_list() {
        return vm.push_stack(TaggedValue::nil());
    }
    vm.segs.write_cell(r.segment, r.cell, value.to_bits())
}

pub fn find(vm: &mut Interpreter) -> VmResult<()> {
    let key = as_number(vm.pop_stack()?, "Find")?;
    let header_addr = vm.top_addr("Find")?;
    let result = list::find(vm, Segment::Stack, header_addr, key)?;
    vm.push_stack(result)
}

/// `Select`: walk a LIST of NUMBER indices as a path through nested
/// lists, yielding a REF to the final slot (or `NIL`).
pub fn select(vm: &mut Interpreter) -> VmResult<()> {
    let path_header = vm.top_addr("Select")?;
    let path_raw = list::raw_size(vm, Segment::Stack, path_header)? as usize;
    vm.sp -= path_raw + 1; // consume the whole path list (payload + header)
    let path_len = list::logical_length(vm, Segment::Stack, path_header)?;
    let mut path = Vec::with_capacity(path_len as usize);
    for i in 0..path_len {
        let Some((start, len)) = list::element_span(vm, Segment::Stack, path_header, i)? else {
            return vm.push_stack(TaggedValue::nil());
        };
        if len != 1 {
            return Err(VmError::Type { detail: "Select path elements must be NUMBER indices".into() });
        }
        let cell = vm.segs.read_cell(Segment::Stack, start)?;
        path.push(as_number(TaggedValue::from_bits(cell), "Select")?);
    }

    let target_header = vm.top_addr("Select")?;
    match list::select(vm, Segment::Stack, target_header, &path)? {
        None => vm.push_stack(TaggedValue::nil()),
        Some(addr) => {
            let packed = addr.to_u16()?;
            vm.push_stack(TaggedValue::create_global_ref(packed))
        }
    }
}

pub fn prepend(vm: &mut Interpreter) -> VmResult<()> {
    let value = vm.pop_stack()?;
    let header_addr = vm.top_addr("Prepend")?;
    list::prepend(vm, header_addr, value)
}

pub fn append(vm: &mut Interpreter) -> VmResult<()> {
    let value = vm.pop_stack()?;
    let header_addr = vm.top_addr("Append")?;
    list::append(vm, header_addr, value)
}

pub fn init_var(vm: &mut Interpreter) -> VmResult<()> {
    let slot = vm.fetch_u16()? as usize;
    let v = vm.pop_stack()?;
    vm.segs.write_cell(Segment::Rstack, vm.bp + slot, v.to_bits())
}

pub fn var_ref(vm: &mut Interpreter) -> VmResult<()> {
    let slot = vm.fetch_u16()? as usize;
    let packed = RefAddr::new(Segment::Rstack, vm.bp + slot).to_u16()?;
    vm.push_stack(TaggedValue::create_global_ref(packed))
}

pub fn global_ref(vm: &mut Interpreter) -> VmResult<()> {
    let offset = vm.fetch_u16()? as usize;
    let packed = RefAddr::new(Segment::Data, offset).to_u16()?;
    vm.push_stack(TaggedValue::create_global_ref(packed))
}

pub fn init_global(vm: &mut Interpreter) -> VmResult<()> {
    let offset = vm.fetch_u16()? as usize;
    let v = vm.pop_stack()?;
    vm.segs.write_cell(Segment::Data, offset, v.to_bits())
}

/// `Load`: the same dereference as `Fetch`, exposed under the name the
/// locals/globals op row uses.
pub fn load(vm: &mut Interpreter) -> VmResult<()> {
    fetch(vm)
}

pub fn print(vm: &mut Interpreter) -> VmResult<()> {
    let v = vm.pop_stack()?;
    let text = match v.untag() {
        Decoded::Tagged { tag: Tag::String, value, .. } => Some(vm.digest.get(&vm.segs, value as u16)?),
        _ => None,
    };
    vm.printer.print(v, text.as_deref());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    fn assert_underflows(result: VmResult<()>) {
        assert!(matches!(result, Err(VmError::StackUnderflow { .. })), "expected StackUnderflow, got {result:?}");
    }

    #[test]
    fn length_on_empty_stack_underflows() {
        let mut vm = Interpreter::new(VmConfig::default());
        assert_underflows(list_length(&mut vm));
    }

    #[test]
    fn size_on_empty_stack_underflows() {
        let mut vm = Interpreter::new(VmConfig::default());
        assert_underflows(list_size(&mut vm));
    }

    #[test]
    fn slot_with_no_receiver_underflows() {
        let mut vm = Interpreter::new(VmConfig::default());
        vm.push_stack(TaggedValue::number(0.0)).unwrap();
        assert_underflows(list_slot(&mut vm));
    }

    #[test]
    fn elem_with_no_receiver_underflows() {
        let mut vm = Interpreter::new(VmConfig::default());
        vm.push_stack(TaggedValue::number(0.0)).unwrap();
        assert_underflows(list_elem(&mut vm));
    }

    #[test]
    fn find_with_no_receiver_underflows() {
        let mut vm = Interpreter::new(VmConfig::default());
        vm.push_stack(TaggedValue::number(0.0)).unwrap();
        assert_underflows(find(&mut vm));
    }

    #[test]
    fn select_on_empty_stack_underflows() {
        let mut vm = Interpreter::new(VmConfig::default());
        assert_underflows(select(&mut vm));
    }

    #[test]
    fn prepend_with_no_receiver_underflows() {
        let mut vm = Interpreter::new(VmConfig::default());
        vm.push_stack(TaggedValue::number(0.0)).unwrap();
        assert_underflows(prepend(&mut vm));
    }

    #[test]
    fn append_with_no_receiver_underflows() {
        let mut vm = Interpreter::new(VmConfig::default());
        vm.push_stack(TaggedValue::number(0.0)).unwrap();
        assert_underflows(append(&mut vm));
    }
}
