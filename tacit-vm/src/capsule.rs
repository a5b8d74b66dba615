//! Capsules (spec.md section 4.11): self-dispatching LIST-shaped values.
//! A capsule is an ordinary LIST whose first-written field (logical
//! element 0) is a CODE value — its dispatch entry. No teacher analog;
//! written from the spec's `ExitConstructor`/`Dispatch`/`ExitDispatch`
//! contract.

use tacit_types::error::{VmError, VmResult};
use tacit_types::value::{Decoded, Tag, TaggedValue};

use crate::interpreter::Interpreter;
use crate::list;
use crate::memory::Segment;

/// `ExitConstructor`: close the capsule's backing LIST (same mechanics as
/// `CloseList`), leaving the finished capsule value on top of the stack.
pub fn exit_constructor(vm: &mut Interpreter) -> VmResult<()> {
    list::close_list(vm)
}

/// `Dispatch`: given a capsule and a selector on the stack, look up its
/// dispatch entry (logical element 0, placed there because it is
/// conventionally the *first* field written in the capsule's
/// constructor) and call it, passing the capsule and selector through.
pub fn dispatch(vm: &mut Interpreter) -> VmResult<()> {
    let selector = vm.pop_stack()?;
    let header_addr = vm.top_addr("Dispatch")?;
    let Some((start, len)) = list::element_span(vm, Segment::Stack, header_addr, 0)? else {
        return Err(VmError::Invariant { detail: "Dispatch: capsule has no dispatch entry".into() });
    };
    if len != 1 {
        return Err(VmError::Type { detail: "Dispatch: entry field is not a CODE value".into() });
    }
    let entry = TaggedValue::from_bits(vm.segs.read_cell(Segment::Stack, start)?);
    let Decoded::Tagged { tag: Tag::Code, value, .. } = entry.untag() else {
        return Err(VmError::Type { detail: "Dispatch: entry field is not a CODE value".into() });
    };

    vm.push_stack(selector)?;
    let addr = value as u16;
    if (addr as u32) < tacit_types::MIN_USER_OPCODE as u32 {
        return Err(VmError::Invariant { detail: "Dispatch: entry resolved to a builtin, not a word".into() });
    }
    let byte_addr = tacit_types::x1516::decode(addr, vm.cfg.code_align_shift())?;
    vm.call(byte_addr)
}

/// `ExitDispatch`: the matching `Exit` for a dispatch handler, reusing
/// the ordinary frame-exit protocol.
pub fn exit_dispatch(vm: &mut Interpreter) -> VmResult<()> {
    vm.exit_frame()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::list::{close_list, open_list};
    use tacit_types::op::Op;

    #[test]
    fn capsule_is_a_list_whose_first_slot_is_code() {
        let mut vm = Interpreter::new(VmConfig::default());
        open_list(&mut vm).unwrap();
        vm.push_stack(TaggedValue::create_code_ref(200, vm.cfg.code_align_shift()).unwrap()).unwrap();
        vm.push_stack(TaggedValue::number(0.0)).unwrap();
        close_list(&mut vm).unwrap();

        let header_addr = vm.sp - 1;
        let (start, len) = list::element_span(&vm, Segment::Stack, header_addr, 0).unwrap().unwrap();
        assert_eq!(len, 1);
        let cell = TaggedValue::from_bits(vm.segs.read_cell(Segment::Stack, start).unwrap());
        assert!(cell.is_code());
        let _ = Op::Dispatch; // the op table names this row; exercised via dispatch_op in interpreter tests
    }

    #[test]
    fn dispatch_with_no_receiver_underflows() {
        let mut vm = Interpreter::new(VmConfig::default());
        vm.push_stack(TaggedValue::number(0.0)).unwrap(); // just a selector, no receiver beneath it
        let result = dispatch(&mut vm);
        assert!(matches!(result, Err(VmError::StackUnderflow { .. })), "expected StackUnderflow, got {result:?}");
    }
}
