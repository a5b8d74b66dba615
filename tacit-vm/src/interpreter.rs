//! The interpreter core (spec.md section 4.8): registers, the call-frame
//! protocol, and the fetch/decode/dispatch loop. Modeled on `fuel-vm`'s
//! `interpreter/executors/main.rs` — a register-holding struct owning its
//! memory, stepping one instruction at a time — generalized from that
//! teacher's fixed RISC-style register file to Tacit's stack-machine
//! registers (`IP`/`SP`/`RSP`/`BP`/`GP`).

use tacit_types::error::{VmError, VmResult};
use tacit_types::op::Op;
use tacit_types::value::{Decoded, TaggedValue};
use tacit_types::MIN_USER_OPCODE;

use crate::compiler::CodeBuffer;
use crate::config::VmConfig;
use crate::dictionary::Dictionary;
use crate::digest::StringDigest;
use crate::memory::{Segment, Segments};
use crate::printer::{Printer, RecordingPrinter};
use crate::{capsule, list, ops};

/// The running machine: five memory segments, the dictionary and string
/// digest that back compilation, and the registers the dispatch loop
/// advances. `list_depth` tracks nested `OpenList`/`CloseList` pairs; it
/// does not itself gate reordering (see `list.rs`) but a mismatched count
/// at end-of-program flags an unclosed list.
pub struct Interpreter {
    pub segs: Segments,
    pub dict: Dictionary,
    pub digest: StringDigest,
    pub code: CodeBuffer,
    pub cfg: VmConfig,
    pub printer: Box<dyn Printer>,

    pub ip: usize,
    pub sp: usize,
    pub rsp: usize,
    pub bp: usize,
    pub gp: usize,
    pub list_depth: u32,
    pub running: bool,
}

impl Interpreter {
    pub fn new(cfg: VmConfig) -> Self {
        let segs = Segments::new(&cfg);
        let mut vm = Interpreter {
            segs,
            dict: Dictionary::new(),
            digest: StringDigest::new(),
            code: CodeBuffer::new(),
            cfg,
            printer: Box::new(RecordingPrinter::default()),
            ip: 0,
            sp: 0,
            rsp: 0,
            bp: 0,
            gp: 0,
            list_depth: 0,
            running: false,
        };
        crate::parser::seed_builtins(&mut vm).expect("builtin dictionary seeding cannot fail");
        // Reserve the builtin-opcode range in CODE so every user-word entry
        // point lands at or above MIN_USER_OPCODE: create_code_ref relies on
        // that to tell a direct builtin opcode from an X1516-encoded address
        // (tacit-types/src/value.rs).
        vm.code.cp = tacit_types::MIN_USER_OPCODE as usize;
        vm.code.bcp = vm.code.cp;
        vm
    }

    pub fn push_stack(&mut self, v: TaggedValue) -> VmResult<()> {
        self.segs.write_cell(Segment::Stack, self.sp, v.to_bits())?;
        self.sp += 1;
        Ok(())
    }

    pub fn pop_stack(&mut self) -> VmResult<TaggedValue> {
        if self.sp == 0 {
            return Err(VmError::StackUnderflow { op: "pop".into(), needed: 1 });
        }
        self.sp -= 1;
        Ok(TaggedValue::from_bits(self.segs.read_cell(Segment::Stack, self.sp)?))
    }

    /// Peek `depth` cells below the top (0 = top of stack) without
    /// popping.
    pub fn peek_stack(&self, depth: usize) -> VmResult<TaggedValue> {
        if depth >= self.sp {
            return Err(VmError::StackUnderflow { op: "peek".into(), needed: depth + 1 });
        }
        Ok(TaggedValue::from_bits(self.segs.read_cell(Segment::Stack, self.sp - 1 - depth)?))
    }

    /// Cell index of the value currently on top of the stack, without
    /// popping it. Every LIST-shaped-receiver op (`length`, `size`,
    /// `slot`, `elem`, `find`, `select`, `prepend`, `append`, `dispatch`)
    /// peeks its receiver this way, so this is the one place that guards
    /// against an empty stack instead of each call site computing
    /// `sp - 1` unchecked.
    pub fn top_addr(&self, op: &str) -> VmResult<usize> {
        if self.sp == 0 {
            return Err(VmError::StackUnderflow { op: op.into(), needed: 1 });
        }
        Ok(self.sp - 1)
    }

    pub fn push_rstack(&mut self, v: TaggedValue) -> VmResult<()> {
        self.segs.write_cell(Segment::Rstack, self.rsp, v.to_bits())?;
        self.rsp += 1;
        Ok(())
    }

    pub fn pop_rstack(&mut self) -> VmResult<TaggedValue> {
        if self.rsp == 0 {
            return Err(VmError::ReturnStackUnderflow { op: "pop".into() });
        }
        self.rsp -= 1;
        Ok(TaggedValue::from_bits(self.segs.read_cell(Segment::Rstack, self.rsp)?))
    }

    pub(crate) fn fetch_u16(&mut self) -> VmResult<u16> {
        let v = self.segs.read16(Segment::Code, self.ip)?;
        self.ip += 2;
        Ok(v)
    }

    pub(crate) fn fetch_i16(&mut self) -> VmResult<i16> {
        let v = self.segs.read_i16(Segment::Code, self.ip)?;
        self.ip += 2;
        Ok(v)
    }

    pub(crate) fn fetch_f32(&mut self) -> VmResult<f32> {
        let v = self.segs.read_f32(Segment::Code, self.ip)?;
        self.ip += 4;
        Ok(v)
    }

    /// Call-frame protocol (spec.md section 4.8): push the return IP and
    /// the caller's BP onto RSTACK, then set `BP = RSP` and jump.
    pub fn call(&mut self, addr: u32) -> VmResult<()> {
        let saved_ip = TaggedValue::create_code_ref(self.ip as u32, self.cfg.code_align_shift())?;
        self.push_rstack(saved_ip)?;
        self.push_rstack(TaggedValue::number(self.bp as f32))?;
        self.bp = self.rsp;
        self.ip = addr as usize;
        Ok(())
    }

    /// `Exit`: undo a `call` — drop this frame's locals, restore `BP`,
    /// pop the saved `IP`, and resume there.
    pub fn exit_frame(&mut self) -> VmResult<()> {
        if self.bp < 2 {
            return Err(VmError::ReturnStackUnderflow { op: "exit".into() });
        }
        let saved_bp = self.segs.read_cell(Segment::Rstack, self.bp - 1)?;
        let saved_ip = self.segs.read_cell(Segment::Rstack, self.bp - 2)?;
        self.rsp = self.bp - 2;
        self.bp = TaggedValue::from_bits(saved_bp).untag().match_number("exit: BP")?;
        let addr = match TaggedValue::from_bits(saved_ip).untag() {
            Decoded::Tagged { value, .. } => value as u32,
            other => return Err(VmError::Invariant { detail: format!("exit: bad saved IP {other:?}") }),
        };
        self.ip = tacit_types::x1516::decode(addr as u16, self.cfg.code_align_shift())
            .unwrap_or(addr) as usize;
        Ok(())
    }

    /// Dispatch a value popped off of `Eval`/branch targets that names a
    /// `CODE` cell: either invoke a builtin directly or call a user word.
    fn eval_code(&mut self, value: i32) -> VmResult<()> {
        let v = value as u16;
        if (v as u32) < MIN_USER_OPCODE as u32 {
            self.dispatch_op(Op::try_from(v as u8)?)
        } else {
            let addr = tacit_types::x1516::decode(v, self.cfg.code_align_shift())?;
            self.call(addr)
        }
    }

    /// Run the fetch/decode/dispatch loop until `Abort`, a return past
    /// the top frame, or an error.
    pub fn run(&mut self) -> VmResult<()> {
        self.running = true;
        while self.running {
            self.step()?;
        }
        Ok(())
    }

    /// Compile then run one chunk of source against a fresh VM. The
    /// single public entry point integration tests and embedders use to
    /// exercise a whole program end to end (spec.md section 8's
    /// round-trip properties are stated in exactly this shape: "parse
    /// then execute the source `...`").
    pub fn run_str(cfg: VmConfig, src: &str) -> VmResult<Self> {
        let mut vm = Interpreter::new(cfg);
        {
            let mut p = crate::parser::Parser::new(&mut vm, src);
            p.compile_all()?;
        }
        vm.ip = vm.code.bcp;
        vm.run()?;
        Ok(vm)
    }

    /// Execute one instruction: a one-byte builtin opcode (bit 7 clear)
    /// or a two-byte X1516-encoded direct user-word call (bit 7 set).
    pub fn step(&mut self) -> VmResult<()> {
        let byte = self.segs.read8(Segment::Code, self.ip)?;
        if byte & 0x80 == 0 {
            self.ip += 1;
            let op = Op::try_from(byte)?;
            self.dispatch_op(op)
        } else {
            let enc = self.fetch_u16()?;
            let addr = tacit_types::x1516::decode(enc, self.cfg.code_align_shift())?;
            self.call(addr)
        }
    }

    #[tracing::instrument(name = "op", skip(self))]
    fn dispatch_op(&mut self, op: Op) -> VmResult<()> {
        tracing::trace!(ip = self.ip, sp = self.sp, ?op, "dispatch");
        match op {
            Op::Abort => {
                self.running = false;
                Ok(())
            }
            Op::LiteralNumber => {
                let f = self.fetch_f32()?;
                self.push_stack(TaggedValue::number(f))
            }
            Op::LiteralString => {
                let addr = self.fetch_u16()?;
                self.push_stack(TaggedValue::tagged(tacit_types::value::Tag::String, false, addr))
            }
            Op::Branch => {
                let off = self.fetch_i16()?;
                self.ip = (self.ip as i64 + off as i64) as usize;
                Ok(())
            }
            Op::IfFalseBranch => {
                let off = self.fetch_i16()?;
                let cond = self.pop_stack()?;
                // Branch on zero or non-numeric (spec.md section 4.9); only a
                // nonzero NUMBER is truthy.
                let take = !matches!(cond.untag(), Decoded::Number(n) if n != 0.0);
                if take {
                    self.ip = (self.ip as i64 + off as i64) as usize;
                }
                Ok(())
            }
            Op::Call => {
                let addr = self.fetch_u16()? as u32;
                self.call(addr)
            }
            Op::Exit => self.exit_frame(),
            Op::Eval => {
                let v = self.pop_stack()?;
                match v.untag() {
                    Decoded::Tagged { tag: tacit_types::value::Tag::Code, value, .. } => {
                        self.eval_code(value)
                    }
                    other => Err(VmError::Type { detail: format!("Eval expects CODE, got {other:?}") }),
                }
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => ops::arith(self, op),
            Op::Equal | Op::NotEqual | Op::LessThan | Op::LessEqual | Op::GreaterThan | Op::GreaterEqual => {
                ops::compare(self, op)
            }
            Op::Dup | Op::Drop | Op::Swap | Op::Over | Op::Rot | Op::RevRot | Op::Nip | Op::Tuck => {
                ops::shuffle(self, op)
            }
            Op::OpenList => list::open_list(self),
            Op::CloseList => list::close_list(self),
            Op::Length => ops::list_length(self),
            Op::Size => ops::list_size(self),
            Op::Slot => ops::list_slot(self),
            Op::Elem => ops::list_elem(self),
            Op::Fetch => ops::fetch(self),
            Op::Store => ops::store(self),
            Op::Find => ops::find(self),
            Op::Select => ops::select(self),
            Op::Prepend => ops::prepend(self),
            Op::Append => ops::append(self),
            Op::Reserve => {
                let n = self.fetch_u16()? as usize;
                self.rsp += n;
                Ok(())
            }
            Op::InitVar => ops::init_var(self),
            Op::VarRef => ops::var_ref(self),
            Op::GlobalRef => ops::global_ref(self),
            Op::InitGlobal => ops::init_global(self),
            Op::Load => ops::load(self),
            Op::Dispatch => capsule::dispatch(self),
            Op::ExitConstructor => capsule::exit_constructor(self),
            Op::ExitDispatch => capsule::exit_dispatch(self),
            Op::Print => ops::print(self),
            Op::Nop => Ok(()),
        }
    }
}

/// Tiny local helper: a saved-BP cell is always a plain NUMBER.
trait AsUsize {
    fn match_number(self, ctx: &str) -> VmResult<usize>;
}

impl AsUsize for Decoded {
    fn match_number(self, ctx: &str) -> VmResult<usize> {
        match self {
            Decoded::Number(n) => Ok(n as usize),
            other => Err(VmError::Invariant { detail: format!("{ctx}: expected NUMBER, got {other:?}") }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(vm: &mut Interpreter, bytes: &[u8]) -> usize {
        let start = vm.code.cp;
        for &b in bytes {
            vm.segs.write8(Segment::Code, vm.code.cp, b).unwrap();
            vm.code.cp += 1;
        }
        start
    }

    #[test]
    fn literal_number_then_abort() {
        let mut vm = Interpreter::new(VmConfig::default());
        let mut bytes = vec![Op::LiteralNumber.code()];
        bytes.extend_from_slice(&42.0f32.to_le_bytes());
        bytes.push(Op::Abort.code());
        vm.ip = assemble(&mut vm, &bytes);
        vm.run().unwrap();
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(42.0));
    }

    #[test]
    fn square_via_call_and_exit() {
        // : sq dup * ; 5 sq  =>  25
        let mut vm = Interpreter::new(VmConfig::default());
        // sq's body: Dup, Mul, Exit.
        let sq_addr = assemble(&mut vm, &[Op::Dup.code(), Op::Mul.code(), Op::Exit.code()]);
        // The return address saved by `call` must itself be X1516-alignable.
        let cfg = vm.cfg.clone();
        vm.code.align(&mut vm.segs, &cfg).unwrap();
        // Caller pushes 5, calls sq, then stops.
        let abort_addr = assemble(&mut vm, &[Op::Abort.code()]);

        vm.push_stack(TaggedValue::number(5.0)).unwrap();
        vm.ip = abort_addr; // where `call` should return once sq exits
        vm.call(sq_addr as u32).unwrap();
        vm.run().unwrap();

        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(25.0));
    }

    #[test]
    fn if_false_branch_treats_non_numeric_as_falsy() {
        // spec.md section 4.9: IfFalseBranch branches "when the value is
        // zero or non-numeric" — a tagged NIL must take the branch just
        // like a literal 0.0 would.
        let mut vm = Interpreter::new(VmConfig::default());
        let mut bytes = vec![Op::IfFalseBranch.code()];
        bytes.extend_from_slice(&5i16.to_le_bytes()); // skip over the "not taken" push below (1 opcode + 4 f32 bytes)
        bytes.push(Op::LiteralNumber.code());
        bytes.extend_from_slice(&111.0f32.to_le_bytes());
        bytes.push(Op::LiteralNumber.code());
        bytes.extend_from_slice(&222.0f32.to_le_bytes());
        bytes.push(Op::Abort.code());
        vm.ip = assemble(&mut vm, &bytes);
        vm.push_stack(TaggedValue::nil()).unwrap();
        vm.run().unwrap();
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(222.0));
    }
}
