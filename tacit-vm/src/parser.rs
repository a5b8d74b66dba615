//! Parser and immediate words (spec.md section 4.7). No teacher analog —
//! `fuel-vm` never compiles source text, it executes pre-assembled
//! instructions — so the compile loop is written directly from the
//! spec's contract. Per spec.md section 9's redesign note, compile-time
//! *closers* are a typed Rust enum on a dedicated compile stack (this
//! module's `Closer`/`closers: Vec<Closer>`), not values pushed through
//! the runtime data stack and `Eval`'d.

use tacit_types::error::{VmError, VmResult};
use tacit_types::op::Op;
use tacit_types::value::{Decoded, Tag, TaggedValue};

use crate::dictionary::Mark;
use crate::interpreter::Interpreter;
use crate::memory::Segment;
use crate::token::{Token, TokenKind, Tokenizer};

/// Builtin op table rows, given the source-level names the parser binds
/// them to in the dictionary at VM construction (spec.md section 3:
/// dictionary entries are "commonly CODE for builtins"). Control-flow
/// and locals/globals opcodes (`Branch`, `Reserve`, `InitVar`, ...) are
/// emitted only by the immediate handlers below, never named directly.
const BUILTIN_WORDS: &[(&str, Op)] = &[
    ("eval", Op::Eval),
    ("+", Op::Add),
    ("-", Op::Sub),
    ("*", Op::Mul),
    ("/", Op::Div),
    ("mod", Op::Mod),
    ("=", Op::Equal),
    ("<>", Op::NotEqual),
    ("<", Op::LessThan),
    ("<=", Op::LessEqual),
    (">", Op::GreaterThan),
    (">=", Op::GreaterEqual),
    ("dup", Op::Dup),
    ("drop", Op::Drop),
    ("swap", Op::Swap),
    ("over", Op::Over),
    ("rot", Op::Rot),
    ("-rot", Op::RevRot),
    ("nip", Op::Nip),
    ("tuck", Op::Tuck),
    ("length", Op::Length),
    ("size", Op::Size),
    ("slot", Op::Slot),
    ("elem", Op::Elem),
    ("fetch", Op::Fetch),
    ("load", Op::Load),
    ("store", Op::Store),
    ("find", Op::Find),
    ("select", Op::Select),
    ("prepend", Op::Prepend),
    ("append", Op::Append),
    ("dispatch", Op::Dispatch),
    ("print", Op::Print),
];

/// Populate the dictionary with one entry per builtin opcode, so
/// ordinary word lookup (`compile_word`) finds them exactly like a
/// user-defined word. Called once, at VM construction.
pub fn seed_builtins(vm: &mut Interpreter) -> VmResult<()> {
    for &(name, op) in BUILTIN_WORDS {
        let addr = vm.digest.intern(&mut vm.segs, name)?;
        vm.dict.define(addr, TaggedValue::create_builtin_ref(op.code())?);
    }
    Ok(())
}

/// Compile-time marker describing what a `;` (or a construct-specific
/// mid-keyword) must patch and emit to close the innermost open
/// structured construct.
#[derive(Debug)]
#[allow(clippy::enum_variant_names)] // `End*` names the construct each closer closes, not a redundant prefix
enum Closer {
    EndDefinition { branch_pos: usize, dict_mark: Mark, head: Option<Mark> },
    EndCapsule { branch_pos: usize, dict_mark: Mark, head: Option<Mark> },
    EndIf { placeholder: usize },
    EndCase { exit_patches: Vec<usize> },
    /// `skip_placeholder` is `None` for a `DEFAULT of` clause: it has no
    /// comparison to fail, so there's nothing to patch on entry, only the
    /// unconditional exit branch every clause emits at its own `;`.
    EndOf { skip_placeholder: Option<usize>, exits: Vec<usize> },
    EndMatch { exit_patches: Vec<usize> },
    EndWith { skip_placeholder: Option<usize>, exits: Vec<usize> },
    EndWhen { placeholder: usize },
}

/// Per-definition compile-time bookkeeping (spec.md section 3's
/// "active-definition state"). A stack, not a single slot: a capsule
/// constructor body may define its methods inline (spec.md section 8's
/// `: counter 0 var n : inc +> n ; capsule ;`), which nests one `:` body
/// inside another — each nesting level gets its own `Branch`-skip, body
/// address, and `Reserve` operand, exactly like a top-level definition.
struct ActiveDef {
    reserve_patch: Option<usize>,
    local_count: u16,
}

pub struct Parser<'a> {
    vm: &'a mut Interpreter,
    tok: Tokenizer<'a>,
    closers: Vec<Closer>,
    active_defs: Vec<ActiveDef>,
    /// Dictionary mark + CODE address of the definition(s) currently being
    /// compiled, innermost last, so `recurse` calls the enclosing one.
    current_defs: Vec<(u16, u32)>,
    /// Set by `DEFAULT`, consumed by the immediately following `of`/`with`:
    /// the catch-all clause has no selector to compare, only a body to
    /// unconditionally enter.
    pending_default: bool,
}

impl<'a> Parser<'a> {
    pub fn new(vm: &'a mut Interpreter, source: &'a str) -> Self {
        Parser {
            vm,
            tok: Tokenizer::new(source),
            closers: Vec::new(),
            active_defs: Vec::new(),
            current_defs: Vec::new(),
            pending_default: false,
        }
    }

    /// Drive the compile loop to EOF, emitting a final `Abort`.
    pub fn compile_all(&mut self) -> VmResult<()> {
        loop {
            let tok = self.tok.next_token()?;
            if tok.kind == TokenKind::Eof {
                if !self.closers.is_empty() || !self.active_defs.is_empty() {
                    return Err(VmError::Unclosed { what: "end of input with an open construct".into() });
                }
                self.vm.code.emit_op(&mut self.vm.segs, Op::Abort)?;
                return Ok(());
            }
            self.compile_token(tok)?;
        }
    }

    fn compile_token(&mut self, tok: Token) -> VmResult<()> {
        match tok.kind {
            TokenKind::Number(n) => {
                self.vm.code.emit_op(&mut self.vm.segs, Op::LiteralNumber)?;
                self.vm.code.emit_f32(&mut self.vm.segs, n)
            }
            TokenKind::String(s) => {
                let addr = self.vm.digest.intern(&mut self.vm.segs, &s)?;
                self.vm.code.emit_op(&mut self.vm.segs, Op::LiteralString)?;
                self.vm.code.emit_u16(&mut self.vm.segs, addr)
            }
            TokenKind::RefSigil(name) => self.compile_ref_sigil(&name, tok.pos),
            TokenKind::Word(w) => self.compile_word(&w, tok.pos),
            TokenKind::Special(s) => self.compile_special(&s, tok.pos),
            TokenKind::Eof => unreachable!("handled by compile_all"),
        }
    }

    fn intern(&mut self, name: &str) -> VmResult<u16> {
        self.vm.digest.intern(&mut self.vm.segs, name)
    }

    /// Emit a `LiteralNumber` carrying the exact bit pattern of a tagged
    /// value — valid because every `TaggedValue` *is* an f32, tagged or
    /// not.
    fn emit_literal_value(&mut self, v: TaggedValue) -> VmResult<()> {
        self.vm.code.emit_op(&mut self.vm.segs, Op::LiteralNumber)?;
        self.vm.code.emit_f32(&mut self.vm.segs, f32::from_bits(v.to_bits()))
    }

    fn compile_ref_sigil(&mut self, name: &str, pos: usize) -> VmResult<()> {
        let addr = self.intern(name)?;
        let payload = self
            .vm
            .dict
            .lookup(addr)
            .ok_or_else(|| VmError::Syntax { pos, detail: format!("undefined name '{name}'") })?;
        self.emit_literal_value(payload)
    }

    /// Emit a call to a dictionary `CODE` payload: a builtin opcode if
    /// `< MIN_USER_OPCODE`, a direct X1516-encoded user-word call
    /// otherwise (spec.md section 4.8's fetch/decode contract).
    fn emit_call(&mut self, payload: TaggedValue) -> VmResult<()> {
        match payload.untag() {
            tacit_types::value::Decoded::Tagged { tag: Tag::Code, value, .. } => {
                if (value as u32) < tacit_types::MIN_USER_OPCODE as u32 {
                    let op = Op::try_from(value as u8)?;
                    self.vm.code.emit_op(&mut self.vm.segs, op)
                } else {
                    let addr = tacit_types::x1516::decode(value as u16, self.vm.cfg.code_align_shift())?;
                    // Align first: the return address `call` saves is the
                    // CP right after this 2-byte call, and that address
                    // must itself be X1516-alignable.
                    self.vm.code.align(&mut self.vm.segs, &self.vm.cfg)?;
                    self.vm.code.emit_user_call(&mut self.vm.segs, addr, &self.vm.cfg)
                }
            }
            other => Err(VmError::Type { detail: format!("call target is not CODE: {other:?}") }),
        }
    }

    fn compile_word(&mut self, w: &str, pos: usize) -> VmResult<()> {
        match w {
            "if" => return self.kw_if(),
            "else" => return self.kw_else(pos),
            "case" => return self.kw_case(),
            "of" => return self.kw_of(pos),
            "DEFAULT" => return self.kw_default(),
            "match" => return self.kw_match(),
            "with" => return self.kw_with(pos),
            "when" => return self.kw_when(),
            "do" => return self.kw_do(pos),
            "capsule" => return self.kw_capsule(pos),
            "var" => return self.kw_var(pos),
            "global" => return self.kw_global(pos),
            "->" => return self.kw_arrow(pos, false),
            "+>" => return self.kw_arrow(pos, true),
            "recurse" => return self.kw_recurse(pos),
            "NIL" => return self.emit_literal_value(TaggedValue::nil()),
            "immediate" => return self.kw_immediate(pos),
            _ => {}
        }

        let addr = self.intern(w)?;
        if let Some((_, entry)) = self.vm.dict.lookup_entry(addr) {
            if entry.is_immediate() {
                return self.run_immediate(entry.payload, pos);
            }
            return self.emit_call(entry.payload);
        }
        match w.parse::<f32>() {
            Ok(n) => {
                self.vm.code.emit_op(&mut self.vm.segs, Op::LiteralNumber)?;
                self.vm.code.emit_f32(&mut self.vm.segs, n)
            }
            Err(_) => Err(VmError::Syntax { pos, detail: format!("unknown word '{w}'") }),
        }
    }

    fn compile_special(&mut self, s: &str, pos: usize) -> VmResult<()> {
        match s {
            ":" => self.kw_colon(pos),
            ";" => self.kw_semi(pos),
            "(" | "[" => self.vm.code.emit_op(&mut self.vm.segs, Op::OpenList),
            ")" | "]" => self.vm.code.emit_op(&mut self.vm.segs, Op::CloseList),
            other => Err(VmError::Syntax { pos, detail: format!("'{other}' has no compile-time meaning") }),
        }
    }

    // ---- `:` / `;` -----------------------------------------------------

    /// Per spec.md section 8, `:` nests freely: a capsule constructor
    /// defines its methods inline (`: counter 0 var n : inc +> n ; capsule
    /// ;`), so each nested body gets its own `Branch`-skip and is invisible
    /// to outer code only via the ordinary dictionary-hiding mechanism, not
    /// a depth check.
    fn kw_colon(&mut self, pos: usize) -> VmResult<()> {
        let name_tok = self.tok.next_token()?;
        let name = match name_tok.kind {
            TokenKind::Word(w) => w,
            TokenKind::Number(n) => format!("{n}"),
            _ => return Err(VmError::Syntax { pos, detail: "expected a name after ':'".into() }),
        };
        let name_addr = self.intern(&name)?;

        self.vm.code.emit_op(&mut self.vm.segs, Op::Branch)?;
        let branch_pos = self.vm.code.cp;
        self.vm.code.emit_u16(&mut self.vm.segs, 0)?;
        self.vm.code.align(&mut self.vm.segs, &self.vm.cfg)?;

        let body_addr = self.vm.code.cp as u32;
        let payload = TaggedValue::create_code_ref(body_addr, self.vm.cfg.code_align_shift())?;
        self.vm.dict.define(name_addr, payload);
        self.vm.dict.hide_head();
        // Checkpoint *after* defining the word itself: `forget` at `;`
        // must drop only the locals declared inside this body, not the
        // word's own dictionary entry.
        let dict_mark = self.vm.dict.mark();
        let head = self.vm.dict.head();

        self.current_defs.push((name_addr, body_addr));
        self.active_defs.push(ActiveDef { reserve_patch: None, local_count: 0 });
        self.closers.push(Closer::EndDefinition { branch_pos, dict_mark, head });
        Ok(())
    }

    fn kw_semi(&mut self, pos: usize) -> VmResult<()> {
        match self.closers.pop() {
            Some(Closer::EndDefinition { branch_pos, dict_mark, head }) => {
                self.patch_reserve()?;
                self.vm.code.emit_op(&mut self.vm.segs, Op::Exit)?;
                self.patch_i16_to_here(branch_pos)?;
                self.finish_definition(dict_mark, head)
            }
            Some(Closer::EndCapsule { branch_pos, dict_mark, head, .. }) => {
                self.patch_reserve()?;
                self.vm.code.emit_op(&mut self.vm.segs, Op::ExitDispatch)?;
                self.patch_i16_to_here(branch_pos)?;
                self.finish_definition(dict_mark, head)
            }
            Some(Closer::EndIf { placeholder }) => self.patch_i16_to_here(placeholder),
            Some(Closer::EndWhen { placeholder }) => self.patch_i16_to_here(placeholder),
            Some(Closer::EndOf { skip_placeholder, mut exits }) => {
                self.vm.code.emit_op(&mut self.vm.segs, Op::Branch)?;
                exits.push(self.vm.code.cp);
                self.vm.code.emit_i16(&mut self.vm.segs, 0)?;
                if let Some(at) = skip_placeholder {
                    self.patch_i16_to_here(at)?;
                }
                match self.closers.last_mut() {
                    Some(Closer::EndCase { exit_patches }) => {
                        exit_patches.extend(exits);
                        Ok(())
                    }
                    _ => Err(VmError::Syntax { pos, detail: "'of' clause without an enclosing 'case'".into() }),
                }
            }
            Some(Closer::EndWith { skip_placeholder, mut exits }) => {
                self.vm.code.emit_op(&mut self.vm.segs, Op::Branch)?;
                exits.push(self.vm.code.cp);
                self.vm.code.emit_i16(&mut self.vm.segs, 0)?;
                if let Some(at) = skip_placeholder {
                    self.patch_i16_to_here(at)?;
                }
                match self.closers.last_mut() {
                    Some(Closer::EndMatch { exit_patches }) => {
                        exit_patches.extend(exits);
                        Ok(())
                    }
                    _ => Err(VmError::Syntax { pos, detail: "'with' clause without an enclosing 'match'".into() }),
                }
            }
            Some(Closer::EndCase { exit_patches }) => {
                for p in exit_patches {
                    self.patch_i16_to_here(p)?;
                }
                Ok(())
            }
            Some(Closer::EndMatch { exit_patches }) => {
                for p in exit_patches {
                    self.patch_i16_to_here(p)?;
                }
                Ok(())
            }
            None => Err(VmError::Syntax { pos, detail: "';' with nothing open".into() }),
        }
    }

    /// Patch the `Reserve` operand emitted lazily at the first `var` in
    /// the innermost active definition with its final local count, if one
    /// was ever emitted.
    fn patch_reserve(&mut self) -> VmResult<()> {
        if let Some(def) = self.active_defs.last() {
            if let Some(at) = def.reserve_patch {
                let n = def.local_count;
                return self.vm.code.patch_u16(&mut self.vm.segs, at, n);
            }
        }
        Ok(())
    }

    fn finish_definition(&mut self, dict_mark: Mark, head: Option<Mark>) -> VmResult<()> {
        self.vm.dict.forget(dict_mark);
        if self.vm.dict.head() != head {
            return Err(VmError::Invariant { detail: "dictionary head changed during definition".into() });
        }
        self.vm.dict.unhide_head();
        self.active_defs.pop();
        self.current_defs.pop();
        Ok(())
    }

    /// Patch a relative `i16` placeholder so it lands on the current CP,
    /// honoring spec.md section 8 invariant 3: the offset is relative to
    /// the address *after* the 2-byte operand slot.
    fn patch_i16_to_here(&mut self, at: usize) -> VmResult<()> {
        let after_slot = at as i64 + 2;
        let offset = self.vm.code.cp as i64 - after_slot;
        self.vm.code.patch_i16(&mut self.vm.segs, at, offset as i16)
    }

    // ---- `recurse` ------------------------------------------------------

    fn kw_recurse(&mut self, pos: usize) -> VmResult<()> {
        let &(_, addr) = self
            .current_defs
            .last()
            .ok_or_else(|| VmError::Syntax { pos, detail: "'recurse' outside a definition".into() })?;
        self.vm.code.align(&mut self.vm.segs, &self.vm.cfg)?;
        self.vm.code.emit_user_call(&mut self.vm.segs, addr, &self.vm.cfg)
    }

    /// Forth's trailing `immediate` marker: flips the most recently
    /// defined dictionary entry's `meta` bit, so later references to
    /// that name run through [`Parser::run_immediate`] instead of
    /// compiling a call.
    fn kw_immediate(&mut self, pos: usize) -> VmResult<()> {
        if self.vm.dict.head().is_none() {
            return Err(VmError::Syntax { pos, detail: "'immediate' with no prior definition".into() });
        }
        self.vm.dict.mark_head_immediate();
        Ok(())
    }

    /// Spec.md section 4.8's immediate execution window: a user-defined
    /// word whose dictionary entry is marked immediate (`meta=1`) runs to
    /// completion right now, at parse time, instead of compiling a call.
    /// Builtins are never marked immediate (the control-flow keywords
    /// above are hardcoded specials, not dictionary lookups), so this
    /// only ever resolves a user CODE address.
    fn run_immediate(&mut self, payload: TaggedValue, pos: usize) -> VmResult<()> {
        let Decoded::Tagged { tag: Tag::Code, value, .. } = payload.untag() else {
            return Err(VmError::Type { detail: "immediate word's payload is not CODE".into() });
        };
        if (value as u32) < tacit_types::MIN_USER_OPCODE as u32 {
            return Err(VmError::Invariant { detail: "a builtin opcode cannot be marked immediate".into() });
        }
        let addr = tacit_types::x1516::decode(value as u16, self.vm.cfg.code_align_shift())?;

        // Save every register/compiler-state field spec.md names, so the
        // nested run can't leak into the outer parse.
        let saved_ip = self.vm.ip;
        let saved_cp = self.vm.code.cp;
        let saved_bcp = self.vm.code.bcp;
        let saved_preserve = self.vm.code.preserve;
        self.vm.code.preserve = true;

        let outcome = self.run_immediate_body(addr);

        self.vm.ip = saved_ip;
        self.vm.code.cp = saved_cp;
        self.vm.code.bcp = saved_bcp;
        self.vm.code.preserve = saved_preserve;

        outcome.map_err(|e| VmError::Syntax {
            pos,
            detail: format!("immediate word raised an error while running at compile time: {e}"),
        })
    }

    /// The synthetic frame itself: call `addr`, then single-step until
    /// `RSP` has unwound back past the frame `call` just pushed (`BP` is
    /// restored automatically by that same unwind, via the ordinary
    /// `Exit` mechanics — no separate save/restore needed for it).
    fn run_immediate_body(&mut self, addr: u32) -> VmResult<()> {
        let target_rsp = self.vm.rsp;
        self.vm.call(addr)?;
        while self.vm.rsp > target_rsp {
            self.vm.step()?;
        }
        Ok(())
    }

    // ---- `if` / `else` ---------------------------------------------------

    fn kw_if(&mut self) -> VmResult<()> {
        self.vm.code.emit_op(&mut self.vm.segs, Op::IfFalseBranch)?;
        let placeholder = self.vm.code.cp;
        self.vm.code.emit_i16(&mut self.vm.segs, 0)?;
        self.closers.push(Closer::EndIf { placeholder });
        Ok(())
    }

    fn kw_else(&mut self, pos: usize) -> VmResult<()> {
        match self.closers.pop() {
            Some(Closer::EndIf { placeholder }) => {
                self.vm.code.emit_op(&mut self.vm.segs, Op::Branch)?;
                let placeholder2 = self.vm.code.cp;
                self.vm.code.emit_i16(&mut self.vm.segs, 0)?;
                self.patch_i16_to_here(placeholder)?;
                self.closers.push(Closer::EndIf { placeholder: placeholder2 });
                Ok(())
            }
            other => {
                if let Some(c) = other {
                    self.closers.push(c);
                }
                Err(VmError::Syntax { pos, detail: "'else' without a matching 'if'".into() })
            }
        }
    }

    // ---- `when` / `do` (unconditional-loop-free guard, spec.md 4.7.5) ---

    fn kw_when(&mut self) -> VmResult<()> {
        self.vm.code.emit_op(&mut self.vm.segs, Op::IfFalseBranch)?;
        let placeholder = self.vm.code.cp;
        self.vm.code.emit_i16(&mut self.vm.segs, 0)?;
        self.closers.push(Closer::EndWhen { placeholder });
        Ok(())
    }

    fn kw_do(&mut self, pos: usize) -> VmResult<()> {
        match self.closers.last() {
            Some(Closer::EndWhen { .. }) => Ok(()), // `do` is purely a readability separator
            _ => Err(VmError::Syntax { pos, detail: "'do' without a matching 'when'".into() }),
        }
    }

    // ---- `case` / `of` / `DEFAULT` ---------------------------------------

    fn kw_case(&mut self) -> VmResult<()> {
        self.closers.push(Closer::EndCase { exit_patches: Vec::new() });
        Ok(())
    }

    fn kw_of(&mut self, pos: usize) -> VmResult<()> {
        if !matches!(self.closers.last(), Some(Closer::EndCase { .. })) {
            return Err(VmError::Syntax { pos, detail: "'of' without an enclosing 'case'".into() });
        }
        let skip_placeholder = if self.pending_default {
            self.pending_default = false;
            self.vm.code.emit_op(&mut self.vm.segs, Op::Drop)?;
            None
        } else {
            self.vm.code.emit_op(&mut self.vm.segs, Op::Over)?;
            self.vm.code.emit_op(&mut self.vm.segs, Op::Equal)?;
            self.vm.code.emit_op(&mut self.vm.segs, Op::IfFalseBranch)?;
            let at = self.vm.code.cp;
            self.vm.code.emit_i16(&mut self.vm.segs, 0)?;
            self.vm.code.emit_op(&mut self.vm.segs, Op::Drop)?;
            Some(at)
        };
        self.closers.push(Closer::EndOf { skip_placeholder, exits: Vec::new() });
        Ok(())
    }

    /// `DEFAULT` marks the next `of`/`with` clause as the unconditional
    /// catch-all: it has no selector value of its own, just a note for the
    /// following clause header to skip its comparison.
    fn kw_default(&mut self) -> VmResult<()> {
        self.pending_default = true;
        Ok(())
    }

    // ---- `match` / `with` (analogous to `case`/`of`) ---------------------

    fn kw_match(&mut self) -> VmResult<()> {
        self.closers.push(Closer::EndMatch { exit_patches: Vec::new() });
        Ok(())
    }

    fn kw_with(&mut self, pos: usize) -> VmResult<()> {
        if !matches!(self.closers.last(), Some(Closer::EndMatch { .. })) {
            return Err(VmError::Syntax { pos, detail: "'with' without an enclosing 'match'".into() });
        }
        let skip_placeholder = if self.pending_default {
            self.pending_default = false;
            self.vm.code.emit_op(&mut self.vm.segs, Op::Drop)?;
            None
        } else {
            self.vm.code.emit_op(&mut self.vm.segs, Op::Over)?;
            self.vm.code.emit_op(&mut self.vm.segs, Op::Equal)?;
            self.vm.code.emit_op(&mut self.vm.segs, Op::IfFalseBranch)?;
            let at = self.vm.code.cp;
            self.vm.code.emit_i16(&mut self.vm.segs, 0)?;
            self.vm.code.emit_op(&mut self.vm.segs, Op::Drop)?;
            Some(at)
        };
        self.closers.push(Closer::EndWith { skip_placeholder, exits: Vec::new() });
        Ok(())
    }

    // ---- `var` / `global` / `->` / `+>` -----------------------------------

    fn kw_var(&mut self, pos: usize) -> VmResult<()> {
        if self.active_defs.is_empty() {
            return Err(VmError::Syntax { pos, detail: "'var' outside a definition".into() });
        }
        self.ensure_reserve_emitted()?;
        let name_tok = self.tok.next_token()?;
        let TokenKind::Word(name) = name_tok.kind else {
            return Err(VmError::Syntax { pos, detail: "expected a name after 'var'".into() });
        };
        let def = self.active_defs.last_mut().expect("checked above");
        let slot = def.local_count;
        def.local_count += 1;
        let name_addr = self.intern(&name)?;
        self.vm.dict.define(name_addr, TaggedValue::tagged(Tag::Local, false, slot));
        self.vm.code.emit_op(&mut self.vm.segs, Op::InitVar)?;
        self.vm.code.emit_u16(&mut self.vm.segs, slot)
    }

    /// Ensure the innermost active definition's prelude has emitted
    /// `Reserve` (spec.md section 4.7.6's `ensure_reserve_emitted`),
    /// inserting it lazily right after the entry point if this is the
    /// first local.
    fn ensure_reserve_emitted(&mut self) -> VmResult<()> {
        if self.active_defs.last().map(|d| d.reserve_patch.is_some()) != Some(false) {
            return Ok(());
        }
        self.vm.code.emit_op(&mut self.vm.segs, Op::Reserve)?;
        let patch_at = self.vm.code.cp;
        self.vm.code.emit_u16(&mut self.vm.segs, 0)?;
        if let Some(def) = self.active_defs.last_mut() {
            def.reserve_patch = Some(patch_at);
        }
        Ok(())
    }

    fn kw_global(&mut self, pos: usize) -> VmResult<()> {
        if !self.active_defs.is_empty() {
            return Err(VmError::Syntax { pos, detail: "'global' only allowed at top level".into() });
        }
        let name_tok = self.tok.next_token()?;
        let TokenKind::Word(name) = name_tok.kind else {
            return Err(VmError::Syntax { pos, detail: "expected a name after 'global'".into() });
        };
        let offset = self.vm.gp;
        self.vm.gp += 1;
        let name_addr = self.intern(&name)?;
        let packed = crate::reference::RefAddr::new(Segment::Data, offset).to_u16()?;
        self.vm.dict.define(name_addr, TaggedValue::create_global_ref(packed));
        self.vm.code.emit_op(&mut self.vm.segs, Op::InitGlobal)?;
        self.vm.code.emit_u16(&mut self.vm.segs, offset as u16)
    }

    fn kw_arrow(&mut self, pos: usize, add: bool) -> VmResult<()> {
        let name_tok = self.tok.next_token()?;
        let TokenKind::Word(name) = name_tok.kind else {
            return Err(VmError::Syntax { pos, detail: "expected a name".into() });
        };
        let name_addr = self.intern(&name)?;
        let payload = self
            .vm
            .dict
            .lookup(name_addr)
            .ok_or_else(|| VmError::Syntax { pos, detail: format!("undefined name '{name}'") })?;

        // Peek ahead for an optional bracket path: `-> name [ ... ]`.
        let next = self.tok.next_token()?;
        let has_path = matches!(&next.kind, TokenKind::Special(s) if s == "[");
        if !has_path {
            self.tok.push_back(next);
        }

        if add {
            if has_path {
                return Err(VmError::Syntax { pos, detail: "'+>' does not support bracket paths".into() });
            }
            // Stack starts as (addend). Push ref, duplicate it, fetch the
            // current value, rotate the addend in front of it, add, then
            // put the ref back on top for `Store`: (addend) -> (addend
            // ref) -> (addend ref ref) -> (addend ref current) -> (ref
            // current addend) -> (ref sum) -> (sum ref).
            self.emit_slot_ref(payload, pos)?;
            self.vm.code.emit_op(&mut self.vm.segs, Op::Dup)?;
            self.vm.code.emit_op(&mut self.vm.segs, Op::Fetch)?;
            self.vm.code.emit_op(&mut self.vm.segs, Op::Rot)?;
            self.vm.code.emit_op(&mut self.vm.segs, Op::Add)?;
            self.vm.code.emit_op(&mut self.vm.segs, Op::Swap)?;
            return self.vm.code.emit_op(&mut self.vm.segs, Op::Store);
        }

        if has_path {
            // Stack starts as (value). Fetch the named container onto the
            // stack, compile the path as a LIST literal on top of it, let
            // `Select` reduce (container, path) to a REF, leaving (value
            // ref) for `Store`.
            self.emit_slot_ref(payload, pos)?;
            self.vm.code.emit_op(&mut self.vm.segs, Op::Fetch)?;
            self.compile_token(Token { kind: TokenKind::Special("[".into()), pos })?;
            loop {
                let t = self.tok.next_token()?;
                if matches!(&t.kind, TokenKind::Special(s) if s == "]") {
                    self.compile_token(t)?;
                    break;
                }
                self.compile_token(t)?;
            }
            self.vm.code.emit_op(&mut self.vm.segs, Op::Select)?;
            return self.vm.code.emit_op(&mut self.vm.segs, Op::Store);
        }

        self.emit_slot_ref(payload, pos)?;
        self.vm.code.emit_op(&mut self.vm.segs, Op::Store)
    }

    /// Push a `REF` to `payload`'s storage slot: `VarRef slot` for a
    /// LOCAL, `GlobalRef offset` for a global REF.
    fn emit_slot_ref(&mut self, payload: TaggedValue, pos: usize) -> VmResult<()> {
        match payload.untag() {
            tacit_types::value::Decoded::Tagged { tag: Tag::Local, value, .. } => {
                self.vm.code.emit_op(&mut self.vm.segs, Op::VarRef)?;
                self.vm.code.emit_u16(&mut self.vm.segs, value as u16)
            }
            tacit_types::value::Decoded::Tagged { tag: Tag::Ref, value, .. } => {
                let r = crate::reference::RefAddr::from_u16(value as u16)?;
                self.vm.code.emit_op(&mut self.vm.segs, Op::GlobalRef)?;
                self.vm.code.emit_u16(&mut self.vm.segs, r.cell as u16)
            }
            other => Err(VmError::Type { detail: format!("'->'/'+>' target is not assignable: {other:?} at {pos}") }),
        }
    }

    // ---- `capsule` --------------------------------------------------------

    fn kw_capsule(&mut self, pos: usize) -> VmResult<()> {
        match self.closers.pop() {
            Some(Closer::EndDefinition { branch_pos, dict_mark, head }) => {
                self.vm.code.align(&mut self.vm.segs, &self.vm.cfg)?;
                self.vm.code.emit_op(&mut self.vm.segs, Op::ExitConstructor)?;
                self.closers.push(Closer::EndCapsule { branch_pos, dict_mark, head });
                Ok(())
            }
            other => {
                if let Some(c) = other {
                    self.closers.push(c);
                }
                Err(VmError::Syntax { pos, detail: "'capsule' must immediately follow ':'".into() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    fn run_source(src: &str) -> Interpreter {
        let mut vm = Interpreter::new(VmConfig::default());
        {
            let mut p = Parser::new(&mut vm, src);
            p.compile_all().unwrap();
        }
        vm.ip = vm.code.bcp;
        vm.run().unwrap();
        vm
    }

    #[test]
    fn plain_number_literal() {
        let mut vm = run_source("42");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(42.0));
    }

    #[test]
    fn colon_definition_and_call() {
        let mut vm = run_source(": sq dup * ; 5 sq");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(25.0));
    }

    #[test]
    fn if_else_picks_the_taken_branch() {
        let mut vm = run_source("1 if 10 else 20 ;");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(10.0));
        let mut vm = run_source("0 if 10 else 20 ;");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(20.0));
    }

    #[test]
    fn if_treats_a_non_numeric_condition_as_falsy() {
        // NIL (and every other tagged, non-NUMBER value) must take the
        // else branch, same as a literal 0.
        let mut vm = run_source("NIL if 10 else 20 ;");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(20.0));
    }

    #[test]
    fn when_do_runs_body_only_on_truthy_guard() {
        let mut vm = run_source("1 when do 42 ;");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(42.0));
        let mut vm = run_source("0 when do 42 ; 7");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(7.0));
    }

    #[test]
    fn match_with_picks_matching_clause() {
        let mut vm = run_source("5 match 1 with 10 ; 5 with 50 ; DEFAULT with 0 ; ;");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(50.0));
        let mut vm = run_source("3 match 1 with 10 ; 5 with 50 ; DEFAULT with 0 ; ;");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(0.0));
    }

    #[test]
    fn global_arrow_store_and_fetch() {
        let mut vm = run_source("0 global g 5 -> g 'g fetch");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(5.0));
    }

    #[test]
    fn global_plus_arrow_accumulates() {
        let mut vm = run_source("0 global g 5 -> g 3 +> g 'g fetch");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(8.0));
    }

    #[test]
    fn var_stores_into_local_slot() {
        // `n` can't be read back by bare name (no source-level local-fetch
        // keyword), so this only exercises that `var`/`->` compile and run;
        // the duplicated 7 proves `-> n` consumed its own copy without
        // touching the one left on the stack.
        let mut vm = run_source(": f 0 var n 7 dup -> n ; f");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(7.0));
    }

    #[test]
    fn recurse_computes_factorial() {
        let mut vm = run_source(": fact dup 1 <= if drop 1 else dup 1 - recurse * ; ; 5 fact");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(120.0));
    }

    #[test]
    fn capsule_dispatch_mutates_its_own_field() {
        // `inc` is dispatched as [receiver, selector]; `slot` only peeks
        // the receiver (it never pops the header), so the capsule is
        // still sitting at `sp-1` both for the read-modify-write inside
        // `inc` and for the follow-up `elem` read after it returns —
        // there's no list-aware `dup` to duplicate a whole compound, so
        // the body never tries to.
        let mut vm = run_source(
            ": inc drop 1 slot dup fetch 1 + swap store ; \
             : counter ( 'inc 0 capsule ; \
             counter 1 dispatch 1 elem",
        );
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(1.0));
        let mut vm = run_source(
            ": inc drop 1 slot dup fetch 1 + swap store ; \
             : counter ( 'inc 0 capsule ; \
             counter 1 dispatch 1 dispatch 1 elem",
        );
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(2.0));
    }

    #[test]
    fn list_literal_reports_length() {
        let mut vm = run_source("( 1 2 3 ) length");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(3.0));
    }

    #[test]
    fn case_picks_matching_clause() {
        let mut vm = run_source("5 case 1 of 10 ; 5 of 50 ; DEFAULT of 0 ; ;");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(50.0));
    }

    #[test]
    fn case_falls_through_to_default() {
        let mut vm = run_source("3 case 1 of 10 ; 5 of 50 ; DEFAULT of 0 ; ;");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(0.0));
    }

    #[test]
    fn of_without_case_is_a_syntax_error() {
        let mut vm = Interpreter::new(VmConfig::default());
        let mut p = Parser::new(&mut vm, "of 1 ;");
        assert!(matches!(p.compile_all(), Err(VmError::Syntax { .. })));
    }

    #[test]
    fn user_defined_immediate_runs_at_parse_time() {
        // Top-level code only *executes* once `vm.run()` walks it after
        // `compile_all` returns — up to that point it's just bytes in
        // CODE. `immediate` words are the one exception (spec.md section
        // 4.8): they run inside `compile_all` itself. Proving it means
        // observing an effect *before* any `run()` call; an ordinary
        // (non-immediate) call would leave nothing on the stack yet.
        let mut vm = Interpreter::new(VmConfig::default());
        {
            let mut p = Parser::new(&mut vm, ": stamp 42 ; immediate stamp");
            p.compile_all().unwrap();
        }
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(42.0));
    }

    #[test]
    fn user_defined_immediate_sees_effects_of_earlier_immediate_calls() {
        // Two separate invocations of the same immediate word, both
        // still inside compile-time, share the ordinary data stack —
        // `bump`'s second call sees the first call's result.
        let mut vm = Interpreter::new(VmConfig::default());
        {
            let mut p = Parser::new(&mut vm, ": bump 1 + ; immediate");
            p.compile_all().unwrap();
        }
        vm.push_stack(TaggedValue::number(0.0)).unwrap();
        {
            let mut p = Parser::new(&mut vm, "bump bump bump");
            p.compile_all().unwrap();
        }
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(3.0));
    }

    #[test]
    fn non_immediate_word_still_compiles_as_a_call() {
        let mut vm = run_source(": twice dup + ; 21 twice");
        assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(42.0));
    }

    #[test]
    fn unclosed_definition_is_an_error() {
        let mut vm = Interpreter::new(VmConfig::default());
        let mut p = Parser::new(&mut vm, ": foo");
        assert!(matches!(p.compile_all(), Err(VmError::Unclosed { .. })));
    }
}
