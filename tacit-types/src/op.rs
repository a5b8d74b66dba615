//! Builtin opcode enum (spec.md section 4.9), in the style of
//! `fuel-asm`'s `Opcode`: a dense `#[repr(u8)]` enum with one variant per
//! instruction, all values below `MIN_USER_OPCODE`.

use crate::error::VmError;

/// A builtin instruction. Dispatch is a single `match` on this enum
/// (spec.md section 9's redesign note), never a function-pointer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
pub enum Op {
    Abort = 0,
    LiteralNumber = 1,
    LiteralString = 2,
    Branch = 3,
    IfFalseBranch = 4,
    Call = 5,
    Exit = 6,
    Eval = 7,

    Add = 8,
    Sub = 9,
    Mul = 10,
    Div = 11,
    Mod = 12,

    Equal = 13,
    NotEqual = 14,
    LessThan = 15,
    LessEqual = 16,
    GreaterThan = 17,
    GreaterEqual = 18,

    Dup = 19,
    Drop = 20,
    Swap = 21,
    Over = 22,
    Rot = 23,
    RevRot = 24,
    Nip = 25,
    Tuck = 26,

    OpenList = 27,
    CloseList = 28,
    Length = 29,
    Size = 30,
    Slot = 31,
    Elem = 32,
    Fetch = 33,
    Store = 34,
    Find = 35,
    Select = 36,
    Prepend = 37,
    Append = 38,

    Reserve = 39,
    InitVar = 40,
    VarRef = 41,
    GlobalRef = 42,
    InitGlobal = 43,
    Load = 44,

    Dispatch = 45,
    ExitConstructor = 46,
    ExitDispatch = 47,

    Print = 48,

    /// Advances `IP` by one byte and nothing else. Grounded on `fuel-asm`'s
    /// `NOOP`; exists so [`crate::x1516`] alignment padding is a byte the
    /// interpreter can safely fall through rather than a raw zero (which
    /// would decode as `Abort`).
    Nop = 49,
}

impl Op {
    /// One byte per spec.md section 4.6's `emit_op`: every `Op` fits in
    /// a single byte with bit 7 clear.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Op {
    type Error = VmError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Op::*;
        Ok(match byte {
            0 => Abort,
            1 => LiteralNumber,
            2 => LiteralString,
            3 => Branch,
            4 => IfFalseBranch,
            5 => Call,
            6 => Exit,
            7 => Eval,
            8 => Add,
            9 => Sub,
            10 => Mul,
            11 => Div,
            12 => Mod,
            13 => Equal,
            14 => NotEqual,
            15 => LessThan,
            16 => LessEqual,
            17 => GreaterThan,
            18 => GreaterEqual,
            19 => Dup,
            20 => Drop,
            21 => Swap,
            22 => Over,
            23 => Rot,
            24 => RevRot,
            25 => Nip,
            26 => Tuck,
            27 => OpenList,
            28 => CloseList,
            29 => Length,
            30 => Size,
            31 => Slot,
            32 => Elem,
            33 => Fetch,
            34 => Store,
            35 => Find,
            36 => Select,
            37 => Prepend,
            38 => Append,
            39 => Reserve,
            40 => InitVar,
            41 => VarRef,
            42 => GlobalRef,
            43 => InitGlobal,
            44 => Load,
            45 => Dispatch,
            46 => ExitConstructor,
            47 => ExitDispatch,
            48 => Print,
            49 => Nop,
            other => return Err(VmError::InvalidOpcode(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_op_is_below_min_user_opcode_and_roundtrips() {
        for op in Op::iter() {
            assert!(op.code() < crate::MIN_USER_OPCODE);
            assert_eq!(Op::try_from(op.code()).unwrap(), op);
        }
    }

    #[test]
    fn invalid_opcode_is_an_error() {
        assert!(Op::try_from(200u8).is_err());
    }
}
