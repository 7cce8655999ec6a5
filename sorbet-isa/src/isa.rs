use core::fmt;

use serde::{Deserialize, Serialize};

/// Number of registers in the register file, `r0` through `r8`.
pub const REG_COUNT: usize = 9;

/// The operation selector of a memory word.
///
/// `Data` marks a word that merely stores a literal integer; every other
/// opcode is executable.  The serialized form of an opcode is its canonical
/// uppercase mnemonic.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Opcode {
    /// A memory word storing a literal integer.  Not an instruction.
    Data,

    /// Load a register from the addressed memory cell or the input port
    Ld,

    /// Store a register to the addressed memory cell or the output port
    Sw,

    /// Unconditional transfer of control to an absolute code address
    Jmp,

    /// Branch if the two register operands are equal
    Beq,

    /// Branch if the two register operands are not equal
    Bnq,

    /// Branch if the first register operand is strictly less than the second
    Blt,

    /// Sum of a register and a flexible right operand
    Add,

    /// Difference of a register and a flexible right operand
    Sub,

    /// Product of a register and a flexible right operand
    Mul,

    /// Floor quotient of a register and a flexible right operand
    Div,

    /// Floor remainder of a register and a flexible right operand
    Rem,

    /// Stop the machine
    Hlt,
}

/// Coarse grouping of opcodes by the datapath resources they exercise.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Category {
    /// Plain storage words
    Data,
    /// Memory traffic: `LD` and `SW`
    Memory,
    /// Control transfers: `JMP` and the conditional branches
    Branch,
    /// Two-operand ALU instructions
    Arithmetic,
    /// Machine stop
    Halt,
}

impl Opcode {
    /// The canonical uppercase mnemonic, as it appears in source text and in
    /// the encoded image.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Ld => "LD",
            Self::Sw => "SW",
            Self::Jmp => "JMP",
            Self::Beq => "BEQ",
            Self::Bnq => "BNQ",
            Self::Blt => "BLT",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Rem => "REM",
            Self::Hlt => "HLT",
        }
    }

    /// The category this opcode belongs to.
    #[must_use]
    pub const fn category(self) -> Category {
        match self {
            Self::Data => Category::Data,
            Self::Ld | Self::Sw => Category::Memory,
            Self::Jmp | Self::Beq | Self::Bnq | Self::Blt => Category::Branch,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem => {
                Category::Arithmetic
            }
            Self::Hlt => Category::Halt,
        }
    }

    /// Whether encoded words with this opcode carry an addressing mode.
    ///
    /// True exactly for `LD`, `SW`, and the arithmetic opcodes.
    #[must_use]
    pub const fn has_addr_mode(self) -> bool {
        matches!(
            self,
            Self::Ld
                | Self::Sw
                | Self::Add
                | Self::Sub
                | Self::Mul
                | Self::Div
                | Self::Rem
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// The addressing mode of the flexible operand of `LD`, `SW`, and the
/// arithmetic instructions.
///
/// The discriminants are the integer wire form used by the encoded image.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    num_derive::FromPrimitive,
    num_derive::ToPrimitive,
)]
pub enum AddrMode {
    /// The operand is a register index and the value is read from it
    RegDirect = 0,

    /// The operand is a register index and the effective address is held in
    /// that register
    RegIndirect = 1,

    /// The operand is a literal: an immediate value, or an absolute address
    /// for the memory instructions
    Immediate = 2,
}

/// A validated register index, `r0` through `r8`.
///
/// `r0` is hard-wired to zero: the datapath clobbers it back to zero after
/// every register-file write, so holding a `Reg` is proof that the index is
/// in range but not that the register is writable in any observable way.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Reg(u8);

impl Reg {
    /// The zero register
    pub const R0: Self = Self(0);

    /// Construct a register from a raw index, rejecting indices past `r8`.
    #[must_use]
    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < REG_COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    /// The raw index, suitable for indexing the register file.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// The flexible source operand of an `LD` instruction, already lowered from
/// its textual form.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LoadSrc {
    /// The effective address is held in a register (addressing mode 1).
    ///
    /// Register-direct `LD` sources are folded into this variant by the
    /// assembler: a bare register operand also addresses memory through the
    /// register's value.
    Indirect(Reg),

    /// The effective address is encoded in the instruction (addressing
    /// mode 2)
    Absolute(i64),

    /// The memory-mapped input port
    Input,
}

/// The flexible destination operand of an `SW` instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StoreDst {
    /// The effective address is held in a register (addressing mode 1)
    Indirect(Reg),

    /// The effective address is encoded in the instruction (addressing
    /// mode 2)
    Absolute(i64),

    /// The memory-mapped output port
    Output,
}

/// The flexible right operand of an arithmetic instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AluSrc {
    /// The value of a register (addressing mode 0)
    Reg(Reg),

    /// A register-held address (addressing mode 1).  Encodable for image
    /// compatibility; the control unit gives it no latch schedule.
    Indirect(Reg),

    /// An immediate literal (addressing mode 2)
    Imm(i64),
}

impl AluSrc {
    /// The addressing mode this operand encodes as.
    #[must_use]
    pub const fn addr_mode(self) -> AddrMode {
        match self {
            Self::Reg(_) => AddrMode::RegDirect,
            Self::Indirect(_) => AddrMode::RegIndirect,
            Self::Imm(_) => AddrMode::Immediate,
        }
    }
}

/// An executable instruction carrying exactly the operands its opcode needs.
///
/// Branch targets and absolute addresses are indices into the memory image;
/// the assembler has already resolved every label by the time a value of
/// this type exists.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Instr {
    /// Stop the machine
    Hlt,

    /// Continue execution at `target`
    Jmp {
        /// Absolute code address to jump to
        target: i64,
    },

    /// Load `rd` from the cell addressed by `src`
    Ld {
        /// Destination register
        rd: Reg,
        /// Addressed source cell or input port
        src: LoadSrc,
    },

    /// Store `rs` to the cell addressed by `dst`
    Sw {
        /// Addressed destination cell or output port
        dst: StoreDst,
        /// Source register
        rs: Reg,
    },

    /// Branch to `target` when `a == b`
    Beq {
        /// Left comparison register
        a: Reg,
        /// Right comparison register
        b: Reg,
        /// Absolute code address taken on success
        target: i64,
    },

    /// Branch to `target` when `a != b`
    Bnq {
        /// Left comparison register
        a: Reg,
        /// Right comparison register
        b: Reg,
        /// Absolute code address taken on success
        target: i64,
    },

    /// Branch to `target` when `a < b`, strictly
    Blt {
        /// Left comparison register
        a: Reg,
        /// Right comparison register
        b: Reg,
        /// Absolute code address taken on success
        target: i64,
    },

    /// `rd <- ra + rhs`
    Add {
        /// Destination register
        rd: Reg,
        /// Left operand register
        ra: Reg,
        /// Flexible right operand
        rhs: AluSrc,
    },

    /// `rd <- ra - rhs`
    Sub {
        /// Destination register
        rd: Reg,
        /// Left operand register
        ra: Reg,
        /// Flexible right operand
        rhs: AluSrc,
    },

    /// `rd <- ra * rhs`
    Mul {
        /// Destination register
        rd: Reg,
        /// Left operand register
        ra: Reg,
        /// Flexible right operand
        rhs: AluSrc,
    },

    /// `rd <- ra / rhs`, rounding toward negative infinity
    Div {
        /// Destination register
        rd: Reg,
        /// Left operand register
        ra: Reg,
        /// Flexible right operand
        rhs: AluSrc,
    },

    /// `rd <- ra mod rhs`, with the sign of the divisor
    Rem {
        /// Destination register
        rd: Reg,
        /// Left operand register
        ra: Reg,
        /// Flexible right operand
        rhs: AluSrc,
    },
}

impl Instr {
    /// The opcode of this instruction.
    #[must_use]
    pub const fn opcode(self) -> Opcode {
        match self {
            Self::Hlt => Opcode::Hlt,
            Self::Jmp { .. } => Opcode::Jmp,
            Self::Ld { .. } => Opcode::Ld,
            Self::Sw { .. } => Opcode::Sw,
            Self::Beq { .. } => Opcode::Beq,
            Self::Bnq { .. } => Opcode::Bnq,
            Self::Blt { .. } => Opcode::Blt,
            Self::Add { .. } => Opcode::Add,
            Self::Sub { .. } => Opcode::Sub,
            Self::Mul { .. } => Opcode::Mul,
            Self::Div { .. } => Opcode::Div,
            Self::Rem { .. } => Opcode::Rem,
        }
    }
}

/// A single word of the unified memory: a stored integer or an instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Word {
    /// A literal integer wrapped for storage
    Data(i64),

    /// An executable instruction
    Instr(Instr),
}

impl Word {
    /// The opcode tag of this word.
    #[must_use]
    pub const fn opcode(self) -> Opcode {
        match self {
            Self::Data(_) => Opcode::Data,
            Self::Instr(instr) => instr.opcode(),
        }
    }
}

impl Default for Word {
    /// Uninitialized memory cells hold a zero datum.
    fn default() -> Self {
        Self::Data(0)
    }
}

/// Utilities for enumerating representative ISA values in tests
pub mod test_utils {
    use super::{AluSrc, Instr, LoadSrc, Opcode, Reg, StoreDst, Word};

    /// All opcodes of the instruction set
    pub const OPCODES: [Opcode; 13] = [
        Opcode::Data,
        Opcode::Ld,
        Opcode::Sw,
        Opcode::Jmp,
        Opcode::Beq,
        Opcode::Bnq,
        Opcode::Blt,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Rem,
        Opcode::Hlt,
    ];

    /// One memory word for every instruction shape and addressing mode.
    ///
    /// Covers each opcode at least once, every `LoadSrc`/`StoreDst`/`AluSrc`
    /// variant, and a plain data word.
    #[must_use]
    pub fn representative_words() -> Vec<Word> {
        let r1 = Reg::new(1).unwrap_or(Reg::R0);
        let r2 = Reg::new(2).unwrap_or(Reg::R0);
        vec![
            Word::Data(-42),
            Word::Instr(Instr::Hlt),
            Word::Instr(Instr::Jmp { target: 3 }),
            Word::Instr(Instr::Ld {
                rd: r1,
                src: LoadSrc::Indirect(r2),
            }),
            Word::Instr(Instr::Ld {
                rd: r1,
                src: LoadSrc::Absolute(17),
            }),
            Word::Instr(Instr::Ld {
                rd: r1,
                src: LoadSrc::Input,
            }),
            Word::Instr(Instr::Sw {
                dst: StoreDst::Indirect(r2),
                rs: r1,
            }),
            Word::Instr(Instr::Sw {
                dst: StoreDst::Absolute(17),
                rs: r1,
            }),
            Word::Instr(Instr::Sw {
                dst: StoreDst::Output,
                rs: r1,
            }),
            Word::Instr(Instr::Beq {
                a: r1,
                b: r2,
                target: 0,
            }),
            Word::Instr(Instr::Bnq {
                a: r1,
                b: r2,
                target: 0,
            }),
            Word::Instr(Instr::Blt {
                a: r1,
                b: r2,
                target: 0,
            }),
            Word::Instr(Instr::Add {
                rd: r1,
                ra: r2,
                rhs: AluSrc::Reg(r2),
            }),
            Word::Instr(Instr::Sub {
                rd: r1,
                ra: r2,
                rhs: AluSrc::Imm(-7),
            }),
            Word::Instr(Instr::Mul {
                rd: r1,
                ra: r2,
                rhs: AluSrc::Indirect(r2),
            }),
            Word::Instr(Instr::Div {
                rd: r1,
                ra: r2,
                rhs: AluSrc::Imm(2),
            }),
            Word::Instr(Instr::Rem {
                rd: r1,
                ra: r2,
                rhs: AluSrc::Reg(r1),
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;
    use crate::test_utils::{representative_words, OPCODES};

    #[test]
    fn mnemonics_are_unique_and_uppercase() {
        let mnemonics: Vec<&str> =
            OPCODES.iter().map(|op| op.mnemonic()).collect();
        assert_eq!(mnemonics.iter().unique().count(), OPCODES.len());
        for mnemonic in mnemonics {
            assert_eq!(mnemonic, mnemonic.to_uppercase());
        }
    }

    #[test]
    fn addr_mode_presence_follows_category() {
        for op in OPCODES {
            let expected = matches!(
                op.category(),
                Category::Memory | Category::Arithmetic
            );
            assert_eq!(op.has_addr_mode(), expected, "opcode {op}");
        }
    }

    #[test]
    fn register_indices_are_bounded() {
        for index in 0..=8_u8 {
            let reg = Reg::new(index);
            assert!(reg.is_some());
            assert_eq!(reg.map(Reg::index), Some(index as usize));
        }
        assert!(Reg::new(9).is_none());
        assert!(Reg::new(250).is_none());
    }

    #[test]
    fn register_display_matches_source_syntax() {
        let reg = Reg::new(3).unwrap();
        assert_eq!(reg.to_string(), "r3");
        assert_eq!(Reg::R0.to_string(), "r0");
    }

    #[test]
    fn default_word_is_zero_datum() {
        assert_eq!(Word::default(), Word::Data(0));
        assert_eq!(Word::default().opcode(), Opcode::Data);
    }

    #[test]
    fn representative_words_cover_every_opcode() {
        let covered: Vec<Opcode> = representative_words()
            .iter()
            .map(|word| word.opcode())
            .unique()
            .collect();
        assert_eq!(covered.len(), OPCODES.len());
    }
}
