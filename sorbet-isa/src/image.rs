use core::fmt;

use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::{AddrMode, AluSrc, Instr, LoadSrc, Opcode, Reg, StoreDst, Word};

/// One serialized memory word of the interchange format.
///
/// The encoded image is a list of these records, one per line.  Converting
/// a [`RawWord`] back into a [`Word`] performs the structural validation:
/// operand counts, addressing-mode presence and range, register ranges, and
/// the legal positions of the port sentinels.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RawWord {
    /// Canonical uppercase opcode name
    pub opcode: Opcode,
    /// Addressing mode of the flexible operand, carried only by `LD`, `SW`,
    /// and arithmetic words
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr_type: Option<u8>,
    /// Operand cells in instruction order
    pub args: Vec<RawArg>,
}

/// A single operand cell of a [`RawWord`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawArg {
    /// A register index, absolute address, or immediate
    Int(i64),
    /// A memory-mapped port sentinel
    Port(Port),
}

/// The port sentinels that may appear as an `LD` source or `SW` destination.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Port {
    /// The input port, spelled `inp` in source and image
    #[serde(rename = "inp")]
    Input,
    /// The output port, spelled `out` in source and image
    #[serde(rename = "out")]
    Output,
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Input => write!(f, "inp"),
            Self::Output => write!(f, "out"),
        }
    }
}

/// Why an image or one of its records could not be loaded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// The image text is not a well-formed record list, or a record names an
    /// opcode outside the instruction set
    Malformed(String),

    /// A record carries the wrong number of operand cells for its opcode
    ArgCount {
        /// Opcode of the offending record
        opcode: Opcode,
        /// Number of operands the opcode requires
        expected: usize,
        /// Number of operands the record carries
        found: usize,
    },

    /// A record that requires an addressing mode does not carry one
    MissingAddrMode(Opcode),

    /// A record that must not carry an addressing mode does
    UnexpectedAddrMode(Opcode),

    /// A record carries an addressing mode its opcode cannot use
    InvalidAddrMode {
        /// Opcode of the offending record
        opcode: Opcode,
        /// The rejected mode value
        mode: u8,
    },

    /// A register operand is outside `r0..=r8`
    RegisterRange {
        /// Opcode of the offending record
        opcode: Opcode,
        /// The rejected register index
        value: i64,
    },

    /// A port sentinel appears in a position where it is not allowed
    MisplacedPort {
        /// Opcode of the offending record
        opcode: Opcode,
        /// The offending sentinel
        port: Port,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Malformed(ref msg) => {
                write!(f, "malformed image: {msg}")
            }
            Self::ArgCount {
                opcode,
                expected,
                found,
            } => write!(
                f,
                "{opcode} record carries {found} operands, expected {expected}"
            ),
            Self::MissingAddrMode(opcode) => {
                write!(f, "{opcode} record is missing its addressing mode")
            }
            Self::UnexpectedAddrMode(opcode) => {
                write!(f, "{opcode} record must not carry an addressing mode")
            }
            Self::InvalidAddrMode { opcode, mode } => {
                write!(f, "addressing mode {mode} is not valid for {opcode}")
            }
            Self::RegisterRange { opcode, value } => {
                write!(f, "register index {value} in {opcode} is out of range")
            }
            Self::MisplacedPort { opcode, port } => {
                write!(f, "port sentinel `{port}` is not allowed in {opcode}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<Word> for RawWord {
    fn from(word: Word) -> Self {
        match word {
            Word::Data(value) => Self {
                opcode: Opcode::Data,
                addr_type: None,
                args: vec![RawArg::Int(value)],
            },
            Word::Instr(instr) => Self::from_instr(instr),
        }
    }
}

impl RawWord {
    /// Serialize one instruction into its record form.
    fn from_instr(instr: Instr) -> Self {
        let reg = |r: Reg| RawArg::Int(r.index() as i64);
        let (addr_type, args) = match instr {
            Instr::Hlt => (None, vec![]),
            Instr::Jmp { target } => (None, vec![RawArg::Int(target)]),
            Instr::Ld { rd, src } => {
                let (mode, cell) = match src {
                    LoadSrc::Indirect(r) => (AddrMode::RegIndirect, reg(r)),
                    LoadSrc::Absolute(addr) => {
                        (AddrMode::Immediate, RawArg::Int(addr))
                    }
                    LoadSrc::Input => {
                        (AddrMode::Immediate, RawArg::Port(Port::Input))
                    }
                };
                (Some(mode as u8), vec![reg(rd), cell])
            }
            Instr::Sw { dst, rs } => {
                let (mode, cell) = match dst {
                    StoreDst::Indirect(r) => (AddrMode::RegIndirect, reg(r)),
                    StoreDst::Absolute(addr) => {
                        (AddrMode::Immediate, RawArg::Int(addr))
                    }
                    StoreDst::Output => {
                        (AddrMode::Immediate, RawArg::Port(Port::Output))
                    }
                };
                (Some(mode as u8), vec![cell, reg(rs)])
            }
            Instr::Beq { a, b, target }
            | Instr::Bnq { a, b, target }
            | Instr::Blt { a, b, target } => {
                (None, vec![reg(a), reg(b), RawArg::Int(target)])
            }
            Instr::Add { rd, ra, rhs }
            | Instr::Sub { rd, ra, rhs }
            | Instr::Mul { rd, ra, rhs }
            | Instr::Div { rd, ra, rhs }
            | Instr::Rem { rd, ra, rhs } => {
                let cell = match rhs {
                    AluSrc::Reg(r) | AluSrc::Indirect(r) => reg(r),
                    AluSrc::Imm(value) => RawArg::Int(value),
                };
                (
                    Some(rhs.addr_mode() as u8),
                    vec![reg(rd), reg(ra), cell],
                )
            }
        };
        Self {
            opcode: instr.opcode(),
            addr_type,
            args,
        }
    }

    /// One operand cell, or an [`DecodeError::ArgCount`] naming the position.
    fn arg(&self, idx: usize, expected: usize) -> Result<RawArg, DecodeError> {
        self.args.get(idx).copied().ok_or(DecodeError::ArgCount {
            opcode: self.opcode,
            expected,
            found: self.args.len(),
        })
    }

    /// An operand cell that must be a plain integer.
    fn int_arg(&self, idx: usize, expected: usize) -> Result<i64, DecodeError> {
        match self.arg(idx, expected)? {
            RawArg::Int(value) => Ok(value),
            RawArg::Port(port) => Err(DecodeError::MisplacedPort {
                opcode: self.opcode,
                port,
            }),
        }
    }

    /// An operand cell that must be an in-range register index.
    fn reg_arg(&self, idx: usize, expected: usize) -> Result<Reg, DecodeError> {
        let value = self.int_arg(idx, expected)?;
        u8::try_from(value)
            .ok()
            .and_then(Reg::new)
            .ok_or(DecodeError::RegisterRange {
                opcode: self.opcode,
                value,
            })
    }

    /// Reject records with trailing operand cells.
    fn expect_len(&self, expected: usize) -> Result<(), DecodeError> {
        if self.args.len() == expected {
            Ok(())
        } else {
            Err(DecodeError::ArgCount {
                opcode: self.opcode,
                expected,
                found: self.args.len(),
            })
        }
    }

    /// The addressing mode of a record that requires one.
    fn addr_mode(&self) -> Result<AddrMode, DecodeError> {
        let mode = self
            .addr_type
            .ok_or(DecodeError::MissingAddrMode(self.opcode))?;
        AddrMode::from_u8(mode).ok_or(DecodeError::InvalidAddrMode {
            opcode: self.opcode,
            mode,
        })
    }

    /// Reject an addressing mode on a record that must not carry one.
    fn expect_no_addr_mode(&self) -> Result<(), DecodeError> {
        if self.addr_type.is_none() {
            Ok(())
        } else {
            Err(DecodeError::UnexpectedAddrMode(self.opcode))
        }
    }
}

impl TryFrom<RawWord> for Word {
    type Error = DecodeError;

    fn try_from(raw: RawWord) -> Result<Self, Self::Error> {
        let word = match raw.opcode {
            Opcode::Data => {
                raw.expect_no_addr_mode()?;
                raw.expect_len(1)?;
                Self::Data(raw.int_arg(0, 1)?)
            }
            Opcode::Hlt => {
                raw.expect_no_addr_mode()?;
                raw.expect_len(0)?;
                Self::Instr(Instr::Hlt)
            }
            Opcode::Jmp => {
                raw.expect_no_addr_mode()?;
                raw.expect_len(1)?;
                Self::Instr(Instr::Jmp {
                    target: raw.int_arg(0, 1)?,
                })
            }
            Opcode::Ld => {
                raw.expect_len(2)?;
                let rd = raw.reg_arg(0, 2)?;
                let src = match raw.addr_mode()? {
                    AddrMode::RegIndirect => {
                        LoadSrc::Indirect(raw.reg_arg(1, 2)?)
                    }
                    AddrMode::Immediate => match raw.arg(1, 2)? {
                        RawArg::Int(addr) => LoadSrc::Absolute(addr),
                        RawArg::Port(Port::Input) => LoadSrc::Input,
                        RawArg::Port(port @ Port::Output) => {
                            return Err(DecodeError::MisplacedPort {
                                opcode: raw.opcode,
                                port,
                            })
                        }
                    },
                    AddrMode::RegDirect => {
                        return Err(DecodeError::InvalidAddrMode {
                            opcode: raw.opcode,
                            mode: AddrMode::RegDirect as u8,
                        })
                    }
                };
                Self::Instr(Instr::Ld { rd, src })
            }
            Opcode::Sw => {
                raw.expect_len(2)?;
                let rs = raw.reg_arg(1, 2)?;
                let dst = match raw.addr_mode()? {
                    AddrMode::RegIndirect => {
                        StoreDst::Indirect(raw.reg_arg(0, 2)?)
                    }
                    AddrMode::Immediate => match raw.arg(0, 2)? {
                        RawArg::Int(addr) => StoreDst::Absolute(addr),
                        RawArg::Port(Port::Output) => StoreDst::Output,
                        RawArg::Port(port @ Port::Input) => {
                            return Err(DecodeError::MisplacedPort {
                                opcode: raw.opcode,
                                port,
                            })
                        }
                    },
                    AddrMode::RegDirect => {
                        return Err(DecodeError::InvalidAddrMode {
                            opcode: raw.opcode,
                            mode: AddrMode::RegDirect as u8,
                        })
                    }
                };
                Self::Instr(Instr::Sw { dst, rs })
            }
            Opcode::Beq | Opcode::Bnq | Opcode::Blt => {
                raw.expect_no_addr_mode()?;
                raw.expect_len(3)?;
                let a = raw.reg_arg(0, 3)?;
                let b = raw.reg_arg(1, 3)?;
                let target = raw.int_arg(2, 3)?;
                Self::Instr(match raw.opcode {
                    Opcode::Beq => Instr::Beq { a, b, target },
                    Opcode::Bnq => Instr::Bnq { a, b, target },
                    _ => Instr::Blt { a, b, target },
                })
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Rem => {
                raw.expect_len(3)?;
                let rd = raw.reg_arg(0, 3)?;
                let ra = raw.reg_arg(1, 3)?;
                let rhs = match raw.addr_mode()? {
                    AddrMode::RegDirect => AluSrc::Reg(raw.reg_arg(2, 3)?),
                    AddrMode::RegIndirect => {
                        AluSrc::Indirect(raw.reg_arg(2, 3)?)
                    }
                    AddrMode::Immediate => AluSrc::Imm(raw.int_arg(2, 3)?),
                };
                Self::Instr(match raw.opcode {
                    Opcode::Add => Instr::Add { rd, ra, rhs },
                    Opcode::Sub => Instr::Sub { rd, ra, rhs },
                    Opcode::Mul => Instr::Mul { rd, ra, rhs },
                    Opcode::Div => Instr::Div { rd, ra, rhs },
                    _ => Instr::Rem { rd, ra, rhs },
                })
            }
        };
        Ok(word)
    }
}

/// Serialize a memory image in the interchange format, one record per line.
///
/// # Errors
///
/// Returns the underlying serializer error; with well-formed [`Word`] values
/// serialization does not fail in practice.
pub fn encode(image: &[Word]) -> Result<String, serde_json::Error> {
    let records = image
        .iter()
        .map(|&word| serde_json::to_string(&RawWord::from(word)))
        .collect::<Result<Vec<String>, serde_json::Error>>()?;
    Ok(format!("[{}]", records.join(",\n ")))
}

/// Parse an encoded memory image back into typed words.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the text is not a record list, a record
/// names an unknown opcode, or a record fails structural validation.
pub fn decode(text: &str) -> Result<Vec<Word>, DecodeError> {
    let records: Vec<RawWord> = serde_json::from_str(text)
        .map_err(|err| DecodeError::Malformed(err.to_string()))?;
    records.into_iter().map(Word::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::representative_words;

    fn reg(index: u8) -> Reg {
        Reg::new(index).unwrap()
    }

    #[test]
    fn encode_renders_one_record_per_line() {
        let image = vec![
            Word::Instr(Instr::Ld {
                rd: reg(1),
                src: LoadSrc::Input,
            }),
            Word::Instr(Instr::Sw {
                dst: StoreDst::Output,
                rs: reg(1),
            }),
            Word::Instr(Instr::Hlt),
            Word::Data(72),
        ];
        let text = encode(&image).unwrap();
        assert_eq!(
            text,
            concat!(
                "[{\"opcode\":\"LD\",\"addr_type\":2,\"args\":[1,\"inp\"]},\n",
                " {\"opcode\":\"SW\",\"addr_type\":2,\"args\":[\"out\",1]},\n",
                " {\"opcode\":\"HLT\",\"args\":[]},\n",
                " {\"opcode\":\"DATA\",\"args\":[72]}]",
            )
        );
    }

    #[test]
    fn decode_reverses_encode_for_every_instruction_shape() {
        let image = representative_words();
        let decoded = decode(&encode(&image).unwrap()).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn decode_accepts_whitespace_shaped_like_the_reference_output() {
        let text = concat!(
            "[{\"opcode\": \"ADD\", \"addr_type\": 2, \"args\": [2, 0, 7]},\n",
            " {\"opcode\": \"HLT\", \"args\": []},\n",
            " {\"opcode\": \"DATA\", \"args\": [105]}]",
        );
        let image = decode(text).unwrap();
        assert_eq!(
            image,
            vec![
                Word::Instr(Instr::Add {
                    rd: reg(2),
                    ra: Reg::R0,
                    rhs: AluSrc::Imm(7),
                }),
                Word::Instr(Instr::Hlt),
                Word::Data(105),
            ]
        );
    }

    #[test]
    fn decode_rejects_unknown_opcodes() {
        let text = "[{\"opcode\":\"NOP\",\"args\":[]}]";
        assert!(matches!(decode(text), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn decode_rejects_wrong_operand_counts() {
        let text = "[{\"opcode\":\"JMP\",\"args\":[]}]";
        assert_eq!(
            decode(text),
            Err(DecodeError::ArgCount {
                opcode: Opcode::Jmp,
                expected: 1,
                found: 0,
            })
        );
    }

    #[test]
    fn decode_rejects_missing_addressing_mode() {
        let text = "[{\"opcode\":\"ADD\",\"args\":[1,2,3]}]";
        assert_eq!(
            decode(text),
            Err(DecodeError::MissingAddrMode(Opcode::Add))
        );
    }

    #[test]
    fn decode_rejects_addressing_mode_on_branches() {
        let text = "[{\"opcode\":\"BEQ\",\"addr_type\":0,\"args\":[1,2,3]}]";
        assert_eq!(
            decode(text),
            Err(DecodeError::UnexpectedAddrMode(Opcode::Beq))
        );
    }

    #[test]
    fn decode_rejects_register_direct_loads() {
        // The assembler folds register-direct LD/SW operands into the
        // register-indirect mode, so mode 0 never appears on them.
        let text = "[{\"opcode\":\"LD\",\"addr_type\":0,\"args\":[1,2]}]";
        assert_eq!(
            decode(text),
            Err(DecodeError::InvalidAddrMode {
                opcode: Opcode::Ld,
                mode: 0,
            })
        );
    }

    #[test]
    fn decode_rejects_out_of_range_registers() {
        let text = "[{\"opcode\":\"ADD\",\"addr_type\":0,\"args\":[9,0,1]}]";
        assert_eq!(
            decode(text),
            Err(DecodeError::RegisterRange {
                opcode: Opcode::Add,
                value: 9,
            })
        );
    }

    #[test]
    fn decode_rejects_misplaced_port_sentinels() {
        let text = "[{\"opcode\":\"LD\",\"addr_type\":2,\"args\":[1,\"out\"]}]";
        assert_eq!(
            decode(text),
            Err(DecodeError::MisplacedPort {
                opcode: Opcode::Ld,
                port: Port::Output,
            })
        );
        let text = "[{\"opcode\":\"SW\",\"addr_type\":2,\"args\":[\"inp\",1]}]";
        assert_eq!(
            decode(text),
            Err(DecodeError::MisplacedPort {
                opcode: Opcode::Sw,
                port: Port::Input,
            })
        );
    }
}
