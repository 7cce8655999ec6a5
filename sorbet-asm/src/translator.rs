use core::fmt;
use std::collections::HashMap;

use nom::combinator::all_consuming;
use sorbet_isa::{
    AddrMode, AluSrc, Instr, LoadSrc, Opcode, Reg, StoreDst, Word,
};

use crate::atoms;

/// Marker opening the data section.
const DATA_MARKER: &str = "section data:";
/// Marker opening the text section.
const TEXT_MARKER: &str = "section text:";

/// Why a source program could not be assembled.
///
/// Assembly is all-or-nothing: any of these aborts translation and no
/// partial image is produced.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AsmError {
    /// A token in the text section is not a known mnemonic
    UnknownInstruction(String),

    /// An operand token whose shape does not fit its position
    MalformedOperand {
        /// The instruction being decoded
        opcode: Opcode,
        /// The rendered offending operand
        operand: String,
    },

    /// The token stream ended while an instruction still expected operands
    MissingOperand(Opcode),

    /// A symbolic operand with no matching label definition
    UnresolvedLabel(String),

    /// A register operand beyond `r8`
    RegisterRange(String),

    /// A data-section token that is neither a label nor an integer
    BadDataLiteral(String),

    /// The program has no `section text:` marker
    MissingTextSection,
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UnknownInstruction(ref token) => {
                write!(f, "unknown instruction: {token}")
            }
            Self::MalformedOperand {
                opcode,
                ref operand,
            } => {
                write!(f, "malformed operand `{operand}` for {opcode}")
            }
            Self::MissingOperand(opcode) => {
                write!(f, "missing operand for {opcode}")
            }
            Self::UnresolvedLabel(ref name) => {
                write!(f, "unresolved label: {name}")
            }
            Self::RegisterRange(ref token) => {
                write!(f, "register `{token}` is out of range (r0..r8)")
            }
            Self::BadDataLiteral(ref token) => {
                write!(f, "data item `{token}` is not an integer literal")
            }
            Self::MissingTextSection => {
                write!(f, "program has no `{TEXT_MARKER}` marker")
            }
        }
    }
}

impl std::error::Error for AsmError {}

/// A lexed item of a section: a label definition or a raw token.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Token {
    /// `name:` with the colon stripped
    LabelDef(String),
    /// A mnemonic, operand, or data literal
    Raw(String),
}

/// A classified operand token, possibly still referencing a label.
#[derive(Clone, Debug, Eq, PartialEq)]
enum SymOperand {
    /// A bare register, `rN`
    Reg(Reg),
    /// A bracketed register, `[rN]`
    Indirect(Reg),
    /// An integer literal or an already-resolved label
    Int(i64),
    /// A symbolic reference awaiting resolution
    Label(String),
    /// The `inp` input-port sentinel
    Input,
    /// The `out` output-port sentinel
    Output,
}

impl SymOperand {
    /// The addressing mode this operand shape encodes as.
    const fn addr_mode(&self) -> AddrMode {
        match *self {
            Self::Reg(_) => AddrMode::RegDirect,
            Self::Indirect(_) => AddrMode::RegIndirect,
            Self::Int(_) | Self::Label(_) | Self::Input | Self::Output => {
                AddrMode::Immediate
            }
        }
    }
}

impl fmt::Display for SymOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Reg(reg) => write!(f, "{reg}"),
            Self::Indirect(reg) => write!(f, "[{reg}]"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Label(ref name) => write!(f, "{name}"),
            Self::Input => write!(f, "inp"),
            Self::Output => write!(f, "out"),
        }
    }
}

/// An instruction before label resolution and lowering.
#[derive(Clone, Debug, Eq, PartialEq)]
struct SymInstr {
    /// Executable opcode
    opcode: Opcode,
    /// Addressing mode of the flexible operand, where the opcode has one
    addr_mode: Option<AddrMode>,
    /// Operand cells in instruction order
    args: Vec<SymOperand>,
}

/// The collected output of the first pass over both sections.
struct FirstPass {
    /// Data-section integer literals in source order
    data: Vec<i64>,
    /// Label name to index within the data section
    data_labels: HashMap<String, usize>,
    /// Symbolic instructions in source order
    code: Vec<SymInstr>,
    /// Label name to index within the code section
    code_labels: HashMap<String, usize>,
}

/// Translate assembly source into a memory image.
///
/// The image is the code section in source order followed by the data
/// section wrapped in data words; indices into it are absolute addresses.
///
/// # Errors
///
/// Returns an [`AsmError`] for unknown mnemonics, malformed or missing
/// operands, unresolved labels, out-of-range registers, non-integer data
/// items, or a missing text section.
pub fn assemble(source: &str) -> Result<Vec<Word>, AsmError> {
    let text = normalize(source);
    let text = expand_string_literals(&text);
    let (data_tokens, text_tokens) = tokenize_sections(&text)?;
    let mut pass = first_pass(&data_tokens, &text_tokens)?;
    resolve_labels(&mut pass.code, &pass.code_labels, &pass.data_labels);
    layout(pass.code, pass.data)
}

/// Stage 1: strip `;` comments, collapse whitespace runs, and join lines
/// into a single stream.
fn normalize(source: &str) -> String {
    source
        .lines()
        .map(|line| line.split(';').next().unwrap_or("").trim())
        .collect::<Vec<&str>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
}

/// Stage 2: replace every character inside `"..."` with its code point
/// followed by a comma, dropping the quotes themselves.
fn expand_string_literals(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_quotes = false;
    for ch in text.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if in_quotes {
            result.push_str(&u32::from(ch).to_string());
            result.push(',');
        } else {
            result.push(ch);
        }
    }
    result
}

/// Stage 3: locate the section markers and split their bodies into tokens.
///
/// The data section is optional and precedes the text section.
fn tokenize_sections(
    text: &str,
) -> Result<(Vec<Token>, Vec<Token>), AsmError> {
    let text_start =
        text.find(TEXT_MARKER).ok_or(AsmError::MissingTextSection)?;
    let data_tokens = text
        .find(DATA_MARKER)
        .filter(|&data_start| data_start < text_start)
        .map_or_else(Vec::new, |data_start| {
            tokenize(&text[data_start + DATA_MARKER.len()..text_start])
        });
    let text_tokens = tokenize(&text[text_start + TEXT_MARKER.len()..]);
    Ok((data_tokens, text_tokens))
}

/// Split a section body on commas and spaces, tagging label definitions.
fn tokenize(section: &str) -> Vec<Token> {
    section
        .split([',', ' '])
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.strip_suffix(':').map_or_else(
                || Token::Raw(token.to_string()),
                |label| Token::LabelDef(label.to_string()),
            )
        })
        .collect()
}

/// Stage 4: collect labels from both sections, data literals from the data
/// section, and symbolic instructions from the text section.
fn first_pass(
    data_tokens: &[Token],
    text_tokens: &[Token],
) -> Result<FirstPass, AsmError> {
    let mut data = Vec::new();
    let mut data_labels = HashMap::new();
    for token in data_tokens {
        match *token {
            Token::LabelDef(ref name) => {
                data_labels.insert(name.clone(), data.len());
            }
            Token::Raw(ref literal) => {
                let (_, value) = all_consuming(atoms::number)(literal)
                    .map_err(|_| {
                        AsmError::BadDataLiteral(literal.clone())
                    })?;
                data.push(value);
            }
        }
    }

    let mut code = Vec::new();
    let mut code_labels = HashMap::new();
    let mut tokens = text_tokens.iter();
    while let Some(token) = tokens.next() {
        match *token {
            Token::LabelDef(ref name) => {
                code_labels.insert(name.clone(), code.len());
            }
            Token::Raw(ref mnemonic) => {
                code.push(decode_instruction(mnemonic, &mut tokens)?);
            }
        }
    }

    Ok(FirstPass {
        data,
        data_labels,
        code,
        code_labels,
    })
}

/// Decode one instruction, consuming its operand tokens from the stream.
fn decode_instruction<'t>(
    mnemonic: &str,
    tokens: &mut impl Iterator<Item = &'t Token>,
) -> Result<SymInstr, AsmError> {
    let (_, opcode) = all_consuming(atoms::mnemonic)(mnemonic)
        .map_err(|_| AsmError::UnknownInstruction(mnemonic.to_string()))?;
    match opcode {
        Opcode::Hlt => Ok(SymInstr {
            opcode,
            addr_mode: None,
            args: vec![],
        }),
        Opcode::Jmp => {
            let target = operand(opcode, tokens)?;
            Ok(SymInstr {
                opcode,
                addr_mode: None,
                args: vec![target],
            })
        }
        Opcode::Ld => {
            let rd = operand(opcode, tokens)?;
            let src = operand(opcode, tokens)?;
            // A register-direct source also addresses memory through the
            // register's value, so it folds into the indirect mode.
            let mode = match src.addr_mode() {
                AddrMode::RegDirect => AddrMode::RegIndirect,
                mode => mode,
            };
            Ok(SymInstr {
                opcode,
                addr_mode: Some(mode),
                args: vec![rd, src],
            })
        }
        Opcode::Sw => {
            let dst = operand(opcode, tokens)?;
            let rs = operand(opcode, tokens)?;
            let mode = match dst.addr_mode() {
                AddrMode::RegDirect => AddrMode::RegIndirect,
                mode => mode,
            };
            Ok(SymInstr {
                opcode,
                addr_mode: Some(mode),
                args: vec![dst, rs],
            })
        }
        Opcode::Beq | Opcode::Bnq | Opcode::Blt => {
            let a = operand(opcode, tokens)?;
            let b = operand(opcode, tokens)?;
            let target = operand(opcode, tokens)?;
            Ok(SymInstr {
                opcode,
                addr_mode: None,
                args: vec![a, b, target],
            })
        }
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Rem => {
            let rd = operand(opcode, tokens)?;
            let ra = operand(opcode, tokens)?;
            let rhs = operand(opcode, tokens)?;
            let mode = rhs.addr_mode();
            Ok(SymInstr {
                opcode,
                addr_mode: Some(mode),
                args: vec![rd, ra, rhs],
            })
        }
        // The mnemonic parser never yields DATA; a literal `DATA` token in
        // the text section is an unknown instruction.
        Opcode::Data => {
            Err(AsmError::UnknownInstruction(mnemonic.to_string()))
        }
    }
}

/// The next operand token, classified.
fn operand<'t>(
    opcode: Opcode,
    tokens: &mut impl Iterator<Item = &'t Token>,
) -> Result<SymOperand, AsmError> {
    match tokens.next() {
        Some(&Token::Raw(ref token)) => classify(token),
        Some(&Token::LabelDef(_)) | None => {
            Err(AsmError::MissingOperand(opcode))
        }
    }
}

/// Classify a single operand token by shape.
///
/// `r<digit>` is register-direct, `[r<digit>]` register-indirect, a signed
/// integer is an immediate, `inp`/`out` are the port sentinels, and
/// anything else is a label reference.
fn classify(token: &str) -> Result<SymOperand, AsmError> {
    if let Ok((_, index)) = all_consuming(atoms::register_index)(token) {
        return Reg::new(index)
            .map(SymOperand::Reg)
            .ok_or_else(|| AsmError::RegisterRange(token.to_string()));
    }
    if let Ok((_, index)) = all_consuming(atoms::indirect_index)(token) {
        return Reg::new(index)
            .map(SymOperand::Indirect)
            .ok_or_else(|| AsmError::RegisterRange(token.to_string()));
    }
    if let Ok((_, value)) = all_consuming(atoms::number)(token) {
        return Ok(SymOperand::Int(value));
    }
    Ok(match token {
        "inp" => SymOperand::Input,
        "out" => SymOperand::Output,
        _ => SymOperand::Label(token.to_string()),
    })
}

/// Stage 5: replace label references with absolute image addresses.
///
/// Data labels are looked up first and resolve past the end of the code
/// section; a name defined in both sections addresses the datum.
fn resolve_labels(
    code: &mut [SymInstr],
    code_labels: &HashMap<String, usize>,
    data_labels: &HashMap<String, usize>,
) {
    let code_len = code.len();
    for instr in code.iter_mut() {
        for arg in &mut instr.args {
            if let SymOperand::Label(ref name) = *arg {
                let resolved = data_labels
                    .get(name)
                    .map(|&offset| code_len + offset)
                    .or_else(|| code_labels.get(name).copied());
                if let Some(target) = resolved {
                    *arg = SymOperand::Int(target as i64);
                }
            }
        }
    }
}

/// Stage 6: lay out code then data, lowering every symbolic instruction to
/// its final typed form.
fn layout(
    code: Vec<SymInstr>,
    data: Vec<i64>,
) -> Result<Vec<Word>, AsmError> {
    let mut image = Vec::with_capacity(code.len() + data.len());
    for sym in code {
        image.push(Word::Instr(lower(sym)?));
    }
    image.extend(data.into_iter().map(Word::Data));
    Ok(image)
}

/// Lower one symbolic instruction, validating operand shapes.
fn lower(sym: SymInstr) -> Result<Instr, AsmError> {
    let SymInstr {
        opcode,
        addr_mode,
        args,
    } = sym;
    match (opcode, args.as_slice()) {
        (Opcode::Hlt, []) => Ok(Instr::Hlt),
        (Opcode::Jmp, [target]) => Ok(Instr::Jmp {
            target: address(opcode, target)?,
        }),
        (Opcode::Ld, [rd, src]) => Ok(Instr::Ld {
            rd: register(opcode, rd)?,
            src: load_src(opcode, addr_mode, src)?,
        }),
        (Opcode::Sw, [dst, rs]) => Ok(Instr::Sw {
            dst: store_dst(opcode, addr_mode, dst)?,
            rs: register(opcode, rs)?,
        }),
        (Opcode::Beq, [a, b, target]) => Ok(Instr::Beq {
            a: register(opcode, a)?,
            b: register(opcode, b)?,
            target: address(opcode, target)?,
        }),
        (Opcode::Bnq, [a, b, target]) => Ok(Instr::Bnq {
            a: register(opcode, a)?,
            b: register(opcode, b)?,
            target: address(opcode, target)?,
        }),
        (Opcode::Blt, [a, b, target]) => Ok(Instr::Blt {
            a: register(opcode, a)?,
            b: register(opcode, b)?,
            target: address(opcode, target)?,
        }),
        (Opcode::Add, [rd, ra, rhs]) => Ok(Instr::Add {
            rd: register(opcode, rd)?,
            ra: register(opcode, ra)?,
            rhs: alu_src(opcode, addr_mode, rhs)?,
        }),
        (Opcode::Sub, [rd, ra, rhs]) => Ok(Instr::Sub {
            rd: register(opcode, rd)?,
            ra: register(opcode, ra)?,
            rhs: alu_src(opcode, addr_mode, rhs)?,
        }),
        (Opcode::Mul, [rd, ra, rhs]) => Ok(Instr::Mul {
            rd: register(opcode, rd)?,
            ra: register(opcode, ra)?,
            rhs: alu_src(opcode, addr_mode, rhs)?,
        }),
        (Opcode::Div, [rd, ra, rhs]) => Ok(Instr::Div {
            rd: register(opcode, rd)?,
            ra: register(opcode, ra)?,
            rhs: alu_src(opcode, addr_mode, rhs)?,
        }),
        (Opcode::Rem, [rd, ra, rhs]) => Ok(Instr::Rem {
            rd: register(opcode, rd)?,
            ra: register(opcode, ra)?,
            rhs: alu_src(opcode, addr_mode, rhs)?,
        }),
        _ => Err(AsmError::MissingOperand(opcode)),
    }
}

/// A register operand in a register-only position.
fn register(opcode: Opcode, operand: &SymOperand) -> Result<Reg, AsmError> {
    match *operand {
        SymOperand::Reg(reg) => Ok(reg),
        ref other => Err(AsmError::MalformedOperand {
            opcode,
            operand: other.to_string(),
        }),
    }
}

/// A resolved absolute address in a target position.
fn address(opcode: Opcode, operand: &SymOperand) -> Result<i64, AsmError> {
    match *operand {
        SymOperand::Int(value) => Ok(value),
        SymOperand::Label(ref name) => {
            Err(AsmError::UnresolvedLabel(name.clone()))
        }
        ref other => Err(AsmError::MalformedOperand {
            opcode,
            operand: other.to_string(),
        }),
    }
}

/// The flexible source of an `LD`, checked against its addressing mode.
fn load_src(
    opcode: Opcode,
    addr_mode: Option<AddrMode>,
    operand: &SymOperand,
) -> Result<LoadSrc, AsmError> {
    match (addr_mode, operand) {
        (_, &SymOperand::Input) => Ok(LoadSrc::Input),
        (
            Some(AddrMode::RegIndirect),
            &(SymOperand::Reg(reg) | SymOperand::Indirect(reg)),
        ) => Ok(LoadSrc::Indirect(reg)),
        (Some(AddrMode::Immediate), &SymOperand::Int(addr)) => {
            Ok(LoadSrc::Absolute(addr))
        }
        (_, &SymOperand::Label(ref name)) => {
            Err(AsmError::UnresolvedLabel(name.clone()))
        }
        (_, other) => Err(AsmError::MalformedOperand {
            opcode,
            operand: other.to_string(),
        }),
    }
}

/// The flexible destination of an `SW`, checked against its addressing mode.
fn store_dst(
    opcode: Opcode,
    addr_mode: Option<AddrMode>,
    operand: &SymOperand,
) -> Result<StoreDst, AsmError> {
    match (addr_mode, operand) {
        (_, &SymOperand::Output) => Ok(StoreDst::Output),
        (
            Some(AddrMode::RegIndirect),
            &(SymOperand::Reg(reg) | SymOperand::Indirect(reg)),
        ) => Ok(StoreDst::Indirect(reg)),
        (Some(AddrMode::Immediate), &SymOperand::Int(addr)) => {
            Ok(StoreDst::Absolute(addr))
        }
        (_, &SymOperand::Label(ref name)) => {
            Err(AsmError::UnresolvedLabel(name.clone()))
        }
        (_, other) => Err(AsmError::MalformedOperand {
            opcode,
            operand: other.to_string(),
        }),
    }
}

/// The flexible right operand of an arithmetic instruction.
fn alu_src(
    opcode: Opcode,
    addr_mode: Option<AddrMode>,
    operand: &SymOperand,
) -> Result<AluSrc, AsmError> {
    match (addr_mode, operand) {
        (Some(AddrMode::RegDirect), &SymOperand::Reg(reg)) => {
            Ok(AluSrc::Reg(reg))
        }
        (Some(AddrMode::RegIndirect), &SymOperand::Indirect(reg)) => {
            Ok(AluSrc::Indirect(reg))
        }
        (Some(AddrMode::Immediate), &SymOperand::Int(value)) => {
            Ok(AluSrc::Imm(value))
        }
        (_, &SymOperand::Label(ref name)) => {
            Err(AsmError::UnresolvedLabel(name.clone()))
        }
        (_, other) => Err(AsmError::MalformedOperand {
            opcode,
            operand: other.to_string(),
        }),
    }
}
