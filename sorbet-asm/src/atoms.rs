use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case},
    character::complete::{i64, satisfy},
    combinator::map,
    error::VerboseError,
    sequence::{delimited, preceded},
    IResult,
};
use sorbet_isa::Opcode;

/// Consumes exactly one executable mnemonic and returns the enum.
///
/// `DATA` is not included: data words are written as literals in the data
/// section, never as a mnemonic.
pub fn mnemonic(input: &str) -> IResult<&str, Opcode, VerboseError<&str>> {
    alt((
        map(tag_no_case("HLT"), |_| Opcode::Hlt),
        map(tag_no_case("JMP"), |_| Opcode::Jmp),
        map(tag_no_case("LD"), |_| Opcode::Ld),
        map(tag_no_case("SW"), |_| Opcode::Sw),
        map(tag_no_case("BEQ"), |_| Opcode::Beq),
        map(tag_no_case("BNQ"), |_| Opcode::Bnq),
        map(tag_no_case("BLT"), |_| Opcode::Blt),
        map(tag_no_case("ADD"), |_| Opcode::Add),
        map(tag_no_case("SUB"), |_| Opcode::Sub),
        map(tag_no_case("MUL"), |_| Opcode::Mul),
        map(tag_no_case("DIV"), |_| Opcode::Div),
        map(tag_no_case("REM"), |_| Opcode::Rem),
    ))(input)
}

/// Parses a register operand of the form `r<digit>` and returns the raw
/// index.  Range validation is left to the caller so that `r9` can be
/// reported as an out-of-range register rather than an unknown token.
pub fn register_index(input: &str) -> IResult<&str, u8, VerboseError<&str>> {
    map(
        preceded(tag("r"), satisfy(|c| c.is_ascii_digit())),
        |digit| (digit as u8).wrapping_sub(b'0'),
    )(input)
}

/// Parses a register-indirect operand of the form `[r<digit>]`.
pub fn indirect_index(input: &str) -> IResult<&str, u8, VerboseError<&str>> {
    delimited(tag("["), register_index, tag("]"))(input)
}

/// Parses a signed integer literal.
pub fn number(input: &str) -> IResult<&str, i64, VerboseError<&str>> {
    i64(input)
}
