//! Golden scenarios driving the whole toolchain: assemble source text,
//! round-trip it through the image codec, and run it on the machine.

use sorbet_asm::assemble;
use sorbet_isa::{decode, encode};
use sorbet_machine::{
    simulate, HaltReason, MachineError, DEFAULT_INSTRUCTION_LIMIT,
    DEFAULT_MEMORY_SIZE,
};

/// Assemble and run a program with the default machine parameters.
fn run(source: &str, input: &str) -> sorbet_machine::Outcome {
    let image = assemble(source).expect("scenario source must assemble");
    simulate(
        &image,
        DEFAULT_MEMORY_SIZE,
        DEFAULT_INSTRUCTION_LIMIT,
        input,
    )
    .expect("scenario must run to completion")
}

#[test]
fn hello_prints_a_string_from_data_memory() {
    let source = r#"
        section data:
        msg: "Hi"

        section text:
        start: ADD r2, r0, msg      ; r2 walks the string
        loop:  LD r1, [r2]
               BEQ r1, r0, end      ; stop on the zero cell past the data
               SW out, r1
               ADD r2, r2, 1
               JMP loop
        end:   HLT
    "#;
    let outcome = run(source, "");
    assert_eq!(outcome.output, "Hi");
    assert_eq!(outcome.halt, HaltReason::Halted);
    assert_eq!(outcome.instructions, 13);
    assert_eq!(outcome.ticks, 30);
}

#[test]
fn echo_copies_input_to_output_until_the_nul_sentinel() {
    let source = "
        section text:
        loop: LD r1, inp
              SW out, r1
              BEQ r1, r0, end
              JMP loop
        end:  HLT
    ";
    // The CLI appends the NUL sentinel; at this level it is explicit.
    let outcome = run(source, "ab\0");
    assert_eq!(outcome.output, "ab\0");
    assert_eq!(outcome.output.replace('\0', "\n"), "ab\n");
    assert_eq!(outcome.halt, HaltReason::Halted);
    assert_eq!(outcome.instructions, 11);
    assert_eq!(outcome.ticks, 20);
}

#[test]
fn arithmetic_writes_the_difference_to_the_output_port() {
    let source = "
        section text:
        ADD r1, r0, 7
        ADD r2, r0, 5
        SUB r3, r1, r2
        SW out, r3
        HLT
    ";
    let outcome = run(source, "");
    assert_eq!(outcome.output, "\u{2}");
    assert_eq!(outcome.registers[3], 2);
}

#[test]
fn beq_jumps_on_equal_operands() {
    let source = "
        section text:
        ADD r1, r0, 3
        ADD r2, r0, 3
        BEQ r1, r2, eq
        ADD r4, r0, 1
        eq: HLT
    ";
    let outcome = run(source, "");
    assert_eq!(outcome.registers[4], 0, "the fall-through path must be skipped");
}

#[test]
fn beq_falls_through_on_unequal_operands() {
    let source = "
        section text:
        ADD r1, r0, 3
        ADD r2, r0, 4
        BEQ r1, r2, eq
        ADD r4, r0, 1
        eq: HLT
    ";
    let outcome = run(source, "");
    assert_eq!(outcome.registers[4], 1, "the fall-through path must execute");
}

#[test]
fn bnq_jumps_on_unequal_operands() {
    let source = "
        section text:
        ADD r1, r0, 3
        ADD r2, r0, 4
        BNQ r1, r2, ne
        ADD r4, r0, 1
        ne: HLT
    ";
    let outcome = run(source, "");
    assert_eq!(outcome.registers[4], 0);
}

#[test]
fn blt_is_strictly_less_than() {
    let equal = "
        section text:
        ADD r1, r0, 3
        ADD r2, r0, 3
        BLT r1, r2, lt
        ADD r4, r0, 1
        lt: HLT
    ";
    let outcome = run(equal, "");
    assert_eq!(outcome.registers[4], 1, "equal operands must fall through");

    let less = "
        section text:
        ADD r1, r0, 2
        ADD r2, r0, 3
        BLT r1, r2, lt
        ADD r4, r0, 1
        lt: HLT
    ";
    let outcome = run(less, "");
    assert_eq!(outcome.registers[4], 0, "a smaller left operand must jump");
}

#[test]
fn forward_label_references_resolve_through_jmp() {
    let source = "
        section text:
        JMP skip
        HLT
        skip: ADD r1, r0, 1
        HLT
    ";
    let outcome = run(source, "");
    assert_eq!(outcome.registers[1], 1);
    assert_eq!(outcome.halt, HaltReason::Halted);
}

#[test]
fn an_infinite_loop_trips_the_instruction_limit() {
    let image = assemble("section text: self: JMP self").unwrap();
    assert_eq!(
        simulate(&image, DEFAULT_MEMORY_SIZE, DEFAULT_INSTRUCTION_LIMIT, ""),
        Err(MachineError::LimitExceeded {
            limit: DEFAULT_INSTRUCTION_LIMIT,
        })
    );
}

#[test]
fn the_zero_register_ignores_writes_end_to_end() {
    let source = "
        section text:
        ADD r0, r0, 5
        ADD r1, r0, 0
        HLT
    ";
    let outcome = run(source, "");
    assert_eq!(outcome.registers[0], 0);
    assert_eq!(outcome.registers[1], 0, "r0 must read as zero after a write");
}

#[test]
fn assembled_images_survive_the_image_codec_unchanged() {
    let source = r#"
        section data:
        count: 3
        msg: "ok"

        section text:
        loop: LD r1, inp
              SW out, r1
              LD r2, count
              ADD r2, r2, [r3]
              SUB r2, r2, 1
              SW count, r2
              BNQ r2, r0, loop
              HLT
    "#;
    let direct = assemble(source).unwrap();
    let round_tripped = decode(&encode(&direct).unwrap()).unwrap();
    assert_eq!(round_tripped, direct);
}

#[test]
fn identical_images_and_inputs_produce_identical_outcomes() {
    let source = "
        section text:
        loop: LD r1, inp
              SW out, r1
              BEQ r1, r0, end
              JMP loop
        end:  HLT
    ";
    let image = assemble(source).unwrap();
    let first = simulate(&image, DEFAULT_MEMORY_SIZE, 400, "xyz\0").unwrap();
    let second = simulate(&image, DEFAULT_MEMORY_SIZE, 400, "xyz\0").unwrap();
    assert_eq!(first, second);
    assert_eq!(first.output, "xyz\0");
}
