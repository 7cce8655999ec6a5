//! # Sorbet-Machine
//!
//! A cycle-accurate simulator for the sorbet register machine: nine integer
//! registers with a hard-wired zero register, a unified code+data memory,
//! zero and negative flags, and two memory-mapped I/O ports occupying the
//! top of memory.
//!
//! The machine is split the way the hardware would be:
//!
//!  * [`DataPath`] owns memory, the register file, the ALU latches and
//!    flags, and the I/O buffers.  It exposes one method per latch signal.
//!  * [`ControlUnit`] owns the datapath plus the instruction pointer and
//!    tick counter, and sequences the per-opcode latch schedules.
//!  * [`simulate`] drives fetch/decode/execute rounds until the program
//!    halts, input runs dry, or the instruction budget is exhausted.
//!
//! ```rust
//! use sorbet_isa::{Instr, Word, AluSrc, Reg};
//! use sorbet_machine::{simulate, HaltReason};
//!
//! let r1 = Reg::new(1).unwrap();
//! let image = vec![
//!     Word::Instr(Instr::Add { rd: r1, ra: Reg::R0, rhs: AluSrc::Imm(7) }),
//!     Word::Instr(Instr::Hlt),
//! ];
//! let outcome = simulate(&image, 250, 400, "").unwrap();
//! assert_eq!(outcome.halt, HaltReason::Halted);
//! assert_eq!(outcome.registers[1], 7);
//! ```
//!
//! Execution is deterministic: identical images and inputs produce
//! identical outputs, tick counts, and final register files.

// Make clippy as annoying as possible
#![deny(
    // All typically enabled warnings are converted into errors
    // includes correctness, suspicious, style, complexity, and perf
    clippy::all,
    // Error on cargo lints
    clippy::cargo,
)]
#![warn(
    // Warn on pedantic and in-development nursery lints
    clippy::pedantic,
    clippy::nursery,
    // Lints from "restriction" group - enforce a consistent if arbitrary style
    clippy::alloc_instead_of_core,
    clippy::arithmetic_side_effects,
    clippy::unnecessary_cast,
    clippy::as_underscore,
    clippy::assertions_on_result_states,
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::decimal_literal_representation,
    clippy::default_numeric_fallback,
    clippy::deref_by_slicing,
    clippy::empty_drop,
    clippy::empty_structs_with_brackets,
    clippy::exit,
    clippy::expect_used,
    clippy::format_push_string,
    clippy::get_unwrap,
    clippy::if_then_some_else_none,
    clippy::indexing_slicing,
    clippy::let_underscore_must_use,
    clippy::map_err_ignore,
    clippy::mem_forget,
    clippy::missing_docs_in_private_items,
    clippy::mixed_read_write_in_expression,
    clippy::mod_module_files,
    clippy::multiple_inherent_impl,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::partial_pub_fields,
    clippy::pattern_type_mismatch,
    clippy::print_stderr,
    clippy::print_stdout,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_name_method,
    clippy::unseparated_literal_suffix,
    clippy::shadow_unrelated,
    clippy::std_instead_of_core,
    clippy::str_to_string,
    clippy::string_slice,
    clippy::string_to_string,
    clippy::todo,
    clippy::try_err,
    clippy::unimplemented,
    clippy::unnecessary_self_imports,
    clippy::unneeded_field_pattern,
    clippy::unreachable,
    clippy::unwrap_in_result,
    clippy::unwrap_used,
    clippy::use_debug,
    clippy::verbose_file_reads,
)]

/// Memory size used by the toolchain unless overridden, in words.  The top
/// two addresses are the input and output ports.
pub const DEFAULT_MEMORY_SIZE: usize = 250;

/// Instruction budget used by the toolchain unless overridden.
pub const DEFAULT_INSTRUCTION_LIMIT: u64 = 400;

/// Fault and stall conditions of the machine
mod error;
pub use error::MachineError;

/// The datapath: memory, register file, ALU, flags, and I/O buffers
mod datapath;
pub use datapath::{AluArgSel, AluOp, DataPath, RegWriteSel};

/// The control unit and the simulation driver
mod control;
pub use control::{simulate, ControlUnit, HaltReason, Outcome, Step};
