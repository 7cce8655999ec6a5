use core::fmt;

use sorbet_isa::{AluSrc, Instr, LoadSrc, Opcode, Reg, StoreDst, Word, REG_COUNT};

use crate::{
    datapath::{AluArgSel, AluOp, DataPath, RegWriteSel},
    MachineError,
};

/// Whether the machine should keep executing after an instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Step {
    /// Fetch the next instruction
    Continue,
    /// `HLT` was executed
    Halt,
}

/// How a simulation run came to an end.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HaltReason {
    /// The program executed `HLT`
    Halted,
    /// An input read found the input buffer empty
    InputExhausted,
}

/// Sources that may drive the instruction pointer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum IpSel {
    /// The next sequential address
    Inc,
    /// The immediate staged by the decoder
    Decoder,
}

/// Flag predicate deciding whether a conditional branch is taken.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum BranchCond {
    /// Taken when the zero flag is set
    Eq,
    /// Taken when the zero flag is clear
    Nq,
    /// Taken when the difference is strictly negative
    Lt,
}

/// The control unit: instruction pointer, tick counter, and the per-opcode
/// latch schedules, sequenced over an owned [`DataPath`].
///
/// Each instruction advances the tick counter by one to four ticks
/// depending on its schedule: `JMP` and `LD` take one tick, `SW` two,
/// branches three, and arithmetic four.
pub struct ControlUnit {
    /// The datapath this control unit exclusively drives
    data_path: DataPath,
    /// Instruction pointer; kept wide so a wild jump target is observable
    ip: i64,
    /// Opcode of the most recently decoded instruction, for tracing
    opcode: Option<Opcode>,
    /// Elapsed ticks
    tick: u64,
}

impl ControlUnit {
    /// Wrap a datapath with execution starting at address zero.
    #[must_use]
    pub const fn new(data_path: DataPath) -> Self {
        Self {
            data_path,
            ip: 0,
            opcode: None,
            tick: 0,
        }
    }

    /// Advance the tick counter by one cycle.
    fn tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    /// Elapsed ticks since construction.
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.tick
    }

    /// The instruction pointer.
    #[must_use]
    pub const fn ip(&self) -> i64 {
        self.ip
    }

    /// Shared access to the datapath for inspection.
    #[must_use]
    pub const fn data_path(&self) -> &DataPath {
        &self.data_path
    }

    /// Drive the instruction pointer from the selected source.
    fn latch_ip(&mut self, sel: IpSel) {
        match sel {
            IpSel::Inc => self.ip = self.ip.wrapping_add(1),
            IpSel::Decoder => self.ip = self.data_path.decoder_arg(),
        }
    }

    /// The instruction at the instruction pointer.
    fn fetch(&self) -> Result<Instr, MachineError> {
        let addr = usize::try_from(self.ip)
            .map_err(|_| MachineError::IpOutOfRange { ip: self.ip })?;
        let word = self
            .data_path
            .word(addr)
            .ok_or(MachineError::IpOutOfRange { ip: self.ip })?;
        match word {
            Word::Instr(instr) => Ok(instr),
            Word::Data(_) => Err(MachineError::DataExecution { addr }),
        }
    }

    /// Run one fetch, decode, execute round.
    ///
    /// # Errors
    ///
    /// Returns a [`MachineError`] fault, or the
    /// [`MachineError::InputExhausted`] stall when an input read finds the
    /// buffer empty.
    pub fn decode_and_execute(&mut self) -> Result<Step, MachineError> {
        let instr = self.fetch()?;
        self.opcode = Some(instr.opcode());
        match instr {
            Instr::Hlt => return Ok(Step::Halt),
            Instr::Jmp { target } => {
                self.data_path.latch_decoder_arg(target);
                self.latch_ip(IpSel::Decoder);
                self.tick();
            }
            Instr::Ld { rd, src } => self.execute_load(rd, src)?,
            Instr::Sw { dst, rs } => self.execute_store(dst, rs)?,
            Instr::Beq { a, b, target } => {
                self.execute_branch(BranchCond::Eq, a, b, target)?;
            }
            Instr::Bnq { a, b, target } => {
                self.execute_branch(BranchCond::Nq, a, b, target)?;
            }
            Instr::Blt { a, b, target } => {
                self.execute_branch(BranchCond::Lt, a, b, target)?;
            }
            Instr::Add { rd, ra, rhs } => {
                self.execute_alu(AluOp::Add, rd, ra, rhs)?;
            }
            Instr::Sub { rd, ra, rhs } => {
                self.execute_alu(AluOp::Sub, rd, ra, rhs)?;
            }
            Instr::Mul { rd, ra, rhs } => {
                self.execute_alu(AluOp::Mul, rd, ra, rhs)?;
            }
            Instr::Div { rd, ra, rhs } => {
                self.execute_alu(AluOp::Div, rd, ra, rhs)?;
            }
            Instr::Rem { rd, ra, rhs } => {
                self.execute_alu(AluOp::Rem, rd, ra, rhs)?;
            }
        }
        Ok(Step::Continue)
    }

    /// `LD`: stage the effective address, then latch the register from
    /// memory.  One tick.
    fn execute_load(
        &mut self,
        rd: Reg,
        src: LoadSrc,
    ) -> Result<(), MachineError> {
        self.data_path.sel_reg_to_write(rd);
        match src {
            LoadSrc::Input => {
                self.data_path
                    .latch_addr(self.data_path.input_port() as i64);
                self.data_path.read()?;
            }
            LoadSrc::Indirect(reg) => {
                let addr = self.data_path.register(reg);
                self.data_path.latch_addr(addr);
            }
            LoadSrc::Absolute(addr) => self.data_path.latch_addr(addr),
        }
        self.data_path.latch_reg(RegWriteSel::Mem)?;
        self.latch_ip(IpSel::Inc);
        self.tick();
        Ok(())
    }

    /// `SW`: stage the effective address (one tick), then route the source
    /// register through the ALU into memory (one tick).
    fn execute_store(
        &mut self,
        dst: StoreDst,
        rs: Reg,
    ) -> Result<(), MachineError> {
        self.data_path.sel_reg_to_read(rs);
        match dst {
            StoreDst::Output => {
                self.data_path
                    .latch_addr(self.data_path.output_port() as i64);
            }
            StoreDst::Indirect(reg) => {
                let addr = self.data_path.register(reg);
                self.data_path.latch_addr(addr);
            }
            StoreDst::Absolute(addr) => self.data_path.latch_addr(addr),
        }
        self.tick();
        self.data_path.latch_left_alu_arg(AluArgSel::Reg);
        self.data_path.calculate(AluOp::Mov)?;
        self.data_path.write()?;
        self.latch_ip(IpSel::Inc);
        self.tick();
        Ok(())
    }

    /// Conditional branch: latch both comparison registers (a tick each),
    /// subtract to set the flags, and decide (one tick).
    fn execute_branch(
        &mut self,
        cond: BranchCond,
        a: Reg,
        b: Reg,
        target: i64,
    ) -> Result<(), MachineError> {
        self.data_path.sel_reg_to_read(a);
        self.data_path.latch_left_alu_arg(AluArgSel::Reg);
        self.tick();
        self.data_path.sel_reg_to_read(b);
        self.data_path.latch_right_alu_arg(AluArgSel::Reg);
        self.tick();
        self.data_path.calculate(AluOp::Sub)?;
        let taken = match cond {
            BranchCond::Eq => self.data_path.fl_zero(),
            BranchCond::Nq => !self.data_path.fl_zero(),
            // Strictly less: equal operands must fall through.
            BranchCond::Lt => {
                self.data_path.fl_neg() && !self.data_path.fl_zero()
            }
        };
        if taken {
            self.data_path.latch_decoder_arg(target);
            self.latch_ip(IpSel::Decoder);
        } else {
            self.latch_ip(IpSel::Inc);
        }
        self.tick();
        Ok(())
    }

    /// Arithmetic: latch the left register (tick), the right operand
    /// (tick), compute (tick), and write back (tick).
    fn execute_alu(
        &mut self,
        op: AluOp,
        rd: Reg,
        ra: Reg,
        rhs: AluSrc,
    ) -> Result<(), MachineError> {
        self.data_path.sel_reg_to_read(ra);
        self.data_path.latch_left_alu_arg(AluArgSel::Reg);
        self.tick();
        match rhs {
            AluSrc::Imm(value) => {
                self.data_path.latch_decoder_arg(value);
                self.data_path.latch_right_alu_arg(AluArgSel::Decoder);
            }
            AluSrc::Reg(reg) => {
                self.data_path.sel_reg_to_read(reg);
                self.data_path.latch_right_alu_arg(AluArgSel::Reg);
            }
            // An indirect right operand has no latch schedule; the previous
            // right latch value is reused.
            AluSrc::Indirect(_) => {}
        }
        self.tick();
        self.data_path.calculate(op)?;
        self.tick();
        self.data_path.sel_reg_to_write(rd);
        self.data_path.latch_reg(RegWriteSel::Alu)?;
        self.latch_ip(IpSel::Inc);
        self.tick();
        Ok(())
    }
}

impl fmt::Display for ControlUnit {
    /// One-line machine-state trace: tick, instruction pointer, opcode,
    /// address register, ALU output, `r1..r8`, and the flags.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opcode = self.opcode.map_or("---", Opcode::mnemonic);
        write!(
            f,
            "tick: {:4} | ip: {:3} | opcode: {:4} | addr: {:3} | alu: {:6}",
            self.tick,
            self.ip,
            opcode,
            self.data_path.addr_reg(),
            self.data_path.alu_out(),
        )?;
        let registers = self.data_path.registers();
        for (index, value) in registers.iter().enumerate().skip(1) {
            write!(f, " | r{index}: {value}")?;
        }
        write!(
            f,
            " | z: {} | n: {}",
            u8::from(self.data_path.fl_zero()),
            u8::from(self.data_path.fl_neg()),
        )
    }
}

/// The observable result of a completed simulation run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Outcome {
    /// Characters emitted through the output port, in order
    pub output: String,
    /// Total elapsed ticks
    pub ticks: u64,
    /// Number of executed instructions
    pub instructions: u64,
    /// Why the run stopped
    pub halt: HaltReason,
    /// The final register file
    pub registers: [i64; REG_COUNT],
}

/// Run a memory image to completion.
///
/// Executes fetch/decode/execute rounds until the program halts, an input
/// read stalls on an empty buffer (a graceful stop), or `limit`
/// instructions have executed.  The per-instruction machine-state trace is
/// emitted at debug level; port activity at info level.
///
/// # Errors
///
/// Returns [`MachineError::LimitExceeded`] when the instruction budget runs
/// out, a construction error for unusable memory sizes or oversized images,
/// and any datapath fault raised during execution.
pub fn simulate(
    image: &[Word],
    memory_size: usize,
    limit: u64,
    input: &str,
) -> Result<Outcome, MachineError> {
    let data_path = DataPath::new(image, memory_size, input)?;
    let mut control = ControlUnit::new(data_path);
    let mut executed: u64 = 0;
    let halt = loop {
        if executed >= limit {
            return Err(MachineError::LimitExceeded { limit });
        }
        match control.decode_and_execute() {
            Ok(Step::Continue) => {
                executed = executed.wrapping_add(1);
                log::debug!("{control}");
            }
            Ok(Step::Halt) => break HaltReason::Halted,
            Err(MachineError::InputExhausted) => {
                log::warn!("input buffer is empty");
                break HaltReason::InputExhausted;
            }
            Err(fault) => return Err(fault),
        }
    };
    let outcome = Outcome {
        output: control.data_path().output().to_string(),
        ticks: control.current_tick(),
        instructions: executed,
        halt,
        registers: control.data_path().registers(),
    };
    log::info!(
        "halted after {} instructions and {} ticks, output: {:?}",
        outcome.instructions,
        outcome.ticks,
        outcome.output,
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use sorbet_isa::{AluSrc, Instr, LoadSrc, StoreDst};

    use super::*;

    fn reg(index: u8) -> Reg {
        Reg::new(index).unwrap()
    }

    fn unit(image: &[Word], input: &str) -> ControlUnit {
        ControlUnit::new(DataPath::new(image, 32, input).unwrap())
    }

    #[test]
    fn jmp_takes_one_tick_and_replaces_ip() {
        let image = [
            Word::Instr(Instr::Jmp { target: 2 }),
            Word::Instr(Instr::Hlt),
            Word::Instr(Instr::Hlt),
        ];
        let mut cu = unit(&image, "");
        assert_eq!(cu.decode_and_execute(), Ok(Step::Continue));
        assert_eq!(cu.ip(), 2);
        assert_eq!(cu.current_tick(), 1);
    }

    #[test]
    fn ld_takes_one_tick_and_loads_the_addressed_datum() {
        let image = [
            Word::Instr(Instr::Ld {
                rd: reg(1),
                src: LoadSrc::Absolute(2),
            }),
            Word::Instr(Instr::Hlt),
            Word::Data(99),
        ];
        let mut cu = unit(&image, "");
        assert_eq!(cu.decode_and_execute(), Ok(Step::Continue));
        assert_eq!(cu.data_path().register(reg(1)), 99);
        assert_eq!(cu.ip(), 1);
        assert_eq!(cu.current_tick(), 1);
    }

    #[test]
    fn sw_takes_two_ticks_and_stores_through_the_alu() {
        let image = [
            Word::Instr(Instr::Add {
                rd: reg(1),
                ra: Reg::R0,
                rhs: AluSrc::Imm(7),
            }),
            Word::Instr(Instr::Sw {
                dst: StoreDst::Absolute(4),
                rs: reg(1),
            }),
            Word::Instr(Instr::Hlt),
        ];
        let mut cu = unit(&image, "");
        assert_eq!(cu.decode_and_execute(), Ok(Step::Continue));
        assert_eq!(cu.current_tick(), 4);
        assert_eq!(cu.decode_and_execute(), Ok(Step::Continue));
        assert_eq!(cu.current_tick(), 6);
        assert_eq!(cu.data_path().word(4), Some(Word::Data(7)));
    }

    #[test]
    fn branches_take_three_ticks() {
        let image = [
            Word::Instr(Instr::Beq {
                a: Reg::R0,
                b: Reg::R0,
                target: 2,
            }),
            Word::Instr(Instr::Hlt),
            Word::Instr(Instr::Hlt),
        ];
        let mut cu = unit(&image, "");
        assert_eq!(cu.decode_and_execute(), Ok(Step::Continue));
        assert_eq!(cu.current_tick(), 3);
        assert_eq!(cu.ip(), 2);
    }

    #[test]
    fn arithmetic_takes_four_ticks() {
        let image = [
            Word::Instr(Instr::Add {
                rd: reg(1),
                ra: Reg::R0,
                rhs: AluSrc::Imm(5),
            }),
            Word::Instr(Instr::Hlt),
        ];
        let mut cu = unit(&image, "");
        assert_eq!(cu.decode_and_execute(), Ok(Step::Continue));
        assert_eq!(cu.current_tick(), 4);
        assert_eq!(cu.data_path().register(reg(1)), 5);
    }

    #[test]
    fn hlt_reports_halt_without_ticking() {
        let image = [Word::Instr(Instr::Hlt)];
        let mut cu = unit(&image, "");
        assert_eq!(cu.decode_and_execute(), Ok(Step::Halt));
        assert_eq!(cu.current_tick(), 0);
    }

    #[test]
    fn an_indirect_alu_operand_reuses_the_previous_right_latch() {
        let image = [
            Word::Instr(Instr::Add {
                rd: reg(1),
                ra: Reg::R0,
                rhs: AluSrc::Imm(3),
            }),
            Word::Instr(Instr::Add {
                rd: reg(2),
                ra: Reg::R0,
                rhs: AluSrc::Indirect(reg(4)),
            }),
            Word::Instr(Instr::Hlt),
        ];
        let mut cu = unit(&image, "");
        cu.decode_and_execute().unwrap();
        cu.decode_and_execute().unwrap();
        // The right latch still holds 3 from the first instruction.
        assert_eq!(cu.data_path().register(reg(2)), 3);
    }

    #[test]
    fn executing_a_data_word_faults() {
        let image = [Word::Data(1)];
        let mut cu = unit(&image, "");
        assert_eq!(
            cu.decode_and_execute(),
            Err(MachineError::DataExecution { addr: 0 })
        );
    }

    #[test]
    fn a_wild_jump_target_faults_on_the_next_fetch() {
        let image = [Word::Instr(Instr::Jmp { target: -3 })];
        let mut cu = unit(&image, "");
        assert_eq!(cu.decode_and_execute(), Ok(Step::Continue));
        assert_eq!(
            cu.decode_and_execute(),
            Err(MachineError::IpOutOfRange { ip: -3 })
        );
    }

    #[test]
    fn simulate_enforces_the_instruction_limit() {
        let image = [Word::Instr(Instr::Jmp { target: 0 })];
        assert_eq!(
            simulate(&image, 32, 5, ""),
            Err(MachineError::LimitExceeded { limit: 5 })
        );
    }

    #[test]
    fn simulate_stops_gracefully_on_input_exhaustion() {
        let image = [
            Word::Instr(Instr::Ld {
                rd: reg(1),
                src: LoadSrc::Input,
            }),
            Word::Instr(Instr::Jmp { target: 0 }),
        ];
        let outcome = simulate(&image, 32, 100, "a").unwrap();
        assert_eq!(outcome.halt, HaltReason::InputExhausted);
        assert_eq!(outcome.registers[1], 97);
        assert_eq!(outcome.output, "");
    }

    #[test]
    fn io_is_conserved_one_character_per_port_access() {
        let source = "section text:
                      loop: LD r1, inp
                      SW out, r1
                      BEQ r1, r0, end
                      JMP loop
                      end: HLT";
        let image = sorbet_asm::assemble(source).unwrap();
        let data_path = DataPath::new(&image, 32, "ab\0").unwrap();
        let mut cu = ControlUnit::new(data_path);
        let mut loads = 0_usize;
        let mut stores = 0_usize;
        loop {
            let before = cu.data_path().input_remaining();
            match cu.decode_and_execute().unwrap() {
                Step::Halt => break,
                Step::Continue => {}
            }
            let after = cu.data_path().input_remaining();
            loads += before - after;
            stores = cu.data_path().output().chars().count();
        }
        assert_eq!(loads, 3, "one pop per LD from the input port");
        assert_eq!(stores, 3, "one character per SW to the output port");
        assert_eq!(cu.data_path().output(), "ab\0");
        assert_eq!(cu.data_path().input_remaining(), 0);
    }
}
