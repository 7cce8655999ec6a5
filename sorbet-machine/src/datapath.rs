use std::collections::VecDeque;

use num_integer::Integer;
use sorbet_isa::{Reg, Word, REG_COUNT};

use crate::MachineError;

/// Sources that may drive an ALU input latch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AluArgSel {
    /// The immediate staged by the control unit
    Decoder,
    /// The currently selected read register
    Reg,
    /// The address register
    Addr,
}

/// Sources that may drive a register-file write.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegWriteSel {
    /// The ALU output
    Alu,
    /// The data word at the address register
    Mem,
}

/// Operations of the arithmetic-logic unit.
///
/// Division and remainder round toward negative infinity.  `Mov` passes the
/// left operand through; `Cmp` computes the difference so that only the
/// flags are meaningful.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AluOp {
    /// Left plus right
    Add,
    /// Left minus right
    Sub,
    /// Left times right
    Mul,
    /// Floor quotient of left and right
    Div,
    /// Floor remainder of left and right
    Rem,
    /// Left operand unchanged
    Mov,
    /// Difference of the operands, computed for its flags
    Cmp,
}

/// The machine's datapath: unified memory, register file, ALU latches and
/// flags, and the memory-mapped I/O buffers.
///
/// Each public method corresponds to one latch or select signal the control
/// unit may assert.  The datapath maintains two invariants on behalf of the
/// whole machine: the address register always holds a value inside memory,
/// and `r0` reads as zero at every latch boundary.
#[derive(Debug)]
pub struct DataPath {
    /// Number of memory words, including the two reserved ports
    memory_size: usize,
    /// Unified code and data memory
    memory: Vec<Word>,
    /// Staging register for the next memory access
    addr_reg: usize,
    /// Address of the memory-mapped input port, `memory_size - 2`
    input_addr: usize,
    /// Address of the memory-mapped output port, `memory_size - 1`
    output_addr: usize,
    /// The register file, `r0` hard-wired to zero
    reg_file: [i64; REG_COUNT],
    /// Register selected for the next read
    reg_to_read: Reg,
    /// Register selected for the next write
    reg_to_write: Reg,
    /// Zero flag of the last ALU computation
    fl_zero: bool,
    /// Negative flag of the last ALU computation
    fl_neg: bool,
    /// Left ALU input latch
    left_alu_arg: i64,
    /// Right ALU input latch
    right_alu_arg: i64,
    /// Output latch of the ALU
    alu_out: i64,
    /// Immediate staged by the control unit's decoder
    arg_from_decoder: i64,
    /// Pending input characters, consumed front to back
    input: VecDeque<char>,
    /// Characters emitted through the output port
    output: String,
}

impl DataPath {
    /// Construct a datapath with the image loaded at address zero and the
    /// rest of memory cleared to zero data words.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::MemoryTooSmall`] if the memory cannot hold
    /// the two reserved ports, and [`MachineError::ImageTooLarge`] if the
    /// image does not fit below them.
    pub fn new(
        image: &[Word],
        memory_size: usize,
        input: &str,
    ) -> Result<Self, MachineError> {
        let ports_base = memory_size
            .checked_sub(2)
            .ok_or(MachineError::MemoryTooSmall { memory_size })?;
        if image.len() > ports_base {
            return Err(MachineError::ImageTooLarge {
                image_len: image.len(),
                memory_size,
            });
        }
        let mut memory = image.to_vec();
        memory.resize(memory_size, Word::default());
        Ok(Self {
            memory_size,
            memory,
            addr_reg: 0,
            input_addr: ports_base,
            output_addr: memory_size - 1,
            reg_file: [0; REG_COUNT],
            reg_to_read: Reg::R0,
            reg_to_write: Reg::R0,
            fl_zero: false,
            fl_neg: false,
            left_alu_arg: 0,
            right_alu_arg: 0,
            alu_out: 0,
            arg_from_decoder: 0,
            input: input.chars().collect(),
            output: String::new(),
        })
    }

    /// Select the register driven onto the read bus.
    pub fn sel_reg_to_read(&mut self, reg: Reg) {
        self.reg_to_read = reg;
    }

    /// Select the register written by the next register latch.
    pub fn sel_reg_to_write(&mut self, reg: Reg) {
        self.reg_to_write = reg;
    }

    /// Stage an effective address.  The value is reduced modulo the memory
    /// size, so the address register never leaves memory.
    pub fn latch_addr(&mut self, addr: i64) {
        self.addr_reg = addr.mod_floor(&(self.memory_size as i64)) as usize;
    }

    /// Stage the decoder's immediate.
    pub fn latch_decoder_arg(&mut self, value: i64) {
        self.arg_from_decoder = value;
    }

    /// Drive the left ALU input latch from the selected source.
    pub fn latch_left_alu_arg(&mut self, src: AluArgSel) {
        self.left_alu_arg = self.alu_arg_source(src);
    }

    /// Drive the right ALU input latch from the selected source.
    pub fn latch_right_alu_arg(&mut self, src: AluArgSel) {
        self.right_alu_arg = self.alu_arg_source(src);
    }

    /// The value an ALU input latch would capture from a source.
    fn alu_arg_source(&self, src: AluArgSel) -> i64 {
        match src {
            AluArgSel::Decoder => self.arg_from_decoder,
            AluArgSel::Reg => self.reg_file[self.reg_to_read.index()],
            AluArgSel::Addr => self.addr_reg as i64,
        }
    }

    /// Write the selected register from the chosen source, then restore the
    /// zero register.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NonDataLoad`] when loading from a cell that
    /// holds an instruction rather than a data word.
    pub fn latch_reg(&mut self, src: RegWriteSel) -> Result<(), MachineError> {
        let value = match src {
            RegWriteSel::Alu => self.alu_out,
            RegWriteSel::Mem => match self.memory[self.addr_reg] {
                Word::Data(value) => value,
                Word::Instr(_) => {
                    return Err(MachineError::NonDataLoad {
                        addr: self.addr_reg,
                    })
                }
            },
        };
        self.reg_file[self.reg_to_write.index()] = value;
        self.reg_file[0] = 0;
        Ok(())
    }

    /// Run the ALU over the input latches and update the flags from the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::DivisionByZero`] for `Div` and `Rem` with a
    /// zero right operand.
    pub fn calculate(&mut self, op: AluOp) -> Result<(), MachineError> {
        let (left, right) = (self.left_alu_arg, self.right_alu_arg);
        let result = match op {
            AluOp::Add => left.wrapping_add(right),
            AluOp::Sub | AluOp::Cmp => left.wrapping_sub(right),
            AluOp::Mul => left.wrapping_mul(right),
            AluOp::Div => {
                if right == 0 {
                    return Err(MachineError::DivisionByZero);
                }
                left.div_floor(&right)
            }
            AluOp::Rem => {
                if right == 0 {
                    return Err(MachineError::DivisionByZero);
                }
                left.mod_floor(&right)
            }
            AluOp::Mov => left,
        };
        self.alu_out = result;
        self.fl_zero = result == 0;
        self.fl_neg = result < 0;
        Ok(())
    }

    /// Read the cell at the address register.
    ///
    /// Reading the input port first consumes one character from the input
    /// buffer and stores it into the port cell as a data word.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::InputExhausted`] when the input port is read
    /// with an empty input buffer.
    pub fn read(&mut self) -> Result<Word, MachineError> {
        if self.addr_reg == self.input_addr {
            let ch = self
                .input
                .pop_front()
                .ok_or(MachineError::InputExhausted)?;
            self.memory[self.input_addr] = Word::Data(i64::from(u32::from(ch)));
            log::info!("input: {ch:?}");
        }
        Ok(self.memory[self.addr_reg])
    }

    /// Store the ALU output into the cell at the address register.
    ///
    /// Writing the output port additionally appends the value, as a
    /// character, to the output buffer.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::InvalidOutputChar`] when the value stored to
    /// the output port is not a valid code point.
    pub fn write(&mut self) -> Result<(), MachineError> {
        self.memory[self.addr_reg] = Word::Data(self.alu_out);
        if self.addr_reg == self.output_addr {
            let ch = u32::try_from(self.alu_out)
                .ok()
                .and_then(char::from_u32)
                .ok_or(MachineError::InvalidOutputChar {
                    value: self.alu_out,
                })?;
            self.output.push(ch);
            log::info!("output: {ch:?}");
        }
        Ok(())
    }

    /// The word stored at an address, if the address is inside memory.
    #[must_use]
    pub fn word(&self, addr: usize) -> Option<Word> {
        self.memory.get(addr).copied()
    }

    /// The current value of a register.
    #[must_use]
    pub fn register(&self, reg: Reg) -> i64 {
        self.reg_file[reg.index()]
    }

    /// A copy of the whole register file.
    #[must_use]
    pub const fn registers(&self) -> [i64; REG_COUNT] {
        self.reg_file
    }

    /// The address register.
    #[must_use]
    pub const fn addr_reg(&self) -> usize {
        self.addr_reg
    }

    /// The staged decoder immediate.
    #[must_use]
    pub const fn decoder_arg(&self) -> i64 {
        self.arg_from_decoder
    }

    /// The ALU output latch.
    #[must_use]
    pub const fn alu_out(&self) -> i64 {
        self.alu_out
    }

    /// The zero flag.
    #[must_use]
    pub const fn fl_zero(&self) -> bool {
        self.fl_zero
    }

    /// The negative flag.
    #[must_use]
    pub const fn fl_neg(&self) -> bool {
        self.fl_neg
    }

    /// Address of the memory-mapped input port.
    #[must_use]
    pub const fn input_port(&self) -> usize {
        self.input_addr
    }

    /// Address of the memory-mapped output port.
    #[must_use]
    pub const fn output_port(&self) -> usize {
        self.output_addr
    }

    /// Number of input characters not yet consumed.
    #[must_use]
    pub fn input_remaining(&self) -> usize {
        self.input.len()
    }

    /// The characters emitted so far through the output port.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(index: u8) -> Reg {
        Reg::new(index).unwrap()
    }

    fn empty_path(memory_size: usize) -> DataPath {
        DataPath::new(&[], memory_size, "").unwrap()
    }

    /// Load a value into the left latch and a value into the right latch.
    fn latch_pair(dp: &mut DataPath, left: i64, right: i64) {
        dp.latch_decoder_arg(left);
        dp.latch_left_alu_arg(AluArgSel::Decoder);
        dp.latch_decoder_arg(right);
        dp.latch_right_alu_arg(AluArgSel::Decoder);
    }

    #[test]
    fn construction_rejects_tiny_memories() {
        assert_eq!(
            DataPath::new(&[], 1, "").unwrap_err(),
            MachineError::MemoryTooSmall { memory_size: 1 }
        );
    }

    #[test]
    fn construction_rejects_oversized_images() {
        let image = vec![Word::Data(0); 9];
        assert_eq!(
            DataPath::new(&image, 10, "").unwrap_err(),
            MachineError::ImageTooLarge {
                image_len: 9,
                memory_size: 10,
            }
        );
        // Exactly memory_size - 2 words is allowed.
        let image = vec![Word::Data(0); 8];
        assert!(DataPath::new(&image, 10, "").is_ok());
    }

    #[test]
    fn ports_sit_at_the_top_of_memory() {
        let dp = empty_path(250);
        assert_eq!(dp.input_port(), 248);
        assert_eq!(dp.output_port(), 249);
    }

    #[test]
    fn flags_track_every_alu_result() {
        let mut dp = empty_path(16);
        let cases = [
            (AluOp::Add, 2, 3, 5, false, false),
            (AluOp::Sub, 3, 3, 0, true, false),
            (AluOp::Sub, 2, 3, -1, false, true),
            (AluOp::Mul, -2, 3, -6, false, true),
            (AluOp::Mov, 0, 7, 0, true, false),
            (AluOp::Cmp, 4, 9, -5, false, true),
        ];
        for (op, left, right, expected, zero, neg) in cases {
            latch_pair(&mut dp, left, right);
            dp.calculate(op).unwrap();
            assert_eq!(dp.alu_out(), expected, "{op:?} {left} {right}");
            assert_eq!(dp.fl_zero(), zero, "{op:?} zero flag");
            assert_eq!(dp.fl_neg(), neg, "{op:?} negative flag");
        }
    }

    #[test]
    fn division_and_remainder_round_toward_negative_infinity() {
        let mut dp = empty_path(16);
        let cases = [
            (AluOp::Div, 7, 2, 3),
            (AluOp::Div, -7, 2, -4),
            (AluOp::Div, 7, -2, -4),
            (AluOp::Div, -7, -2, 3),
            (AluOp::Rem, 7, 2, 1),
            (AluOp::Rem, -7, 2, 1),
            (AluOp::Rem, 7, -2, -1),
            (AluOp::Rem, -7, -2, -1),
        ];
        for (op, left, right, expected) in cases {
            latch_pair(&mut dp, left, right);
            dp.calculate(op).unwrap();
            assert_eq!(dp.alu_out(), expected, "{op:?} {left} {right}");
        }
    }

    #[test]
    fn division_by_zero_faults() {
        let mut dp = empty_path(16);
        latch_pair(&mut dp, 5, 0);
        assert_eq!(
            dp.calculate(AluOp::Div),
            Err(MachineError::DivisionByZero)
        );
        assert_eq!(
            dp.calculate(AluOp::Rem),
            Err(MachineError::DivisionByZero)
        );
    }

    #[test]
    fn the_zero_register_survives_every_write() {
        let mut dp = empty_path(16);
        latch_pair(&mut dp, 41, 1);
        dp.calculate(AluOp::Add).unwrap();
        dp.sel_reg_to_write(Reg::R0);
        dp.latch_reg(RegWriteSel::Alu).unwrap();
        assert_eq!(dp.register(Reg::R0), 0);
        // A write to another register leaves r0 untouched as well.
        dp.sel_reg_to_write(reg(3));
        dp.latch_reg(RegWriteSel::Alu).unwrap();
        assert_eq!(dp.register(reg(3)), 42);
        assert_eq!(dp.register(Reg::R0), 0);
    }

    #[test]
    fn the_address_register_can_feed_the_alu() {
        let mut dp = empty_path(16);
        dp.latch_addr(5);
        dp.latch_left_alu_arg(AluArgSel::Addr);
        dp.calculate(AluOp::Mov).unwrap();
        assert_eq!(dp.alu_out(), 5);
    }

    #[test]
    fn the_address_register_wraps_into_memory() {
        let mut dp = empty_path(16);
        dp.latch_addr(-1);
        assert_eq!(dp.addr_reg(), 15);
        dp.latch_addr(16 + 3);
        assert_eq!(dp.addr_reg(), 3);
        dp.latch_addr(5);
        assert_eq!(dp.addr_reg(), 5);
    }

    #[test]
    fn reading_the_input_port_consumes_one_character() {
        let mut dp = DataPath::new(&[], 16, "ab").unwrap();
        dp.latch_addr(dp.input_port() as i64);
        assert_eq!(dp.read().unwrap(), Word::Data(97));
        assert_eq!(dp.input_remaining(), 1);
        assert_eq!(dp.read().unwrap(), Word::Data(98));
        assert_eq!(dp.read(), Err(MachineError::InputExhausted));
    }

    #[test]
    fn reading_plain_memory_leaves_the_input_buffer_alone() {
        let image = [Word::Data(7)];
        let mut dp = DataPath::new(&image, 16, "ab").unwrap();
        dp.latch_addr(0);
        assert_eq!(dp.read().unwrap(), Word::Data(7));
        assert_eq!(dp.input_remaining(), 2);
    }

    #[test]
    fn writing_the_output_port_appends_a_character() {
        let mut dp = empty_path(16);
        latch_pair(&mut dp, 72, 0);
        dp.calculate(AluOp::Mov).unwrap();
        dp.latch_addr(dp.output_port() as i64);
        dp.write().unwrap();
        assert_eq!(dp.output(), "H");
        assert_eq!(dp.word(dp.output_port()), Some(Word::Data(72)));
    }

    #[test]
    fn writing_an_invalid_code_point_faults() {
        let mut dp = empty_path(16);
        latch_pair(&mut dp, -1, 0);
        dp.calculate(AluOp::Mov).unwrap();
        dp.latch_addr(dp.output_port() as i64);
        assert_eq!(
            dp.write(),
            Err(MachineError::InvalidOutputChar { value: -1 })
        );
    }

    #[test]
    fn loads_from_instruction_cells_fault() {
        use sorbet_isa::Instr;
        let image = [Word::Instr(Instr::Hlt)];
        let mut dp = DataPath::new(&image, 16, "").unwrap();
        dp.latch_addr(0);
        dp.sel_reg_to_write(reg(1));
        assert_eq!(
            dp.latch_reg(RegWriteSel::Mem),
            Err(MachineError::NonDataLoad { addr: 0 })
        );
    }
}
