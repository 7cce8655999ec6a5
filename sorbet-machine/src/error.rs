use core::fmt;

/// Fault and stall conditions that end a simulation early.
///
/// `InputExhausted` is the one graceful member: the simulation driver
/// converts it into a normal stop with the output collected so far.  Every
/// other condition is a hard fault.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MachineError {
    /// The memory cannot hold the two reserved I/O ports
    MemoryTooSmall {
        /// The rejected memory size
        memory_size: usize,
    },

    /// The image does not fit below the reserved I/O ports
    ImageTooLarge {
        /// Number of words in the image
        image_len: usize,
        /// Configured memory size
        memory_size: usize,
    },

    /// The instruction budget was exhausted before `HLT`
    LimitExceeded {
        /// The configured budget
        limit: u64,
    },

    /// The input buffer was empty when an input read was attempted
    InputExhausted,

    /// ALU division or remainder with a zero right operand
    DivisionByZero,

    /// The instruction pointer left the memory
    IpOutOfRange {
        /// The rejected instruction pointer
        ip: i64,
    },

    /// Fetch landed on a `DATA` word
    DataExecution {
        /// Address of the data word
        addr: usize,
    },

    /// A register load addressed a cell that does not hold a `DATA` word
    NonDataLoad {
        /// The addressed cell
        addr: usize,
    },

    /// A store to the output port carried a value outside the character
    /// code-point range
    InvalidOutputChar {
        /// The rejected value
        value: i64,
    },
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MemoryTooSmall { memory_size } => write!(
                f,
                "memory of {memory_size} words cannot hold the I/O ports"
            ),
            Self::ImageTooLarge {
                image_len,
                memory_size,
            } => write!(
                f,
                "image of {image_len} words does not fit in {memory_size} \
                 words of memory with two reserved ports"
            ),
            Self::LimitExceeded { limit } => {
                write!(f, "instruction limit of {limit} exceeded")
            }
            Self::InputExhausted => write!(f, "input buffer is empty"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::IpOutOfRange { ip } => {
                write!(f, "instruction pointer {ip} is outside memory")
            }
            Self::DataExecution { addr } => {
                write!(f, "attempt to execute the data word at address {addr}")
            }
            Self::NonDataLoad { addr } => write!(
                f,
                "register load from address {addr}, which does not hold a \
                 data word"
            ),
            Self::InvalidOutputChar { value } => write!(
                f,
                "output value {value} is not a valid character code point"
            ),
        }
    }
}

impl std::error::Error for MachineError {}
