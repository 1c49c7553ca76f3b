//! Escape-key command interpreter
//!
//! Local input is scanned for the sentinel byte (ctrl-t). The byte that
//! follows it is a command key and never reaches the device:
//!
//! ```text
//! Idle  --ctrl-t-->  Armed  --any byte-->  Idle
//! ```
//!
//! Unknown command keys are dropped. `ctrl-t t` is the only way to send a
//! literal ctrl-t to the device.

/// The byte that arms the interpreter
pub const SENTINEL: u8 = 0x14;

/// A recognised escape-key command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    SendBreak,
    ShowConfig,
    ToggleDtr,
    ToggleEcho,
    ToggleHex,
    ClearScreen,
    ShowLines,
    Quit,
    ToggleRts,
    ShowStats,
    SendSentinel,
    CycleTimestamp,
    ShowVersion,
}

impl Command {
    /// Every command in help order
    pub const ALL: [Command; 14] = [
        Command::Help,
        Command::SendBreak,
        Command::ShowConfig,
        Command::ToggleDtr,
        Command::ToggleEcho,
        Command::ToggleHex,
        Command::ClearScreen,
        Command::ShowLines,
        Command::Quit,
        Command::ToggleRts,
        Command::ShowStats,
        Command::SendSentinel,
        Command::CycleTimestamp,
        Command::ShowVersion,
    ];

    /// Look up the command bound to a key
    pub fn from_key(key: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.key() == key)
    }

    /// The key that follows ctrl-t
    pub fn key(self) -> u8 {
        match self {
            Command::Help => b'?',
            Command::SendBreak => b'b',
            Command::ShowConfig => b'c',
            Command::ToggleDtr => b'd',
            Command::ToggleEcho => b'e',
            Command::ToggleHex => b'h',
            Command::ClearScreen => b'l',
            Command::ShowLines => b'L',
            Command::Quit => b'q',
            Command::ToggleRts => b'r',
            Command::ShowStats => b's',
            Command::SendSentinel => b't',
            Command::CycleTimestamp => b'T',
            Command::ShowVersion => b'v',
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Command::Help => "List available key commands",
            Command::SendBreak => "Send break",
            Command::ShowConfig => "Show configuration",
            Command::ToggleDtr => "Toggle DTR line",
            Command::ToggleEcho => "Toggle local echo mode",
            Command::ToggleHex => "Toggle hexadecimal mode",
            Command::ClearScreen => "Clear screen",
            Command::ShowLines => "Show line states",
            Command::Quit => "Quit",
            Command::ToggleRts => "Toggle RTS line",
            Command::ShowStats => "Show statistics",
            Command::SendSentinel => "Send ctrl-t key code",
            Command::CycleTimestamp => "Toggle line timestamp mode",
            Command::ShowVersion => "Show version",
        }
    }
}

/// What to do with one byte of local input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Send this byte on to the device
    Forward(u8),
    /// Consume the byte without sending anything
    Swallow,
    /// Run a command; the key itself is consumed
    Execute(Command),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Armed,
}

/// Two-state escape sequence recogniser
#[derive(Debug)]
pub struct Interpreter {
    state: State,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    /// Whether the last byte was an unconsumed sentinel
    pub fn is_armed(&self) -> bool {
        self.state == State::Armed
    }

    /// Classify one byte of local input
    pub fn feed(&mut self, byte: u8) -> Step {
        match self.state {
            State::Idle if byte == SENTINEL => {
                self.state = State::Armed;
                Step::Swallow
            },
            State::Idle => Step::Forward(byte),
            State::Armed => {
                self.state = State::Idle;
                match Command::from_key(byte) {
                    Some(Command::SendSentinel) => Step::Forward(SENTINEL),
                    Some(cmd) => Step::Execute(cmd),
                    None => {
                        tracing::debug!("Ignoring unknown command key 0x{:02x}", byte);
                        Step::Swallow
                    },
                }
            },
        }
    }
}
