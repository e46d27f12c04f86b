//! Command tap: reconstructs typed lines from relayed input for auditing

use std::fmt;

const ESC: char = '\x1b';

/// Control keys worth an audit line of their own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    /// Ctrl+C
    Interrupt,
    /// Ctrl+D
    EndOfTransmission,
    /// Ctrl+Z
    Suspend,
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKey::Interrupt => write!(f, "CTRL+C (interrupt)"),
            ControlKey::EndOfTransmission => write!(f, "CTRL+D (EOF)"),
            ControlKey::Suspend => write!(f, "CTRL+Z (suspend)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapEvent {
    /// A completed line, trimmed. May be empty.
    Command(String),
    ControlKey(ControlKey),
}

/// Line buffer over a copy of a session's input.
///
/// The tap only observes; the bytes forwarded to the shell are never
/// touched. It is a best-effort reconstruction: cursor movement and shell
/// history recall are invisible to it.
#[derive(Debug, Default)]
pub struct CommandTap {
    buffer: String,
}

impl CommandTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one inbound payload and return the events it completes
    pub fn observe(&mut self, payload: &str) -> Vec<TapEvent> {
        let mut events = Vec::new();
        // Escape sequences (arrows, function keys) would otherwise leave
        // their printable tail in the buffer
        let buffer_printable = !payload.starts_with(ESC);
        let mut after_terminator = false;

        for c in payload.chars() {
            match c {
                '\r' | '\n' => {
                    if !after_terminator {
                        events.push(TapEvent::Command(self.buffer.trim().to_string()));
                        self.buffer.clear();
                    }
                    after_terminator = true;
                    continue;
                }
                '\x03' => {
                    events.push(TapEvent::ControlKey(ControlKey::Interrupt));
                    self.buffer.clear();
                }
                '\x04' => events.push(TapEvent::ControlKey(ControlKey::EndOfTransmission)),
                '\x1a' => events.push(TapEvent::ControlKey(ControlKey::Suspend)),
                '\x7f' | '\x08' => {
                    self.buffer.pop();
                }
                ' '..='~' if buffer_printable => self.buffer.push(c),
                _ => {}
            }
            after_terminator = false;
        }

        events
    }

    /// Text typed since the last line terminator
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
