//! Line-editing and command dispatch for the serial console.
//!
//! Grounded on `console.c`: bytes are accumulated into a fixed line buffer,
//! backspace erases the last character, and carriage return hands the line
//! to a small table of named commands. The actual byte-in/byte-out driving
//! is the application binary's job; this module only holds the state
//! machine, returning an [`Action`] describing what the caller should do
//! (echo the line, or report a command's result) rather than writing to a
//! UART itself.

/// Maximum length of a line buffer, including the trailing argument text.
pub const MAX_LINE_LENGTH: usize = 32;

/// Maximum number of commands one [`CommandTable`] can hold.
pub const MAX_COMMANDS: usize = 4;

const CARRIAGE_RETURN: u8 = 0x0D;
const LINE_FEED: u8 = 0x0A;
const BACKSPACE: u8 = 0x08;

fn is_printable(byte: u8) -> bool {
    (0x20..=0x7e).contains(&byte)
}

/// What the caller should do in response to a processed byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Re-render the current line, e.g. for local echo.
    Echo,
    /// A complete line was parsed and dispatched; `true` if the matched
    /// command's handler reported success.
    Result(bool),
}

/// A named command and its handler.
///
/// The handler receives the remainder of the line after the command name,
/// unsplit, so it can apply its own argument parsing.
pub struct Command {
    name: &'static str,
    handler: fn(&str) -> bool,
}

/// A fixed-capacity table of registered commands.
pub struct CommandTable {
    commands: heapless::Vec<Command, MAX_COMMANDS>,
}

impl CommandTable {
    /// Creates an empty command table.
    pub fn new() -> Self {
        Self {
            commands: heapless::Vec::new(),
        }
    }

    /// Registers `handler` under `name`. Returns `Err` if the table is
    /// already full.
    pub fn register(&mut self, name: &'static str, handler: fn(&str) -> bool) -> Result<(), ()> {
        self.commands.push(Command { name, handler }).map_err(|_| ())
    }

    /// Splits `line` into a command name and argument text, and runs the
    /// matching handler. Returns `false` if no command matches.
    pub fn dispatch(&self, line: &str) -> bool {
        let mut parts = line.splitn(2, ' ');
        let name = match parts.next() {
            Some(name) if !name.is_empty() => name,
            _ => return false,
        };
        let args = parts.next().unwrap_or("");

        for command in &self.commands {
            if command.name == name {
                return (command.handler)(args);
            }
        }
        false
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates console input one byte at a time into a line buffer.
pub struct LineEditor {
    buffer: heapless::String<MAX_LINE_LENGTH>,
}

impl LineEditor {
    /// Creates an empty line editor.
    pub fn new() -> Self {
        Self {
            buffer: heapless::String::new(),
        }
    }

    /// The line accumulated so far.
    pub fn line(&self) -> &str {
        &self.buffer
    }

    /// Processes one input byte, dispatching against `table` on a
    /// completed line. Returns `None` if the byte produced no visible
    /// effect (an unprintable byte, backspace on an empty line, or a
    /// line terminator on an empty line).
    pub fn push(&mut self, byte: u8, table: &CommandTable) -> Option<Action> {
        match byte {
            CARRIAGE_RETURN | LINE_FEED => {
                if self.buffer.is_empty() {
                    return None;
                }
                let status = table.dispatch(&self.buffer);
                self.buffer.clear();
                Some(Action::Result(status))
            }
            BACKSPACE => {
                if self.buffer.pop().is_some() {
                    Some(Action::Echo)
                } else {
                    None
                }
            }
            byte if is_printable(byte) => {
                if self.buffer.push(byte as char).is_ok() {
                    Some(Action::Echo)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_table() -> CommandTable {
        let mut table = CommandTable::new();
        table.register("ping", |_args| true).unwrap();
        table.register("fail", |_args| false).unwrap();
        table
            .register("set", |args| args == "speed 10")
            .unwrap();
        table
    }

    fn feed(editor: &mut LineEditor, table: &CommandTable, line: &str) -> Option<Action> {
        let mut last = None;
        for byte in line.bytes() {
            last = editor.push(byte, table);
        }
        last
    }

    #[test]
    fn printable_bytes_echo_and_build_the_line() {
        let table = echo_table();
        let mut editor = LineEditor::new();
        assert_eq!(editor.push(b'p', &table), Some(Action::Echo));
        assert_eq!(editor.line(), "p");
    }

    #[test]
    fn carriage_return_dispatches_matching_command() {
        let table = echo_table();
        let mut editor = LineEditor::new();
        let action = feed(&mut editor, &table, "ping\r");
        assert_eq!(action, Some(Action::Result(true)));
        assert_eq!(editor.line(), "");
    }

    #[test]
    fn unmatched_command_reports_failure() {
        let table = echo_table();
        let mut editor = LineEditor::new();
        let action = feed(&mut editor, &table, "bogus\r");
        assert_eq!(action, Some(Action::Result(false)));
    }

    #[test]
    fn arguments_are_passed_through_unsplit() {
        let table = echo_table();
        let mut editor = LineEditor::new();
        let action = feed(&mut editor, &table, "set speed 10\r");
        assert_eq!(action, Some(Action::Result(true)));
    }

    #[test]
    fn empty_line_on_carriage_return_is_a_no_op() {
        let table = echo_table();
        let mut editor = LineEditor::new();
        assert_eq!(editor.push(CARRIAGE_RETURN, &table), None);
    }

    #[test]
    fn backspace_erases_last_character() {
        let table = echo_table();
        let mut editor = LineEditor::new();
        editor.push(b'a', &table);
        editor.push(b'b', &table);
        assert_eq!(editor.push(BACKSPACE, &table), Some(Action::Echo));
        assert_eq!(editor.line(), "a");
    }

    #[test]
    fn backspace_on_empty_line_is_a_no_op() {
        let table = echo_table();
        let mut editor = LineEditor::new();
        assert_eq!(editor.push(BACKSPACE, &table), None);
    }

    #[test]
    fn line_stops_growing_once_buffer_is_full() {
        let table = echo_table();
        let mut editor = LineEditor::new();
        for _ in 0..MAX_LINE_LENGTH + 4 {
            editor.push(b'x', &table);
        }
        assert_eq!(editor.line().len(), MAX_LINE_LENGTH);
    }

    #[test]
    fn table_register_fails_past_capacity() {
        let mut table = CommandTable::new();
        for i in 0..MAX_COMMANDS {
            let name: &'static str = match i {
                0 => "a",
                1 => "b",
                2 => "c",
                _ => "d",
            };
            table.register(name, |_| true).unwrap();
        }
        assert!(table.register("e", |_| true).is_err());
    }
}
