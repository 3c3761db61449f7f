//! Console rendering and numbered-menu prompts.

use std::fmt::Display;
use std::io::{self, BufRead, Write};

use crate::domain::models::{AppEvent, MessageSeverity, StatusMessage};

fn severity_tag(severity: MessageSeverity) -> &'static str {
    match severity {
        MessageSeverity::Info => "[..]",
        MessageSeverity::Success => "[ok]",
        MessageSeverity::Warning => "[!!]",
        MessageSeverity::Error => "[XX]",
    }
}

pub fn render_status(message: &StatusMessage) -> String {
    format!("{} {}", severity_tag(message.severity), message.message)
}

/// One line per progress event.
pub fn render_event(event: &AppEvent) -> String {
    match event {
        AppEvent::DeviceFound(device) => format!("  found device {}", device),
        AppEvent::InquiryFinished(status) => format!("  {}", status),
        AppEvent::EndpointFound(endpoint) => format!("  found service {}", endpoint.url),
        AppEvent::SearchFinished { device, status } => format!("  {}: {}", device, status),
        AppEvent::LogMessage(message) => render_status(message),
    }
}

/// Numbered console menu over any buffered input.
pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn line(&mut self, text: impl Display) -> io::Result<()> {
        writeln!(self.output, "{}", text)
    }

    pub fn status(&mut self, message: &StatusMessage) -> io::Result<()> {
        writeln!(self.output, "{}", render_status(message))
    }

    /// List `items` under `title` and ask for one of them.
    ///
    /// Returns the zero-based index, or `None` on `q` or end of input.
    /// Anything else outside `1..=items.len()` re-prompts.
    pub fn choose<T: Display>(&mut self, title: &str, items: &[T]) -> io::Result<Option<usize>> {
        if items.is_empty() {
            return Ok(None);
        }
        writeln!(self.output, "{}", title)?;
        for (i, item) in items.iter().enumerate() {
            writeln!(self.output, "{:>3}. {}", i + 1, item)?;
        }

        let mut line = String::new();
        loop {
            write!(self.output, "Select 1-{} (q to quit): ", items.len())?;
            self.output.flush()?;

            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let answer = line.trim();
            if answer.eq_ignore_ascii_case("q") {
                return Ok(None);
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=items.len()).contains(&n) => return Ok(Some(n - 1)),
                _ => writeln!(
                    self.output,
                    "Please enter a number between 1 and {}",
                    items.len()
                )?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BluetoothAddress, DeviceIdentity, SearchStatus};
    use std::io::Cursor;

    fn console(input: &str) -> Console<Cursor<Vec<u8>>, Vec<u8>> {
        Console::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn printed(console: &Console<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8(console.output().clone()).unwrap()
    }

    #[test]
    fn test_choose_reprompts_until_valid() {
        let mut console = console("0\nabc\n3\n2\n");
        let choice = console.choose("Devices:", &["Phone", "Laptop"]).unwrap();
        assert_eq!(choice, Some(1));

        let out = printed(&console);
        assert!(out.starts_with("Devices:\n  1. Phone\n  2. Laptop\n"));
        assert_eq!(out.matches("Please enter a number between 1 and 2").count(), 3);
    }

    #[test]
    fn test_choose_quit_and_eof() {
        assert_eq!(console("q\n").choose("T", &["a"]).unwrap(), None);
        assert_eq!(console("").choose("T", &["a"]).unwrap(), None);
        assert_eq!(console(" 1 \n").choose("T", &["a"]).unwrap(), Some(0));
    }

    #[test]
    fn test_choose_from_nothing_does_not_prompt() {
        let mut console = console("1\n");
        let items: [&str; 0] = [];
        assert_eq!(console.choose("T", &items).unwrap(), None);
        assert!(printed(&console).is_empty());
    }

    #[test]
    fn test_render_events() {
        let address = BluetoothAddress::from(0xB8F9_348D_57DF);
        let found = AppEvent::DeviceFound(DeviceIdentity::with_name(address, "Phone"));
        assert!(render_event(&found).contains("Phone"));

        let finished = AppEvent::SearchFinished {
            device: address,
            status: SearchStatus::NoRecords,
        };
        assert!(render_event(&finished).starts_with("  B8F9348D57DF: "));

        let failure = StatusMessage {
            message: "connect failed".into(),
            severity: MessageSeverity::Error,
        };
        assert_eq!(render_status(&failure), "[XX] connect failed");
    }
}
