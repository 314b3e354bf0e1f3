//! Human console: multi-line requests, approval prompts and notices.
//!
//! The [`Console`] trait keeps the approval gate and the session free of
//! terminal details. Tests drive them with a scripted console.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use signal_hook::consts::SIGINT;

use crate::core::risk::RiskTier;
use crate::exit_codes;

/// Line that ends a multi-line request.
pub const SUBMIT_SENTINEL: &str = "SUBMIT";

pub trait Console {
    /// Read one request terminated by [`SUBMIT_SENTINEL`].
    ///
    /// `Ok(None)` means end of input: the session should exit.
    fn read_request(&mut self) -> Result<Option<String>>;

    /// Show a pending action with its risk tier before asking for a decision.
    fn show_preview(&mut self, tier: RiskTier, preview: &str);

    /// Read the answer to an approval prompt.
    ///
    /// `Ok(None)` means end of input or an interrupt (Ctrl+C).
    fn read_decision(&mut self) -> Result<Option<String>>;

    /// Print an informational line.
    fn notify(&mut self, message: &str);
}

/// Route SIGINT to a flag instead of terminating the process.
///
/// A second SIGINT while the flag is still set exits with
/// [`exit_codes::INTERRUPTED`].
pub fn install_interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    // Registered first so it sees the flag before this signal sets it.
    signal_hook::flag::register_conditional_shutdown(
        SIGINT,
        exit_codes::INTERRUPTED,
        Arc::clone(&flag),
    )
    .context("register second-interrupt shutdown")?;
    signal_hook::flag::register(SIGINT, Arc::clone(&flag)).context("register interrupt flag")?;
    Ok(flag)
}

/// Console over any line reader and writer (stdin/stdout in the binary).
///
/// An interrupt observed around a read turns that read into `Ok(None)`: a
/// pending approval is cancelled and a request prompt ends the session.
pub struct TerminalConsole<R, W> {
    input: R,
    output: W,
    interrupted: Arc<AtomicBool>,
}

impl TerminalConsole<io::StdinLock<'static>, io::Stdout> {
    /// Console on stdin/stdout with Ctrl+C routed to its interrupt flag.
    pub fn stdio() -> Result<Self> {
        let interrupted = install_interrupt_flag()?;
        Ok(Self::new(io::stdin().lock(), io::stdout()).with_interrupt_flag(interrupted))
    }
}

impl<R: BufRead, W: Write> TerminalConsole<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share `flag` as this console's interrupt flag.
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    /// `Ok(None)` on end of input or an interrupt.
    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self.input.read_line(&mut line);
        if self.take_interrupt() {
            return Ok(None);
        }
        match read {
            Ok(0) => Ok(None),
            Ok(_) => {
                let trimmed_len = line.trim_end_matches(['\n', '\r']).len();
                line.truncate(trimmed_len);
                Ok(Some(line))
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(err).context("read console input"),
        }
    }

    fn write_lines(&mut self, text: &str) {
        // Console output is best effort; a closed stdout must not abort a step.
        let _ = writeln!(self.output, "{text}");
        let _ = self.output.flush();
    }
}

impl<R: BufRead, W: Write> Console for TerminalConsole<R, W> {
    fn read_request(&mut self) -> Result<Option<String>> {
        // An interrupt left over from the last request only cancelled its action.
        self.take_interrupt();
        self.write_lines(&format!(
            "You (type '{SUBMIT_SENTINEL}' on a new line to send):"
        ));
        let mut lines = Vec::new();
        loop {
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            if line.trim().eq_ignore_ascii_case(SUBMIT_SENTINEL) {
                break;
            }
            lines.push(line);
        }
        Ok(Some(lines.join("\n").trim().to_string()))
    }

    fn show_preview(&mut self, tier: RiskTier, preview: &str) {
        let rule = "=".repeat(60);
        self.write_lines(&format!(
            "\n{rule}\n[{}] Agent wants to execute:\n{rule}\n{preview}\n{rule}",
            tier.label()
        ));
        self.write_lines(
            "Options:\n  y / yes  - Approve this action\n  n / no   - Reject this action\n  \
             a / auto - Approve and enable auto-mode for session\n  \
             Or type feedback to guide the agent\n",
        );
    }

    fn read_decision(&mut self) -> Result<Option<String>> {
        // Ctrl+C during the step cancels the action it produced.
        if self.take_interrupt() {
            return Ok(None);
        }
        let _ = write!(self.output, "Approve? ");
        let _ = self.output.flush();
        self.read_line()
    }

    fn notify(&mut self, message: &str) {
        self.write_lines(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    fn console(input: &str) -> TerminalConsole<Cursor<Vec<u8>>, Vec<u8>> {
        TerminalConsole::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn request_ends_at_submit_sentinel() {
        let mut c = console("write a.py\n  that prints hi\nsubmit\nnext\n");
        let request = c.read_request().expect("read");
        assert_eq!(request.as_deref(), Some("write a.py\n  that prints hi"));
    }

    #[test]
    fn end_of_input_before_submit_means_exit() {
        let mut c = console("half a request\n");
        assert_eq!(c.read_request().expect("read"), None);
    }

    #[test]
    fn decision_is_one_line_or_none_at_eof() {
        let mut c = console("yes\r\n");
        assert_eq!(c.read_decision().expect("read").as_deref(), Some("yes"));
        assert_eq!(c.read_decision().expect("read"), None);
    }

    #[test]
    fn preview_shows_tier_and_options() {
        let mut c = console("");
        c.show_preview(RiskTier::High, "Delete: a.py");
        let out = String::from_utf8(c.into_output()).expect("utf8");
        assert!(out.contains("[HIGH RISK] Agent wants to execute:"));
        assert!(out.contains("Delete: a.py"));
        assert!(out.contains("a / auto"));
    }

    /// Reader that raises the interrupt flag when the first read happens,
    /// as Ctrl+C does while the prompt is waiting.
    struct InterruptedReader {
        inner: Cursor<Vec<u8>>,
        flag: Arc<AtomicBool>,
    }

    impl io::Read for InterruptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.flag.store(true, Ordering::SeqCst);
            self.inner.read(buf)
        }
    }

    #[test]
    fn pending_interrupt_cancels_the_decision_without_reading() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut c = console("yes\n").with_interrupt_flag(Arc::clone(&flag));
        assert_eq!(c.read_decision().expect("read"), None);
        assert!(!flag.load(Ordering::SeqCst));
        // The answer is still there for the next prompt.
        assert_eq!(c.read_decision().expect("read").as_deref(), Some("yes"));
    }

    #[test]
    fn interrupt_while_waiting_cancels_the_decision() {
        let flag = Arc::new(AtomicBool::new(false));
        let reader = io::BufReader::new(InterruptedReader {
            inner: Cursor::new(b"yes\n".to_vec()),
            flag: Arc::clone(&flag),
        });
        let mut c = TerminalConsole::new(reader, Vec::new()).with_interrupt_flag(flag);
        assert_eq!(c.read_decision().expect("read"), None);
    }

    #[test]
    fn stale_interrupt_does_not_end_the_next_request() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut c = console("hi\nSUBMIT\n").with_interrupt_flag(flag);
        assert_eq!(c.read_request().expect("read").as_deref(), Some("hi"));
    }

    #[test]
    fn interrupt_at_the_request_prompt_ends_the_session() {
        let flag = Arc::new(AtomicBool::new(false));
        let reader = io::BufReader::new(InterruptedReader {
            inner: Cursor::new(b"hi\nSUBMIT\n".to_vec()),
            flag: Arc::clone(&flag),
        });
        let mut c = TerminalConsole::new(reader, Vec::new()).with_interrupt_flag(flag);
        assert_eq!(c.read_request().expect("read"), None);
    }
}
