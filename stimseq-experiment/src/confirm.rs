use std::io::{self, BufRead, Write};
use std::time::Duration;

/// Blocks until the operator acknowledges `prompt`.
pub trait Confirm {
    fn await_confirmation(&mut self, prompt: &str) -> io::Result<()>;
}

impl<C: Confirm + ?Sized> Confirm for &mut C {
    fn await_confirmation(&mut self, prompt: &str) -> io::Result<()> {
        (**self).await_confirmation(prompt)
    }
}

/// Enter on the terminal. Keystrokes typed before the prompt appeared are
/// discarded, and a short settle delay follows so a double press cannot
/// skip the next checkpoint.
#[derive(Debug, Clone)]
pub struct ConsoleConfirm {
    pub settle: Duration,
}

impl ConsoleConfirm {
    pub fn new() -> Self {
        Self {
            settle: Duration::from_secs(1),
        }
    }
}

impl Default for ConsoleConfirm {
    fn default() -> Self {
        Self::new()
    }
}

impl Confirm for ConsoleConfirm {
    fn await_confirmation(&mut self, prompt: &str) -> io::Result<()> {
        discard_pending_input();

        let mut stdout = io::stdout().lock();
        write!(stdout, "{prompt} ")?;
        stdout.flush()?;
        drop(stdout);

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stdin closed while waiting for the operator",
            ));
        }
        std::thread::sleep(self.settle);
        Ok(())
    }
}

#[cfg(unix)]
fn discard_pending_input() {
    use std::io::Read;

    let mut buf = [0u8; 256];
    loop {
        let mut fds = libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut fds, 1, 0) };
        if ready <= 0 || fds.revents & libc::POLLIN == 0 {
            return;
        }
        match io::stdin().read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

#[cfg(not(unix))]
fn discard_pending_input() {}

/// Confirms immediately and remembers what it was asked.
#[derive(Debug, Clone, Default)]
pub struct AutoConfirm {
    prompts: Vec<String>,
}

impl AutoConfirm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl Confirm for AutoConfirm {
    fn await_confirmation(&mut self, prompt: &str) -> io::Result<()> {
        tracing::debug!(prompt, "auto-confirmed");
        self.prompts.push(prompt.to_string());
        Ok(())
    }
}
