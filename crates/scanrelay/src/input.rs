//! Keyboard input adapter.
//!
//! A keyboard-wedge scanner types into whatever has focus; here that is the
//! service's terminal. The adapter owns the raw-mode terminal and hands each
//! key to a consumer as a plain [`KeyEvent`], so nothing downstream knows
//! about crossterm.

use crate::tokenizer::{KeyEvent, SPACE_KEY, TERMINATOR_KEY};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

const INPUT_POLL: Duration = Duration::from_millis(100);

/// Restores cooked mode when dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(err) = terminal::disable_raw_mode() {
            error!("Failed to restore terminal mode: {}", err);
        }
    }
}

/// Map a terminal key to the event vocabulary the tokenizer understands.
pub fn translate(key: &event::KeyEvent) -> Option<KeyEvent> {
    let name = match key.code {
        KeyCode::Enter => TERMINATOR_KEY.to_string(),
        KeyCode::Char(' ') => SPACE_KEY.to_string(),
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Tab => "tab".to_string(),
        KeyCode::Backspace => "backspace".to_string(),
        KeyCode::Esc => "esc".to_string(),
        _ => return None,
    };
    Some(KeyEvent {
        name,
        is_down: key.kind != KeyEventKind::Release,
    })
}

fn is_interrupt(key: &event::KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C'))
}

/// Fail unless stdin is an interactive terminal.
///
/// Scanners type into the service's terminal, so without one nothing can
/// ever be captured.
pub fn ensure_terminal() -> io::Result<()> {
    if io::stdin().is_terminal() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "stdin is not a terminal; keyboard scans cannot be captured",
        ))
    }
}

/// Key source reading the controlling terminal.
pub struct TerminalKeySource;

impl TerminalKeySource {
    /// Attach to the terminal and start the input thread.
    ///
    /// Attaching (terminal check and raw mode) happens before the thread
    /// starts, so a missing terminal is an error here. The thread runs until
    /// `running` goes false; Ctrl+C in raw mode clears `running` itself since
    /// no SIGINT is delivered. A read failure ends the thread with an error.
    pub fn spawn<F>(
        running: Arc<AtomicBool>,
        mut consumer: F,
    ) -> io::Result<JoinHandle<io::Result<()>>>
    where
        F: FnMut(KeyEvent) + Send + 'static,
    {
        ensure_terminal()?;
        let raw = RawModeGuard::enable()?;
        debug!("Key input attached to terminal");

        thread::Builder::new()
            .name("key-input".to_string())
            .spawn(move || {
                let _raw = raw;
                let result = read_keys(&running, &mut consumer);
                if let Err(err) = &result {
                    error!("Terminal input failed: {}", err);
                    running.store(false, Ordering::SeqCst);
                }
                debug!("Key input detached");
                result
            })
    }
}

fn read_keys<F>(running: &AtomicBool, consumer: &mut F) -> io::Result<()>
where
    F: FnMut(KeyEvent),
{
    while running.load(Ordering::SeqCst) {
        if !event::poll(INPUT_POLL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if is_interrupt(&key) {
            info!("Received Ctrl+C, initiating shutdown...");
            running.store(false, Ordering::SeqCst);
            break;
        }
        if let Some(event) = translate(&key) {
            consumer(event);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    fn key(code: KeyCode, kind: KeyEventKind) -> event::KeyEvent {
        event::KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind,
            state: KeyEventState::NONE,
        }
    }

    #[test]
    fn translates_scanner_vocabulary() {
        let enter = translate(&key(KeyCode::Enter, KeyEventKind::Press)).unwrap();
        assert_eq!(enter, KeyEvent::down("enter"));

        let space = translate(&key(KeyCode::Char(' '), KeyEventKind::Press)).unwrap();
        assert_eq!(space, KeyEvent::down("space"));

        let digit = translate(&key(KeyCode::Char('7'), KeyEventKind::Repeat)).unwrap();
        assert_eq!(digit, KeyEvent::down("7"));

        let released = translate(&key(KeyCode::Char('A'), KeyEventKind::Release)).unwrap();
        assert_eq!(released, KeyEvent::up("A"));
    }

    #[test]
    fn unmapped_keys_are_dropped() {
        assert!(translate(&key(KeyCode::F(5), KeyEventKind::Press)).is_none());
        assert!(translate(&key(KeyCode::Up, KeyEventKind::Press)).is_none());
    }

    #[test]
    fn spawn_without_terminal_fails_before_starting() {
        if io::stdin().is_terminal() {
            // interactive run; attaching would put this terminal in raw mode
            return;
        }
        let running = Arc::new(AtomicBool::new(true));
        let err = TerminalKeySource::spawn(Arc::clone(&running), |_| {}).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(running.load(Ordering::SeqCst));
    }

    #[test]
    fn ctrl_c_is_interrupt() {
        let mut ctrl_c = key(KeyCode::Char('c'), KeyEventKind::Press);
        ctrl_c.modifiers = KeyModifiers::CONTROL;
        assert!(is_interrupt(&ctrl_c));
        assert!(!is_interrupt(&key(KeyCode::Char('c'), KeyEventKind::Press)));
    }
}
