use std::io::{self, Write};

use color_eyre::{eyre::bail, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use keyward_core::storage::Secret;
use zeroize::Zeroizing;

/// Prompt on stderr and read one line from the terminal without echoing it.
pub fn read_hidden(prompt: &str) -> Result<Secret> {
    eprint!("{prompt}");
    io::stderr().flush()?;

    let mut line = Zeroizing::new(String::new());
    let outcome = {
        // Guard restores the terminal even if reading fails.
        let _guard = RawModeGuard::enter()?;
        loop {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            match apply_key(&mut line, key) {
                Step::Continue => {}
                finished => break finished,
            }
        }
    };
    eprintln!();

    if outcome == Step::Cancelled {
        bail!("cancelled");
    }
    Ok(Zeroizing::new(std::mem::take(&mut *line).into_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Done,
    Cancelled,
}

fn apply_key(line: &mut String, key: KeyEvent) -> Step {
    if key.kind == KeyEventKind::Release {
        return Step::Continue;
    }
    match key.code {
        KeyCode::Enter => Step::Done,
        KeyCode::Esc => Step::Cancelled,
        KeyCode::Char('c' | 'd') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Step::Cancelled
        }
        KeyCode::Char(c) => {
            line.push(c);
            Step::Continue
        }
        KeyCode::Backspace => {
            line.pop();
            Step::Continue
        }
        _ => Step::Continue,
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}
