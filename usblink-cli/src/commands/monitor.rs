//! Serial monitor command implementation.
//!
//! - Output thread: session events → stdout (with optional timestamps)
//! - Main thread: keyboard (crossterm raw mode) or piped stdin → device
//! - Ctrl+C: graceful exit
//! - Ctrl+T: toggle timestamp display

use anyhow::{Context, Result, bail};
use console::style;
use crossterm::event::{self, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use log::{debug, warn};
use std::io::{self, IsTerminal, Read as _, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use usblink::{Event, LinkState, Session};

use crate::display::MonitorFormatter;
use crate::{install_interrupt_handler, use_fancy_output, was_interrupted};

/// Input poll interval; bounds how late a stop is noticed.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Output state shared between the event thread and status messages.
///
/// Holding the lock while printing keeps data and status lines from
/// interleaving mid-line.
type SharedFormatter = Arc<Mutex<MonitorFormatter>>;

fn print_status_line(formatter: &SharedFormatter, message: &str, raw_mode: bool) {
    let _guard = formatter.lock().unwrap_or_else(PoisonError::into_inner);
    if raw_mode {
        eprint!("\r\x1b[2K{message}\r\n");
    } else {
        eprintln!("{message}");
    }
    io::stderr().flush().ok();
}

fn status_symbol(symbol: &'static str) -> String {
    if use_fancy_output() {
        format!("{} ", style(symbol).cyan())
    } else {
        String::new()
    }
}

/// Print `Data` events until a terminal event arrives or `running` clears.
///
/// Returns the terminal event, if the connection ended that way.
fn pump_events(
    rx: &Receiver<Event>,
    formatter: &SharedFormatter,
    running: &AtomicBool,
) -> Option<Event> {
    while running.load(Ordering::Relaxed) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Event::Data(bytes)) => {
                let mut fmt = formatter.lock().unwrap_or_else(PoisonError::into_inner);
                let text = fmt.push(&bytes);
                if !text.is_empty() {
                    let mut stdout = io::stdout().lock();
                    let _ = stdout.write_all(text.as_bytes());
                    let _ = stdout.flush();
                }
            },
            Ok(event) => {
                running.store(false, Ordering::Relaxed);
                return Some(event);
            },
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    None
}

/// Bytes sent for a key press, if any.
fn key_bytes(code: KeyCode, modifiers: KeyModifiers) -> Option<Vec<u8>> {
    match (code, modifiers) {
        // Enter: send \r\n (works with both \n and \r\n devices)
        (KeyCode::Enter, _) => Some(b"\r\n".to_vec()),
        (KeyCode::Char(c), KeyModifiers::NONE | KeyModifiers::SHIFT) => {
            let mut buf = [0u8; 4];
            Some(c.encode_utf8(&mut buf).as_bytes().to_vec())
        },
        (KeyCode::Backspace, _) => Some(vec![0x08]),
        (KeyCode::Tab, _) => Some(vec![0x09]),
        (KeyCode::Esc, _) => Some(vec![0x1B]),
        _ => None,
    }
}

fn send(session: &Session, data: &[u8]) {
    if let Err(err) = session.write(data).wait() {
        warn!("Write failed: {err}");
    }
}

/// Keyboard loop in raw mode.
fn forward_keyboard(
    session: &Session,
    formatter: &SharedFormatter,
    running: &AtomicBool,
) -> Result<()> {
    terminal::enable_raw_mode().context("Failed to enable raw terminal mode")?;
    // Restores the terminal on every exit path, panics included
    let _raw_guard = RawModeGuard;

    while running.load(Ordering::Relaxed) {
        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        let event::Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        else {
            continue;
        };
        if kind == KeyEventKind::Release {
            continue;
        }

        match (code, modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                running.store(false, Ordering::Relaxed);
            },
            (KeyCode::Char('t'), KeyModifiers::CONTROL) => {
                let enabled = formatter
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .toggle_timestamp();
                let state = if enabled { "Timestamps on" } else { "Timestamps off" };
                let message = format!("{}{state}", status_symbol("⏱"));
                print_status_line(formatter, &message, true);
            },
            _ => {
                if let Some(bytes) = key_bytes(code, modifiers) {
                    send(session, &bytes);
                }
            },
        }
    }

    Ok(())
}

/// Forward piped stdin until Ctrl+C or the connection ends.
///
/// After EOF the monitor keeps printing device output.
fn forward_stdin(session: &Session, running: &AtomicBool) -> Result<()> {
    install_interrupt_handler()?;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    // Blocking stdin reads cannot be cancelled, so the reader is detached
    thread::Builder::new()
        .name("usblink-stdin".into())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    },
                }
            }
        })
        .context("Failed to spawn stdin reader")?;

    let mut stdin_open = true;
    while running.load(Ordering::Relaxed) && !was_interrupted() {
        if !stdin_open {
            thread::sleep(POLL_INTERVAL);
            continue;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => send(session, &chunk),
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => {
                debug!("stdin closed");
                stdin_open = false;
            },
        }
    }

    running.store(false, Ordering::Relaxed);
    Ok(())
}

/// Run the serial monitor on `device`.
///
/// Returns an error when the connection ends because the device was removed
/// or the read loop failed.
pub(crate) fn cmd_monitor(
    session: &Session,
    device: &str,
    baud: u32,
    timestamp: bool,
) -> Result<()> {
    let raw_mode = io::stdin().is_terminal() && io::stderr().is_terminal();
    let colored = io::stdout().is_terminal() && console::colors_enabled();
    let formatter = MonitorFormatter::new(timestamp, raw_mode, colored);
    let formatter: SharedFormatter = Arc::new(Mutex::new(formatter));

    let (tx, rx) = mpsc::channel::<Event>();
    session.set_event_sink(tx);
    session
        .connect(device, Some(baud))
        .wait()
        .with_context(|| format!("Failed to connect to {device}"))?;

    let baud = match session.state().wait()? {
        LinkState::Open { baud, .. } => baud,
        _ => baud,
    };
    print_status_line(
        &formatter,
        &format!(
            "{}Monitoring {} at {baud} baud",
            status_symbol("📡"),
            style(device).green()
        ),
        false,
    );
    if raw_mode {
        print_status_line(
            &formatter,
            &style("Ctrl+C to exit, Ctrl+T to toggle timestamps")
                .dim()
                .to_string(),
            false,
        );
    }

    let running = Arc::new(AtomicBool::new(true));
    let output = {
        let formatter = Arc::clone(&formatter);
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("usblink-output".into())
            .spawn(move || pump_events(&rx, &formatter, &running))
            .context("Failed to spawn output thread")?
    };

    let input = if raw_mode {
        forward_keyboard(session, &formatter, &running)
    } else {
        forward_stdin(session, &running)
    };

    running.store(false, Ordering::Relaxed);
    session.clear_event_sink();
    let _ = session.disconnect().wait();
    let ended = output.join().unwrap_or_default();
    input?;

    match ended {
        Some(Event::Detached { device_id }) => bail!("Device {device_id} was removed"),
        Some(Event::IoError { message }) => bail!("Connection lost: {message}"),
        _ => {
            let message = format!("{}Monitor closed", status_symbol("👋"));
            print_status_line(&formatter, &message, false);
            Ok(())
        },
    }
}

/// RAII guard to restore terminal mode on drop.
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}
