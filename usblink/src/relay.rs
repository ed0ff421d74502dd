//! I/O relay: the background read loop of an active connection.

use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use log::{debug, trace, warn};

use crate::error::Result;
use crate::event::{Event, SinkSlot};
use crate::manager::Command;
use crate::port::PortReader;

/// Read loop bound to one connection.
///
/// The loop relies on the reader's timeout to notice a stop request, so
/// [`stop`](Self::stop) returns within roughly one read timeout.
pub(crate) struct IoRelay {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IoRelay {
    /// Spawn the read loop for connection `generation`.
    pub(crate) fn start(
        reader: PortReader,
        device_id: &str,
        generation: u64,
        buffer_size: usize,
        sink: SinkSlot,
        tx: Sender<Command>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let loop_running = Arc::clone(&running);
        let device_id = device_id.to_string();

        let handle = thread::Builder::new()
            .name(format!("usblink-relay-{generation}"))
            .spawn(move || {
                read_loop(
                    reader,
                    &device_id,
                    generation,
                    buffer_size.max(1),
                    &loop_running,
                    &sink,
                    &tx,
                );
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Stop the loop and wait for it to exit. Idempotent.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("I/O relay thread panicked");
            }
        }
    }
}

impl Drop for IoRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read outcomes that just mean "nothing yet".
fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

fn read_loop(
    mut reader: PortReader,
    device_id: &str,
    generation: u64,
    buffer_size: usize,
    running: &AtomicBool,
    sink: &SinkSlot,
    tx: &Sender<Command>,
) {
    debug!("I/O relay started for {device_id} (connection {generation})");
    let mut buf = vec![0u8; buffer_size];

    while running.load(Ordering::Acquire) {
        match reader.read(&mut buf) {
            Ok(0) => {},
            Ok(n) => {
                trace!("Received {n} bytes from {device_id}");
                sink.emit(Event::Data(buf[..n].to_vec()));
            },
            Err(e) if is_transient(e.kind()) => {},
            Err(e) => {
                // A stop raced with the error: teardown is already underway.
                if !running.load(Ordering::Acquire) {
                    break;
                }
                // The worker decides how the failure is reported
                warn!("Read from {device_id} failed: {e}");
                let _ = tx.send(Command::RelayFailed {
                    generation,
                    message: e.to_string(),
                });
                break;
            },
        }
    }

    debug!("I/O relay stopped for {device_id} (connection {generation})");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{self, Read};
    use std::sync::Mutex;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    /// Replays scripted read results, then times out forever.
    struct ScriptedReader {
        script: VecDeque<io::Result<Vec<u8>>>,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                },
                Some(Err(e)) => Err(e),
                None => {
                    thread::sleep(Duration::from_millis(5));
                    Err(io::Error::new(ErrorKind::TimedOut, "no data"))
                },
            }
        }
    }

    fn collecting_sink() -> (SinkSlot, Arc<Mutex<Vec<Event>>>) {
        let slot = SinkSlot::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_sink = Arc::clone(&seen);
        slot.set(Arc::new(move |event: Event| {
            seen_sink.lock().unwrap().push(event);
        }));
        (slot, seen)
    }

    fn wait_for(seen: &Mutex<Vec<Event>>, count: usize) {
        for _ in 0..200 {
            if seen.lock().unwrap().len() >= count {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for {count} events");
    }

    #[test]
    fn test_chunks_forwarded_whole_and_in_order() {
        let reader = ScriptedReader {
            script: VecDeque::from([
                Ok(vec![1, 2, 3]),
                Err(io::Error::new(ErrorKind::TimedOut, "idle")),
                Ok(vec![]),
                Ok(vec![4]),
            ]),
        };
        let (sink, seen) = collecting_sink();
        let (tx, rx) = channel();

        let mut relay = IoRelay::start(Box::new(reader), "ttyUSB0", 1, 64, sink, tx)
            .unwrap();
        wait_for(&seen, 2);
        relay.stop();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Event::Data(vec![1, 2, 3]), Event::Data(vec![4])]
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fatal_error_posts_failure_without_event() {
        let failure = io::Error::new(ErrorKind::BrokenPipe, "cable pulled");
        let reader = ScriptedReader {
            script: VecDeque::from([Err(failure)]),
        };
        let (sink, seen) = collecting_sink();
        let (tx, rx) = channel();

        let _relay = IoRelay::start(Box::new(reader), "ttyUSB0", 7, 64, sink, tx)
            .unwrap();

        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(Command::RelayFailed {
                generation,
                message,
            }) => {
                assert_eq!(generation, 7);
                assert!(message.contains("cable pulled"));
            },
            _ => panic!("expected a relay failure"),
        }
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let reader = ScriptedReader {
            script: VecDeque::new(),
        };
        let (tx, _rx) = channel();
        let sink = SinkSlot::default();
        let mut relay = IoRelay::start(Box::new(reader), "ttyUSB0", 1, 16, sink, tx)
            .unwrap();
        relay.stop();
        relay.stop();
    }
}
