//! Session behaviour against the in-memory host.

use std::io;
use std::sync::mpsc::{Receiver, channel};
use std::thread;
use std::time::{Duration, Instant};

use usblink::host::memory::VirtualDevice;
use usblink::{
    DeviceDescriptor, Error, Event, LineConfig, LinkState, MemoryHost, Session, SessionConfig,
};

const TIMEOUT: Duration = Duration::from_secs(2);

fn ch340(id: &str) -> VirtualDevice {
    let descriptor = DeviceDescriptor::new(id, 0x1A86, 0x7523)
        .with_product("USB Serial");
    VirtualDevice::new(descriptor)
}

fn cp2102(id: &str) -> VirtualDevice {
    let descriptor = DeviceDescriptor::new(id, 0x10C4, 0xEA60)
        .with_product("CP2102 USB to UART Bridge");
    VirtualDevice::new(descriptor)
}

fn start(host: &MemoryHost) -> (Session, Receiver<Event>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = SessionConfig::default().with_read_timeout(Duration::from_millis(10));
    let session = Session::start(host.clone(), config).unwrap();
    let (tx, rx) = channel();
    session.set_event_sink(tx);
    (session, rx)
}

fn state(session: &Session) -> LinkState {
    session.state().wait().unwrap()
}

fn wait_for_state(session: &Session, expected: &LinkState) {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if state(session) == *expected {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("session never reached {expected:?}");
}

fn assert_nothing_open(host: &MemoryHost) {
    assert_eq!(host.open_handles(), 0, "leaked device handle");
    assert_eq!(host.open_ports(), 0, "leaked port");
}

#[test]
fn test_connect_configures_line_and_writes() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    let (session, _events) = start(&host);

    session.connect("ttyUSB0", Some(9600)).wait().unwrap();

    assert_eq!(host.line_config("ttyUSB0"), Some(LineConfig::new(9600)));
    assert_eq!(host.rts("ttyUSB0"), Some(false));
    assert_eq!(host.dtr("ttyUSB0"), Some(true));

    session.write(&[0x01, 0x02]).wait().unwrap();
    assert_eq!(host.written("ttyUSB0"), vec![0x01, 0x02]);
    assert_eq!(
        state(&session),
        LinkState::Open {
            device_id: "ttyUSB0".into(),
            baud: 9600,
        }
    );
}

#[test]
fn test_permission_denied_leaves_no_connection() {
    let host = MemoryHost::new();
    host.attach(cp2102("ttyUSB1").requiring_permission());
    let (session, _events) = start(&host);

    let pending = session.connect("ttyUSB1", Some(115200));
    assert!(host.wait_for_prompt("ttyUSB1", TIMEOUT));
    assert!(pending.try_take().is_none());

    assert!(host.answer_permission("ttyUSB1", false));
    assert!(matches!(
        pending.wait(),
        Err(Error::PermissionDenied(id)) if id == "ttyUSB1"
    ));
    assert_eq!(state(&session), LinkState::Idle);
    assert_nothing_open(&host);
}

#[test]
fn test_permission_granted_opens_connection() {
    let host = MemoryHost::new();
    host.attach(cp2102("ttyUSB1").requiring_permission());
    let (session, _events) = start(&host);

    let pending = session.connect("ttyUSB1", Some(115200));
    assert!(host.wait_for_prompt("ttyUSB1", TIMEOUT));
    assert_eq!(
        state(&session),
        LinkState::AwaitingPermission {
            device_id: "ttyUSB1".into(),
            baud: 115200,
        }
    );

    host.answer_permission("ttyUSB1", true);
    pending.wait().unwrap();
    assert!(state(&session).is_open());
    assert_eq!(host.line_config("ttyUSB1"), Some(LineConfig::new(115200)));

    // Access is remembered, so reconnecting does not prompt again.
    session.connect("ttyUSB1", Some(115200)).wait().unwrap();
    assert_eq!(host.permission_requests(), 1);
}

#[test]
fn test_second_connect_while_awaiting_permission_is_busy() {
    let host = MemoryHost::new();
    host.attach(cp2102("ttyUSB1").requiring_permission());
    host.attach(ch340("ttyUSB0"));
    let (session, _events) = start(&host);

    let first = session.connect("ttyUSB1", Some(115200));
    let second = session.connect("ttyUSB1", Some(115200));
    let other = session.connect("ttyUSB0", Some(9600));

    assert!(matches!(second.wait(), Err(Error::Busy(_))));
    assert!(matches!(other.wait(), Err(Error::Busy(_))));
    assert!(first.try_take().is_none());
    assert_eq!(host.permission_requests(), 1);

    host.answer_permission("ttyUSB1", true);
    first.wait().unwrap();
}

#[test]
fn test_detach_while_awaiting_permission() {
    let host = MemoryHost::new();
    host.attach(cp2102("ttyUSB1").requiring_permission());
    let (session, events) = start(&host);

    let pending = session.connect("ttyUSB1", None);
    assert!(host.wait_for_prompt("ttyUSB1", TIMEOUT));
    assert!(host.detach("ttyUSB1"));

    assert!(matches!(
        pending.wait(),
        Err(Error::DeviceDetached(id)) if id == "ttyUSB1"
    ));
    assert_eq!(state(&session), LinkState::Idle);

    // The dialog is answered after the device is gone.
    assert!(host.answer_permission("ttyUSB1", true));
    assert_eq!(state(&session), LinkState::Idle);
    assert_nothing_open(&host);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_detach_of_connected_device_tears_down_once() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    let (session, events) = start(&host);

    session.connect("ttyUSB0", Some(9600)).wait().unwrap();
    assert!(host.detach("ttyUSB0"));

    assert_eq!(
        events.recv_timeout(TIMEOUT),
        Ok(Event::Detached {
            device_id: "ttyUSB0".into()
        })
    );
    assert_eq!(state(&session), LinkState::Idle);
    assert_nothing_open(&host);

    // Same device id coming and going again without a connection.
    host.attach(ch340("ttyUSB0"));
    assert!(host.detach("ttyUSB0"));
    assert_eq!(state(&session), LinkState::Idle);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_unplug_mid_read_reports_removal_only() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    let (session, events) = start(&host);

    session.connect("ttyUSB0", Some(9600)).wait().unwrap();
    host.push_read("ttyUSB0", b"boot");
    assert_eq!(
        events.recv_timeout(TIMEOUT),
        Ok(Event::Data(b"boot".to_vec()))
    );

    // The pending read fails and the hot-plug notice follows; either may be
    // handled first.
    assert!(host.detach("ttyUSB0"));
    assert_eq!(
        events.recv_timeout(TIMEOUT),
        Ok(Event::Detached {
            device_id: "ttyUSB0".into()
        })
    );
    wait_for_state(&session, &LinkState::Idle);
    thread::sleep(Duration::from_millis(50));
    assert!(events.try_recv().is_err());
    assert_nothing_open(&host);
}

#[test]
fn test_detach_of_other_device_is_ignored() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    host.attach(cp2102("ttyUSB1"));
    let (session, events) = start(&host);

    session.connect("ttyUSB0", None).wait().unwrap();
    host.detach("ttyUSB1");

    assert!(state(&session).is_open());
    assert!(events.try_recv().is_err());
}

#[test]
fn test_disconnect_is_idempotent() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    let (session, _events) = start(&host);

    session.disconnect().wait().unwrap();
    session.connect("ttyUSB0", None).wait().unwrap();
    session.disconnect().wait().unwrap();
    session.disconnect().wait().unwrap();

    assert_eq!(state(&session), LinkState::Idle);
    assert_nothing_open(&host);
}

#[test]
fn test_write_without_connection() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    let (session, _events) = start(&host);

    assert!(matches!(
        session.write(b"hi").wait(),
        Err(Error::NotConnected)
    ));
    assert!(host.written("ttyUSB0").is_empty());
}

#[test]
fn test_failed_connects_release_everything() {
    let host = MemoryHost::new();
    host.attach(ch340("no-driver").without_driver());
    host.attach(ch340("refuses").refusing_open());
    host.attach(ch340("port-busy").with_busy_port());
    host.attach(ch340("no-port").with_port_count(0));
    host.attach(ch340("bad-baud").failing_configuration());
    let (session, _events) = start(&host);

    assert!(matches!(
        session.connect("missing", None).wait(),
        Err(Error::DeviceMissing(_))
    ));
    assert!(matches!(
        session.connect("no-driver", None).wait(),
        Err(Error::DriverMissing(_))
    ));
    assert!(matches!(
        session.connect("refuses", None).wait(),
        Err(Error::OpenFailed { .. })
    ));
    assert!(matches!(
        session.connect("port-busy", None).wait(),
        Err(Error::OpenFailed { device, .. }) if device == "port-busy"
    ));
    assert!(matches!(
        session.connect("no-port", None).wait(),
        Err(Error::PortMissing(_))
    ));
    assert!(matches!(
        session.connect("bad-baud", None).wait(),
        Err(Error::ConnectFailed(_))
    ));

    assert_eq!(state(&session), LinkState::Idle);
    assert_nothing_open(&host);
}

#[test]
fn test_invalid_arguments() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    let (session, _events) = start(&host);

    let empty = session.connect("", None).wait();
    assert_eq!(empty.unwrap_err().code(), "usb_invalid_argument");
    assert!(matches!(
        session.connect("ttyUSB0", Some(0)).wait(),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_connect_replaces_previous_connection() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    host.attach(cp2102("ttyUSB1"));
    let (session, _events) = start(&host);

    session.connect("ttyUSB0", Some(9600)).wait().unwrap();
    session.connect("ttyUSB1", Some(57600)).wait().unwrap();

    assert_eq!(host.open_handles(), 1);
    assert_eq!(host.open_ports(), 1);
    assert_eq!(state(&session).device_id(), Some("ttyUSB1"));

    // A failed connect still closes the previous connection first.
    assert!(session.connect("missing", None).wait().is_err());
    assert_nothing_open(&host);
}

#[test]
fn test_received_bytes_reach_sink_in_order() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    let (session, events) = start(&host);

    session.connect("ttyUSB0", None).wait().unwrap();
    host.push_read("ttyUSB0", b"hello");
    host.push_read("ttyUSB0", b"world");

    assert_eq!(
        events.recv_timeout(TIMEOUT),
        Ok(Event::Data(b"hello".to_vec()))
    );
    assert_eq!(
        events.recv_timeout(TIMEOUT),
        Ok(Event::Data(b"world".to_vec()))
    );
}

#[test]
fn test_read_failure_closes_connection() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    let (session, events) = start(&host);

    session.connect("ttyUSB0", None).wait().unwrap();
    host.push_read_error("ttyUSB0", io::ErrorKind::BrokenPipe, "endpoint stalled");

    match events.recv_timeout(TIMEOUT) {
        Ok(event @ Event::IoError { .. }) => assert_eq!(event.code(), "usb_io_error"),
        other => panic!("expected an I/O error event, got {other:?}"),
    }
    wait_for_state(&session, &LinkState::Idle);
    assert_nothing_open(&host);
}

#[test]
fn test_write_failure_keeps_connection() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    let (session, _events) = start(&host);

    session.connect("ttyUSB0", None).wait().unwrap();
    host.set_fail_writes("ttyUSB0", true);
    assert!(matches!(
        session.write(b"x").wait(),
        Err(Error::WriteFailed(_))
    ));
    assert!(state(&session).is_open());

    host.set_fail_writes("ttyUSB0", false);
    session.write(b"y").wait().unwrap();
    assert_eq!(host.written("ttyUSB0"), b"y".to_vec());
}

#[test]
fn test_cleared_sink_receives_nothing() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    let (session, events) = start(&host);

    session.connect("ttyUSB0", None).wait().unwrap();
    session.clear_event_sink();
    host.push_read("ttyUSB0", b"dropped");
    thread::sleep(Duration::from_millis(50));

    assert!(events.try_recv().is_err());
}

#[test]
fn test_operations_after_enumeration_failure() {
    let host = MemoryHost::new();
    host.attach(ch340("ttyUSB0"));
    let (session, _events) = start(&host);

    host.set_enumeration_fails(true);
    assert!(session.list_devices().is_empty());
    assert!(matches!(
        session.connect("ttyUSB0", None).wait(),
        Err(Error::DeviceMissing(_))
    ));

    host.set_enumeration_fails(false);
    assert_eq!(session.list_devices().len(), 1);
}
