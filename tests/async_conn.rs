//! Non-blocking dispatch: correlation, cursor continuation, disconnect
//! draining, and the readiness-notifier contract.

use bson::{bson, doc};
use byteorder::{LittleEndian, WriteBytesExt};
use mongowire::wire_protocol::flags::OpQueryFlags;
use mongowire::{AsyncConnection, EventNotifier};
use std::cell::RefCell;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

mod support;
use support::{op_code, read_frame, reply_frame, request_id};

/// Interest bookkeeping for a fake event loop. `*_arms` counts actual
/// transitions; `redundant` counts calls that were already satisfied and
/// must therefore be no-ops.
#[derive(Default)]
struct NotifierState {
    reading: bool,
    writing: bool,
    read_arms: usize,
    write_arms: usize,
    redundant: usize,
    cleaned: bool,
}

struct RecordingNotifier(Rc<RefCell<NotifierState>>);

impl EventNotifier for RecordingNotifier {
    fn add_read(&mut self) {
        let mut state = self.0.borrow_mut();
        if state.reading {
            state.redundant += 1;
            return;
        }
        state.reading = true;
        state.read_arms += 1;
    }

    fn del_read(&mut self) {
        let mut state = self.0.borrow_mut();
        if !state.reading {
            state.redundant += 1;
            return;
        }
        state.reading = false;
    }

    fn add_write(&mut self) {
        let mut state = self.0.borrow_mut();
        if state.writing {
            state.redundant += 1;
            return;
        }
        state.writing = true;
        state.write_arms += 1;
    }

    fn del_write(&mut self) {
        let mut state = self.0.borrow_mut();
        if !state.writing {
            state.redundant += 1;
            return;
        }
        state.writing = false;
    }

    fn cleanup(&mut self) {
        let mut state = self.0.borrow_mut();
        state.reading = false;
        state.writing = false;
        state.cleaned = true;
    }
}

/// An async connection with its connect confirmed, the server end of the
/// socket, and the notifier state.
fn async_pair() -> (AsyncConnection, TcpStream, Rc<RefCell<NotifierState>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut conn = AsyncConnection::connect(&addr.ip().to_string(), addr.port()).unwrap();
    let (server, _) = listener.accept().unwrap();

    let state = Rc::new(RefCell::new(NotifierState::default()));
    conn.attach(Box::new(RecordingNotifier(state.clone())))
        .unwrap();

    let connected = Rc::new(RefCell::new(false));
    {
        let connected = connected.clone();
        conn.set_connect_callback(move |_, status| {
            assert!(status.is_ok());
            *connected.borrow_mut() = true;
        })
        .unwrap();
    }

    // Stand in for the event loop: report writability until the connect
    // detection runs.
    for _ in 0..100 {
        conn.handle_write();
        if conn.is_connected() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(conn.is_connected());
    assert!(*connected.borrow());

    (conn, server, state)
}

fn flush(conn: &mut AsyncConnection) {
    for _ in 0..200 {
        conn.handle_write();
        if conn.connection().pending_output().is_empty() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("output buffer failed to drain");
}

fn pump_until(conn: &mut AsyncConnection, mut cond: impl FnMut(&AsyncConnection) -> bool) {
    for _ in 0..200 {
        conn.handle_read();
        if cond(conn) {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached while pumping the connection");
}

#[test]
fn replies_dispatch_by_response_to() {
    let (mut conn, mut server, _state) = async_pair();
    let log: Rc<RefCell<Vec<(i32, i32)>>> = Rc::new(RefCell::new(Vec::new()));

    let record = |tag: i32, log: &Rc<RefCell<Vec<(i32, i32)>>>| {
        let log = log.clone();
        move |_conn: &mut AsyncConnection, reply: Option<mongowire::Reply>| {
            let reply = reply.expect("reply expected");
            log.borrow_mut().push((tag, reply.documents[0].get_i32("n").unwrap()));
        }
    };

    let id1 = conn
        .query(OpQueryFlags::no_flags(), "db", "a", 0, 1, &doc! {}, None, record(1, &log))
        .unwrap();
    let id2 = conn
        .query(OpQueryFlags::no_flags(), "db", "b", 0, 1, &doc! {}, None, record(2, &log))
        .unwrap();
    assert_eq!(conn.pending_callbacks(), 2);
    flush(&mut conn);

    let frame1 = read_frame(&mut server).unwrap();
    let frame2 = read_frame(&mut server).unwrap();
    assert_eq!(request_id(&frame1), id1);
    assert_eq!(request_id(&frame2), id2);

    // Answer out of order; correlation must still hold.
    server
        .write_all(&reply_frame(id2, 0, 0, &[doc! { "n": 2 }]))
        .unwrap();
    server
        .write_all(&reply_frame(id1, 0, 0, &[doc! { "n": 1 }]))
        .unwrap();

    pump_until(&mut conn, |conn| conn.pending_callbacks() == 0);
    assert_eq!(*log.borrow(), vec![(2, 2), (1, 1)]);
    assert!(conn.is_connected());
}

#[test]
fn exhaust_stream_keeps_callback_until_cursor_zero() {
    let (mut conn, mut server, _state) = async_pair();
    let cursors: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::new()));

    {
        let cursors = cursors.clone();
        conn.query(
            OpQueryFlags::EXHAUST,
            "db",
            "coll",
            0,
            0,
            &doc! {},
            None,
            move |_conn, reply| {
                cursors.borrow_mut().push(reply.expect("reply expected").cursor_id);
            },
        )
        .unwrap();
    }
    flush(&mut conn);

    let frame = read_frame(&mut server).unwrap();
    let id = request_id(&frame);

    // The server streams three unsolicited batches for one request.
    for &cursor_id in &[7i64, 7, 0] {
        server
            .write_all(&reply_frame(id, 0, cursor_id, &[doc! { "x": 1 }]))
            .unwrap();
    }

    pump_until(&mut conn, |_| cursors.borrow().len() == 3);
    assert_eq!(*cursors.borrow(), vec![7, 7, 0]);

    // The final batch removed the registration.
    assert_eq!(conn.pending_callbacks(), 0);
    assert!(conn.is_connected());
}

#[test]
fn eof_drains_pending_callbacks_in_order() {
    let (mut conn, mut server, state) = async_pair();
    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        conn.set_disconnect_callback(move |_, status| {
            assert!(status.is_err());
            log.borrow_mut().push("disconnect".to_owned());
        })
        .unwrap();
    }

    for tag in 1..=3 {
        let log = log.clone();
        conn.query(
            OpQueryFlags::no_flags(),
            "db",
            "coll",
            0,
            1,
            &doc! { "tag": tag },
            None,
            move |_conn, reply| {
                assert!(reply.is_none());
                log.borrow_mut().push(format!("null{}", tag));
            },
        )
        .unwrap();
    }
    flush(&mut conn);

    for _ in 0..3 {
        read_frame(&mut server).unwrap();
    }
    drop(server);

    pump_until(&mut conn, |conn| conn.is_closed());

    // Every pending callback ran exactly once with no reply, in
    // registration order, before the disconnect hook fired.
    assert_eq!(
        *log.borrow(),
        vec![
            "null1".to_owned(),
            "null2".to_owned(),
            "null3".to_owned(),
            "disconnect".to_owned()
        ]
    );
    assert_eq!(conn.pending_callbacks(), 0);
    assert!(state.borrow().cleaned);
}

#[test]
fn malformed_frame_disconnects_and_drains() {
    let (mut conn, mut server, state) = async_pair();
    let outcomes: Rc<RefCell<Vec<bool>>> = Rc::new(RefCell::new(Vec::new()));
    let failed = Rc::new(RefCell::new(false));

    {
        let failed = failed.clone();
        conn.set_disconnect_callback(move |_, status| {
            *failed.borrow_mut() = status.is_err();
        })
        .unwrap();
    }
    {
        let outcomes = outcomes.clone();
        conn.query(
            OpQueryFlags::no_flags(),
            "db",
            "coll",
            0,
            1,
            &doc! {},
            None,
            move |_conn, reply| {
                outcomes.borrow_mut().push(reply.is_some());
            },
        )
        .unwrap();
    }
    flush(&mut conn);
    read_frame(&mut server).unwrap();

    // A frame with opcode 42 in place of OP_REPLY.
    let mut frame = Vec::new();
    frame.write_i32::<LittleEndian>(36).unwrap();
    frame.write_i32::<LittleEndian>(90).unwrap();
    frame.write_i32::<LittleEndian>(1).unwrap();
    frame.write_i32::<LittleEndian>(42).unwrap();
    frame.write_i32::<LittleEndian>(0).unwrap();
    frame.write_i64::<LittleEndian>(0).unwrap();
    frame.write_i32::<LittleEndian>(0).unwrap();
    frame.write_i32::<LittleEndian>(0).unwrap();
    server.write_all(&frame).unwrap();

    pump_until(&mut conn, |conn| conn.is_closed());

    assert_eq!(*outcomes.borrow(), vec![false]);
    assert!(*failed.borrow());
    assert!(state.borrow().cleaned);
}

#[test]
fn clean_disconnect_reports_ok() {
    let (mut conn, mut server, state) = async_pair();
    let status_log: Rc<RefCell<Vec<bool>>> = Rc::new(RefCell::new(Vec::new()));
    let got_reply = Rc::new(RefCell::new(false));

    {
        let status_log = status_log.clone();
        conn.set_disconnect_callback(move |_, status| {
            status_log.borrow_mut().push(status.is_ok());
        })
        .unwrap();
    }
    {
        let got_reply = got_reply.clone();
        conn.query(
            OpQueryFlags::no_flags(),
            "db",
            "coll",
            0,
            1,
            &doc! {},
            None,
            move |_conn, reply| {
                *got_reply.borrow_mut() = reply.is_some();
            },
        )
        .unwrap();
    }

    // Disconnect with work still in flight: the request must be flushed
    // and its reply delivered before the teardown completes.
    conn.disconnect();
    assert!(!conn.is_closed());

    // New requests are refused while draining.
    assert!(conn
        .query(OpQueryFlags::no_flags(), "db", "x", 0, 1, &doc! {}, None, |_, _| {})
        .is_err());

    flush(&mut conn);
    let frame = read_frame(&mut server).unwrap();
    server
        .write_all(&reply_frame(request_id(&frame), 0, 0, &[doc! { "ok": 1.0 }]))
        .unwrap();

    pump_until(&mut conn, |conn| conn.is_closed());

    assert!(*got_reply.borrow());
    assert_eq!(*status_log.borrow(), vec![true]);
    assert!(state.borrow().cleaned);
}

#[test]
fn shutdown_inside_callback_is_deferred() {
    let (mut conn, mut server, _state) = async_pair();
    let finished = Rc::new(RefCell::new(false));

    {
        let finished = finished.clone();
        conn.set_disconnect_callback(move |_, status| {
            assert!(status.is_ok());
            *finished.borrow_mut() = true;
        })
        .unwrap();
    }
    conn.query(
        OpQueryFlags::no_flags(),
        "db",
        "coll",
        0,
        1,
        &doc! {},
        None,
        |conn, reply| {
            assert!(reply.is_some());
            // Tear down the connection from inside its own dispatcher.
            conn.shutdown();
        },
    )
    .unwrap();
    flush(&mut conn);

    let frame = read_frame(&mut server).unwrap();
    server
        .write_all(&reply_frame(request_id(&frame), 0, 0, &[doc! { "ok": 1.0 }]))
        .unwrap();

    pump_until(&mut conn, |conn| conn.is_closed());
    assert!(*finished.borrow());
}

#[test]
fn callback_can_issue_get_more() {
    let (mut conn, mut server, _state) = async_pair();
    let batches: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::new()));

    {
        let batches = batches.clone();
        conn.query(
            OpQueryFlags::no_flags(),
            "db",
            "coll",
            0,
            2,
            &doc! {},
            None,
            move |conn, reply| {
                // The registration outlives the replies it consumes while
                // the cursor is live; tolerate the drain at teardown.
                let reply = match reply {
                    Some(reply) => reply,
                    None => return,
                };
                batches.borrow_mut().push(reply.cursor_id);
                if reply.cursor_id != 0 {
                    let batches = batches.clone();
                    conn.get_more("db", "coll", 2, reply.cursor_id, move |_conn, reply| {
                        batches
                            .borrow_mut()
                            .push(reply.expect("reply expected").cursor_id);
                    })
                    .unwrap();
                }
            },
        )
        .unwrap();
    }
    flush(&mut conn);

    let query = read_frame(&mut server).unwrap();
    server
        .write_all(&reply_frame(request_id(&query), 0, 55, &[doc! { "i": 0 }]))
        .unwrap();

    // The first callback queues a get-more; push it to the server.
    pump_until(&mut conn, |_| batches.borrow().len() == 1);
    flush(&mut conn);

    let get_more = read_frame(&mut server).unwrap();
    assert_eq!(op_code(&get_more), 2005);
    server
        .write_all(&reply_frame(request_id(&get_more), 0, 0, &[doc! { "i": 1 }]))
        .unwrap();

    pump_until(&mut conn, |_| batches.borrow().len() == 2);
    assert_eq!(*batches.borrow(), vec![55, 0]);

    // The originating query's callback stays registered while its cursor
    // is live; the completed get-more entry is gone.
    assert_eq!(conn.pending_callbacks(), 1);

    // A live-cursor registration never completes on its own; only an
    // immediate teardown releases it.
    conn.shutdown();
    assert!(conn.is_closed());
    assert_eq!(conn.pending_callbacks(), 0);
}

#[test]
fn unmatched_reply_is_ignored() {
    let (mut conn, mut server, _state) = async_pair();

    server
        .write_all(&reply_frame(9999, 0, 0, &[doc! { "ok": 1.0 }]))
        .unwrap();

    // Give the reply time to arrive, then pump it through the dispatcher.
    thread::sleep(Duration::from_millis(30));
    for _ in 0..5 {
        conn.handle_read();
    }

    assert!(conn.is_connected());
    assert_eq!(conn.pending_callbacks(), 0);
}

#[test]
fn read_interest_arms_once() {
    let (mut conn, mut server, state) = async_pair();

    conn.query(
        OpQueryFlags::no_flags(),
        "db",
        "coll",
        0,
        1,
        &doc! {},
        None,
        |_conn, _reply| {},
    )
    .unwrap();
    flush(&mut conn);

    let frame = read_frame(&mut server).unwrap();
    server
        .write_all(&reply_frame(request_id(&frame), 0, 0, &[doc! { "ok": 1.0 }]))
        .unwrap();
    pump_until(&mut conn, |conn| conn.pending_callbacks() == 0);

    // The dispatcher re-requests read interest on every wake-up; an
    // idempotent notifier turns all but the first into no-ops.
    let state = state.borrow();
    assert_eq!(state.read_arms, 1);
    assert!(state.redundant > 0);
    assert!(state.reading);
}
