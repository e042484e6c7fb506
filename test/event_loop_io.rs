//! Event Loop I/O Tests
//!
//! End-to-end transfers through pipes and sockets driven by the event loop:
//! partial transfers, ordering, cancellation, timers and connects.

use evio::buffer::ByteBuffer;
use evio::config::{RuntimeConfig, SelectorBackend};
use evio::runtime::async_io::{AsyncPipe, AsyncSocket, Endpoint, EventLoop, SocketState};
use evio::Error;
use std::cell::RefCell;
use std::io;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Loops for every available selector backend
fn loops() -> Vec<EventLoop> {
    init_tracing();
    let mut loops = vec![EventLoop::new().unwrap()];
    if cfg!(target_os = "linux") {
        let mut config = RuntimeConfig::default();
        config.selector.backend = SelectorBackend::Epoll;
        config.event_loop.poll_timeout_ms = 20;
        loops.push(EventLoop::with_config(config).unwrap());
    }
    loops
}

fn temp_socket_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("evio-{}-{}.sock", name, std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ============================================================================
// Pipe transfers
// ============================================================================

#[test]
fn test_pipe_round_trip() {
    for event_loop in loops() {
        let pipe = AsyncPipe::new(&event_loop).unwrap();

        let mut out = ByteBuffer::with_capacity(16);
        out.write(b"hello, world").unwrap();
        out.flip();
        let mut sent = pipe.writer().async_write_all(out).unwrap();
        let mut received = pipe
            .reader()
            .async_read(ByteBuffer::with_capacity(32), 12)
            .unwrap();

        event_loop.run_until(&received).unwrap();
        let mut buffer = received.take_result().unwrap().unwrap();
        assert_eq!(buffer.position(), 12);
        buffer.flip();
        assert_eq!(buffer.view_remaining().as_slice(), b"hello, world");

        let written = sent.take_result().unwrap().unwrap();
        assert_eq!(written.remaining(), 0);
        assert!(!event_loop.has_work());
    }
}

#[test]
fn test_large_transfer_completes_through_partial_writes() {
    const LEN: usize = 1 << 20;
    for event_loop in loops() {
        let pipe = AsyncPipe::new(&event_loop).unwrap();
        let data = pattern(LEN);

        let mut sent = pipe
            .writer()
            .async_write_all(ByteBuffer::from_vec(data.clone()))
            .unwrap();
        let mut received = pipe
            .reader()
            .async_read_full(ByteBuffer::with_capacity(LEN))
            .unwrap();

        event_loop.run_until(&received).unwrap();
        event_loop.run_until(&sent).unwrap();
        assert!(event_loop.stats().iterations > 1);

        let buffer = received.take_result().unwrap().unwrap();
        assert_eq!(buffer.view_written().as_slice(), &data[..]);
        assert!(sent.take_result().unwrap().is_ok());
    }
}

#[test]
fn test_continuations_chain_reads() {
    for event_loop in loops() {
        let pipe = Rc::new(AsyncPipe::new(&event_loop).unwrap());

        let mut frame = ByteBuffer::with_capacity(9);
        frame.write_le(5u32).unwrap();
        frame.write(b"abcde").unwrap();
        frame.flip();
        pipe.writer().async_write_all(frame).unwrap();

        // A second write on the same channel is refused while one is pending
        let err = pipe
            .writer()
            .async_write_all(ByteBuffer::copy_from(b"more"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let reader = Rc::clone(&pipe);
        let mut body = pipe
            .reader()
            .async_read(ByteBuffer::with_capacity(4), 4)
            .unwrap()
            .flat_map(move |mut len| {
                len.flip();
                let n = len.read_le::<u32>().unwrap() as usize;
                reader
                    .reader()
                    .async_read(ByteBuffer::with_capacity(n), n)
                    .unwrap()
            });

        event_loop.run_until(&body).unwrap();
        let buffer = body.take_result().unwrap().unwrap();
        assert_eq!(buffer.view_written().as_slice(), b"abcde");
    }
}

#[test]
fn test_observers_run_in_order_on_loop() {
    let event_loop = EventLoop::new().unwrap();
    let pipe = AsyncPipe::new(&event_loop).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));

    let received = pipe
        .reader()
        .async_read(ByteBuffer::with_capacity(1), 1)
        .unwrap();
    for i in 0..3 {
        let log = Rc::clone(&log);
        received.observe(move |r| {
            assert!(r.is_ok());
            log.borrow_mut().push(i);
        });
    }
    pipe.writer()
        .async_write_all(ByteBuffer::copy_from(b"x"))
        .unwrap();

    assert!(log.borrow().is_empty());
    event_loop.run_until(&received).unwrap();
    assert_eq!(*log.borrow(), vec![0, 1, 2]);
}

// ============================================================================
// Argument and state errors
// ============================================================================

#[test]
fn test_short_buffer_is_invalid_argument() {
    let event_loop = EventLoop::new().unwrap();
    let pipe = AsyncPipe::new(&event_loop).unwrap();

    let err = pipe
        .reader()
        .async_read(ByteBuffer::with_capacity(3), 4)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = pipe
        .writer()
        .async_write(ByteBuffer::copy_from(b"ab"), 3)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(!event_loop.has_work());
}

#[test]
fn test_concurrent_read_is_invalid_state() {
    let event_loop = EventLoop::new().unwrap();
    let pipe = AsyncPipe::new(&event_loop).unwrap();

    let mut first = pipe
        .reader()
        .async_read(ByteBuffer::with_capacity(2), 2)
        .unwrap();
    let err = pipe
        .reader()
        .async_read(ByteBuffer::with_capacity(2), 2)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert_eq!(event_loop.stats().pending.reads, 1);

    pipe.writer()
        .async_write_all(ByteBuffer::copy_from(b"ok"))
        .unwrap();
    event_loop.run_until(&first).unwrap();
    assert_eq!(
        first.take_result().unwrap().unwrap().view_written().as_slice(),
        b"ok"
    );
}

#[test]
fn test_eof_before_completion() {
    for event_loop in loops() {
        let (reader, writer) = AsyncPipe::new(&event_loop).unwrap().into_split();
        let mut received = reader
            .async_read(ByteBuffer::with_capacity(8), 8)
            .unwrap();
        writer
            .async_write_all(ByteBuffer::copy_from(b"abc"))
            .unwrap();

        event_loop.run_for(Duration::from_millis(20)).unwrap();
        assert!(!received.is_settled());
        writer.close();

        event_loop.run_until(&received).unwrap();
        let err = received.take_result().unwrap().unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::UnexpectedEof));
    }
}

#[test]
fn test_write_to_closed_pipe_fails() {
    let event_loop = EventLoop::new().unwrap();
    let (reader, writer) = AsyncPipe::new(&event_loop).unwrap().into_split();
    drop(reader);

    let mut sent = writer
        .async_write_all(ByteBuffer::copy_from(b"lost"))
        .unwrap();
    event_loop.run_until(&sent).unwrap();
    let err = sent.take_result().unwrap().unwrap_err();
    assert_eq!(err.io_kind(), Some(io::ErrorKind::BrokenPipe));
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn test_cancel_fails_pending() {
    for event_loop in loops() {
        let pipe = AsyncPipe::new(&event_loop).unwrap();
        let mut received = pipe
            .reader()
            .async_read(ByteBuffer::with_capacity(4), 4)
            .unwrap();
        assert_eq!(event_loop.stats().registered_fds, 1);

        pipe.reader().cancel();
        assert!(received.take_result().unwrap().unwrap_err().is_cancelled());
        assert_eq!(event_loop.stats().registered_fds, 0);

        // The channel stays usable
        let mut again = pipe
            .reader()
            .async_read(ByteBuffer::with_capacity(1), 1)
            .unwrap();
        pipe.writer()
            .async_write_all(ByteBuffer::copy_from(b"z"))
            .unwrap();
        event_loop.run_until(&again).unwrap();
        assert!(again.take_result().unwrap().is_ok());
    }
}

#[test]
fn test_cancel_from_continuation() {
    let event_loop = EventLoop::new().unwrap();
    let pipe = Rc::new(AsyncPipe::new(&event_loop).unwrap());
    let mut pending = pipe
        .reader()
        .async_read(ByteBuffer::with_capacity(4), 4)
        .unwrap();

    let (_, tick) = event_loop.schedule(Duration::from_millis(1));
    let target = Rc::clone(&pipe);
    tick.on_complete(move |_| target.reader().cancel());

    event_loop.run_until(&pending).unwrap();
    assert!(pending.take_result().unwrap().unwrap_err().is_cancelled());
}

// ============================================================================
// Timers
// ============================================================================

#[test]
fn test_timers_fire_in_deadline_order() {
    let event_loop = EventLoop::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    for (label, ms) in [("slow", 30u64), ("fast", 5), ("mid", 15)] {
        let order = Rc::clone(&order);
        let (_, timer) = event_loop.schedule(Duration::from_millis(ms));
        timer.on_complete(move |r| {
            assert!(r.is_ok());
            order.borrow_mut().push(label);
        });
    }

    event_loop.run().unwrap();
    assert_eq!(*order.borrow(), vec!["fast", "mid", "slow"]);
}

#[test]
fn test_run_for_returns_after_duration() {
    let event_loop = EventLoop::new().unwrap();
    let (_, timer) = event_loop.schedule(Duration::from_secs(30));
    let start = std::time::Instant::now();
    event_loop.run_for(Duration::from_millis(20)).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert!(!timer.is_settled());
}

// ============================================================================
// Sockets
// ============================================================================

#[test]
fn test_unix_async_connect() {
    for event_loop in loops() {
        let path = temp_socket_path("connect");
        let listener = UnixListener::bind(&path).unwrap();

        let socket = AsyncSocket::unix(&event_loop).unwrap();
        let mut connected = socket.async_connect(&Endpoint::from(path.clone())).unwrap();
        event_loop.run_until(&connected).unwrap();
        connected.take_result().unwrap().unwrap();
        assert_eq!(socket.state(), SocketState::Connected);

        let (mut peer, _) = listener.accept().unwrap();
        let mut sent = socket
            .async_write_all(ByteBuffer::copy_from(b"ping"))
            .unwrap();
        event_loop.run_until(&sent).unwrap();
        sent.take_result().unwrap().unwrap();

        let mut buf = [0u8; 4];
        io::Read::read_exact(&mut peer, &mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        io::Write::write_all(&mut peer, b"pong").unwrap();
        let mut reply = socket
            .async_read_full(ByteBuffer::with_capacity(4))
            .unwrap();
        event_loop.run_until(&reply).unwrap();
        assert_eq!(
            reply.take_result().unwrap().unwrap().view_written().as_slice(),
            b"pong"
        );

        let _ = std::fs::remove_file(&path);
    }
}

#[test]
fn test_unix_connect_to_missing_path_fails() {
    let event_loop = EventLoop::new().unwrap();
    let path = temp_socket_path("missing");

    let socket = AsyncSocket::unix(&event_loop).unwrap();
    let mut connected = socket.async_connect(&Endpoint::from(path.clone())).unwrap();
    event_loop.run_until(&connected).unwrap();
    let err = connected.take_result().unwrap().unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(socket.state(), SocketState::Error);

    let blocking = AsyncSocket::unix(&event_loop).unwrap();
    assert!(matches!(
        blocking.connect(&Endpoint::from(path)),
        Err(Error::Io(_))
    ));
}

#[test]
fn test_tcp_connect_refused_settles_through_loop() {
    for event_loop in loops() {
        let closed = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let socket = AsyncSocket::tcp_v4(&event_loop).unwrap();
        let mut connected = socket.async_connect(&Endpoint::from(closed)).unwrap();
        if !connected.is_settled() {
            assert_eq!(socket.state(), SocketState::Connecting);
            assert_eq!(event_loop.stats().pending.connects, 1);
        }

        event_loop.run_until(&connected).unwrap();
        let err = connected.take_result().unwrap().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.io_kind(), Some(io::ErrorKind::ConnectionRefused));
        assert_eq!(socket.state(), SocketState::Error);
        assert_eq!(event_loop.stats().pending.connects, 0);
    }
}

#[test]
fn test_socket_pair_exchange() {
    let event_loop = EventLoop::new().unwrap();
    let (a, b) = AsyncSocket::pair(&event_loop).unwrap();

    let mut request = ByteBuffer::with_capacity(8);
    request.write_be(0x0102_0304u32).unwrap();
    request.write_le(0x0102_0304u32).unwrap();
    request.flip();

    a.async_write_all(request).unwrap();
    let mut received = b
        .async_read(ByteBuffer::with_capacity(8), 8)
        .unwrap()
        .map(|mut buffer| {
            buffer.flip();
            (buffer.read_be::<u32>().unwrap(), buffer.read_le::<u32>().unwrap())
        });
    event_loop.run_until(&received).unwrap();
    assert_eq!(
        received.take_result().unwrap().unwrap(),
        (0x0102_0304, 0x0102_0304)
    );
}
