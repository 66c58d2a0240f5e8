mod common;

use common::{ECHO_KEY, EchoService, echo_request, response_text};
use sockrpc::{CallerId, Engine, EventWanted, FaultCode, Interest, Location};

use std::time::{Duration, Instant};

/// Blocks on `event` with `poll(2)`. Returns false if the wait timed out.
fn wait_for(event: &EventWanted) -> bool {
    let mut fds = [libc::pollfd {
        fd: event.fd,
        events: match event.interest {
            Interest::Read => libc::POLLIN,
            Interest::Write => libc::POLLOUT,
        },
        revents: 0,
    }];
    let timeout = event.timeout.as_millis().min(i32::MAX as u128) as i32;

    let res = unsafe { libc::poll(fds.as_mut_ptr(), 1, timeout) };
    assert!(res >= 0, "poll failed");
    res > 0
}

/// Drives `caller` through the event API until nothing is wanted.
fn drive(engine: &Engine, caller: CallerId) -> usize {
    let mut events = 0;

    while let Some(event) = engine.next_event_wanted(caller, Instant::now(), None).unwrap() {
        events += 1;
        if !wait_for(&event) {
            engine.send_timeout_event(caller, event.fd, true).unwrap();
            continue;
        }

        match event.interest {
            Interest::Read => engine.send_can_read_event(caller, event.fd).unwrap(),
            Interest::Write => engine.send_can_write_event(caller, event.fd).unwrap(),
        };
    }

    events
}

#[test]
fn test_event_loop_completes_requests() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("evented");

    let first = echo_request(&engine, "one", &[]);
    let second = echo_request(&engine, "two", &[("echo.sleepMS", "100")]);
    engine.add_request(caller, ECHO_KEY, first).unwrap();
    engine.add_request(caller, ECHO_KEY, second).unwrap();

    let events = drive(&engine, caller);
    assert!(events >= 2, "Each request needs at least one event");

    let mut done = Vec::new();
    while let Some(handle) = engine.completed_request(caller).unwrap() {
        assert_eq!(engine.location(handle), Some(Location::WithCaller));
        done.push(handle);
    }
    done.sort();

    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(done, expected, "Both requests complete through events");
    assert_eq!(response_text(&engine, first), "one");
    assert_eq!(response_text(&engine, second), "two");
    assert_eq!(engine.outstanding_count(caller).unwrap(), 0);
}

#[test]
fn test_event_wanted_describes_request() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("describe");

    let request = echo_request(&engine, "hello", &[("echo.sleepMS", "200")]);
    engine.add_request(caller, ECHO_KEY, request).unwrap();

    let event = engine
        .next_event_wanted(caller, Instant::now(), Some(request))
        .unwrap()
        .expect("The request should be waiting on its socket");
    assert_eq!(event.request, request);
    assert_eq!(event.interest, Interest::Read, "A sent request waits to read");
    assert!(event.timeout <= sockrpc::DEFAULT_TIMEOUT);
    assert_eq!(
        Some(event.fd),
        engine.inspect_request(request, |r| r.socket_fd()).unwrap()
    );
    assert_eq!(engine.location(request), Some(Location::AwaitingEvent));

    assert!(
        engine
            .next_event_wanted(caller, Instant::now(), None)
            .unwrap()
            .is_none(),
        "A handed out request is not described twice"
    );

    let fault = engine.send_can_write_event(caller, event.fd).unwrap_err();
    assert_eq!(
        fault.code(),
        FaultCode::WriteEventWrongState,
        "The request asked for read readiness"
    );

    assert!(wait_for(&event));
    assert!(engine.send_can_read_event(caller, event.fd).unwrap());
    assert_eq!(engine.completed_request(caller).unwrap(), Some(request));
}

#[test]
fn test_event_for_unknown_fd_is_rejected() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("wrong-fd");

    let fault = engine.send_can_read_event(caller, 9999).unwrap_err();
    assert_eq!(fault.code(), FaultCode::ReadEventForWrongFd);

    let fault = engine.send_can_write_event(caller, 9999).unwrap_err();
    assert_eq!(fault.code(), FaultCode::WriteEventForWrongFd);
}

#[test]
fn test_timeout_event_aborts_request() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("abort");

    let request = echo_request(&engine, "slow", &[("echo.sleepMS", "1000")]);
    engine.add_request(caller, ECHO_KEY, request).unwrap();

    let event = engine
        .next_event_wanted(caller, Instant::now(), None)
        .unwrap()
        .expect("The request should be waiting");
    assert!(engine.send_timeout_event(caller, event.fd, true).unwrap());

    assert_eq!(engine.completed_request(caller).unwrap(), Some(request));
    let fault = engine
        .inspect_request(request, |r| r.fault().cloned())
        .unwrap()
        .expect("An aborted request carries a fault");
    assert_eq!(fault.code(), FaultCode::ServiceTimeout);
    assert_eq!(fault.text(), "Event forced service timeout");
}

#[test]
fn test_timeout_event_without_abort_requeues() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("requeue");

    let request = echo_request(&engine, "patient", &[("echo.sleepMS", "100")]);
    engine.add_request(caller, ECHO_KEY, request).unwrap();

    let event = engine
        .next_event_wanted(caller, Instant::now(), None)
        .unwrap()
        .expect("The request should be waiting");
    assert!(!engine.send_timeout_event(caller, event.fd, false).unwrap());
    assert_eq!(engine.location(request), Some(Location::Pending));

    drive(&engine, caller);
    assert_eq!(engine.completed_request(caller).unwrap(), Some(request));
    assert_eq!(response_text(&engine, request), "patient");
}

#[test]
fn test_expired_deadline_fails_request() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("expired");
    engine
        .set_caller_timeout(caller, Duration::from_millis(100))
        .unwrap();

    let request = echo_request(&engine, "late", &[("echo.sleepMS", "1000")]);
    engine.add_request(caller, ECHO_KEY, request).unwrap();

    let start = Instant::now();
    let first = engine.next_event_wanted(caller, start, None).unwrap();
    let event = first.expect("The request should be waiting");
    engine.send_timeout_event(caller, event.fd, false).unwrap();

    let later = engine
        .next_event_wanted(caller, start + Duration::from_millis(200), None)
        .unwrap();
    assert!(later.is_none(), "An expired request is not handed out");

    assert_eq!(engine.completed_request(caller).unwrap(), Some(request));
    let code = engine
        .inspect_request(request, |r| r.fault().map(|f| f.code()))
        .unwrap();
    assert_eq!(code, Some(FaultCode::ServiceTimeout));
}
