mod common;

use common::{ECHO_KEY, EchoService, echo_request, response_text};
use sockrpc::{DEFAULT_TIMEOUT, Engine, FaultCode, FaultKind, Location};

use std::time::{Duration, Instant};

#[test]
fn test_slow_service_times_out() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("impatient");
    engine
        .set_caller_timeout(caller, Duration::from_millis(300))
        .unwrap();

    let request = echo_request(&engine, "late", &[("echo.sleepMS", "2000")]);
    engine.add_request(caller, ECHO_KEY, request).unwrap();

    let started = Instant::now();
    let completed = engine.execute_and_wait_all(caller).unwrap();

    assert_eq!(completed, 0, "A timed out wait reports nothing completed");
    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "The wait should end at the caller's deadline"
    );
    assert_eq!(engine.location(request), Some(Location::WithCaller));

    let fault = engine
        .inspect_request(request, |r| r.fault().cloned())
        .unwrap()
        .expect("The request should carry a timeout fault");
    assert_eq!(fault.code(), FaultCode::ServiceTimeout);
    assert_eq!(fault.kind(), FaultKind::Timeout);
    assert_eq!(engine.outstanding_count(caller).unwrap(), 0);
}

#[test]
fn test_timeout_only_fails_own_requests() {
    let service = EchoService::start();
    let engine = service.engine();
    let impatient = engine.new_caller("impatient");
    let patient = engine.new_caller("patient");
    engine
        .set_caller_timeout(impatient, Duration::from_millis(200))
        .unwrap();

    let late = echo_request(&engine, "late", &[("echo.sleepMS", "1000")]);
    let fine = echo_request(&engine, "fine", &[("echo.sleepMS", "400")]);
    engine.add_request(impatient, ECHO_KEY, late).unwrap();
    engine.add_request(patient, ECHO_KEY, fine).unwrap();

    assert_eq!(engine.execute_and_wait_all(impatient).unwrap(), 0);
    assert_eq!(engine.execute_and_wait_all(patient).unwrap(), 1);
    assert_eq!(response_text(&engine, fine), "fine");
    assert!(!engine.inspect_request(fine, |r| r.has_fault()).unwrap());
}

#[test]
fn test_blocked_wait_gives_up_without_failing() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("blocked");

    let request = echo_request(&engine, "eventually", &[("echo.sleepMS", "500")]);
    engine.add_request(caller, ECHO_KEY, request).unwrap();

    let started = Instant::now();
    let ready = engine
        .execute_and_wait_blocked(caller, Duration::from_millis(50))
        .unwrap();
    assert_eq!(ready, 0, "Nothing completes within the short budget");
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(engine.location(request), Some(Location::Pending));
    assert!(
        !engine.inspect_request(request, |r| r.has_fault()).unwrap(),
        "Giving up a blocked wait does not fail the request"
    );

    let ready = engine
        .execute_and_wait_blocked(caller, Duration::from_secs(2))
        .unwrap();
    assert_eq!(ready, 1);
    assert_eq!(
        engine.location(request),
        Some(Location::Completed),
        "A blocked wait leaves completed requests queued"
    );

    assert_eq!(engine.execute_and_wait_any(caller).unwrap(), Some(request));
    assert_eq!(response_text(&engine, request), "eventually");
}

#[test]
fn test_default_timeout_is_configurable() {
    assert_eq!(DEFAULT_TIMEOUT, Duration::from_millis(4000));

    let service = EchoService::start();
    let engine = Engine::builder()
        .locator(service.locator())
        .default_timeout(Duration::from_millis(150))
        .build();
    let caller = engine.new_caller("short");

    let request = echo_request(&engine, "late", &[("echo.sleepMS", "1000")]);
    engine.add_request(caller, ECHO_KEY, request).unwrap();
    assert_eq!(engine.execute_and_wait_all(caller).unwrap(), 0);

    let code = engine
        .inspect_request(request, |r| r.fault().map(|f| f.code()))
        .unwrap();
    assert_eq!(code, Some(FaultCode::ServiceTimeout));
}

#[test]
fn test_wait_with_nothing_outstanding_returns_immediately() {
    let engine = Engine::builder().build();
    let caller = engine.new_caller("idle");

    let started = Instant::now();
    assert_eq!(engine.execute_and_wait_all(caller).unwrap(), 0);
    assert_eq!(engine.execute_and_wait_any(caller).unwrap(), None);
    assert_eq!(engine.execute_and_wait_sent(caller).unwrap(), 0);
    assert!(started.elapsed() < Duration::from_millis(100));
}
