mod common;

use common::{ECHO_KEY, EchoService, echo_request};
use sockrpc::{Attributes, Engine, FaultCode, Location, MapLocator};

use std::time::Duration;

fn add_with(attributes: Attributes) -> FaultCode {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("validation");

    let request = echo_request(&engine, "x", &[]);
    engine
        .with_request(request, |r| r.set_attribute(attributes))
        .unwrap();
    let fault = engine
        .add_request(caller, ECHO_KEY, request)
        .expect_err("The request should be rejected");

    assert_eq!(
        engine.location(request),
        Some(Location::WithCaller),
        "A rejected request stays with the caller"
    );
    let recorded = engine
        .inspect_request(request, |r| r.fault().map(|f| f.code()))
        .unwrap();
    assert_eq!(recorded, Some(fault.code()), "The fault is recorded on the request");

    fault.code()
}

#[test]
fn test_keep_affinity_rejects_no_wait() {
    assert_eq!(
        add_with(Attributes::KEEP_AFFINITY | Attributes::NO_RETRY | Attributes::NO_WAIT),
        FaultCode::NoWaitNotAllowed
    );
}

#[test]
fn test_keep_affinity_requires_no_retry() {
    assert_eq!(add_with(Attributes::KEEP_AFFINITY), FaultCode::NeedNoRetry);
}

#[test]
fn test_need_affinity_requires_open_connection() {
    assert_eq!(add_with(Attributes::NEED_AFFINITY), FaultCode::NoAffinity);
}

#[test]
fn test_bad_service_keys_are_rejected() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("keys");

    for key in [
        "system.echo.0",
        "system..0.raw",
        "system.echo.01.raw",
        "system.echo.0.yaml",
        "sys tem.echo.0.raw",
    ] {
        let request = echo_request(&engine, "x", &[]);
        let fault = engine.add_request(caller, key, request).unwrap_err();
        assert_eq!(fault.code(), FaultCode::ServiceKeyBad, "{key:?} should be rejected");
    }
}

#[test]
fn test_unknown_service_is_not_found() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("missing");

    let request = echo_request(&engine, "x", &[]);
    let fault = engine
        .add_request(caller, "system.missing.0.raw", request)
        .unwrap_err();
    assert_eq!(fault.code(), FaultCode::ServiceNotFound);
}

#[test]
fn test_engine_without_locator_is_not_initialized() {
    let engine = Engine::builder().build();
    let caller = engine.new_caller("bare");

    let request = engine.create_request();
    let fault = engine.add_request(caller, ECHO_KEY, request).unwrap_err();
    assert_eq!(fault.code(), FaultCode::NotInitialized);
}

#[test]
fn test_request_cannot_be_added_twice() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("twice");

    let request = echo_request(&engine, "x", &[("echo.sleepMS", "200")]);
    engine.add_request(caller, ECHO_KEY, request).unwrap();

    let fault = engine.add_request(caller, ECHO_KEY, request).unwrap_err();
    assert_eq!(fault.code(), FaultCode::RequestAlreadyAdded);

    let fault = engine.with_request(request, |r| r.set_tag(1)).unwrap_err();
    assert_eq!(
        fault.code(),
        FaultCode::RequestInProgress,
        "An added request cannot be modified"
    );

    assert_eq!(engine.execute_and_wait_all(caller).unwrap(), 1);
}

#[test]
fn test_wait_one_requires_added_request() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("one");

    let request = engine.create_request();
    let fault = engine.execute_and_wait_one(caller, request).unwrap_err();
    assert_eq!(fault.code(), FaultCode::RequestNotAdded);
    assert_eq!(
        engine.caller_fault(caller).unwrap().map(|f| f.code()),
        Some(FaultCode::RequestNotAdded)
    );

    let fault = engine.remove_request(request, FaultCode::RequestNotAdded).unwrap_err();
    assert_eq!(fault.code(), FaultCode::RequestNotAdded);
}

#[test]
fn test_reserved_context_keys_are_rejected() {
    let engine = Engine::builder().build();
    let request = engine.create_request();

    let fault = engine
        .with_request(request, |r| r.set_context("sockrpc.internal", "x"))
        .unwrap()
        .unwrap_err();
    assert_eq!(fault.code(), FaultCode::ContextReservedNamespace);

    let fault = engine
        .with_request(request, |r| r.set_context("", "x"))
        .unwrap()
        .unwrap_err();
    assert_eq!(fault.code(), FaultCode::ContextFormatError);
}

#[test]
fn test_deleted_caller_is_unknown() {
    let service = EchoService::start();
    let engine = service.engine();
    let caller = engine.new_caller("short-lived");

    let request = echo_request(&engine, "x", &[("echo.sleepMS", "500")]);
    engine.add_request(caller, ECHO_KEY, request).unwrap();

    engine
        .delete_caller(caller, FaultCode::RequestNotAdded)
        .unwrap();

    assert_eq!(engine.location(request), Some(Location::WithCaller));
    let code = engine
        .inspect_request(request, |r| r.fault().map(|f| f.code()))
        .unwrap();
    assert_eq!(code, Some(FaultCode::RequestNotAdded), "In-flight requests are failed");

    let fault = engine.execute_and_wait_all(caller).unwrap_err();
    assert_eq!(fault.code(), FaultCode::UnknownCaller);
    let fault = engine
        .set_caller_timeout(caller, Duration::from_secs(1))
        .unwrap_err();
    assert_eq!(fault.code(), FaultCode::UnknownCaller);
}

#[test]
fn test_map_locator_resolves_wildcard_service() {
    let service = EchoService::start();
    let locator = MapLocator::new()
        .with("system..0.raw", &service.path)
        .unwrap();
    let engine = Engine::builder().locator(locator).build();
    let caller = engine.new_caller("wildcard");

    let request = echo_request(&engine, "any function", &[]);
    engine
        .add_request(caller, "system.whatever.0.raw", request)
        .unwrap();
    assert_eq!(engine.execute_and_wait_all(caller).unwrap(), 1);
    assert_eq!(common::response_text(&engine, request), "any function");

    let request = echo_request(&engine, "x", &[]);
    let fault = engine
        .add_request(caller, "system.whatever.1.raw", request)
        .unwrap_err();
    assert_eq!(fault.code(), FaultCode::ServiceNotFound);
}

#[test]
fn test_released_request_is_unknown() {
    let engine = Engine::builder().build();
    let request = engine.create_request();

    engine.release_request(request).unwrap();
    assert_eq!(engine.location(request), None);

    let fault = engine.inspect_request(request, |r| r.tag()).unwrap_err();
    assert_eq!(fault.code(), FaultCode::UnknownRequest);

    let reused = engine.create_request();
    assert_ne!(reused, request, "A stale handle never aliases a new request");
    assert_eq!(
        engine.inspect_request(request, |r| r.tag()).unwrap_err().code(),
        FaultCode::UnknownRequest
    );
}
