use sockrpc::locator::{DirectoryLocator, Locator, MapLocator};
use sockrpc::{FaultCode, Serialization, ServiceKey};

use std::os::unix::net::UnixListener;

#[test]
fn test_parse_client_key() {
    let key: ServiceKey = "billing.charge.12.JSON".parse().unwrap();

    assert_eq!(key.application(), "billing");
    assert_eq!(key.function(), "charge");
    assert_eq!(key.version(), 12);
    assert_eq!(key.serialization(), Serialization::Json);
    assert_eq!(key.english_key(), "billing.charge.12.JSON");
    assert_eq!(key.search_key(), "billing.JSON.12.charge");
    assert_eq!(key.wildcard_search_key(), "billing.JSON.12");
}

#[test]
fn test_client_key_requires_function() {
    let fault = ServiceKey::parse("billing..1.raw").unwrap_err();
    assert_eq!(fault.code(), FaultCode::ServiceKeyBad);

    let service = ServiceKey::parse_service("billing..1.raw").unwrap();
    assert_eq!(service.function(), "");
    assert_eq!(
        service.search_key(),
        "billing.raw.1",
        "A service without a function registers the wildcard key"
    );
}

#[test]
fn test_malformed_keys() {
    let long = "a".repeat(33);
    let too_long = format!("{long}.f.1.raw");

    for text in [
        "",
        "a.b.c",
        "a.b.1.raw.extra",
        ".f.1.raw",
        "a.f..raw",
        "a.f.007.raw",
        "a.f.-1.raw",
        "a.f.1234567.raw",
        "a.f.1.",
        "a.f.1.json",
        "a/b.f.1.raw",
        too_long.as_str(),
    ] {
        let fault = ServiceKey::parse(text).unwrap_err();
        assert_eq!(fault.code(), FaultCode::ServiceKeyBad, "{text:?} should be rejected");
    }

    assert!(ServiceKey::parse("my_app.do-thing.0.raw").is_ok());
}

#[test]
fn test_directory_locator_falls_back_to_wildcard() {
    let dir = tempfile::tempdir().unwrap();
    let locator = DirectoryLocator::new(dir.path());
    let key = ServiceKey::parse("system.echo.0.raw").unwrap();
    assert_eq!(locator.dir(), dir.path());
    assert_eq!(locator.path_for(&key), dir.path().join("system.raw.0.echo"));

    assert_eq!(
        locator.resolve(&key).unwrap_err().code(),
        FaultCode::ServiceNotFound
    );

    let wildcard = dir.path().join("system.raw.0");
    let _wildcard_listener = UnixListener::bind(&wildcard).unwrap();
    assert_eq!(locator.resolve(&key).unwrap(), wildcard);

    let exact = locator.path_for(&key);
    let _exact_listener = UnixListener::bind(&exact).unwrap();
    assert_eq!(
        locator.resolve(&key).unwrap(),
        exact,
        "An exact registration wins over the wildcard"
    );
}

#[test]
fn test_directory_locator_ignores_regular_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("system.raw.0.echo"), b"not a socket").unwrap();

    let locator = DirectoryLocator::new(dir.path());
    let key = ServiceKey::parse("system.echo.0.raw").unwrap();
    assert_eq!(
        locator.resolve(&key).unwrap_err().code(),
        FaultCode::ServiceNotFound
    );
}

#[test]
fn test_map_locator() {
    let mut locator = MapLocator::new();
    locator.insert("system.echo.0.raw", "/tmp/echo.sock").unwrap();
    locator.insert("system..1.raw", "/tmp/any.sock").unwrap();
    assert!(locator.insert("bad key", "/tmp/x").is_err());

    let echo = ServiceKey::parse("system.echo.0.raw").unwrap();
    let other = ServiceKey::parse("system.other.1.raw").unwrap();
    let missing = ServiceKey::parse("system.other.0.raw").unwrap();

    assert_eq!(
        locator.resolve(&echo).unwrap().to_str(),
        Some("/tmp/echo.sock")
    );
    assert_eq!(
        locator.resolve(&other).unwrap().to_str(),
        Some("/tmp/any.sock")
    );
    assert_eq!(
        locator.resolve(&missing).unwrap_err().code(),
        FaultCode::ServiceNotFound
    );
}
