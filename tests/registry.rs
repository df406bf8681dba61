use circuit_guard::{BreakerOptions, BreakerRegistry, CircuitBreaker, State};
use std::time::Duration;
use tokio::time::sleep;

type Registry = BreakerRegistry<(), std::io::Error>;

fn options(max_failures: u32) -> BreakerOptions {
    BreakerOptions {
        max_failures,
        reset_timeout: 50,
        ..BreakerOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_same_name_shares_one_state_machine() {
    let registry = Registry::new();
    let first = registry.get_or_create("db", options(1));
    let second = registry.get_or_create("db", options(10));

    let _ = first
        .execute(|| async { Err(std::io::Error::new(std::io::ErrorKind::Other, "down")) })
        .await;
    assert_eq!(second.state(), State::Open);
    assert_eq!(second.options().max_failures, 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_registries_are_isolated() {
    let a = Registry::new();
    let b = Registry::new();

    a.get_or_create("db", options(1)).force_open();
    assert_eq!(b.get_or_create("db", options(1)).state(), State::Closed);
    assert!(Registry::new().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_remove_disposes() {
    let registry = Registry::new();
    let breaker = registry.get_or_create("cache", options(1));
    breaker.force_open();

    let removed = registry.remove("cache").unwrap();
    assert!(registry.get("cache").is_none());

    sleep(Duration::from_millis(100)).await;
    assert_eq!(removed.state(), State::Open, "disposed breakers do not half-open");
}

#[tokio::test(start_paused = true)]
async fn test_insert_and_names() {
    let registry = Registry::new();
    registry.insert(CircuitBreaker::builder("zeta").build());
    registry.insert(CircuitBreaker::builder("alpha").build());
    let replaced = registry.insert(CircuitBreaker::builder("alpha").max_failures(9).build());

    assert!(replaced.is_some());
    assert_eq!(registry.names(), vec!["alpha".to_string(), "zeta".to_string()]);
    assert_eq!(registry.get("alpha").unwrap().options().max_failures, 9);

    registry.dispose_all();
    assert!(registry.is_empty());
}
