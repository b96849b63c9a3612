#![allow(dead_code)]

use ignore_migrate::storage::Ledger;
use std::sync::Once;
use std::time::Instant;
use tempfile::TempDir;
use tracing::info;

pub mod cli;
pub mod fake;
pub mod fixtures;

pub use fake::FakeGateway;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        ignore_migrate::logging::init_test_logging();
    });
}

pub struct TestLogGuard {
    name: String,
    start: Instant,
}

impl TestLogGuard {
    fn new(name: &str) -> Self {
        init_test_logging();
        info!("{name}: starting");
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for TestLogGuard {
    fn drop(&mut self) {
        info!(
            "{}: assertions passed (elapsed {:?})",
            self.name,
            self.start.elapsed()
        );
    }
}

pub fn test_log(name: &str) -> TestLogGuard {
    TestLogGuard::new(name)
}

pub fn test_ledger() -> Ledger {
    init_test_logging();
    Ledger::open_memory().expect("Failed to create test ledger")
}

pub fn test_ledger_with_dir() -> (Ledger, TempDir) {
    init_test_logging();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = dir.path().join(".igm").join("ledger.db");
    std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
    let ledger = Ledger::open(&db_path).expect("Failed to create test ledger");
    (ledger, dir)
}
