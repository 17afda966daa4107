use orderq::{Error, ExecutorOptions};
use std::time::Duration;

const VARS: [&str; 5] = [
    "ORDERQ_NAME",
    "ORDERQ_MAX_DEGREE",
    "ORDERQ_BOUNDED_CAPACITY",
    "ORDERQ_SCAN_INTERVAL_MS",
    "ORDERQ_DISPATCH_WAIT_MS",
];

fn clear_vars() {
    for var in VARS {
        unsafe {
            std::env::remove_var(var);
        }
    }
}

// Environment variables are process-wide, so every env case runs in this
// one test.
#[test]
fn options_from_env() {
    clear_vars();
    let options = ExecutorOptions::from_env().unwrap();
    assert_eq!(options, ExecutorOptions::default());

    unsafe {
        std::env::set_var("ORDERQ_NAME", "billing");
        std::env::set_var("ORDERQ_MAX_DEGREE", "6");
        std::env::set_var("ORDERQ_BOUNDED_CAPACITY", "128");
        std::env::set_var("ORDERQ_SCAN_INTERVAL_MS", "20");
    }
    let options = ExecutorOptions::from_env().unwrap();
    assert_eq!(options.name, "billing");
    assert_eq!(options.max_degree_of_parallelism, 6);
    assert_eq!(options.bounded_capacity, Some(128));
    assert_eq!(options.scan_interval, Duration::from_millis(20));

    unsafe {
        std::env::set_var("ORDERQ_MAX_DEGREE", "many");
    }
    assert!(matches!(ExecutorOptions::from_env(), Err(Error::Config(_))));

    unsafe {
        std::env::set_var("ORDERQ_MAX_DEGREE", "0");
    }
    assert!(matches!(ExecutorOptions::from_env(), Err(Error::Config(_))));

    clear_vars();
}

#[test]
fn options_load_from_file() {
    let path = std::env::temp_dir().join(format!("orderq-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(
        &path,
        "[executor]\nmax_degree_of_parallelism = 3\ndispatch_wait_ms = 0\n",
    )
    .unwrap();

    let options = ExecutorOptions::load(&path).unwrap();
    assert_eq!(options.max_degree_of_parallelism, 3);
    assert_eq!(options.dispatch_wait, Duration::ZERO);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn missing_file_is_a_config_error() {
    let path = std::env::temp_dir().join("orderq-does-not-exist.toml");
    assert!(matches!(
        ExecutorOptions::load(&path),
        Err(Error::Config(_))
    ));
}
