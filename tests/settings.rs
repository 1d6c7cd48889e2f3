use std::path::PathBuf;

use claimsql::config::Settings;
use claimsql::error::Error;
use claimsql::validate::TypeStrictness;

// one test, since it changes the process environment
#[test]
fn defaults_file_and_environment() {
    let defaults = Settings::load(None).expect("defaults load without a file");
    assert_eq!(defaults, Settings::default());
    assert_eq!(defaults.correction.max_retries, 3);
    assert_eq!(defaults.correction.type_strictness, TypeStrictness::LiteralsOnly);
    assert_eq!(defaults.execution.max_rows, None);
    assert_eq!(defaults.store.path, PathBuf::from("claims.db"));
    assert_eq!(defaults.server.bind, "127.0.0.1:8080");
    assert!(defaults.workers >= 1);

    let path = std::env::temp_dir().join(format!("claimsql_settings_{}.toml", std::process::id()));
    std::fs::write(
        &path,
        r#"
workers = 2
log_level = "debug"

[correction]
max_retries = 1
type_strictness = "columns_too"

[execution]
max_rows = 100
timeout_ms = 2500

[store]
path = "/var/lib/claimsql/claims.db"
load_sample_data = true
"#,
    )
    .unwrap();
    let file = path.to_str().unwrap();

    let settings = Settings::load(Some(file)).expect("file settings load");
    assert_eq!(settings.workers, 2);
    assert_eq!(settings.log_level, "debug");
    assert_eq!(settings.correction.max_retries, 1);
    assert_eq!(settings.correction.type_strictness, TypeStrictness::ColumnsToo);
    assert_eq!(settings.execution.max_rows, Some(100));
    assert_eq!(settings.execution.timeout_ms, Some(2500));
    assert_eq!(settings.store.path, PathBuf::from("/var/lib/claimsql/claims.db"));
    assert!(settings.store.load_sample_data);
    assert_eq!(settings.server, Default::default(), "missing sections keep their defaults");

    unsafe {
        std::env::set_var("CLAIMSQL_EXECUTION__MAX_ROWS", "50");
        std::env::set_var("CLAIMSQL_CORRECTION__MAX_RETRIES", "5");
    }
    let settings = Settings::load(Some(file)).expect("environment overrides load");
    unsafe {
        std::env::remove_var("CLAIMSQL_EXECUTION__MAX_ROWS");
        std::env::remove_var("CLAIMSQL_CORRECTION__MAX_RETRIES");
    }
    std::fs::remove_file(&path).unwrap();
    assert_eq!(settings.execution.max_rows, Some(50), "environment wins over the file");
    assert_eq!(settings.correction.max_retries, 5);
    assert_eq!(settings.execution.timeout_ms, Some(2500));

    let missing = std::env::temp_dir().join("claimsql_no_such_settings.toml");
    assert!(matches!(Settings::load(missing.to_str()), Err(Error::Config(_))));
}
