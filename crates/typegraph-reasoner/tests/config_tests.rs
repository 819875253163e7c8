use std::io::Write;
use std::time::Duration;

use typegraph_reasoner::{CacheConfig, ReasonerConfig};

#[test]
fn partial_files_keep_defaults() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, r#"{{ "explain": true, "cache": {{ "capacity": 5 }} }}"#)?;

    let config = ReasonerConfig::from_json_file(file.path())?;
    assert!(config.explain);
    assert!(config.inference);
    assert_eq!(config.cycle_rounds, 64);
    assert_eq!(config.cache.capacity, 5);
    assert_eq!(config.cache.idle_timeout(), Duration::from_secs(60));
    Ok(())
}

#[test]
fn empty_object_is_the_default() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("reasoner.json");
    std::fs::write(&path, "{}")?;
    assert_eq!(ReasonerConfig::from_json_file(&path)?, ReasonerConfig::default());
    Ok(())
}

#[test]
fn errors_name_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.json");
    let err = ReasonerConfig::from_json_file(&missing).unwrap_err();
    assert!(err.to_string().contains("absent.json"));

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ inference: ").unwrap();
    let err = ReasonerConfig::from_json_file(&broken).unwrap_err();
    assert!(format!("{err:#}").contains("broken.json"));
}

#[test]
fn configs_round_trip_through_json() {
    let config = ReasonerConfig {
        inference: false,
        explain: true,
        cache: CacheConfig {
            capacity: 12,
            idle_timeout_ms: 250,
        },
        cycle_rounds: 8,
    };
    let text = serde_json::to_string(&config).unwrap();
    assert_eq!(serde_json::from_str::<ReasonerConfig>(&text).unwrap(), config);
}
