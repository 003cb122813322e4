use std::fs;
use std::sync::Mutex;

use ipcman_config::{ConfigLoader, ConfigSource, IpcmanConfig};
use tempfile::tempdir;

static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn defaults_when_nothing_is_configured() {
    let dir = tempdir().expect("tempdir");
    let load = ConfigLoader::new()
        .with_search_root(dir.path())
        .load()
        .expect("load");
    assert_eq!(load.source, ConfigSource::Default);
    assert_eq!(load.config, IpcmanConfig::default());
}

#[test]
fn finds_default_file_under_config_dir() {
    let dir = tempdir().expect("tempdir");
    fs::create_dir(dir.path().join("config")).unwrap();
    let path = dir.path().join("config/ipcman.toml");
    fs::write(
        &path,
        r#"
[worker]
mailbox_capacity = 8

[[devices]]
id = 1
address = "http://192.168.1.108"
username = "admin"
password = "123"
time_zone = "America/Chicago"
features = ["camera"]
"#,
    )
    .unwrap();

    let load = ConfigLoader::new()
        .with_search_root(dir.path())
        .load()
        .expect("load");
    assert_eq!(load.source, ConfigSource::File(path));
    assert_eq!(load.config.worker.mailbox_capacity, 8);
    assert_eq!(load.config.worker.quick_scan_interval_secs, 1800);
    assert_eq!(load.config.devices.len(), 1);
    assert_eq!(load.config.devices[0].descriptor().unwrap().seed, 1);
}

#[test]
fn explicit_path_wins_over_inline_json() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("custom.json");
    fs::write(&path, r#"{"scan": {"batch_size": 16}}"#).unwrap();

    let load = ConfigLoader::new()
        .with_path(&path)
        .with_inline_json(r#"{"scan": {"batch_size": 99}}"#)
        .load()
        .expect("load");
    assert_eq!(load.source, ConfigSource::EnvPath(path));
    assert_eq!(load.config.scan.batch_size, 16);
}

#[test]
fn extensionless_files_accept_either_format() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("ipcman.conf");
    fs::write(&path, "[session]\nkeepalive_interval_secs = 30\n").unwrap();
    let load = ConfigLoader::new().with_path(&path).load().expect("load");
    assert_eq!(load.config.session.keepalive_interval_secs, 30);

    fs::write(&path, r#"{"session": {"keepalive_interval_secs": 45}}"#).unwrap();
    let load = ConfigLoader::new().with_path(&path).load().expect("load");
    assert_eq!(load.config.session.keepalive_interval_secs, 45);
}

#[test]
fn duplicate_devices_are_rejected() {
    let device = r#"{"id": 2, "address": "http://10.0.0.2", "username": "admin"}"#;
    let err = ConfigLoader::new()
        .with_inline_json(format!(r#"{{"devices": [{device}, {device}]}}"#))
        .load()
        .unwrap_err();
    assert!(format!("{err:#}").contains("more than once"));
}

#[test]
fn environment_variables_are_honoured() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe {
        std::env::remove_var("IPCMAN_CONFIG_PATH");
        std::env::set_var("IPCMAN_CONFIG_JSON", r#"{"worker": {"status_channel": 2}}"#);
    }
    let load = ConfigLoader::from_env().load();
    unsafe { std::env::remove_var("IPCMAN_CONFIG_JSON") };

    let load = load.expect("load");
    assert_eq!(load.source, ConfigSource::EnvInline);
    assert_eq!(load.config.worker.status_channel, 2);
}
