//! Integration tests for the application shell.

use std::path::Path;
use std::thread::JoinHandle;
use std::time::Duration;

use emushell::prelude::*;

/// Route logs to the test harness; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn shell_in(dir: &Path) -> Shell {
    let settings = AppSettings {
        base_folder: Some(dir.to_path_buf()),
        ..AppSettings::default()
    };
    Shell::new(settings, dir.join("config").join("emushell.toml"))
}

fn pump_until_done<T>(shell: &mut Shell, worker: &JoinHandle<T>) {
    while !worker.is_finished() {
        shell.main_loop().run_for(Duration::from_millis(5)).unwrap();
    }
    shell.main_loop().process_until_idle();
}

#[test]
fn worker_saves_settings_through_main_thread() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut shell = shell_in(dir.path());
    shell.app().update_settings(|s| s.mcd_compress = true);

    let handle = shell.handle();
    let worker = std::thread::spawn(move || handle.save_settings());
    pump_until_done(&mut shell, &worker);
    worker.join().unwrap().unwrap();

    let saved = AppSettings::load(shell.app().settings_path()).unwrap();
    assert!(saved.mcd_compress);
    assert_eq!(saved.base_folder.as_deref(), Some(dir.path()));
}

#[test]
fn worker_applies_settings_and_plugins_get_folder() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut shell = shell_in(dir.path());

    let handle = shell.handle();
    let worker = std::thread::spawn(move || handle.apply_settings());
    pump_until_done(&mut shell, &worker);
    worker.join().unwrap().unwrap();

    assert!(dir.path().join("memcards").is_dir());
    assert!(dir.path().join("cheats_ws").is_dir());
    let store = shell.app().plugin_configs().expect("plugin folder set");
    assert_eq!(store.folder(), dir.path().join("inis"));
}

#[test]
fn failed_save_reaches_worker_as_method_failure() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    // A file where the settings folder should be makes the save fail.
    std::fs::write(dir.path().join("config"), b"not a folder").unwrap();
    let mut shell = shell_in(dir.path());

    let handle = shell.handle();
    let worker = std::thread::spawn(move || handle.save_settings());
    pump_until_done(&mut shell, &worker);

    match worker.join().unwrap() {
        Err(ShellError::Rpc(RpcError::MethodFailed(err))) => {
            assert!(err.message().contains("config"));
        }
        other => panic!("expected a method failure, got {other:?}"),
    }
}

#[test]
fn missing_plugin_config_is_created_with_defaults() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = PluginConfigStore::new(dir.path());

    for plugin in NullPlugin::ALL {
        assert!(!store.path(plugin).exists());
        let config = store.load(plugin).unwrap();
        assert_eq!(config, NullPluginConfig::default());
        assert!(store.path(plugin).exists(), "{plugin} defaults not written");
    }

    let text = std::fs::read_to_string(dir.path().join("GSNull.ini")).unwrap();
    assert!(text.contains("logging=0"));
}

#[test]
fn configure_persists_logging_toggle() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = PluginConfigStore::new(dir.path());

    let config = store.configure(NullPlugin::Pad, true).unwrap();
    assert!(config.logging_enabled());
    assert_eq!(store.load(NullPlugin::Pad).unwrap().logging, 1);
    // The other plugin's file is untouched.
    assert!(!dir.path().join("GSNull.ini").exists());

    store.configure(NullPlugin::Pad, false).unwrap();
    assert!(!store.load(NullPlugin::Pad).unwrap().logging_enabled());
}

#[test]
fn load_falls_back_when_folder_is_missing() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = PluginConfigStore::new(dir.path().join("does-not-exist"));

    // Neither read nor the default write can succeed; defaults still come back.
    assert_eq!(store.load(NullPlugin::Gs).unwrap(), NullPluginConfig::default());
    assert!(store.save(NullPlugin::Gs, &NullPluginConfig { logging: 1 }).is_err());
}

#[test]
fn exit_waits_for_worker_saves() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut shell = shell_in(dir.path());
    let handle = shell.handle();

    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let worker = std::thread::spawn(move || {
        handle.start_pending_save().unwrap();
        started_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        handle.clear_pending_save().unwrap();
    });

    // The start is queued once the worker reports in.
    started_rx.recv().unwrap();
    shell.main_loop().process_until_idle();
    assert!(shell.handle().dispatcher().has_pending_saves());

    assert!(shell.wait_for_pending_saves(Duration::from_secs(5)).unwrap());
    worker.join().unwrap();
    assert!(!shell.handle().dispatcher().has_pending_saves());
}

#[test]
fn quit_from_worker_stops_run() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut shell = shell_in(dir.path());
    let handle = shell.handle();

    let worker = std::thread::spawn(move || {
        handle.apply_settings()?;
        handle.quit()
    });
    shell.run().unwrap();
    worker.join().unwrap().unwrap();

    assert!(shell.main_loop().is_closed());
    // Main-thread calls still run inline after the loop has closed.
    shell.handle().save_settings().unwrap();
    assert!(shell.app().settings_path().exists());
}
