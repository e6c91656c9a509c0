//! No-mock configuration validation + resolution tests.
//!
//! Covers:
//! - Loading real TOML and JSON files from disk
//! - Resolution order (CLI > env > config dir > XDG > preset)
//! - Preset validity and determinism

use dt_config::preset::{get_preset, list_presets, PresetName};
use dt_config::resolve::{resolve_config, ConfigSource, APP_NAME, CONFIG_FILENAME};
use dt_config::{validate_config, AnalysisConfig, InitScheme, ValidationError};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const ENV_KEYS: &[&str] = &["DT_CONFIG", "DT_CONFIG_DIR", "XDG_CONFIG_HOME"];

const SAMPLE_TOML: &str = r#"
schema_version = "1.0.0"
parallel = false

[decomposition]
init = "svd"
max_iterations = 250
tolerance = 1e-6
seed = 7
restarts = 2

[rank_scan]
min_rank = 3
max_rank = 6

[stability]
runs = 4
base_seed = 100
similarity_threshold = 0.85
variability_threshold = 0.2

[assembly]
expected_devices = 12
expected_categories = 5
"#;

const SAMPLE_JSON: &str = r#"{
  "schema_version": "1.0.0",
  "parallel": false,
  "decomposition": {"init": "svd", "max_iterations": 250, "tolerance": 1e-6, "seed": 7, "restarts": 2},
  "rank_scan": {"min_rank": 3, "max_rank": 6},
  "stability": {"runs": 4, "base_seed": 100, "similarity_threshold": 0.85, "variability_threshold": 0.2},
  "assembly": {"expected_devices": 12, "expected_categories": 5}
}"#;

struct EnvGuard {
    keys: Vec<String>,
    saved: Vec<Option<String>>,
}

impl EnvGuard {
    fn new(keys: &[&str]) -> Self {
        let saved = keys.iter().map(|key| env::var(key).ok()).collect();
        for key in keys {
            env::remove_var(key);
        }
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            saved,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (idx, key) in self.keys.iter().enumerate() {
            match self.saved.get(idx).and_then(|v| v.as_ref()) {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("env lock poisoned");
    f()
}

fn write_config(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    fs::create_dir_all(dir).expect("create config dir");
    let path = dir.join(name);
    fs::write(&path, body).expect("write config");
    path
}

#[test]
fn test_toml_and_json_parse_to_same_config() {
    let temp = TempDir::new().expect("temp dir");
    let toml_path = write_config(temp.path(), "analysis.toml", SAMPLE_TOML);
    let json_path = write_config(temp.path(), "analysis.json", SAMPLE_JSON);

    let from_toml = AnalysisConfig::from_file(&toml_path).expect("load toml");
    let from_json = AnalysisConfig::from_file(&json_path).expect("load json");
    assert_eq!(from_toml, from_json);
    assert_eq!(from_toml.decomposition.init, InitScheme::Svd);
    assert_eq!(from_toml.assembly.expected_devices, Some(12));
    assert!(validate_config(&from_toml).is_ok());
}

#[test]
fn test_malformed_file_is_parse_error() {
    let temp = TempDir::new().expect("temp dir");
    let path = write_config(temp.path(), "analysis.toml", "[decomposition\nseed = ");
    assert!(matches!(
        AnalysisConfig::from_file(&path).unwrap_err(),
        ValidationError::ParseError(_)
    ));
}

#[test]
fn test_file_with_bad_values_fails_validation() {
    let temp = TempDir::new().expect("temp dir");
    let path = write_config(
        temp.path(),
        "analysis.toml",
        "[stability]\nruns = 0\n",
    );
    let cfg = AnalysisConfig::from_file(&path).expect("parses");
    let err = validate_config(&cfg).unwrap_err();
    assert!(err.to_string().contains("stability.runs"));
}

#[test]
fn test_resolve_config_cli_over_env() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(ENV_KEYS);
        let temp = TempDir::new().expect("temp dir");
        let cli = write_config(&temp.path().join("cli"), "cli.toml", SAMPLE_TOML);
        let env_file = write_config(&temp.path().join("env"), "env.toml", "parallel = true\n");
        env::set_var("DT_CONFIG", env_file.display().to_string());

        let resolved = resolve_config(Some(&cli), None).expect("resolve");
        assert_eq!(resolved.source, ConfigSource::CliArgument);
        assert_eq!(resolved.path.as_deref(), Some(cli.as_path()));
        assert!(!resolved.config.parallel);
    });
}

#[test]
fn test_resolve_config_env_over_config_dir() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(ENV_KEYS);
        let temp = TempDir::new().expect("temp dir");
        let env_file = write_config(&temp.path().join("env"), "env.toml", SAMPLE_TOML);
        let dir = temp.path().join("config_dir");
        write_config(&dir, CONFIG_FILENAME, "parallel = true\n");
        env::set_var("DT_CONFIG", env_file.display().to_string());
        env::set_var("DT_CONFIG_DIR", dir.display().to_string());

        let resolved = resolve_config(None, None).expect("resolve");
        assert_eq!(resolved.source, ConfigSource::Environment);
        assert_eq!(resolved.path.as_deref(), Some(env_file.as_path()));
    });
}

#[test]
fn test_resolve_config_dir_env() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(ENV_KEYS);
        let temp = TempDir::new().expect("temp dir");
        let dir = temp.path().join("config_dir");
        let file = write_config(&dir, CONFIG_FILENAME, SAMPLE_TOML);
        env::set_var("DT_CONFIG_DIR", dir.display().to_string());

        let resolved = resolve_config(None, None).expect("resolve");
        assert_eq!(resolved.source, ConfigSource::Environment);
        assert_eq!(resolved.path.as_deref(), Some(file.as_path()));
        assert_eq!(resolved.config.stability.runs, 4);
    });
}

#[cfg(target_os = "linux")]
#[test]
fn test_resolve_config_xdg_fallback() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(ENV_KEYS);
        let temp = TempDir::new().expect("temp dir");
        let xdg_dir = temp.path().join("xdg");
        let file = write_config(&xdg_dir.join(APP_NAME), CONFIG_FILENAME, SAMPLE_TOML);
        env::set_var("XDG_CONFIG_HOME", xdg_dir.display().to_string());

        let resolved = resolve_config(None, None).expect("resolve");
        assert_eq!(resolved.source, ConfigSource::XdgConfig);
        assert_eq!(resolved.path.as_deref(), Some(file.as_path()));
    });
}

#[cfg(target_os = "linux")]
#[test]
fn test_resolve_config_builtin_default() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(ENV_KEYS);
        let temp = TempDir::new().expect("temp dir");
        env::set_var("XDG_CONFIG_HOME", temp.path().display().to_string());

        let resolved = resolve_config(None, None).expect("resolve");
        assert_eq!(resolved.source, ConfigSource::BuiltinDefault);
        assert_eq!(resolved.config, get_preset(PresetName::Final));
    });
}

#[test]
fn test_preset_overrides_file_decomposition() {
    let temp = TempDir::new().expect("temp dir");
    let path = write_config(temp.path(), "analysis.toml", SAMPLE_TOML);
    let resolved = resolve_config(Some(&path), Some(PresetName::Scan)).expect("resolve");
    assert_eq!(resolved.config.decomposition.max_iterations, 100);
    // Non-decomposition sections still come from the file.
    assert_eq!(resolved.config.stability.runs, 4);
}

#[test]
fn test_all_presets_validate() {
    for name in PresetName::ALL {
        let cfg = get_preset(*name);
        assert!(validate_config(&cfg).is_ok(), "preset {name} invalid");
    }
}

#[test]
fn test_presets_are_deterministic() {
    let first = serde_json::to_string(&get_preset(PresetName::Scan)).expect("serialize preset");
    let second = serde_json::to_string(&get_preset(PresetName::Scan)).expect("serialize preset");
    assert_eq!(first, second);

    let presets = list_presets();
    assert!(presets.iter().any(|p| p.name == PresetName::Final.as_str()));
}
