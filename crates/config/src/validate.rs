//! Configuration validation engine.
//!
//! Validates configuration files against the known schema, detects
//! unknown/misspelled fields, and reports settings that cannot work together.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use {secrecy::ExposeSecret, serde_json::Value};

use crate::schema::{KekBackend, KeyStoreBackend, MaterialsMode, ShredderConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "missing-setting",
    /// "security", "range"
    pub category: &'static str,
    /// Dotted path, e.g. "transit.url"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Expected shape of the configuration.
enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

/// Build the schema map mirroring every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    Struct(HashMap::from([
        (
            "markers",
            Struct(HashMap::from([
                ("subject_identifier", Leaf),
                ("personal_data", Leaf),
            ])),
        ),
        (
            "key_store",
            Struct(HashMap::from([
                ("backend", Leaf),
                ("sqlite_url", Leaf),
                ("visibility_timeout_secs", Leaf),
                ("poll_interval_ms", Leaf),
            ])),
        ),
        (
            "materials",
            Struct(HashMap::from([
                ("mode", Leaf),
                ("algorithm", Leaf),
                ("kek", Leaf),
            ])),
        ),
        (
            "transit",
            Struct(HashMap::from([
                ("url", Leaf),
                ("token", Leaf),
                ("mount", Leaf),
                ("key_prefix", Leaf),
                ("timeout_secs", Leaf),
            ])),
        ),
        (
            "retry",
            Struct(HashMap::from([
                ("max_retries", Leaf),
                ("initial_backoff_ms", Leaf),
                ("max_backoff_ms", Leaf),
            ])),
        ),
        ("metrics", Struct(HashMap::from([("enabled", Leaf)]))),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Closest candidate within `max_distance` edits.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let format = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml")
        .to_string();

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(content) => validate_str(&crate::env_subst::substitute_env(&content), &format),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read {}: {e}", actual_path.display()),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate config text in `format` (`toml`, `yaml`/`yml` or `json`).
#[must_use]
pub fn validate_str(raw: &str, format: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let value = match to_json_value(raw, format) {
        Ok(v) => v,
        Err(message) => {
            diagnostics.push(Diagnostic::new(Severity::Error, "syntax", "", message));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    // 3. Type check, then semantic checks on the parsed config
    match serde_json::from_value::<ShredderConfig>(value) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn to_json_value(raw: &str, format: &str) -> Result<Value, String> {
    match format {
        "toml" => toml::from_str::<toml::Value>(raw)
            .map_err(|e| format!("TOML syntax error: {e}"))
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        "yaml" | "yml" => {
            let v = serde_yaml::from_str::<serde_yaml::Value>(raw)
                .map_err(|e| format!("YAML syntax error: {e}"))?;
            // An empty YAML document is null; treat it as an empty table.
            if v.is_null() {
                return Ok(Value::Object(serde_json::Map::new()));
            }
            serde_json::to_value(v).map_err(|e| e.to_string())
        },
        "json" => serde_json::from_str(raw).map_err(|e| format!("JSON syntax error: {e}")),
        other => Err(format!("unsupported config format: .{other}")),
    }
}

/// Walk the value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (Value::Object(table), KnownKeys::Struct(fields)) = (value, schema) else {
        // Leaf or type mismatch; type errors are caught later
        return;
    };

    let known_keys: Vec<&str> = fields.keys().copied().collect();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child_value, child_schema, &path, diagnostics);
            continue;
        }
        let level = if prefix.is_empty() {
            "at top level "
        } else {
            ""
        };
        let message = match suggest(key, &known_keys, 3) {
            Some(s) => format!("unknown field {level}(did you mean \"{s}\"?)"),
            None => format!("unknown field {level}"),
        };
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "unknown-field",
            path,
            message.trim(),
        ));
    }
}

/// Checks on a parsed config for settings that cannot work together.
#[must_use]
pub fn validate_config(config: &ShredderConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if config.markers.subject_identifier.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "missing-setting",
            "markers.subject_identifier",
            "subject identifier marker must not be empty",
        ));
    }
    if config.markers.personal_data.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "missing-setting",
            "markers.personal_data",
            "personal data marker must not be empty",
        ));
    }
    if config.markers.subject_identifier == config.markers.personal_data {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "range",
            "markers",
            "subject identifier and personal data markers must differ",
        ));
    }

    match config.key_store.backend {
        KeyStoreBackend::Sqlite if config.key_store.sqlite_url.is_none() => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "missing-setting",
                "key_store.sqlite_url",
                "sqlite backend selected but no sqlite_url is set",
            ));
        },
        KeyStoreBackend::Replicated => {
            if config.key_store.visibility_timeout_secs == 0 {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "range",
                    "key_store.visibility_timeout_secs",
                    "visibility timeout of 0 makes every replicated write time out",
                ));
            }
            if config.key_store.poll_interval_ms == 0 {
                diagnostics.push(Diagnostic::new(
                    Severity::Warning,
                    "range",
                    "key_store.poll_interval_ms",
                    "poll interval of 0 busy-loops while waiting for replicated writes",
                ));
            }
        },
        KeyStoreBackend::Memory => {
            diagnostics.push(Diagnostic::new(
                Severity::Info,
                "security",
                "key_store.backend",
                "memory backend keeps no key material across restarts",
            ));
        },
        KeyStoreBackend::Sqlite => {},
    }

    let uses_transit =
        config.materials.mode == MaterialsMode::Envelope && config.materials.kek == KekBackend::Transit;
    if config.materials.mode == MaterialsMode::Direct && config.materials.kek == KekBackend::Transit {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "range",
            "materials.kek",
            "transit KEK is only used in envelope mode; direct mode ignores it",
        ));
    }

    if uses_transit {
        match config.transit.url.as_deref() {
            None | Some("") => diagnostics.push(Diagnostic::new(
                Severity::Error,
                "missing-setting",
                "transit.url",
                "transit KEK selected but no transit url is set",
            )),
            Some(url) if url.starts_with("http://") => diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "security",
                "transit.url",
                "transit url is plain http; key material travels unencrypted",
            )),
            Some(_) => {},
        }
        if config
            .transit
            .token
            .as_ref()
            .is_none_or(|t| t.expose_secret().is_empty())
        {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "missing-setting",
                "transit.token",
                "transit KEK selected but no token is set (or SHREDDER_TRANSIT_TOKEN)",
            ));
        }
        if config.transit.timeout_secs == 0 {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "range",
                "transit.timeout_secs",
                "transit timeout must be greater than 0",
            ));
        }
        if config.transit.mount.trim().is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "missing-setting",
                "transit.mount",
                "transit mount must not be empty",
            ));
        }
    }

    if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "range",
            "retry.initial_backoff_ms",
            format!(
                "initial backoff ({} ms) exceeds max backoff ({} ms); every retry waits the max",
                config.retry.initial_backoff_ms, config.retry.max_backoff_ms
            ),
        ));
    }

    diagnostics
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(result: &'a ValidationResult, path: &str) -> Option<&'a Diagnostic> {
        result.diagnostics.iter().find(|d| d.path == path)
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("retry", "retry"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("transit", "tranist"), 2);
        assert_eq!(levenshtein("materals", "materials"), 1);
    }

    #[test]
    fn empty_config_only_notes_memory_backend() {
        let result = validate_str("", "toml");
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert_eq!(result.count(Severity::Info), 1);
    }

    #[test]
    fn unknown_top_level_key_with_suggestion() {
        let result = validate_str("[materals]\nmode = \"direct\"\n", "toml");
        let d = find(&result, "materals").expect("unknown-field diagnostic");
        assert_eq!(d.category, "unknown-field");
        assert_eq!(d.severity, Severity::Error);
        assert!(d.message.contains("\"materials\""), "{}", d.message);
    }

    #[test]
    fn unknown_nested_key_in_yaml() {
        let result = validate_str("transit:\n  tokn: abc\n", "yaml");
        let d = find(&result, "transit.tokn").expect("unknown-field diagnostic");
        assert!(d.message.contains("token"));
    }

    #[test]
    fn syntax_errors_stop_validation() {
        let result = validate_str("[key_store\n", "toml");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");

        let result = validate_str("{", "json");
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn wrong_enum_value_is_type_error() {
        let result = validate_str("[key_store]\nbackend = \"redis\"\n", "toml");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.category == "type-error")
        );
    }

    #[test]
    fn sqlite_without_url_is_error() {
        let result = validate_str("[key_store]\nbackend = \"sqlite\"\n", "toml");
        let d = find(&result, "key_store.sqlite_url").unwrap();
        assert_eq!(d.severity, Severity::Error);
    }

    #[test]
    fn replicated_zero_timeout_is_error() {
        let result = validate_str(
            "[key_store]\nbackend = \"replicated\"\nvisibility_timeout_secs = 0\n",
            "toml",
        );
        assert!(result.has_errors());
        assert!(find(&result, "key_store.visibility_timeout_secs").is_some());
    }

    #[test]
    fn transit_without_url_or_token_is_error() {
        let result = validate_str(
            r#"{"materials": {"mode": "envelope", "kek": "transit"}}"#,
            "json",
        );
        assert_eq!(find(&result, "transit.url").unwrap().severity, Severity::Error);
        assert_eq!(
            find(&result, "transit.token").unwrap().severity,
            Severity::Error
        );
    }

    #[test]
    fn complete_transit_config_is_valid() {
        let raw = r#"
[key_store]
backend = "sqlite"
sqlite_url = "sqlite://keys.db?mode=rwc"

[materials]
mode = "envelope"
algorithm = "xchacha20"
kek = "transit"

[transit]
url = "https://vault.internal:8200"
token = "s.abc"
"#;
        let result = validate_str(raw, "toml");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn plain_http_transit_warned() {
        let raw = "[materials]\nkek = \"transit\"\n[transit]\nurl = \"http://vault:8200\"\ntoken = \"t\"\n";
        let result = validate_str(raw, "toml");
        let d = find(&result, "transit.url").unwrap();
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.category, "security");
    }

    #[test]
    fn inverted_backoff_warned() {
        let result = validate_str(
            "[retry]\ninitial_backoff_ms = 9000\nmax_backoff_ms = 10\n",
            "toml",
        );
        assert_eq!(
            find(&result, "retry.initial_backoff_ms").unwrap().severity,
            Severity::Warning
        );
    }

    #[test]
    fn identical_markers_rejected() {
        let result = validate_str(
            "[markers]\nsubject_identifier = \"pii\"\npersonal_data = \"pii\"\n",
            "toml",
        );
        assert!(find(&result, "markers").is_some());
    }

    #[test]
    fn validate_missing_path_reports_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shredder.toml");
        let result = validate(Some(&path));
        assert!(result.has_errors());
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn validate_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shredder.yaml");
        std::fs::write(&path, "key_store:\n  backend: sqlite\n").unwrap();
        let result = validate(Some(&path));
        assert!(find(&result, "key_store.sqlite_url").is_some());
    }
}
