//! Instance configuration.
//!
//! One JSON document per instance: a `source` describing where redo comes
//! from and how to decode it, and a `target` describing the sink. Both are
//! arrays for layout compatibility, but only single-source-single-target
//! documents are accepted; live updates deep-merge over the running config
//! with the same restriction enforced explicitly.

use std::collections::HashMap;
use std::path::PathBuf;

use ferroredo_builder::TableDef;
use ferroredo_error::{FerroError, Result};
use ferroredo_meta::DbIncarnation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub version: String,
    pub source: Vec<SourceConfig>,
    pub target: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    pub alias: String,
    /// Database name; used in copy-file names and output tags.
    pub name: String,
    pub reader: ReaderSection,
    #[serde(default)]
    pub memory: MemorySection,
    /// Static object dictionary for the replicated tables.
    #[serde(default)]
    pub tables: Vec<TableEntry>,
    /// Source→target path prefix rewrites, flattened pairs.
    #[serde(default)]
    pub path_mapping: Vec<String>,
    #[serde(default)]
    pub incarnations: Vec<IncarnationEntry>,
    /// Park in Ready instead of failing when boot preconditions are unmet.
    #[serde(default)]
    pub boot_failsafe: bool,
    /// Soft-stop after this many log switches; 0 disables.
    #[serde(default)]
    pub stop_log_switches: u64,
    /// Explicit starting sequence; 0 discovers from the archive list.
    #[serde(default)]
    pub start_seq: u32,
    /// Start at the log whose SCN window contains this SCN; 0 disables.
    #[serde(default)]
    pub start_scn: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReaderSection {
    /// `batch` (explicit file list) or `archive` (directory scan).
    #[serde(rename = "type")]
    pub kind: String,
    /// Explicit redo log files or directories (batch mode).
    #[serde(default)]
    pub redo_log: Vec<PathBuf>,
    /// Archive directory (archive mode).
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
    /// `log_archive_format` pattern for sequence extraction.
    #[serde(default = "default_archive_format")]
    pub log_archive_format: String,
    /// Bitmask of disabled consistency checks; bit 0 is block checksums.
    #[serde(default)]
    pub disable_checks: u64,
    /// Whether the database computes block checksums (drives the hint).
    #[serde(default = "default_true")]
    pub db_block_checksum: bool,
    #[serde(default = "default_read_sleep_us")]
    pub redo_read_sleep_us: u64,
    #[serde(default)]
    pub redo_verify_delay_us: u64,
    #[serde(default)]
    pub redo_copy_path: Option<PathBuf>,
    #[serde(default = "default_arch_sleep_us")]
    pub arch_read_sleep_us: u64,
    /// Online log groups: group number and member paths.
    #[serde(default)]
    pub online_log: Vec<OnlineLogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OnlineLogEntry {
    pub group: i32,
    pub path: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MemorySection {
    #[serde(default = "default_min_mb")]
    pub min_mb: u64,
    #[serde(default = "default_max_mb")]
    pub max_mb: u64,
    #[serde(default = "default_read_buffer_mb")]
    pub read_buffer_max_mb: u64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            min_mb: default_min_mb(),
            max_mb: default_max_mb(),
            read_buffer_max_mb: default_read_buffer_mb(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableEntry {
    pub object_id: u32,
    pub owner: String,
    pub table: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IncarnationEntry {
    pub incarnation: u32,
    pub resetlogs: u32,
    pub resetlogs_scn: u64,
    pub prior_incarnation: u32,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetConfig {
    pub alias: String,
    /// Alias of the source feeding this target.
    pub source: String,
    pub writer: WriterSection,
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WriterSection {
    #[serde(rename = "type")]
    pub kind: String,
    pub output: PathBuf,
    #[serde(default)]
    pub max_file_size: u64,
    #[serde(default = "default_newline")]
    pub new_line: u64,
    #[serde(default)]
    pub rotate_on_sequence: bool,
    #[serde(default = "default_flush_size")]
    pub flush_buffer_size: u64,
    /// `json` or `binary` (length-prefixed).
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}
fn default_archive_format() -> String {
    "o1_mf_%t_%s_%h_.arc".to_string()
}
fn default_read_sleep_us() -> u64 {
    10_000
}
fn default_arch_sleep_us() -> u64 {
    100_000
}
fn default_min_mb() -> u64 {
    32
}
fn default_max_mb() -> u64 {
    1024
}
fn default_read_buffer_mb() -> u64 {
    64
}
fn default_newline() -> u64 {
    1
}
fn default_flush_size() -> u64 {
    64 * 1024
}
fn default_format() -> String {
    "json".to_string()
}

impl Config {
    /// Parse and validate one instance document.
    pub fn parse(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| FerroError::ConfigParse {
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.len() != 1 {
            return Err(FerroError::config(
                "source",
                format!("exactly one source required, got {}", self.source.len()),
            ));
        }
        if self.target.len() != 1 {
            return Err(FerroError::config(
                "target",
                format!("exactly one target required, got {}", self.target.len()),
            ));
        }
        let source = &self.source[0];
        let target = &self.target[0];
        if target.source != source.alias {
            return Err(FerroError::config(
                "target.source",
                format!(
                    "references '{}' but the source alias is '{}'",
                    target.source, source.alias
                ),
            ));
        }
        match source.reader.kind.as_str() {
            "batch" => {
                if source.reader.redo_log.is_empty() {
                    return Err(FerroError::MissingConfigField {
                        field: "reader.redo-log".into(),
                    });
                }
            }
            "archive" => {
                if source.reader.archive_dir.is_none() {
                    return Err(FerroError::MissingConfigField {
                        field: "reader.archive-dir".into(),
                    });
                }
            }
            other => {
                return Err(FerroError::config(
                    "reader.type",
                    format!("'{other}' is not 'batch' or 'archive'"),
                ));
            }
        }
        if target.writer.kind != "file" {
            return Err(FerroError::config(
                "writer.type",
                format!("'{}' is not supported, only 'file'", target.writer.kind),
            ));
        }
        if !matches!(target.writer.format.as_str(), "json" | "binary") {
            return Err(FerroError::config(
                "writer.format",
                format!("'{}' is not 'json' or 'binary'", target.writer.format),
            ));
        }
        if target.writer.new_line > 2 {
            return Err(FerroError::config(
                "writer.new-line",
                format!("{} is not 0, 1, or 2", target.writer.new_line),
            ));
        }
        if source.memory.min_mb > source.memory.max_mb {
            return Err(FerroError::config(
                "memory.min-mb",
                format!(
                    "min {} exceeds max {}",
                    source.memory.min_mb, source.memory.max_mb
                ),
            ));
        }
        if source.path_mapping.len() % 2 != 0 {
            return Err(FerroError::config(
                "path-mapping",
                "must hold source/target pairs".to_string(),
            ));
        }
        Ok(())
    }

    /// The single source (validated).
    pub fn the_source(&self) -> &SourceConfig {
        &self.source[0]
    }

    /// The single target (validated).
    pub fn the_target(&self) -> &TargetConfig {
        &self.target[0]
    }

    /// Table dictionary map for the builder.
    pub fn dictionary(&self) -> HashMap<u32, TableDef> {
        self.the_source()
            .tables
            .iter()
            .map(|t| {
                (
                    t.object_id,
                    TableDef {
                        owner: t.owner.clone(),
                        name: t.table.clone(),
                        columns: t.columns.clone(),
                    },
                )
            })
            .collect()
    }

    /// Incarnation table for the metadata layer.
    pub fn incarnations(&self) -> Vec<DbIncarnation> {
        self.the_source()
            .incarnations
            .iter()
            .filter_map(|i| {
                Some(DbIncarnation {
                    incarnation: i.incarnation,
                    resetlogs: ferroredo_types::Resetlogs(i.resetlogs),
                    resetlogs_scn: ferroredo_types::Scn::new(i.resetlogs_scn)?,
                    prior_incarnation: i.prior_incarnation,
                    status: i.status.clone(),
                })
            })
            .collect()
    }
}

/// Deep-merge `delta` over `base`.
///
/// Objects merge recursively and scalar/array values replace, except the
/// top-level `source` and `target` arrays: those merge element 0 into
/// element 0, and a delta carrying more than one element is rejected
/// (single-source-single-target is the only supported shape).
pub fn merge_config(base: &mut Value, delta: &Value) -> Result<()> {
    merge_value(base, delta, true)
}

fn merge_value(base: &mut Value, delta: &Value, top_level: bool) -> Result<()> {
    match (base, delta) {
        (Value::Object(base_map), Value::Object(delta_map)) => {
            for (key, delta_val) in delta_map {
                let special = top_level && (key == "source" || key == "target");
                if special {
                    merge_instance_array(base_map, key, delta_val)?;
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(base_val) => merge_value(base_val, delta_val, false)?,
                    None => {
                        base_map.insert(key.clone(), delta_val.clone());
                    }
                }
            }
            Ok(())
        }
        (base_slot, delta_val) => {
            *base_slot = delta_val.clone();
            Ok(())
        }
    }
}

fn merge_instance_array(
    base_map: &mut serde_json::Map<String, Value>,
    key: &str,
    delta_val: &Value,
) -> Result<()> {
    let field = if key == "source" { "source" } else { "target" };
    let Value::Array(delta_arr) = delta_val else {
        return Err(FerroError::config(field, "must be an array"));
    };
    if delta_arr.len() > 1 {
        return Err(FerroError::MultiElementMerge {
            field: if key == "source" { "source" } else { "target" },
            count: delta_arr.len(),
        });
    }
    let Some(delta_first) = delta_arr.first() else {
        return Ok(()); // empty delta array: nothing to merge
    };
    match base_map.get_mut(key) {
        Some(Value::Array(base_arr)) if !base_arr.is_empty() => {
            if base_arr.len() > 1 {
                return Err(FerroError::MultiElementMerge {
                    field: if key == "source" { "source" } else { "target" },
                    count: base_arr.len(),
                });
            }
            merge_value(&mut base_arr[0], delta_first, false)
        }
        _ => {
            base_map.insert(key.to_string(), delta_val.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> String {
        json!({
            "version": "0.3.0",
            "source": [{
                "alias": "S1",
                "name": "DB1",
                "reader": {
                    "type": "batch",
                    "redo-log": ["/logs/a_1.arc"]
                },
                "tables": [
                    {"object-id": 777, "owner": "USR1", "table": "ADAM",
                     "columns": ["A", "B", "C"]}
                ]
            }],
            "target": [{
                "alias": "T1",
                "source": "S1",
                "writer": {
                    "type": "file",
                    "output": "./out_%i.json",
                    "max-file-size": 5000000
                }
            }]
        })
        .to_string()
    }

    #[test]
    fn parses_minimal_config() {
        let config = Config::parse(&minimal()).unwrap();
        assert_eq!(config.the_source().alias, "S1");
        assert_eq!(config.the_target().writer.new_line, 1);
        assert_eq!(config.dictionary()[&777].qualified_name(), "USR1.ADAM");
    }

    #[test]
    fn rejects_multi_source() {
        let mut doc: Value = serde_json::from_str(&minimal()).unwrap();
        let src = doc["source"][0].clone();
        doc["source"].as_array_mut().unwrap().push(src);
        assert!(Config::parse(&doc.to_string()).is_err());
    }

    #[test]
    fn rejects_bad_references() {
        let mut doc: Value = serde_json::from_str(&minimal()).unwrap();
        doc["target"][0]["source"] = json!("WRONG");
        assert!(Config::parse(&doc.to_string()).is_err());
    }

    #[test]
    fn rejects_unknown_reader_type() {
        let mut doc: Value = serde_json::from_str(&minimal()).unwrap();
        doc["source"][0]["reader"]["type"] = json!("network");
        assert!(Config::parse(&doc.to_string()).is_err());
    }

    #[test]
    fn merge_updates_nested_scalar() {
        let mut base: Value = serde_json::from_str(&minimal()).unwrap();
        let delta = json!({
            "source": [{"reader": {"redo-read-sleep-us": 5}}],
            "trace": 2
        });
        merge_config(&mut base, &delta).unwrap();
        assert_eq!(base["source"][0]["reader"]["redo-read-sleep-us"], 5);
        // Untouched siblings survive.
        assert_eq!(base["source"][0]["alias"], "S1");
        assert_eq!(base["source"][0]["reader"]["type"], "batch");
        assert_eq!(base["trace"], 2);
    }

    #[test]
    fn merge_rejects_multi_element_delta() {
        let mut base: Value = serde_json::from_str(&minimal()).unwrap();
        let delta = json!({"source": [{}, {}]});
        let err = merge_config(&mut base, &delta).unwrap_err();
        assert!(matches!(
            err,
            FerroError::MultiElementMerge {
                field: "source",
                count: 2
            }
        ));
    }

    #[test]
    fn merge_replaces_plain_arrays() {
        let mut base: Value = serde_json::from_str(&minimal()).unwrap();
        let delta = json!({
            "source": [{"reader": {"redo-log": ["/logs/b_1.arc", "/logs/b_2.arc"]}}]
        });
        merge_config(&mut base, &delta).unwrap();
        assert_eq!(
            base["source"][0]["reader"]["redo-log"],
            json!(["/logs/b_1.arc", "/logs/b_2.arc"])
        );
    }

    #[test]
    fn merged_config_revalidates() {
        let mut base: Value = serde_json::from_str(&minimal()).unwrap();
        let delta = json!({"target": [{"writer": {"new-line": 9}}]});
        merge_config(&mut base, &delta).unwrap();
        assert!(Config::parse(&base.to_string()).is_err());
    }
}
