//! Archived log discovery.
//!
//! Finds archived redo files, extracts their sequence number from the
//! `log_archive_format` pattern, applies configured path mappings, and
//! hands back candidates ordered by sequence.

use std::path::{Path, PathBuf};

use ferroredo_types::Seq;
use tracing::{trace, warn};

/// Source→target path prefix rewrites.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    pairs: Vec<(String, String)>,
}

impl PathMapper {
    /// Build from the flattened `[src, dst, src, dst, ...]` config list.
    pub fn from_flat(flat: &[String]) -> Self {
        let pairs = flat
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        Self { pairs }
    }

    /// Rewrite the first matching prefix.
    #[must_use]
    pub fn apply(&self, path: &Path) -> PathBuf {
        let text = path.to_string_lossy();
        for (from, to) in &self.pairs {
            if let Some(rest) = text.strip_prefix(from.as_str()) {
                let mapped = format!("{to}{rest}");
                trace!(from = %text, to = %mapped, "path mapping applied");
                return PathBuf::from(mapped);
            }
        }
        path.to_path_buf()
    }
}

/// Extract the sequence from an archived file name using the archive
/// format pattern.
///
/// Pattern wildcards: `%s`/`%S` capture the sequence digits; `%t`, `%T`,
/// `%r`, `%a`, `%d` skip a digit run; `%h` skips a lowercase-hex run.
/// Everything else must match literally. Returns `None` when the name does
/// not fit the pattern.
#[must_use]
pub fn sequence_from_file_name(file: &str, format: &str) -> Option<Seq> {
    let fmt: Vec<char> = format.chars().collect();
    let name: Vec<char> = file.chars().collect();
    let mut sequence: Option<u32> = None;
    let mut i = 0; // format position
    let mut j = 0; // file position

    while i < fmt.len() && j < name.len() {
        if fmt[i] == '%' {
            let Some(&kind) = fmt.get(i + 1) else {
                warn!(file, format, "archive format ends after %");
                return None;
            };
            let mut digits = 0usize;
            match kind {
                's' | 'S' | 't' | 'T' | 'r' | 'a' | 'd' => {
                    let mut number: u32 = 0;
                    while j < name.len() && name[j].is_ascii_digit() {
                        number = number
                            .wrapping_mul(10)
                            .wrapping_add(name[j] as u32 - '0' as u32);
                        j += 1;
                        digits += 1;
                    }
                    if kind == 's' || kind == 'S' {
                        sequence = Some(number);
                    }
                }
                'h' => {
                    while j < name.len()
                        && (name[j].is_ascii_digit() || name[j].is_ascii_lowercase())
                    {
                        j += 1;
                        digits += 1;
                    }
                }
                other => {
                    warn!(file, format, wildcard = %other, "unknown archive format wildcard");
                    return None;
                }
            }
            if digits == 0 {
                return None;
            }
            i += 2;
        } else if fmt[i] == name[j] {
            i += 1;
            j += 1;
        } else {
            return None;
        }
    }

    if i == fmt.len() && j == name.len() {
        sequence.map(Seq)
    } else {
        None
    }
}

/// One discovered archived log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedLog {
    pub sequence: Seq,
    pub path: PathBuf,
}

impl PartialOrd for ArchivedLog {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArchivedLog {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.sequence, &self.path).cmp(&(other.sequence, &other.path))
    }
}

/// Scan explicit paths (files or directories) for archived logs with
/// sequence at or above `min_sequence`, sorted ascending.
pub fn discover_batch(
    paths: &[PathBuf],
    format: &str,
    min_sequence: Seq,
    mapper: &PathMapper,
) -> Vec<ArchivedLog> {
    let mut found = Vec::new();
    for raw in paths {
        let mapped = mapper.apply(raw);
        if mapped.is_dir() {
            scan_dir(&mapped, format, min_sequence, &mut found);
        } else {
            push_candidate(&mapped, format, min_sequence, &mut found);
        }
    }
    found.sort();
    found.dedup();
    found
}

/// Scan an archive directory (one flat level plus day subdirectories).
pub fn discover_archive_dir(
    dir: &Path,
    format: &str,
    min_sequence: Seq,
    mapper: &PathMapper,
) -> Vec<ArchivedLog> {
    let mapped = mapper.apply(dir);
    let mut found = Vec::new();
    scan_dir(&mapped, format, min_sequence, &mut found);
    if let Ok(entries) = std::fs::read_dir(&mapped) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                scan_dir(&path, format, min_sequence, &mut found);
            }
        }
    }
    found.sort();
    found.dedup();
    found
}

fn scan_dir(dir: &Path, format: &str, min_sequence: Seq, found: &mut Vec<ArchivedLog>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        warn!(dir = %dir.display(), "archive directory not readable");
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            push_candidate(&path, format, min_sequence, found);
        }
    }
}

fn push_candidate(path: &Path, format: &str, min_sequence: Seq, found: &mut Vec<ArchivedLog>) {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return;
    };
    let Some(sequence) = sequence_from_file_name(&name, format) else {
        trace!(file = %name, "name does not match the archive format");
        return;
    };
    if sequence == Seq::ZERO || (min_sequence != Seq::ZERO && sequence < min_sequence) {
        return;
    }
    found.push(ArchivedLog {
        sequence,
        path: path.to_path_buf(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_sequence_from_standard_format() {
        let format = "o1_mf_%t_%s_%h_.arc";
        assert_eq!(
            sequence_from_file_name("o1_mf_1_42_abc123_.arc", format),
            Some(Seq(42))
        );
        assert_eq!(
            sequence_from_file_name("o1_mf_3_107_zz9_.arc", format),
            Some(Seq(107))
        );
    }

    #[test]
    fn rejects_non_matching_names() {
        let format = "o1_mf_%t_%s_%h_.arc";
        assert_eq!(sequence_from_file_name("random.txt", format), None);
        assert_eq!(sequence_from_file_name("o1_mf_1_42_abc_.tmp", format), None);
        // Missing digit run where one is required.
        assert_eq!(sequence_from_file_name("o1_mf__42_abc_.arc", format), None);
    }

    #[test]
    fn simple_seq_format() {
        assert_eq!(
            sequence_from_file_name("redo_17.arc", "redo_%S.arc"),
            Some(Seq(17))
        );
    }

    #[test]
    fn path_mapping_rewrites_prefix() {
        let mapper = PathMapper::from_flat(&[
            "/remote/arch".to_string(),
            "/mnt/arch".to_string(),
        ]);
        assert_eq!(
            mapper.apply(Path::new("/remote/arch/day1/redo_5.arc")),
            PathBuf::from("/mnt/arch/day1/redo_5.arc")
        );
        assert_eq!(
            mapper.apply(Path::new("/other/redo_5.arc")),
            PathBuf::from("/other/redo_5.arc")
        );
    }

    #[test]
    fn discovery_sorts_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        for seq in [7u32, 3, 5, 9] {
            std::fs::write(dir.path().join(format!("redo_{seq}.arc")), b"x").unwrap();
        }
        std::fs::write(dir.path().join("unrelated.log"), b"x").unwrap();

        let found = discover_archive_dir(
            dir.path(),
            "redo_%s.arc",
            Seq(5),
            &PathMapper::default(),
        );
        let sequences: Vec<_> = found.iter().map(|a| a.sequence.get()).collect();
        assert_eq!(sequences, vec![5, 7, 9]);
    }

    #[test]
    fn discovery_descends_day_directories() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("2026_08_01");
        std::fs::create_dir(&day).unwrap();
        std::fs::write(day.join("redo_11.arc"), b"x").unwrap();
        std::fs::write(dir.path().join("redo_10.arc"), b"x").unwrap();

        let found = discover_archive_dir(
            dir.path(),
            "redo_%s.arc",
            Seq::ZERO,
            &PathMapper::default(),
        );
        let sequences: Vec<_> = found.iter().map(|a| a.sequence.get()).collect();
        assert_eq!(sequences, vec![10, 11]);
    }

    #[test]
    fn batch_accepts_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("redo_2.arc"), b"x").unwrap();
        let single = dir.path().join("redo_4.arc");
        std::fs::write(&single, b"x").unwrap();

        let found = discover_batch(
            &[dir.path().to_path_buf(), single],
            "redo_%s.arc",
            Seq::ZERO,
            &PathMapper::default(),
        );
        let sequences: Vec<_> = found.iter().map(|a| a.sequence.get()).collect();
        assert_eq!(sequences, vec![2, 4]);
    }
}
