//! Bad-word lists
//!
//! Layout on disk:
//! - `<dir>/bad_words.txt` - flat list (anomaly mode)
//! - `<dir>/words_by_type/<category>.txt` - one list per attack category
//!
//! One word per line, `#` starts a comment line, matching is case-insensitive.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Built-in flat list (used when no word directory is configured)
const DEFAULT_BAD_WORDS: &[&str] = &[
    "select", "union", "insert", "update", "delete", "drop", "from", "where", "sleep",
    "benchmark", "script", "alert", "onerror", "onload", "iframe", "javascript", "eval",
    "exec", "system", "passwd", "shadow", "etc", "cmd", "wget", "curl", "entity", "doctype",
];

/// Built-in per-category lists
const DEFAULT_BAD_WORDS_BY_TYPE: &[(&str, &[&str])] = &[
    ("command", &["cat", "ls", "whoami", "wget", "curl", "nc", "bash", "sh", "ping", "uname"]),
    ("directory_traversal", &["etc", "passwd", "shadow", "win", "ini", "boot"]),
    ("file_inclusion", &["php", "include", "require", "file", "input", "filter", "data"]),
    ("ldap", &["objectclass", "cn", "uid", "ou", "dc"]),
    ("nosql", &["ne", "gt", "regex", "where", "nin", "exists"]),
    ("sql", &["select", "union", "insert", "drop", "from", "where", "sleep", "or", "and"]),
    ("sst", &["config", "self", "class", "mro", "subclasses", "globals", "builtins"]),
    ("xss", &["script", "alert", "onerror", "onload", "iframe", "img", "svg", "javascript"]),
    ("xxe", &["entity", "doctype", "system", "xml", "element"]),
];

/// Loaded word lists
#[derive(Debug, Clone, Default)]
pub struct BadWords {
    /// Flat list for anomaly mode
    pub common: Vec<String>,
    /// category → words (sorted by category)
    pub by_type: BTreeMap<String, Vec<String>>,
}

impl BadWords {
    /// Built-in lists
    pub fn builtin() -> Self {
        let common = normalize_list(DEFAULT_BAD_WORDS.iter().map(|s| s.to_string()));
        let by_type = DEFAULT_BAD_WORDS_BY_TYPE
            .iter()
            .map(|(cat, words)| {
                (cat.to_string(), normalize_list(words.iter().map(|s| s.to_string())))
            })
            .collect();
        Self { common, by_type }
    }

    /// Load from a word directory. Missing files give empty lists.
    pub fn load(dir: &Path) -> Self {
        let common = match read_word_file(&dir.join("bad_words.txt")) {
            Ok(words) => words,
            Err(e) => {
                log::warn!("Bad word list missing in {}: {}", dir.display(), e);
                Vec::new()
            }
        };

        let mut by_type = BTreeMap::new();
        let type_dir = dir.join("words_by_type");
        match fs::read_dir(&type_dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().map_or(true, |e| e != "txt") {
                        continue;
                    }
                    let Some(category) = category_from_path(&path) else {
                        continue;
                    };
                    match read_word_file(&path) {
                        Ok(words) => {
                            by_type.insert(category, words);
                        }
                        Err(e) => log::warn!("Failed to read {}: {}", path.display(), e),
                    }
                }
            }
            Err(e) => log::warn!("Typed word lists missing in {}: {}", type_dir.display(), e),
        }

        log::info!(
            "Loaded bad words: {} common, {} categories",
            common.len(),
            by_type.len()
        );

        Self { common, by_type }
    }

    /// Category names (sorted)
    pub fn categories(&self) -> Vec<String> {
        self.by_type.keys().cloned().collect()
    }
}

/// `badwords_sql.txt` / `badword_sql.txt` / `sql.txt` → `sql`
fn category_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let category = stem
        .strip_prefix("badwords_")
        .or_else(|| stem.strip_prefix("badword_"))
        .unwrap_or(stem);
    (!category.is_empty()).then(|| category.to_lowercase())
}

fn read_word_file(path: &Path) -> std::io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(normalize_list(
        content
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .map(str::to_string),
    ))
}

fn normalize_list(words: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = words
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
