//! Source catalog: discovery and keyword filtering of candidate files.
//!
//! [`discover`] walks a folder for tabular files, [`filter`] narrows them with the keyword rules
//! of a dataset, and [`plan`] assigns every selected file to its dataset category together with
//! the read settings to use.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{DatasetConfig, FileFilters, ReadFileConfig};
use crate::error::{CatalogError, CatalogResult};
use crate::scheduler::HasSize;

/// File extensions (lower case) picked up by [`discover`].
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["xlsx", "xls", "xlsm", "xlsb", "txt", "csv", "parquet", "pq"];

/// A discovered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

impl FileEntry {
    fn name(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or("")
    }
}

/// A file selected for ingestion, with the dataset it belongs to and how to read it.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub size: u64,
    pub dataset: String,
    pub read: ReadFileConfig,
}

impl SourceFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl HasSize for SourceFile {
    fn size_bytes(&self) -> u64 {
        self.size
    }
}

/// Whether `path` has one of the [`SUPPORTED_EXTENSIONS`] (case-insensitive).
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Walk `root` and return every supported file, ordered by path.
///
/// Unreadable subdirectories are logged and skipped; an unreadable root is an error. An empty
/// result is [`CatalogError::NoFilesFound`].
pub fn discover(root: impl AsRef<Path>) -> CatalogResult<Vec<FileEntry>> {
    let root = root.as_ref();
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) if source.depth() == 0 => {
                return Err(CatalogError::Walk {
                    root: root.to_path_buf(),
                    source,
                });
            }
            Err(err) => {
                warn!(root = %root.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_supported(entry.path()) {
            continue;
        }
        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(err) => {
                warn!(file = %entry.path().display(), error = %err, "skipping file without metadata");
                continue;
            }
        };
        files.push(FileEntry {
            path: entry.into_path(),
            size,
        });
    }

    if files.is_empty() {
        return Err(CatalogError::NoFilesFound {
            scope: format!("path '{}'", root.display()),
            detail: format!("no files with extensions {SUPPORTED_EXTENSIONS:?}"),
        });
    }
    Ok(files)
}

/// Keep files whose name passes the include/exclude keywords and whose parent path contains
/// none of the path-exclude keywords. Input order is preserved.
pub fn filter(files: &[FileEntry], filters: &FileFilters) -> Vec<FileEntry> {
    files
        .iter()
        .filter(|f| {
            matches_keywords(f.name(), &filters.filename_include, &filters.filename_exclude)
                && !is_path_ignored(&f.path, &filters.filepath_exclude)
        })
        .cloned()
        .collect()
}

/// Every non-empty `include` keyword is a substring of `name` and no non-empty `exclude`
/// keyword is. Matching is case-sensitive.
pub fn matches_keywords(name: &str, include: &[String], exclude: &[String]) -> bool {
    include.iter().filter(|kw| !kw.is_empty()).all(|kw| name.contains(kw.as_str()))
        && !exclude.iter().filter(|kw| !kw.is_empty()).any(|kw| name.contains(kw.as_str()))
}

/// Whether any keyword appears (case-insensitively) in the parent path of `path`.
pub fn is_path_ignored(path: &Path, keywords: &[String]) -> bool {
    let parent = path
        .parent()
        .map(|p| p.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    keywords
        .iter()
        .filter(|kw| !kw.is_empty())
        .any(|kw| parent.contains(&kw.to_lowercase()))
}

/// Files selected per dataset, plus the datasets that selected nothing.
#[derive(Debug, Default)]
pub struct CatalogPlan {
    /// Selected files in dataset order, then path order.
    pub files: Vec<SourceFile>,
    /// Per-dataset failures; sibling datasets are unaffected.
    pub failures: Vec<CatalogError>,
}

/// Assign discovered files to datasets.
///
/// A dataset with an explicit `absolute_path_list` uses it verbatim; otherwise its filters are
/// applied to `discovered`. Every file is read once: an explicit list claims its files ahead of
/// any filter match, and otherwise the first dataset (in name order) to select a file keeps it.
/// A dataset left with no file of its own is recorded as [`CatalogError::NoFilesFound`].
pub fn plan(discovered: &[FileEntry], datasets: &BTreeMap<String, DatasetConfig>) -> CatalogPlan {
    let mut out = CatalogPlan::default();

    let selections: Vec<(&String, &DatasetConfig, bool, Vec<FileEntry>)> = datasets
        .iter()
        .map(|(dataset, cfg)| match cfg.absolute_path_list.as_deref() {
            Some(paths) if !paths.is_empty() => {
                (dataset, cfg, true, explicit_entries(paths, &mut out.failures))
            }
            _ => (dataset, cfg, false, filter(discovered, &cfg.file_filters)),
        })
        .collect();

    let mut explicit_owner: HashMap<&Path, &str> = HashMap::new();
    for (dataset, _, explicit, selected) in &selections {
        if *explicit {
            for entry in selected {
                explicit_owner.entry(entry.path.as_path()).or_insert(dataset.as_str());
            }
        }
    }

    let mut seen: HashSet<PathBuf> = HashSet::new();
    for (dataset, cfg, explicit, selected) in &selections {
        if selected.is_empty() {
            out.failures.push(no_files(
                dataset,
                format!("set absolute_path_list or check file_filters {:?}", cfg.file_filters),
            ));
            continue;
        }

        let mut kept = 0;
        for entry in selected {
            let owner = explicit_owner.get(entry.path.as_path()).copied();
            let claimed_elsewhere = match owner {
                Some(owner) => owner != dataset.as_str() || !seen.insert(entry.path.clone()),
                None => !seen.insert(entry.path.clone()),
            };
            if claimed_elsewhere {
                warn!(
                    dataset = %dataset,
                    file = %entry.path.display(),
                    owner = owner.unwrap_or("an earlier dataset"),
                    "file already claimed by another dataset"
                );
                continue;
            }
            info!(
                dataset = %dataset,
                file = %entry.name(),
                explicit = *explicit,
                options = %cfg.read_file.options.describe(),
                "file will be read"
            );
            out.files.push(SourceFile {
                path: entry.path.clone(),
                size: entry.size,
                dataset: dataset.to_string(),
                read: cfg.read_file.clone(),
            });
            kept += 1;
        }

        if kept == 0 {
            out.failures.push(no_files(
                dataset,
                "every selected file is claimed by another dataset".to_string(),
            ));
        }
    }

    out
}

fn no_files(dataset: &str, detail: String) -> CatalogError {
    let err = CatalogError::NoFilesFound {
        scope: format!("dataset '{dataset}'"),
        detail,
    };
    warn!(dataset = %dataset, error = %err, "dataset skipped");
    err
}

fn explicit_entries(paths: &[PathBuf], failures: &mut Vec<CatalogError>) -> Vec<FileEntry> {
    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        match fs::metadata(path) {
            Ok(m) => entries.push(FileEntry {
                path: path.clone(),
                size: m.len(),
            }),
            Err(source) => {
                warn!(file = %path.display(), error = %source, "explicit path unavailable");
                failures.push(CatalogError::Stat {
                    path: path.clone(),
                    source,
                });
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> FileEntry {
        FileEntry {
            path: PathBuf::from(path),
            size: 1,
        }
    }

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn filter_applies_include_exclude_and_path_rules() {
        let files = vec![
            entry("/data/POS_2022.xlsx"),
            entry("/data/POS_2022_old.xlsx"),
            entry("/data/Archive/POS_2021.xlsx"),
            entry("/data/EMP_2022.csv"),
        ];
        let filters = FileFilters {
            filename_include: kw(&["POS"]),
            filename_exclude: kw(&["old"]),
            ..FileFilters::default()
        };

        let kept = filter(&files, &filters);
        assert_eq!(kept, vec![entry("/data/POS_2022.xlsx")]);
    }

    #[test]
    fn empty_keywords_are_ignored() {
        assert!(matches_keywords("a.csv", &kw(&[""]), &kw(&[""])));
        assert!(!is_path_ignored(Path::new("/x/a.csv"), &kw(&[""])));
    }

    #[test]
    fn supported_extensions_are_case_insensitive() {
        assert!(is_supported(Path::new("a.XLSX")));
        assert!(is_supported(Path::new("a.txt")));
        assert!(!is_supported(Path::new("a.json")));
        assert!(!is_supported(Path::new("noext")));
    }

    #[test]
    fn plan_reports_empty_dataset_without_dropping_siblings() {
        let files = vec![entry("/data/POS.csv")];
        let mut datasets = BTreeMap::new();
        datasets.insert(
            "missing".to_string(),
            DatasetConfig {
                file_filters: FileFilters {
                    filename_include: kw(&["NOPE"]),
                    ..FileFilters::default()
                },
                ..DatasetConfig::default()
            },
        );
        datasets.insert("positions".to_string(), DatasetConfig::default());

        let plan = plan(&files, &datasets);
        assert_eq!(plan.files.len(), 1);
        assert_eq!(plan.files[0].dataset, "positions");
        assert_eq!(plan.failures.len(), 1);
        assert!(matches!(
            &plan.failures[0],
            CatalogError::NoFilesFound { scope, .. } if scope.contains("missing")
        ));
    }
}
