//! Whitelist matching: which paths in the working directory survive cleaning.
//!
//! Folder patterns protect a directory and everything beneath it. File
//! patterns protect individual files. Patterns are globs matched against the
//! path relative to the working directory, with `/` separators; `*` stays
//! within one path component and `**` crosses components.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Result, UpdateError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct WhitelistEntry {
    pub pattern: String,
    #[serde(default)]
    pub is_folder: bool,
}

impl WhitelistEntry {
    pub fn file(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            is_folder: false,
        }
    }

    pub fn folder(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            is_folder: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    entries: Vec<WhitelistEntry>,
}

impl From<Vec<WhitelistEntry>> for Whitelist {
    fn from(entries: Vec<WhitelistEntry>) -> Self {
        let mut whitelist = Self::default();
        for entry in entries {
            whitelist.add(entry.pattern, entry.is_folder);
        }
        whitelist
    }
}

impl Whitelist {
    /// Add a pattern. Adding a pattern that is already present is a no-op.
    pub fn add(&mut self, pattern: impl Into<String>, is_folder: bool) {
        let entry = WhitelistEntry {
            pattern: pattern.into(),
            is_folder,
        };
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }

    /// Remove every entry with the given pattern.
    pub fn remove(&mut self, pattern: &str) {
        self.entries.retain(|e| e.pattern != pattern);
    }

    pub fn entries(&self) -> &[WhitelistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compiled form of a [`Whitelist`].
pub struct WhitelistMatcher {
    folders: GlobSet,
    files: GlobSet,
}

impl WhitelistMatcher {
    pub fn new(whitelist: &Whitelist) -> Result<Self> {
        let mut folders = GlobSetBuilder::new();
        let mut files = GlobSetBuilder::new();

        for entry in whitelist.entries() {
            let pattern = entry.pattern.trim_start_matches("./").trim_end_matches('/');
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| UpdateError::InvalidConfig {
                    field: "whitelist",
                    message: format!("bad pattern '{}': {}", entry.pattern, e),
                })?;
            if entry.is_folder {
                folders.add(glob);
            } else {
                files.add(glob);
            }
        }

        let build = |builder: GlobSetBuilder| {
            builder.build().map_err(|e| UpdateError::InvalidConfig {
                field: "whitelist",
                message: e.to_string(),
            })
        };

        Ok(Self {
            folders: build(folders)?,
            files: build(files)?,
        })
    }

    pub fn protects_folder(&self, relative: &Path) -> bool {
        self.folders.is_match(relative)
    }

    pub fn protects_file(&self, relative: &Path) -> bool {
        self.files.is_match(relative)
    }

    /// Walk `work_dir` and return every path not protected by the whitelist,
    /// relative to `work_dir`.
    ///
    /// The list is ordered so that a directory always comes after its
    /// contents, and a directory is only listed when nothing beneath it is
    /// protected. Deleting the entries in order therefore empties the tree
    /// without touching protected paths.
    pub fn unprotected_paths(&self, work_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut visited = Vec::new();
        let mut holds_protected: HashSet<PathBuf> = HashSet::new();

        let mut walker = WalkDir::new(work_dir).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(work_dir).display().to_string();
                UpdateError::io(
                    format!("Failed to walk {}", path),
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
                )
            })?;
            let relative = match entry.path().strip_prefix(work_dir) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };
            let is_dir = entry.file_type().is_dir();

            let protected = if is_dir {
                self.protects_folder(&relative)
            } else {
                self.protects_file(&relative)
            };

            if protected {
                mark_ancestors(&relative, &mut holds_protected);
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }

            visited.push((relative, is_dir));
        }

        Ok(visited
            .into_iter()
            .rev()
            .filter(|(path, is_dir)| !(*is_dir && holds_protected.contains(path)))
            .map(|(path, _)| path)
            .collect())
    }
}

fn mark_ancestors(relative: &Path, set: &mut HashSet<PathBuf>) {
    let mut current = relative.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || !set.insert(dir.to_path_buf()) {
            break;
        }
        current = dir.parent();
    }
}

/// Paths under `work_dir` that cleaning would delete.
pub fn whitelist_report(work_dir: &Path, whitelist: &Whitelist) -> Result<Vec<PathBuf>> {
    WhitelistMatcher::new(whitelist)?.unprotected_paths(work_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn build_tree(root: &Path) {
        fs::write(root.join("config.json"), "{}").unwrap();
        fs::write(root.join("old.txt"), "old").unwrap();
        fs::write(root.join(".hidden"), "").unwrap();
        fs::create_dir_all(root.join("saves/slot1")).unwrap();
        fs::write(root.join("saves/slot1/game.dat"), "data").unwrap();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(root.join("lib/core.py"), "").unwrap();
        fs::write(root.join("lib/settings.ini"), "").unwrap();
    }

    fn sorted(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
        paths.sort();
        paths
    }

    #[test]
    fn test_empty_whitelist_lists_everything() {
        let dir = tempdir().unwrap();
        build_tree(dir.path());

        let paths = whitelist_report(dir.path(), &Whitelist::default()).unwrap();
        let expected: Vec<PathBuf> = [
            ".hidden",
            "config.json",
            "lib",
            "lib/core.py",
            "lib/settings.ini",
            "old.txt",
            "saves",
            "saves/slot1",
            "saves/slot1/game.dat",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        assert_eq!(sorted(paths), expected);
    }

    #[test]
    fn test_folder_pattern_protects_subtree() {
        let dir = tempdir().unwrap();
        build_tree(dir.path());

        let mut whitelist = Whitelist::default();
        whitelist.add("saves", true);
        let paths = whitelist_report(dir.path(), &whitelist).unwrap();

        assert!(paths.iter().all(|p| !p.starts_with("saves")));
        assert!(paths.contains(&PathBuf::from("old.txt")));
    }

    #[test]
    fn test_file_pattern_protects_only_that_file() {
        let dir = tempdir().unwrap();
        build_tree(dir.path());

        let mut whitelist = Whitelist::default();
        whitelist.add("lib/settings.ini", false);
        let paths = whitelist_report(dir.path(), &whitelist).unwrap();

        assert!(!paths.contains(&PathBuf::from("lib/settings.ini")));
        assert!(paths.contains(&PathBuf::from("lib/core.py")));
        // a directory holding a protected file is never a deletion candidate
        assert!(!paths.contains(&PathBuf::from("lib")));
    }

    #[test]
    fn test_globstar_file_pattern() {
        let dir = tempdir().unwrap();
        build_tree(dir.path());

        let mut whitelist = Whitelist::default();
        whitelist.add("**/*.dat", false);
        let paths = whitelist_report(dir.path(), &whitelist).unwrap();

        assert!(!paths.contains(&PathBuf::from("saves/slot1/game.dat")));
        assert!(!paths.contains(&PathBuf::from("saves")));
        assert!(paths.contains(&PathBuf::from("config.json")));
    }

    #[test]
    fn test_contents_listed_before_directory() {
        let dir = tempdir().unwrap();
        build_tree(dir.path());

        let paths = whitelist_report(dir.path(), &Whitelist::default()).unwrap();
        let pos = |p: &str| paths.iter().position(|x| x == Path::new(p)).unwrap();
        assert!(pos("saves/slot1/game.dat") < pos("saves/slot1"));
        assert!(pos("saves/slot1") < pos("saves"));
    }

    #[test]
    fn test_add_is_idempotent_and_remove_drops_pattern() {
        let mut whitelist = Whitelist::default();
        whitelist.add("config.json", false);
        whitelist.add("config.json", false);
        whitelist.add("saves", true);
        assert_eq!(whitelist.len(), 2);

        whitelist.remove("config.json");
        assert_eq!(whitelist.entries(), &[WhitelistEntry::folder("saves")]);
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let mut whitelist = Whitelist::default();
        whitelist.add("[unclosed", false);
        assert!(matches!(
            WhitelistMatcher::new(&whitelist),
            Err(UpdateError::InvalidConfig { field: "whitelist", .. })
        ));
    }
}
