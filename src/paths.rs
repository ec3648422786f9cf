//! Expand command-line inputs into the flat list of candidate paths.
//!
//! URLs and plain files pass through untouched. Directories are walked
//! recursively; what gets visited is governed by [`ExpandOptions`].

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::Path;

use crate::config::IngestConfig;
use crate::fetch::is_remote_url;

/// Version-control metadata directories, never descended into.
const VCS_DIRS: &[&str] = &[".git", ".jj"];

#[derive(Debug, Clone, Default)]
pub struct ExpandOptions {
    pub respect_gitignore: bool,
    pub exclude_globs: Vec<String>,
}

impl From<&IngestConfig> for ExpandOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            respect_gitignore: config.respect_gitignore,
            exclude_globs: config.exclude_globs.clone(),
        }
    }
}

/// Returns de-duplicated, sorted candidates.
///
/// A path that does not exist is passed through so that the fetcher reports
/// it as an item-level error.
pub fn expand_inputs(inputs: &[String], options: &ExpandOptions) -> Result<Vec<String>> {
    let excludes = build_globset(&options.exclude_globs)?;
    let mut out = BTreeSet::new();

    for input in inputs {
        let path = Path::new(input);
        if is_remote_url(input) || !path.is_dir() {
            out.insert(input.clone());
            continue;
        }
        walk_dir(path, options.respect_gitignore, &excludes, &mut out)?;
    }

    Ok(out.into_iter().collect())
}

fn walk_dir(
    root: &Path,
    respect_gitignore: bool,
    excludes: &GlobSet,
    out: &mut BTreeSet<String>,
) -> Result<()> {
    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(respect_gitignore)
        .git_global(respect_gitignore)
        .git_exclude(respect_gitignore)
        .ignore(respect_gitignore)
        .parents(respect_gitignore)
        .require_git(false)
        .filter_entry(|entry| {
            let is_vcs = entry
                .file_name()
                .to_str()
                .map(|name| VCS_DIRS.contains(&name))
                .unwrap_or(false);
            !(is_vcs && entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        })
        .build();

    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if excludes.is_match(relative) {
            tracing::debug!(path = %path.display(), "excluded by glob");
            continue;
        }

        out.insert(path.to_string_lossy().into_owned());
    }

    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(paths: &[String], root: &Path) -> Vec<String> {
        paths
            .iter()
            .map(|p| {
                Path::new(p)
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    fn setup() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("docs/sub")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("docs/a.md"), "a").unwrap();
        fs::write(root.join("docs/sub/b.txt"), "b").unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();
        fs::write(root.join("build/out.txt"), "o").unwrap();
        fs::write(root.join(".gitignore"), "build/\n").unwrap();
        tmp
    }

    #[test]
    fn walks_directories_respecting_gitignore() {
        let tmp = setup();
        let opts = ExpandOptions {
            respect_gitignore: true,
            exclude_globs: vec![],
        };
        let got = expand_inputs(&[tmp.path().to_string_lossy().into_owned()], &opts).unwrap();
        assert_eq!(
            names(&got, tmp.path()),
            vec![".gitignore", "docs/a.md", "docs/sub/b.txt"]
        );
    }

    #[test]
    fn gitignore_can_be_disabled_but_vcs_dirs_stay_hidden() {
        let tmp = setup();
        let got = expand_inputs(
            &[tmp.path().to_string_lossy().into_owned()],
            &ExpandOptions::default(),
        )
        .unwrap();
        let got = names(&got, tmp.path());
        assert!(got.contains(&"build/out.txt".to_string()));
        assert!(!got.iter().any(|p| p.starts_with(".git/")));
    }

    #[test]
    fn exclude_globs_apply_relative_to_root() {
        let tmp = setup();
        let opts = ExpandOptions {
            respect_gitignore: true,
            exclude_globs: vec!["**/*.txt".to_string(), ".gitignore".to_string()],
        };
        let got = expand_inputs(&[tmp.path().to_string_lossy().into_owned()], &opts).unwrap();
        assert_eq!(names(&got, tmp.path()), vec!["docs/a.md"]);
    }

    #[test]
    fn urls_and_files_pass_through_deduplicated() {
        let tmp = setup();
        let file = tmp.path().join("docs/a.md").to_string_lossy().into_owned();
        let inputs = vec![
            "https://example.com/page".to_string(),
            file.clone(),
            file.clone(),
            "missing.txt".to_string(),
        ];
        let got = expand_inputs(&inputs, &ExpandOptions::default()).unwrap();
        assert_eq!(got.len(), 3);
        assert!(got.contains(&file));
        assert!(got.contains(&"missing.txt".to_string()));
        assert!(got.contains(&"https://example.com/page".to_string()));
    }

    #[test]
    fn invalid_glob_is_an_error() {
        let opts = ExpandOptions {
            respect_gitignore: false,
            exclude_globs: vec!["a[".to_string()],
        };
        assert!(expand_inputs(&["x".to_string()], &opts).is_err());
    }
}
