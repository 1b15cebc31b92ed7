//! Entry selection for archive jobs.
//!
//! A job either archives an explicit list of paths, archives everything except
//! what a gitignore-style rule set denies, or archives the whole tree. The
//! filter runs on every walked entry before any file content is read.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Outcome of filtering one walked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Archive the entry (or descend into it, for directories).
    Include,
    /// Leave the entry out.
    Exclude,
    /// Leave the directory out and don't descend into it.
    Prune,
}

/// Inclusion rule for one archive job.
#[derive(Debug, Clone)]
pub enum EntryFilter {
    /// Only these absolute paths, their contents, and the directories leading
    /// to them.
    ExplicitList(Vec<PathBuf>),
    /// Everything not denied by the compiled ignore rules.
    IgnorePattern(Gitignore),
    /// Everything.
    Unfiltered,
}

impl EntryFilter {
    /// Picks the filter mode for a job rooted at `base`.
    ///
    /// A non-empty file list wins over ignore rules; with neither, everything
    /// is archived. Relative entries in `files` are resolved against `base`.
    pub fn for_job(base: &Path, ignore: Option<&str>, files: &[PathBuf]) -> Self {
        if !files.is_empty() {
            return Self::explicit(base, files);
        }
        match ignore {
            Some(rules) if !rules.trim().is_empty() => Self::ignore_rules(base, rules),
            _ => Self::Unfiltered,
        }
    }

    /// Builds an allow-list filter.
    pub fn explicit(base: &Path, files: &[PathBuf]) -> Self {
        let files = files
            .iter()
            .map(|f| {
                if f.is_absolute() {
                    f.clone()
                } else {
                    base.join(f)
                }
            })
            .collect();
        Self::ExplicitList(files)
    }

    /// Compiles newline-delimited gitignore rules. Lines that fail to parse
    /// are logged and skipped rather than failing the whole job.
    pub fn ignore_rules(base: &Path, rules: &str) -> Self {
        let mut builder = GitignoreBuilder::new(base);
        for line in rules.lines() {
            let line = line.trim_end_matches('\r');
            if let Err(e) = builder.add_line(None, line) {
                warn!(pattern = line, error = %e, "skipping invalid ignore pattern");
            }
        }

        match builder.build() {
            Ok(gitignore) => Self::IgnorePattern(gitignore),
            Err(e) => {
                warn!(error = %e, "failed to compile ignore rules; archiving everything");
                Self::Unfiltered
            }
        }
    }

    /// Decides whether the entry at `abs` (`rel` relative to the base) belongs
    /// in the archive.
    pub fn decide(&self, abs: &Path, rel: &Path, is_dir: bool) -> Decision {
        let included = match self {
            EntryFilter::Unfiltered => true,
            EntryFilter::IgnorePattern(gitignore) => !gitignore.matched(rel, is_dir).is_ignore(),
            EntryFilter::ExplicitList(files) => files.iter().any(|f| {
                abs == f.as_path()
                    // `abs` is a directory on the way to a requested path
                    || f.starts_with(abs)
                    // `abs` sits inside a requested directory
                    || abs.starts_with(f)
            }),
        };

        match (included, is_dir) {
            (true, _) => Decision::Include,
            (false, true) => Decision::Prune,
            (false, false) => Decision::Exclude,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(filter: &EntryFilter, base: &Path, rel: &str, is_dir: bool) -> Decision {
        filter.decide(&base.join(rel), Path::new(rel), is_dir)
    }

    #[test]
    fn test_mode_selection() {
        let base = Path::new("/srv/data");
        assert!(matches!(
            EntryFilter::for_job(base, None, &[]),
            EntryFilter::Unfiltered
        ));
        assert!(matches!(
            EntryFilter::for_job(base, Some("  \n"), &[]),
            EntryFilter::Unfiltered
        ));
        assert!(matches!(
            EntryFilter::for_job(base, Some("*.log"), &[]),
            EntryFilter::IgnorePattern(_)
        ));
        assert!(matches!(
            EntryFilter::for_job(base, Some("*.log"), &[PathBuf::from("a")]),
            EntryFilter::ExplicitList(_)
        ));
    }

    #[test]
    fn test_explicit_list_ancestors_and_siblings() {
        let base = Path::new("/srv/data");
        let filter = EntryFilter::explicit(base, &[PathBuf::from("a/b.txt")]);

        assert_eq!(decide(&filter, base, "a", true), Decision::Include);
        assert_eq!(decide(&filter, base, "a/b.txt", false), Decision::Include);
        assert_eq!(decide(&filter, base, "a/other.txt", false), Decision::Exclude);
        assert_eq!(decide(&filter, base, "c", true), Decision::Prune);
    }

    #[test]
    fn test_explicit_list_requested_directory() {
        let base = Path::new("/srv/data");
        let filter = EntryFilter::explicit(base, &[PathBuf::from("/srv/data/config")]);

        assert_eq!(decide(&filter, base, "config", true), Decision::Include);
        assert_eq!(
            decide(&filter, base, "config/nested/server.properties", false),
            Decision::Include
        );
        assert_eq!(decide(&filter, base, "configs.txt", false), Decision::Exclude);
    }

    #[test]
    fn test_explicit_list_component_boundaries() {
        let base = Path::new("/srv/data");
        let filter = EntryFilter::explicit(base, &[PathBuf::from("ab/file")]);
        assert_eq!(decide(&filter, base, "a", true), Decision::Prune);
        assert_eq!(decide(&filter, base, "ab", true), Decision::Include);
    }

    #[test]
    fn test_ignore_patterns() {
        let base = Path::new("/srv/data");
        let filter = EntryFilter::ignore_rules(base, "*.log\n");

        assert_eq!(decide(&filter, base, "server.log", false), Decision::Exclude);
        assert_eq!(
            decide(&filter, base, "keep/server.log.txt", false),
            Decision::Include
        );
        assert_eq!(decide(&filter, base, "keep", true), Decision::Include);
    }

    #[test]
    fn test_ignore_negation_and_directories() {
        let base = Path::new("/srv/data");
        let filter = EntryFilter::ignore_rules(
            base,
            "# caches\r\ncache/\n*.tmp\n!important.tmp\n",
        );

        assert_eq!(decide(&filter, base, "cache", true), Decision::Prune);
        assert_eq!(decide(&filter, base, "cache", false), Decision::Include);
        assert_eq!(decide(&filter, base, "scratch.tmp", false), Decision::Exclude);
        assert_eq!(
            decide(&filter, base, "important.tmp", false),
            Decision::Include
        );
    }

    #[test]
    fn test_unfiltered_includes_everything() {
        let base = Path::new("/srv/data");
        let filter = EntryFilter::Unfiltered;
        assert_eq!(decide(&filter, base, "x/y/z", false), Decision::Include);
        assert_eq!(decide(&filter, base, "x", true), Decision::Include);
    }
}
