//! Path matching strategies.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Matching strategies, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    Suffix,
    NormalizedExact,
    NormalizedSuffix,
    Basename,
    Stem,
}

impl MatchStrategy {
    pub const ORDER: [MatchStrategy; 6] = [
        MatchStrategy::Exact,
        MatchStrategy::Suffix,
        MatchStrategy::NormalizedExact,
        MatchStrategy::NormalizedSuffix,
        MatchStrategy::Basename,
        MatchStrategy::Stem,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MatchStrategy::Exact => "exact",
            MatchStrategy::Suffix => "suffix",
            MatchStrategy::NormalizedExact => "normalized_exact",
            MatchStrategy::NormalizedSuffix => "normalized_suffix",
            MatchStrategy::Basename => "basename",
            MatchStrategy::Stem => "stem",
        }
    }
}

/// Outcome of matching one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatch {
    Unique {
        file_id: String,
        strategy: MatchStrategy,
    },
    /// No strategy gave a single file; `candidates` is the smallest
    /// non-empty candidate set seen.
    Ambiguous { candidates: Vec<String> },
    NoMatch,
}

/// A File node as seen by the matcher.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: String,
    /// Root-relative path.
    pub path: String,
    /// Absolute path, when known.
    pub full_path: Option<String>,
}

#[derive(Debug, Clone)]
struct Keys {
    id: String,
    raw: Vec<String>,
    normalized: Vec<String>,
}

/// Matches source paths against a fixed set of files.
pub struct PathMatcher {
    files: Vec<Keys>,
    case_sensitive: bool,
    by_basename: HashMap<String, BTreeSet<usize>>,
    by_stem: HashMap<String, BTreeSet<usize>>,
}

impl PathMatcher {
    pub fn new(files: Vec<FileEntry>, case_sensitive: bool) -> Self {
        let mut matcher = Self {
            files: Vec::with_capacity(files.len()),
            case_sensitive,
            by_basename: HashMap::new(),
            by_stem: HashMap::new(),
        };

        for (index, file) in files.into_iter().enumerate() {
            let mut raw = vec![matcher.fold(&file.path)];
            if let Some(full) = &file.full_path {
                raw.push(matcher.fold(full));
            }
            let normalized: Vec<String> = raw.iter().map(|p| normalize(p)).collect();

            if let Some(first) = normalized.first() {
                let base = basename(first).to_string();
                matcher
                    .by_stem
                    .entry(stem(&base).to_string())
                    .or_default()
                    .insert(index);
                matcher.by_basename.entry(base).or_default().insert(index);
            }
            matcher.files.push(Keys {
                id: file.id,
                raw,
                normalized,
            });
        }
        matcher
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn fold(&self, path: &str) -> String {
        if self.case_sensitive {
            path.to_string()
        } else {
            path.to_lowercase()
        }
    }

    /// Try every strategy in order until one yields exactly one file.
    pub fn find(&self, source_path: &str) -> PathMatch {
        let raw = self.fold(source_path.trim());
        if raw.is_empty() {
            return PathMatch::NoMatch;
        }
        let normalized = normalize(&raw);
        let mut smallest: Option<BTreeSet<usize>> = None;

        for strategy in MatchStrategy::ORDER {
            let hits = self.candidates(strategy, &raw, &normalized);
            match hits.len() {
                0 => {}
                1 => {
                    if let Some(index) = hits.iter().next() {
                        return PathMatch::Unique {
                            file_id: self.files[*index].id.clone(),
                            strategy,
                        };
                    }
                }
                n => {
                    if smallest.as_ref().map_or(true, |s| n < s.len()) {
                        smallest = Some(hits);
                    }
                }
            }
        }

        match smallest {
            Some(set) => PathMatch::Ambiguous {
                candidates: set.into_iter().map(|i| self.files[i].id.clone()).collect(),
            },
            None => PathMatch::NoMatch,
        }
    }

    fn candidates(&self, strategy: MatchStrategy, raw: &str, normalized: &str) -> BTreeSet<usize> {
        match strategy {
            MatchStrategy::Exact => self.scan(|k| k.raw.iter().any(|p| p == raw)),
            MatchStrategy::Suffix => self.scan(|k| k.raw.iter().any(|p| suffix_match(p, raw, '/'))),
            MatchStrategy::NormalizedExact => {
                self.scan(|k| k.normalized.iter().any(|p| p == normalized))
            }
            MatchStrategy::NormalizedSuffix => self.scan(|k| {
                k.normalized
                    .iter()
                    .any(|p| suffix_match(p, normalized, '/'))
            }),
            MatchStrategy::Basename => self
                .by_basename
                .get(basename(normalized))
                .cloned()
                .unwrap_or_default(),
            MatchStrategy::Stem => self
                .by_stem
                .get(stem(basename(normalized)))
                .cloned()
                .unwrap_or_default(),
        }
    }

    fn scan<F>(&self, pred: F) -> BTreeSet<usize>
    where
        F: Fn(&Keys) -> bool,
    {
        self.files
            .iter()
            .enumerate()
            .filter(|(_, k)| pred(k))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Canonical form: `/` separators, no `./` segments, no doubled or trailing
/// separators.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let parts: Vec<&str> = unified
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Either path ends with the other on a segment boundary.
fn suffix_match(a: &str, b: &str, sep: char) -> bool {
    fn ends_on_boundary(long: &str, short: &str, sep: char) -> bool {
        if short.is_empty() || !long.ends_with(short) {
            return false;
        }
        let cut = long.len() - short.len();
        cut == 0 || short.starts_with(sep) || long[..cut].ends_with(sep)
    }
    ends_on_boundary(a, b, sep) || ends_on_boundary(b, a, sep)
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}
