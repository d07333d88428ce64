//! Gitignore-like ignore rules for the source-tree walk.
//!
//! Patterns are matched against paths relative to the tree root:
//!
//! - a leading `/` anchors the pattern to the root; without it, the pattern
//!   matches the trailing path segments at any depth
//! - a leading `!` negates the pattern (re-includes a previously ignored
//!   path); the last matching rule wins
//! - `*` and `?` match within a single segment and never cross `/`
//! - a trailing `/` is accepted and stripped (no directory-only matching)
//!
//! Paths with any dot-prefixed component are always ignored, so the cache's
//! own shadow directory and hidden config files are never scanned as
//! content. Matched directories are pruned from descent by the walker, so a
//! rule covering a directory covers everything beneath it.

use std::path::Path;

#[derive(Debug, Clone)]
struct Rule {
    negated: bool,
    anchored: bool,
    segments: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
}

impl IgnoreRules {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .filter_map(|p| parse_rule(p.as_ref()))
            .collect();
        Self { rules }
    }

    /// Whether `relative` (a path under the tree root) is excluded from
    /// scanning.
    pub fn ignored(&self, relative: &Path) -> bool {
        let segments: Vec<&str> = relative
            .iter()
            .filter_map(|c| c.to_str())
            .filter(|c| !c.is_empty() && *c != ".")
            .collect();
        if segments.iter().any(|s| s.starts_with('.')) {
            return true;
        }
        let mut ignored = false;
        for rule in &self.rules {
            if rule.matches(&segments) {
                ignored = !rule.negated;
            }
        }
        ignored
    }
}

fn parse_rule(pattern: &str) -> Option<Rule> {
    let mut pattern = pattern.trim();
    if pattern.is_empty() || pattern.starts_with('#') {
        return None;
    }
    let negated = pattern.starts_with('!');
    if negated {
        pattern = &pattern[1..];
    }
    let anchored = pattern.starts_with('/');
    let pattern = pattern.trim_matches('/');
    if pattern.is_empty() {
        return None;
    }
    Some(Rule {
        negated,
        anchored,
        segments: pattern.split('/').map(str::to_owned).collect(),
    })
}

impl Rule {
    fn matches(&self, path: &[&str]) -> bool {
        let n = self.segments.len();
        if path.len() < n {
            return false;
        }
        let candidate = if self.anchored {
            if path.len() != n {
                return false;
            }
            path
        } else {
            &path[path.len() - n..]
        };
        self.segments
            .iter()
            .zip(candidate)
            .all(|(pat, seg)| segment_matches(pat, seg))
    }
}

/// Glob match of one pattern segment against one path segment (`*` and `?`,
/// neither crossing a separator since segments carry none).
fn segment_matches(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ignored(rules: &IgnoreRules, path: &str) -> bool {
        rules.ignored(&PathBuf::from(path))
    }

    #[test]
    fn empty_rules_ignore_nothing_but_dotfiles() {
        let rules = IgnoreRules::default();
        assert!(!ignored(&rules, "movies/clip.mp4"));
        assert!(ignored(&rules, ".hidden"));
        assert!(ignored(&rules, "movies/.thumbs/clip.mp4"));
    }

    #[test]
    fn unanchored_matches_at_any_depth() {
        let rules = IgnoreRules::new(["trash"]);
        assert!(ignored(&rules, "trash"));
        assert!(ignored(&rules, "a/b/trash"));
        assert!(!ignored(&rules, "trashcan"));
        assert!(!ignored(&rules, "trash/keep.mp4"));
    }

    #[test]
    fn anchored_matches_root_only() {
        let rules = IgnoreRules::new(["/tmp"]);
        assert!(ignored(&rules, "tmp"));
        assert!(!ignored(&rules, "nested/tmp"));
    }

    #[test]
    fn wildcards_do_not_cross_separators() {
        let rules = IgnoreRules::new(["*.bak"]);
        assert!(ignored(&rules, "old.bak"));
        assert!(ignored(&rules, "deep/old.bak"));
        let rules = IgnoreRules::new(["a*c"]);
        assert!(ignored(&rules, "abc"));
        assert!(!ignored(&rules, "a/c"));
    }

    #[test]
    fn question_mark_matches_one_character() {
        let rules = IgnoreRules::new(["clip?.mp4"]);
        assert!(ignored(&rules, "clip1.mp4"));
        assert!(!ignored(&rules, "clip.mp4"));
        assert!(!ignored(&rules, "clip12.mp4"));
    }

    #[test]
    fn negation_reincludes_and_last_match_wins() {
        let rules = IgnoreRules::new(["*.mp4", "!keep.mp4"]);
        assert!(ignored(&rules, "drop.mp4"));
        assert!(!ignored(&rules, "keep.mp4"));

        let reversed = IgnoreRules::new(["!keep.mp4", "*.mp4"]);
        assert!(ignored(&reversed, "keep.mp4"));
    }

    #[test]
    fn multi_segment_patterns_match_trailing_segments() {
        let rules = IgnoreRules::new(["extras/raw"]);
        assert!(ignored(&rules, "extras/raw"));
        assert!(ignored(&rules, "show/extras/raw"));
        assert!(!ignored(&rules, "raw"));
    }

    #[test]
    fn trailing_slash_and_comments_are_tolerated() {
        let rules = IgnoreRules::new(["trash/", "# a comment", "", "   "]);
        assert!(ignored(&rules, "trash"));
        assert!(!ignored(&rules, "other"));
    }
}
