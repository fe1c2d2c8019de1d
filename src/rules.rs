use regex::Regex;
use tracing::error;

/// How a keyword spec was compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Single token, case-folded substring containment (no regex).
    Substring,
    /// Multi-word literal with whitespace normalized to `\s+`.
    Phrase,
    /// `*` wildcard pattern.
    Glob,
    /// Explicit `re:` pattern, used verbatim.
    Regex,
}

enum Matcher {
    Substring(String),
    Pattern(Regex),
}

/// One compiled keyword rule. Immutable after construction; `check` is pure
/// and safe to call concurrently.
pub struct MatchRule {
    original: String,
    strategy: MatchStrategy,
    matcher: Matcher,
}

impl MatchRule {
    /// The keyword spec as the user wrote it, for alert display.
    pub fn original(&self) -> &str {
        &self.original
    }

    #[allow(dead_code)]
    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    pub fn check(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::Substring(needle) => text.to_lowercase().contains(needle),
            Matcher::Pattern(re) => re.is_match(text),
        }
    }
}

/// Compile keyword specs into matching rules, preserving input order.
///
/// Individually invalid entries (bad `re:` patterns) are logged and skipped;
/// they never abort compilation of the rest.
pub fn compile(specs: &[String]) -> Vec<MatchRule> {
    let mut rules = Vec::with_capacity(specs.len());

    for spec in specs {
        match compile_one(spec) {
            Ok(rule) => rules.push(rule),
            Err(e) => error!(keyword = %spec, error = %e, "Invalid keyword ignored"),
        }
    }

    rules
}

fn compile_one(spec: &str) -> Result<MatchRule, regex::Error> {
    // Explicit regex (prefix "re:")
    if let Some(pattern) = spec.strip_prefix("re:") {
        let re = Regex::new(pattern)?;
        return Ok(MatchRule {
            original: spec.to_string(),
            strategy: MatchStrategy::Regex,
            matcher: Matcher::Pattern(re),
        });
    }

    // Glob pattern (contains "*"): escape everything except '*', then glue
    // the segments with ".*". "(?si)" so matches survive line wraps.
    if spec.contains('*') {
        let pattern = spec
            .split('*')
            .map(escape_segment)
            .collect::<Vec<_>>()
            .join(".*");
        let re = Regex::new(&format!("(?si){pattern}"))?;
        return Ok(MatchRule {
            original: spec.to_string(),
            strategy: MatchStrategy::Glob,
            matcher: Matcher::Pattern(re),
        });
    }

    // Phrase with whitespace: lenient whitespace matching
    if spec.contains(char::is_whitespace) {
        let re = Regex::new(&format!("(?si){}", escape_segment(spec)))?;
        return Ok(MatchRule {
            original: spec.to_string(),
            strategy: MatchStrategy::Phrase,
            matcher: Matcher::Pattern(re),
        });
    }

    // Fast path for single words
    Ok(MatchRule {
        original: spec.to_string(),
        strategy: MatchStrategy::Substring,
        matcher: Matcher::Substring(spec.to_lowercase()),
    })
}

/// Literal-escape a segment, then relax each whitespace run to `\s+` so the
/// rule still matches across line wraps and doubled spaces.
fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() * 2);
    let mut in_space = false;
    for ch in segment.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push_str(r"\s+");
                in_space = true;
            }
        } else {
            in_space = false;
            out.push_str(&regex::escape(&ch.to_string()));
        }
    }
    out
}
