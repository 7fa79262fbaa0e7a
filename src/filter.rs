//! Allow/ignore lists for topics and consumer groups.
//!
//! A pattern wrapped in slashes (`/^team-.*/`) is a regular expression,
//! anything else must match the name exactly. A name passes a [`Filter`] when
//! at least one allow pattern and no ignore pattern matches it.

use regex::Regex;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Filter {
    allowed: Vec<Regex>,
    ignored: Vec<Regex>,
}

impl Filter {
    pub fn new<S: AsRef<str>>(allowed: &[S], ignored: &[S]) -> Result<Self> {
        Ok(Self {
            allowed: compile_all(allowed)?,
            ignored: compile_all(ignored)?,
        })
    }

    /// Compile a single `/regex/` or exact-name pattern.
    pub fn compile_pattern(pattern: &str) -> Result<Regex> {
        let regex = match pattern
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(expr) => Regex::new(expr)?,
            None => Regex::new(&format!("^{}$", regex::escape(pattern)))?,
        };
        Ok(regex)
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.iter().any(|re| re.is_match(name))
            && !self.ignored.iter().any(|re| re.is_match(name))
    }
}

fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Filter::compile_pattern(p.as_ref()))
        .collect()
}
