//! `${name}` string templates.
//!
//! Three forms are recognised outside literals and comments:
//!
//! - `${name}` and `${:name}` inline the value as a SQL literal (strings
//!   quoted, arrays expanded to a `, ` list);
//! - `${!name}` inlines the value verbatim, for trusted SQL snippets.
//!
//! A name resolves against the caller's arguments first and the constants
//! table second. Constants are SQL text and are always inlined verbatim.
//! Unresolved placeholders stay in place.

use crate::shield::shield;
use crate::value::{format_literal, lookup, Args};
use regex::{Captures, Regex};
use std::collections::HashMap;

/// Maximum number of re-scans for placeholders produced by a substitution.
pub const MAX_DEPTH: usize = 8;

/// Matches `${name}`, `${!name}` and `${:name}` with optional inner spaces.
pub(crate) const PLACEHOLDER_PATTERN: &str =
    r"\$\{\s*([!:]?)\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}";

/// Resolves `${}` placeholders against arguments and constants.
#[derive(Debug, Clone)]
pub struct TemplateFormatter {
    pattern: Regex,
    constants: HashMap<String, String>,
}

impl TemplateFormatter {
    pub fn new(constants: HashMap<String, String>) -> crate::Result<Self> {
        Ok(Self {
            pattern: Regex::new(PLACEHOLDER_PATTERN)?,
            constants,
        })
    }

    pub fn constants(&self) -> &HashMap<String, String> {
        &self.constants
    }

    /// Substitutes placeholders, re-scanning up to [`MAX_DEPTH`] times.
    ///
    /// Hitting the ceiling stops expansion without error.
    pub fn substitute(&self, sql: &str, values: &Args) -> String {
        let mut current = sql.to_owned();
        for depth in 0..MAX_DEPTH {
            let next = self.substitute_once(&current, values);
            if next == current {
                return next;
            }
            current = next;
            if depth + 1 == MAX_DEPTH {
                tracing::debug!(depth = MAX_DEPTH, "template expansion ceiling reached");
            }
        }
        current
    }

    /// Placeholder names still present outside literals and comments.
    pub fn placeholders(&self, sql: &str) -> Vec<String> {
        shield(sql)
            .plain()
            .flat_map(|plain| self.pattern.captures_iter(plain))
            .map(|caps| caps[2].to_owned())
            .collect()
    }

    fn substitute_once(&self, sql: &str, values: &Args) -> String {
        shield(sql).map_plain(|plain| {
            self.pattern
                .replace_all(plain, |caps: &Captures| {
                    let raw = &caps[1] == "!";
                    let name = &caps[2];
                    if let Some(value) = lookup(values, name) {
                        return format_literal(value, !raw);
                    }
                    match self.constants.get(name) {
                        Some(constant) => constant.clone(),
                        None => caps[0].to_owned(),
                    }
                })
                .into_owned()
        })
    }
}
