//! SQL resource files.
//!
//! A resource file holds named fragments and reusable parts:
//!
//! ```sql
//! /*# Users by name #*/
//! /*[findUsers]*/
//! select ${!columns} from users
//! where
//! --#if :name <> blank
//!     and name = :name
//! --#fi
//! ;
//!
//! /*{columns}*/
//! id, name, age;
//! ```
//!
//! A fragment ends at the first line whose trimmed text ends with the
//! delimiter (`;` by default); an unterminated last fragment runs to the end
//! of the file. Parts are inlined into fragments through `${part}` or
//! `${!part}` at load time, then every fragment's directives are verified.

use crate::dynamic::{is_directive, DynamicSql};
use crate::shield::shield;
use crate::template::{MAX_DEPTH, PLACEHOLDER_PATTERN};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

const FRAGMENT_HEADER: &str = r"^/\*\s*\[\s*(\S+?)\s*\]\s*\*/$";
const PART_HEADER: &str = r"^/\*\s*\{\s*(\S+?)\s*\}\s*\*/$";

/// One named, executable SQL statement.
#[derive(Debug, Clone)]
pub struct SqlFragment {
    alias: String,
    name: String,
    source: String,
    description: String,
    dynamic: DynamicSql,
}

impl SqlFragment {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<alias>.<name>`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.alias, self.name)
    }

    /// SQL text with parts inlined and directives still in place.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Directive tree, parsed once at load time.
    pub fn dynamic(&self) -> &DynamicSql {
        &self.dynamic
    }
}

/// All fragments of one file, as of `last_modified`.
#[derive(Debug, Clone)]
pub struct ResourceFile {
    alias: String,
    path: PathBuf,
    last_modified: Option<SystemTime>,
    fragments: HashMap<String, Arc<SqlFragment>>,
    parts: HashMap<String, String>,
}

impl ResourceFile {
    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::FileNotFound`], [`crate::Error::Io`], duplicate names
    /// and [`crate::Error::InvalidFragment`] for directive errors.
    pub fn load(alias: &str, path: &Path, delimiter: &str) -> crate::Result<Self> {
        if !path.is_file() {
            return Err(crate::Error::FileNotFound {
                alias: alias.to_owned(),
                path: path.to_path_buf(),
            });
        }
        let last_modified = modified_time(path);
        let text = fs::read_to_string(path).map_err(|source| crate::Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut file = Self::parse(alias, &text, delimiter)?;
        file.path = path.to_path_buf();
        file.last_modified = last_modified;
        Ok(file)
    }

    /// Parses resource text that did not come from disk.
    pub fn parse(alias: &str, text: &str, delimiter: &str) -> crate::Result<Self> {
        let mut parser = Parser::new(alias, delimiter)?;
        for line in text.lines() {
            parser.feed(line)?;
        }
        let (fragments, parts) = parser.finish()?;

        let pattern = Regex::new(PLACEHOLDER_PATTERN)?;
        let mut resolved = HashMap::with_capacity(fragments.len());
        for (name, (description, body)) in fragments {
            let source = inline_parts(&body, &parts, &pattern);
            let dynamic = DynamicSql::parse(&source).map_err(|e| crate::Error::InvalidFragment {
                name: format!("{alias}.{name}"),
                source: Box::new(e),
            })?;
            tracing::debug!(alias, fragment = %name, "parsed SQL fragment");
            let fragment = SqlFragment {
                alias: alias.to_owned(),
                name: name.clone(),
                source,
                description,
                dynamic,
            };
            resolved.insert(name, Arc::new(fragment));
        }

        Ok(Self {
            alias: alias.to_owned(),
            path: PathBuf::new(),
            last_modified: None,
            fragments: resolved,
            parts,
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    /// True when the file on disk has a different modification time.
    pub fn is_modified(&self) -> bool {
        modified_time(&self.path) != self.last_modified
    }

    pub fn fragment(&self, name: &str) -> Option<&Arc<SqlFragment>> {
        self.fragments.get(name)
    }

    pub fn part(&self, name: &str) -> Option<&str> {
        self.parts.get(name).map(String::as_str)
    }

    /// Fragment names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fragments.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Inlines parts until nothing changes or the pass limit is hit.
fn inline_parts(sql: &str, parts: &HashMap<String, String>, pattern: &Regex) -> String {
    let mut current = sql.to_owned();
    for _ in 0..MAX_DEPTH {
        let next = shield(&current).map_plain(|plain| {
            pattern
                .replace_all(plain, |caps: &Captures| match parts.get(&caps[2]) {
                    Some(part) if &caps[1] != ":" => part.clone(),
                    _ => caps[0].to_owned(),
                })
                .into_owned()
        });
        if next == current {
            break;
        }
        current = next;
    }
    current
}

enum Kind {
    Fragment,
    Part,
}

struct Pending {
    kind: Kind,
    name: String,
    description: Option<String>,
    body: Vec<String>,
}

type Fragments = HashMap<String, (String, String)>;

/// Line-by-line reader for one resource file.
struct Parser<'a> {
    alias: &'a str,
    delimiter: &'a str,
    fragment_header: Regex,
    part_header: Regex,
    fragments: Fragments,
    parts: HashMap<String, String>,
    current: Option<Pending>,
    description: Option<String>,
    open_description: Option<Vec<String>>,
}

impl<'a> Parser<'a> {
    fn new(alias: &'a str, delimiter: &'a str) -> crate::Result<Self> {
        Ok(Self {
            alias,
            delimiter,
            fragment_header: Regex::new(FRAGMENT_HEADER)?,
            part_header: Regex::new(PART_HEADER)?,
            fragments: HashMap::new(),
            parts: HashMap::new(),
            current: None,
            description: None,
            open_description: None,
        })
    }

    fn feed(&mut self, line: &str) -> crate::Result<()> {
        let trimmed = line.trim();

        if let Some(mut lines) = self.open_description.take() {
            match trimmed.strip_suffix("#*/") {
                Some(last) => {
                    lines.push(last.trim().to_owned());
                    self.attach_description(&lines);
                }
                None => {
                    lines.push(trimmed.to_owned());
                    self.open_description = Some(lines);
                }
            }
            return Ok(());
        }
        if let Some(rest) = trimmed.strip_prefix("/*#") {
            match rest.strip_suffix("#*/") {
                Some(text) => self.attach_description(&[text.trim().to_owned()]),
                None => self.open_description = Some(vec![rest.trim().to_owned()]),
            }
            return Ok(());
        }

        if let Some(caps) = self.fragment_header.captures(trimmed) {
            return self.start(Kind::Fragment, caps[1].to_owned());
        }
        if let Some(caps) = self.part_header.captures(trimmed) {
            return self.start(Kind::Part, caps[1].to_owned());
        }

        let Some(current) = self.current.as_mut() else {
            return Ok(());
        };
        if trimmed.is_empty() || (trimmed.starts_with("--") && !is_directive(trimmed)) {
            return Ok(());
        }
        let line = line.trim_end();
        match line.strip_suffix(self.delimiter) {
            Some(last) => {
                if !last.trim().is_empty() {
                    current.body.push(last.trim_end().to_owned());
                }
                self.close()
            }
            None => {
                current.body.push(line.to_owned());
                Ok(())
            }
        }
    }

    fn attach_description(&mut self, lines: &[String]) {
        let text = lines
            .iter()
            .filter(|line| !line.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        match self.current.as_mut() {
            Some(current) if current.body.is_empty() => current.description = Some(text),
            Some(_) => {}
            None => self.description = Some(text),
        }
    }

    fn start(&mut self, kind: Kind, name: String) -> crate::Result<()> {
        self.close()?;
        self.current = Some(Pending {
            kind,
            name,
            description: self.description.take(),
            body: Vec::new(),
        });
        Ok(())
    }

    fn close(&mut self) -> crate::Result<()> {
        let Some(pending) = self.current.take() else {
            return Ok(());
        };
        let body = pending.body.join("\n");
        let duplicate = match pending.kind {
            Kind::Fragment => self
                .fragments
                .insert(
                    pending.name.clone(),
                    (pending.description.unwrap_or_default(), body),
                )
                .is_some(),
            Kind::Part => self.parts.insert(pending.name.clone(), body).is_some(),
        };
        if duplicate {
            return Err(crate::Error::DuplicateName {
                alias: self.alias.to_owned(),
                name: pending.name,
                kind: match pending.kind {
                    Kind::Fragment => "fragment",
                    Kind::Part => "part",
                },
            });
        }
        Ok(())
    }

    fn finish(mut self) -> crate::Result<(Fragments, HashMap<String, String>)> {
        self.close()?;
        Ok((self.fragments, self.parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const USERS: &str = r#"
/*# Users filtered by name #*/
/*[findUsers]*/
select ${!columns} from users
where
--#if :name <> blank
  and name = :name
--#fi
-- not part of the statement
;

/*{columns}*/
id, name, ${!extra};
/*{extra}*/
age;

/*[count]*/
/*#
  Count everything
#*/
select count(*)
  from users;

/*[literal]*/
select ';' as semi, ${columns} from dual;

/*[tail]*/
select 1
"#;

    #[test]
    fn test_parse_fragments_and_parts() {
        let file = ResourceFile::parse("users", USERS, ";").unwrap();
        assert_eq!(file.names(), vec!["count", "findUsers", "literal", "tail"]);
        assert_eq!(file.part("extra"), Some("age"));

        let find = file.fragment("findUsers").unwrap();
        assert_eq!(find.qualified_name(), "users.findUsers");
        assert_eq!(find.description(), "Users filtered by name");
        assert_eq!(
            find.source(),
            "select id, name, age from users\nwhere\n--#if :name <> blank\n  and name = :name\n--#fi"
        );
        assert!(find.dynamic().is_dynamic());

        let count = file.fragment("count").unwrap();
        assert_eq!(count.description(), "Count everything");
        assert_eq!(count.source(), "select count(*)\n  from users");

        assert_eq!(file.fragment("tail").unwrap().source(), "select 1");
        assert!(file.fragment("columns").is_none());
    }

    #[test]
    fn test_parts_inline_outside_literals_only() {
        let file = ResourceFile::parse("u", "/*[a]*/\nselect '${!p}', ${!p};\n/*{p}*/\nx;", ";").unwrap();
        assert_eq!(file.fragment("a").unwrap().source(), "select '${!p}', x");
    }

    #[test]
    fn test_custom_delimiter() {
        let file = ResourceFile::parse("u", "/*[a]*/\nselect 1 from t;\nunion select 2\n/\n/*[b]*/\nselect 3/", "/").unwrap();
        assert_eq!(file.fragment("a").unwrap().source(), "select 1 from t;\nunion select 2");
        assert_eq!(file.fragment("b").unwrap().source(), "select 3");
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let err = ResourceFile::parse("u", "/*[a]*/\nselect 1;\n/*[a]*/\nselect 2;", ";").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::DuplicateName { name, kind: "fragment", .. } if name == "a"
        ));
        let err = ResourceFile::parse("u", "/*{p}*/\n1;\n/*{p}*/\n2;", ";").unwrap_err();
        assert!(matches!(err, crate::Error::DuplicateName { kind: "part", .. }));
    }

    #[test]
    fn test_invalid_directives_fail_at_load() {
        let err = ResourceFile::parse("u", "/*[bad]*/\n--#if :a = 1\nselect 1;", ";").unwrap_err();
        match err {
            crate::Error::InvalidFragment { name, source } => {
                assert_eq!(name, "u.bad");
                assert!(matches!(*source, crate::Error::Directive { line: 1, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.sql");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(USERS.as_bytes()).unwrap();
        drop(file);

        let resource = ResourceFile::load("users", &path, ";").unwrap();
        assert_eq!(resource.len(), 4);
        assert_eq!(resource.path(), path.as_path());
        assert!(resource.last_modified().is_some());
        assert!(!resource.is_modified());

        let missing = ResourceFile::load("gone", &dir.path().join("gone.sql"), ";").unwrap_err();
        assert!(matches!(missing, crate::Error::FileNotFound { alias, .. } if alias == "gone"));
    }
}
