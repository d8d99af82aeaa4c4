//! Literal and comment shielding.
//!
//! Every pass that looks for `:name` or `${name}` tokens first splits the SQL
//! into plain and opaque segments. Opaque segments are single-quoted strings
//! (`''` escapes a quote), double-quoted identifiers, `--` line comments,
//! `/* */` block comments (nesting allowed) and `::type` casts. Passes only
//! rewrite plain segments; opaque segments are written back untouched, so
//! restoring them is exact.

/// One run of SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Text where parameter and template tokens are recognised.
    Plain(&'a str),
    /// Literal, quoted identifier, comment or cast; never rewritten.
    Opaque(&'a str),
}

/// SQL split into ordered plain/opaque segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shielded<'a> {
    segments: Vec<Segment<'a>>,
}

impl<'a> Shielded<'a> {
    pub fn segments(&self) -> &[Segment<'a>] {
        &self.segments
    }

    /// Plain segments in source order.
    pub fn plain(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Plain(text) => Some(*text),
            Segment::Opaque(_) => None,
        })
    }

    /// Rewrites every plain segment with `f` and reassembles the SQL.
    pub fn map_plain<F>(&self, mut f: F) -> String
    where
        F: FnMut(&str) -> String,
    {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Plain(text) => f(text),
                Segment::Opaque(text) => (*text).to_owned(),
            })
            .collect()
    }

    /// Fallible version of [`Shielded::map_plain`].
    pub fn try_map_plain<F, E>(&self, mut f: F) -> Result<String, E>
    where
        F: FnMut(&str) -> Result<String, E>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Plain(text) => out.push_str(&f(text)?),
                Segment::Opaque(text) => out.push_str(text),
            }
        }
        Ok(out)
    }

    /// Reassembles the original SQL.
    pub fn restore(&self) -> String {
        self.map_plain(str::to_owned)
    }
}

/// Splits `sql` into plain and opaque segments.
pub fn shield(sql: &str) -> Shielded<'_> {
    let bytes = sql.as_bytes();
    let mut segments = Vec::new();
    let mut plain_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let next = bytes.get(i + 1).copied();
        let end = match bytes[i] {
            b'\'' => Some(scan_quoted(bytes, i, b'\'')),
            b'"' => Some(scan_quoted(bytes, i, b'"')),
            b'-' if next == Some(b'-') => Some(scan_line(bytes, i)),
            b'/' if next == Some(b'*') => Some(scan_block(bytes, i)),
            b':' if next == Some(b':') && bytes.get(i + 2).is_some_and(|b| is_ident_start(*b)) => {
                Some(scan_ident(bytes, i + 2))
            }
            _ => None,
        };
        match end {
            Some(end) => {
                if plain_start < i {
                    segments.push(Segment::Plain(&sql[plain_start..i]));
                }
                segments.push(Segment::Opaque(&sql[i..end]));
                i = end;
                plain_start = end;
            }
            None => i += 1,
        }
    }
    if plain_start < bytes.len() {
        segments.push(Segment::Plain(&sql[plain_start..]));
    }
    Shielded { segments }
}

fn scan_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut j = start + 1;
    while j < bytes.len() {
        if bytes[j] == quote {
            if bytes.get(j + 1) == Some(&quote) {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    bytes.len()
}

fn scan_line(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(bytes.len(), |offset| start + offset)
}

fn scan_block(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut j = start;
    while j < bytes.len() {
        match (bytes[j], bytes.get(j + 1).copied()) {
            (b'/', Some(b'*')) => {
                depth += 1;
                j += 2;
            }
            (b'*', Some(b'/')) => {
                depth -= 1;
                j += 2;
                if depth == 0 {
                    return j;
                }
            }
            _ => j += 1,
        }
    }
    bytes.len()
}

fn scan_ident(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
        .map_or(bytes.len(), |offset| start + offset)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}
