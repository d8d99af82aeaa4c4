//! Line-oriented dynamic SQL directives.
//!
//! Directive lines start with `--#` (or `-- #`, or a bare `#`):
//!
//! ```sql
//! select * from users
//! where
//! --#if :name <> blank
//!     and name = :name
//! --#fi
//! --#choose
//! --#when :age > 60
//!     and age > 60
//! --#default
//!     and age > 18
//! --#end
//! --#for id,i of :ids delimiter ' or ' filter :id > 0
//!     id = :id
//! --#end
//! ```
//!
//! Text is parsed once into a [`Block`] tree with an explicit frame stack,
//! so malformed directives fail at load time. Rendering walks the tree
//! against an argument mapping.

use crate::expression::{Expression, ExpressionContext};
use crate::shield::{shield, Segment};
use crate::value::{lookup, lookup_path, Args};
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;

const FOR_HEADER: &str = r"(?i)^(?P<item>[A-Za-z_]\w*)(?:\s*,\s*(?P<index>[A-Za-z_]\w*))?\s+of\s+:(?P<list>[A-Za-z_]\w*(?:\.\w+)*)(?:\s+delimiter\s+'(?P<delimiter>(?:[^']|'')*)')?(?:\s+filter\s+(?P<filter>.+?))?\s*$";

const DEFAULT_DELIMITER: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    If,
    Fi,
    Choose,
    Switch,
    When,
    Case,
    Default,
    Break,
    End,
    Done,
    For,
}

/// Node of a parsed dynamic SQL text.
#[derive(Debug, Clone)]
pub enum Block {
    /// One line of SQL.
    Text(String),
    If {
        condition: Expression,
        body: Vec<Block>,
    },
    /// First matching `when` wins; `default` applies when none matched.
    Choose {
        whens: Vec<(Expression, Vec<Block>)>,
        default: Option<Vec<Block>>,
    },
    For(Box<ForLoop>),
}

/// A `--#for item[,index] of :list [delimiter 'd'] [filter expr]` block.
#[derive(Debug, Clone)]
pub struct ForLoop {
    pub item: String,
    pub index: Option<String>,
    pub source: String,
    pub delimiter: String,
    pub filter: Option<Expression>,
    pub body: Vec<Block>,
}

/// Output of rendering: surviving SQL plus the arguments it needs.
///
/// `args` holds the caller's arguments and one synthetic entry per loop
/// variable reference, named `_<var>[_<path>]_<loop>_<element>`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub args: Args,
}

/// Parsed dynamic SQL.
#[derive(Debug, Clone, Default)]
pub struct DynamicSql {
    blocks: Vec<Block>,
}

enum Branch {
    When(Expression, Vec<Block>),
    Default(Vec<Block>),
}

enum Frame {
    If {
        line: usize,
        condition: Expression,
        body: Vec<Block>,
    },
    Choose {
        line: usize,
        switch: Option<String>,
        whens: Vec<(Expression, Vec<Block>)>,
        default: Option<Vec<Block>>,
        branch: Option<Branch>,
    },
    For {
        line: usize,
        header: ForLoop,
    },
}

impl Frame {
    fn line(&self) -> usize {
        match self {
            Frame::If { line, .. } | Frame::Choose { line, .. } | Frame::For { line, .. } => *line,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Frame::If { .. } => "'--#if'",
            Frame::Choose { switch: None, .. } => "'--#choose'",
            Frame::Choose { .. } => "'--#switch'",
            Frame::For { .. } => "'--#for'",
        }
    }
}

impl DynamicSql {
    /// Parses and verifies `text`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Directive`] for unbalanced blocks, misplaced branch
    /// directives, malformed `--#for` headers or bad conditions.
    pub fn parse(text: &str) -> crate::Result<Self> {
        let for_header = Regex::new(FOR_HEADER)?;
        let mut root = Vec::new();
        let mut stack: Vec<Frame> = Vec::new();

        for (i, line) in text.lines().enumerate() {
            let n = i + 1;
            let Some((keyword, rest)) = directive(line) else {
                push_block(&mut stack, &mut root, Block::Text(line.to_owned()), n)?;
                continue;
            };
            match keyword {
                Keyword::If => stack.push(Frame::If {
                    line: n,
                    condition: condition(rest, n)?,
                    body: Vec::new(),
                }),
                Keyword::Fi => match stack.pop() {
                    Some(Frame::If { condition, body, .. }) => {
                        push_block(&mut stack, &mut root, Block::If { condition, body }, n)?
                    }
                    Some(frame) => return Err(mismatch("--#fi", &frame, n)),
                    None => {
                        return Err(crate::Error::directive(n, "'--#fi' without matching '--#if'"))
                    }
                },
                Keyword::Choose | Keyword::Switch => {
                    let switch = if keyword == Keyword::Switch {
                        Some(switch_name(rest, n)?)
                    } else {
                        None
                    };
                    stack.push(Frame::Choose {
                        line: n,
                        switch,
                        whens: Vec::new(),
                        default: None,
                        branch: None,
                    });
                }
                Keyword::When | Keyword::Case => {
                    let Some(Frame::Choose {
                        switch,
                        whens,
                        default,
                        branch,
                        ..
                    }) = stack.last_mut()
                    else {
                        return Err(crate::Error::directive(
                            n,
                            "'--#when'/'--#case' outside of '--#choose'/'--#switch'",
                        ));
                    };
                    if default.is_some() || matches!(branch, Some(Branch::Default(_))) {
                        return Err(crate::Error::directive(n, "branch after '--#default'"));
                    }
                    let expr = match (keyword, switch.as_deref()) {
                        (Keyword::Case, Some(name)) => condition(&format!(":{name} = {rest}"), n)?,
                        (Keyword::Case, None) => {
                            return Err(crate::Error::directive(n, "'--#case' outside of '--#switch'"))
                        }
                        _ => condition(rest, n)?,
                    };
                    close_branch(whens, default, branch.take());
                    *branch = Some(Branch::When(expr, Vec::new()));
                }
                Keyword::Default => {
                    let Some(Frame::Choose {
                        whens,
                        default,
                        branch,
                        ..
                    }) = stack.last_mut()
                    else {
                        return Err(crate::Error::directive(n, "'--#default' outside of '--#choose'"));
                    };
                    if default.is_some() || matches!(branch, Some(Branch::Default(_))) {
                        return Err(crate::Error::directive(n, "duplicate '--#default'"));
                    }
                    close_branch(whens, default, branch.take());
                    *branch = Some(Branch::Default(Vec::new()));
                }
                Keyword::Break => {
                    let Some(Frame::Choose {
                        whens,
                        default,
                        branch,
                        ..
                    }) = stack.last_mut()
                    else {
                        return Err(crate::Error::directive(n, "'--#break' outside of '--#choose'"));
                    };
                    close_branch(whens, default, branch.take());
                }
                Keyword::End | Keyword::Done => {
                    let closing = if keyword == Keyword::Done { "--#done" } else { "--#end" };
                    match stack.pop() {
                        Some(Frame::Choose {
                            mut whens,
                            mut default,
                            branch,
                            ..
                        }) if keyword == Keyword::End => {
                            close_branch(&mut whens, &mut default, branch);
                            push_block(&mut stack, &mut root, Block::Choose { whens, default }, n)?;
                        }
                        Some(Frame::For { header, .. }) => {
                            push_block(&mut stack, &mut root, Block::For(Box::new(header)), n)?
                        }
                        Some(frame) => return Err(mismatch(closing, &frame, n)),
                        None => {
                            return Err(crate::Error::directive(
                                n,
                                format!("'{closing}' without matching '--#choose' or '--#for'"),
                            ))
                        }
                    }
                }
                Keyword::For => stack.push(Frame::For {
                    line: n,
                    header: parse_for(&for_header, rest, n)?,
                }),
            }
        }

        if let Some(frame) = stack.last() {
            return Err(crate::Error::directive(
                frame.line(),
                format!("{} is never closed", frame.describe()),
            ));
        }
        Ok(Self { blocks: root })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// True if any directive block is present.
    pub fn is_dynamic(&self) -> bool {
        self.blocks.iter().any(|block| !matches!(block, Block::Text(_)))
    }

    /// Renders against `args`; named loop references use `prefix`.
    ///
    /// # Errors
    ///
    /// Condition errors, and [`crate::Error::EmptyLoopSource`] for an
    /// unresolvable `--#for` list in strict mode.
    pub fn render(
        &self,
        args: &Args,
        ctx: &ExpressionContext,
        prefix: char,
    ) -> crate::Result<RenderedSql> {
        let mut state = RenderState {
            ctx,
            prefix,
            loops: 0,
            bound: Args::new(),
        };
        let mut lines = Vec::new();
        state.render_blocks(&self.blocks, args, &mut lines)?;
        let mut args = args.clone();
        for (name, value) in state.bound {
            args.entry(name).or_insert(value);
        }
        Ok(RenderedSql {
            sql: lines.join("\n"),
            args,
        })
    }
}

/// True for a line that opens, continues or closes a directive block.
pub(crate) fn is_directive(line: &str) -> bool {
    directive(line).is_some()
}

fn directive(line: &str) -> Option<(Keyword, &str)> {
    let trimmed = line.trim();
    let body = trimmed
        .strip_prefix("--")
        .map_or(trimmed, str::trim_start)
        .strip_prefix('#')?;
    let end = body.find(char::is_whitespace).unwrap_or(body.len());
    let keyword = match body[..end].to_ascii_lowercase().as_str() {
        "if" => Keyword::If,
        "fi" => Keyword::Fi,
        "choose" => Keyword::Choose,
        "switch" => Keyword::Switch,
        "when" => Keyword::When,
        "case" => Keyword::Case,
        "default" => Keyword::Default,
        "break" => Keyword::Break,
        "end" => Keyword::End,
        "done" => Keyword::Done,
        "for" => Keyword::For,
        _ => return None,
    };
    Some((keyword, body[end..].trim()))
}

fn condition(source: &str, line: usize) -> crate::Result<Expression> {
    if source.trim().is_empty() {
        return Err(crate::Error::directive(line, "missing condition"));
    }
    Expression::parse(source).map_err(|e| crate::Error::directive(line, e.to_string()))
}

fn switch_name(rest: &str, line: usize) -> crate::Result<String> {
    rest.strip_prefix(':')
        .filter(|name| !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.'))
        .map(str::to_owned)
        .ok_or_else(|| crate::Error::directive(line, format!("'--#switch' expects ':name', got '{rest}'")))
}

fn mismatch(closing: &str, frame: &Frame, line: usize) -> crate::Error {
    crate::Error::directive(
        line,
        format!(
            "'{closing}' cannot close {} opened at line {}",
            frame.describe(),
            frame.line()
        ),
    )
}

fn parse_for(pattern: &Regex, rest: &str, line: usize) -> crate::Result<ForLoop> {
    let caps = pattern
        .captures(rest)
        .ok_or_else(|| crate::Error::directive(line, format!("malformed '--#for' header '{rest}'")))?;
    let filter = match caps.name("filter") {
        Some(filter) => Some(condition(filter.as_str(), line)?),
        None => None,
    };
    let delimiter = caps.name("delimiter").map_or_else(
        || DEFAULT_DELIMITER.to_owned(),
        |d| d.as_str().replace("''", "'").replace("\\n", "\n").replace("\\t", "\t"),
    );
    Ok(ForLoop {
        item: caps["item"].to_owned(),
        index: caps.name("index").map(|m| m.as_str().to_owned()),
        source: caps["list"].to_owned(),
        delimiter,
        filter,
        body: Vec::new(),
    })
}

fn close_branch(
    whens: &mut Vec<(Expression, Vec<Block>)>,
    default: &mut Option<Vec<Block>>,
    branch: Option<Branch>,
) {
    match branch {
        Some(Branch::When(condition, body)) => whens.push((condition, body)),
        Some(Branch::Default(body)) => *default = Some(body),
        None => {}
    }
}

fn push_block(stack: &mut [Frame], root: &mut Vec<Block>, block: Block, line: usize) -> crate::Result<()> {
    let body = match stack.last_mut() {
        None => root,
        Some(Frame::If { body, .. }) => body,
        Some(Frame::For { header, .. }) => &mut header.body,
        Some(Frame::Choose { branch, .. }) => match branch {
            Some(Branch::When(_, body)) | Some(Branch::Default(body)) => body,
            None => {
                if let Block::Text(text) = &block {
                    let text = text.trim();
                    if text.is_empty() || text.starts_with("--") {
                        return Ok(());
                    }
                }
                return Err(crate::Error::directive(
                    line,
                    "SQL outside of a '--#when'/'--#default' branch",
                ));
            }
        },
    };
    body.push(block);
    Ok(())
}

struct RenderState<'c> {
    ctx: &'c ExpressionContext,
    prefix: char,
    loops: usize,
    bound: Args,
}

impl RenderState<'_> {
    fn render_blocks(&mut self, blocks: &[Block], scope: &Args, out: &mut Vec<String>) -> crate::Result<()> {
        for block in blocks {
            match block {
                Block::Text(line) => out.push(line.clone()),
                Block::If { condition, body } => {
                    if condition.evaluate(scope, self.ctx)? {
                        self.render_blocks(body, scope, out)?;
                    }
                }
                Block::Choose { whens, default } => {
                    let mut chosen = None;
                    for (condition, body) in whens {
                        if condition.evaluate(scope, self.ctx)? {
                            chosen = Some(body);
                            break;
                        }
                    }
                    if let Some(body) = chosen.or(default.as_ref()) {
                        self.render_blocks(body, scope, out)?;
                    }
                }
                Block::For(for_loop) => {
                    if let Some(text) = self.render_loop(for_loop, scope)? {
                        out.push(text);
                    }
                }
            }
        }
        Ok(())
    }

    fn render_loop(&mut self, for_loop: &ForLoop, scope: &Args) -> crate::Result<Option<String>> {
        let loop_index = self.loops;
        self.loops += 1;
        let items = match lookup(scope, &for_loop.source) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None if self.ctx.strict_args => {
                return Err(crate::Error::EmptyLoopSource(for_loop.source.clone()))
            }
            Some(Value::Null) | None => return Ok(None),
            Some(other) => vec![other.clone()],
        };

        let renamer = LoopRenamer::new(for_loop, self.prefix)?;
        let mut parts = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let mut local = scope.clone();
            local.insert(for_loop.item.clone(), item.clone());
            if let Some(index) = &for_loop.index {
                local.insert(index.clone(), Value::from(i));
            }
            if let Some(filter) = &for_loop.filter {
                if !filter.evaluate(&local, self.ctx)? {
                    continue;
                }
            }
            let mut lines = Vec::new();
            self.render_blocks(&for_loop.body, &local, &mut lines)?;
            let element = Element {
                item,
                index: i,
                loop_index,
                scope: &local,
            };
            parts.push(renamer.bind(&lines.join("\n"), &element, &mut self.bound));
        }
        tracing::trace!(source = %for_loop.source, loop_index, rendered = parts.len(), "expanded --#for");
        Ok((!parts.is_empty()).then(|| parts.join(for_loop.delimiter.as_str())))
    }
}

/// Rewrites loop variable references to synthetic argument names.
struct LoopRenamer<'s> {
    for_loop: &'s ForLoop,
    prefix: char,
    named: Regex,
    template: Regex,
}

impl<'s> LoopRenamer<'s> {
    fn new(for_loop: &'s ForLoop, prefix: char) -> crate::Result<Self> {
        let vars = match &for_loop.index {
            Some(index) => format!("{}|{}", regex::escape(&for_loop.item), regex::escape(index)),
            None => regex::escape(&for_loop.item),
        };
        let named = Regex::new(&format!(
            r"{}({vars})((?:\.[A-Za-z0-9_]+)*)\b",
            regex::escape(&prefix.to_string())
        ))?;
        let template = Regex::new(&format!(
            r"\$\{{\s*([!:]?)\s*({vars})((?:\.[A-Za-z0-9_]+)*)\s*\}}"
        ))?;
        Ok(Self {
            for_loop,
            prefix,
            named,
            template,
        })
    }

    fn bind(&self, text: &str, element: &Element<'_>, bound: &mut Args) -> String {
        let mut names = HashMap::new();
        shield(text).map_plain(|plain| {
            let plain = self.template.replace_all(plain, |caps: &Captures| {
                let name = self.synthetic(&caps[2], &caps[3], element, &mut names, bound);
                format!("${{{}{}}}", &caps[1], name)
            });
            self.named
                .replace_all(&plain, |caps: &Captures| {
                    let start = caps.get(0).map_or(0, |m| m.start());
                    if plain[..start].ends_with(self.prefix) {
                        return caps[0].to_owned();
                    }
                    let name = self.synthetic(&caps[1], &caps[2], element, &mut names, bound);
                    format!("{}{}", self.prefix, name)
                })
                .into_owned()
        })
    }

    /// Argument name for `var` + `path` in one element, unique against the
    /// caller's arguments and every name bound so far.
    fn synthetic(
        &self,
        var: &str,
        path: &str,
        element: &Element<'_>,
        names: &mut HashMap<String, String>,
        bound: &mut Args,
    ) -> String {
        let reference = format!("{var}{path}");
        if let Some(name) = names.get(&reference) {
            return name.clone();
        }
        let value = if self.for_loop.index.as_deref() == Some(var) {
            Value::from(element.index)
        } else {
            lookup_path(element.item, path.trim_start_matches('.'))
                .cloned()
                .unwrap_or(Value::Null)
        };
        let base = format!(
            "_{var}{}_{}_{}",
            path.replace('.', "_"),
            element.loop_index,
            element.index
        );
        let taken = |name: &str| element.scope.contains_key(name) || bound.contains_key(name);
        let mut name = base.clone();
        let mut suffix = 0;
        while taken(&name) {
            suffix += 1;
            name = format!("{base}_{suffix}");
        }
        bound.insert(name.clone(), value);
        names.insert(reference, name.clone());
        name
    }
}

/// One iteration of a `--#for` loop.
struct Element<'a> {
    item: &'a Value,
    index: usize,
    loop_index: usize,
    scope: &'a Args,
}

/// Cleans up SQL left broken by omitted conditional clauses.
///
/// - `, where` loses the comma (an emptied `update ... set` tail);
/// - `where and`/`where or` collapses to `where`;
/// - `where` followed by `order by`, `group by`, `limit`, `union` or `)`
///   is dropped;
/// - a trailing `where` is dropped.
///
/// Literals and comments are never touched.
#[derive(Debug, Clone)]
pub struct SyntaxRepair {
    comma_where: Regex,
    where_and_or: Regex,
    where_before_clause: Regex,
    where_end: Regex,
}

impl SyntaxRepair {
    pub fn new() -> crate::Result<Self> {
        Ok(Self {
            comma_where: Regex::new(r"(?i),(\s*\bwhere\b)")?,
            where_and_or: Regex::new(r"(?i)\b(where)\s+(?:and|or)\b\s*")?,
            where_before_clause: Regex::new(r"(?i)\bwhere\s+((?:order|group)\s+by\b|limit\b|union\b|\))")?,
            where_end: Regex::new(r"(?i)\s*\bwhere(\s*)$")?,
        })
    }

    pub fn repair(&self, sql: &str) -> String {
        let shielded = shield(sql);
        let segments = shielded.segments();
        let tail = segments.iter().rposition(|segment| match segment {
            Segment::Plain(text) => !text.trim().is_empty(),
            Segment::Opaque(text) => !(text.starts_with("--") || text.starts_with("/*")),
        });
        let mut out = String::with_capacity(sql.len());
        for (i, segment) in segments.iter().enumerate() {
            match segment {
                Segment::Opaque(text) => out.push_str(text),
                Segment::Plain(text) => {
                    let text = self.comma_where.replace_all(text, "$1");
                    let text = self.where_and_or.replace_all(&text, "$1 ");
                    let text = self.where_before_clause.replace_all(&text, "$1");
                    if Some(i) == tail {
                        out.push_str(&self.where_end.replace(&text, "$1"));
                    } else {
                        out.push_str(&text);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn render(sql: &str, args: &Args) -> RenderedSql {
        DynamicSql::parse(sql)
            .unwrap()
            .render(args, &ExpressionContext::default(), ':')
            .unwrap()
    }

    fn parse_error_line(sql: &str) -> usize {
        match DynamicSql::parse(sql).unwrap_err() {
            crate::Error::Directive { line, .. } => line,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_if_block() {
        let sql = "select 1\n--#if :a > 1\nwhere a = :a\n--#fi";
        assert_eq!(render(sql, &args! { "a" => 5 }).sql, "select 1\nwhere a = :a");
        assert_eq!(render(sql, &args! { "a" => 0 }).sql, "select 1");
    }

    #[test]
    fn test_nested_if_keeps_outer_tail() {
        let sql = "select *\nfrom t\nwhere\n-- #if :a <> blank\n  --#if :b <> blank\n  and b = :b\n  --#fi\n  and a = :a\n--#fi";
        let out = render(sql, &args! { "a" => 1, "b" => Value::Null });
        assert_eq!(out.sql, "select *\nfrom t\nwhere\n  and a = :a");
        let out = render(sql, &args! { "a" => 1, "b" => 2 });
        assert_eq!(out.sql, "select *\nfrom t\nwhere\n  and b = :b\n  and a = :a");
    }

    #[test]
    fn test_choose_first_match_wins() {
        let sql = "select\n--#choose\n--#when :a > 1\nfirst\n--#when :a > 2\nsecond\n--#default\nfallback\n--#end\nfrom t";
        assert_eq!(render(sql, &args! { "a" => 5 }).sql, "select\nfirst\nfrom t");
        assert_eq!(render(sql, &args! { "a" => 0 }).sql, "select\nfallback\nfrom t");
    }

    #[test]
    fn test_choose_with_break_and_nested_if() {
        let sql = "--#choose\n--#when :a = 1\n--#if :b = 2\nboth\n--#fi\nonly_a\n--#break\n--#default\nnone\n--#break\n--#end";
        assert_eq!(render(sql, &args! { "a" => 1, "b" => 2 }).sql, "both\nonly_a");
        assert_eq!(render(sql, &args! { "a" => 3, "b" => 2 }).sql, "none");
    }

    #[test]
    fn test_choose_without_match_or_default() {
        let sql = "a\n--#choose\n--#when :x = 1\nb\n--#end\nc";
        assert_eq!(render(sql, &args! { "x" => 2 }).sql, "a\nc");
    }

    #[test]
    fn test_switch_case() {
        let sql = "--#switch :kind\n--#case 'user'\nfrom users\n--#case 'admin'\nfrom admins\n--#default\nfrom guests\n--#end";
        assert_eq!(render(sql, &args! { "kind" => "admin" }).sql, "from admins");
        assert_eq!(render(sql, &args! { "kind" => "other" }).sql, "from guests");
    }

    #[test]
    fn test_for_loop_binds_synthetic_names() {
        let sql = "select * from t where id in (\n--#for x of :items delimiter ','\n:x\n--#end\n)";
        let args = args! { "items" => vec![1, 2, 3] };
        let out = render(sql, &args);
        assert_eq!(out.sql, "select * from t where id in (\n:_x_0_0,:_x_0_1,:_x_0_2\n)");
        assert_eq!(out.args.len(), args.len() + 3);
        assert_eq!(out.args["_x_0_0"], json!(1));
        assert_eq!(out.args["_x_0_2"], json!(3));
    }

    #[test]
    fn test_for_loop_index_filter_and_templates() {
        let sql = "select * from users where\n--#for u,i of :users delimiter ' or ' filter :u.name ~ 'j'\n(name = ${u.name} and pos = :i)\n--#end";
        let args = args! { "users" => json!([{"name": "cyx"}, {"name": "jackson"}, {"name": "jim"}]) };
        let out = render(sql, &args);
        assert_eq!(
            out.sql,
            "select * from users where\n(name = ${_u_name_0_1} and pos = :_i_0_1) or (name = ${_u_name_0_2} and pos = :_i_0_2)"
        );
        assert_eq!(out.args["_u_name_0_1"], json!("jackson"));
        assert_eq!(out.args["_i_0_2"], json!(2));
    }

    #[test]
    fn test_for_loop_leaves_similar_names_and_literals() {
        let sql = "--#for item of :list\n:item = ':item' and :items and :item_x\n--#end";
        let out = render(sql, &args! { "list" => vec!["a"], "items" => 1, "item_x" => 2 });
        assert_eq!(out.sql, ":_item_0_0 = ':item' and :items and :item_x");
    }

    #[test]
    fn test_nested_loops_get_distinct_names() {
        let sql = "--#for g of :groups delimiter ' union '\n--#for m of :g.members delimiter ','\n:m\n--#end\n--#end";
        let args = args! { "groups" => json!([{"members": [1, 2]}, {"members": [3]}]) };
        let out = render(sql, &args);
        assert_eq!(out.sql, ":_m_1_0,:_m_1_1 union :_m_2_0");
        assert_eq!(out.args["_m_2_0"], json!(3));
    }

    #[test]
    fn test_loop_names_never_collide_with_flattened_paths() {
        let sql = "--#for u,u_name of :users\n:u.name = :u_name and ${u.name} <> ''\n--#end";
        let out = render(sql, &args! { "users" => json!([{"name": "jim"}]) });
        assert_eq!(out.sql, ":_u_name_0_0 = :_u_name_0_0_1 and ${_u_name_0_0} <> ''");
        assert_eq!(out.args["_u_name_0_0"], json!("jim"));
        assert_eq!(out.args["_u_name_0_0_1"], json!(0));
    }

    #[test]
    fn test_loop_names_keep_caller_arguments() {
        let sql = "select :_x_0_0 from t where id in (\n--#for x of :xs delimiter ','\n:x\n--#end\n)";
        let out = render(sql, &args! { "_x_0_0" => "mine", "xs" => vec![9, 9] });
        assert_eq!(out.sql, "select :_x_0_0 from t where id in (\n:_x_0_0_1,:_x_0_1\n)");
        assert_eq!(out.args["_x_0_0"], json!("mine"));
        assert_eq!(out.args["_x_0_0_1"], json!(9));
        assert_eq!(out.args["_x_0_1"], json!(9));
    }

    #[test]
    fn test_for_loop_delimiter_escapes_and_done() {
        let sql = "--#for v of :vals delimiter '\\n'\n${!v}\n--#done";
        assert_eq!(render(sql, &args! { "vals" => vec!["a", "b"] }).sql, "${!_v_0_0}\n${!_v_0_1}");
    }

    #[test]
    fn test_for_loop_missing_source() {
        let dynamic = DynamicSql::parse("a\n--#for v of :vals\n:v\n--#end").unwrap();
        let err = dynamic
            .render(&Args::new(), &ExpressionContext::default(), ':')
            .unwrap_err();
        assert!(matches!(err, crate::Error::EmptyLoopSource(name) if name == "vals"));
        let out = dynamic
            .render(&Args::new(), &ExpressionContext::lenient(), ':')
            .unwrap();
        assert_eq!(out.sql, "a");
        let out = dynamic
            .render(&args! { "vals" => json!([]) }, &ExpressionContext::default(), ':')
            .unwrap();
        assert_eq!(out.sql, "a");
    }

    #[test]
    fn test_unbalanced_directives_fail_to_parse() {
        assert_eq!(parse_error_line("select 1\n--#fi"), 2);
        assert_eq!(parse_error_line("select 1\n--#if :a = 1\nx"), 2);
        assert_eq!(parse_error_line("--#choose\n--#when :a = 1\nx"), 1);
        assert_eq!(parse_error_line("--#if :a = 1\n--#end"), 2);
        assert_eq!(parse_error_line("--#when :a = 1"), 1);
        assert_eq!(parse_error_line("--#for x in :list\n--#end"), 1);
        assert_eq!(parse_error_line("--#choose\nselect 1\n--#end"), 2);
        assert_eq!(parse_error_line("--#choose\n--#default\n--#when :a = 1\n--#end"), 3);
        assert_eq!(parse_error_line("--#choose\n--#case 1\n--#end"), 2);
        assert_eq!(parse_error_line("--#if :a >\n--#fi"), 1);
        assert_eq!(parse_error_line("--#for x of :list\n--#fi"), 2);
    }

    #[test]
    fn test_mismatched_close_names_the_keyword() {
        let err = DynamicSql::parse("--#choose\n--#when :a = 1\nx\n--#done").unwrap_err();
        match err {
            crate::Error::Directive { line, message } => {
                assert_eq!(line, 4);
                assert_eq!(message, "'--#done' cannot close '--#choose' opened at line 1");
            }
            other => panic!("unexpected error: {other}"),
        }
        let err = DynamicSql::parse("select 1\n--#done").unwrap_err();
        assert!(err.to_string().contains("'--#done' without matching"));
    }

    #[test]
    fn test_plain_comments_are_not_directives() {
        let dynamic = DynamicSql::parse("select 1 -- #if trailing\n--#iffy\n-- just a note").unwrap();
        assert!(!dynamic.is_dynamic());
    }

    #[test]
    fn test_repair_dangling_where() {
        let repair = SyntaxRepair::new().unwrap();
        assert_eq!(repair.repair("select * from t\nWHERE"), "select * from t");
        assert_eq!(repair.repair("select * from t where and a = 1"), "select * from t where a = 1");
        assert_eq!(
            repair.repair("select * from t where\n  or a = 1"),
            "select * from t where a = 1"
        );
        assert_eq!(repair.repair("update t set a = 1,\nwhere id = 2"), "update t set a = 1\nwhere id = 2");
        assert_eq!(repair.repair("select * from t where order by id"), "select * from t order by id");
        assert_eq!(repair.repair("select * from (select 1 where ) x"), "select * from (select 1 ) x");
    }

    #[test]
    fn test_repair_ignores_literals_and_comments() {
        let repair = SyntaxRepair::new().unwrap();
        let sql = "select ', where and' from t where -- where\n a = 1";
        assert_eq!(repair.repair(sql), sql);
        assert_eq!(repair.repair("select * from t where -- note"), "select * from t -- note");
    }

    #[test]
    fn test_dangling_where_after_rendering() {
        let sql = "select count(*)\nfrom test.student t\nWHERE\n--#if :age != null\n    t.age > 21\n--#fi\n--#if :name != null\n  and t.name ~ :name\n--#fi";
        let repair = SyntaxRepair::new().unwrap();
        let out = render(sql, &args! { "age" => Value::Null, "name" => Value::Null });
        assert_eq!(repair.repair(&out.sql), "select count(*)\nfrom test.student t");
        let out = render(sql, &args! { "age" => Value::Null, "name" => "x" });
        assert_eq!(
            repair.repair(&out.sql),
            "select count(*)\nfrom test.student t\nWHERE t.name ~ :name"
        );
    }
}
