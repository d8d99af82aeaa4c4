use crate::shield::shield;
use crate::template::PLACEHOLDER_PATTERN;
use crate::value::{format_literal, lookup, Args};
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;

/// Result of translating named parameters into positional `?` placeholders.
///
/// `ordinals` maps every name to the 1-based positions it occupies, so one
/// value can be bound to several placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSql {
    source_sql: String,
    prepared_sql: String,
    names: Vec<String>,
    ordinals: HashMap<String, Vec<usize>>,
    args: Args,
}

impl PreparedSql {
    /// SQL as it was before translation.
    pub fn source_sql(&self) -> &str {
        &self.source_sql
    }

    /// Driver-ready SQL with `?` placeholders.
    pub fn sql(&self) -> &str {
        &self.prepared_sql
    }

    /// Argument names in placeholder order; repeated names appear repeatedly.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// 1-based placeholder positions of `name`.
    pub fn ordinals(&self, name: &str) -> Option<&[usize]> {
        self.ordinals.get(name).map(Vec::as_slice)
    }

    pub fn ordinal_map(&self) -> &HashMap<String, Vec<usize>> {
        &self.ordinals
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Value bound to `name`, following dotted paths.
    pub fn value(&self, name: &str) -> Option<&Value> {
        lookup(&self.args, name)
    }

    /// Values in placeholder order.
    pub fn values(&self) -> Vec<Option<&Value>> {
        self.names.iter().map(|name| self.value(name)).collect()
    }
}

/// Finds `:name` parameters outside literals and comments.
///
/// The prefix character is configurable. A parameter directly preceded by a
/// second prefix character (`::name`) is left alone, and so is anything
/// inside an unresolved `${...}` template.
#[derive(Debug, Clone)]
pub struct SqlTranslator {
    prefix: char,
    pattern: Regex,
    templates: Regex,
}

impl SqlTranslator {
    /// Creates a translator for `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for a whitespace or identifier
    /// character prefix.
    pub fn new(prefix: char) -> crate::Result<Self> {
        if prefix.is_whitespace() || prefix.is_alphanumeric() || prefix == '_' {
            return Err(crate::Error::Config(format!(
                "invalid named parameter prefix '{prefix}'"
            )));
        }
        let pattern = Regex::new(&format!(
            r"{}([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)",
            regex::escape(&prefix.to_string())
        ))?;
        Ok(Self {
            prefix,
            pattern,
            templates: Regex::new(PLACEHOLDER_PATTERN)?,
        })
    }

    pub fn prefix(&self) -> char {
        self.prefix
    }

    /// Named parameters in source order, repeats included.
    pub fn named_params(&self, sql: &str) -> Vec<String> {
        let mut names = Vec::new();
        for plain in shield(sql).plain() {
            for caps in self.pattern.captures_iter(plain) {
                if !self.escaped(plain, &caps) {
                    names.push(caps[1].to_owned());
                }
            }
        }
        names
    }

    /// Replaces every named parameter with `?`.
    pub fn translate(&self, sql: &str, args: Args) -> PreparedSql {
        let mut names: Vec<String> = Vec::new();
        let mut ordinals: HashMap<String, Vec<usize>> = HashMap::new();
        let prepared_sql = shield(sql).map_plain(|plain| {
            self.pattern
                .replace_all(plain, |caps: &Captures| {
                    if self.escaped(plain, caps) {
                        return caps[0].to_owned();
                    }
                    let name = caps[1].to_owned();
                    names.push(name.clone());
                    ordinals.entry(name).or_default().push(names.len());
                    "?".to_owned()
                })
                .into_owned()
        });
        tracing::trace!(sql = %prepared_sql, params = ?names, "translated named parameters");
        PreparedSql {
            source_sql: sql.to_owned(),
            prepared_sql,
            names,
            ordinals,
            args,
        }
    }

    /// Inlines every named parameter as a SQL literal.
    ///
    /// # Errors
    ///
    /// With `strict` set, a name missing from `args` is
    /// [`crate::Error::MissingArgument`]; otherwise the token is kept as is.
    pub fn render_literal(&self, sql: &str, args: &Args, strict: bool) -> crate::Result<String> {
        shield(sql).try_map_plain(|plain| {
            let mut out = String::with_capacity(plain.len());
            let mut last = 0;
            for caps in self.pattern.captures_iter(plain) {
                let whole = caps.get(0).map_or(0..0, |m| m.range());
                if self.escaped(plain, &caps) {
                    continue;
                }
                let name = &caps[1];
                let literal = match lookup(args, name) {
                    Some(value) => format_literal(value, true),
                    None if strict => return Err(crate::Error::MissingArgument(name.to_owned())),
                    None => {
                        tracing::warn!(name, "no value for named parameter, leaving it in place");
                        continue;
                    }
                };
                out.push_str(&plain[last..whole.start]);
                out.push_str(&literal);
                last = whole.end;
            }
            out.push_str(&plain[last..]);
            Ok(out)
        })
    }

    fn escaped(&self, plain: &str, caps: &Captures) -> bool {
        let start = caps.get(0).map_or(0, |m| m.start());
        plain[..start].ends_with(self.prefix)
            || self
                .templates
                .find_iter(plain)
                .any(|m| m.start() < start && start < m.end())
    }
}

/// Converts named placeholders (`:name`) to positional placeholders (`?`).
///
/// Tokens inside string literals, quoted identifiers and comments are kept.
///
/// # Examples
///
/// ```
/// use sqlx_dynamic_sql::translator::build_query;
///
/// let sql = build_query("SELECT * FROM users WHERE id = :id AND name = ':name'")?;
/// assert_eq!(sql, "SELECT * FROM users WHERE id = ? AND name = ':name'");
/// # Ok::<(), sqlx_dynamic_sql::Error>(())
/// ```
pub fn build_query(template: &str) -> crate::Result<String> {
    let translator = SqlTranslator::new(':')?;
    Ok(translator.translate(template, Args::new()).sql().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn translator() -> SqlTranslator {
        SqlTranslator::new(':').unwrap()
    }

    #[test]
    fn test_build_query_single_param() {
        let result = build_query("SELECT * FROM users WHERE id = :id").unwrap();
        assert_eq!(result, "SELECT * FROM users WHERE id = ?");
    }

    #[test]
    fn test_build_query_no_params() {
        let result = build_query("SELECT * FROM users").unwrap();
        assert_eq!(result, "SELECT * FROM users");
    }

    #[test]
    fn test_translate_repeated_params_share_ordinals() {
        let prepared = translator().translate(
            "SELECT * FROM users WHERE id = :id OR parent_id = :id AND name = :name",
            Args::new(),
        );
        assert_eq!(prepared.sql(), "SELECT * FROM users WHERE id = ? OR parent_id = ? AND name = ?");
        assert_eq!(prepared.names(), ["id", "id", "name"]);
        assert_eq!(prepared.ordinals("id"), Some(&[1, 2][..]));
        assert_eq!(prepared.ordinals("name"), Some(&[3][..]));
    }

    #[test]
    fn test_translate_skips_literals_and_comments() {
        let sql = "select ':a' as x, \"b:c\" -- :d\n/* :e */ from t where y = :f";
        let prepared = translator().translate(sql, Args::new());
        assert_eq!(
            prepared.sql(),
            "select ':a' as x, \"b:c\" -- :d\n/* :e */ from t where y = ?"
        );
        assert_eq!(prepared.names(), ["f"]);
    }

    #[test]
    fn test_translate_leaves_casts_and_double_prefix() {
        let prepared = translator().translate("select :v::text, a ::b from t", Args::new());
        assert_eq!(prepared.sql(), "select ?::text, a ::b from t");
        assert_eq!(prepared.names(), ["v"]);
    }

    #[test]
    fn test_unresolved_templates_are_not_parameters() {
        let translator = translator();
        let sql = "select * from t where a = ${:x} and b = ${ :y.z } and c = :c";
        let prepared = translator.translate(sql, Args::new());
        assert_eq!(prepared.sql(), "select * from t where a = ${:x} and b = ${ :y.z } and c = ?");
        assert_eq!(prepared.names(), ["c"]);
        assert_eq!(translator.named_params(sql), ["c"]);

        let rendered = translator.render_literal(sql, &args! { "c" => 1 }, true).unwrap();
        assert_eq!(rendered, "select * from t where a = ${:x} and b = ${ :y.z } and c = 1");
    }

    #[test]
    fn test_translate_dotted_names() {
        let args = args! { "user" => json!({"id": 7}) };
        let prepared = translator().translate("select * from t where id = :user.id", args);
        assert_eq!(prepared.names(), ["user.id"]);
        assert_eq!(prepared.values(), vec![Some(&json!(7))]);
    }

    #[test]
    fn test_custom_prefix() {
        let translator = SqlTranslator::new('@').unwrap();
        let prepared = translator.translate("select * from t where a = @a and b = :b", Args::new());
        assert_eq!(prepared.sql(), "select * from t where a = ? and b = :b");
        assert!(SqlTranslator::new(' ').is_err());
        assert!(SqlTranslator::new('x').is_err());
    }

    #[test]
    fn test_positions_reconstruct_source_order() {
        let sql = "update t set a = :a, b = ':x' where c = :c and a2 = :a";
        let translator = translator();
        let prepared = translator.translate(sql, Args::new());
        let mut rebuilt = String::new();
        let mut names = prepared.names().iter();
        for piece in prepared.sql().split('?') {
            rebuilt.push_str(piece);
            if let Some(name) = names.next() {
                rebuilt.push(':');
                rebuilt.push_str(name);
            }
        }
        assert_eq!(rebuilt, sql);
        assert_eq!(translator.named_params(sql), prepared.names());
    }

    #[test]
    fn test_render_literal() {
        let args = args! {
            "id" => 5,
            "name" => "O'Brien",
            "ids" => vec![1, 2, 3],
            "tags" => vec!["a", "b"],
            "gone" => serde_json::Value::Null,
            "ok" => true,
        };
        let sql = "select * from t where id = :id and name = :name and id in (:ids) \
                   and tag in (:tags) and x = :gone and flag = :ok and note = ':name'";
        let rendered = translator().render_literal(sql, &args, true).unwrap();
        assert_eq!(
            rendered,
            "select * from t where id = 5 and name = 'O''Brien' and id in (1, 2, 3) \
                   and tag in ('a', 'b') and x = null and flag = true and note = ':name'"
        );
    }

    #[test]
    fn test_render_literal_missing_argument() {
        let err = translator()
            .render_literal("select :missing", &Args::new(), true)
            .unwrap_err();
        assert!(matches!(err, crate::Error::MissingArgument(name) if name == "missing"));

        let kept = translator()
            .render_literal("select :missing, :id", &args! { "id" => 1 }, false)
            .unwrap();
        assert_eq!(kept, "select :missing, 1");
    }
}
