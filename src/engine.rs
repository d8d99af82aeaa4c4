//! The render pipeline: directives, then templates, then named parameters.

use crate::dynamic::{DynamicSql, RenderedSql, SyntaxRepair};
use crate::expression::ExpressionContext;
use crate::pipe::Pipe;
use crate::template::TemplateFormatter;
use crate::translator::{PreparedSql, SqlTranslator};
use crate::value::Args;
use std::collections::HashMap;

/// Turns dynamic SQL text into driver-ready or fully inlined SQL.
///
/// # Examples
///
/// ```
/// use sqlx_dynamic_sql::{args, SqlEngine};
///
/// let engine = SqlEngine::new(':', Default::default(), true)?;
/// let sql = "select * from users\nwhere\n--#if :id != null\n  and id = :id\n--#fi";
///
/// let prepared = engine.prepare(sql, &args! { "id" => 7 })?;
/// assert_eq!(prepared.sql(), "select * from users\nwhere id = ?");
///
/// let all = engine.prepare(sql, &args! { "id" => serde_json::Value::Null })?;
/// assert_eq!(all.sql(), "select * from users");
/// # Ok::<(), sqlx_dynamic_sql::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct SqlEngine {
    translator: SqlTranslator,
    templates: TemplateFormatter,
    repair: SyntaxRepair,
    context: ExpressionContext,
}

impl SqlEngine {
    pub fn new(prefix: char, constants: HashMap<String, String>, strict_args: bool) -> crate::Result<Self> {
        let context = if strict_args {
            ExpressionContext::default()
        } else {
            ExpressionContext::lenient()
        };
        Ok(Self {
            translator: SqlTranslator::new(prefix)?,
            templates: TemplateFormatter::new(constants)?,
            repair: SyntaxRepair::new()?,
            context,
        })
    }

    pub fn translator(&self) -> &SqlTranslator {
        &self.translator
    }

    pub fn templates(&self) -> &TemplateFormatter {
        &self.templates
    }

    pub fn is_strict(&self) -> bool {
        self.context.strict_args
    }

    /// Makes `pipe` available to conditions as `:name|<name>`.
    pub fn register_pipe(&mut self, name: impl Into<String>, pipe: impl Pipe + 'static) {
        self.context.pipes.register(name, pipe);
    }

    /// Parses `sql` and renders its directives.
    pub fn render_dynamic(&self, sql: &str, args: &Args) -> crate::Result<RenderedSql> {
        let dynamic = DynamicSql::parse(sql)?;
        self.render_parsed(&dynamic, args)
    }

    /// Renders already parsed directives and repairs dangling clauses.
    pub fn render_parsed(&self, dynamic: &DynamicSql, args: &Args) -> crate::Result<RenderedSql> {
        let rendered = dynamic.render(args, &self.context, self.translator.prefix())?;
        Ok(RenderedSql {
            sql: self.repair.repair(&rendered.sql),
            args: rendered.args,
        })
    }

    /// Renders directives and templates, then translates to `?` form.
    pub fn prepare(&self, sql: &str, args: &Args) -> crate::Result<PreparedSql> {
        let dynamic = DynamicSql::parse(sql)?;
        self.prepare_parsed(&dynamic, args)
    }

    pub fn prepare_parsed(&self, dynamic: &DynamicSql, args: &Args) -> crate::Result<PreparedSql> {
        let rendered = self.render_parsed(dynamic, args)?;
        let sql = self.templates.substitute(&rendered.sql, &rendered.args);
        Ok(self.translator.translate(&sql, rendered.args))
    }

    /// Renders directives and templates, then inlines every named parameter.
    pub fn inline(&self, sql: &str, args: &Args) -> crate::Result<String> {
        let dynamic = DynamicSql::parse(sql)?;
        self.inline_parsed(&dynamic, args)
    }

    pub fn inline_parsed(&self, dynamic: &DynamicSql, args: &Args) -> crate::Result<String> {
        let rendered = self.render_parsed(dynamic, args)?;
        let sql = self.templates.substitute(&rendered.sql, &rendered.args);
        let sql = self
            .translator
            .render_literal(&sql, &rendered.args, self.context.strict_args)?;
        tracing::trace!(%sql, "inlined SQL");
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn engine() -> SqlEngine {
        let constants = HashMap::from([("users_table".to_owned(), "test.users".to_owned())]);
        SqlEngine::new(':', constants, true).unwrap()
    }

    #[test]
    fn test_prepare_for_loop_with_templates() {
        let sql = "select * from ${!users_table} where\n--#for u,i of :users delimiter ' or ' filter :u.name ~ 'j'\n(name = ${u.name} and pos = :i)\n--#end";
        let args = args! { "users" => json!([{"name": "cyx"}, {"name": "jackson"}, {"name": "jim"}]) };
        let prepared = engine().prepare(sql, &args).unwrap();
        assert_eq!(
            prepared.sql(),
            "select * from test.users where\n(name = 'jackson' and pos = ?) or (name = 'jim' and pos = ?)"
        );
        assert_eq!(prepared.names(), ["_i_0_1", "_i_0_2"]);
        assert_eq!(prepared.values(), vec![Some(&json!(1)), Some(&json!(2))]);
    }

    #[test]
    fn test_prepare_uses_constants() {
        let sql = "select * from ${!users_table} where id in (\n--#for id of :ids delimiter ','\n:id\n--#end\n)";
        let prepared = engine().prepare(sql, &args! { "ids" => vec![4, 5, 6] }).unwrap();
        assert_eq!(prepared.sql(), "select * from test.users where id in (\n?,?,?\n)");
        assert_eq!(prepared.names(), ["_id_0_0", "_id_0_1", "_id_0_2"]);
        assert_eq!(prepared.args().len(), 4);
        assert_eq!(prepared.value("_id_0_2"), Some(&json!(6)));
    }

    #[test]
    fn test_unresolved_template_survives_prepare() {
        let prepared = engine()
            .prepare("select * from t where a = ${:x} and b = :y", &args! { "y" => 1 })
            .unwrap();
        assert_eq!(prepared.sql(), "select * from t where a = ${:x} and b = ?");
        assert_eq!(prepared.names(), ["y"]);
    }

    #[test]
    fn test_inline() {
        let sql = "select * from ${!users_table}\nwhere\n--#if :name <> blank\n  and name = :name\n--#fi\n--#if :age > 18\n  and age > :age\n--#fi";
        let inlined = engine()
            .inline(sql, &args! { "name" => "O'Neil", "age" => 10 })
            .unwrap();
        assert_eq!(inlined, "select * from test.users\nwhere name = 'O''Neil'");
    }

    #[test]
    fn test_strict_and_lenient_arguments() {
        let sql = "select 1\n--#if :a > 1\nwhere a = :a\n--#fi";
        assert!(matches!(
            engine().prepare(sql, &Args::new()),
            Err(crate::Error::MissingArgument(name)) if name == "a"
        ));
        let lenient = SqlEngine::new(':', HashMap::new(), false).unwrap();
        assert_eq!(lenient.prepare(sql, &Args::new()).unwrap().sql(), "select 1");
        assert_eq!(
            lenient.inline("select :missing", &Args::new()).unwrap(),
            "select :missing"
        );
    }

    #[test]
    fn test_register_pipe() {
        let mut engine = engine();
        engine.register_pipe("negate", |v: &Value| json!(-v.as_i64().unwrap_or(0)));
        let sql = "select 1\n--#if :n|negate > 0\nwhere neg\n--#fi";
        assert_eq!(engine.inline(sql, &args! { "n" => -3 }).unwrap(), "select 1\nwhere neg");
    }
}
