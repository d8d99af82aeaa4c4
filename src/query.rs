use crate::query_as::QA;
use crate::translator::{PreparedSql, SqlTranslator};
use crate::value::{lookup, Args};
use serde_json::Value;
use sqlx::mysql::MySqlArguments;
use sqlx::query::Query;
use sqlx::{mysql::MySqlQueryResult, Executor, MySql};

/// Type alias for SQLx Query with MySQL arguments
pub type Q<'q> = Query<'q, MySql, MySqlArguments>;

/// Binds a JSON argument as the matching SQL type.
///
/// `null` and absent values bind as SQL `NULL`, integers as `BIGINT`
/// (unsigned when they only fit `u64`), other numbers as `DOUBLE`, and
/// arrays or objects as JSON text.
pub trait BindValue: Sized {
    fn bind_value(self, value: Option<&Value>) -> Self;
}

macro_rules! bind_json {
    ($query:expr, $value:expr) => {{
        let query = $query;
        match $value {
            None | Some(Value::Null) => query.bind(None::<String>),
            Some(Value::Bool(b)) => query.bind(*b),
            Some(Value::Number(n)) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => query.bind(i),
                (None, Some(u)) => query.bind(u),
                (None, None) => query.bind(n.as_f64().unwrap_or_default()),
            },
            Some(Value::String(s)) => query.bind(s.clone()),
            Some(other) => query.bind(other.to_string()),
        }
    }};
}

impl<'q> BindValue for Q<'q> {
    fn bind_value(self, value: Option<&Value>) -> Self {
        bind_json!(self, value)
    }
}

impl<'q, R> BindValue for QA<'q, R> {
    fn bind_value(self, value: Option<&Value>) -> Self {
        bind_json!(self, value)
    }
}

/// Fails with [`crate::Error::UnboundPlaceholder`] for the first name that
/// has no value.
pub(crate) fn check_bound(prepared: &PreparedSql) -> crate::Result<Args> {
    if let Some(name) = prepared.names().iter().find(|name| prepared.value(name).is_none()) {
        return Err(crate::Error::UnboundPlaceholder(name.clone()));
    }
    Ok(prepared.args().clone())
}

/// A prepared query that binds named placeholders through a binder function.
///
/// `PreparedQuery` stores the translated SQL, the placeholder order and the
/// binder separately, and constructs the actual `Query` on each execution,
/// so no self-referential lifetimes are involved. The binder is called once
/// per placeholder, in order, with the bare parameter name.
///
/// # Type Parameters
///
/// * `F` - A binder function that binds values to placeholders. Must work with any lifetime `'q`.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx::MySqlPool;
/// use sqlx_dynamic_sql::PreparedQuery;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let pool = MySqlPool::connect("mysql://localhost/test").await?;
/// let user_id = 42;
/// let name = "John Doe";
///
/// let mut query = PreparedQuery::new(
///     "INSERT INTO users (user_id, name) VALUES (:user_id, :name)",
///     |q, key| match key {
///         "user_id" => q.bind(user_id),
///         "name" => q.bind(name),
///         _ => q,
///     }
/// )?;
///
/// let result = query.execute(&pool).await?;
/// println!("Inserted {} rows", result.rows_affected());
/// # Ok(())
/// # }
/// ```
///
/// # Using with Transactions
///
/// ```rust,no_run
/// use sqlx::{MySqlPool, Transaction, MySql};
/// use sqlx_dynamic_sql::{args, query_with_args, SqlEngine};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let pool = MySqlPool::connect("mysql://localhost/test").await?;
/// let engine = SqlEngine::new(':', Default::default(), true)?;
/// let prepared = engine.prepare(
///     "UPDATE users SET name = :name WHERE user_id = :user_id",
///     &args! { "name" => "Jane Doe", "user_id" => 7 },
/// )?;
///
/// let mut tx: Transaction<MySql> = pool.begin().await?;
/// query_with_args(&prepared)?.execute(&mut *tx).await?;
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
pub struct PreparedQuery<F> {
    sql: String,
    order: Vec<String>,
    binder: F,
}

impl<F> PreparedQuery<F>
where
    F: for<'q> FnMut(Q<'q>, &str) -> Q<'q>,
{
    /// Creates a new `PreparedQuery` from an SQL template and binder function.
    ///
    /// Placeholders inside string literals and comments are not bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the placeholder pattern cannot be compiled.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sqlx_dynamic_sql::PreparedQuery;
    ///
    /// let query = PreparedQuery::new(
    ///     "SELECT * FROM users WHERE id = :id",
    ///     |q, key| match key {
    ///         "id" => q.bind(42),
    ///         _ => q,
    ///     }
    /// )?;
    /// assert_eq!(query.sql(), "SELECT * FROM users WHERE id = ?");
    /// # Ok::<(), sqlx_dynamic_sql::Error>(())
    /// ```
    pub fn new<T>(template: T, binder: F) -> crate::Result<Self>
    where
        T: Into<String>,
    {
        let prepared = SqlTranslator::new(':')?.translate(&template.into(), Args::new());
        Ok(Self::from_prepared(&prepared, binder))
    }

    /// Uses the SQL and placeholder order of an already translated statement.
    pub fn from_prepared(prepared: &PreparedSql, binder: F) -> Self {
        Self {
            sql: prepared.sql().to_owned(),
            order: prepared.names().to_vec(),
            binder,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter names in placeholder order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Executes the prepared query using the provided executor.
    ///
    /// This method constructs a fresh `Query` on each call. It works with any
    /// SQLx `Executor` implementation, including `MySqlPool` and `Transaction`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn execute<'e, E>(&mut self, executor: E) -> crate::Result<MySqlQueryResult>
    where
        E: Executor<'e, Database = MySql>,
    {
        let &mut PreparedQuery {
            ref sql,
            ref order,
            ref mut binder,
        } = self;

        let mut q = sqlx::query::<MySql>(sql);
        for key in order.iter() {
            q = binder(q, key);
        }
        tracing::debug!(%sql, params = order.len(), "executing prepared statement");
        Ok(q.execute(executor).await?)
    }
}

/// Builds a [`PreparedQuery`] that binds the statement's own arguments.
///
/// # Errors
///
/// [`crate::Error::UnboundPlaceholder`] if a placeholder has no argument.
pub fn query_with_args(
    prepared: &PreparedSql,
) -> crate::Result<PreparedQuery<impl for<'q> FnMut(Q<'q>, &str) -> Q<'q>>> {
    let args = check_bound(prepared)?;
    Ok(PreparedQuery::from_prepared(prepared, move |q, name| {
        q.bind_value(lookup(&args, name))
    }))
}
