use crate::query::{check_bound, BindValue};
use crate::translator::{PreparedSql, SqlTranslator};
use crate::value::{lookup, Args};
use sqlx::{
    mysql::{MySqlArguments, MySqlRow},
    query::QueryAs,
    Executor, MySql,
};

/// Type alias for SQLx QueryAs with MySQL arguments
pub type QA<'q, R> = QueryAs<'q, MySql, R, MySqlArguments>;

/// A prepared query that returns typed rows from named placeholders.
///
/// `PreparedQueryAs` is similar to `PreparedQuery` but returns strongly-typed results
/// using SQLx's `FromRow` trait. It supports `fetch_all`, `fetch_one`, and `fetch_optional`.
///
/// # Type Parameters
///
/// * `R` - The result type that implements `FromRow`
/// * `F` - A binder function that binds values to placeholders
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx::{MySqlPool, FromRow};
/// use sqlx_dynamic_sql::PreparedQueryAs;
///
/// #[derive(FromRow)]
/// struct User {
///     id: i32,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let pool = MySqlPool::connect("mysql://localhost/test").await?;
/// let user_id = 42;
///
/// let mut query = PreparedQueryAs::<User, _>::new(
///     "SELECT id, name FROM users WHERE id = :id",
///     |q, key| match key {
///         "id" => q.bind(user_id),
///         _ => q,
///     }
/// )?;
///
/// let user: User = query.fetch_one(&pool).await?;
/// println!("User: {} ({})", user.name, user.id);
/// # Ok(())
/// # }
/// ```
pub struct PreparedQueryAs<R, F>
where
    F: for<'q> FnMut(QA<'q, R>, &str) -> QA<'q, R>,
{
    sql: String,
    order: Vec<String>,
    binder: F,
    _pd: std::marker::PhantomData<R>,
}

impl<R, F> PreparedQueryAs<R, F>
where
    for<'row> R: sqlx::FromRow<'row, MySqlRow> + Send + Unpin,
    F: for<'q> FnMut(QA<'q, R>, &str) -> QA<'q, R>,
{
    /// Creates a new `PreparedQueryAs` from an SQL template and binder function.
    ///
    /// # Arguments
    ///
    /// * `template` - SQL query template with named placeholders
    /// * `binder` - Function that binds values to placeholders
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL template cannot be parsed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sqlx::FromRow;
    /// use sqlx_dynamic_sql::PreparedQueryAs;
    ///
    /// #[derive(FromRow)]
    /// struct User {
    ///     id: i32,
    ///     name: String,
    /// }
    ///
    /// let query = PreparedQueryAs::<User, _>::new(
    ///     "SELECT id, name FROM users WHERE id = :id",
    ///     |q, key| match key {
    ///         "id" => q.bind(42),
    ///         _ => q,
    ///     }
    /// )?;
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
            _pd: std::marker::PhantomData,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter names in placeholder order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    fn query(&mut self) -> QA<'_, R> {
        let &mut PreparedQueryAs {
            ref sql,
            ref order,
            ref mut binder,
            _pd,
        } = self;

        let mut q = sqlx::query_as(sql);
        for key in order.iter() {
            q = binder(q, key);
        }
        tracing::debug!(%sql, params = order.len(), "executing prepared query");
        q
    }

    /// Executes the query and returns all matching rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or if any row cannot be converted to type `R`.
    pub async fn fetch_all<'e, E>(&mut self, executor: E) -> crate::Result<Vec<R>>
    where
        E: Executor<'e, Database = MySql>,
    {
        Ok(self.query().fetch_all(executor).await?)
    }

    /// Executes the query and returns exactly one row.
    ///
    /// # Errors
    ///
    /// Fails when no row matches, the query fails or the row cannot be converted.
    pub async fn fetch_one<'e, E>(&mut self, executor: E) -> crate::Result<R>
    where
        E: Executor<'e, Database = MySql>,
    {
        Ok(self.query().fetch_one(executor).await?)
    }

    /// Executes the query and returns the first row, if any.
    ///
    /// ```rust,no_run
    /// use sqlx::{MySqlPool, FromRow};
    /// use sqlx_dynamic_sql::{args, query_as_with_args, SqlEngine};
    ///
    /// #[derive(FromRow)]
    /// struct User {
    ///     id: i32,
    ///     name: String,
    /// }
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let pool = MySqlPool::connect("mysql://localhost/test").await?;
    /// let engine = SqlEngine::new(':', Default::default(), true)?;
    /// let prepared = engine.prepare(
    ///     "SELECT id, name FROM users WHERE email = :email",
    ///     &args! { "email" => "user@example.com" },
    /// )?;
    ///
    /// match query_as_with_args::<User>(&prepared)?.fetch_optional(&pool).await? {
    ///     Some(user) => println!("Found user: {}", user.name),
    ///     None => println!("User not found"),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn fetch_optional<'e, E>(&mut self, executor: E) -> crate::Result<Option<R>>
    where
        E: Executor<'e, Database = MySql>,
    {
        Ok(self.query().fetch_optional(executor).await?)
    }
}

/// Builds a [`PreparedQueryAs`] that binds the statement's own arguments.
///
/// # Errors
///
/// [`crate::Error::UnboundPlaceholder`] if a placeholder has no argument.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx::{MySqlPool, FromRow};
/// use sqlx_dynamic_sql::{args, query_as_with_args, SqlEngine};
///
/// #[derive(FromRow)]
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let pool = MySqlPool::connect("mysql://localhost/test").await?;
/// let engine = SqlEngine::new(':', Default::default(), true)?;
/// let sql = "SELECT id, name FROM users\nWHERE\n--#if :name <> blank\n  name = :name\n--#fi";
/// let prepared = engine.prepare(sql, &args! { "name" => "jim" })?;
///
/// let users: Vec<User> = query_as_with_args(&prepared)?.fetch_all(&pool).await?;
/// println!("Found {} users", users.len());
/// # Ok(())
/// # }
/// ```
pub fn query_as_with_args<R>(
    prepared: &PreparedSql,
) -> crate::Result<PreparedQueryAs<R, impl for<'q> FnMut(QA<'q, R>, &str) -> QA<'q, R>>>
where
    for<'row> R: sqlx::FromRow<'row, MySqlRow> + Send + Unpin,
{
    let args = check_bound(prepared)?;
    Ok(PreparedQueryAs::from_prepared(prepared, move |q, name| {
        q.bind_value(lookup(&args, name))
    }))
}
