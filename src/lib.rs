//! # sqlx-dynamic-sql
//!
//! Dynamic SQL files for SQLx. SQL lives in plain `.sql` files as named
//! fragments; each fragment may carry named parameters, string templates and
//! line directives, and renders into a driver-ready statement with an
//! ordered list of bound argument names.
//!
//! ## Features
//!
//! - **Named Parameters**: `:name` (or a custom prefix) becomes `?`, with repeated names sharing one value
//! - **Templates**: `${name}` inlines a quoted literal, `${!name}` inlines trusted SQL, constants fill the gaps
//! - **Directives**: `--#if`, `--#choose`/`--#when`/`--#default`, `--#switch`/`--#case` and `--#for ... of :list`
//! - **Literal Safety**: nothing inside string literals, quoted identifiers, comments or `::casts` is ever rewritten
//! - **SQL Files**: `/*[name]*/ ... ;` fragments and `/*{part}*/ ... ;` reusable parts, reloaded when the file changes
//! - **HRTB Execution**: `PreparedQuery` and `PreparedQueryAs` build a fresh SQLx query per execution
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! sqlx = { version = "0.8", features = ["mysql", "runtime-tokio"] }
//! sqlx-dynamic-sql = "0.1"
//! ```
//!
//! ## Examples
//!
//! ### Rendering Dynamic SQL
//!
//! ```rust
//! use sqlx_dynamic_sql::{args, SqlEngine};
//!
//! let engine = SqlEngine::new(':', Default::default(), true)?;
//! let sql = "\
//! select * from users
//! where
//! --#if :name <> blank
//!   and name = :name
//! --#fi
//! --#if :ids <> blank
//!   and id in (
//! --#for id of :ids delimiter ','
//!   :id
//! --#end
//!   )
//! --#fi";
//!
//! let prepared = engine.prepare(sql, &args! { "name" => "", "ids" => vec![1, 2] })?;
//! assert_eq!(prepared.sql(), "select * from users\nwhere id in (\n  ?,  ?\n  )");
//! assert_eq!(prepared.names(), ["_id_0_0", "_id_0_1"]);
//! # Ok::<(), sqlx_dynamic_sql::Error>(())
//! ```
//!
//! ### SQL Files
//!
//! ```rust,no_run
//! use sqlx::{MySqlPool, FromRow};
//! use sqlx_dynamic_sql::{args, query_as_with_args, ManagerConfig, SqlFileManager};
//!
//! #[derive(FromRow)]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = MySqlPool::connect("mysql://localhost/test").await?;
//! let manager = SqlFileManager::new(ManagerConfig::default().with_file("users", "sql/users.sql"))?;
//! manager.init()?;
//!
//! let prepared = manager.prepare("users.findUsers", &args! { "name" => "jim" })?;
//! let users: Vec<User> = query_as_with_args(&prepared)?.fetch_all(&pool).await?;
//! for user in users {
//!     println!("{}: {}", user.id, user.name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Custom Binders
//!
//! ```rust,no_run
//! use sqlx::MySqlPool;
//! use sqlx_dynamic_sql::PreparedQuery;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = MySqlPool::connect("mysql://localhost/test").await?;
//!
//! let user_id = 42;
//! let name = "John Doe";
//!
//! let mut query = PreparedQuery::new(
//!     "INSERT INTO users (id, name) VALUES (:id, :name)",
//!     |q, key| match key {
//!         "id" => q.bind(user_id),
//!         "name" => q.bind(name),
//!         _ => q,
//!     }
//! )?;
//!
//! let result = query.execute(&pool).await?;
//! println!("Inserted {} rows", result.rows_affected());
//! # Ok(())
//! # }
//! ```
//!
//! ## How It Works
//!
//! 1. **Render**: directives are evaluated against the arguments; loop variables become synthetic arguments
//! 2. **Repair**: a `where` left dangling by omitted clauses is removed
//! 3. **Substitute**: `${}` templates resolve against arguments, then constants
//! 4. **Translate**: remaining `:name` parameters become `?` (or inlined literals), in source order
//!
//! ## Limitations
//!
//! - Execution support covers MySQL only
//! - The dangling-clause repair is a best-effort cleanup, not a SQL parser
//!
//! ## License
//!
//! Licensed under either of Apache License, Version 2.0 or MIT license at your option.

pub mod config;
pub mod dynamic;
pub mod engine;
pub mod error;
pub mod expression;
pub mod manager;
pub mod pipe;
pub mod query;
pub mod query_as;
pub mod resource;
pub mod shield;
pub mod template;
pub mod translator;
pub mod value;

pub use serde_json;

pub use config::ManagerConfig;
pub use dynamic::{DynamicSql, RenderedSql};
pub use engine::SqlEngine;
pub use error::{Error, Result};
pub use expression::{Expression, ExpressionContext};
pub use manager::SqlFileManager;
pub use pipe::{Pipe, Pipes};
pub use query::{query_with_args, BindValue, PreparedQuery};
pub use query_as::{query_as_with_args, PreparedQueryAs};
pub use resource::{ResourceFile, SqlFragment};
pub use translator::{PreparedSql, SqlTranslator};
pub use value::Args;

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::args;
    pub use crate::error::{Error, Result};
    pub use crate::{
        query_as_with_args, query_with_args, Args, ManagerConfig, PreparedQuery, PreparedQueryAs,
        PreparedSql, SqlEngine, SqlFileManager,
    };
}
