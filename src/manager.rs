//! Named access to the fragments of configured SQL files.

use crate::config::ManagerConfig;
use crate::dynamic::RenderedSql;
use crate::engine::SqlEngine;
use crate::resource::{ResourceFile, SqlFragment};
use crate::translator::PreparedSql;
use crate::value::Args;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type Snapshot = Arc<BTreeMap<String, Arc<ResourceFile>>>;

/// Loads SQL files and serves their fragments by `<alias>.<name>`.
///
/// Readers work on an immutable snapshot of the loaded files. Loading and
/// reloading build a new snapshot under one lock and swap it in whole, so a
/// reader never sees half of a file's fragments replaced.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx_dynamic_sql::{args, ManagerConfig, SqlFileManager};
///
/// # fn example() -> sqlx_dynamic_sql::Result<()> {
/// let manager = SqlFileManager::new(ManagerConfig::load("sql.toml")?)?;
/// manager.init()?;
///
/// let prepared = manager.prepare("users.findUsers", &args! { "name" => "jim" })?;
/// println!("{} {:?}", prepared.sql(), prepared.names());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SqlFileManager {
    config: ManagerConfig,
    engine: SqlEngine,
    snapshot: RwLock<Snapshot>,
    reload_lock: Mutex<()>,
}

impl SqlFileManager {
    pub fn new(config: ManagerConfig) -> crate::Result<Self> {
        config.validate()?;
        let engine = SqlEngine::new(
            config.named_param_prefix,
            config.constants.clone(),
            config.strict_args,
        )?;
        Ok(Self {
            config,
            engine,
            snapshot: RwLock::new(Arc::default()),
            reload_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn engine(&self) -> &SqlEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SqlEngine {
        &mut self.engine
    }

    /// Loads every configured file.
    ///
    /// Nothing is replaced unless all files load.
    pub fn init(&self) -> crate::Result<()> {
        let _guard = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut files = BTreeMap::new();
        for alias in self.config.files.keys() {
            files.insert(alias.clone(), Arc::new(self.read(alias)?));
        }
        self.swap(files);
        Ok(())
    }

    /// Re-reads files whose modification time changed and files not yet
    /// loaded, returning one message per file read.
    ///
    /// On error the previous snapshot stays in place.
    pub fn reload(&self) -> crate::Result<Vec<String>> {
        let _guard = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let mut files = BTreeMap::new();
        let mut messages = Vec::new();
        for alias in self.config.files.keys() {
            match current.get(alias) {
                Some(file) if !file.is_modified() => {
                    files.insert(alias.clone(), Arc::clone(file));
                }
                _ => {
                    let file = self.read(alias)?;
                    messages.push(format!(
                        "loaded {} fragments of '{alias}' from {}",
                        file.len(),
                        file.path().display()
                    ));
                    files.insert(alias.clone(), Arc::new(file));
                }
            }
        }
        self.swap(files);
        Ok(messages)
    }

    /// Looks up `<alias>.<name>`, ignoring any `^modifier` suffix.
    ///
    /// The alias's file is loaded on first use and, with `check_modified`,
    /// re-read when it changed on disk.
    pub fn get(&self, name: &str) -> crate::Result<Arc<SqlFragment>> {
        let name = name.split_once('^').map_or(name, |(name, _)| name).trim();
        let not_found = || crate::Error::FragmentNotFound(name.to_owned());
        let (alias, local) = name.split_once('.').ok_or_else(not_found)?;
        if !self.config.files.contains_key(alias) {
            return Err(not_found());
        }
        let file = self.file(alias)?;
        file.fragment(local).cloned().ok_or_else(not_found)
    }

    /// Fragment source with parts inlined.
    pub fn get_sql(&self, name: &str) -> crate::Result<String> {
        Ok(self.get(name)?.source().to_owned())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// Qualified names of all loaded fragments, sorted.
    pub fn names(&self) -> Vec<String> {
        self.snapshot()
            .values()
            .flat_map(|file| file.names().into_iter().map(move |name| format!("{}.{name}", file.alias())))
            .collect()
    }

    /// Number of loaded fragments.
    pub fn len(&self) -> usize {
        self.snapshot().values().map(|file| file.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders a fragment's directives.
    pub fn render(&self, name: &str, args: &Args) -> crate::Result<RenderedSql> {
        self.engine.render_parsed(self.get(name)?.dynamic(), args)
    }

    /// Renders a fragment into `?` form.
    pub fn prepare(&self, name: &str, args: &Args) -> crate::Result<PreparedSql> {
        self.engine.prepare_parsed(self.get(name)?.dynamic(), args)
    }

    /// Renders a fragment with every parameter inlined as a literal.
    pub fn inline(&self, name: &str, args: &Args) -> crate::Result<String> {
        self.engine.inline_parsed(self.get(name)?.dynamic(), args)
    }

    fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap(&self, files: BTreeMap<String, Arc<ResourceFile>>) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(files);
    }

    fn read(&self, alias: &str) -> crate::Result<ResourceFile> {
        let path = self
            .config
            .files
            .get(alias)
            .ok_or_else(|| crate::Error::Config(format!("no SQL file configured for alias '{alias}'")))?;
        let file = ResourceFile::load(alias, path, &self.config.delimiter)?;
        tracing::info!(alias, path = %path.display(), fragments = file.len(), "loaded SQL file");
        Ok(file)
    }

    fn file(&self, alias: &str) -> crate::Result<Arc<ResourceFile>> {
        let fresh = |file: &ResourceFile| !self.config.check_modified || !file.is_modified();
        if let Some(file) = self.snapshot().get(alias).filter(|file| fresh(file)) {
            return Ok(Arc::clone(file));
        }

        let _guard = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        if let Some(file) = current.get(alias).filter(|file| fresh(file)) {
            return Ok(Arc::clone(file));
        }
        let file = Arc::new(self.read(alias)?);
        let mut files = (*current).clone();
        files.insert(alias.to_owned(), Arc::clone(&file));
        self.swap(files);
        Ok(file)
    }
}
