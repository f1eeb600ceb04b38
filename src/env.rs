//! Environment - shared context for every Load and Asset
//!
//! The registries the pipeline consults (compilers, minifiers, target
//! languages, filters), the process-wide asset cache, the logger, and the
//! optional router all live here and are injected into Loads and Assets at
//! construction. Cloning an Environment clones the handle; all clones share
//! state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use regex::Regex;

use crate::cache::Cache;
use crate::compilers::{self, CompilerEntry, CompilerHandle};
use crate::dot_cache::DotCache;
use crate::filter::Filter;
use crate::load::{Load, Source};
use crate::logger::{Logger, LoggerHandle, TracingLogger};
use crate::minifiers::{self, MinifierEntry, MinifierHandle};
use crate::router::RouterHandle;
use crate::shrinker::Shrinker;
use crate::waiter::Waiter;

/// Shared pipeline context handle.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

struct EnvInner {
    root: String,
    package_root: RwLock<String>,
    waiter: Waiter,
    cache: Cache,
    logger: RwLock<LoggerHandle>,
    compilers: RwLock<HashMap<String, CompilerEntry>>,
    minifiers: RwLock<HashMap<String, MinifierEntry>>,
    target_languages: RwLock<HashMap<String, String>>,
    filters: RwLock<HashMap<String, Arc<dyn Filter>>>,
    router: RwLock<Option<RouterHandle>>,
    ignore_pattern: RwLock<Regex>,
    shrinker: Mutex<Option<Shrinker>>,
    cache_bust: Mutex<Option<String>>,
    dot_cache: DotCache,
}

impl Environment {
    /// Create an environment rooted at the given directory. Relative
    /// locations resolve against this root.
    pub fn new(root: impl Into<String>) -> Self {
        let root = normalize(&root.into());
        let root = root.trim_end_matches('/').to_string();
        let dot_cache = DotCache::new(format!("{root}/.cache"));
        Self {
            inner: Arc::new(EnvInner {
                package_root: RwLock::new(root.clone()),
                root,
                waiter: Waiter::new(),
                cache: Cache::new(),
                logger: RwLock::new(Arc::new(TracingLogger)),
                compilers: RwLock::new(default_compilers()),
                minifiers: RwLock::new(default_minifiers()),
                target_languages: RwLock::new(default_target_languages()),
                filters: RwLock::new(HashMap::new()),
                router: RwLock::new(None),
                ignore_pattern: RwLock::new(Regex::new(r"^\.").unwrap()),
                shrinker: Mutex::new(None),
                cache_bust: Mutex::new(None),
                dot_cache,
            }),
        }
    }

    /// Create a new Load of assets in this environment.
    pub fn load(&self, source: impl Into<Source>) -> Load {
        let load = Load::new(self);
        load.add(source);
        load
    }

    /// Create an empty Load (assets added later).
    pub fn empty_load(&self) -> Load {
        Load::new(self)
    }

    pub fn root(&self) -> &str {
        &self.inner.root
    }

    /// Base directory for bare `@use` specs.
    pub fn package_root(&self) -> String {
        self.inner.package_root.read().unwrap().clone()
    }

    pub fn set_package_root(&self, root: impl Into<String>) {
        *self.inner.package_root.write().unwrap() = normalize(&root.into());
    }

    /// Environment-level readiness: zero once every Load in this
    /// environment has settled.
    pub fn waiter(&self) -> &Waiter {
        &self.inner.waiter
    }

    /// Run a callback once all in-flight work has settled.
    pub fn once_ready(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.waiter.once_ready(callback);
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    pub fn logger(&self) -> LoggerHandle {
        self.inner.logger.read().unwrap().clone()
    }

    pub fn set_logger(&self, logger: impl Logger + 'static) {
        *self.inner.logger.write().unwrap() = Arc::new(logger);
    }

    pub fn dot_cache(&self) -> &DotCache {
        &self.inner.dot_cache
    }

    /// Resolve a location against the root and normalize separators.
    pub fn resolve_location(&self, location: &str) -> String {
        let location = normalize(location);
        if location.starts_with('/') {
            location
        } else {
            format!("{}/{}", self.inner.root, location)
        }
    }

    /// A location relative to the root, or unchanged if outside it.
    pub fn relative_path(&self, location: &str) -> String {
        let prefix = format!("{}/", self.inner.root);
        location
            .strip_prefix(&prefix)
            .unwrap_or(location)
            .to_string()
    }

    // --- compiler registry ---

    /// Register a concrete compiler for a file type.
    pub fn set_compiler(&self, file_type: &str, handle: CompilerHandle) {
        self.inner
            .compilers
            .write()
            .unwrap()
            .insert(file_type.to_string(), CompilerEntry::Loaded(handle));
    }

    /// Mark a file type as needing no compilation.
    pub fn skip_compiler(&self, file_type: &str) {
        self.inner
            .compilers
            .write()
            .unwrap()
            .insert(file_type.to_string(), CompilerEntry::Skip);
    }

    /// Resolve the compiler for a file type, loading Named entries lazily.
    /// Unknown names degrade to Skip with one logged error.
    pub fn resolve_compiler(&self, file_type: &str) -> Option<CompilerHandle> {
        let entry = self
            .inner
            .compilers
            .read()
            .unwrap()
            .get(file_type)
            .cloned();
        match entry {
            Some(CompilerEntry::Skip) => None,
            Some(CompilerEntry::Loaded(handle)) => Some(handle),
            Some(CompilerEntry::Named(name)) => self.load_compiler(file_type, &name),
            // No entry: expect the compiler to share the file type's name.
            None => self.load_compiler(file_type, file_type),
        }
    }

    fn load_compiler(&self, file_type: &str, name: &str) -> Option<CompilerHandle> {
        match compilers::resolve(name) {
            Ok(handle) => {
                self.set_compiler(file_type, handle.clone());
                Some(handle)
            }
            Err(err) => {
                self.logger().error(&err.to_string());
                self.skip_compiler(file_type);
                None
            }
        }
    }

    // --- minifier registry ---

    /// Register a concrete minifier for a target language.
    pub fn set_minifier(&self, language: &str, handle: MinifierHandle) {
        self.inner
            .minifiers
            .write()
            .unwrap()
            .insert(language.to_string(), MinifierEntry::Loaded(handle));
    }

    /// Resolve the minifier for a target language.
    pub fn resolve_minifier(&self, language: &str) -> Option<MinifierHandle> {
        let entry = self
            .inner
            .minifiers
            .read()
            .unwrap()
            .get(language)
            .cloned();
        match entry {
            Some(MinifierEntry::Skip) | None => None,
            Some(MinifierEntry::Loaded(handle)) => Some(handle),
            Some(MinifierEntry::Named(name)) => match minifiers::resolve(&name) {
                Ok(handle) => {
                    self.set_minifier(language, handle.clone());
                    Some(handle)
                }
                Err(err) => {
                    self.logger().error(&err.to_string());
                    self.inner
                        .minifiers
                        .write()
                        .unwrap()
                        .insert(language.to_string(), MinifierEntry::Skip);
                    None
                }
            },
        }
    }

    /// The logical output language for a file type (js for coffee, css for
    /// scss, ...). Unmapped types are their own target.
    pub fn target_language(&self, file_type: &str) -> String {
        self.inner
            .target_languages
            .read()
            .unwrap()
            .get(file_type)
            .cloned()
            .unwrap_or_else(|| file_type.to_string())
    }

    pub fn set_target_language(&self, file_type: &str, language: &str) {
        self.inner
            .target_languages
            .write()
            .unwrap()
            .insert(file_type.to_string(), language.to_string());
    }

    // --- router ---

    pub fn router(&self) -> Option<RouterHandle> {
        self.inner.router.read().unwrap().clone()
    }

    pub fn set_router(&self, router: RouterHandle) {
        *self.inner.router.write().unwrap() = Some(router);
    }

    // --- directory walking ---

    /// Pattern applied to directory entry names during walks; matching
    /// entries are skipped. Defaults to hidden (dot-prefixed) entries.
    pub fn ignore_pattern(&self) -> Regex {
        self.inner.ignore_pattern.read().unwrap().clone()
    }

    pub fn set_ignore_pattern(&self, pattern: Regex) {
        *self.inner.ignore_pattern.write().unwrap() = pattern;
    }

    // --- filters ---

    pub fn set_filter(&self, name: &str, filter: Arc<dyn Filter>) {
        self.inner
            .filters
            .write()
            .unwrap()
            .insert(name.to_string(), filter);
    }

    pub fn filter(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.inner.filters.read().unwrap().get(name).cloned()
    }

    // --- shrinker ---

    /// Turn on the token-renaming pass. The token table is dumped to the
    /// diagnostic cache each time the environment settles.
    pub fn enable_shrinker(&self) {
        let mut shrinker = self.inner.shrinker.lock().unwrap();
        if shrinker.is_some() {
            return;
        }
        *shrinker = Some(Shrinker::new());
        drop(shrinker);

        let weak: Weak<EnvInner> = Arc::downgrade(&self.inner);
        self.inner.waiter.on_ready(move || {
            if let Some(inner) = weak.upgrade() {
                let env = Environment { inner };
                if let Some(dump) = env.shrinker_dump() {
                    if let Err(err) =
                        env.dot_cache().write("hopper", "shrinker.json", dump.as_bytes())
                    {
                        env.logger().error(&err.to_string());
                    }
                }
            }
        });
    }

    /// Shrink text if the pass is enabled.
    pub fn shrink_text(&self, text: &str) -> Option<String> {
        let mut shrinker = self.inner.shrinker.lock().unwrap();
        shrinker.as_mut().map(|s| s.shrink(text))
    }

    fn shrinker_dump(&self) -> Option<String> {
        let shrinker = self.inner.shrinker.lock().unwrap();
        shrinker.as_ref().map(|s| s.token_dump())
    }

    // --- cache busting ---

    /// Bump the cache-bust token (called on watch events).
    pub fn bump_cache_bust(&self) {
        let stamp = chrono::Utc::now().timestamp().to_string();
        *self.inner.cache_bust.lock().unwrap() = Some(stamp);
    }

    pub fn cache_bust(&self) -> Option<String> {
        self.inner.cache_bust.lock().unwrap().clone()
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

fn default_compilers() -> HashMap<String, CompilerEntry> {
    let mut map = HashMap::new();
    for skipped in [
        "txt", "html", "htm", "js", "css", "json", "gif", "jpg", "jpeg", "png", "svg", "ico",
    ] {
        map.insert(skipped.to_string(), CompilerEntry::Skip);
    }
    map.insert("md".to_string(), CompilerEntry::Named("markdown".to_string()));
    map
}

fn default_minifiers() -> HashMap<String, MinifierEntry> {
    let mut map = HashMap::new();
    map.insert("js".to_string(), MinifierEntry::Named("jsmin".to_string()));
    map.insert("css".to_string(), MinifierEntry::Named("cssmin".to_string()));
    map
}

fn default_target_languages() -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (file_type, language) in [
        ("coffee", "js"),
        ("ts", "js"),
        ("scss", "css"),
        ("less", "css"),
        ("styl", "css"),
        ("md", "html"),
        ("markdown", "html"),
        ("ltl", "html"),
    ] {
        map.insert(file_type.to_string(), language.to_string());
    }
    map
}
