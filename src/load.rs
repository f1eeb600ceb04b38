//! Load - an ordered set of assets with chainable pipeline operations
//!
//! A Load walks locations into Assets (deduplicated through the
//! process-wide Cache), waits for every asset's in-flight work through its
//! Waiter, and applies pipeline stages to all of them at once. Every stage
//! call records itself as a replayable action; when a watched path changes,
//! the recorded actions re-run in order, scoped to the assets under the
//! changed location.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use regex::Regex;

use crate::asset::{Asset, ContentMode, ContentScope};
use crate::compilers::CompileOptions;
use crate::env::Environment;
use crate::error::HopperError;
use crate::waiter::Waiter;

/// Iteration cap for the dependency-index relaxation; exceeding it is
/// treated as a cycle.
const MAX_SORT_PASSES: usize = 1000;

/// Something a Load can take in: one location, many, or an existing asset.
pub enum Source {
    Location(String),
    Locations(Vec<String>),
    Asset(Asset),
}

impl From<&str> for Source {
    fn from(location: &str) -> Self {
        Source::Location(location.to_string())
    }
}

impl From<String> for Source {
    fn from(location: String) -> Self {
        Source::Location(location)
    }
}

impl From<Vec<String>> for Source {
    fn from(locations: Vec<String>) -> Self {
        Source::Locations(locations)
    }
}

impl From<Vec<&str>> for Source {
    fn from(locations: Vec<&str>) -> Self {
        Source::Locations(locations.into_iter().map(String::from).collect())
    }
}

impl From<Asset> for Source {
    fn from(asset: Asset) -> Self {
        Source::Asset(asset)
    }
}

/// Directory-entry exclusion rule: an exact name or a pattern.
#[derive(Clone)]
pub enum IgnoreRule {
    Name(String),
    Pattern(Regex),
}

impl IgnoreRule {
    fn matches(&self, name: &str) -> bool {
        match self {
            IgnoreRule::Name(exact) => name == exact,
            IgnoreRule::Pattern(pattern) => pattern.is_match(name),
        }
    }
}

impl From<&str> for IgnoreRule {
    fn from(name: &str) -> Self {
        IgnoreRule::Name(name.to_string())
    }
}

impl From<Regex> for IgnoreRule {
    fn from(pattern: Regex) -> Self {
        IgnoreRule::Pattern(pattern)
    }
}

/// How `add_asset` constructs a missing asset.
pub(crate) enum AssetProducer {
    Raw,
    File,
    Filtered(String),
}

/// A path eligible for filesystem watching.
#[derive(Clone)]
pub(crate) struct Watchable {
    pub(crate) path: String,
    pub(crate) filter: Option<String>,
}

type Comparator = Arc<dyn Fn(&Asset, &Asset) -> Ordering + Send + Sync>;
pub(crate) type WatchCallback = Arc<dyn Fn(&Load, &str, &str) + Send + Sync>;

/// One recorded, replayable pipeline operation.
#[derive(Clone)]
enum Action {
    Compile(CompileOptions),
    Cull { key: String, value: String },
    Wrap { closure_args: Option<String> },
    Minify,
    Gzip,
    Replace {
        pattern: Regex,
        replacement: String,
        scope: Option<ContentScope>,
    },
    Route { url: Option<String> },
    Write {
        directory: Option<String>,
        filename: Option<String>,
        mode: ContentMode,
    },
    Each(Arc<dyn Fn(&Asset) + Send + Sync>),
    Then(Arc<dyn Fn(&Load) + Send + Sync>),
    Concat {
        location: Option<String>,
        target: Load,
        existing: bool,
    },
}

/// Shared Load handle; clones observe the same state.
#[derive(Clone)]
pub struct Load {
    inner: Arc<LoadInner>,
}

/// Weak back-reference held by assets, so `@use` declarations can add
/// locations to their referencing Loads without keeping them alive.
#[derive(Clone)]
pub(crate) struct WeakLoad(Weak<LoadInner>);

impl WeakLoad {
    pub(crate) fn upgrade(&self) -> Option<Load> {
        self.0.upgrade().map(|inner| Load { inner })
    }
}

pub(crate) struct LoadInner {
    env: Environment,
    waiter: Waiter,
    state: Mutex<LoadState>,
}

struct LoadState {
    locations: Vec<String>,
    assets: Vec<Asset>,
    watchables: Vec<Watchable>,
    watch_callbacks: Vec<WatchCallback>,
    watcher: Option<notify::RecommendedWatcher>,
    is_watching: bool,
    is_replaying: bool,
    replayable: Vec<Action>,
    changed_location: String,
    pattern: Option<Regex>,
    ignore_list: Vec<IgnoreRule>,
    custom_sort: Option<Comparator>,
}

impl Load {
    /// Create an empty Load parented to the environment's waiter.
    pub fn new(env: &Environment) -> Load {
        let load = Load {
            inner: Arc::new(LoadInner {
                env: env.clone(),
                waiter: Waiter::with_parent(env.waiter()),
                state: Mutex::new(LoadState {
                    locations: Vec::new(),
                    assets: Vec::new(),
                    watchables: Vec::new(),
                    watch_callbacks: Vec::new(),
                    watcher: None,
                    is_watching: false,
                    is_replaying: false,
                    replayable: Vec::new(),
                    changed_location: String::new(),
                    pattern: None,
                    ignore_list: Vec::new(),
                    custom_sort: None,
                }),
            }),
        };
        // Assets arrive in walk order; re-sort on every settle.
        load.then(|load| load.sort_now());
        load
    }

    pub fn env(&self) -> &Environment {
        &self.inner.env
    }

    pub fn waiter(&self) -> &Waiter {
        &self.inner.waiter
    }

    pub(crate) fn downgrade(&self) -> WeakLoad {
        WeakLoad(Arc::downgrade(&self.inner))
    }

    /// Snapshot of this Load's assets in their current order.
    pub fn assets(&self) -> Vec<Asset> {
        self.inner.state.lock().unwrap().assets.clone()
    }

    /// The original, pre-walk locations this Load was asked to add.
    pub fn locations(&self) -> Vec<String> {
        self.inner.state.lock().unwrap().locations.clone()
    }

    pub(crate) fn location_index(&self, location: &str) -> Option<usize> {
        self.inner
            .state
            .lock()
            .unwrap()
            .locations
            .iter()
            .position(|known| known == location)
    }

    /// Locations of the currently loaded assets, in asset order.
    pub fn asset_locations(&self) -> Vec<String> {
        self.assets()
            .iter()
            .map(|asset| asset.location().to_string())
            .collect()
    }

    /// HTML tags referencing the js/css assets of this Load.
    pub fn get_tags(&self, prefix: Option<&str>) -> String {
        let prefix = prefix.unwrap_or("");
        self.assets()
            .iter()
            .filter_map(|asset| asset.tag(prefix))
            .collect()
    }

    /// Run a callback once every asset in this Load has settled.
    pub fn once_ready(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.waiter.once_ready(callback);
    }

    // --- adding assets ---

    /// Add locations or an existing asset to this Load. String locations
    /// may carry a `filter:` prefix and one `*` glob segment; relative
    /// paths resolve against the environment root.
    pub fn add(&self, source: impl Into<Source>) -> Load {
        // One bracket around the whole batch, so readiness cannot fire
        // between sibling locations and every root records its position.
        self.inner.waiter.wait(1);
        match source.into() {
            Source::Locations(locations) => {
                for location in locations {
                    self.add_location(&location);
                }
            }
            Source::Location(location) => self.add_location(&location),
            Source::Asset(asset) => self.add_existing(asset),
        }
        self.inner.waiter.unwait(1);
        self.clone()
    }

    fn add_existing(&self, asset: Asset) {
        let already_there = {
            let state = self.inner.state.lock().unwrap();
            state
                .assets
                .iter()
                .any(|known| known.location() == asset.location())
        };
        if already_there {
            return;
        }
        asset.attach_load(self);
        self.inner.state.lock().unwrap().assets.push(asset);
    }

    fn add_location(&self, location: &str) {
        // A "name:" prefix routes through the filter registered under name.
        let (filter, rest) = match location.split_once(':') {
            Some((name, rest)) if self.inner.env.filter(name).is_some() => {
                (Some(name.to_string()), rest)
            }
            _ => (None, location),
        };

        let mut path = self.inner.env.resolve_location(rest);

        // One glob segment: compile to an anchored pattern and walk from
        // the non-glob prefix.
        if path.contains('*') {
            let pattern = format!(
                "^{}$",
                path.split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(".*")
            );
            match Regex::new(&pattern) {
                Ok(compiled) => {
                    self.inner.state.lock().unwrap().pattern = Some(compiled)
                }
                Err(err) => self
                    .inner
                    .env
                    .logger()
                    .error(&format!("bad glob in {path}: {err}")),
            }
            let walk_root = match path.find("/*") {
                Some(at) => path[..at].to_string(),
                None => path.split('*').next().unwrap_or("").to_string(),
            };
            path = walk_root;
        }

        if !self.inner.waiter.is_ready() {
            self.inner.state.lock().unwrap().locations.push(path.clone());
        }
        self.add_path(&path, filter.as_deref(), 0);
    }

    /// Stat-then-branch: directories recurse, files become assets, filter
    /// prefixes divert to the filter producer. Depth-0 paths and every
    /// directory become watchable.
    fn add_path(&self, path: &str, filter: Option<&str>, depth: usize) {
        self.inner.waiter.wait(1);
        match std::fs::metadata(path) {
            Err(err) => {
                self.inner
                    .env
                    .logger()
                    .error(&format!("could not stat file {path}: {err}"));
            }
            Ok(stat) => {
                let modified = stat.modified().ok();
                if let Some(filter) = filter {
                    self.add_asset(
                        AssetProducer::Filtered(filter.to_string()),
                        path,
                        modified,
                    );
                } else if stat.is_dir() {
                    self.add_dir(path, depth);
                } else {
                    let matches = {
                        let state = self.inner.state.lock().unwrap();
                        state
                            .pattern
                            .as_ref()
                            .map(|pattern| pattern.is_match(path))
                            .unwrap_or(true)
                    };
                    if matches {
                        self.add_asset(AssetProducer::File, path, modified);
                    }
                }
                if stat.is_dir() || depth == 0 {
                    self.inner.state.lock().unwrap().watchables.push(Watchable {
                        path: path.to_string(),
                        filter: filter.map(String::from),
                    });
                }
            }
        }
        self.inner.waiter.unwait(1);
    }

    fn add_dir(&self, dir: &str, depth: usize) {
        self.inner.waiter.wait(1);
        match std::fs::read_dir(dir) {
            Err(err) => {
                self.inner
                    .env
                    .logger()
                    .error(&format!("could not load directory {dir}: {err}"));
            }
            Ok(entries) => {
                let ignore_pattern = self.inner.env.ignore_pattern();
                let ignore_list = self.inner.state.lock().unwrap().ignore_list.clone();
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let ignored = ignore_pattern.is_match(&name)
                        || ignore_list.iter().any(|rule| rule.matches(&name));
                    if !ignored {
                        self.add_path(&format!("{dir}/{name}"), None, depth + 1);
                    }
                }
            }
        }
        self.inner.waiter.unwait(1);
    }

    /// Cache-or-create. A cached asset is reused unless its recorded
    /// modification time differs from the fresh stat, in which case the
    /// stale entry is evicted and rebuilt.
    pub(crate) fn add_asset(
        &self,
        producer: AssetProducer,
        location: &str,
        modified: Option<SystemTime>,
    ) -> Asset {
        // Already referenced (a walked file that was also @use-declared,
        // say): one reference is enough.
        let referenced = {
            let state = self.inner.state.lock().unwrap();
            state
                .assets
                .iter()
                .find(|known| known.location() == location)
                .cloned()
        };
        if let Some(asset) = referenced {
            return asset;
        }
        let cache = self.inner.env.cache();
        let asset = match cache.get(location) {
            Some(existing) if existing.modified() == modified => {
                existing.attach_load(self);
                existing
            }
            stale => {
                if stale.is_some() {
                    cache.remove(location);
                }
                let env = &self.inner.env;
                let fresh = match producer {
                    AssetProducer::Raw => {
                        let asset = Asset::raw(env, location);
                        asset.attach_load(self);
                        asset
                    }
                    AssetProducer::File => {
                        Asset::new_file(env, location, modified, Some(self))
                    }
                    AssetProducer::Filtered(name) => {
                        Asset::new_filtered(env, &name, location, modified, Some(self))
                    }
                };
                cache.set(location, fresh.clone());
                fresh
            }
        };
        self.inner.state.lock().unwrap().assets.push(asset.clone());
        asset
    }

    /// Skip directory entries with this name or matching this pattern.
    pub fn ignore(&self, rule: impl Into<IgnoreRule>) -> Load {
        self.inner.state.lock().unwrap().ignore_list.push(rule.into());
        self.clone()
    }

    // --- the pipeline primitive ---

    /// Run a callback on each asset once the Load is ready. Recorded as
    /// replayable; during a replay only assets under the changed location
    /// are visited.
    pub fn each(&self, callback: impl Fn(&Asset) + Send + Sync + 'static) -> Load {
        self.run(Action::Each(Arc::new(callback)))
    }

    /// Run a callback once the Load is ready. Recorded as replayable.
    pub fn then(&self, callback: impl Fn(&Load) + Send + Sync + 'static) -> Load {
        self.run(Action::Then(Arc::new(callback)))
    }

    fn run(&self, action: Action) -> Load {
        self.record(&action);
        self.schedule(action);
        self.clone()
    }

    fn record(&self, action: &Action) {
        let mut state = self.inner.state.lock().unwrap();
        if !state.is_replaying {
            state.replayable.push(action.clone());
        }
    }

    fn schedule(&self, action: Action) {
        let load = self.clone();
        self.inner.waiter.once_ready(move || {
            // Bracket the application so every stage is its own settle
            // point; environment-level on_ready consumers observe each.
            load.inner.waiter.wait(1);
            load.apply(&action);
            load.inner.waiter.unwait(1);
        });
    }

    fn apply(&self, action: &Action) {
        match action {
            Action::Then(callback) => callback(self),
            Action::Concat {
                location,
                target,
                existing,
            } => self.apply_concat(location.as_deref(), target, *existing),
            per_asset => {
                let (is_replaying, changed_location, assets) = {
                    let state = self.inner.state.lock().unwrap();
                    (
                        state.is_replaying,
                        state.changed_location.clone(),
                        state.assets.clone(),
                    )
                };
                for asset in &assets {
                    if is_replaying && !asset.location().starts_with(&changed_location) {
                        continue;
                    }
                    self.perform(per_asset, asset);
                }
            }
        }
    }

    fn perform(&self, action: &Action, asset: &Asset) {
        match action {
            Action::Compile(options) => {
                asset.compile_with(options);
            }
            Action::Cull { key, value } => {
                asset.cull(key, value);
            }
            Action::Wrap { closure_args } => {
                asset.wrap(closure_args.as_deref());
            }
            Action::Minify => {
                asset.minify();
            }
            Action::Gzip => {
                asset.gzip();
            }
            Action::Replace {
                pattern,
                replacement,
                scope,
            } => {
                asset.replace(pattern, replacement, *scope);
            }
            Action::Route { url } => {
                asset.route(url.as_deref());
            }
            Action::Write {
                directory,
                filename,
                mode,
            } => {
                if let Err(err) =
                    asset.write(directory.as_deref(), filename.as_deref(), *mode)
                {
                    self.inner
                        .env
                        .logger()
                        .error(&format!("could not write {}: {err}", asset.location()));
                }
            }
            Action::Each(callback) => callback(asset),
            Action::Then(_) | Action::Concat { .. } => unreachable!("handled in apply"),
        }
    }

    // --- pipeline stages (each-wrappers) ---

    /// Compile every asset with default options.
    pub fn compile(&self) -> Load {
        self.run(Action::Compile(CompileOptions::default()))
    }

    pub fn compile_with(&self, options: CompileOptions) -> Load {
        self.run(Action::Compile(options))
    }

    pub fn cull(&self, key: &str, value: &str) -> Load {
        self.run(Action::Cull {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    pub fn wrap(&self, closure_args: Option<&str>) -> Load {
        self.run(Action::Wrap {
            closure_args: closure_args.map(String::from),
        })
    }

    pub fn minify(&self) -> Load {
        self.run(Action::Minify)
    }

    pub fn gzip(&self) -> Load {
        self.run(Action::Gzip)
    }

    pub fn replace(
        &self,
        pattern: Regex,
        replacement: &str,
        scope: Option<ContentScope>,
    ) -> Load {
        self.run(Action::Replace {
            pattern,
            replacement: replacement.to_string(),
            scope,
        })
    }

    pub fn route(&self, url: Option<&str>) -> Load {
        self.run(Action::Route {
            url: url.map(String::from),
        })
    }

    pub fn write(
        &self,
        directory: Option<&str>,
        filename: Option<&str>,
        mode: ContentMode,
    ) -> Load {
        self.run(Action::Write {
            directory: directory.map(String::from),
            filename: filename.map(String::from),
            mode,
        })
    }

    // --- sorting ---

    /// Re-sort now. Dependency order applies when any asset declares
    /// `@use`; a non-converging dependency graph logs and falls back to
    /// the default order.
    pub fn sort(&self) -> Load {
        self.sort_now();
        self.clone()
    }

    /// Install a custom comparator and re-sort.
    pub fn sort_by(
        &self,
        comparator: impl Fn(&Asset, &Asset) -> Ordering + Send + Sync + 'static,
    ) -> Load {
        self.inner.state.lock().unwrap().custom_sort = Some(Arc::new(comparator));
        self.sort_now();
        self.clone()
    }

    pub(crate) fn sort_now(&self) {
        let custom = self.inner.state.lock().unwrap().custom_sort.clone();
        let mut assets = self.assets();
        if let Some(comparator) = custom {
            assets.sort_by(|a, b| comparator(a, b));
        } else if assets.iter().any(Asset::has_uses) {
            match dependency_order(&assets) {
                Ok(()) => assets.sort_by(|a, b| {
                    a.use_index()
                        .cmp(&b.use_index())
                        .then_with(|| default_order(a, b))
                }),
                Err(err) => {
                    self.inner.env.logger().error(&err.to_string());
                    assets.sort_by(default_order);
                }
            }
        } else {
            assets.sort_by(default_order);
        }
        self.inner.state.lock().unwrap().assets = assets;
    }

    // --- concatenation ---

    /// Concatenate compiled content into one asset in a new Load.
    pub fn concat(&self, location: Option<&str>) -> Load {
        let target = Load::new(&self.inner.env);
        self.concat_step(location, &target, false);
        target
    }

    /// Concatenate into a pre-existing Load, triggering its replay
    /// machinery with the output asset's location.
    pub fn concat_into(&self, location: Option<&str>, target: &Load) -> Load {
        self.concat_step(location, target, true);
        target.clone()
    }

    fn concat_step(&self, location: Option<&str>, target: &Load, existing: bool) {
        self.run(Action::Concat {
            location: location.map(String::from),
            target: target.clone(),
            existing,
        });
    }

    fn apply_concat(&self, location: Option<&str>, target: &Load, existing: bool) {
        target.inner.waiter.wait(1);
        if self.inner.state.lock().unwrap().custom_sort.is_none() {
            self.sort_now();
        }

        let mut content = String::new();
        for (index, asset) in self.assets().iter().enumerate() {
            if index > 0 {
                content.push('\n');
            }
            let piece = asset.get_compiled_content();
            content.push_str(&piece);
            // Guard js statement boundaries across the join.
            if asset.file_type() == "js" && !piece.trim_end().ends_with(';') {
                content.push(';');
            }
        }

        let location = location
            .map(String::from)
            .or_else(|| self.locations().first().cloned());
        let Some(location) = location else {
            self.inner
                .env
                .logger()
                .error("cannot concat without a location");
            target.inner.waiter.unwait(1);
            return;
        };

        let output = {
            let first = target.inner.state.lock().unwrap().assets.first().cloned();
            match first {
                Some(asset) => asset,
                None => target.add_asset(AssetProducer::Raw, &location, None),
            }
        };
        output.set_content(content);
        if existing {
            target.replay_actions(output.location());
        }
        target.inner.waiter.unwait(1);
    }

    // --- watch & replay plumbing (see watch.rs for installation) ---

    pub(crate) fn is_watching(&self) -> bool {
        self.inner.state.lock().unwrap().is_watching
    }

    pub(crate) fn mark_watching(&self) {
        self.inner.state.lock().unwrap().is_watching = true;
    }

    pub(crate) fn watchables(&self) -> Vec<Watchable> {
        self.inner.state.lock().unwrap().watchables.clone()
    }

    pub(crate) fn watch_callbacks(&self) -> Vec<WatchCallback> {
        self.inner.state.lock().unwrap().watch_callbacks.clone()
    }

    pub(crate) fn push_watch_callback(&self, callback: WatchCallback) {
        self.inner
            .state
            .lock()
            .unwrap()
            .watch_callbacks
            .push(callback);
    }

    pub(crate) fn store_watcher(&self, watcher: notify::RecommendedWatcher) {
        self.inner.state.lock().unwrap().watcher = Some(watcher);
    }

    /// Apply a filesystem change: re-read assets under a still-existing
    /// location (or add it as brand new), or drop assets under a deleted
    /// one from both this Load and the Cache. Either way, replay the
    /// recorded actions once settled.
    pub fn handle_change(&self, location: &str) -> Load {
        self.handle_change_filtered(location, None, location)
    }

    pub(crate) fn handle_change_filtered(
        &self,
        location: &str,
        filter: Option<&str>,
        watch_root: &str,
    ) -> Load {
        self.inner.waiter.wait(1);
        if Path::new(location).exists() {
            let assets = self.assets();
            let mut matched = 0;
            for asset in &assets {
                let hit = if filter.is_some() {
                    asset.location().starts_with(watch_root)
                } else {
                    asset.location().starts_with(location)
                };
                if hit {
                    asset.refresh();
                    matched += 1;
                }
            }
            // No matches means the location is new.
            if matched == 0 {
                self.add(location);
            }
        } else {
            let cache = self.inner.env.cache();
            let mut state = self.inner.state.lock().unwrap();
            state.assets.retain(|asset| {
                if asset.location().starts_with(location) {
                    cache.remove(asset.location());
                    false
                } else {
                    true
                }
            });
        }
        self.inner.waiter.unwait(1);

        let load = self.clone();
        let changed = location.to_string();
        self.inner.waiter.once_ready(move || {
            load.replay_actions(&changed);
        });
        self.clone()
    }

    /// Re-run every recorded action in order, scoped to assets under the
    /// changed location. New pipeline calls made while replaying are not
    /// recorded.
    pub fn replay_actions(&self, location: &str) -> Load {
        let actions = {
            let mut state = self.inner.state.lock().unwrap();
            state.changed_location = location.to_string();
            state.is_replaying = true;
            state.replayable.clone()
        };
        for action in actions {
            self.schedule(action);
        }
        let load = self.clone();
        self.inner.waiter.once_ready(move || {
            load.inner.state.lock().unwrap().is_replaying = false;
        });
        self.clone()
    }
}

fn default_order(a: &Asset, b: &Asset) -> Ordering {
    a.sort_index()
        .cmp(&b.sort_index())
        .then_with(|| a.location().cmp(b.location()))
}

/// Bounded longest-path relaxation over `use_index`: every asset ends up
/// ranked after each of its declared dependencies. Exceeding the pass cap
/// signals a cycle.
fn dependency_order(assets: &[Asset]) -> Result<(), HopperError> {
    for _ in 0..MAX_SORT_PASSES {
        let mut changed = false;
        for asset in assets {
            for used in asset.uses() {
                for dependency in assets {
                    if dependency.location() == asset.location()
                        || !dependency.location().starts_with(&used)
                    {
                        continue;
                    }
                    if asset.use_index() <= dependency.use_index() {
                        asset.set_use_index(dependency.use_index() + 1);
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            return Ok(());
        }
    }
    Err(HopperError::DependencyCycle {
        passes: MAX_SORT_PASSES,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLogger;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::mpsc::channel;
    use std::time::Duration;
    use tempfile::tempdir;

    fn env_at(dir: &Path) -> Environment {
        Environment::new(dir.to_string_lossy().into_owned())
    }

    fn wait_ready(load: &Load) {
        let (sender, receiver) = channel();
        load.once_ready(move || {
            let _ = sender.send(());
        });
        receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn add_directory_loads_every_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("scripts/sub")).unwrap();
        fs::write(dir.path().join("scripts/b.js"), "b;").unwrap();
        fs::write(dir.path().join("scripts/a.js"), "a;").unwrap();
        fs::write(dir.path().join("scripts/sub/c.js"), "c;").unwrap();
        let env = env_at(dir.path());

        let load = env.load("scripts");
        wait_ready(&load);

        let locations = load.asset_locations();
        let names: Vec<String> = locations
            .iter()
            .map(|l| env.relative_path(l))
            .collect();
        assert_eq!(names, vec!["scripts/a.js", "scripts/b.js", "scripts/sub/c.js"]);
    }

    #[test]
    fn hidden_entries_are_ignored_by_default() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.js"), "a;").unwrap();
        fs::write(dir.path().join("src/.hidden.js"), "h;").unwrap();
        let env = env_at(dir.path());

        let load = env.load("src");
        wait_ready(&load);
        assert_eq!(load.assets().len(), 1);
    }

    #[test]
    fn per_load_ignore_list_filters_names_and_patterns() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        for name in ["keep.js", "skip.js", "temp-1.js", "temp-2.js"] {
            fs::write(dir.path().join("src").join(name), "x;").unwrap();
        }
        let env = env_at(dir.path());

        let load = env.empty_load();
        load.ignore("skip.js");
        load.ignore(Regex::new("^temp-").unwrap());
        load.add("src");
        wait_ready(&load);

        assert_eq!(load.assets().len(), 1);
        assert!(load.asset_locations()[0].ends_with("keep.js"));
    }

    #[test]
    fn glob_segment_restricts_matches() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.js"), "a;").unwrap();
        fs::write(dir.path().join("src/b.css"), "b{}").unwrap();
        let env = env_at(dir.path());

        let load = env.load("src/*.js");
        wait_ready(&load);

        assert_eq!(load.assets().len(), 1);
        assert!(load.asset_locations()[0].ends_with("a.js"));
    }

    #[test]
    fn missing_location_logs_and_continues() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("real.js"), "r;").unwrap();
        let env = env_at(dir.path());
        let logger = MemoryLogger::new();
        env.set_logger(logger.clone());

        let load = env.load(vec!["missing.js", "real.js"]);
        wait_ready(&load);

        assert!(logger.contains("could not stat"));
        assert_eq!(load.assets().len(), 1);
    }

    #[test]
    fn assets_are_shared_through_the_cache() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "a;").unwrap();
        let env = env_at(dir.path());

        let first = env.load("a.js");
        wait_ready(&first);
        let second = env.load("a.js");
        wait_ready(&second);

        assert_eq!(env.cache().len(), 1);
        let a = first.assets()[0].clone();
        let b = second.assets()[0].clone();
        assert_eq!(a.location(), b.location());
        // One shared asset: content set through one handle is visible
        // through the other.
        a.set_content("changed");
        assert_eq!(b.get_content(), "changed");
    }

    #[test]
    fn stale_cache_entries_are_rebuilt() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "one").unwrap();
        let env = env_at(dir.path());

        let first = env.load("a.js");
        wait_ready(&first);
        assert_eq!(first.assets()[0].get_content(), "one");

        // Rewrite with a different mtime.
        fs::write(dir.path().join("a.js"), "two").unwrap();
        let stale = std::time::SystemTime::now() - Duration::from_secs(3600);
        let file = fs::File::options()
            .write(true)
            .open(dir.path().join("a.js"))
            .unwrap();
        file.set_modified(stale).unwrap();
        drop(file);

        let second = env.load("a.js");
        wait_ready(&second);
        assert_eq!(second.assets()[0].get_content(), "two");
        assert_eq!(env.cache().len(), 1);
    }

    #[test]
    fn each_waits_for_readiness() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "a;").unwrap();
        let env = env_at(dir.path());

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let load = env.load("a.js");
        load.each(move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });
        wait_ready(&load);
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn default_sort_is_stable_across_walk_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("z.js"), "z;").unwrap();
        fs::write(dir.path().join("a.js"), "a;").unwrap();
        let env = env_at(dir.path());

        // Explicit file locations get sort indices in request order.
        let load = env.load(vec!["z.js", "a.js"]);
        wait_ready(&load);
        let names: Vec<String> = load
            .asset_locations()
            .iter()
            .map(|l| env.relative_path(l))
            .collect();
        assert_eq!(names, vec!["z.js", "a.js"]);
    }

    #[test]
    fn use_declarations_order_dependencies_first() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("src/app.js"),
            "//@use ./lib.js\napp();",
        )
        .unwrap();
        fs::write(dir.path().join("src/lib.js"), "lib();").unwrap();
        let env = env_at(dir.path());

        let load = env.load("src");
        wait_ready(&load);

        let names: Vec<String> = load
            .asset_locations()
            .iter()
            .map(|l| env.relative_path(l))
            .collect();
        assert_eq!(names, vec!["src/lib.js", "src/app.js"]);
    }

    #[test]
    fn dependency_cycles_fall_back_to_default_order() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.js"), "//@use ./b.js\na();").unwrap();
        fs::write(dir.path().join("src/b.js"), "//@use ./a.js\nb();").unwrap();
        let env = env_at(dir.path());
        let logger = MemoryLogger::new();
        env.set_logger(logger.clone());

        let load = env.load("src");
        wait_ready(&load);

        // The cycle is reported and the load still carries both assets in
        // a stable (if arbitrary) fallback order.
        assert!(logger.contains("did not converge"));
        let mut names: Vec<String> = load
            .asset_locations()
            .iter()
            .map(|l| env.relative_path(l))
            .collect();
        names.sort();
        assert_eq!(names, vec!["src/a.js", "src/b.js"]);
    }

    #[test]
    fn concat_joins_sorted_compiled_content() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/b.js"), "var b = 2;").unwrap();
        fs::write(dir.path().join("src/a.js"), "var a = 1;").unwrap();
        let env = env_at(dir.path());

        let load = env.load("src");
        let out = load.concat(Some("/out.js"));

        let (sender, receiver) = channel();
        out.once_ready(move || {
            let _ = sender.send(());
        });
        receiver.recv_timeout(Duration::from_secs(5)).unwrap();

        let assets = out.assets();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].location(), "/out.js");
        assert_eq!(assets[0].get_content(), "var a = 1;\nvar b = 2;");
    }

    #[test]
    fn replay_scopes_each_to_changed_location() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.md"), "# a").unwrap();
        fs::write(dir.path().join("src/b.md"), "# b").unwrap();
        let env = env_at(dir.path());

        let compiled: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
        let record = compiled.clone();
        let record_env = env.clone();
        let load = env.load("src");
        load.each(move |asset| {
            record
                .lock()
                .unwrap()
                .push(record_env.relative_path(asset.location()));
        });
        wait_ready(&load);
        assert_eq!(compiled.lock().unwrap().len(), 2);
        compiled.lock().unwrap().clear();

        // A change under src/a.md replays the action for a.md only.
        let changed = format!("{}/src/a.md", env.root());
        load.handle_change(&changed);
        wait_ready(&load);

        let replayed = compiled.lock().unwrap().clone();
        assert_eq!(replayed, vec!["src/a.md"]);
    }

    #[test]
    fn handle_change_removes_deleted_assets() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.js"), "a;").unwrap();
        fs::write(dir.path().join("src/b.js"), "b;").unwrap();
        let env = env_at(dir.path());

        let load = env.load("src");
        wait_ready(&load);
        assert_eq!(load.assets().len(), 2);

        let gone = format!("{}/src/a.js", env.root());
        fs::remove_file(dir.path().join("src/a.js")).unwrap();
        load.handle_change(&gone);
        wait_ready(&load);

        assert_eq!(load.assets().len(), 1);
        assert!(env.cache().get(&gone).is_none());
    }

    #[test]
    fn handle_change_adds_brand_new_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.js"), "a;").unwrap();
        let env = env_at(dir.path());

        let load = env.load("src");
        wait_ready(&load);
        assert_eq!(load.assets().len(), 1);

        fs::write(dir.path().join("src/new.js"), "n;").unwrap();
        load.handle_change(&format!("{}/src/new.js", env.root()));
        wait_ready(&load);

        assert_eq!(load.assets().len(), 2);
    }

    #[test]
    fn replay_does_not_record_new_actions() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "a;").unwrap();
        let env = env_at(dir.path());

        let load = env.load("a.js");
        load.minify();
        wait_ready(&load);
        let recorded = load.inner.state.lock().unwrap().replayable.len();

        load.handle_change(&format!("{}/a.js", env.root()));
        wait_ready(&load);

        // Replaying re-ran minify without growing the action log.
        assert_eq!(load.inner.state.lock().unwrap().replayable.len(), recorded);
    }

    #[test]
    fn get_tags_references_target_languages() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.js"), "a;").unwrap();
        fs::write(dir.path().join("site.css"), "s{}").unwrap();
        let env = env_at(dir.path());

        let load = env.load(vec!["app.js", "site.css"]);
        wait_ready(&load);

        let tags = load.get_tags(None);
        assert_eq!(
            tags,
            "<script src=\"/app.js\"></script><link rel=\"stylesheet\" href=\"/site.css\">"
        );
    }
}
