//! Asset - a cache of content keyed by location
//!
//! An Asset holds one piece of content and its lazily derived pipeline
//! stages (compiled, minified, gzipped). Identity is the location string;
//! the process-wide Cache guarantees one Asset per location no matter how
//! many Loads reference it. An Asset owns a Waiter and registers every
//! referencing Load as a parent, so a Load cannot report ready while any of
//! its assets still has work in flight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;

use crate::compilers::CompileOptions;
use crate::content::Content;
use crate::dot_cache;
use crate::env::Environment;
use crate::error::{HopperError, HopperResult};
use crate::load::{Load, WeakLoad};
use crate::mime;
use crate::router::{RouteContext, RouteHandler};
use crate::waiter::Waiter;

/// How an asset's content is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetKind {
    /// Content set directly (concat outputs, tests).
    Raw,
    /// Content read from the backing path.
    FileBacked,
    /// Content produced by a named filter over the backing tree.
    Filtered(String),
}

/// Which pipeline stage to pull content from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMode {
    Raw,
    Compiled,
    Minified,
    Gzipped,
}

/// A writable content slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentScope {
    Raw,
    Compiled,
    Minified,
}

/// Shared asset handle; clones observe the same state.
#[derive(Clone)]
pub struct Asset {
    inner: Arc<AssetInner>,
}

struct AssetInner {
    env: Environment,
    waiter: Waiter,
    location: String,
    state: Mutex<AssetState>,
}

struct AssetState {
    kind: AssetKind,
    path: String,
    file_type: String,
    sort_index: usize,
    modified: Option<SystemTime>,
    content: Option<Content>,
    compiled: Option<Content>,
    minified: Option<Content>,
    gzipped: Option<Vec<u8>>,
    cull_target: Option<ContentScope>,
    uses: HashSet<String>,
    use_index: usize,
    auto_route: bool,
    route_context: Option<serde_json::Value>,
    last_compile: Option<CompileOptions>,
    compiled_from: Option<String>,
    loads: Vec<WeakLoad>,
}

fn autoroute_pattern() -> Regex {
    Regex::new(r"^[^A-Za-z]*AUTOROUTE").unwrap()
}

fn bare_pattern() -> Regex {
    Regex::new(r"^[^A-Za-z]*(?i:BARE|NOWRAP)").unwrap()
}

fn use_pattern() -> Regex {
    Regex::new(r"@use\s+(\S+)").unwrap()
}

fn views_name_pattern() -> Regex {
    Regex::new(r"^.*/views/(.*)\.[a-z]+$").unwrap()
}

impl Asset {
    pub(crate) fn create(
        env: &Environment,
        kind: AssetKind,
        location: &str,
        modified: Option<SystemTime>,
        load: Option<&Load>,
    ) -> Asset {
        let location = location.replace('\\', "/");
        let path = env.relative_path(&location);
        let file_type = location
            .rsplit('.')
            .next()
            .filter(|ext| !ext.contains('/') && *ext != location)
            .unwrap_or("")
            .to_lowercase();
        let sort_index = load
            .and_then(|l| l.location_index(&location))
            .unwrap_or(usize::MAX);
        let asset = Asset {
            inner: Arc::new(AssetInner {
                env: env.clone(),
                waiter: Waiter::new(),
                location,
                state: Mutex::new(AssetState {
                    kind,
                    path,
                    file_type,
                    sort_index,
                    modified,
                    content: None,
                    compiled: None,
                    minified: None,
                    gzipped: None,
                    cull_target: None,
                    uses: HashSet::new(),
                    use_index: 0,
                    auto_route: false,
                    route_context: None,
                    last_compile: None,
                    compiled_from: None,
                    loads: Vec::new(),
                }),
            }),
        };
        if let Some(load) = load {
            asset.attach_load(load);
        }
        asset
    }

    /// A bare asset whose content is set directly.
    pub fn raw(env: &Environment, location: &str) -> Asset {
        Asset::create(env, AssetKind::Raw, location, None, None)
    }

    /// Register a Load as depending on this asset: the Load waits for this
    /// asset's in-flight work, and `@use` declarations found in this
    /// asset's content are added to the Load.
    pub(crate) fn attach_load(&self, load: &Load) {
        self.inner.waiter.add_parent(load.waiter());
        self.inner.state.lock().unwrap().loads.push(load.downgrade());
    }

    pub fn location(&self) -> &str {
        &self.inner.location
    }

    pub fn path(&self) -> String {
        self.inner.state.lock().unwrap().path.clone()
    }

    /// Lowercased file extension.
    pub fn file_type(&self) -> String {
        self.inner.state.lock().unwrap().file_type.clone()
    }

    pub fn kind(&self) -> AssetKind {
        self.inner.state.lock().unwrap().kind.clone()
    }

    pub fn sort_index(&self) -> usize {
        self.inner.state.lock().unwrap().sort_index
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.inner.state.lock().unwrap().modified
    }

    /// Whether an AUTOROUTE marker has been seen in this asset's content.
    pub fn auto_routed(&self) -> bool {
        self.inner.state.lock().unwrap().auto_route
    }

    pub fn waiter(&self) -> &Waiter {
        &self.inner.waiter
    }

    pub(crate) fn env(&self) -> &Environment {
        &self.inner.env
    }

    pub(crate) fn set_path_and_type(&self, path: String, file_type: String) {
        let mut state = self.inner.state.lock().unwrap();
        state.path = path;
        state.file_type = file_type;
    }

    /// Run a callback once this asset's in-flight work settles.
    pub fn once_ready(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.waiter.once_ready(callback);
    }

    // --- content staging ---

    /// Set this asset's content. No-op when the value is unchanged. On
    /// change: an AUTOROUTE marker at content start triggers routing (with
    /// an optional JSON context from the remainder of that line), a
    /// previously compiled asset recompiles with its remembered options,
    /// and `@use` declarations are rescanned.
    pub fn set_content(&self, content: impl Into<Content>) -> Asset {
        let content = content.into();
        let mut should_route = false;
        let mut route_context_error = None;
        let recompile;
        {
            let mut state = self.inner.state.lock().unwrap();
            if state
                .content
                .as_ref()
                .is_some_and(|existing| existing.same_as(&content))
            {
                return self.clone();
            }

            if let Some(text) = content.as_text() {
                if autoroute_pattern().is_match(text) {
                    state.auto_route = true;
                    let first_line = text.lines().next().unwrap_or("");
                    if let Some((_, context)) = first_line.split_once("AUTOROUTE") {
                        if !context.trim().is_empty() {
                            match serde_json::from_str(context.trim()) {
                                Ok(value) => state.route_context = Some(value),
                                Err(source) => {
                                    route_context_error = Some(HopperError::InvalidRouteContext {
                                        location: self.inner.location.clone(),
                                        source,
                                    });
                                }
                            }
                        }
                    }
                    should_route = true;
                }
            }

            state.content = Some(content);
            recompile = state.last_compile.clone();
        }

        if let Some(err) = route_context_error {
            self.inner.env.logger().error(&err.to_string());
        }
        if should_route {
            self.route(None);
        }
        if let Some(options) = recompile {
            self.compile_with(&options);
        }
        self.use_scan();
        self.clone()
    }

    /// Compile with default options.
    pub fn compile(&self) -> Asset {
        self.compile_with(&CompileOptions::default())
    }

    /// Compile the asset if its type has a compiler. The result lands in
    /// the compiled slot only when it differs from the input; an unchanged
    /// source is never recompiled.
    pub fn compile_with(&self, options: &CompileOptions) -> Asset {
        let Some(handle) = self.inner.env.resolve_compiler(&self.file_type()) else {
            return self.clone();
        };

        let source = {
            let state = self.inner.state.lock().unwrap();
            match &state.content {
                Some(Content::Text(text)) => text.clone(),
                // Binary and template content bypasses compilation.
                Some(_) => return self.clone(),
                None => String::new(),
            }
        };

        {
            let state = self.inner.state.lock().unwrap();
            if state.compiled_from.as_deref() == Some(source.as_str())
                && state.last_compile.as_ref() == Some(options)
            {
                return self.clone();
            }
        }

        let mut effective = options.clone();
        if effective.name.is_none() {
            effective.name = views_name_pattern()
                .captures(&self.inner.location)
                .map(|captures| captures[1].to_string());
        }
        if bare_pattern().is_match(&source) {
            effective.bare = true;
        }

        match handle.invoke(&source, &effective) {
            Ok(compiled) => {
                let mut state = self.inner.state.lock().unwrap();
                if !compiled.same_as(&Content::Text(source.clone())) {
                    state.compiled = Some(compiled);
                }
                state.compiled_from = Some(source);
                state.last_compile = Some(options.clone());
            }
            Err(err) => self.inner.env.logger().error(&err.to_string()),
        }
        self.clone()
    }

    /// Strip or keep marked regions. The target slot is chosen on first
    /// cull (compiled if present, else raw) and sticks for later culls.
    pub fn cull(&self, key: &str, value: &str) -> Asset {
        let mut state = self.inner.state.lock().unwrap();
        if state.cull_target.is_none() {
            state.cull_target = Some(if state.compiled.is_some() {
                ContentScope::Compiled
            } else {
                ContentScope::Raw
            });
        }
        let target = state.cull_target.unwrap();
        let slot = match target {
            ContentScope::Compiled => &mut state.compiled,
            _ => &mut state.content,
        };
        if let Some(Content::Text(text)) = slot {
            *text = cull_text(text, key, value);
        }
        self.clone()
    }

    /// Wrap compiled content in an IIFE. JS targets only. Without explicit
    /// args, captures the known globals referenced more than twice.
    pub fn wrap(&self, closure_args: Option<&str>) -> Asset {
        if self.inner.env.target_language(&self.file_type()) != "js" {
            return self.clone();
        }
        let content = self.get_compiled_content();
        let args = match closure_args {
            Some(args) => args.to_string(),
            None => infer_closure_args(&content),
        };
        let wrapped = format!("(function({args}){{{content}}})({args})");
        self.inner.state.lock().unwrap().compiled = Some(Content::Text(wrapped));
        self.clone()
    }

    /// Minify via the target language's minifier. A failing minifier logs,
    /// persists the offending content to the diagnostic cache, and leaves
    /// the content unminified; the pipeline continues.
    pub fn minify(&self) -> Asset {
        let file_type = self.file_type();
        let target = self.inner.env.target_language(&file_type);
        let minifier = self.inner.env.resolve_minifier(&target);

        let source = {
            let state = self.inner.state.lock().unwrap();
            state
                .compiled
                .clone()
                .or_else(|| state.content.clone())
                .unwrap_or_else(|| Content::Text(String::new()))
        };

        let mut minified = source.clone();
        if let (Some(minifier), Some(text)) = (minifier, source.as_text()) {
            if !text.is_empty() {
                match minifier.minify(text) {
                    Ok(smaller) => minified = Content::Text(smaller),
                    Err(err) => {
                        let failure = HopperError::MinifyFailed {
                            location: self.inner.location.clone(),
                            message: err.to_string(),
                        };
                        self.inner.env.logger().error(&failure.to_string());
                        let path = self.path();
                        match self
                            .inner
                            .env
                            .dot_cache()
                            .write("hopper", &path, text.as_bytes())
                        {
                            Ok(written) => self.inner.env.logger().warn(&format!(
                                "non-minifiable content cached at \"{}\"",
                                written.display()
                            )),
                            Err(err) => self.inner.env.logger().error(&err.to_string()),
                        }
                    }
                }
            }
        }

        {
            let mut state = self.inner.state.lock().unwrap();
            if !state
                .minified
                .as_ref()
                .is_some_and(|existing| existing.same_as(&minified))
            {
                state.minified = Some(minified);
            }
        }

        // Token-renaming pass over textual content, when enabled.
        let shrunk = {
            let state = self.inner.state.lock().unwrap();
            match &state.minified {
                Some(Content::Text(text)) => self.inner.env.shrink_text(text),
                _ => None,
            }
        };
        if let Some(text) = shrunk {
            self.inner.state.lock().unwrap().minified = Some(Content::Text(text));
        }
        self.clone()
    }

    /// String replacement over one scope, or raw+compiled+minified when no
    /// scope is given. Gzipped content is rebuilt if it existed.
    pub fn replace(
        &self,
        pattern: &Regex,
        replacement: &str,
        scope: Option<ContentScope>,
    ) -> Asset {
        let rezip = {
            let mut state = self.inner.state.lock().unwrap();
            let scopes = match scope {
                Some(single) => vec![single],
                None => vec![
                    ContentScope::Raw,
                    ContentScope::Compiled,
                    ContentScope::Minified,
                ],
            };
            for scope in scopes {
                let slot = match scope {
                    ContentScope::Raw => &mut state.content,
                    ContentScope::Compiled => &mut state.compiled,
                    ContentScope::Minified => &mut state.minified,
                };
                if let Some(Content::Text(text)) = slot {
                    *text = pattern.replace_all(text, replacement).into_owned();
                }
            }
            state.gzipped.is_some()
        };
        if rezip {
            self.gzip();
        }
        self.clone()
    }

    /// Gzip the minified content on a worker thread, bracketed by this
    /// asset's own wait count so dependents see the work in flight.
    pub fn gzip(&self) -> Asset {
        let minified = self.get_minified_content();
        if minified.is_empty() {
            return self.clone();
        }
        self.inner.waiter.wait(1);
        let asset = self.clone();
        std::thread::spawn(move || {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            let result = std::io::Write::write_all(&mut encoder, minified.as_bytes())
                .and_then(|_| encoder.finish());
            match result {
                Ok(zipped) => {
                    asset.inner.state.lock().unwrap().gzipped = Some(zipped);
                }
                Err(err) => asset
                    .inner
                    .env
                    .logger()
                    .error(&format!("gzip failed for {}: {err}", asset.location())),
            }
            asset.inner.waiter.unwait(1);
        });
        self.clone()
    }

    /// Register this asset with the environment's router. Logs and no-ops
    /// when no router has been configured.
    pub fn route(&self, url: Option<&str>) -> Asset {
        let Some(router) = self.inner.env.router() else {
            self.inner
                .env
                .logger()
                .error(&HopperError::NoRouter.to_string());
            return self.clone();
        };
        let target = self.inner.env.target_language(&self.file_type());
        let mime_type = mime::lookup(&target).unwrap_or("text/html");
        let url = match url {
            Some(explicit) => explicit.to_string(),
            None => self.derive_url(&target, mime_type),
        };

        let asset = self.clone();
        let handler: RouteHandler = Arc::new(move |request, response| {
            let (content, gzipped, context) = {
                let state = asset.inner.state.lock().unwrap();
                let content = state
                    .minified
                    .clone()
                    .or_else(|| state.compiled.clone())
                    .or_else(|| state.content.clone());
                (content, state.gzipped.clone(), state.route_context.clone())
            };
            response.set_header("content-type", mime_type);
            response.status = 200;
            if request.query.contains_key("v") {
                let future = chrono::Utc::now() + chrono::Duration::seconds(100_000_000);
                response.set_header(
                    "expires",
                    &future.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
                );
            }
            match content {
                Some(Content::Template(template)) => {
                    let context = RouteContext {
                        url: request.url.clone(),
                        query: request.query.clone(),
                        cache_bust: asset.inner.env.cache_bust(),
                        data: context,
                    };
                    response.end(template(&context).as_bytes());
                }
                Some(other) => {
                    response.zip(request, other.as_bytes().unwrap_or(b""), gzipped.as_deref());
                }
                None => response.end(b""),
            }
        });
        router.get(&url, handler);
        self.clone()
    }

    /// URL for routing: the root-relative path minus a `public/` or
    /// `views/` prefix, with the extension rewritten to the target
    /// language. HTML targets lose the extension entirely and a trailing
    /// `/index` collapses to the directory URL.
    fn derive_url(&self, target: &str, mime_type: &str) -> String {
        let path = self.path();
        let stripped = path
            .strip_prefix("public/")
            .or_else(|| path.strip_prefix("views/"))
            .unwrap_or(&path);
        let mut url = if stripped.starts_with('/') {
            stripped.to_string()
        } else {
            format!("/{stripped}")
        };
        if mime_type == "text/html" {
            if let Some(dot) = url.rfind('.') {
                if !url[dot..].contains('/') {
                    url.truncate(dot);
                }
            }
            if let Some(base) = url.strip_suffix("/index") {
                url = if base.is_empty() {
                    "/".to_string()
                } else {
                    base.to_string()
                };
            }
        } else if let Some(dot) = url.rfind('.') {
            if !url[dot..].contains('/') {
                url = format!("{}.{target}", &url[..dot]);
            }
        }
        url
    }

    /// Write the mode-resolved content to `directory/filename`, or back to
    /// this asset's own location. Parent directories are created.
    pub fn write(
        &self,
        directory: Option<&str>,
        filename: Option<&str>,
        mode: ContentMode,
    ) -> HopperResult<()> {
        let path = match (directory, filename) {
            (Some(dir), Some(name)) => format!("{dir}/{name}"),
            _ => self.inner.location.clone(),
        };
        let bytes = self.content_for(mode);
        self.inner.waiter.wait(1);
        let result = (|| {
            let target = std::path::Path::new(&path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            dot_cache::atomic_write(target, &bytes)
        })();
        self.inner.waiter.unwait(1);
        result
    }

    fn content_for(&self, mode: ContentMode) -> Vec<u8> {
        let state = self.inner.state.lock().unwrap();
        let staged = |slots: &[&Option<Content>]| -> Vec<u8> {
            slots
                .iter()
                .find_map(|slot| slot.as_ref().and_then(|c| c.as_bytes().map(<[u8]>::to_vec)))
                .unwrap_or_default()
        };
        match mode {
            ContentMode::Raw => staged(&[&state.content]),
            ContentMode::Compiled => staged(&[&state.compiled, &state.content]),
            ContentMode::Minified => {
                staged(&[&state.minified, &state.compiled, &state.content])
            }
            ContentMode::Gzipped => state.gzipped.clone().unwrap_or_default(),
        }
    }

    // --- dependency declarations ---

    /// Scan content for `@use <spec>` directives and add each newly
    /// declared location to every Load that references this asset.
    pub(crate) fn use_scan(&self) {
        let text = {
            let state = self.inner.state.lock().unwrap();
            match &state.content {
                Some(Content::Text(text)) => text.clone(),
                _ => return,
            }
        };
        let dir = self
            .inner
            .location
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();

        let mut fresh = Vec::new();
        for captures in use_pattern().captures_iter(&text) {
            let spec = &captures[1];
            let resolved = if spec.starts_with('.') {
                join_path(&dir, spec)
            } else if spec.starts_with('/') {
                spec.to_string()
            } else {
                format!("{}/{}", self.inner.env.package_root(), spec)
            };
            let mut state = self.inner.state.lock().unwrap();
            if state.uses.insert(resolved.clone()) {
                fresh.push(resolved);
            }
        }

        if fresh.is_empty() {
            return;
        }
        let loads: Vec<Load> = {
            let state = self.inner.state.lock().unwrap();
            state.loads.iter().filter_map(WeakLoad::upgrade).collect()
        };
        for load in loads {
            for spec in &fresh {
                load.add(spec.as_str());
            }
        }
    }

    /// Declared dependency locations.
    pub fn uses(&self) -> Vec<String> {
        let state = self.inner.state.lock().unwrap();
        state.uses.iter().cloned().collect()
    }

    pub fn has_uses(&self) -> bool {
        !self.inner.state.lock().unwrap().uses.is_empty()
    }

    pub(crate) fn use_index(&self) -> usize {
        self.inner.state.lock().unwrap().use_index
    }

    pub(crate) fn set_use_index(&self, index: usize) {
        self.inner.state.lock().unwrap().use_index = index;
    }

    // --- getters ---

    /// Raw textual content, or empty for unset/binary/template content.
    pub fn get_content(&self) -> String {
        let state = self.inner.state.lock().unwrap();
        state
            .content
            .as_ref()
            .and_then(Content::as_text)
            .unwrap_or("")
            .to_string()
    }

    /// Compiled content, falling back to raw.
    pub fn get_compiled_content(&self) -> String {
        let state = self.inner.state.lock().unwrap();
        let text = [&state.compiled, &state.content]
            .into_iter()
            .find_map(|slot| slot.as_ref().and_then(Content::as_text))
            .unwrap_or("")
            .to_string();
        text
    }

    /// Minified content, falling back through compiled to raw.
    pub fn get_minified_content(&self) -> String {
        let state = self.inner.state.lock().unwrap();
        let text = [&state.minified, &state.compiled, &state.content]
            .into_iter()
            .find_map(|slot| slot.as_ref().and_then(Content::as_text))
            .unwrap_or("")
            .to_string();
        text
    }

    pub fn content(&self) -> Option<Content> {
        self.inner.state.lock().unwrap().content.clone()
    }

    pub fn compiled_content(&self) -> Option<Content> {
        self.inner.state.lock().unwrap().compiled.clone()
    }

    pub fn minified_content(&self) -> Option<Content> {
        self.inner.state.lock().unwrap().minified.clone()
    }

    pub fn gzipped_content(&self) -> Option<Vec<u8>> {
        self.inner.state.lock().unwrap().gzipped.clone()
    }

    /// HTML tag referencing this asset, with the extension rewritten to
    /// the target language. Only js and css targets produce tags.
    pub fn tag(&self, prefix: &str) -> Option<String> {
        let file_type = self.file_type();
        let language = self.inner.env.target_language(&file_type);
        let path = self.path();
        let location = match path.rfind('.') {
            Some(dot) => format!("{}.{language}", &path[..dot]),
            None => path,
        };
        let location = if location.starts_with('/') {
            location
        } else {
            format!("/{location}")
        };
        match language.as_str() {
            "js" => Some(format!("<script src=\"{prefix}{location}\"></script>")),
            "css" => Some(format!(
                "<link rel=\"stylesheet\" href=\"{prefix}{location}\">"
            )),
            _ => None,
        }
    }
}

/// Free variables captured by an inferred IIFE: known globals referenced
/// more than twice, in first-appearance order.
fn infer_closure_args(content: &str) -> String {
    let pattern = Regex::new(r"\b(window|document|location|Math|Date|Error)\b").unwrap();
    let mut order: Vec<&str> = Vec::new();
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for found in pattern.find_iter(content) {
        let name = found.as_str();
        let count = counts.entry(name).or_insert(0);
        if *count == 0 {
            order.push(name);
        }
        *count += 1;
    }
    order
        .into_iter()
        .filter(|name| counts[name] > 2)
        .collect::<Vec<_>>()
        .join(",")
}

/// Remove regions between balanced `//±key:value` line markers or
/// `/*±key:value ... ±key:value*/` block markers, keeping regions whose
/// symbol/value test passes. Regions under other keys are untouched.
fn cull_text(input: &str, key: &str, value: &str) -> String {
    let value_pattern = Regex::new(&format!(r"\b{}\b", regex::escape(value))).unwrap();
    let line_opener = Regex::new(r"//([+-])([A-Za-z0-9_-]+):([A-Za-z0-9_,-]+)").unwrap();
    let culled = cull_pass(input, key, &value_pattern, &line_opener, |marker_key, list| {
        [
            format!("//+{marker_key}:{list}"),
            format!("//-{marker_key}:{list}"),
        ]
    });
    let block_opener = Regex::new(r"/\*([+-])([A-Za-z0-9_-]+):([A-Za-z0-9_,-]+)").unwrap();
    cull_pass(&culled, key, &value_pattern, &block_opener, |marker_key, list| {
        [
            format!("+{marker_key}:{list}*/"),
            format!("-{marker_key}:{list}*/"),
        ]
    })
}

fn cull_pass(
    input: &str,
    key: &str,
    value_pattern: &Regex,
    opener: &Regex,
    closers: impl Fn(&str, &str) -> [String; 2],
) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pos = 0;
    while let Some(captures) = opener.captures(&input[pos..]) {
        let whole = captures.get(0).unwrap();
        let open_start = pos + whole.start();
        let open_end = pos + whole.end();
        let symbol = &captures[1];
        let marker_key = captures[2].to_string();
        let marker_values = captures[3].to_string();

        let rest = &input[open_end..];
        let close = closers(&marker_key, &marker_values)
            .iter()
            .filter_map(|token| rest.find(token.as_str()).map(|at| (at, token.len())))
            .min_by_key(|(at, _)| *at);

        match close {
            None => {
                // Unbalanced marker: leave it and keep scanning.
                out.push_str(&input[pos..open_end]);
                pos = open_end;
            }
            Some((at, token_len)) => {
                let inside = &rest[..at];
                let match_end = open_end + at + token_len;
                out.push_str(&input[pos..open_start]);
                if marker_key == key {
                    let should_match = symbol == "+";
                    let does_match = value_pattern.is_match(&marker_values);
                    if should_match == does_match {
                        out.push_str(inside);
                    }
                } else {
                    out.push_str(&input[open_start..match_end]);
                }
                pos = match_end;
            }
        }
    }
    out.push_str(&input[pos..]);
    out
}

/// Lexically join a relative spec onto a directory, resolving `.` and
/// `..` segments without touching the filesystem.
fn join_path(dir: &str, spec: &str) -> String {
    let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    let absolute = dir.starts_with('/');
    for segment in spec.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}
