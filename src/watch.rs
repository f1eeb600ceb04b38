//! Filesystem watching
//!
//! Installs notify handlers over a Load's watchable paths (the requested
//! roots and every walked directory). Each event bumps the environment's
//! cache-bust token, filters out editor backup files, and hands the changed
//! path to `handle_change`, which re-reads or evicts matching assets and
//! replays the recorded pipeline actions. Watchers persist for the process
//! lifetime; installation is idempotent per Load.

use std::path::Path;

use notify::{RecursiveMode, Watcher};

use crate::error::HopperError;
use crate::load::Load;

/// Editor backup files (JetBrains safe-write suffix).
fn is_backup_file(path: &str) -> bool {
    path.ends_with("___")
}

/// NDJSON summary of one filesystem event, for structured logs.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    FileChanged { path: String, kind: String },
}

impl WatchEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Load {
    /// Start watching the watchable paths. Safe to call repeatedly; the
    /// OS handlers are only installed once per Load.
    pub fn watch(&self) -> Load {
        self.install_watch();
        self.clone()
    }

    /// Watch, and invoke the callback with `(load, file, event)` after
    /// each change has been applied and replayed.
    pub fn watch_with(
        &self,
        callback: impl Fn(&Load, &str, &str) + Send + Sync + 'static,
    ) -> Load {
        self.push_watch_callback(std::sync::Arc::new(callback));
        self.install_watch();
        self.clone()
    }

    fn install_watch(&self) {
        if self.is_watching() {
            return;
        }
        self.mark_watching();
        let load = self.clone();
        self.once_ready(move || load.start_watchers());
    }

    fn start_watchers(&self) {
        let load = self.clone();
        let handler = move |result: Result<notify::Event, notify::Error>| {
            if let Ok(event) = result {
                load.on_watch_event(&event);
            }
        };
        let mut watcher = match notify::RecommendedWatcher::new(
            handler,
            notify::Config::default(),
        ) {
            Ok(watcher) => watcher,
            Err(err) => {
                self.env()
                    .logger()
                    .error(&format!("could not create watcher: {err}"));
                return;
            }
        };

        for watchable in self.watchables() {
            if let Err(err) = watcher.watch(
                Path::new(&watchable.path),
                RecursiveMode::NonRecursive,
            ) {
                let failure = HopperError::WatchFailed {
                    path: watchable.path.clone().into(),
                    message: err.to_string(),
                };
                self.env().logger().error(&failure.to_string());
            }
        }

        // The watcher must outlive this call or the OS handles close.
        self.store_watcher(watcher);
    }

    pub(crate) fn on_watch_event(&self, event: &notify::Event) {
        // Changes must be visible to clients holding cached responses.
        self.env().bump_cache_bust();

        let kind = match event.kind {
            notify::EventKind::Create(_) | notify::EventKind::Remove(_) => "rename",
            _ => "change",
        };

        for path in &event.paths {
            let file = path.to_string_lossy().replace('\\', "/");
            if is_backup_file(&file) {
                continue;
            }
            tracing::debug!(
                target: "hopper",
                "{}",
                WatchEvent::FileChanged {
                    path: file.clone(),
                    kind: kind.to_string(),
                }
                .to_json()
            );

            // Find the watch root this path falls under, for filter routing.
            let (root, filter) = self
                .watchables()
                .into_iter()
                .find(|watchable| file.starts_with(&watchable.path))
                .map(|watchable| (watchable.path, watchable.filter))
                .unwrap_or_else(|| (file.clone(), None));

            self.handle_change_filtered(&file, filter.as_deref(), &root);

            let load = self.clone();
            let changed = file.clone();
            let kind = kind.to_string();
            self.once_ready(move || {
                for callback in load.watch_callbacks() {
                    callback(&load, &changed, &kind);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use std::fs;
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;

    fn wait_ready(load: &Load) {
        let (sender, receiver) = channel();
        load.once_ready(move || {
            let _ = sender.send(());
        });
        receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn backup_files_are_filtered() {
        assert!(is_backup_file("/src/a.js___"));
        assert!(!is_backup_file("/src/a.js"));
    }

    #[test]
    fn watch_event_serializes_to_ndjson() {
        let event = WatchEvent::FileChanged {
            path: "/src/a.js".to_string(),
            kind: "change".to_string(),
        };
        assert_eq!(
            event.to_json(),
            r#"{"event":"file_changed","path":"/src/a.js","kind":"change"}"#
        );
    }

    #[test]
    fn watch_is_idempotent() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "a;").unwrap();
        let env = Environment::new(dir.path().to_string_lossy().into_owned());

        let load = env.load("a.js");
        wait_ready(&load);
        load.watch().watch().watch();
        assert!(load.is_watching());
    }

    #[test]
    fn simulated_event_reaches_handle_change_and_callbacks() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.js"), "one").unwrap();
        let env = Environment::new(dir.path().to_string_lossy().into_owned());

        let load = env.load("src");
        wait_ready(&load);

        // Rewrite before the watcher installs, so the only event seen is
        // the simulated one below.
        fs::write(dir.path().join("src/a.js"), "two").unwrap();

        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::default();
        let record = seen.clone();
        load.watch_with(move |_load, file, event| {
            record
                .lock()
                .unwrap()
                .push((file.to_string(), event.to_string()));
        });
        wait_ready(&load);

        // Drive the event path directly instead of waiting on OS delivery.
        let changed = format!("{}/src/a.js", env.root());
        let event = notify::Event::new(notify::EventKind::Modify(
            notify::event::ModifyKind::Any,
        ))
        .add_path(changed.clone().into());
        load.on_watch_event(&event);
        wait_ready(&load);

        assert_eq!(load.assets()[0].get_content(), "two");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, changed);
        assert_eq!(seen[0].1, "change");
        assert!(env.cache_bust().is_some());
    }

    #[test]
    fn real_watcher_picks_up_changes() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.js"), "one").unwrap();
        let env = Environment::new(dir.path().to_string_lossy().into_owned());

        let load = env.load("src");
        wait_ready(&load);

        let (sender, receiver) = channel();
        let sender = Mutex::new(sender);
        load.watch_with(move |_load, file, _event| {
            let _ = sender.lock().unwrap().send(file.to_string());
        });
        wait_ready(&load);

        // Give the OS watcher a moment to install, then touch the file.
        std::thread::sleep(Duration::from_millis(200));
        fs::write(dir.path().join("src/a.js"), "two").unwrap();

        let changed = receiver.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(changed.ends_with("a.js"));
        assert_eq!(load.assets()[0].get_content(), "two");
    }
}
