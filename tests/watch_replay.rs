//! Watch-triggered replay: recorded pipeline actions re-run in order,
//! scoped to the assets under the changed location.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hopper::{CompilerHandle, Environment};
use tempfile::tempdir;

fn wait_ready(load: &hopper::Load) {
    let (sender, receiver) = channel();
    load.once_ready(move || {
        let _ = sender.send(());
    });
    receiver.recv_timeout(Duration::from_secs(5)).unwrap();
}

/// Register a compiler that records which locations it was invoked for.
fn counting_compiler(env: &Environment, file_type: &str) -> Arc<Mutex<Vec<String>>> {
    let invoked: Arc<Mutex<Vec<String>>> = Arc::default();
    let record = invoked.clone();
    let marker = Arc::new(AtomicUsize::new(0));
    env.set_compiler(
        file_type,
        CompilerHandle::TextTransform(Arc::new(move |source, _| {
            // The source text carries its own path marker on line one.
            let name = source.lines().next().unwrap_or("?").to_string();
            record.lock().unwrap().push(name);
            let stamp = marker.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{source}\n/*pass {stamp}*/"))
        })),
    );
    invoked
}

#[test]
fn replay_compiles_only_assets_under_the_changed_path() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("a.part"), "a.part").unwrap();
    fs::write(src.join("b.part"), "b.part").unwrap();
    let env = Environment::new(dir.path().to_string_lossy().into_owned());
    let invoked = counting_compiler(&env, "part");

    let load = env.load("src").compile();
    wait_ready(&load);
    {
        let mut calls = invoked.lock().unwrap();
        assert_eq!(*calls, vec!["a.part", "b.part"]);
        calls.clear();
    }

    // Touch b.part only; replay must recompile b.part and leave a.part be.
    fs::write(src.join("b.part"), "b.part\nv2").unwrap();
    load.handle_change(&format!("{}/src/b.part", env.root()));
    wait_ready(&load);

    assert_eq!(*invoked.lock().unwrap(), vec!["b.part"]);

    let assets = load.assets();
    let b = assets
        .iter()
        .find(|a| a.location().ends_with("b.part"))
        .unwrap();
    assert!(b.get_compiled_content().contains("v2"));
}

#[test]
fn replayed_actions_run_in_recorded_order() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("a.js"), "var a = 'one';").unwrap();
    let env = Environment::new(dir.path().to_string_lossy().into_owned());

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let first = order.clone();
    let second = order.clone();

    let load = env.load("src");
    load.each(move |_| first.lock().unwrap().push("each"));
    load.then(move |_| second.lock().unwrap().push("then"));
    wait_ready(&load);
    order.lock().unwrap().clear();

    load.handle_change(&format!("{}/src/a.js", env.root()));
    wait_ready(&load);

    // The built-in sort `then` replays first, then the user actions in
    // registration order.
    assert_eq!(*order.lock().unwrap(), vec!["each", "then"]);
}

#[test]
fn deleting_a_directory_evicts_its_assets_and_replays() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("keep.js"), "k;").unwrap();
    fs::write(src.join("sub/one.js"), "1;").unwrap();
    fs::write(src.join("sub/two.js"), "2;").unwrap();
    let env = Environment::new(dir.path().to_string_lossy().into_owned());

    let load = env.load("src");
    wait_ready(&load);
    assert_eq!(load.assets().len(), 3);

    fs::remove_dir_all(src.join("sub")).unwrap();
    let gone = format!("{}/src/sub", env.root());
    load.handle_change(&gone);
    wait_ready(&load);

    assert_eq!(load.assets().len(), 1);
    assert!(load.assets()[0].location().ends_with("keep.js"));
    assert!(env.cache().get(&format!("{gone}/one.js")).is_none());
    assert!(env.cache().get(&format!("{gone}/two.js")).is_none());
}

#[test]
fn concat_into_replays_the_target_load() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("a.js"), "var a = 'one';").unwrap();
    let env = Environment::new(dir.path().to_string_lossy().into_owned());

    // The target load minifies whatever lands in it.
    let target = env.empty_load();
    target.minify();

    let source = env.load("src");
    source.concat_into(Some("/bundle.js"), &target);
    wait_ready(&target);
    assert_eq!(
        target.assets()[0].get_minified_content(),
        "var a = 'one';"
    );

    // A source change flows through concat into the target and re-minifies.
    fs::write(src.join("a.js"), "var a = 'two';\n\n").unwrap();
    source.handle_change(&format!("{}/src/a.js", env.root()));
    wait_ready(&target);

    assert_eq!(
        target.assets()[0].get_minified_content(),
        "var a = 'two';"
    );
}
