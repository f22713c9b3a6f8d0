//! Script catalog listing, refresh and source loading.

use std::sync::{Arc, Mutex};

use rstest::rstest;
use serde_json::json;

use super::support::{FakeVm, fake_vm};
use crate::CallError;
use crate::protocol::Event;
use crate::relay::Relay;
use crate::scripts::{SCRIPTS, Script, ScriptCatalog};

fn script(id: u64, name: &str, source: &str) -> Script {
    Script {
        id,
        name: Some(name.to_owned()),
        line_offset: 0,
        source: Some(source.to_owned()),
    }
}

fn ids(scripts: &[Script]) -> Vec<u64> {
    scripts.iter().map(|s| s.id).collect()
}

#[rstest]
fn listing_is_loaded_once_and_shared(fake_vm: FakeVm) {
    fake_vm.add_script(script(1, "main.js", "main()"));
    let catalog = ScriptCatalog::new(fake_vm.multiplexer());

    let first = catalog.scripts().get_sync().expect("resolved").expect("listed");
    let second = catalog.scripts().get_sync().expect("resolved").expect("listed");

    assert_eq!(ids(&first), vec![1]);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.first().and_then(|s| s.source.clone()), None);
    assert_eq!(fake_vm.count(SCRIPTS), 1);
}

#[rstest]
fn refresh_reloads_the_listing(fake_vm: FakeVm) {
    fake_vm.add_script(script(1, "main.js", "main()"));
    let catalog = ScriptCatalog::new(fake_vm.multiplexer());
    let _loaded = catalog.scripts().get_sync();
    fake_vm.add_script(script(2, "lib.js", "lib()"));

    catalog.refresh();

    let listed = catalog.scripts().get_sync().expect("resolved").expect("listed");
    assert_eq!(ids(&listed), vec![1, 2]);
    assert_eq!(fake_vm.count(SCRIPTS), 2);
}

#[rstest]
fn refresh_while_loading_keeps_the_running_load(fake_vm: FakeVm) {
    fake_vm.hold_replies();
    let catalog = ScriptCatalog::new(fake_vm.multiplexer());
    let pending = catalog.scripts();

    catalog.refresh();
    assert_eq!(fake_vm.deliver_all(), 1);

    assert_eq!(fake_vm.count(SCRIPTS), 1);
    assert!(pending.get_sync().expect("resolved").is_ok());
}

#[rstest]
fn parsed_scripts_join_the_snapshot(fake_vm: FakeVm) {
    fake_vm.add_script(script(1, "main.js", "main()"));
    let catalog = ScriptCatalog::new(fake_vm.multiplexer());
    let _loaded = catalog.scripts().get_sync();

    catalog.on_script_parsed(&Event::new(
        "afterCompile",
        Some(json!({"script": {"id": 7, "name": "eval.js", "lineOffset": 3}})),
    ));
    catalog.on_script_parsed(&Event::new("afterCompile", Some(json!({"nonsense": true}))));

    let snapshot = catalog.snapshot();
    assert_eq!(ids(&snapshot), vec![1, 7]);
    assert_eq!(snapshot.last().map(|s| s.line_offset), Some(3));
}

#[rstest]
fn sources_load_in_parallel_and_keep_request_order(fake_vm: FakeVm) {
    fake_vm.add_script(script(1, "main.js", "main()"));
    fake_vm.add_script(script(2, "lib.js", "lib()"));
    fake_vm.hold_replies();
    let catalog = ScriptCatalog::new(fake_vm.multiplexer());
    let loaded = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&loaded);

    let _accepted = catalog.load_sources(
        &[2, 1],
        move |outcome| *slot.lock().expect("slot lock") = Some(outcome),
        Relay::detached(),
    );
    assert_eq!(fake_vm.count(SCRIPTS), 2);
    assert!(loaded.lock().expect("slot lock").is_none());
    assert_eq!(fake_vm.deliver_reversed(), 2);

    let sources = loaded
        .lock()
        .expect("slot lock")
        .take()
        .expect("outcome delivered")
        .expect("sources loaded");
    assert_eq!(ids(&sources), vec![2, 1]);
    assert_eq!(
        sources.first().and_then(|s| s.source.clone()),
        Some(String::from("lib()"))
    );
}

#[rstest]
fn missing_source_fails_the_whole_load(fake_vm: FakeVm) {
    fake_vm.add_script(script(1, "main.js", "main()"));
    let catalog = ScriptCatalog::new(fake_vm.multiplexer());
    let loaded = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&loaded);

    let _accepted = catalog.load_sources(
        &[1, 9],
        move |outcome| *slot.lock().expect("slot lock") = Some(outcome),
        Relay::detached(),
    );

    let outcome = loaded.lock().expect("slot lock").take().expect("outcome delivered");
    assert!(matches!(outcome, Err(CallError::Protocol { .. })));
}

#[rstest]
fn empty_source_request_completes_immediately(fake_vm: FakeVm) {
    let catalog = ScriptCatalog::new(fake_vm.multiplexer());
    let loaded = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&loaded);

    let _accepted = catalog.load_sources(
        &[],
        move |outcome| *slot.lock().expect("slot lock") = Some(outcome),
        Relay::detached(),
    );

    assert_eq!(*loaded.lock().expect("slot lock"), Some(Ok(Vec::new())));
    assert!(fake_vm.commands().is_empty());
}
