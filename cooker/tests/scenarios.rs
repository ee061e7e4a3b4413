// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! End-to-end coverage of the scenarios in spec.md §8, driving
//! [`CookerStateMachine`] as a whole rather than one component at a time.

use std::sync::Arc;

use camino::Utf8PathBuf;
use cooker::{
    event::{CookerEvent, EventSink},
    parse::{CacheCheckFn, ParseFn},
    recipe::{realfn_to_virtual, RecipeInfo},
    session::Session,
    state::{CookerError, CookerState, CookerStateMachine, PollResult},
};
use cooker_config::MapStore;

fn write(dir: &std::path::Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn no_cache() -> CacheCheckFn {
    Arc::new(|_| None)
}

/// Derives a [`RecipeInfo`] from a fixture file's contents: one `PN=`,
/// `PROVIDES=`, `DEPENDS=`, or `RDEPENDS=` line per attribute,
/// space-separated values.
fn fixture_parse_fn() -> ParseFn {
    Arc::new(|path: &Utf8PathBuf| {
        let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let mut pn = path.file_stem().unwrap_or("unknown").to_string();
        let mut provides = vec![];
        let mut depends = vec![];
        let mut rdepends = vec![];
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else { continue };
            let values = value.split_whitespace().map(str::to_string);
            match key.trim() {
                "PN" => pn = value.trim().to_string(),
                "PROVIDES" => provides.extend(values),
                "DEPENDS" => depends.extend(values),
                "RDEPENDS" => rdepends.extend(values),
                _ => {}
            }
        }
        let mut info = RecipeInfo::new(pn.clone());
        info.provides = provides;
        info.provides.push(pn.clone());
        info.depends = depends;
        if !rdepends.is_empty() {
            info.rdepends.insert(pn, rdepends);
        }
        Ok(vec![(realfn_to_virtual(path, None), info)])
    })
}

fn run_to_completion(cooker: &mut CookerStateMachine, rx: &std::sync::mpsc::Receiver<CookerEvent>) -> Vec<CookerEvent> {
    let mut events = vec![];
    loop {
        match cooker.poll() {
            PollResult::Done(Ok(())) => break,
            PollResult::Done(Err(error)) => panic!("cooker errored: {error}"),
            PollResult::Pending | PollResult::Yielded => {}
        }
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
    }
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn build_to_running_resolves_a_simple_depends_closure() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "base_1.0.bb", "PN=base\n");
    write(tmp.path(), "app_1.0.bb", "PN=app\nDEPENDS=base\n");

    let store = MapStore::new()
        .with("TOPDIR", tmp.path().to_str().unwrap())
        .with("BBFILES", vec![tmp.path().join("*.bb").to_str().unwrap().to_string()]);

    let (tx, rx) = std::sync::mpsc::channel();
    let session = Session::new(Arc::new(store), EventSink::new(tx));
    let mut cooker = CookerStateMachine::new(session, fixture_parse_fn(), no_cache()).unwrap();

    cooker.build_targets(vec!["app".into()], true).unwrap();
    let events = run_to_completion(&mut cooker, &rx);

    assert_eq!(cooker.state(), CookerState::Running);
    assert!(events.iter().any(|e| matches!(e, CookerEvent::BuildStarted)));

    let graph = cooker.build_graph().unwrap();
    let order: Vec<String> = graph.build_order().into_iter().map(|v| v.real_path().to_string()).collect();
    let base_index = order.iter().position(|p| p.ends_with("base_1.0.bb")).unwrap();
    let app_index = order.iter().position(|p| p.ends_with("app_1.0.bb")).unwrap();
    assert!(base_index < app_index, "base must build before app in topological order");

    cooker.report_build_complete(0);
    assert_eq!(cooker.state(), CookerState::Initial);
}

/// S4: with two providers of the same item, `PREFERRED_PROVIDERS` wins
/// even over a numerically newer candidate.
#[test]
fn s4_preferred_provider_is_selected_over_newer_candidate() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "libfoo_1.0.bb", "PN=libfoo\nPROVIDES=virtual/libfoo\n");
    write(tmp.path(), "libfoo_2.0.bb", "PN=libfoo-new\nPROVIDES=virtual/libfoo\n");
    write(tmp.path(), "app_1.0.bb", "PN=app\nDEPENDS=virtual/libfoo\n");

    let store = MapStore::new()
        .with("TOPDIR", tmp.path().to_str().unwrap())
        .with("BBFILES", vec![tmp.path().join("*.bb").to_str().unwrap().to_string()])
        .with("PREFERRED_PROVIDERS", vec!["virtual/libfoo:libfoo".to_string()]);

    let (tx, rx) = std::sync::mpsc::channel();
    let session = Session::new(Arc::new(store), EventSink::new(tx));
    let mut cooker = CookerStateMachine::new(session, fixture_parse_fn(), no_cache()).unwrap();

    cooker.build_targets(vec!["app".into()], true).unwrap();
    let _events = run_to_completion(&mut cooker, &rx);

    let graph = cooker.build_graph().unwrap();
    let chosen = graph
        .build_order()
        .into_iter()
        .find(|v| v.real_path().contains("libfoo_"))
        .unwrap();
    assert!(chosen.real_path().ends_with("libfoo_1.0.bb"), "chose {}", chosen.real_path());
}

/// S6: an unresolvable DEPENDS item is reported via `NoProvider` with a
/// close-match suggestion, and does not fail the build.
#[test]
fn s6_missing_provider_is_reported_with_close_match() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "libfoo_1.0.bb", "PN=libfoo\nPROVIDES=virtual/libfoo\n");
    write(tmp.path(), "app_1.0.bb", "PN=app\nDEPENDS=virtual/libfo\n");

    let store = MapStore::new()
        .with("TOPDIR", tmp.path().to_str().unwrap())
        .with("BBFILES", vec![tmp.path().join("*.bb").to_str().unwrap().to_string()]);

    let (tx, rx) = std::sync::mpsc::channel();
    let session = Session::new(Arc::new(store), EventSink::new(tx));
    let mut cooker = CookerStateMachine::new(session, fixture_parse_fn(), no_cache()).unwrap();

    cooker.build_targets(vec!["app".into()], false).unwrap();
    let events = run_to_completion(&mut cooker, &rx);

    let no_provider = events.iter().find_map(|e| match e {
        CookerEvent::NoProvider(info) => Some(info),
        _ => None,
    });
    let info = no_provider.expect("expected a NoProvider event");
    assert_eq!(info.item, "virtual/libfo");
    assert!(info.close_matches.contains(&"virtual/libfoo".to_string()));

    assert_eq!(cooker.state(), CookerState::Running);
}

/// S5: an in-flight parse pool is torn down cleanly on `shutdown(false)`
/// without waiting for every recipe to parse.
#[test]
fn s5_shutdown_mid_parse_stops_without_completing_every_recipe() {
    let tmp = tempfile::tempdir().unwrap();
    for i in 0..40 {
        write(tmp.path(), &format!("pkg{i}_1.0.bb"), &format!("PN=pkg{i}\n"));
    }

    let store = MapStore::new()
        .with("TOPDIR", tmp.path().to_str().unwrap())
        .with("BBFILES", vec![tmp.path().join("*.bb").to_str().unwrap().to_string()])
        .with("BB_NUMBER_PARSE_THREADS", "4");

    let (tx, rx) = std::sync::mpsc::channel();
    let session = Session::new(Arc::new(store), EventSink::new(tx));

    let slow_parse: ParseFn = Arc::new(|path: &Utf8PathBuf| {
        std::thread::sleep(std::time::Duration::from_millis(5));
        let pn = path.file_stem().unwrap_or("unknown").to_string();
        Ok(vec![(realfn_to_virtual(path, None), RecipeInfo::new(pn))])
    });

    let mut cooker = CookerStateMachine::new(session, slow_parse, no_cache()).unwrap();
    cooker.build_targets(vec!["pkg0".into()], true).unwrap();

    // Let a handful of results come back, then request a clean shutdown
    // before the whole pool has drained.
    for _ in 0..5 {
        cooker.poll();
    }
    cooker.shutdown(false);

    let events = run_to_completion(&mut cooker, &rx);
    assert_eq!(cooker.state(), CookerState::Stopped);
    assert!(events.iter().any(|e| matches!(e, CookerEvent::CookerExit)));
}

#[test]
fn empty_build_directory_reports_nothing_collected() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MapStore::new()
        .with("TOPDIR", tmp.path().to_str().unwrap())
        .with("BBFILES", Vec::<String>::new());

    let (tx, _rx) = std::sync::mpsc::channel();
    let session = Session::new(Arc::new(store), EventSink::new(tx));
    let mut cooker = CookerStateMachine::new(session, fixture_parse_fn(), no_cache()).unwrap();

    let err = cooker.build_targets(vec!["anything".into()], true).unwrap_err();
    assert!(matches!(err, CookerError::Collect(_)));
}

#[test]
fn a_second_lock_on_the_same_build_directory_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let store = || {
        MapStore::new()
            .with("TOPDIR", tmp.path().to_str().unwrap())
            .with("BBFILES", Vec::<String>::new())
    };

    let (tx1, _rx1) = std::sync::mpsc::channel();
    let session1 = Session::new(Arc::new(store()), EventSink::new(tx1));
    let _first = CookerStateMachine::new(session1, fixture_parse_fn(), no_cache()).unwrap();

    let (tx2, _rx2) = std::sync::mpsc::channel();
    let session2 = Session::new(Arc::new(store()), EventSink::new(tx2));
    let err = CookerStateMachine::new(session2, fixture_parse_fn(), no_cache()).unwrap_err();
    assert!(matches!(err, CookerError::Lock(_)));
}

/// spec.md §7: by default a recipe parse failure triggers a graceful
/// shutdown with a non-zero exit rather than being swallowed.
#[test]
fn parse_failure_aborts_the_build_by_default() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "good_1.0.bb", "PN=good\n");
    write(tmp.path(), "bad_1.0.bb", "this is not a valid recipe");

    let store = MapStore::new()
        .with("TOPDIR", tmp.path().to_str().unwrap())
        .with("BBFILES", vec![tmp.path().join("*.bb").to_str().unwrap().to_string()]);

    let (tx, rx) = std::sync::mpsc::channel();
    let session = Session::new(Arc::new(store), EventSink::new(tx));

    let parse: ParseFn = Arc::new(|path: &Utf8PathBuf| {
        if path.as_str().ends_with("bad_1.0.bb") {
            return Err("deliberately broken fixture".to_string());
        }
        let pn = path.file_stem().unwrap_or("unknown").to_string();
        Ok(vec![(realfn_to_virtual(path, None), RecipeInfo::new(pn))])
    });

    let mut cooker = CookerStateMachine::new(session, parse, no_cache()).unwrap();
    cooker.build_targets(vec!["good".into()], true).unwrap();

    let mut final_result = None;
    loop {
        match cooker.poll() {
            PollResult::Done(result) => {
                final_result = Some(result);
                break;
            }
            PollResult::Pending | PollResult::Yielded => {}
        }
        while rx.try_recv().is_ok() {}
    }

    assert!(matches!(final_result, Some(Err(CookerError::ParseFailed { .. }))));
    assert_eq!(cooker.state(), CookerState::Stopped);
}

/// The same fixture as above, but with the caller opting to continue past
/// the first parse failure instead of treating it as fatal.
#[test]
fn parse_failure_can_be_tolerated_with_abort_disabled() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "good_1.0.bb", "PN=good\n");
    write(tmp.path(), "bad_1.0.bb", "this is not a valid recipe");

    let store = MapStore::new()
        .with("TOPDIR", tmp.path().to_str().unwrap())
        .with("BBFILES", vec![tmp.path().join("*.bb").to_str().unwrap().to_string()]);

    let (tx, rx) = std::sync::mpsc::channel();
    let session = Session::new(Arc::new(store), EventSink::new(tx));

    let parse: ParseFn = Arc::new(|path: &Utf8PathBuf| {
        if path.as_str().ends_with("bad_1.0.bb") {
            return Err("deliberately broken fixture".to_string());
        }
        let pn = path.file_stem().unwrap_or("unknown").to_string();
        Ok(vec![(realfn_to_virtual(path, None), RecipeInfo::new(pn))])
    });

    let mut cooker = CookerStateMachine::new(session, parse, no_cache()).unwrap();
    cooker.build_targets(vec!["good".into()], false).unwrap();
    run_to_completion(&mut cooker, &rx);

    assert_eq!(cooker.state(), CookerState::Running);
}

/// spec.md §4.7: RDEPENDS closures land in the runtime-recipe and
/// runtime-package projections, never in the build graph.
#[test]
fn runtime_dependencies_populate_the_runtime_projections_not_the_build_graph() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "base_1.0.bb", "PN=base\n");
    write(tmp.path(), "app_1.0.bb", "PN=app\nRDEPENDS=base\n");

    let store = MapStore::new()
        .with("TOPDIR", tmp.path().to_str().unwrap())
        .with("BBFILES", vec![tmp.path().join("*.bb").to_str().unwrap().to_string()]);

    let (tx, rx) = std::sync::mpsc::channel();
    let session = Session::new(Arc::new(store), EventSink::new(tx));
    let mut cooker = CookerStateMachine::new(session, fixture_parse_fn(), no_cache()).unwrap();

    cooker.build_targets(vec!["app".into()], true).unwrap();
    run_to_completion(&mut cooker, &rx);

    let build_order: Vec<String> = cooker
        .build_graph()
        .unwrap()
        .build_order()
        .into_iter()
        .map(|v| v.real_path().to_string())
        .collect();
    assert!(!build_order.iter().any(|p| p.ends_with("base_1.0.bb")));

    let runtime_recipe_order: Vec<String> = cooker
        .runtime_recipe_graph()
        .unwrap()
        .build_order()
        .into_iter()
        .map(|v| v.real_path().to_string())
        .collect();
    assert!(runtime_recipe_order.iter().any(|p| p.ends_with("base_1.0.bb")));

    let package_order = cooker.runtime_package_graph().unwrap().build_order();
    assert!(package_order.contains(&&"base".to_string()));
    assert!(package_order.contains(&&"app".to_string()));
}

/// spec.md §4.2/§4.3: a `.bbappend` matching nothing is logged as a
/// dangling append during the post-parse audit but never fails the build.
#[test]
fn dangling_bbappend_does_not_fail_the_build() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "app_1.0.bb", "PN=app\n");
    write(tmp.path(), "ghost_%.bbappend", "");

    let store = MapStore::new()
        .with("TOPDIR", tmp.path().to_str().unwrap())
        .with("BBFILES", vec![tmp.path().join("*").to_str().unwrap().to_string()]);

    let (tx, rx) = std::sync::mpsc::channel();
    let session = Session::new(Arc::new(store), EventSink::new(tx));
    let mut cooker = CookerStateMachine::new(session, fixture_parse_fn(), no_cache()).unwrap();

    cooker.build_targets(vec!["app".into()], true).unwrap();
    run_to_completion(&mut cooker, &rx);

    assert_eq!(cooker.state(), CookerState::Running);
}
