// tests/install.rs

//! Install workflows: parallel builds, reuse, partial failure, cancellation,
//! installers sharing one database and progress reporting.

mod common;

use common::{HDF5, MPICH, RecordingBuilder, Site, SlowBuilder, ZLIB, concretize};
use spackle::build::{BuildError, BuildRequest, InstallLayout};
use spackle::db::Claim;
use spackle::progress::{CallbackProgress, ProgressEvent};
use spackle::{Error, NodeOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

#[test]
fn test_install_records_every_node() {
    let site = Site::new();
    let graph = concretize(&[ZLIB, MPICH, HDF5], &["hdf5"]).unwrap();
    let builder = RecordingBuilder::new(&[]);

    let report = site.installer(builder.clone(), 4).install(&graph).unwrap();
    assert_eq!(report.built().len(), 3);

    // dependencies are built before their dependents
    let built = builder.built();
    let pos = |name: &str| built.iter().position(|b| b == name).unwrap();
    assert!(pos("zlib") < pos("mpich"));
    assert!(pos("mpich") < pos("hdf5"));

    let hashes = graph.dag_hashes();
    let hdf5 = site.db.lookup(&hashes["hdf5"]).unwrap().unwrap();
    assert!(hdf5.explicit);
    assert_eq!(hdf5.ref_count, 0);
    let zlib = site.db.lookup(&hashes["zlib"]).unwrap().unwrap();
    assert!(!zlib.explicit);
    assert_eq!(zlib.ref_count, 2);

    let stored = InstallLayout::read_metadata(&hdf5.prefix).unwrap();
    assert_eq!(stored.dag_hashes()["hdf5"], hashes["hdf5"]);
}

#[test]
fn test_reinstall_builds_nothing() {
    let site = Site::new();
    let graph = concretize(&[ZLIB, MPICH, HDF5], &["hdf5"]).unwrap();
    site.installer(RecordingBuilder::new(&[]), 2)
        .install(&graph)
        .unwrap();

    let second = RecordingBuilder::new(&[]);
    let report = site.installer(second.clone(), 2).install(&graph).unwrap();
    assert!(second.built().is_empty());
    assert!(report.is_success());
    assert!(report
        .nodes
        .iter()
        .all(|n| matches!(n.outcome, NodeOutcome::Reused { .. })));
}

#[test]
fn test_failure_keeps_independent_installs() {
    let site = Site::new();
    let graph = concretize(&[ZLIB, MPICH, HDF5], &["hdf5"]).unwrap();
    let builder = RecordingBuilder::new(&["mpich"]);

    let err = site.installer(builder.clone(), 2).install(&graph).unwrap_err();
    let Error::BuildFailed(report) = err else {
        panic!("expected a build failure, got {:?}", err);
    };
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "mpich");
    assert_eq!(report.blocked().collect::<Vec<_>>(), vec!["hdf5"]);
    assert_eq!(report.succeeded, vec!["zlib".to_string()]);
    assert!(!builder.built().contains(&"hdf5".to_string()));

    let hashes = graph.dag_hashes();
    assert!(site.db.lookup(&hashes["zlib"]).unwrap().is_some());
    assert!(site.db.lookup(&hashes["mpich"]).unwrap().is_none());

    // the retry only builds what is missing
    let retry = RecordingBuilder::new(&[]);
    site.installer(retry.clone(), 2).install(&graph).unwrap();
    let mut rebuilt = retry.built();
    rebuilt.sort();
    assert_eq!(rebuilt, vec!["hdf5", "mpich"]);
}

#[test]
fn test_cancelled_install_records_nothing() {
    let site = Site::new();
    let graph = concretize(&[ZLIB, MPICH, HDF5], &["hdf5"]).unwrap();
    let builder = RecordingBuilder::new(&[]);
    let installer = site.installer(builder.clone(), 2);
    installer.cancel_handle().store(true, Ordering::SeqCst);

    assert!(matches!(installer.install(&graph), Err(Error::Cancelled)));
    assert!(builder.built().is_empty());
    assert!(site.db.list(false).unwrap().is_empty());
}

#[test]
fn test_progress_counts_every_node() {
    let site = Site::new();
    let graph = concretize(&[ZLIB, MPICH, HDF5], &["hdf5"]).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let progress = CallbackProgress::new(move |event| sink.lock().unwrap().push(event));

    site.installer(RecordingBuilder::new(&[]), 1)
        .with_progress(Arc::new(progress))
        .install(&graph)
        .unwrap();

    let events = events.lock().unwrap();
    let positions: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Position { current, total } => {
                assert_eq!(*total, 3);
                Some(*current)
            }
            _ => None,
        })
        .collect();
    assert_eq!(positions, vec![1, 2, 3]);
    assert!(matches!(events.last(), Some(ProgressEvent::Finished(_))));
}

#[test]
fn test_cancel_mid_build_releases_claims() {
    let site = Site::new();
    let graph = concretize(&[ZLIB, MPICH, HDF5], &["hdf5"]).unwrap();
    let cancel: Arc<OnceLock<Arc<AtomicBool>>> = Arc::new(OnceLock::new());
    let flag = Arc::clone(&cancel);
    let callback = Arc::new(move |request: &BuildRequest<'_>| -> Result<(), BuildError> {
        if let Some(cancel) = flag.get() {
            cancel.store(true, Ordering::SeqCst);
        }
        std::fs::create_dir_all(request.prefix.join("lib")).map_err(|e| BuildError::new(e.to_string()))
    });
    let installer = site.installer(callback, 2);
    cancel.set(installer.cancel_handle()).unwrap();

    let report = installer.execute(&graph).unwrap();
    assert!(report.nodes.iter().all(|n| n.outcome == NodeOutcome::Cancelled));
    assert!(site.db.list(false).unwrap().is_empty());
    let zlib = site.layout.prefix_for(&graph.spec("zlib").unwrap());
    assert!(!zlib.exists());

    for (name, hash) in graph.dag_hashes() {
        assert_eq!(
            site.db.claim(&hash, "next-installer").unwrap(),
            Claim::Acquired,
            "{} is still claimed",
            name
        );
    }
}

#[test]
fn test_second_installer_waits_then_reuses() {
    let site = Site::new();
    let graph = concretize(&[ZLIB], &["zlib"]).unwrap();
    let hash = graph.dag_hashes()["zlib"].clone();
    let slow = SlowBuilder::new(Duration::from_millis(400));
    let waiting = RecordingBuilder::new(&[]);

    let (first, second) = thread::scope(|scope| {
        let first = scope.spawn(|| site.installer(slow.clone(), 1).execute(&graph).unwrap());
        while slow.calls() == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(
            site.db.claim(&hash, "observer").unwrap(),
            Claim::Busy { .. }
        ));
        let second = site.installer(waiting.clone(), 1).execute(&graph).unwrap();
        (first.join().unwrap(), second)
    });

    assert_eq!(slow.calls(), 1);
    assert!(waiting.built().is_empty());
    let Some(NodeOutcome::Installed { prefix: built }) = first.outcome("zlib") else {
        panic!("expected the first installer to build zlib");
    };
    let Some(NodeOutcome::Reused { prefix: reused }) = second.outcome("zlib") else {
        panic!("expected the second installer to reuse zlib");
    };
    assert_eq!(built, reused);
    assert!(built.join("lib").is_dir());
}

#[test]
fn test_build_outliving_claim_timeout_runs_once() {
    let site = Site::with_claim_timeout(1);
    let graph = concretize(&[ZLIB], &["zlib"]).unwrap();
    let builder = SlowBuilder::new(Duration::from_millis(2500));

    let (first, second) = thread::scope(|scope| {
        let first = scope.spawn(|| site.installer(builder.clone(), 1).execute(&graph).unwrap());
        thread::sleep(Duration::from_millis(1500));
        let second = site.installer(builder.clone(), 1).execute(&graph).unwrap();
        (first.join().unwrap(), second)
    });

    assert_eq!(builder.calls(), 1);
    assert!(matches!(first.outcome("zlib"), Some(NodeOutcome::Installed { .. })));
    assert!(matches!(second.outcome("zlib"), Some(NodeOutcome::Reused { .. })));

    let record = site.db.lookup(&graph.dag_hashes()["zlib"]).unwrap().unwrap();
    assert!(record.prefix.join("lib").is_dir());
    assert!(InstallLayout::spec_file(&record.prefix).exists());
}
