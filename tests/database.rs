// tests/database.rs

//! Install database operations shared between handles: records, queries,
//! reference counts and in-progress claims.

mod common;

use common::{HDF5, MPICH, RecordingBuilder, Site, ZLIB, concretize};
use spackle::config::LocksSection;
use spackle::db::Claim;
use spackle::{Error, InstallDatabase};

#[test]
fn test_queries_by_hash_prefix_and_spec() {
    let site = Site::new();
    let graph = concretize(&[ZLIB, MPICH, HDF5], &["hdf5"]).unwrap();
    site.installer(RecordingBuilder::new(&[]), 2)
        .install(&graph)
        .unwrap();
    let hashes = graph.dag_hashes();

    let by_hash = site
        .db
        .query(&format!("/{}", hashes["mpich"].short()))
        .unwrap();
    assert_eq!(by_hash.len(), 1);
    assert_eq!(by_hash[0].name, "mpich");

    assert_eq!(site.db.query("zlib@1.3").unwrap().len(), 1);
    assert!(site.db.query("zlib@1.2").unwrap().is_empty());
    assert_eq!(site.db.query("hdf5+mpi").unwrap().len(), 1);

    let explicit = site.db.list(true).unwrap();
    assert_eq!(explicit.len(), 1);
    assert_eq!(explicit[0].name, "hdf5");
}

#[test]
fn test_remove_respects_dependents() {
    let site = Site::new();
    let graph = concretize(&[ZLIB, MPICH, HDF5], &["hdf5"]).unwrap();
    site.installer(RecordingBuilder::new(&[]), 2)
        .install(&graph)
        .unwrap();
    let hashes = graph.dag_hashes();

    match site.db.remove(&hashes["zlib"]) {
        Err(Error::StillReferenced { ref_count, .. }) => assert_eq!(ref_count, 2),
        other => panic!("expected a refusal, got {:?}", other),
    }

    site.db.remove(&hashes["hdf5"]).unwrap();
    site.db.remove(&hashes["mpich"]).unwrap();
    let zlib = site.db.lookup(&hashes["zlib"]).unwrap().unwrap();
    assert_eq!(zlib.ref_count, 0);
    site.db.remove(&hashes["zlib"]).unwrap();
    assert!(site.db.list(false).unwrap().is_empty());
}

#[test]
fn test_claims_visible_across_handles() {
    let site = Site::new();
    let graph = concretize(&[ZLIB], &["zlib"]).unwrap();
    let hash = graph.dag_hashes()["zlib"].clone();
    let other = InstallDatabase::open(site.db.path(), LocksSection::default()).unwrap();

    assert_eq!(site.db.claim(&hash, "first").unwrap(), Claim::Acquired);
    assert!(matches!(other.claim(&hash, "second").unwrap(), Claim::Busy { ref holder, .. } if holder == "first"));

    site.db.release(&hash, "first").unwrap();
    assert_eq!(other.claim(&hash, "second").unwrap(), Claim::Acquired);
    other.release(&hash, "second").unwrap();

    let prefix = site.layout.root().join("zlib");
    site.db.record(&graph, "zlib", &prefix, true).unwrap();
    assert!(matches!(other.claim(&hash, "third").unwrap(), Claim::Installed(_)));
}
