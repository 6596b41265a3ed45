//! Creating, cloning and reopening repositories through the dispatcher.

mod common;

use common::{VcsTestRepo, tools_available};
use polyvcs::{BackendKind, LogOptions, LsOptions, RevSpec, VcsConfig, VcsError, VcsFactory};
use tempfile::TempDir;

test_with_backends!(test_created_repository_is_empty, |kind: BackendKind| {
    let root = TempDir::new().unwrap();
    let path = root.path().join("fresh");
    let repo = polyvcs::create(&path, kind, None).unwrap();
    assert_eq!(repo.kind(), kind);
    assert!(!repo.is_working_copy());
    assert!(repo.is_empty().unwrap());
    assert!(repo.branches().unwrap().is_empty());
    assert!(repo.tags().unwrap().is_empty());
    assert!(repo.heads().unwrap().is_empty());
    assert_eq!(repo.log(&LogOptions::default()).unwrap().count(), 0);

    let (probed, _) = polyvcs::probe(&path).unwrap();
    assert_eq!(probed, kind);
});

test_with_backends!(test_clone_preserves_history, |kind: BackendKind| {
    let fixture = VcsTestRepo::init(kind);
    let source = fixture.open();
    let dest = fixture.scratch("copy");
    let copy = polyvcs::clone(&fixture.repo_path, &dest, None, None).unwrap();
    assert_eq!(copy.kind(), kind);
    assert!(!copy.is_working_copy());

    let tip = source.tip(fixture.branch()).unwrap();
    assert_eq!(copy.tip(fixture.branch()).unwrap(), tip);
    let entries = copy
        .ls(&RevSpec::from(&tip), "", &LsOptions::recursive())
        .unwrap();
    assert_eq!(entries.len(), 5);

    let reopened = polyvcs::open(&dest, None, None).unwrap();
    assert_eq!(reopened.kind(), kind);
});

test_with_backends!(test_clone_and_open_with_forced_kind, |kind: BackendKind| {
    let fixture = VcsTestRepo::init(kind);
    let dest = fixture.scratch("forced");
    let copy = polyvcs::clone(&fixture.repo_path, &dest, Some(kind), Some(false)).unwrap();
    assert_eq!(copy.kind(), kind);
    assert!(!copy.is_working_copy());
    assert_eq!(
        copy.tip(fixture.branch()).unwrap(),
        fixture.open().tip(fixture.branch()).unwrap()
    );

    let reopened = polyvcs::open(&dest, Some(kind), Some(false)).unwrap();
    assert_eq!(reopened.kind(), kind);

    let wrong = BackendKind::ALL.into_iter().find(|k| *k != kind).unwrap();
    assert!(polyvcs::open(&dest, Some(wrong), None).is_err());
    assert!(polyvcs::clone(&fixture.repo_path, &fixture.scratch("wrong"), Some(wrong), None).is_err());
});

#[test]
fn test_working_copy_accepts_current() {
    for kind in [BackendKind::Git, BackendKind::Hg] {
        if !tools_available(kind) {
            eprintln!("Skipping {kind}: tools not available");
            continue;
        }
        let fixture = VcsTestRepo::init(kind);
        let repo = fixture.open();
        assert!(repo.is_working_copy());
        let current = repo.canonical_rev(&RevSpec::Current).unwrap();
        assert_eq!(current, repo.tip(fixture.branch()).unwrap());

        let store = VcsFactory::new(VcsConfig {
            working_copy: Some(false),
            ..VcsConfig::default()
        });
        if kind == BackendKind::Hg {
            let store = store.open(&fixture.repo_path).unwrap();
            assert!(matches!(
                store.canonical_rev(&RevSpec::Current),
                Err(VcsError::UnknownRevision(_))
            ));
        }
    }
}

#[test]
fn test_open_rejects_non_directories() {
    let root = TempDir::new().unwrap();
    let file = root.path().join("plain");
    std::fs::write(&file, "x").unwrap();
    assert!(matches!(polyvcs::open(&file, None, None), Err(VcsError::InvalidPath(_))));
    assert!(matches!(
        polyvcs::open(&root.path().join("missing"), None, None),
        Err(VcsError::InvalidPath(_))
    ));
    assert!(matches!(
        polyvcs::open(root.path(), None, None),
        Err(VcsError::UnrecognizedRepositoryType(_))
    ));
}
