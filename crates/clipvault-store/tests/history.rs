//! Store behavior across clones and real files.

use clipvault_api::AssetKind;
use clipvault_store::HistoryStore;

/// Concurrent upserts for different posts all land; the background
/// connection thread serializes them without losing writes.
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_upserts_do_not_lose_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.db");
    let store = HistoryStore::open(&path).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("{i}");
            store
                .upsert_asset(&id, "alice", 1000 + i, AssetKind::Sd, "aa")
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for i in 0..32 {
        assert!(store
            .asset_exists(&format!("{i}"), AssetKind::Sd)
            .await
            .unwrap());
    }
    assert_eq!(store.posts_by_author("alice").await.unwrap().len(), 32);
}

/// Interleaved kinds on the same row keep earlier hashes intact.
#[tokio::test]
async fn upserts_accumulate_kinds_on_one_row() {
    let store = HistoryStore::open_in_memory().await.unwrap();
    store
        .upsert_asset("7", "bob", 50, AssetKind::Sd, "sd-hash")
        .await
        .unwrap();
    store
        .upsert_asset("7", "bob", 50, AssetKind::CoverMedium, "cover-hash")
        .await
        .unwrap();
    store
        .upsert_asset("7", "bob", 50, AssetKind::Source, "src-hash")
        .await
        .unwrap();

    for kind in [AssetKind::Sd, AssetKind::CoverMedium, AssetKind::Source] {
        assert!(store.asset_exists("7", kind).await.unwrap(), "{kind}");
    }
    assert!(!store.asset_exists("7", AssetKind::Hd).await.unwrap());

    let rows = store.posts_by_author("bob").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].has_any_cover);
}

/// Album photo ids follow `{post}_{k}_{N}` and count exactly per index.
#[tokio::test]
async fn album_rows_are_one_per_index() {
    let store = HistoryStore::open_in_memory().await.unwrap();
    let n = 4;
    for k in 1..=n {
        let id = format!("42_{k}_{n}");
        store
            .upsert_asset(&id, "carol", 10, AssetKind::AlbumPhoto, "ph")
            .await
            .unwrap();
        // Upserting the same index twice must not create a second row.
        store
            .upsert_asset(&id, "carol", 10, AssetKind::AlbumPhoto, "ph")
            .await
            .unwrap();
    }
    assert_eq!(store.album_photo_count("42").await.unwrap(), n);
    for k in 1..=n {
        assert!(store
            .asset_exists(&format!("42_{k}_{n}"), AssetKind::AlbumPhoto)
            .await
            .unwrap());
    }
}
