mod common;

use common::media_dir;
use shelfplay::library::{
    Bookmark, IdentityStrategy, LibraryRepository, LibrarySettings, MediaType, MemoryFileSystem,
};
use shelfplay::storage::{MemoryStore, SharedStore, SqliteStore, BOOKMARK_KEY};
use std::sync::Arc;

fn repository(fs: MemoryFileSystem) -> (LibraryRepository, Arc<MemoryStore>) {
    let kv = Arc::new(MemoryStore::new());
    let shared: SharedStore = kv.clone();
    (LibraryRepository::from_parts(Arc::new(fs), shared), kv)
}

#[tokio::test]
async fn media_folder_yields_one_audio_and_one_ebook() {
    let (repo, _kv) = repository(media_dir());

    let snapshot = repo.get_library(&["/media".to_string()]).await.unwrap();
    let summary: Vec<(&str, MediaType)> = snapshot
        .books
        .iter()
        .map(|b| (b.title.as_str(), b.media_type))
        .collect();

    assert_eq!(summary, vec![("book1", MediaType::Audio), ("story", MediaType::Ebook)]);
    for book in &snapshot.books {
        assert_eq!(book.tracks.len(), 1);
        assert_eq!(book.tracks[0].path, book.path);
    }
    assert!(snapshot.bookmarks.is_empty());
}

#[tokio::test]
async fn missing_root_does_not_hide_the_others() {
    let (repo, _kv) = repository(media_dir());

    let roots = vec!["/gone".to_string(), "/media".to_string()];
    let snapshot = repo.get_library(&roots).await.unwrap();
    assert_eq!(snapshot.books.len(), 2);
}

#[tokio::test]
async fn path_derived_ids_survive_rescans() {
    let (repo, _kv) = repository(media_dir());
    let repo = repo.with_identity(IdentityStrategy::PathDerived);
    let roots = vec!["/media".to_string()];

    let first = repo.get_library(&roots).await.unwrap();
    let second = repo.get_library(&roots).await.unwrap();

    let ids = |s: &shelfplay::library::LibrarySnapshot| -> Vec<String> {
        s.books.iter().map(|b| b.id.clone()).collect()
    };
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(first.books[0].tracks[0].id, second.books[0].tracks[0].id);
    assert_ne!(first.books[0].id, first.books[0].tracks[0].id);
}

#[tokio::test]
async fn bookmarks_are_stored_as_one_json_array() {
    let (repo, kv) = repository(MemoryFileSystem::new());
    repo.save_bookmark(&Bookmark::new("book", None, 12.5).with_note("intro"))
        .await
        .unwrap();

    let raw = kv.raw(BOOKMARK_KEY).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let first = &value.as_array().unwrap()[0];
    assert_eq!(first["bookId"], "book");
    assert_eq!(first["position"], 12.5);
    assert_eq!(first["note"], "intro");
}

#[tokio::test]
async fn sqlite_store_keeps_settings_and_bookmarks_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("library.db");

    {
        let kv: SharedStore = Arc::new(SqliteStore::open(&db).unwrap());
        let repo = LibraryRepository::from_parts(Arc::new(media_dir()), kv);
        let settings = LibrarySettings::default().with_root("/media");
        repo.persist_settings(&settings).await.unwrap();
        repo.save_bookmark(&Bookmark::new("book", None, 99.0)).await.unwrap();
    }

    let kv: SharedStore = Arc::new(SqliteStore::open(&db).unwrap());
    let repo = LibraryRepository::from_parts(Arc::new(media_dir()), kv);
    let settings = repo.get_settings().await.unwrap().unwrap();
    assert_eq!(settings.root_uris, vec!["/media".to_string()]);

    let snapshot = repo.get_library(&settings.root_uris).await.unwrap();
    assert_eq!(snapshot.books.len(), 2);
    assert_eq!(snapshot.bookmarks.len(), 1);
    assert_eq!(snapshot.bookmarks[0].position, 99.0);
}

#[tokio::test]
async fn folder_removed_between_scans_empties_the_library() {
    let fs = Arc::new(media_dir());
    let kv: SharedStore = Arc::new(MemoryStore::new());
    let repo = LibraryRepository::from_parts(fs.clone(), kv);
    let roots = vec!["/media".to_string()];

    assert_eq!(repo.get_library(&roots).await.unwrap().books.len(), 2);

    fs.remove("/media");
    let snapshot = repo.get_library(&roots).await.unwrap();
    assert!(snapshot.books.is_empty());
    assert_eq!(fs.list_calls(), 2);
}
