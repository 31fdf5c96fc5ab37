//! Drop folder: `<root>/encode` and `<root>/decode`.

use std::path::{Component, Path};

use anyhow::{Context, Result};
use log::{debug, error, info};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::app::AppEvent;
use crate::state::Mode;
use crate::utils::is_ignored_file;

/// Create the per-mode folders and start watching them. Events are sent on
/// `tx` until the returned watcher is dropped.
pub fn watch_drop_dir(root: &Path, tx: mpsc::Sender<AppEvent>) -> Result<RecommendedWatcher> {
    for mode in Mode::ALL {
        let dir = root.join(mode.as_str());
        std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {:?}", root))?;

    let watched = root.clone();
    let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for app_event in route_event(&watched, &event) {
                let _ = tx.blocking_send(app_event);
            }
        }
        Err(e) => error!("watch error: {:?}", e),
    })?;

    for mode in Mode::ALL {
        watcher.watch(&root.join(mode.as_str()), RecursiveMode::NonRecursive)?;
    }
    info!(
        "Drop images into {:?} or {:?}",
        root.join(Mode::Encode.as_str()),
        root.join(Mode::Decode.as_str())
    );
    Ok(watcher)
}

/// Whether an event means a file is now complete at its path. Creation is
/// not: the file may still be empty or half written.
fn is_arrival(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Access(AccessKind::Close(AccessMode::Write))
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any))
    )
}

/// Turn a watcher event into offers for the mode whose folder it touched.
pub fn route_event(root: &Path, event: &Event) -> Vec<AppEvent> {
    if !is_arrival(&event.kind) {
        return Vec::new();
    }

    event
        .paths
        .iter()
        .filter(|path| !is_ignored_file(path))
        .filter_map(|path| {
            let mode = mode_for(root, path)?;
            debug!("watcher:{:?} {:?} -> {mode}", event.kind, path);
            Some(AppEvent::FileOffered {
                mode,
                path: path.clone(),
            })
        })
        .collect()
}

/// `<root>/<mode>/<file>` -> mode. Anything deeper or elsewhere is ignored.
fn mode_for(root: &Path, path: &Path) -> Option<Mode> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = rel.components();
    let (Some(Component::Normal(dir)), Some(Component::Normal(_)), None) =
        (parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    match dir.to_str()? {
        "encode" => Some(Mode::Encode),
        "decode" => Some(Mode::Decode),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::CreateKind;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::intake::OfferedFile;

    fn closed() -> EventKind {
        EventKind::Access(AccessKind::Close(AccessMode::Write))
    }

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_routes_by_folder() {
        let root = Path::new("/drop");
        assert_eq!(
            route_event(root, &event(closed(), "/drop/encode/a.png")),
            vec![AppEvent::FileOffered {
                mode: Mode::Encode,
                path: PathBuf::from("/drop/encode/a.png")
            }]
        );
        assert_eq!(
            route_event(
                root,
                &event(
                    EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                    "/drop/decode/b.jpg"
                )
            ),
            vec![AppEvent::FileOffered {
                mode: Mode::Decode,
                path: PathBuf::from("/drop/decode/b.jpg")
            }]
        );
    }

    #[test]
    fn test_ignores_noise() {
        let root = Path::new("/drop");
        assert!(route_event(root, &event(closed(), "/drop/encode/.DS_Store")).is_empty());
        assert!(route_event(root, &event(closed(), "/drop/encode/a.png.part")).is_empty());
        assert!(route_event(root, &event(closed(), "/drop/other/a.png")).is_empty());
        assert!(route_event(root, &event(closed(), "/drop/encode/sub/a.png")).is_empty());
        assert!(route_event(root, &event(closed(), "/elsewhere/encode/a.png")).is_empty());
        assert!(
            route_event(root, &event(EventKind::Create(CreateKind::File), "/drop/encode/a.png"))
                .is_empty()
        );
        assert!(
            route_event(
                root,
                &event(EventKind::Remove(notify::event::RemoveKind::File), "/drop/encode/a.png")
            )
            .is_empty()
        );
    }

    async fn next_offer(rx: &mut mpsc::Receiver<AppEvent>) -> Option<AppEvent> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .ok()
            .flatten()
    }

    async fn assert_quiet(rx: &mut mpsc::Receiver<AppEvent>) {
        let extra = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(extra.is_err(), "unexpected extra event: {extra:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_one_write_is_offered_once() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let _watcher = watch_drop_dir(dir.path(), tx).unwrap();

        let target = dir.path().canonicalize().unwrap().join("decode").join("s.png");
        std::fs::write(&target, b"img").unwrap();

        let got = next_offer(&mut rx).await.expect("no watcher event");
        assert_eq!(
            got,
            AppEvent::FileOffered {
                mode: Mode::Decode,
                path: target.clone()
            }
        );
        assert_eq!(OfferedFile::from_path(&target).await.unwrap().byte_size, 3);
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_file_written_in_steps_is_offered_when_closed() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let _watcher = watch_drop_dir(dir.path(), tx).unwrap();

        let target = dir.path().canonicalize().unwrap().join("encode").join("big.png");
        let mut file = std::fs::File::create(&target).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_quiet(&mut rx).await;

        file.write_all(&[0u8; 4096]).unwrap();
        file.sync_all().unwrap();
        drop(file);

        let got = next_offer(&mut rx).await.expect("no watcher event");
        assert_eq!(
            got,
            AppEvent::FileOffered {
                mode: Mode::Encode,
                path: target.clone()
            }
        );
        assert_eq!(OfferedFile::from_path(&target).await.unwrap().byte_size, 4096);
        assert_quiet(&mut rx).await;
    }
}
