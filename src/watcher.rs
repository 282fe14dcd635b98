//! Change detection for the per-persona input channels

use crate::channel::PersonaChannels;
use crate::persona::PersonaId;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
#[error("Failed to watch {path}: {source}")]
pub struct WatchError {
    pub path: PathBuf,
    #[source]
    pub source: notify::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
}

/// Raw notification that a persona's input channel changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeNotification {
    pub persona: PersonaId,
    pub kind: ChangeKind,
}

/// Map a filesystem event from `persona`'s directory to a notification.
///
/// The watcher is already scoped to one persona directory, but the path is
/// still checked against that persona's own input file: the output file and
/// temp files live in the same directory and must not trigger anything. For
/// renames reported with both ends, only the destination counts.
pub fn classify(persona: PersonaId, input: &Path, event: &Event) -> Option<ChangeNotification> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(ModifyKind::Metadata(_) | ModifyKind::Name(RenameMode::From)) => {
            return None
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let to = event.paths.get(1)?;
            return is_input_path(persona, input, to).then_some(ChangeNotification {
                persona,
                kind: ChangeKind::Modified,
            });
        }
        EventKind::Modify(_) => ChangeKind::Modified,
        _ => return None,
    };

    if !event.paths.iter().any(|p| is_input_path(persona, input, p)) {
        return None;
    }

    Some(ChangeNotification { persona, kind })
}

/// Exact match, or the same file under a differently-cased persona directory
/// next to it (case-insensitive filesystems may report either spelling)
fn is_input_path(persona: PersonaId, input: &Path, path: &Path) -> bool {
    if path == input {
        return true;
    }
    let (Some(dir), Some(input_dir)) = (path.parent(), input.parent()) else {
        return false;
    };
    path.file_name() == input.file_name()
        && dir.parent() == input_dir.parent()
        && dir
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse::<PersonaId>().ok())
            == Some(persona)
}

/// Keeps one filesystem watcher alive per persona
pub struct ChangeDetector {
    _watchers: Vec<RecommendedWatcher>,
}

impl ChangeDetector {
    pub fn spawn(
        channels: &[PersonaChannels],
        tx: mpsc::Sender<ChangeNotification>,
    ) -> Result<Self, WatchError> {
        let mut watchers = Vec::with_capacity(channels.len());

        for ch in channels {
            let persona = ch.persona;
            let input = ch.input.clone();
            let tx = tx.clone();

            let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
                match res {
                    Ok(event) => {
                        if let Some(notification) = classify(persona, &input, &event) {
                            tracing::trace!(persona = %persona, kind = ?notification.kind, "Input changed");
                            // Receiver gone means we are shutting down
                            let _ = tx.blocking_send(notification);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(persona = %persona, error = %e, "Watcher error");
                    }
                }
            })
            .map_err(|source| WatchError {
                path: ch.dir.clone(),
                source,
            })?;

            watcher
                .watch(&ch.dir, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError {
                    path: ch.dir.clone(),
                    source,
                })?;

            tracing::debug!(persona = %persona, dir = %ch.dir.display(), "Watching input channel");
            watchers.push(watcher);
        }

        Ok(Self {
            _watchers: watchers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::time::Duration;

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    #[test]
    fn test_classify_create_and_modify() {
        let input = PathBuf::from("/relay/coach/input.txt");
        let created = classify(
            PersonaId::Coach,
            &input,
            &event(EventKind::Create(CreateKind::File), &input),
        );
        assert_eq!(
            created,
            Some(ChangeNotification {
                persona: PersonaId::Coach,
                kind: ChangeKind::Created
            })
        );

        let modified = classify(
            PersonaId::Coach,
            &input,
            &event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &input),
        );
        assert_eq!(modified.map(|n| n.kind), Some(ChangeKind::Modified));

        let renamed_in = classify(
            PersonaId::Coach,
            &input,
            &event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &input),
        );
        assert_eq!(renamed_in.map(|n| n.kind), Some(ChangeKind::Modified));
    }

    #[test]
    fn test_classify_ignores_other_kinds() {
        let input = PathBuf::from("/relay/coach/input.txt");
        for kind in [
            EventKind::Access(AccessKind::Any),
            EventKind::Remove(RemoveKind::File),
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
        ] {
            assert!(classify(PersonaId::Coach, &input, &event(kind, &input)).is_none());
        }
    }

    #[test]
    fn test_classify_rejects_foreign_paths() {
        let input = PathBuf::from("/relay/coach/input.txt");
        let modify = EventKind::Modify(ModifyKind::Data(DataChange::Any));
        // Our own output file in the same directory
        let output = PathBuf::from("/relay/coach/output.txt");
        assert!(classify(PersonaId::Coach, &input, &event(modify, &output)).is_none());
        // Another persona's input
        let other = PathBuf::from("/relay/ellis/input.txt");
        assert!(classify(PersonaId::Coach, &input, &event(modify, &other)).is_none());
    }

    #[test]
    fn test_classify_matches_persona_dir_case_insensitively() {
        let input = PathBuf::from("/relay/coach/input.txt");
        let modify = EventKind::Modify(ModifyKind::Data(DataChange::Content));

        let upper = PathBuf::from("/relay/Coach/input.txt");
        assert_eq!(
            classify(PersonaId::Coach, &input, &event(modify, &upper)).map(|n| n.persona),
            Some(PersonaId::Coach)
        );
        let shouting = PathBuf::from("/relay/COACH/input.txt");
        assert!(classify(PersonaId::Coach, &input, &event(modify, &shouting)).is_some());

        // Another persona, another root or another file stay unmatched
        let other = PathBuf::from("/relay/Zoey/input.txt");
        assert!(classify(PersonaId::Coach, &input, &event(modify, &other)).is_none());
        let elsewhere = PathBuf::from("/other/Coach/input.txt");
        assert!(classify(PersonaId::Coach, &input, &event(modify, &elsewhere)).is_none());
        let output = PathBuf::from("/relay/Coach/output.txt");
        assert!(classify(PersonaId::Coach, &input, &event(modify, &output)).is_none());
    }

    #[test]
    fn test_classify_rename_counts_destination_only() {
        let input = PathBuf::from("/relay/coach/input.txt");
        let both = EventKind::Modify(ModifyKind::Name(RenameMode::Both));
        let staging = PathBuf::from("/relay/coach/.staging");
        let claim = PathBuf::from("/relay/coach/.input.txt.claim");

        // Producer swapping in a new file
        let swapped_in = Event::new(both)
            .add_path(staging)
            .add_path(input.clone());
        assert_eq!(
            classify(PersonaId::Coach, &input, &swapped_in).map(|n| n.kind),
            Some(ChangeKind::Modified)
        );

        // Input moved aside when an attempt claims it
        let claimed = Event::new(both).add_path(input.clone()).add_path(claim);
        assert!(classify(PersonaId::Coach, &input, &claimed).is_none());
    }

    #[tokio::test]
    async fn test_detector_reports_writes_to_input() {
        let root = tempfile::tempdir().unwrap();
        let root_path = std::fs::canonicalize(root.path()).unwrap();
        let coach = PersonaChannels::new(&root_path, PersonaId::Coach);
        let ellis = PersonaChannels::new(&root_path, PersonaId::Ellis);
        coach.ensure().await.unwrap();
        ellis.ensure().await.unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let _detector = ChangeDetector::spawn(&[coach.clone(), ellis.clone()], tx).unwrap();

        tokio::fs::write(&ellis.input, "ellis hello").await.unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no notification within 5s")
            .unwrap();
        assert_eq!(notification.persona, PersonaId::Ellis);
    }
}
