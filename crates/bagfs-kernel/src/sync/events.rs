//! Filesystem notifications reduced to catalog-relevant changes.

use std::path::PathBuf;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};

/// One change inside a bag directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BagChange {
    Created(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    Modified(PathBuf),
}

impl BagChange {
    pub fn paths(&self) -> Vec<&PathBuf> {
        match self {
            BagChange::Created(p) | BagChange::Deleted(p) | BagChange::Modified(p) => vec![p],
            BagChange::Renamed { from, to } => vec![from, to],
        }
    }
}

/// Map a raw notify event to zero or more changes.
///
/// Rename halves reported separately become a delete or a create, which is
/// what a paired rename does to the catalog anyway.
pub fn classify(event: Event) -> Vec<BagChange> {
    let mut paths = event.paths.into_iter();
    match event.kind {
        EventKind::Create(_) => paths.map(BagChange::Created).collect(),
        EventKind::Remove(_) => paths.map(BagChange::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => vec![BagChange::Renamed { from, to }],
                (Some(only), None) => vec![BagChange::Modified(only)],
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(BagChange::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.map(BagChange::Created).collect()
        }
        EventKind::Modify(ModifyKind::Name(_)) => paths.map(BagChange::Modified).collect(),
        EventKind::Modify(_) => paths.map(BagChange::Modified).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[test]
    fn test_classify_basic_kinds() {
        assert_eq!(
            classify(event(EventKind::Create(CreateKind::File), &["/b/a.txt"])),
            vec![BagChange::Created("/b/a.txt".into())]
        );
        assert_eq!(
            classify(event(EventKind::Remove(RemoveKind::File), &["/b/a.txt"])),
            vec![BagChange::Deleted("/b/a.txt".into())]
        );
        assert_eq!(
            classify(event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/b/a.txt"]
            )),
            vec![BagChange::Modified("/b/a.txt".into())]
        );
        assert!(classify(event(EventKind::Access(notify::event::AccessKind::Any), &["/b/a.txt"])).is_empty());
    }

    #[test]
    fn test_classify_renames() {
        assert_eq!(
            classify(event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/b/old.txt", "/b/new.txt"]
            )),
            vec![BagChange::Renamed {
                from: "/b/old.txt".into(),
                to: "/b/new.txt".into()
            }]
        );
        assert_eq!(
            classify(event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/b/old.txt"])),
            vec![BagChange::Deleted("/b/old.txt".into())]
        );
        assert_eq!(
            classify(event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/b/new.txt"])),
            vec![BagChange::Created("/b/new.txt".into())]
        );
    }
}
