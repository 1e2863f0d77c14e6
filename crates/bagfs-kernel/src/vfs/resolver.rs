//! Virtual path resolution and directory enumeration.
//!
//! A virtual directory is a set of tags; a virtual file is an item carrying
//! all of them. Only the last path component matters when resolving a file:
//! item ids are file names, unique within a bag.
//!
//! A category directory also offers one `By <alias>` folder per meta column
//! alias of its table. `\<category>\By <alias>` lists the distinct values of
//! that column and `\<category>\By <alias>\<value>` the items holding it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use super::VirtualEntry;
use crate::catalog::{CatalogError, Item, MetaAlias, Tag};
use crate::meta::Category;
use crate::volume::{BagVolume, VolumeId, VolumeRegistry};

/// Separators accepted in virtual paths.
const SEPARATORS: [char; 2] = ['\\', '/'];

/// What a virtual directory path names.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DirPath {
    Tags(BTreeSet<String>),
    Alias {
        category: String,
        alias: String,
        value: Option<String>,
        /// Read as plain tags when no catalog knows the alias.
        tags: BTreeSet<String>,
    },
}

impl DirPath {
    fn parse(path: &str) -> Self {
        let tags = split_tags(path);
        let parts: Vec<&str> = segments(path).collect();
        if let [category, folder, rest @ ..] = parts.as_slice() {
            if rest.len() <= 1 {
                if let Some(alias) = MetaAlias::parse_folder(folder) {
                    return DirPath::Alias {
                        category: Tag::normalize(category),
                        alias: alias.to_string(),
                        value: rest.first().map(|v| v.to_string()),
                        tags,
                    };
                }
            }
        }
        DirPath::Tags(tags)
    }
}

/// One catalog's share of a listing.
#[derive(Debug, Default)]
struct Listing {
    tags: Vec<Tag>,
    folders: Vec<String>,
    items: Vec<Item>,
}

/// Answers path queries against the registry's mounted snapshot.
#[derive(Clone)]
pub struct Resolver {
    registry: Arc<VolumeRegistry>,
}

impl Resolver {
    pub fn new(registry: Arc<VolumeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<VolumeRegistry> {
        &self.registry
    }

    /// Concrete path backing a virtual file, if it exists.
    ///
    /// With one mounted volume the answer is computed without a catalog
    /// lookup. With several, each catalog is asked for the item in turn.
    pub fn resolve(&self, virtual_path: &str) -> Option<PathBuf> {
        self.locate(virtual_path).map(|(_, path)| path)
    }

    /// Like [`resolve`](Self::resolve), also returning the owning volume.
    ///
    /// A catalog that fails structurally during the lookup is unmounted.
    pub fn locate(&self, virtual_path: &str) -> Option<(BagVolume, PathBuf)> {
        let name = file_name(virtual_path)?;
        let mounted = self.registry.mounted();

        if mounted.len() == 1 {
            let bag = mounted.into_values().next()?;
            let concrete = bag.bag_dir().ok()?.join(name);
            return concrete.is_file().then_some((bag, concrete));
        }

        let mut found = None;
        let mut failed: Vec<VolumeId> = Vec::new();
        for (id, bag) in mounted {
            match bag.catalog.get_item(name) {
                Ok(Some(_)) => {
                    let Ok(dir) = bag.bag_dir() else { continue };
                    let concrete = dir.join(name);
                    if concrete.is_file() {
                        found = Some((bag, concrete));
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_structural() => {
                    tracing::warn!(volume = %id, error = %e, "catalog failed, dropping volume");
                    failed.push(id);
                }
                Err(e) => tracing::debug!(volume = %id, error = %e, "lookup failed during resolve"),
            }
        }

        self.drop_volumes(failed);
        found
    }

    /// List a virtual directory.
    ///
    /// The root lists every root-visible tag. Below it, each catalog
    /// contributes its co-occurring tags as directories and its matching
    /// items as files. Results are merged by name, directories first. A
    /// catalog that fails structurally is left out and unmounted afterwards.
    pub fn enumerate(&self, virtual_dir: &str) -> Vec<VirtualEntry> {
        let dir = DirPath::parse(virtual_dir);
        let mounted = self.registry.mounted();

        let mut dirs: BTreeMap<String, Tag> = BTreeMap::new();
        let mut folders: BTreeMap<String, String> = BTreeMap::new();
        let mut files: BTreeMap<String, Item> = BTreeMap::new();
        let mut failed: Vec<VolumeId> = Vec::new();

        for (id, bag) in &mounted {
            match listing(bag, &dir) {
                Ok(listing) => {
                    for tag in listing.tags {
                        dirs.entry(tag.id.clone())
                            .and_modify(|t| t.root_visible |= tag.root_visible)
                            .or_insert(tag);
                    }
                    for folder in listing.folders {
                        folders.entry(folder.to_lowercase()).or_insert(folder);
                    }
                    for item in listing.items {
                        files.entry(item.id.clone()).or_insert(item);
                    }
                }
                Err(e) if e.is_structural() => {
                    tracing::warn!(volume = %id, error = %e, "catalog failed, dropping volume");
                    failed.push(id.clone());
                }
                Err(e) => {
                    tracing::warn!(volume = %id, error = %e, "catalog skipped for this listing");
                }
            }
        }

        self.drop_volumes(failed);

        folders.retain(|key, _| !dirs.contains_key(key));
        files.retain(|name, _| !dirs.contains_key(name) && !folders.contains_key(&name.to_lowercase()));
        dirs.into_values()
            .map(VirtualEntry::Tag)
            .chain(folders.into_values().map(VirtualEntry::Folder))
            .chain(files.into_values().map(VirtualEntry::Item))
            .collect()
    }

    /// True for the root, a tag in any mounted catalog, or an alias folder
    /// some catalog can fill.
    pub fn is_directory(&self, virtual_path: &str) -> bool {
        let Some(name) = file_name(virtual_path) else {
            return true;
        };
        let mounted = self.registry.mounted();
        let is_tag = || {
            mounted
                .values()
                .any(|bag| bag.catalog.tag_exists(name).unwrap_or(false))
        };

        match DirPath::parse(virtual_path) {
            DirPath::Alias {
                category,
                alias,
                value,
                ..
            } => {
                mounted.values().any(|bag| {
                    alias_folder_exists(bag, &category, &alias, value.as_deref()).unwrap_or(false)
                }) || is_tag()
            }
            DirPath::Tags(_) => is_tag(),
        }
    }

    fn drop_volumes(&self, failed: Vec<VolumeId>) {
        for id in failed {
            if let Err(e) = self.registry.unmount(&id) {
                tracing::debug!(volume = %id, error = %e, "volume already gone");
            }
        }
    }
}

fn listing(bag: &BagVolume, dir: &DirPath) -> Result<Listing, CatalogError> {
    let (category, alias, value, tags) = match dir {
        DirPath::Tags(tags) => return tag_listing(bag, tags),
        DirPath::Alias {
            category,
            alias,
            value,
            tags,
        } => (category, alias, value, tags),
    };
    let Some(alias) = find_alias(bag, category, alias)? else {
        return tag_listing(bag, tags);
    };

    match value {
        None => Ok(Listing {
            folders: bag
                .catalog
                .alias_values(category, &alias)?
                .into_iter()
                .filter(|v| !v.contains(SEPARATORS))
                .collect(),
            ..Listing::default()
        }),
        Some(value) => Ok(Listing {
            items: bag.catalog.items_by_alias(category, &alias, value)?,
            ..Listing::default()
        }),
    }
}

fn tag_listing(bag: &BagVolume, tags: &BTreeSet<String>) -> Result<Listing, CatalogError> {
    if tags.is_empty() {
        return Ok(Listing {
            tags: bag.catalog.root_tags()?.into_iter().collect(),
            ..Listing::default()
        });
    }

    let mut listing = Listing {
        tags: bag
            .catalog
            .descendant_tags(tags)?
            .into_iter()
            .map(|id| Tag::new(id, false))
            .collect(),
        folders: Vec::new(),
        items: bag.catalog.items_matching_all(tags)?,
    };

    let category = match tags.len() {
        1 => tags.first().and_then(|only| only.parse::<Category>().ok()),
        _ => None,
    };
    if let Some(category) = category {
        if !listing.items.is_empty() {
            listing.folders = bag
                .catalog
                .aliases_for_family(category.meta_table())?
                .iter()
                .map(MetaAlias::folder_name)
                .collect();
        }
    }
    Ok(listing)
}

fn find_alias(bag: &BagVolume, category: &str, alias: &str) -> Result<Option<MetaAlias>, CatalogError> {
    let Ok(category) = category.parse::<Category>() else {
        return Ok(None);
    };
    Ok(bag
        .catalog
        .aliases_for_family(category.meta_table())?
        .into_iter()
        .find(|a| a.alias.eq_ignore_ascii_case(alias)))
}

fn alias_folder_exists(
    bag: &BagVolume,
    category: &str,
    alias: &str,
    value: Option<&str>,
) -> Result<bool, CatalogError> {
    let Some(alias) = find_alias(bag, category, alias)? else {
        return Ok(false);
    };
    if !bag.catalog.tag_exists(category)? {
        return Ok(false);
    }
    let Some(value) = value else {
        return Ok(true);
    };
    Ok(bag
        .catalog
        .alias_values(category, &alias)?
        .iter()
        .any(|v| v.eq_ignore_ascii_case(value)))
}

fn segments(path: &str) -> impl DoubleEndedIterator<Item = &str> {
    path.split(SEPARATORS)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
}

/// Tag set named by a virtual directory path. Segments are trimmed and
/// lower-cased; empty segments vanish.
pub fn split_tags(path: &str) -> BTreeSet<String> {
    path.split(SEPARATORS)
        .map(Tag::normalize)
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Last non-empty component of a virtual path.
pub fn file_name(path: &str) -> Option<&str> {
    segments(path).next_back()
}

pub fn is_root(path: &str) -> bool {
    file_name(path).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tags() {
        let tags: Vec<String> = split_tags("\\Music\\ 2024 /rock//").into_iter().collect();
        assert_eq!(tags, ["2024", "music", "rock"]);
        assert!(split_tags("\\").is_empty());
        assert!(split_tags("").is_empty());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("\\document\\2024\\report.pdf"), Some("report.pdf"));
        assert_eq!(file_name("/a.txt"), Some("a.txt"));
        assert_eq!(file_name("\\music\\"), Some("music"));
        assert_eq!(file_name("\\"), None);
        assert!(is_root("/"));
        assert!(!is_root("\\a.txt"));
    }
}
