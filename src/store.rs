// src/store.rs
//! Local record file for saved routes and logged finds
//!
//! Everything lives in one JSON document. Each mutation rewrites the whole
//! file through a temporary sibling that is renamed into place, so a crash
//! mid-write leaves the previous version intact.

use crate::error::{Result, TrackError};
use crate::geo::Coordinate;
use crate::tracker::RouteSink;
use crate::tracking::FinishedRoute;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

pub const MAX_ROUTE_IMAGES: usize = 5;
pub const MAX_FIND_IMAGES: usize = 10;
pub const FINDS_PER_PAGE: usize = 5;
pub const ROUTES_PER_PAGE: usize = 10;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub start: Coordinate,
    pub end: Coordinate,
    pub distance_km: f64,
    pub path: Vec<Coordinate>,
    #[serde(default)]
    pub images: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Kind of place a find was made at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteType {
    Home,
    SportsField,
    Beach,
    EventFacility,
    PublicGround,
    UnknownHeritageSite,
    KnownHeritageSite,
    Other(String),
}

impl SiteType {
    pub const CHOICES: &'static [&'static str] = &[
        "home",
        "sports-field",
        "beach",
        "event-facility",
        "public-ground",
        "unknown-heritage-site",
        "known-heritage-site",
        "other:<detail>",
    ];
}

impl fmt::Display for SiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteType::Home => write!(f, "Home"),
            SiteType::SportsField => write!(f, "Sports field"),
            SiteType::Beach => write!(f, "Beach"),
            SiteType::EventFacility => write!(f, "Event Facility"),
            SiteType::PublicGround => write!(f, "Public Ground"),
            SiteType::UnknownHeritageSite => write!(f, "Unknown Heritage Site"),
            SiteType::KnownHeritageSite => write!(f, "Known Heritage Site"),
            SiteType::Other(detail) => write!(f, "Other: {}", detail),
        }
    }
}

impl FromStr for SiteType {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Some((kind, detail)) = trimmed.split_once(':') {
            if kind.trim().eq_ignore_ascii_case("other") {
                let detail = detail.trim();
                if detail.is_empty() {
                    return Err(TrackError::Validation(
                        "Please specify the site type".to_string(),
                    ));
                }
                return Ok(SiteType::Other(detail.to_string()));
            }
        }

        let key: String = trimmed
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match key.as_str() {
            "home" => Ok(SiteType::Home),
            "sportsfield" => Ok(SiteType::SportsField),
            "beach" => Ok(SiteType::Beach),
            "eventfacility" => Ok(SiteType::EventFacility),
            "publicground" => Ok(SiteType::PublicGround),
            "unknownheritagesite" => Ok(SiteType::UnknownHeritageSite),
            "knownheritagesite" => Ok(SiteType::KnownHeritageSite),
            "other" => Err(TrackError::Validation(
                "Please specify the site type".to_string(),
            )),
            _ => Err(TrackError::Validation(format!(
                "Unknown site type '{}' (expected one of: {})",
                trimmed,
                SiteType::CHOICES.join(", ")
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub site_name: Option<String>,
    pub site_type: Option<SiteType>,
    pub location: Coordinate,
    #[serde(default)]
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for a new route record
#[derive(Debug, Clone)]
pub struct NewRoute {
    pub name: String,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub route: FinishedRoute,
}

/// Input for a new find
#[derive(Debug, Clone)]
pub struct NewFind {
    pub name: String,
    pub description: Option<String>,
    pub site_name: Option<String>,
    pub site_type: Option<SiteType>,
    pub location: Coordinate,
    pub images: Vec<String>,
}

/// Field changes; `None` leaves the field as it is
#[derive(Debug, Clone, Default)]
pub struct RecordEdit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub images: Option<Vec<String>>,
}

/// Extra fields only finds carry
#[derive(Debug, Clone, Default)]
pub struct FindEdit {
    pub record: RecordEdit,
    pub site_name: Option<String>,
    pub site_type: Option<SiteType>,
}

/// One page of a newest-first listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        if self.total == 0 {
            1
        } else {
            self.total.div_ceil(self.per_page)
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    version: u32,
    #[serde(default)]
    routes: Vec<RouteRecord>,
    #[serde(default)]
    finds: Vec<FindRecord>,
}

pub struct RecordStore {
    path: PathBuf,
    data: StoreData,
}

impl RecordStore {
    /// Open the record file, starting empty when it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents).map_err(|e| {
                TrackError::Parse(format!("Invalid record file {}: {}", path.display(), e))
            })?
        } else {
            StoreData {
                version: STORE_VERSION,
                ..StoreData::default()
            }
        };

        tracing::debug!(
            path = %path.display(),
            routes = data.routes.len(),
            finds = data.finds.len(),
            "Record store opened"
        );
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save_route(&mut self, new: NewRoute) -> Result<RouteRecord> {
        let name = required_name(&new.name, "Route name is required")?;
        let images = checked_images(new.images, MAX_ROUTE_IMAGES)?;
        let draft = new.route.draft;

        let record = RouteRecord {
            id: Uuid::new_v4().to_string(),
            name,
            description: optional_text(new.description),
            start: draft.start,
            end: draft.end,
            distance_km: draft.distance_km,
            path: draft.path,
            images,
            started_at: new.route.started_at,
            finished_at: Some(new.route.finished_at),
            created_at: Utc::now(),
        };

        self.commit(|data| data.routes.insert(0, record.clone()))?;
        tracing::info!(id = %record.id, name = %record.name, "Route saved");
        Ok(record)
    }

    pub fn list_routes(&self, page: usize, per_page: usize) -> Result<Page<RouteRecord>> {
        paginate(&self.data.routes, page, per_page, |r| r.created_at)
    }

    pub fn route(&self, id: &str) -> Result<&RouteRecord> {
        let index = find_index(&self.data.routes, id, |r| &r.id, "route")?;
        Ok(&self.data.routes[index])
    }

    pub fn edit_route(&mut self, id: &str, edit: RecordEdit) -> Result<RouteRecord> {
        let index = find_index(&self.data.routes, id, |r| &r.id, "route")?;
        let mut record = self.data.routes[index].clone();
        apply_edit(
            &mut record.name,
            &mut record.description,
            &mut record.images,
            edit,
            "Route name is required",
            MAX_ROUTE_IMAGES,
        )?;

        self.commit(|data| data.routes[index] = record.clone())?;
        Ok(record)
    }

    pub fn delete_route(&mut self, id: &str) -> Result<RouteRecord> {
        let index = find_index(&self.data.routes, id, |r| &r.id, "route")?;
        let record = self.commit(|data| data.routes.remove(index))?;
        tracing::info!(id = %record.id, "Route deleted");
        Ok(record)
    }

    pub fn log_find(&mut self, new: NewFind) -> Result<FindRecord> {
        let name = required_name(&new.name, "Find name is required")?;
        let images = checked_images(new.images, MAX_FIND_IMAGES)?;

        let record = FindRecord {
            id: Uuid::new_v4().to_string(),
            name,
            description: optional_text(new.description),
            site_name: optional_text(new.site_name),
            site_type: new.site_type,
            location: new.location,
            images,
            created_at: Utc::now(),
        };

        self.commit(|data| data.finds.insert(0, record.clone()))?;
        tracing::info!(id = %record.id, name = %record.name, "Find logged");
        Ok(record)
    }

    pub fn list_finds(&self, page: usize, per_page: usize) -> Result<Page<FindRecord>> {
        paginate(&self.data.finds, page, per_page, |f| f.created_at)
    }

    pub fn find(&self, id: &str) -> Result<&FindRecord> {
        let index = find_index(&self.data.finds, id, |f| &f.id, "find")?;
        Ok(&self.data.finds[index])
    }

    pub fn edit_find(&mut self, id: &str, edit: FindEdit) -> Result<FindRecord> {
        let index = find_index(&self.data.finds, id, |f| &f.id, "find")?;
        let mut record = self.data.finds[index].clone();
        apply_edit(
            &mut record.name,
            &mut record.description,
            &mut record.images,
            edit.record,
            "Find name is required",
            MAX_FIND_IMAGES,
        )?;
        if edit.site_name.is_some() {
            record.site_name = optional_text(edit.site_name);
        }
        if edit.site_type.is_some() {
            record.site_type = edit.site_type;
        }

        self.commit(|data| data.finds[index] = record.clone())?;
        Ok(record)
    }

    pub fn delete_find(&mut self, id: &str) -> Result<FindRecord> {
        let index = find_index(&self.data.finds, id, |f| &f.id, "find")?;
        let record = self.commit(|data| data.finds.remove(index))?;
        tracing::info!(id = %record.id, "Find deleted");
        Ok(record)
    }

    pub fn routes(&self) -> &[RouteRecord] {
        &self.data.routes
    }

    pub fn finds(&self) -> &[FindRecord] {
        &self.data.finds
    }

    /// Apply `change` to a copy of the records and keep it only once it is on disk
    fn commit<T>(&mut self, change: impl FnOnce(&mut StoreData) -> T) -> Result<T> {
        let mut next = self.data.clone();
        let output = change(&mut next);
        write_records(&self.path, &next)?;
        self.data = next;
        Ok(output)
    }
}

fn write_records(path: &Path, data: &StoreData) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let contents = serde_json::to_string_pretty(data)?;
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn required_name(name: &str, message: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TrackError::Validation(message.to_string()));
    }
    Ok(name.to_string())
}

fn optional_text(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn checked_images(images: Vec<String>, max: usize) -> Result<Vec<String>> {
    let images: Vec<String> = images
        .into_iter()
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
        .collect();
    if images.len() > max {
        return Err(TrackError::Validation(format!(
            "At most {} images allowed ({} given)",
            max,
            images.len()
        )));
    }
    Ok(images)
}

fn apply_edit(
    name: &mut String,
    description: &mut Option<String>,
    images: &mut Vec<String>,
    edit: RecordEdit,
    name_message: &str,
    max_images: usize,
) -> Result<()> {
    if let Some(new_name) = edit.name {
        *name = required_name(&new_name, name_message)?;
    }
    if edit.description.is_some() {
        *description = optional_text(edit.description);
    }
    if let Some(new_images) = edit.images {
        *images = checked_images(new_images, max_images)?;
    }
    Ok(())
}

/// Exact id, or an unambiguous prefix of one
fn find_index<T>(items: &[T], id: &str, key: impl Fn(&T) -> &String, kind: &str) -> Result<usize> {
    let id = id.trim();
    if let Some(index) = items.iter().position(|item| key(item) == id) {
        return Ok(index);
    }

    let mut matches = items
        .iter()
        .enumerate()
        .filter(|(_, item)| !id.is_empty() && key(item).starts_with(id));
    match (matches.next(), matches.next()) {
        (Some((index, _)), None) => Ok(index),
        (Some(_), Some(_)) => Err(TrackError::Validation(format!(
            "Ambiguous {} id '{}'",
            kind, id
        ))),
        _ => Err(TrackError::NotFound(format!("No {} with id '{}'", kind, id))),
    }
}

fn paginate<T: Clone>(
    items: &[T],
    page: usize,
    per_page: usize,
    created_at: impl Fn(&T) -> DateTime<Utc>,
) -> Result<Page<T>> {
    if page == 0 || per_page == 0 {
        return Err(TrackError::Validation(
            "Page and page size start at 1".to_string(),
        ));
    }

    let total = items.len();
    let mut sorted: Vec<&T> = items.iter().collect();
    // Stable, so records created in the same instant keep insertion order
    sorted.sort_by_key(|item| std::cmp::Reverse(created_at(item)));

    let page_items = sorted
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .cloned()
        .collect();

    Ok(Page {
        items: page_items,
        page,
        per_page,
        total,
    })
}

/// Saves routes handed over by the tracker into the record store
pub struct RouteArchive {
    store: RecordStore,
    name: Option<String>,
    description: Option<String>,
}

impl RouteArchive {
    pub fn new(store: RecordStore) -> Self {
        Self {
            store,
            name: None,
            description: None,
        }
    }

    /// Name and description for routes saved from this session
    pub fn with_details(mut self, name: Option<String>, description: Option<String>) -> Self {
        self.name = optional_text(name);
        self.description = optional_text(description);
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }
}

/// `Route YYYY-MM-DD HH:MM` in local time
pub fn default_route_name(at: DateTime<Utc>) -> String {
    format!("Route {}", at.with_timezone(&Local).format("%Y-%m-%d %H:%M"))
}

impl RouteSink for RouteArchive {
    fn save(&mut self, route: FinishedRoute) -> Result<(String, String)> {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| default_route_name(route.started_at.unwrap_or(route.finished_at)));

        let record = self.store.save_route(NewRoute {
            name,
            description: self.description.clone(),
            images: Vec::new(),
            route,
        })?;
        Ok((record.id, record.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{finalize, StopReason};

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn finished(points: &[(f64, f64)]) -> FinishedRoute {
        let path = points.iter().map(|&(lat, lon)| coord(lat, lon)).collect();
        FinishedRoute {
            draft: finalize(path).unwrap(),
            started_at: Some(Utc::now()),
            finished_at: Utc::now(),
            reason: StopReason::User,
        }
    }

    fn new_find(name: &str) -> NewFind {
        NewFind {
            name: name.to_string(),
            description: None,
            site_name: None,
            site_type: None,
            location: coord(51.5, -0.12),
            images: Vec::new(),
        }
    }

    #[test]
    fn test_route_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");

        let mut store = RecordStore::open(&path).unwrap();
        let record = store
            .save_route(NewRoute {
                name: "  Morning walk ".to_string(),
                description: Some("   ".to_string()),
                images: vec!["a.jpg".to_string()],
                route: finished(&[(0.0, 0.0), (0.0, 1.0)]),
            })
            .unwrap();

        assert_eq!(record.name, "Morning walk");
        assert_eq!(record.description, None);
        assert!((record.distance_km - 111.19492664).abs() < 1e-6);

        let reopened = RecordStore::open(&path).unwrap();
        assert_eq!(reopened.routes(), &[record]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_route_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::open(dir.path().join("records.json")).unwrap();

        let blank = store.save_route(NewRoute {
            name: " ".to_string(),
            description: None,
            images: Vec::new(),
            route: finished(&[(0.0, 0.0), (0.0, 1.0)]),
        });
        assert!(matches!(blank, Err(TrackError::Validation(_))));

        let too_many = store.save_route(NewRoute {
            name: "Walk".to_string(),
            description: None,
            images: (0..6).map(|i| format!("{}.jpg", i)).collect(),
            route: finished(&[(0.0, 0.0), (0.0, 1.0)]),
        });
        assert!(matches!(too_many, Err(TrackError::Validation(_))));
        assert!(store.routes().is_empty());
    }

    #[test]
    fn test_find_pagination_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::open(dir.path().join("records.json")).unwrap();
        for i in 0..7 {
            store.log_find(new_find(&format!("Find {}", i))).unwrap();
        }

        let first = store.list_finds(1, FINDS_PER_PAGE).unwrap();
        assert_eq!(first.total, 7);
        assert_eq!(first.total_pages(), 2);
        assert!(first.has_next());
        assert_eq!(first.items.len(), 5);
        assert_eq!(first.items[0].name, "Find 6");

        let second = store.list_finds(2, FINDS_PER_PAGE).unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[1].name, "Find 0");
        assert!(!second.has_next());

        assert!(store.list_finds(0, FINDS_PER_PAGE).is_err());
    }

    #[test]
    fn test_find_edit_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::open(dir.path().join("records.json")).unwrap();
        let find = store.log_find(new_find("Coin")).unwrap();

        let edited = store
            .edit_find(
                &find.id,
                FindEdit {
                    record: RecordEdit {
                        description: Some("Victorian penny".to_string()),
                        ..RecordEdit::default()
                    },
                    site_type: Some(SiteType::Beach),
                    ..FindEdit::default()
                },
            )
            .unwrap();
        assert_eq!(edited.name, "Coin");
        assert_eq!(edited.description.as_deref(), Some("Victorian penny"));
        assert_eq!(edited.site_type, Some(SiteType::Beach));

        let rename = store.edit_find(
            &find.id,
            FindEdit {
                record: RecordEdit {
                    name: Some("".to_string()),
                    ..RecordEdit::default()
                },
                ..FindEdit::default()
            },
        );
        assert!(matches!(rename, Err(TrackError::Validation(_))));

        // Unique prefix is enough
        let deleted = store.delete_find(&find.id[..8]).unwrap();
        assert_eq!(deleted.id, find.id);
        assert!(matches!(store.find(&find.id), Err(TrackError::NotFound(_))));
    }

    #[test]
    fn test_failed_write_leaves_records_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let mut store = RecordStore::open(&path).unwrap();
        let kept = store.log_find(new_find("Coin")).unwrap();

        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let mut blocked = RecordStore::open(blocker.join("records.json")).unwrap();
        let result = blocked.save_route(NewRoute {
            name: "Walk".to_string(),
            description: None,
            images: Vec::new(),
            route: finished(&[(0.0, 0.0), (0.0, 1.0)]),
        });
        assert!(matches!(result, Err(TrackError::Io(_))));
        assert!(blocked.routes().is_empty());

        // Same for deletes once the target has become unwritable
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        assert!(store.delete_find(&kept.id).is_err());
        assert_eq!(store.finds(), &[kept.clone()]);
        assert!(store.edit_find(&kept.id, FindEdit::default()).is_err());
        assert_eq!(store.find(&kept.id).unwrap(), &kept);
    }

    #[test]
    fn test_site_type_parsing() {
        assert_eq!("home".parse::<SiteType>().unwrap(), SiteType::Home);
        assert_eq!(
            "Sports field".parse::<SiteType>().unwrap(),
            SiteType::SportsField
        );
        assert_eq!(
            "known-heritage-site".parse::<SiteType>().unwrap(),
            SiteType::KnownHeritageSite
        );
        assert_eq!(
            "other: allotment".parse::<SiteType>().unwrap(),
            SiteType::Other("allotment".to_string())
        );
        assert!("other".parse::<SiteType>().is_err());
        assert!("other:  ".parse::<SiteType>().is_err());
        assert!("castle".parse::<SiteType>().is_err());
        assert_eq!(SiteType::EventFacility.to_string(), "Event Facility");
    }

    #[test]
    fn test_archive_default_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path().join("records.json")).unwrap();
        let mut archive = RouteArchive::new(store);

        let (id, name) = archive.save(finished(&[(1.0, 1.0), (1.0, 1.001)])).unwrap();
        assert!(name.starts_with("Route "));
        assert_eq!(name.len(), "Route 2024-01-01 00:00".len());
        assert_eq!(archive.store().route(&id).unwrap().name, name);

        let mut named = RouteArchive::new(RecordStore::open(dir.path().join("records.json")).unwrap())
            .with_details(Some("Evening loop".to_string()), None);
        let (_, name) = named.save(finished(&[(1.0, 1.0), (1.0, 1.001)])).unwrap();
        assert_eq!(name, "Evening loop");
        assert_eq!(named.store().routes().len(), 2);
    }
}
