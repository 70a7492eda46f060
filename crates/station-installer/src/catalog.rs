use tracing::warn;

use crate::api::{ApiError, StationApi};
use crate::model::{InstallDestination, InstallTask, PresetResource, ResourceKind};

/// Load state of one catalog collection.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum CatalogSlot<T> {
    #[default]
    Loading,
    Ready(Vec<T>),
    Failed(String),
}

impl<T> CatalogSlot<T> {
    fn from_result(result: Result<Vec<T>, ApiError>, what: &str) -> Self {
        match result {
            Ok(items) => CatalogSlot::Ready(items),
            Err(err) => {
                warn!("Failed to fetch {what}: {err}");
                CatalogSlot::Failed(format!("Failed to fetch {what}: {err}"))
            }
        }
    }

    pub fn items(&self) -> &[T] {
        match self {
            CatalogSlot::Ready(items) => items,
            _ => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            CatalogSlot::Failed(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, CatalogSlot::Loading)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Catalog {
    pub resources: CatalogSlot<PresetResource>,
    pub destinations: CatalogSlot<InstallDestination>,
}

impl Catalog {
    pub fn presets(&self) -> &[PresetResource] {
        self.resources.items()
    }

    pub fn destinations(&self) -> &[InstallDestination] {
        self.destinations.items()
    }

    pub fn find_preset(&self, id: &str) -> Option<&PresetResource> {
        self.presets().iter().find(|preset| preset.id == id)
    }

    pub fn presets_by_kind(&self, kind: ResourceKind) -> Vec<&PresetResource> {
        self.presets()
            .iter()
            .filter(|preset| preset.kind == kind)
            .collect()
    }

    /// Case-insensitive match on name, description, tags and category.
    pub fn search(&self, query: &str) -> Vec<&PresetResource> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.presets().iter().collect();
        }
        let contains = |value: &str| value.to_lowercase().contains(&needle);
        self.presets()
            .iter()
            .filter(|preset| {
                contains(preset.name.as_str())
                    || preset.description.as_deref().is_some_and(contains)
                    || preset.tags.iter().any(|tag| contains(tag.as_str()))
                    || preset.category.as_deref().is_some_and(contains)
            })
            .collect()
    }

    pub fn destination_by_path(&self, path: &str) -> Option<&InstallDestination> {
        self.destinations().iter().find(|dest| dest.path == path)
    }

    /// Looks a destination up by id, then by path.
    pub fn find_destination(&self, key: &str) -> Option<&InstallDestination> {
        self.destinations()
            .iter()
            .find(|dest| dest.id == key)
            .or_else(|| self.destination_by_path(key))
    }
}

/// Result of the start-up fetch: both catalog collections plus the tasks
/// the backend is already tracking.
#[derive(Debug)]
pub struct CatalogLoad {
    pub catalog: Catalog,
    pub tasks: Result<Vec<InstallTask>, String>,
}

/// Fetches presets and destinations concurrently, without the task list.
pub async fn fetch_catalog(api: &StationApi) -> Catalog {
    let (resources, destinations) =
        tokio::join!(api.preset_resources(), api.installation_destinations());
    Catalog {
        resources: CatalogSlot::from_result(resources, "preset resources"),
        destinations: CatalogSlot::from_result(destinations, "installation destinations"),
    }
}

/// Fetches the catalog and existing tasks concurrently. A failure in one
/// request never prevents the others from loading.
pub async fn load_catalog(api: &StationApi) -> CatalogLoad {
    let (catalog, tasks) = tokio::join!(fetch_catalog(api), api.list_tasks());
    let tasks = tasks.map_err(|err| {
        warn!("Failed to fetch existing tasks: {err}");
        format!("Failed to fetch existing tasks: {err}")
    });
    CatalogLoad { catalog, tasks }
}
