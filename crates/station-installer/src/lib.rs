//! Client side of the station installer: catalog loading, install and cancel
//! requests, and per-task status polling against the station REST backend.

pub mod api;
pub mod catalog;
pub mod client;
pub mod config;
pub mod events;
pub mod form;
pub mod model;
mod poller;
pub mod store;

pub use api::{ApiError, StationApi};
pub use catalog::{fetch_catalog, load_catalog, Catalog, CatalogLoad, CatalogSlot};
pub use client::{InstallOutcome, InstallerClient};
pub use config::ClientConfig;
pub use events::{EventQueue, EventSender, InstallerEvent, NotificationLevel};
pub use form::{FormError, FormMode, SelectionForm};
pub use model::{
    Dashboard, Health, InstallDestination, InstallTask, PollHealth, PresetResource, Resource,
    ResourceKind, StatusReport, TaskStatus,
};
pub use store::TaskStore;
