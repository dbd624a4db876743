//! patchflow core library: domain documents, the task-pair model, project
//! definitions, the embedded document store and engine settings.
//!
//! - [`types`] — identifiers and status enums
//! - [`patch`], [`version`], [`records`] — persisted documents
//! - [`project`] — validated project definition and lookups
//! - [`pairs`] — [`TaskVariantPairs`] expand / collapse / validate
//! - [`store`] — [`Store`] with all-or-nothing transactions
//! - [`settings`], [`paths`], [`clock`] — injected environment

pub mod clock;
pub mod error;
pub mod pairs;
pub mod patch;
pub mod paths;
pub mod project;
pub mod records;
pub mod settings;
pub mod store;
pub mod types;
pub mod version;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{PairError, SettingsError, StoreError};
pub use pairs::{TVPair, TVPairSet, TaskVariantPairs};
pub use patch::{Parameter, Patch, VariantTasks};
pub use project::Project;
pub use settings::Settings;
pub use store::{Documents, Store};
pub use types::{BuildId, PatchId, Requester, TaskId, TaskStatus, VersionId};
pub use version::{Build, Manifest, Task, Version};
