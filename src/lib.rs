// S3 Drive - personal file manager over a shared S3 bucket
// Each signed-in identity sees only the keys under its own namespace root

pub mod bulk;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod listing;
pub mod model;
pub mod namespace;
pub mod providers;
pub mod selection;
pub mod session;
pub mod signed_urls;
pub mod thumbnail;
pub mod upload;

#[cfg(test)]
mod test_support;

pub use bulk::{ArchiveOutput, DeleteReport, DownloadPlan};
pub use config::{DriveConfig, IdentityConfig, IdentitySecrets, LinkTtls};
pub use error::{DriveError, DriveResult};
pub use events::{DriveEvent, EventSink, Notification, NotificationLevel, NullSink, TransferEvent};
pub use identity::{CognitoIdentity, Identity, IdentityProvider, StaticIdentity};
pub use listing::ListOutcome;
pub use model::{Entry, EntryId, FileEntry, FileKind, Listing};
pub use namespace::{Breadcrumb, FolderPath, NamespaceRoot};
pub use providers::{MemoryStore, ObjectStore, S3Provider, StoreError};
pub use session::{DownloadOutcome, DriveSession, SessionOptions};
pub use signed_urls::LinkMode;
pub use upload::{UploadFile, UploadReport};
