//! Data models shared across vendor providers, discovery, caching, and relocation.
//!
//! Everything here is plain data: the providers build these entities from raw
//! vendor files, the cache and snapshot layers serialize them with serde, and
//! the CLI emits them as JSON. Nothing in this module touches the filesystem.
//!
//! - [`Vendor`] - which assistant a piece of data came from
//! - [`Project`] - one project directory aggregated across vendors
//! - [`SessionMeta`] - one conversation thread's metadata
//! - [`Message`] - one normalized message, classified by [`MessageKind`]
//! - [`RelocationReport`] - per-vendor outcome of a project move

pub mod message;
pub mod project;
pub mod report;
pub mod session;
pub mod vendor;

pub use message::{Message, MessageKind};
pub use project::Project;
pub use report::RelocationReport;
pub use session::SessionMeta;
pub use vendor::Vendor;
