pub mod access_list;
pub mod resolver;

pub use access_list::{AccessList, FutureAccessList, StorageFile};
pub use resolver::{MediaSource, MediaSourceResolver, SourceOrigin};
