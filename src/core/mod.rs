mod registry;
mod request;
mod watcher;

pub(crate) use registry::*;
pub(crate) use request::*;
pub use watcher::*;
