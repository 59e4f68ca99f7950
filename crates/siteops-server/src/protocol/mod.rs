//! Handler contract, registry, and the dispatch funnel.

pub mod dispatch;
pub mod handler;
pub mod registry;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use handler::{Handler, HandlerError, HandlerResult, RequestContext};
pub use registry::{HandlerRegistry, RegistryError};
