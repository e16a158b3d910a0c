/*!
 * Memory Resources
 * Concrete byte resources and the process-wide default handle
 */

mod global;
mod tracking;

pub use global::GlobalResource;
pub use tracking::TrackingResource;

use super::traits::MemoryResource;
use super::types::{MemoryError, MemoryResult};
use log::info;
use std::sync::{Arc, OnceLock};

static DEFAULT_RESOURCE: OnceLock<Arc<dyn MemoryResource>> = OnceLock::new();

/// Install the process-wide default resource
///
/// Must run before the first call to [`default_resource`]; the handle is
/// fixed once anything has observed it.
pub fn set_default_resource(resource: Arc<dyn MemoryResource>) -> MemoryResult<()> {
    DEFAULT_RESOURCE
        .set(resource)
        .map_err(|_| MemoryError::DefaultResourceAlreadySet)?;
    info!("Default memory resource installed");
    Ok(())
}

/// Process-wide default resource
///
/// Falls back to [`GlobalResource`] when nothing was installed.
pub fn default_resource() -> Arc<dyn MemoryResource> {
    Arc::clone(DEFAULT_RESOURCE.get_or_init(|| Arc::new(GlobalResource)))
}
