use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::plugin_system::error::{WidgetCallError, WidgetResult};

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic reason".to_string()
    }
}

/// Runs a call into plugin code, turning both errors and panics into a
/// [`WidgetCallError`].
pub(crate) fn guarded<T>(
    plugin_id: &str,
    operation: &'static str,
    call: impl FnOnce() -> WidgetResult<T>,
) -> Result<T, WidgetCallError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(WidgetCallError::Failed {
            plugin_id: plugin_id.to_string(),
            operation,
            source,
        }),
        Err(payload) => Err(WidgetCallError::Panicked {
            plugin_id: plugin_id.to_string(),
            operation,
            message: panic_message(payload.as_ref()),
        }),
    }
}
