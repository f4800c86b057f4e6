use crate::lifecycle::state::{LifecycleAction, WidgetState};
use crate::storage::error::StorageSystemError;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("No widget instance with id '{0}'")]
    UnknownInstance(String),

    #[error("Widget '{instance_id}' cannot {action} while {from}")]
    InvalidTransition {
        instance_id: String,
        from: WidgetState,
        action: LifecycleAction,
    },

    #[error("Plugin '{0}' is not loaded")]
    PluginNotLoaded(String),

    #[error("Plugin '{plugin_id}' does not provide widget type '{type_tag}'")]
    UnknownWidgetType { plugin_id: String, type_tag: String },

    #[error("Plugin operation failed: {0}")]
    Plugin(#[from] crate::plugin_system::error::PluginSystemError),

    #[error("Plugin call failed: {0}")]
    PluginCall(#[from] crate::plugin_system::error::WidgetCallError),

    #[error("Failed to persist widget state: {0}")]
    Persistence(#[from] StorageSystemError),
}
