use std::fmt;

/// Host-side state of a widget instance.
///
/// `Discovered` is a widget type offered by a loaded plugin with no
/// instance yet; `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetState {
    Discovered,
    /// Pinned but disabled: no window, no live object.
    Disabled,
    /// Enabled, window hidden.
    Inactive,
    /// Enabled, window visible.
    Active,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleAction {
    Add,
    WindowShown,
    WindowHidden,
    Disable,
    Enable,
    Delete,
    UpdateSettings,
}

impl WidgetState {
    /// State of a persisted instance right after startup.
    pub fn from_pinned(pinned: bool) -> Self {
        if pinned {
            WidgetState::Inactive
        } else {
            WidgetState::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, WidgetState::Inactive | WidgetState::Active)
    }

    /// Next state for `action`, or `None` when the action is not allowed.
    /// Showing a shown window, hiding a hidden one, disabling a disabled
    /// instance and enabling an enabled one are no-ops.
    pub fn transition(self, action: LifecycleAction) -> Option<WidgetState> {
        use LifecycleAction as A;
        use WidgetState as S;
        match (self, action) {
            (S::Discovered, A::Add) => Some(S::Inactive),
            (S::Inactive | S::Active, A::WindowShown) => Some(S::Active),
            (S::Inactive | S::Active, A::WindowHidden) => Some(S::Inactive),
            (S::Inactive | S::Active | S::Disabled, A::Disable) => Some(S::Disabled),
            (S::Disabled, A::Enable) => Some(S::Inactive),
            (S::Inactive | S::Active, A::Enable) => Some(self),
            (S::Inactive | S::Active | S::Disabled, A::UpdateSettings) => Some(self),
            (S::Inactive | S::Active | S::Disabled, A::Delete) => Some(S::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for WidgetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WidgetState::Discovered => "discovered",
            WidgetState::Disabled => "disabled",
            WidgetState::Inactive => "inactive",
            WidgetState::Active => "active",
            WidgetState::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleAction::Add => "add",
            LifecycleAction::WindowShown => "show",
            LifecycleAction::WindowHidden => "hide",
            LifecycleAction::Disable => "disable",
            LifecycleAction::Enable => "enable",
            LifecycleAction::Delete => "delete",
            LifecycleAction::UpdateSettings => "update settings",
        };
        f.write_str(name)
    }
}
