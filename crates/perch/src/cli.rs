use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use perch_core::lifecycle::DeleteConfirmation;
use perch_core::storage::WidgetInstance;

/// Asks on the terminal before a widget is deleted. `assume_yes` skips the
/// prompt.
#[derive(Debug, Clone, Copy)]
pub struct TerminalConfirmation {
    pub assume_yes: bool,
}

impl TerminalConfirmation {
    fn ask(instance: &WidgetInstance) -> io::Result<bool> {
        let mut stdout = io::stdout();
        write!(
            stdout,
            "Delete widget '{}' ({} / {})? [y/N] ",
            instance.id, instance.plugin_id, instance.type_tag
        )?;
        stdout.flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

#[async_trait]
impl DeleteConfirmation for TerminalConfirmation {
    async fn confirm_delete(&self, instance: &WidgetInstance) -> bool {
        if self.assume_yes {
            return true;
        }
        let instance = instance.clone();
        match tokio::task::spawn_blocking(move || Self::ask(&instance)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                log::warn!("Could not read confirmation: {}", e);
                false
            }
            Err(e) => {
                log::warn!("Confirmation prompt failed: {}", e);
                false
            }
        }
    }
}
