use retrace_core::{MigrationEvent, MigrationSet};

/// Progress line for a run event, `None` for events that are not shown.
pub fn event_line(event: &MigrationEvent) -> Option<String> {
    match event {
        MigrationEvent::Migration { title, direction } => {
            Some(format!("  {direction:>4} : {title}"))
        }
        MigrationEvent::Save => None,
        MigrationEvent::Complete { steps: 0, .. } => {
            Some("  migration : nothing to do".to_string())
        }
        MigrationEvent::Complete { steps, .. } => {
            Some(format!("  migration : complete ({steps} applied)"))
        }
    }
}

/// One line per migration: applied time (or `pending`), title, description.
pub fn status_lines(set: &MigrationSet) -> Vec<String> {
    let width = set
        .migrations()
        .iter()
        .map(|m| m.title().len())
        .max()
        .unwrap_or(0);
    let last_run = set.last_run();

    set.migrations()
        .iter()
        .map(|m| {
            let applied = m
                .timestamp()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "pending".to_string());
            let marker = if Some(m.title()) == last_run { "*" } else { " " };
            format!(
                "{marker} {applied:<19}  {:<width$}  {}",
                m.title(),
                m.description()
            )
        })
        .collect()
}
