//! Rendering of events, explanations, and summaries for the terminal.

use std::fmt::Write;

use fsw_core::{EventFlags, EventId, EventKind, OutputConfig, OutputFormat};
use fsw_watcher::{ClassifiedEvent, DeliverySnapshot, EventBatchStats, explain};

/// Returns the fixed-width tag printed in front of a text event line.
pub const fn tag(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Created => "[ created ]",
        EventKind::Modified => "[ modified]",
        EventKind::Renamed => "[ renamed ]",
        EventKind::Removed => "[ removed ]",
        EventKind::AttributeModified => "[attribute]",
        EventKind::RescanRequired => "[   ???   ]",
        EventKind::Other => "[  other  ]",
    }
}

/// Renders one event as a single output line (without the newline).
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_event(
    event: &ClassifiedEvent,
    output: &OutputConfig,
) -> Result<String, serde_json::Error> {
    if output.format == OutputFormat::Json {
        return serde_json::to_string(event);
    }
    let mut line = format!("{} - {}", tag(event.kind), event.path);
    if output.show_flags {
        let _ = write!(line, "  ({})", event.flags);
    }
    Ok(line)
}

/// Renders how a flag word is classified.
pub fn render_explanation(flags: EventFlags) -> String {
    let explanation = explain(flags);
    let rule = explanation
        .rule
        .map_or_else(|| "-".to_owned(), |index| format!("#{}", index + 1));

    let mut out = String::new();
    let _ = writeln!(out, "bits:  {:#010x}", flags.bits());
    let _ = writeln!(out, "flags: {flags}");
    let _ = writeln!(out, "rule:  {rule} {}", explanation.rule_name());
    let _ = write!(out, "kind:  {} {}", tag(explanation.kind), explanation.kind);
    out
}

/// Renders the end-of-session summary.
pub fn render_summary(
    events: &EventBatchStats,
    delivery: &DeliverySnapshot,
    last_event_id: Option<EventId>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Watch Summary");
    let _ = writeln!(out, "=============");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Events received: {} ({} unique paths, {} batches)",
        events.total_events, events.unique_paths, delivery.batches
    );
    for kind in EventKind::ALL {
        let count = events.count(kind);
        if count > 0 {
            let _ = writeln!(out, "  {:<10} {count}", kind.label());
        }
    }
    if delivery.handler_panics > 0 {
        let _ = writeln!(out, "Handler panics:  {}", delivery.handler_panics);
    }
    let _ = writeln!(out);
    match last_event_id {
        Some(id) => {
            let _ = write!(out, "Last event id: {id}");
        }
        None => {
            let _ = write!(out, "No events delivered.");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use fsw_watcher::RawNotification;

    use super::*;

    fn event(path: &str, flags: EventFlags, id: u64) -> ClassifiedEvent {
        RawNotification::new(path, flags, EventId::new(id)).classify()
    }

    #[test]
    fn test_tags_have_equal_width() {
        for kind in EventKind::ALL {
            assert_eq!(tag(kind).len(), 11, "{kind}");
        }
    }

    #[test]
    fn test_render_text() {
        let output = OutputConfig::default();
        let line = render_event(&event("/w/a.txt", EventFlags::ITEM_REMOVED, 100), &output).unwrap();
        insta::assert_snapshot!(line, @"[ removed ] - /w/a.txt");
    }

    #[test]
    fn test_render_text_with_flags() {
        let output = OutputConfig {
            show_flags: true,
            ..OutputConfig::default()
        };
        let flags = EventFlags::ITEM_CREATED | EventFlags::IS_DIR;
        let line = render_event(&event("/w/dir", flags, 7), &output).unwrap();
        insta::assert_snapshot!(line, @"[ created ] - /w/dir  (ITEM_CREATED | IS_DIR)");
    }

    #[test]
    fn test_render_json() {
        let output = OutputConfig {
            format: OutputFormat::Json,
            ..OutputConfig::default()
        };
        let line = render_event(&event("/w", EventFlags::empty(), 3), &output).unwrap();
        insta::assert_snapshot!(
            line,
            @r#"{"path":"/w","kind":"rescan_required","event_id":3,"flags":0}"#
        );
    }

    #[test]
    fn test_render_explanation() {
        let text = render_explanation(EventFlags::ITEM_CREATED | EventFlags::ITEM_INODE_META_MOD);
        insta::assert_snapshot!(text, @r"
        bits:  0x00000500
        flags: ITEM_CREATED | ITEM_INODE_META_MOD
        rule:  #3 attribute change
        kind:  [attribute] attribute
        ");
    }

    #[test]
    fn test_render_explanation_fallback() {
        let text = render_explanation(EventFlags::IS_FILE);
        assert!(text.contains("rule:  - fallback"));
        assert!(text.ends_with("[  other  ] other"));
    }

    #[test]
    fn test_render_summary() {
        let events = vec![
            event("/w/a", EventFlags::ITEM_CREATED, 10),
            event("/w/a", EventFlags::ITEM_MODIFIED, 11),
            event("/w/b", EventFlags::ITEM_REMOVED, 12),
        ];
        let stats = EventBatchStats::from_events(&events);
        let delivery = DeliverySnapshot {
            batches: 2,
            events: 3,
            last_event_id: Some(EventId::new(12)),
            ..DeliverySnapshot::default()
        };
        let text = render_summary(&stats, &delivery, delivery.last_event_id);
        insta::assert_snapshot!(text, @r"
        Watch Summary
        =============

        Events received: 3 (2 unique paths, 2 batches)
          created    1
          modified   1
          removed    1

        Last event id: 12
        ");
    }

    #[test]
    fn test_render_summary_without_events() {
        let text = render_summary(&EventBatchStats::default(), &DeliverySnapshot::default(), None);
        assert!(text.ends_with("No events delivered."));
    }
}
