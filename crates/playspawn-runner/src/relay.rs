//! Relay of playbook-level events to progress observers.

use playspawn_types::{Event, ProgressEvent, ProgressSignal};
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use crate::runner::EventHook;

/// Remove ANSI escape sequences from engine output.
pub fn clean_output(text: &str) -> String {
    strip_ansi_escapes::strip_str(text)
}

/// The progress message for an event, if it is one observers should see.
///
/// Only playbook-level events are relayed. The message is the event kind,
/// followed by `": "` and the cleaned output when there is any.
pub fn progress_message(event: &Event) -> Option<ProgressEvent> {
    if !event.is_playbook_level() {
        return None;
    }
    let message = match event.output() {
        Some(text) => format!("{}: {}", event.kind, clean_output(text)),
        None => event.kind.clone(),
    };
    Some(ProgressEvent::new(message))
}

/// Build an event hook that forwards progress messages onto `tx`.
///
/// Safe to call from the engine worker thread. Messages sent after the
/// receiver is gone are dropped.
pub fn progress_relay(tx: UnboundedSender<ProgressSignal>) -> EventHook {
    Box::new(move |event: &Event| {
        if let Some(progress) = progress_message(event)
            && tx.send(progress.into()).is_err()
        {
            trace!(event = %event.kind, "Progress receiver closed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_clean_output_strips_ansi() {
        assert_eq!(clean_output("\x1b[0;32mok: [localhost]\x1b[0m"), "ok: [localhost]");
        assert_eq!(clean_output("plain"), "plain");
    }

    #[test]
    fn test_progress_message_formats() {
        let with_output = Event::new("playbook_on_task_start").with_stdout("\x1b[1mTASK [x]\x1b[0m");
        assert_eq!(
            progress_message(&with_output).unwrap().message,
            "playbook_on_task_start: TASK [x]"
        );

        let empty_output = Event::new("playbook_on_start").with_stdout("");
        assert_eq!(
            progress_message(&empty_output).unwrap().message,
            "playbook_on_start"
        );

        assert!(progress_message(&Event::new("runner_on_ok").with_stdout("ok")).is_none());
    }

    #[test]
    fn test_relay_forwards_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hook = progress_relay(tx);
        hook(&Event::new("playbook_on_start"));
        hook(&Event::new("runner_on_start"));
        hook(&Event::new("playbook_on_stats").with_stdout("PLAY RECAP"));

        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressSignal::Event(ProgressEvent::new("playbook_on_start"))
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressSignal::Event(ProgressEvent::new("playbook_on_stats: PLAY RECAP"))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_relay_survives_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut hook = progress_relay(tx);
        hook(&Event::new("playbook_on_start"));
    }
}
