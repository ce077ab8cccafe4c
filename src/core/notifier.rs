/*
 * Batch notification. A `MessageBuffer` accumulates summary lines while a batch of
 * clients is processed; `flush` hands the whole digest to an injected notifier once
 * and empties the buffer. The shipped notifier writes the digest to the log; mail
 * transport is left to other `NotifierOperations` implementations.
 */
use std::fmt;

#[derive(Debug)]
pub struct NotifyError(pub String);

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notification failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

pub trait NotifierOperations: Send + Sync {
    fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Default, Clone)]
pub struct MessageBuffer {
    lines: Vec<String>,
    client: Option<String>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    // Subsequent lines are prefixed with the client id until cleared with `None`.
    pub fn set_client(&mut self, client: Option<&str>) {
        self.client = client.map(str::to_string);
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        match &self.client {
            Some(client) => self.lines.push(format!("{client}: {line}")),
            None => self.lines.push(line),
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.client = None;
    }

    pub fn flush(
        &mut self,
        recipient: &str,
        subject: &str,
        notifier: &dyn NotifierOperations,
    ) -> Result<(), NotifyError> {
        if self.lines.is_empty() {
            log::debug!("MessageBuffer: Nothing to send for '{subject}'.");
            return Ok(());
        }
        let body = self.lines.join("\n");
        self.lines.clear();
        notifier.notify(recipient, subject, &body)
    }
}

pub struct LogNotifier {
    smtp: String,
}

impl LogNotifier {
    pub fn new(smtp: &str) -> Self {
        LogNotifier {
            smtp: smtp.to_string(),
        }
    }
}

impl NotifierOperations for LogNotifier {
    fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        log::info!(
            "LogNotifier: Notification for {recipient} (via {}) subject '{subject}':",
            self.smtp
        );
        for line in body.lines() {
            log::info!("LogNotifier: | {line}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl NotifierOperations for RecordingNotifier {
        fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push((
                recipient.to_string(),
                subject.to_string(),
                body.to_string(),
            ));
            Ok(())
        }
    }

    #[test]
    fn test_flush_sends_digest_once_and_clears() {
        let notifier = RecordingNotifier::default();
        let mut buffer = MessageBuffer::new();
        buffer.set_client(Some("esme"));
        buffer.push("Success");
        buffer.set_client(None);
        buffer.push("done");

        buffer.flush("ops@example.org", "run: rubac:esme", &notifier).unwrap();
        buffer.flush("ops@example.org", "run: rubac:esme", &notifier).unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].2, "esme: Success\ndone");
    }
}
