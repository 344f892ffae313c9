use serde::Serialize;

/// Receives progress updates from long-running stages. Delivery is fire-and-forget.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, task_type: &str, message: &str, percent: u8);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _task_type: &str, _message: &str, _percent: u8) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub task_type: String,
    pub message: String,
    pub percent: u8,
}

/// Forwards progress into a channel; a closed receiver is ignored.
pub struct ChannelProgress {
    tx: std::sync::mpsc::Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: std::sync::mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, task_type: &str, message: &str, percent: u8) {
        let _ = self.tx.send(ProgressEvent {
            task_type: task_type.to_string(),
            message: message.to_string(),
            percent,
        });
    }
}

pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}
