use std::sync::mpsc::Sender;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NoticeLevel {
    Success,
    Info,
    Danger,
}

/// A transient user-facing message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct Notifier {
    sender: Option<Sender<Notice>>,
}

impl Notifier {
    pub fn new(sender: Sender<Notice>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn silent() -> Self {
        Self { sender: None }
    }

    pub fn success(&self, message: impl Into<String>) {
        self.send(NoticeLevel::Success, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(NoticeLevel::Info, message.into());
    }

    pub fn danger(&self, message: impl Into<String>) {
        self.send(NoticeLevel::Danger, message.into());
    }

    fn send(&self, level: NoticeLevel, message: String) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Notice { level, message });
        }
    }
}
