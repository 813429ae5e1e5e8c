use crate::{CheckResult, Shell};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use std::sync::Arc;

/// Lifecycle of a single check inside a QA batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QaEvent {
    PreCheck {
        check: Shell,
    },
    CheckError {
        check: Shell,
        error: String,
    },
    PostCheck {
        check: Shell,
        result: CheckResult,
    },
}

impl QaEvent {
    pub fn check(&self) -> &Shell {
        match self {
            Self::PreCheck { check }
            | Self::CheckError { check, .. }
            | Self::PostCheck { check, .. } => check,
        }
    }
}

/// Batch controls observers may change while an event is delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunControl {
    pub abort_on_error: bool,
}

pub trait QaEventObserver: Send + Sync {
    fn on_event(&self, event: &QaEvent, control: &mut RunControl);
}

impl<F> QaEventObserver for F
where
    F: Fn(&QaEvent, &mut RunControl) + Send + Sync,
{
    fn on_event(&self, event: &QaEvent, control: &mut RunControl) {
        self(event, control);
    }
}

pub type SharedQaEventObserver = Arc<dyn QaEventObserver>;
pub type QaEventSender = mpsc::UnboundedSender<QaEvent>;
pub type QaEventReceiver = mpsc::UnboundedReceiver<QaEvent>;

/// Fans QA events out to observers, in registration order, and to an
/// optional channel. Only observers can influence the batch.
#[derive(Clone, Default)]
pub struct QaEventSink {
    observers: Vec<SharedQaEventObserver>,
    sender: Option<QaEventSender>,
}

impl QaEventSink {
    pub fn with_observer(observer: SharedQaEventObserver) -> Self {
        Self {
            observers: vec![observer],
            sender: None,
        }
    }

    pub fn with_sender(sender: QaEventSender) -> Self {
        Self {
            observers: Vec::new(),
            sender: Some(sender),
        }
    }

    pub fn observer(mut self, observer: SharedQaEventObserver) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn sender(mut self, sender: QaEventSender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.observers.is_empty() || self.sender.is_some()
    }

    pub fn emit(&self, event: QaEvent, control: &mut RunControl) {
        for observer in &self.observers {
            observer.on_event(&event, control);
        }
        if let Some(sender) = self.sender.as_ref() {
            let _ = sender.send(event);
        }
    }
}

pub fn qa_event_channel() -> (QaEventSender, QaEventReceiver) {
    mpsc::unbounded_channel()
}
