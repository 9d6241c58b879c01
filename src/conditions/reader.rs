//! Conditions bound to a data reader.

use super::condition::{Attachment, Condition, Interest, WaitSetId, Waker};
use crate::domain::ReaderEndpoint;
use crate::error::Result;
use crate::status::StatusMask;
use std::sync::Arc;

/// Triggers while the reader holds samples that have not been taken.
pub struct ReadCondition {
    reader: Arc<dyn ReaderEndpoint>,
    attachment: Attachment,
}

impl ReadCondition {
    pub(crate) fn new(reader: Arc<dyn ReaderEndpoint>) -> Self {
        Self {
            reader,
            attachment: Attachment::new(),
        }
    }
}

impl Condition for ReadCondition {
    fn trigger_value(&self) -> Result<bool> {
        self.reader.health()?;
        Ok(self.reader.has_samples())
    }

    fn on_attach(&self, waitset: WaitSetId, waker: Waker) -> Result<()> {
        self.attachment.claim(waitset, "read condition")?;
        self.reader
            .wakers()
            .register(self.attachment.key(), Interest::Data, waker);
        Ok(())
    }

    fn on_detach(&self, waitset: WaitSetId) {
        if self.attachment.release(waitset) {
            self.reader.wakers().unregister(self.attachment.key());
        }
    }

    fn describe(&self) -> String {
        format!("read condition on {}", self.reader.topic_name())
    }
}

/// Triggers while a status in its enabled mask has changed and not been read.
pub struct StatusCondition {
    reader: Arc<dyn ReaderEndpoint>,
    enabled: StatusMask,
    attachment: Attachment,
}

impl StatusCondition {
    pub(crate) fn new(reader: Arc<dyn ReaderEndpoint>, enabled: StatusMask) -> Self {
        Self {
            reader,
            enabled,
            attachment: Attachment::new(),
        }
    }

    pub fn enabled_statuses(&self) -> StatusMask {
        self.enabled
    }
}

impl Condition for StatusCondition {
    fn trigger_value(&self) -> Result<bool> {
        self.reader.health()?;
        Ok(self.reader.status_changes().intersects(self.enabled))
    }

    fn on_attach(&self, waitset: WaitSetId, waker: Waker) -> Result<()> {
        self.attachment.claim(waitset, "status condition")?;
        self.reader.wakers().register(
            self.attachment.key(),
            Interest::Status(self.enabled),
            waker,
        );
        Ok(())
    }

    fn on_detach(&self, waitset: WaitSetId) {
        if self.attachment.release(waitset) {
            self.reader.wakers().unregister(self.attachment.key());
        }
    }

    fn describe(&self) -> String {
        format!("status condition on {}", self.reader.topic_name())
    }
}
