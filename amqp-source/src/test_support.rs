//! In-memory links, sinks and link factories for unit tests

use crate::connection::LinkFactory;
use crate::dispatcher::{DispatchReceipt, EventSink};
use crate::error::DispatchError;
use crate::event::Event;
use crate::link::{MessageLink, Received};
use crate::message::InboundMessage;
use crate::settlement::Disposition;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Link replaying queued messages, then waiting forever
#[derive(Debug, Default)]
pub(crate) struct FakeLink {
    pub(crate) inbox: VecDeque<Result<InboundMessage>>,
    pub(crate) settled: Vec<(u64, Disposition)>,
    pub(crate) fail_settle: bool,
    next_tag: u64,
}

impl FakeLink {
    pub(crate) fn with_messages(messages: Vec<InboundMessage>) -> Self {
        Self {
            inbox: messages.into_iter().map(Ok).collect(),
            ..Default::default()
        }
    }

    /// Link whose first receive fails with `err`
    pub(crate) fn failing(err: Error) -> Self {
        let mut link = Self::default();
        link.inbox.push_back(Err(err));
        link
    }
}

#[async_trait]
impl MessageLink for FakeLink {
    type Delivery = u64;

    async fn receive(&mut self) -> Result<Received<u64>> {
        match self.inbox.pop_front() {
            Some(Ok(message)) => {
                self.next_tag += 1;
                Ok(Received {
                    message,
                    delivery: self.next_tag,
                })
            }
            Some(Err(e)) => Err(e),
            None => std::future::pending().await,
        }
    }

    async fn settle(&mut self, delivery: u64, disposition: Disposition) -> Result<()> {
        if self.fail_settle {
            return Err(Error::Settlement("link detached".into()));
        }
        self.settled.push((delivery, disposition));
        Ok(())
    }
}

/// Sink answering with scripted outcomes, success once the script runs out
#[derive(Debug, Default)]
pub(crate) struct FakeSink {
    script: Mutex<VecDeque<std::result::Result<(), DispatchError>>>,
    pub(crate) events: Mutex<Vec<Event>>,
}

impl FakeSink {
    pub(crate) fn scripted(script: Vec<std::result::Result<(), DispatchError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            events: Mutex::default(),
        })
    }
}

#[async_trait]
impl EventSink for FakeSink {
    async fn dispatch(&self, event: Event) -> std::result::Result<DispatchReceipt, DispatchError> {
        self.events.lock().unwrap().push(event);
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        next.map(|_| DispatchReceipt {
            status: StatusCode::OK,
        })
    }
}

/// Factory handing out scripted connect outcomes
#[derive(Debug, Default)]
pub(crate) struct FakeFactory {
    script: Mutex<VecDeque<Result<FakeLink>>>,
    pub(crate) connects: Mutex<u32>,
    pub(crate) released: Mutex<Vec<FakeLink>>,
}

impl FakeFactory {
    pub(crate) fn scripted(script: Vec<Result<FakeLink>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub(crate) fn connects(&self) -> u32 {
        *self.connects.lock().unwrap()
    }
}

#[async_trait]
impl LinkFactory for FakeFactory {
    type Link = FakeLink;

    async fn connect(&self) -> Result<FakeLink> {
        *self.connects.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(Error::Connection("connection refused".into())))
    }

    async fn release(&self, link: FakeLink) {
        self.released.lock().unwrap().push(link);
    }
}
