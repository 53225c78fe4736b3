//! Transport to the counterparty.
//!
//! The byte-level format is up to the implementation, the protocol only
//! needs request/response semantics for updates.

use core::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::{channel::ChannelUpdate, error::InboundChannelUpdateError, sig::Identifier};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    /// No response within the given timeout.
    #[error("timed out waiting for counterparty")]
    Timeout,

    /// The counterparty's inbound handler rejected the update.
    #[error(transparent)]
    Rejected(Box<InboundChannelUpdateError>),

    #[error("transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Messaging: Send + Sync + fmt::Debug {
    /// Sends a (single-signed) update together with our latest update and
    /// waits for the counterparty's double-signed answer.
    async fn send(
        &self,
        to: Identifier,
        update: ChannelUpdate,
        previous_update: Option<ChannelUpdate>,
        timeout: Duration,
    ) -> Result<ChannelUpdate, MessagingError>;
}
