//! Transport port: the delivery path handing a command to the remote
//! processing backend.

use std::future::Future;
use std::sync::Arc;

use voxline_domain::command::{Command, DeliveryReceipt};

/// Why a delivery attempt did not produce a receipt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    /// The session broke or the acknowledgement never arrived. The backend
    /// may still have received the command.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Delivers commands to the remote backend.
///
/// The command `id` travels with every attempt so the receiving side can
/// drop duplicates after a redelivery.
pub trait Transport: Send + Sync {
    /// Whether a delivery attempted now has a chance to succeed.
    fn is_available(&self) -> bool;

    /// Deliver `command` and wait for its acknowledgement.
    fn deliver(
        &self,
        command: &Command,
    ) -> impl Future<Output = Result<DeliveryReceipt, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn deliver(
        &self,
        command: &Command,
    ) -> impl Future<Output = Result<DeliveryReceipt, TransportError>> + Send {
        (**self).deliver(command)
    }
}

/// Supplies the bearer credential attached to outbound requests.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A credential fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }
}

impl CredentialProvider for StaticCredential {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}
