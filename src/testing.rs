//! Test doubles shared by unit tests.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::transport::{Connector, Transport};

/// Connector whose transports never receive and accept every send.
#[derive(Clone, Default)]
pub(crate) struct SilentConnector {
    pub(crate) sent: Arc<StdMutex<Vec<String>>>,
}

pub(crate) struct SilentTransport {
    sent: Arc<StdMutex<Vec<String>>>,
}

#[async_trait]
impl Transport for SilentTransport {
    async fn send(&mut self, message: String) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Connector for SilentConnector {
    type Transport = SilentTransport;

    async fn connect(&self) -> Result<SilentTransport> {
        Ok(SilentTransport {
            sent: Arc::clone(&self.sent),
        })
    }
}
