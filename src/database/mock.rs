//! In-memory connector for unit tests.

use crate::database::connection::{Connector, Session};
use crate::database::query::{ResultRow, Statement};
use crate::error::ProviderError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Responder = dyn Fn(&Statement) -> Result<Vec<ResultRow>, ProviderError> + Send + Sync;

/// Connector that answers statements from a closure and records them.
#[derive(Clone)]
pub struct RecordingConnector {
    responder: Arc<Responder>,
    log: Arc<Mutex<Vec<Statement>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl RecordingConnector {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Statement) -> Result<Vec<ResultRow>, ProviderError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            log: Arc::new(Mutex::new(Vec::new())),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// SQL text of every statement run so far.
    pub fn statements(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.sql.clone())
            .collect()
    }

    /// Every statement run so far, with parameters.
    pub fn recorded(&self) -> Vec<Statement> {
        self.log.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, ProviderError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingSession {
            connector: self.clone(),
        }))
    }
}

struct RecordingSession {
    connector: RecordingConnector,
}

#[async_trait]
impl Session for RecordingSession {
    async fn fetch(&mut self, statement: &Statement) -> Result<Vec<ResultRow>, ProviderError> {
        self.connector.log.lock().unwrap().push(statement.clone());
        // Suspend like a network round trip so concurrent callers interleave
        tokio::task::yield_now().await;
        (self.connector.responder)(statement)
    }

    async fn close(self: Box<Self>) -> Result<(), ProviderError> {
        Ok(())
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.connector.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector whose connections always fail.
pub struct FailingConnector;

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, ProviderError> {
        Err(ProviderError::connection("Login failed for user 'api'"))
    }
}
