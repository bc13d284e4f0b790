//! Recording native driver for connection-opener tests.
//!
//! Captures every `ConnectionRequest` it is handed (connection string,
//! attribute ids and the raw access token blob) so tests can assert on
//! exactly what would have reached the real driver.

use async_trait::async_trait;
use common::secret::ExposeSecret;
use data_api::db::{ConnectionRequest, DbConnection, DriverError, NativeDriver};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One captured connect call.
#[derive(Debug, Clone)]
pub struct RecordedConnect {
    pub connection_string: String,
    pub attribute_keys: Vec<i32>,
    /// Raw bytes of the access token attribute, if present.
    pub access_token_blob: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
enum Behavior {
    /// Connect succeeds; the probe query returns this value.
    Succeed(Option<Value>),
    /// Connect fails with a message that echoes the decoded token.
    FailEchoingToken,
    /// Connect succeeds but every query fails.
    QueryFails,
    /// Connect hangs for the given time, then reports its own timeout.
    Stall(Duration),
}

#[derive(Debug, Default)]
struct Recording {
    connects: Vec<RecordedConnect>,
    queries: Vec<String>,
    closes: usize,
}

/// A `NativeDriver` that records instead of connecting.
#[derive(Debug, Clone)]
pub struct MockDriver {
    behavior: Behavior,
    recording: Arc<Mutex<Recording>>,
}

impl MockDriver {
    /// Connects; the probe query returns `value` (`None` = no rows).
    pub fn returning(value: Option<Value>) -> Self {
        Self {
            behavior: Behavior::Succeed(value),
            recording: Arc::default(),
        }
    }

    /// Connect fails with an error quoting the access token.
    pub fn failing_with_token_echo() -> Self {
        Self {
            behavior: Behavior::FailEchoingToken,
            recording: Arc::default(),
        }
    }

    /// Connects, but queries fail.
    pub fn with_failing_query() -> Self {
        Self {
            behavior: Behavior::QueryFails,
            recording: Arc::default(),
        }
    }

    /// Connect waits `bound`, then fails the way a login timeout does.
    pub fn stalling(bound: Duration) -> Self {
        Self {
            behavior: Behavior::Stall(bound),
            recording: Arc::default(),
        }
    }

    pub fn connects(&self) -> Vec<RecordedConnect> {
        self.recording.lock().unwrap().connects.clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.recording.lock().unwrap().queries.clone()
    }

    pub fn close_count(&self) -> usize {
        self.recording.lock().unwrap().closes
    }
}

#[async_trait]
impl NativeDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, request: ConnectionRequest) -> Result<Box<dyn DbConnection>, DriverError> {
        let recorded = RecordedConnect {
            connection_string: request.connection_string().to_string(),
            attribute_keys: request.attribute_keys(),
            access_token_blob: request.access_token().map(|b| b.expose_bytes().to_vec()),
        };
        self.recording.lock().unwrap().connects.push(recorded);

        match &self.behavior {
            Behavior::FailEchoingToken => {
                let token = request
                    .access_token()
                    .ok_or(DriverError::MissingAccessToken)?
                    .decode()?;
                Err(DriverError::Database(format!(
                    "Login failed for token '{}'",
                    token.expose_secret()
                )))
            }
            Behavior::Succeed(value) => Ok(Box::new(MockConnection {
                result: Ok(value.clone()),
                recording: self.recording.clone(),
            })),
            Behavior::QueryFails => Ok(Box::new(MockConnection {
                result: Err("Invalid object name 'SelectionHistory'".to_string()),
                recording: self.recording.clone(),
            })),
            Behavior::Stall(bound) => {
                tokio::time::sleep(*bound).await;
                Err(DriverError::Timeout(*bound))
            }
        }
    }
}

struct MockConnection {
    result: Result<Option<Value>, String>,
    recording: Arc<Mutex<Recording>>,
}

#[async_trait]
impl DbConnection for MockConnection {
    async fn query_first_value(&mut self, sql: &str) -> Result<Option<Value>, DriverError> {
        self.recording.lock().unwrap().queries.push(sql.to_string());
        self.result.clone().map_err(DriverError::Database)
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.recording.lock().unwrap().closes += 1;
        Ok(())
    }
}
