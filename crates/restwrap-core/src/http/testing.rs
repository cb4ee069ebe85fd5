//! In-memory transport used by unit tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::http::response::RawResponse;
use crate::http::transport::{Transport, TransportError, TransportRequest};

type Outcome = Result<RawResponse, TransportError>;
type Responder = Box<dyn Fn(&TransportRequest, usize) -> Outcome + Send + Sync>;

/// Transport that answers from a script and records every request it sees
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Outcome>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<TransportRequest>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    /// Answer with `responses` in order; fail once they run out
    pub(crate) fn new(responses: Vec<Outcome>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            responder: None,
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Answer every request through `f`, which also gets the zero-based call index
    pub(crate) fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&TransportRequest, usize) -> Outcome + Send + Sync + 'static,
    {
        Self {
            script: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(f)),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep before answering, to widen race windows
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Outcome {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(responder) = &self.responder {
            return responder(&request, index);
        }

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(TransportError::new(format!("no scripted response for call {index}")))
            })
    }
}
