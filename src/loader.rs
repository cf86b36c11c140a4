use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::FetchError;
use crate::inventory::{InventorySource, NodeRecord};
use crate::nav::{FetchRequest, Ticket};

/// Answer to one [`FetchRequest`], tagged with its ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub ticket: Ticket,
    pub result: Result<Vec<NodeRecord>, FetchError>,
}

/// Runs inventory queries on a worker thread so the UI never blocks on the
/// backend. Requests are served in submission order.
pub struct BackgroundLoader {
    requests: Sender<FetchRequest>,
    responses: Receiver<FetchResponse>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundLoader {
    pub fn spawn(source: Arc<dyn InventorySource>) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<FetchRequest>();
        let (response_tx, response_rx) = mpsc::channel();

        let worker = thread::spawn(move || {
            for request in request_rx {
                let result = source.execute(&request.query);
                if let Err(err) = &result {
                    tracing::debug!(ticket = request.ticket, %err, "fetch failed");
                }
                let response = FetchResponse {
                    ticket: request.ticket,
                    result,
                };
                if response_tx.send(response).is_err() {
                    break;
                }
            }
        });

        Self {
            requests: request_tx,
            responses: response_rx,
            worker: Some(worker),
        }
    }

    pub fn submit(&self, request: FetchRequest) -> Result<(), FetchError> {
        self.requests
            .send(request)
            .map_err(|_| FetchError::Backend("loader worker exited".to_string()))
    }

    /// Next finished response, without waiting.
    pub fn try_recv(&self) -> Option<FetchResponse> {
        match self.responses.try_recv() {
            Ok(response) => Some(response),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<FetchResponse> {
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Some(response),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Drop for BackgroundLoader {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        let (closed, _) = mpsc::channel();
        drop(std::mem::replace(&mut self.requests, closed));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{FetchQuery, MemoryInventory};

    fn loader() -> BackgroundLoader {
        let mut inventory = MemoryInventory::new();
        inventory.insert(NodeRecord::directory("/r", 3, &["/r/a"]));
        inventory.insert(NodeRecord::file("/r/a", 3));
        BackgroundLoader::spawn(Arc::new(inventory))
    }

    #[test]
    fn test_responses_carry_ticket() {
        let loader = loader();
        loader
            .submit(FetchRequest {
                ticket: 7,
                query: FetchQuery::Path("/r".to_string()),
            })
            .unwrap();
        let response = loader.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(response.ticket, 7);
        assert_eq!(response.result.unwrap()[0].path, "/r");
    }

    #[test]
    fn test_missing_path_is_error() {
        let loader = loader();
        loader
            .submit(FetchRequest {
                ticket: 1,
                query: FetchQuery::Path("/nope".to_string()),
            })
            .unwrap();
        let response = loader.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(response.result, Err(FetchError::NotFound("/nope".to_string())));
        assert!(loader.try_recv().is_none());
    }

    #[test]
    fn test_requests_served_in_order() {
        let loader = loader();
        for ticket in 1..=3 {
            loader
                .submit(FetchRequest {
                    ticket,
                    query: FetchQuery::Path("/r/a".to_string()),
                })
                .unwrap();
        }
        let tickets: Vec<Ticket> = (0..3)
            .map(|_| loader.recv_timeout(Duration::from_secs(5)).unwrap().ticket)
            .collect();
        assert_eq!(tickets, vec![1, 2, 3]);
    }

    #[test]
    fn test_drop_with_pending_requests_joins_worker() {
        let loader = loader();
        for ticket in 0..16 {
            loader
                .submit(FetchRequest {
                    ticket,
                    query: FetchQuery::Ids(vec!["/r".to_string(), "/r/a".to_string()]),
                })
                .unwrap();
        }
        drop(loader);
    }
}
