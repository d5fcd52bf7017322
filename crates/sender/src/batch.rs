//! Concurrent multi-file sends.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::capability::FileSender;
use crate::payload::{TransferPayload, describe, dispatch};

/// Result of one payload in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub label: String,
    pub status: String,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> bool {
        !self.status.starts_with("Send failed")
    }
}

/// Sends every payload on its own task and its own connection.
///
/// A failing or panicking task only affects its own outcome. Outcomes are
/// returned in input order.
pub async fn send_all(
    sender: Arc<dyn FileSender>,
    payloads: Vec<TransferPayload>,
) -> Vec<BatchOutcome> {
    let mut outcomes: Vec<BatchOutcome> = payloads
        .iter()
        .map(|payload| BatchOutcome {
            label: describe(payload),
            status: "Send failed: task aborted".to_string(),
        })
        .collect();

    let mut tasks = JoinSet::new();
    for (index, payload) in payloads.into_iter().enumerate() {
        let sender = Arc::clone(&sender);
        tasks.spawn(async move { (index, dispatch(sender.as_ref(), payload).await) });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, status)) => {
                debug!(label = %outcomes[index].label, %status, "batch item finished");
                outcomes[index].status = status;
            }
            Err(e) => error!(error = %e, "batch send task failed"),
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use snapbeam_protocol::DEFAULT_MIME;
    use snapbeam_receiver::{NoImport, Receiver};
    use snapbeam_transport::{FsStorage, SessionToken};

    use super::*;
    use crate::capability::{SendFuture, SendRequest};
    use crate::tcp::TcpSender;

    struct Flaky;

    impl FileSender for Flaky {
        fn send(&self, request: SendRequest) -> SendFuture<'_> {
            Box::pin(async move {
                if request.filename == "boom" {
                    panic!("sender exploded");
                }
                format!("Server replied: got {}", request.filename)
            })
        }

        fn send_file_stream<'a>(&'a self, _: &'a Path, _: Option<&'a str>) -> SendFuture<'a> {
            Box::pin(async { "Send failed: no streams here".to_string() })
        }
    }

    fn memory(name: &str, data: &[u8]) -> TransferPayload {
        TransferPayload::Memory {
            data: data.to_vec(),
            filename: name.into(),
            mime: DEFAULT_MIME.into(),
        }
    }

    #[tokio::test]
    async fn panics_and_failures_stay_isolated() {
        let outcomes = send_all(
            Arc::new(Flaky),
            vec![
                memory("first", b"1"),
                memory("boom", b"2"),
                TransferPayload::Stream {
                    location: PathBuf::from("/x/clip.mov"),
                    filename: None,
                },
                memory("last", b"4"),
            ],
        )
        .await;

        let statuses: Vec<&str> = outcomes.iter().map(|o| o.status.as_str()).collect();
        assert_eq!(
            statuses,
            vec![
                "Server replied: got first",
                "Send failed: task aborted",
                "Send failed: no streams here",
                "Server replied: got last",
            ]
        );
        assert!(outcomes[0].succeeded());
        assert!(!outcomes[1].succeeded());
    }

    #[tokio::test]
    async fn concurrent_sends_each_use_their_own_connection() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = Receiver::new(Arc::new(FsStorage::new(dir.path())), Arc::new(NoImport));
        let mut handle = receiver.start(0, SessionToken::from("abc")).await.unwrap();
        let sender = TcpSender::new("127.0.0.1", handle.local_addr().port(), SessionToken::from("abc"));

        let payloads: Vec<TransferPayload> = (0..8)
            .map(|i| memory(&format!("file{i}.bin"), &vec![i as u8; 1000 + i]))
            .collect();
        let outcomes = send_all(Arc::new(sender), payloads).await;

        assert!(outcomes.iter().all(BatchOutcome::succeeded), "{outcomes:?}");
        for _ in 0..8 {
            handle.next_report().await.unwrap();
        }
        for i in 0..8usize {
            let data = std::fs::read(dir.path().join(format!("file{i}.bin"))).unwrap();
            assert_eq!(data, vec![i as u8; 1000 + i]);
        }
    }
}
