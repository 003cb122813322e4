use std::time::Duration;

use crate::error::{ErrorKind, RpcError};
use crate::rpc::codec::RpcClient;
use crate::rpc::modules::media_file_find::{self, Condition, FileInfo};

/// Batched file listing backed by a device-side `mediaFileFind` instance.
///
/// The instance is closed and destroyed once the listing is exhausted or a
/// call fails. Callers that stop early must call [`FileStream::close`].
#[derive(Debug)]
pub struct FileStream<'a, C: RpcClient + ?Sized> {
    client: &'a C,
    object: i64,
    count: i64,
    close_timeout: Duration,
    exhausted: bool,
    closed: bool,
}

impl<'a, C: RpcClient + ?Sized> FileStream<'a, C> {
    pub async fn open(
        client: &'a C,
        condition: &Condition,
        count: i64,
        close_timeout: Duration,
    ) -> Result<Self, RpcError> {
        let object = media_file_find::create(client).await?;
        let mut stream = Self {
            client,
            object,
            count,
            close_timeout,
            exhausted: false,
            closed: false,
        };

        match media_file_find::find_file(client, object, condition).await {
            Ok(found) => stream.exhausted = !found,
            Err(err) if err.is_kind(ErrorKind::NoData) => stream.exhausted = true,
            Err(err) => {
                stream.close().await;
                return Err(err);
            }
        }

        Ok(stream)
    }

    /// Next non-empty batch, or `None` when the listing is done.
    pub async fn next(&mut self) -> Result<Option<Vec<FileInfo>>, RpcError> {
        if self.exhausted || self.closed {
            self.close().await;
            return Ok(None);
        }

        let result = match media_file_find::find_next_file(self.client, self.object, self.count).await {
            Ok(result) => result,
            Err(err) => {
                self.close().await;
                return Err(err);
            }
        };

        let infos = match result.infos {
            Some(infos) if !infos.is_empty() => infos,
            _ => {
                self.close().await;
                return Ok(None);
            }
        };

        if result.found < self.count {
            self.exhausted = true;
        }
        Ok(Some(infos))
    }

    /// Best-effort release of the device-side instance.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let client = self.client;
        let object = self.object;
        let release = async move {
            media_file_find::close(client, object).await?;
            media_file_find::destroy(client, object).await
        };
        match tokio::time::timeout(self.close_timeout, release).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                tracing::debug!(target: "scan::engine", object, error = %err, "failed to release file listing");
            }
            Err(_) => {
                tracing::debug!(target: "scan::engine", object, "timed out releasing file listing");
            }
        }
    }
}
