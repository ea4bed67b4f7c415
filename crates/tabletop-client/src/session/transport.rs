//! WebSocket transport binding for [`Session`].

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tabletop_core::errors::SessionError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use super::Session;

impl Session {
    /// Open a WebSocket to `url` and pump frames until it closes.
    ///
    /// Returns once the socket is open. The returned handle completes after
    /// the connection ends and [`Session::handle_close`] has run.
    #[instrument(skip_all, fields(identity = %self.config.identity, url = %url))]
    pub async fn connect(self: &Arc<Self>, url: &str) -> Result<JoinHandle<()>, SessionError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (tx, mut rx) = mpsc::channel::<String>(self.config.send_queue);
        self.on_transport_open(tx);

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let session = Arc::clone(self);
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let _ = session.handle_text(&text);
                    }
                    Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            let _ = session.handle_text(text);
                        }
                        Err(_) => warn!("dropping non-UTF-8 binary frame"),
                    },
                    Ok(Message::Close(_)) => {
                        debug!("close frame received");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "transport error");
                        break;
                    }
                }
            }
            session.handle_close();
            let _ = writer.await;
        });

        info!("connected");
        Ok(reader)
    }

    /// Close the outbound side. The reader finishes when the peer closes.
    pub fn disconnect(&self) {
        if self.outbound.lock().take().is_some() {
            debug!(identity = %self.config.identity, "disconnect requested");
        }
    }
}
