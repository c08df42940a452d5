use std::io;

/// Failures of a listener or of a single device connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Covers both the TCP accept and the WebSocket upgrade.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] io::Error),

    #[error("frame of {0} bytes exceeds the limit of {max} bytes", max = crate::MAX_FRAME_LEN)]
    FrameTooLarge(usize),
}
