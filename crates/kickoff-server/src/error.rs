use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("IO error on {addr}: {source}")]
    Io {
        addr: SocketAddr,
        source: std::io::Error,
    },
}
