use crate::radius::{AdapterError, RadiusAdapter};
use eap_proto::{Code, Packet, PacketError};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// UDP listener answering EAP Access-Requests
pub struct RadiusServer {
    socket: Arc<UdpSocket>,
    adapter: Arc<RadiusAdapter>,
    secret: Arc<[u8]>,
}

impl RadiusServer {
    pub async fn new(
        bind_addr: SocketAddr,
        adapter: Arc<RadiusAdapter>,
        secret: impl Into<Vec<u8>>,
    ) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        info!("RADIUS server listening on {}", bind_addr);

        let secret: Vec<u8> = secret.into();
        Ok(RadiusServer {
            socket: Arc::new(socket),
            adapter,
            secret: Arc::from(secret),
        })
    }

    /// Get the local address the server is listening on
    ///
    /// This is useful for testing when binding to port 0 (OS-assigned port)
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.socket.local_addr().map_err(ServerError::from)
    }

    /// Start the server and handle incoming requests
    pub async fn run(&self) -> Result<(), ServerError> {
        let mut buf = vec![0u8; Packet::MAX_PACKET_SIZE];

        loop {
            let (len, addr) = self.socket.recv_from(&mut buf).await?;
            let data = buf[..len].to_vec();

            let adapter = Arc::clone(&self.adapter);
            let socket = Arc::clone(&self.socket);
            let secret = Arc::clone(&self.secret);

            tokio::spawn(async move {
                if let Err(e) = Self::handle_request(data, addr, adapter, socket, secret).await {
                    debug!("Error handling request from {}: {}", addr, e);
                }
            });
        }
    }

    async fn handle_request(
        data: Vec<u8>,
        addr: SocketAddr,
        adapter: Arc<RadiusAdapter>,
        socket: Arc<UdpSocket>,
        secret: Arc<[u8]>,
    ) -> Result<(), ServerError> {
        let request = Packet::decode(&data)?;

        debug!(
            packet_type = ?request.code,
            client_addr = %addr,
            request_id = request.identifier,
            "Received RADIUS packet"
        );

        if request.code != Code::AccessRequest {
            warn!(packet_type = ?request.code, client_addr = %addr, "Unsupported packet type");
            return Ok(());
        }

        let response = adapter.handle(&request, &secret).await?;
        let response_data = response.encode()?;
        socket.send_to(&response_data, addr).await?;

        debug!(
            response_type = ?response.code,
            client_addr = %addr,
            request_id = response.identifier,
            "Sent RADIUS response"
        );

        Ok(())
    }
}
