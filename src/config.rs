use std::{collections::HashMap, net::SocketAddr};

use anyhow::{bail, Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use url::Url;

use crate::protocol::codec::MeiligaoCodec;
use crate::report::PROTOCOL;
use crate::session::ServerConfig;


pub type DeviceStream = Framed<TcpStream, MeiligaoCodec>;


/// Where the server accepts device connections.
pub enum Listener {
    Tcp(TcpListener),
}

impl Listener {
    pub async fn bind(url: &Url) -> Result<Self> {
        match url.scheme() {
            "tcp" => {
                let host = url.host_str()
                    .with_context(|| format!("tcp requires a host to be specified in the url: {url}"))?;

                let port = url.port()
                    .with_context(|| format!("tcp requires a port number to be specified in the url: {url}"))?;

                let listener = TcpListener::bind((host, port)).await
                    .with_context(|| format!("failed to listen on: {url}"))?;

                Ok(Self::Tcp(listener))
            },
            other => {
                bail!("url scheme {other} not supported");
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self {
            Listener::Tcp(listener) => Ok(listener.local_addr()?),
        }
    }

    /// Wait for the next device and wrap its socket in the frame codec.
    pub async fn accept(&self) -> Result<(DeviceStream, SocketAddr, SocketAddr)> {
        match self {
            Listener::Tcp(listener) => {
                let (socket, remote) = listener.accept().await?;

                socket.set_nodelay(true)?;
                let local = socket.local_addr()?;

                Ok((Framed::new(socket, MeiligaoCodec::new()), local, remote))
            }
        }
    }
}


/// Server addresses handed out to devices asking where to report, per protocol.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    servers: HashMap<String, String>,
}

impl Settings {
    pub fn new(server: Option<String>) -> Self {
        let mut settings = Self::default();
        if let Some(server) = server {
            settings.set_server(PROTOCOL, server);
        }
        settings
    }

    pub fn set_server(&mut self, protocol: impl Into<String>, address: impl Into<String>) {
        self.servers.insert(protocol.into(), address.into());
    }
}

impl ServerConfig for Settings {
    fn server_address(&self, protocol: &str) -> Option<String> {
        self.servers.get(protocol).cloned()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_address_per_protocol() {
        let settings = Settings::new(Some("203.0.113.7:5009".to_owned()));

        assert_eq!(settings.server_address("meiligao").as_deref(), Some("203.0.113.7:5009"));
        assert_eq!(settings.server_address("other"), None);
        assert_eq!(Settings::new(None).server_address("meiligao"), None);
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_urls() {
        let url = Url::parse("udp://127.0.0.1:5009").unwrap();
        assert!(Listener::bind(&url).await.is_err());

        let url = Url::parse("tcp://127.0.0.1").unwrap();
        assert!(Listener::bind(&url).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_any_port() {
        let url = Url::parse("tcp://127.0.0.1:0").unwrap();
        let listener = Listener::bind(&url).await.unwrap();

        assert!(listener.local_addr().unwrap().port() != 0);
    }
}
