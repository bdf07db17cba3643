//! adb server client
//!
//! Speaks the host protocol to the local adb server. Each request uses a
//! fresh TCP connection, as the adb server closes or repurposes the socket
//! after answering.

use crate::config::AdbSettings;
use common::{Error, Result};
use protocol::host;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Handle to the adb server; cheap to clone
#[derive(Clone)]
pub struct AdbClient {
    settings: Arc<AdbSettings>,
}

impl AdbClient {
    pub fn new(settings: AdbSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &AdbSettings {
        &self.settings
    }

    /// Open a connection to the adb server
    async fn connect(&self) -> Result<TcpStream> {
        let addr = self.settings.server_addr.as_str();
        let stream = tokio::time::timeout(self.settings.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Network(format!("Timed out connecting to adb server at {}", addr)))?
            .map_err(|e| Error::Network(format!("Cannot reach adb server at {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Send one request and check its status word
    async fn request(stream: &mut TcpStream, request: &str) -> Result<()> {
        trace!("adb request: {}", request);
        host::write_request(stream, request).await?;
        host::read_status(stream)
            .await?
            .map_err(|message| Error::Adb(format!("{}: {}", request, message)))
    }

    /// Send a host query and read its length-prefixed reply
    pub async fn query(&self, request: &str) -> Result<String> {
        let mut stream = self.connect().await?;
        Self::request(&mut stream, request).await?;
        Ok(host::read_string(&mut stream).await?)
    }

    /// adb server protocol version
    pub async fn version(&self) -> Result<u32> {
        let reply = self.query("host:version").await?;
        u32::from_str_radix(reply.trim(), 16)
            .map_err(|_| Error::Adb(format!("Unexpected version reply: {:?}", reply)))
    }

    /// Connect to the device's transport; the stream is ready for a service request
    pub async fn transport(&self, serial: &str) -> Result<TcpStream> {
        let mut stream = self.connect().await?;
        Self::request(&mut stream, &format!("host:transport:{}", serial)).await?;
        Ok(stream)
    }

    /// Open `service` on the device and return the raw service stream
    pub async fn open_service(&self, serial: &str, service: &str) -> Result<TcpStream> {
        let mut stream = self.transport(serial).await?;
        Self::request(&mut stream, service).await?;
        debug!("Opened service '{}' on {}", service, serial);
        Ok(stream)
    }

    /// Run a shell command and collect its output
    pub async fn shell(&self, serial: &str, command: &str) -> Result<String> {
        let mut stream = self
            .open_service(serial, &format!("shell:{}", command))
            .await?;
        let mut output = Vec::new();
        stream.read_to_end(&mut output).await?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Transport features supported by the device
    pub async fn features(&self, serial: &str) -> Result<Vec<String>> {
        let reply = self
            .query(&format!("host-serial:{}:features", serial))
            .await?;
        Ok(reply
            .trim()
            .split(',')
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Start streaming device-list snapshots
    pub async fn track_devices(&self) -> Result<TcpStream> {
        let mut stream = self.connect().await?;
        Self::request(&mut stream, "host:track-devices").await?;
        Ok(stream)
    }

    /// Run `adb start-server`
    pub async fn start_server(&self) -> Result<()> {
        let output = tokio::process::Command::new(&self.settings.adb_path)
            .arg("start-server")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::Adb(format!(
                    "Failed to run '{} start-server': {}",
                    self.settings.adb_path, e
                ))
            })?;

        if !output.status.success() {
            return Err(Error::Adb(format!(
                "'{} start-server' exited with {}: {}",
                self.settings.adb_path,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}
