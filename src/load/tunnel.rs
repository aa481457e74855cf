/// SSH local port forward to the database host.
///
/// Spawns the system `ssh` client with `-N -L` and waits until the forwarded
/// port accepts connections. The forward lives exactly as long as the
/// `SshTunnel` value; dropping it kills the ssh process.

use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::LoadError;
use crate::config::TunnelSettings;
use crate::logging::{self, Stage};

const READY_POLL: Duration = Duration::from_millis(100);

pub struct SshTunnel {
    child: Child,
    local_port: u16,
}

/// Asks the OS for a free loopback port.
fn free_local_port() -> Result<u16, LoadError> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|e| LoadError::Tunnel(format!("no free local port: {}", e)))?;
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| LoadError::Tunnel(e.to_string()))
}

/// Arguments for `ssh` forwarding `127.0.0.1:local_port` to
/// `remote_host:remote_port` as seen from the bastion.
pub fn ssh_args(
    settings: &TunnelSettings,
    remote_host: &str,
    remote_port: u16,
    local_port: u16,
) -> Vec<String> {
    vec![
        "-N".to_string(),
        "-o".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-i".to_string(),
        settings.private_key.display().to_string(),
        "-p".to_string(),
        settings.port.to_string(),
        "-L".to_string(),
        format!("127.0.0.1:{}:{}:{}", local_port, remote_host, remote_port),
        format!("{}@{}", settings.user, settings.host),
    ]
}

impl SshTunnel {
    pub fn open(
        settings: &TunnelSettings,
        remote_host: &str,
        remote_port: u16,
        ready_timeout: Duration,
    ) -> Result<Self, LoadError> {
        let local_port = free_local_port()?;
        let child = Command::new("ssh")
            .args(ssh_args(settings, remote_host, remote_port, local_port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| LoadError::Tunnel(format!("could not start ssh: {}", e)))?;

        let mut tunnel = SshTunnel { child, local_port };
        tunnel.wait_ready(ready_timeout)?;
        logging::debug(
            Stage::Database,
            None,
            &format!("Tunnel up: 127.0.0.1:{} → {}:{}", local_port, remote_host, remote_port),
        );
        Ok(tunnel)
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<(), LoadError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.local_port));
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(LoadError::Tunnel(format!("ssh exited early ({})", status)));
            }
            if TcpStream::connect_timeout(&addr, READY_POLL).is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LoadError::Tunnel(format!(
                    "forward on port {} not ready after {}s (timeout)",
                    self.local_port,
                    timeout.as_secs()
                )));
            }
            thread::sleep(READY_POLL);
        }
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
