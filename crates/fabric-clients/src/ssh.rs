//! OpenSSH-backed remote shell
//!
//! Commands run through the system `ssh` binary with key-only, non-interactive
//! authentication. The private key is written to a 0600 temporary file that
//! lives as long as the command.

use crate::error::FabricError;
use crate::fabric_trait::{RemoteProcess, RemoteShell, SshTarget};
use std::io::Write;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

pub const SSH_PORT: u16 = 22;
/// Connect timeout handed to ssh, independent of command run time
pub const SSH_CONNECT_TIMEOUT_SECS: u64 = 15;
/// TCP reachability probe timeout
pub const SSH_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Remote shell using the local OpenSSH client
#[derive(Debug, Clone)]
pub struct OpenSshShell {
    binary: String,
}

impl Default for OpenSshShell {
    fn default() -> Self {
        Self { binary: "ssh".to_string() }
    }
}

impl OpenSshShell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific ssh binary
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn write_key(target: &SshTarget) -> Result<NamedTempFile, FabricError> {
        let mut key = NamedTempFile::new()?;
        key.write_all(target.private_key.as_bytes())?;
        if !target.private_key.ends_with('\n') {
            key.write_all(b"\n")?;
        }
        key.flush()?;
        Ok(key)
    }

    fn command(&self, target: &SshTarget, key: &NamedTempFile, command: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-i")
            .arg(key.path())
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", "LogLevel=ERROR"])
            .arg("-o")
            .arg(format!("ConnectTimeout={SSH_CONNECT_TIMEOUT_SECS}"))
            .arg("-p")
            .arg(SSH_PORT.to_string())
            .arg(format!("{}@{}", target.user, target.host))
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl RemoteShell for OpenSshShell {
    async fn port_open(&self, host: &str) -> bool {
        matches!(
            tokio::time::timeout(SSH_PROBE_TIMEOUT, TcpStream::connect((host, SSH_PORT))).await,
            Ok(Ok(_))
        )
    }

    async fn run(&self, target: &SshTarget, command: &str) -> Result<String, FabricError> {
        let key = Self::write_key(target)?;
        debug!("Running remote command on {}", target.host);
        let output = self.command(target, &key, command).output().await?;
        if !output.status.success() {
            return Err(FabricError::Remote(format!(
                "failed to run command {} on host {}: {}: {}",
                command,
                target.host,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn start(&self, target: &SshTarget, command: &str) -> Result<Box<dyn RemoteProcess>, FabricError> {
        let key = Self::write_key(target)?;
        debug!("Starting remote command on {}", target.host);
        let mut child = self
            .command(target, &key, command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = Arc::new(Mutex::new(String::new()));
        let stderr = Arc::new(Mutex::new(String::new()));
        let readers = [
            child.stdout.take().map(|out| spawn_reader(out, Arc::clone(&stdout))),
            child.stderr.take().map(|err| spawn_reader(err, Arc::clone(&stderr))),
        ];
        Ok(Box::new(OpenSshProcess {
            child,
            stdout,
            stderr,
            readers,
            host: target.host.clone(),
            _key: key,
        }))
    }
}

fn spawn_reader<R>(mut source: R, sink: Arc<Mutex<String>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        while let Ok(n) = source.read(&mut buf).await {
            if n == 0 {
                break;
            }
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    })
}

struct OpenSshProcess {
    child: Child,
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
    readers: [Option<JoinHandle<()>>; 2],
    host: String,
    _key: NamedTempFile,
}

#[async_trait::async_trait]
impl RemoteProcess for OpenSshProcess {
    fn output(&self) -> String {
        self.stdout.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn wait(mut self: Box<Self>) -> Result<String, FabricError> {
        let status = self.child.wait().await?;
        for reader in self.readers.iter_mut().filter_map(Option::take) {
            // Reader tasks end at EOF once the process has exited
            let _ = reader.await;
        }
        let stdout = self.output();
        if !status.success() {
            let stderr = self.stderr.lock().unwrap_or_else(PoisonError::into_inner).clone();
            return Err(FabricError::Remote(format!(
                "command on host {} exited with {}: {}",
                self.host,
                status,
                stderr.trim()
            )));
        }
        Ok(stdout)
    }
}
