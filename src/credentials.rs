use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::BootstrapError;

/// Local copy of the issued certificate and private key, read by the TLS listener.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CredentialStore {
    pub fn new(cert_path: PathBuf, key_path: PathBuf) -> Self {
        Self {
            cert_path,
            key_path,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.cert_path(), cfg.key_path())
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Write PEM certificate and key, creating parent directories as needed.
    pub async fn store(&self, cert: &[u8], key: &[u8]) -> Result<(), BootstrapError> {
        write_file(&self.cert_path, cert, 0o644).await?;
        write_file(&self.key_path, key, 0o600).await?;
        info!(
            "wrote tls material to {} and {}",
            self.cert_path.display(),
            self.key_path.display()
        );
        Ok(())
    }

    /// Both files must exist and be non-empty before the TLS listener starts.
    pub async fn verify(&self) -> Result<(), BootstrapError> {
        for path in [&self.cert_path, &self.key_path] {
            let meta = tokio::fs::metadata(path)
                .await
                .map_err(|source| BootstrapError::Io {
                    path: path.clone(),
                    source,
                })?;
            if meta.len() == 0 {
                return Err(BootstrapError::Io {
                    path: path.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, "file is empty"),
                });
            }
        }
        Ok(())
    }
}

async fn write_file(path: &Path, data: &[u8], mode: u32) -> Result<(), BootstrapError> {
    let io_err = |source| BootstrapError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    }
    tokio::fs::write(path, data).await.map_err(io_err)?;
    set_mode(path, mode).await.map_err(io_err)
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
