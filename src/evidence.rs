//! Alert evidence storage.
//!
//! Evidence images are written atomically to a local screenshot directory and
//! optionally pushed to an HTTP upload endpoint. The public evidence URL is
//! derived from that endpoint.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SCREENSHOT_DIR: &str = "screenshots";
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Evidence store capability.
pub trait EvidenceStore: Send + Sync {
    /// Persist `bytes` locally under `name` and return the written path.
    fn save_local(&self, bytes: &[u8], name: &str) -> Result<PathBuf>;

    /// Upload `bytes` to the remote endpoint. `Ok(false)` means the server
    /// rejected it; transport failures are errors.
    fn upload(&self, bytes: &[u8], name: &str) -> Result<bool>;

    /// Public URL the uploaded evidence will be served from, if any.
    fn evidence_url(&self, _name: &str) -> Option<String> {
        None
    }
}

#[derive(Clone, Debug)]
pub struct EvidenceConfig {
    pub local_dir: PathBuf,
    pub upload_endpoint: Option<String>,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            local_dir: PathBuf::from(DEFAULT_SCREENSHOT_DIR),
            upload_endpoint: None,
        }
    }
}

pub struct LocalEvidenceStore {
    root: PathBuf,
    upload: Option<(String, Client)>,
}

impl LocalEvidenceStore {
    pub fn new(cfg: EvidenceConfig) -> Result<Self> {
        fs::create_dir_all(&cfg.local_dir).with_context(|| {
            format!("create screenshot directory {}", cfg.local_dir.display())
        })?;
        let upload = match cfg
            .upload_endpoint
            .filter(|endpoint| !endpoint.trim().is_empty())
        {
            Some(endpoint) => {
                let client = Client::builder()
                    .timeout(UPLOAD_TIMEOUT)
                    .build()
                    .context("build evidence upload client")?;
                Some((endpoint, client))
            }
            None => None,
        };
        Ok(Self {
            root: cfg.local_dir,
            upload,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl EvidenceStore for LocalEvidenceStore {
    fn save_local(&self, bytes: &[u8], name: &str) -> Result<PathBuf> {
        let name = sanitize_evidence_name(name)?;
        let path = self.root.join(name);
        write_atomic(&path, bytes)
            .with_context(|| format!("write evidence {}", path.display()))?;
        log::info!("evidence saved locally at {}", path.display());
        Ok(path)
    }

    fn upload(&self, bytes: &[u8], name: &str) -> Result<bool> {
        let Some((endpoint, client)) = self.upload.as_ref() else {
            return Ok(false);
        };
        let name = sanitize_evidence_name(name)?;
        let form = Form::new().part(
            "file",
            Part::bytes(bytes.to_vec())
                .file_name(name.clone())
                .mime_str("image/jpeg")?,
        );
        log::info!("uploading evidence {} to {}", name, endpoint);
        let resp = client
            .post(endpoint.as_str())
            .multipart(form)
            .send()
            .map_err(|e| anyhow!("evidence upload of {} failed: {}", name, e))?;
        if !resp.status().is_success() {
            log::error!(
                "evidence upload of {} rejected with status {}",
                name,
                resp.status()
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn evidence_url(&self, name: &str) -> Option<String> {
        self.upload
            .as_ref()
            .map(|(endpoint, _)| evidence_url(endpoint, name))
    }
}

/// `<endpoint without "/upload/">/uploads/<name>`.
pub fn evidence_url(endpoint: &str, name: &str) -> String {
    let base = endpoint.replace("/upload/", "");
    format!("{}/uploads/{}", base.trim_end_matches('/'), name)
}

fn sanitize_evidence_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("evidence name cannot be empty"));
    }
    if trimmed.starts_with('.')
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(anyhow!("evidence name must be [A-Za-z0-9._-] only"));
    }
    Ok(trimmed.to_string())
}

/// Write via a sibling temp file and rename, so readers never see a partial file.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_local_writes_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalEvidenceStore::new(EvidenceConfig {
            local_dir: dir.path().join("shots"),
            upload_endpoint: None,
        })?;
        let path = store.save_local(b"jpeg", "alert_cam_1_2024_01_01_00_00_00.jpg")?;
        assert_eq!(fs::read(&path)?, b"jpeg");
        assert!(path.starts_with(store.root()));
        Ok(())
    }

    #[test]
    fn rejects_path_traversal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalEvidenceStore::new(EvidenceConfig {
            local_dir: dir.path().to_path_buf(),
            upload_endpoint: None,
        })?;
        assert!(store.save_local(b"x", "../escape.jpg").is_err());
        assert!(store.save_local(b"x", "").is_err());
        Ok(())
    }

    #[test]
    fn upload_without_endpoint_is_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalEvidenceStore::new(EvidenceConfig {
            local_dir: dir.path().to_path_buf(),
            upload_endpoint: Some("  ".to_string()),
        })?;
        assert!(!store.upload(b"x", "a.jpg")?);
        assert!(store.evidence_url("a.jpg").is_none());
        Ok(())
    }

    /// One-shot HTTP server: answers `status` and hands back the raw request.
    fn serve_once(status: u16) -> Result<(String, std::thread::JoinHandle<Vec<u8>>)> {
        use std::io::Read;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}/upload/", listener.local_addr()?);
        let handle = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().expect("accept upload");
            conn.set_read_timeout(Some(Duration::from_secs(5))).expect("timeout");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = match conn.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            let reply = format!(
                "HTTP/1.1 {} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            conn.write_all(reply.as_bytes()).expect("reply");
            request
        });
        Ok((url, handle))
    }

    #[test]
    fn upload_posts_multipart_jpeg() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (url, server) = serve_once(200)?;
        let store = LocalEvidenceStore::new(EvidenceConfig {
            local_dir: dir.path().to_path_buf(),
            upload_endpoint: Some(url),
        })?;
        assert!(store.upload(b"\xFF\xD8jpeg-bytes", "alert_cam_1_x.jpg")?);

        let request = String::from_utf8_lossy(&server.join().expect("server")).into_owned();
        assert!(request.starts_with("POST /upload/"));
        assert!(request.to_ascii_lowercase().contains("content-type: multipart/form-data; boundary="));
        assert!(request.contains("name=\"file\"; filename=\"alert_cam_1_x.jpg\""));
        assert!(request.contains("Content-Type: image/jpeg"));
        assert!(request.contains("jpeg-bytes"));
        Ok(())
    }

    #[test]
    fn rejected_upload_reports_false() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (url, server) = serve_once(500)?;
        let store = LocalEvidenceStore::new(EvidenceConfig {
            local_dir: dir.path().to_path_buf(),
            upload_endpoint: Some(url),
        })?;
        assert!(!store.upload(b"x", "a.jpg")?);
        server.join().expect("server");
        Ok(())
    }

    #[test]
    fn evidence_url_strips_upload_segment() {
        assert_eq!(
            evidence_url("http://10.0.0.5:8000/upload/", "a.jpg"),
            "http://10.0.0.5:8000/uploads/a.jpg"
        );
    }
}
