//! Operator notifications for fired alerts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;

const RELAY_TIMEOUT: Duration = Duration::from_secs(15);

/// What an operator is told about a fired alert.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertNotice {
    pub location: String,
    pub threshold: u32,
    pub count: u32,
    /// Human-readable local time of the alert.
    pub timestamp: String,
    /// Evidence image attached to the message.
    pub evidence_path: PathBuf,
}

impl AlertNotice {
    pub fn subject(&self) -> String {
        format!("\u{26a0}\u{fe0f} Crowd Density Alert: {}", self.location)
    }

    pub fn html_body(&self) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; background-color: #f9f9f9; padding: 20px; color: #333;">
<div style="background-color: #ffffff; border: 1px solid #e0e0e0; border-left: 5px solid #e53935; padding: 20px; max-width: 600px; margin: auto;">
  <div style="font-size: 22px; font-weight: bold; color: #d32f2f;">Crowd Density Alert</div>
  <div style="margin-top: 15px; font-size: 16px; line-height: 1.6;">
    The monitoring system has detected an unusually high crowd density.
    <ul>
      <li>Location: <b style="color: #1565c0;">{location}</b></li>
      <li>Threshold: <b>{threshold}</b></li>
      <li>Count: <b style="color: #e53935;">{count}</b></li>
      <li>Time: <b>{timestamp}</b></li>
    </ul>
    The current crowd level has <b style="color: #e53935;">exceeded</b> the configured safety threshold.
    Please notify security personnel or take appropriate crowd-control measures.
  </div>
  <div style="margin-top: 30px; font-size: 12px; color: #999999; text-align: center;">
    Automated notification from Crowd Sentinel. Please do not reply.
  </div>
</div>
</body>
</html>
"#,
            location = escape_html(&self.location),
            threshold = self.threshold,
            count = self.count,
            timestamp = escape_html(&self.timestamp),
        )
    }
}

/// Delivers alert notices. An empty recipient list is a no-op.
pub trait Notifier: Send + Sync {
    fn send(&self, notice: &AlertNotice, sender: &str, recipients: &[String]) -> Result<()>;
}

/// Posts the message to an HTTP mail relay as a multipart form with fields
/// `subject`, `html`, `from`, `to` and the evidence image as `attachment`.
pub struct MailRelayNotifier {
    endpoint: String,
    client: Client,
}

impl MailRelayNotifier {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(RELAY_TIMEOUT)
            .build()
            .context("build mail relay client")?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

impl Notifier for MailRelayNotifier {
    fn send(&self, notice: &AlertNotice, sender: &str, recipients: &[String]) -> Result<()> {
        if recipients.is_empty() {
            log::info!("no email recipients configured; skipping notification");
            return Ok(());
        }
        let attachment = read_attachment(&notice.evidence_path)?;
        let filename = notice
            .evidence_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("evidence.jpg")
            .to_string();

        let form = Form::new()
            .text("subject", notice.subject())
            .text("html", notice.html_body())
            .text("from", sender.to_string())
            .text("to", recipients.join(", "))
            .part(
                "attachment",
                Part::bytes(attachment)
                    .file_name(filename)
                    .mime_str("image/jpeg")?,
            );

        let resp = self
            .client
            .post(self.endpoint.as_str())
            .multipart(form)
            .send()
            .map_err(|e| anyhow!("mail relay unreachable: {}", e))?;
        if !resp.status().is_success() {
            return Err(anyhow!(
                "mail relay rejected alert email with status {}",
                resp.status()
            ));
        }
        log::info!(
            "alert email for {} sent to {} recipient(s)",
            notice.location,
            recipients.len()
        );
        Ok(())
    }
}

/// Notifier used when no mail relay is configured.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notice: &AlertNotice, sender: &str, recipients: &[String]) -> Result<()> {
        if recipients.is_empty() {
            return Ok(());
        }
        log::warn!(
            "{} (count {} / threshold {} at {}), from {} to {}, evidence {}",
            notice.subject(),
            notice.count,
            notice.threshold,
            notice.timestamp,
            sender,
            recipients.join(", "),
            notice.evidence_path.display()
        );
        Ok(())
    }
}

fn read_attachment(path: &Path) -> Result<Vec<u8>> {
    if !path.is_file() {
        return Err(anyhow!(
            "evidence file {} not found for email attachment",
            path.display()
        ));
    }
    std::fs::read(path).with_context(|| format!("read attachment {}", path.display()))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(path: PathBuf) -> AlertNotice {
        AlertNotice {
            location: "Gate <A>".to_string(),
            threshold: 10,
            count: 14,
            timestamp: "2026-10-18 12:00:00".to_string(),
            evidence_path: path,
        }
    }

    #[test]
    fn subject_names_location() {
        let n = notice(PathBuf::from("x.jpg"));
        assert!(n.subject().ends_with("Crowd Density Alert: Gate <A>"));
    }

    #[test]
    fn body_escapes_and_includes_counts() {
        let body = notice(PathBuf::from("x.jpg")).html_body();
        assert!(body.contains("Gate &lt;A&gt;"));
        assert!(body.contains("<b>10</b>"));
        assert!(body.contains(">14</b>"));
    }

    #[test]
    fn empty_recipients_is_noop() -> Result<()> {
        // Unroutable endpoint: any network attempt would fail.
        let relay = MailRelayNotifier::new("http://127.0.0.1:9/send")?;
        relay.send(&notice(PathBuf::from("missing.jpg")), "a@b.c", &[])?;
        Ok(())
    }

    #[test]
    fn missing_attachment_is_an_error() -> Result<()> {
        let relay = MailRelayNotifier::new("http://127.0.0.1:9/send")?;
        let err = relay
            .send(
                &notice(PathBuf::from("/nonexistent/alert.jpg")),
                "a@b.c",
                &["ops@example.com".to_string()],
            )
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        Ok(())
    }

    #[test]
    fn relay_receives_fields_and_attachment() -> Result<()> {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        let dir = tempfile::tempdir()?;
        let shot = dir.path().join("alert_cam_1_2026_10_18_12_00_00.jpg");
        std::fs::write(&shot, b"jpeg-evidence")?;

        let listener = TcpListener::bind("127.0.0.1:0")?;
        let relay = MailRelayNotifier::new(format!("http://{}/send", listener.local_addr()?))?;
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().expect("accept");
            conn.set_read_timeout(Some(Duration::from_secs(5))).expect("timeout");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while let Ok(n) = conn.read(&mut buf) {
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request.ends_with(b"--\r\n") {
                    break;
                }
            }
            conn.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .expect("reply");
            String::from_utf8_lossy(&request).into_owned()
        });

        relay.send(&notice(shot), "sentinel@example.com", &["a@x.io".into(), "b@x.io".into()])?;
        let request = server.join().expect("server");
        assert!(request.contains("name=\"subject\""));
        assert!(request.contains("name=\"to\"\r\n\r\na@x.io, b@x.io"));
        assert!(request.contains("name=\"from\"\r\n\r\nsentinel@example.com"));
        assert!(request.contains("filename=\"alert_cam_1_2026_10_18_12_00_00.jpg\""));
        assert!(request.contains("jpeg-evidence"));
        Ok(())
    }
}
