//! Share-link page served to plain (non-upgrade) HTTP requests.

use crate::auth::{Credentials, CHALLENGE};
use crate::config::RelayConfig;
use crate::transport::{write_response, RequestHead};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Host used in the link when the request carries no `Host` header.
const FALLBACK_HOST: &str = "localhost";

/// Build the client share link for a relay reachable at `host`.
pub fn share_link(config: &RelayConfig, host: &str) -> String {
    format!(
        "{scheme}://{uuid}@{host}?path={path}&security=none&encryption=none&type=ws#node-ws-{host}",
        scheme = config.link_scheme,
        uuid = config.uuid,
        path = urlencoding::encode(&config.ws_path),
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub fn render(link: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Config</title></head>
<body>
  <p>Click to copy:</p>
  <pre id="configLink" style="background-color:#f0f0f0; padding:10px; cursor:pointer;">{link}</pre>
  <p id="copyStatus"></p>
  <script>
    document.getElementById('configLink').addEventListener('click', function() {{
      navigator.clipboard.writeText(this.textContent).then(() => {{
        document.getElementById('copyStatus').textContent = 'Copied!';
        setTimeout(() => {{ document.getElementById('copyStatus').textContent = ''; }}, 2000);
      }}).catch(() => {{
        document.getElementById('copyStatus').textContent = 'Failed to copy!';
      }});
    }});
  </script>
</body>
</html>
"#,
        link = escape_html(link)
    )
}

fn authorized(config: &RelayConfig, head: &RequestHead) -> bool {
    if !config.page_auth {
        return true;
    }
    head.header("authorization")
        .and_then(|value| Credentials::from_header(value).ok())
        .is_some_and(|c| c.username == config.web_username && c.password == config.web_password)
}

/// Answer a plain HTTP request and close the connection.
pub async fn serve<W>(config: &RelayConfig, head: &RequestHead, stream: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if !authorized(config, head) {
        debug!(path = %head.path(), "link page: authentication required");
        write_response(
            stream,
            401,
            "Unauthorized",
            &[
                ("WWW-Authenticate", CHALLENGE),
                ("Content-Type", "text/plain; charset=utf-8"),
            ],
            "Authentication required.",
        )
        .await?;
    } else if !head.method.eq_ignore_ascii_case("GET") {
        write_response(
            stream,
            404,
            "Not Found",
            &[("Content-Type", "text/plain; charset=utf-8")],
            "Not Found",
        )
        .await?;
    } else {
        let host = head.header("host").unwrap_or(FALLBACK_HOST);
        let body = render(&share_link(config, host));
        write_response(
            stream,
            200,
            "OK",
            &[("Content-Type", "text/html; charset=utf-8")],
            &body,
        )
        .await?;
    }
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, ConfigOverrides};
    use crate::transport::read_request_head;

    fn config(page_auth: bool) -> RelayConfig {
        RelayConfig::resolve(
            ConfigFile::default(),
            ConfigOverrides {
                page_auth: Some(page_auth),
                ..Default::default()
            },
        )
        .unwrap()
    }

    async fn head(raw: &str) -> RequestHead {
        let mut input = raw.as_bytes();
        read_request_head(&mut input).await.unwrap()
    }

    async fn respond(config: &RelayConfig, raw: &str) -> String {
        let head = head(raw).await;
        let mut out = Vec::new();
        serve(config, &head, &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn share_link_uses_hyphenated_uuid_and_encoded_path() {
        let link = share_link(&config(true), "relay.example:443");
        assert_eq!(
            link,
            "vless://37a0bd7c-8b9f-4693-8916-bd1e2da0a817@relay.example:443\
             ?path=%2F37a0bd7c8b9f46938916bd1e2da0a817\
             &security=none&encryption=none&type=ws#node-ws-relay.example:443"
        );
    }

    #[test]
    fn render_escapes_link() {
        let page = render("a<b>&\"");
        assert!(page.contains("a&lt;b&gt;&amp;&quot;"));
        assert!(!page.contains("a<b>"));
    }

    #[tokio::test]
    async fn page_requires_credentials() {
        let response = respond(&config(true), "GET / HTTP/1.1\r\nHost: h\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(response.contains("WWW-Authenticate: Basic realm=\"Node\"\r\n"));
        assert!(response.ends_with("Authentication required."));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let auth = Credentials::new("admin", "nope").to_header();
        let raw = format!("GET / HTTP/1.1\r\nHost: h\r\nAuthorization: {auth}\r\n\r\n");
        let response = respond(&config(true), &raw).await;
        assert!(response.starts_with("HTTP/1.1 401"));
    }

    #[tokio::test]
    async fn valid_credentials_get_the_link() {
        let auth = Credentials::new("admin", "password").to_header();
        let raw = format!("GET /anything HTTP/1.1\r\nHost: node.test\r\nAuthorization: {auth}\r\n\r\n");
        let response = respond(&config(true), &raw).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("text/html"));
        assert!(response.contains("vless://37a0bd7c-8b9f-4693-8916-bd1e2da0a817@node.test?"));
        assert!(response.contains("#node-ws-node.test"));
    }

    #[tokio::test]
    async fn page_auth_can_be_disabled() {
        let response = respond(&config(false), "GET / HTTP/1.1\r\nHost: h\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn non_get_is_not_found() {
        let response = respond(&config(false), "POST / HTTP/1.1\r\nHost: h\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }
}
