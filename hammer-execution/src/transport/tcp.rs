//! NETCONF 1.0 over plain TCP
//!
//! Messages are delimited with the `]]>]]>` end-of-message marker. The
//! server speaks first with its `<hello>`, which carries the session id.
//! Credentials are not used; this transport targets simulators and lab
//! devices that expose NETCONF without SSH.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Credentials, Endpoint, RpcReply, Session, Transport};
use crate::error::TransportError;

const DELIMITER: &[u8] = b"]]>]]>";
const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Dials NETCONF sessions over TCP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn dial(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn Session>, TransportError> {
        let address = endpoint.to_string();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| TransportError::Dial {
                endpoint: address.clone(),
                message: format!("connect timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| TransportError::Dial {
                endpoint: address.clone(),
                message: e.to_string(),
            })?;

        let (read, write) = stream.into_split();
        let mut framed = Framed {
            reader: BufReader::new(read),
            writer: write,
        };

        let hello = framed.read_message().await?;
        let id = parse_session_id(&hello)?;
        framed
            .write_message(&format!(
                r#"{}<hello xmlns="{}"><capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities></hello>"#,
                XML_DECL, BASE_NS
            ))
            .await?;

        debug!("Established session {} with {}", id, address);
        Ok(Arc::new(TcpSession {
            id,
            framed: Mutex::new(framed),
            next_message_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        }))
    }
}

struct Framed {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Framed {
    async fn write_message(&mut self, message: &str) -> Result<(), TransportError> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(DELIMITER).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        loop {
            let read = self.reader.read_until(b'>', &mut buf).await?;
            if read == 0 {
                return Err(TransportError::Io("connection closed by peer".to_string()));
            }
            if buf.ends_with(DELIMITER) {
                buf.truncate(buf.len() - DELIMITER.len());
                return String::from_utf8(buf)
                    .map_err(|e| TransportError::Protocol(format!("reply is not UTF-8: {}", e)));
            }
        }
    }
}

/// One NETCONF session over a TCP connection
pub struct TcpSession {
    id: u64,
    framed: Mutex<Framed>,
    next_message_id: AtomicU64,
    alive: AtomicBool,
}

/// Marks a session dead unless the exchange it guards ran to completion
///
/// A call dropped between writing its request and reading the reply
/// leaves that reply queued on the wire, so the session cannot be reused.
struct InFlight<'a> {
    alive: &'a AtomicBool,
    completed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.alive.store(false, Ordering::Relaxed);
        }
    }
}

impl TcpSession {
    async fn exchange(&self, body: &str) -> Result<(String, String), TransportError> {
        // one request in flight per session
        let mut framed = self.framed.lock().await;
        // the previous holder may have been cancelled mid-exchange
        if !self.is_alive() {
            return Err(TransportError::Closed(self.id));
        }
        let mut in_flight = InFlight {
            alive: &self.alive,
            completed: false,
        };

        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed).to_string();
        let request = format!(
            r#"{}<rpc message-id="{}" xmlns="{}">{}</rpc>"#,
            XML_DECL, message_id, BASE_NS, body
        );
        framed.write_message(&request).await?;
        let reply = framed.read_message().await?;

        if let Some(replied) = reply_message_id(&reply) {
            if replied != message_id {
                warn!(
                    session = self.id,
                    "Reply message-id {} does not match request {}", replied, message_id
                );
                return Err(TransportError::Protocol(format!(
                    "reply message-id {} does not match request {}",
                    replied, message_id
                )));
            }
        }

        in_flight.completed = true;
        Ok((message_id, reply))
    }
}

#[async_trait]
impl Session for TcpSession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn call(&self, request: &str) -> Result<RpcReply, TransportError> {
        let (message_id, reply) = self.exchange(request).await?;
        let data = parse_reply(&reply)?;
        Ok(RpcReply { message_id, data })
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.alive.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        let mut framed = self.framed.lock().await;
        let request = format!(
            r#"{}<rpc message-id="{}" xmlns="{}"><close-session/></rpc>"#,
            XML_DECL,
            self.next_message_id.fetch_add(1, Ordering::Relaxed),
            BASE_NS
        );
        framed.write_message(&request).await?;
        // the peer may drop the connection instead of replying
        let _ = framed.read_message().await;
        framed.writer.shutdown().await?;
        debug!("Closed session {}", self.id);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

/// A start tag located in a message, with any namespace prefix it carries
struct StartTag<'a> {
    start: usize,
    end: usize,
    prefix: &'a str,
    self_closing: bool,
}

impl StartTag<'_> {
    fn close(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            format!("</{}>", name)
        } else {
            format!("</{}:{}>", self.prefix, name)
        }
    }
}

/// First `<name ...>` or `<prefix:name ...>` start tag in `message`
fn find_start_tag<'a>(message: &'a str, name: &str) -> Option<StartTag<'a>> {
    let mut from = 0;
    while let Some(offset) = message[from..].find('<') {
        let start = from + offset;
        let rest = &message[start + 1..];
        let qname_len = rest
            .find(|c: char| c == '>' || c == '/' || c.is_whitespace())
            .unwrap_or(rest.len());
        let qname = &rest[..qname_len];
        let (prefix, local) = qname.split_once(':').unwrap_or(("", qname));
        if local == name {
            let close = rest.find('>')?;
            return Some(StartTag {
                start,
                end: start + 1 + close + 1,
                prefix,
                self_closing: rest[..close].ends_with('/'),
            });
        }
        from = start + 1;
    }
    None
}

fn element_text<'a>(message: &'a str, name: &str) -> Option<&'a str> {
    let tag = find_start_tag(message, name)?;
    if tag.self_closing {
        return Some("");
    }
    let end = message[tag.end..].find(&tag.close(name))? + tag.end;
    Some(message[tag.end..end].trim())
}

fn parse_session_id(hello: &str) -> Result<u64, TransportError> {
    let text = element_text(hello, "session-id")
        .ok_or_else(|| TransportError::Protocol("server hello has no session-id".to_string()))?;
    text.parse()
        .map_err(|_| TransportError::Protocol(format!("invalid session-id {:?}", text)))
}

/// The `message-id` attribute of an `<rpc-reply>`, when it carries one
fn reply_message_id(reply: &str) -> Option<&str> {
    let tag = find_start_tag(reply, "rpc-reply")?;
    let attributes = &reply[tag.start..tag.end];
    let value = &attributes[attributes.find("message-id=")? + "message-id=".len()..];
    let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &value[1..];
    Some(&value[..value.find(quote)?])
}

/// Content of the `<rpc-reply>` element, or the rpc-error it reports
fn parse_reply(reply: &str) -> Result<String, TransportError> {
    let tag = find_start_tag(reply, "rpc-reply")
        .ok_or_else(|| TransportError::Protocol("message is not an rpc-reply".to_string()))?;
    if tag.self_closing {
        return Ok(String::new());
    }

    let close = reply
        .rfind(&tag.close("rpc-reply"))
        .filter(|close| *close >= tag.end)
        .ok_or_else(|| TransportError::Protocol("unterminated rpc-reply".to_string()))?;
    let data = &reply[tag.end..close];

    if find_start_tag(data, "rpc-error").is_some() {
        let message = element_text(data, "error-message").unwrap_or(data.trim());
        return Err(TransportError::Rpc(message.to_string()));
    }

    Ok(data.to_string())
}
