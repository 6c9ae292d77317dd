//! Scripted HTTP/1.1 server for stateful sequences httpmock cannot express:
//! per-hit responses, slow replies and bodies shorter than their Content-Length.
//! Also a single-file passive-mode FTP server.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
pub struct Reply {
    delay: Duration,
    bytes: Vec<u8>,
}

impl Reply {
    /// Complete response with a correct Content-Length
    pub fn status(code: u16, reason: &str, headers: &[(&str, &str)], body: &[u8]) -> Self {
        Self::declared(code, reason, headers, body.len(), body)
    }

    pub fn ok(body: &[u8]) -> Self {
        Self::status(200, "OK", &[], body)
    }

    pub fn too_many_requests() -> Self {
        Self::status(429, "Too Many Requests", &[("Retry-After", "0")], b"")
    }

    /// Declares `declared` bytes but sends only `body` before closing
    pub fn truncated(declared: usize, body: &[u8]) -> Self {
        Self::declared(200, "OK", &[], declared, body)
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn declared(code: u16, reason: &str, headers: &[(&str, &str)], declared: usize, body: &[u8]) -> Self {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            code, reason, declared
        );
        for (name, value) in headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("\r\n");
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(body);
        Self {
            delay: Duration::ZERO,
            bytes,
        }
    }
}

/// Serves `script[n]` to the n-th connection; the last reply repeats
pub struct ScriptedServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl ScriptedServer {
    pub async fn start(script: Vec<Reply>) -> Self {
        assert!(!script.is_empty());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let reply = script[n.min(script.len() - 1)].clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(k) => {
                                head.extend_from_slice(&chunk[..k]);
                                if head.windows(4).any(|w| w == b"\r\n\r\n") {
                                    break;
                                }
                            }
                        }
                    }
                    tokio::time::sleep(reply.delay).await;
                    let _ = socket.write_all(&reply.bytes).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Serves one file at `path` over passive-mode FTP to any login
pub struct FakeFtpServer {
    addr: SocketAddr,
    sent: Arc<AtomicU64>,
}

impl FakeFtpServer {
    pub async fn start(path: &str, body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sent = Arc::new(AtomicU64::new(0));
        let file = Arc::new((path.to_string(), body));
        let counter = sent.clone();

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_ftp_session(socket, file.clone(), counter.clone()));
            }
        });

        Self { addr, sent }
    }

    pub fn url(&self, path: &str) -> String {
        format!("ftp://{}{}", self.addr, path)
    }

    /// Data-connection bytes accepted by the kernel so far
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

async fn serve_ftp_session(socket: TcpStream, file: Arc<(String, Vec<u8>)>, sent: Arc<AtomicU64>) {
    let (read_half, mut control) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut passive: Option<TcpListener> = None;

    if control.write_all(b"220 ready\r\n").await.is_err() {
        return;
    }
    while let Ok(Some(line)) = lines.next_line().await {
        let (command, arg) = match line.split_once(' ') {
            Some((c, a)) => (c.to_ascii_uppercase(), a.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };
        let (path, body) = (&file.0, &file.1);
        let reply = match command.as_str() {
            "USER" => "331 password required".to_string(),
            "PASS" => "230 logged in".to_string(),
            "TYPE" => "200 type set".to_string(),
            "SIZE" if arg == *path => format!("213 {}", body.len()),
            "SIZE" => "550 no such file".to_string(),
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = listener.local_addr().unwrap().port();
                passive = Some(listener);
                format!("227 Entering Passive Mode (127,0,0,1,{},{})", port >> 8, port & 0xff)
            }
            "RETR" if arg != *path => "550 no such file".to_string(),
            "RETR" => {
                let Some(listener) = passive.take() else {
                    return;
                };
                if control.write_all(b"150 opening data connection\r\n").await.is_err() {
                    return;
                }
                let Ok((mut data, _)) = listener.accept().await else {
                    return;
                };
                for chunk in body.chunks(64 * 1024) {
                    if data.write_all(chunk).await.is_err() {
                        break;
                    }
                    sent.fetch_add(chunk.len() as u64, Ordering::SeqCst);
                }
                let _ = data.shutdown().await;
                drop(data);
                "226 transfer complete".to_string()
            }
            "QUIT" => {
                let _ = control.write_all(b"221 bye\r\n").await;
                return;
            }
            _ => "502 not implemented".to_string(),
        };
        if control.write_all(format!("{}\r\n", reply).as_bytes()).await.is_err() {
            return;
        }
    }
}
