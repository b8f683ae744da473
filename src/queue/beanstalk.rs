//! # beanstalkd text protocol client.
//!
//! One TCP connection per [`BeanstalkClient`]. Commands are serialized through an async
//! mutex: the client can be shared, but requests are never pipelined.
//!
//! ## Reserve and the watch list
//! beanstalkd keeps the watch list per connection. Before each reserve the client makes
//! the list equal to the requested tubes (`watch` missing ones, then `ignore` extras),
//! so a fresh connection stops listening on `default` unless asked to.
//!
//! ## Replies handled
//! ```text
//! reserve-with-timeout  → RESERVED <id> <bytes> | TIMED_OUT | DEADLINE_SOON
//! delete                → DELETED  | NOT_FOUND
//! release               → RELEASED | BURIED | NOT_FOUND
//! bury                  → BURIED   | NOT_FOUND
//! stats-job             → OK <bytes> (YAML mapping) | NOT_FOUND
//! list-tubes            → OK <bytes> (YAML sequence)
//! use / put             → USING <tube> / INSERTED <id>
//! ```
//! Anything else is a [`QueueError::Protocol`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream},
    net::TcpStream,
    sync::Mutex,
};

use super::{Connect, Queue, QueueRef};
use crate::error::QueueError;

const DEFAULT_TUBE: &str = "default";

/// beanstalkd connection.
pub struct BeanstalkClient {
    addr: String,
    conn: Mutex<Conn>,
}

struct Conn {
    stream: BufStream<TcpStream>,
    watched: Vec<String>,
    used: String,
}

impl BeanstalkClient {
    /// Connects to `addr` (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self, QueueError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            addr: addr.to_string(),
            conn: Mutex::new(Conn {
                stream: BufStream::new(stream),
                watched: vec![DEFAULT_TUBE.to_string()],
                used: DEFAULT_TUBE.to_string(),
            }),
        })
    }

    /// Address this client is connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Inserts a job into `tube`; returns its id.
    ///
    /// The broker never produces work; this exists for tooling and tests.
    pub async fn put(
        &self,
        tube: &str,
        priority: u32,
        delay: Duration,
        ttr: Duration,
        body: &[u8],
    ) -> Result<u64, QueueError> {
        let mut conn = self.conn.lock().await;
        if conn.used != tube {
            let reply = conn.command(&format!("use {tube}")).await?;
            match words(&reply).as_slice() {
                ["USING", _] => conn.used = tube.to_string(),
                _ => return Err(unexpected(&reply)),
            }
        }

        let header = format!(
            "put {priority} {} {} {}",
            whole_secs(delay),
            whole_secs(ttr).max(1),
            body.len()
        );
        tracing::debug!(command = %header, "beanstalk command");
        conn.stream.write_all(header.as_bytes()).await?;
        conn.stream.write_all(b"\r\n").await?;
        conn.stream.write_all(body).await?;
        conn.stream.write_all(b"\r\n").await?;
        conn.stream.flush().await?;

        let reply = conn.read_reply().await?;
        match words(&reply).as_slice() {
            ["INSERTED", id] => parse_id(id, &reply),
            ["BURIED", id] => {
                let id = parse_id(id, &reply)?;
                Err(QueueError::Buried(id))
            }
            _ => Err(unexpected(&reply)),
        }
    }
}

impl Conn {
    /// Sends one command line and reads the reply line (without CRLF).
    async fn command(&mut self, line: &str) -> Result<String, QueueError> {
        tracing::debug!(command = line, "beanstalk command");
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<String, QueueError> {
        let mut reply = String::new();
        let n = self.stream.read_line(&mut reply).await?;
        if n == 0 {
            return Err(QueueError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )));
        }
        let trimmed = reply.trim_end_matches(['\r', '\n']).len();
        reply.truncate(trimmed);
        Ok(reply)
    }

    /// Reads a `<bytes>`-sized body followed by CRLF.
    async fn read_body(&mut self, len: usize) -> Result<Vec<u8>, QueueError> {
        let mut body = vec![0u8; len + 2];
        self.stream.read_exact(&mut body).await?;
        if !body.ends_with(b"\r\n") {
            return Err(QueueError::Protocol("body not terminated by CRLF".into()));
        }
        body.truncate(len);
        Ok(body)
    }

    /// Reads the payload of an `OK <bytes>` reply.
    async fn read_ok_body(&mut self, reply: &str) -> Result<String, QueueError> {
        match words(reply).as_slice() {
            ["OK", len] => {
                let len = len
                    .parse::<usize>()
                    .map_err(|_| unexpected(reply))?;
                let body = self.read_body(len).await?;
                String::from_utf8(body).map_err(|e| QueueError::Protocol(e.to_string()))
            }
            _ => Err(unexpected(reply)),
        }
    }

    async fn ensure_watching(&mut self, tubes: &[String]) -> Result<(), QueueError> {
        let wanted: Vec<&str> = if tubes.is_empty() {
            vec![DEFAULT_TUBE]
        } else {
            tubes.iter().map(String::as_str).collect()
        };

        for tube in &wanted {
            if !self.watched.iter().any(|w| w == tube) {
                let reply = self.command(&format!("watch {tube}")).await?;
                expect_watching(&reply)?;
                self.watched.push((*tube).to_string());
            }
        }

        let extra: Vec<String> = self
            .watched
            .iter()
            .filter(|w| !wanted.contains(&w.as_str()))
            .cloned()
            .collect();
        for tube in extra {
            let reply = self.command(&format!("ignore {tube}")).await?;
            expect_watching(&reply)?;
            self.watched.retain(|w| w != &tube);
        }
        Ok(())
    }
}

#[async_trait]
impl Queue for BeanstalkClient {
    async fn reserve(
        &self,
        tubes: &[String],
        timeout: Duration,
    ) -> Result<(u64, Vec<u8>), QueueError> {
        let mut conn = self.conn.lock().await;
        conn.ensure_watching(tubes).await?;

        let reply = conn
            .command(&format!("reserve-with-timeout {}", whole_secs(timeout)))
            .await?;
        match words(&reply).as_slice() {
            ["RESERVED", id, len] => {
                let id = parse_id(id, &reply)?;
                let len = len.parse::<usize>().map_err(|_| unexpected(&reply))?;
                let body = conn.read_body(len).await?;
                Ok((id, body))
            }
            ["TIMED_OUT"] => Err(QueueError::TimedOut),
            ["DEADLINE_SOON"] => Err(QueueError::DeadlineSoon),
            _ => Err(unexpected(&reply)),
        }
    }

    async fn delete(&self, id: u64) -> Result<(), QueueError> {
        let mut conn = self.conn.lock().await;
        let reply = conn.command(&format!("delete {id}")).await?;
        match reply.as_str() {
            "DELETED" => Ok(()),
            "NOT_FOUND" => Err(QueueError::NotFound(id)),
            _ => Err(unexpected(&reply)),
        }
    }

    async fn release(&self, id: u64, priority: u32, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.conn.lock().await;
        let reply = conn
            .command(&format!("release {id} {priority} {}", whole_secs(delay)))
            .await?;
        match reply.as_str() {
            "RELEASED" => Ok(()),
            "BURIED" => Err(QueueError::Buried(id)),
            "NOT_FOUND" => Err(QueueError::NotFound(id)),
            _ => Err(unexpected(&reply)),
        }
    }

    async fn bury(&self, id: u64, priority: u32) -> Result<(), QueueError> {
        let mut conn = self.conn.lock().await;
        let reply = conn.command(&format!("bury {id} {priority}")).await?;
        match reply.as_str() {
            "BURIED" => Ok(()),
            "NOT_FOUND" => Err(QueueError::NotFound(id)),
            _ => Err(unexpected(&reply)),
        }
    }

    async fn stats_job(&self, id: u64) -> Result<HashMap<String, String>, QueueError> {
        let mut conn = self.conn.lock().await;
        let reply = conn.command(&format!("stats-job {id}")).await?;
        if reply == "NOT_FOUND" {
            return Err(QueueError::NotFound(id));
        }
        let yaml = conn.read_ok_body(&reply).await?;
        Ok(parse_yaml_map(&yaml))
    }

    async fn list_tubes(&self) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn.lock().await;
        let reply = conn.command("list-tubes").await?;
        let yaml = conn.read_ok_body(&reply).await?;
        Ok(parse_yaml_list(&yaml))
    }
}

/// Opens one [`BeanstalkClient`] per call.
#[derive(Clone, Debug)]
pub struct BeanstalkConnector {
    addr: String,
}

impl BeanstalkConnector {
    /// Connector for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connect for BeanstalkConnector {
    async fn connect(&self) -> Result<QueueRef, QueueError> {
        let client = BeanstalkClient::connect(&self.addr).await?;
        Ok(Arc::new(client))
    }

    fn target(&self) -> String {
        self.addr.clone()
    }
}

fn words(reply: &str) -> Vec<&str> {
    reply.split_ascii_whitespace().collect()
}

fn unexpected(reply: &str) -> QueueError {
    QueueError::Protocol(format!("unexpected reply {reply:?}"))
}

fn parse_id(raw: &str, reply: &str) -> Result<u64, QueueError> {
    raw.parse::<u64>().map_err(|_| unexpected(reply))
}

fn expect_watching(reply: &str) -> Result<(), QueueError> {
    match words(reply).as_slice() {
        ["WATCHING", _] => Ok(()),
        _ => Err(unexpected(reply)),
    }
}

/// beanstalkd takes whole seconds; a non-zero fraction rounds up.
fn whole_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

fn parse_yaml_map(yaml: &str) -> HashMap<String, String> {
    yaml.lines()
        .filter(|l| *l != "---")
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn parse_yaml_list(yaml: &str) -> Vec<String> {
    yaml.lines()
        .filter_map(|l| l.strip_prefix("- "))
        .map(|t| t.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
        task::JoinHandle,
    };

    /// Accepts one connection and plays `script`: for each step, read one line,
    /// compare it with the expected command, answer with the canned reply.
    async fn scripted(script: Vec<(&'static str, &'static [u8])>) -> (SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let (rd, mut wr) = sock.into_split();
            let mut rd = BufReader::new(rd);
            for (expected, reply) in script {
                let mut line = String::new();
                rd.read_line(&mut line).await.unwrap();
                assert_eq!(line.trim_end(), expected);
                if !reply.is_empty() {
                    wr.write_all(reply).await.unwrap();
                }
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn reserve_watches_requested_tubes_and_ignores_default() {
        let (addr, server) = scripted(vec![
            ("watch emails", b"WATCHING 2\r\n"),
            ("ignore default", b"WATCHING 1\r\n"),
            ("reserve-with-timeout 3600", b"RESERVED 9 11\r\nhello world\r\n"),
            ("reserve-with-timeout 1", b"TIMED_OUT\r\n"),
        ])
        .await;

        let client = BeanstalkClient::connect(&addr.to_string()).await.unwrap();
        let tubes = vec!["emails".to_string()];
        let (id, body) = client
            .reserve(&tubes, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(id, 9);
        assert_eq!(body, b"hello world");

        // Watch list already matches: no further watch/ignore.
        let err = client
            .reserve(&tubes, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::TimedOut));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn deadline_soon_is_reported() {
        let (addr, server) =
            scripted(vec![("reserve-with-timeout 5", b"DEADLINE_SOON\r\n")]).await;
        let client = BeanstalkClient::connect(&addr.to_string()).await.unwrap();
        let err = client
            .reserve(&[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::DeadlineSoon));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn stats_job_parses_yaml_mapping() {
        let yaml = "---\nid: 3\ntube: default\nstate: reserved\npri: 1024\ntime-left: 59\ntimeouts: 0\nreleases: 2\n";
        let reply: &'static [u8] = Box::leak(
            format!("OK {}\r\n{}\r\n", yaml.len(), yaml)
                .into_bytes()
                .into_boxed_slice(),
        );
        let (addr, server) = scripted(vec![("stats-job 3", reply)]).await;

        let client = BeanstalkClient::connect(&addr.to_string()).await.unwrap();
        let stats = client.stats_job(3).await.unwrap();
        assert_eq!(stats["pri"], "1024");
        assert_eq!(stats["time-left"], "59");
        assert_eq!(stats["releases"], "2");
        assert_eq!(stats["state"], "reserved");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn dispositions_map_replies() {
        let (addr, server) = scripted(vec![
            ("delete 1", b"DELETED\r\n"),
            ("release 2 100 16", b"RELEASED\r\n"),
            ("bury 3 7", b"BURIED\r\n"),
            ("delete 4", b"NOT_FOUND\r\n"),
            ("release 5 0 0", b"BURIED\r\n"),
            ("bury 6 0", b"INTERNAL_ERROR\r\n"),
        ])
        .await;

        let client = BeanstalkClient::connect(&addr.to_string()).await.unwrap();
        client.delete(1).await.unwrap();
        client.release(2, 100, Duration::from_secs(16)).await.unwrap();
        client.bury(3, 7).await.unwrap();
        assert!(matches!(client.delete(4).await, Err(QueueError::NotFound(4))));
        assert!(matches!(
            client.release(5, 0, Duration::ZERO).await,
            Err(QueueError::Buried(5))
        ));
        assert!(matches!(client.bury(6, 0).await, Err(QueueError::Protocol(_))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn list_tubes_and_put() {
        let tubes = "---\n- default\n- emails\n";
        let reply: &'static [u8] = Box::leak(
            format!("OK {}\r\n{}\r\n", tubes.len(), tubes)
                .into_bytes()
                .into_boxed_slice(),
        );
        let (addr, server) = scripted(vec![
            ("list-tubes", reply),
            ("use emails", b"USING emails\r\n"),
            ("put 10 0 60 5", b""),
            ("hello", b"INSERTED 12\r\n"),
        ])
        .await;

        let client = BeanstalkClient::connect(&addr.to_string()).await.unwrap();
        assert_eq!(client.list_tubes().await.unwrap(), vec!["default", "emails"]);
        let id = client
            .put("emails", 10, Duration::ZERO, Duration::from_secs(60), b"hello")
            .await
            .unwrap();
        assert_eq!(id, 12);
        server.await.unwrap();
    }

    #[test]
    fn sub_second_durations_round_up() {
        assert_eq!(whole_secs(Duration::ZERO), 0);
        assert_eq!(whole_secs(Duration::from_millis(1)), 1);
        assert_eq!(whole_secs(Duration::from_secs(81)), 81);
        assert_eq!(whole_secs(Duration::from_millis(1500)), 2);
    }
}
