//! HTTP/1.1 load producer.

use core::{
    fmt::Write as _,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use std::{
    collections::BTreeMap,
    sync::Mutex,
    time::Instant,
};

use anyhow::{anyhow, Context as _, Error};
use bytes::Bytes;
use http::{header, HeaderName, HeaderValue, Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use tokio::net::TcpStream;

use self::io::TokioIo;
use crate::{
    histogram::{self, Collector},
    job, loadgen, report,
};

mod io;

/// Maximum number of bytes sampled from a response body.
const SAMPLE_SIZE: usize = 1000;

/// HTTP load configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub no_keepalive: bool,
}

/// Sends HTTP requests.
#[derive(Debug)]
pub struct JobProducer {
    method: Method,
    path: String,
    host_header: HeaderValue,
    addr: SocketAddr,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
    no_keepalive: bool,
    /// Estimated size of the serialized request head.
    request_head_len: u64,
    pool_limit: usize,

    start: Instant,
    resolved: String,

    dns_hist: Collector,
    conn_hist: Collector,
    ttfb_hist: Collector,

    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    total: AtomicU64,

    idle: Mutex<Vec<SendRequest<Full<Bytes>>>>,
    responses: Mutex<Responses>,
}

#[derive(Default, Debug)]
struct Responses {
    counts: BTreeMap<u16, u64>,
    samples: BTreeMap<u16, String>,
}

impl JobProducer {
    /// Creates an HTTP load producer, resolving the target host once.
    pub async fn new(cfg: Config, load: &loadgen::Config) -> Result<Self, Error> {
        let uri: Uri = cfg.url.parse().context("failed to parse URL")?;

        match uri.scheme_str() {
            Some("http") | None => {}
            Some(scheme) => return Err(anyhow!("unsupported URL scheme: {scheme}")),
        }

        let host = uri
            .host()
            .ok_or_else(|| anyhow!("URL has no host"))?
            .to_string();
        let port = uri.port_u16().unwrap_or(80);

        let dns_hist = Collector::new(10, histogram::latency_width);
        let started = Instant::now();
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
            .await
            .context("failed to resolve URL host")?
            .collect();
        dns_hist.add(started.elapsed().as_secs_f64() * 1000.0);

        let addr = *addrs
            .first()
            .ok_or_else(|| anyhow!("failed to resolve URL host: {host}"))?;
        let resolved = format!(
            "Host resolved: {}",
            addrs
                .iter()
                .map(|a| a.ip().to_string())
                .collect::<Vec<_>>()
                .join(",")
        );

        let host_header = match port {
            80 => HeaderValue::try_from(host.as_str())?,
            p => HeaderValue::try_from(format!("{host}:{p}"))?,
        };

        let mut headers = Vec::with_capacity(cfg.headers.len() + 1);
        let mut has_user_agent = false;
        for (name, value) in &cfg.headers {
            let name: HeaderName = name
                .parse()
                .with_context(|| format!("invalid header name: {name:?}"))?;
            let value: HeaderValue = value
                .parse()
                .with_context(|| format!("invalid header value: {value:?}"))?;

            has_user_agent |= name == header::USER_AGENT;
            headers.push((name, value));
        }
        if !has_user_agent {
            headers.push((header::USER_AGENT, HeaderValue::from_static("plt")));
        }

        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let mut request_head_len = (cfg.method.as_str().len() + path.len() + 12) as u64;
        request_head_len += (header::HOST.as_str().len() + host_header.len() + 4) as u64;
        for (name, value) in &headers {
            request_head_len += (name.as_str().len() + value.len() + 4) as u64;
        }

        let pool_limit = match load.concurrency {
            0 => 50,
            v => v as usize,
        };

        let m = Self {
            method: cfg.method,
            path,
            host_header,
            addr,
            headers,
            body: cfg.body,
            no_keepalive: cfg.no_keepalive,
            request_head_len,
            pool_limit,
            start: Instant::now(),
            resolved,
            dns_hist,
            conn_hist: Collector::new(10, histogram::latency_width),
            ttfb_hist: Collector::new(10, histogram::latency_width),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            total: AtomicU64::new(0),
            idle: Mutex::new(Vec::new()),
            responses: Mutex::new(Responses::default()),
        };

        Ok(m)
    }

    fn checkout(&self) -> Option<SendRequest<Full<Bytes>>> {
        self.idle.lock().unwrap().pop()
    }

    fn checkin(&self, sender: SendRequest<Full<Bytes>>) {
        let mut idle = self.idle.lock().unwrap();
        if idle.len() < self.pool_limit {
            idle.push(sender);
        }
    }

    async fn connect(&self) -> Result<SendRequest<Full<Bytes>>, Error> {
        let started = Instant::now();
        let stream = TcpStream::connect(self.addr)
            .await
            .context("failed to connect")?;
        self.conn_hist.add(started.elapsed().as_secs_f64() * 1000.0);

        let (sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                log::debug!("connection failed: {err}");
            }
        });

        Ok(sender)
    }

    fn build_request(&self) -> Result<Request<Full<Bytes>>, Error> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.path.clone())
            .header(header::HOST, self.host_header.clone());

        for (name, value) in &self.headers {
            builder = builder.header(name.clone(), value.clone());
        }

        Ok(builder.body(Full::new(self.body.clone()))?)
    }
}

impl job::JobProducer for JobProducer {
    async fn job(&self, _idx: usize) -> Result<Duration, Error> {
        let start = Instant::now();

        let mut sender = match self.checkout() {
            Some(sender) => sender,
            None => self.connect().await?,
        };

        let resp = sender.send_request(self.build_request()?).await?;
        self.bytes_written.fetch_add(
            self.request_head_len + self.body.len() as u64,
            Ordering::Relaxed,
        );
        self.ttfb_hist.add(start.elapsed().as_secs_f64() * 1000.0);

        let (parts, body) = resp.into_parts();
        let code = parts.status.as_u16();

        let sample = {
            let mut responses = self.responses.lock().unwrap();
            let cnt = responses.counts.entry(code).or_insert(0);
            *cnt += 1;

            *cnt == 1
        };

        let mut read = 0u64;
        for (name, value) in &parts.headers {
            read += (name.as_str().len() + value.len() + 4) as u64;
        }

        let mut body = body;
        let mut sampled = Vec::new();
        while let Some(frame) = body.frame().await {
            let frame = frame?;
            if let Some(data) = frame.data_ref() {
                read += data.len() as u64;

                if sample && sampled.len() < SAMPLE_SIZE + 1 {
                    let take = (SAMPLE_SIZE + 1 - sampled.len()).min(data.len());
                    sampled.extend_from_slice(&data[..take]);
                }
            }
        }
        self.bytes_read.fetch_add(read, Ordering::Relaxed);

        if sample {
            let text = match parts.headers.get(header::CONTENT_ENCODING) {
                Some(enc) => format!("<{}-encoded-content>", enc.to_str().unwrap_or("unknown")),
                None => report::peek_body(&sampled, SAMPLE_SIZE),
            };

            let mut responses = self.responses.lock().unwrap();
            responses
                .samples
                .insert(code, format!("[{:?} {code}]\n{text}", parts.version));
        }

        if !self.no_keepalive && sender.ready().await.is_ok() {
            self.checkin(sender);
        }

        self.total.fetch_add(1, Ordering::Relaxed);

        Ok(start.elapsed())
    }

    /// Returns request distribution by status code.
    fn request_counts(&self) -> BTreeMap<String, u64> {
        let responses = self.responses.lock().unwrap();

        responses
            .counts
            .iter()
            .map(|(code, cnt)| (code.to_string(), *cnt))
            .collect()
    }

    fn metrics(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        let elapsed = self.start.elapsed().as_secs_f64();
        let to_mbs =
            |v: u64| v as f64 / (report::MEGABYTE as f64 * elapsed);

        BTreeMap::from([(
            "Bandwidth, MB/s".to_string(),
            BTreeMap::from([
                ("Read".to_string(), to_mbs(self.bytes_read.load(Ordering::Relaxed))),
                ("Write".to_string(), to_mbs(self.bytes_written.load(Ordering::Relaxed))),
            ]),
        )])
    }

    fn summary(&self) -> Option<String> {
        let responses = self.responses.lock().unwrap();
        if responses.counts.is_empty() {
            return None;
        }

        let mut res = String::new();
        _ = writeln!(res, "{}", self.resolved);

        let total = self.total.load(Ordering::Relaxed);
        let read = self.bytes_read.load(Ordering::Relaxed);
        let written = self.bytes_written.load(Ordering::Relaxed);
        let elapsed = self.start.elapsed().as_secs_f64();

        if total > 0 && read > 0 && written > 0 {
            _ = writeln!(
                res,
                "Bytes read {} total, {} avg, {}/s",
                report::byte_size(read),
                report::byte_size(read / total),
                report::byte_size((read as f64 / elapsed) as u64),
            );
            _ = writeln!(
                res,
                "Bytes written {} total, {} avg, {}/s",
                report::byte_size(written),
                report::byte_size(written / total),
                report::byte_size((written as f64 / elapsed) as u64),
            );
            res.push('\n');
        }

        if self.dns_hist.count() > 0 {
            _ = writeln!(res, "DNS latency distribution in ms:");
            _ = writeln!(res, "{}", self.dns_hist);
        }
        if self.ttfb_hist.count() > 0 {
            _ = writeln!(res, "Time to first resp byte (TTFB) distribution in ms:");
            _ = writeln!(res, "{}", self.ttfb_hist);
        }
        if self.conn_hist.count() > 0 {
            _ = writeln!(res, "Connection latency distribution in ms:");
            _ = writeln!(res, "{}", self.conn_hist);
        }

        _ = writeln!(res, "Responses by status code");
        for (code, cnt) in &responses.counts {
            _ = writeln!(res, "[{code}] {cnt}");
        }
        res.push('\n');

        _ = writeln!(res, "Response samples (first by status code):");
        for sample in responses.samples.values() {
            _ = writeln!(res, "{sample}");
        }

        Some(res.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::job::JobProducer as _;

    /// Serves canned 200 responses, counting accepted connections.
    async fn spawn_server(conns: Arc<AtomicUsize>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (mut sock, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => return,
                };
                conns.fetch_add(1, Ordering::SeqCst);

                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        match sock.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {}
                        }

                        let body = b"hello";
                        let head = format!(
                            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n",
                            body.len()
                        );
                        if sock.write_all(head.as_bytes()).await.is_err() {
                            return;
                        }
                        if sock.write_all(body).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        addr
    }

    fn config(addr: SocketAddr) -> Config {
        Config {
            url: format!("http://{addr}/"),
            method: Method::GET,
            headers: vec![("X-Foo".to_string(), "bar".to_string())],
            body: Bytes::new(),
            no_keepalive: false,
        }
    }

    #[tokio::test]
    async fn measures_and_counts_responses() {
        let conns = Arc::new(AtomicUsize::new(0));
        let addr = spawn_server(conns.clone()).await;

        let producer = JobProducer::new(config(addr), &loadgen::Config::default())
            .await
            .unwrap();

        for i in 0..5 {
            let elapsed = producer.job(i).await.unwrap();
            assert!(elapsed > Duration::ZERO);
        }

        assert_eq!(
            BTreeMap::from([("200".to_string(), 5)]),
            producer.request_counts()
        );
        // Sequential keep-alive requests reuse a single connection.
        assert_eq!(1, conns.load(Ordering::SeqCst));

        let summary = producer.summary().unwrap();
        assert!(summary.contains("Host resolved: 127.0.0.1"), "{summary}");
        assert!(summary.contains("Responses by status code"), "{summary}");
        assert!(summary.contains("[200] 5"), "{summary}");
        assert!(summary.contains("hello"), "{summary}");

        let metrics = producer.metrics();
        assert!(metrics.contains_key("Bandwidth, MB/s"));
    }

    #[tokio::test]
    async fn no_keepalive_reconnects_every_job() {
        let conns = Arc::new(AtomicUsize::new(0));
        let addr = spawn_server(conns.clone()).await;

        let cfg = Config {
            no_keepalive: true,
            ..config(addr)
        };
        let producer = JobProducer::new(cfg, &loadgen::Config::default())
            .await
            .unwrap();

        for i in 0..3 {
            producer.job(i).await.unwrap();
        }

        assert_eq!(3, conns.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn connection_refused_is_a_job_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let producer = JobProducer::new(config(addr), &loadgen::Config::default())
            .await
            .unwrap();

        assert!(producer.job(0).await.is_err());
        assert!(producer.summary().is_none());
    }

    #[tokio::test]
    async fn rejects_unsupported_scheme() {
        let cfg = Config {
            url: "https://localhost/".to_string(),
            method: Method::GET,
            headers: Vec::new(),
            body: Bytes::new(),
            no_keepalive: false,
        };

        let err = JobProducer::new(cfg, &loadgen::Config::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme"));
    }

    #[tokio::test]
    async fn end_to_end_run() {
        let conns = Arc::new(AtomicUsize::new(0));
        let addr = spawn_server(conns).await;

        let buf = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedBuf(buf.clone());

        let cfg = loadgen::Config {
            number: 20,
            concurrency: 3,
            output: Some(Box::new(writer)),
            ..loadgen::Config::default()
        };
        let producer = JobProducer::new(config(addr), &cfg).await.unwrap();

        loadgen::run(cfg, Arc::new(producer)).await.unwrap();

        let text = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(text.contains("Successful requests: 20"), "report:\n{text}");
        assert!(text.contains("[200] 20"), "report:\n{text}");
        assert!(text.contains("Bandwidth, MB/s"), "report:\n{text}");
    }

    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
