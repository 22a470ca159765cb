use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tracing::{debug, trace, warn};

use crate::core::WorkerEvent;
use crate::data::{HttpTarget, Sample, WorkerState};

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.9; rv:31.0) Gecko/20100101 Firefox/31.0";
pub const REFERER: &str = "http://www.measure-it.net";

/// Bounded waits of a worker. Everything else is readiness-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect:    Duration,
    pub first_byte: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect:    Duration::from_secs(5),
            first_byte: Duration::from_secs(5),
        }
    }
}

/// Commands the coordinator sends to a worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerCommand {
    Connect,
    BeginTransfer,
    Stop,
}

/// What a worker hands back when its task ends.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub id:      usize,
    pub state:   WorkerState,
    /// When the request was written, if it ever was.
    pub started: Option<Instant>,
    pub time_to_first_byte: Option<Duration>,
    pub samples: Vec<Sample>,
}

/// Literal GET request for `target`.
///
/// With `cache_bust` set, a `timestamp` query parameter is appended so that
/// intermediate caches see a unique URL.
pub fn build_request(target: &HttpTarget, cache_bust: Option<DateTime<Local>>) -> String {
    let mut path = target.path.clone();
    if let Some(now) = cache_bust {
        path.push(if path.contains('?') { '&' } else { '?' });
        path.push_str("timestamp=");
        path.push_str(&now.format("%y_%m_%d_%H_%M_%S_%3f").to_string());
    }

    format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {USER_AGENT}\r\nReferer: {REFERER}\r\n\r\n", host = target.host)
}

/// One TCP connection that downloads for as long as it is allowed to and
/// records a [`Sample`] for every read.
pub struct TimedSocketWorker {
    id:           usize,
    addr:         SocketAddr,
    target:       Arc<HttpTarget>,
    avoid_caches: bool,
    timeouts:     Timeouts,
    state:        WorkerState,
    stream:       Option<TcpStream>,
    buf:          Box<[u8]>,
    started:      Option<Instant>,
    time_to_first_byte: Option<Duration>,
    samples:      Vec<Sample>,
}

impl TimedSocketWorker {
    pub fn new(id: usize, addr: SocketAddr, target: Arc<HttpTarget>, avoid_caches: bool, timeouts: Timeouts) -> Self {
        Self {
            id,
            addr,
            target,
            avoid_caches,
            timeouts,
            state: WorkerState::Inactive,
            stream: None,
            buf: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            started: None,
            time_to_first_byte: None,
            samples: Vec::new(),
        }
    }

    pub fn state(&self) -> WorkerState { self.state }

    /// Open the TCP connection, waiting at most the connect timeout.
    pub async fn connect(&mut self) -> bool {
        self.state = WorkerState::ConnectingTcp;

        match timeout(self.timeouts.connect, TcpStream::connect(self.addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(worker = self.id, error = %e, "could not disable nagle");
                }
                self.stream = Some(stream);
                self.state = WorkerState::ConnectedTcp;
                debug!(worker = self.id, addr = %self.addr, "connected");
                true
            }
            Ok(Err(e)) => {
                warn!(worker = self.id, addr = %self.addr, error = %e, "connect failed");
                self.fail();
                false
            }
            Err(_) => {
                warn!(worker = self.id, addr = %self.addr, timeout = ?self.timeouts.connect, "connect timed out");
                self.fail();
                false
            }
        }
    }

    /// Write the request and wait for the first chunk of the response.
    ///
    /// Returns false without touching the state if the worker never
    /// connected.
    pub async fn begin_transfer(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            debug!(worker = self.id, "not connected, no transfer");
            return false;
        };

        let cache_bust = self.avoid_caches.then(Local::now);
        let request = build_request(&self.target, cache_bust);
        if let Err(e) = stream.write_all(request.as_bytes()).await {
            warn!(worker = self.id, error = %e, "request write failed");
            self.fail();
            return false;
        }

        let started = Instant::now();
        self.started = Some(started);
        self.state = WorkerState::AwaitingFirstByte;

        match timeout(self.timeouts.first_byte, stream.read(&mut self.buf)).await {
            Ok(Ok(n)) if n > 0 => {
                let elapsed = started.elapsed();
                self.time_to_first_byte = Some(elapsed);
                self.samples.push(Sample::new(nanos(elapsed), n as i64));
                self.state = WorkerState::DownloadInProgress;
                debug!(worker = self.id, ttfb = ?elapsed, "first byte");
                true
            }
            Ok(Ok(_)) => {
                warn!(worker = self.id, "connection closed before the first byte");
                self.fail();
                false
            }
            Ok(Err(e)) => {
                warn!(worker = self.id, error = %e, "read failed before the first byte");
                self.fail();
                false
            }
            Err(_) => {
                warn!(worker = self.id, timeout = ?self.timeouts.first_byte, "no first byte in time");
                self.fail();
                false
            }
        }
    }

    /// Read until the server closes the connection or a command arrives.
    ///
    /// Returns true if the server closed the connection.
    async fn download(&mut self, commands: &mut mpsc::Receiver<WorkerCommand>) -> bool {
        let (Some(stream), Some(started)) = (self.stream.as_mut(), self.started) else {
            return false;
        };

        loop {
            tokio::select! {
                biased;
                _ = commands.recv() => return false,
                read = stream.read(&mut self.buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        trace!(worker = self.id, bytes = n, "read");
                        self.samples.push(Sample::new(nanos(started.elapsed()), n as i64));
                    }
                    Err(e) => {
                        debug!(worker = self.id, error = %e, "read failed during download");
                        break;
                    }
                },
            }
        }

        debug!(worker = self.id, samples = self.samples.len(), "server closed the connection");
        self.state = WorkerState::FinishedSuccess;
        self.stream = None;
        true
    }

    fn fail(&mut self) {
        self.state = WorkerState::FinishedError;
        self.stream = None;
    }

    /// Close the socket. A download in progress counts as finished.
    pub fn stop(&mut self) {
        if self.state == WorkerState::DownloadInProgress {
            self.state = WorkerState::FinishedSuccess;
        }
        self.stream = None;
    }

    pub fn into_report(self) -> WorkerReport {
        WorkerReport {
            id:      self.id,
            state:   self.state,
            started: self.started,
            time_to_first_byte: self.time_to_first_byte,
            samples: self.samples,
        }
    }

    /// Task body: obey commands until stopped, report outcomes on `events`.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<WorkerCommand>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> WorkerReport {
        let worker = self.id;

        while let Some(command) = commands.recv().await {
            match command {
                WorkerCommand::Connect => {
                    let Some(ok) = interruptible(&mut commands, self.connect()).await else {
                        break;
                    };
                    let _ = events.send(WorkerEvent::Connected { worker, ok });
                }
                WorkerCommand::BeginTransfer => {
                    let Some(ok) = interruptible(&mut commands, self.begin_transfer()).await else {
                        break;
                    };
                    let _ = events.send(WorkerEvent::FirstByte { worker, ok });
                    if ok && self.download(&mut commands).await {
                        let _ = events.send(WorkerEvent::Disconnected { worker });
                    }
                    if ok {
                        break;
                    }
                }
                WorkerCommand::Stop => break,
            }

            if self.state.is_finished() {
                break;
            }
        }

        self.stop();
        self.into_report()
    }
}

/// Run `operation` unless a command arrives first. Any command received
/// mid-operation is a stop.
async fn interruptible<T>(commands: &mut mpsc::Receiver<WorkerCommand>, operation: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        output = operation => Some(output),
        _ = commands.recv() => None,
    }
}

fn nanos(elapsed: Duration) -> i64 { i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX) }

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::net::TcpListener;

    fn target(path: &str) -> HttpTarget {
        HttpTarget {
            host: "example.com".to_string(),
            port: 80,
            path: path.to_string(),
        }
    }

    #[test]
    fn test_request_without_cache_busting() {
        let request = build_request(&target("/file.bin"), None);
        assert_eq!(
            request,
            format!(
                "GET /file.bin HTTP/1.1\r\nHost: example.com\r\nUser-Agent: {USER_AGENT}\r\nReferer: {REFERER}\r\n\r\n"
            )
        );
    }

    #[test]
    fn test_request_with_cache_busting() {
        let now = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        let request = build_request(&target("/file.bin"), Some(now));
        assert!(request.starts_with("GET /file.bin?timestamp=24_03_07_09_05_01_000 HTTP/1.1\r\n"));

        let request = build_request(&target("/file.bin?size=10"), Some(now));
        assert!(request.starts_with("GET /file.bin?size=10&timestamp=24_03_07_09_05_01_000 HTTP/1.1\r\n"));
    }

    #[test]
    fn test_stop_only_promotes_a_running_download() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut worker = TimedSocketWorker::new(0, addr, Arc::new(target("/")), false, Timeouts::default());
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Inactive);

        worker.state = WorkerState::DownloadInProgress;
        worker.stop();
        assert_eq!(worker.state(), WorkerState::FinishedSuccess);
    }

    #[tokio::test]
    async fn test_connect_refused_ends_in_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut worker = TimedSocketWorker::new(0, addr, Arc::new(target("/")), false, Timeouts::default());
        assert!(!worker.connect().await);
        assert_eq!(worker.state(), WorkerState::FinishedError);
    }

    #[tokio::test]
    async fn test_transfer_without_connection_is_a_no_op() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut worker = TimedSocketWorker::new(0, addr, Arc::new(target("/")), false, Timeouts::default());
        assert!(!worker.begin_transfer().await);
        assert_eq!(worker.state(), WorkerState::Inactive);
    }

    #[tokio::test]
    async fn test_first_byte_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(socket);
        });

        let timeouts = Timeouts {
            connect:    Duration::from_secs(1),
            first_byte: Duration::from_millis(50),
        };
        let mut worker = TimedSocketWorker::new(0, addr, Arc::new(target("/")), false, timeouts);
        assert!(worker.connect().await);
        assert!(!worker.begin_transfer().await);
        assert_eq!(worker.state(), WorkerState::FinishedError);
        assert!(worker.stream.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_before_first_byte_ends_in_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 1024];
            let n = socket.read(&mut request).await.unwrap();
            assert!(request[..n].starts_with(b"GET / HTTP/1.1\r\n"));
        });

        let mut worker = TimedSocketWorker::new(0, addr, Arc::new(target("/")), false, Timeouts::default());
        assert!(worker.connect().await);
        assert!(!worker.begin_transfer().await);
        server.await.unwrap();

        assert_eq!(worker.state(), WorkerState::FinishedError);
        assert!(worker.stream.is_none());
        let report = worker.into_report();
        assert!(report.time_to_first_byte.is_none());
        assert!(report.samples.is_empty());
    }

    #[tokio::test]
    async fn test_task_reports_remote_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 1024];
            let n = socket.read(&mut request).await.unwrap();
            assert!(request[..n].starts_with(b"GET /data HTTP/1.1\r\n"));
            socket.write_all(&[7u8; 4096]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            socket.write_all(&[7u8; 4096]).await.unwrap();
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let worker = TimedSocketWorker::new(3, addr, Arc::new(target("/data")), false, Timeouts::default());
        let task = tokio::spawn(worker.run(cmd_rx, event_tx));

        cmd_tx.send(WorkerCommand::Connect).await.unwrap();
        assert_eq!(event_rx.recv().await, Some(WorkerEvent::Connected { worker: 3, ok: true }));
        cmd_tx.send(WorkerCommand::BeginTransfer).await.unwrap();
        assert_eq!(event_rx.recv().await, Some(WorkerEvent::FirstByte { worker: 3, ok: true }));
        assert_eq!(event_rx.recv().await, Some(WorkerEvent::Disconnected { worker: 3 }));

        let report = task.await.unwrap();
        server.await.unwrap();
        assert_eq!(report.id, 3);
        assert_eq!(report.state, WorkerState::FinishedSuccess);
        assert!(report.time_to_first_byte.is_some());
        assert_eq!(report.samples.iter().map(|s| s.bytes).sum::<i64>(), 8192);
        assert!(report.samples.windows(2).all(|w| w[0].elapsed_ns <= w[1].elapsed_ns));
    }
}
