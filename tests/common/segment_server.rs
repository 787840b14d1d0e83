//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves `GET /<chunk>_<segment>` from an in-memory map, answers 404 for
//! anything it does not know, and 500 for paths marked as failing. Stalled
//! paths wait before answering. Every request path is recorded, on arrival,
//! so tests can assert what was fetched.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Default)]
pub struct SegmentServerBuilder {
    bodies: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    stalls: HashMap<String, Duration>,
}

impl SegmentServerBuilder {
    /// Serves a chunk whose segments have the given sizes.
    pub fn chunk(mut self, chunk: u64, sizes: &[usize]) -> Self {
        for (i, size) in sizes.iter().enumerate() {
            let fill = (chunk as u8).wrapping_mul(31).wrapping_add(i as u8);
            self.bodies
                .insert(format!("{}_{}", chunk, i), vec![fill; *size]);
        }
        self
    }

    /// Answers 500 for `<chunk>_<segment>`.
    pub fn fail(mut self, chunk: u64, segment: u64) -> Self {
        self.failing.insert(format!("{}_{}", chunk, segment));
        self
    }

    /// Holds the response for `<chunk>_<segment>` back for `delay`.
    pub fn stall(mut self, chunk: u64, segment: u64, delay: Duration) -> Self {
        self.stalls.insert(format!("{}_{}", chunk, segment), delay);
        self
    }

    pub fn start(self) -> SegmentServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let bodies = Arc::new(self.bodies);
        let failing = Arc::new(self.failing);
        let stalls = Arc::new(self.stalls);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let bodies = Arc::clone(&bodies);
                let failing = Arc::clone(&failing);
                let stalls = Arc::clone(&stalls);
                let log = Arc::clone(&log);
                thread::spawn(move || handle(stream, &bodies, &failing, &stalls, &log));
            }
        });

        SegmentServer {
            url: format!("http://127.0.0.1:{}", port),
            requests,
        }
    }
}

pub struct SegmentServer {
    pub url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl SegmentServer {
    pub fn builder() -> SegmentServerBuilder {
        SegmentServerBuilder::default()
    }

    /// Every requested name (`<chunk>_<segment>`) so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Whether any segment of `chunk` was requested.
    pub fn fetched_chunk(&self, chunk: u64) -> bool {
        let prefix = format!("{}_", chunk);
        self.requests().iter().any(|r| r.starts_with(&prefix))
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    bodies: &HashMap<String, Vec<u8>>,
    failing: &HashSet<String>,
    stalls: &HashMap<String, Duration>,
    log: &Mutex<Vec<String>>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let name = request
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .trim_start_matches('/')
        .to_string();
    log.lock().unwrap().push(name.clone());
    if let Some(delay) = stalls.get(&name) {
        thread::sleep(*delay);
    }

    if failing.contains(&name) {
        let _ = stream.write_all(
            b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }
    match bodies.get(&name) {
        Some(body) => {
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(header.as_bytes());
            let _ = stream.write_all(body);
        }
        None => {
            let _ = stream.write_all(
                b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
        }
    }
}
