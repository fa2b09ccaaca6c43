//! Minimal RESP server for executor tests.
//!
//! Speaks just enough of the protocol for the redis client handshake, PING,
//! UNWATCH and the two script commands. Every command name it receives is
//! recorded so tests can assert on the exact sequence sent.

use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Reply sent for EVAL and a successful EVALSHA.
const SCRIPT_REPLY: &[u8] = b"*3\r\n:1\r\n$1\r\n4\r\n:1700000001\r\n";

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Behavior {
    /// Answer every EVALSHA with a NOSCRIPT error.
    pub noscript: bool,
    /// Close the socket right after answering a script command.
    pub close_after_script: bool,
}

#[derive(Default)]
struct Shared {
    commands: Mutex<Vec<String>>,
    connections: AtomicUsize,
}

pub(crate) struct RespServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

impl RespServer {
    pub fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());

        let accepted = shared.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                accepted.connections.fetch_add(1, Ordering::SeqCst);
                let shared = accepted.clone();
                thread::spawn(move || {
                    let _ = serve(stream, behavior, &shared);
                });
            }
        });

        Self { addr, shared }
    }

    pub fn url(&self) -> String {
        format!("redis://{}/0", self.addr)
    }

    /// Script commands received so far, in order.
    pub fn script_commands(&self) -> Vec<String> {
        self.shared
            .commands
            .lock()
            .iter()
            .filter(|name| name.starts_with("EVAL"))
            .cloned()
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }
}

fn serve(stream: TcpStream, behavior: Behavior, shared: &Shared) -> io::Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    while let Some(parts) = read_command(&mut reader)? {
        let name = parts.first().map(|p| p.to_ascii_uppercase()).unwrap_or_default();
        shared.commands.lock().push(name.clone());

        match name.as_str() {
            "PING" => match parts.get(1) {
                Some(arg) => write!(writer, "${}\r\n{}\r\n", arg.len(), arg)?,
                None => writer.write_all(b"+PONG\r\n")?,
            },
            "EVALSHA" if behavior.noscript => {
                writer.write_all(b"-NOSCRIPT No matching script. Please use EVAL.\r\n")?
            }
            "EVAL" | "EVALSHA" => {
                writer.write_all(SCRIPT_REPLY)?;
                if behavior.close_after_script {
                    writer.flush()?;
                    return Ok(());
                }
            }
            _ => writer.write_all(b"+OK\r\n")?,
        }
        writer.flush()?;
    }
    Ok(())
}

fn read_command(reader: &mut BufReader<TcpStream>) -> io::Result<Option<Vec<String>>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let count = header(&line, '*')?;

    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line)?;
        let len = header(&line, '$')?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf)?;
        buf.truncate(len);
        parts.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(Some(parts))
}

fn header(line: &str, marker: char) -> io::Result<usize> {
    line.trim_end()
        .strip_prefix(marker)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("bad header {:?}", line)))
}
