//! atgw-hello: connect to a gateway, keep a session alive, and resume it
//! whenever the transport drops.
//!
//! Every idle read timeout posts `session <id> send index <n>`; received
//! messages are logged. The program exits when the session closes for a
//! reason that does not allow reconnecting, or a handshake fails.

mod host;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use atgw_core::{CloseReason, CryptType, Error, Session, SessionConfig, SystemEnv};
use bytes::Bytes;
use clap::Parser;
use host::HelloHandler;
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver},
    time::{Instant, sleep, sleep_until},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const READ_BUFFER: usize = 8 * 1024;
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "atgw-hello", version, about = "Drive an atgw session over TCP")]
struct Cli {
    /// Gateway host name or address
    host: String,

    /// Gateway port
    port: u16,

    /// Cipher to propose
    #[arg(long, default_value = "xchacha20-poly1305")]
    crypt: String,

    /// Idle read timeout before posting the next message, in milliseconds
    #[arg(long, default_value_t = 2000)]
    read_timeout_ms: u64,

    /// Automatic ping period in seconds
    #[arg(long)]
    ping_interval: Option<u64>,
}

#[derive(Debug, Error)]
enum HelloError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("session: {0}")]
    Session(#[from] Error),
    #[error("unknown crypt type {0:?}")]
    UnknownCrypt(String),
    #[error("transport lost before the handshake completed")]
    LostBeforeHandshake,
}

/// What a new connection needs to resume the session.
#[derive(Debug)]
struct Resume {
    session_id: u64,
    crypt: CryptType,
    secret: Vec<u8>,
    keybits: u32,
}

impl Resume {
    fn capture(session: &Session) -> Option<Self> {
        if !session.is_handshake_done() {
            return None;
        }
        Some(Self {
            session_id: session.session_id(),
            crypt: session.crypt_type()?,
            secret: session.secret().to_vec(),
            keybits: session.keybits(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), HelloError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if CryptType::from_name(&cli.crypt).is_none() {
        return Err(HelloError::UnknownCrypt(cli.crypt));
    }
    let config = SessionConfig {
        ping_interval: cli.ping_interval.map(Duration::from_secs),
        ..SessionConfig::default()
    };

    let exit = Arc::new(AtomicBool::new(false));
    let mut resume: Option<Resume> = None;
    let mut seq = 0u64;

    while !exit.load(Ordering::Relaxed) {
        let stream = match TcpStream::connect((cli.host.as_str(), cli.port)).await {
            Ok(stream) => stream,
            Err(err) if resume.is_some() => {
                warn!(%err, "reconnect failed, retrying");
                sleep(RETRY_DELAY).await;
                continue;
            },
            Err(err) => return Err(err.into()),
        };
        info!(host = %cli.host, port = cli.port, "connected");

        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let handler = HelloHandler::new(writes_tx, Arc::clone(&exit));
        let mut session = Session::new(config.clone(), Arc::new(SystemEnv), Box::new(handler))?;

        match &resume {
            None => session.start_session(&cli.crypt)?,
            Some(r) => {
                session.reconnect_session(r.session_id, r.crypt.name(), &r.secret, r.keybits)?;
            },
        }

        let connection = Connection {
            session: &mut session,
            writes: writes_rx,
            exit: &exit,
            read_timeout: Duration::from_millis(cli.read_timeout_ms),
        };
        connection.run(stream, &mut seq).await?;

        if let Some(captured) = Resume::capture(&session) {
            resume = Some(captured);
        }
        if !session.is_closing() {
            // Transport lost under a live session
            if session.is_writing() {
                session.notify_write_done(Err(Error::Network))?;
            } else {
                session.close(CloseReason::RESET)?;
            }
        }
        if resume.is_none() && !exit.load(Ordering::Relaxed) {
            return Err(HelloError::LostBeforeHandshake);
        }
    }

    info!("exiting");
    Ok(())
}

struct Connection<'a> {
    session: &'a mut Session,
    writes: UnboundedReceiver<Bytes>,
    exit: &'a AtomicBool,
    read_timeout: Duration,
}

impl Connection<'_> {
    /// Pump one transport until it drops, the session closes, or the host
    /// decides to exit.
    async fn run(mut self, stream: TcpStream, seq: &mut u64) -> Result<(), HelloError> {
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = vec![0u8; READ_BUFFER];
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let idle = sleep_until(Instant::now() + self.read_timeout);
        tokio::pin!(idle);

        loop {
            // A closing session still drains its kickoff before we leave
            let leaving = self.exit.load(Ordering::Relaxed) && !self.session.is_closing();
            if leaving || self.session.is_closed() {
                return Ok(());
            }

            tokio::select! {
                Some(data) = self.writes.recv() => {
                    let status = writer.write_all(&data).await.map_err(|err| {
                        warn!(%err, "write failed");
                        Error::Network
                    });
                    self.session.notify_write_done(status)?;
                },
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!("gateway closed the connection");
                        return Ok(());
                    },
                    Ok(n) => {
                        idle.as_mut().reset(Instant::now() + self.read_timeout);
                        if let Err(err) = self.session.read_from(&buf[..n]) {
                            warn!(%err, "received data rejected");
                        }
                    },
                    Err(err) => {
                        warn!(%err, "read failed");
                        return Ok(());
                    },
                },
                () = &mut idle => {
                    idle.as_mut().reset(Instant::now() + self.read_timeout);
                    if self.session.is_handshake_done() && !self.session.is_closing() {
                        let text = format!("session {} send index {}", self.session.session_id(), seq);
                        self.session.post_message(text.as_bytes())?;
                        info!("send {text}");
                        *seq += 1;
                    }
                },
                _ = ticker.tick() => self.session.tick()?,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, logging out");
                    self.session.close(CloseReason::LOGOUT)?;
                    self.exit.store(true, Ordering::Relaxed);
                },
            }
        }
    }
}
