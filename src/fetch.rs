//! Mailbox watcher — owns the persistent IMAP session.
//!
//! Runs on a dedicated blocking thread and cycles through
//! select → search UNSEEN → fetch → filter → handoff → mark \Seen.
//! Connectivity failures are retried forever at a fixed interval;
//! protocol errors mid-cycle force a clean reconnect. The session is
//! never shared with the dispatch side — the mpsc channel is the only
//! state crossing the two loops.

use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use imap_proto::types::Envelope;
use native_tls::{TlsConnector, TlsStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{EmailSettings, split_host_port};
use crate::error::MailError;

/// Fixed delay before re-dialing after a connect/login/cycle failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// Delay before retrying a failed (but not connection-fatal) select.
const SELECT_RETRY_DELAY: Duration = Duration::from_secs(3);
/// Sleep when the search found nothing unread.
const IDLE_DELAY: Duration = Duration::from_secs(60);
/// Sleep after processing a non-empty batch.
const BATCH_DELAY: Duration = Duration::from_secs(30);

/// Per-cycle cap on processed messages; bounds backend call volume.
pub const MAX_BATCH: usize = 3;

/// Subject substrings marking a message as a chat-history digest.
pub const SUBJECT_MARKERS: [&str; 2] = ["的聊天记录", "Chat History"];

type MailSession = imap::Session<TlsStream<TcpStream>>;

/// One message handed from the watcher to the dispatcher. Immutable once
/// fetched; body sections are read eagerly so the dispatcher owns plain
/// bytes and never touches the IMAP session.
#[derive(Debug, Clone)]
pub struct FetchedMail {
    pub seq: u32,
    pub subject: String,
    pub sender: Option<String>,
    pub sections: Vec<Vec<u8>>,
}

/// Spawn the watcher on a blocking thread. It stops when `shutdown` is
/// set, dropping its channel sender so the dispatcher can drain and exit.
pub fn spawn_fetcher(
    settings: EmailSettings,
    tx: mpsc::Sender<FetchedMail>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || run(&settings, &tx, &shutdown))
}

fn run(settings: &EmailSettings, tx: &mpsc::Sender<FetchedMail>, shutdown: &AtomicBool) {
    info!(server = %settings.imap_server, "connecting to mailbox");
    let Some(mut session) = reconnect(settings, shutdown) else {
        return;
    };

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match run_cycle(&mut session, settings, tx, shutdown) {
            Ok(Cycle::Idle) => {
                debug!("no new unread messages");
                if !sleep_unless_shutdown(IDLE_DELAY, shutdown) {
                    break;
                }
            }
            Ok(Cycle::Processed) => {
                if !sleep_unless_shutdown(BATCH_DELAY, shutdown) {
                    break;
                }
            }
            Ok(Cycle::Stopped) => break,
            Err(e) => {
                warn!("mailbox cycle failed: {e}; reconnecting");
                let _ = session.logout();
                match reconnect(settings, shutdown) {
                    Some(fresh) => session = fresh,
                    None => break,
                }
            }
        }
    }

    let _ = session.logout();
    info!("mailbox watcher stopped");
}

/// Dial + login until it succeeds or shutdown is requested. Never gives
/// up on its own; every failure waits out the fixed delay and retries.
fn reconnect(settings: &EmailSettings, shutdown: &AtomicBool) -> Option<MailSession> {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return None;
        }
        match connect_once(settings) {
            Ok(session) => {
                info!(mailbox = %settings.mailbox, "connected and logged in");
                return Some(session);
            }
            Err(e) => {
                warn!("mailbox connect failed: {e}");
                if !sleep_unless_shutdown(RECONNECT_DELAY, shutdown) {
                    return None;
                }
            }
        }
    }
}

fn connect_once(settings: &EmailSettings) -> Result<MailSession, MailError> {
    let (host, port) = split_host_port(&settings.imap_server);
    let tls = TlsConnector::builder().build()?;
    let client = imap::connect((host.as_str(), port), host.as_str(), &tls)
        .map_err(|e| MailError::Dial(e.to_string()))?;
    match client.login(&settings.username, &settings.password) {
        Ok(session) => Ok(session),
        // Dropping the returned client closes the half-open connection.
        Err((e, _client)) => Err(MailError::Login(e.to_string())),
    }
}

enum Cycle {
    /// Nothing unread this cycle.
    Idle,
    /// A batch was fetched (matching or not).
    Processed,
    /// Shutdown requested or dispatcher gone.
    Stopped,
}

fn run_cycle(
    session: &mut MailSession,
    settings: &EmailSettings,
    tx: &mpsc::Sender<FetchedMail>,
    shutdown: &AtomicBool,
) -> Result<Cycle, MailError> {
    // Select read-write each cycle. Connection-level failures bubble up as
    // cycle errors (full reconnect); anything else retries select alone.
    loop {
        match session.select(&settings.mailbox) {
            Ok(_) => break,
            Err(e) if is_connection_error(&e) => return Err(MailError::Select(e.to_string())),
            Err(e) => {
                warn!(mailbox = %settings.mailbox, "select failed: {e}; retrying");
                if !sleep_unless_shutdown(SELECT_RETRY_DELAY, shutdown) {
                    return Ok(Cycle::Stopped);
                }
            }
        }
    }

    let ids = session
        .search("UNSEEN")
        .map_err(|e| MailError::Search(e.to_string()))?;
    if ids.is_empty() {
        return Ok(Cycle::Idle);
    }

    let batch = limit_batch(ids.into_iter().collect(), MAX_BATCH);
    let seq_set = batch
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let mut matched = Vec::new();
    {
        let fetches = session
            .fetch(&seq_set, "(ENVELOPE BODY[TEXT])")
            .map_err(|e| MailError::Fetch(e.to_string()))?;
        for msg in fetches.iter() {
            let Some(envelope) = msg.envelope() else {
                continue;
            };
            let subject = envelope
                .subject
                .as_ref()
                .map(|raw| decode_header(raw))
                .unwrap_or_default();
            if !subject_matches(&subject) {
                debug!(seq = msg.message, subject = %subject, "leaving non-digest message unread");
                continue;
            }
            let sections: Vec<Vec<u8>> = [msg.body(), msg.text()]
                .into_iter()
                .flatten()
                .map(<[u8]>::to_vec)
                .collect();
            matched.push(FetchedMail {
                seq: msg.message,
                subject,
                sender: envelope_sender(envelope),
                sections,
            });
        }
    }

    // Ascending sequence order within the batch; the dispatcher preserves it.
    matched.sort_by_key(|m| m.seq);
    for mail in matched {
        info!(seq = mail.seq, subject = %mail.subject, "dispatching chat digest");
        let seq = mail.seq;
        if tx.blocking_send(mail).is_err() {
            info!("dispatcher gone, stopping watcher");
            return Ok(Cycle::Stopped);
        }
        // Mark seen only after a successful handoff.
        session
            .store(seq.to_string(), "+FLAGS (\\Seen)")
            .map_err(|e| MailError::Store(e.to_string()))?;
    }

    Ok(Cycle::Processed)
}

fn is_connection_error(e: &imap::Error) -> bool {
    matches!(e, imap::Error::ConnectionLost | imap::Error::Io(_))
}

/// Keep at most `cap` of the highest sequence numbers, ascending.
pub fn limit_batch(mut ids: Vec<u32>, cap: usize) -> Vec<u32> {
    ids.sort_unstable();
    if ids.len() > cap {
        ids.split_off(ids.len() - cap)
    } else {
        ids
    }
}

/// Does this subject mark a chat-history digest?
pub fn subject_matches(subject: &str) -> bool {
    SUBJECT_MARKERS.iter().any(|m| subject.contains(m))
}

/// Decode an RFC 2047 encoded header value (subjects arrive as
/// `=?utf-8?B?...?=` words from most providers).
pub fn decode_header(raw: &[u8]) -> String {
    // mailparse wants a full "Key: value" header line.
    let mut line = b"Subject: ".to_vec();
    line.extend_from_slice(raw);
    line.extend_from_slice(b"\r\n");
    match mailparse::parse_header(&line) {
        Ok((header, _)) => header.get_value(),
        Err(_) => String::from_utf8_lossy(raw).into_owned(),
    }
}

fn envelope_sender(envelope: &Envelope) -> Option<String> {
    let addresses = envelope.sender.as_ref().or(envelope.from.as_ref())?;
    let address = addresses.first()?;
    let mailbox = address.mailbox.as_ref()?;
    let host = address.host.as_ref()?;
    Some(format!(
        "{}@{}",
        String::from_utf8_lossy(mailbox),
        String::from_utf8_lossy(host)
    ))
}

/// Sleep in 1s slices so shutdown is observed promptly. Returns `false`
/// when shutdown was requested.
fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(Duration::from_secs(1));
        std::thread::sleep(step);
        remaining -= step;
    }
    !shutdown.load(Ordering::Relaxed)
}
