//! Connection lifecycle for both ends of a sync.
//!
//! `PushSession` drives the sending side: handshake, one FileStart /
//! records / FileEnd exchange per file, then Done. `ServeSession` is the
//! receiving loop. Per-file failures are reported in-band and the batch
//! continues; a protocol or IO failure sends Fatal (best effort) and tears
//! the connection down, because a desynchronized reference cache cannot be
//! repaired in place.
//!
//! The exchange is half duplex per file: the receiver acks each FileEnd
//! with either its own FileEnd or an ErrorMsg before the next file starts.

use crate::error::{Result, WireError};
use crate::json::parse;
use crate::rpc::cache::RefCache;
use crate::rpc::codec::{CodecRegistry, SourceFileType};
use crate::rpc::protocol::{
    negotiate_version, read_frame, write_frame, Done, ErrorMsg, Fatal, FileEnd, FileStart, Hello,
    HelloFlags, MessageType, Record, VersionNegotiationResult, MAX_PATH_LEN,
};
use crate::rpc::receive::ReceiveQueue;
use crate::rpc::send::{SendQueue, SendStats};
use crate::tree::{NodeArena, NodeId};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

const MAX_ERROR_MESSAGE_LEN: usize = 512;

fn error_message(err: &WireError) -> String {
    err.to_string().chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

/// A path short enough for the str16 field of an ErrorMsg, truncating if the
/// path itself is what made the file unsendable.
fn wire_path(path: &str) -> String {
    if path.len() <= MAX_PATH_LEN {
        path.to_string()
    } else {
        path.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Applied on the remote side.
    Synced,
    /// Never sent: no codec, unrecognized extension, or unparseable source.
    Skipped,
    /// Sent and applied, but the remote side reported a failure for it.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// End-of-batch report from the sending side, including the receiver's
/// Done counters.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub files: Vec<FileOutcome>,
    pub files_ok: u64,
    pub files_err: u64,
    pub sent: SendStats,
    pub remote_files_ok: u64,
    pub remote_files_err: u64,
    pub remote_records: u64,
}

impl BatchReport {
    pub fn all_synced(&self) -> bool {
        self.files_err == 0 && self.remote_files_err == 0
    }
}

// =============================================================================
// Push (sending) side
// =============================================================================

pub struct PushSession<R, W> {
    reader: R,
    writer: W,
    arena: NodeArena,
    cache: RefCache,
    baselines: HashMap<String, NodeId>,
    codecs: CodecRegistry,
    stats: SendStats,
    outcomes: Vec<FileOutcome>,
    files_ok: u64,
    files_err: u64,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> PushSession<R, W> {
    /// Perform the Hello exchange and return a connected session.
    pub async fn connect(reader: R, writer: W, flags: HelloFlags) -> Result<Self> {
        Self::connect_with_codecs(reader, writer, flags, CodecRegistry::standard()).await
    }

    pub async fn connect_with_codecs(
        mut reader: R,
        mut writer: W,
        flags: HelloFlags,
        codecs: CodecRegistry,
    ) -> Result<Self> {
        write_frame(&mut writer, &Hello::new(flags).encode()).await?;
        let (msg_type, payload) = read_frame(&mut reader).await?;
        match msg_type {
            MessageType::Hello => {
                let hello = Hello::decode(payload)?;
                debug!(version = hello.version, "handshake complete");
            }
            MessageType::Fatal => {
                let fatal = Fatal::decode(payload)?;
                return Err(WireError::Protocol(format!(
                    "peer refused connection: {}",
                    fatal.message
                )));
            }
            other => {
                return Err(WireError::Protocol(format!(
                    "expected Hello, got {other:?}"
                )))
            }
        }
        Ok(PushSession {
            reader,
            writer,
            arena: NodeArena::new(),
            cache: RefCache::new(),
            baselines: HashMap::new(),
            codecs,
            stats: SendStats::default(),
            outcomes: Vec::new(),
            files_ok: 0,
            files_err: 0,
        })
    }

    /// The arena edited trees live in. Callers parse or build trees here,
    /// modify them, and push the new roots; identity-based diffing only
    /// pays off when the unchanged nodes keep their indices.
    pub fn arena_mut(&mut self) -> &mut NodeArena {
        &mut self.arena
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub fn stats(&self) -> SendStats {
        self.stats
    }

    pub fn baseline(&self, path: &str) -> Option<NodeId> {
        self.baselines.get(path).copied()
    }

    /// Parse `text` into the session arena and push the result. Each push of
    /// a path becomes the next baseline; re-parsed text shares no node
    /// indices with the previous version, so callers that want minimal diffs
    /// should edit the previous tree and use [`PushSession::push_tree`].
    pub async fn push_source(&mut self, path: &str, text: &str) -> Result<FileStatus> {
        // Dispatch before parsing so an unsupported file type is reported
        // as such, not as a parse failure in the wrong grammar.
        match self.codecs.for_path(path) {
            Ok(_) => {}
            Err(err) if !err.is_connection_fatal() => return self.record_skip(path, err).await,
            Err(err) => return Err(err),
        }
        match parse(&mut self.arena, path, text) {
            Ok(root) => self.push_tree(path, root).await,
            Err(err) if !err.is_connection_fatal() => self.record_skip(path, err).await,
            Err(err) => Err(err),
        }
    }

    /// Push a tree living in the session arena, diffed against the last
    /// pushed version of the same path. Per-file failures are recorded in
    /// the outcome and do not end the session; connection-fatal errors do.
    pub async fn push_tree(&mut self, path: &str, root: NodeId) -> Result<FileStatus> {
        match self.try_push(path, root).await {
            Ok(outcome) => {
                let status = outcome.status;
                if status == FileStatus::Synced {
                    self.files_ok += 1;
                } else {
                    self.files_err += 1;
                }
                self.outcomes.push(outcome);
                Ok(status)
            }
            Err(err) if !err.is_connection_fatal() => self.record_skip(path, err).await,
            Err(err) => Err(err),
        }
    }

    async fn record_skip(&mut self, path: &str, err: WireError) -> Result<FileStatus> {
        warn!(path, error = %err, "skipping file");
        self.files_err += 1;
        // Tell the peer so both Done counters agree.
        let notice = ErrorMsg {
            path: wire_path(path),
            code: err.code(),
            message: error_message(&err),
        };
        write_frame(&mut self.writer, &notice.encode()).await?;
        self.outcomes.push(FileOutcome {
            path: path.to_string(),
            status: FileStatus::Skipped,
            error: Some(err.to_string()),
        });
        Ok(FileStatus::Skipped)
    }

    async fn try_push(&mut self, path: &str, root: NodeId) -> Result<FileOutcome> {
        if path.len() > MAX_PATH_LEN {
            return Err(WireError::Encoding {
                path: wire_path(path),
                offset: 0,
                message: format!(
                    "path of {} bytes exceeds the wire limit of {MAX_PATH_LEN}",
                    path.len()
                ),
            });
        }
        let (file_type, codec) = self.codecs.for_path(path)?;
        let baseline = self.baselines.get(path).copied();

        let start = FileStart {
            path: path.to_string(),
            source_type: file_type.tag(),
        };
        write_frame(&mut self.writer, &start.encode()).await?;

        // Diff synchronously into a frame buffer, then flush. The queue is
        // pure computation; only the transport is async.
        let mut frames: Vec<Bytes> = Vec::new();
        let mut sink = |frame: Bytes| frames.push(frame);
        let mut queue = SendQueue::new(&self.arena, &mut self.cache, &mut self.stats, &mut sink);
        queue.send_node(codec, root, baseline)?;

        for frame in &frames {
            write_frame(&mut self.writer, frame).await?;
        }
        write_frame(
            &mut self.writer,
            &FileEnd {
                status: FileEnd::STATUS_OK,
            }
            .encode(),
        )
        .await?;

        // The receiver applied the tree before acking, so the baseline
        // advances even when the ack is a per-file error.
        self.baselines.insert(path.to_string(), root);

        let (msg_type, payload) = read_frame(&mut self.reader).await?;
        match msg_type {
            MessageType::FileEnd => {
                FileEnd::decode(payload)?;
                debug!(path, frames = frames.len(), "file synced");
                Ok(FileOutcome {
                    path: path.to_string(),
                    status: FileStatus::Synced,
                    error: None,
                })
            }
            MessageType::ErrorMsg => {
                let err = ErrorMsg::decode(payload)?;
                warn!(path, code = err.code, "peer rejected file: {}", err.message);
                Ok(FileOutcome {
                    path: path.to_string(),
                    status: FileStatus::Failed,
                    error: Some(err.message),
                })
            }
            MessageType::Fatal => {
                let fatal = Fatal::decode(payload)?;
                Err(WireError::Protocol(format!(
                    "peer reported fatal error: {}",
                    fatal.message
                )))
            }
            other => Err(WireError::Protocol(format!(
                "expected file ack, got {other:?}"
            ))),
        }
    }

    /// Close the batch: send Done, await the peer's Done, return the report.
    pub async fn finish(mut self) -> Result<BatchReport> {
        let done = Done {
            files_ok: self.files_ok,
            files_err: self.files_err,
            records: self.stats.records,
        };
        write_frame(&mut self.writer, &done.encode()).await?;

        let (msg_type, payload) = read_frame(&mut self.reader).await?;
        let remote = match msg_type {
            MessageType::Done => Done::decode(payload)?,
            MessageType::Fatal => {
                let fatal = Fatal::decode(payload)?;
                return Err(WireError::Protocol(format!(
                    "peer reported fatal error: {}",
                    fatal.message
                )));
            }
            other => {
                return Err(WireError::Protocol(format!(
                    "expected Done, got {other:?}"
                )))
            }
        };

        info!(
            files_ok = self.files_ok,
            files_err = self.files_err,
            records = self.stats.records,
            bytes = self.stats.bytes,
            "batch complete"
        );
        Ok(BatchReport {
            files: self.outcomes,
            files_ok: self.files_ok,
            files_err: self.files_err,
            sent: self.stats,
            remote_files_ok: remote.files_ok,
            remote_files_err: remote.files_err,
            remote_records: remote.records,
        })
    }
}

// =============================================================================
// Serve (receiving) side
// =============================================================================

/// Receiver counters, reported back in Done.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ServeSummary {
    pub files_ok: u64,
    pub files_err: u64,
    pub records: u64,
}

pub struct ServeSession<R, W> {
    reader: R,
    writer: W,
    arena: NodeArena,
    cache: RefCache,
    baselines: HashMap<String, NodeId>,
    codecs: CodecRegistry,
    verify: bool,
    summary: ServeSummary,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> ServeSession<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_codecs(reader, writer, CodecRegistry::standard())
    }

    pub fn with_codecs(reader: R, writer: W, codecs: CodecRegistry) -> Self {
        ServeSession {
            reader,
            writer,
            arena: NodeArena::new(),
            cache: RefCache::new(),
            baselines: HashMap::new(),
            codecs,
            verify: false,
            summary: ServeSummary::default(),
        }
    }

    /// Serve one connection to completion. On a connection-fatal error a
    /// Fatal frame is sent best-effort before the error propagates.
    pub async fn run(&mut self) -> Result<ServeSummary> {
        match self.serve_loop().await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                let fatal = Fatal {
                    code: err.code(),
                    message: error_message(&err),
                };
                let _ = write_frame(&mut self.writer, &fatal.encode()).await;
                Err(err)
            }
        }
    }

    async fn serve_loop(&mut self) -> Result<ServeSummary> {
        let (msg_type, payload) = read_frame(&mut self.reader).await?;
        if msg_type != MessageType::Hello {
            return Err(WireError::Protocol(format!(
                "expected Hello, got {msg_type:?}"
            )));
        }
        let hello = Hello::decode(payload)?;
        let version = match negotiate_version(hello.version) {
            VersionNegotiationResult::Supported(v) => v,
            VersionNegotiationResult::TooOld { peer, min_supported } => {
                return Err(WireError::Protocol(format!(
                    "peer version {peer} too old, minimum supported is {min_supported}"
                )))
            }
            VersionNegotiationResult::TooNew { peer, max_supported } => {
                return Err(WireError::Protocol(format!(
                    "peer version {peer} too new, maximum supported is {max_supported}"
                )))
            }
        };
        self.verify = hello.flags.contains(HelloFlags::VERIFY);
        write_frame(
            &mut self.writer,
            &Hello {
                version,
                flags: hello.flags,
            }
            .encode(),
        )
        .await?;
        debug!(version, verify = self.verify, "connection accepted");

        loop {
            let (msg_type, payload) = read_frame(&mut self.reader).await?;
            match msg_type {
                MessageType::FileStart => {
                    let start = FileStart::decode(payload)?;
                    self.handle_file(start).await?;
                }
                MessageType::ErrorMsg => {
                    // The sender skipped a file before ever starting it.
                    let err = ErrorMsg::decode(payload)?;
                    warn!(path = %err.path, code = err.code, "sender skipped file: {}", err.message);
                    self.summary.files_err += 1;
                }
                MessageType::Done => {
                    Done::decode(payload)?;
                    let done = Done {
                        files_ok: self.summary.files_ok,
                        files_err: self.summary.files_err,
                        records: self.summary.records,
                    };
                    write_frame(&mut self.writer, &done.encode()).await?;
                    info!(
                        files_ok = self.summary.files_ok,
                        files_err = self.summary.files_err,
                        records = self.summary.records,
                        "batch received"
                    );
                    return Ok(self.summary);
                }
                MessageType::Fatal => {
                    let fatal = Fatal::decode(payload)?;
                    return Err(WireError::Protocol(format!(
                        "peer reported fatal error: {}",
                        fatal.message
                    )));
                }
                other => {
                    return Err(WireError::Protocol(format!(
                        "unexpected {other:?} outside a file"
                    )))
                }
            }
        }
    }

    async fn handle_file(&mut self, start: FileStart) -> Result<()> {
        // Buffer the whole record stream first; replay is pure computation.
        let mut records = Vec::new();
        loop {
            let (msg_type, payload) = read_frame(&mut self.reader).await?;
            if msg_type == MessageType::FileEnd {
                FileEnd::decode(payload)?;
                break;
            }
            if !msg_type.is_record() {
                return Err(WireError::Protocol(format!(
                    "unexpected {msg_type:?} inside file {}",
                    start.path
                )));
            }
            records.push(Record::decode(msg_type, payload)?);
        }
        self.summary.records += records.len() as u64;

        match self.apply_file(&start, records) {
            Ok(()) => {
                self.summary.files_ok += 1;
                write_frame(
                    &mut self.writer,
                    &FileEnd {
                        status: FileEnd::STATUS_OK,
                    }
                    .encode(),
                )
                .await?;
                Ok(())
            }
            Err(err) if !err.is_connection_fatal() => {
                warn!(path = %start.path, error = %err, "file rejected");
                self.summary.files_err += 1;
                let reply = ErrorMsg {
                    path: start.path.clone(),
                    code: err.code(),
                    message: error_message(&err),
                };
                write_frame(&mut self.writer, &reply.encode()).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn apply_file(&mut self, start: &FileStart, records: Vec<Record>) -> Result<()> {
        let file_type = SourceFileType::from_tag(start.source_type).ok_or_else(|| {
            WireError::Protocol(format!("unknown source type tag {}", start.source_type))
        })?;
        // A registry mismatch is fatal here: the sender has already assigned
        // cache indices for this file's subtrees, and skipping them would
        // desynchronize every later reference.
        let codec = self.codecs.get(file_type).map_err(|err| {
            WireError::Protocol(format!(
                "cannot apply {}: {err} (codec registries differ)",
                start.path
            ))
        })?;

        let baseline = self.baselines.get(&start.path).copied();
        let mut queue = ReceiveQueue::new(&mut self.arena, &mut self.cache, records);
        let root = queue.receive_node(codec, baseline)?;
        if !queue.is_drained() {
            return Err(WireError::Protocol(format!(
                "trailing records after the root tree of {}",
                start.path
            )));
        }

        // The tree is applied and the caches agree from here on, whether or
        // not verification passes.
        self.baselines.insert(start.path.clone(), root);

        if self.verify {
            codec.verify(&self.arena, root, &start.path)?;
        }
        Ok(())
    }

    /// The arena holding every tree applied so far. Exposed for consumers
    /// that print or inspect synced trees after the session ends.
    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub fn baseline(&self, path: &str) -> Option<NodeId> {
        self.baselines.get(path).copied()
    }
}
