//! Durable packet table.
//!
//! Every state change of the packet table is appended to a single journal
//! file as a framed `PacketOp`. Opening the journal replays it into a
//! `MemoryPacketStore`; a torn or corrupt tail left by a crash is cut off.
//! Compaction rewrites the file with only the packets still waiting for a
//! reply.

use crate::error::StorageError;
use crate::frame::{Frame, FrameType, FRAME_HEADER_SIZE};
use anisync_core::{CoreError, MemoryPacketStore, OutgoingPacket, PacketOp, PacketStore};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Payload of a checkpoint record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Checkpoint {
    next_tag: u64,
}

/// Result of a compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// Completed packets no longer in the journal.
    pub packets_dropped: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl CompactionResult {
    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Journal-backed `PacketStore`.
pub struct JournalPacketStore {
    path: PathBuf,
    file: File,
    memory: MemoryPacketStore,
    sequence: u64,
    size: u64,
    sync_on_write: bool,
}

impl JournalPacketStore {
    /// Opens or creates the journal at `path` and replays it.
    ///
    /// With `sync_on_write` every append is followed by `sync_data`.
    pub fn open(path: impl AsRef<Path>, sync_on_write: bool) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let file_len = file.metadata()?.len();

        let (frames, valid_len) = read_frames(&mut file)?;
        if valid_len < file_len {
            warn!(
                "Truncating packet journal {} at offset {} ({} bytes dropped)",
                path.display(),
                valid_len,
                file_len - valid_len
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;

        let mut memory = MemoryPacketStore::new();
        let mut sequence = 0;
        for frame in &frames {
            replay(&mut memory, frame)?;
            sequence = frame.sequence;
        }

        info!(
            "Opened packet journal {} ({} packets, {} pending)",
            path.display(),
            memory.len(),
            memory.pending_len()
        );

        Ok(Self {
            path,
            file,
            memory,
            sequence,
            size: valid_len,
            sync_on_write,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current journal size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Sequence number of the last record written.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The replayed packet table.
    pub fn memory(&self) -> &MemoryPacketStore {
        &self.memory
    }

    /// Forces pending writes to disk.
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Rewrites the journal keeping only packets without a reply.
    ///
    /// The new file is written next to the old one and renamed over it, so
    /// a crash leaves either the old or the new journal intact.
    pub fn compact(&mut self) -> Result<CompactionResult, StorageError> {
        let bytes_before = self.size;
        let next_tag = self.memory.next_tag();

        let mut compacted = MemoryPacketStore::new();
        compacted.bump_next_tag(next_tag);

        let mut buf = BytesMut::new();
        let mut sequence = self.sequence;
        let mut push = |frame_type: FrameType, payload: Vec<u8>| -> Result<(), StorageError> {
            sequence += 1;
            let frame = Frame::new(frame_type, sequence, Bytes::from(payload));
            buf.extend_from_slice(&frame.encode()?);
            Ok(())
        };

        push(
            FrameType::Checkpoint,
            serde_json::to_vec(&Checkpoint { next_tag })?,
        )?;

        let mut packets_dropped = 0;
        for packet in self.memory.packets() {
            if packet.got_reply {
                packets_dropped += 1;
                continue;
            }
            for op in ops_for(packet) {
                push(FrameType::PacketOp, serde_json::to_vec(&op)?)?;
                compacted.apply(&op);
            }
        }

        let tmp_path = self.tmp_path();
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;

        self.file = file;
        self.memory = compacted;
        self.sequence = sequence;
        self.size = buf.len() as u64;

        let result = CompactionResult {
            packets_dropped,
            bytes_before,
            bytes_after: self.size,
        };
        if packets_dropped > 0 {
            info!(
                "Compacted packet journal: dropped {} packets, reclaimed {} bytes",
                packets_dropped,
                result.bytes_reclaimed()
            );
        }
        Ok(result)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Writes `op` and applies it to the table.
    fn append(&mut self, op: PacketOp) -> Result<(), StorageError> {
        let payload = serde_json::to_vec(&op)?;
        let frame = Frame::new(FrameType::PacketOp, self.sequence + 1, Bytes::from(payload));
        let encoded = frame.encode()?;

        self.file.write_all(&encoded)?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }
        self.sequence += 1;
        self.size += encoded.len() as u64;

        debug!("journal #{}: {:?}", self.sequence, op);
        self.memory.apply(&op);
        Ok(())
    }
}

/// Reads records until the end of the file or the first damaged record.
///
/// Returns the records and the length of the intact prefix.
fn read_frames(file: &mut File) -> Result<(Vec<Frame>, u64), StorageError> {
    file.seek(SeekFrom::Start(0))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    let mut buf = BytesMut::from(&data[..]);

    let mut frames = Vec::new();
    let mut offset = 0u64;
    while buf.len() >= FRAME_HEADER_SIZE {
        match Frame::decode(&mut buf, offset) {
            Ok(Some(frame)) => {
                offset += frame.disk_size() as u64;
                frames.push(frame);
            }
            Ok(None) => break,
            Err(e) if e.is_corruption() => {
                warn!("Packet journal damaged: {}", e);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok((frames, offset))
}

fn replay(memory: &mut MemoryPacketStore, frame: &Frame) -> Result<(), StorageError> {
    match frame.frame_type {
        FrameType::PacketOp => {
            let op: PacketOp = serde_json::from_slice(&frame.payload)?;
            memory.apply(&op);
        }
        FrameType::Checkpoint => {
            let checkpoint: Checkpoint = serde_json::from_slice(&frame.payload)?;
            memory.bump_next_tag(checkpoint.next_tag);
        }
    }
    Ok(())
}

/// Ops that rebuild `packet` from nothing.
fn ops_for(packet: &OutgoingPacket) -> Vec<PacketOp> {
    let mut ops = vec![PacketOp::Enqueued {
        tag: packet.tag,
        command: packet.command.clone(),
    }];
    ops.extend((0..packet.retry_count).map(|_| PacketOp::Retried { tag: packet.tag }));
    if let Some(at) = packet.sent_at {
        ops.push(PacketOp::Sent {
            tag: packet.tag,
            at,
        });
    }
    ops
}

impl PacketStore for JournalPacketStore {
    fn enqueue(&mut self, command: &str) -> Result<u64, CoreError> {
        let op = self.memory.enqueue_op(command);
        let tag = op.tag();
        self.append(op)?;
        Ok(tag)
    }

    fn mark_sent(&mut self, tag: u64, at: DateTime<Utc>) -> Result<(), CoreError> {
        self.memory.check(tag)?;
        Ok(self.append(PacketOp::Sent { tag, at })?)
    }

    fn mark_replied(&mut self, tag: u64, code: &str) -> Result<(), CoreError> {
        self.memory.check(tag)?;
        Ok(self.append(PacketOp::Replied {
            tag,
            code: code.to_string(),
        })?)
    }

    fn mark_retried(&mut self, tag: u64) -> Result<(), CoreError> {
        self.memory.check(tag)?;
        Ok(self.append(PacketOp::Retried { tag })?)
    }

    fn requeue(&mut self, tag: u64) -> Result<(), CoreError> {
        self.memory.check(tag)?;
        Ok(self.append(PacketOp::Requeued { tag })?)
    }

    fn peek_next_sendable(&self) -> Option<OutgoingPacket> {
        self.memory.peek_next_sendable()
    }

    fn get(&self, tag: u64) -> Option<OutgoingPacket> {
        self.memory.get(tag)
    }

    fn find_unsent(&self, command: &str) -> Option<u64> {
        self.memory.find_unsent(command)
    }

    fn in_flight(&self) -> Option<OutgoingPacket> {
        self.memory.in_flight()
    }

    fn len(&self) -> usize {
        self.memory.len()
    }

    fn pending_len(&self) -> usize {
        self.memory.pending_len()
    }
}
