/*!
The `sample` module implements the tree-shaped sample filesystem: directory
listings, recursive move and delete (the device only renames files, not
directories), and the block-sequenced PCM transfer with its 64-byte metadata
prologue.
!*/

use super::msg;
use super::{path_op, src_dst_op};
use crate::backend::{Backend, REST_TIME};
use crate::bytes::ByteReader;
use crate::error::{ExistsSnafu, LibResult, NotFoundSnafu, ReplySnafu};
use crate::fs::{chain_path, split_path, Filesystem, Item, ItemIterator, ItemKind};
use crate::transfer::JobControl;
use crate::{text, Result};
use log::{debug, warn};
use snafu::ResultExt;
use std::thread;

/// Transfer block length, prologue included on the first block.
const BLOCK_BYTES: usize = 0x2000;

/// Length of the metadata prologue that precedes the PCM body on the wire.
pub(crate) const PROLOGUE_LEN: usize = 64;

/// Offset of the PCM payload within a read-block reply.
const READ_PAYLOAD: usize = 22;

/// Builds the 64-byte prologue for a sample of `total_bytes` of 16-bit PCM:
/// the 48 kHz rate tag, the default note, total length, and a full-length
/// default loop.
pub(crate) fn prologue(total_bytes: u32) -> [u8; PROLOGUE_LEN] {
    let mut bytes = [0u8; PROLOGUE_LEN];
    bytes[6] = 0xBB;
    bytes[7] = 0x80;
    bytes[12] = 0x7F;
    bytes[16..20].copy_from_slice(&total_bytes.to_be_bytes());
    // loop start at 20 and loop type at 24 stay zero
    bytes[28..32].copy_from_slice(&((total_bytes >> 1).wrapping_sub(1)).to_be_bytes());
    bytes
}

/// The sample filesystem.
pub(crate) struct SampleFs;

impl Filesystem for SampleFs {
    fn id(&self) -> u32 {
        super::FS_SAMPLES
    }

    fn name(&self) -> &'static str {
        "sample"
    }

    fn download_ext(&self) -> &'static str {
        "wav"
    }

    fn readdir(&self, backend: &Backend, dir: &str) -> Result<ItemIterator> {
        let request = msg::new_msg_path(&[msg::OP_SAMPLE_READ_DIR], dir)?;
        let reply = msg::tx_and_rx(backend, request)?;
        if reply.len() == 5 && path_type(backend, dir)? != ItemKind::Dir {
            return Err(crate::error::NotDirSnafu { path: dir }.build().into());
        }
        Ok(ItemIterator::new(SampleDirIter {
            msg: reply,
            pos: 5,
        }))
    }

    fn mkdir(&self, backend: &Backend, path: &str) -> Result<()> {
        Ok(path_op(backend, &[msg::OP_SAMPLE_CREATE_DIR], path)?)
    }

    fn delete(&self, backend: &Backend, path: &str) -> Result<()> {
        if path_type(backend, path)? == ItemKind::Dir {
            debug!("deleting sample dir '{}'", path);
            for item in self.readdir(backend, path)? {
                let item = item?;
                self.delete(backend, &chain_path(path, &item.name))?;
            }
            Ok(path_op(backend, &[msg::OP_SAMPLE_DELETE_DIR], path)?)
        } else {
            Ok(path_op(backend, &[msg::OP_SAMPLE_DELETE_FILE], path)?)
        }
    }

    fn rename(&self, backend: &Backend, src: &str, dst: &str) -> Result<()> {
        self.move_item(backend, src, dst)
    }

    /// The device renames files only, so a directory moves as mkdir plus a
    /// recursive per-entry move plus rmdir.
    fn move_item(&self, backend: &Backend, src: &str, dst: &str) -> Result<()> {
        debug!("moving '{}' to '{}'", src, dst);
        match path_type(backend, src)? {
            ItemKind::File => Ok(src_dst_op(
                backend,
                &[msg::OP_SAMPLE_RENAME_FILE],
                src,
                dst,
            )?),
            ItemKind::Dir => {
                self.mkdir(backend, dst)?;
                for item in self.readdir(backend, src)? {
                    let item = item?;
                    self.move_item(
                        backend,
                        &chain_path(src, &item.name),
                        &chain_path(dst, &item.name),
                    )?;
                }
                Ok(path_op(backend, &[msg::OP_SAMPLE_DELETE_DIR], src)?)
            }
            ItemKind::None => Err(NotFoundSnafu { path: src }.build().into()),
        }
    }

    fn download(
        &self,
        backend: &Backend,
        path: &str,
        output: &mut Vec<u8>,
        control: &JobControl,
    ) -> Result<()> {
        let request = msg::new_msg_path(&[msg::OP_SAMPLE_OPEN_READER], path)?;
        let reply = msg::tx_and_rx(backend, request)?;
        if msg::status(&reply) == 0 {
            return Err(NotFoundSnafu { path }.build().into());
        }
        let (id, total) = read_id_and_size(&reply)?;
        debug!("downloading '{}': {} bytes (id {})", path, total, id);

        let mut raw: Vec<u8> = Vec::with_capacity(total as usize);
        let mut next = 0u32;
        let mut skip = PROLOGUE_LEN;
        let mut cancelled = false;
        while next < total {
            if !control.is_active() {
                cancelled = true;
                break;
            }
            let size = (total - next).min(BLOCK_BYTES as u32);
            let mut request = msg::new_msg(&[
                msg::OP_SAMPLE_READ_BLOCK,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
            ]);
            request.set_be32(5, id);
            request.set_be32(9, size);
            request.set_be32(13, next);
            let reply = msg::tx_and_rx(backend, request)?;
            let payload = reply
                .get(READ_PAYLOAD + skip..READ_PAYLOAD + size as usize)
                .ok_or_else(|| protocol_e!("short read-block reply ({} bytes)", reply.len()))?;
            raw.extend_from_slice(payload);
            next += size;
            skip = 0; // only the first block carries the prologue
            control.report(f64::from(next) / f64::from(total));
            thread::sleep(REST_TIME);
        }

        // Wire samples are big-endian; the caller gets host byte order.
        for pair in raw.chunks_exact(2) {
            let value = i16::from_be_bytes([pair[0], pair[1]]);
            output.extend_from_slice(&value.to_ne_bytes());
        }

        let mut close = msg::new_msg(&[msg::OP_SAMPLE_CLOSE_READER]);
        close.put_be32(id);
        // Reply: x, x, x, x, op, id and received byte count
        let _ = msg::tx_and_rx(backend, close)?;

        if cancelled {
            return Err(crate::error::LibError::Cancelled.into());
        }
        Ok(())
    }

    fn upload(
        &self,
        backend: &Backend,
        path: &str,
        data: &[u8],
        control: &JobControl,
    ) -> Result<()> {
        if data.len() % 2 != 0 {
            inval!("sample data length {} is not a whole number of frames", data.len());
        }
        let total = data.len() as u32;
        let mut request = msg::new_msg_path(&[msg::OP_SAMPLE_OPEN_WRITER, 0, 0, 0, 0], path)?;
        request.set_be32(5, total + PROLOGUE_LEN as u32);
        let reply = msg::tx_and_rx(backend, request)?;
        if msg::status(&reply) == 0 {
            warn!("writer rejected for '{}' ({})", path, msg::device_string(&reply));
            return Err(ExistsSnafu { path }.build().into());
        }
        let (id, _) = read_id_and_size(&reply)?;
        debug!("uploading '{}': {} bytes (id {})", path, total, id);

        let mut transferred = 0usize;
        let mut seq = 0u32;
        while transferred < data.len() {
            if !control.is_active() {
                return Err(crate::error::LibError::Cancelled.into());
            }
            let mut request = msg::new_msg(&[
                msg::OP_SAMPLE_WRITE_BLOCK,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
            ]);
            request.set_be32(5, id);
            request.set_be32(13, (BLOCK_BYTES as u32) * seq);
            let mut budget = BLOCK_BYTES;
            let mut consumed = 0usize;
            if seq == 0 {
                request.put_bytes(&prologue(total));
                consumed = PROLOGUE_LEN;
                budget -= PROLOGUE_LEN;
            }
            let remaining = &data[transferred..];
            let body_len = budget.min(remaining.len());
            // Host-endian samples go out big-endian.
            for pair in remaining[..body_len].chunks_exact(2) {
                let value = i16::from_ne_bytes([pair[0], pair[1]]);
                request.put_bytes(&value.to_be_bytes());
            }
            transferred += body_len;
            consumed += body_len;
            request.set_be32(9, consumed as u32);
            let reply = msg::tx_and_rx(backend, request)?;
            // Reply: x, x, x, x, op, [0 (error), 1 (success)]...
            if msg::status(&reply) == 0 {
                warn!("unexpected status on write block {}", seq);
            }
            seq += 1;
            control.report(transferred as f64 / data.len() as f64);
            thread::sleep(REST_TIME);
        }
        debug!("{} bytes sent", transferred);

        let mut close = msg::new_msg(&[msg::OP_SAMPLE_CLOSE_WRITER, 0, 0, 0, 0, 0, 0, 0, 0]);
        close.set_be32(5, id);
        close.set_be32(9, transferred as u32 + PROLOGUE_LEN as u32);
        let reply = msg::tx_and_rx(backend, close)?;
        if msg::status(&reply) == 0 {
            warn!("unexpected status on close");
        }
        Ok(())
    }
}

// Reply: x, x, x, x, op, [0 (error), 1 (success)], id, size
fn read_id_and_size(reply: &[u8]) -> LibResult<(u32, u32)> {
    let mut reader = ByteReader::new(reply);
    reader.seek(msg::MSG_STATUS + 1);
    let id = reader.read_be32().context(ReplySnafu { site: site!() })?;
    let size = reader.read_be32().context(ReplySnafu { site: site!() })?;
    Ok((id, size))
}

/// Classifies a path by looking it up in its parent's listing.
pub(crate) fn path_type(backend: &Backend, path: &str) -> Result<ItemKind> {
    if path == "/" {
        return Ok(ItemKind::Dir);
    }
    let (parent, name) = split_path(path);
    let listing = match SampleFs.readdir(backend, parent) {
        Ok(listing) => listing,
        Err(_) => return Ok(ItemKind::None),
    };
    for item in listing {
        let item = item?;
        if item.name == name {
            return Ok(item.kind);
        }
    }
    Ok(ItemKind::None)
}

/// Walks the entries of a directory-listing reply. The iterator owns the
/// reply and yields one parsed item per entry.
struct SampleDirIter {
    msg: Vec<u8>,
    pos: usize,
}

impl SampleDirIter {
    fn parse_next(&mut self) -> LibResult<Item> {
        let mut reader = ByteReader::new(&self.msg);
        reader.seek(self.pos);
        let _hash = reader.read_be32().context(ReplySnafu { site: site!() })?;
        let size = reader.read_be32().context(ReplySnafu { site: site!() })?;
        reader.skip(1).context(ReplySnafu { site: site!() })?;
        let kind = match reader.read_u8().context(ReplySnafu { site: site!() })? {
            b'D' => ItemKind::Dir,
            b'F' => ItemKind::File,
            _ => ItemKind::None,
        };
        let name = reader.read_cstring().context(ReplySnafu { site: site!() })?;
        let item = Item {
            name: text::from_cp1252(name),
            size,
            kind,
            index: None,
            attrs: Default::default(),
        };
        self.pos = reader.position();
        Ok(item)
    }
}

impl Iterator for SampleDirIter {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.msg.len() {
            return None;
        }
        match self.parse_next() {
            Ok(item) => Some(Ok(item)),
            Err(e) => {
                self.pos = self.msg.len();
                Some(Err(e.into()))
            }
        }
    }
}
