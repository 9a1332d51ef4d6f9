/*!
The `data` module implements the slot-indexed data filesystem (projects,
sounds, patterns): typed directory listings and the job-id-correlated chunked
transfer with per-block CRCs and per-mille progress reports.
!*/

use super::{crc32, msg, path_op, src_dst_op};
use crate::backend::{Backend, REST_TIME};
use crate::bytes::ByteReader;
use crate::error::{LibResult, NotDirSnafu, ReplySnafu};
use crate::fs::{Filesystem, FsOptions, Item, ItemAttrs, ItemIterator, ItemKind};
use crate::text::{from_cp1252, to_cp1252};
use crate::transfer::JobControl;
use crate::Result;
use log::{debug, warn};
use snafu::ResultExt;
use std::thread;

/// Transfer chunk length requested from and offered to the device.
const BLOCK_BYTES: usize = 0x2000;

/// The data filesystem.
pub(crate) struct DataFs;

impl Filesystem for DataFs {
    fn id(&self) -> u32 {
        super::FS_DATA
    }

    fn name(&self) -> &'static str {
        "data"
    }

    fn options(&self) -> FsOptions {
        FsOptions {
            slot_storage: true,
            sort_by_id: true,
            ..FsOptions::default()
        }
    }

    fn download_ext(&self) -> &'static str {
        "data"
    }

    fn readdir(&self, backend: &Backend, dir: &str) -> Result<ItemIterator> {
        let mut request = msg::new_msg_path(&[msg::OP_DATA_LIST], dir)?;
        request.put_be32(0); // start index
        request.put_be32(0); // end index
        request.put_u8(1); // everything
        let reply = msg::tx_and_rx(backend, request)?;
        if msg::status(&reply) == 0 {
            return Err(NotDirSnafu { path: dir }.build().into());
        }
        Ok(ItemIterator::new(DataDirIter {
            msg: reply,
            pos: 18,
        }))
    }

    fn delete(&self, backend: &Backend, path: &str) -> Result<()> {
        self.clear(backend, path)
    }

    fn move_item(&self, backend: &Backend, src: &str, dst: &str) -> Result<()> {
        Ok(src_dst_op(backend, &[msg::OP_DATA_MOVE], src, dst)?)
    }

    fn copy(&self, backend: &Backend, src: &str, dst: &str) -> Result<()> {
        Ok(src_dst_op(backend, &[msg::OP_DATA_COPY], src, dst)?)
    }

    fn clear(&self, backend: &Backend, path: &str) -> Result<()> {
        Ok(path_op(backend, &[msg::OP_DATA_CLEAR], path)?)
    }

    fn swap(&self, backend: &Backend, src: &str, dst: &str) -> Result<()> {
        Ok(src_dst_op(backend, &[msg::OP_DATA_SWAP], src, dst)?)
    }

    fn download(
        &self,
        backend: &Backend,
        path: &str,
        output: &mut Vec<u8>,
        control: &JobControl,
    ) -> Result<()> {
        let jid = open_read(backend, path)?;
        thread::sleep(REST_TIME);

        let mut seq = 0u32;
        let mut cancelled = false;
        loop {
            if !control.is_active() {
                cancelled = true;
                break;
            }
            let mut request = msg::new_msg(&[msg::OP_DATA_READ_PARTIAL]);
            request.put_be32(jid);
            request.put_be32(seq);
            let reply = msg::tx_and_rx(backend, request)?;
            if msg::status(&reply) == 0 {
                protocol!("read failed ({})", msg::device_string(&reply));
            }
            let mut reader = ByteReader::new(&reply);
            reader.seek(6);
            let r_jid = reader.read_be32().context(ReplySnafu { site: site!() })?;
            let r_seq = reader.read_be32().context(ReplySnafu { site: site!() })?;
            let mut status = reader.read_be32().context(ReplySnafu { site: site!() })?;
            let last = reader.read_u8().context(ReplySnafu { site: site!() })?;
            let hash = reader.read_be32().context(ReplySnafu { site: site!() })?;
            let data_size = reader.read_be32().context(ReplySnafu { site: site!() })?;
            if data_size > 0 {
                debug!(
                    "read chunk: job {}; seq {}; last {}; status {}; hash {:#010x}",
                    r_jid, r_seq, last, status, hash
                );
                let payload = reader
                    .read_n(data_size as usize)
                    .context(ReplySnafu { site: site!() })?;
                output.extend_from_slice(payload);
            } else {
                // The first reply sometimes carries no data and leaves the
                // other fields uninitialized.
                debug!("read chunk: job {}; empty", r_jid);
                status = 0;
            }
            seq += 1;
            control.report(f64::from(status.min(1000)) / 1000.0);
            if last != 0 {
                break;
            }
            thread::sleep(REST_TIME);
        }

        close_job(backend, msg::OP_DATA_CLOSE_READ, jid, None)?;
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
        let jid = open_write(backend, path, data.len() as u32)?;
        thread::sleep(REST_TIME);

        let mut offset = 0usize;
        let mut seq = 0u32;
        let mut transferred = 0u32;
        while offset < data.len() {
            if !control.is_active() {
                close_job(backend, msg::OP_DATA_CLOSE_WRITE, jid, Some(data.len() as u32)).ok();
                return Err(crate::error::LibError::Cancelled.into());
            }
            let len = (data.len() - offset).min(BLOCK_BYTES);
            let block = &data[offset..offset + len];
            let mut request = msg::new_msg(&[msg::OP_DATA_WRITE_PARTIAL]);
            request.put_be32(jid);
            request.put_be32(seq);
            request.put_be32(crc32(block));
            request.put_be32(len as u32);
            request.put_bytes(block);
            let reply = msg::tx_and_rx(backend, request)?;
            thread::sleep(REST_TIME);
            if msg::status(&reply) == 0 {
                protocol!("write failed ({})", msg::device_string(&reply));
            }
            let mut reader = ByteReader::new(&reply);
            reader.seek(6);
            let r_jid = reader.read_be32().context(ReplySnafu { site: site!() })?;
            let r_seq = reader.read_be32().context(ReplySnafu { site: site!() })?;
            let total = reader.read_be32().context(ReplySnafu { site: site!() })?;
            debug!("write chunk: job {}; seq {}; total {}", r_jid, r_seq, total);
            offset += len;
            seq += 1;
            transferred += len as u32;
            if total != transferred {
                warn!(
                    "device counts {} bytes but {} were transferred",
                    total, transferred
                );
            }
            control.report(f64::from(total) / data.len() as f64);
        }

        close_job(backend, msg::OP_DATA_CLOSE_WRITE, jid, Some(data.len() as u32))
    }
}

fn open_read(backend: &Backend, path: &str) -> Result<u32> {
    let mut request = msg::new_msg(&[msg::OP_DATA_OPEN_READ]);
    request.put_cstring(&to_cp1252(path)?);
    request.put_be32(BLOCK_BYTES as u32);
    request.put_u8(1); // compression
    let reply = msg::tx_and_rx(backend, request)?;
    if msg::status(&reply) == 0 {
        protocol!("cannot open '{}' ({})", path, msg::device_string(&reply));
    }
    let mut reader = ByteReader::new(&reply);
    reader.seek(6);
    let jid = reader.read_be32().context(ReplySnafu { site: site!() })?;
    let chunk = reader.read_be32().context(ReplySnafu { site: site!() })?;
    let compression = reader.read_u8().context(ReplySnafu { site: site!() })?;
    debug!(
        "open read: job {}; chunk {}; compression {}",
        jid, chunk, compression
    );
    Ok(jid)
}

fn open_write(backend: &Backend, path: &str, size: u32) -> Result<u32> {
    let mut request = msg::new_msg(&[msg::OP_DATA_OPEN_WRITE]);
    request.put_be32(size);
    request.put_cstring(&to_cp1252(path)?);
    let reply = msg::tx_and_rx(backend, request)?;
    if msg::status(&reply) == 0 {
        protocol!("cannot open '{}' ({})", path, msg::device_string(&reply));
    }
    let mut reader = ByteReader::new(&reply);
    reader.seek(6);
    let jid = reader.read_be32().context(ReplySnafu { site: site!() })?;
    debug!("open write: job {}", jid);
    Ok(jid)
}

/// Closes a job. For writes, `expected` is the byte count the device must
/// acknowledge; a mismatch fails the transfer.
fn close_job(backend: &Backend, op: u8, jid: u32, expected: Option<u32>) -> Result<()> {
    let mut request = msg::new_msg(&[op]);
    request.put_be32(jid);
    if let Some(size) = expected {
        request.put_be32(size);
    }
    let reply = msg::tx_and_rx(backend, request)?;
    if msg::status(&reply) == 0 {
        protocol!("close failed ({})", msg::device_string(&reply));
    }
    let mut reader = ByteReader::new(&reply);
    reader.seek(6);
    let r_jid = reader.read_be32().context(ReplySnafu { site: site!() })?;
    let asize = reader.read_be32().context(ReplySnafu { site: site!() })?;
    debug!("close: job {}; size {}", r_jid, asize);
    if let Some(size) = expected {
        if asize != size {
            protocol!("device wrote {} bytes, expected {}", asize, size);
        }
    }
    Ok(())
}

/// Walks the typed records of a LIST reply. The iterator owns the reply and
/// yields one parsed item per record.
struct DataDirIter {
    msg: Vec<u8>,
    pos: usize,
}

impl DataDirIter {
    fn parse_next(&mut self) -> LibResult<Item> {
        let mut reader = ByteReader::new(&self.msg);
        reader.seek(self.pos);
        let name = reader.read_cstring().context(ReplySnafu { site: site!() })?;
        let name = from_cp1252(name);
        let has_children = reader.read_u8().context(ReplySnafu { site: site!() })? != 0;
        let record = reader.read_u8().context(ReplySnafu { site: site!() })?;
        let item = match record {
            1 => {
                let _children = reader.read_be32().context(ReplySnafu { site: site!() })?;
                Item {
                    name,
                    size: 0,
                    kind: ItemKind::Dir,
                    index: None,
                    attrs: ItemAttrs::default(),
                }
            }
            2 => {
                let index = reader.read_be32().context(ReplySnafu { site: site!() })?;
                let size = reader.read_be32().context(ReplySnafu { site: site!() })?;
                let operations = reader.read_be16().context(ReplySnafu { site: site!() })?;
                let has_valid_data = reader.read_u8().context(ReplySnafu { site: site!() })? != 0;
                let has_metadata = reader.read_u8().context(ReplySnafu { site: site!() })? != 0;
                Item {
                    name,
                    size,
                    kind: if has_children {
                        ItemKind::Dir
                    } else {
                        ItemKind::File
                    },
                    index: Some(index),
                    attrs: ItemAttrs {
                        operations,
                        has_valid_data,
                        has_metadata,
                    },
                }
            }
            other => {
                protocol!("unrecognized data entry type {}", other);
            }
        };
        self.pos = reader.position();
        Ok(item)
    }
}

impl Iterator for DataDirIter {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn list_reply() -> Vec<u8> {
        let mut msg = vec![0u8; 18];
        msg[4] = 0xC3;
        msg[5] = 1;
        // a directory record
        msg.extend_from_slice(b"drums\0");
        msg.push(0); // has_children (unused for dirs)
        msg.push(1);
        msg.extend_from_slice(&3u32.to_be_bytes());
        // an item record
        msg.extend_from_slice(b"kit01\0");
        msg.push(0);
        msg.push(2);
        msg.extend_from_slice(&4u32.to_be_bytes());
        msg.extend_from_slice(&1024u32.to_be_bytes());
        msg.extend_from_slice(&0x0003u16.to_be_bytes());
        msg.push(1);
        msg.push(0);
        msg
    }

    #[test]
    fn dir_iterator() {
        let items: Vec<Item> = DataDirIter {
            msg: list_reply(),
            pos: 18,
        }
        .map(|item| item.unwrap())
        .collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "drums");
        assert_eq!(items[0].kind, ItemKind::Dir);
        assert_eq!(items[0].index, None);
        assert_eq!(items[1].name, "kit01");
        assert_eq!(items[1].kind, ItemKind::File);
        assert_eq!(items[1].index, Some(4));
        assert_eq!(items[1].size, 1024);
        assert_eq!(items[1].attrs.operations, 3);
        assert!(items[1].attrs.has_valid_data);
        assert!(!items[1].attrs.has_metadata);
    }

    #[test]
    fn dir_iterator_rejects_unknown_records() {
        let mut msg = vec![0u8; 18];
        msg.extend_from_slice(b"x\0");
        msg.push(0);
        msg.push(9);
        let mut iter = DataDirIter { msg, pos: 18 };
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }
}
