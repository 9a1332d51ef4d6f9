/*!
The `elektron` module speaks the framed, 7-bit-packed request/response
protocol of the Elektron instruments: identity queries, storage statistics,
the sample and data filesystems, and the CRC-checked OS upgrade.
!*/

pub(crate) mod data;
pub(crate) mod msg;
pub(crate) mod sample;

use crate::backend::{Backend, OsUpgrade, StorageQuery, StorageStats};
use crate::bytes::ByteReader;
use crate::connector::Connector;
use crate::error::{LibResult, NotFoundSnafu, ReplySnafu};
use crate::fs::{chain_path, split_path, Filesystem};
use crate::transfer::{SysexTransfer, TransferStatus};
use crate::Result;
use data::DataFs;
use log::{debug, warn};
use sample::SampleFs;
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

/// Filesystem id of the sample tree.
pub const FS_SAMPLES: u32 = 1;

/// Filesystem id of the slot-indexed data storage.
pub const FS_DATA: u32 = 1 << 1;

/// Storage tag of the +Drive.
pub const STORAGE_PLUS_DRIVE: u8 = 1;

/// Storage tag of the sample RAM.
pub const STORAGE_RAM: u8 = 1 << 1;

const ELEKTRON_ID: [u8; 3] = [0x00, 0x20, 0x3C];

/// OS upgrade blocks are smaller than transfer blocks.
const OS_BLOCK_BYTES: usize = 0x800;

struct DeviceDesc {
    id: u8,
    model: &'static str,
    filesystems: u32,
    storages: u8,
}

const DEVICE_DESCS: &[DeviceDesc] = &[
    DeviceDesc {
        id: 0x04,
        model: "Analog Four MKI",
        filesystems: FS_SAMPLES,
        storages: STORAGE_PLUS_DRIVE | STORAGE_RAM,
    },
    DeviceDesc {
        id: 0x06,
        model: "Analog Keys",
        filesystems: FS_SAMPLES,
        storages: STORAGE_PLUS_DRIVE | STORAGE_RAM,
    },
    DeviceDesc {
        id: 0x08,
        model: "Analog Rytm MKI",
        filesystems: FS_SAMPLES,
        storages: STORAGE_PLUS_DRIVE | STORAGE_RAM,
    },
    DeviceDesc {
        id: 0x0A,
        model: "Analog Heat MKI",
        filesystems: FS_SAMPLES,
        storages: STORAGE_PLUS_DRIVE | STORAGE_RAM,
    },
    DeviceDesc {
        id: 0x0C,
        model: "Digitakt",
        filesystems: FS_SAMPLES | FS_DATA,
        storages: STORAGE_PLUS_DRIVE | STORAGE_RAM,
    },
    DeviceDesc {
        id: 0x0E,
        model: "Analog Four MKII",
        filesystems: FS_SAMPLES,
        storages: STORAGE_PLUS_DRIVE | STORAGE_RAM,
    },
    DeviceDesc {
        id: 0x10,
        model: "Analog Rytm MKII",
        filesystems: FS_SAMPLES,
        storages: STORAGE_PLUS_DRIVE | STORAGE_RAM,
    },
    DeviceDesc {
        id: 0x14,
        model: "Digitone",
        filesystems: FS_SAMPLES | FS_DATA,
        storages: STORAGE_PLUS_DRIVE | STORAGE_RAM,
    },
    DeviceDesc {
        id: 0x16,
        model: "Analog Heat MKII",
        filesystems: FS_SAMPLES,
        storages: STORAGE_PLUS_DRIVE | STORAGE_RAM,
    },
    DeviceDesc {
        id: 0x19,
        model: "Model:Samples",
        filesystems: FS_SAMPLES,
        storages: STORAGE_PLUS_DRIVE | STORAGE_RAM,
    },
    DeviceDesc {
        id: 0x1C,
        model: "Digitone Keys",
        filesystems: FS_SAMPLES | FS_DATA,
        storages: STORAGE_PLUS_DRIVE | STORAGE_RAM,
    },
];

const NULL_DEVICE_DESC: DeviceDesc = DeviceDesc {
    id: 0,
    model: "-",
    filesystems: 0,
    storages: 0,
};

fn device_desc(id: u8) -> &'static DeviceDesc {
    DEVICE_DESCS
        .iter()
        .find(|desc| desc.id == id)
        .unwrap_or(&NULL_DEVICE_DESC)
}

/// The connector for the Elektron family.
pub struct ElektronConnector;

impl Connector for ElektronConnector {
    fn name(&self) -> &'static str {
        "elektron"
    }

    fn port_prefixes(&self) -> &'static [&'static str] {
        &["Elektron"]
    }

    fn matches(&self, info: &crate::backend::MidiInfo) -> bool {
        info.company == ELEKTRON_ID
    }

    fn handshake(&self, backend: &mut Backend) -> Result<()> {
        let ping = msg::tx_and_rx(backend, msg::new_msg(&[msg::OP_PING]))?;
        let (device_id, device_name) = parse_ping_reply(&ping)?;
        let desc = device_desc(device_id);

        let version_reply =
            msg::tx_and_rx(backend, msg::new_msg(&[msg::OP_SOFTWARE_VERSION]))?;
        let fw_version = parse_version_reply(&version_reply)?;

        match device_uid(backend) {
            Ok(uid) => debug!("device uid: {:#010x}", uid),
            Err(e) => warn!("cannot read device uid: {}", e),
        }

        backend.set_identity(
            format!("{} {} ({})", desc.model, fw_version, device_name),
            fw_version,
            desc.model.to_owned(),
        );
        if desc.filesystems & FS_SAMPLES != 0 {
            backend.add_filesystem(Arc::new(SampleFs));
        }
        if desc.filesystems & FS_DATA != 0 {
            backend.add_filesystem(Arc::new(DataFs));
        }
        let device = Arc::new(ElektronDevice {
            storages: desc.storages,
        });
        backend.set_storage_query(Arc::clone(&device) as Arc<dyn StorageQuery>);
        backend.set_os_upgrade(device as Arc<dyn OsUpgrade>);
        Ok(())
    }
}

// Reply: x, x, x, x, op, device id, skip count, skipped bytes, device name
fn parse_ping_reply(reply: &[u8]) -> LibResult<(u8, String)> {
    let mut reader = ByteReader::new(reply);
    reader.seek(msg::MSG_STATUS);
    let device_id = reader.read_u8().context(ReplySnafu { site: site!() })?;
    let skip = reader.read_u8().context(ReplySnafu { site: site!() })?;
    reader
        .skip(skip as usize)
        .context(ReplySnafu { site: site!() })?;
    let name = reader
        .read_cstring()
        .context(ReplySnafu { site: site!() })?;
    Ok((device_id, crate::text::from_cp1252(name)))
}

// Reply: x, x, x, x, op, 5 reserved bytes, version string
fn parse_version_reply(reply: &[u8]) -> LibResult<String> {
    let mut reader = ByteReader::new(reply);
    reader.seek(10);
    let version = reader
        .read_cstring()
        .context(ReplySnafu { site: site!() })?;
    Ok(crate::text::from_cp1252(version))
}

/// Reads the device's unique id. Not every model implements the request, so
/// the short probe timeout applies.
pub fn device_uid(backend: &Backend) -> Result<u32> {
    let reply = msg::tx_and_rx_timeout(
        backend,
        msg::new_msg(&[msg::OP_DEVICE_UID]),
        crate::backend::SYSEX_TIMEOUT_GUESS,
    )?;
    let mut reader = ByteReader::new(&reply);
    reader.seek(msg::MSG_STATUS);
    let uid = reader.read_be32().context(ReplySnafu { site: site!() })?;
    Ok(uid)
}

struct ElektronDevice {
    storages: u8,
}

impl StorageQuery for ElektronDevice {
    fn storage_stats(&self, backend: &Backend, storage: u8) -> Result<StorageStats> {
        if self.storages & storage == 0 {
            inval!("unknown storage tag {:#x}", storage);
        }
        let name = match storage {
            STORAGE_PLUS_DRIVE => "+Drive",
            STORAGE_RAM => "RAM",
            _ => inval!("unknown storage tag {:#x}", storage),
        };
        let mut request = msg::new_msg(&[msg::OP_STORAGE_INFO]);
        request.put_u8(storage);
        let reply = msg::tx_and_rx(backend, request)?;
        if msg::status(&reply) == 0 {
            protocol!("storage query failed ({})", msg::device_string(&reply));
        }
        let mut reader = ByteReader::new(&reply);
        reader.seek(msg::MSG_STATUS + 1);
        let bfree = reader.read_be64().context(ReplySnafu { site: site!() })?;
        let bsize = reader.read_be64().context(ReplySnafu { site: site!() })?;
        Ok(StorageStats { name, bsize, bfree })
    }
}

impl OsUpgrade for ElektronDevice {
    /// Uploads a firmware image in CRC-checked blocks, honouring the
    /// device's acknowledged progress codes.
    fn upgrade_os(&self, backend: &Backend, image: &[u8], transfer: &SysexTransfer) -> Result<()> {
        transfer.set_status(TransferStatus::Sending);
        let result = upgrade_os_inner(backend, image, transfer);
        transfer.finish();
        result
    }
}

fn upgrade_os_inner(
    backend: &Backend,
    image: &[u8],
    transfer: &SysexTransfer,
) -> Result<()> {
    // 0x50, size, "sysex\0", 1
    let mut start = msg::new_msg(&[msg::OP_OS_UPGRADE_START, 0, 0, 0, 0]);
    start.put_bytes(b"sysex\0");
    start.put_u8(1);
    start.set_be32(5, image.len() as u32);
    let reply = msg::tx_and_rx(backend, start)?;
    // This reply's status is inverted: 0 is success.
    if reply.get(msg::MSG_STATUS).copied().unwrap_or(1) != 0 {
        protocol!("os upgrade rejected ({})", msg::device_string(&reply));
    }

    let mut offset = 0usize;
    while offset < image.len() {
        if !transfer.is_active() {
            return Err(crate::error::LibError::Cancelled.into());
        }
        let len = (image.len() - offset).min(OS_BLOCK_BYTES);
        let block = &image[offset..offset + len];
        let crc = crc32(block);
        debug!("os block at {:#x}: {} bytes, crc {:#010x}", offset, len, crc);
        let mut write = msg::new_msg(&[msg::OP_OS_UPGRADE_WRITE, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        write.set_be32(5, crc);
        write.set_be32(9, len as u32);
        write.set_be32(13, offset as u32);
        write.put_bytes(block);
        let reply = msg::tx_and_rx(backend, write)?;
        let code = reply.get(9).copied().unwrap_or(2);
        if code == 1 {
            debug!("os upgrade acknowledged complete");
            return Ok(());
        }
        if code > 1 {
            protocol!("os upgrade failed ({})", msg::device_string(&reply));
        }
        offset += len;
        thread::sleep(crate::backend::REST_TIME);
    }
    Ok(())
}

/// Picks the remote destination for uploading `src` into `dir`: the local
/// file's stem on the sample tree, the lowest free slot index on slot
/// storage.
pub fn remote_dst_path(
    backend: &Backend,
    fs: &dyn Filesystem,
    dir: &str,
    src: &Path,
) -> Result<String> {
    if fs.id() == FS_SAMPLES {
        let stem = match src.file_stem().and_then(|stem| stem.to_str()) {
            Some(stem) => stem,
            None => inval!("'{}' has no usable file name", src.display()),
        };
        return Ok(chain_path(dir, stem));
    }
    let mut index = 1u32;
    for item in fs.readdir(backend, dir)? {
        let item = item?;
        match item.index {
            Some(slot) if slot > index => break,
            Some(_) => index += 1,
            None => {}
        }
    }
    Ok(chain_path(dir, &index.to_string()))
}

/// Picks the local file name for downloading `src`: `<name>.<ext>`, where
/// the name of a slot item is looked up in its directory listing.
pub fn local_dst_path(
    backend: &Backend,
    fs: &dyn Filesystem,
    src: &str,
    dst_dir: &Path,
) -> Result<PathBuf> {
    let (parent, name) = split_path(src);
    let stem = if fs.id() == FS_SAMPLES {
        name.to_owned()
    } else {
        let id: u32 = match name.parse() {
            Ok(id) => id,
            Err(_) => inval!("'{}' is not a slot path", src),
        };
        let mut found = None;
        for item in fs.readdir(backend, parent)? {
            let item = item?;
            if item.index == Some(id) {
                found = Some(item.name);
                break;
            }
        }
        match found {
            Some(name) => name,
            None => return Err(NotFoundSnafu { path: src }.build().into()),
        }
    };
    Ok(dst_dir.join(format!("{}.{}", stem, fs.download_ext())))
}

/// A request carrying one path whose reply is a bare success flag.
pub(crate) fn path_op(backend: &Backend, template: &[u8], path: &str) -> LibResult<()> {
    let request = msg::new_msg_path(template, path)?;
    let reply = msg::tx_and_rx(backend, request)?;
    // Reply: x, x, x, x, op, [0 (error), 1 (success)], message...
    if msg::status(&reply) == 0 {
        protocol!("'{}' rejected ({})", path, msg::device_string(&reply));
    }
    Ok(())
}

/// A request carrying a source and a destination path whose reply is a bare
/// success flag.
pub(crate) fn src_dst_op(
    backend: &Backend,
    template: &[u8],
    src: &str,
    dst: &str,
) -> LibResult<()> {
    let mut request = msg::new_msg(template);
    request.put_cstring(&crate::text::to_cp1252(src)?);
    request.put_cstring(&crate::text::to_cp1252(dst)?);
    let reply = msg::tx_and_rx(backend, request)?;
    if msg::status(&reply) == 0 {
        protocol!(
            "'{}' -> '{}' rejected ({})",
            src,
            dst,
            msg::device_string(&reply)
        );
    }
    Ok(())
}

/// CRC-32 with the seed the devices expect.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(0xFFFF_FFFF);
    hasher.update(data);
    hasher.finalize()
}
