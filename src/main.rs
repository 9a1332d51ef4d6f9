use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;
use syxfer::backend::{Backend, SYSEX_TIMEOUT};
use syxfer::connector::Registry;
use syxfer::fs::Filesystem;
use syxfer::midi::DeviceCandidate;
use syxfer::transfer::{JobControl, SysexTransfer};
use syxfer::Result;

/// Developer command line for the SysEx transfer engine.
#[derive(Parser)]
#[command(name = "syxfer", version, about)]
struct Cli {
    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the connected devices a connector claims.
    List,
    /// List a remote directory.
    Ls {
        device: String,
        filesystem: String,
        path: String,
    },
    /// Create a remote directory.
    Mkdir {
        device: String,
        filesystem: String,
        path: String,
    },
    /// Delete a remote item, directories recursively.
    Rm {
        device: String,
        filesystem: String,
        path: String,
    },
    /// Move or rename a remote item.
    Mv {
        device: String,
        filesystem: String,
        src: String,
        dst: String,
    },
    /// Copy a remote item.
    Cp {
        device: String,
        filesystem: String,
        src: String,
        dst: String,
    },
    /// Clear a remote slot.
    Clear {
        device: String,
        filesystem: String,
        path: String,
    },
    /// Swap two remote slots.
    Swap {
        device: String,
        filesystem: String,
        src: String,
        dst: String,
    },
    /// Download a remote item to a local file.
    Download {
        device: String,
        filesystem: String,
        src: String,
        dst: PathBuf,
    },
    /// Upload a local file to the device.
    Upload {
        device: String,
        filesystem: String,
        src: PathBuf,
        dst: String,
    },
    /// Upload a firmware image.
    UpgradeOs { device: String, image: PathBuf },
    /// Show usage of a storage area.
    Stats { device: String, storage: u8 },
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter(None, level).init();
    if let Err(e) = run(cli.command) {
        eprintln!("{}", e);
        std::process::exit(e.exit_code());
    }
}

fn open(device: &str, registry: &Registry) -> Result<Backend> {
    let candidate = DeviceCandidate {
        id: device.to_owned(),
        name: String::new(),
    };
    Backend::open(&candidate, registry)
}

fn filesystem<'a>(backend: &'a Backend, name: &str) -> Result<&'a std::sync::Arc<dyn Filesystem>> {
    backend
        .filesystem_by_name(name)
        .ok_or_else(|| syxfer::Error::not_supported(format!("filesystem '{}'", name)))
}

fn progress_job() -> JobControl {
    let control = JobControl::new();
    control.on_progress(|fraction| eprint!("\r{:5.1}%", fraction * 100.0));
    control
}

fn run(command: Command) -> Result<()> {
    let registry = Registry::default();
    match command {
        Command::List => {
            for candidate in Backend::devices(&registry) {
                println!("{}\t{}", candidate.id, candidate.name);
            }
            Ok(())
        }
        Command::Ls {
            device,
            filesystem: fs_name,
            path,
        } => {
            let backend = open(&device, &registry)?;
            let fs = filesystem(&backend, &fs_name)?;
            for item in fs.readdir(&backend, &path)? {
                let item = item?;
                println!("{}\t{}\t{:?}", fs.item_id(&item), item.size, item.kind);
            }
            Ok(())
        }
        Command::Mkdir {
            device,
            filesystem: fs_name,
            path,
        } => {
            let backend = open(&device, &registry)?;
            filesystem(&backend, &fs_name)?.mkdir(&backend, &path)
        }
        Command::Rm {
            device,
            filesystem: fs_name,
            path,
        } => {
            let backend = open(&device, &registry)?;
            filesystem(&backend, &fs_name)?.delete(&backend, &path)
        }
        Command::Mv {
            device,
            filesystem: fs_name,
            src,
            dst,
        } => {
            let backend = open(&device, &registry)?;
            filesystem(&backend, &fs_name)?.move_item(&backend, &src, &dst)
        }
        Command::Cp {
            device,
            filesystem: fs_name,
            src,
            dst,
        } => {
            let backend = open(&device, &registry)?;
            filesystem(&backend, &fs_name)?.copy(&backend, &src, &dst)
        }
        Command::Clear {
            device,
            filesystem: fs_name,
            path,
        } => {
            let backend = open(&device, &registry)?;
            filesystem(&backend, &fs_name)?.clear(&backend, &path)
        }
        Command::Swap {
            device,
            filesystem: fs_name,
            src,
            dst,
        } => {
            let backend = open(&device, &registry)?;
            filesystem(&backend, &fs_name)?.swap(&backend, &src, &dst)
        }
        Command::Download {
            device,
            filesystem: fs_name,
            src,
            dst,
        } => {
            let backend = open(&device, &registry)?;
            let fs = filesystem(&backend, &fs_name)?;
            let control = progress_job();
            let mut payload = Vec::new();
            fs.download(&backend, &src, &mut payload, &control)?;
            eprintln!();
            fs.save(&dst, &payload)
        }
        Command::Upload {
            device,
            filesystem: fs_name,
            src,
            dst,
        } => {
            let backend = open(&device, &registry)?;
            let fs = filesystem(&backend, &fs_name)?;
            let payload = fs.load(&src)?;
            let control = progress_job();
            let result = fs.upload(&backend, &dst, &payload, &control);
            eprintln!();
            result
        }
        Command::UpgradeOs { device, image } => {
            let backend = open(&device, &registry)?;
            let data = std::fs::read(&image)
                .map_err(|e| syxfer::Error::file(image.display().to_string(), e))?;
            let transfer = SysexTransfer::new(Some(SYSEX_TIMEOUT));
            backend.upgrade_os(&data, &transfer)
        }
        Command::Stats { device, storage } => {
            let backend = open(&device, &registry)?;
            let stats = backend.storage_stats(storage)?;
            println!(
                "{}\t{} free of {} ({:.1}% used)",
                stats.name,
                stats.bfree,
                stats.bsize,
                stats.percent_used()
            );
            Ok(())
        }
    }
}
