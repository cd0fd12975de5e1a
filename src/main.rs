// src/main.rs
use clap::{ArgAction, Parser, Subcommand};
use env_logger::Builder;
use hddfs::workload::{self, Workload};
use hddfs::{ClientConfig, HddFs, TcpConnector};
use log::{info, LevelFilter};
use rand::{thread_rng, Rng};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hddfs")]
#[command(version = "0.1.0")]
#[command(about = "File client for a remote block store", long_about = "Stores each file as a single block on a remote block store and keeps the file table in a dedicated meta block.")]
struct Cli {
    #[arg(long, default_value = hddfs::config::DEFAULT_HOST)]
    host: String,
    #[arg(long, default_value_t = hddfs::config::DEFAULT_PORT)]
    port: u16,
    /// Connect and socket I/O deadline in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Wipe the store and write an empty file table
    Format,
    /// List files
    Ls,
    /// Copy a local file into the store
    Put { name: String, path: PathBuf },
    /// Copy a stored file to a local path
    Get { name: String, path: PathBuf },
    /// Print a stored file to stdout
    Cat { name: String },
    /// Run the randomized read/write/seek self-check (formats the store)
    Workload {
        #[arg(long, default_value_t = 10240)]
        iterations: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    Builder::new()
    .format(|buf, record| {
        let style = buf.default_level_style(record.level());
        writeln!(buf, "[{} {}] {}",
                 buf.timestamp_seconds(),
                 style.value(record.level()),
                 record.args()
        )
    })
    .filter(None, level)
    .init();
}

fn read_file(fs: &mut HddFs<TcpConnector>, name: &str) -> anyhow::Result<Vec<u8>> {
    let fh = fs.open(name)?;
    let size = fs.size(fh)?;
    let data = if size == 0 { Vec::new() } else { fs.read(fh, size)? };
    fs.close(fh)?;
    Ok(data)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if std::env::var("RUST_LOG").is_err() {
        init_logger(cli.verbose);
    } else {
        env_logger::init();
    }

    let mut config = ClientConfig::new().with_host(cli.host).with_port(cli.port);
    if let Some(ms) = cli.timeout_ms {
        let timeout = Duration::from_millis(ms);
        config = config.with_connect_timeout(timeout).with_io_timeout(timeout);
    }
    info!("Block store at {}", config.endpoint());
    let mut hdd = HddFs::with_config(config);

    match cli.command {
        Cmd::Format => {
            hdd.format()?;
            hdd.unmount()?;
            println!("Formatted.");
        }
        Cmd::Ls => {
            hdd.mount()?;
            for file in hdd.files()? {
                println!("{:>4}  {:>10}  {}", file.handle, file.size, file.name);
            }
            hdd.unmount()?;
        }
        Cmd::Put { name, path } => {
            let data = fs::read(&path)?;
            hdd.mount()?;
            let existing = hdd.files()?.into_iter().find(|f| f.name == name).map_or(0, |f| f.size);
            if existing > data.len() {
                hdd.unmount()?;
                anyhow::bail!("'{}' is {} bytes, files cannot shrink to {} bytes", name, existing, data.len());
            }
            let fh = hdd.open(&name)?;
            hdd.write(fh, &data)?;
            hdd.close(fh)?;
            hdd.unmount()?;
            info!("Stored {:?} as '{}' ({} bytes)", path, name, data.len());
        }
        Cmd::Get { name, path } => {
            hdd.mount()?;
            if hdd.files()?.iter().all(|f| f.name != name) {
                anyhow::bail!("No file named '{}'", name);
            }
            let data = read_file(&mut hdd, &name)?;
            hdd.unmount()?;
            fs::write(&path, &data)?;
            info!("Wrote '{}' to {:?} ({} bytes)", name, path, data.len());
        }
        Cmd::Cat { name } => {
            hdd.mount()?;
            if hdd.files()?.iter().all(|f| f.name != name) {
                anyhow::bail!("No file named '{}'", name);
            }
            let data = read_file(&mut hdd, &name)?;
            hdd.unmount()?;
            io::stdout().write_all(&data)?;
        }
        Cmd::Workload { iterations, seed } => {
            let seed = seed.unwrap_or_else(|| thread_rng().gen());
            let plan = Workload { iterations, seed, ..Workload::default() };
            let report = workload::run(&mut hdd, &plan)?;
            println!(
                "Workload passed (seed {}): {} reads, {} writes, {} appends, {} seeks, final length {}",
                seed, report.reads, report.writes, report.appends, report.seeks, report.final_length
            );
        }
    }

    Ok(())
}
