use sectorfs::{
    BlockDevice, CacheConfig, FileDisk, FileSystem, FsError, Result, SectorId, MAX_FILE_SIZE,
};

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(version, about = "Inspect and fill sectorfs disk images")]
struct Cli {
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Write-behind interval in seconds
    #[arg(long, default_value_t = 10, global = true)]
    write_behind_secs: u64,

    /// Disable the read-ahead worker
    #[arg(long, global = true)]
    no_read_ahead: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh image
    Format {
        image: PathBuf,
        /// Image size in sectors
        #[arg(long, default_value_t = 8192)]
        sectors: u32,
    },
    /// Copy a host file into a new inode and print its sector
    Put { image: PathBuf, file: PathBuf },
    /// Print an inode's content to stdout
    Cat { image: PathBuf, inode: SectorId },
    /// Show an inode's metadata
    Stat { image: PathBuf, inode: SectorId },
    /// Remove an inode and free its sectors
    Rm { image: PathBuf, inode: SectorId },
}

impl Cli {
    fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            write_behind_interval: Duration::from_secs(self.write_behind_secs),
            read_ahead: !self.no_read_ahead,
        }
    }
}

fn mount(image: &Path, config: &CacheConfig) -> Result<FileSystem> {
    let disk: Arc<dyn BlockDevice> = Arc::new(FileDisk::open(image)?);
    FileSystem::mount(disk, config)
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.cache_config();
    match &cli.command {
        Command::Format { image, sectors } => {
            let disk = Arc::new(FileDisk::create(image, *sectors)?);
            let fs = FileSystem::format(disk, &config)?;
            println!("root inode at sector {}", fs.root());
            fs.shutdown();
        }
        Command::Put { image, file } => {
            let data = std::fs::read(file)?;
            if data.len() > MAX_FILE_SIZE {
                return Err(FsError::FileTooLarge { length: data.len() });
            }
            let fs = mount(image, &config)?;
            let sector = fs.create(0, false, fs.root())?;
            let inode = fs.open(sector)?;
            let written = inode.write_at(&data, 0);
            fs.close(inode);
            if let Err(e) = written {
                fs.remove(sector)?;
                fs.shutdown();
                return Err(e);
            }
            println!("{sector}");
            fs.shutdown();
        }
        Command::Cat { image, inode } => {
            use std::io::Write;
            let fs = mount(image, &config)?;
            let inode = fs.open(*inode)?;
            let mut data = vec![0u8; inode.length()];
            let read = inode.read_at(&mut data, 0);
            fs.close(inode);
            std::io::stdout().write_all(&data[..read])?;
            fs.shutdown();
        }
        Command::Stat { image, inode } => {
            let fs = mount(image, &config)?;
            let inode = fs.open(*inode)?;
            println!("inode:     {}", inode.inumber());
            println!("type:      {}", if inode.is_dir() { "directory" } else { "file" });
            println!("length:    {}", inode.length());
            println!("parent:    {}", inode.parent());
            println!("allocated: {} sectors", inode.allocated_sectors());
            fs.close(inode);
            println!("free:      {} sectors", fs.free_sectors());
            fs.shutdown();
        }
        Command::Rm { image, inode } => {
            let fs = mount(image, &config)?;
            fs.remove(*inode)?;
            fs.shutdown();
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
