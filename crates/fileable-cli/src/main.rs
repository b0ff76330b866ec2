//! fileable CLI
//!
//! Image transforms against the configured disks, and file management for
//! owners backed by PostgreSQL.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use fileable::{
    Disks, FileRecord, FileService, FitPosition, ImageTransform, MakeMode, UploadedFile,
};
use fileable_core::{FileConfig, Id, OwnerRef};
use fileable_db::{Database, DatabaseConfig, PgFileStore};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resize, crop, or fit an image onto a disk
    Transform {
        input: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Mode::Fit)]
        mode: Mode,

        #[arg(short, long)]
        width: Option<u32>,

        /// Derived from the source ratio when omitted
        #[arg(long)]
        height: Option<u32>,

        /// Crop origin
        #[arg(short, long)]
        x: Option<u32>,

        #[arg(short, long)]
        y: Option<u32>,

        /// Fit anchor, e.g. top-left, center, bottom
        #[arg(short, long, default_value = "center")]
        position: String,

        #[arg(long)]
        disk: Option<String>,

        #[arg(long, default_value = "")]
        folder: String,

        /// Output file name (defaults to the input's)
        #[arg(long)]
        name: Option<String>,
    },

    /// Add files to an owner
    Attach {
        #[command(flatten)]
        target: Target,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Replace an owner's files of a type with a single file
    Set {
        #[command(flatten)]
        target: Target,

        file: PathBuf,
    },

    /// Keep the listed IDs, add new files, delete everything else of the type
    Sync {
        #[command(flatten)]
        target: Target,

        #[arg(long, value_delimiter = ',')]
        keep: Vec<Id>,

        files: Vec<PathBuf>,
    },

    /// List an owner's files
    List {
        owner_type: String,
        owner_id: Id,

        #[arg(long = "type")]
        file_type: Option<String>,
    },

    /// Delete a file and its blob
    Delete { id: Id },
}

#[derive(clap::Args, Debug)]
struct Target {
    owner_type: String,
    owner_id: Id,

    #[arg(long = "type")]
    file_type: Option<String>,

    #[arg(long)]
    disk: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Mode {
    Resize,
    Crop,
    Fit,
}

impl From<Mode> for MakeMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Resize => MakeMode::Resize,
            Mode::Crop => MakeMode::Crop,
            Mode::Fit => MakeMode::Fit,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_tracing();

    let config = FileConfig::from_env().context("invalid file configuration")?;
    let disks = Arc::new(Disks::from_config(&config));

    match args.command {
        Command::Transform {
            input,
            mode,
            width,
            height,
            x,
            y,
            position,
            disk,
            folder,
            name,
        } => {
            let upload = UploadedFile::from_path(&input)
                .await
                .with_context(|| format!("failed to read {}", input.display()))?;

            let mut builder = ImageTransform::builder(&upload)?
                .fit_position(position.parse::<FitPosition>()?)
                .disk(disk.unwrap_or_else(|| config.default_disk.clone()))
                .folder(folder);
            if let Some(width) = width {
                builder = builder.size(width, height);
            }
            if let (Some(x), Some(y)) = (x, y) {
                builder = builder.coordinates(x, y);
            }
            if let Some(name) = name {
                builder = builder.file_name(name);
            }

            let transform = builder.build();
            let path = transform.try_save(mode.into(), &disks).await?;

            info!(
                path = %path,
                disk = %transform.disk(),
                width = transform.size().0,
                height = transform.size().1,
                "Image saved"
            );
            println!("{}", path);
        }
        command => {
            let service = connect(disks, config).await?;
            run_file_command(&service, command).await?;
        }
    }

    Ok(())
}

async fn connect(disks: Arc<Disks>, config: FileConfig) -> anyhow::Result<FileService<PgFileStore>> {
    let db = Database::connect(&DatabaseConfig::from_env())
        .await
        .context("failed to connect to database")?;
    db.migrate().await?;

    let store = Arc::new(PgFileStore::new(db.pool().clone()));
    Ok(FileService::new(store, disks, config))
}

async fn run_file_command(service: &FileService<PgFileStore>, command: Command) -> anyhow::Result<()> {
    let config = service.config();

    match command {
        Command::Attach { target, files } => {
            let (owner, file_type, disk) = target.resolve(config);
            let uploads = read_uploads(&files).await?;
            let records = service.attach_files(&owner, uploads, &disk, &file_type).await?;
            print_records(&records)?;
        }
        Command::Set { target, file } => {
            let (owner, file_type, disk) = target.resolve(config);
            let upload = read_uploads(std::slice::from_ref(&file)).await?.remove(0);
            let record = service.set_single_file(&owner, upload, &disk, &file_type).await?;
            print_records(&[record])?;
        }
        Command::Sync { target, keep, files } => {
            let (owner, file_type, disk) = target.resolve(config);
            let uploads = read_uploads(&files).await?;
            let records = service
                .sync_files(&owner, uploads, &keep, &disk, &file_type)
                .await?;
            print_records(&records)?;
        }
        Command::List {
            owner_type,
            owner_id,
            file_type,
        } => {
            let owner = OwnerRef::new(owner_type, owner_id);
            let records = match file_type {
                Some(file_type) => service.files_of_type(&owner, &file_type).await?,
                None => service.files(&owner).await?,
            };
            print_records(&records)?;
        }
        Command::Delete { id } => {
            service.delete(id).await?;
            info!(id, "File deleted");
        }
        Command::Transform { .. } => anyhow::bail!("transform does not use the file store"),
    }

    Ok(())
}

impl Target {
    /// Owner, type tag and disk, falling back to configured defaults
    fn resolve(self, config: &FileConfig) -> (OwnerRef, String, String) {
        (
            OwnerRef::new(self.owner_type, self.owner_id),
            self.file_type.unwrap_or_else(|| config.default_type.clone()),
            self.disk.unwrap_or_else(|| config.default_disk.clone()),
        )
    }
}

async fn read_uploads(paths: &[PathBuf]) -> anyhow::Result<Vec<UploadedFile>> {
    let mut uploads = Vec::with_capacity(paths.len());
    for path in paths {
        let upload = UploadedFile::from_path(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        uploads.push(upload);
    }
    Ok(uploads)
}

fn print_records(records: &[FileRecord]) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(records)?);
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fileable=debug,fileable_cli=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}
