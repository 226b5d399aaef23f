use clap::{Parser, Subcommand};
use std::path::PathBuf;

use apool::walk::{BackupVisitor, BackupWalk, PropertyMap, Visit};
use apool::{pdump, Oid, Pool, Result, DEFAULT_LIMIT};

#[derive(Parser)]
#[command(name = "apool", version, about = "Content-addressed backup pool tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty pool in an existing empty directory
    Create {
        dir: PathBuf,
        /// Data-file size cap in bytes
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: u32,
        /// Start a fresh data file on every open
        #[arg(long)]
        newfile: bool,
    },
    /// List the backups recorded in a pool
    List { pool: PathBuf },
    /// Rebuild the .idx files by scanning the data files
    Recover { pool: PathBuf },
    /// Hex-dump the chunk with the given OID
    Dump { pool: PathBuf, oid: String },
    /// Show pool metadata
    Info { pool: PathBuf },
}

fn main() -> Result<()> {
    match Cli::parse().command {
        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create { dir, limit, newfile } => {
            Pool::create_pool(&dir, limit, newfile)?;
            println!("Created pool: {}", dir.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { pool } => {
            let mut pool = Pool::open(&pool)?;
            let backups = pool.get_backups()?;

            let mut lister = Lister::default();
            let mut walk = BackupWalk::new(&mut pool);
            for oid in &backups {
                walk.walk(&mut lister, oid)?;
            }
            lister.show();
        }

        // ── Recover ──────────────────────────────────────────────────────────
        Commands::Recover { pool } => {
            apool::recover_index(&pool)?;
            println!("Rebuilt indexes in: {}", pool.display());
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { pool, oid } => {
            let mut pool = Pool::open(&pool)?;
            let chunk = pool.find(&Oid::from_hex(&oid)?)?;
            println!("{} {} ({} bytes)", chunk.kind(), chunk.oid(), chunk.size());
            pdump::dump(chunk.data()?);
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { pool } => {
            let opened = Pool::open(&pool)?;
            println!("Pool:    {}", pool.display());
            println!("uuid:    {}", opened.uuid());
            println!("limit:   {}", opened.limit());
            println!("backups: {}", opened.get_backups()?.len());
        }
    }
    Ok(())
}

// ── Backup lister ────────────────────────────────────────────────────────────

/// Records one line per backup node and prunes: listing never descends into
/// the file trees themselves.
#[derive(Default)]
struct Lister {
    backups: Vec<ListedBackup>,
}

struct ListedBackup {
    oid:   Oid,
    date:  i64,
    props: PropertyMap,
}

impl BackupVisitor for Lister {
    fn backup(
        &mut self,
        path: &[Oid],
        _root: &Oid,
        date: i64,
        props: &PropertyMap,
    ) -> Result<Visit> {
        self.backups.push(ListedBackup {
            oid: *path.last().expect("walker pushes before visiting"),
            date,
            props: props.clone(),
        });
        Ok(Visit::Prune)
    }
}

impl Lister {
    fn show(&mut self) {
        self.backups.sort_by_key(|b| b.date);
        for backup in &self.backups {
            print!("{} {}", backup.oid, backup.date);
            for (key, value) in &backup.props {
                print!(" {key}={value}");
            }
            println!();
        }
    }
}
