use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
mod auth;
use passvault::{CipherSelector, Storage, Vault, WriteOptions, default_storage, ring};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CipherArg {
    Twofish,
    Aes,
}

impl From<CipherArg> for CipherSelector {
    fn from(arg: CipherArg) -> Self {
        match arg {
            CipherArg::Twofish => CipherSelector::Twofish,
            CipherArg::Aes => CipherSelector::Aes256,
        }
    }
}

fn resolve_storage(path: Option<PathBuf>) -> Result<Storage> {
    match path {
        Some(p) => Ok(Storage::new(p)),
        None => default_storage(),
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_env("PASSVAULT_LOG").unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[derive(Debug, Parser)]
#[command(name = "passvault")]
#[command(version, about = "Password container tool: key blocks, encrypted records, authenticated trailer.")]
struct Cli {
    /// Path to the container file
    #[arg(long, global = true, value_name = "PATH", env = "PASSVAULT_PATH")]
    store: Option<PathBuf>,

    /// Log filter used when PASSVAULT_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Creates an empty container
    Init {
        /// Hash iterations for the first key block
        #[arg(long, default_value_t = ring::DEFAULT_HASH_ITERATIONS)]
        iterations: u32,

        #[arg(long, value_enum, default_value_t = CipherArg::Twofish)]
        cipher: CipherArg,
    },

    /// Checks the passphrase without decrypting records
    Check,

    /// Appends a record
    #[command(arg_required_else_help = true)]
    Add { record_type: u8, value: String },

    /// Lists all records
    List,

    /// Adds a key block for another passphrase
    Passwd {
        #[arg(long, default_value_t = ring::DEFAULT_HASH_ITERATIONS)]
        iterations: u32,
    },

    /// Shows information about the container
    Info {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(&args.log_level);

    let storage = resolve_storage(args.store)?;
    let password = auth::read_password()?;

    match args.command {
        Commands::Init { iterations, cipher } => {
            let options = WriteOptions {
                cipher: cipher.into(),
                iterations,
            };
            Vault::create_with_storage(password, storage, options)?;
            println!("container initialized");
        }
        Commands::Check => {
            let iterations = Vault::check_with_storage(&password, &storage)?;
            println!("passphrase ok ({iterations} iterations)");
        }
        Commands::Add { record_type, value } => {
            let mut vault = Vault::open_with_storage(password, storage)?;
            vault.add(record_type, value.as_bytes())?;
            println!("record added ({} total)", vault.records().len());
        }
        Commands::List => {
            let vault = Vault::open_with_storage(password, storage)?;
            if vault.records().is_empty() {
                println!("No records stored.");
                return Ok(());
            }
            for record in vault.records() {
                println!(
                    "{:#04x}  {}",
                    record.record_type(),
                    String::from_utf8_lossy(record.payload())
                );
            }
        }
        Commands::Passwd { iterations } => {
            let mut vault = Vault::open_with_storage(password, storage.clone())?;
            let new_password = auth::read_new_password_with_confirmation()?;
            if Vault::check_with_storage(&new_password, &storage).is_ok() {
                bail!("passphrase already opens this container");
            }
            vault.add_passphrase(&new_password, iterations)?;
            println!("key block added");
        }
        Commands::Info { json } => {
            let vault = Vault::open_with_storage(password, storage)?;
            let info = vault.info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("{info}");
            }
        }
    }

    Ok(())
}
