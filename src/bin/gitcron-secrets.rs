use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};

use gitcron::secrets::{mask_value, SecretsStore};

/// Default prefix for `import`.
const IMPORT_PREFIX: &str = "SECRET_";

#[derive(Parser, Debug)]
#[command(name = "gitcron-secrets")]
#[command(about = "Manage the encrypted secrets store used by gitcron jobs")]
struct Cli {
    /// Encrypted secrets file
    #[arg(short = 'f', long, global = true, default_value = "./secrets.json.enc")]
    secrets_file: PathBuf,

    /// Key file
    #[arg(short = 'k', long, global = true, default_value = "./secrets.key")]
    key_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a secret
    Set { key: String, value: String },
    /// Show a secret (masked)
    Get { key: String },
    /// Remove a secret
    Delete { key: String },
    /// List all stored keys
    List,
    /// Check whether a key exists
    Exists { key: String },
    /// Import SECRET_-prefixed process environment variables
    Import,
    /// Copy the encrypted store to a file
    Backup { file: PathBuf },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap renders message + usage; help/version are not failures
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    let store = SecretsStore::new(&cli.secrets_file, &cli.key_file);
    match run(&store, cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(store: &SecretsStore, command: Command) -> gitcron::error::Result<ExitCode> {
    match command {
        Command::Set { key, value } => {
            store.set(&key, &value)?;
            println!("Secret '{key}' stored");
            Ok(ExitCode::SUCCESS)
        }
        Command::Get { key } => match store.get(&key)? {
            Some(value) => {
                println!("Secret '{key}': {}", mask_value(&value));
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("Secret '{key}' not found");
                Ok(ExitCode::FAILURE)
            }
        },
        Command::Delete { key } => {
            if store.delete(&key)? {
                println!("Secret '{key}' deleted");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("Secret '{key}' not found");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::List => {
            let keys = store.keys()?;
            if keys.is_empty() {
                println!("No secrets stored");
            } else {
                for key in keys {
                    println!("{key}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Exists { key } => {
            if store.exists(&key)? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Import => {
            let count = store.import_from_env(IMPORT_PREFIX)?;
            println!("Imported {count} secrets from environment");
            Ok(ExitCode::SUCCESS)
        }
        Command::Backup { file } => {
            if store.backup(&file)? {
                println!("Secrets backed up to {}", file.display());
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("No secrets file to back up");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
