pub mod cli;
pub mod config;
pub mod list;
pub mod path;
pub mod term;

use {
    crate::{
        cli::Command,
        config::Config,
        list::{archive_info, entries_table},
        path::collect_add_items,
        term::{TermLayer, TermProgress, TermPrompt},
    },
    anyhow::{Context as _, Result, bail},
    blobcrypt_format::EntryPath,
    blobcrypt_sdk::{
        Archive, BatchOptions, BatchSummary, SharedArchive,
        archive::{SortDirection, container_directory},
        batch::OperationKind,
        crypto::ArchiveKey,
        progress::CancelFlag,
        signal::cancel_on_interrupt,
    },
    derivative::Derivative,
    std::{
        path::Path,
        sync::{Arc, Mutex},
    },
    tokio::task,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _},
};

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Ctx {
    pub config: Config,
    #[derivative(Debug = "ignore")]
    pub key: ArchiveKey,
    pub cancel: CancelFlag,
}

impl Ctx {
    fn batch_options<'a>(
        &self,
        prompt: &'a mut TermPrompt,
        progress: &'a mut TermProgress,
    ) -> BatchOptions<'a> {
        BatchOptions {
            prompt,
            progress,
            cancel: self.cancel.clone(),
            conflict_policy: self.config.conflict_policy,
        }
    }
}

#[cfg(feature = "keyring")]
const KEYRING_SERVICE: &str = "blobcrypt";
#[cfg(feature = "keyring")]
const KEYRING_USER: &str = "blobcrypt_encryption_key";

#[cfg(feature = "keyring")]
fn fetch_keyring_key() -> Result<String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
    match entry.get_password() {
        Ok(password) => Ok(password),
        Err(keyring::Error::NoEntry) => {
            info!("entry {KEYRING_USER:?} not found in keyring");
            let value = rpassword::prompt_password("Input encryption key: ")?;
            if value.is_empty() {
                bail!("no value provided");
            }
            match entry.set_password(&value) {
                Ok(()) => info!("entry {KEYRING_USER:?} saved to keyring"),
                Err(err) => warn!("failed to save secret in keyring: {err}"),
            }
            Ok(value)
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(not(feature = "keyring"))]
fn fetch_keyring_key() -> Result<String> {
    bail!("`use_keyring` is not supported: built without the `keyring` feature")
}

fn encryption_key(config: &Config) -> Result<ArchiveKey> {
    if config.use_keyring && config.encryption_key.is_some() {
        bail!(
            "invalid config: if `use_keyring` is true, \
            `encryption_key` cannot be specified in the config"
        );
    }
    let key: ArchiveKey = if config.use_keyring {
        fetch_keyring_key()?.parse()?
    } else {
        config
            .encryption_key
            .clone()
            .context("missing `encryption_key` or `use_keyring` in config")?
    };
    Ok(key.with_allowed_ciphers(config.allowed_ciphers.clone()))
}

#[expect(clippy::print_stdout, reason = "the key is the output of the command")]
#[inline]
pub fn generate_key() -> Result<()> {
    let key = ArchiveKey::generate()?;
    println!("{}", key.display_unmasked());
    Ok(())
}

#[inline]
pub async fn run(command: Command, config: Config) -> Result<()> {
    let ctx = Arc::new(Ctx {
        key: encryption_key(&config)?,
        config,
        cancel: CancelFlag::new(),
    });
    let interrupt = cancel_on_interrupt(ctx.cancel.clone());
    let result = handle_command(command, &ctx).await;
    interrupt.abort();
    result
}

async fn open(ctx: &Arc<Ctx>, file: &Path) -> Result<SharedArchive> {
    let ctx = Arc::clone(ctx);
    let file = file.to_path_buf();
    let (archive, dropped) =
        task::spawn_blocking(move || Archive::read(&file, &ctx.key, ctx.config.archive_options()))
            .await??;
    for path in dropped {
        warn!("dropped {path}: its blob is missing");
    }
    Ok(SharedArchive::new(archive))
}

/// All entries if `paths` is empty.
fn select(archive: &Archive, paths: &[EntryPath]) -> Result<Vec<usize>> {
    if paths.is_empty() {
        Ok((0..archive.entries().len()).collect())
    } else {
        archive.indices_of(paths)
    }
}

fn labels(archive: &Archive, indices: &[usize]) -> Vec<String> {
    indices
        .iter()
        .filter_map(|index| archive.entries().get(*index))
        .map(|entry| entry.path.to_string())
        .collect()
}

fn check_summary(summary: &BatchSummary) -> Result<()> {
    if summary.failed_count() > 0 || summary.cancelled || summary.aborted {
        bail!("{summary}");
    }
    Ok(())
}

async fn handle_command(command: Command, ctx: &Arc<Ctx>) -> Result<()> {
    match command {
        Command::GenerateKey => generate_key()?,
        Command::Create { archive: file } => {
            let ctx = Arc::clone(ctx);
            task::spawn_blocking(move || {
                if file.try_exists()? {
                    bail!("{} already exists", file.display());
                }
                Archive::new(container_directory(&file), ctx.config.archive_options())
                    .write(&file, &ctx.key)
            })
            .await??;
        }
        Command::List {
            archive: file,
            sort,
            descending,
        } => {
            let mut order = ctx.config.sorting_order;
            if let Some(key) = sort {
                order.key = key;
            }
            if descending {
                order.direction = SortDirection::Descending;
            }
            let table = open(ctx, &file)
                .await?
                .run(move |archive| {
                    archive.sort(order);
                    Ok(entries_table(archive.entries()).to_string())
                })
                .await?;
            info!("{table}");
        }
        Command::Add {
            archive: file,
            paths,
            prefix,
        } => {
            let items = collect_add_items(&paths, prefix.as_ref())?;
            let shared = open(ctx, &file).await?;
            let ctx = Arc::clone(ctx);
            let summary = shared
                .run(move |archive| {
                    let names = items.iter().map(|item| item.path.to_string()).collect();
                    let mut progress = TermProgress::new(OperationKind::Add, names);
                    let summary = archive.add_files(
                        &items,
                        &ctx.key,
                        ctx.batch_options(&mut TermPrompt, &mut progress),
                    )?;
                    drop(progress);
                    // Blobs added before a cancellation are kept, so the archive is saved anyway.
                    archive.write(&file, &ctx.key)?;
                    Ok(summary)
                })
                .await?;
            check_summary(&summary)?;
        }
        Command::Extract {
            archive: file,
            out_dir,
            paths,
        } => {
            let shared = open(ctx, &file).await?;
            let ctx = Arc::clone(ctx);
            let summary = shared
                .run(move |archive| {
                    let indices = select(archive, &paths)?;
                    let mut progress =
                        TermProgress::new(OperationKind::Extract, labels(archive, &indices));
                    archive.extract_files(
                        &indices,
                        &out_dir,
                        &ctx.key,
                        ctx.batch_options(&mut TermPrompt, &mut progress),
                    )
                })
                .await?;
            check_summary(&summary)?;
        }
        Command::Validate {
            archive: file,
            paths,
        } => {
            let shared = open(ctx, &file).await?;
            let ctx = Arc::clone(ctx);
            let (report, failed) = shared
                .run(move |archive| {
                    let indices = select(archive, &paths)?;
                    let mut progress =
                        TermProgress::new(OperationKind::Validate, labels(archive, &indices));
                    let report = archive.validate_files(
                        &indices,
                        &ctx.key,
                        ctx.batch_options(&mut TermPrompt, &mut progress),
                    )?;
                    let failed = labels(archive, &report.failed);
                    Ok((report, failed))
                })
                .await?;
            info!("{report}");
            for path in failed {
                warn!("invalid: {path}");
            }
            check_summary(&report.summary)?;
        }
        Command::Delete {
            archive: file,
            paths,
        } => {
            let shared = open(ctx, &file).await?;
            let ctx = Arc::clone(ctx);
            let report = shared
                .run(move |archive| {
                    let indices = archive.indices_of(&paths)?;
                    let report = archive.delete_files(&indices)?;
                    archive.write(&file, &ctx.key)?;
                    Ok(report)
                })
                .await?;
            info!("deleted {} entries", report.removed.len());
            for path in &report.not_deleted {
                warn!("blob of {path} could not be deleted");
            }
        }
        Command::Info { archive: file } => {
            let text = open(ctx, &file)
                .await?
                .run(|archive| Ok(archive_info(archive)))
                .await?;
            info!("{text}");
        }
    }
    Ok(())
}

/// Logs to the terminal and, if `log_file` is set, appends to that file.
#[inline]
pub fn setup_logger(log_file: Option<&Path>, log_filter: &str) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs_err::create_dir_all(parent)?;
            }
            let file = fs_err::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(file_layer)
        .with(EnvFilter::try_new(log_filter)?)
        .with(TermLayer)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, blobcrypt_sdk::crypto::CipherKind};

    fn config(text: &str) -> Config {
        json5::from_str(text).unwrap()
    }

    #[test]
    fn key_from_config() {
        let key = ArchiveKey::generate().unwrap();
        let config = config(&format!(
            "{{ encryption_key: '{}', allowed_ciphers: ['aes256-siv'] }}",
            key.display_unmasked()
        ));
        let loaded = encryption_key(&config).unwrap();
        assert_eq!(loaded.raw_bytes(), key.raw_bytes());
        loaded
            .check_allowed_cipher(CipherKind::XChaCha20Poly1305)
            .unwrap_err();
        loaded.check_allowed_cipher(CipherKind::Aes256Siv).unwrap();
    }

    #[test]
    fn key_sources_are_exclusive() {
        let key = ArchiveKey::generate().unwrap();
        let config = config(&format!(
            "{{ encryption_key: '{}', use_keyring: true }}",
            key.display_unmasked()
        ));
        encryption_key(&config).unwrap_err();
        encryption_key(&self::config("{}")).unwrap_err();
    }

    #[test]
    fn select_all_or_named() {
        let dir = tempfile::TempDir::new().unwrap();
        let archive = Archive::new(dir.path().into(), Default::default());
        assert!(select(&archive, &[]).unwrap().is_empty());
        select(&archive, &[EntryPath::new("missing").unwrap()]).unwrap_err();
    }
}
