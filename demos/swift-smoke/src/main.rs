//! Exercises the Swift storage adapter against a live cluster.
//!
//! Reads its configuration from `SWIFT_*` environment variables. An optional
//! file path argument is uploaded instead of a short greeting.

use std::path::PathBuf;

use miette::{Context, IntoDiagnostic, Result};
use swift_storage::{
  Bytes, ObjectName, SaveOptions, StorageRole, SwiftConfig, SwiftStorage,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,swift_storage=debug")),
    )
    .init();

  let config =
    SwiftConfig::from_env().context("failed to read configuration")?;
  let storage = SwiftStorage::new_http(&config, StorageRole::Default)
    .await
    .context("failed to initialize storage")?;

  let (name, content) = match std::env::args_os().nth(1).map(PathBuf::from) {
    Some(path) => {
      let content = tokio::fs::read(&path)
        .await
        .into_diagnostic()
        .with_context(|| format!("failed to read \"{}\"", path.display()))?;
      let file = path
        .file_name()
        .map_or_else(|| "upload".into(), |f| f.to_string_lossy());
      (SwiftStorage::valid_name(&file), Bytes::from(content))
    }
    None => ("smoke/hello.txt".to_owned(), Bytes::from_static(b"hello!")),
  };

  let name = storage
    .available_name(&ObjectName::new(name), None)
    .await
    .context("failed to find a free name")?;

  info!(%name, size = content.len(), "uploading object");
  storage
    .save(&name, content, SaveOptions::default())
    .await
    .with_context(|| format!("failed to save `{name}`"))?;

  let file = storage
    .open(&name)
    .await
    .with_context(|| format!("failed to open `{name}`"))?;
  info!(metadata = ?file.metadata, "downloaded object");

  let url = storage
    .url(&name)
    .await
    .with_context(|| format!("failed to build URL for `{name}`"))?;
  info!(%url, "object URL");

  let (dirs, files) = storage
    .listdir("")
    .await
    .context("failed to list container")?;
  info!(?dirs, ?files, "container root");

  storage
    .delete(&name)
    .await
    .with_context(|| format!("failed to delete `{name}`"))?;
  info!(%name, "deleted object");

  Ok(())
}
