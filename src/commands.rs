//! Command execution against an open [`Session`].

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use crate::render;
use exn::{OptionExt, ResultExt};
use kbsync_config::Config;
use kbsync_engine::{IndexStatus, Session, Sort};
use kbsync_remote::backend::{LocalRemote, ReadOnlyRemote};
use kbsync_remote::{JobId, RemoteHandle, Resource, ResourceId, validate_id};
use std::collections::HashMap;
use std::sync::Arc;

/// Open the configured remote, with command-line overrides applied.
///
/// `--dry-run` wraps the remote so every write is dropped before it leaves
/// the process.
pub fn open_remote(cli: &Cli, config: &Config) -> Result<RemoteHandle> {
    let root = cli.root.as_ref().or(config.remote.root.as_ref()).ok_or_raise(|| ErrorKind::MissingRoot)?;
    let local = LocalRemote::new(&config.remote.name, root, config.remote.state_dir()).or_raise(|| ErrorKind::Remote)?;
    let handle: RemoteHandle = Arc::new(local);
    match config.remote.read_only || cli.dry_run {
        true => Ok(Arc::new(ReadOnlyRemote::new(handle))),
        false => Ok(handle),
    }
}

/// The job named on the command line, or the configured one.
pub fn job(cli: &Cli, config: &Config) -> JobId {
    JobId::from(cli.job.as_deref().unwrap_or(&config.remote.job))
}

/// Run one command and return what it prints.
pub async fn execute(session: &Session, command: &Command) -> Result<String> {
    match command {
        Command::Ls { folder, sort } => ls(session, folder.as_deref(), sort.into()).await,
        Command::Tree(args) => {
            session.set_sort((&args.sort).into());
            session.load_root().await.or_raise(|| ErrorKind::Command("listing"))?;
            if args.all {
                session.expand_all().await.or_raise(|| ErrorKind::Command("listing"))?;
            }
            for folder in &args.expand {
                let folder = resolve(session, folder).await?;
                session.expand(&folder.id).await.or_raise(|| ErrorKind::Command("listing"))?;
            }
            // Statuses are unknown until the first resync.
            session.reconciler().resync().await.or_raise(|| ErrorKind::Command("resync"))?;
            Ok(render::tree(&session.rows(), |id| session.status(id)))
        },
        Command::Index(args) => {
            select(session, &args.ids).await?;
            session.reconciler().resync().await.or_raise(|| ErrorKind::Command("resync"))?;
            let selected = session.selected_ids();
            match session.index_selection().await.or_raise(|| ErrorKind::Command("index"))? {
                Some(batch) => tracing::info!(%batch, "Waiting for batch to settle"),
                None => tracing::info!("Everything selected is already indexed or pending"),
            }
            session.reconciler().join().await;
            Ok(render::statuses(selected.into_iter().map(|id| (id.clone(), session.status(&id))).collect()))
        },
        Command::Deindex(args) => {
            select(session, &args.ids).await?;
            session.reconciler().resync().await.or_raise(|| ErrorKind::Command("resync"))?;
            let selected = session.selected_ids();
            let removed = session.deindex_selection().await.or_raise(|| ErrorKind::Command("de-index"))?;
            tracing::info!(removed, selected = selected.len(), "De-index finished");
            Ok(render::statuses(selected.into_iter().map(|id| (id.clone(), session.status(&id))).collect()))
        },
        Command::Status { ids } => {
            session.reconciler().resync().await.or_raise(|| ErrorKind::Command("resync"))?;
            let statuses: HashMap<ResourceId, IndexStatus> = session.statuses();
            let entries: Vec<(ResourceId, IndexStatus)> = match ids.is_empty() {
                true => statuses.into_iter().filter(|(_, status)| *status != IndexStatus::Unindexed).collect(),
                false => ids
                    .iter()
                    .map(|id| {
                        let id = ResourceId::from(id.as_str());
                        let status = statuses.get(&id).copied().unwrap_or_default();
                        (id, status)
                    })
                    .collect(),
            };
            Ok(render::statuses(entries))
        },
    }
}

async fn ls(session: &Session, folder: Option<&str>, sort: Sort) -> Result<String> {
    let entry = match folder {
        None => session.load_root().await,
        Some(folder) => {
            let folder = resolve(session, folder).await?;
            session.load_folder(&folder.id).await
        },
    }
    .or_raise(|| ErrorKind::Command("listing"))?;
    Ok(render::listing(&entry.children, sort))
}

/// Look a resource up by id through its parent's listing.
async fn resolve(session: &Session, id: &str) -> Result<Resource> {
    let id = validate_id(id).or_raise(|| ErrorKind::UnknownResource(id.to_string()))?;
    let parent = id.as_str().rsplit_once('/').map(|(parent, _)| ResourceId::from(parent));
    let listing = match &parent {
        None => session.load_root().await,
        Some(parent) => session.load_folder(parent).await,
    }
    .or_raise(|| ErrorKind::UnknownResource(id.to_string()))?;
    listing
        .children
        .iter()
        .find(|child| child.id == id)
        .cloned()
        .ok_or_raise(|| ErrorKind::UnknownResource(id.to_string()))
}

/// Select every file named, expanding folders to their descendant files.
async fn select(session: &Session, ids: &[String]) -> Result<()> {
    for id in ids {
        let resource = resolve(session, id).await?;
        if !resource.is_dir() {
            session.selection().select(&resource.id);
            continue;
        }
        let files = session
            .selection()
            .descendant_files(&resource.id)
            .await
            .or_raise(|| ErrorKind::Command("selection"))?;
        for file in &files {
            session.selection().select(file);
        }
    }
    Ok(())
}
