use super::{Cli, Commands, ScopeArgs};
use crate::Config;
use crate::bundle::{
    BundleMetadata, ExportBundle, RestoreOptions, compare_bundles, create_export_bundle,
    deserialize_bundle, merge_bundles, restore_from_bundle, serialize_bundle,
};
use crate::model::{PinDraft, now_millis};
use crate::retrieval::{RetrievalOrchestrator, RetrievalRequest};
use crate::search::{LocalSearchProvider, SearchProvider, SearchRequest};
use crate::storage::{ExportOptions, ObservationQuery, SqliteStore};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_bundle(path: &Path) -> Result<ExportBundle> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read bundle {}", path.display()))?;
    deserialize_bundle(&text).with_context(|| format!("Failed to load bundle {}", path.display()))
}

fn write_bundle(bundle: &ExportBundle, output: Option<&Path>) -> Result<()> {
    let text = serialize_bundle(bundle)?;
    match output {
        Some(path) => {
            fs::write(path, text)
                .with_context(|| format!("Failed to write bundle {}", path.display()))?;
            info!(path = %path.display(), "bundle written");
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn metadata(description: Option<String>, tags: Vec<String>) -> Option<BundleMetadata> {
    if description.is_none() && tags.is_empty() {
        return None;
    }
    Some(BundleMetadata {
        description,
        tags: (!tags.is_empty()).then_some(tags),
    })
}

/// Resolve the database path: `--db`, then config (which already carries
/// `CAPSULE_MEMORY_DB`).
pub fn database_path(cli_db: Option<&Path>, config: &Config) -> PathBuf {
    cli_db.map_or_else(|| config.database_path(), Path::to_path_buf)
}

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    let path = database_path(cli.db.as_deref(), &config);
    let store = SqliteStore::open(&path)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;

    match cli.command {
        Commands::Pin {
            target_id,
            target_type,
            reason,
            expires,
            scope,
        } => {
            let pin = store
                .insert_pin(PinDraft {
                    reason,
                    expires_at: expires,
                    scope: scope.to_scope(),
                    ..PinDraft::new(target_type, target_id)
                })
                .await?;
            print_json(&pin)
        }
        Commands::Unpin { id } => {
            store.delete_pin(&id).await?;
            println!("Unpinned {id}");
            Ok(())
        }
        Commands::Pins { scope } => {
            let scope = scope.to_scope();
            let filter = (!scope.is_empty()).then_some(&scope);
            let pins = store.list_active_pins(filter, now_millis()).await?;
            print_json(&pins)
        }
        Commands::Forget { id } => {
            let observation = store.redact_observation(&id).await?;
            print_json(&observation)
        }
        Commands::Observations {
            scope,
            since,
            until,
            limit,
            include_redacted,
        } => {
            let observations = store
                .query_observations(&ObservationQuery {
                    scope: scope.to_scope(),
                    from: since,
                    to: until,
                    limit: Some(limit),
                    include_redacted,
                })
                .await?;
            print_json(&observations)
        }
        Commands::Capsule { id } => {
            let capsule = store
                .get_capsule_by_id(&id)
                .await?
                .with_context(|| format!("capsule not found: {id}"))?;
            let summary = store.get_latest_summary_for_capsule(&id).await?;
            print_json(&serde_json::json!({ "capsule": capsule, "summary": summary }))
        }
        Commands::Search {
            query,
            scope,
            limit,
            include_redacted,
        } => {
            let provider = LocalSearchProvider::new(store);
            let mut request = SearchRequest::new(query).with_scope(scope.to_scope());
            if let Some(limit) = limit {
                request = request.with_max_results(limit);
            }
            request.include_redacted = include_redacted;
            let response = provider.search(&request).await?;
            print_json(&response)
        }
        Commands::Recall {
            query,
            scope,
            budget,
            max_candidates,
            include_redacted,
        } => {
            let orchestrator = RetrievalOrchestrator::new(
                store.clone(),
                Arc::new(LocalSearchProvider::new(store)),
            );
            let request = RetrievalRequest {
                max_candidates: max_candidates.unwrap_or(config.retrieval.max_candidates),
                include_redacted,
                token_budget: budget.or(config.retrieval.token_budget),
                ..RetrievalRequest::new(query, scope.to_scope())
            };
            let result = orchestrator.retrieve(&request).await?;
            print_json(&result)
        }
        Commands::Export {
            output,
            scope,
            include_redacted,
            description,
            tags,
        } => {
            let metadata = metadata(description, tags);
            export(&store, &config, output.as_deref(), &scope, include_redacted, metadata).await
        }
        Commands::Import {
            path,
            dry_run,
            skip_validation,
        } => {
            let bundle = if skip_validation {
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read bundle {}", path.display()))?;
                serde_json::from_str(&text).context("Failed to parse bundle")?
            } else {
                read_bundle(&path)?
            };
            let report = restore_from_bundle(
                &store,
                &bundle,
                RestoreOptions {
                    skip_validation,
                    dry_run,
                },
            )
            .await?;
            print_json(&report)
        }
        Commands::Merge {
            inputs,
            output,
            description,
        } => {
            let bundles = inputs
                .iter()
                .map(|path| read_bundle(path))
                .collect::<Result<Vec<_>>>()?;
            let merged = merge_bundles(&bundles, metadata(description, Vec::new()))?;
            write_bundle(&merged, output.as_deref())
        }
        Commands::Diff { a, b } => {
            let diff = compare_bundles(&read_bundle(&a)?, &read_bundle(&b)?);
            print_json(&diff)
        }
        Commands::Stats => print_json(&store.stats().await?),
        Commands::Reindex => print_json(&store.reindex().await?),
    }
}

async fn export(
    store: &SqliteStore,
    config: &Config,
    output: Option<&Path>,
    scope: &ScopeArgs,
    include_redacted: bool,
    metadata: Option<BundleMetadata>,
) -> Result<()> {
    let scope = scope.to_scope();
    let options = ExportOptions {
        scope: (!scope.is_empty()).then_some(scope),
        include_redacted: include_redacted || config.export.include_redacted,
        limit: None,
    };
    let bundle = create_export_bundle(store, &options, metadata).await?;
    info!(
        observations = bundle.dataset.observations.len(),
        capsules = bundle.dataset.capsules.len(),
        summaries = bundle.dataset.summaries.len(),
        pins = bundle.dataset.pins.len(),
        "dataset exported"
    );
    write_bundle(&bundle, output)
}
