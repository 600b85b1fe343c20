use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use colored::Colorize;
use serde_json::json;
use tether_core::{ClassSpec, Engine, EngineConfig, EntityId};
use tether_store::{RowStore, SqliteRowStore};
use tracing::{debug, info};

use crate::cli::*;
use crate::{demo, render};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    debug!(cache_mode = %config.cache_mode, "engine config");
    match cli.command {
        Command::Entities => cmd_entities(&cli.db, cli.format),
        Command::Show(args) => cmd_show(&cli.db, args, cli.format),
        Command::Demo => cmd_demo(&cli.db, config, cli.format),
        Command::Reload => cmd_reload(&cli.db, config, cli.format),
    }
}

fn open_existing(db: &Path) -> anyhow::Result<SqliteRowStore> {
    if !db.exists() {
        bail!("no database at {}", db.display());
    }
    let store = SqliteRowStore::open(db).with_context(|| format!("opening {}", db.display()))?;
    debug!(db = %db.display(), "opened store");
    Ok(store)
}

fn cmd_entities(db: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_existing(db)?;
    let rows = entity_summary(&store)?;
    match format {
        OutputFormat::Json => {
            let list: Vec<_> = rows
                .iter()
                .map(|(id, tag, count)| json!({ "id": id.get(), "class": tag, "rows": count }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No stored records.");
            }
            for (id, tag, count) in &rows {
                println!("{:>6}  {}  ({} rows)", id.to_string().yellow(), tag.bold(), count);
            }
        }
    }
    Ok(())
}

/// `(id, type tag, stored cell count)` for every top-level record.
fn entity_summary(store: &dyn RowStore) -> anyhow::Result<Vec<(EntityId, String, usize)>> {
    let mut rows = Vec::new();
    for (id, tag) in store.entities()? {
        let count = store.fields(id)?.len();
        rows.push((id, tag, count));
    }
    Ok(rows)
}

fn cmd_show(db: &Path, args: ShowArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_existing(db)?;
    let id = EntityId::new(args.id);
    let rows = store.rows(id)?;
    debug!(entity = %id, rows = rows.len(), "read entity rows");
    let class = store
        .entities()?
        .into_iter()
        .find_map(|(entity, tag)| (entity == id).then_some(tag));
    if rows.is_empty() && class.is_none() {
        bail!("entity {id} not found");
    }

    match format {
        OutputFormat::Json => {
            let cells: Vec<_> = rows
                .iter()
                .map(|(field, stored)| json!({ "field": field, "value": render::stored_json(stored) }))
                .collect();
            let out = json!({ "id": id.get(), "class": class, "rows": cells });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            let kind = class.as_deref().unwrap_or("aggregate");
            println!("{} {}", id.to_string().yellow().bold(), kind.bold());
            for (field, stored) in &rows {
                match &stored.tag {
                    Some(tag) => println!("  {:<16} {} {}", field.to_string(), tag.as_str().cyan(), stored.value),
                    None => println!("  {:<16} {}", field.to_string(), stored.value),
                }
            }
        }
    }
    Ok(())
}

fn cmd_demo(db: &Path, config: EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    let engine = Engine::open_sqlite(db, config)?;
    let graph = demo::build(&engine)?;
    engine.shutdown()?;
    info!(first = %graph.first, second = %graph.second, "stored demo graph");
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "first": graph.first.get(), "second": graph.second.get() })
        ),
        OutputFormat::Text => println!(
            "{} Stored demo graph: {} <-> {}",
            "✓".green().bold(),
            graph.first.to_string().yellow(),
            graph.second.to_string().yellow()
        ),
    }
    Ok(())
}

fn cmd_reload(db: &Path, config: EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    let store: Arc<dyn RowStore> = Arc::new(open_existing(db)?);
    let engine = Engine::open(store.clone(), config)?;
    let specs = infer_classes(store.as_ref())?;
    info!(classes = specs.len(), "inferred classes from stored rows");
    for spec in specs {
        engine.register_class(spec)?;
    }
    let loaded = engine.reload_all()?;

    match format {
        OutputFormat::Json => {
            let records: Vec<_> = engine
                .records()
                .iter()
                .map(|record| {
                    let fields: serde_json::Map<_, _> = record
                        .fields()
                        .iter()
                        .map(|(name, value)| (name.clone(), render::value_json(value)))
                        .collect();
                    json!({ "id": record.id().get(), "class": record.class_name(), "fields": fields })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        OutputFormat::Text => {
            println!("{} Reloaded {} records", "✓".green().bold(), loaded);
            for record in engine.records() {
                println!("{} {}", record.id().to_string().yellow(), record.class_name().bold());
                for (name, value) in record.fields() {
                    println!("  {:<16} {}", name, render::value_text(&value));
                }
            }
        }
    }
    engine.shutdown()?;
    Ok(())
}

/// Class declarations recovered from stored rows: each type tag gets the
/// union of text field names stored under any of its records.
fn infer_classes(store: &dyn RowStore) -> anyhow::Result<Vec<ClassSpec>> {
    let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (id, tag) in store.entities()? {
        let names = fields.entry(tag).or_default();
        for key in store.fields(id)? {
            if let Some(name) = key.as_text() {
                if !names.iter().any(|known| known == name) {
                    names.push(name.to_string());
                }
            }
        }
    }
    let mut specs = Vec::new();
    for (tag, names) in fields {
        specs.push(ClassSpec::builder(tag).fields(names).build()?);
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use tether_core::{CacheMode, Value};

    use super::*;

    fn manual() -> EngineConfig {
        EngineConfig {
            cache_mode: CacheMode::Manual,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn missing_database_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_existing(&dir.path().join("absent.db")).unwrap_err();
        assert!(err.to_string().contains("no database"));
    }

    #[test]
    fn summary_counts_rows_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("demo.db");
        let graph = {
            let engine = Engine::open_sqlite(&db, manual()).unwrap();
            demo::build(&engine).unwrap()
        };

        let store = open_existing(&db).unwrap();
        let rows = entity_summary(&store).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], (graph.first, "Node".to_string(), 4));
        assert_eq!(rows[1], (graph.second, "Node".to_string(), 4));
    }

    #[test]
    fn inferred_classes_reload_the_graph() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("demo.db");
        let graph = {
            let engine = Engine::open_sqlite(&db, manual()).unwrap();
            demo::build(&engine).unwrap()
        };

        let store: Arc<dyn RowStore> = Arc::new(open_existing(&db).unwrap());
        let specs = infer_classes(store.as_ref()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name(), "Node");
        assert!(specs[0].has_field("friend"));

        let engine = Engine::open(store, manual()).unwrap();
        for spec in specs {
            engine.register_class(spec).unwrap();
        }
        assert_eq!(engine.reload_all().unwrap(), 2);
        let first = engine.lookup(graph.first).unwrap();
        assert_eq!(first.get("name").unwrap(), Value::from("Ada"));
        let friend = first.get("friend").unwrap();
        assert_eq!(friend.entity_id(), Some(graph.second));
    }
}
