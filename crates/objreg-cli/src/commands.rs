use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _};
use colored::Colorize;
use objreg_service::{Context, NoOpExecutor, ObjectService, RegistryConfig};
use objreg_store::{ListOptions, LogRepository};
use objreg_types::{Object, ObjectList, StorageKey, Unstructured};

use crate::cli::*;

type Service = ObjectService<Unstructured, LogRepository>;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref(), cli.data_dir)?;
    let ctx = Context::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let format = cli.format;
    match cli.command {
        Command::Get(args) => cmd_get(&ctx, &config, args, format).await,
        Command::List(args) => cmd_list(&ctx, &config, args, format).await,
        Command::Put(args) => cmd_put(&ctx, &config, args, format).await,
        Command::Delete(args) => cmd_delete(&ctx, &config, args, format).await,
        Command::Compact => cmd_compact(&config, format),
        Command::Config => cmd_config(&config),
    }
}

fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<RegistryConfig> {
    let mut config = match path {
        Some(path) => RegistryConfig::load(path)?,
        None => RegistryConfig::default(),
    };
    if let Some(dir) = data_dir {
        config.store.data_dir = dir;
    }
    Ok(config)
}

fn open_repository(config: &RegistryConfig) -> anyhow::Result<LogRepository> {
    let path = config.store.log_path();
    config
        .store
        .open()
        .with_context(|| format!("cannot open store at {}", path.display()))
}

fn open_service(config: &RegistryConfig, kind: &str) -> anyhow::Result<Service> {
    let repo = Arc::new(open_repository(config)?);
    ObjectService::new(kind, repo, Arc::new(NoOpExecutor), config.service.clone())
        .context("cannot start object service")
}

async fn cmd_get(
    ctx: &Context,
    config: &RegistryConfig,
    args: ObjectArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let svc = open_service(config, &args.kind)?;
    let object = svc.get(ctx, &args.namespace, &args.name).await?;
    println!("{}", render_object(&object, format)?);
    Ok(())
}

async fn cmd_list(
    ctx: &Context,
    config: &RegistryConfig,
    args: ListArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let svc = open_service(config, &args.kind)?;
    let mut options = ListOptions {
        limit: args.limit,
        ..ListOptions::default()
    };
    if let Some(after) = &args.after {
        options = options.after(StorageKey::new(&args.namespace, &args.kind, after));
    }
    let list = svc.list(ctx, &args.namespace, &options).await?;
    println!("{}", render_list(&list, format)?);
    Ok(())
}

async fn cmd_put(
    ctx: &Context,
    config: &RegistryConfig,
    args: PutArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let input = read_input(args.file.as_deref())?;
    let object = put_object(ctx, config, &input, args.update).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&object)?),
        OutputFormat::Text => {
            let verb = if args.update { "Updated" } else { "Created" };
            println!(
                "{} {} {} at version {}",
                "✓".green().bold(),
                verb,
                object.identity().to_string().bold(),
                version_of(&object).yellow()
            );
        }
    }
    Ok(())
}

async fn cmd_delete(
    ctx: &Context,
    config: &RegistryConfig,
    args: ObjectArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let svc = open_service(config, &args.kind)?;
    let target = Unstructured::new(&args.kind, &args.namespace, &args.name);
    let deleted = svc.delete(ctx, &target).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&deleted)?),
        OutputFormat::Text => println!(
            "{} Deleted {} (last version {})",
            "✓".green().bold(),
            deleted.identity().to_string().bold(),
            version_of(&deleted).yellow()
        ),
    }
    Ok(())
}

fn cmd_compact(config: &RegistryConfig, format: OutputFormat) -> anyhow::Result<()> {
    let repo = open_repository(config)?;
    let stats = repo.compact().context("compaction failed")?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "liveKeys": stats.live_keys,
                "bytesBefore": stats.bytes_before,
                "bytesAfter": stats.bytes_after,
            })
        ),
        OutputFormat::Text => {
            println!("{} Compacted {}", "✓".green().bold(), repo.path().display());
            println!("  Live objects: {}", stats.live_keys.to_string().bold());
            println!("  Size: {} → {} bytes", stats.bytes_before, stats.bytes_after.to_string().green());
        }
    }
    Ok(())
}

fn cmd_config(config: &RegistryConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn read_input(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display())),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("cannot read object from stdin")?;
            Ok(input)
        }
    }
}

async fn put_object(
    ctx: &Context,
    config: &RegistryConfig,
    input: &str,
    update: bool,
) -> anyhow::Result<Unstructured> {
    let object: Unstructured =
        objreg_types::decode(input.as_bytes()).context("input is not a valid object")?;
    if object.kind.is_empty() {
        bail!("object has no kind");
    }
    let svc = open_service(config, &object.kind)?;
    let stored = if update {
        svc.update(ctx, object).await?
    } else {
        svc.create(ctx, object).await?
    };
    Ok(stored)
}

fn version_of(object: &Unstructured) -> String {
    object
        .resource_version()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".into())
}

fn render_object(object: &Unstructured, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(object)?,
        OutputFormat::Text => format!(
            "{}  {}\n{}",
            object.identity().to_string().bold(),
            format!("version {}", version_of(object)).yellow(),
            serde_json::to_string_pretty(&object.fields)?
        ),
    })
}

fn render_list(list: &ObjectList<Unstructured>, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(list)?,
        OutputFormat::Text => {
            let mut out = String::new();
            for object in list.iter() {
                out.push_str(&format!(
                    "{}  {}\n",
                    object.meta().name.bold(),
                    version_of(object).dimmed()
                ));
            }
            let version = list
                .resource_version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".into());
            out.push_str(&format!("{} objects, list version {}", list.len(), version.yellow()));
            out
        }
    })
}
