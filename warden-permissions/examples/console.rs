// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interactive console to manage groups, users and node flags in a SQLite database.
//!
//! ```text
//! cargo run --example console -- --database sqlite://permissions.db
//! ```
use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use warden_core::{FlagChange, PrincipalId};
use warden_permissions::{Config, PermissionGroup, PermissionService, PermissionUser, Target};
use warden_store::{Shared, SqliteStore, SqliteStoreBuilder};

const HELP: &str = "\
commands:
  group create <name>
  group delete <name>
  group rename <name> <new-name>
  group parent <name> <parent|none>
  group set <name> <node> <flag|none>
  user create <principal>
  user delete <principal>
  user group <principal> <group|none>
  user set <principal> <node> <flag|none>
  check <principal> <node>
  nodes <principal> [prefix]
  groups
  quit";

pub fn setup_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

#[derive(Parser)]
struct Args {
    /// SQLite database URL, an in-memory database is used if none is given.
    #[arg(short = 'd', long, value_name = "URL")]
    database: Option<String>,

    /// Name of the default group.
    #[arg(short = 'g', long, value_name = "NAME", default_value = "default")]
    default_group: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let args = Args::parse();

    // Every connection to an in-memory database opens a database of its own.
    let builder = match &args.database {
        Some(url) => SqliteStoreBuilder::new().database_url(url),
        None => SqliteStoreBuilder::new().max_connections(1),
    };
    let store = builder.build().await?;

    let config = Config::default().with_default_group(&args.default_group);
    let service = PermissionService::start(store, config).await?;

    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        if words == ["quit"] {
            break;
        }

        match run(&service, &words).await {
            Ok(output) => println!("{output}"),
            Err(err) => println!("error: {err}"),
        }
    }

    service.shutdown().await;

    Ok(())
}

async fn run(service: &PermissionService<SqliteStore>, words: &[&str]) -> Result<String> {
    match words {
        ["group", "create", name] => {
            service.create_group(name).await?;
            Ok(format!("created group {name}"))
        }
        ["group", "delete", name] => {
            let group = find_group(service, name).await?;
            service.delete_group(&group).await?;
            Ok(format!("deleted group {name}"))
        }
        ["group", "rename", name, new_name] => {
            let group = find_group(service, name).await?;
            service.rename_group(&group, new_name).await?;
            Ok(format!("renamed group {name} to {new_name}"))
        }
        ["group", "parent", name, parent] => {
            let group = find_group(service, name).await?;
            let parent = match *parent {
                "none" => None,
                parent => Some(find_group(service, parent).await?),
            };
            service.set_parent(&group, parent.as_ref(), true).await?;
            Ok(format!("updated parent of {name}"))
        }
        ["group", "set", name, node, flag] => {
            let group = find_group(service, name).await?;
            let change: FlagChange = flag.parse()?;
            service.set_permission(Target::Group(&group), node, change, true)?;
            Ok(format!("{name}: {node} = {}", describe(change)))
        }
        ["user", "create", principal] => {
            service.create_user(PrincipalId::new(*principal)?).await?;
            Ok(format!("created user {principal}"))
        }
        ["user", "delete", principal] => {
            let user = find_user(service, principal).await?;
            service.delete_user(&user).await?;
            Ok(format!("deleted user {principal}"))
        }
        ["user", "group", principal, group] => {
            let user = find_user(service, principal).await?;
            let group = match *group {
                "none" => None,
                group => Some(find_group(service, group).await?),
            };
            service.set_user_group(&user, group.as_ref()).await?;
            Ok(format!("updated group of {principal}"))
        }
        ["user", "set", principal, node, flag] => {
            let user = find_user(service, principal).await?;
            let change: FlagChange = flag.parse()?;
            service.set_permission(Target::User(&user), node, change, true)?;
            Ok(format!("{principal}: {node} = {}", describe(change)))
        }
        ["check", principal, node] => {
            let granted = service
                .has_permission(&PrincipalId::new(*principal)?, node)
                .await?;
            Ok(format!("{principal}: {node} = {granted}"))
        }
        ["nodes", principal, rest @ ..] => {
            let prefix = rest.first().copied().unwrap_or_default();
            let nodes = service
                .effective_nodes(&PrincipalId::new(*principal)?, prefix)
                .await?;
            Ok(nodes
                .into_iter()
                .map(|(path, value)| format!("{path}:{}", u8::from(value)))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        ["groups"] => {
            let mut names: Vec<String> = service
                .groups()
                .iter()
                .map(|group| group.read().name().to_string())
                .collect();
            names.sort();
            Ok(names.join("\n"))
        }
        _ => bail!("unknown command\n{HELP}"),
    }
}

async fn find_group(
    service: &PermissionService<SqliteStore>,
    name: &str,
) -> Result<Shared<PermissionGroup>> {
    service
        .get_group(name)
        .await?
        .ok_or_else(|| anyhow!("group {name} does not exist"))
}

async fn find_user(
    service: &PermissionService<SqliteStore>,
    principal: &str,
) -> Result<Shared<PermissionUser>> {
    service
        .get_user(&PrincipalId::new(principal)?)
        .await?
        .with_context(|| format!("user {principal} does not exist"))
}

fn describe(change: FlagChange) -> &'static str {
    match change {
        FlagChange::Set(true) => "granted",
        FlagChange::Set(false) => "denied",
        FlagChange::Unset => "unset",
    }
}
