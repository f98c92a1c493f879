// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands, ConfigsCommands, OwnerCommands};
use quill::{Action, QuillConfig};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };
    let config = QuillConfig::load(cli.config.as_deref())?;

    match command {
        Commands::Install(args) => commands::cmd_lifecycle(&config, Action::Install, &args),
        Commands::Configure(args) => commands::cmd_lifecycle(&config, Action::Configure, &args),
        Commands::Update(args) => commands::cmd_lifecycle(&config, Action::Update, &args),
        Commands::Start(args) => commands::cmd_lifecycle(&config, Action::Start, &args),
        Commands::Uninstall(args) => commands::cmd_lifecycle(&config, Action::Uninstall, &args),
        Commands::Runlist { systems, os, max_depth } => commands::cmd_runlist(&config, &systems, os, max_depth),
        Commands::Tree { systems, os } => commands::cmd_tree(&config, &systems, os),
        Commands::Caches { clean, names } => commands::cmd_caches(&config, clean, &names),
        Commands::Installed { history } => commands::cmd_installed(&config, history),
        Commands::Pack { dir, output } => commands::cmd_pack(&dir, output),
        Commands::Publish { dir } => commands::cmd_publish(&config, &dir),
        Commands::Configs(sub) => match sub {
            ConfigsCommands::List => commands::cmd_configs_list(&config),
            ConfigsCommands::Get { name } => commands::cmd_configs_get(&config, &name),
            ConfigsCommands::Set { name, pairs } => commands::cmd_configs_set(&config, &name, &pairs),
            ConfigsCommands::Delete { name } => commands::cmd_configs_delete(&config, &name),
        },
        Commands::Owner(sub) => match sub {
            OwnerCommands::Add { system, user } => commands::cmd_owner_add(&config, &system, &user),
            OwnerCommands::Remove { system, user } => commands::cmd_owner_remove(&config, &system, &user),
        },
        Commands::Watch { once, reconfigure } => commands::cmd_watch(&config, once, reconfigure),
        Commands::Exec {
            hosts,
            concurrency,
            transport,
            command,
        } => commands::cmd_exec(&config, &hosts, &command, concurrency, &transport),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_install_with_overrides() {
        let cli = Cli::try_parse_from([
            "quill",
            "install",
            "web@^1.0",
            "--force",
            "--set",
            "db.host=db.local",
            "--config-set",
            "prod",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Install(args)) => {
                assert_eq!(args.systems, vec!["web@^1.0"]);
                assert!(args.force);
                assert_eq!(args.overrides, vec!["db.host=db.local"]);
                assert_eq!(args.config_sets, vec!["prod"]);
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_parse_exec() {
        let cli = Cli::try_parse_from(["quill", "exec", "--hosts", "a,b", "--", "uptime", "-p"]).unwrap();
        match cli.command {
            Some(Commands::Exec { hosts, command, transport, .. }) => {
                assert_eq!(hosts, vec!["a", "b"]);
                assert_eq!(command, vec!["uptime", "-p"]);
                assert_eq!(transport, "ssh");
            }
            _ => panic!("expected exec"),
        }
    }
}
