#![forbid(unsafe_code)]

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{BundleCommand, Cli, Command, TrustCommand};
use plugin_runtime::config::Config;
use plugin_runtime::context::Permission;
use plugin_runtime::lifecycle::LifecycleManager;
use plugin_runtime::loader::BundleLoader;
use plugin_runtime::revocation::{compute_fingerprint, RevocationList, RevokedCertificateEntry};
use plugin_runtime::version::Version;

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_manager(config: &Config) -> Result<LifecycleManager> {
    let host_version: Version = config
        .host_version
        .parse()
        .with_context(|| format!("invalid host_version in config: {}", config.host_version))?;
    let revocation_list = RevocationList::load(&config.revocation_list_path)
        .context("failed to load revocation list")?;
    let loader = BundleLoader::new(
        config.bundle_search_paths.clone(),
        config.trust_policy(),
        revocation_list,
    );
    let default_permissions = vec![Permission::DataRead, Permission::DataWrite];
    Ok(LifecycleManager::new(
        host_version,
        config.base_data_directory.clone(),
        loader,
        default_permissions,
    ))
}

fn main() -> Result<()> {
    install_tracing();
    let cli = Cli::parse();
    let config = Config::discover(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Init(args) => {
            let profile: plugin_runtime::config::Profile = args.profile.parse().map_err(|e| anyhow::anyhow!("{e}"))?;
            let generated = Config::for_profile(profile);
            let out_dir = args.out_dir.unwrap_or_else(|| std::path::PathBuf::from("."));
            std::fs::create_dir_all(&out_dir)?;
            std::fs::create_dir_all(out_dir.join(&generated.bundle_search_paths[0]))?;
            std::fs::create_dir_all(out_dir.join(&generated.base_data_directory))?;
            std::fs::write(out_dir.join("plugin_node.toml"), generated.to_toml()?)?;
            println!("wrote {}", out_dir.join("plugin_node.toml").display());
        }

        Command::Run(args) => {
            let manager = build_manager(&config)?;
            let report = manager.initialize().context("initializing bundles")?;
            println!("loaded: {:?}", report.load_order);
            if !report.blocked.is_empty() {
                println!("blocked: {:?}", report.blocked);
            }
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
            if args.enable_all {
                for id in &report.load_order {
                    if let Err(e) = manager.enable(id) {
                        eprintln!("failed to enable {id}: {e}");
                    }
                }
            }
            if args.watch && config.hotreload_enabled() {
                println!("hot reload requested but no interactive watch loop in this demo host");
            }
            manager.shutdown().context("shutting down")?;
        }

        Command::Bundle(sub) => {
            let manager = build_manager(&config)?;
            manager.initialize().context("initializing bundles")?;
            match sub {
                BundleCommand::List(args) => {
                    for container in manager.registry().all() {
                        if let Some(filter) = &args.state {
                            if container.state.label() != filter {
                                continue;
                            }
                        }
                        println!("{}\t{}\t{}", container.descriptor.id, container.descriptor.version, container.state);
                    }
                }
                BundleCommand::Enable(args) => {
                    manager.enable(&args.bundle_id)?;
                    println!("enabled {}", args.bundle_id);
                }
                BundleCommand::Disable(args) => {
                    manager.disable(&args.bundle_id)?;
                    println!("disabled {}", args.bundle_id);
                }
                BundleCommand::Unload(args) => {
                    manager.unload(&args.bundle_id)?;
                    println!("unloaded {}", args.bundle_id);
                }
            }
            manager.shutdown().context("shutting down")?;
        }

        Command::Trust(sub) => match sub {
            TrustCommand::Revoke(args) => {
                let mut list = RevocationList::load(&config.revocation_list_path)
                    .context("failed to load revocation list")?;
                let entry = RevokedCertificateEntry::new(
                    &args.fingerprint,
                    args.reason,
                    chrono::Utc::now(),
                )
                .map_err(|e| anyhow::anyhow!("{e}"))?;
                list.revoke(entry);
                list.save(&config.revocation_list_path)
                    .context("failed to save revocation list")?;
                println!("revoked {}", args.fingerprint);
            }
            TrustCommand::List(_) => {
                let list = RevocationList::load(&config.revocation_list_path)
                    .context("failed to load revocation list")?;
                for entry in &list.entries {
                    println!("{}\t{:?}\t{}", entry.fingerprint, entry.reason, entry.revoked_at);
                }
            }
        },

        Command::Doctor(args) => {
            println!("profile: {}", config.profile);
            println!("host_version: {}", config.host_version);
            println!("bundle_search_paths: {:?}", config.bundle_search_paths);
            println!("hotreload_enabled: {}", config.hotreload_enabled());
            if args.verbose {
                println!("config: {}", config.to_toml()?);
                println!("fingerprint example: {}", compute_fingerprint(b"example"));
            }
        }
    }

    Ok(())
}
