/*!
 * Sandbox Engine - Main Entry Point
 *
 * Loads the sandbox policy and, given an identity file, performs a dry run:
 * - Policy documents and permission table summary
 * - Full sandbox build against the simulation backend
 * - Recorded backend calls printed as JSON
 */

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use appspawn_sandbox::core::json;
use appspawn_sandbox::policy::PolicyKind;
use appspawn_sandbox::sandbox::StaticParameters;
use appspawn_sandbox::{
    init_tracing, AppIdentity, EngineConfig, SandboxEngineContext, SimulationBackend, SpawnSession,
};

fn main() -> Result<()> {
    init_tracing();

    info!("Sandbox engine starting...");
    let config = EngineConfig::from_env().context("reading engine configuration")?;
    info!(
        "Config dirs: {:?}, developer mode: {}",
        config.config_dirs, config.developer_mode
    );

    let simulation = SimulationBackend::new();
    let context = SandboxEngineContext::with_backend(
        config,
        Arc::new(simulation.clone()),
        Arc::new(StaticParameters::new()),
    )
    .context("loading sandbox policy")?;

    for kind in PolicyKind::ALL {
        info!(
            "{} policy: {} documents",
            kind,
            context.store().documents_of(kind).len()
        );
    }
    info!("Permission registry: {} entries", context.registry().count());

    let Some(path) = std::env::args().nth(1) else {
        info!("No identity file given, nothing to build");
        return Ok(());
    };

    let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path))?;
    let identity: AppIdentity =
        json::from_slice(&bytes).with_context(|| format!("parsing identity {}", path))?;

    context.startup();
    let mut session = SpawnSession::new();
    context
        .build_sandbox(&identity, &mut session)
        .with_context(|| format!("building sandbox for {}", identity.bundle_name))?;

    info!(
        "Dry run for {} complete: root {:?}, {} mounts, trace {}",
        identity.bundle_name, session.sandbox_root, session.mounts, session.trace_id
    );
    let calls = json::to_string_pretty(&simulation.calls()).context("encoding calls")?;
    println!("{}", calls);
    Ok(())
}
