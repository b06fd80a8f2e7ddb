use std::sync::Arc;

use anyhow::Context;
use solana_sdk::signature::{read_keypair_file, Signer};
use tracing::{info, warn};

use otter_relayer::config::load_config;
use otter_relayer::context::RelayContext;
use otter_relayer::ledger::RpcLedger;
use otter_relayer::state::AppState;
use otter_relayer::withdraw::AdvancePlan;
use otter_relayer::{journal, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,otter_relayer=debug".into()),
        )
        .init();

    info!("Starting otter relayer…");

    // ── Config
    let cfg = load_config()?;

    // ── Relayer identity
    let payer = read_keypair_file(&cfg.keypair_path).map_err(|e| {
        anyhow::anyhow!(
            "failed to read RELAYER_KEYPAIR ({}): {e}",
            cfg.keypair_path.display()
        )
    })?;
    info!("Relayer address: {}", payer.pubkey());

    // ── Packing invariants (fatal at startup)
    let plan = AdvancePlan::withdraw().context("advance plan")?;
    plan.check_fits_packet(&cfg.program_id, &payer.pubkey())
        .context("advance plan")?;
    info!(
        steps = plan.total_steps(),
        groups = plan.group_count(),
        ixs_per_tx = plan.ixs_per_tx(),
        "advance plan ok"
    );

    // ── Ledger
    let ledger = RpcLedger::new(cfg.rpc_url.clone());
    info!("RPC endpoint: {}", ledger.url());
    info!("Program: {}", cfg.program_id);

    // ── Session journal
    if let Some(path) = cfg.session_journal.as_ref() {
        match journal::load(path).await {
            Ok(entries) if !entries.is_empty() => warn!(
                "{} session(s) in {} from earlier runs; they are not resumed",
                entries.len(),
                path.display()
            ),
            Ok(_) => {}
            Err(e) => warn!("session journal unreadable: {e}"),
        }
    }

    let ctx = RelayContext::new(
        Arc::new(ledger),
        Arc::new(payer),
        cfg.program_id,
        cfg.policy.clone(),
    );
    let state = Arc::new(
        AppState::new(
            ctx,
            cfg.fee_lamports,
            cfg.max_concurrent_sessions,
            cfg.session_journal.clone(),
        )
        .with_rate_limits(cfg.rate_limits)
        .with_session_ttl(cfg.session_ttl),
    );

    // ── Router
    let app = router::build(state);

    // ── Serve
    info!("Listening on {}", cfg.api_bind);
    let listener = tokio::net::TcpListener::bind(&cfg.api_bind)
        .await
        .with_context(|| format!("bind {}", cfg.api_bind))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
