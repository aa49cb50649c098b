use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::Parser;
use heirloom_client::{
    ContractSnapshot, HeirloomError, HeirloomSession, HttpLedgerClient, TransactionReceipt,
    format_token_amount, parse_period_seconds, parse_token_amount,
};
use heirloom_testkit::{
    BENEFICIARY, GENESIS_UNIX, MemoryLedger, OWNER, ScriptedSigner, account, spawn_mock_gateway,
    test_config,
};
use serde_json::{Value, json};

#[derive(Parser, Debug)]
struct Args {
    /// Output directory. Defaults to output/vignettes/heirloom-will/<run_id>.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Check-in period for the will, in seconds.
    #[arg(long, default_value = "120")]
    check_in_period: String,

    /// Amount to deposit, in whole tokens with up to seven decimals.
    #[arg(long, default_value = "250.5")]
    deposit: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let run_id = uuid::Uuid::now_v7().to_string();
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| PathBuf::from(format!("output/vignettes/heirloom-will/{run_id}")));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("create output dir {}", output_dir.display()))?;

    let check_in_period =
        parse_period_seconds(&args.check_in_period).context("parse check-in period")?;
    let deposit = parse_token_amount(&args.deposit).context("parse deposit amount")?;

    let gateway_token = "vignette-gateway-token".to_string();
    let ledger = Arc::new(MemoryLedger::new(GENESIS_UNIX));
    ledger.set_not_found_polls(2);
    let gateway = spawn_mock_gateway(ledger.clone(), Some(gateway_token.clone()))
        .await
        .context("start mock gateway")?;

    let mut config = test_config().context("fixture config")?;
    config.rpc_url = gateway.base_url.clone();
    config.poll.interval = Duration::from_millis(20);

    let client = Arc::new(
        HttpLedgerClient::from_config(&config, Some(gateway_token)).context("build gateway client")?,
    );
    let owner = HeirloomSession::new(
        config.clone(),
        client.clone(),
        Arc::new(ScriptedSigner::new(account(OWNER)?, &config.network)),
    );
    let beneficiary = HeirloomSession::new(
        config.clone(),
        client,
        Arc::new(ScriptedSigner::new(account(BENEFICIARY)?, &config.network)),
    );

    owner.connect().await.context("connect owner")?;
    if owner.last_snapshot() != Some(ContractSnapshot::Uninitialized) {
        return Err(anyhow!("expected a fresh contract"));
    }

    let initialize = confirmed(owner.initialize(BENEFICIARY, check_in_period).await)?;
    let deposited = confirmed(owner.deposit(deposit).await)?;

    ledger.advance(check_in_period / 2);
    let (first, second) = tokio::join!(owner.check_in(), owner.check_in());
    let checked_in = confirmed(first)?;
    if !matches!(second, Err(HeirloomError::AlreadyInFlight)) {
        return Err(anyhow!("second concurrent check-in was not rejected: {second:?}"));
    }

    let refreshed = owner.refresh_snapshot().await.context("refresh owner")?;
    let balance_after_deposit = refreshed.state().map_or(0, |state| state.balance);
    if balance_after_deposit != deposit {
        return Err(anyhow!(
            "balance {} does not match deposit {}",
            format_token_amount(balance_after_deposit),
            format_token_amount(deposit)
        ));
    }

    let withdrawn = confirmed(owner.owner_withdraw().await)?;
    let redeposited = confirmed(owner.deposit(deposit).await)?;

    beneficiary.connect().await.context("connect beneficiary")?;
    let eligible_early = beneficiary.claim_eligibility().await?;
    if eligible_early {
        return Err(anyhow!("claim allowed before the deadline"));
    }
    ledger.advance(check_in_period + 1);
    let eligible_late = beneficiary.claim_eligibility().await?;
    let claimed = confirmed(beneficiary.claim().await)?;
    let final_snapshot = beneficiary
        .refresh_snapshot()
        .await
        .context("refresh beneficiary")?;

    let summary = json!({
        "schema": "heirloom.vignette.will_lifecycle.summary.v1",
        "run_id": run_id,
        "gateway_base_url": gateway.base_url,
        "check_in_period_seconds": check_in_period,
        "deposit": format_token_amount(deposit),
        "steps": [
            step_summary(&initialize),
            step_summary(&deposited),
            step_summary(&checked_in),
            step_summary(&withdrawn),
            step_summary(&redeposited),
            step_summary(&claimed),
        ],
        "concurrent_check_in_rejected": true,
        "claim_eligibility": { "before_deadline": eligible_early, "after_deadline": eligible_late },
        "final_snapshot": serde_json::to_value(&final_snapshot)?,
        "gateway_calls": gateway.calls().await.len(),
        "generated_at": Utc::now().to_rfc3339(),
    });
    std::fs::write(
        output_dir.join("summary.json"),
        serde_json::to_string_pretty(&summary)?,
    )
    .context("write summary")?;
    tracing::info!(output = %output_dir.display(), "vignette complete");

    gateway.stop().await;
    Ok(())
}

fn confirmed(result: Result<TransactionReceipt, HeirloomError>) -> Result<TransactionReceipt> {
    let receipt = result?.into_result()?;
    if let Some(error) = receipt.refresh_error.as_ref() {
        tracing::error!(function = %receipt.mutation, reason = %error, "post-confirmation refresh failed");
    }
    Ok(receipt)
}

fn step_summary(receipt: &TransactionReceipt) -> Value {
    json!({
        "function": receipt.mutation.to_string(),
        "request_id": receipt.request_id.to_string(),
        "handle": receipt.handle().map(ToString::to_string),
        "total_fee": receipt.total_fee,
        "polls": receipt.submission.polls,
        "ledger": receipt.submission.ledger,
    })
}
