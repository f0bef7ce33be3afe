//! Polymarket Copy-Trading Bot CLI

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use polymarket_copy_bot::services::ctf::CTF_EXCHANGE_ADDRESS;
use polymarket_copy_bot::services::safe_relay::derive_safe_wallet;
use polymarket_copy_bot::services::{
    ClobGateway, DataApiClient, HttpFetcher, RpcChainGateway, SafeRelaySigner,
};
use polymarket_copy_bot::{
    ChainGateway, ClaimEngine, ClaimSettings, Config, MonitorSettings, MultisigSigner,
    OrderManager, SizingEngine, SizingSettings, TradeExecutor, TradeMonitor,
};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Events buffered between the monitor and the executor
const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Parser)]
#[command(name = "polymarket-copy-bot")]
#[command(about = "Copy trades of watched Polymarket wallets and redeem resolved positions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch wallets and copy their trades until Ctrl-C
    Run,

    /// Run a single claim cycle
    Claim,

    /// Show balances and allowance of the operator wallets
    Status,

    /// Refresh the exchange's cached balance/allowance for our Safe
    Approve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;
    check_proxy_wallet(&config)?;

    match cli.command {
        Commands::Run => run_bot(&config).await?,
        Commands::Claim => claim_once(&config).await?,
        Commands::Status => show_status(&config).await?,
        Commands::Approve => approve(&config).await?,
    }

    Ok(())
}

/// Warn when the configured proxy is not the Safe derived from our key
fn check_proxy_wallet(config: &Config) -> Result<()> {
    let signer: PrivateKeySigner = config.private_key.parse().context("Failed to parse private key")?;
    let derived = derive_safe_wallet(signer.address());
    let configured = Address::from_str(&config.proxy_wallet).context("Invalid PROXY_WALLET")?;

    if derived != configured {
        warn!(
            "PROXY_WALLET {} differs from the Safe derived from the signer ({:?}); using the configured value",
            config.proxy_wallet, derived
        );
    }
    Ok(())
}

fn build_chain(config: &Config, with_signer: bool) -> Result<Arc<RpcChainGateway>> {
    let signer: Option<Arc<dyn MultisigSigner>> = match (&config.builder, with_signer) {
        (Some(credentials), true) => {
            let key: PrivateKeySigner = config.private_key.parse().context("Failed to parse private key")?;
            let relay = SafeRelaySigner::new(
                &config.relayer_url,
                key,
                Address::from_str(&config.proxy_wallet)?,
                credentials.clone(),
            )?;
            Some(Arc::new(relay) as Arc<dyn MultisigSigner>)
        }
        _ => None,
    };

    let chain = RpcChainGateway::new(
        &config.rpc_url,
        Address::from_str(&config.usdc_contract_address)?,
        Address::from_str(&config.ctf_token_address)?,
        signer,
    )?;
    Ok(Arc::new(chain))
}

async fn build_exchange(config: &Config, fetcher: HttpFetcher) -> Result<Arc<ClobGateway>> {
    let exchange = ClobGateway::connect(
        &config.clob_http_url,
        &config.gamma_api_url,
        &config.private_key,
        fetcher,
    )
    .await
    .context("Failed to authenticate with CLOB")?;
    Ok(Arc::new(exchange))
}

fn build_claim_engine(
    config: &Config,
    exchange: Arc<ClobGateway>,
    chain: Arc<RpcChainGateway>,
    data: Arc<DataApiClient>,
) -> Result<ClaimEngine> {
    Ok(ClaimEngine::new(
        exchange,
        chain,
        data,
        ClaimSettings {
            proxy_wallet: config.proxy_wallet.clone(),
            collateral: Address::from_str(&config.usdc_contract_address)?,
            ctf: Address::from_str(&config.ctf_token_address)?,
        },
    ))
}

async fn run_bot(config: &Config) -> Result<()> {
    info!("Starting copy-trading bot");
    info!("  Proxy wallet: {}", config.proxy_wallet);
    info!("  Watching: {} wallet(s)", config.trader_wallets.len());
    info!("  Poll interval: {}s, max event age: {}s", config.fetch_interval_seconds, config.too_old_timestamp_seconds);
    if config.pause_trading {
        warn!("  PAUSE_TRADING is set: trades will be observed but not copied");
    }

    let fetcher = HttpFetcher::new()?;
    let data = Arc::new(DataApiClient::new(fetcher.clone(), &config.data_api_url));
    let exchange = build_exchange(config, fetcher).await?;
    let chain = build_chain(config, config.claim_enabled)?;

    let orders = Arc::new(OrderManager::new(exchange.clone()));
    let sizing = SizingEngine::new(
        exchange.clone(),
        chain.clone(),
        orders.clone(),
        SizingSettings {
            copy_ratio: config.copy_ratio,
            pause_trading: config.pause_trading,
            proxy_wallet: config.proxy_wallet.clone(),
        },
    );
    let executor = TradeExecutor::new(exchange.clone(), orders.clone(), sizing, config.retry_limit);

    let claim_handle = if config.claim_enabled {
        let engine = build_claim_engine(config, exchange.clone(), chain.clone(), data.clone())?;
        let interval = config.claim_interval();
        Some(tokio::spawn(async move { engine.run(interval).await }))
    } else {
        info!("Claims disabled");
        None
    };

    let monitor = Arc::new(TradeMonitor::new(
        data,
        MonitorSettings {
            interval: config.fetch_interval(),
            max_age: config.max_event_age(),
        },
    ));

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let executor_handle = tokio::spawn(async move { executor.run(rx).await });
    let monitor_handle = monitor
        .start(config.trader_wallets.clone(), tx)
        .context("Monitor already running")?;

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    monitor.stop();
    if let Err(e) = monitor_handle.await {
        error!("Monitor task failed: {}", e);
    }
    if let Err(e) = executor_handle.await {
        error!("Executor task failed: {}", e);
    }
    if let Some(handle) = claim_handle {
        handle.abort();
    }

    let open = orders.tracked().await;
    if !open.is_empty() {
        info!("{} order(s) left resting on the book", open.len());
    }
    info!("Bot stopped");
    Ok(())
}

async fn claim_once(config: &Config) -> Result<()> {
    if config.builder.is_none() {
        anyhow::bail!("Builder relay credentials are required to claim");
    }

    let fetcher = HttpFetcher::new()?;
    let data = Arc::new(DataApiClient::new(fetcher.clone(), &config.data_api_url));
    let exchange = build_exchange(config, fetcher).await?;
    let chain = build_chain(config, true)?;

    let engine = build_claim_engine(config, exchange, chain, data)?;
    let report = engine.check_and_claim().await?;

    println!("\nResolved positions: {}", report.resolved);
    println!("Redeemed:           {}", report.redeemed.len());
    for condition in &report.redeemed {
        println!("  + {}", condition);
    }
    if !report.failed.is_empty() {
        println!("Failed:             {}", report.failed.len());
        for condition in &report.failed {
            println!("  - {}", condition);
        }
    }
    if report.low_gas {
        println!("Warning: proxy wallet native balance is low");
    }
    Ok(())
}

async fn show_status(config: &Config) -> Result<()> {
    let chain = build_chain(config, false)?;

    let eoa_usdc = chain.balance(&config.public_address).await?;
    let proxy_usdc = chain.balance(&config.proxy_wallet).await?;
    let proxy_native = chain.native_balance(&config.proxy_wallet).await?;
    let allowance = chain.allowance(&config.proxy_wallet, CTF_EXCHANGE_ADDRESS).await?;

    println!("\n{}", "=".repeat(60));
    println!("  COPY BOT STATUS");
    println!("{}", "=".repeat(60));
    println!("EOA:          {}", config.public_address);
    println!("  USDC:       ${}", eoa_usdc.round_dp(2));
    println!("Proxy (Safe): {}", config.proxy_wallet);
    println!("  USDC:       ${}", proxy_usdc.round_dp(2));
    println!("  POL:        {}", proxy_native.round_dp(4));
    println!("  Allowance:  {} (CTF Exchange {})", allowance.round_dp(2), CTF_EXCHANGE_ADDRESS);
    println!("Collateral:   {}", config.usdc_contract_address);
    println!("CTF:          {}", config.ctf_token_address);
    println!("Watching:");
    for wallet in &config.trader_wallets {
        match chain.balance(wallet).await {
            Ok(balance) => println!("  {} ${}", wallet, balance.round_dp(2)),
            Err(e) => println!("  {} (balance unavailable: {})", wallet, e),
        }
    }
    println!();

    if allowance.is_zero() {
        warn!("Proxy has no collateral allowance for the exchange; orders will be rejected");
    }
    Ok(())
}

async fn approve(config: &Config) -> Result<()> {
    let exchange = build_exchange(config, HttpFetcher::new()?).await?;
    exchange
        .refresh_allowances()
        .await
        .context("Failed to refresh exchange allowance cache")?;
    println!("Exchange balance/allowance cache refreshed for {}", config.proxy_wallet);
    Ok(())
}
