//! # Category Subscriber Demo
//!
//! Writes account events to an in-memory store while a subscriber keeps
//! running balances. Stops on Ctrl-C or after a few seconds.
//!
//! ```text
//! RUST_LOG=messagestore_core=debug,info cargo run -p category-subscriber-demo
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use messagestore_core::{
    Context, Error, Event, Message, MessageHandler, MessageStore, SubscriberConfig, WriteOptions,
};
use messagestore_testing::InMemoryRepository;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ============================================================================
// Events (Facts)
// ============================================================================

/// Payload of both `Deposited` and `Withdrawn`.
#[derive(Debug, Serialize, Deserialize)]
struct Amount {
    amount: i64,
}

// ============================================================================
// Handlers
// ============================================================================

type Balances = Arc<Mutex<HashMap<Uuid, i64>>>;

struct BalanceHandler {
    message_type: &'static str,
    sign: i64,
    balances: Balances,
}

#[async_trait]
impl MessageHandler for BalanceHandler {
    fn message_type(&self) -> &str {
        self.message_type
    }

    async fn process(&self, _ctx: &Context, message: &Message) -> Result<()> {
        let event = message.as_event().context("expected an event")?;
        let account = event.entity_id.context("event without an account")?;
        let Amount { amount } = event.decode_data()?;

        let mut balances = self
            .balances
            .lock()
            .map_err(|_| anyhow::anyhow!("balances lock poisoned"))?;
        let balance = balances.entry(account).or_default();
        *balance += self.sign * amount;

        tracing::info!(
            %account,
            message_type = self.message_type,
            amount,
            balance = *balance,
            position = message.position(),
            "balance updated"
        );
        Ok(())
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let store = MessageStore::new(Arc::new(InMemoryRepository::new()));
    let balances: Balances = Arc::default();

    let config = SubscriberConfig::builder()
        .subscribe_to_category("account")
        .poll_time(Duration::from_millis(50))
        .batch_size(10)
        .build()?;
    let subscriber = store.create_subscriber(
        "balances",
        vec![
            Arc::new(BalanceHandler {
                message_type: "Deposited",
                sign: 1,
                balances: balances.clone(),
            }),
            Arc::new(BalanceHandler {
                message_type: "Withdrawn",
                sign: -1,
                balances: balances.clone(),
            }),
        ],
        config,
    )?;

    let (ctx, cancel) = Context::with_timeout(Duration::from_secs(3));
    let running = tokio::spawn({
        let ctx = ctx.clone();
        async move { subscriber.start(&ctx).await }
    });

    let accounts = [Uuid::new_v4(), Uuid::new_v4()];
    for round in 1..=5 {
        for account in accounts {
            write(&store, &ctx, account, "Deposited", &Amount { amount: round * 10 }).await?;
        }
        write(&store, &ctx, accounts[0], "Withdrawn", &Amount { amount: 5 }).await?;
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => cancel.cancel(),
        _ = ctx.cancelled() => {}
    }
    match running.await? {
        Ok(()) | Err(Error::Cancelled) => {}
        Err(e) => return Err(e.into()),
    }

    let balances = balances
        .lock()
        .map_err(|_| anyhow::anyhow!("balances lock poisoned"))?;
    for (account, balance) in balances.iter() {
        println!("{account}: {balance}");
    }
    Ok(())
}

async fn write<T: Serialize>(
    store: &MessageStore,
    ctx: &Context,
    account: Uuid,
    message_type: &str,
    data: &T,
) -> Result<()> {
    let event = Event::new("account", account, message_type).with_data(data)?;
    store
        .write(ctx, &event.into(), WriteOptions::default())
        .await?;
    Ok(())
}
