//! Lifecycle supervision for the bot fleet. Each bot runs as its own
//! dispatcher task: `Initializing` until the token answers `get_me`, then
//! `Active`; a crash or failed heartbeat moves it to `Failed` and it is
//! restarted up to the budget, after which it is `Dead` until the process
//! restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::database::{Bot as BotRow, BotRepository};

use super::handlers;
use super::{BotContext, BotServices};

const MAX_RESTARTS: u32 = 3;
const RESTART_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Initializing,
    Active,
    Failed,
    Dead,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub heartbeat_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(300),
        }
    }
}

type StatusMap = Arc<RwLock<HashMap<i64, BotStatus>>>;

pub struct BotSupervisor {
    bots: BotRepository,
    services: Arc<BotServices>,
    config: SupervisorConfig,
    statuses: StatusMap,
}

impl BotSupervisor {
    pub fn new(bots: BotRepository, services: Arc<BotServices>, config: SupervisorConfig) -> Self {
        Self {
            bots,
            services,
            config,
            statuses: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Status snapshot for the health endpoint.
    pub fn statuses(&self) -> StatusMap {
        Arc::clone(&self.statuses)
    }

    /// Spawns one supervised task per active bot.
    pub async fn spawn_all(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> crate::error::AppResult<Vec<JoinHandle<()>>> {
        let active = self.bots.list_active().await?;
        info!(count = active.len(), "starting bot fleet");

        let mut handles = Vec::with_capacity(active.len());
        for bot_row in active {
            handles.push(self.spawn_one(bot_row, shutdown_rx.clone()));
        }
        Ok(handles)
    }

    fn spawn_one(&self, bot_row: BotRow, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let services = Arc::clone(&self.services);
        let statuses = Arc::clone(&self.statuses);
        let heartbeat = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let bot_id = bot_row.id;
            set_status(&statuses, bot_id, BotStatus::Initializing).await;

            let mut restarts = 0u32;
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match run_bot(&bot_row, &services, &statuses, heartbeat, shutdown_rx.clone()).await
                {
                    RunExit::Shutdown => break,
                    RunExit::Failed(reason) => {
                        restarts += 1;
                        set_status(&statuses, bot_id, BotStatus::Failed).await;
                        if restarts > MAX_RESTARTS {
                            error!(bot_id, %reason, "bot exhausted restart budget");
                            set_status(&statuses, bot_id, BotStatus::Dead).await;
                            return;
                        }
                        warn!(bot_id, restarts, %reason, "bot failed, restarting");
                        tokio::time::sleep(RESTART_DELAY).await;
                    }
                }
            }
            set_status(&statuses, bot_id, BotStatus::Shutdown).await;
            info!(bot_id, "bot shut down");
        })
    }
}

enum RunExit {
    Shutdown,
    Failed(String),
}

async fn run_bot(
    bot_row: &BotRow,
    services: &Arc<BotServices>,
    statuses: &StatusMap,
    heartbeat_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> RunExit {
    let bot = Bot::new(bot_row.token.clone());

    // Token sanity check before entering the update loop.
    match bot.get_me().await {
        Ok(me) => {
            info!(bot_id = bot_row.id, username = ?me.username(), "bot online");
        }
        Err(err) => return RunExit::Failed(format!("get_me failed: {}", err)),
    }
    set_status(statuses, bot_row.id, BotStatus::Active).await;

    let context = Arc::new(BotContext {
        bot_id: bot_row.id,
        services: Arc::clone(services),
    });

    let mut dispatcher = Dispatcher::builder(bot.clone(), handlers::schema())
        .dependencies(dptree::deps![context])
        .default_handler(|_| async {})
        .build();
    let shutdown_token = dispatcher.shutdown_token();

    let heartbeat_bot = bot.clone();
    let heartbeat = async move {
        loop {
            tokio::time::sleep(heartbeat_interval).await;
            if let Err(err) = heartbeat_bot.get_me().await {
                return format!("heartbeat failed: {}", err);
            }
        }
    };

    tokio::select! {
        _ = dispatcher.dispatch() => {
            RunExit::Failed("dispatcher stopped unexpectedly".to_string())
        }
        reason = heartbeat => {
            RunExit::Failed(reason)
        }
        _ = shutdown_rx.changed() => {
            if let Ok(shutdown) = shutdown_token.shutdown() {
                shutdown.await;
            }
            RunExit::Shutdown
        }
    }
}

async fn set_status(statuses: &StatusMap, bot_id: i64, status: BotStatus) {
    statuses.write().await.insert(bot_id, status);
}
