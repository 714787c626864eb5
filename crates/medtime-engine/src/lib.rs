//! Medication reminder engine: dose scheduling, due-reminder polling,
//! multi-channel delivery, stock keeping and history retention.

pub mod actions;
pub mod channels;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod horizon;
pub mod ledger;
pub mod medications;
pub mod notification;
pub mod poller;
pub mod schedule;
pub mod sweeper;
pub mod sync;
pub mod ticker;

use std::sync::Arc;

use medtime_db::Database;
use medtime_db::models::MedicationRow;

pub use actions::{ActionOutcome, ChannelActions};
pub use channels::{ChannelError, ChannelSender, Delivery};
pub use clock::{Clock, SystemClock};
pub use config::{EngineConfig, StockPolicy};
pub use dispatcher::Dispatcher;
pub use error::{EngineError, Result};
pub use ledger::StockLedger;
pub use medications::NewMedication;
pub use notification::Notification;
pub use sync::DesktopSync;

use crate::poller::Poller;
use crate::sweeper::Sweeper;
use crate::ticker::PeriodicTask;

/// Everything the engine needs, wired together once at startup.
pub struct Engine {
    pub db: Arc<Database>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<EngineConfig>,
    pub dispatcher: Arc<Dispatcher>,
    pub ledger: Arc<StockLedger>,
    pub actions: ChannelActions,
    pub sync: DesktopSync,
    poller: Poller,
    sweeper: Arc<Sweeper>,
}

impl Engine {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        senders: Vec<Arc<dyn ChannelSender>>,
    ) -> Self {
        let config = Arc::new(config);

        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            clock.clone(),
            senders,
            config.channel_timeout,
            config.low_stock_threshold,
        ));
        let ledger = Arc::new(StockLedger::new(
            db.clone(),
            clock.clone(),
            config.stock_policy,
            config.reactive_horizon_days,
            config.default_timezone,
        ));
        let actions = ChannelActions::new(db.clone(), ledger.clone(), config.default_timezone);
        let sync = DesktopSync::new(db.clone(), clock.clone(), config.clone());
        let poller = Poller::new(db.clone(), clock.clone(), config.clone(), dispatcher.clone());
        let sweeper = Arc::new(Sweeper::new(db.clone(), clock.clone(), config.clone()));

        Self {
            db,
            clock,
            config,
            dispatcher,
            ledger,
            actions,
            sync,
            poller,
            sweeper,
        }
    }

    /// Start the due-check and cleanup loops. Both run one pass right away.
    pub fn start(&self) -> EngineHandle {
        let poller = PeriodicTask::start(
            "reminder poller",
            self.config.check_interval,
            Arc::new(self.poller.clone()),
        );
        let sweeper = PeriodicTask::start(
            "retention sweeper",
            self.config.cleanup_interval,
            self.sweeper.clone(),
        );
        EngineHandle { poller, sweeper }
    }

    /// Intake a medication and schedule its first batch of reminders.
    pub fn create_medication(&self, new: NewMedication) -> Result<(MedicationRow, usize)> {
        let user = self
            .db
            .get_user(new.user_id)?
            .ok_or(EngineError::NotFound("user", new.user_id))?;
        let now = self.clock.now();
        let now_local = clock::user_now(now, &user, self.config.default_timezone);
        medications::create_medication(
            &self.db,
            new,
            now_local,
            now,
            self.config.initial_horizon_days,
        )
    }
}

/// Running background loops. Dropping it leaves them running; call `stop`.
pub struct EngineHandle {
    poller: PeriodicTask,
    sweeper: PeriodicTask,
}

impl EngineHandle {
    /// Stop both loops, letting any pass in progress finish.
    pub async fn stop(self) {
        self.poller.stop().await;
        self.sweeper.stop().await;
    }
}
