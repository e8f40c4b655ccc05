use crate::actions;
use crate::chunks::chunk_blocks;
use crate::job::ProcessBlocksJob;
use crate::queue::{BlockQueue, QueueEvent};
use crate::states::{Action, Event, SyncState, SyncStateMachine};
use block_processor::{BlockProcessor, BlockchainEvent, CleanseOptions, Services, StateStore};
use chain::config::{BOOT_POLL_INTERVAL_SECS, CLEANSE_PEER_COUNT, SKIP_STARTED_CHECK_ENV, SYNCED_BLOCKTIMES};
use chain::ChainConfig;
use containers::{Block, BlockPing};
use metrics::Metrics;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Entry point for everything that feeds or steers the chain.
///
/// Owns the sync state machine, the block queue and the chain state store.
/// State-entry actions run on a dedicated task in dispatch order, never
/// inside [`Blockchain::dispatch`] itself.
pub struct Blockchain {
    this: Weak<Blockchain>,
    config: Arc<ChainConfig>,
    services: Services,
    state: Arc<StateStore>,
    processor: BlockProcessor,
    metrics: Arc<Metrics>,
    machine: Mutex<SyncStateMachine>,
    actions: mpsc::UnboundedSender<Action>,
    queue: BlockQueue<ProcessBlocksJob>,
    stopped: AtomicBool,
    booted: AtomicBool,
    missed_blocks: AtomicU64,
    last_health_check: Mutex<Option<Instant>>,
    wake_up: Mutex<Option<JoinHandle<()>>>,
    wake_up_generation: AtomicU64,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Blockchain {
    /// Build the controller on top of `genesis` and spawn its worker tasks.
    ///
    /// Must be called from within a Tokio runtime. The head is loaded from
    /// the database when the node boots.
    pub fn new(config: Arc<ChainConfig>, services: Services, genesis: Arc<Block>, metrics: Arc<Metrics>) -> Arc<Self> {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let state = Arc::new(StateStore::new(genesis, config.options.max_last_blocks));
        state.set_network_start(config.options.network_start);
        let processor = BlockProcessor::new(config.clone(), state.clone(), services.clone());

        let blockchain = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            services,
            state,
            processor,
            metrics,
            machine: Mutex::new(SyncStateMachine::new()),
            actions: action_tx,
            queue: BlockQueue::new(queue_tx),
            stopped: AtomicBool::new(false),
            booted: AtomicBool::new(false),
            missed_blocks: AtomicU64::new(0),
            last_health_check: Mutex::new(None),
            wake_up: Mutex::new(None),
            wake_up_generation: AtomicU64::new(0),
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        });

        let action_runner = tokio::spawn(run_actions(Arc::downgrade(&blockchain), action_rx));
        let queue_listener = tokio::spawn(listen_queue(Arc::downgrade(&blockchain), queue_rx));
        blockchain.tasks.lock().extend([action_runner, queue_listener]);
        blockchain.queue.start();
        blockchain
    }

    /// Feed `event` to the state machine and schedule the entry actions of
    /// the resulting state.
    pub fn dispatch(&self, event: Event) {
        let transition = self.machine.lock().transition(event);
        let Some(transition) = transition else {
            debug!(state = %self.state(), event = ?event, "Event ignored");
            return;
        };

        debug!(
            from = %transition.from,
            to = %transition.to,
            event = ?event,
            "State transition"
        );
        for action in transition.actions {
            if self.actions.send(*action).is_err() {
                warn!(action = ?action, "Action runner is gone");
            }
        }
    }

    /// Start the node and wait until it reports started, unless skipped.
    pub async fn boot(&self, skip_started_check: bool) -> bool {
        info!("Starting blockchain manager");

        self.stopped.store(false, Ordering::SeqCst);
        self.queue.start();
        self.machine.lock().reset();
        self.state.set_started(false);
        self.dispatch(Event::Start);

        let skip = skip_started_check
            || self.config.options.skip_started_check
            || std::env::var(SKIP_STARTED_CHECK_ENV).is_ok_and(|value| !value.is_empty());
        if !skip {
            while !self.state.is_started() && !self.is_stopped() {
                tokio::time::sleep(Duration::from_secs(BOOT_POLL_INTERVAL_SECS)).await;
            }
        }

        let options = CleanseOptions {
            force_ping: true,
            peer_count: CLEANSE_PEER_COUNT,
        };
        if let Err(err) = self.services.network.cleanse_peers(options).await {
            warn!(error = %err, "Failed to cleanse peers");
        }

        self.subscribe_to_validator_events();
        self.booted.store(true, Ordering::SeqCst);
        true
    }

    /// Stop the node. Later calls do nothing.
    pub fn dispose(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping blockchain manager");

        self.state.set_started(false);
        self.clear_wake_up();
        self.dispatch(Event::Stop);
        self.queue.stop();
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.abort();
        }
    }

    /// Take a block from the network or the local forger.
    pub fn handle_incoming_block(&self, block: Arc<Block>, from_forger: bool) {
        self.push_ping_block(&block, from_forger);

        if self.state.is_started() {
            self.dispatch(Event::NewBlock);
            self.enqueue_blocks(vec![block.clone()]);
            self.services.events.dispatch(BlockchainEvent::BlockReceived(block));
        } else {
            info!(
                height = block.height(),
                id = %block.id(),
                "Block disregarded because blockchain is not ready"
            );
            self.services.events.dispatch(BlockchainEvent::BlockDisregarded(block));
        }
    }

    /// Queue `blocks` in chunks and make sure the queue is running.
    pub fn enqueue_blocks(&self, blocks: Vec<Arc<Block>>) {
        if blocks.is_empty() {
            return;
        }

        let chunks = chunk_blocks(
            blocks,
            self.config.options.chunk_max_blocks(),
            &self.config.milestone_heights(),
        );
        for chunk in chunks {
            self.queue.push(ProcessBlocksJob::new(self.this.clone(), chunk));
        }
        self.metrics.set_queue_jobs(self.queue.size());
        self.queue.resume();
    }

    pub fn clear_and_stop_queue(&self) {
        self.state.set_last_downloaded_block(self.state.last_block());
        self.queue.pause();
        self.clear_queue();
    }

    pub fn clear_queue(&self) {
        self.queue.clear();
        self.metrics.set_queue_jobs(0);
    }

    pub fn reset_last_downloaded_block(&self) {
        self.state.reset_last_downloaded_block();
    }

    /// Arm the wake-up timer.
    pub fn set_wake_up(&self) {
        let generation = self.wake_up_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.this.clone();
        let timeout = self.config.options.wake_up_timeout();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(blockchain) = this.upgrade() else {
                return;
            };
            if blockchain.wake_up_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            blockchain.state.set_wake_up_set(false);
            blockchain.dispatch(Event::WakeUp);
        });

        if let Some(previous) = self.wake_up.lock().replace(handle) {
            previous.abort();
        }
        self.state.set_wake_up_set(true);
    }

    /// Restart the wake-up countdown.
    pub fn reset_wake_up(&self) {
        self.clear_wake_up();
        self.set_wake_up();
    }

    pub fn force_wakeup(&self) {
        self.clear_wake_up();
        self.dispatch(Event::WakeUp);
    }

    fn clear_wake_up(&self) {
        self.wake_up_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.wake_up.lock().take() {
            handle.abort();
        }
        self.state.set_wake_up_set(false);
    }

    /// Count a missed block and, past the fault-tolerance bound, check
    /// whether the node sits on a fork.
    pub async fn check_missing_blocks(&self) {
        let missed = self.missed_blocks.fetch_add(1, Ordering::SeqCst) + 1;
        let active = self.config.milestone_at(self.state.last_height()).active_validators;
        let threshold = active as f64 / 3.0 - 1.0;

        if (missed as f64) < threshold {
            return;
        }
        let probability = self.config.options.missed_block_probability;
        let draw = rand::thread_rng().gen_bool(probability);
        if !draw {
            debug!(missed, "Skipping network health check this time");
            return;
        }
        self.reset_missed_blocks();

        let now = Instant::now();
        {
            let mut last_check = self.last_health_check.lock();
            let cooldown = self.config.options.network_health_cooldown();
            if last_check.is_some_and(|last| now.duration_since(last) < cooldown) {
                debug!("Network health was checked recently");
                return;
            }
            *last_check = Some(now);
        }

        match self.services.network.check_network_health().await {
            Ok(status) if status.forked => {
                warn!(
                    blocks_to_rollback = ?status.blocks_to_rollback,
                    "Network health check reports a fork"
                );
                self.state.set_number_of_blocks_to_rollback(status.blocks_to_rollback);
                self.dispatch(Event::Fork);
            }
            Ok(_) => debug!("Network is healthy"),
            Err(err) => warn!(error = %err, "Network health check failed"),
        }
    }

    pub fn reset_missed_blocks(&self) {
        self.missed_blocks.store(0, Ordering::SeqCst);
    }

    pub fn missed_blocks(&self) -> u64 {
        self.missed_blocks.load(Ordering::SeqCst)
    }

    /// Whether `block` (the head by default) is recent enough to count as
    /// synced. Without peers there is nothing to compare against.
    pub fn is_synced(&self, block: Option<&Block>) -> bool {
        if !self.services.network.has_peers() {
            return true;
        }

        let head;
        let block = match block {
            Some(block) => block,
            None => {
                head = self.state.last_block();
                head.as_ref()
            }
        };
        let slots = self.processor.slots();
        let age = slots.time().saturating_sub(block.timestamp());
        age < SYNCED_BLOCKTIMES * slots.blocktime(block.height())
    }

    /// Record `block` as the competing block and start fork recovery.
    pub fn fork_block(&self, block: Arc<Block>, blocks_to_rollback: Option<u64>) {
        info!(
            height = block.height(),
            id = %block.id(),
            "Fork detected"
        );
        self.state.set_forked_block(block);
        if blocks_to_rollback.is_some() {
            self.state.set_number_of_blocks_to_rollback(blocks_to_rollback);
        }
        self.clear_and_stop_queue();
        self.dispatch(Event::Fork);
    }

    pub fn ping_block(&self, block: &Block) -> bool {
        self.state.ping_block(block, self.services.clock.now())
    }

    pub fn push_ping_block(&self, block: &Block, from_forger: bool) {
        self.state.push_ping_block(block, from_forger, self.services.clock.now());
    }

    pub fn get_block_ping(&self) -> Option<BlockPing> {
        self.state.block_ping()
    }

    pub fn get_last_block(&self) -> Arc<Block> {
        self.state.last_block()
    }

    pub fn get_last_height(&self) -> u64 {
        self.state.last_height()
    }

    pub fn get_last_downloaded_block(&self) -> Arc<Block> {
        self.state.last_downloaded_block()
    }

    pub fn state(&self) -> SyncState {
        self.machine.lock().state()
    }

    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    pub fn is_queue_idle(&self) -> bool {
        self.queue.is_idle()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn state_store(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn processor(&self) -> &BlockProcessor {
        &self.processor
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn resume_queue(&self) {
        self.queue.resume();
    }

    /// Resolves once no job is running.
    pub(crate) async fn wait_for_queue_idle(&self) {
        self.queue.wait_idle().await;
    }

    fn subscribe_to_validator_events(&self) {
        let mut subscriptions = self.subscriptions.lock();
        for subscription in subscriptions.drain(..) {
            subscription.abort();
        }
        let receiver = self.services.events.subscribe();
        subscriptions.push(tokio::spawn(listen_validator_events(self.this.clone(), receiver)));
    }
}

impl Drop for Blockchain {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        for subscription in self.subscriptions.get_mut().drain(..) {
            subscription.abort();
        }
        if let Some(handle) = self.wake_up.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_actions(blockchain: Weak<Blockchain>, mut receiver: mpsc::UnboundedReceiver<Action>) {
    while let Some(action) = receiver.recv().await {
        let Some(blockchain) = blockchain.upgrade() else {
            return;
        };
        if let Err(err) = actions::run(&blockchain, action).await {
            error!(action = ?action, error = %err, "State action failed");
        }
    }
}

async fn listen_queue(blockchain: Weak<Blockchain>, mut receiver: mpsc::UnboundedReceiver<QueueEvent>) {
    while let Some(event) = receiver.recv().await {
        let Some(blockchain) = blockchain.upgrade() else {
            return;
        };
        blockchain.metrics.set_queue_jobs(blockchain.queue.size());
        match event {
            QueueEvent::Drain => blockchain.dispatch(Event::ProcessFinished),
            QueueEvent::JobError(err) => error!(error = %err, "Failed to process chunk of blocks"),
        }
    }
}

async fn listen_validator_events(blockchain: Weak<Blockchain>, mut receiver: broadcast::Receiver<BlockchainEvent>) {
    loop {
        let event = match receiver.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event listener lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let Some(blockchain) = blockchain.upgrade() else {
            return;
        };
        match event {
            BlockchainEvent::ForgerMissing => blockchain.check_missing_blocks().await,
            BlockchainEvent::RoundApplied => blockchain.reset_missed_blocks(),
            _ => {}
        }
    }
}
