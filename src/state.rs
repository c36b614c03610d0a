use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::earnings::EarningsLedger;
use crate::engine::queue::DispatchRequest;
use crate::models::assignment::Assignment;
use crate::models::delivery::Delivery;
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::registry::CourierRegistry;
use crate::tracking::TrackingHub;

pub struct AppState {
    pub config: Config,
    pub registry: CourierRegistry,
    pub orders: DashMap<Uuid, Order>,
    pub deliveries: DashMap<Uuid, Delivery>,
    pub assignments: DashMap<Uuid, Assignment>,
    pub earnings: EarningsLedger,
    pub tracking: TrackingHub,
    pub dispatch_tx: mpsc::Sender<DispatchRequest>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> (Self, mpsc::Receiver<DispatchRequest>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_size);
        let tracking = TrackingHub::new(config.event_buffer_size);

        (
            Self {
                config,
                registry: CourierRegistry::new(),
                orders: DashMap::new(),
                deliveries: DashMap::new(),
                assignments: DashMap::new(),
                earnings: EarningsLedger::new(),
                tracking,
                dispatch_tx,
                metrics: Metrics::new(),
            },
            dispatch_rx,
        )
    }
}
