use arc_swap::{ArcSwap, ArcSwapOption};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Battery level (percent) at or below which uploads wait unless charging
const MIN_BATTERY_LEVEL: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkReachability {
    Yes,
    /// Reachability cannot be determined; uploads are attempted
    Maybe,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryState {
    Unknown,
    Unplugged,
    Charging,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatteryStatus {
    pub state: BatteryState,
    /// Charge in percent, 0-100
    pub level: u8,
    pub low_power_mode: bool,
}

pub trait NetworkInfoProvider: Send + Sync {
    fn reachability(&self) -> NetworkReachability;
}

/// `None` means the device has no battery (or does not report one)
pub trait BatteryStatusProvider: Send + Sync {
    fn battery_status(&self) -> Option<BatteryStatus>;
}

/// Conditions set by the host
///
/// Starts reachable with no battery reported.
#[derive(Debug)]
pub struct ManualConditions {
    network: ArcSwap<NetworkReachability>,
    battery: ArcSwapOption<BatteryStatus>,
}

impl Default for ManualConditions {
    fn default() -> Self {
        Self {
            network: ArcSwap::from_pointee(NetworkReachability::Yes),
            battery: ArcSwapOption::empty(),
        }
    }
}

impl ManualConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_network(&self, reachability: NetworkReachability) {
        self.network.store(Arc::new(reachability));
    }

    pub fn set_battery(&self, status: Option<BatteryStatus>) {
        self.battery.store(status.map(Arc::new));
    }
}

impl NetworkInfoProvider for ManualConditions {
    fn reachability(&self) -> NetworkReachability {
        **self.network.load()
    }
}

impl BatteryStatusProvider for ManualConditions {
    fn battery_status(&self) -> Option<BatteryStatus> {
        self.battery.load().as_deref().copied()
    }
}

/// Why an upload cycle was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Blocker {
    NetworkUnreachable,
    BatteryLow { level: u8 },
    LowPowerMode,
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkUnreachable => write!(f, "network unreachable"),
            Self::BatteryLow { level } => write!(f, "battery low ({}%)", level),
            Self::LowPowerMode => write!(f, "low power mode"),
        }
    }
}

/// Environmental gates checked before every upload cycle
#[derive(Clone)]
pub struct DeliveryConditions {
    network: Arc<dyn NetworkInfoProvider>,
    battery: Arc<dyn BatteryStatusProvider>,
}

impl DeliveryConditions {
    pub fn new(
        network: Arc<dyn NetworkInfoProvider>,
        battery: Arc<dyn BatteryStatusProvider>,
    ) -> Self {
        Self { network, battery }
    }

    /// Both gates backed by the same host-controlled state
    pub fn manual(conditions: Arc<ManualConditions>) -> Self {
        Self {
            network: conditions.clone(),
            battery: conditions,
        }
    }

    pub fn check(&self) -> Result<(), Vec<Blocker>> {
        let mut blockers = Vec::new();

        if self.network.reachability() == NetworkReachability::No {
            blockers.push(Blocker::NetworkUnreachable);
        }

        if let Some(battery) = self.battery.battery_status() {
            let plugged = matches!(battery.state, BatteryState::Charging | BatteryState::Full);
            if !plugged && battery.level <= MIN_BATTERY_LEVEL {
                blockers.push(Blocker::BatteryLow {
                    level: battery.level,
                });
            }
            if battery.low_power_mode {
                blockers.push(Blocker::LowPowerMode);
            }
        }

        if blockers.is_empty() {
            Ok(())
        } else {
            Err(blockers)
        }
    }
}

impl Default for DeliveryConditions {
    fn default() -> Self {
        Self::manual(Arc::new(ManualConditions::new()))
    }
}

impl fmt::Debug for DeliveryConditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryConditions")
            .field("network", &self.network.reachability())
            .field("battery", &self.battery.battery_status())
            .finish()
    }
}
