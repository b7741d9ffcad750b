//! Delivery of authorized batches to the collector

pub mod client;
pub mod conditions;
pub mod delay;
pub mod request;
pub mod status;
pub mod worker;

pub use client::{HttpTransport, Transport};
pub use conditions::{
    BatteryState, BatteryStatus, BatteryStatusProvider, Blocker, DeliveryConditions,
    ManualConditions, NetworkInfoProvider, NetworkReachability,
};
pub use delay::UploadDelay;
pub use request::{RequestBuilder, UploadRequest};
pub use status::{classify_status, DeliveryStatus};
pub use worker::{CycleOutcome, SchedulerState, UploadHandle, UploadWorker};
