//! Threshold-based autoscaling decisions per region

mod controller;
mod policy;

pub use controller::{RegionScalingMetrics, ScalingConfig, ScalingController, ScalingMetrics};
pub use policy::{evaluate_scaling, ScalingAction, ScalingDecision, ScalingEvent, ScalingPolicy};
