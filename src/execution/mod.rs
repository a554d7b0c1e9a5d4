//! Execution planning: order-book walks, slippage, slicing, and the
//! market-impact model layered on top when history is available.

pub mod impact;
pub mod planner;

pub use impact::ImpactEstimate;
pub use planner::{
    simulate, DepthLevel, ExecutionPlan, ExecutionPlanParams, ExecutionPlanner, ExecutionSide,
};
