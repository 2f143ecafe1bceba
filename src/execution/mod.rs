// Position reconciliation and order lifecycle
pub mod order_manager;
pub mod reconciler;

pub use order_manager::{floor_to_step, CycleReport, OrderLifecycleManager};
pub use reconciler::{
    position_state, PositionReconciler, PositionState, ReconcileAction, ReconcileDecision,
};
