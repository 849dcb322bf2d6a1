//! ロールアウトのステートマシン

mod controller;
mod phase;
mod pod;
mod policy;
mod state;

pub use controller::{
    Collaborators, NoopObserver, RolloutController, RolloutObserver, RolloutReport, RunOutcome,
};
pub use phase::{InvalidTransition, RolloutPhase};
pub use pod::{ClusterEvent, PodObservation, PodState, Side};
pub use policy::RolloutPolicy;
pub use state::RolloutState;
