pub mod gate;

pub use gate::{
    ip_rate_limit, require, CurrentIdentity, GateStage, Guard, IpGate, Requirement,
    RequestPipeline,
};
