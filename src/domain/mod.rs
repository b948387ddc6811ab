pub mod component;

pub use component::{
    local_hostname, ComponentDefinition, ComponentKind, ComponentSetting, ErrorEvent,
    HeartbeatRecord, HeartbeatStatus, HeartbeatUpdate, InstanceIdentity, Liveness, NewErrorEvent,
};
