//! Message bus glue.
//!
//! The real bus transport is external; this module provides:
//! - the message shape and topic/payload definitions (`protocol`)
//! - an in-process dispatcher with RAII subscriptions (`local`)
//! - a JSON-lines bridge so the controller can sit behind stdin/stdout (`session`)

mod local;
mod protocol;
mod session;


pub use local::{BusEmitter, Handler, LocalBus, Subscription, SubscriptionSet};
pub use protocol::{
    idle_activation_topic, topics, BrightnessAuto, BrightnessSet, HandlerStart, IdleDirective,
    IdleRegistration, Message, PageShow, SelectIdle, UnregisterIdle, VisemeList,
};
pub use session::{run_bus_session, BusSession, SessionStats};
