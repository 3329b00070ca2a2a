pub mod error;
pub mod ids;
pub mod model;
pub mod typeclass;
pub mod world;

pub use error::{HookError, WorldError};
pub use ids::{AccountId, ChannelId, ObjectId, ScriptId, SessionId};
pub use model::{
    AccountRecord, ChannelRecord, ObjectRecord, Record, ScriptRecord, ScriptState, Tag,
    ACCOUNT_CATEGORY, PUPPETED_TAG,
};
pub use typeclass::{DefaultTypeclass, Instance, InstanceHook, Typeclass, TypeclassRegistry};
pub use world::{Cached, HookFailure, HookReport, ScriptRestartReport, ScriptStopReport, World};
